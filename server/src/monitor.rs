use log::{debug, info};
use tokio::sync::mpsc;

use crate::error::ServerError;
use crate::shutdown::ShutdownListener;

/// Drains state notifications into the debug log.
pub struct StateMonitor {
    notifications: mpsc::Receiver<String>,
    shutdown: ShutdownListener,
    seen: usize,
}

impl StateMonitor {
    pub fn new(notifications: mpsc::Receiver<String>, shutdown: ShutdownListener) -> Self {
        Self {
            notifications,
            shutdown,
            seen: 0,
        }
    }

    /// Runs until shutdown or until every state handle is gone. Returns the
    /// number of notifications logged.
    pub async fn run(mut self) -> usize {
        loop {
            tokio::select! {
                _ = &mut self.shutdown => break,
                tag = self.notifications.recv() => match tag {
                    Some(tag) => {
                        self.seen += 1;
                        debug!("[STATE] {}", tag);
                    }
                    None => break,
                },
            }
        }
        info!("[STATE] Monitor stopped after {} notifications", self.seen);
        self.seen
    }

    pub async fn handle(self) -> Result<(), ServerError> {
        self.run().await;
        Ok(())
    }
}
