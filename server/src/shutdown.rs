//! One cancellation notification per handler, then a join over all of them.

use log::{error, info, warn};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::ServerError;

/// Hands out listeners and fires them all at once.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    senders: Vec<oneshot::Sender<()>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one more handler and returns the listener it should own.
    pub fn listener(&mut self) -> ShutdownListener {
        let (sender, receiver) = oneshot::channel();
        self.senders.push(sender);
        ShutdownListener {
            receiver,
            fired: false,
        }
    }

    pub fn handlers(&self) -> usize {
        self.senders.len()
    }

    /// Sends one notification to every registered listener.
    pub fn trigger(self) {
        info!("[SIGNAL] Notifying {} handlers", self.senders.len());
        for sender in self.senders {
            if sender.send(()).is_err() {
                warn!("[SIGNAL] Handler already stopped before shutdown");
            }
        }
    }
}

/// Resolves once shutdown has been requested or the coordinator is gone.
///
/// Polling again after it resolved keeps returning ready, so a handler can
/// poll it from inside a loop.
#[derive(Debug)]
pub struct ShutdownListener {
    receiver: oneshot::Receiver<()>,
    fired: bool,
}

impl ShutdownListener {
    pub fn is_fired(&self) -> bool {
        self.fired
    }
}

impl Future for ShutdownListener {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.fired {
            return Poll::Ready(());
        }
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(_) => {
                self.fired = true;
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Awaits every handler, logging failures. Returns how many failed.
pub async fn join_all(handles: Vec<(&'static str, JoinHandle<Result<(), ServerError>>)>) -> usize {
    let mut failed = 0;
    for (name, handle) in handles {
        match handle.await {
            Ok(Ok(())) => info!("[SIGNAL] {} handler stopped", name),
            Ok(Err(e)) => {
                error!("[SIGNAL] {} handler failed: {}", name, e);
                failed += 1;
            }
            Err(e) => {
                error!("[SIGNAL] {} handler panicked: {}", name, ServerError::Join(e));
                failed += 1;
            }
        }
    }
    failed
}

/// Completes on Ctrl-C, or SIGTERM on unix.
pub async fn wait_for_signal() -> Result<(), ServerError> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate()).map_err(ServerError::Signal)?;
        tokio::select! {
            result = ctrl_c => {
                result.map_err(ServerError::Signal)?;
                info!("[SIGNAL] Received Ctrl+C, shutting down");
            }
            _ = terminate.recv() => {
                info!("[SIGNAL] Received terminate signal, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.map_err(ServerError::Signal)?;
        info!("[SIGNAL] Received Ctrl+C, shutting down");
    }

    Ok(())
}
