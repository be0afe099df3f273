//! TCP heartbeat handler.
//!
//! Accepts stream connections, registers each by remote address and pings every
//! registered stream on a fixed interval. A write that fails, or does not finish
//! within one interval, marks the peer as gone.

use log::{debug, error, info, warn};
use shared::{Message, TcpConnection, TcpSocketListener, TransportError, WireFormat};
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, MissedTickBehavior};

use crate::error::ServerError;
use crate::registry::ConnectionRegistry;
use crate::shutdown::ShutdownListener;

/// Hook invoked when the heartbeat loses a peer.
///
/// This is where a resynchronisation payload would be pushed; none exists yet.
pub trait ErrorCorrection: Send + Sync {
    fn peer_lost(&self, peer: &str);
}

/// Only records the loss in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCorrections;

impl ErrorCorrection for LogCorrections {
    fn peer_lost(&self, peer: &str) {
        warn!("[TCP] No correction sent to {}", peer);
    }
}

/// Why a ping never reached its peer
#[derive(Debug)]
enum Lost {
    /// The peer closed or reset the stream
    Gone(TransportError),
    /// Any other write failure
    Failed(TransportError),
    /// The write did not finish within the allowed time
    Stalled(Duration),
}

impl fmt::Display for Lost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lost::Gone(e) => write!(f, "peer went away ({})", e),
            Lost::Failed(e) => write!(f, "write failed ({})", e),
            Lost::Stalled(wait) => write!(f, "write stalled for {:?}", wait),
        }
    }
}

/// Runs one ping write, giving up after `wait`.
async fn deliver<F>(wait: Duration, write: F) -> Result<(), Lost>
where
    F: Future<Output = Result<usize, TransportError>>,
{
    match timeout(wait, write).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) if e.is_peer_gone() => Err(Lost::Gone(e)),
        Ok(Err(e)) => Err(Lost::Failed(e)),
        Err(_) => Err(Lost::Stalled(wait)),
    }
}

pub struct HeartbeatHandler {
    listener: TcpSocketListener,
    connections: Arc<ConnectionRegistry<TcpConnection>>,
    interval: Duration,
    corrections: Arc<dyn ErrorCorrection>,
    shutdown: ShutdownListener,
}

impl HeartbeatHandler {
    pub fn new(listener: TcpSocketListener, interval: Duration, shutdown: ShutdownListener) -> Self {
        Self {
            listener,
            connections: Arc::new(ConnectionRegistry::new()),
            interval,
            corrections: Arc::new(LogCorrections),
            shutdown,
        }
    }

    pub async fn bind(
        addr: &str,
        format: WireFormat,
        interval: Duration,
        shutdown: ShutdownListener,
    ) -> Result<Self, ServerError> {
        let listener = TcpSocketListener::bind(addr, format)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self::new(listener, interval, shutdown))
    }

    pub fn with_corrections(mut self, corrections: Arc<dyn ErrorCorrection>) -> Self {
        self.corrections = corrections;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn connections(&self) -> Arc<ConnectionRegistry<TcpConnection>> {
        Arc::clone(&self.connections)
    }

    pub async fn handle(mut self) -> Result<(), ServerError> {
        info!("[TCP] Started heartbeat socket on {}", self.local_addr()?);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // New streams are greeted on accept, so the immediate first tick is skipped.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = &mut self.shutdown => {
                    info!("[TCP] Stopping...");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(stream) => self.register(stream).await,
                    Err(e) if e.is_closed() => break,
                    Err(e) => error!("[TCP] Could not accept connection: {}", e),
                },
                _ = ticker.tick() => self.ping_all().await,
            }
        }

        self.connections.clear().await;
        warn!("[TCP] Closed");
        Ok(())
    }

    /// Greets the new stream with a ping and tracks it if that succeeds.
    async fn register(&self, stream: TcpConnection) {
        let peer = stream.peer_addr().to_string();
        if let Err(lost) = deliver(self.interval, stream.write(&Message::ping())).await {
            warn!("[TCP] Dropping {} before registering: {}", peer, lost);
            return;
        }
        if self.connections.upsert(peer.as_str(), stream).await {
            info!("[TCP] Heartbeat connection from {}", peer);
        }
    }

    /// Pings every registered stream, each write bounded by the interval.
    ///
    /// A stream that fails or stalls is dropped once the traversal is done, so a
    /// peer that stops reading cannot hold up accepts or shutdown for longer
    /// than one interval per stream.
    async fn ping_all(&self) {
        let lost: Vec<String> = {
            let view = self.connections.iterate().await;
            let mut lost = Vec::new();
            for (peer, stream) in view.iter() {
                match deliver(self.interval, stream.write(&Message::ping())).await {
                    Ok(()) => debug!("[TCP] Pinged {}", peer),
                    Err(reason @ Lost::Gone(_)) => {
                        info!("[TCP] Heartbeat to {}: {}", peer, reason);
                        lost.push(peer.to_string());
                    }
                    Err(reason) => {
                        warn!("[TCP] Heartbeat to {}: {}", peer, reason);
                        lost.push(peer.to_string());
                    }
                }
            }
            lost
        };

        for peer in lost {
            self.connections.remove(&peer).await;
            info!("[TCP] Client {} disconnected", peer);
            self.corrections.peer_lost(&peer);
        }
    }
}
