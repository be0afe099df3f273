//! # Session Server Library
//!
//! The authoritative side of a small real-time multiplayer game. It accepts
//! datagrams from up to four players, keeps the single shared view of who is
//! connected, where they are and which slot they hold, and pushes that view
//! back to every participant. A parallel TCP channel checks liveness.
//!
//! ## Handlers
//!
//! The server is three independent tasks, each owning its own socket or
//! channel and each stopping on its own shutdown notification:
//!
//! ### Session Handler (`network`)
//! The UDP state machine. Handshakes new clients, hands out slots, fans out
//! player updates, serves resend requests from a bounded history and cleans up
//! on disconnect. Datagrams are processed one at a time in read order.
//!
//! ### Heartbeat Handler (`heartbeat`)
//! Accepts TCP streams and pings each one on a fixed interval. A failed write
//! removes the stream and calls the [`heartbeat::ErrorCorrection`] hook.
//!
//! ### State Monitor (`monitor`)
//! Logs every change notification emitted by the shared game state.
//!
//! ## Shared Structures
//!
//! - [`registry::ConnectionRegistry`]: id to connection map whose traversal
//!   holds the read lock, so a broadcast never sees a half-removed peer
//! - [`game::SharedGameState`]: players keyed by connection id, every mutation
//!   reported on a best-effort notification channel
//! - [`history::UpdateHistory`]: the last N snapshots, one per datagram
//! - [`client_manager::ClientManager`]: sessions and the free-slot pool
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::Config;
//! use server::shutdown::wait_for_signal;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::local();
//!     server::run(config, async {
//!         let _ = wait_for_signal().await;
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod error;
pub mod game;
pub mod heartbeat;
pub mod history;
pub mod monitor;
pub mod network;
pub mod registry;
pub mod shutdown;

use log::{info, warn};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Config;
use crate::error::ServerError;
use crate::game::SharedGameState;
use crate::heartbeat::{ErrorCorrection, HeartbeatHandler};
use crate::monitor::StateMonitor;
use crate::network::SessionHandler;
use crate::shutdown::{join_all, ShutdownCoordinator};

/// Every handler, bound and ready to be spawned.
pub struct Server {
    session: SessionHandler,
    heartbeat: HeartbeatHandler,
    monitor: StateMonitor,
    coordinator: ShutdownCoordinator,
    state: Arc<SharedGameState>,
}

impl Server {
    /// Validates `config` and binds both sockets.
    pub async fn bind(config: &Config) -> Result<Self, ServerError> {
        config.validate()?;

        let mut coordinator = ShutdownCoordinator::new();
        let (state, notifications) = SharedGameState::new(config.notification_capacity);
        let state = Arc::new(state);

        let session = SessionHandler::bind(
            &config.udp_addr(),
            config.wire_format,
            Arc::clone(&state),
            config.history_capacity,
            coordinator.listener(),
        )
        .await?;
        let heartbeat = HeartbeatHandler::bind(
            &config.tcp_addr(),
            config.wire_format,
            config.heartbeat_interval(),
            coordinator.listener(),
        )
        .await?;
        let monitor = StateMonitor::new(notifications, coordinator.listener());

        Ok(Self {
            session,
            heartbeat,
            monitor,
            coordinator,
            state,
        })
    }

    pub fn with_corrections(mut self, corrections: Arc<dyn ErrorCorrection>) -> Self {
        self.heartbeat = self.heartbeat.with_corrections(corrections);
        self
    }

    pub fn udp_addr(&self) -> Result<SocketAddr, ServerError> {
        self.session.local_addr()
    }

    pub fn tcp_addr(&self) -> Result<SocketAddr, ServerError> {
        self.heartbeat.local_addr()
    }

    pub fn state(&self) -> Arc<SharedGameState> {
        Arc::clone(&self.state)
    }

    /// Spawns every handler, waits for `shutdown`, then stops and joins them.
    ///
    /// A handler that fails early is logged when joined; its siblings keep
    /// running until shutdown. Returns how many handlers failed.
    pub async fn serve<F>(self, shutdown: F) -> usize
    where
        F: Future<Output = ()>,
    {
        let handles = vec![
            ("UDP", tokio::spawn(self.session.handle())),
            ("TCP", tokio::spawn(self.heartbeat.handle())),
            ("STATE", tokio::spawn(self.monitor.handle())),
        ];

        shutdown.await;
        self.coordinator.trigger();
        join_all(handles).await
    }
}

/// Binds every handler from `config` and serves until `shutdown` completes.
pub async fn run<F>(config: Config, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()>,
{
    let server = Server::bind(&config).await?;
    info!(
        "Server listening on udp {} and tcp {} ({})",
        server.udp_addr()?,
        server.tcp_addr()?,
        config.wire_format
    );

    let failed = server.serve(shutdown).await;
    if failed > 0 {
        warn!("{} handler(s) stopped with an error", failed);
    }
    info!("Server shutdown complete");
    Ok(())
}
