use shared::TransportError;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("could not bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: TransportError,
    },
    /// The address a client advertised during the handshake was unreachable.
    #[error("could not dial client at {from} on port '{port}': {source}")]
    Dial {
        from: SocketAddr,
        port: String,
        #[source]
        source: TransportError,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("handler task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("could not listen for shutdown signal: {0}")]
    Signal(#[source] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
