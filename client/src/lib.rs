//! # Session Client Library
//!
//! A headless client for the session server. It speaks the whole protocol but
//! draws nothing and reads no keyboard.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! - [`network::SessionClient`]: handshake over UDP, then READY, local pose
//!   updates, resend requests and disconnect
//! - [`network::HeartbeatStream`]: the TCP liveness stream
//!
//! ### Game Module (`game`)
//! [`game::ClientGameState`] folds server messages into the client's view:
//! identity and slot, the other players, and whether movement is allowed.
//! Out-of-order updates are dropped unless the server marked them as a resend.

pub mod game;
pub mod network;
