//! Types shared by the session server and its clients: the wire message model,
//! player snapshots, the codec abstraction and the typed socket wrappers.

pub mod codec;
pub mod message;
pub mod player;
pub mod transport;

pub use codec::{Codec, CodecError, WireFormat};
pub use message::{ClientMessage, Kind, Message, ServerMessage, Subkind};
pub use player::{Facing, FrameState, Player, PlayerColour, PlayerMap, Position};
pub use transport::{TransportError, TypedStream, TypedTcpListener, TypedUdpSocket, MAX_DATAGRAM};

/// Concurrent player positions in one match.
pub const MAX_SLOTS: usize = 4;

/// Players required before anyone may move.
pub const MIN_PLAYERS_TO_MOVE: usize = 2;

/// Connection types carrying [`Message`].
pub type UdpConnection = TypedUdpSocket<Message>;
pub type TcpConnection = TypedStream<Message>;
pub type TcpSocketListener = TypedTcpListener<Message>;
