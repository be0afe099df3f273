//! Wire messages exchanged over both the UDP session socket and the TCP
//! heartbeat stream.
//!
//! Every message is one of two directions, and each direction carries only the
//! fields that make sense for its intent. A datagram whose direction or intent
//! is not recognised does not decode.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::player::{Player, PlayerColour, PlayerMap, Position};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Message {
    FromClient(ClientMessage),
    FromServer(ServerMessage),
}

/// Intents a client may send to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMessage {
    /// First contact: the port of the client's receiving socket.
    SendingUdpPort {
        #[serde(default)]
        udp_port: String,
    },
    /// Claims a slot and triggers a broadcast. `player` may be omitted, in
    /// which case the server spawns a default snapshot for the slot.
    Ready {
        id: Uuid,
        #[serde(default)]
        player: Option<Player>,
    },
    /// Steady-state pose update.
    SendingLocalData {
        id: Uuid,
        #[serde(default)]
        player: Player,
    },
    /// Asks for the state recorded under `update_id` to be sent again.
    RequestingUpdateId {
        id: Uuid,
        #[serde(default)]
        update_id: u64,
    },
    Disconnecting { id: Uuid },
}

/// Messages the server sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMessage {
    Ping,
    FirstConnectionInfo {
        id: Uuid,
        #[serde(default)]
        slot: Option<u8>,
        #[serde(default)]
        spawn: Position,
        #[serde(default)]
        colour: PlayerColour,
    },
    UpdatingPlayers {
        update_id: u64,
        #[serde(default)]
        players: PlayerMap,
        #[serde(default)]
        resending: bool,
    },
    ClientCanMove,
    ClientCannotMove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    FromClient,
    FromServer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subkind {
    SendingUdpPort,
    Ready,
    SendingLocalData,
    RequestingUpdateId,
    Disconnecting,
    Ping,
    FirstConnectionInfo,
    UpdatingPlayers,
    ClientCanMove,
    ClientCannotMove,
}

impl Message {
    pub fn kind(&self) -> Kind {
        match self {
            Message::FromClient(_) => Kind::FromClient,
            Message::FromServer(_) => Kind::FromServer,
        }
    }

    pub fn subkind(&self) -> Subkind {
        match self {
            Message::FromClient(message) => message.subkind(),
            Message::FromServer(message) => message.subkind(),
        }
    }

    pub fn ping() -> Self {
        Message::FromServer(ServerMessage::Ping)
    }

    pub fn can_move() -> Self {
        Message::FromServer(ServerMessage::ClientCanMove)
    }

    pub fn cannot_move() -> Self {
        Message::FromServer(ServerMessage::ClientCannotMove)
    }

    pub fn updating_players(update_id: u64, players: PlayerMap) -> Self {
        Message::FromServer(ServerMessage::UpdatingPlayers {
            update_id,
            players,
            resending: false,
        })
    }

    pub fn udp_port(port: u16) -> Self {
        Message::FromClient(ClientMessage::SendingUdpPort {
            udp_port: port.to_string(),
        })
    }
}

impl ClientMessage {
    pub fn subkind(&self) -> Subkind {
        match self {
            ClientMessage::SendingUdpPort { .. } => Subkind::SendingUdpPort,
            ClientMessage::Ready { .. } => Subkind::Ready,
            ClientMessage::SendingLocalData { .. } => Subkind::SendingLocalData,
            ClientMessage::RequestingUpdateId { .. } => Subkind::RequestingUpdateId,
            ClientMessage::Disconnecting { .. } => Subkind::Disconnecting,
        }
    }

    /// The client id carried by every intent except the initial port message.
    pub fn client_id(&self) -> Option<Uuid> {
        match self {
            ClientMessage::SendingUdpPort { .. } => None,
            ClientMessage::Ready { id, .. }
            | ClientMessage::SendingLocalData { id, .. }
            | ClientMessage::RequestingUpdateId { id, .. }
            | ClientMessage::Disconnecting { id } => Some(*id),
        }
    }
}

impl ServerMessage {
    pub fn subkind(&self) -> Subkind {
        match self {
            ServerMessage::Ping => Subkind::Ping,
            ServerMessage::FirstConnectionInfo { .. } => Subkind::FirstConnectionInfo,
            ServerMessage::UpdatingPlayers { .. } => Subkind::UpdatingPlayers,
            ServerMessage::ClientCanMove => Subkind::ClientCanMove,
            ServerMessage::ClientCannotMove => Subkind::ClientCannotMove,
        }
    }
}

impl fmt::Display for Subkind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Subkind::SendingUdpPort => "CLIENT_SENDING_UDP_PORT",
            Subkind::Ready => "CLIENT_READY",
            Subkind::SendingLocalData => "CLIENT_SENDING_LOCAL_DATA",
            Subkind::RequestingUpdateId => "CLIENT_REQUESTING_UPDATE_ID",
            Subkind::Disconnecting => "CLIENT_DISCONNECTING",
            Subkind::Ping => "SERVER_PING",
            Subkind::FirstConnectionInfo => "SERVER_FIRST_CONNECTION_INFO",
            Subkind::UpdatingPlayers => "SERVER_UPDATING_PLAYERS",
            Subkind::ClientCanMove => "SERVER_CLIENT_CAN_MOVE",
            Subkind::ClientCannotMove => "SERVER_CLIENT_CANNOT_MOVE",
        };
        f.write_str(name)
    }
}
