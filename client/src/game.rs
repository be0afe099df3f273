use log::{debug, info};
use shared::{Facing, Player, PlayerMap, ServerMessage};
use uuid::Uuid;

/// What the client knows about the session, built only from server messages
/// plus its own local pose.
#[derive(Debug, Default)]
pub struct ClientGameState {
    id: Option<Uuid>,
    slot: Option<u8>,
    local: Player,
    remote: PlayerMap,
    last_update: Option<u64>,
    can_move: bool,
}

impl ClientGameState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one server message into the view. Returns false when the message
    /// changed nothing, such as a stale update or a ping.
    pub fn apply(&mut self, message: &ServerMessage) -> bool {
        match message {
            ServerMessage::Ping => false,
            ServerMessage::FirstConnectionInfo {
                id,
                slot,
                spawn,
                colour,
            } => {
                self.id = Some(*id);
                self.slot = *slot;
                self.local = Player::new(colour.to_string(), *colour, *spawn);
                info!("Session {} offered slot {:?}", id, slot);
                true
            }
            ServerMessage::UpdatingPlayers {
                update_id,
                players,
                resending,
            } => {
                let newer = self.last_update.map_or(true, |last| *update_id > last);
                if !*resending && !newer {
                    debug!("Ignoring stale update {}", update_id);
                    return false;
                }
                if !*resending {
                    self.last_update = Some(*update_id);
                }
                self.remote = players.clone();
                true
            }
            ServerMessage::ClientCanMove => !std::mem::replace(&mut self.can_move, true),
            ServerMessage::ClientCannotMove => std::mem::replace(&mut self.can_move, false),
        }
    }

    /// Takes a step while the server allows movement. Returns whether the pose changed.
    pub fn step(&mut self, facing: Facing) -> bool {
        if !self.can_move {
            return false;
        }
        self.local.step(facing);
        true
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.local.name = name.into();
    }

    pub fn id(&self) -> Option<Uuid> {
        self.id
    }

    pub fn slot(&self) -> Option<u8> {
        self.slot
    }

    pub fn local(&self) -> &Player {
        &self.local
    }

    /// Every other player, keyed by connection id.
    pub fn remote(&self) -> &PlayerMap {
        &self.remote
    }

    pub fn last_update(&self) -> Option<u64> {
        self.last_update
    }

    pub fn can_move(&self) -> bool {
        self.can_move
    }
}
