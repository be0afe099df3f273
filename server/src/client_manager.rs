//! Per-client session bookkeeping for the UDP handler
//!
//! This module tracks everything the session loop knows about a client that the
//! connection registry does not:
//! - The source address each UUID first handshook from
//! - The slot a UUID occupies, handed out from a pool of free slots
//! - Where in its lifecycle each session is
//!
//! Slots are recycled: a disconnect returns the slot to the pool and the next
//! READY takes the lowest free one.

use log::{debug, info};
use shared::MAX_SLOTS;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::net::SocketAddr;
use uuid::Uuid;

/// Lifecycle of one client session.
///
/// A session starts out `Handshaking` once `FIRST_CONNECTION_INFO` is sent,
/// becomes `Ready` on its first READY and `Active` once it streams local data.
/// A resend request parks it in `Resyncing` until the resend is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshaking,
    Ready,
    Active,
    Resyncing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Handshaking => "HANDSHAKING",
            SessionState::Ready => "READY",
            SessionState::Active => "ACTIVE",
            SessionState::Resyncing => "RESYNCING",
        };
        f.write_str(name)
    }
}

/// What the server remembers about one handshaken client
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSession {
    /// Identity issued at first contact
    pub id: Uuid,
    /// Address the handshake datagram came from
    pub source: SocketAddr,
    /// Slot held by this client, if any
    pub slot: Option<u8>,
    /// Current lifecycle state
    pub state: SessionState,
}

/// Owns the session table and the free-slot pool
///
/// The manager is owned by a single session loop and never shared, so it needs
/// no locking of its own.
#[derive(Debug)]
pub struct ClientManager {
    /// Sessions indexed by their UUID
    sessions: HashMap<Uuid, ClientSession>,
    /// Reverse index used to recognise handshake retries
    by_addr: HashMap<SocketAddr, Uuid>,
    /// Slots nobody holds right now
    free_slots: BTreeSet<u8>,
}

impl Default for ClientManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientManager {
    /// Creates an empty manager with every slot free
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            by_addr: HashMap::new(),
            free_slots: (0..MAX_SLOTS as u8).collect(),
        }
    }

    /// The UUID already issued to `source`, if it handshook before
    pub fn find_by_addr(&self, source: SocketAddr) -> Option<Uuid> {
        self.by_addr.get(&source).copied()
    }

    /// Records a freshly handshaken client in the `Handshaking` state
    ///
    /// Opening the same id twice keeps the original session untouched.
    pub fn open(&mut self, id: Uuid, source: SocketAddr) {
        if self.sessions.contains_key(&id) {
            return;
        }
        info!("[UDP] Session {} opened from {}", id, source);
        self.by_addr.insert(source, id);
        self.sessions.insert(
            id,
            ClientSession {
                id,
                source,
                slot: None,
                state: SessionState::Handshaking,
            },
        );
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn session(&self, id: &Uuid) -> Option<&ClientSession> {
        self.sessions.get(id)
    }

    /// Gives `id` a slot unless it already holds one
    ///
    /// Returns the slot the client holds after the call. None means either the
    /// id is unknown or all slots are taken; such a client stays a spectator.
    pub fn assign_slot(&mut self, id: &Uuid) -> Option<u8> {
        let session = self.sessions.get_mut(id)?;
        if session.slot.is_some() {
            return session.slot;
        }

        let slot = self.free_slots.pop_first()?;
        session.slot = Some(slot);
        info!("[UDP] Session {} assigned slot {}", id, slot);
        Some(slot)
    }

    pub fn slot_of(&self, id: &Uuid) -> Option<u8> {
        self.sessions.get(id).and_then(|session| session.slot)
    }

    /// The slot the next READY would receive, without taking it
    pub fn peek_next_slot(&self) -> Option<u8> {
        self.free_slots.first().copied()
    }

    /// Number of slots currently held
    pub fn occupied(&self) -> usize {
        MAX_SLOTS - self.free_slots.len()
    }

    pub fn state_of(&self, id: &Uuid) -> Option<SessionState> {
        self.sessions.get(id).map(|session| session.state)
    }

    /// Moves a session to `state`, logging the change
    pub fn transition(&mut self, id: &Uuid, state: SessionState) {
        if let Some(session) = self.sessions.get_mut(id) {
            if session.state != state {
                debug!("[UDP] Session {} {} -> {}", id, session.state, state);
                session.state = state;
            }
        }
    }

    /// Drops the session and returns its slot to the pool
    pub fn release(&mut self, id: &Uuid) -> Option<ClientSession> {
        let session = self.sessions.remove(id)?;
        if self.by_addr.get(&session.source) == Some(id) {
            self.by_addr.remove(&session.source);
        }
        if let Some(slot) = session.slot {
            self.free_slots.insert(slot);
        }
        info!("[UDP] Session {} closed", id);
        Some(session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
