//! Authoritative player state shared by the handlers
//!
//! The session handler is the only writer. Any handler may read, and the state
//! monitor consumes the change notifications. Players are keyed by their
//! connection id; the player name is display data only.
//!
//! Reads return owned copies, so no caller ever holds the lock past the call.

use log::trace;
use shared::{Player, PlayerMap};
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 1024;

/// Immutable copy of every known player at one point in time.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot(Arc<PlayerMap>);

impl Snapshot {
    /// Copy of the snapshot with `id`'s own entry removed.
    pub fn without(&self, id: &str) -> PlayerMap {
        self.0
            .iter()
            .filter(|(key, _)| key.as_str() != id)
            .map(|(key, player)| (key.clone(), player.clone()))
            .collect()
    }
}

impl Deref for Snapshot {
    type Target = PlayerMap;

    fn deref(&self) -> &PlayerMap {
        &self.0
    }
}

/// Authoritative set of connected players.
///
/// Mutations take the write lock and emit a short tag on the notification
/// channel. Notifications are best effort: a full channel drops the tag and the
/// mutation still goes through.
pub struct SharedGameState {
    players: RwLock<PlayerMap>,
    notifications: mpsc::Sender<String>,
}

impl SharedGameState {
    /// Creates an empty state and the receiving end of its notification channel
    ///
    /// A capacity of zero is raised to one.
    pub fn new(notification_capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (notifications, receiver) = mpsc::channel(notification_capacity.max(1));
        let state = Self {
            players: RwLock::new(PlayerMap::new()),
            notifications,
        };
        (state, receiver)
    }

    fn notify(&self, tag: String) {
        if let Err(e) = self.notifications.try_send(tag) {
            trace!("[STATE] Dropped notification: {}", e);
        }
    }

    /// Inserts or replaces the player stored under `key`
    ///
    /// Emits `added player <key>` for a new key and `updated player <key>`
    /// otherwise.
    pub async fn add_or_update(&self, key: &str, player: Player) {
        let existed = {
            let mut players = self.players.write().await;
            players.insert(key.to_string(), player).is_some()
        };
        if existed {
            self.notify(format!("updated player {}", key));
        } else {
            self.notify(format!("added player {}", key));
        }
    }

    /// Removes the player stored under `key`
    ///
    /// Only an actual removal emits `removed player <key>`.
    pub async fn remove(&self, key: &str) -> Option<Player> {
        let removed = self.players.write().await.remove(key);
        if removed.is_some() {
            self.notify(format!("removed player {}", key));
        }
        removed
    }

    /// Whether a player is stored under `key`
    pub async fn contains(&self, key: &str) -> bool {
        self.players.read().await.contains_key(key)
    }

    /// Number of players with a slot, which drives the movement gate
    pub async fn len(&self) -> usize {
        self.players.read().await.len()
    }

    /// Copies every player the predicate accepts
    ///
    /// The predicate runs under the read lock and must not call back into the
    /// state.
    pub async fn filter<F>(&self, predicate: F) -> PlayerMap
    where
        F: Fn(&str, &Player) -> bool,
    {
        self.players
            .read()
            .await
            .iter()
            .filter(|(key, player)| predicate(key, player))
            .map(|(key, player)| (key.clone(), player.clone()))
            .collect()
    }

    /// Copies the whole player map
    pub async fn all(&self) -> PlayerMap {
        self.players.read().await.clone()
    }

    /// Freezes the current players for the update history
    ///
    /// Later mutations are never visible through the returned snapshot.
    pub async fn snapshot(&self) -> Snapshot {
        Snapshot(Arc::new(self.all().await))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{PlayerColour, Position};

    fn player(name: &str) -> Player {
        Player::new(name, PlayerColour::Blue, Position::new(1.0, 2.0))
    }

    #[tokio::test]
    async fn test_add_update_remove() {
        let (state, _rx) = SharedGameState::new(16);

        state.add_or_update("a", player("one")).await;
        state.add_or_update("a", player("two")).await;
        assert_eq!(state.len().await, 1);
        assert_eq!(state.all().await["a"].name, "two");

        assert!(state.remove("a").await.is_some());
        assert!(state.remove("a").await.is_none());
        assert!(!state.contains("a").await);
    }

    #[tokio::test]
    async fn test_mutations_emit_notifications() {
        let (state, mut rx) = SharedGameState::new(16);

        state.add_or_update("a", player("one")).await;
        state.add_or_update("a", player("one")).await;
        state.remove("a").await;
        state.remove("a").await;

        assert_eq!(rx.try_recv().unwrap(), "added player a");
        assert_eq!(rx.try_recv().unwrap(), "updated player a");
        assert_eq!(rx.try_recv().unwrap(), "removed player a");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_channel_never_blocks_mutation() {
        let (state, mut rx) = SharedGameState::new(1);

        for i in 0..10 {
            state.add_or_update(&format!("p{}", i), player("x")).await;
        }

        assert_eq!(state.len().await, 10);
        assert_eq!(rx.try_recv().unwrap(), "added player p0");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_filter_excludes_key() {
        let (state, _rx) = SharedGameState::new(16);
        state.add_or_update("a", player("a")).await;
        state.add_or_update("b", player("b")).await;
        state.add_or_update("c", player("c")).await;

        let others = state.filter(|key, _| key != "b").await;
        assert_eq!(others.keys().collect::<Vec<_>>(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_snapshot_is_isolated_from_later_mutation() {
        let (state, _rx) = SharedGameState::new(16);
        state.add_or_update("a", player("before")).await;

        let snapshot = state.snapshot().await;
        state.add_or_update("a", player("after")).await;
        state.add_or_update("b", player("new")).await;

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot["a"].name, "before");
        assert!(snapshot.without("a").is_empty());
    }
}
