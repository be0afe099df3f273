//! Concurrency-safe map from peer id to an open typed connection.
//!
//! Many readers, one writer. Iteration holds the read lock for the whole
//! traversal: every connection present when the traversal starts is either
//! visited or already gone, and no removal can tear the view halfway. The
//! price is that a writer waits for the slowest traversal, and calling
//! [`ConnectionRegistry::upsert`] or [`ConnectionRegistry::remove`] from inside
//! a traversal of the same registry deadlocks.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};

pub struct ConnectionRegistry<C> {
    connections: RwLock<HashMap<String, Arc<C>>>,
}

impl<C> Default for ConnectionRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> ConnectionRegistry<C> {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Inserts `conn` under `id` unless the id is already present.
    ///
    /// Returns false when an earlier connection won; the duplicate is dropped.
    pub async fn upsert(&self, id: impl Into<String>, conn: C) -> bool {
        let mut connections = self.connections.write().await;
        match connections.entry(id.into()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(Arc::new(conn));
                true
            }
        }
    }

    /// Idempotent. The socket closes once the last outstanding handle drops.
    pub async fn remove(&self, id: &str) -> Option<Arc<C>> {
        self.connections.write().await.remove(id)
    }

    /// Whether a connection is registered under `id`
    pub async fn contains(&self, id: &str) -> bool {
        self.connections.read().await.contains_key(id)
    }

    /// A shared handle to the connection under `id`
    ///
    /// The handle stays usable after the entry is removed; the socket closes
    /// when the last handle drops.
    pub async fn get(&self, id: &str) -> Option<Arc<C>> {
        self.connections.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Drops every connection.
    ///
    /// Handlers call this on exit so their sockets close with them.
    pub async fn clear(&self) {
        self.connections.write().await.clear();
    }

    /// Locks the registry for reading and returns a view to traverse.
    ///
    /// Writers wait until the view drops. Do not hold it across work that could
    /// block for long.
    pub async fn iterate(&self) -> RegistryView<'_, C> {
        RegistryView {
            guard: self.connections.read().await,
        }
    }
}

/// Snapshot-consistent view; the read lock is released when this drops.
pub struct RegistryView<'a, C> {
    guard: RwLockReadGuard<'a, HashMap<String, Arc<C>>>,
}

impl<'a, C> RegistryView<'a, C> {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<C>)> + '_ {
        self.guard.iter().map(|(id, conn)| (id.as_str(), conn))
    }

    pub fn len(&self) -> usize {
        self.guard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard.is_empty()
    }
}
