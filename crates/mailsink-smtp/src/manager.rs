//! Live connection registry with a hard concurrency cap.
//!
//! Admission, release and drain all go through one mutex so the count and
//! the registry can never disagree. The registry only tracks connections;
//! each one is owned by its handler task.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Identifier of an admitted connection, unique per manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Returns the numeric identifier.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry entry for a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Connection identifier.
    pub id: ConnectionId,
    /// Peer address.
    pub remote_addr: SocketAddr,
    /// Admission time.
    pub connected_at: Instant,
}

impl ConnectionInfo {
    /// Returns how long the connection has been open.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

#[derive(Debug, Default)]
struct Registry {
    live: HashMap<ConnectionId, ConnectionInfo>,
    next_id: u64,
}

#[derive(Debug)]
struct Inner {
    max_connections: usize,
    registry: Mutex<Registry>,
    drained: Notify,
}

/// Tracks live connections and enforces the connection limit.
///
/// Cheap to clone; clones share the same registry.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Creates a manager admitting at most `max_connections` at once.
    #[must_use]
    pub fn new(max_connections: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                max_connections,
                registry: Mutex::new(Registry::default()),
                drained: Notify::new(),
            }),
        }
    }

    /// Returns the connection limit.
    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.inner.max_connections
    }

    /// Admits a connection unless the limit has been reached.
    ///
    /// The returned guard releases the slot when dropped.
    #[must_use]
    pub fn admit(&self, remote_addr: SocketAddr) -> Option<ConnectionGuard> {
        let mut registry = self.registry();
        if registry.live.len() >= self.inner.max_connections {
            return None;
        }

        registry.next_id += 1;
        let id = ConnectionId(registry.next_id);
        registry.live.insert(
            id,
            ConnectionInfo {
                id,
                remote_addr,
                connected_at: Instant::now(),
            },
        );

        Some(ConnectionGuard {
            manager: self.clone(),
            id,
            released: false,
        })
    }

    /// Returns the number of live connections.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.registry().live.len()
    }

    /// Returns the live connections ordered by admission.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        let mut connections: Vec<_> = self.registry().live.values().cloned().collect();
        connections.sort_by_key(|info| info.id);
        connections
    }

    /// Waits until no connection is live or the deadline passes.
    ///
    /// Returns `true` if the registry drained in time.
    pub async fn drain_wait(&self, deadline: tokio::time::Instant) -> bool {
        loop {
            // Register interest before checking so a release in between is not missed.
            let notified = self.inner.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.live_count() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.live_count() == 0;
            }
        }
    }

    fn release(&self, id: ConnectionId) {
        let now_empty = {
            let mut registry = self.registry();
            registry.live.remove(&id).is_some() && registry.live.is_empty()
        };
        if now_empty {
            self.inner.drained.notify_waiters();
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Admission token. Releases its slot when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    manager: ConnectionManager,
    id: ConnectionId,
    released: bool,
}

impl ConnectionGuard {
    /// Returns the connection identifier.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Releases the slot now.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.manager.release(self.id);
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.release_once();
    }
}
