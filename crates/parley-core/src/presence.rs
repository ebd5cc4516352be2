//! Identity <-> connection registry.
//!
//! At most one connection is bound to an identity, and a connection is bound
//! to at most one identity. A new bind for an identity silently replaces the
//! previous connection. Both directions live under one lock so they can
//! never disagree; the lock only ever guards O(1) map updates.

use std::collections::HashMap;

use parking_lot::RwLock;
use parley_shared::types::{ConnectionId, Identity};
use tracing::debug;

use crate::connection::ConnectionHandle;

#[derive(Default)]
struct Bindings {
    by_identity: HashMap<Identity, ConnectionHandle>,
    by_connection: HashMap<ConnectionId, Identity>,
}

/// Live presence state. Non-durable; rebuilt as clients reconnect.
#[derive(Default)]
pub struct PresenceRegistry {
    inner: RwLock<Bindings>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `identity` to `conn`, replacing any previous binding.
    ///
    /// Returns the connection that was displaced, if it was a different one.
    /// If `conn` was bound to another identity it is moved over.
    pub fn bind(&self, identity: Identity, conn: ConnectionHandle) -> Option<ConnectionHandle> {
        let mut inner = self.inner.write();
        let conn_id = conn.id();

        if let Some(old_identity) = inner.by_connection.remove(&conn_id) {
            if old_identity != identity
                && inner
                    .by_identity
                    .get(&old_identity)
                    .is_some_and(|c| c.id() == conn_id)
            {
                inner.by_identity.remove(&old_identity);
            }
        }

        let displaced = inner
            .by_identity
            .insert(identity.clone(), conn)
            .filter(|prev| prev.id() != conn_id);

        if let Some(prev) = &displaced {
            inner.by_connection.remove(&prev.id());
            debug!(identity = %identity, old = %prev.id(), new = %conn_id, "replaced presence binding");
        }

        inner.by_connection.insert(conn_id, identity);
        displaced
    }

    /// Remove whatever binding `conn_id` holds.
    ///
    /// No-op for a connection that was never bound or has already been
    /// replaced. Returns the identity it was bound to.
    pub fn unbind(&self, conn_id: ConnectionId) -> Option<Identity> {
        let mut inner = self.inner.write();
        let identity = inner.by_connection.remove(&conn_id)?;

        if inner
            .by_identity
            .get(&identity)
            .is_some_and(|c| c.id() == conn_id)
        {
            inner.by_identity.remove(&identity);
        }
        Some(identity)
    }

    pub fn lookup(&self, identity: &Identity) -> Option<ConnectionHandle> {
        self.inner.read().by_identity.get(identity).cloned()
    }

    pub fn identity_of(&self, conn_id: ConnectionId) -> Option<Identity> {
        self.inner.read().by_connection.get(&conn_id).cloned()
    }

    /// Whether `identity` is currently bound to exactly `conn_id`.
    pub fn is_bound(&self, identity: &Identity, conn_id: ConnectionId) -> bool {
        self.inner
            .read()
            .by_identity
            .get(identity)
            .is_some_and(|c| c.id() == conn_id)
    }

    pub fn online_count(&self) -> usize {
        self.inner.read().by_identity.len()
    }
}
