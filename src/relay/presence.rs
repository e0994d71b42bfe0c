use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;

use crate::rooms::Identity;

use super::{ConnectionId, Outbox, ServerEvent};

struct Entry {
    identity: Identity,
    outbox: Outbox,
}

#[derive(Default)]
struct Inner {
    by_conn: HashMap<ConnectionId, Entry>,
    // latest connection wins on reconnect
    by_identity: HashMap<Identity, ConnectionId>,
}

impl Inner {
    fn snapshot(&self) -> Vec<Identity> {
        self.by_conn
            .values()
            .map(|entry| entry.identity.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn announce(&self, snapshot: &[Identity]) {
        let event = ServerEvent::OnlineUsers(snapshot.to_vec());
        for entry in self.by_conn.values() {
            let _ = entry.outbox.send(event.clone());
        }
    }
}

/// Who is online and how to reach them.
///
/// Each mutation announces the new `online_users` snapshot to every live
/// connection while still holding the write lock, so no session can observe a
/// registry state without also having been sent it. The lock is never held
/// across an await.
#[derive(Default)]
pub struct PresenceRegistry {
    inner: RwLock<Inner>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the online snapshot, which always contains `identity`.
    pub fn register(
        &self,
        conn: ConnectionId,
        identity: Identity,
        outbox: Outbox,
    ) -> Vec<Identity> {
        let mut inner = self.inner.write();
        inner.by_identity.insert(identity.clone(), conn);
        inner.by_conn.insert(conn, Entry { identity, outbox });

        let snapshot = inner.snapshot();
        inner.announce(&snapshot);
        snapshot
    }

    /// No-op returning `None` when the connection was never registered.
    pub fn unregister(&self, conn: ConnectionId) -> Option<Vec<Identity>> {
        let mut inner = self.inner.write();
        let entry = inner.by_conn.remove(&conn)?;
        if inner.by_identity.get(&entry.identity) == Some(&conn) {
            inner.by_identity.remove(&entry.identity);
        }

        let snapshot = inner.snapshot();
        inner.announce(&snapshot);
        Some(snapshot)
    }

    pub fn connection_for(&self, identity: &Identity) -> Option<ConnectionId> {
        self.inner.read().by_identity.get(identity).copied()
    }

    pub fn identity_of(&self, conn: ConnectionId) -> Option<Identity> {
        self.inner.read().by_conn.get(&conn).map(|entry| entry.identity.clone())
    }

    pub(crate) fn outbox_of(&self, conn: ConnectionId) -> Option<Outbox> {
        self.inner.read().by_conn.get(&conn).map(|entry| entry.outbox.clone())
    }

    pub fn online_snapshot(&self) -> Vec<Identity> {
        self.inner.read().snapshot()
    }

    /// Queues an event for one connection. False when it is gone.
    pub fn send_to(&self, conn: ConnectionId, event: ServerEvent) -> bool {
        match self.inner.read().by_conn.get(&conn) {
            Some(entry) => entry.outbox.send(event).is_ok(),
            None => false,
        }
    }
}
