//! Presence and delivery relay.
//!
//! [`Relay`] owns the presence registry and the room subscriptions and drives
//! every message through store, broadcast, delivery and seen. Sessions talk
//! to it through typed events only.

mod events;
mod presence;
mod topics;

use std::{collections::HashMap, fmt, sync::Arc};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::RelayError,
    rooms::{Identity, RoomId},
    store::{Draft, Message, MessageStore},
};

pub use events::{ClientEvent, Credentials, MessagePayload, PeerPayload, ServerEvent};
pub use presence::PresenceRegistry;
pub use topics::RoomTopics;

/// Outbound queue of one connection, drained by its socket writer.
pub type Outbox = mpsc::UnboundedSender<ServerEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Serializes store-then-broadcast per room so subscribers see messages in
/// store order. An entry lives only while some task holds or waits on it.
#[derive(Default)]
struct RoomLocks {
    locks: parking_lot::Mutex<HashMap<RoomId, Arc<AsyncMutex<()>>>>,
}

impl RoomLocks {
    async fn acquire(&self, room: &RoomId) -> RoomGuard<'_> {
        let lock = self.locks.lock().entry(room.clone()).or_default().clone();
        RoomGuard {
            locks: self,
            room: room.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

struct RoomGuard<'a> {
    locks: &'a RoomLocks,
    room: RoomId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RoomGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.locks.lock();
        // only the table itself still points at it: nobody holds or waits
        if locks.get(&self.room).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.room);
        }
    }
}

pub struct Relay {
    presence: PresenceRegistry,
    topics: RoomTopics,
    store: Arc<dyn MessageStore>,
    room_locks: RoomLocks,
    history_limit: i64,
}

impl Relay {
    pub fn new(store: Arc<dyn MessageStore>, history_limit: i64) -> Self {
        Self {
            presence: PresenceRegistry::new(),
            topics: RoomTopics::new(),
            store,
            room_locks: RoomLocks::default(),
            history_limit,
        }
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn topics(&self) -> &RoomTopics {
        &self.topics
    }

    pub fn history_limit(&self) -> i64 {
        self.history_limit
    }

    /// Registers an authenticated connection and announces the new online set.
    pub fn connect(&self, identity: Identity, outbox: Outbox) -> ConnectionId {
        let conn = ConnectionId::new();
        let online = self.presence.register(conn, identity.clone(), outbox);
        info!(%conn, %identity, online = online.len(), "connected");
        conn
    }

    /// Drops every reference to `conn`. Once this returns no broadcast or
    /// lookup targets the connection again.
    pub fn disconnect(&self, conn: ConnectionId) {
        if let Some(room) = self.topics.unsubscribe(conn) {
            debug!(%conn, %room, "left room");
        }
        if let Some(online) = self.presence.unregister(conn) {
            info!(%conn, online = online.len(), "disconnected");
        }
    }

    /// Subscribes `conn` to the room with `peer`, marks the room seen by
    /// `identity`, tells the peer, then replays history to `conn` alone.
    pub async fn join(
        &self,
        conn: ConnectionId,
        identity: &Identity,
        peer: &Identity,
    ) -> Result<RoomId, RelayError> {
        let room = RoomId::between(identity, peer);
        let outbox = self.outbox_of(conn)?;

        let _guard = self.room_locks.acquire(&room).await;
        if let Some(left) = self.topics.subscribe(conn, room.clone(), outbox) {
            debug!(%conn, room = %left, "switched away from room");
        }

        let marked = self
            .store
            .mark_seen_bulk(&room, identity)
            .await
            .inspect_err(|e| warn!(%room, "seen sweep failed: {e}"))?;
        let seen = ServerEvent::Seen {
            seen_by: identity.clone(),
        };
        self.topics.broadcast(&room, &seen, Some(conn));

        let history = self
            .store
            .history(&room, self.history_limit)
            .await
            .inspect_err(|e| warn!(%room, "history fetch failed: {e}"))?;
        debug!(%conn, %room, marked, replayed = history.len(), "joined room");
        self.presence.send_to(conn, ServerEvent::PrivateHistory(history));

        Ok(room)
    }

    /// Stores a message, broadcasts it to the room, then acknowledges delivery
    /// to the sender and nudges an online recipient who is looking elsewhere.
    ///
    /// A sender outside the room gets its own copy directly, so it never sees
    /// `delivered` for a message it was not shown. Nothing is broadcast when
    /// the message cannot be stored.
    pub async fn submit(
        &self,
        conn: ConnectionId,
        sender: &Identity,
        recipient: &Identity,
        draft: Draft,
    ) -> Result<Message, RelayError> {
        let room = RoomId::between(sender, recipient);
        let new = draft.into_new_message(room.clone(), sender.clone())?;

        let _guard = self.room_locks.acquire(&room).await;
        let mut message = self
            .store
            .append(new)
            .await
            .inspect_err(|e| warn!(%room, %sender, "append failed: {e}"))?;

        let event = ServerEvent::PrivateMessage(message.clone());
        let reached = self.topics.broadcast(&room, &event, None);
        if !self.topics.is_subscribed(&room, conn) {
            self.presence.send_to(conn, event);
        }
        debug!(%room, id = %message.id, reached, "message broadcast");

        let Some(recipient_conn) = self.presence.connection_for(recipient) else {
            return Ok(message);
        };

        match self.store.mark_delivered(message.id, recipient).await {
            Ok(()) => {
                message.delivered_to.insert(recipient.clone());
                let delivered = ServerEvent::Delivered {
                    message_id: message.id,
                };
                self.presence.send_to(conn, delivered);
            }
            Err(e) => warn!(id = %message.id, "marking delivered failed: {e}"),
        }

        if recipient_conn != conn && !self.topics.is_subscribed(&room, recipient_conn) {
            self.presence.send_to(
                recipient_conn,
                ServerEvent::Notification {
                    from: sender.clone(),
                    text: message.preview().to_owned(),
                    ts: message.ts,
                },
            );
        }

        Ok(message)
    }

    /// Relays a typing indicator to the rest of the room. Not persisted.
    pub fn typing(
        &self,
        conn: ConnectionId,
        sender: &Identity,
        peer: &Identity,
        active: bool,
    ) -> usize {
        let room = RoomId::between(sender, peer);
        let from = sender.clone();
        let event = if active {
            ServerEvent::Typing { from }
        } else {
            ServerEvent::StopTyping { from }
        };
        self.topics.broadcast(&room, &event, Some(conn))
    }

    /// Page of history for the pair, capped at the replay window.
    pub async fn history(
        &self,
        a: &Identity,
        b: &Identity,
        before: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<Message>, RelayError> {
        let room = RoomId::between(a, b);
        let cap = self.history_limit.max(0);
        let limit = limit.unwrap_or(cap).clamp(0, cap);
        let page = match before {
            Some(before) => self.store.history_before(&room, before, limit).await?,
            None => self.store.history(&room, limit).await?,
        };
        Ok(page)
    }

    fn outbox_of(&self, conn: ConnectionId) -> Result<Outbox, RelayError> {
        self.presence
            .outbox_of(conn)
            .ok_or(RelayError::Forbidden("connection is not registered"))
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::unbounded_channel;

    use super::*;
    use crate::store::SqliteMessageStore;

    fn id(raw: &str) -> Identity {
        Identity::parse(raw).unwrap()
    }

    async fn relay() -> Relay {
        let store = SqliteMessageStore::connect("sqlite::memory:", 1).await.unwrap();
        Relay::new(Arc::new(store), 100)
    }

    #[tokio::test]
    async fn room_locks_drain_when_rooms_go_quiet() {
        let relay = relay().await;
        let (tx, _rx) = unbounded_channel();
        let alice = id("alice");
        let conn = relay.connect(alice.clone(), tx);

        for n in 0..200 {
            let ghost = id(&format!("ghost{n}"));
            relay.join(conn, &alice, &ghost).await.unwrap();
            relay.submit(conn, &alice, &ghost, Draft::text("boo")).await.unwrap();
        }
        assert_eq!(relay.room_locks.len(), 0);

        relay.disconnect(conn);
        assert_eq!(relay.room_locks.len(), 0);
    }

    #[tokio::test]
    async fn contended_room_lock_survives_until_last_holder() {
        let locks = RoomLocks::default();
        let room = RoomId::between(&id("alice"), &id("bob"));

        let first = locks.acquire(&room).await;
        let waiter = locks.acquire(&room);
        tokio::pin!(waiter);
        assert!(futures_util::poll!(waiter.as_mut()).is_pending());
        assert_eq!(locks.len(), 1);

        drop(first);
        // the waiter still references the mutex, so it stays in the table
        assert_eq!(locks.len(), 1);
        let second = waiter.await;
        assert_eq!(locks.len(), 1);
        drop(second);
        assert_eq!(locks.len(), 0);
    }
}
