use std::collections::HashMap;

use parking_lot::RwLock;

use crate::rooms::RoomId;

use super::{ConnectionId, Outbox, ServerEvent};

#[derive(Default)]
struct Inner {
    rooms: HashMap<RoomId, HashMap<ConnectionId, Outbox>>,
    // one room per connection; swap this for a set to allow several
    joined: HashMap<ConnectionId, RoomId>,
}

impl Inner {
    fn leave(&mut self, conn: ConnectionId) -> Option<RoomId> {
        let room = self.joined.remove(&conn)?;
        if let Some(subscribers) = self.rooms.get_mut(&room) {
            subscribers.remove(&conn);
            if subscribers.is_empty() {
                self.rooms.remove(&room);
            }
        }
        Some(room)
    }
}

/// Room subscriptions: which connections receive a room's broadcasts.
#[derive(Default)]
pub struct RoomTopics {
    inner: RwLock<Inner>,
}

impl RoomTopics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `conn` to `room`, replacing its previous room. Returns the room
    /// it left, if it was elsewhere.
    pub fn subscribe(&self, conn: ConnectionId, room: RoomId, outbox: Outbox) -> Option<RoomId> {
        let mut inner = self.inner.write();
        let previous = inner.leave(conn).filter(|previous| *previous != room);
        inner.rooms.entry(room.clone()).or_default().insert(conn, outbox);
        inner.joined.insert(conn, room);
        previous
    }

    pub fn unsubscribe(&self, conn: ConnectionId) -> Option<RoomId> {
        self.inner.write().leave(conn)
    }

    pub fn is_subscribed(&self, room: &RoomId, conn: ConnectionId) -> bool {
        self.inner.read().joined.get(&conn) == Some(room)
    }

    pub fn room_of(&self, conn: ConnectionId) -> Option<RoomId> {
        self.inner.read().joined.get(&conn).cloned()
    }

    pub fn subscriber_count(&self, room: &RoomId) -> usize {
        self.inner.read().rooms.get(room).map(HashMap::len).unwrap_or(0)
    }

    /// Queues `event` for every subscriber of `room` except `skip`. Sends never
    /// wait on the receiving socket. Returns how many subscribers were reached.
    pub fn broadcast(
        &self,
        room: &RoomId,
        event: &ServerEvent,
        skip: Option<ConnectionId>,
    ) -> usize {
        let inner = self.inner.read();
        let Some(subscribers) = inner.rooms.get(room) else {
            return 0;
        };
        subscribers
            .iter()
            .filter(|(conn, _)| Some(**conn) != skip)
            .filter(|(_, outbox)| outbox.send(event.clone()).is_ok())
            .count()
    }
}
