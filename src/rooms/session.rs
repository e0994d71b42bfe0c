use std::sync::Arc;

use tracing::debug;

use crate::{
    error::RelayError,
    relay::{ClientEvent, ConnectionId, MessagePayload, Outbox, PeerPayload, Relay, ServerEvent},
};

use super::{Identity, RoomId};

/// Where an authenticated connection stands. A session talks to one peer at
/// a time; joining another peer replaces the room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    InRoom { peer: Identity, room: RoomId },
}

/// One authenticated connection, registered for as long as it lives.
///
/// Dropping the session disconnects it from the relay, whatever it was doing.
pub struct Session {
    relay: Arc<Relay>,
    conn: ConnectionId,
    identity: Identity,
    state: SessionState,
}

impl Session {
    pub fn open(relay: Arc<Relay>, identity: Identity, outbox: Outbox) -> Session {
        let conn = relay.connect(identity.clone(), outbox);
        Session {
            relay,
            conn,
            identity,
            state: SessionState::Idle,
        }
    }

    pub fn conn(&self) -> ConnectionId {
        self.conn
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Parses and handles one text frame.
    pub async fn dispatch(&mut self, frame: &str) {
        match serde_json::from_str::<ClientEvent>(frame) {
            Ok(event) => self.handle(event).await,
            Err(e) => {
                debug!(conn = %self.conn, "unreadable frame: {e}");
                self.reply_error("bad_request", format!("unreadable frame: {e}"));
            }
        }
    }

    pub async fn handle(&mut self, event: ClientEvent) {
        let result = match event {
            ClientEvent::Authenticate(_) => {
                debug!(conn = %self.conn, "ignoring repeated authenticate");
                Ok(())
            }
            ClientEvent::JoinPrivate(payload) => self.join(payload).await,
            ClientEvent::PrivateMessage(payload) => self.send(payload).await,
            ClientEvent::Typing(payload) => self.typing(payload, true),
            ClientEvent::StopTyping(payload) => self.typing(payload, false),
        };

        if let Err(err) = result {
            debug!(conn = %self.conn, identity = %self.identity, "rejected: {err}");
            self.reply_error(err.kind(), err.to_string());
        }
    }

    async fn join(&mut self, payload: PeerPayload) -> Result<(), RelayError> {
        let peer = self.peer(payload.from.as_deref(), &payload.to)?;
        let room = RoomId::between(&self.identity, &peer);
        let result = self.relay.join(self.conn, &self.identity, &peer).await;

        // subscription happens before the seen sweep, so it can outlive a
        // failed join
        if self.relay.topics().is_subscribed(&room, self.conn) {
            self.state = SessionState::InRoom { peer, room };
        }
        result.map(drop)
    }

    async fn send(&mut self, payload: MessagePayload) -> Result<(), RelayError> {
        let recipient = self.peer(payload.from.as_deref(), &payload.to)?;
        self.relay
            .submit(self.conn, &self.identity, &recipient, payload.draft())
            .await
            .map(drop)
    }

    fn typing(&mut self, payload: PeerPayload, active: bool) -> Result<(), RelayError> {
        let peer = self.peer(payload.from.as_deref(), &payload.to)?;
        self.relay.typing(self.conn, &self.identity, &peer, active);
        Ok(())
    }

    fn peer(&self, from: Option<&str>, to: &str) -> Result<Identity, RelayError> {
        if from.is_some_and(|from| from != self.identity.as_str()) {
            return Err(RelayError::Forbidden("sender does not match the connection"));
        }
        Identity::parse(to)
    }

    fn reply_error(&self, kind: &str, message: String) {
        self.relay.presence().send_to(
            self.conn,
            ServerEvent::Error {
                kind: kind.to_owned(),
                message,
            },
        );
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.relay.disconnect(self.conn);
    }
}
