use std::{
    collections::{BTreeSet, HashMap},
    str::FromStr,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::rooms::{Identity, RoomId};

use super::{Message, MessageKind, MessageStore, NewMessage, StoreError};

const SCHEMA: [&str; 3] = [
    r#"CREATE TABLE IF NOT EXISTS messages (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        room TEXT NOT NULL,
        sender TEXT NOT NULL,
        kind TEXT NOT NULL DEFAULT 'text',
        body TEXT NOT NULL DEFAULT '',
        image_url TEXT,
        ts INTEGER NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS messages_room_seq ON messages (room, seq)",
    r#"CREATE TABLE IF NOT EXISTS receipts (
        message_id TEXT NOT NULL REFERENCES messages (id),
        identity TEXT NOT NULL,
        kind TEXT NOT NULL,
        PRIMARY KEY (message_id, identity, kind)
    )"#,
];

const DELIVERED: &str = "delivered";
const SEEN: &str = "seen";

type MessageRow = (i64, String, String, String, String, String, Option<String>, i64);

pub struct SqliteMessageStore {
    db_pool: SqlitePool,
    // last handed-out timestamp, keeps `ts` strictly increasing
    clock: Mutex<i64>,
}

impl SqliteMessageStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        // every connection to :memory: is its own database
        let max_connections = if url.contains(":memory:") { 1 } else { max_connections };

        let db_pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::with_pool(db_pool).await
    }

    pub async fn with_pool(db_pool: SqlitePool) -> Result<Self, StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&db_pool).await?;
        }

        let (last_ts,): (Option<i64>,) = sqlx::query_as("SELECT MAX(ts) FROM messages")
            .fetch_one(&db_pool)
            .await?;

        Ok(Self {
            db_pool,
            clock: Mutex::new(last_ts.unwrap_or(0)),
        })
    }

    fn next_ts(&self) -> i64 {
        let now = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
        let mut last = self.clock.lock();
        *last = now.max(*last + 1);
        *last
    }

    async fn page(
        &self,
        room: &RoomId,
        before: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Message>, StoreError> {
        let limit = limit.max(0);
        let rows: Vec<MessageRow> = match before {
            Some(before) => {
                sqlx::query_as(
                    "SELECT seq,id,room,sender,kind,body,image_url,ts FROM messages
                     WHERE room=? AND seq<? ORDER BY seq DESC LIMIT ?",
                )
                .bind(room.as_str())
                .bind(before)
                .bind(limit)
                .fetch_all(&self.db_pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT seq,id,room,sender,kind,body,image_url,ts FROM messages
                     WHERE room=? ORDER BY seq DESC LIMIT ?",
                )
                .bind(room.as_str())
                .bind(limit)
                .fetch_all(&self.db_pool)
                .await?
            }
        };

        let Some((oldest, ..)) = rows.last() else {
            return Ok(Vec::new());
        };

        let receipts: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT r.message_id,r.identity,r.kind FROM receipts r
             JOIN messages m ON m.id=r.message_id
             WHERE m.room=? AND m.seq>=?",
        )
        .bind(room.as_str())
        .bind(*oldest)
        .fetch_all(&self.db_pool)
        .await?;

        let mut receipts_by_message: HashMap<String, Receipts> = HashMap::new();
        for (message_id, identity, kind) in receipts {
            let identity = parse_identity(&identity)?;
            let entry = receipts_by_message.entry(message_id).or_default();
            match kind.as_str() {
                DELIVERED => entry.delivered_to.insert(identity),
                SEEN => entry.seen_by.insert(identity),
                other => return Err(StoreError::Corrupt(format!("unknown receipt kind {other:?}"))),
            };
        }

        rows.into_iter()
            .rev()
            .map(|row| {
                let receipts = receipts_by_message.remove(&row.1).unwrap_or_default();
                row_to_message(row, receipts)
            })
            .collect()
    }
}

#[derive(Default)]
struct Receipts {
    delivered_to: BTreeSet<Identity>,
    seen_by: BTreeSet<Identity>,
}

fn parse_identity(raw: &str) -> Result<Identity, StoreError> {
    Identity::parse(raw).map_err(|_| StoreError::Corrupt(format!("bad identity {raw:?}")))
}

fn row_to_message(
    (seq, id, room, sender, kind, text, image_url, ts): MessageRow,
    receipts: Receipts,
) -> Result<Message, StoreError> {
    Ok(Message {
        id: Uuid::parse_str(&id)
            .map_err(|e| StoreError::Corrupt(format!("bad message id {id:?}: {e}")))?,
        seq,
        room: RoomId::from_stored(room),
        sender: parse_identity(&sender)?,
        kind: MessageKind::from_stored(&kind)?,
        text,
        image_url,
        ts,
        delivered_to: receipts.delivered_to,
        seen_by: receipts.seen_by,
    })
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn append(&self, message: NewMessage) -> Result<Message, StoreError> {
        let id = Uuid::now_v7();
        let ts = self.next_ts();

        let seq: i64 = sqlx::query_scalar(
            "INSERT INTO messages (id,room,sender,kind,body,image_url,ts)
             VALUES (?,?,?,?,?,?,?) RETURNING seq",
        )
        .bind(id.to_string())
        .bind(message.room.as_str())
        .bind(message.sender.as_str())
        .bind(message.kind.as_str())
        .bind(&message.text)
        .bind(message.image_url.as_deref())
        .bind(ts)
        .fetch_one(&self.db_pool)
        .await?;

        Ok(Message {
            id,
            seq,
            room: message.room,
            sender: message.sender,
            kind: message.kind,
            text: message.text,
            image_url: message.image_url,
            ts,
            delivered_to: BTreeSet::new(),
            seen_by: BTreeSet::new(),
        })
    }

    async fn history(&self, room: &RoomId, limit: i64) -> Result<Vec<Message>, StoreError> {
        self.page(room, None, limit).await
    }

    async fn history_before(
        &self,
        room: &RoomId,
        before_seq: i64,
        limit: i64,
    ) -> Result<Vec<Message>, StoreError> {
        self.page(room, Some(before_seq), limit).await
    }

    async fn mark_delivered(
        &self,
        message_id: Uuid,
        recipient: &Identity,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT OR IGNORE INTO receipts (message_id,identity,kind) VALUES (?,?,?)")
            .bind(message_id.to_string())
            .bind(recipient.as_str())
            .bind(DELIVERED)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    async fn mark_seen_bulk(&self, room: &RoomId, viewer: &Identity) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO receipts (message_id,identity,kind)
             SELECT id,?,? FROM messages WHERE room=?",
        )
        .bind(viewer.as_str())
        .bind(SEEN)
        .bind(room.as_str())
        .execute(&self.db_pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Draft;

    async fn store() -> SqliteMessageStore {
        SqliteMessageStore::connect("sqlite::memory:", 4).await.unwrap()
    }

    fn id(raw: &str) -> Identity {
        Identity::parse(raw).unwrap()
    }

    async fn say(store: &SqliteMessageStore, from: &str, to: &str, text: &str) -> Message {
        let room = RoomId::between(&id(from), &id(to));
        let new = Draft::text(text).into_new_message(room, id(from)).unwrap();
        store.append(new).await.unwrap()
    }

    #[tokio::test]
    async fn empty_room_has_empty_history() {
        let store = store().await;
        let room = RoomId::between(&id("alice"), &id("bob"));
        assert!(store.history(&room, 100).await.unwrap().is_empty());
        assert!(store.history_before(&room, 10, 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_is_newest_window_oldest_first() {
        let store = store().await;
        for n in 0..5 {
            say(&store, "alice", "bob", &format!("m{n}")).await;
        }
        say(&store, "alice", "carol", "elsewhere").await;

        let room = RoomId::between(&id("bob"), &id("alice"));
        let texts: Vec<_> = store
            .history(&room, 3)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, ["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn timestamps_and_seq_increase() {
        let store = store().await;
        let first = say(&store, "alice", "bob", "one").await;
        let second = say(&store, "bob", "alice", "two").await;
        assert!(second.ts > first.ts);
        assert!(second.seq > first.seq);
    }

    #[tokio::test]
    async fn cursor_pages_backwards() {
        let store = store().await;
        let mut sent = Vec::new();
        for n in 0..6 {
            sent.push(say(&store, "alice", "bob", &format!("m{n}")).await);
        }
        let room = sent[0].room.clone();

        let page = store.history_before(&room, sent[4].seq, 2).await.unwrap();
        let texts: Vec<_> = page.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["m2", "m3"]);

        let page = store.history_before(&room, page[0].seq, 10).await.unwrap();
        assert_eq!(page.len(), 2);
    }

    #[tokio::test]
    async fn seen_sweep_is_idempotent() {
        let store = store().await;
        say(&store, "alice", "bob", "one").await;
        say(&store, "alice", "bob", "two").await;
        let room = RoomId::between(&id("alice"), &id("bob"));

        assert_eq!(store.mark_seen_bulk(&room, &id("bob")).await.unwrap(), 2);
        let after_first = store.history(&room, 100).await.unwrap();
        assert_eq!(store.mark_seen_bulk(&room, &id("bob")).await.unwrap(), 0);
        let after_second = store.history(&room, 100).await.unwrap();

        assert_eq!(after_first, after_second);
        assert!(after_second.iter().all(|m| m.seen_by.contains(&id("bob"))));
        // seen is recorded without any delivery
        assert!(after_second.iter().all(|m| m.delivered_to.is_empty()));
    }

    #[tokio::test]
    async fn delivery_is_a_set() {
        let store = store().await;
        let msg = say(&store, "alice", "bob", "hi").await;
        store.mark_delivered(msg.id, &id("bob")).await.unwrap();
        store.mark_delivered(msg.id, &id("bob")).await.unwrap();

        let history = store.history(&msg.room, 100).await.unwrap();
        assert_eq!(history[0].delivered_to.len(), 1);
        assert!(history[0].delivered_to.contains(&id("bob")));
    }

    #[tokio::test]
    async fn image_round_trips_through_storage() {
        let store = store().await;
        let room = RoomId::between(&id("alice"), &id("bob"));
        let new = Draft::image("http://cdn/x.png", None)
            .into_new_message(room.clone(), id("alice"))
            .unwrap();
        store.append(new).await.unwrap();

        let history = store.history(&room, 100).await.unwrap();
        assert_eq!(history[0].kind, MessageKind::Image);
        assert_eq!(history[0].image_url.as_deref(), Some("http://cdn/x.png"));
    }
}
