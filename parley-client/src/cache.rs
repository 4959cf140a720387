use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use parley_shared::MessageView;

use crate::error::{ClientError, ClientResult};

/// On-device copy of fetched messages. Writes are idempotent upserts keyed by
/// message id, so replaying a page is harmless.
pub struct MessageCache {
    conn: Mutex<Connection>,
}

impl MessageCache {
    pub fn open(path: impl AsRef<Path>) -> ClientResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        migrate(&conn)?;
        tracing::info!(path = %path.as_ref().display(), "message cache opened");
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn in_memory() -> ClientResult<Self> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> ClientResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| ClientError::CachePoisoned)
    }

    pub fn upsert(&self, messages: &[MessageView]) -> ClientResult<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO messages (id, channel_id, created_at, payload) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET payload = excluded.payload",
            )?;
            for message in messages {
                stmt.execute(params![
                    message.id.to_string(),
                    message.channel_id.to_string(),
                    message.created_at.timestamp_micros(),
                    serde_json::to_string(message)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Newest `limit` cached messages of a channel, oldest first.
    pub fn recent(&self, channel_id: Uuid, limit: u32) -> ClientResult<Vec<MessageView>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT payload FROM messages WHERE channel_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;
        let payloads = stmt
            .query_map(params![channel_id.to_string(), limit], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut messages = payloads
            .iter()
            .map(|payload| serde_json::from_str::<MessageView>(payload))
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    /// Creation time of the oldest cached message of a channel.
    pub fn first_message_creation_time(&self, channel_id: Uuid) -> ClientResult<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let micros: Option<i64> = conn
            .query_row(
                "SELECT MIN(created_at) FROM messages WHERE channel_id = ?1",
                params![channel_id.to_string()],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(micros.and_then(DateTime::<Utc>::from_timestamp_micros))
    }

    pub fn count(&self, channel_id: Uuid) -> ClientResult<u64> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE channel_id = ?1",
            params![channel_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }
}

fn migrate(conn: &Connection) -> ClientResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            channel_id  TEXT NOT NULL,
            created_at  INTEGER NOT NULL,
            payload     TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_channel_created
            ON messages(channel_id, created_at);
        ",
    )?;
    Ok(())
}
