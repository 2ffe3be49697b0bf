pub mod migrations;
pub mod models;
pub mod queries;

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// SQLite-backed durable store for users, conversations, messages, swipes and calls.
///
/// A single connection guarded by a mutex: every call is short and the realtime
/// core runs them on the blocking pool.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let db = Self::init(conn)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    /// Private in-memory database, used by tests and throwaway servers.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }

    /// Mutable access, needed for multi-statement transactions.
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&mut conn)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;
    use uuid::Uuid;

    use kindred_types::models::{Conversation, MatchOrigin, MatchPool, Message, MessageKind};

    pub fn pending(x: Uuid, y: Uuid, pool: MatchPool) -> Conversation {
        Conversation::new(x, y, MatchOrigin::new(pool), false, Utc::now())
    }

    pub fn text(conversation: &Conversation, sender: Uuid, content: &str) -> Message {
        let receiver = conversation.other_participant(sender).unwrap();
        Message {
            id: Uuid::new_v4(),
            match_id: conversation.id,
            sender_id: sender,
            receiver_id: receiver,
            content: content.to_string(),
            kind: MessageKind::Text,
            reply_to_id: None,
            reply_to_own: false,
            created_at: Utc::now(),
            read_at: None,
            hidden_for_receiver: false,
        }
    }
}
