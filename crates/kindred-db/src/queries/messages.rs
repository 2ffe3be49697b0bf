use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use kindred_types::models::{Message, MessageKind};

use super::OptionalExt;
use crate::Database;
use crate::models::{MESSAGE_COLUMNS, message_from_row, ts};

impl Database {
    pub fn get_message_by_id(&self, id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                [id.to_string()],
                message_from_row,
            )
            .optional()
        })
    }

    pub fn create_message(&self, message: &Message) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!("INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"),
                rusqlite::params![
                    message.id.to_string(),
                    message.match_id.to_string(),
                    message.sender_id.to_string(),
                    message.receiver_id.to_string(),
                    message.content,
                    message.kind.as_str(),
                    message.reply_to_id.map(|id| id.to_string()),
                    message.reply_to_own,
                    ts(message.created_at),
                    message.read_at.map(ts),
                    message.hidden_for_receiver,
                ],
            )?;
            Ok(())
        })
    }

    /// Stamps `read_at` unless the message was already read.
    /// Returns true only when this call set it.
    pub fn mark_message_as_read_with_timestamp(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET read_at = ?2 WHERE id = ?1 AND read_at IS NULL",
                rusqlite::params![id.to_string(), ts(at)],
            )?;
            Ok(changed > 0)
        })
    }

    /// Earlier messages from `sender` in `match_id` with the same kind and content,
    /// created at or after `since`, newest first.
    pub fn find_recent_duplicate_messages(
        &self,
        sender: Uuid,
        match_id: Uuid,
        content: &str,
        kind: MessageKind,
        since: DateTime<Utc>,
        case_insensitive: bool,
    ) -> Result<Vec<Message>> {
        let content_clause = if case_insensitive {
            "LOWER(content) = LOWER(?3)"
        } else {
            "content = ?3"
        };

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE sender_id = ?1 AND match_id = ?2 AND {content_clause}
                   AND kind = ?4 AND created_at >= ?5
                 ORDER BY created_at DESC"
            ))?;
            let rows = stmt
                .query_map(
                    rusqlite::params![
                        sender.to_string(),
                        match_id.to_string(),
                        content,
                        kind.as_str(),
                        ts(since),
                    ],
                    message_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn delete_message(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM messages WHERE id = ?1", [id.to_string()])?;
            Ok(changed > 0)
        })
    }

    pub fn hide_message_for_receiver(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET hidden_for_receiver = 1 WHERE id = ?1",
                [id.to_string()],
            )?;
            Ok(changed > 0)
        })
    }

    /// Newest `limit` messages of a conversation as `viewer` sees them
    /// (messages they removed for themselves are left out).
    pub fn list_messages(&self, match_id: Uuid, viewer: Uuid, limit: u32) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE match_id = ?1 AND NOT (receiver_id = ?2 AND hidden_for_receiver = 1)
                 ORDER BY created_at DESC
                 LIMIT ?3"
            ))?;
            let rows = stmt
                .query_map(
                    rusqlite::params![match_id.to_string(), viewer.to_string(), limit],
                    message_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Full history regardless of per-recipient hiding, oldest first. Used for archival.
    pub fn list_all_messages(&self, match_id: Uuid) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE match_id = ?1 ORDER BY created_at ASC"
            ))?;
            let rows = stmt
                .query_map([match_id.to_string()], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{pending, text};
    use chrono::Duration;
    use kindred_types::models::MatchPool;

    #[test]
    fn duplicate_lookup_respects_window_and_case() {
        let db = Database::open_in_memory().unwrap();
        let sender = Uuid::new_v4();
        let m = db
            .create_match(&pending(sender, Uuid::new_v4(), MatchPool::Dating))
            .unwrap();

        let mut old = text(&m, sender, "Hey");
        old.created_at = Utc::now() - Duration::minutes(6);
        db.create_message(&old).unwrap();

        let five_min_ago = Utc::now() - Duration::minutes(5);
        let ten_min_ago = Utc::now() - Duration::minutes(10);

        let exact = db
            .find_recent_duplicate_messages(sender, m.id, "Hey", MessageKind::Text, five_min_ago, false)
            .unwrap();
        assert!(exact.is_empty());

        let folded = db
            .find_recent_duplicate_messages(sender, m.id, "hey", MessageKind::Text, ten_min_ago, true)
            .unwrap();
        assert_eq!(folded.len(), 1);
        assert_eq!(folded[0].id, old.id);

        let other_kind = db
            .find_recent_duplicate_messages(sender, m.id, "Hey", MessageKind::Audio, ten_min_ago, false)
            .unwrap();
        assert!(other_kind.is_empty());
    }

    #[test]
    fn read_stamp_is_set_once() {
        let db = Database::open_in_memory().unwrap();
        let sender = Uuid::new_v4();
        let m = db
            .create_match(&pending(sender, Uuid::new_v4(), MatchPool::Dating))
            .unwrap();
        let msg = text(&m, sender, "hello");
        db.create_message(&msg).unwrap();

        let first = Utc::now();
        assert!(db.mark_message_as_read_with_timestamp(msg.id, first).unwrap());
        assert!(!db.mark_message_as_read_with_timestamp(msg.id, first + Duration::seconds(5)).unwrap());

        let stored = db.get_message_by_id(msg.id).unwrap().unwrap();
        assert_eq!(stored.read_at.map(|t| t.timestamp_millis()), Some(first.timestamp_millis()));
    }

    #[test]
    fn hidden_messages_only_vanish_for_the_receiver() {
        let db = Database::open_in_memory().unwrap();
        let sender = Uuid::new_v4();
        let m = db
            .create_match(&pending(sender, Uuid::new_v4(), MatchPool::Dating))
            .unwrap();
        let receiver = m.other_participant(sender).unwrap();
        let msg = text(&m, sender, "oops");
        db.create_message(&msg).unwrap();

        assert!(db.hide_message_for_receiver(msg.id).unwrap());

        assert!(db.list_messages(m.id, receiver, 50).unwrap().is_empty());
        assert_eq!(db.list_messages(m.id, sender, 50).unwrap().len(), 1);
        assert_eq!(db.list_all_messages(m.id).unwrap().len(), 1);
    }
}
