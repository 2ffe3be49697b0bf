use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use kindred_types::models::{Conversation, MatchOrigin, Message};

use super::OptionalExt;
use crate::Database;
use crate::models::{MATCH_COLUMNS, conversation_from_row, encode_origin, ts};

impl Database {
    pub fn get_match_by_id(&self, id: Uuid) -> Result<Option<Conversation>> {
        self.with_conn(|conn| query_match_by_id(conn, id))
    }

    pub fn get_match_between_users(&self, x: Uuid, y: Uuid) -> Result<Option<Conversation>> {
        self.with_conn(|conn| query_match_between(conn, x, y))
    }

    /// Every record for the pair. The unique pair constraint keeps this at most one
    /// row; callers that merge pools still go through this to stay honest about it.
    pub fn get_all_matches_between_users(&self, x: Uuid, y: Uuid) -> Result<Vec<Conversation>> {
        let (a, b) = Conversation::ordered_pair(x, y);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MATCH_COLUMNS} FROM matches WHERE user_a = ?1 AND user_b = ?2"
            ))?;
            let rows = stmt
                .query_map([a.to_string(), b.to_string()], conversation_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Inserts the conversation unless the pair already has one, then returns the
    /// stored record. Idempotent: a concurrent creator gets the winner's row back.
    pub fn create_match(&self, conversation: &Conversation) -> Result<Conversation> {
        let origin = encode_origin(&conversation.origin)?;
        let (a, b) = Conversation::ordered_pair(conversation.user_a, conversation.user_b);

        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO matches
                    (id, user_a, user_b, is_mutual, is_rejected, origin, unread_a, unread_b, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                rusqlite::params![
                    conversation.id.to_string(),
                    a.to_string(),
                    b.to_string(),
                    conversation.is_mutual,
                    conversation.is_rejected,
                    origin,
                    conversation.unread_a,
                    conversation.unread_b,
                    ts(conversation.created_at),
                ],
            )?;

            query_match_between(conn, a, b)?
                .ok_or_else(|| anyhow::anyhow!("match for pair {}/{} vanished after insert", a, b))
        })
    }

    pub fn update_match_origin(&self, id: Uuid, origin: &MatchOrigin, at: DateTime<Utc>) -> Result<()> {
        let origin = encode_origin(origin)?;
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE matches SET origin = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![id.to_string(), origin, ts(at)],
            )?;
            Ok(())
        })
    }

    /// Flips the conversation to mutual. Only ever moves false -> true and never
    /// touches a rejected pair. Returns true only for the call that changed the row.
    pub fn set_match_mutual(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE matches SET is_mutual = 1, updated_at = ?2
                 WHERE id = ?1 AND is_mutual = 0 AND is_rejected = 0",
                rusqlite::params![id.to_string(), ts(at)],
            )?;
            Ok(changed > 0)
        })
    }

    /// Marks a pending (non-mutual) conversation as rejected. Terminal.
    pub fn set_match_rejected(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE matches SET is_rejected = 1, updated_at = ?2
                 WHERE id = ?1 AND is_mutual = 0 AND is_rejected = 0",
                rusqlite::params![id.to_string(), ts(at)],
            )?;
            Ok(changed > 0)
        })
    }

    /// Drops a conversation together with its typing state and call records.
    /// Fails if messages still reference it.
    pub fn delete_match(&self, id: Uuid) -> Result<bool> {
        let id = id.to_string();
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM typing_status WHERE match_id = ?1", [&id])?;
            tx.execute("DELETE FROM calls WHERE match_id = ?1", [&id])?;
            let changed = tx.execute("DELETE FROM matches WHERE id = ?1", [&id])?;
            tx.commit()?;
            Ok(changed > 0)
        })
    }

    pub fn mark_match_unread(&self, id: Uuid, for_user: Uuid) -> Result<()> {
        self.set_unread(id, for_user, true)
    }

    pub fn mark_match_read(&self, id: Uuid, for_user: Uuid) -> Result<()> {
        self.set_unread(id, for_user, false)
    }

    fn set_unread(&self, id: Uuid, user: Uuid, unread: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE matches SET
                    unread_a = CASE WHEN user_a = ?2 THEN ?3 ELSE unread_a END,
                    unread_b = CASE WHEN user_b = ?2 THEN ?3 ELSE unread_b END
                 WHERE id = ?1",
                rusqlite::params![id.to_string(), user.to_string(), unread],
            )?;
            Ok(())
        })
    }

    /// Bumps `updated_at`, which keys cached conversation listings.
    pub fn touch_match(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE matches SET updated_at = ?2 WHERE id = ?1",
                rusqlite::params![id.to_string(), ts(at)],
            )?;
            Ok(())
        })
    }

    /// Non-rejected conversations the user takes part in, most recently active first.
    pub fn list_matches_for_user(&self, user: Uuid) -> Result<Vec<Conversation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MATCH_COLUMNS} FROM matches
                 WHERE (user_a = ?1 OR user_b = ?1) AND is_rejected = 0
                 ORDER BY updated_at DESC"
            ))?;
            let rows = stmt
                .query_map([user.to_string()], conversation_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Typing --

    pub fn set_typing_status(
        &self,
        match_id: Uuid,
        user: Uuid,
        is_typing: bool,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO typing_status (match_id, user_id, is_typing, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(match_id, user_id) DO UPDATE SET
                    is_typing = excluded.is_typing,
                    updated_at = excluded.updated_at",
                rusqlite::params![match_id.to_string(), user.to_string(), is_typing, ts(at)],
            )?;
            Ok(())
        })
    }

    pub fn get_typing_status(&self, match_id: Uuid, user: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let flag: Option<bool> = conn
                .query_row(
                    "SELECT is_typing FROM typing_status WHERE match_id = ?1 AND user_id = ?2",
                    [match_id.to_string(), user.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(flag.unwrap_or(false))
        })
    }

    // -- Unmatch --

    /// Writes an audit snapshot of the conversation and its messages.
    pub fn archive_match(
        &self,
        conversation: &Conversation,
        messages: &[Message],
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<Uuid> {
        let snapshot = serde_json::to_string(&serde_json::json!({
            "conversation": conversation,
            "messages": messages,
        }))?;
        let archive_id = Uuid::new_v4();

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO match_archives (id, match_id, user_a, user_b, reason, snapshot, archived_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    archive_id.to_string(),
                    conversation.id.to_string(),
                    conversation.user_a.to_string(),
                    conversation.user_b.to_string(),
                    reason,
                    snapshot,
                    ts(at),
                ],
            )?;
            Ok(archive_id)
        })
    }

    pub fn count_archives_for_match(&self, match_id: Uuid) -> Result<usize> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM match_archives WHERE match_id = ?1",
                [match_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
    }

    /// Removes a conversation with everything hanging off it (typing state, calls,
    /// messages, swipe history between the pair) and puts a permanent rejected record
    /// for the pair in its place. One transaction.
    pub fn replace_match_with_rejection(
        &self,
        conversation: &Conversation,
        at: DateTime<Utc>,
    ) -> Result<Conversation> {
        let (a, b) = (conversation.user_a.to_string(), conversation.user_b.to_string());
        let old_id = conversation.id.to_string();
        let origin = encode_origin(&conversation.origin)?;
        let rejected_id = Uuid::new_v4();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM typing_status WHERE match_id = ?1", [&old_id])?;
            tx.execute("DELETE FROM calls WHERE match_id = ?1", [&old_id])?;
            tx.execute("DELETE FROM messages WHERE match_id = ?1", [&old_id])?;
            tx.execute(
                "DELETE FROM swipe_history
                 WHERE (user_id = ?1 AND target_id = ?2) OR (user_id = ?2 AND target_id = ?1)",
                [&a, &b],
            )?;
            tx.execute("DELETE FROM matches WHERE id = ?1", [&old_id])?;
            tx.execute(
                "INSERT INTO matches
                    (id, user_a, user_b, is_mutual, is_rejected, origin, unread_a, unread_b, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 0, 1, ?4, 0, 0, ?5, ?5)",
                rusqlite::params![rejected_id.to_string(), a, b, origin, ts(at)],
            )?;
            let rejected = query_match_by_id(&tx, rejected_id)?
                .ok_or_else(|| anyhow::anyhow!("rejection record {} missing", rejected_id))?;
            tx.commit()?;
            Ok(rejected)
        })
    }
}

fn query_match_by_id(conn: &Connection, id: Uuid) -> Result<Option<Conversation>> {
    conn.query_row(
        &format!("SELECT {MATCH_COLUMNS} FROM matches WHERE id = ?1"),
        [id.to_string()],
        conversation_from_row,
    )
    .optional()
}

fn query_match_between(conn: &Connection, x: Uuid, y: Uuid) -> Result<Option<Conversation>> {
    let (a, b) = Conversation::ordered_pair(x, y);
    conn.query_row(
        &format!("SELECT {MATCH_COLUMNS} FROM matches WHERE user_a = ?1 AND user_b = ?2"),
        [a.to_string(), b.to_string()],
        conversation_from_row,
    )
    .optional()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::pending;
    use kindred_types::models::MatchPool;

    #[test]
    fn create_match_is_idempotent_per_pair() {
        let db = Database::open_in_memory().unwrap();
        let (x, y) = (Uuid::new_v4(), Uuid::new_v4());

        let first = db.create_match(&pending(x, y, MatchPool::Dating)).unwrap();
        let second = db.create_match(&pending(y, x, MatchPool::Jobs)).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.origin.pool, MatchPool::Dating);
        assert_eq!(db.get_all_matches_between_users(x, y).unwrap().len(), 1);
    }

    #[test]
    fn mutual_flip_reports_only_first_change() {
        let db = Database::open_in_memory().unwrap();
        let m = db
            .create_match(&pending(Uuid::new_v4(), Uuid::new_v4(), MatchPool::Dating))
            .unwrap();

        assert!(db.set_match_mutual(m.id, Utc::now()).unwrap());
        assert!(!db.set_match_mutual(m.id, Utc::now()).unwrap());
        assert!(!db.set_match_rejected(m.id, Utc::now()).unwrap());
        assert!(db.get_match_by_id(m.id).unwrap().unwrap().is_mutual);
    }

    #[test]
    fn unread_flags_track_each_side() {
        let db = Database::open_in_memory().unwrap();
        let m = db
            .create_match(&pending(Uuid::new_v4(), Uuid::new_v4(), MatchPool::Dating))
            .unwrap();

        db.mark_match_unread(m.id, m.user_b).unwrap();
        let stored = db.get_match_by_id(m.id).unwrap().unwrap();
        assert!(stored.is_unread_for(m.user_b));
        assert!(!stored.is_unread_for(m.user_a));

        db.mark_match_read(m.id, m.user_b).unwrap();
        assert!(!db.get_match_by_id(m.id).unwrap().unwrap().unread_b);
    }

    #[test]
    fn rejection_replaces_the_record() {
        let db = Database::open_in_memory().unwrap();
        let (x, y) = (Uuid::new_v4(), Uuid::new_v4());
        let m = db.create_match(&pending(x, y, MatchPool::Dating)).unwrap();
        db.set_typing_status(m.id, x, true, Utc::now()).unwrap();

        let rejected = db.replace_match_with_rejection(&m, Utc::now()).unwrap();

        assert_ne!(rejected.id, m.id);
        assert!(rejected.is_rejected);
        assert!(db.get_match_by_id(m.id).unwrap().is_none());
        assert!(!db.get_typing_status(m.id, x).unwrap());
        assert_eq!(db.get_match_between_users(y, x).unwrap().unwrap().id, rejected.id);
    }
}
