use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use kindred_types::models::{Conversation, MatchPool, SwipeAction, SwipeRecord};

use super::OptionalExt;
use crate::Database;
use crate::models::{SWIPE_COLUMNS, swipe_from_row, tag_at, ts, uuid_at};

impl Database {
    // -- Interests --

    /// Records a standing like/dislike. The first action for (user, target, pool)
    /// wins; repeats are absorbed. Returns true when a row was written.
    pub fn record_interest(
        &self,
        user: Uuid,
        target: Uuid,
        pool: MatchPool,
        action: SwipeAction,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO interests (user_id, target_id, pool, action, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    user.to_string(),
                    target.to_string(),
                    pool.as_str(),
                    action.as_str(),
                    ts(at),
                ],
            )?;
            Ok(changed > 0)
        })
    }

    /// Overwrites the standing action for (user, target, pool).
    pub fn replace_interest(
        &self,
        user: Uuid,
        target: Uuid,
        pool: MatchPool,
        action: SwipeAction,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO interests (user_id, target_id, pool, action, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (user_id, target_id, pool)
                 DO UPDATE SET action = excluded.action, created_at = excluded.created_at",
                rusqlite::params![
                    user.to_string(),
                    target.to_string(),
                    pool.as_str(),
                    action.as_str(),
                    ts(at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_interest(&self, user: Uuid, target: Uuid, pool: MatchPool) -> Result<Option<SwipeAction>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT action FROM interests WHERE user_id = ?1 AND target_id = ?2 AND pool = ?3",
                rusqlite::params![user.to_string(), target.to_string(), pool.as_str()],
                |row| tag_at(row, 0),
            )
            .optional()
        })
    }

    pub fn delete_interest(&self, user: Uuid, target: Uuid, pool: MatchPool) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM interests WHERE user_id = ?1 AND target_id = ?2 AND pool = ?3",
                rusqlite::params![user.to_string(), target.to_string(), pool.as_str()],
            )?;
            Ok(changed > 0)
        })
    }

    /// Everyone `user` must never be shown again in `pool`: anyone they liked or
    /// passed there, plus anyone they share a rejected conversation with.
    pub fn discovery_exclusions(&self, user: Uuid, pool: MatchPool) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT target_id FROM interests WHERE user_id = ?1 AND pool = ?2
                 UNION
                 SELECT CASE WHEN user_a = ?1 THEN user_b ELSE user_a END
                   FROM matches WHERE (user_a = ?1 OR user_b = ?1) AND is_rejected = 1",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![user.to_string(), pool.as_str()], |row| uuid_at(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Swipe history --

    /// Appends an undo-able history entry; a second entry for the same
    /// (user, target, pool) is ignored. Returns true when a row was written.
    pub fn add_swipe_history(&self, record: &SwipeRecord) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                &format!("INSERT OR IGNORE INTO swipe_history ({SWIPE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
                rusqlite::params![
                    record.id.to_string(),
                    record.user_id.to_string(),
                    record.target_user_id.to_string(),
                    record.action.as_str(),
                    record.pool.as_str(),
                    ts(record.created_at),
                ],
            )?;
            Ok(changed > 0)
        })
    }

    /// Newest first.
    pub fn get_user_swipe_history(&self, user: Uuid, pool: MatchPool, limit: u32) -> Result<Vec<SwipeRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SWIPE_COLUMNS} FROM swipe_history
                 WHERE user_id = ?1 AND pool = ?2
                 ORDER BY created_at DESC
                 LIMIT ?3"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![user.to_string(), pool.as_str(), limit], swipe_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_swipe_between(&self, user: Uuid, target: Uuid, pool: MatchPool) -> Result<Option<SwipeRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {SWIPE_COLUMNS} FROM swipe_history
                     WHERE user_id = ?1 AND target_id = ?2 AND pool = ?3"
                ),
                rusqlite::params![user.to_string(), target.to_string(), pool.as_str()],
                swipe_from_row,
            )
            .optional()
        })
    }

    pub fn delete_swipe_history(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM swipe_history WHERE id = ?1", [id.to_string()])?;
            Ok(changed > 0)
        })
    }

    /// Purges every history entry between the pair, in both directions and all pools,
    /// so undo can never unwind a confirmed match. Returns the number of rows removed.
    pub fn remove_matched_users_from_swipe_history(&self, x: Uuid, y: Uuid) -> Result<usize> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM swipe_history
                 WHERE (user_id = ?1 AND target_id = ?2) OR (user_id = ?2 AND target_id = ?1)",
                [x.to_string(), y.to_string()],
            )?;
            Ok(removed)
        })
    }

    // -- Compatibility cache --

    pub fn upsert_compatibility_score(&self, x: Uuid, y: Uuid, score: f64, at: DateTime<Utc>) -> Result<()> {
        let (a, b) = Conversation::ordered_pair(x, y);
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO compatibility_scores (user_a, user_b, score, computed_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_a, user_b) DO UPDATE SET
                    score = excluded.score,
                    computed_at = excluded.computed_at",
                rusqlite::params![a.to_string(), b.to_string(), score, ts(at)],
            )?;
            Ok(())
        })
    }

    pub fn get_compatibility_score(&self, x: Uuid, y: Uuid) -> Result<Option<f64>> {
        let (a, b) = Conversation::ordered_pair(x, y);
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT score FROM compatibility_scores WHERE user_a = ?1 AND user_b = ?2",
                [a.to_string(), b.to_string()],
                |row| row.get(0),
            )
            .optional()
        })
    }

    pub fn invalidate_compatibility(&self, x: Uuid, y: Uuid) -> Result<usize> {
        let (a, b) = Conversation::ordered_pair(x, y);
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM compatibility_scores WHERE user_a = ?1 AND user_b = ?2",
                [a.to_string(), b.to_string()],
            )?;
            Ok(removed)
        })
    }
}
