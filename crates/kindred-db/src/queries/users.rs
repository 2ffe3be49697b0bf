use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use kindred_types::models::UserProfile;

use super::OptionalExt;
use crate::Database;
use crate::models::{USER_COLUMNS, ts, user_from_row};

impl Database {
    pub fn get_user(&self, id: Uuid) -> Result<Option<UserProfile>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                [id.to_string()],
                user_from_row,
            )
            .optional()
        })
    }

    /// Insert or refresh a profile. Profile management itself lives outside the core;
    /// this is how that collaborator (and tests) seed the rows the core reads.
    pub fn upsert_user(&self, user: &UserProfile) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, display_name, photo_url, ghost_mode, last_seen_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    display_name = excluded.display_name,
                    photo_url = excluded.photo_url,
                    ghost_mode = excluded.ghost_mode",
                rusqlite::params![
                    user.id.to_string(),
                    user.display_name,
                    user.photo_url,
                    user.ghost_mode,
                    user.last_seen_at.map(ts),
                ],
            )?;
            Ok(())
        })
    }

    /// Returns false when the user does not exist.
    pub fn set_ghost_mode(&self, id: Uuid, enabled: bool) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET ghost_mode = ?2 WHERE id = ?1",
                rusqlite::params![id.to_string(), enabled],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn touch_last_seen(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET last_seen_at = ?2 WHERE id = ?1",
                rusqlite::params![id.to_string(), ts(at)],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(name: &str) -> UserProfile {
        UserProfile {
            id: Uuid::new_v4(),
            display_name: name.to_string(),
            photo_url: None,
            ghost_mode: false,
            last_seen_at: None,
        }
    }

    #[test]
    fn upsert_then_toggle_ghost_mode() {
        let db = Database::open_in_memory().unwrap();
        let user = profile("Robin");
        db.upsert_user(&user).unwrap();

        assert!(db.set_ghost_mode(user.id, true).unwrap());
        let stored = db.get_user(user.id).unwrap().unwrap();
        assert!(stored.ghost_mode);
        assert_eq!(stored.display_name, "Robin");

        assert!(!db.set_ghost_mode(Uuid::new_v4(), true).unwrap());
    }

    #[test]
    fn last_seen_round_trips() {
        let db = Database::open_in_memory().unwrap();
        let user = profile("Sam");
        db.upsert_user(&user).unwrap();

        let at = "2026-05-01T12:00:00.250Z".parse().unwrap();
        db.touch_last_seen(user.id, at).unwrap();
        assert_eq!(db.get_user(user.id).unwrap().unwrap().last_seen_at, Some(at));
    }
}
