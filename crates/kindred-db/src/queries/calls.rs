use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use kindred_types::models::{Call, CallStatus};

use super::OptionalExt;
use crate::Database;
use crate::models::{CALL_COLUMNS, call_from_row, ts};

impl Database {
    pub fn create_call(&self, call: &Call) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!("INSERT INTO calls ({CALL_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
                rusqlite::params![
                    call.id.to_string(),
                    call.match_id.to_string(),
                    call.caller_id.to_string(),
                    call.callee_id.to_string(),
                    call.call_type,
                    call.status.as_str(),
                    ts(call.created_at),
                    call.started_at.map(ts),
                    call.ended_at.map(ts),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_call(&self, id: Uuid) -> Result<Option<Call>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {CALL_COLUMNS} FROM calls WHERE id = ?1"),
                [id.to_string()],
                call_from_row,
            )
            .optional()
        })
    }

    /// Compare-and-set on the call status. `started_at` is stamped when entering
    /// `Active`, `ended_at` when entering a terminal status. Returns true only when
    /// the call was in `from` and this call moved it.
    pub fn transition_call(&self, id: Uuid, from: CallStatus, to: CallStatus, at: DateTime<Utc>) -> Result<bool> {
        let stamp = ts(at);
        let (started_at, ended_at) = match to {
            CallStatus::Active => (Some(stamp), None),
            s if s.is_terminal() => (None, Some(stamp)),
            _ => (None, None),
        };

        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE calls SET
                    status = ?3,
                    started_at = COALESCE(?4, started_at),
                    ended_at = COALESCE(?5, ended_at)
                 WHERE id = ?1 AND status = ?2",
                rusqlite::params![id.to_string(), from.as_str(), to.as_str(), started_at, ended_at],
            )?;
            Ok(changed > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::pending;
    use kindred_types::models::MatchPool;

    #[test]
    fn transitions_are_compare_and_set() {
        let db = Database::open_in_memory().unwrap();
        let (caller, callee) = (Uuid::new_v4(), Uuid::new_v4());
        let m = db.create_match(&pending(caller, callee, MatchPool::Dating)).unwrap();

        let call = Call {
            id: Uuid::new_v4(),
            match_id: m.id,
            caller_id: caller,
            callee_id: callee,
            call_type: "video".into(),
            status: CallStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        };
        db.create_call(&call).unwrap();

        assert!(db.transition_call(call.id, CallStatus::Pending, CallStatus::Active, Utc::now()).unwrap());
        assert!(!db.transition_call(call.id, CallStatus::Pending, CallStatus::Declined, Utc::now()).unwrap());
        assert!(db.transition_call(call.id, CallStatus::Active, CallStatus::Completed, Utc::now()).unwrap());

        let stored = db.get_call(call.id).unwrap().unwrap();
        assert_eq!(stored.status, CallStatus::Completed);
        assert!(stored.started_at.is_some());
        assert!(stored.ended_at.is_some());
    }
}
