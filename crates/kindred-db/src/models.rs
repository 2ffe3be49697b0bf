//! Row mapping between SQLite columns and the domain types in `kindred-types`.
//!
//! Ids are stored as UUID text, timestamps as RFC 3339 UTC text with millisecond
//! precision (so lexical order is chronological), and `MatchOrigin` as a JSON text
//! column. Nothing outside this crate sees those encodings.

use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use kindred_types::models::{
    Call, Conversation, MatchOrigin, Message, SwipeRecord, UserProfile,
};

pub(crate) fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn uuid_at(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_uuid_at(row: &Row, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| s.parse().map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub(crate) fn tag_at<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    raw.parse::<DateTime<Utc>>().or_else(|_| {
        // Rows written by SQLite defaults lack a timezone suffix.
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
    })
}

pub(crate) fn ts_at(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_ts_at(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_ts(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub(crate) fn encode_origin(origin: &MatchOrigin) -> anyhow::Result<String> {
    Ok(serde_json::to_string(origin)?)
}

pub(crate) const USER_COLUMNS: &str = "id, display_name, photo_url, ghost_mode, last_seen_at";

pub(crate) fn user_from_row(row: &Row) -> rusqlite::Result<UserProfile> {
    Ok(UserProfile {
        id: uuid_at(row, 0)?,
        display_name: row.get(1)?,
        photo_url: row.get(2)?,
        ghost_mode: row.get(3)?,
        last_seen_at: opt_ts_at(row, 4)?,
    })
}

pub(crate) const MATCH_COLUMNS: &str =
    "id, user_a, user_b, is_mutual, is_rejected, origin, unread_a, unread_b, created_at, updated_at";

pub(crate) fn conversation_from_row(row: &Row) -> rusqlite::Result<Conversation> {
    let origin_raw: String = row.get(5)?;
    let origin: MatchOrigin =
        serde_json::from_str(&origin_raw).map_err(|e| conversion_error(5, e))?;

    Ok(Conversation {
        id: uuid_at(row, 0)?,
        user_a: uuid_at(row, 1)?,
        user_b: uuid_at(row, 2)?,
        is_mutual: row.get(3)?,
        is_rejected: row.get(4)?,
        origin,
        unread_a: row.get(6)?,
        unread_b: row.get(7)?,
        created_at: ts_at(row, 8)?,
        updated_at: ts_at(row, 9)?,
    })
}

pub(crate) const MESSAGE_COLUMNS: &str = "id, match_id, sender_id, receiver_id, content, kind, \
     reply_to_id, reply_to_own, created_at, read_at, hidden_for_receiver";

pub(crate) fn message_from_row(row: &Row) -> rusqlite::Result<Message> {
    Ok(Message {
        id: uuid_at(row, 0)?,
        match_id: uuid_at(row, 1)?,
        sender_id: uuid_at(row, 2)?,
        receiver_id: uuid_at(row, 3)?,
        content: row.get(4)?,
        kind: tag_at(row, 5)?,
        reply_to_id: opt_uuid_at(row, 6)?,
        reply_to_own: row.get(7)?,
        created_at: ts_at(row, 8)?,
        read_at: opt_ts_at(row, 9)?,
        hidden_for_receiver: row.get(10)?,
    })
}

pub(crate) const SWIPE_COLUMNS: &str = "id, user_id, target_id, action, pool, created_at";

pub(crate) fn swipe_from_row(row: &Row) -> rusqlite::Result<SwipeRecord> {
    Ok(SwipeRecord {
        id: uuid_at(row, 0)?,
        user_id: uuid_at(row, 1)?,
        target_user_id: uuid_at(row, 2)?,
        action: tag_at(row, 3)?,
        pool: tag_at(row, 4)?,
        created_at: ts_at(row, 5)?,
    })
}

pub(crate) const CALL_COLUMNS: &str =
    "id, match_id, caller_id, callee_id, call_type, status, created_at, started_at, ended_at";

pub(crate) fn call_from_row(row: &Row) -> rusqlite::Result<Call> {
    Ok(Call {
        id: uuid_at(row, 0)?,
        match_id: uuid_at(row, 1)?,
        caller_id: uuid_at(row, 2)?,
        callee_id: uuid_at(row, 3)?,
        call_type: row.get(4)?,
        status: tag_at(row, 5)?,
        created_at: ts_at(row, 6)?,
        started_at: opt_ts_at(row, 7)?,
        ended_at: opt_ts_at(row, 8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_sort_lexically() {
        let early = "2026-01-01T09:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let late = early + chrono::Duration::milliseconds(1500);
        assert!(ts(early) < ts(late));
        assert_eq!(parse_ts(&ts(late)).unwrap(), late);
    }

    #[test]
    fn sqlite_default_timestamps_parse_as_utc() {
        let parsed = parse_ts("2026-03-04 05:06:07").unwrap();
        assert_eq!(ts(parsed), "2026-03-04T05:06:07.000Z");
    }
}
