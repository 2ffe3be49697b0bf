use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id              TEXT PRIMARY KEY,
                display_name    TEXT NOT NULL,
                photo_url       TEXT,
                ghost_mode      INTEGER NOT NULL DEFAULT 0,
                last_seen_at    TEXT,
                created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            -- One row per unordered pair; user_a is always the lower id.
            CREATE TABLE matches (
                id              TEXT PRIMARY KEY,
                user_a          TEXT NOT NULL,
                user_b          TEXT NOT NULL,
                is_mutual       INTEGER NOT NULL DEFAULT 0,
                is_rejected     INTEGER NOT NULL DEFAULT 0,
                origin          TEXT NOT NULL,
                unread_a        INTEGER NOT NULL DEFAULT 0,
                unread_b        INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL,
                UNIQUE(user_a, user_b),
                CHECK(user_a < user_b)
            );

            CREATE INDEX idx_matches_user_b ON matches(user_b);

            CREATE TABLE messages (
                id                  TEXT PRIMARY KEY,
                match_id            TEXT NOT NULL REFERENCES matches(id),
                sender_id           TEXT NOT NULL,
                receiver_id         TEXT NOT NULL,
                content             TEXT NOT NULL,
                kind                TEXT NOT NULL,
                reply_to_id         TEXT,
                reply_to_own        INTEGER NOT NULL DEFAULT 0,
                created_at          TEXT NOT NULL,
                read_at             TEXT,
                hidden_for_receiver INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_messages_match ON messages(match_id, created_at);
            CREATE INDEX idx_messages_sender ON messages(sender_id, match_id, created_at);

            -- Standing like/dislike of one user toward another, per pool.
            CREATE TABLE interests (
                user_id     TEXT NOT NULL,
                target_id   TEXT NOT NULL,
                pool        TEXT NOT NULL,
                action      TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                PRIMARY KEY (user_id, target_id, pool)
            );

            CREATE INDEX idx_interests_target ON interests(target_id, user_id);

            CREATE TABLE swipe_history (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL,
                target_id   TEXT NOT NULL,
                pool        TEXT NOT NULL,
                action      TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                UNIQUE(user_id, target_id, pool)
            );

            CREATE TABLE typing_status (
                match_id    TEXT NOT NULL REFERENCES matches(id),
                user_id     TEXT NOT NULL,
                is_typing   INTEGER NOT NULL,
                updated_at  TEXT NOT NULL,
                PRIMARY KEY (match_id, user_id)
            );

            CREATE TABLE calls (
                id          TEXT PRIMARY KEY,
                match_id    TEXT NOT NULL REFERENCES matches(id),
                caller_id   TEXT NOT NULL,
                callee_id   TEXT NOT NULL,
                call_type   TEXT NOT NULL,
                status      TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                started_at  TEXT,
                ended_at    TEXT
            );

            CREATE INDEX idx_calls_match ON calls(match_id);

            CREATE TABLE match_archives (
                id          TEXT PRIMARY KEY,
                match_id    TEXT NOT NULL,
                user_a      TEXT NOT NULL,
                user_b      TEXT NOT NULL,
                reason      TEXT NOT NULL,
                snapshot    TEXT NOT NULL,
                archived_at TEXT NOT NULL
            );

            CREATE TABLE compatibility_scores (
                user_a      TEXT NOT NULL,
                user_b      TEXT NOT NULL,
                score       REAL NOT NULL,
                computed_at TEXT NOT NULL,
                PRIMARY KEY (user_a, user_b)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
