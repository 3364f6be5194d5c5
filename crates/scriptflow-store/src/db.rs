use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scripts, executions and schedules tables.
///
/// Safe to call on every startup: uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS scripts (
            id           TEXT    NOT NULL PRIMARY KEY,
            name         TEXT    NOT NULL,
            path         TEXT    NOT NULL UNIQUE,
            description  TEXT    NOT NULL DEFAULT '',
            interpreter  TEXT,              -- NULL: chosen from the file extension
            created_at   TEXT    NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS executions (
            id           TEXT    NOT NULL PRIMARY KEY,
            script_id    TEXT    NOT NULL,
            schedule_id  TEXT,
            cause        TEXT    NOT NULL,  -- manual | scheduled
            attempt      INTEGER NOT NULL DEFAULT 1,
            state        TEXT    NOT NULL,
            created_at   TEXT    NOT NULL,
            started_at   TEXT,
            finished_at  TEXT,
            duration_ms  INTEGER,
            exit_code    INTEGER,
            stdout       TEXT    NOT NULL DEFAULT '',
            stderr       TEXT    NOT NULL DEFAULT '',
            truncated    INTEGER NOT NULL DEFAULT 0,
            working_dir  TEXT,
            note         TEXT
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_executions_script
            ON executions (script_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_executions_schedule
            ON executions (schedule_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_executions_state
            ON executions (state);

        -- At most one live scheduled record per script.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_executions_live_scheduled
            ON executions (script_id)
            WHERE cause = 'scheduled' AND state IN ('pending', 'running');

        CREATE TABLE IF NOT EXISTS schedules (
            id                    TEXT    NOT NULL PRIMARY KEY,
            script_id             TEXT    NOT NULL,
            name                  TEXT    NOT NULL,
            description           TEXT    NOT NULL DEFAULT '',
            rule                  TEXT    NOT NULL,   -- JSON-encoded ScheduleRule
            active                INTEGER NOT NULL DEFAULT 1,
            consecutive_failures  INTEGER NOT NULL DEFAULT 0,
            next_due              TEXT,               -- NULL while inactive
            last_run              TEXT,
            created_at            TEXT    NOT NULL,
            updated_at            TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_schedules_next_due ON schedules (next_due);
        ",
    )?;
    Ok(())
}

/// Fixed-width RFC 3339 (microseconds, `Z`), so text order equals time order.
pub(crate) fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn opt_ts(dt: &Option<DateTime<Utc>>) -> Option<String> {
    dt.as_ref().map(ts)
}

pub(crate) fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn parse_opt_ts(idx: usize, s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_ts(idx, &s)).transpose()
}

/// Wrap a plain message as a column conversion failure.
pub(crate) fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        msg.into(),
    )
}
