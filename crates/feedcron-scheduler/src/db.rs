use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `processes` and `scheduler_ticks` tables (idempotent).
/// Timestamps are RFC3339 UTC strings with second precision and a `Z`
/// suffix, so lexical order matches chronological order and the due query
/// can compare them directly.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS processes (
            id                  TEXT    NOT NULL PRIMARY KEY,
            tenant_key          TEXT    NOT NULL UNIQUE,
            status              TEXT    NOT NULL,
            message             TEXT    NOT NULL DEFAULT 'empty',
            completion          INTEGER,            -- NULL until first scheduled
            next_run            TEXT,               -- RFC3339 or NULL
            next_iteration      TEXT,               -- RFC3339 or NULL
            step_offset         INTEGER NOT NULL DEFAULT 0,
            error_stack         INTEGER NOT NULL DEFAULT 0,
            last_artifact_name  TEXT    NOT NULL DEFAULT 'none',
            created_at          TEXT    NOT NULL,
            updated_at          TEXT    NOT NULL,
            revision            INTEGER NOT NULL DEFAULT 0
        ) STRICT;

        -- Due selection: WHERE status IN (...) AND next_iteration <= ? ORDER BY next_iteration
        CREATE INDEX IF NOT EXISTS idx_processes_due
            ON processes (status, next_iteration);

        CREATE TABLE IF NOT EXISTS scheduler_ticks (
            id           INTEGER NOT NULL PRIMARY KEY CHECK (id = 1),
            finished_at  TEXT    NOT NULL,
            tick_count   INTEGER NOT NULL DEFAULT 0
        ) STRICT;
        ",
    )?;
    Ok(())
}
