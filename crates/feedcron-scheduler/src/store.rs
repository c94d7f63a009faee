use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use feedcron_core::TenantKey;
use rusqlite::{types::Type, Connection};
use tracing::{debug, instrument};

use crate::db::init_db;
use crate::error::{Result, SchedulerError};
use crate::types::{Process, ProcessMessage, ProcessStatus};

/// Query over stored processes.
///
/// Results are always ordered by `next_iteration` ascending (unset first),
/// with the tenant key as a tie-breaker, regardless of storage order.
#[derive(Debug, Clone, Default)]
pub struct ProcessFilter {
    /// Match any of these statuses; empty matches all.
    pub statuses: Vec<ProcessStatus>,
    /// Only records whose `next_iteration` is set and not after this instant.
    pub next_iteration_lte: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// The state a save expects to overwrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expected {
    pub status: ProcessStatus,
    pub revision: u64,
}

impl Expected {
    pub fn of(process: &Process) -> Self {
        Self {
            status: process.status,
            revision: process.revision,
        }
    }
}

/// Result of a compare-and-update save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// The stored record no longer matches [`Expected`]; nothing was written.
    Conflict,
}

/// Keyed storage for process records.
///
/// Implementations must make `save` atomic: either every field of the
/// record is written or none is.
pub trait ProcessStore: Send + Sync {
    /// Insert a new record. Fails with `AlreadyExists` if the tenant has one.
    fn create(&self, process: &Process) -> Result<()>;

    fn load_by_tenant(&self, tenant: &TenantKey) -> Result<Option<Process>>;

    fn filter(&self, filter: &ProcessFilter) -> Result<Vec<Process>>;

    /// Overwrite the stored record only if it still matches `expected`.
    fn save(&self, process: &Process, expected: Expected) -> Result<SaveOutcome>;

    fn list(&self) -> Result<Vec<Process>>;
}

/// Heartbeat of the periodic trigger, used for cron health reporting.
pub trait TickLog: Send + Sync {
    fn record_tick(&self, finished_at: DateTime<Utc>) -> Result<()>;

    fn last_tick(&self) -> Result<Option<DateTime<Utc>>>;
}

const COLUMNS: &str = "id, tenant_key, status, message, completion, next_run, next_iteration,
     step_offset, error_stack, last_artifact_name, created_at, updated_at, revision";

/// SQLite-backed process store.
///
/// Wraps a single connection in a `Mutex`; several workers sharing one
/// database file each open their own store and are kept apart by the
/// compare-and-update in [`ProcessStore::save`].
pub struct SqliteProcessStore {
    db: Mutex<Connection>,
}

impl SqliteProcessStore {
    /// Wrap `conn`, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ProcessStore for SqliteProcessStore {
    #[instrument(skip(self, process), fields(tenant = %process.tenant_key))]
    fn create(&self, process: &Process) -> Result<()> {
        let db = self.conn();
        let inserted = db.execute(
            "INSERT OR IGNORE INTO processes
             (id, tenant_key, status, message, completion, next_run, next_iteration,
              step_offset, error_stack, last_artifact_name, created_at, updated_at, revision)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            rusqlite::params![
                process.id,
                process.tenant_key.as_str(),
                process.status.as_str(),
                process.message.as_str(),
                process.completion,
                process.next_run.map(format_ts),
                process.next_iteration.map(format_ts),
                process.step_offset as i64,
                process.error_stack,
                process.last_artifact_name,
                format_ts(process.created_at),
                format_ts(process.updated_at),
                process.revision as i64,
            ],
        )?;
        if inserted == 0 {
            return Err(SchedulerError::AlreadyExists {
                tenant: process.tenant_key.clone(),
            });
        }
        debug!("process row inserted");
        Ok(())
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    fn load_by_tenant(&self, tenant: &TenantKey) -> Result<Option<Process>> {
        let db = self.conn();
        let sql = format!("SELECT {COLUMNS} FROM processes WHERE tenant_key = ?1");
        match db.query_row(&sql, [tenant.as_str()], row_to_process) {
            Ok(p) => Ok(Some(p)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(SchedulerError::Database(e)),
        }
    }

    #[instrument(skip(self))]
    fn filter(&self, filter: &ProcessFilter) -> Result<Vec<Process>> {
        let mut sql = format!("SELECT {COLUMNS} FROM processes WHERE 1 = 1");
        let mut args: Vec<String> = Vec::new();

        if !filter.statuses.is_empty() {
            let marks = vec!["?"; filter.statuses.len()].join(", ");
            sql.push_str(&format!(" AND status IN ({marks})"));
            args.extend(filter.statuses.iter().map(|s| s.as_str().to_string()));
        }
        if let Some(lte) = filter.next_iteration_lte {
            sql.push_str(" AND next_iteration IS NOT NULL AND next_iteration <= ?");
            args.push(format_ts(lte));
        }
        sql.push_str(" ORDER BY next_iteration ASC, tenant_key ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let db = self.conn();
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), row_to_process)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    #[instrument(skip(self, process), fields(tenant = %process.tenant_key, status = %process.status))]
    fn save(&self, process: &Process, expected: Expected) -> Result<SaveOutcome> {
        let db = self.conn();
        let changed = db.execute(
            "UPDATE processes
             SET status = ?1, message = ?2, completion = ?3, next_run = ?4,
                 next_iteration = ?5, step_offset = ?6, error_stack = ?7,
                 last_artifact_name = ?8, created_at = ?9, updated_at = ?10,
                 revision = ?11
             WHERE tenant_key = ?12 AND status = ?13 AND revision = ?14",
            rusqlite::params![
                process.status.as_str(),
                process.message.as_str(),
                process.completion,
                process.next_run.map(format_ts),
                process.next_iteration.map(format_ts),
                process.step_offset as i64,
                process.error_stack,
                process.last_artifact_name,
                format_ts(process.created_at),
                format_ts(process.updated_at),
                process.revision as i64,
                process.tenant_key.as_str(),
                expected.status.as_str(),
                expected.revision as i64,
            ],
        )?;
        if changed > 0 {
            return Ok(SaveOutcome::Saved);
        }

        let exists: bool = db.query_row(
            "SELECT EXISTS(SELECT 1 FROM processes WHERE tenant_key = ?1)",
            [process.tenant_key.as_str()],
            |row| row.get(0),
        )?;
        if exists {
            debug!("compare-and-update lost");
            Ok(SaveOutcome::Conflict)
        } else {
            Err(SchedulerError::NotFound {
                tenant: process.tenant_key.clone(),
            })
        }
    }

    fn list(&self) -> Result<Vec<Process>> {
        let db = self.conn();
        let sql = format!("SELECT {COLUMNS} FROM processes ORDER BY tenant_key");
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_process)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

impl TickLog for SqliteProcessStore {
    fn record_tick(&self, finished_at: DateTime<Utc>) -> Result<()> {
        let db = self.conn();
        db.execute(
            "INSERT INTO scheduler_ticks (id, finished_at, tick_count) VALUES (1, ?1, 1)
             ON CONFLICT(id) DO UPDATE
             SET finished_at = excluded.finished_at, tick_count = tick_count + 1",
            [format_ts(finished_at)],
        )?;
        Ok(())
    }

    fn last_tick(&self) -> Result<Option<DateTime<Utc>>> {
        let db = self.conn();
        let raw: Option<String> = match db.query_row(
            "SELECT finished_at FROM scheduler_ticks WHERE id = 1",
            [],
            |row| row.get(0),
        ) {
            Ok(s) => Some(s),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(SchedulerError::Database(e)),
        };
        raw.map(|s| parse_ts(&s).map_err(SchedulerError::InvalidRecord))
            .transpose()
    }
}

/// Canonical stored form: `2024-01-31T10:00:00Z`.
pub fn format_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_ts(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp {s:?}: {e}"))
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn ts_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).map_err(|e| conversion_error(idx, e))
}

fn opt_ts_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_ts(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

/// Map a SQLite row (selected with `COLUMNS`) to a `Process`.
fn row_to_process(row: &rusqlite::Row<'_>) -> rusqlite::Result<Process> {
    let status: String = row.get(2)?;
    let message: String = row.get(3)?;
    Ok(Process {
        id: row.get(0)?,
        tenant_key: TenantKey::new(row.get::<_, String>(1)?),
        status: status.parse().map_err(|e| conversion_error(2, e))?,
        message: message
            .parse::<ProcessMessage>()
            .map_err(|e| conversion_error(3, e))?,
        completion: row.get(4)?,
        next_run: opt_ts_column(row, 5)?,
        next_iteration: opt_ts_column(row, 6)?,
        step_offset: row.get::<_, i64>(7)? as u64,
        error_stack: row.get(8)?,
        last_artifact_name: row.get(9)?,
        created_at: ts_column(row, 10)?,
        updated_at: ts_column(row, 11)?,
        revision: row.get::<_, i64>(12)? as u64,
    })
}
