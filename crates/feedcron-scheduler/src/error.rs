use feedcron_core::TenantKey;
use thiserror::Error;

use crate::types::ProcessStatus;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A process is already registered for this tenant.
    #[error("Process already exists for tenant {tenant}")]
    AlreadyExists { tenant: TenantKey },

    /// No process is registered for this tenant.
    #[error("Process not found for tenant {tenant}")]
    NotFound { tenant: TenantKey },

    /// No configuration entry exists for this tenant.
    #[error("Unknown tenant: {tenant}")]
    UnknownTenant { tenant: TenantKey },

    /// The requested transition is not legal from the process's current status.
    #[error("Cannot {op} process for tenant {tenant} while {status}")]
    InvalidTransition {
        tenant: TenantKey,
        op: &'static str,
        status: ProcessStatus,
    },

    /// Another worker saved the record first; the transition was not applied.
    #[error("Process for tenant {tenant} was modified concurrently")]
    Conflict { tenant: TenantKey },

    /// The feed or temporary file location is not writable.
    #[error("Insufficient file permissions for tenant {tenant}")]
    PermissionDenied { tenant: TenantKey },

    /// Invalid scheduler configuration (bad timezone, ...).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The feed generator failed to perform a step.
    #[error("Generator error: {0}")]
    Generator(String),

    /// A stored row could not be decoded.
    #[error("Invalid process record: {0}")]
    InvalidRecord(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SchedulerError {
    /// True for the benign "another worker got there first" outcome.
    pub fn is_conflict(&self) -> bool {
        matches!(self, SchedulerError::Conflict { .. })
    }
}

impl From<feedcron_core::FeedcronError> for SchedulerError {
    fn from(e: feedcron_core::FeedcronError) -> Self {
        SchedulerError::Configuration(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
