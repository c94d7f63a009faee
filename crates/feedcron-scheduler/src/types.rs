use chrono::{DateTime, Utc};
use feedcron_core::TenantKey;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Artifact name recorded before a tenant's first successful cycle.
pub const NO_ARTIFACT: &str = "none";

/// Lifecycle state of a tenant's feed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// Tenant configuration is disabled; nothing is scheduled.
    Disabled,
    /// A cycle has concluded (or none has started); awaiting reschedule.
    Waiting,
    /// Scheduled; the first step is due at `next_iteration`.
    Pending,
    /// Mid-cycle; the next step is due at `next_iteration`.
    Running,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Disabled => "disabled",
            ProcessStatus::Waiting => "waiting",
            ProcessStatus::Pending => "pending",
            ProcessStatus::Running => "running",
        }
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProcessStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "disabled" => Ok(ProcessStatus::Disabled),
            "waiting" => Ok(ProcessStatus::Waiting),
            "pending" => Ok(ProcessStatus::Pending),
            "running" => Ok(ProcessStatus::Running),
            other => Err(format!("unknown process status: {other}")),
        }
    }
}

/// Code describing the last notable transition, for operator display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessMessage {
    Empty,
    Pending,
    Running,
    Finished,
    StepFailed,
    Abandoned,
}

impl ProcessMessage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessMessage::Empty => "empty",
            ProcessMessage::Pending => "pending",
            ProcessMessage::Running => "running",
            ProcessMessage::Finished => "finished",
            ProcessMessage::StepFailed => "step_failed",
            ProcessMessage::Abandoned => "abandoned",
        }
    }
}

impl std::fmt::Display for ProcessMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProcessMessage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "empty" => Ok(ProcessMessage::Empty),
            "pending" => Ok(ProcessMessage::Pending),
            "running" => Ok(ProcessMessage::Running),
            "finished" => Ok(ProcessMessage::Finished),
            "step_failed" => Ok(ProcessMessage::StepFailed),
            "abandoned" => Ok(ProcessMessage::Abandoned),
            other => Err(format!("unknown process message: {other}")),
        }
    }
}

/// The persisted scheduling record for one tenant's feed generation.
///
/// Records are only ever changed through [`ProcessLifecycle`](crate::lifecycle::ProcessLifecycle),
/// which saves each transition as a whole so `status`, `next_run` and
/// `next_iteration` are never observed in an inconsistent combination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Process {
    /// UUIDv7 string, time-sortable.
    pub id: String,
    pub tenant_key: TenantKey,
    pub status: ProcessStatus,
    pub message: ProcessMessage,
    /// Percentage complete; `None` until the first cycle is scheduled.
    pub completion: Option<u8>,
    /// First-run instant while PENDING, otherwise unset.
    pub next_run: Option<DateTime<Utc>>,
    /// When the next step (RUNNING) or the first run (PENDING) is due.
    pub next_iteration: Option<DateTime<Utc>>,
    /// Cursor into the tenant's data set, carried between steps.
    pub step_offset: u64,
    /// Consecutive step failures in the current cycle.
    pub error_stack: u32,
    pub last_artifact_name: String,
    /// When the process was registered or last rescheduled.
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Save counter used for compare-and-update.
    pub revision: u64,
}

impl Process {
    /// A freshly registered record: WAITING when enabled, DISABLED otherwise.
    pub fn new(tenant_key: TenantKey, enabled: bool, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            tenant_key,
            status: if enabled {
                ProcessStatus::Waiting
            } else {
                ProcessStatus::Disabled
            },
            message: ProcessMessage::Empty,
            completion: None,
            next_run: None,
            next_iteration: None,
            step_offset: 0,
            error_stack: 0,
            last_artifact_name: NO_ARTIFACT.to_string(),
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.status != ProcessStatus::Disabled
    }

    /// Completion as shown to operators: `-` before the first cycle, else `N%`.
    pub fn completion_label(&self) -> String {
        match self.completion {
            Some(pct) => format!("{pct}%"),
            None => "-".to_string(),
        }
    }
}
