//! `feedcron-scheduler`: per-tenant feed generation scheduling with SQLite persistence.
//!
//! # Overview
//!
//! Each tenant owns one persisted [`types::Process`]. The
//! [`reconciler::TenantReconciler`] keeps processes in line with tenant
//! configuration, the [`due::DueSelector`] picks the most overdue one, and
//! [`lifecycle::ProcessLifecycle`] applies every state change with a
//! compare-and-update save. [`engine::SchedulerEngine`] wires the three into a
//! polling loop that runs one [`generator::FeedGenerator`] step per tick.
//!
//! # Process states
//!
//! | Status     | `next_run` | `next_iteration`      | Left by                     |
//! |------------|------------|-----------------------|-----------------------------|
//! | `Disabled` | unset      | unset                 | `enable`                    |
//! | `Waiting`  | unset      | unset                 | `reschedule`, `disable`     |
//! | `Pending`  | first run  | first run             | `begin_run`, `disable`      |
//! | `Running`  | unset      | next step             | `conclude`, `disable`       |

pub mod clock;
pub mod db;
pub mod due;
pub mod engine;
pub mod error;
pub mod files;
pub mod generator;
pub mod health;
pub mod lifecycle;
pub mod notify;
pub mod reconciler;
pub mod schedule;
pub mod store;
pub mod tenants;
pub mod types;

pub use engine::{EngineSettings, SchedulerEngine, StepOutcome, TickSummary};
pub use error::{Result, SchedulerError};
pub use lifecycle::ProcessLifecycle;
pub use reconciler::{ReconcileOptions, TenantReconciler};
pub use store::{ProcessStore, SqliteProcessStore, TickLog};
pub use types::{Process, ProcessMessage, ProcessStatus};
