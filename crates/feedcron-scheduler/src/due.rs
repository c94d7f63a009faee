use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::Result;
use crate::store::{ProcessFilter, ProcessStore};
use crate::types::{Process, ProcessStatus};

/// Picks the single process whose next step is most overdue.
pub struct DueSelector {
    store: Arc<dyn ProcessStore>,
}

impl DueSelector {
    pub fn new(store: Arc<dyn ProcessStore>) -> Self {
        Self { store }
    }

    /// The PENDING or RUNNING process with the earliest `next_iteration` at
    /// or before `now`, if any.
    pub fn pick_due(&self, now: DateTime<Utc>) -> Result<Option<Process>> {
        let filter = ProcessFilter {
            statuses: vec![ProcessStatus::Pending, ProcessStatus::Running],
            next_iteration_lte: Some(now),
            limit: Some(1),
        };
        let due = self.store.filter(&filter)?.into_iter().next();
        if let Some(p) = &due {
            debug!(tenant = %p.tenant_key, status = %p.status, "process is due");
        }
        Ok(due)
    }
}
