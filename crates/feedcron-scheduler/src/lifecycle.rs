use std::sync::Arc;

use chrono::{DateTime, Duration, Timelike, Utc};
use feedcron_core::config::MAX_STEP_DELAY_MINUTES;
use feedcron_core::TenantKey;
use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::error::{Result, SchedulerError};
use crate::generator::StepReport;
use crate::notify::{Notice, Notifier};
use crate::schedule::{compose_instant, Zone, Zones};
use crate::store::{Expected, ProcessStore, SaveOutcome};
use crate::types::{Process, ProcessMessage, ProcessStatus};

/// The process state machine.
///
/// Every transition validates the current status, builds the complete next
/// record and saves it with a compare-and-update against the status and
/// revision it was computed from. A lost race surfaces as
/// [`SchedulerError::Conflict`] and leaves the stored record untouched.
///
/// ```text
///  register ──► WAITING ◄──────── conclude ──── RUNNING ◄─┐
///     │           │                               │   advance_step
///     ▼           └── reschedule ──► PENDING ── begin_run ─┘
///  DISABLED ◄── disable (any) / enable ──► WAITING
/// ```
pub struct ProcessLifecycle {
    store: Arc<dyn ProcessStore>,
    clock: Arc<dyn Clock>,
    zones: Zones,
    notifier: Arc<dyn Notifier>,
}

impl ProcessLifecycle {
    pub fn new(
        store: Arc<dyn ProcessStore>,
        clock: Arc<dyn Clock>,
        zones: Zones,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            clock,
            zones,
            notifier,
        }
    }

    pub fn store(&self) -> &Arc<dyn ProcessStore> {
        &self.store
    }

    pub fn zones(&self) -> &Zones {
        &self.zones
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Load the process for `tenant`, failing with `NotFound` if it has none.
    pub fn load(&self, tenant: &TenantKey) -> Result<Process> {
        self.store
            .load_by_tenant(tenant)?
            .ok_or_else(|| SchedulerError::NotFound {
                tenant: tenant.clone(),
            })
    }

    /// Create the process for a tenant that has none yet.
    #[instrument(skip(self), fields(tenant = %tenant))]
    pub fn register(&self, tenant: &TenantKey, enabled: bool) -> Result<Process> {
        let process = Process::new(tenant.clone(), enabled, self.now());
        self.store.create(&process)?;
        info!(status = %process.status, "process has been registered");
        Ok(process)
    }

    /// Make a disabled process eligible for scheduling again.
    ///
    /// DISABLED becomes WAITING; any other status is already eligible and is
    /// left as is. Scheduling is a separate step.
    #[instrument(skip(self, process), fields(tenant = %process.tenant_key))]
    pub fn enable(&self, process: &Process) -> Result<Process> {
        let next = if process.status == ProcessStatus::Disabled {
            self.apply(process, "enable", |p| {
                p.status = ProcessStatus::Waiting;
            })?
        } else {
            process.clone()
        };
        info!("process has been enabled");
        self.notifier.notify(Notice::info(
            &process.tenant_key,
            format!("Process for tenant \"{}\" has been enabled", process.tenant_key),
        ));
        Ok(next)
    }

    /// Stop scheduling the process. Valid from any status.
    #[instrument(skip(self, process), fields(tenant = %process.tenant_key))]
    pub fn disable(&self, process: &Process) -> Result<Process> {
        let next = self.apply(process, "disable", |p| {
            p.status = ProcessStatus::Disabled;
            p.next_run = None;
            p.next_iteration = None;
        })?;
        info!("process has been disabled");
        self.notifier.notify(Notice::info(
            &process.tenant_key,
            format!("Process for tenant \"{}\" has been disabled", process.tenant_key),
        ));
        Ok(next)
    }

    /// Schedule a fresh cycle to start at `next_run`. Valid from any status.
    #[instrument(skip(self, process), fields(tenant = %process.tenant_key))]
    pub fn reschedule(&self, process: &Process, next_run: DateTime<Utc>) -> Result<Process> {
        let now = self.now();
        let next = self.apply(process, "reschedule", |p| {
            p.status = ProcessStatus::Pending;
            p.completion = Some(0);
            p.next_run = Some(next_run);
            p.next_iteration = Some(next_run);
            p.step_offset = 0;
            p.error_stack = 0;
            p.message = ProcessMessage::Pending;
            p.created_at = now;
        })?;
        info!(next_run = %next_run, "process has been scheduled");
        Ok(next)
    }

    /// Start the scheduled cycle: PENDING → RUNNING, first step due after the delay.
    #[instrument(skip(self, process), fields(tenant = %process.tenant_key))]
    pub fn begin_run(&self, process: &Process, step_delay_minutes: u32) -> Result<Process> {
        self.require(process, "begin run of", ProcessStatus::Pending)?;
        let due = self.now() + step_delay(step_delay_minutes)?;
        let next = self.apply(process, "begin run of", |p| {
            p.status = ProcessStatus::Running;
            p.message = ProcessMessage::Running;
            p.next_run = None;
            p.next_iteration = Some(due);
        })?;
        info!(next_iteration = %due, "process is running");
        Ok(next)
    }

    /// Push the next step of a running cycle `step_delay_minutes` into the future.
    #[instrument(skip(self, process), fields(tenant = %process.tenant_key))]
    pub fn advance_step(&self, process: &Process, step_delay_minutes: u32) -> Result<Process> {
        self.require(process, "advance", ProcessStatus::Running)?;
        let due = self.next_step_at(step_delay_minutes)?;
        let next = self.apply(process, "advance", |p| {
            p.next_iteration = Some(due);
        })?;
        info!(next_iteration = %due, "scheduling the next step");
        Ok(next)
    }

    /// Finish a running cycle: RUNNING → WAITING.
    #[instrument(skip(self, process), fields(tenant = %process.tenant_key))]
    pub fn conclude(&self, process: &Process) -> Result<Process> {
        self.require(process, "conclude", ProcessStatus::Running)?;
        let next = self.apply(process, "conclude", |p| {
            p.status = ProcessStatus::Waiting;
            p.message = ProcessMessage::Finished;
            p.next_run = None;
            p.next_iteration = None;
        })?;
        info!(artifact = %next.last_artifact_name, "process has finished its cycle");
        Ok(next)
    }

    /// Store what a successful step reported. Only valid while RUNNING.
    ///
    /// A success clears the consecutive failure count.
    #[instrument(skip(self, process, report), fields(tenant = %process.tenant_key, offset = report.offset))]
    pub fn record_progress(&self, process: &Process, report: &StepReport) -> Result<Process> {
        self.require(process, "record progress of", ProcessStatus::Running)?;
        self.apply(process, "record progress of", |p| {
            p.step_offset = report.offset;
            if let Some(pct) = report.completion {
                p.completion = Some(pct.min(100));
            }
            if let Some(name) = &report.artifact_name {
                p.last_artifact_name = name.clone();
            }
            p.error_stack = 0;
            p.message = ProcessMessage::Running;
        })
    }

    /// Count a failed step. Only valid while RUNNING.
    ///
    /// Below `max_error_stack` consecutive failures the step is retried after
    /// the step delay. Reaching it abandons the cycle: the process returns to
    /// WAITING so the next reconciliation schedules a fresh one.
    #[instrument(skip(self, process), fields(tenant = %process.tenant_key))]
    pub fn record_failure(
        &self,
        process: &Process,
        reason: &str,
        max_error_stack: u32,
        step_delay_minutes: u32,
    ) -> Result<Process> {
        self.require(process, "record failure of", ProcessStatus::Running)?;
        let failures = process.error_stack.saturating_add(1);
        let abandon = failures >= max_error_stack.max(1);
        let retry_at = self.next_step_at(step_delay_minutes)?;

        let next = self.apply(process, "record failure of", |p| {
            p.error_stack = failures;
            if abandon {
                p.status = ProcessStatus::Waiting;
                p.message = ProcessMessage::Abandoned;
                p.next_run = None;
                p.next_iteration = None;
            } else {
                p.message = ProcessMessage::StepFailed;
                p.next_iteration = Some(retry_at);
            }
        })?;

        if abandon {
            warn!(failures, reason, "cycle abandoned after repeated step failures");
            self.notifier.notify(Notice::error(
                &process.tenant_key,
                format!(
                    "Feed generation for tenant \"{}\" stopped after {failures} failed steps: {reason}",
                    process.tenant_key
                ),
            ));
        } else {
            warn!(failures, reason, retry_at = %retry_at, "step failed; retrying");
        }
        Ok(next)
    }

    /// `now + delay` composed as a wall-clock time in the configured zone.
    fn next_step_at(&self, step_delay_minutes: u32) -> Result<DateTime<Utc>> {
        step_delay(step_delay_minutes)?;
        let now = self.now();
        let local = self.zones.configured.local(now);
        Ok(compose_instant(
            &self.zones,
            local.hour(),
            local.minute() + step_delay_minutes,
            local.second(),
            Zone::Configured,
            now,
        )
        .with_timezone(&Utc))
    }

    fn require(&self, process: &Process, op: &'static str, allowed: ProcessStatus) -> Result<()> {
        if process.status == allowed {
            return Ok(());
        }
        let err = SchedulerError::InvalidTransition {
            tenant: process.tenant_key.clone(),
            op,
            status: process.status,
        };
        warn!(tenant = %process.tenant_key, error = %err, "transition rejected");
        self.notifier
            .notify(Notice::error(&process.tenant_key, err.to_string()));
        Err(err)
    }

    /// Build the next record from `current`, then compare-and-update it.
    fn apply(
        &self,
        current: &Process,
        op: &'static str,
        mutate: impl FnOnce(&mut Process),
    ) -> Result<Process> {
        let mut next = current.clone();
        mutate(&mut next);
        next.revision = current.revision + 1;
        next.updated_at = self.now();

        match self.store.save(&next, Expected::of(current))? {
            SaveOutcome::Saved => Ok(next),
            SaveOutcome::Conflict => {
                debug!(tenant = %current.tenant_key, op, "lost race; transition not applied");
                Err(SchedulerError::Conflict {
                    tenant: current.tenant_key.clone(),
                })
            }
        }
    }
}

fn step_delay(minutes: u32) -> Result<Duration> {
    if minutes > MAX_STEP_DELAY_MINUTES {
        return Err(SchedulerError::Configuration(format!(
            "step delay of {minutes} minutes exceeds {MAX_STEP_DELAY_MINUTES}"
        )));
    }
    Ok(Duration::minutes(i64::from(minutes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::notify::{MemoryNotifier, NoticeLevel};
    use crate::schedule::ZoneSpec;
    use crate::store::SqliteProcessStore;
    use chrono::{FixedOffset, TimeZone};

    struct Fixture {
        lifecycle: ProcessLifecycle,
        store: Arc<SqliteProcessStore>,
        clock: FakeClock,
        notices: Arc<MemoryNotifier>,
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap()
    }

    fn fixture() -> Fixture {
        fixture_in(Zones::utc())
    }

    fn fixture_in(zones: Zones) -> Fixture {
        let store = Arc::new(SqliteProcessStore::open_in_memory().unwrap());
        let clock = FakeClock::new(start());
        let notices = Arc::new(MemoryNotifier::new());
        let lifecycle = ProcessLifecycle::new(store.clone(), Arc::new(clock.clone()), zones, notices.clone());
        Fixture {
            lifecycle,
            store,
            clock,
            notices,
        }
    }

    fn tenant() -> TenantKey {
        TenantKey::from("default")
    }

    fn stored(f: &Fixture) -> Process {
        f.store.load_by_tenant(&tenant()).unwrap().unwrap()
    }

    #[test]
    fn register_twice_fails() {
        let f = fixture();
        let p = f.lifecycle.register(&tenant(), true).unwrap();
        assert_eq!(p.status, ProcessStatus::Waiting);
        let err = f.lifecycle.register(&tenant(), false).unwrap_err();
        assert!(matches!(err, SchedulerError::AlreadyExists { .. }));
    }

    #[test]
    fn load_of_unregistered_tenant_is_not_found() {
        let f = fixture();
        assert!(matches!(
            f.lifecycle.load(&tenant()).unwrap_err(),
            SchedulerError::NotFound { .. }
        ));
    }

    #[test]
    fn reschedule_resets_cycle_fields() {
        let f = fixture();
        let p = f.lifecycle.register(&tenant(), true).unwrap();
        let due = start() + Duration::hours(3);
        let p = f.lifecycle.reschedule(&p, due).unwrap();

        assert_eq!(p.status, ProcessStatus::Pending);
        assert_eq!(p.message, ProcessMessage::Pending);
        assert_eq!(p.completion, Some(0));
        assert_eq!(p.next_run, Some(due));
        assert_eq!(p.next_iteration, Some(due));
        assert_eq!((p.step_offset, p.error_stack), (0, 0));
        assert_eq!(p.created_at, start());
        assert_eq!(stored(&f), p);
    }

    #[test]
    fn full_cycle_returns_to_waiting_with_reset_counters() {
        let f = fixture();
        let p = f.lifecycle.register(&tenant(), true).unwrap();
        let p = f.lifecycle.reschedule(&p, start()).unwrap();

        let p = f.lifecycle.begin_run(&p, 10).unwrap();
        assert_eq!(p.status, ProcessStatus::Running);
        assert!(p.next_run.is_none());
        assert_eq!(p.next_iteration, Some(start() + Duration::minutes(10)));

        let p = f.lifecycle.conclude(&p).unwrap();
        assert_eq!(p.status, ProcessStatus::Waiting);
        assert_eq!(p.message, ProcessMessage::Finished);
        assert!(p.next_run.is_none() && p.next_iteration.is_none());
        assert_eq!(p.step_offset, 0);
        assert_eq!(p.completion, Some(0));
        assert_eq!(p.error_stack, 0);
        assert_eq!(stored(&f), p);
    }

    #[test]
    fn advance_step_on_waiting_is_rejected_without_writing() {
        let f = fixture();
        let p = f.lifecycle.register(&tenant(), true).unwrap();
        let before = stored(&f);

        let err = f.lifecycle.advance_step(&p, 5).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::InvalidTransition {
                status: ProcessStatus::Waiting,
                ..
            }
        ));
        assert_eq!(stored(&f), before);
        let notices = f.notices.drain();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Error);
    }

    #[test]
    fn begin_run_requires_pending() {
        let f = fixture();
        let p = f.lifecycle.register(&tenant(), true).unwrap();
        assert!(f.lifecycle.begin_run(&p, 5).is_err());
        assert!(f.lifecycle.conclude(&p).is_err());
        assert_eq!(stored(&f).revision, 0);
    }

    #[test]
    fn advance_step_schedules_from_now() {
        let f = fixture();
        let p = f.lifecycle.register(&tenant(), true).unwrap();
        let p = f.lifecycle.reschedule(&p, start()).unwrap();
        let p = f.lifecycle.begin_run(&p, 5).unwrap();

        f.clock.advance(Duration::minutes(7) + Duration::seconds(12));
        let p = f.lifecycle.advance_step(&p, 58).unwrap();
        assert_eq!(p.status, ProcessStatus::Running);
        assert_eq!(
            p.next_iteration,
            Some(Utc.with_ymd_and_hms(2024, 3, 4, 10, 5, 12).unwrap())
        );
    }

    #[test]
    fn advance_step_crosses_midnight_in_configured_zone() {
        let zones = Zones {
            configured: ZoneSpec::Fixed(FixedOffset::east_opt(3600).unwrap()),
            default: ZoneSpec::Fixed(FixedOffset::east_opt(0).unwrap()),
        };
        let f = fixture_in(zones);
        f.clock.set(Utc.with_ymd_and_hms(2024, 3, 4, 22, 50, 0).unwrap());
        let p = f.lifecycle.register(&tenant(), true).unwrap();
        let p = f.lifecycle.reschedule(&p, f.lifecycle.now()).unwrap();
        let p = f.lifecycle.begin_run(&p, 0).unwrap();
        let p = f.lifecycle.advance_step(&p, 20).unwrap();
        assert_eq!(
            p.next_iteration,
            Some(Utc.with_ymd_and_hms(2024, 3, 4, 23, 10, 0).unwrap())
        );
    }

    #[test]
    fn concurrent_begin_run_has_one_winner() {
        let f = fixture();
        let p = f.lifecycle.register(&tenant(), true).unwrap();
        let pending = f.lifecycle.reschedule(&p, start()).unwrap();

        // Both workers read the same PENDING record.
        let worker_a = pending.clone();
        let worker_b = pending;

        let won = f.lifecycle.begin_run(&worker_a, 5).unwrap();
        let lost = f.lifecycle.begin_run(&worker_b, 5).unwrap_err();
        assert!(lost.is_conflict());
        assert_eq!(stored(&f), won);
    }

    #[test]
    fn disable_clears_schedule_and_enable_restores_waiting() {
        let f = fixture();
        let p = f.lifecycle.register(&tenant(), true).unwrap();
        let p = f.lifecycle.reschedule(&p, start()).unwrap();

        let p = f.lifecycle.disable(&p).unwrap();
        assert_eq!(p.status, ProcessStatus::Disabled);
        assert!(p.next_run.is_none() && p.next_iteration.is_none());

        let p = f.lifecycle.enable(&p).unwrap();
        assert_eq!(p.status, ProcessStatus::Waiting);
        let notices = f.notices.drain();
        assert_eq!(notices.len(), 2);
        assert!(notices.iter().all(|n| n.level == NoticeLevel::Info));
    }

    #[test]
    fn enable_leaves_non_disabled_status_alone() {
        let f = fixture();
        let p = f.lifecycle.register(&tenant(), true).unwrap();
        let p = f.lifecycle.reschedule(&p, start()).unwrap();
        let same = f.lifecycle.enable(&p).unwrap();
        assert_eq!(same, p);
        assert_eq!(stored(&f).revision, p.revision);
    }

    #[test]
    fn progress_then_failures_abandon_cycle() {
        let f = fixture();
        let p = f.lifecycle.register(&tenant(), true).unwrap();
        let p = f.lifecycle.reschedule(&p, start()).unwrap();
        let p = f.lifecycle.begin_run(&p, 1).unwrap();

        let report = StepReport {
            offset: 250,
            completion: Some(40),
            artifact_name: None,
            finished: false,
        };
        let p = f.lifecycle.record_progress(&p, &report).unwrap();
        assert_eq!((p.step_offset, p.completion), (250, Some(40)));

        let p = f.lifecycle.record_failure(&p, "timeout", 2, 3).unwrap();
        assert_eq!(p.status, ProcessStatus::Running);
        assert_eq!(p.message, ProcessMessage::StepFailed);
        assert_eq!(p.error_stack, 1);
        assert_eq!(p.next_iteration, Some(start() + Duration::minutes(3)));

        let p = f.lifecycle.record_failure(&p, "timeout", 2, 3).unwrap();
        assert_eq!(p.status, ProcessStatus::Waiting);
        assert_eq!(p.message, ProcessMessage::Abandoned);
        assert!(p.next_iteration.is_none());
        assert!(f
            .notices
            .drain()
            .iter()
            .any(|n| n.level == NoticeLevel::Error && n.text.contains("2 failed steps")));
    }

    #[test]
    fn success_clears_error_stack() {
        let f = fixture();
        let p = f.lifecycle.register(&tenant(), true).unwrap();
        let p = f.lifecycle.reschedule(&p, start()).unwrap();
        let p = f.lifecycle.begin_run(&p, 1).unwrap();
        let p = f.lifecycle.record_failure(&p, "io", 5, 1).unwrap();
        assert_eq!(p.error_stack, 1);

        let report = StepReport {
            offset: 10,
            completion: Some(150),
            artifact_name: Some("feed-default.xml".to_string()),
            finished: true,
        };
        let p = f.lifecycle.record_progress(&p, &report).unwrap();
        assert_eq!(p.error_stack, 0);
        assert_eq!(p.completion, Some(100));
        assert_eq!(p.last_artifact_name, "feed-default.xml");
    }

    #[test]
    fn oversized_step_delay_is_rejected_without_writing() {
        let f = fixture();
        let p = f.lifecycle.register(&tenant(), true).unwrap();
        let p = f.lifecycle.reschedule(&p, start()).unwrap();
        assert!(matches!(
            f.lifecycle.begin_run(&p, u32::MAX).unwrap_err(),
            SchedulerError::Configuration(_)
        ));
        let p = f.lifecycle.begin_run(&p, 5).unwrap();
        let before = stored(&f);

        assert!(matches!(
            f.lifecycle.advance_step(&p, u32::MAX).unwrap_err(),
            SchedulerError::Configuration(_)
        ));
        assert!(f.lifecycle.record_failure(&p, "io", 3, u32::MAX).is_err());
        assert_eq!(stored(&f), before);

        let p = f.lifecycle.advance_step(&p, MAX_STEP_DELAY_MINUTES).unwrap();
        assert_eq!(
            p.next_iteration,
            Some(start() + Duration::minutes(i64::from(MAX_STEP_DELAY_MINUTES)))
        );
    }
}
