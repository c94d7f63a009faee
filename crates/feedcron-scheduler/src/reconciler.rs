use std::sync::Arc;

use chrono::{DateTime, Utc};
use feedcron_core::config::ToggleGuard;
use feedcron_core::TenantKey;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, SchedulerError};
use crate::files::{ArtifactCleaner, PermissionChecker, Purge};
use crate::lifecycle::ProcessLifecycle;
use crate::notify::{Notice, Notifier};
use crate::schedule::{compose_instant, Zone};
use crate::tenants::{TenantConfig, TenantConfigProvider};
use crate::types::{Process, ProcessStatus};

/// Operator overrides for a reconciliation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Reschedule even if a cycle is pending or running.
    pub reset: bool,
    /// Schedule for now instead of the configured start time.
    pub run_now: bool,
    /// Treat disabled tenants as enabled.
    pub force: bool,
}

/// Something the reconciler did to a tenant's process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReconcileAction {
    Registered,
    Enabled,
    Disabled,
    PermissionDenied,
    ArtifactPurged { path: String },
    PurgeFailed { path: String, reason: String },
    Rescheduled { next_run: DateTime<Utc> },
}

#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub process: Process,
    pub actions: Vec<ReconcileAction>,
}

/// Result of reconciling one tenant within a sweep.
#[derive(Debug)]
pub struct TenantReport {
    pub tenant: TenantKey,
    pub result: Result<ReconcileOutcome>,
}

/// Brings every active tenant's process in line with its configuration.
///
/// A sweep is idempotent: reconciling a tenant whose process already matches
/// its configuration writes nothing and emits no notices.
pub struct TenantReconciler {
    lifecycle: Arc<ProcessLifecycle>,
    tenants: Arc<dyn TenantConfigProvider>,
    permissions: Arc<dyn PermissionChecker>,
    artifacts: Arc<dyn ArtifactCleaner>,
    notifier: Arc<dyn Notifier>,
    guard: ToggleGuard,
}

impl TenantReconciler {
    pub fn new(
        lifecycle: Arc<ProcessLifecycle>,
        tenants: Arc<dyn TenantConfigProvider>,
        permissions: Arc<dyn PermissionChecker>,
        artifacts: Arc<dyn ArtifactCleaner>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            lifecycle,
            tenants,
            permissions,
            artifacts,
            notifier,
            guard: ToggleGuard::default(),
        }
    }

    pub fn with_guard(mut self, guard: ToggleGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn tenants(&self) -> &Arc<dyn TenantConfigProvider> {
        &self.tenants
    }

    /// Reconcile every active tenant. A failure for one tenant never stops
    /// the sweep; it is logged and returned in that tenant's report.
    #[instrument(skip(self))]
    pub fn reconcile(&self, opts: ReconcileOptions) -> Vec<TenantReport> {
        let tenants = self.tenants.active_tenants();
        debug!(count = tenants.len(), "reconciling tenants");

        tenants
            .into_iter()
            .map(|tenant| {
                let result = self.reconcile_tenant(&tenant, opts);
                if let Err(e) = &result {
                    if e.is_conflict() {
                        debug!(tenant = %tenant, "process changed underneath reconciliation; retrying next sweep");
                    } else {
                        warn!(tenant = %tenant, error = %e, "reconciliation failed");
                    }
                }
                TenantReport { tenant, result }
            })
            .collect()
    }

    #[instrument(skip(self), fields(tenant = %tenant))]
    pub fn reconcile_tenant(&self, tenant: &TenantKey, opts: ReconcileOptions) -> Result<ReconcileOutcome> {
        let config = self.tenants.tenant_config(tenant)?;
        let mut actions = Vec::new();
        let mut process = self.load_or_register(tenant, config.enabled, &mut actions)?;

        if config.enabled || opts.force {
            if self.should_enable(&process) {
                let was_disabled = process.status == ProcessStatus::Disabled;
                process = self.lifecycle.enable(&process)?;
                if was_disabled {
                    actions.push(ReconcileAction::Enabled);
                }
            }
        } else {
            if self.should_disable(&process) {
                self.purge(tenant, &mut actions);
                process = self.lifecycle.disable(&process)?;
                actions.push(ReconcileAction::Disabled);
            }
            return Ok(ReconcileOutcome { process, actions });
        }

        if !self.permissions.can_write(tenant) {
            let err = SchedulerError::PermissionDenied {
                tenant: tenant.clone(),
            };
            warn!(error = %err, "feed location not writable; skipping schedule");
            self.notifier.notify(Notice::error(
                tenant,
                format!(
                    "Insufficient file permissions for tenant \"{tenant}\". Check that the feed file is writable"
                ),
            ));
            actions.push(ReconcileAction::PermissionDenied);
            return Ok(ReconcileOutcome { process, actions });
        }

        if opts.reset || process.status == ProcessStatus::Waiting {
            self.purge(tenant, &mut actions);
            let next_run = self.schedule_date(&config, opts.run_now);
            process = self.lifecycle.reschedule(&process, next_run)?;
            self.notifier.notify(Notice::success(
                tenant,
                format!("Process for tenant \"{tenant}\" has been rescheduled"),
            ));
            info!(next_run = %next_run, "process rescheduled");
            actions.push(ReconcileAction::Rescheduled { next_run });
        }

        Ok(ReconcileOutcome { process, actions })
    }

    /// When the next cycle should start: now, or the configured start time
    /// today rolled forward one period if it has already passed.
    fn schedule_date(&self, config: &TenantConfig, run_now: bool) -> DateTime<Utc> {
        let now = self.lifecycle.now();
        if run_now {
            return now;
        }
        let start = config.start_time;
        let today = compose_instant(
            self.lifecycle.zones(),
            start.hour,
            start.minute,
            start.second,
            Zone::Configured,
            now,
        );
        self.lifecycle
            .zones()
            .advance_in_zone(Zone::Configured, today, &config.frequency, now)
            .with_timezone(&Utc)
    }

    fn load_or_register(
        &self,
        tenant: &TenantKey,
        enabled: bool,
        actions: &mut Vec<ReconcileAction>,
    ) -> Result<Process> {
        if let Some(process) = self.lifecycle.store().load_by_tenant(tenant)? {
            return Ok(process);
        }
        match self.lifecycle.register(tenant, enabled) {
            Ok(process) => {
                actions.push(ReconcileAction::Registered);
                Ok(process)
            }
            // Another worker registered it between our load and create.
            Err(SchedulerError::AlreadyExists { .. }) => self.lifecycle.load(tenant),
            Err(e) => Err(e),
        }
    }

    fn should_enable(&self, process: &Process) -> bool {
        match self.guard {
            ToggleGuard::Transition => !process.is_enabled(),
            ToggleGuard::Legacy => process.is_enabled(),
        }
    }

    fn should_disable(&self, process: &Process) -> bool {
        match self.guard {
            ToggleGuard::Transition => process.is_enabled(),
            ToggleGuard::Legacy => !process.is_enabled(),
        }
    }

    fn purge(&self, tenant: &TenantKey, actions: &mut Vec<ReconcileAction>) {
        match self.artifacts.remove_temporary_artifact(tenant) {
            Purge::Removed(path) => actions.push(ReconcileAction::ArtifactPurged {
                path: path.display().to_string(),
            }),
            Purge::Absent => {}
            Purge::Failed { path, reason } => {
                self.notifier.notify(Notice::error(
                    tenant,
                    format!("Could not remove temporary feed {}: {reason}", path.display()),
                ));
                actions.push(ReconcileAction::PurgeFailed {
                    path: path.display().to_string(),
                    reason,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::notify::{MemoryNotifier, NoticeLevel};
    use crate::schedule::Zones;
    use crate::store::SqliteProcessStore;
    use crate::tenants::ConfiguredTenants;
    use chrono::{Duration, TimeZone};
    use feedcron_core::config::TenantEntry;
    use feedcron_core::{Frequency, TimeOfDay};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct Permissions(AtomicBool);

    impl PermissionChecker for Permissions {
        fn can_write(&self, _tenant: &TenantKey) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct RecordingCleaner {
        purged: Mutex<Vec<TenantKey>>,
    }

    impl ArtifactCleaner for RecordingCleaner {
        fn remove_temporary_artifact(&self, tenant: &TenantKey) -> Purge {
            self.purged.lock().unwrap().push(tenant.clone());
            Purge::Removed(PathBuf::from(format!("/tmp/feed-{tenant}.xml.tmp")))
        }
    }

    struct Fixture {
        reconciler: TenantReconciler,
        lifecycle: Arc<ProcessLifecycle>,
        clock: FakeClock,
        notices: Arc<MemoryNotifier>,
        permissions: Arc<Permissions>,
        cleaner: Arc<RecordingCleaner>,
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()
    }

    fn entry(key: &str, enabled: bool, start: &str) -> TenantEntry {
        TenantEntry {
            key: TenantKey::from(key),
            active: true,
            enabled,
            start_time: start.parse::<TimeOfDay>().unwrap(),
            frequency: Frequency::Daily,
            step_delay_minutes: 5,
        }
    }

    fn fixture(entries: Vec<TenantEntry>, guard: ToggleGuard) -> Fixture {
        let store = Arc::new(SqliteProcessStore::open_in_memory().unwrap());
        let clock = FakeClock::new(now());
        let notices = Arc::new(MemoryNotifier::new());
        let lifecycle = Arc::new(ProcessLifecycle::new(
            store,
            Arc::new(clock.clone()),
            Zones::utc(),
            notices.clone(),
        ));
        let permissions = Arc::new(Permissions(AtomicBool::new(true)));
        let cleaner = Arc::new(RecordingCleaner::default());
        let reconciler = TenantReconciler::new(
            lifecycle.clone(),
            Arc::new(ConfiguredTenants::new(entries)),
            permissions.clone(),
            cleaner.clone(),
            notices.clone(),
        )
        .with_guard(guard);
        Fixture {
            reconciler,
            lifecycle,
            clock,
            notices,
            permissions,
            cleaner,
        }
    }

    fn key(k: &str) -> TenantKey {
        TenantKey::from(k)
    }

    #[test]
    fn new_enabled_tenant_is_scheduled_at_future_start_time() {
        let f = fixture(vec![entry("default", true, "18:30")], ToggleGuard::Transition);
        let outcome = f.reconciler.reconcile_tenant(&key("default"), ReconcileOptions::default()).unwrap();

        let expected = Utc.with_ymd_and_hms(2024, 5, 10, 18, 30, 0).unwrap();
        assert_eq!(outcome.process.status, ProcessStatus::Pending);
        assert_eq!(outcome.process.next_iteration, Some(expected));
        assert_eq!(outcome.process.completion_label(), "0%");
        assert_eq!(outcome.actions[0], ReconcileAction::Registered);
        assert!(outcome.actions.contains(&ReconcileAction::Rescheduled { next_run: expected }));
    }

    #[test]
    fn passed_start_time_rolls_to_next_period() {
        let f = fixture(vec![entry("default", true, "08:00")], ToggleGuard::Transition);
        let p = f
            .reconciler
            .reconcile_tenant(&key("default"), ReconcileOptions::default())
            .unwrap()
            .process;
        assert_eq!(p.next_iteration, Some(Utc.with_ymd_and_hms(2024, 5, 11, 8, 0, 0).unwrap()));
        assert!(p.next_iteration.unwrap() >= f.lifecycle.now());
    }

    #[test]
    fn run_now_schedules_immediately() {
        let f = fixture(vec![entry("default", true, "08:00")], ToggleGuard::Transition);
        let opts = ReconcileOptions {
            run_now: true,
            ..Default::default()
        };
        let p = f.reconciler.reconcile_tenant(&key("default"), opts).unwrap().process;
        assert_eq!(p.next_iteration, Some(now()));
    }

    #[test]
    fn disabled_tenant_ends_disabled_without_instants() {
        let f = fixture(vec![entry("fr", true, "08:00")], ToggleGuard::Transition);
        let p = f.reconciler.reconcile_tenant(&key("fr"), ReconcileOptions::default()).unwrap().process;
        assert_eq!(p.status, ProcessStatus::Pending);

        let f2 = TenantReconciler::new(
            f.lifecycle.clone(),
            Arc::new(ConfiguredTenants::new(vec![entry("fr", false, "08:00")])),
            f.permissions.clone(),
            f.cleaner.clone(),
            f.notices.clone(),
        );
        let outcome = f2.reconcile_tenant(&key("fr"), ReconcileOptions::default()).unwrap();
        assert_eq!(outcome.process.status, ProcessStatus::Disabled);
        assert!(outcome.process.next_run.is_none() && outcome.process.next_iteration.is_none());
        assert!(outcome.actions.contains(&ReconcileAction::Disabled));
        assert_eq!(f.cleaner.purged.lock().unwrap().len(), 2);
    }

    #[test]
    fn force_schedules_a_disabled_tenant() {
        let f = fixture(vec![entry("fr", false, "20:00")], ToggleGuard::Transition);
        let p = f.reconciler.reconcile_tenant(&key("fr"), ReconcileOptions::default()).unwrap().process;
        assert_eq!(p.status, ProcessStatus::Disabled);

        let opts = ReconcileOptions {
            force: true,
            ..Default::default()
        };
        let outcome = f.reconciler.reconcile_tenant(&key("fr"), opts).unwrap();
        assert_eq!(outcome.process.status, ProcessStatus::Pending);
        assert!(outcome.actions.contains(&ReconcileAction::Enabled));
    }

    #[test]
    fn missing_permissions_leave_process_unchanged() {
        let f = fixture(vec![entry("default", true, "18:00")], ToggleGuard::Transition);
        f.permissions.0.store(false, Ordering::SeqCst);

        let outcome = f.reconciler.reconcile_tenant(&key("default"), ReconcileOptions::default()).unwrap();
        assert_eq!(outcome.process.status, ProcessStatus::Waiting);
        assert_eq!(outcome.process.revision, 0);
        assert!(outcome.actions.contains(&ReconcileAction::PermissionDenied));
        assert!(f.notices.drain().iter().any(|n| n.level == NoticeLevel::Error));
    }

    #[test]
    fn repeated_sweeps_are_idempotent() {
        let f = fixture(
            vec![entry("default", true, "18:00"), entry("fr", false, "18:00")],
            ToggleGuard::Transition,
        );
        let first = f.reconciler.reconcile(ReconcileOptions::default());
        assert!(first.iter().all(|r| r.result.is_ok()));
        f.notices.drain();

        f.clock.advance(Duration::minutes(1));
        let second = f.reconciler.reconcile(ReconcileOptions::default());
        for report in &second {
            let outcome = report.result.as_ref().unwrap();
            assert!(outcome.actions.is_empty(), "{}: {:?}", report.tenant, outcome.actions);
        }
        assert!(f.notices.drain().is_empty());
        assert_eq!(f.lifecycle.load(&key("default")).unwrap().revision, 1);
    }

    #[test]
    fn reset_reschedules_a_running_process() {
        let f = fixture(vec![entry("default", true, "18:00")], ToggleGuard::Transition);
        let p = f.reconciler.reconcile_tenant(&key("default"), ReconcileOptions::default()).unwrap().process;
        let p = f.lifecycle.begin_run(&p, 5).unwrap();
        assert_eq!(p.status, ProcessStatus::Running);

        let opts = ReconcileOptions {
            reset: true,
            run_now: true,
            ..Default::default()
        };
        let p = f.reconciler.reconcile_tenant(&key("default"), opts).unwrap().process;
        assert_eq!(p.status, ProcessStatus::Pending);
        assert_eq!(p.step_offset, 0);
        assert_eq!(p.next_iteration, Some(now()));
    }

    #[test]
    fn unknown_tenant_does_not_stop_the_sweep() {
        let f = fixture(vec![entry("default", true, "18:00")], ToggleGuard::Transition);
        let tenants = ConfiguredTenants::new(vec![entry("default", true, "18:00")]).pinned(Some(key("ghost")));
        let reconciler = TenantReconciler::new(
            f.lifecycle.clone(),
            Arc::new(tenants),
            f.permissions.clone(),
            f.cleaner.clone(),
            f.notices.clone(),
        );
        let reports = reconciler.reconcile(ReconcileOptions::default());
        assert_eq!(reports.len(), 1);
        assert!(matches!(reports[0].result, Err(SchedulerError::UnknownTenant { .. })));

        let reports = f.reconciler.reconcile(ReconcileOptions::default());
        assert!(reports[0].result.is_ok());
    }

    #[test]
    fn legacy_guard_renotifies_enabled_processes() {
        let f = fixture(vec![entry("default", true, "18:00")], ToggleGuard::Legacy);
        f.reconciler.reconcile(ReconcileOptions::default());
        f.notices.drain();

        f.reconciler.reconcile(ReconcileOptions::default());
        let notices = f.notices.drain();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Info);
        assert_eq!(f.lifecycle.load(&key("default")).unwrap().status, ProcessStatus::Pending);
    }

    #[test]
    fn legacy_guard_never_disables_an_enabled_process() {
        let f = fixture(vec![entry("fr", true, "18:00")], ToggleGuard::Legacy);
        f.reconciler.reconcile(ReconcileOptions::default());

        let disabled_config = TenantReconciler::new(
            f.lifecycle.clone(),
            Arc::new(ConfiguredTenants::new(vec![entry("fr", false, "18:00")])),
            f.permissions.clone(),
            f.cleaner.clone(),
            f.notices.clone(),
        )
        .with_guard(ToggleGuard::Legacy);
        let outcome = disabled_config.reconcile_tenant(&key("fr"), ReconcileOptions::default()).unwrap();
        assert_eq!(outcome.process.status, ProcessStatus::Pending);
        assert!(outcome.actions.is_empty());
    }

    #[test]
    fn legacy_guard_does_not_enable_a_disabled_process() {
        let f = fixture(vec![entry("fr", false, "18:00")], ToggleGuard::Legacy);
        let p = f.reconciler.reconcile_tenant(&key("fr"), ReconcileOptions::default()).unwrap().process;
        assert_eq!(p.status, ProcessStatus::Disabled);

        let opts = ReconcileOptions {
            force: true,
            ..Default::default()
        };
        let p = f.reconciler.reconcile_tenant(&key("fr"), opts).unwrap().process;
        assert_eq!(p.status, ProcessStatus::Disabled);
    }
}
