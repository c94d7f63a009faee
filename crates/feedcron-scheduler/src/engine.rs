use std::sync::Arc;
use std::time::Duration;

use feedcron_core::config::SchedulerConfig;
use feedcron_core::TenantKey;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::due::DueSelector;
use crate::error::{Result, SchedulerError};
use crate::generator::{FeedGenerator, StepRequest};
use crate::lifecycle::ProcessLifecycle;
use crate::reconciler::{ReconcileOptions, TenantReconciler};
use crate::store::TickLog;
use crate::types::{Process, ProcessStatus};

/// Tuning knobs for the polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub poll_interval: Duration,
    pub max_error_stack: u32,
}

impl EngineSettings {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            max_error_stack: config.max_error_stack,
        }
    }
}

/// What happened to the due process during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    /// The step succeeded and the next one is scheduled.
    Advanced,
    /// The step finished the feed; the cycle is over.
    Concluded,
    /// The step failed and will be retried.
    Failed,
    /// Too many consecutive failures; the cycle was given up.
    Abandoned,
    /// Another worker moved the process first.
    LostRace,
    /// The tenant is gone from configuration or inactive; its process was disabled.
    Skipped,
    /// The step could not be carried out; see [`StepSummary::error`].
    Errored,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepSummary {
    pub tenant: TenantKey,
    pub outcome: StepOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TickSummary {
    pub reconciled: usize,
    pub reconcile_failures: usize,
    pub step: Option<StepSummary>,
}

/// Drives feed generation: every tick reconciles all tenants, then advances
/// the single most overdue process by one generation step.
pub struct SchedulerEngine {
    reconciler: Arc<TenantReconciler>,
    lifecycle: Arc<ProcessLifecycle>,
    selector: DueSelector,
    generator: Arc<dyn FeedGenerator>,
    ticks: Arc<dyn TickLog>,
    settings: EngineSettings,
}

impl SchedulerEngine {
    pub fn new(
        reconciler: Arc<TenantReconciler>,
        lifecycle: Arc<ProcessLifecycle>,
        generator: Arc<dyn FeedGenerator>,
        ticks: Arc<dyn TickLog>,
        settings: EngineSettings,
    ) -> Self {
        let selector = DueSelector::new(lifecycle.store().clone());
        Self {
            reconciler,
            lifecycle,
            selector,
            generator,
            ticks,
            settings,
        }
    }

    /// Main event loop. Ticks every `poll_interval` until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.settings.poll_interval.as_secs(),
            "scheduler engine started"
        );

        let mut interval = tokio::time::interval(self.settings.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("scheduler tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One pass: reconcile, step the due process if any, record the heartbeat.
    ///
    /// The heartbeat is written even when the step fails. A failing step is
    /// reported in the summary rather than as an error, so one broken process
    /// cannot stall the loop.
    pub async fn tick(&self) -> Result<TickSummary> {
        let mut summary = {
            let reports = self.reconciler.reconcile(ReconcileOptions::default());
            TickSummary {
                reconciled: reports.len(),
                reconcile_failures: reports
                    .iter()
                    .filter(|r| matches!(&r.result, Err(e) if !e.is_conflict()))
                    .count(),
                step: None,
            }
        };

        let step = self.step_due().await;
        self.ticks.record_tick(self.lifecycle.now())?;
        summary.step = step?;
        Ok(summary)
    }

    async fn step_due(&self) -> Result<Option<StepSummary>> {
        let Some(process) = self.selector.pick_due(self.lifecycle.now())? else {
            return Ok(None);
        };
        let tenant = process.tenant_key.clone();
        let (outcome, error) = match self.step(process).await {
            Ok(outcome) => (outcome, None),
            Err(e) if e.is_conflict() => (StepOutcome::LostRace, None),
            Err(e) => {
                error!(tenant = %tenant, error = %e, "step could not be processed");
                (StepOutcome::Errored, Some(e.to_string()))
            }
        };
        info!(tenant = %tenant, ?outcome, "step processed");
        Ok(Some(StepSummary {
            tenant,
            outcome,
            error,
        }))
    }

    async fn step(&self, process: Process) -> Result<StepOutcome> {
        let config = match self.reconciler.tenants().tenant_config(&process.tenant_key) {
            Ok(config) if config.active => config,
            Ok(_) => return self.retire(&process, "tenant is inactive"),
            Err(SchedulerError::UnknownTenant { .. }) => {
                return self.retire(&process, "tenant is no longer configured")
            }
            Err(e) => return Err(e),
        };
        let delay = config.step_delay_minutes;

        let process = match process.status {
            ProcessStatus::Pending => self.lifecycle.begin_run(&process, delay)?,
            ProcessStatus::Running => process,
            other => {
                return Err(SchedulerError::InvalidTransition {
                    tenant: process.tenant_key.clone(),
                    op: "step",
                    status: other,
                })
            }
        };

        let request = StepRequest {
            tenant: process.tenant_key.clone(),
            offset: process.step_offset,
        };
        debug!(tenant = %request.tenant, offset = request.offset, "running generation step");

        match self.generator.run_step(&request).await {
            Ok(report) => {
                let process = self.lifecycle.record_progress(&process, &report)?;
                if report.finished {
                    self.lifecycle.conclude(&process)?;
                    Ok(StepOutcome::Concluded)
                } else {
                    self.lifecycle.advance_step(&process, delay)?;
                    Ok(StepOutcome::Advanced)
                }
            }
            Err(e) => {
                warn!(tenant = %request.tenant, error = %e, "generation step failed");
                let process = self.lifecycle.record_failure(
                    &process,
                    &e.to_string(),
                    self.settings.max_error_stack,
                    delay,
                )?;
                if process.status == ProcessStatus::Waiting {
                    Ok(StepOutcome::Abandoned)
                } else {
                    Ok(StepOutcome::Failed)
                }
            }
        }
    }

    /// Take a due process out of rotation when its tenant no longer schedules feeds.
    fn retire(&self, process: &Process, reason: &str) -> Result<StepOutcome> {
        warn!(tenant = %process.tenant_key, reason, "disabling process instead of stepping it");
        self.lifecycle.disable(process)?;
        Ok(StepOutcome::Skipped)
    }
}
