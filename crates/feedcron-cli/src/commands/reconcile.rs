use anyhow::Result;
use clap::Args;
use feedcron_core::{FeedcronConfig, TenantKey};
use feedcron_scheduler::reconciler::ReconcileAction;
use feedcron_scheduler::ReconcileOptions;

use super::format_instant;
use crate::app::App;

#[derive(Args)]
pub struct ReconcileArgs {
    /// Only reconcile this tenant
    #[arg(long)]
    pub tenant: Option<String>,
    /// Reschedule even if a cycle is pending or running
    #[arg(long)]
    pub reset: bool,
    /// Schedule for now instead of the configured start time
    #[arg(long)]
    pub now: bool,
    /// Treat disabled tenants as enabled
    #[arg(long)]
    pub force: bool,
}

pub fn reconcile(config: FeedcronConfig, args: ReconcileArgs) -> Result<()> {
    let app = App::build(config, args.tenant.map(TenantKey::from))?;
    let opts = ReconcileOptions {
        reset: args.reset,
        run_now: args.now,
        force: args.force,
    };

    let mut failed = 0;
    for report in app.reconciler.reconcile(opts) {
        match report.result {
            Ok(outcome) => {
                let p = &outcome.process;
                let actions: Vec<String> = outcome.actions.iter().map(describe).collect();
                println!(
                    "{:<16} {:<9} next {:<19} {}",
                    report.tenant.as_str(),
                    p.status.as_str(),
                    format_instant(p.next_iteration),
                    if actions.is_empty() {
                        "unchanged".to_string()
                    } else {
                        actions.join(", ")
                    }
                );
            }
            Err(e) if e.is_conflict() => {
                println!("{:<16} busy, retry later", report.tenant.as_str());
            }
            Err(e) => {
                failed += 1;
                println!("{:<16} error: {e}", report.tenant.as_str());
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} tenant(s) could not be reconciled");
    }
    Ok(())
}

fn describe(action: &ReconcileAction) -> String {
    match action {
        ReconcileAction::Registered => "registered".to_string(),
        ReconcileAction::Enabled => "enabled".to_string(),
        ReconcileAction::Disabled => "disabled".to_string(),
        ReconcileAction::PermissionDenied => "feed not writable".to_string(),
        ReconcileAction::ArtifactPurged { path } => format!("removed {path}"),
        ReconcileAction::PurgeFailed { path, reason } => format!("could not remove {path} ({reason})"),
        ReconcileAction::Rescheduled { next_run } => {
            format!("rescheduled for {}", format_instant(Some(*next_run)))
        }
    }
}
