use anyhow::Result;
use feedcron_core::FeedcronConfig;
use feedcron_scheduler::health::cron_health;
use feedcron_scheduler::{ProcessStore, TickLog};

use super::format_instant;
use crate::app::App;

pub fn status(config: FeedcronConfig) -> Result<()> {
    let stale_after = chrono::Duration::seconds(config.scheduler.stale_after_secs as i64);
    let app = App::build(config, None)?;

    let processes = app.store.list()?;
    if processes.is_empty() {
        println!("No processes registered. Run `feedcron reconcile` first.");
    } else {
        println!(
            "{:<16} {:<9} {:<12} {:>5}  {:<19}  {:<19}  {}",
            "TENANT", "STATUS", "MESSAGE", "DONE", "NEXT RUN", "NEXT ITERATION", "LAST FEED"
        );
        for p in &processes {
            println!(
                "{:<16} {:<9} {:<12} {:>5}  {:<19}  {:<19}  {}",
                p.tenant_key.as_str(),
                p.status.as_str(),
                p.message.as_str(),
                p.completion_label(),
                format_instant(p.next_run),
                format_instant(p.next_iteration),
                p.last_artifact_name,
            );
        }
    }

    let health = cron_health(app.store.last_tick()?, app.lifecycle.now(), stale_after);
    println!();
    println!("{health}");
    Ok(())
}
