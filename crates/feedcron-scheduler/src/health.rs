use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Whether the periodic trigger is actually firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CronHealth {
    /// No tick has ever been recorded.
    NeverRun,
    Stale { last_tick: DateTime<Utc> },
    Healthy { last_tick: DateTime<Utc> },
}

impl CronHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, CronHealth::Healthy { .. })
    }
}

impl std::fmt::Display for CronHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CronHealth::NeverRun => write!(f, "cron has never run"),
            CronHealth::Stale { last_tick } => write!(
                f,
                "cron is stale (last tick {})",
                last_tick.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            CronHealth::Healthy { last_tick } => write!(
                f,
                "cron is running (last tick {})",
                last_tick.format("%Y-%m-%d %H:%M:%S UTC")
            ),
        }
    }
}

/// Classify the last recorded tick. A tick older than `stale_after` is stale.
pub fn cron_health(last_tick: Option<DateTime<Utc>>, now: DateTime<Utc>, stale_after: Duration) -> CronHealth {
    match last_tick {
        None => CronHealth::NeverRun,
        Some(last_tick) if now - last_tick > stale_after => CronHealth::Stale { last_tick },
        Some(last_tick) => CronHealth::Healthy { last_tick },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn classifies_by_age() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let window = Duration::hours(12);

        assert_eq!(cron_health(None, now, window), CronHealth::NeverRun);

        let recent = now - Duration::hours(12);
        assert!(cron_health(Some(recent), now, window).is_healthy());

        let old = now - Duration::hours(12) - Duration::seconds(1);
        assert_eq!(cron_health(Some(old), now, window), CronHealth::Stale { last_tick: old });
        assert!(cron_health(Some(old), now, window).to_string().contains("stale"));
    }
}
