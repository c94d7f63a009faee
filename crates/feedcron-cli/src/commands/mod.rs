pub mod due;
pub mod reconcile;
pub mod run;
pub mod status;

use chrono::{DateTime, Utc};

/// Instant for terminal output, `-` when unset.
pub(crate) fn format_instant(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}
