use async_trait::async_trait;
use feedcron_core::TenantKey;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Input for one bounded unit of feed generation work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRequest {
    pub tenant: TenantKey,
    /// Where in the tenant's data set this step starts.
    pub offset: u64,
}

/// What a generation step reports back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    /// Cursor for the next step.
    pub offset: u64,
    #[serde(default)]
    pub completion: Option<u8>,
    /// Set when the step published a finished artifact.
    #[serde(default)]
    pub artifact_name: Option<String>,
    /// True once the whole data set has been written.
    #[serde(default)]
    pub finished: bool,
}

/// Performs one generation step for a tenant.
///
/// The feed writer itself lives outside the scheduler; implementations
/// wrap it (an external command, a library call, a remote service).
#[async_trait]
pub trait FeedGenerator: Send + Sync {
    async fn run_step(&self, request: &StepRequest) -> Result<StepReport>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_defaults_optional_fields() {
        let report: StepReport = serde_json::from_str(r#"{"offset": 500}"#).unwrap();
        assert_eq!(report.offset, 500);
        assert!(!report.finished);
        assert!(report.completion.is_none() && report.artifact_name.is_none());
    }
}
