use serde::{Deserialize, Serialize};

use crate::error::StepError;

/// Result of one pipeline step.
pub type StepResult<T> = std::result::Result<T, StepError>;

/// The `{success, error}` view of a step outcome reported to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    pub step: u8,
    pub name: String,
    pub success: bool,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl StepReport {
    pub fn from_result<T>(
        step: u8,
        name: impl Into<String>,
        result: &StepResult<T>,
        duration_ms: u64,
    ) -> Self {
        let (success, skipped, error) = match result {
            Ok(_) => (true, false, None),
            Err(StepError::Skipped(reason)) => (true, true, Some(reason.clone())),
            Err(e) => (false, false, Some(e.to_string())),
        };
        Self {
            step,
            name: name.into(),
            success,
            skipped,
            error,
            duration_ms,
        }
    }

    pub fn skipped(step: u8, name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            step,
            name: name.into(),
            success: true,
            skipped: true,
            error: Some(reason.into()),
            duration_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;

    #[test]
    fn report_from_success() {
        let r: StepResult<u32> = Ok(3);
        let report = StepReport::from_result(1, "query_analysis", &r, 12);
        assert!(report.success);
        assert!(!report.skipped);
        assert!(report.error.is_none());
        assert_eq!(report.duration_ms, 12);
    }

    #[test]
    fn report_from_failure_carries_error() {
        let r: StepResult<u32> = Err(StepError::Provider(ModelError::Auth("bad key".into())));
        let report = StepReport::from_result(3, "combine", &r, 5);
        assert!(!report.success);
        assert!(report.error.unwrap().contains("bad key"));
    }

    #[test]
    fn skipped_counts_as_success() {
        let report = StepReport::skipped(3, "combine", "no assets");
        assert!(report.success);
        assert!(report.skipped);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["skipped"], true);
    }
}
