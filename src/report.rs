//! Run reporting: per-entity counts, recovered warnings, and timing for a
//! generation pass. The admin surface echoes this back after a regenerate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SimConfig;

/// Non-fatal degeneracies recovered during generation. These never abort a
/// run; they are collected on the report and logged at warn level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    ZeroRate,
    EmptyWorkingHours,
    EmptyModelList,
    UnknownTimezone,
    Saturation,
}

impl std::fmt::Display for WarningKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WarningKind::ZeroRate => write!(f, "zero_rate"),
            WarningKind::EmptyWorkingHours => write!(f, "empty_working_hours"),
            WarningKind::EmptyModelList => write!(f, "empty_model_list"),
            WarningKind::UnknownTimezone => write!(f, "unknown_timezone"),
            WarningKind::Saturation => write!(f, "saturation"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunWarning {
    pub kind: WarningKind,
    pub generator: String,
    pub developer_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    pub developers: u64,
    pub repositories: u64,
    pub commits: u64,
    pub pull_requests: u64,
    pub reviews: u64,
    pub issues: u64,
    pub model_usage_rows: u64,
    pub client_version_rows: u64,
    pub file_extension_rows: u64,
    pub feature_usage_rows: u64,
    pub legal_ai_events: u64,
    pub office_activity_rows: u64,
    pub survey_responses: u64,
}

impl EntityCounts {
    /// Counts added by a run on top of a previous snapshot; used by
    /// append-mode reporting.
    pub fn delta_from(&self, before: &EntityCounts) -> EntityCounts {
        EntityCounts {
            developers: self.developers - before.developers,
            repositories: self.repositories - before.repositories,
            commits: self.commits - before.commits,
            pull_requests: self.pull_requests - before.pull_requests,
            reviews: self.reviews - before.reviews,
            issues: self.issues - before.issues,
            model_usage_rows: self.model_usage_rows - before.model_usage_rows,
            client_version_rows: self.client_version_rows - before.client_version_rows,
            file_extension_rows: self.file_extension_rows - before.file_extension_rows,
            feature_usage_rows: self.feature_usage_rows - before.feature_usage_rows,
            legal_ai_events: self.legal_ai_events - before.legal_ai_events,
            office_activity_rows: self.office_activity_rows - before.office_activity_rows,
            survey_responses: self.survey_responses - before.survey_responses,
        }
    }
}

/// Summary of one generation pass, attached to the snapshot it produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub snapshot_version: u64,
    pub counts: EntityCounts,
    /// Counts added by this run alone (equals `counts` for override runs).
    pub added: EntityCounts,
    pub warnings: Vec<RunWarning>,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Effective configuration, echoed back.
    pub config: SimConfig,
    pub rng_seed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_subtracts_fieldwise() {
        let before = EntityCounts {
            commits: 100,
            pull_requests: 10,
            ..Default::default()
        };
        let after = EntityCounts {
            commits: 150,
            pull_requests: 14,
            ..Default::default()
        };
        let delta = after.delta_from(&before);
        assert_eq!(delta.commits, 50);
        assert_eq!(delta.pull_requests, 4);
        assert_eq!(delta.reviews, 0);
    }
}
