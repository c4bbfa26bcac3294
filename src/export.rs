//! Exports: the research commit CSV, the survey-response ZIP bundle, and
//! the polled progress flow wrapped around the latter.

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::error::{SimError, SimResult};
use crate::query::TimeRange;
use crate::store::Snapshot;

/// Column set of the research commit export. Order is contractual.
pub const RESEARCH_EXPORT_COLUMNS: [&str; 38] = [
    "commit_hash",
    "repo",
    "branch",
    "is_primary_branch",
    "author_id",
    "author_email",
    "author_name",
    "team",
    "division",
    "org",
    "region",
    "timezone",
    "seniority",
    "activity_level",
    "timestamp",
    "event_date",
    "message",
    "total_added",
    "total_deleted",
    "tab_added",
    "tab_deleted",
    "composer_added",
    "composer_deleted",
    "non_ai_added",
    "non_ai_deleted",
    "ai_ratio",
    "pr_number",
    "pr_state",
    "pr_created_at",
    "pr_merged_at",
    "was_reverted",
    "required_hotfix",
    "commit_count_in_pr",
    "file_count",
    "survival_30d",
    "acceptance_rate",
    "prs_per_week",
    "client_version",
];

const SURVEY_BUNDLE_ENTRY: &str = "survey_responses.csv";
const SURVEY_COLUMNS: [&str; 5] = [
    "ResponseID",
    "RespondentEmail",
    "OverallAISatisfaction",
    "Comment",
    "SubmittedAt",
];

/// Percent added per progress poll. The flow simulates a vendor job API,
/// so advancement is poll-driven and exactly monotone.
const PROGRESS_STEP: u8 = 25;

/// RFC-4180 CSV of every commit in the window, one row per commit, joined
/// with its author's profile and PR/quality context.
pub fn research_commit_csv(snapshot: &Snapshot, range: TimeRange) -> SimResult<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(RESEARCH_EXPORT_COLUMNS)
        .map_err(|e| SimError::Internal(format!("csv header: {}", e)))?;

    // A developer's client version is constant per window; first row wins.
    let mut client_version: HashMap<&str, &str> = HashMap::new();
    for row in &snapshot.client_versions.rows {
        client_version
            .entry(row.developer_id.as_str())
            .or_insert(row.version.as_str());
    }

    for commit in snapshot.commits() {
        if commit.timestamp < range.from || commit.timestamp >= range.to {
            continue;
        }
        let author = snapshot.developer_by_id(&commit.author_id);
        let pr = commit
            .pr
            .as_ref()
            .and_then(|key| snapshot.pull_request(&key.repo, key.number));
        let record: Vec<String> = vec![
            commit.hash.clone(),
            commit.repo.clone(),
            commit.branch.clone(),
            commit.is_primary_branch.to_string(),
            commit.author_id.clone(),
            commit.author_email.clone(),
            commit.author_name.clone(),
            author.map(|d| d.team.clone()).unwrap_or_default(),
            author.map(|d| d.division.clone()).unwrap_or_default(),
            author.map(|d| d.org.clone()).unwrap_or_default(),
            author.map(|d| d.region.clone()).unwrap_or_default(),
            author.map(|d| d.timezone.clone()).unwrap_or_default(),
            author
                .map(|d| d.seniority.to_string())
                .unwrap_or_default(),
            author
                .map(|d| d.activity_level.to_string())
                .unwrap_or_default(),
            commit.timestamp.to_rfc3339(),
            commit.event_date().to_string(),
            commit.message.clone(),
            commit.added.total().to_string(),
            commit.deleted.total().to_string(),
            commit.added.tab.to_string(),
            commit.deleted.tab.to_string(),
            commit.added.composer.to_string(),
            commit.deleted.composer.to_string(),
            commit.added.non_ai.to_string(),
            commit.deleted.non_ai.to_string(),
            format!("{:.4}", commit.ai_ratio()),
            pr.map(|p| p.number.to_string()).unwrap_or_default(),
            pr.map(|p| p.state.to_string()).unwrap_or_default(),
            pr.map(|p| p.created_at.to_rfc3339()).unwrap_or_default(),
            pr.and_then(|p| p.merged_at)
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
            pr.map(|p| p.was_reverted.to_string()).unwrap_or_default(),
            pr.map(|p| p.required_hotfix.to_string())
                .unwrap_or_default(),
            pr.map(|p| p.commit_count.to_string()).unwrap_or_default(),
            commit.files_touched.to_string(),
            commit
                .survival
                .map(|s| format!("{:.4}", s.day30))
                .unwrap_or_default(),
            author
                .map(|d| format!("{:.2}", d.acceptance_rate))
                .unwrap_or_default(),
            author
                .map(|d| format!("{:.1}", d.pr_behavior.prs_per_week))
                .unwrap_or_default(),
            client_version
                .get(commit.author_id.as_str())
                .map(|v| v.to_string())
                .unwrap_or_default(),
        ];
        writer
            .write_record(&record)
            .map_err(|e| SimError::Internal(format!("csv row: {}", e)))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| SimError::Internal(format!("csv flush: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| SimError::Internal(format!("csv utf8: {}", e)))
}

fn survey_csv(snapshot: &Snapshot) -> SimResult<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(SURVEY_COLUMNS)
        .map_err(|e| SimError::Internal(format!("csv header: {}", e)))?;
    for response in &snapshot.survey_responses {
        writer
            .write_record([
                response.response_id.as_str(),
                response.respondent_email.as_str(),
                &response.rating.to_string(),
                response.comment.as_str(),
                &response.submitted_at.to_rfc3339(),
            ])
            .map_err(|e| SimError::Internal(format!("csv row: {}", e)))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| SimError::Internal(format!("csv flush: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| SimError::Internal(format!("csv utf8: {}", e)))
}

/// ZIP with the single entry `survey_responses.csv`.
fn survey_bundle(snapshot: &Snapshot) -> SimResult<Vec<u8>> {
    let csv_body = survey_csv(snapshot)?;
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file(SURVEY_BUNDLE_ENTRY, SimpleFileOptions::default())
        .map_err(|e| SimError::Internal(format!("zip entry: {}", e)))?;
    writer
        .write_all(csv_body.as_bytes())
        .map_err(|e| SimError::Internal(format!("zip write: {}", e)))?;
    let cursor = writer
        .finish()
        .map_err(|e| SimError::Internal(format!("zip finish: {}", e)))?;
    Ok(cursor.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportStatus {
    #[serde(rename = "inProgress")]
    InProgress,
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "failed")]
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportProgress {
    pub progress_id: String,
    pub status: ExportStatus,
    pub percent_complete: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
}

#[derive(Debug)]
struct ExportJob {
    percent: u8,
    file_id: Uuid,
    bundle: Vec<u8>,
}

impl ExportJob {
    fn progress(&self, progress_id: Uuid) -> ExportProgress {
        let complete = self.percent >= 100;
        ExportProgress {
            progress_id: progress_id.to_string(),
            status: if complete {
                ExportStatus::Complete
            } else {
                ExportStatus::InProgress
            },
            percent_complete: self.percent,
            file_id: complete.then(|| self.file_id.to_string()),
        }
    }
}

/// Registry of survey-export jobs. The bundle is built at start; progress
/// advances one step per poll until the file id becomes visible.
#[derive(Debug, Default)]
pub struct SurveyExportManager {
    jobs: Mutex<HashMap<Uuid, ExportJob>>,
}

impl SurveyExportManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn start(&self, snapshot: &Arc<Snapshot>) -> SimResult<ExportProgress> {
        if !snapshot.third_party.survey {
            return Err(SimError::NotFound(
                "survey export is not enabled for this seed".to_string(),
            ));
        }
        let bundle = survey_bundle(snapshot)?;
        let progress_id = Uuid::new_v4();
        let job = ExportJob {
            percent: 0,
            file_id: Uuid::new_v4(),
            bundle,
        };
        let progress = job.progress(progress_id);
        self.jobs.lock().await.insert(progress_id, job);
        Ok(progress)
    }

    pub async fn poll(&self, progress_id: &str) -> SimResult<ExportProgress> {
        let id = Uuid::parse_str(progress_id)
            .map_err(|_| SimError::InvalidParameter(format!("'{}' is not a progress id", progress_id)))?;
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| SimError::NotFound(format!("progress '{}'", progress_id)))?;
        job.percent = job.percent.saturating_add(PROGRESS_STEP).min(100);
        Ok(job.progress(id))
    }

    pub async fn fetch(&self, file_id: &str) -> SimResult<Vec<u8>> {
        let id = Uuid::parse_str(file_id)
            .map_err(|_| SimError::InvalidParameter(format!("'{}' is not a file id", file_id)))?;
        let jobs = self.jobs.lock().await;
        jobs.values()
            .find(|job| job.file_id == id && job.percent >= 100)
            .map(|job| job.bundle.clone())
            .ok_or_else(|| SimError::NotFound(format!("file '{}'", file_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn research_export_has_38_columns() {
        assert_eq!(RESEARCH_EXPORT_COLUMNS.len(), 38);
        let unique: std::collections::HashSet<_> = RESEARCH_EXPORT_COLUMNS.iter().collect();
        assert_eq!(unique.len(), 38);
    }

    #[test]
    fn survey_headers_carry_contract_fields() {
        for required in ["ResponseID", "RespondentEmail", "OverallAISatisfaction"] {
            assert!(SURVEY_COLUMNS.contains(&required));
        }
    }
}
