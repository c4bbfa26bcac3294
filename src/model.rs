//! Domain entities for the simulated engineering organization.
//!
//! Everything here is immutable once the generation pipeline has inserted it
//! into a snapshot. Entities reference each other by value keys (repo name,
//! PR number, developer id), never by pointer; dereferencing happens at read
//! time through the snapshot indices.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Seniority {
    Junior,
    Mid,
    Senior,
}

impl Seniority {
    /// Multiplier applied to the base revert probability by the quality
    /// overlay. Seniors revert less, juniors more.
    pub fn revert_adjustment(&self) -> f64 {
        match self {
            Seniority::Junior => 1.3,
            Seniority::Mid => 1.0,
            Seniority::Senior => 0.7,
        }
    }
}

impl std::fmt::Display for Seniority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Seniority::Junior => write!(f, "junior"),
            Seniority::Mid => write!(f, "mid"),
            Seniority::Senior => write!(f, "senior"),
        }
    }
}

impl std::str::FromStr for Seniority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "junior" => Ok(Seniority::Junior),
            "mid" => Ok(Seniority::Mid),
            "senior" => Ok(Seniority::Senior),
            other => Err(format!("unknown seniority '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    Low,
    Medium,
    High,
}

impl ActivityLevel {
    pub fn multiplier(&self) -> f64 {
        match self {
            ActivityLevel::Low => 0.6,
            ActivityLevel::Medium => 1.0,
            ActivityLevel::High => 1.5,
        }
    }
}

impl std::fmt::Display for ActivityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivityLevel::Low => write!(f, "low"),
            ActivityLevel::Medium => write!(f, "medium"),
            ActivityLevel::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for ActivityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(ActivityLevel::Low),
            "medium" => Ok(ActivityLevel::Medium),
            "high" => Ok(ActivityLevel::High),
            other => Err(format!("unknown activity level '{}'", other)),
        }
    }
}

/// Categorical multiplier on generated activity rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Velocity {
    Low,
    Medium,
    High,
}

impl Velocity {
    pub fn multiplier(&self) -> f64 {
        match self {
            Velocity::Low => 0.5,
            Velocity::Medium => 1.0,
            Velocity::High => 2.0,
        }
    }
}

impl std::str::FromStr for Velocity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Velocity::Low),
            "medium" => Ok(Velocity::Medium),
            "high" => Ok(Velocity::High),
            other => Err(format!("unknown velocity '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Maturity {
    Greenfield,
    Growing,
    Mature,
}

/// Partition of [0, 1] used by the quality correlation tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiRatioBand {
    Low,
    Medium,
    High,
}

impl AiRatioBand {
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio < 0.3 {
            AiRatioBand::Low
        } else if ratio > 0.7 {
            AiRatioBand::High
        } else {
            AiRatioBand::Medium
        }
    }
}

/// Per-developer pull-request habits, fixed at seed time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrBehavior {
    pub prs_per_week: f64,
    pub avg_pr_size_loc: u32,
    pub avg_files_per_pr: u32,
    /// 0..1, drives review comment volume for this developer's reviews.
    pub review_thoroughness: f64,
    /// How many changes-requested rounds the developer tolerates.
    pub iteration_tolerance: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Developer {
    pub id: String,
    pub email: String,
    pub name: String,
    pub org: String,
    pub division: String,
    pub team: String,
    pub region: String,
    pub timezone: String,
    pub locale: String,
    pub seniority: Seniority,
    pub activity_level: ActivityLevel,
    /// Probability mass of AI-assisted lines in this developer's commits.
    pub acceptance_rate: f64,
    /// Ordered by preference; earlier entries are drawn more often.
    pub preferred_models: Vec<String>,
    pub work_start_hour: u8,
    pub work_end_hour: u8,
    pub chat_vs_code_ratio: f64,
    pub pr_behavior: PrBehavior,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub primary_language: String,
    pub age_days: u32,
    pub maturity: Maturity,
    pub owning_teams: Vec<String>,
    pub primary_branch: String,
}

/// Added or deleted line counts split by origin. The total is always the
/// sum of the three parts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LineDelta {
    pub tab: u64,
    pub composer: u64,
    pub non_ai: u64,
}

impl LineDelta {
    pub fn total(&self) -> u64 {
        self.tab + self.composer + self.non_ai
    }

    pub fn ai(&self) -> u64 {
        self.tab + self.composer
    }
}

/// Key of a pull request, by value. Commits carry this instead of a direct
/// reference so ownership stays acyclic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrKey {
    pub repo: String,
    pub number: u64,
}

/// Commit-level code-survival estimates written by the quality overlay.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SurvivalRates {
    pub day7: f64,
    pub day14: f64,
    pub day30: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    /// 40 lowercase hex characters, unique across the corpus.
    pub hash: String,
    pub author_id: String,
    pub author_email: String,
    pub author_name: String,
    pub repo: String,
    pub branch: String,
    pub is_primary_branch: bool,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub added: LineDelta,
    pub deleted: LineDelta,
    pub files_touched: u32,
    /// Set by the PR generator once the commit is grouped into a session.
    pub pr: Option<PrKey>,
    /// Set by the quality overlay after PRs exist.
    pub survival: Option<SurvivalRates>,
}

impl Commit {
    pub fn ai_ratio(&self) -> f64 {
        self.added.ai() as f64 / (self.added.total().max(1)) as f64
    }

    pub fn event_date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrState {
    Open,
    Merged,
    Closed,
}

impl std::fmt::Display for PrState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrState::Open => write!(f, "open"),
            PrState::Merged => write!(f, "merged"),
            PrState::Closed => write!(f, "closed"),
        }
    }
}

impl std::str::FromStr for PrState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(PrState::Open),
            "merged" => Ok(PrState::Merged),
            "closed" => Ok(PrState::Closed),
            other => Err(format!("unknown pr state '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub repo: String,
    /// Monotone per-repo counter starting at 1.
    pub number: u64,
    pub title: String,
    pub author_id: String,
    pub author_email: String,
    pub base_branch: String,
    pub head_branch: String,
    pub state: PrState,
    pub created_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub additions: u64,
    pub deletions: u64,
    pub tab_lines: u64,
    pub composer_lines: u64,
    pub commit_count: u32,
    pub file_count: u32,
    pub commit_hashes: Vec<String>,
    pub was_reverted: bool,
    pub required_hotfix: bool,
    /// Number of the follow-up PR when `required_hotfix` is set.
    pub hotfix_pr: Option<u64>,
    /// Number of the flagged PR this one was synthesized to patch.
    pub hotfix_of: Option<u64>,
    /// Synthetic PRs are inserted by the quality overlay and are not
    /// themselves eligible for revert/hotfix marking.
    pub synthetic: bool,
}

impl PullRequest {
    pub fn key(&self) -> PrKey {
        PrKey {
            repo: self.repo.clone(),
            number: self.number,
        }
    }

    pub fn ai_ratio(&self) -> f64 {
        (self.tab_lines + self.composer_lines) as f64 / self.additions.max(1) as f64
    }

    /// Terminal timestamp of the PR lifecycle, if it has one.
    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.merged_at.or(self.closed_at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewComment {
    pub body: String,
    pub posted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub repo: String,
    pub pr_number: u64,
    pub reviewer_id: String,
    pub reviewer_email: String,
    pub state: ReviewState,
    pub comments: Vec<ReviewComment>,
    /// None iff `state` is pending.
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueLabel {
    Bug,
    Feature,
    Enhancement,
}

impl std::fmt::Display for IssueLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IssueLabel::Bug => write!(f, "bug"),
            IssueLabel::Feature => write!(f, "feature"),
            IssueLabel::Enhancement => write!(f, "enhancement"),
        }
    }
}

impl std::str::FromStr for IssueLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bug" => Ok(IssueLabel::Bug),
            "feature" => Ok(IssueLabel::Feature),
            "enhancement" => Ok(IssueLabel::Enhancement),
            other => Err(format!("unknown issue label '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub repo: String,
    pub number: u64,
    pub title: String,
    pub state: IssueState,
    pub labels: Vec<IssueLabel>,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    /// PR whose merge closed this issue.
    pub closing_pr: Option<u64>,
}

/// Product surface a model interaction came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageSurface {
    Chat,
    Tab,
    Agent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelUsageRow {
    pub developer_id: String,
    pub email: String,
    pub date: NaiveDate,
    pub model: String,
    pub messages_count: u32,
    pub used_by: UsageSurface,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientVersionRow {
    pub developer_id: String,
    pub email: String,
    pub date: NaiveDate,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileExtensionRow {
    pub developer_id: String,
    pub email: String,
    pub repo: String,
    pub date: NaiveDate,
    pub extension: String,
    pub files_touched: u32,
    pub accepts: u64,
    pub rejects: u64,
    pub lines_suggested: u64,
    pub lines_accepted: u64,
    pub lines_rejected: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Tool,
    Command,
    PlanMode,
    AskMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureUsageRow {
    pub developer_id: String,
    pub email: String,
    pub date: NaiveDate,
    pub kind: FeatureKind,
    /// Tool name, command name, or model name depending on `kind`.
    pub key: String,
    pub invocations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegalAiEvent {
    pub user_email: String,
    pub task_type: String,
    pub timestamp: DateTime<Utc>,
    pub duration_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfficeAppActivity {
    pub user_email: String,
    pub app: String,
    pub last_used: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyResponse {
    pub response_id: String,
    pub respondent_email: String,
    /// 1..=10 overall AI satisfaction.
    pub rating: u8,
    pub comment: String,
    pub submitted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_delta_totals() {
        let d = LineDelta {
            tab: 10,
            composer: 5,
            non_ai: 35,
        };
        assert_eq!(d.total(), 50);
        assert_eq!(d.ai(), 15);
    }

    #[test]
    fn ai_ratio_band_partitions() {
        assert_eq!(AiRatioBand::from_ratio(0.0), AiRatioBand::Low);
        assert_eq!(AiRatioBand::from_ratio(0.29), AiRatioBand::Low);
        assert_eq!(AiRatioBand::from_ratio(0.3), AiRatioBand::Medium);
        assert_eq!(AiRatioBand::from_ratio(0.7), AiRatioBand::Medium);
        assert_eq!(AiRatioBand::from_ratio(0.71), AiRatioBand::High);
    }

    #[test]
    fn velocity_multipliers() {
        assert_eq!(Velocity::Low.multiplier(), 0.5);
        assert_eq!(Velocity::Medium.multiplier(), 1.0);
        assert_eq!(Velocity::High.multiplier(), 2.0);
    }
}
