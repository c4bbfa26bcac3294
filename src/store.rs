//! In-memory analytics store.
//!
//! The store is logically a set of indices plus a version counter. A
//! generation pass accumulates entities in a `SnapshotBuilder` (serial
//! inserts, generator order), which validates cross-entity invariants and
//! freezes into an immutable `Snapshot`. Readers clone the current
//! `Arc<Snapshot>` under a read lock and then run lock-free against one
//! consistent version; publishing a replacement takes the write lock only
//! for the pointer swap, so in-flight readers keep the snapshot they
//! started with until they drop it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;

use crate::error::{SimError, SimResult};
use crate::model::{
    ClientVersionRow, Commit, Developer, FeatureUsageRow, FileExtensionRow, Issue, LegalAiEvent,
    ModelUsageRow, OfficeAppActivity, PrKey, PullRequest, Repository, Review, ReviewState,
    SurveyResponse,
};
use crate::report::{EntityCounts, RunReport};
use crate::seed::ThirdPartyToggles;

/// Rows of one auxiliary stream with its date and developer indices.
#[derive(Debug, Clone)]
pub struct AuxIndex<T> {
    pub rows: Vec<T>,
    pub by_day: BTreeMap<NaiveDate, Vec<usize>>,
    pub by_developer: HashMap<String, Vec<usize>>,
}

impl<T> Default for AuxIndex<T> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            by_day: BTreeMap::new(),
            by_developer: HashMap::new(),
        }
    }
}

impl<T> AuxIndex<T> {
    fn push(&mut self, row: T, date: NaiveDate, developer_id: &str) {
        let idx = self.rows.len();
        self.rows.push(row);
        self.by_day.entry(date).or_default().push(idx);
        self.by_developer
            .entry(developer_id.to_string())
            .or_default()
            .push(idx);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One immutable, atomically published version of the whole corpus.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub version: u64,
    /// "Now" captured once at pipeline start; also the window end.
    pub generated_at: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub third_party: ThirdPartyToggles,
    pub report: Option<RunReport>,

    pub(crate) developers: Vec<Developer>,
    pub(crate) dev_index_by_id: HashMap<String, usize>,
    pub(crate) dev_id_by_email: HashMap<String, String>,
    pub(crate) repositories: Vec<Repository>,

    /// Sorted by (timestamp, hash); the sub-indices hold positions here.
    pub(crate) commits: Vec<Commit>,
    pub(crate) commits_by_repo: HashMap<String, Vec<usize>>,
    pub(crate) commits_by_author: HashMap<String, Vec<usize>>,
    pub(crate) commits_by_day: BTreeMap<NaiveDate, Vec<usize>>,

    pub(crate) prs: Vec<PullRequest>,
    pub(crate) prs_by_repo: HashMap<String, Vec<usize>>,
    pub(crate) pr_index_by_key: HashMap<PrKey, usize>,
    pub(crate) prs_by_author: HashMap<String, Vec<usize>>,
    pub(crate) reviews_by_pr: HashMap<PrKey, Vec<Review>>,

    pub(crate) issues: Vec<Issue>,
    pub(crate) issues_by_repo: HashMap<String, Vec<usize>>,

    pub(crate) model_usage: AuxIndex<ModelUsageRow>,
    pub(crate) client_versions: AuxIndex<ClientVersionRow>,
    pub(crate) file_extensions: AuxIndex<FileExtensionRow>,
    pub(crate) feature_usage: AuxIndex<FeatureUsageRow>,
    pub(crate) legal_ai: Vec<LegalAiEvent>,
    pub(crate) office_activity: Vec<OfficeAppActivity>,
    pub(crate) survey_responses: Vec<SurveyResponse>,

    /// Highest PR number handed out per repo; append runs continue from it.
    pub(crate) pr_watermarks: HashMap<String, u64>,
}

impl Snapshot {
    pub fn developers(&self) -> &[Developer] {
        &self.developers
    }

    pub fn repositories(&self) -> &[Repository] {
        &self.repositories
    }

    pub fn developer_by_id(&self, id: &str) -> Option<&Developer> {
        self.dev_index_by_id.get(id).map(|i| &self.developers[*i])
    }

    pub fn developer_by_email(&self, email: &str) -> Option<&Developer> {
        self.dev_id_by_email
            .get(&email.to_ascii_lowercase())
            .and_then(|id| self.developer_by_id(id))
    }

    pub fn commits(&self) -> &[Commit] {
        &self.commits
    }

    pub fn pull_requests(&self) -> &[PullRequest] {
        &self.prs
    }

    pub fn pull_request(&self, repo: &str, number: u64) -> Option<&PullRequest> {
        let key = PrKey {
            repo: repo.to_string(),
            number,
        };
        self.pr_index_by_key.get(&key).map(|i| &self.prs[*i])
    }

    pub fn reviews_for(&self, repo: &str, number: u64) -> &[Review] {
        let key = PrKey {
            repo: repo.to_string(),
            number,
        };
        self.reviews_by_pr
            .get(&key)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn entity_counts(&self) -> EntityCounts {
        EntityCounts {
            developers: self.developers.len() as u64,
            repositories: self.repositories.len() as u64,
            commits: self.commits.len() as u64,
            pull_requests: self.prs.len() as u64,
            reviews: self.reviews_by_pr.values().map(|v| v.len() as u64).sum(),
            issues: self.issues.len() as u64,
            model_usage_rows: self.model_usage.len() as u64,
            client_version_rows: self.client_versions.len() as u64,
            file_extension_rows: self.file_extensions.len() as u64,
            feature_usage_rows: self.feature_usage.len() as u64,
            legal_ai_events: self.legal_ai.len() as u64,
            office_activity_rows: self.office_activity.len() as u64,
            survey_responses: self.survey_responses.len() as u64,
        }
    }
}

/// Serial accumulator for one generation pass. Generators insert in the
/// fixed pipeline order; `finish` checks the cross-entity invariants and
/// builds every index eagerly.
#[derive(Debug)]
pub struct SnapshotBuilder {
    version: u64,
    generated_at: DateTime<Utc>,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    third_party: ThirdPartyToggles,

    developers: Vec<Developer>,
    repositories: Vec<Repository>,
    commits: Vec<Commit>,
    prs: Vec<PullRequest>,
    reviews: Vec<Review>,
    issues: Vec<Issue>,
    issue_watermarks: HashMap<String, u64>,
    model_usage: Vec<ModelUsageRow>,
    client_versions: Vec<ClientVersionRow>,
    file_extensions: Vec<FileExtensionRow>,
    feature_usage: Vec<FeatureUsageRow>,
    legal_ai: Vec<LegalAiEvent>,
    office_activity: Vec<OfficeAppActivity>,
    survey_responses: Vec<SurveyResponse>,
    pr_watermarks: HashMap<String, u64>,
}

impl SnapshotBuilder {
    /// Fresh builder for an override or first run.
    pub fn new(
        developers: Vec<Developer>,
        repositories: Vec<Repository>,
        third_party: ThirdPartyToggles,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Self {
        SnapshotBuilder {
            version: 0,
            generated_at: window_end,
            window_start,
            window_end,
            third_party,
            developers,
            repositories,
            commits: Vec::new(),
            prs: Vec::new(),
            reviews: Vec::new(),
            issues: Vec::new(),
            issue_watermarks: HashMap::new(),
            model_usage: Vec::new(),
            client_versions: Vec::new(),
            file_extensions: Vec::new(),
            feature_usage: Vec::new(),
            legal_ai: Vec::new(),
            office_activity: Vec::new(),
            survey_responses: Vec::new(),
            pr_watermarks: HashMap::new(),
        }
    }

    /// Builder seeded with the previous snapshot's contents; the new window
    /// extends the old one and PR/issue numbering continues.
    pub fn from_snapshot(prev: &Snapshot, new_window_end: DateTime<Utc>) -> Self {
        let mut issue_watermarks = HashMap::new();
        for issue in &prev.issues {
            let w = issue_watermarks.entry(issue.repo.clone()).or_insert(0u64);
            *w = (*w).max(issue.number);
        }
        SnapshotBuilder {
            version: prev.version,
            generated_at: new_window_end,
            window_start: prev.window_start,
            window_end: new_window_end,
            third_party: prev.third_party.clone(),
            developers: prev.developers.clone(),
            repositories: prev.repositories.clone(),
            commits: prev.commits.clone(),
            prs: prev.prs.clone(),
            reviews: prev
                .reviews_by_pr
                .values()
                .flat_map(|v| v.iter().cloned())
                .collect(),
            issues: prev.issues.clone(),
            issue_watermarks,
            model_usage: prev.model_usage.rows.clone(),
            client_versions: prev.client_versions.rows.clone(),
            file_extensions: prev.file_extensions.rows.clone(),
            feature_usage: prev.feature_usage.rows.clone(),
            legal_ai: prev.legal_ai.clone(),
            office_activity: prev.office_activity.clone(),
            survey_responses: prev.survey_responses.clone(),
            pr_watermarks: prev.pr_watermarks.clone(),
        }
    }

    pub fn window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.window_start, self.window_end)
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn third_party(&self) -> &ThirdPartyToggles {
        &self.third_party
    }

    pub fn developers(&self) -> &[Developer] {
        &self.developers
    }

    pub fn repositories(&self) -> &[Repository] {
        &self.repositories
    }

    pub fn commits(&self) -> &[Commit] {
        &self.commits
    }

    pub fn commits_mut(&mut self) -> &mut [Commit] {
        &mut self.commits
    }

    pub fn prs(&self) -> &[PullRequest] {
        &self.prs
    }

    pub fn prs_mut(&mut self) -> &mut [PullRequest] {
        &mut self.prs
    }

    pub fn reviews(&self) -> &[Review] {
        &self.reviews
    }

    pub fn add_commit(&mut self, commit: Commit) {
        self.commits.push(commit);
    }

    /// Hand out the next PR number for a repo. Monotone per repo, starting
    /// at 1, continuing across append runs.
    pub fn next_pr_number(&mut self, repo: &str) -> u64 {
        let w = self.pr_watermarks.entry(repo.to_string()).or_insert(0);
        *w += 1;
        *w
    }

    pub fn add_pr(&mut self, pr: PullRequest) {
        self.prs.push(pr);
    }

    pub fn add_review(&mut self, review: Review) {
        self.reviews.push(review);
    }

    pub fn next_issue_number(&mut self, repo: &str) -> u64 {
        let w = self.issue_watermarks.entry(repo.to_string()).or_insert(0);
        *w += 1;
        *w
    }

    pub fn add_issue(&mut self, issue: Issue) {
        self.issues.push(issue);
    }

    pub fn add_model_usage(&mut self, row: ModelUsageRow) {
        self.model_usage.push(row);
    }

    pub fn add_client_version(&mut self, row: ClientVersionRow) {
        self.client_versions.push(row);
    }

    pub fn add_file_extension(&mut self, row: FileExtensionRow) {
        self.file_extensions.push(row);
    }

    pub fn add_feature_usage(&mut self, row: FeatureUsageRow) {
        self.feature_usage.push(row);
    }

    pub fn add_legal_ai(&mut self, event: LegalAiEvent) {
        self.legal_ai.push(event);
    }

    pub fn add_office_activity(&mut self, row: OfficeAppActivity) {
        self.office_activity.push(row);
    }

    pub fn add_survey_response(&mut self, row: SurveyResponse) {
        self.survey_responses.push(row);
    }

    pub fn survey_response_count(&self) -> usize {
        self.survey_responses.len()
    }

    /// Validate invariants, sort, and build every index. Violations here
    /// mean a generator bug and surface as `internal`.
    pub fn finish(mut self) -> SimResult<Snapshot> {
        self.validate()?;

        self.commits
            .sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.hash.cmp(&b.hash)));

        let mut dev_index_by_id = HashMap::new();
        let mut dev_id_by_email = HashMap::new();
        for (i, dev) in self.developers.iter().enumerate() {
            dev_index_by_id.insert(dev.id.clone(), i);
            dev_id_by_email.insert(dev.email.to_ascii_lowercase(), dev.id.clone());
        }

        let mut commits_by_repo: HashMap<String, Vec<usize>> = HashMap::new();
        let mut commits_by_author: HashMap<String, Vec<usize>> = HashMap::new();
        let mut commits_by_day: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
        for (i, commit) in self.commits.iter().enumerate() {
            commits_by_repo.entry(commit.repo.clone()).or_default().push(i);
            commits_by_author
                .entry(commit.author_id.clone())
                .or_default()
                .push(i);
            commits_by_day
                .entry(commit.event_date())
                .or_default()
                .push(i);
        }

        // Per-repo PR sequences stay ordered by number.
        self.prs
            .sort_by(|a, b| a.repo.cmp(&b.repo).then_with(|| a.number.cmp(&b.number)));
        let mut prs_by_repo: HashMap<String, Vec<usize>> = HashMap::new();
        let mut pr_index_by_key = HashMap::new();
        let mut prs_by_author: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, pr) in self.prs.iter().enumerate() {
            prs_by_repo.entry(pr.repo.clone()).or_default().push(i);
            pr_index_by_key.insert(pr.key(), i);
            prs_by_author
                .entry(pr.author_id.clone())
                .or_default()
                .push(i);
        }

        let mut reviews_by_pr: HashMap<PrKey, Vec<Review>> = HashMap::new();
        for review in self.reviews.drain(..) {
            let key = PrKey {
                repo: review.repo.clone(),
                number: review.pr_number,
            };
            reviews_by_pr.entry(key).or_default().push(review);
        }

        self.issues
            .sort_by(|a, b| a.repo.cmp(&b.repo).then_with(|| a.number.cmp(&b.number)));
        let mut issues_by_repo: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, issue) in self.issues.iter().enumerate() {
            issues_by_repo.entry(issue.repo.clone()).or_default().push(i);
        }

        let mut model_usage = AuxIndex::default();
        for row in self.model_usage.drain(..) {
            let (date, dev) = (row.date, row.developer_id.clone());
            model_usage.push(row, date, &dev);
        }
        let mut client_versions = AuxIndex::default();
        for row in self.client_versions.drain(..) {
            let (date, dev) = (row.date, row.developer_id.clone());
            client_versions.push(row, date, &dev);
        }
        let mut file_extensions = AuxIndex::default();
        for row in self.file_extensions.drain(..) {
            let (date, dev) = (row.date, row.developer_id.clone());
            file_extensions.push(row, date, &dev);
        }
        let mut feature_usage = AuxIndex::default();
        for row in self.feature_usage.drain(..) {
            let (date, dev) = (row.date, row.developer_id.clone());
            feature_usage.push(row, date, &dev);
        }

        Ok(Snapshot {
            version: self.version + 1,
            generated_at: self.generated_at,
            window_start: self.window_start,
            window_end: self.window_end,
            third_party: self.third_party,
            report: None,
            developers: self.developers,
            dev_index_by_id,
            dev_id_by_email,
            repositories: self.repositories,
            commits: self.commits,
            commits_by_repo,
            commits_by_author,
            commits_by_day,
            prs: self.prs,
            prs_by_repo,
            pr_index_by_key,
            prs_by_author,
            reviews_by_pr,
            issues: self.issues,
            issues_by_repo,
            model_usage,
            client_versions,
            file_extensions,
            feature_usage,
            legal_ai: self.legal_ai,
            office_activity: self.office_activity,
            survey_responses: self.survey_responses,
            pr_watermarks: self.pr_watermarks,
        })
    }

    fn validate(&self) -> SimResult<()> {
        let mut ids = HashSet::new();
        let mut emails = HashSet::new();
        for dev in &self.developers {
            if !ids.insert(&dev.id) {
                return Err(SimError::Internal(format!(
                    "duplicate developer id '{}'",
                    dev.id
                )));
            }
            if !emails.insert(dev.email.to_ascii_lowercase()) {
                return Err(SimError::Internal(format!(
                    "duplicate developer email '{}'",
                    dev.email
                )));
            }
        }

        let mut hashes = HashSet::new();
        for commit in &self.commits {
            if !ids.contains(&commit.author_id) {
                return Err(SimError::Internal(format!(
                    "commit {} authored by unknown developer '{}'",
                    commit.hash, commit.author_id
                )));
            }
            if !hashes.insert(&commit.hash) {
                return Err(SimError::Internal(format!(
                    "duplicate commit hash {}",
                    commit.hash
                )));
            }
            if commit.added.total() != commit.added.tab + commit.added.composer + commit.added.non_ai
            {
                return Err(SimError::Internal("added line split broken".to_string()));
            }
        }

        let mut pr_keys: HashMap<&str, Vec<u64>> = HashMap::new();
        let commit_by_hash: HashMap<&str, &Commit> = self
            .commits
            .iter()
            .map(|c| (c.hash.as_str(), c))
            .collect();
        for pr in &self.prs {
            pr_keys.entry(pr.repo.as_str()).or_default().push(pr.number);
            if pr.tab_lines + pr.composer_lines > pr.additions {
                return Err(SimError::Internal(format!(
                    "pr {}#{}: AI lines exceed additions",
                    pr.repo, pr.number
                )));
            }
            if let Some(merged_at) = pr.merged_at {
                if merged_at < pr.created_at {
                    return Err(SimError::Internal(format!(
                        "pr {}#{}: merged before created",
                        pr.repo, pr.number
                    )));
                }
            }
            if let Some(closed_at) = pr.closed_at {
                if closed_at < pr.created_at {
                    return Err(SimError::Internal(format!(
                        "pr {}#{}: closed before created",
                        pr.repo, pr.number
                    )));
                }
            }
            for hash in &pr.commit_hashes {
                let commit = commit_by_hash.get(hash.as_str()).ok_or_else(|| {
                    SimError::Internal(format!(
                        "pr {}#{} references unknown commit {}",
                        pr.repo, pr.number, hash
                    ))
                })?;
                if commit.repo != pr.repo
                    || commit.author_id != pr.author_id
                    || commit.branch != pr.head_branch
                {
                    return Err(SimError::Internal(format!(
                        "pr {}#{}: member commit {} disagrees on repo/author/branch",
                        pr.repo, pr.number, hash
                    )));
                }
                if let Some(merged_at) = pr.merged_at {
                    if commit.timestamp > merged_at {
                        return Err(SimError::Internal(format!(
                            "pr {}#{}: merged before member commit {}",
                            pr.repo, pr.number, hash
                        )));
                    }
                }
            }
        }
        for numbers in pr_keys.values() {
            let mut sorted = numbers.clone();
            sorted.sort_unstable();
            sorted.dedup();
            if sorted.len() != numbers.len() {
                return Err(SimError::Internal("duplicate PR number in repo".to_string()));
            }
        }

        let pr_author: HashMap<(String, u64), &str> = self
            .prs
            .iter()
            .map(|pr| ((pr.repo.clone(), pr.number), pr.author_id.as_str()))
            .collect();
        for review in &self.reviews {
            match pr_author.get(&(review.repo.clone(), review.pr_number)) {
                None => {
                    return Err(SimError::Internal(format!(
                        "review for unknown pr {}#{}",
                        review.repo, review.pr_number
                    )))
                }
                Some(author) => {
                    if *author == review.reviewer_id {
                        return Err(SimError::Internal(format!(
                            "self-review on pr {}#{}",
                            review.repo, review.pr_number
                        )));
                    }
                }
            }
            match review.state {
                ReviewState::Pending => {
                    if review.submitted_at.is_some() {
                        return Err(SimError::Internal(
                            "pending review with submitted_at".to_string(),
                        ));
                    }
                }
                _ => {
                    if review.submitted_at.is_none() {
                        return Err(SimError::Internal(
                            "submitted review without submitted_at".to_string(),
                        ));
                    }
                }
            }
        }

        for issue in &self.issues {
            if let Some(closed_at) = issue.closed_at {
                if closed_at < issue.created_at {
                    return Err(SimError::Internal(format!(
                        "issue {}#{} closed before created",
                        issue.repo, issue.number
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Process-wide holder of the current snapshot.
#[derive(Debug)]
pub struct AnalyticsStore {
    current: RwLock<Arc<Snapshot>>,
}

impl AnalyticsStore {
    pub fn new(initial: Snapshot) -> Self {
        AnalyticsStore {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    /// Cheap handle to the current version; the caller runs lock-free
    /// against it for the rest of the request.
    pub async fn snapshot(&self) -> Arc<Snapshot> {
        self.current.read().await.clone()
    }

    /// Atomically publish a replacement snapshot.
    pub async fn publish(&self, next: Snapshot) -> Arc<Snapshot> {
        let next = Arc::new(next);
        let mut guard = self.current.write().await;
        *guard = next.clone();
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::ThirdPartyToggles;
    use chrono::TimeZone;

    fn empty_snapshot() -> Snapshot {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2025, 1, 8, 0, 0, 0).unwrap();
        SnapshotBuilder::new(Vec::new(), Vec::new(), ThirdPartyToggles::default(), t0, t1)
            .finish()
            .unwrap()
    }

    #[test]
    fn publish_swaps_atomically_and_readers_keep_handles() {
        tokio_test::block_on(async {
            let store = AnalyticsStore::new(empty_snapshot());
            let held = store.snapshot().await;
            assert_eq!(held.version, 1);

            let mut next = empty_snapshot();
            next.version = held.version + 1;
            let published = store.publish(next).await;
            assert_eq!(published.version, 2);

            // The pre-swap reader still sees its whole snapshot.
            assert_eq!(held.version, 1);
            assert_eq!(store.snapshot().await.version, 2);
        });
    }

    #[test]
    fn builder_rejects_self_review() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2025, 1, 8, 0, 0, 0).unwrap();
        let dev = crate::seed::SeedDeveloper {
            user_id: "zoe".to_string(),
            email: "zoe@example.com".to_string(),
            name: "Zoe".to_string(),
            ..Default::default()
        }
        .into_developer();
        let mut builder = SnapshotBuilder::new(
            vec![dev],
            Vec::new(),
            ThirdPartyToggles::default(),
            t0,
            t1,
        );
        let number = builder.next_pr_number("repo");
        builder.add_pr(PullRequest {
            repo: "repo".to_string(),
            number,
            title: "t".to_string(),
            author_id: "zoe".to_string(),
            author_email: "zoe@example.com".to_string(),
            base_branch: "main".to_string(),
            head_branch: "zoe/x-1".to_string(),
            state: crate::model::PrState::Open,
            created_at: t0,
            merged_at: None,
            closed_at: None,
            additions: 0,
            deletions: 0,
            tab_lines: 0,
            composer_lines: 0,
            commit_count: 0,
            file_count: 0,
            commit_hashes: Vec::new(),
            was_reverted: false,
            required_hotfix: false,
            hotfix_pr: None,
            hotfix_of: None,
            synthetic: false,
        });
        builder.add_review(Review {
            repo: "repo".to_string(),
            pr_number: number,
            reviewer_id: "zoe".to_string(),
            reviewer_email: "zoe@example.com".to_string(),
            state: ReviewState::Pending,
            comments: Vec::new(),
            submitted_at: None,
        });
        let err = builder.finish().unwrap_err();
        assert_eq!(err.kind(), "internal");
    }
}
