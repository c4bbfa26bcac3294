//! Query and aggregation layer.
//!
//! Every operation here is a pure read against one `Snapshot`; the service
//! facade clones the current snapshot handle and calls in. Time ranges are
//! half-open `[from, to)`. Daily series are dense: every day of the window
//! is present, zero rows included.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{SimError, SimResult};
use crate::model::{
    Commit, Issue, IssueLabel, IssueState, PrState, PullRequest, Review, ReviewState,
    UsageSurface,
};
use crate::report::EntityCounts;
use crate::store::Snapshot;

pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const COMMITS_MAX_PAGE_SIZE: u32 = 500;
pub const DEFAULT_MAX_PAGE_SIZE: u32 = 100;
pub const DEFAULT_WINDOW_DAYS: i64 = 30;
pub const STATS_SERIES_CAP: usize = 365;

/// Parse a time bound: `YYYY-MM-DD` (UTC midnight) or RFC3339.
pub fn parse_time_bound(raw: &str) -> SimResult<DateTime<Utc>> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always valid")
            .and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| {
            SimError::InvalidParameter(format!(
                "'{}' is neither YYYY-MM-DD nor RFC3339",
                raw
            ))
        })
}

/// Resolved half-open query window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    /// Resolve optional raw bounds against a per-request `now`. Defaults to
    /// the trailing 30 days.
    pub fn resolve(from: Option<&str>, to: Option<&str>, now: DateTime<Utc>) -> SimResult<Self> {
        let to = match to {
            Some(raw) => parse_time_bound(raw)?,
            None => now,
        };
        let from = match from {
            Some(raw) => parse_time_bound(raw)?,
            None => to - Duration::days(DEFAULT_WINDOW_DAYS),
        };
        if from > to {
            return Err(SimError::InvalidParameter(format!(
                "from {} is after to {}",
                from, to
            )));
        }
        Ok(TimeRange { from, to })
    }

    fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.from && t < self.to
    }

    /// Number of dense daily rows this window spans.
    fn day_count(&self) -> usize {
        let span = self.to - self.from;
        let days = span.num_days();
        let remainder = span - Duration::days(days);
        (days + i64::from(remainder > Duration::zero())).max(0) as usize
    }

    fn day_label(&self, i: usize) -> NaiveDate {
        (self.from + Duration::days(i as i64)).date_naive()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
    pub total_count: u64,
    pub total_pages: u64,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

/// Result envelope shared by the paginated endpoints: the rows, the
/// pagination block, and an echo of the effective parameters.
#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
    pub params: serde_json::Value,
}

/// Validate and clamp pagination inputs. Returns (page, effective size,
/// clamped flag).
fn normalize_page(page: u32, page_size: u32, max: u32) -> SimResult<(u32, u32, bool)> {
    if page == 0 {
        return Err(SimError::InvalidParameter(
            "page is 1-based, got 0".to_string(),
        ));
    }
    if page_size == 0 {
        return Err(SimError::InvalidParameter(
            "page_size must be positive".to_string(),
        ));
    }
    if page_size > max {
        Ok((page, max, true))
    } else {
        Ok((page, page_size, false))
    }
}

fn paginate<T: Clone>(items: &[T], page: u32, page_size: u32) -> (Vec<T>, Pagination) {
    let total_count = items.len() as u64;
    let total_pages = total_count.div_ceil(u64::from(page_size));
    let start = (u64::from(page) - 1) * u64::from(page_size);
    let data = if start >= total_count {
        Vec::new()
    } else {
        let end = (start + u64::from(page_size)).min(total_count);
        items[start as usize..end as usize].to_vec()
    };
    let pagination = Pagination {
        page,
        page_size,
        total_count,
        total_pages,
        has_next_page: u64::from(page) < total_pages,
        has_previous_page: page > 1 && total_count > 0,
    };
    (data, pagination)
}

/// Nearest-rank percentile over a sorted slice. Values are integer seconds
/// and percentiles are not interpolated.
fn nearest_rank(sorted: &[i64], percentile: f64) -> i64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((percentile / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Dau,
    Commits,
    Tabs,
    Models,
}

impl std::str::FromStr for StreamKind {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dau" => Ok(StreamKind::Dau),
            "commits" => Ok(StreamKind::Commits),
            "tabs" => Ok(StreamKind::Tabs),
            "models" => Ok(StreamKind::Models),
            other => Err(SimError::InvalidParameter(format!(
                "unknown stream '{}'",
                other
            ))),
        }
    }
}

/// The DAU series is the one family keyed `date`; every other daily row is
/// keyed `event_date`. The asymmetry is contractual.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DauRow {
    pub date: NaiveDate,
    pub active_users: u64,
    pub total_users: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitDailyRow {
    pub event_date: NaiveDate,
    pub commits: u64,
    pub additions: u64,
    pub deletions: u64,
    pub tab_added: u64,
    pub composer_added: u64,
    pub non_ai_added: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabDailyRow {
    pub event_date: NaiveDate,
    pub accepts: u64,
    pub rejects: u64,
    pub lines_suggested: u64,
    pub lines_accepted: u64,
    pub lines_rejected: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDailyRow {
    pub event_date: NaiveDate,
    pub total_messages: u64,
    pub messages_by_model: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SeriesRows {
    Dau(Vec<DauRow>),
    Commits(Vec<CommitDailyRow>),
    Tabs(Vec<TabDailyRow>),
    Models(Vec<ModelDailyRow>),
}

impl SeriesRows {
    pub fn len(&self) -> usize {
        match self {
            SeriesRows::Dau(rows) => rows.len(),
            SeriesRows::Commits(rows) => rows.len(),
            SeriesRows::Tabs(rows) => rows.len(),
            SeriesRows::Models(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ByUserPage {
    pub data: BTreeMap<String, SeriesRows>,
    pub total_users: u64,
    pub pagination: Pagination,
    pub params: serde_json::Value,
}

/// Shared aggregation base for both leaderboards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: u64,
    pub email: String,
    pub user_id: String,
    pub total_accepts: u64,
    pub total_lines_accepted: u64,
    pub total_lines_suggested: u64,
    pub line_acceptance_ratio: f64,
    /// Tab leaderboard only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accept_ratio: Option<f64>,
    /// Agent leaderboard only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favorite_model: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Leaderboards {
    pub tab_leaderboard: Paginated<LeaderboardEntry>,
    pub agent_leaderboard: Paginated<LeaderboardEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleTimeMetrics {
    pub avg_time_to_first_review: f64,
    pub avg_time_to_merge: f64,
    pub median_time_to_merge: i64,
    pub p50_time_to_merge: i64,
    pub p75_time_to_merge: i64,
    pub p90_time_to_merge: i64,
    #[serde(rename = "totalPRsAnalyzed")]
    pub total_prs_analyzed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewQualityMetrics {
    pub approval_rate: f64,
    pub changes_requested_rate: f64,
    pub pending_rate: f64,
    pub avg_reviewers_per_pr: f64,
    pub avg_comments_per_review: f64,
    pub total_reviews: u64,
    pub total_prs_reviewed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityStats {
    pub revert_rate: f64,
    pub hotfix_rate: f64,
    pub avg_ai_ratio: f64,
    pub avg_survival_30d: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyStatRow {
    pub event_date: NaiveDate,
    pub commits: u64,
    pub pull_requests: u64,
    pub avg_time_to_merge: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub totals: EntityCounts,
    pub by_seniority: BTreeMap<String, u64>,
    pub by_region: BTreeMap<String, u64>,
    pub by_team: BTreeMap<String, u64>,
    pub quality: QualityStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeseries: Option<Vec<DailyStatRow>>,
}

#[derive(Debug, Clone, Default)]
pub struct CommitFilters<'a> {
    pub author: Option<&'a str>,
    pub repo: Option<&'a str>,
}

impl Snapshot {
    /// Commits inside [from, to), as a contiguous slice of the time-ordered
    /// sequence.
    fn commits_in_range(&self, range: &TimeRange) -> &[Commit] {
        let start = self
            .commits
            .partition_point(|c| c.timestamp < range.from);
        let end = self.commits.partition_point(|c| c.timestamp < range.to);
        &self.commits[start..end]
    }

    pub fn scan_commits(
        &self,
        range: TimeRange,
        filters: CommitFilters<'_>,
        page: u32,
        page_size: u32,
    ) -> SimResult<Paginated<Commit>> {
        let (page, size, clamped) = normalize_page(page, page_size, COMMITS_MAX_PAGE_SIZE)?;
        let matching: Vec<Commit> = self
            .commits_in_range(&range)
            .iter()
            .filter(|c| {
                filters
                    .author
                    .map(|a| c.author_email == a || c.author_id == a)
                    .unwrap_or(true)
            })
            .filter(|c| filters.repo.map(|r| c.repo == r).unwrap_or(true))
            .cloned()
            .collect();
        let (data, pagination) = paginate(&matching, page, size);
        Ok(Paginated {
            data,
            pagination,
            params: json!({
                "from": range.from,
                "to": range.to,
                "author": filters.author,
                "repo": filters.repo,
                "page": page,
                "page_size": size,
                "page_size_clamped": clamped,
            }),
        })
    }

    /// Dense daily rows for one team-level stream. `user_filter` narrows to
    /// a single developer by email.
    pub fn team_daily_series(
        &self,
        kind: StreamKind,
        range: TimeRange,
        user_filter: Option<&str>,
    ) -> SimResult<SeriesRows> {
        let user_id = match user_filter {
            Some(email) => Some(
                self.developer_by_email(email)
                    .ok_or_else(|| SimError::NotFound(format!("user '{}'", email)))?
                    .id
                    .clone(),
            ),
            None => None,
        };
        Ok(self.series_rows(kind, &range, user_id.as_deref()))
    }

    fn series_rows(&self, kind: StreamKind, range: &TimeRange, user_id: Option<&str>) -> SeriesRows {
        let days = range.day_count();
        match kind {
            StreamKind::Dau => {
                let mut rows = Vec::with_capacity(days);
                for i in 0..days {
                    let date = range.day_label(i);
                    let active = self
                        .commits_by_day
                        .get(&date)
                        .map(|indices| {
                            let mut authors: Vec<&str> = indices
                                .iter()
                                .map(|idx| self.commits[*idx].author_id.as_str())
                                .filter(|id| user_id.map(|u| *id == u).unwrap_or(true))
                                .collect();
                            authors.sort_unstable();
                            authors.dedup();
                            authors.len() as u64
                        })
                        .unwrap_or(0);
                    rows.push(DauRow {
                        date,
                        active_users: active,
                        total_users: self.developers.len() as u64,
                    });
                }
                SeriesRows::Dau(rows)
            }
            StreamKind::Commits => {
                let mut rows = Vec::with_capacity(days);
                for i in 0..days {
                    let date = range.day_label(i);
                    let mut row = CommitDailyRow {
                        event_date: date,
                        commits: 0,
                        additions: 0,
                        deletions: 0,
                        tab_added: 0,
                        composer_added: 0,
                        non_ai_added: 0,
                    };
                    if let Some(indices) = self.commits_by_day.get(&date) {
                        for idx in indices {
                            let c = &self.commits[*idx];
                            if user_id.map(|u| c.author_id != u).unwrap_or(false) {
                                continue;
                            }
                            row.commits += 1;
                            row.additions += c.added.total();
                            row.deletions += c.deleted.total();
                            row.tab_added += c.added.tab;
                            row.composer_added += c.added.composer;
                            row.non_ai_added += c.added.non_ai;
                        }
                    }
                    rows.push(row);
                }
                SeriesRows::Commits(rows)
            }
            StreamKind::Tabs => {
                let mut rows = Vec::with_capacity(days);
                for i in 0..days {
                    let date = range.day_label(i);
                    let mut row = TabDailyRow {
                        event_date: date,
                        accepts: 0,
                        rejects: 0,
                        lines_suggested: 0,
                        lines_accepted: 0,
                        lines_rejected: 0,
                    };
                    if let Some(indices) = self.file_extensions.by_day.get(&date) {
                        for idx in indices {
                            let r = &self.file_extensions.rows[*idx];
                            if user_id.map(|u| r.developer_id != u).unwrap_or(false) {
                                continue;
                            }
                            row.accepts += r.accepts;
                            row.rejects += r.rejects;
                            row.lines_suggested += r.lines_suggested;
                            row.lines_accepted += r.lines_accepted;
                            row.lines_rejected += r.lines_rejected;
                        }
                    }
                    rows.push(row);
                }
                SeriesRows::Tabs(rows)
            }
            StreamKind::Models => {
                let mut rows = Vec::with_capacity(days);
                for i in 0..days {
                    let date = range.day_label(i);
                    let mut by_model: BTreeMap<String, u64> = BTreeMap::new();
                    let mut total = 0u64;
                    if let Some(indices) = self.model_usage.by_day.get(&date) {
                        for idx in indices {
                            let r = &self.model_usage.rows[*idx];
                            if user_id.map(|u| r.developer_id != u).unwrap_or(false) {
                                continue;
                            }
                            *by_model.entry(r.model.clone()).or_insert(0) +=
                                u64::from(r.messages_count);
                            total += u64::from(r.messages_count);
                        }
                    }
                    rows.push(ModelDailyRow {
                        event_date: date,
                        total_messages: total,
                        messages_by_model: by_model,
                    });
                }
                SeriesRows::Models(rows)
            }
        }
    }

    /// Per-user dense series, paginated by user email ascending. Every
    /// known developer appears, active or not.
    pub fn by_user_series(
        &self,
        kind: StreamKind,
        range: TimeRange,
        page: u32,
        page_size: u32,
    ) -> SimResult<ByUserPage> {
        if kind == StreamKind::Dau {
            return Err(SimError::InvalidParameter(
                "dau is a team-level stream".to_string(),
            ));
        }
        let (page, size, clamped) = normalize_page(page, page_size, DEFAULT_MAX_PAGE_SIZE)?;
        let mut emails: Vec<(String, String)> = self
            .developers
            .iter()
            .map(|d| (d.email.clone(), d.id.clone()))
            .collect();
        emails.sort();
        let total_users = emails.len() as u64;
        let (page_emails, pagination) = paginate(&emails, page, size);
        let data = page_emails
            .into_iter()
            .map(|(email, id)| {
                let rows = self.series_rows(kind, &range, Some(&id));
                (email, rows)
            })
            .collect();
        Ok(ByUserPage {
            data,
            total_users,
            pagination,
            params: json!({
                "from": range.from,
                "to": range.to,
                "page": page,
                "page_size": size,
                "page_size_clamped": clamped,
            }),
        })
    }

    /// Twin ranked lists over the acceptance telemetry. Primary order is
    /// lines accepted descending; ties break on email ascending. Ranks are
    /// dense and 1-based within each list.
    pub fn leaderboard(
        &self,
        range: TimeRange,
        page: u32,
        page_size: u32,
    ) -> SimResult<Leaderboards> {
        let (page, size, clamped) = normalize_page(page, page_size, DEFAULT_MAX_PAGE_SIZE)?;

        #[derive(Default, Clone)]
        struct Acc {
            accepts: u64,
            rejects: u64,
            lines_accepted: u64,
            lines_suggested: u64,
        }
        // Date buckets are coarser than the instant range; the series
        // contract buckets boundary days by calendar date.
        let first_day = range.from.date_naive();
        let last_day = (range.to - Duration::seconds(1)).date_naive();
        let mut per_dev: BTreeMap<String, Acc> = BTreeMap::new();
        for (_, indices) in self.file_extensions.by_day.range(first_day..=last_day) {
            for idx in indices {
                let r = &self.file_extensions.rows[*idx];
                let acc = per_dev.entry(r.developer_id.clone()).or_default();
                acc.accepts += r.accepts;
                acc.rejects += r.rejects;
                acc.lines_accepted += r.lines_accepted;
                acc.lines_suggested += r.lines_suggested;
            }
        }

        // Favorite model per developer: most agent-surface messages in
        // range, model name ascending on ties.
        let mut favorite: BTreeMap<String, BTreeMap<String, u64>> = BTreeMap::new();
        for row in &self.model_usage.rows {
            if row.used_by != UsageSurface::Agent {
                continue;
            }
            if row.date < first_day || row.date > last_day {
                continue;
            }
            *favorite
                .entry(row.developer_id.clone())
                .or_default()
                .entry(row.model.clone())
                .or_insert(0) += u64::from(row.messages_count);
        }

        let mut base: Vec<LeaderboardEntry> = Vec::new();
        for dev in &self.developers {
            let acc = per_dev.get(&dev.id).cloned().unwrap_or_default();
            if acc.lines_suggested == 0 {
                continue;
            }
            base.push(LeaderboardEntry {
                rank: 0,
                email: dev.email.clone(),
                user_id: dev.id.clone(),
                total_accepts: acc.accepts,
                total_lines_accepted: acc.lines_accepted,
                total_lines_suggested: acc.lines_suggested,
                line_acceptance_ratio: acc.lines_accepted as f64
                    / acc.lines_suggested.max(1) as f64,
                accept_ratio: Some(
                    acc.accepts as f64 / (acc.accepts + acc.rejects).max(1) as f64,
                ),
                favorite_model: None,
            });
        }
        base.sort_by(|a, b| {
            b.total_lines_accepted
                .cmp(&a.total_lines_accepted)
                .then_with(|| a.email.cmp(&b.email))
        });

        let mut tab_entries = base.clone();
        for (i, entry) in tab_entries.iter_mut().enumerate() {
            entry.rank = i as u64 + 1;
            entry.favorite_model = None;
        }

        let mut agent_entries = base;
        for (i, entry) in agent_entries.iter_mut().enumerate() {
            entry.rank = i as u64 + 1;
            entry.accept_ratio = None;
            entry.favorite_model = favorite.get(&entry.user_id).and_then(|models| {
                models
                    .iter()
                    .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
                    .map(|(model, _)| model.clone())
            });
        }

        let params = json!({
            "from": range.from,
            "to": range.to,
            "page": page,
            "page_size": size,
            "page_size_clamped": clamped,
        });
        let (tab_data, tab_pagination) = paginate(&tab_entries, page, size);
        let (agent_data, agent_pagination) = paginate(&agent_entries, page, size);
        Ok(Leaderboards {
            tab_leaderboard: Paginated {
                data: tab_data,
                pagination: tab_pagination,
                params: params.clone(),
            },
            agent_leaderboard: Paginated {
                data: agent_data,
                pagination: agent_pagination,
                params,
            },
        })
    }

    pub fn pr_list(
        &self,
        status: Option<PrState>,
        author: Option<&str>,
        range: Option<TimeRange>,
        page: u32,
        page_size: u32,
    ) -> SimResult<Paginated<PullRequest>> {
        let (page, size, clamped) = normalize_page(page, page_size, DEFAULT_MAX_PAGE_SIZE)?;
        let mut matching: Vec<PullRequest> = self
            .prs
            .iter()
            .filter(|pr| status.map(|s| pr.state == s).unwrap_or(true))
            .filter(|pr| {
                author
                    .map(|a| pr.author_email == a || pr.author_id == a)
                    .unwrap_or(true)
            })
            .filter(|pr| range.map(|r| r.contains(pr.created_at)).unwrap_or(true))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.repo.cmp(&b.repo))
                .then_with(|| a.number.cmp(&b.number))
        });
        let (data, pagination) = paginate(&matching, page, size);
        Ok(Paginated {
            data,
            pagination,
            params: json!({
                "status": status.map(|s| s.to_string()),
                "author": author,
                "from": range.map(|r| r.from),
                "to": range.map(|r| r.to),
                "page": page,
                "page_size": size,
                "page_size_clamped": clamped,
            }),
        })
    }

    pub fn review_list(
        &self,
        pr: Option<(&str, u64)>,
        reviewer: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> SimResult<Paginated<Review>> {
        let (page, size, clamped) = normalize_page(page, page_size, DEFAULT_MAX_PAGE_SIZE)?;
        if let Some((repo, number)) = pr {
            if self.pull_request(repo, number).is_none() {
                return Err(SimError::NotFound(format!("pr {}#{}", repo, number)));
            }
        }
        let mut matching: Vec<Review> = Vec::new();
        let mut keys: Vec<&crate::model::PrKey> = self.reviews_by_pr.keys().collect();
        keys.sort_by(|a, b| a.repo.cmp(&b.repo).then_with(|| a.number.cmp(&b.number)));
        for key in keys {
            if let Some((repo, number)) = pr {
                if key.repo != repo || key.number != number {
                    continue;
                }
            }
            for review in &self.reviews_by_pr[key] {
                if reviewer
                    .map(|r| review.reviewer_email == r || review.reviewer_id == r)
                    .unwrap_or(true)
                {
                    matching.push(review.clone());
                }
            }
        }
        let (data, pagination) = paginate(&matching, page, size);
        Ok(Paginated {
            data,
            pagination,
            params: json!({
                "pr": pr.map(|(repo, number)| format!("{}#{}", repo, number)),
                "reviewer": reviewer,
                "page": page,
                "page_size": size,
                "page_size_clamped": clamped,
            }),
        })
    }

    pub fn issue_list(
        &self,
        state: Option<IssueState>,
        labels: Option<&[IssueLabel]>,
        page: u32,
        page_size: u32,
    ) -> SimResult<Paginated<Issue>> {
        let (page, size, clamped) = normalize_page(page, page_size, DEFAULT_MAX_PAGE_SIZE)?;
        let matching: Vec<Issue> = self
            .issues
            .iter()
            .filter(|i| state.map(|s| i.state == s).unwrap_or(true))
            .filter(|i| {
                labels
                    .map(|ls| ls.iter().any(|l| i.labels.contains(l)))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        let (data, pagination) = paginate(&matching, page, size);
        Ok(Paginated {
            data,
            pagination,
            params: json!({
                "state": state,
                "labels": labels,
                "page": page,
                "page_size": size,
                "page_size_clamped": clamped,
            }),
        })
    }

    /// Merge-latency metrics over PRs merged inside the window. Durations
    /// are integer seconds; percentiles are nearest-rank on a sorted copy.
    pub fn cycle_time_metrics(&self, range: TimeRange) -> CycleTimeMetrics {
        let mut merge_seconds: Vec<i64> = Vec::new();
        let mut first_review_seconds: Vec<i64> = Vec::new();
        for pr in &self.prs {
            let merged_at = match pr.merged_at {
                Some(t) if range.contains(t) => t,
                _ => continue,
            };
            merge_seconds.push((merged_at - pr.created_at).num_seconds().max(0));
            let first_review = self
                .reviews_by_pr
                .get(&pr.key())
                .into_iter()
                .flatten()
                .filter_map(|r| r.submitted_at)
                .min();
            if let Some(at) = first_review {
                first_review_seconds.push((at - pr.created_at).num_seconds().max(0));
            }
        }
        merge_seconds.sort_unstable();

        let avg = |xs: &[i64]| {
            if xs.is_empty() {
                0.0
            } else {
                xs.iter().sum::<i64>() as f64 / xs.len() as f64
            }
        };
        CycleTimeMetrics {
            avg_time_to_first_review: avg(&first_review_seconds),
            avg_time_to_merge: avg(&merge_seconds),
            median_time_to_merge: nearest_rank(&merge_seconds, 50.0),
            p50_time_to_merge: nearest_rank(&merge_seconds, 50.0),
            p75_time_to_merge: nearest_rank(&merge_seconds, 75.0),
            p90_time_to_merge: nearest_rank(&merge_seconds, 90.0),
            total_prs_analyzed: merge_seconds.len() as u64,
        }
    }

    /// Review-state mix over PRs created inside the window that have at
    /// least one review. The three rates sum to one.
    pub fn review_quality_metrics(&self, range: TimeRange) -> ReviewQualityMetrics {
        let mut total_reviews = 0u64;
        let mut approved = 0u64;
        let mut changes_requested = 0u64;
        let mut pending = 0u64;
        let mut total_comments = 0u64;
        let mut prs_reviewed = 0u64;
        for pr in &self.prs {
            if !range.contains(pr.created_at) {
                continue;
            }
            let reviews = self.reviews_for(&pr.repo, pr.number);
            if reviews.is_empty() {
                continue;
            }
            prs_reviewed += 1;
            for review in reviews {
                total_reviews += 1;
                total_comments += review.comments.len() as u64;
                match review.state {
                    ReviewState::Approved => approved += 1,
                    ReviewState::ChangesRequested => changes_requested += 1,
                    ReviewState::Pending => pending += 1,
                }
            }
        }
        let denom = total_reviews.max(1) as f64;
        ReviewQualityMetrics {
            approval_rate: approved as f64 / denom,
            changes_requested_rate: changes_requested as f64 / denom,
            pending_rate: pending as f64 / denom,
            avg_reviewers_per_pr: total_reviews as f64 / prs_reviewed.max(1) as f64,
            avg_comments_per_review: total_comments as f64 / denom,
            total_reviews,
            total_prs_reviewed: prs_reviewed,
        }
    }

    pub fn legal_ai_list(
        &self,
        page: u32,
        page_size: u32,
    ) -> SimResult<Paginated<crate::model::LegalAiEvent>> {
        let (page, size, clamped) = normalize_page(page, page_size, DEFAULT_MAX_PAGE_SIZE)?;
        let (data, pagination) = paginate(&self.legal_ai, page, size);
        Ok(Paginated {
            data,
            pagination,
            params: json!({
                "page": page,
                "page_size": size,
                "page_size_clamped": clamped,
            }),
        })
    }

    pub fn office_activity_rows(&self) -> &[crate::model::OfficeAppActivity] {
        &self.office_activity
    }

    pub fn survey_response_rows(&self) -> &[crate::model::SurveyResponse] {
        &self.survey_responses
    }

    /// Corpus-wide stats with optional daily time-series (capped at 365
    /// points, trailing).
    pub fn stats(&self, include_timeseries: bool) -> StatsReport {
        let mut by_seniority: BTreeMap<String, u64> = BTreeMap::new();
        let mut by_region: BTreeMap<String, u64> = BTreeMap::new();
        let mut by_team: BTreeMap<String, u64> = BTreeMap::new();
        for dev in &self.developers {
            *by_seniority.entry(dev.seniority.to_string()).or_insert(0) += 1;
            *by_region.entry(dev.region.clone()).or_insert(0) += 1;
            *by_team.entry(dev.team.clone()).or_insert(0) += 1;
        }

        let merged: Vec<&PullRequest> = self
            .prs
            .iter()
            .filter(|pr| pr.state == PrState::Merged)
            .collect();
        let merged_total = merged.len().max(1) as f64;
        let reverted = merged.iter().filter(|pr| pr.was_reverted).count() as f64;
        let hotfixed = merged.iter().filter(|pr| pr.required_hotfix).count() as f64;
        let avg_ai_ratio = if self.commits.is_empty() {
            0.0
        } else {
            self.commits.iter().map(|c| c.ai_ratio()).sum::<f64>() / self.commits.len() as f64
        };
        let survivals: Vec<f64> = self
            .commits
            .iter()
            .filter_map(|c| c.survival.map(|s| s.day30))
            .collect();
        let avg_survival_30d = if survivals.is_empty() {
            0.0
        } else {
            survivals.iter().sum::<f64>() / survivals.len() as f64
        };

        let timeseries = include_timeseries.then(|| {
            let full = TimeRange {
                from: self.window_start,
                to: self.window_end,
            };
            let days = full.day_count().min(STATS_SERIES_CAP);
            let skip = full.day_count() - days;
            (0..full.day_count())
                .skip(skip)
                .map(|i| {
                    let date = full.day_label(i);
                    let commits = self
                        .commits_by_day
                        .get(&date)
                        .map(|v| v.len() as u64)
                        .unwrap_or(0);
                    let day_prs: Vec<&PullRequest> = self
                        .prs
                        .iter()
                        .filter(|pr| pr.created_at.date_naive() == date)
                        .collect();
                    let merge_times: Vec<i64> = day_prs
                        .iter()
                        .filter_map(|pr| {
                            pr.merged_at
                                .map(|m| (m - pr.created_at).num_seconds().max(0))
                        })
                        .collect();
                    DailyStatRow {
                        event_date: date,
                        commits,
                        pull_requests: day_prs.len() as u64,
                        avg_time_to_merge: if merge_times.is_empty() {
                            0.0
                        } else {
                            merge_times.iter().sum::<i64>() as f64 / merge_times.len() as f64
                        },
                    }
                })
                .collect()
        });

        StatsReport {
            totals: self.entity_counts(),
            by_seniority,
            by_region,
            by_team,
            quality: QualityStats {
                revert_rate: reverted / merged_total,
                hotfix_rate: hotfixed / merged_total,
                avg_ai_ratio,
                avg_survival_30d,
            },
            timeseries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_date_as_utc_midnight() {
        let t = parse_time_bound("2025-06-01").unwrap();
        assert_eq!(t.to_rfc3339(), "2025-06-01T00:00:00+00:00");
    }

    #[test]
    fn parses_rfc3339() {
        let t = parse_time_bound("2025-06-01T12:30:00Z").unwrap();
        assert_eq!(t.date_naive().to_string(), "2025-06-01");
    }

    #[test]
    fn rejects_malformed_dates() {
        for raw in ["junk", "2025-13-01", "01/02/2025"] {
            assert!(matches!(
                parse_time_bound(raw),
                Err(SimError::InvalidParameter(_))
            ));
        }
    }

    #[test]
    fn range_rejects_inverted_bounds() {
        let now = Utc::now();
        let result = TimeRange::resolve(Some("2025-06-02"), Some("2025-06-01"), now);
        assert!(result.is_err());
    }

    #[test]
    fn day_count_covers_partial_days() {
        let from = parse_time_bound("2025-06-01").unwrap();
        let to = parse_time_bound("2025-06-08").unwrap();
        assert_eq!(TimeRange { from, to }.day_count(), 7);

        let to = parse_time_bound("2025-06-08T06:00:00Z").unwrap();
        assert_eq!(TimeRange { from, to }.day_count(), 8);
    }

    #[test]
    fn nearest_rank_is_monotone() {
        let sorted = vec![10, 20, 30, 40, 50, 60, 70, 80, 90, 100];
        let p50 = nearest_rank(&sorted, 50.0);
        let p75 = nearest_rank(&sorted, 75.0);
        let p90 = nearest_rank(&sorted, 90.0);
        assert_eq!(p50, 50);
        assert_eq!(p75, 80);
        assert_eq!(p90, 90);
        assert!(p50 <= p75 && p75 <= p90);
    }

    #[test]
    fn nearest_rank_single_element() {
        assert_eq!(nearest_rank(&[42], 50.0), 42);
        assert_eq!(nearest_rank(&[42], 90.0), 42);
        assert_eq!(nearest_rank(&[], 90.0), 0);
    }

    #[test]
    fn pagination_shape_on_empty() {
        let (data, p) = paginate::<u32>(&[], 1, 100);
        assert!(data.is_empty());
        assert_eq!(p.total_count, 0);
        assert_eq!(p.total_pages, 0);
        assert!(!p.has_next_page);
        assert!(!p.has_previous_page);
    }

    #[test]
    fn pagination_splits_evenly() {
        let items: Vec<u32> = (0..50).collect();
        for page in 1..=5u32 {
            let (data, p) = paginate(&items, page, 10);
            assert_eq!(data.len(), 10);
            assert_eq!(p.total_pages, 5);
            assert_eq!(p.has_next_page, page < 5);
            assert_eq!(p.has_previous_page, page > 1);
        }
        let all: Vec<u32> = (1..=5u32)
            .flat_map(|page| paginate(&items, page, 10).0)
            .collect();
        assert_eq!(all, items);
    }

    #[test]
    fn normalize_clamps_oversized_page_size() {
        let (page, size, clamped) = normalize_page(1, 10_000, 500).unwrap();
        assert_eq!((page, size, clamped), (1, 500, true));
        assert!(normalize_page(0, 10, 500).is_err());
        assert!(normalize_page(1, 0, 500).is_err());
    }
}
