//! Async service facade.
//!
//! `AnalyticsApi` is the authoritative interface the HTTP collaborator
//! consumes; `SimulatorService` is its in-process implementation. Reads
//! clone the current snapshot handle and stay lock-free for the request
//! lifetime; admin mutations build a replacement snapshot out-of-band and
//! publish it atomically. Dropping a read future is cancellation: nothing
//! here mutates store state on the read path.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{SeedFormat, SimConfig};
use crate::error::{SimError, SimResult};
use crate::export::{ExportProgress, SurveyExportManager};
use crate::generate::{run_generation, CancelFlag};
use crate::model::{
    Commit, Developer, IssueLabel, IssueState, LegalAiEvent, OfficeAppActivity, PrState,
    PullRequest, Review, Velocity,
};
use crate::query::{
    ByUserPage, CommitFilters, CycleTimeMetrics, Leaderboards, Paginated, ReviewQualityMetrics,
    SeriesRows, StatsReport, StreamKind, TimeRange, DEFAULT_PAGE_SIZE,
};
use crate::report::RunReport;
use crate::seed::SeedData;
use crate::store::{AnalyticsStore, Snapshot};

const DEFAULT_REGENERATE_DEADLINE_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegenerateMode {
    /// Clear everything and re-run all generators.
    Override,
    /// Extend the window to now and add on top of the existing corpus.
    Append,
}

impl FromStr for RegenerateMode {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "override" => Ok(RegenerateMode::Override),
            "append" => Ok(RegenerateMode::Append),
            other => Err(SimError::InvalidParameter(format!(
                "unknown regenerate mode '{}'",
                other
            ))),
        }
    }
}

/// Config deltas accepted by an admin regenerate. Unset fields keep the
/// current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegenerateParams {
    pub days: Option<u32>,
    pub velocity: Option<Velocity>,
    pub developers: Option<u32>,
    pub max_commits: Option<u32>,
    pub rng_seed: Option<u64>,
    pub deadline_ms: Option<u64>,
}

/// The surface the core exposes to the HTTP collaborator. Raw string
/// parameters are parsed and validated here so the transport layer stays a
/// thin mapping of routes onto these calls.
#[async_trait]
pub trait AnalyticsApi: Send + Sync {
    async fn scan_commits(
        &self,
        from: Option<&str>,
        to: Option<&str>,
        author: Option<&str>,
        repo: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> SimResult<Paginated<Commit>>;

    async fn team_daily_series(
        &self,
        stream: &str,
        from: Option<&str>,
        to: Option<&str>,
        user: Option<&str>,
    ) -> SimResult<SeriesRows>;

    async fn by_user_series(
        &self,
        stream: &str,
        from: Option<&str>,
        to: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> SimResult<ByUserPage>;

    async fn leaderboard(
        &self,
        from: Option<&str>,
        to: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> SimResult<Leaderboards>;

    async fn pr_list(
        &self,
        status: Option<&str>,
        author: Option<&str>,
        from: Option<&str>,
        to: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> SimResult<Paginated<PullRequest>>;

    async fn review_list(
        &self,
        pr: Option<(&str, u64)>,
        reviewer: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> SimResult<Paginated<Review>>;

    async fn issue_list(
        &self,
        state: Option<&str>,
        labels: Option<&[&str]>,
        page: u32,
        page_size: u32,
    ) -> SimResult<Paginated<crate::model::Issue>>;

    async fn cycle_time_metrics(
        &self,
        from: Option<&str>,
        to: Option<&str>,
    ) -> SimResult<CycleTimeMetrics>;

    async fn review_quality_metrics(
        &self,
        from: Option<&str>,
        to: Option<&str>,
    ) -> SimResult<ReviewQualityMetrics>;

    async fn team_members(&self) -> SimResult<Vec<Developer>>;

    async fn stats(&self, include_timeseries: bool) -> SimResult<StatsReport>;

    async fn legal_ai_events(&self, page: u32, page_size: u32)
        -> SimResult<Paginated<LegalAiEvent>>;

    async fn office_activity(&self) -> SimResult<Vec<OfficeAppActivity>>;

    async fn research_commit_export(
        &self,
        from: Option<&str>,
        to: Option<&str>,
    ) -> SimResult<String>;

    async fn start_survey_export(&self) -> SimResult<ExportProgress>;

    async fn poll_survey_export(&self, progress_id: &str) -> SimResult<ExportProgress>;

    async fn fetch_survey_bundle(&self, file_id: &str) -> SimResult<Vec<u8>>;

    async fn regenerate(
        &self,
        mode: RegenerateMode,
        params: RegenerateParams,
    ) -> SimResult<RunReport>;

    async fn replace_seed(
        &self,
        payload: &str,
        format_hint: Option<SeedFormat>,
    ) -> SimResult<RunReport>;

    async fn current_config(&self) -> SimConfig;

    async fn seed_presets(&self) -> Vec<(String, SeedData)>;
}

struct ServiceState {
    seed: SeedData,
    config: SimConfig,
}

pub struct SimulatorService {
    store: AnalyticsStore,
    state: tokio::sync::RwLock<ServiceState>,
    exports: SurveyExportManager,
    regenerating: AtomicBool,
}

impl SimulatorService {
    /// Validate both inputs, run the pipeline once, and publish snapshot v1
    /// before any read is served.
    pub async fn bootstrap(seed: SeedData, config: SimConfig) -> SimResult<Self> {
        seed.validate()?;
        config.validate()?;
        let now = Utc::now();
        let snapshot = Self::generate_blocking(seed.clone(), config.clone(), now, None).await?;
        Ok(SimulatorService {
            store: AnalyticsStore::new(snapshot),
            state: tokio::sync::RwLock::new(ServiceState { seed, config }),
            exports: SurveyExportManager::new(),
            regenerating: AtomicBool::new(false),
        })
    }

    pub async fn snapshot(&self) -> Arc<Snapshot> {
        self.store.snapshot().await
    }

    /// Run the CPU-bound pipeline off the async workers, with cooperative
    /// cancellation on deadline.
    async fn generate_blocking(
        seed: SeedData,
        config: SimConfig,
        now: chrono::DateTime<Utc>,
        previous: Option<Arc<Snapshot>>,
    ) -> SimResult<Snapshot> {
        let cancel = CancelFlag::new();
        let worker_cancel = cancel.clone();
        let handle = tokio::task::spawn_blocking(move || {
            run_generation(&seed, &config, now, previous.as_deref(), &worker_cancel)
        });
        match handle.await {
            Ok(result) => result,
            Err(join_err) => Err(SimError::Internal(format!(
                "generation worker panicked: {}",
                join_err
            ))),
        }
    }

    async fn generate_with_deadline(
        seed: SeedData,
        config: SimConfig,
        now: chrono::DateTime<Utc>,
        previous: Option<Arc<Snapshot>>,
        deadline: StdDuration,
    ) -> SimResult<Snapshot> {
        let cancel = CancelFlag::new();
        let worker_cancel = cancel.clone();
        let handle = tokio::task::spawn_blocking(move || {
            run_generation(&seed, &config, now, previous.as_deref(), &worker_cancel)
        });
        match tokio::time::timeout(deadline, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(SimError::Internal(format!(
                "generation worker panicked: {}",
                join_err
            ))),
            Err(_) => {
                // Let the worker unwind at its next checkpoint; the old
                // snapshot stays live.
                cancel.cancel();
                Err(SimError::Cancelled(format!(
                    "regenerate exceeded its {}ms deadline",
                    deadline.as_millis()
                )))
            }
        }
    }

    fn resolve_range(from: Option<&str>, to: Option<&str>) -> SimResult<TimeRange> {
        TimeRange::resolve(from, to, Utc::now())
    }

    fn effective_page_size(page_size: u32) -> u32 {
        if page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size
        }
    }
}

/// Exclusive-regenerate guard; the flag is released on drop so an aborted
/// run never wedges the admin surface.
struct RegenerateGuard<'a>(&'a AtomicBool);

impl<'a> RegenerateGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> SimResult<Self> {
        if flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SimError::Conflict(
                "a regenerate is already in progress".to_string(),
            ));
        }
        Ok(RegenerateGuard(flag))
    }
}

impl Drop for RegenerateGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl AnalyticsApi for SimulatorService {
    async fn scan_commits(
        &self,
        from: Option<&str>,
        to: Option<&str>,
        author: Option<&str>,
        repo: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> SimResult<Paginated<Commit>> {
        let range = Self::resolve_range(from, to)?;
        let snapshot = self.snapshot().await;
        snapshot.scan_commits(
            range,
            CommitFilters { author, repo },
            page,
            Self::effective_page_size(page_size),
        )
    }

    async fn team_daily_series(
        &self,
        stream: &str,
        from: Option<&str>,
        to: Option<&str>,
        user: Option<&str>,
    ) -> SimResult<SeriesRows> {
        let kind = StreamKind::from_str(stream)?;
        let range = Self::resolve_range(from, to)?;
        let snapshot = self.snapshot().await;
        snapshot.team_daily_series(kind, range, user)
    }

    async fn by_user_series(
        &self,
        stream: &str,
        from: Option<&str>,
        to: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> SimResult<ByUserPage> {
        let kind = StreamKind::from_str(stream)?;
        let range = Self::resolve_range(from, to)?;
        let snapshot = self.snapshot().await;
        snapshot.by_user_series(kind, range, page, Self::effective_page_size(page_size))
    }

    async fn leaderboard(
        &self,
        from: Option<&str>,
        to: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> SimResult<Leaderboards> {
        let range = Self::resolve_range(from, to)?;
        let snapshot = self.snapshot().await;
        snapshot.leaderboard(range, page, Self::effective_page_size(page_size))
    }

    async fn pr_list(
        &self,
        status: Option<&str>,
        author: Option<&str>,
        from: Option<&str>,
        to: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> SimResult<Paginated<PullRequest>> {
        let status = status
            .map(|s| PrState::from_str(s).map_err(SimError::InvalidParameter))
            .transpose()?;
        let range = match (from, to) {
            (None, None) => None,
            _ => Some(Self::resolve_range(from, to)?),
        };
        let snapshot = self.snapshot().await;
        snapshot.pr_list(
            status,
            author,
            range,
            page,
            Self::effective_page_size(page_size),
        )
    }

    async fn review_list(
        &self,
        pr: Option<(&str, u64)>,
        reviewer: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> SimResult<Paginated<Review>> {
        let snapshot = self.snapshot().await;
        snapshot.review_list(pr, reviewer, page, Self::effective_page_size(page_size))
    }

    async fn issue_list(
        &self,
        state: Option<&str>,
        labels: Option<&[&str]>,
        page: u32,
        page_size: u32,
    ) -> SimResult<Paginated<crate::model::Issue>> {
        let state = state
            .map(|s| match s {
                "open" => Ok(IssueState::Open),
                "closed" => Ok(IssueState::Closed),
                other => Err(SimError::InvalidParameter(format!(
                    "unknown issue state '{}'",
                    other
                ))),
            })
            .transpose()?;
        let labels = labels
            .map(|raw| {
                raw.iter()
                    .map(|l| IssueLabel::from_str(l).map_err(SimError::InvalidParameter))
                    .collect::<SimResult<Vec<_>>>()
            })
            .transpose()?;
        let snapshot = self.snapshot().await;
        snapshot.issue_list(
            state,
            labels.as_deref(),
            page,
            Self::effective_page_size(page_size),
        )
    }

    async fn cycle_time_metrics(
        &self,
        from: Option<&str>,
        to: Option<&str>,
    ) -> SimResult<CycleTimeMetrics> {
        let range = Self::resolve_range(from, to)?;
        let snapshot = self.snapshot().await;
        Ok(snapshot.cycle_time_metrics(range))
    }

    async fn review_quality_metrics(
        &self,
        from: Option<&str>,
        to: Option<&str>,
    ) -> SimResult<ReviewQualityMetrics> {
        let range = Self::resolve_range(from, to)?;
        let snapshot = self.snapshot().await;
        Ok(snapshot.review_quality_metrics(range))
    }

    async fn team_members(&self) -> SimResult<Vec<Developer>> {
        let snapshot = self.snapshot().await;
        let mut members = snapshot.developers().to_vec();
        members.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(members)
    }

    async fn stats(&self, include_timeseries: bool) -> SimResult<StatsReport> {
        let snapshot = self.snapshot().await;
        Ok(snapshot.stats(include_timeseries))
    }

    async fn legal_ai_events(
        &self,
        page: u32,
        page_size: u32,
    ) -> SimResult<Paginated<LegalAiEvent>> {
        let snapshot = self.snapshot().await;
        if !snapshot.third_party.legal_ai {
            return Err(SimError::NotFound(
                "legal-ai telemetry is not enabled for this seed".to_string(),
            ));
        }
        snapshot.legal_ai_list(page, Self::effective_page_size(page_size))
    }

    async fn office_activity(&self) -> SimResult<Vec<OfficeAppActivity>> {
        let snapshot = self.snapshot().await;
        if !snapshot.third_party.office_suite {
            return Err(SimError::NotFound(
                "office-suite telemetry is not enabled for this seed".to_string(),
            ));
        }
        Ok(snapshot.office_activity_rows().to_vec())
    }

    async fn research_commit_export(
        &self,
        from: Option<&str>,
        to: Option<&str>,
    ) -> SimResult<String> {
        let range = Self::resolve_range(from, to)?;
        let snapshot = self.snapshot().await;
        crate::export::research_commit_csv(&snapshot, range)
    }

    async fn start_survey_export(&self) -> SimResult<ExportProgress> {
        let snapshot = self.snapshot().await;
        self.exports.start(&snapshot).await
    }

    async fn poll_survey_export(&self, progress_id: &str) -> SimResult<ExportProgress> {
        self.exports.poll(progress_id).await
    }

    async fn fetch_survey_bundle(&self, file_id: &str) -> SimResult<Vec<u8>> {
        self.exports.fetch(file_id).await
    }

    async fn regenerate(
        &self,
        mode: RegenerateMode,
        params: RegenerateParams,
    ) -> SimResult<RunReport> {
        let _guard = RegenerateGuard::acquire(&self.regenerating)?;

        let (seed, config) = {
            let state = self.state.read().await;
            let mut config = state.config.clone();
            if let Some(days) = params.days {
                config.days = days;
            }
            if let Some(velocity) = params.velocity {
                config.velocity = velocity;
            }
            if let Some(developers) = params.developers {
                config.developers = developers;
            }
            if let Some(max_commits) = params.max_commits {
                config.max_commits = max_commits;
            }
            if let Some(rng_seed) = params.rng_seed {
                config.rng_seed = Some(rng_seed);
            }
            config.validate()?;
            (state.seed.clone(), config)
        };

        let deadline =
            StdDuration::from_millis(params.deadline_ms.unwrap_or(DEFAULT_REGENERATE_DEADLINE_MS));
        let previous = match mode {
            RegenerateMode::Override => None,
            RegenerateMode::Append => Some(self.snapshot().await),
        };
        let now = Utc::now();
        let snapshot =
            Self::generate_with_deadline(seed, config.clone(), now, previous, deadline).await?;
        let report = snapshot
            .report
            .clone()
            .ok_or_else(|| SimError::Internal("snapshot missing run report".to_string()))?;

        let published = self.store.publish(snapshot).await;
        self.state.write().await.config = config;
        info!(
            version = published.version,
            mode = ?mode,
            "regenerate published"
        );
        Ok(report)
    }

    async fn replace_seed(
        &self,
        payload: &str,
        format_hint: Option<SeedFormat>,
    ) -> SimResult<RunReport> {
        let seed = SeedData::parse(payload, format_hint)?;
        let _guard = RegenerateGuard::acquire(&self.regenerating)?;

        let config = self.state.read().await.config.clone();
        let deadline = StdDuration::from_millis(DEFAULT_REGENERATE_DEADLINE_MS);
        let snapshot =
            Self::generate_with_deadline(seed.clone(), config, Utc::now(), None, deadline).await?;
        let report = snapshot
            .report
            .clone()
            .ok_or_else(|| SimError::Internal("snapshot missing run report".to_string()))?;

        // The uploaded seed becomes current only once its corpus is live.
        let published = self.store.publish(snapshot).await;
        self.state.write().await.seed = seed;
        info!(version = published.version, "seed replaced");
        Ok(report)
    }

    async fn current_config(&self) -> SimConfig {
        self.state.read().await.config.clone()
    }

    async fn seed_presets(&self) -> Vec<(String, SeedData)> {
        crate::seed::presets()
            .into_iter()
            .map(|(name, seed)| (name.to_string(), seed))
            .collect()
    }
}
