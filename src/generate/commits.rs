//! Commit stream generation: Poisson arrivals inside each developer's
//! working-hours band, lognormal sizing, and a beta-distributed AI mix
//! around the developer's acceptance rate.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::error::SimResult;
use crate::model::{Commit, Developer, LineDelta, Repository};
use crate::report::{RunWarning, WarningKind};
use crate::sampling;
use crate::store::SnapshotBuilder;

use super::{GenContext, Generator};

/// Average commits per pull request assumed by the rate and sizing models.
const COMMITS_PER_TYPICAL_PR: f64 = 2.0;

/// Probability a commit lands directly on the primary branch.
const PRIMARY_BRANCH_P: f64 = 0.15;

/// Gap after which a developer's next commit starts a new session.
pub(crate) const SESSION_GAP_HOURS: i64 = 4;

const ACTIONS: &[&str] = &[
    "Add", "Fix", "Refactor", "Update", "Remove", "Optimize", "Document", "Test",
];

const COMPONENTS: &[&str] = &[
    "auth flow",
    "billing pipeline",
    "search index",
    "cache layer",
    "api client",
    "webhook handler",
    "migration scripts",
    "telemetry",
    "rate limiter",
    "config loader",
];

const MESSAGE_SUFFIXES: &[&str] = &["", " edge cases", " error handling", " performance", " cleanup"];

/// Fixed-offset resolution for the timezones the seeds use. Returns minutes
/// east of UTC; None means unknown (callers fall back to UTC and warn).
pub fn utc_offset_minutes(timezone: &str) -> Option<i32> {
    match timezone {
        "UTC" | "Etc/UTC" => Some(0),
        "America/Los_Angeles" => Some(-8 * 60),
        "America/Denver" => Some(-7 * 60),
        "America/Chicago" => Some(-6 * 60),
        "America/New_York" => Some(-5 * 60),
        "America/Sao_Paulo" => Some(-3 * 60),
        "Europe/London" => Some(0),
        "Europe/Berlin" | "Europe/Paris" | "Europe/Madrid" => Some(60),
        "Europe/Helsinki" | "Europe/Kyiv" => Some(2 * 60),
        "Asia/Kolkata" => Some(5 * 60 + 30),
        "Asia/Singapore" => Some(8 * 60),
        "Asia/Tokyo" => Some(9 * 60),
        "Australia/Sydney" => Some(10 * 60),
        _ => None,
    }
}

/// Stable 40-hex commit hash from identity, timestamp, and a running
/// counter. SHA-256 truncated to git-hash width.
pub(crate) fn commit_hash(developer_id: &str, timestamp: DateTime<Utc>, counter: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(developer_id.as_bytes());
    hasher.update(b":");
    hasher.update(timestamp.to_rfc3339().as_bytes());
    hasher.update(b":");
    hasher.update(counter.to_be_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..40].to_string()
}

fn slug(component: &str) -> String {
    component.replace(' ', "-")
}

/// Open feature-branch session for one (developer, repo) pair.
struct Session {
    branch: String,
    action: &'static str,
    component: &'static str,
}

struct DevState {
    commits_emitted: u32,
    last_commit_at: Option<DateTime<Utc>>,
    branch_counter: u32,
    sessions: HashMap<String, Session>,
}

pub struct CommitGenerator;

impl Generator for CommitGenerator {
    fn name(&self) -> &'static str {
        "commits"
    }

    fn run(
        &self,
        builder: &mut SnapshotBuilder,
        ctx: &mut GenContext<'_>,
    ) -> SimResult<Vec<RunWarning>> {
        let mut warnings = Vec::new();
        let mut developers: Vec<Developer> = builder.developers().to_vec();
        developers.sort_by(|a, b| a.id.cmp(&b.id));
        let repositories: Vec<Repository> = builder.repositories().to_vec();

        // max_commits is a corpus-wide budget, split fairly across the
        // roster; earlier ids (sorted order) absorb the remainder.
        let per_dev_cap: Vec<Option<u32>> = if ctx.config.max_commits == 0 {
            vec![None; developers.len()]
        } else {
            let n = developers.len() as u32;
            let base = ctx.config.max_commits / n.max(1);
            let remainder = ctx.config.max_commits % n.max(1);
            (0..developers.len())
                .map(|i| Some(base + u32::from((i as u32) < remainder)))
                .collect()
        };

        let mut hash_counter: u64 = builder.commits().len() as u64;
        let velocity_mult = ctx.config.velocity.multiplier();

        for (dev_idx, dev) in developers.iter().enumerate() {
            ctx.cancel.checkpoint("commit generation")?;

            let offset_minutes = match utc_offset_minutes(&dev.timezone) {
                Some(m) => m,
                None => {
                    warnings.push(RunWarning {
                        kind: WarningKind::UnknownTimezone,
                        generator: self.name().to_string(),
                        developer_id: Some(dev.id.clone()),
                        message: format!(
                            "unknown timezone '{}', falling back to UTC",
                            dev.timezone
                        ),
                    });
                    0
                }
            };

            let lambda_day = (dev.pr_behavior.prs_per_week * COMMITS_PER_TYPICAL_PR / 7.0)
                * velocity_mult
                * dev.activity_level.multiplier();
            if lambda_day <= f64::EPSILON {
                warnings.push(RunWarning {
                    kind: WarningKind::ZeroRate,
                    generator: self.name().to_string(),
                    developer_id: Some(dev.id.clone()),
                    message: "effective commit rate is zero, skipping developer".to_string(),
                });
                continue;
            }

            let band_hours = f64::from(dev.work_end_hour - dev.work_start_hour);
            let rate_per_hour = lambda_day / band_hours;
            let cap = per_dev_cap[dev_idx];

            let mut state = DevState {
                commits_emitted: 0,
                last_commit_at: None,
                branch_counter: 0,
                sessions: HashMap::new(),
            };

            let mut day = ctx.gen_start.date_naive();
            let last_day = (ctx.gen_end - Duration::seconds(1)).date_naive();
            while day <= last_day {
                ctx.cancel.checkpoint("commit generation")?;
                if cap.map(|c| state.commits_emitted >= c).unwrap_or(false) {
                    break;
                }
                self.generate_day(
                    builder,
                    ctx,
                    dev,
                    &repositories,
                    day,
                    offset_minutes,
                    rate_per_hour,
                    band_hours,
                    cap,
                    &mut state,
                    &mut hash_counter,
                )?;
                day = match day.succ_opt() {
                    Some(d) => d,
                    None => break,
                };
            }

            if state.commits_emitted == 0 {
                warnings.push(RunWarning {
                    kind: WarningKind::Saturation,
                    generator: self.name().to_string(),
                    developer_id: Some(dev.id.clone()),
                    message: "no commits produced over the whole window".to_string(),
                });
            }
        }

        Ok(warnings)
    }
}

impl CommitGenerator {
    #[allow(clippy::too_many_arguments)]
    fn generate_day(
        &self,
        builder: &mut SnapshotBuilder,
        ctx: &mut GenContext<'_>,
        dev: &Developer,
        repositories: &[Repository],
        day: NaiveDate,
        offset_minutes: i32,
        rate_per_hour: f64,
        band_hours: f64,
        cap: Option<u32>,
        state: &mut DevState,
        hash_counter: &mut u64,
    ) -> SimResult<()> {
        // Local working-hours band start, expressed in UTC.
        let band_start = day
            .and_hms_opt(u32::from(dev.work_start_hour), 0, 0)
            .expect("hour validated at seed time")
            .and_utc()
            - Duration::minutes(i64::from(offset_minutes));

        let mut cursor_hours = 0.0f64;
        loop {
            ctx.cancel.checkpoint("commit generation")?;
            if cap.map(|c| state.commits_emitted >= c).unwrap_or(false) {
                return Ok(());
            }
            cursor_hours += sampling::exponential(ctx.rng, rate_per_hour);
            if cursor_hours >= band_hours {
                return Ok(());
            }
            let timestamp = band_start + Duration::seconds((cursor_hours * 3600.0) as i64);
            // Arrivals near the window edges land outside [gen_start,
            // gen_end); the draw still advances the stream.
            if timestamp < ctx.gen_start || timestamp >= ctx.gen_end {
                continue;
            }

            let commit = self.synthesize_commit(ctx, dev, repositories, timestamp, state, hash_counter);
            state.commits_emitted += 1;
            state.last_commit_at = Some(timestamp);
            builder.add_commit(commit);
        }
    }

    fn synthesize_commit(
        &self,
        ctx: &mut GenContext<'_>,
        dev: &Developer,
        repositories: &[Repository],
        timestamp: DateTime<Utc>,
        state: &mut DevState,
        hash_counter: &mut u64,
    ) -> Commit {
        let avg_commit_loc =
            f64::from(dev.pr_behavior.avg_pr_size_loc.max(1)) / COMMITS_PER_TYPICAL_PR;
        let total_added = sampling::lognormal(ctx.rng, avg_commit_loc.ln(), 0.5)
            .round()
            .clamp(1.0, 5000.0) as u64;
        let total_deleted = ctx.rng.gen_range(0..=((total_added as f64 * 0.4) as u64));

        // AI share, tightened with seniority. Juniors swing wider.
        let concentration = match dev.seniority {
            crate::model::Seniority::Junior => 4.0,
            crate::model::Seniority::Mid => 8.0,
            crate::model::Seniority::Senior => 12.0,
        };
        let ai_ratio = sampling::beta_around(ctx.rng, dev.acceptance_rate, concentration);
        let tab_share = ctx.rng.gen_range(0.6..0.8);

        let added = split_lines(total_added, ai_ratio, tab_share);
        let deleted = split_lines(total_deleted, ai_ratio, tab_share);

        // Repo choice: stick with the session's repo when one is open,
        // otherwise pick among the repos the developer's team owns.
        let stale = state
            .last_commit_at
            .map(|t| timestamp - t > Duration::hours(SESSION_GAP_HOURS))
            .unwrap_or(true);

        let on_primary = ctx.rng.gen_bool(PRIMARY_BRANCH_P);
        let repo = self.pick_repo(ctx, dev, repositories, state, stale);

        let (branch, is_primary, action, component) = if on_primary {
            let repo_obj = repositories
                .iter()
                .find(|r| r.name == repo)
                .expect("repo chosen from this list");
            let action = ACTIONS[ctx.rng.gen_range(0..ACTIONS.len())];
            let component = COMPONENTS[ctx.rng.gen_range(0..COMPONENTS.len())];
            (repo_obj.primary_branch.clone(), true, action, component)
        } else {
            if stale {
                state.sessions.clear();
            }
            if !state.sessions.contains_key(&repo) {
                state.branch_counter += 1;
                let action = ACTIONS[ctx.rng.gen_range(0..ACTIONS.len())];
                let component = COMPONENTS[ctx.rng.gen_range(0..COMPONENTS.len())];
                let branch = format!("{}/{}-{}", dev.id, slug(component), state.branch_counter);
                state.sessions.insert(
                    repo.clone(),
                    Session {
                        branch,
                        action,
                        component,
                    },
                );
            }
            let session = &state.sessions[&repo];
            (session.branch.clone(), false, session.action, session.component)
        };

        let suffix = MESSAGE_SUFFIXES[ctx.rng.gen_range(0..MESSAGE_SUFFIXES.len())];
        let message = format!("{} {}{}", action, component, suffix);

        *hash_counter += 1;
        Commit {
            hash: commit_hash(&dev.id, timestamp, *hash_counter),
            author_id: dev.id.clone(),
            author_email: dev.email.clone(),
            author_name: dev.name.clone(),
            repo,
            branch,
            is_primary_branch: is_primary,
            timestamp,
            message,
            added,
            deleted,
            files_touched: ctx.rng.gen_range(1..=5),
            pr: None,
            survival: None,
        }
    }

    fn pick_repo(
        &self,
        ctx: &mut GenContext<'_>,
        dev: &Developer,
        repositories: &[Repository],
        state: &DevState,
        stale: bool,
    ) -> String {
        // Continue an open session when the gap allows it.
        if !stale {
            if let Some(repo) = state.sessions.keys().min() {
                return repo.clone();
            }
        }
        let owned: Vec<&Repository> = repositories
            .iter()
            .filter(|r| r.owning_teams.contains(&dev.team))
            .collect();
        if owned.is_empty() {
            let idx = ctx.rng.gen_range(0..repositories.len());
            repositories[idx].name.clone()
        } else {
            let idx = ctx.rng.gen_range(0..owned.len());
            owned[idx].name.clone()
        }
    }
}

/// Split a line total into (tab, composer, non-AI) parts that sum exactly.
fn split_lines(total: u64, ai_ratio: f64, tab_share: f64) -> LineDelta {
    let ai = ((total as f64) * ai_ratio).round() as u64;
    let ai = ai.min(total);
    let tab = ((ai as f64) * tab_share).round() as u64;
    let tab = tab.min(ai);
    LineDelta {
        tab,
        composer: ai - tab,
        non_ai: total - ai,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_preserves_total() {
        for total in [0u64, 1, 17, 5000] {
            let d = split_lines(total, 0.37, 0.7);
            assert_eq!(d.tab + d.composer + d.non_ai, total);
        }
    }

    #[test]
    fn hash_is_40_hex_and_stable() {
        let ts = chrono::Utc::now();
        let a = commit_hash("alice", ts, 7);
        let b = commit_hash("alice", ts, 7);
        assert_eq!(a, b);
        assert_eq!(a.len(), 40);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, commit_hash("alice", ts, 8));
    }

    #[test]
    fn known_timezones_resolve() {
        assert_eq!(utc_offset_minutes("UTC"), Some(0));
        assert_eq!(utc_offset_minutes("America/Los_Angeles"), Some(-480));
        assert_eq!(utc_offset_minutes("Asia/Kolkata"), Some(330));
        assert_eq!(utc_offset_minutes("Mars/Olympus_Mons"), None);
    }
}
