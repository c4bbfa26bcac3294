//! Quality outcome overlay: revert and hotfix marking correlated with AI
//! ratio and author seniority, plus commit-level code-survival estimates.
//!
//! The overlay is single-pass. Synthetic follow-up PRs inserted here are
//! never themselves eligible for marking.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use crate::error::SimResult;
use crate::model::{
    AiRatioBand, Commit, LineDelta, PrKey, PrState, PullRequest, Seniority, SurvivalRates,
};
use crate::report::RunWarning;
use crate::store::SnapshotBuilder;

use super::{GenContext, Generator};

const HOTFIX_WINDOW_HOURS: i64 = 48;

pub struct QualityOverlay;

impl Generator for QualityOverlay {
    fn name(&self) -> &'static str {
        "quality_overlay"
    }

    fn run(
        &self,
        builder: &mut SnapshotBuilder,
        ctx: &mut GenContext<'_>,
    ) -> SimResult<Vec<RunWarning>> {
        let seniority_of: BTreeMap<String, Seniority> = builder
            .developers()
            .iter()
            .map(|d| (d.id.clone(), d.seniority))
            .collect();

        let correlations = ctx.seed.correlations.clone();

        // Phase 1: revert + hotfix decisions over this run's merged PRs.
        struct Candidate {
            index: usize,
            repo: String,
            number: u64,
            author_id: String,
            band: AiRatioBand,
            merged_at: DateTime<Utc>,
        }
        let candidates: Vec<Candidate> = builder
            .prs()
            .iter()
            .enumerate()
            .filter(|(_, pr)| !pr.synthetic && pr.state == PrState::Merged)
            .filter(|(_, pr)| pr.created_at >= ctx.gen_start && pr.created_at < ctx.gen_end)
            .map(|(index, pr)| Candidate {
                index,
                repo: pr.repo.clone(),
                number: pr.number,
                author_id: pr.author_id.clone(),
                band: AiRatioBand::from_ratio(pr.ai_ratio()),
                merged_at: pr.merged_at.expect("merged PR has merged_at"),
            })
            .collect();

        let mut used_followups: HashSet<(String, u64)> = HashSet::new();
        for candidate in candidates {
            ctx.cancel.checkpoint("quality overlay")?;

            let base = match candidate.band {
                AiRatioBand::Low => correlations.revert_rate_low_ai,
                AiRatioBand::Medium => correlations.revert_rate_medium_ai,
                AiRatioBand::High => correlations.revert_rate_high_ai,
            };
            let adjustment = seniority_of
                .get(&candidate.author_id)
                .map(|s| s.revert_adjustment())
                .unwrap_or(1.0);
            let revert_p = (base * adjustment).clamp(0.0, 1.0);
            if ctx.rng.gen_bool(revert_p) {
                builder.prs_mut()[candidate.index].was_reverted = true;
            }

            // A follow-up must fit inside the generation window; PRs whose
            // 48-hour hotfix horizon extends past it are never flagged.
            if candidate.merged_at + Duration::hours(HOTFIX_WINDOW_HOURS) > ctx.gen_end {
                continue;
            }

            let hotfix_p = if candidate.band == AiRatioBand::High {
                correlations.required_hotfix_rate * correlations.hotfix_high_ai_uplift
            } else {
                correlations.required_hotfix_rate
            }
            .clamp(0.0, 1.0);
            if !ctx.rng.gen_bool(hotfix_p) {
                continue;
            }

            // A hotfix means a follow-up merged PR by the same author within
            // 48 hours. Reuse a real one when it exists, otherwise insert a
            // small synthetic patch PR.
            let deadline = candidate.merged_at + Duration::hours(HOTFIX_WINDOW_HOURS);
            let existing = builder.prs().iter().position(|pr| {
                pr.state == PrState::Merged
                    && pr.repo == candidate.repo
                    && pr.author_id == candidate.author_id
                    && pr.number != candidate.number
                    && pr.created_at > candidate.merged_at
                    && pr.created_at <= deadline
                    && !used_followups.contains(&(pr.repo.clone(), pr.number))
            });

            let follow_number = match existing {
                Some(pos) => {
                    let number = builder.prs()[pos].number;
                    builder.prs_mut()[pos].hotfix_of = Some(candidate.number);
                    number
                }
                None => self.insert_synthetic_followup(builder, ctx, &candidate.repo,
                    &candidate.author_id, candidate.number, candidate.merged_at)?,
            };
            used_followups.insert((candidate.repo.clone(), follow_number));
            let original = &mut builder.prs_mut()[candidate.index];
            original.required_hotfix = true;
            original.hotfix_pr = Some(follow_number);
        }

        // Phase 2: commit-level survival from the retention curve, keyed by
        // AI band and nudged by author seniority. Deterministic, no draws.
        let retention = move |band: AiRatioBand| match band {
            AiRatioBand::Low => correlations.retention_30d_low_ai,
            AiRatioBand::Medium => correlations.retention_30d_medium_ai,
            AiRatioBand::High => correlations.retention_30d_high_ai,
        };
        for commit in builder.commits_mut() {
            if commit.survival.is_some() {
                continue;
            }
            let nudge = match seniority_of.get(&commit.author_id) {
                Some(Seniority::Senior) => 0.02,
                Some(Seniority::Junior) => -0.02,
                _ => 0.0,
            };
            let day30 = (retention(AiRatioBand::from_ratio(commit.ai_ratio())) + nudge)
                .clamp(0.0, 1.0);
            commit.survival = Some(SurvivalRates {
                day7: day30.powf(7.0 / 30.0),
                day14: day30.powf(14.0 / 30.0),
                day30,
            });
        }

        Ok(Vec::new())
    }
}

impl QualityOverlay {
    /// Insert a small merged patch PR (and its single commit) right after
    /// the flagged PR. Returns the new PR number.
    fn insert_synthetic_followup(
        &self,
        builder: &mut SnapshotBuilder,
        ctx: &mut GenContext<'_>,
        repo: &str,
        author_id: &str,
        flagged_number: u64,
        flagged_merged_at: DateTime<Utc>,
    ) -> SimResult<u64> {
        let author = builder
            .developers()
            .iter()
            .find(|d| d.id == author_id)
            .cloned()
            .ok_or_else(|| {
                crate::error::SimError::Internal(format!("unknown author '{}'", author_id))
            })?;
        let base_branch = builder
            .repositories()
            .iter()
            .find(|r| r.name == repo)
            .map(|r| r.primary_branch.clone())
            .unwrap_or_else(|| "main".to_string());

        let commit_at = flagged_merged_at + Duration::minutes(ctx.rng.gen_range(120..=1440));
        let created_at = commit_at + Duration::minutes(ctx.rng.gen_range(5..=30));
        let merged_at = created_at + Duration::minutes(ctx.rng.gen_range(30..=360));

        let number = builder.next_pr_number(repo);
        let head_branch = format!("{}/hotfix-{}", author.id, number);
        let key = PrKey {
            repo: repo.to_string(),
            number,
        };

        let total: u64 = ctx.rng.gen_range(5..=50);
        let added = LineDelta {
            tab: 0,
            composer: 0,
            non_ai: total,
        };
        let counter = builder.commits().len() as u64 + 1;
        let commit = Commit {
            hash: super::commits::commit_hash(&author.id, commit_at, counter),
            author_id: author.id.clone(),
            author_email: author.email.clone(),
            author_name: author.name.clone(),
            repo: repo.to_string(),
            branch: head_branch.clone(),
            is_primary_branch: false,
            timestamp: commit_at,
            message: format!("Fix regression from #{}", flagged_number),
            added,
            deleted: LineDelta::default(),
            files_touched: 1,
            pr: Some(key),
            survival: None,
        };
        let hash = commit.hash.clone();
        builder.add_commit(commit);

        builder.add_pr(PullRequest {
            repo: repo.to_string(),
            number,
            title: format!("Hotfix for #{}", flagged_number),
            author_id: author.id.clone(),
            author_email: author.email.clone(),
            base_branch,
            head_branch,
            state: PrState::Merged,
            created_at,
            merged_at: Some(merged_at),
            closed_at: None,
            additions: total,
            deletions: 0,
            tab_lines: 0,
            composer_lines: 0,
            commit_count: 1,
            file_count: 1,
            commit_hashes: vec![hash],
            was_reverted: false,
            required_hotfix: false,
            hotfix_pr: None,
            hotfix_of: Some(flagged_number),
            synthetic: true,
        });
        Ok(number)
    }
}
