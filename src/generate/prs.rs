//! Grouping of the commit stream into pull requests.
//!
//! A session is a maximal run of commits by one author on one non-primary
//! branch with no inter-commit gap over four hours; each session becomes
//! one PR. Commits are annotated with their PR key at creation time of the
//! PR, so the back-reference is by value and ownership stays acyclic.

use std::collections::BTreeMap;

use chrono::Duration;
use rand::Rng;

use crate::error::SimResult;
use crate::model::{PrKey, PrState, PullRequest};
use crate::report::RunWarning;
use crate::sampling;
use crate::store::SnapshotBuilder;

use super::commits::SESSION_GAP_HOURS;
use super::{GenContext, Generator};

const MEAN_OPEN_DELAY_MINUTES: f64 = 30.0;

pub struct PrGenerator;

impl Generator for PrGenerator {
    fn name(&self) -> &'static str {
        "pull_requests"
    }

    fn run(
        &self,
        builder: &mut SnapshotBuilder,
        ctx: &mut GenContext<'_>,
    ) -> SimResult<Vec<RunWarning>> {
        // Group new commits by (repo, author, head branch). BTreeMap keeps
        // the grouping order stable regardless of insert order.
        let mut groups: BTreeMap<(String, String, String), Vec<usize>> = BTreeMap::new();
        for (idx, commit) in builder.commits().iter().enumerate() {
            if commit.is_primary_branch || commit.pr.is_some() {
                continue;
            }
            if commit.timestamp < ctx.gen_start || commit.timestamp >= ctx.gen_end {
                continue;
            }
            groups
                .entry((
                    commit.repo.clone(),
                    commit.author_id.clone(),
                    commit.branch.clone(),
                ))
                .or_default()
                .push(idx);
        }

        // Split each group into sessions, then order sessions by start time
        // so PR numbers track creation order within each repo.
        let mut sessions: Vec<Vec<usize>> = Vec::new();
        for (_, mut indices) in groups {
            indices.sort_by(|a, b| {
                let (ca, cb) = (&builder.commits()[*a], &builder.commits()[*b]);
                ca.timestamp.cmp(&cb.timestamp).then_with(|| ca.hash.cmp(&cb.hash))
            });
            let mut current: Vec<usize> = Vec::new();
            for idx in indices {
                let ts = builder.commits()[idx].timestamp;
                let gap_exceeded = current
                    .last()
                    .map(|prev| {
                        ts - builder.commits()[*prev].timestamp
                            > Duration::hours(SESSION_GAP_HOURS)
                    })
                    .unwrap_or(false);
                if gap_exceeded && !current.is_empty() {
                    sessions.push(std::mem::take(&mut current));
                }
                current.push(idx);
            }
            if !current.is_empty() {
                sessions.push(current);
            }
        }
        sessions.sort_by(|a, b| {
            let (ca, cb) = (&builder.commits()[a[0]], &builder.commits()[b[0]]);
            ca.repo
                .cmp(&cb.repo)
                .then_with(|| ca.timestamp.cmp(&cb.timestamp))
                .then_with(|| ca.hash.cmp(&cb.hash))
        });

        for session in sessions {
            ctx.cancel.checkpoint("pr generation")?;
            self.emit_pr(builder, ctx, &session)?;
        }

        Ok(Vec::new())
    }
}

impl PrGenerator {
    fn emit_pr(
        &self,
        builder: &mut SnapshotBuilder,
        ctx: &mut GenContext<'_>,
        member_indices: &[usize],
    ) -> SimResult<()> {
        let first = &builder.commits()[member_indices[0]];
        let last = &builder.commits()[*member_indices.last().unwrap()];
        let repo = first.repo.clone();
        let author_id = first.author_id.clone();
        let author_email = first.author_email.clone();
        let head_branch = first.branch.clone();
        let first_ts = first.timestamp;
        let last_ts = last.timestamp;
        let title = title_case(&first.message);

        let base_branch = builder
            .repositories()
            .iter()
            .find(|r| r.name == repo)
            .map(|r| r.primary_branch.clone())
            .unwrap_or_else(|| "main".to_string());

        let open_delay_minutes = sampling::exponential(ctx.rng, 1.0 / MEAN_OPEN_DELAY_MINUTES);
        let created_at = first_ts + Duration::seconds((open_delay_minutes * 60.0) as i64);

        let state_draw: f64 = ctx.rng.gen_range(0.0..1.0);
        let state = if state_draw < 0.85 {
            PrState::Merged
        } else if state_draw < 0.95 {
            PrState::Closed
        } else {
            PrState::Open
        };

        let (merged_at, closed_at) = match state {
            PrState::Merged => {
                let days: f64 = ctx.rng.gen_range(1.0..7.0);
                let at = created_at + Duration::seconds((days * 86_400.0) as i64);
                (Some(at.max(last_ts)), None)
            }
            PrState::Closed => {
                let days: f64 = ctx.rng.gen_range(1.0..14.0);
                let at = created_at + Duration::seconds((days * 86_400.0) as i64);
                (None, Some(at.max(last_ts)))
            }
            PrState::Open => (None, None),
        };

        let mut additions = 0u64;
        let mut deletions = 0u64;
        let mut tab_lines = 0u64;
        let mut composer_lines = 0u64;
        let mut file_count = 0u32;
        let mut commit_hashes = Vec::with_capacity(member_indices.len());
        for idx in member_indices {
            let c = &builder.commits()[*idx];
            additions += c.added.total();
            deletions += c.deleted.total();
            tab_lines += c.added.tab;
            composer_lines += c.added.composer;
            file_count += c.files_touched;
            commit_hashes.push(c.hash.clone());
        }

        let number = builder.next_pr_number(&repo);
        let key = PrKey {
            repo: repo.clone(),
            number,
        };
        for idx in member_indices {
            builder.commits_mut()[*idx].pr = Some(key.clone());
        }

        builder.add_pr(PullRequest {
            repo,
            number,
            title,
            author_id,
            author_email,
            base_branch,
            head_branch,
            state,
            created_at,
            merged_at,
            closed_at,
            additions,
            deletions,
            tab_lines,
            composer_lines,
            commit_count: member_indices.len() as u32,
            file_count,
            commit_hashes,
            was_reverted: false,
            required_hotfix: false,
            hotfix_pr: None,
            hotfix_of: None,
            synthetic: false,
        });
        Ok(())
    }
}

fn title_case(message: &str) -> String {
    let mut chars = message.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_case_capitalizes_first_char() {
        assert_eq!(title_case("fix cache layer"), "Fix cache layer");
        assert_eq!(title_case(""), "");
    }
}
