//! Review events: one to three reviewers per terminal PR, drawn from the
//! repo's owning teams with a same-team preference.

use chrono::Duration;
use rand::Rng;

use crate::error::SimResult;
use crate::model::{Developer, PrState, Review, ReviewComment, ReviewState};
use crate::report::RunWarning;
use crate::store::SnapshotBuilder;

use super::{GenContext, Generator};

const SAME_TEAM_P: f64 = 0.7;

const COMMENT_BODIES: &[&str] = &[
    "Can we pull this into a helper? It shows up twice now.",
    "Missing a guard for the empty case here.",
    "Nit: this name shadows the field above.",
    "Looks good overall, one question about the retry path.",
    "This will allocate per call. Worth hoisting?",
    "Please add a test covering the boundary day.",
    "The early return skips the cleanup below.",
    "Prefer the builder here so defaults stay in one place.",
    "Why the clone? The borrow should be fine.",
    "Does this hold when the window is empty?",
];

pub struct ReviewGenerator;

impl Generator for ReviewGenerator {
    fn name(&self) -> &'static str {
        "reviews"
    }

    fn run(
        &self,
        builder: &mut SnapshotBuilder,
        ctx: &mut GenContext<'_>,
    ) -> SimResult<Vec<RunWarning>> {
        let mut developers: Vec<Developer> = builder.developers().to_vec();
        developers.sort_by(|a, b| a.id.cmp(&b.id));

        let repo_teams: std::collections::HashMap<String, Vec<String>> = builder
            .repositories()
            .iter()
            .map(|r| (r.name.clone(), r.owning_teams.clone()))
            .collect();

        // Only PRs created by this run get reviews; existing ones already
        // have theirs from the run that created them.
        let prs: Vec<(String, u64, String, PrState, chrono::DateTime<chrono::Utc>, Option<chrono::DateTime<chrono::Utc>>)> =
            builder
                .prs()
                .iter()
                .filter(|pr| pr.created_at >= ctx.gen_start && pr.created_at < ctx.gen_end)
                .map(|pr| {
                    (
                        pr.repo.clone(),
                        pr.number,
                        pr.author_id.clone(),
                        pr.state,
                        pr.created_at,
                        pr.resolved_at(),
                    )
                })
                .collect();

        for (repo, number, author_id, state, created_at, resolved_at) in prs {
            ctx.cancel.checkpoint("review generation")?;

            let author_team = developers
                .iter()
                .find(|d| d.id == author_id)
                .map(|d| d.team.clone())
                .unwrap_or_default();
            let teams = repo_teams.get(&repo).cloned().unwrap_or_default();

            let mut pool: Vec<&Developer> = developers
                .iter()
                .filter(|d| d.id != author_id)
                .filter(|d| teams.is_empty() || teams.contains(&d.team))
                .collect();
            if pool.is_empty() {
                // Tiny orgs: fall back to anyone but the author.
                pool = developers.iter().filter(|d| d.id != author_id).collect();
            }
            if pool.is_empty() {
                continue;
            }

            let draw: f64 = ctx.rng.gen_range(0.0..1.0);
            let reviewer_count = if draw < 0.25 {
                1
            } else if draw < 0.75 {
                2
            } else {
                3
            };
            let reviewer_count = reviewer_count.min(pool.len());

            let mut chosen: Vec<&Developer> = Vec::with_capacity(reviewer_count);
            for _ in 0..reviewer_count {
                let same_team: Vec<usize> = pool
                    .iter()
                    .enumerate()
                    .filter(|(_, d)| d.team == author_team)
                    .map(|(i, _)| i)
                    .collect();
                let pick = if !same_team.is_empty() && ctx.rng.gen_bool(SAME_TEAM_P) {
                    same_team[ctx.rng.gen_range(0..same_team.len())]
                } else {
                    ctx.rng.gen_range(0..pool.len())
                };
                chosen.push(pool.remove(pick));
            }

            for reviewer in chosen {
                let review = self.synthesize_review(
                    ctx,
                    &repo,
                    number,
                    reviewer,
                    state,
                    created_at,
                    resolved_at,
                );
                builder.add_review(review);
            }
        }

        Ok(Vec::new())
    }
}

impl ReviewGenerator {
    #[allow(clippy::too_many_arguments)]
    fn synthesize_review(
        &self,
        ctx: &mut GenContext<'_>,
        repo: &str,
        pr_number: u64,
        reviewer: &Developer,
        pr_state: PrState,
        created_at: chrono::DateTime<chrono::Utc>,
        resolved_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Review {
        // Open PRs only accumulate pending reviews.
        let state = if pr_state == PrState::Open || resolved_at.is_none() {
            ReviewState::Pending
        } else {
            let draw: f64 = ctx.rng.gen_range(0.0..1.0);
            if draw < 0.70 {
                ReviewState::Approved
            } else if draw < 0.90 {
                ReviewState::ChangesRequested
            } else {
                ReviewState::Pending
            }
        };

        let submitted_at = match (state, resolved_at) {
            (ReviewState::Pending, _) | (_, None) => None,
            (_, Some(end)) => {
                let span = (end - created_at).num_seconds().max(1);
                Some(created_at + Duration::seconds(ctx.rng.gen_range(0..span)))
            }
        };

        let comment_count = match state {
            ReviewState::Approved => ctx.rng.gen_range(0..=2),
            ReviewState::ChangesRequested => ctx.rng.gen_range(1..=5),
            ReviewState::Pending => 0,
        };
        let posted_at = submitted_at.unwrap_or(created_at);
        let comments = (0..comment_count)
            .map(|_| ReviewComment {
                body: COMMENT_BODIES[ctx.rng.gen_range(0..COMMENT_BODIES.len())].to_string(),
                posted_at,
            })
            .collect();

        Review {
            repo: repo.to_string(),
            pr_number,
            reviewer_id: reviewer.id.clone(),
            reviewer_email: reviewer.email.clone(),
            state,
            comments,
            submitted_at,
        }
    }
}
