//! Issues: a fraction of merged PRs get a back-dated linked issue closed at
//! merge time, plus a thinner stream of standalone open issues.

use chrono::Duration;
use rand::Rng;

use crate::error::SimResult;
use crate::model::{Issue, IssueLabel, IssueState};
use crate::report::RunWarning;
use crate::store::SnapshotBuilder;

use super::{GenContext, Generator};

const LINKED_ISSUE_P: f64 = 0.40;
const STANDALONE_FRACTION: f64 = 0.10;

const ISSUE_TITLES: &[&str] = &[
    "Intermittent timeout under load",
    "Stale results after cache eviction",
    "Pagination cursor skips a row",
    "Retry storm on 5xx from upstream",
    "Locale fallback renders wrong dates",
    "Memory growth in long-lived workers",
    "Duplicate webhook deliveries",
    "Slow cold start on first request",
];

const LABEL_CHOICES: &[IssueLabel] = &[
    IssueLabel::Bug,
    IssueLabel::Feature,
    IssueLabel::Enhancement,
];

pub struct IssueGenerator;

impl Generator for IssueGenerator {
    fn name(&self) -> &'static str {
        "issues"
    }

    fn run(
        &self,
        builder: &mut SnapshotBuilder,
        ctx: &mut GenContext<'_>,
    ) -> SimResult<Vec<RunWarning>> {
        let merged: Vec<(String, u64, chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>)> =
            builder
                .prs()
                .iter()
                .filter(|pr| pr.created_at >= ctx.gen_start && pr.created_at < ctx.gen_end)
                .filter_map(|pr| {
                    pr.merged_at
                        .map(|m| (pr.repo.clone(), pr.number, pr.created_at, m))
                })
                .collect();

        for (repo, pr_number, pr_created, pr_merged) in &merged {
            ctx.cancel.checkpoint("issue generation")?;
            if !ctx.rng.gen_bool(LINKED_ISSUE_P) {
                continue;
            }
            let lead_days: f64 = ctx.rng.gen_range(1.0..7.0);
            let created_at = *pr_created - Duration::seconds((lead_days * 86_400.0) as i64);
            let number = builder.next_issue_number(repo);
            builder.add_issue(Issue {
                repo: repo.clone(),
                number,
                title: ISSUE_TITLES[ctx.rng.gen_range(0..ISSUE_TITLES.len())].to_string(),
                state: IssueState::Closed,
                labels: draw_labels(ctx),
                created_at,
                closed_at: Some(*pr_merged),
                closing_pr: Some(*pr_number),
            });
        }

        // Standalone open issues, spread over the generation window.
        let standalone = ((merged.len() as f64) * STANDALONE_FRACTION).round() as usize;
        let window_seconds = (ctx.gen_end - ctx.gen_start).num_seconds().max(1);
        let repos: Vec<String> = builder
            .repositories()
            .iter()
            .map(|r| r.name.clone())
            .collect();
        for _ in 0..standalone {
            ctx.cancel.checkpoint("issue generation")?;
            let repo = repos[ctx.rng.gen_range(0..repos.len())].clone();
            let created_at =
                ctx.gen_start + Duration::seconds(ctx.rng.gen_range(0..window_seconds));
            let number = builder.next_issue_number(&repo);
            builder.add_issue(Issue {
                repo,
                number,
                title: ISSUE_TITLES[ctx.rng.gen_range(0..ISSUE_TITLES.len())].to_string(),
                state: IssueState::Open,
                labels: draw_labels(ctx),
                created_at,
                closed_at: None,
                closing_pr: None,
            });
        }

        Ok(Vec::new())
    }
}

fn draw_labels(ctx: &mut GenContext<'_>) -> Vec<IssueLabel> {
    let first = LABEL_CHOICES[ctx.rng.gen_range(0..LABEL_CHOICES.len())];
    if ctx.rng.gen_bool(0.35) {
        let second = LABEL_CHOICES[ctx.rng.gen_range(0..LABEL_CHOICES.len())];
        if second != first {
            return vec![first, second];
        }
    }
    vec![first]
}
