//! Query-layer tests against generated corpora: scans, dense series,
//! pagination envelopes, leaderboards, and the derived metrics.

use chrono::{TimeZone, Utc};
use devpulse_sim::model::Velocity;
use devpulse_sim::query::{CommitFilters, SeriesRows, StreamKind};
use devpulse_sim::{minimal_seed, run_generation, CancelFlag, SimConfig, Snapshot, TimeRange};

fn fixed_now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 30, 12, 0, 0).unwrap()
}

fn corpus(days: u32) -> Snapshot {
    let cfg = SimConfig {
        days,
        rng_seed: Some(42),
        ..Default::default()
    };
    run_generation(&minimal_seed(), &cfg, fixed_now(), None, &CancelFlag::new()).unwrap()
}

fn full_range(snapshot: &Snapshot) -> TimeRange {
    TimeRange {
        from: snapshot.window_start,
        to: snapshot.window_end,
    }
}

#[test]
fn small_default_run_has_commit_volume() {
    let snapshot = corpus(7);
    let result = snapshot
        .scan_commits(full_range(&snapshot), CommitFilters::default(), 1, 100)
        .unwrap();
    assert!(
        result.pagination.total_count >= 14,
        "7-day run produced only {} commits",
        result.pagination.total_count
    );
    for commit in &result.data {
        assert!(
            commit.author_email == "alice@example.com"
                || commit.author_email == "bob@example.com"
        );
    }
}

#[test]
fn scan_filters_by_author_and_repo() {
    let snapshot = corpus(14);
    let range = full_range(&snapshot);
    let alice_only = snapshot
        .scan_commits(
            range,
            CommitFilters {
                author: Some("alice@example.com"),
                repo: None,
            },
            1,
            500,
        )
        .unwrap();
    assert!(alice_only.pagination.total_count > 0);
    assert!(alice_only
        .data
        .iter()
        .all(|c| c.author_email == "alice@example.com"));

    let repo = snapshot.repositories()[0].name.clone();
    let one_repo = snapshot
        .scan_commits(
            range,
            CommitFilters {
                author: None,
                repo: Some(&repo),
            },
            1,
            500,
        )
        .unwrap();
    assert!(one_repo.data.iter().all(|c| c.repo == repo));
}

#[test]
fn scan_pages_concatenate_to_whole_result() {
    let snapshot = corpus(14);
    let range = full_range(&snapshot);
    let whole = snapshot
        .scan_commits(range, CommitFilters::default(), 1, 500)
        .unwrap();
    let total = whole.pagination.total_count;

    let page_size = 10u32;
    let mut collected = Vec::new();
    let mut page = 1u32;
    loop {
        let chunk = snapshot
            .scan_commits(range, CommitFilters::default(), page, page_size)
            .unwrap();
        assert_eq!(
            chunk.pagination.total_pages,
            (total + u64::from(page_size) - 1) / u64::from(page_size)
        );
        if chunk.data.is_empty() {
            break;
        }
        collected.extend(chunk.data);
        if !chunk.pagination.has_next_page {
            break;
        }
        page += 1;
    }
    assert_eq!(collected.len() as u64, total);
    let whole_hashes: Vec<_> = whole.data.iter().map(|c| &c.hash).collect();
    let collected_hashes: Vec<_> = collected.iter().map(|c| &c.hash).collect();
    assert_eq!(whole_hashes, collected_hashes);
}

#[test]
fn capped_run_pages_evenly() {
    let cfg = SimConfig {
        days: 30,
        velocity: Velocity::High,
        max_commits: 50,
        rng_seed: Some(42),
        ..Default::default()
    };
    let snapshot =
        run_generation(&minimal_seed(), &cfg, fixed_now(), None, &CancelFlag::new()).unwrap();
    let range = full_range(&snapshot);
    let mut sizes = Vec::new();
    for page in 1..=5u32 {
        let chunk = snapshot
            .scan_commits(range, CommitFilters::default(), page, 10)
            .unwrap();
        assert_eq!(chunk.pagination.total_count, 50);
        sizes.push(chunk.data.len());
    }
    assert_eq!(sizes, vec![10, 10, 10, 10, 10]);
}

#[test]
fn dau_series_is_dense_and_keyed_date() {
    let snapshot = corpus(7);
    let rows = snapshot
        .team_daily_series(StreamKind::Dau, full_range(&snapshot), None)
        .unwrap();
    assert_eq!(rows.len(), 7);
    let SeriesRows::Dau(rows) = rows else {
        panic!("dau stream returns dau rows");
    };
    for row in &rows {
        assert!(row.active_users <= row.total_users);
        let json = serde_json::to_value(row).unwrap();
        assert!(json.get("date").is_some());
        assert!(json.get("event_date").is_none());
    }
}

#[test]
fn commit_series_uses_event_date_and_zero_fills() {
    let snapshot = corpus(7);
    let rows = snapshot
        .team_daily_series(StreamKind::Commits, full_range(&snapshot), None)
        .unwrap();
    let SeriesRows::Commits(rows) = rows else {
        panic!("commits stream returns commit rows");
    };
    assert_eq!(rows.len(), 7);
    let json = serde_json::to_value(&rows[0]).unwrap();
    assert!(json.get("event_date").is_some());
    assert!(json.get("date").is_none());

    let total: u64 = rows.iter().map(|r| r.commits).sum();
    assert_eq!(total, snapshot.commits().len() as u64);
}

#[test]
fn series_outside_activity_window_is_all_zeros() {
    let snapshot = corpus(7);
    let range = TimeRange {
        from: snapshot.window_start - chrono::Duration::days(10),
        to: snapshot.window_start - chrono::Duration::days(3),
    };
    let SeriesRows::Commits(rows) =
        snapshot.team_daily_series(StreamKind::Commits, range, None).unwrap()
    else {
        panic!("commits stream returns commit rows");
    };
    assert_eq!(rows.len(), 7);
    assert!(rows.iter().all(|r| r.commits == 0));
}

#[test]
fn by_user_series_lists_every_developer() {
    let cfg = SimConfig {
        days: 7,
        developers: 5,
        rng_seed: Some(42),
        ..Default::default()
    };
    let snapshot =
        run_generation(&minimal_seed(), &cfg, fixed_now(), None, &CancelFlag::new()).unwrap();
    let page = snapshot
        .by_user_series(StreamKind::Tabs, full_range(&snapshot), 1, 100)
        .unwrap();
    assert_eq!(page.total_users, 5);
    assert_eq!(page.data.len(), 5);
    let emails: Vec<&String> = page.data.keys().collect();
    let mut sorted = emails.clone();
    sorted.sort();
    assert_eq!(emails, sorted, "by-user pages are ordered by email");
    for rows in page.data.values() {
        assert_eq!(rows.len(), 7, "per-user series stays dense");
    }
}

#[test]
fn by_user_rejects_team_only_stream() {
    let snapshot = corpus(7);
    let err = snapshot
        .by_user_series(StreamKind::Dau, full_range(&snapshot), 1, 100)
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_parameter");
}

#[test]
fn leaderboard_ranks_and_tiebreaks() {
    let snapshot = corpus(90);
    let boards = snapshot.leaderboard(full_range(&snapshot), 1, 5).unwrap();

    for list in [&boards.tab_leaderboard, &boards.agent_leaderboard] {
        assert!(list.data.len() <= 5);
        for (i, entry) in list.data.iter().enumerate() {
            assert_eq!(entry.rank, i as u64 + 1);
            assert!(entry.total_lines_accepted <= entry.total_lines_suggested);
            assert!((0.0..=1.0).contains(&entry.line_acceptance_ratio));
        }
        for pair in list.data.windows(2) {
            assert!(pair[0].total_lines_accepted >= pair[1].total_lines_accepted);
            if pair[0].total_lines_accepted == pair[1].total_lines_accepted {
                assert!(pair[0].email < pair[1].email);
            }
        }
    }
    for entry in &boards.tab_leaderboard.data {
        assert!(entry.accept_ratio.is_some());
        assert!(entry.favorite_model.is_none());
    }
    for entry in &boards.agent_leaderboard.data {
        assert!(entry.accept_ratio.is_none());
    }
}

#[test]
fn cycle_time_percentiles_are_ordered() {
    let snapshot = corpus(30);
    let metrics = snapshot.cycle_time_metrics(full_range(&snapshot));
    assert!(metrics.total_prs_analyzed >= 1);
    assert!(metrics.avg_time_to_merge >= 0.0);
    assert!(metrics.p50_time_to_merge <= metrics.p75_time_to_merge);
    assert!(metrics.p75_time_to_merge <= metrics.p90_time_to_merge);
    assert_eq!(metrics.median_time_to_merge, metrics.p50_time_to_merge);

    let json = serde_json::to_value(&metrics).unwrap();
    assert!(json.get("totalPRsAnalyzed").is_some());
    assert!(json.get("avgTimeToMerge").is_some());
    assert!(json.get("p50TimeToMerge").is_some());
}

#[test]
fn review_rates_sum_to_one() {
    let snapshot = corpus(30);
    let metrics = snapshot.review_quality_metrics(full_range(&snapshot));
    assert!(metrics.total_reviews > 0);
    let sum = metrics.approval_rate + metrics.changes_requested_rate + metrics.pending_rate;
    assert!((sum - 1.0).abs() < 1e-9, "rates sum to {}", sum);
    assert!(metrics.avg_reviewers_per_pr >= 1.0);
}

#[test]
fn empty_window_returns_valid_envelope() {
    let snapshot = corpus(7);
    let range = TimeRange {
        from: snapshot.window_end + chrono::Duration::days(10),
        to: snapshot.window_end + chrono::Duration::days(20),
    };
    let result = snapshot
        .scan_commits(range, CommitFilters::default(), 1, 100)
        .unwrap();
    assert!(result.data.is_empty());
    assert_eq!(result.pagination.total_count, 0);
    assert_eq!(result.pagination.total_pages, 0);
    assert_eq!(result.pagination.page, 1);
    assert!(!result.pagination.has_next_page);
    assert!(!result.pagination.has_previous_page);
}

#[test]
fn page_size_clamp_is_echoed() {
    let snapshot = corpus(7);
    let result = snapshot
        .scan_commits(full_range(&snapshot), CommitFilters::default(), 1, 9_999)
        .unwrap();
    assert_eq!(result.pagination.page_size, 500);
    assert_eq!(result.params["page_size_clamped"], serde_json::json!(true));
}

#[test]
fn stats_histograms_cover_roster() {
    let snapshot = corpus(14);
    let stats = snapshot.stats(true);
    let seniority_total: u64 = stats.by_seniority.values().sum();
    assert_eq!(seniority_total, snapshot.developers().len() as u64);
    let team_total: u64 = stats.by_team.values().sum();
    assert_eq!(team_total, snapshot.developers().len() as u64);
    assert!(stats.quality.avg_ai_ratio > 0.0);
    let series = stats.timeseries.expect("requested timeseries");
    assert_eq!(series.len(), 14);
    assert!(series.len() <= 365);

    let without = snapshot.stats(false);
    assert!(without.timeseries.is_none());
}

#[test]
fn pr_and_issue_lists_filter() {
    let snapshot = corpus(30);
    let merged = snapshot
        .pr_list(Some(devpulse_sim::model::PrState::Merged), None, None, 1, 100)
        .unwrap();
    assert!(merged
        .data
        .iter()
        .all(|pr| pr.state == devpulse_sim::model::PrState::Merged));

    let author_prs = snapshot
        .pr_list(None, Some("alice@example.com"), None, 1, 100)
        .unwrap();
    assert!(author_prs
        .data
        .iter()
        .all(|pr| pr.author_email == "alice@example.com"));

    let bugs = snapshot
        .issue_list(None, Some(&[devpulse_sim::model::IssueLabel::Bug]), 1, 100)
        .unwrap();
    assert!(bugs
        .data
        .iter()
        .all(|i| i.labels.contains(&devpulse_sim::model::IssueLabel::Bug)));
}

#[test]
fn review_list_for_unknown_pr_is_not_found() {
    let snapshot = corpus(7);
    let err = snapshot
        .review_list(Some(("nope", 999)), None, 1, 100)
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
}
