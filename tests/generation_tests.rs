//! Pipeline-level tests: determinism under a fixed seed, cross-entity
//! invariants, replication, caps, and the quality overlay.

use chrono::{TimeZone, Utc};
use devpulse_sim::model::{PrState, ReviewState, Velocity};
use devpulse_sim::{minimal_seed, run_generation, CancelFlag, SimConfig};

fn fixed_now() -> chrono::DateTime<Utc> {
    // Opt-in pipeline logs: RUST_LOG=devpulse_sim=info cargo test
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    Utc.with_ymd_and_hms(2025, 6, 30, 12, 0, 0).unwrap()
}

fn config(days: u32) -> SimConfig {
    SimConfig {
        days,
        rng_seed: Some(42),
        ..Default::default()
    }
}

#[test]
fn same_seed_same_corpus() {
    let seed = minimal_seed();
    let cfg = config(30);
    let a = run_generation(&seed, &cfg, fixed_now(), None, &CancelFlag::new()).unwrap();
    let b = run_generation(&seed, &cfg, fixed_now(), None, &CancelFlag::new()).unwrap();

    assert_eq!(a.entity_counts(), b.entity_counts());
    let hashes_a: Vec<&str> = a.commits().iter().take(100).map(|c| c.hash.as_str()).collect();
    let hashes_b: Vec<&str> = b.commits().iter().take(100).map(|c| c.hash.as_str()).collect();
    assert_eq!(hashes_a, hashes_b);
}

#[test]
fn different_rng_seed_diverges() {
    let seed = minimal_seed();
    let a = run_generation(&seed, &config(30), fixed_now(), None, &CancelFlag::new()).unwrap();
    let cfg_b = SimConfig {
        rng_seed: Some(43),
        ..config(30)
    };
    let b = run_generation(&seed, &cfg_b, fixed_now(), None, &CancelFlag::new()).unwrap();
    let hashes_a: Vec<&str> = a.commits().iter().take(20).map(|c| c.hash.as_str()).collect();
    let hashes_b: Vec<&str> = b.commits().iter().take(20).map(|c| c.hash.as_str()).collect();
    assert_ne!(hashes_a, hashes_b);
}

#[test]
fn commit_line_splits_hold() {
    let snapshot =
        run_generation(&minimal_seed(), &config(30), fixed_now(), None, &CancelFlag::new())
            .unwrap();
    assert!(!snapshot.commits().is_empty());
    for commit in snapshot.commits() {
        assert_eq!(
            commit.added.total(),
            commit.added.tab + commit.added.composer + commit.added.non_ai
        );
        assert_eq!(
            commit.deleted.total(),
            commit.deleted.tab + commit.deleted.composer + commit.deleted.non_ai
        );
        let ratio = commit.ai_ratio();
        assert!((0.0..=1.0).contains(&ratio));
        assert_eq!(commit.hash.len(), 40);
    }
}

#[test]
fn pr_invariants_hold() {
    let snapshot =
        run_generation(&minimal_seed(), &config(60), fixed_now(), None, &CancelFlag::new())
            .unwrap();
    assert!(!snapshot.pull_requests().is_empty());

    let mut last_number: std::collections::HashMap<&str, u64> = Default::default();
    for pr in snapshot.pull_requests() {
        assert!(pr.tab_lines + pr.composer_lines <= pr.additions);
        if let Some(merged_at) = pr.merged_at {
            assert!(merged_at >= pr.created_at);
            for hash in &pr.commit_hashes {
                let commit = snapshot
                    .commits()
                    .iter()
                    .find(|c| &c.hash == hash)
                    .expect("member commit exists");
                assert!(commit.timestamp <= merged_at);
                assert_eq!(commit.author_id, pr.author_id);
                assert_eq!(commit.repo, pr.repo);
                assert_eq!(commit.branch, pr.head_branch);
            }
        }
        if let Some(closed_at) = pr.closed_at {
            assert!(closed_at >= pr.created_at);
        }
        // Monotone numbering within each repo, in index order.
        let last = last_number.entry(pr.repo.as_str()).or_insert(0);
        assert!(pr.number > *last);
        *last = pr.number;
    }
}

#[test]
fn reviews_never_self_review() {
    let snapshot =
        run_generation(&minimal_seed(), &config(60), fixed_now(), None, &CancelFlag::new())
            .unwrap();
    let mut seen_any = false;
    for pr in snapshot.pull_requests() {
        let author = &pr.author_id;
        for review in snapshot.reviews_for(&pr.repo, pr.number) {
            seen_any = true;
            assert_ne!(&review.reviewer_id, author);
            match review.state {
                ReviewState::Pending => assert!(review.submitted_at.is_none()),
                _ => {
                    let at = review.submitted_at.expect("submitted review has timestamp");
                    assert!(at >= pr.created_at);
                    if let Some(end) = pr.merged_at.or(pr.closed_at) {
                        assert!(at <= end);
                    }
                    if review.state == ReviewState::ChangesRequested {
                        assert!(!review.comments.is_empty());
                    }
                }
            }
            assert!(review.comments.len() <= 5);
        }
    }
    assert!(seen_any, "no reviews generated over 60 days");
}

#[test]
fn issues_close_after_creation() {
    let snapshot =
        run_generation(&minimal_seed(), &config(60), fixed_now(), None, &CancelFlag::new())
            .unwrap();
    for issue in snapshot.issues() {
        assert!(!issue.labels.is_empty() && issue.labels.len() <= 2);
        if let Some(closed_at) = issue.closed_at {
            assert!(closed_at >= issue.created_at);
            assert!(issue.closing_pr.is_some());
        }
    }
}

#[test]
fn replication_produces_requested_headcount() {
    let cfg = SimConfig {
        developers: 5,
        ..config(7)
    };
    let snapshot =
        run_generation(&minimal_seed(), &cfg, fixed_now(), None, &CancelFlag::new()).unwrap();
    assert_eq!(snapshot.developers().len(), 5);
    let ids: std::collections::HashSet<_> =
        snapshot.developers().iter().map(|d| &d.id).collect();
    let emails: std::collections::HashSet<_> =
        snapshot.developers().iter().map(|d| &d.email).collect();
    assert_eq!(ids.len(), 5);
    assert_eq!(emails.len(), 5);
    assert!(snapshot.developer_by_email("alice@example.com").is_some());
    assert!(snapshot.developer_by_email("bob@example.com").is_some());
    let clones = snapshot
        .developers()
        .iter()
        .filter(|d| d.email.contains("+clone"))
        .count();
    assert_eq!(clones, 3);
}

#[test]
fn max_commits_caps_the_corpus() {
    let cfg = SimConfig {
        days: 30,
        velocity: Velocity::High,
        max_commits: 50,
        rng_seed: Some(42),
        ..Default::default()
    };
    let snapshot =
        run_generation(&minimal_seed(), &cfg, fixed_now(), None, &CancelFlag::new()).unwrap();
    assert_eq!(snapshot.commits().len(), 50);
}

#[test]
fn zero_rate_developer_warns_instead_of_failing() {
    let mut seed = minimal_seed();
    seed.developers[1].prs_per_week = 0.0;
    let snapshot =
        run_generation(&seed, &config(7), fixed_now(), None, &CancelFlag::new()).unwrap();
    let report = snapshot.report.as_ref().expect("report attached");
    assert!(report
        .warnings
        .iter()
        .any(|w| w.developer_id.as_deref() == Some("bob")));
    assert!(snapshot
        .commits()
        .iter()
        .all(|c| c.author_id != "bob"));
}

#[test]
fn cancelled_flag_aborts_generation() {
    let cancel = CancelFlag::new();
    cancel.cancel();
    let err = run_generation(&minimal_seed(), &config(30), fixed_now(), None, &cancel)
        .unwrap_err();
    assert_eq!(err.kind(), "cancelled");
}

#[test]
fn hotfix_followups_are_linked_and_single_pass() {
    let cfg = SimConfig {
        velocity: Velocity::High,
        ..config(90)
    };
    let snapshot =
        run_generation(&minimal_seed(), &cfg, fixed_now(), None, &CancelFlag::new()).unwrap();

    let flagged: Vec<_> = snapshot
        .pull_requests()
        .iter()
        .filter(|pr| pr.required_hotfix)
        .collect();
    assert!(!flagged.is_empty(), "expected hotfix flags over 90 days");
    for pr in flagged {
        let follow_number = pr.hotfix_pr.expect("flagged PR links its follow-up");
        let follow = snapshot
            .pull_request(&pr.repo, follow_number)
            .expect("follow-up exists");
        assert_eq!(follow.state, PrState::Merged);
        assert_eq!(follow.author_id, pr.author_id);
        assert_eq!(follow.hotfix_of, Some(pr.number));
        let deadline = pr.merged_at.unwrap() + chrono::Duration::hours(48);
        assert!(follow.created_at <= deadline);
    }
    // Overlay is single-pass: synthetic patches carry no flags of their own.
    for pr in snapshot.pull_requests().iter().filter(|pr| pr.synthetic) {
        assert!(!pr.required_hotfix);
        assert!(!pr.was_reverted);
    }
}

#[test]
fn survival_rates_decay_with_horizon() {
    let snapshot =
        run_generation(&minimal_seed(), &config(30), fixed_now(), None, &CancelFlag::new())
            .unwrap();
    for commit in snapshot.commits() {
        let survival = commit.survival.expect("overlay fills survival");
        assert!(survival.day7 >= survival.day14);
        assert!(survival.day14 >= survival.day30);
        assert!((0.0..=1.0).contains(&survival.day30));
    }
}

#[test]
fn replay_mode_is_rejected() {
    let cfg = SimConfig {
        mode: devpulse_sim::Mode::Replay,
        ..config(7)
    };
    let err =
        run_generation(&minimal_seed(), &cfg, fixed_now(), None, &CancelFlag::new()).unwrap_err();
    assert_eq!(err.kind(), "invalid_config");
}
