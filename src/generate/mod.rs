//! The generation pipeline.
//!
//! Generators run strictly sequentially in a declared order, sharing one
//! deterministic RNG stream. Each generator iterates its entities in a
//! stable order (developers by id, days ascending) before any draw, so a
//! run is a pure function of (seed, config, rng_seed, window).

mod aux;
mod commits;
mod issues;
mod prs;
mod quality;
mod reviews;

pub use commits::utc_offset_minutes;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::config::{Mode, SimConfig};
use crate::error::{SimError, SimResult};
use crate::report::{RunReport, RunWarning};
use crate::seed::{replicate_developers, SeedData};
use crate::store::{Snapshot, SnapshotBuilder};

/// Cooperative cancellation signal, checked at commit granularity inside
/// generators and between pipeline phases.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub(crate) fn checkpoint(&self, at: &str) -> SimResult<()> {
        if self.is_cancelled() {
            Err(SimError::Cancelled(format!("generation aborted at {}", at)))
        } else {
            Ok(())
        }
    }
}

/// Shared state handed down the pipeline. The RNG is owned by whichever
/// generator holds the context at a given step; handoff is implicit in the
/// sequential schedule.
pub struct GenContext<'a> {
    pub rng: &'a mut StdRng,
    pub seed: &'a SeedData,
    pub config: &'a SimConfig,
    pub cancel: &'a CancelFlag,
    /// Region of time this run generates into. For append runs this is the
    /// extension only; the builder's full window is wider.
    pub gen_start: DateTime<Utc>,
    pub gen_end: DateTime<Utc>,
}

/// One phase of the pipeline. Implementations push entities into the
/// builder and report recovered degeneracies as warnings.
pub trait Generator {
    fn name(&self) -> &'static str;

    fn run(
        &self,
        builder: &mut SnapshotBuilder,
        ctx: &mut GenContext<'_>,
    ) -> SimResult<Vec<RunWarning>>;
}

/// Fixed-order generator list. Disabled auxiliary sources are simply
/// absent from the list.
fn standard_pipeline(seed: &SeedData) -> Vec<Box<dyn Generator>> {
    let mut pipeline: Vec<Box<dyn Generator>> = vec![
        Box::new(commits::CommitGenerator),
        Box::new(prs::PrGenerator),
        Box::new(reviews::ReviewGenerator),
        Box::new(issues::IssueGenerator),
        Box::new(aux::ModelUsageGenerator),
        Box::new(aux::ClientVersionGenerator),
        Box::new(aux::FileExtensionGenerator),
        Box::new(aux::FeatureUsageGenerator),
    ];
    if seed.third_party.legal_ai {
        pipeline.push(Box::new(aux::LegalAiGenerator));
    }
    if seed.third_party.office_suite {
        pipeline.push(Box::new(aux::OfficeSuiteGenerator));
    }
    if seed.third_party.survey {
        pipeline.push(Box::new(aux::SurveyGenerator));
    }
    pipeline.push(Box::new(quality::QualityOverlay));
    pipeline
}

/// Run the whole pipeline and freeze a snapshot. `now` is captured once by
/// the caller and threaded through; nothing in here reads the wall clock
/// for simulation time.
pub fn run_generation(
    seed: &SeedData,
    config: &SimConfig,
    now: DateTime<Utc>,
    previous: Option<&Snapshot>,
    cancel: &CancelFlag,
) -> SimResult<Snapshot> {
    if config.mode == Mode::Replay {
        return Err(SimError::InvalidConfig(
            "replay mode is not available in this build".to_string(),
        ));
    }
    seed.validate()?;
    config.validate()?;

    let started = Instant::now();
    let started_at = Utc::now();
    let rng_seed = config.effective_rng_seed();
    let mut rng = StdRng::seed_from_u64(rng_seed);

    let (mut builder, gen_start, gen_end, before_counts) = match previous {
        Some(prev) => {
            let gen_start = prev.window_end;
            let gen_end = now.max(gen_start);
            (
                SnapshotBuilder::from_snapshot(prev, gen_end),
                gen_start,
                gen_end,
                prev.entity_counts(),
            )
        }
        None => {
            // The window covers the trailing N calendar days including
            // today, so daily buckets line up with the dense-series rows.
            let window_start = (now - Duration::days(i64::from(config.effective_days()) - 1))
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .expect("midnight is always valid")
                .and_utc();
            let developers = replicate_developers(seed, config.developers, &mut rng);
            let repositories = seed.repositories();
            (
                SnapshotBuilder::new(
                    developers,
                    repositories,
                    seed.third_party.clone(),
                    window_start,
                    now,
                ),
                window_start,
                now,
                Default::default(),
            )
        }
    };

    let mut ctx = GenContext {
        rng: &mut rng,
        seed,
        config,
        cancel,
        gen_start,
        gen_end,
    };

    let mut warnings: Vec<RunWarning> = Vec::new();
    for generator in standard_pipeline(seed) {
        cancel.checkpoint(generator.name())?;
        info!(generator = generator.name(), "pipeline phase starting");
        let phase_warnings = generator.run(&mut builder, &mut ctx)?;
        for w in &phase_warnings {
            warn!(
                generator = %w.generator,
                kind = %w.kind,
                developer = w.developer_id.as_deref().unwrap_or("-"),
                "{}",
                w.message
            );
        }
        warnings.extend(phase_warnings);
    }

    let mut snapshot = builder.finish()?;
    let counts = snapshot.entity_counts();
    let finished_at = Utc::now();
    snapshot.report = Some(RunReport {
        snapshot_version: snapshot.version,
        counts,
        added: counts.delta_from(&before_counts),
        warnings,
        duration_ms: started.elapsed().as_millis() as u64,
        started_at,
        finished_at,
        config: config.clone(),
        rng_seed,
    });
    info!(
        version = snapshot.version,
        commits = counts.commits,
        prs = counts.pull_requests,
        "generation complete"
    );
    Ok(snapshot)
}
