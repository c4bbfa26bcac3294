//! Auxiliary telemetry streams: model usage, client versions, file
//! extensions, feature usage, and the conditionally enabled third-party
//! sources (legal-AI, office-suite activity, survey responses).

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use rand::Rng;

use crate::error::SimResult;
use crate::model::{
    ClientVersionRow, Developer, FeatureKind, FeatureUsageRow, FileExtensionRow, LegalAiEvent,
    ModelUsageRow, OfficeAppActivity, SurveyResponse, UsageSurface,
};
use crate::report::{RunWarning, WarningKind};
use crate::sampling;
use crate::store::SnapshotBuilder;

use super::{GenContext, Generator};

pub(crate) const FALLBACK_MODELS: &[&str] = &[
    "gpt-4.1",
    "claude-sonnet",
    "claude-opus",
    "gemini-pro",
    "o4-mini",
];

const TOOL_NAMES: &[&str] = &[
    "read_file",
    "edit_file",
    "run_terminal",
    "grep_search",
    "list_dir",
    "web_search",
    "apply_patch",
];

const COMMAND_NAMES: &[&str] = &[
    "open_settings",
    "toggle_chat",
    "new_composer",
    "accept_suggestion",
    "reject_suggestion",
    "format_document",
    "quick_fix",
    "go_to_definition",
];

/// Version adoption tiers: current, previous, trailing.
const VERSION_TIERS: &[(&str, f64)] = &[("1.8.2", 0.5), ("1.7.9", 0.3), ("1.6.4", 0.2)];

const COSMOPOLITAN_EXTS: &[&str] = &["md", "json", "yaml", "sql", "sh"];

const LEGAL_TASK_TYPES: &[&str] = &[
    "contract_review",
    "case_summary",
    "clause_extraction",
    "compliance_check",
];

const OFFICE_APPS: &[&str] = &["word", "excel", "powerpoint", "outlook", "teams"];

const SURVEY_COMMENTS: &[&str] = &[
    "Tab completions save me real time on boilerplate.",
    "Suggestions are hit or miss in our older services.",
    "The agent mode handled a whole migration for me last sprint.",
    "I mostly use it for tests and docstrings.",
    "Quality dropped on our monorepo, lots of rejected edits.",
    "Great for unfamiliar code, I accept most suggestions there.",
    "I turned it off for security-sensitive modules.",
    "Plan mode is underrated for multi-file changes.",
];

fn extensions_for_language(language: &str) -> &'static [&'static str] {
    match language {
        "rust" => &["rs", "toml"],
        "go" => &["go", "mod"],
        "python" => &["py", "pyi"],
        "typescript" => &["ts", "tsx", "json"],
        "javascript" => &["js", "jsx"],
        "java" => &["java", "xml"],
        "kotlin" => &["kt", "kts"],
        _ => &["txt"],
    }
}

/// Sorted (developer, day) -> commit indices for commits inside the
/// generation window. Iteration over this map fixes the draw order.
fn commits_by_dev_day(
    builder: &SnapshotBuilder,
    ctx: &GenContext<'_>,
) -> BTreeMap<(String, NaiveDate), Vec<usize>> {
    let mut map: BTreeMap<(String, NaiveDate), Vec<usize>> = BTreeMap::new();
    for (idx, commit) in builder.commits().iter().enumerate() {
        if commit.timestamp < ctx.gen_start || commit.timestamp >= ctx.gen_end {
            continue;
        }
        map.entry((commit.author_id.clone(), commit.event_date()))
            .or_default()
            .push(idx);
    }
    map
}

fn sorted_developers(builder: &SnapshotBuilder) -> Vec<Developer> {
    let mut developers = builder.developers().to_vec();
    developers.sort_by(|a, b| a.id.cmp(&b.id));
    developers
}

/// Developer's model list, falling back to the seed catalog override and
/// then the built-in table.
fn model_catalog<'a>(dev: &'a Developer, seed: &'a crate::seed::SeedData) -> Vec<&'a str> {
    if !dev.preferred_models.is_empty() {
        return dev.preferred_models.iter().map(|s| s.as_str()).collect();
    }
    if !seed.catalogs.models.is_empty() {
        return seed.catalogs.models.iter().map(|s| s.as_str()).collect();
    }
    FALLBACK_MODELS.to_vec()
}

pub struct ModelUsageGenerator;

impl Generator for ModelUsageGenerator {
    fn name(&self) -> &'static str {
        "model_usage"
    }

    fn run(
        &self,
        builder: &mut SnapshotBuilder,
        ctx: &mut GenContext<'_>,
    ) -> SimResult<Vec<RunWarning>> {
        let mut warnings = Vec::new();
        let by_dev_day = commits_by_dev_day(builder, ctx);
        let developers: BTreeMap<String, Developer> = sorted_developers(builder)
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect();

        let mut warned_empty: std::collections::HashSet<String> = Default::default();
        let mut rows = Vec::new();
        for ((dev_id, date), commit_indices) in &by_dev_day {
            ctx.cancel.checkpoint("model usage generation")?;
            let dev = match developers.get(dev_id) {
                Some(d) => d,
                None => continue,
            };
            if dev.preferred_models.is_empty() && warned_empty.insert(dev_id.clone()) {
                warnings.push(RunWarning {
                    kind: WarningKind::EmptyModelList,
                    generator: self.name().to_string(),
                    developer_id: Some(dev_id.clone()),
                    message: "no preferred models, using fallback catalog".to_string(),
                });
            }
            let catalog = model_catalog(dev, ctx.seed);
            // Preference-ordered weights: earlier entries dominate.
            let weights: Vec<f64> = (0..catalog.len()).map(|i| 1.0 / (i as f64 + 1.0)).collect();

            let events = sampling::poisson(ctx.rng, commit_indices.len() as f64 * 3.0);
            let mut per_model: BTreeMap<&str, u32> = BTreeMap::new();
            for _ in 0..events {
                let model = catalog[sampling::weighted_index(ctx.rng, &weights)];
                *per_model.entry(model).or_insert(0) += 1;
            }
            for (model, count) in per_model {
                let surface_draw: f64 = ctx.rng.gen_range(0.0..1.0);
                let used_by = if surface_draw < dev.chat_vs_code_ratio {
                    UsageSurface::Chat
                } else if surface_draw < dev.chat_vs_code_ratio + 0.4 {
                    UsageSurface::Tab
                } else {
                    UsageSurface::Agent
                };
                rows.push(ModelUsageRow {
                    developer_id: dev_id.clone(),
                    email: dev.email.clone(),
                    date: *date,
                    model: model.to_string(),
                    messages_count: count,
                    used_by,
                });
            }
        }
        for row in rows {
            builder.add_model_usage(row);
        }
        Ok(warnings)
    }
}

pub struct ClientVersionGenerator;

impl Generator for ClientVersionGenerator {
    fn name(&self) -> &'static str {
        "client_versions"
    }

    fn run(
        &self,
        builder: &mut SnapshotBuilder,
        ctx: &mut GenContext<'_>,
    ) -> SimResult<Vec<RunWarning>> {
        let by_dev_day = commits_by_dev_day(builder, ctx);
        let developers = sorted_developers(builder);

        // One version per developer for the whole window.
        let tier_weights: Vec<f64> = VERSION_TIERS.iter().map(|(_, w)| *w).collect();
        let mut version_of: BTreeMap<String, (String, String)> = BTreeMap::new();
        for dev in &developers {
            let tier = sampling::weighted_index(ctx.rng, &tier_weights);
            version_of.insert(
                dev.id.clone(),
                (dev.email.clone(), VERSION_TIERS[tier].0.to_string()),
            );
        }

        let mut rows = Vec::new();
        for ((dev_id, date), _) in &by_dev_day {
            ctx.cancel.checkpoint("client version generation")?;
            if let Some((email, version)) = version_of.get(dev_id) {
                rows.push(ClientVersionRow {
                    developer_id: dev_id.clone(),
                    email: email.clone(),
                    date: *date,
                    version: version.clone(),
                });
            }
        }
        for row in rows {
            builder.add_client_version(row);
        }
        Ok(Vec::new())
    }
}

pub struct FileExtensionGenerator;

impl Generator for FileExtensionGenerator {
    fn name(&self) -> &'static str {
        "file_extensions"
    }

    fn run(
        &self,
        builder: &mut SnapshotBuilder,
        ctx: &mut GenContext<'_>,
    ) -> SimResult<Vec<RunWarning>> {
        let languages: BTreeMap<String, String> = builder
            .repositories()
            .iter()
            .map(|r| (r.name.clone(), r.primary_language.clone()))
            .collect();
        let emails: BTreeMap<String, String> = builder
            .developers()
            .iter()
            .map(|d| (d.id.clone(), d.email.clone()))
            .collect();
        let acceptance: BTreeMap<String, f64> = builder
            .developers()
            .iter()
            .map(|d| (d.id.clone(), d.acceptance_rate))
            .collect();

        // Accumulate per (developer, repo, day, extension) across commits.
        #[derive(Default)]
        struct Acc {
            files: u32,
            accepted: u64,
            rejected: u64,
        }
        let mut acc: BTreeMap<(String, String, NaiveDate, String), Acc> = BTreeMap::new();

        let commit_info: Vec<(String, String, NaiveDate, u64, u32)> = builder
            .commits()
            .iter()
            .filter(|c| c.timestamp >= ctx.gen_start && c.timestamp < ctx.gen_end)
            .map(|c| {
                (
                    c.author_id.clone(),
                    c.repo.clone(),
                    c.event_date(),
                    c.added.ai(),
                    c.files_touched,
                )
            })
            .collect();

        for (author_id, repo, date, ai_lines, files_touched) in commit_info {
            ctx.cancel.checkpoint("file extension generation")?;
            let language = languages.get(&repo).cloned().unwrap_or_default();
            let native = extensions_for_language(&language);
            let k = ctx.rng.gen_range(1..=files_touched.clamp(1, 5));
            let rate = acceptance.get(&author_id).copied().unwrap_or(0.5).max(0.05);
            let per_ext_accepted = ai_lines / u64::from(k).max(1);
            for _ in 0..k {
                let ext = if ctx.rng.gen_bool(0.8) {
                    native[ctx.rng.gen_range(0..native.len())]
                } else {
                    COSMOPOLITAN_EXTS[ctx.rng.gen_range(0..COSMOPOLITAN_EXTS.len())]
                };
                let entry = acc
                    .entry((author_id.clone(), repo.clone(), date, ext.to_string()))
                    .or_default();
                entry.files += 1;
                entry.accepted += per_ext_accepted;
                entry.rejected +=
                    ((per_ext_accepted as f64) * (1.0 / rate - 1.0)).round() as u64;
            }
        }

        for ((dev_id, repo, date, ext), a) in acc {
            let suggested = a.accepted + a.rejected;
            builder.add_file_extension(FileExtensionRow {
                developer_id: dev_id.clone(),
                email: emails.get(&dev_id).cloned().unwrap_or_default(),
                repo,
                date,
                extension: ext,
                files_touched: a.files,
                accepts: if a.accepted > 0 { a.accepted / 8 + 1 } else { 0 },
                rejects: if a.rejected > 0 { a.rejected / 8 + 1 } else { 0 },
                lines_suggested: suggested,
                lines_accepted: a.accepted,
                lines_rejected: a.rejected,
            });
        }
        Ok(Vec::new())
    }
}

pub struct FeatureUsageGenerator;

impl Generator for FeatureUsageGenerator {
    fn name(&self) -> &'static str {
        "feature_usage"
    }

    fn run(
        &self,
        builder: &mut SnapshotBuilder,
        ctx: &mut GenContext<'_>,
    ) -> SimResult<Vec<RunWarning>> {
        let developers = sorted_developers(builder);
        let velocity_mult = ctx.config.velocity.multiplier();

        let tools: Vec<String> = if ctx.seed.catalogs.tools.is_empty() {
            TOOL_NAMES.iter().map(|s| s.to_string()).collect()
        } else {
            ctx.seed.catalogs.tools.clone()
        };
        let commands: Vec<String> = if ctx.seed.catalogs.commands.is_empty() {
            COMMAND_NAMES.iter().map(|s| s.to_string()).collect()
        } else {
            ctx.seed.catalogs.commands.clone()
        };

        let mut rows = Vec::new();
        for dev in &developers {
            ctx.cancel.checkpoint("feature usage generation")?;
            let mult = velocity_mult * dev.activity_level.multiplier();
            let models = model_catalog(dev, ctx.seed);
            let mut day = ctx.gen_start.date_naive();
            let last_day = (ctx.gen_end - Duration::seconds(1)).date_naive();
            while day <= last_day {
                for (kind, lambda, catalog) in [
                    (FeatureKind::Tool, 4.0 * mult, &tools[..]),
                    (FeatureKind::Command, 6.0 * mult, &commands[..]),
                ] {
                    let invocations = sampling::poisson(ctx.rng, lambda);
                    if invocations > 0 {
                        rows.push(FeatureUsageRow {
                            developer_id: dev.id.clone(),
                            email: dev.email.clone(),
                            date: day,
                            kind,
                            key: catalog[ctx.rng.gen_range(0..catalog.len())].clone(),
                            invocations: invocations as u32,
                        });
                    }
                }
                for (kind, lambda) in [
                    (FeatureKind::PlanMode, 1.5 * mult),
                    (FeatureKind::AskMode, 2.5 * mult * (0.5 + dev.chat_vs_code_ratio)),
                ] {
                    let invocations = sampling::poisson(ctx.rng, lambda);
                    if invocations > 0 {
                        rows.push(FeatureUsageRow {
                            developer_id: dev.id.clone(),
                            email: dev.email.clone(),
                            date: day,
                            kind,
                            key: models[ctx.rng.gen_range(0..models.len())].to_string(),
                            invocations: invocations as u32,
                        });
                    }
                }
                day = match day.succ_opt() {
                    Some(d) => d,
                    None => break,
                };
            }
        }
        for row in rows {
            builder.add_feature_usage(row);
        }
        Ok(Vec::new())
    }
}

pub struct LegalAiGenerator;

impl Generator for LegalAiGenerator {
    fn name(&self) -> &'static str {
        "legal_ai"
    }

    fn run(
        &self,
        builder: &mut SnapshotBuilder,
        ctx: &mut GenContext<'_>,
    ) -> SimResult<Vec<RunWarning>> {
        let developers = sorted_developers(builder);
        let mut rows = Vec::new();
        for dev in &developers {
            ctx.cancel.checkpoint("legal ai generation")?;
            let mut day = ctx.gen_start.date_naive();
            let last_day = (ctx.gen_end - Duration::seconds(1)).date_naive();
            while day <= last_day {
                let events = sampling::poisson(ctx.rng, 0.25);
                for _ in 0..events {
                    let hour = ctx.rng.gen_range(
                        u32::from(dev.work_start_hour)..u32::from(dev.work_end_hour),
                    );
                    let minute = ctx.rng.gen_range(0..60);
                    let timestamp = day
                        .and_hms_opt(hour, minute, 0)
                        .expect("hour in range")
                        .and_utc();
                    rows.push(LegalAiEvent {
                        user_email: dev.email.clone(),
                        task_type: LEGAL_TASK_TYPES
                            [ctx.rng.gen_range(0..LEGAL_TASK_TYPES.len())]
                        .to_string(),
                        timestamp,
                        duration_minutes: ctx.rng.gen_range(5..=90),
                    });
                }
                day = match day.succ_opt() {
                    Some(d) => d,
                    None => break,
                };
            }
        }
        for row in rows {
            builder.add_legal_ai(row);
        }
        Ok(Vec::new())
    }
}

pub struct OfficeSuiteGenerator;

impl Generator for OfficeSuiteGenerator {
    fn name(&self) -> &'static str {
        "office_suite"
    }

    fn run(
        &self,
        builder: &mut SnapshotBuilder,
        ctx: &mut GenContext<'_>,
    ) -> SimResult<Vec<RunWarning>> {
        let developers = sorted_developers(builder);
        let trailing_days = 30.min((ctx.gen_end - ctx.gen_start).num_days().max(1));
        let mut rows = Vec::new();
        for dev in &developers {
            ctx.cancel.checkpoint("office suite generation")?;
            for app in OFFICE_APPS {
                if !ctx.rng.gen_bool(0.8) {
                    continue;
                }
                let back = ctx.rng.gen_range(0..trailing_days);
                rows.push(OfficeAppActivity {
                    user_email: dev.email.clone(),
                    app: app.to_string(),
                    last_used: (ctx.gen_end - Duration::days(back)).date_naive(),
                });
            }
        }
        for row in rows {
            builder.add_office_activity(row);
        }
        Ok(Vec::new())
    }
}

pub struct SurveyGenerator;

impl Generator for SurveyGenerator {
    fn name(&self) -> &'static str {
        "survey"
    }

    fn run(
        &self,
        builder: &mut SnapshotBuilder,
        ctx: &mut GenContext<'_>,
    ) -> SimResult<Vec<RunWarning>> {
        let developers = sorted_developers(builder);
        let mut counter = builder.survey_response_count() as u64;
        let window_seconds = (ctx.gen_end - ctx.gen_start).num_seconds().max(1);
        let recent = window_seconds.min(14 * 86_400);
        let mut rows = Vec::new();
        for dev in &developers {
            ctx.cancel.checkpoint("survey generation")?;
            if !ctx.rng.gen_bool(0.6) {
                continue;
            }
            let jitter = sampling::standard_normal(ctx.rng) * 1.2;
            let rating = (4.0 + dev.acceptance_rate * 5.0 + jitter).round().clamp(1.0, 10.0) as u8;
            counter += 1;
            rows.push(SurveyResponse {
                response_id: format!("R{:05}", counter),
                respondent_email: dev.email.clone(),
                rating,
                comment: SURVEY_COMMENTS[ctx.rng.gen_range(0..SURVEY_COMMENTS.len())].to_string(),
                submitted_at: ctx.gen_end
                    - Duration::seconds(ctx.rng.gen_range(0..recent)),
            });
        }
        for row in rows {
            builder.add_survey_response(row);
        }
        Ok(Vec::new())
    }
}
