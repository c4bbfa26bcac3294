//! Seed payload model: parsing, validation, developer replication, and the
//! built-in preset catalog.
//!
//! A seed arrives in one of three textual formats. Two are equivalent
//! keyed-record forms (JSON and TOML); the third is a tabular CSV shorthand
//! whose only columns are `user_id,email,name`, with every other attribute
//! defaulted. Validation runs after parsing regardless of format.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::SeedFormat;
use crate::error::{SimError, SimResult};
use crate::model::{ActivityLevel, Developer, Maturity, PrBehavior, Repository, Seniority};

pub const DEFAULT_MODELS: &[&str] = &["gpt-4.1", "claude-sonnet"];

/// Quality-overlay correlation knobs, all defaulted per the product's
/// observed base rates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Correlations {
    pub revert_rate_low_ai: f64,
    pub revert_rate_medium_ai: f64,
    pub revert_rate_high_ai: f64,
    pub required_hotfix_rate: f64,
    /// Multiplier applied to the hotfix rate for high-AI-band PRs.
    pub hotfix_high_ai_uplift: f64,
    /// 30-day code retention by AI band; shorter horizons are derived.
    pub retention_30d_low_ai: f64,
    pub retention_30d_medium_ai: f64,
    pub retention_30d_high_ai: f64,
}

impl Default for Correlations {
    fn default() -> Self {
        Correlations {
            revert_rate_low_ai: 0.05,
            revert_rate_medium_ai: 0.08,
            revert_rate_high_ai: 0.12,
            required_hotfix_rate: 0.08,
            hotfix_high_ai_uplift: 1.5,
            retention_30d_low_ai: 0.92,
            retention_30d_medium_ai: 0.88,
            retention_30d_high_ai: 0.84,
        }
    }
}

/// Per-source enable flags for the third-party telemetry generators. A
/// disabled source has no generator in the pipeline and its endpoints
/// answer `not_found`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThirdPartyToggles {
    pub legal_ai: bool,
    pub office_suite: bool,
    pub survey: bool,
}

/// Optional overrides for the name catalogs the generators draw from.
/// Empty vectors mean "use the built-in table".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Catalogs {
    pub models: Vec<String>,
    pub tools: Vec<String>,
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedDeveloper {
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub org: String,
    pub division: String,
    pub team: String,
    pub region: String,
    pub timezone: String,
    pub locale: String,
    pub seniority: Seniority,
    pub activity_level: ActivityLevel,
    pub acceptance_rate: f64,
    pub preferred_models: Vec<String>,
    pub work_start_hour: u8,
    pub work_end_hour: u8,
    pub chat_vs_code_ratio: f64,
    pub prs_per_week: f64,
    pub avg_pr_size_loc: u32,
    pub avg_files_per_pr: u32,
    pub review_thoroughness: f64,
    pub iteration_tolerance: u32,
}

impl Default for SeedDeveloper {
    fn default() -> Self {
        SeedDeveloper {
            user_id: String::new(),
            email: String::new(),
            name: String::new(),
            org: "acme".to_string(),
            division: "engineering".to_string(),
            team: "platform".to_string(),
            region: "na".to_string(),
            timezone: "UTC".to_string(),
            locale: "en-US".to_string(),
            seniority: Seniority::Mid,
            activity_level: ActivityLevel::Medium,
            acceptance_rate: 0.5,
            preferred_models: DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
            work_start_hour: 9,
            work_end_hour: 17,
            chat_vs_code_ratio: 0.3,
            prs_per_week: 3.0,
            avg_pr_size_loc: 400,
            avg_files_per_pr: 6,
            review_thoroughness: 0.7,
            iteration_tolerance: 2,
        }
    }
}

impl SeedDeveloper {
    pub fn into_developer(self) -> Developer {
        Developer {
            id: self.user_id,
            email: self.email,
            name: self.name,
            org: self.org,
            division: self.division,
            team: self.team,
            region: self.region,
            timezone: self.timezone,
            locale: self.locale,
            seniority: self.seniority,
            activity_level: self.activity_level,
            acceptance_rate: self.acceptance_rate,
            preferred_models: self.preferred_models,
            work_start_hour: self.work_start_hour,
            work_end_hour: self.work_end_hour,
            chat_vs_code_ratio: self.chat_vs_code_ratio,
            pr_behavior: PrBehavior {
                prs_per_week: self.prs_per_week,
                avg_pr_size_loc: self.avg_pr_size_loc,
                avg_files_per_pr: self.avg_files_per_pr,
                review_thoroughness: self.review_thoroughness,
                iteration_tolerance: self.iteration_tolerance,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedRepository {
    pub name: String,
    #[serde(default = "default_language")]
    pub primary_language: String,
    #[serde(default = "default_repo_age")]
    pub age_days: u32,
    #[serde(default = "default_maturity")]
    pub maturity: Maturity,
    #[serde(default)]
    pub owning_teams: Vec<String>,
    #[serde(default = "default_primary_branch")]
    pub primary_branch: String,
}

fn default_language() -> String {
    "typescript".to_string()
}

fn default_repo_age() -> u32 {
    720
}

fn default_maturity() -> Maturity {
    Maturity::Mature
}

fn default_primary_branch() -> String {
    "main".to_string()
}

impl SeedRepository {
    fn into_repository(self, all_teams: &[String]) -> Repository {
        let owning_teams = if self.owning_teams.is_empty() {
            all_teams.to_vec()
        } else {
            self.owning_teams
        };
        Repository {
            name: self.name,
            primary_language: self.primary_language,
            age_days: self.age_days,
            maturity: self.maturity,
            owning_teams,
            primary_branch: self.primary_branch,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedData {
    pub developers: Vec<SeedDeveloper>,
    #[serde(default)]
    pub repositories: Vec<SeedRepository>,
    #[serde(default)]
    pub correlations: Correlations,
    #[serde(default)]
    pub third_party: ThirdPartyToggles,
    #[serde(default)]
    pub catalogs: Catalogs,
}

impl SeedData {
    /// Parse a seed payload, auto-detecting the format unless a hint is
    /// given. Detection order: JSON, TOML, tabular shorthand.
    pub fn parse(payload: &str, hint: Option<SeedFormat>) -> SimResult<SeedData> {
        let seed = match hint {
            Some(SeedFormat::Json) => serde_json::from_str::<SeedData>(payload)
                .map_err(|e| SimError::InvalidSeed(format!("json: {}", e)))?,
            Some(SeedFormat::Toml) => toml::from_str::<SeedData>(payload)
                .map_err(|e| SimError::InvalidSeed(format!("toml: {}", e)))?,
            Some(SeedFormat::Tabular) => Self::parse_tabular(payload)?,
            None => Self::detect_and_parse(payload)?,
        };
        seed.validate()?;
        Ok(seed)
    }

    fn detect_and_parse(payload: &str) -> SimResult<SeedData> {
        let trimmed = payload.trim_start();
        if trimmed.starts_with('{') {
            return serde_json::from_str::<SeedData>(payload)
                .map_err(|e| SimError::InvalidSeed(format!("json: {}", e)));
        }
        if trimmed
            .lines()
            .next()
            .map(|l| l.replace(' ', "").starts_with("user_id,email,name"))
            .unwrap_or(false)
        {
            return Self::parse_tabular(payload);
        }
        toml::from_str::<SeedData>(payload)
            .map_err(|e| SimError::InvalidSeed(format!("toml: {}", e)))
    }

    /// Tabular shorthand: CSV with the exact header `user_id,email,name`.
    /// Every other developer attribute takes its default.
    fn parse_tabular(payload: &str) -> SimResult<SeedData> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(payload.as_bytes());
        let headers = reader
            .headers()
            .map_err(|e| SimError::InvalidSeed(format!("tabular: {}", e)))?
            .clone();
        let expected = ["user_id", "email", "name"];
        let got: Vec<&str> = headers.iter().collect();
        if got != expected {
            return Err(SimError::InvalidSeed(format!(
                "tabular: expected header user_id,email,name, got {}",
                got.join(",")
            )));
        }
        let mut developers = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| SimError::InvalidSeed(format!("tabular: {}", e)))?;
            developers.push(SeedDeveloper {
                user_id: record.get(0).unwrap_or_default().to_string(),
                email: record.get(1).unwrap_or_default().to_string(),
                name: record.get(2).unwrap_or_default().to_string(),
                ..Default::default()
            });
        }
        Ok(SeedData {
            developers,
            repositories: Vec::new(),
            correlations: Correlations::default(),
            third_party: ThirdPartyToggles::default(),
            catalogs: Catalogs::default(),
        })
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.developers.is_empty() {
            return Err(SimError::InvalidSeed(
                "developers: at least one developer is required".to_string(),
            ));
        }
        let mut ids = std::collections::HashSet::new();
        let mut emails = std::collections::HashSet::new();
        for (i, dev) in self.developers.iter().enumerate() {
            let path = format!("developers[{}]", i);
            if dev.user_id.is_empty() {
                return Err(SimError::InvalidSeed(format!("{}.user_id: empty", path)));
            }
            if dev.email.is_empty() || !dev.email.contains('@') {
                return Err(SimError::InvalidSeed(format!(
                    "{}.email: '{}' is not an email address",
                    path, dev.email
                )));
            }
            if !ids.insert(dev.user_id.clone()) {
                return Err(SimError::InvalidSeed(format!(
                    "{}.user_id: duplicate id '{}'",
                    path, dev.user_id
                )));
            }
            if !emails.insert(dev.email.to_ascii_lowercase()) {
                return Err(SimError::InvalidSeed(format!(
                    "{}.email: duplicate email '{}'",
                    path, dev.email
                )));
            }
            if dev.work_start_hour > 23
                || dev.work_end_hour > 24
                || dev.work_end_hour <= dev.work_start_hour
            {
                return Err(SimError::InvalidSeed(format!(
                    "{}: working hours [{}, {}) is not a valid band",
                    path, dev.work_start_hour, dev.work_end_hour
                )));
            }
            for (field, value) in [
                ("acceptance_rate", dev.acceptance_rate),
                ("chat_vs_code_ratio", dev.chat_vs_code_ratio),
                ("review_thoroughness", dev.review_thoroughness),
            ] {
                if !(0.0..=1.0).contains(&value) {
                    return Err(SimError::InvalidSeed(format!(
                        "{}.{}: {} outside [0, 1]",
                        path, field, value
                    )));
                }
            }
            if dev.prs_per_week < 0.0 {
                return Err(SimError::InvalidSeed(format!(
                    "{}.prs_per_week: negative",
                    path
                )));
            }
        }
        let c = &self.correlations;
        for (field, value) in [
            ("revert_rate_low_ai", c.revert_rate_low_ai),
            ("revert_rate_medium_ai", c.revert_rate_medium_ai),
            ("revert_rate_high_ai", c.revert_rate_high_ai),
            ("required_hotfix_rate", c.required_hotfix_rate),
            ("retention_30d_low_ai", c.retention_30d_low_ai),
            ("retention_30d_medium_ai", c.retention_30d_medium_ai),
            ("retention_30d_high_ai", c.retention_30d_high_ai),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SimError::InvalidSeed(format!(
                    "correlations.{}: {} outside [0, 1]",
                    field, value
                )));
            }
        }
        let mut repo_names = std::collections::HashSet::new();
        for repo in &self.repositories {
            if repo.name.is_empty() {
                return Err(SimError::InvalidSeed("repositories: empty name".to_string()));
            }
            if !repo_names.insert(repo.name.clone()) {
                return Err(SimError::InvalidSeed(format!(
                    "repositories: duplicate name '{}'",
                    repo.name
                )));
            }
        }
        Ok(())
    }

    /// Materialize repositories, defaulting to a single mature repo owned by
    /// every seed team when the seed declares none.
    pub fn repositories(&self) -> Vec<Repository> {
        let mut teams: Vec<String> = self
            .developers
            .iter()
            .map(|d| d.team.clone())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        if teams.is_empty() {
            teams.push("platform".to_string());
        }
        if self.repositories.is_empty() {
            return vec![Repository {
                name: "core-platform".to_string(),
                primary_language: default_language(),
                age_days: default_repo_age(),
                maturity: Maturity::Mature,
                owning_teams: teams,
                primary_branch: default_primary_branch(),
            }];
        }
        self.repositories
            .iter()
            .cloned()
            .map(|r| r.into_repository(&teams))
            .collect()
    }
}

/// Expand or sample the seed's developer set to exactly `requested` members
/// (0 = seed cardinality). Sampling is uniform without replacement; cloning
/// is round-robin over the originals with id and email rewritten for global
/// uniqueness. Behavioral fields are copied verbatim so the aggregate
/// distributions survive replication.
pub fn replicate_developers<R: Rng>(
    seed: &SeedData,
    requested: u32,
    rng: &mut R,
) -> Vec<Developer> {
    let mut originals: Vec<Developer> = seed
        .developers
        .iter()
        .cloned()
        .map(SeedDeveloper::into_developer)
        .collect();
    originals.sort_by(|a, b| a.id.cmp(&b.id));

    let m = originals.len();
    let n = if requested == 0 { m } else { requested as usize };

    if n <= m {
        let mut indices: Vec<usize> = (0..m).collect();
        indices.shuffle(rng);
        indices.truncate(n);
        indices.sort_unstable();
        return indices.into_iter().map(|i| originals[i].clone()).collect();
    }

    let mut out = originals.clone();
    for k in 1..=(n - m) {
        let template = &originals[(k - 1) % m];
        let mut clone = template.clone();
        clone.id = format!("{}-clone-{}", template.id, k);
        clone.email = clone_email(&template.email, k);
        out.push(clone);
    }
    out
}

fn clone_email(email: &str, k: usize) -> String {
    match email.split_once('@') {
        Some((local, domain)) => format!("{}+clone{}@{}", local, k, domain),
        None => format!("{}+clone{}", email, k),
    }
}

/// Built-in seed presets, addressable by name.
pub fn presets() -> Vec<(&'static str, SeedData)> {
    vec![
        ("minimal", minimal_seed()),
        ("startup", startup_seed()),
        ("enterprise", enterprise_seed()),
    ]
}

pub fn preset(name: &str) -> SimResult<SeedData> {
    presets()
        .into_iter()
        .find(|(n, _)| *n == name)
        .map(|(_, s)| s)
        .ok_or_else(|| SimError::NotFound(format!("seed preset '{}'", name)))
}

/// The canonical two-developer fixture used across the test scenarios.
pub fn minimal_seed() -> SeedData {
    SeedData {
        developers: vec![
            SeedDeveloper {
                user_id: "alice".to_string(),
                email: "alice@example.com".to_string(),
                name: "Alice Nakamura".to_string(),
                team: "platform".to_string(),
                seniority: Seniority::Senior,
                activity_level: ActivityLevel::High,
                acceptance_rate: 0.45,
                timezone: "America/Los_Angeles".to_string(),
                prs_per_week: 6.0,
                ..Default::default()
            },
            SeedDeveloper {
                user_id: "bob".to_string(),
                email: "bob@example.com".to_string(),
                name: "Bob Ferreira".to_string(),
                team: "platform".to_string(),
                seniority: Seniority::Junior,
                activity_level: ActivityLevel::High,
                acceptance_rate: 0.65,
                timezone: "Europe/Berlin".to_string(),
                prs_per_week: 4.0,
                ..Default::default()
            },
        ],
        repositories: Vec::new(),
        correlations: Correlations::default(),
        third_party: ThirdPartyToggles {
            legal_ai: false,
            office_suite: false,
            survey: true,
        },
        catalogs: Catalogs::default(),
    }
}

fn startup_seed() -> SeedData {
    let teams = ["product", "infra"];
    let names = [
        ("maya", "Maya Singh", Seniority::Senior, 0.4),
        ("jon", "Jon Park", Seniority::Mid, 0.5),
        ("elena", "Elena Sokolova", Seniority::Mid, 0.55),
        ("tom", "Tom Adeyemi", Seniority::Junior, 0.7),
        ("ines", "Ines Duarte", Seniority::Senior, 0.35),
        ("raj", "Raj Patel", Seniority::Mid, 0.5),
        ("lucy", "Lucy Chen", Seniority::Junior, 0.65),
        ("omar", "Omar Haddad", Seniority::Mid, 0.45),
    ];
    SeedData {
        developers: names
            .iter()
            .enumerate()
            .map(|(i, (id, name, seniority, rate))| SeedDeveloper {
                user_id: (*id).to_string(),
                email: format!("{}@lumenflow.dev", id),
                name: (*name).to_string(),
                org: "lumenflow".to_string(),
                team: teams[i % teams.len()].to_string(),
                seniority: *seniority,
                acceptance_rate: *rate,
                ..Default::default()
            })
            .collect(),
        repositories: vec![
            SeedRepository {
                name: "lumenflow-app".to_string(),
                primary_language: "typescript".to_string(),
                age_days: 540,
                maturity: Maturity::Growing,
                owning_teams: vec!["product".to_string()],
                primary_branch: "main".to_string(),
            },
            SeedRepository {
                name: "lumenflow-infra".to_string(),
                primary_language: "go".to_string(),
                age_days: 420,
                maturity: Maturity::Growing,
                owning_teams: vec!["infra".to_string()],
                primary_branch: "main".to_string(),
            },
        ],
        correlations: Correlations::default(),
        third_party: ThirdPartyToggles {
            legal_ai: false,
            office_suite: true,
            survey: true,
        },
        catalogs: Catalogs::default(),
    }
}

fn enterprise_seed() -> SeedData {
    let divisions = ["commerce", "payments", "platform"];
    let teams = ["checkout", "risk", "ledger", "billing", "core", "tools"];
    let regions = ["na", "emea", "apac"];
    let timezones = ["America/New_York", "Europe/London", "Asia/Singapore"];
    let seniorities = [Seniority::Junior, Seniority::Mid, Seniority::Senior];
    let developers = (0..40)
        .map(|i| {
            let region = i % regions.len();
            SeedDeveloper {
                user_id: format!("emp{:03}", i + 1),
                email: format!("emp{:03}@vantagecorp.com", i + 1),
                name: format!("Employee {:03}", i + 1),
                org: "vantagecorp".to_string(),
                division: divisions[i % divisions.len()].to_string(),
                team: teams[i % teams.len()].to_string(),
                region: regions[region].to_string(),
                timezone: timezones[region].to_string(),
                seniority: seniorities[i % seniorities.len()],
                activity_level: if i % 5 == 0 {
                    ActivityLevel::High
                } else if i % 5 == 4 {
                    ActivityLevel::Low
                } else {
                    ActivityLevel::Medium
                },
                acceptance_rate: 0.3 + 0.01 * (i % 40) as f64,
                ..Default::default()
            }
        })
        .collect();
    SeedData {
        developers,
        repositories: (0..6)
            .map(|i| SeedRepository {
                name: format!("vantage-{}", teams[i]),
                primary_language: ["java", "kotlin", "typescript", "go", "python", "rust"][i]
                    .to_string(),
                age_days: 1200 + 100 * i as u32,
                maturity: Maturity::Mature,
                owning_teams: vec![teams[i].to_string()],
                primary_branch: "main".to_string(),
            })
            .collect(),
        correlations: Correlations::default(),
        third_party: ThirdPartyToggles {
            legal_ai: true,
            office_suite: true,
            survey: true,
        },
        catalogs: Catalogs::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn minimal_seed_validates() {
        assert!(minimal_seed().validate().is_ok());
        for (name, seed) in presets() {
            assert!(seed.validate().is_ok(), "preset {} failed validation", name);
        }
    }

    #[test]
    fn rejects_duplicate_emails() {
        let mut seed = minimal_seed();
        seed.developers[1].email = seed.developers[0].email.clone();
        assert!(matches!(seed.validate(), Err(SimError::InvalidSeed(_))));
    }

    #[test]
    fn rejects_inverted_hours_band() {
        let mut seed = minimal_seed();
        seed.developers[0].work_start_hour = 17;
        seed.developers[0].work_end_hour = 9;
        assert!(seed.validate().is_err());
    }

    #[test]
    fn rejects_probability_out_of_range() {
        let mut seed = minimal_seed();
        seed.developers[0].acceptance_rate = 1.4;
        assert!(seed.validate().is_err());
    }

    #[test]
    fn tabular_shorthand_parses_with_defaults() {
        let payload = "user_id,email,name\ncarol,carol@example.com,Carol Jones\n";
        let seed = SeedData::parse(payload, None).unwrap();
        assert_eq!(seed.developers.len(), 1);
        let dev = &seed.developers[0];
        assert_eq!(dev.user_id, "carol");
        assert_eq!(dev.seniority, Seniority::Mid);
        assert_eq!(dev.work_start_hour, 9);
    }

    #[test]
    fn json_and_toml_forms_agree() {
        let json = r#"{"developers": [{"user_id": "z", "email": "z@x.io", "name": "Z"}]}"#;
        let toml_src = "[[developers]]\nuser_id = \"z\"\nemail = \"z@x.io\"\nname = \"Z\"\n";
        let a = SeedData::parse(json, None).unwrap();
        let b = SeedData::parse(toml_src, None).unwrap();
        assert_eq!(a.developers[0].user_id, b.developers[0].user_id);
        assert_eq!(a.developers[0].acceptance_rate, b.developers[0].acceptance_rate);
    }

    #[test]
    fn replication_upsamples_with_unique_identities() {
        let seed = minimal_seed();
        let mut rng = StdRng::seed_from_u64(42);
        let devs = replicate_developers(&seed, 5, &mut rng);
        assert_eq!(devs.len(), 5);
        let ids: std::collections::HashSet<_> = devs.iter().map(|d| &d.id).collect();
        let emails: std::collections::HashSet<_> = devs.iter().map(|d| &d.email).collect();
        assert_eq!(ids.len(), 5);
        assert_eq!(emails.len(), 5);
        assert!(devs.iter().any(|d| d.email == "alice@example.com"));
        assert!(devs.iter().any(|d| d.email == "bob@example.com"));
        let clones: Vec<_> = devs.iter().filter(|d| d.id.contains("clone")).collect();
        assert_eq!(clones.len(), 3);
        for clone in clones {
            assert!(clone.email.contains("+clone"));
        }
    }

    #[test]
    fn replication_downsamples_uniformly() {
        let seed = startup_seed();
        let mut rng = StdRng::seed_from_u64(42);
        let devs = replicate_developers(&seed, 3, &mut rng);
        assert_eq!(devs.len(), 3);
        assert!(devs.iter().all(|d| !d.id.contains("clone")));
    }

    #[test]
    fn clone_behavior_copied_verbatim() {
        let seed = minimal_seed();
        let mut rng = StdRng::seed_from_u64(42);
        let devs = replicate_developers(&seed, 4, &mut rng);
        let original = devs.iter().find(|d| d.id == "alice").unwrap().clone();
        let clone = devs.iter().find(|d| d.id == "alice-clone-1").unwrap();
        assert_eq!(clone.acceptance_rate, original.acceptance_rate);
        assert_eq!(clone.seniority, original.seniority);
        assert_eq!(clone.team, original.team);
    }
}
