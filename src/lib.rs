//! devpulse-sim: simulation engine and in-memory analytics store for the
//! DevPulse developer-productivity API simulator.
//!
//! The crate generates a self-consistent multi-month corpus of developer
//! activity from a declarative seed (commits, pull requests, reviews,
//! issues, usage telemetry) and serves it through a snapshot-based query
//! layer. The HTTP transport, CLI, and auth are external collaborators;
//! `service::AnalyticsApi` is the boundary they consume.

pub mod config;
mod error;
pub mod export;
mod generate;
pub mod model;
pub mod query;
pub mod report;
pub mod seed;
pub mod service;
pub mod store;

mod sampling;

pub use config::{Mode, SeedFormat, SimConfig, WindowUnit};
pub use error::{ErrorEnvelope, SimError, SimResult};
pub use export::{ExportProgress, ExportStatus, SurveyExportManager};
pub use generate::{run_generation, utc_offset_minutes, CancelFlag};
pub use query::{StreamKind, TimeRange};
pub use report::{RunReport, RunWarning};
pub use seed::{minimal_seed, preset, presets, SeedData};
pub use service::{AnalyticsApi, RegenerateMode, RegenerateParams, SimulatorService};
pub use store::{AnalyticsStore, Snapshot, SnapshotBuilder};
