//! Passage Times - reading-assessment metrics for timed passage batteries
//!
//! Turns one subject's raw passage timings into REDCap-ready fields through a
//! deterministic pipeline: time extraction → WPM derivation → baseline and
//! category statistics → REDCap formatting.
//!
//! ## Modules
//!
//! - **Runner**: per-subject computation ([`PassageTimeRunner`])
//! - **Config**: the study's passage and word-count tables ([`StudyConfig`])
//! - **Batch**: many subjects at once, with per-subject failure isolation

pub mod batch;
pub mod config;
pub mod error;
pub mod runner;
pub mod stats;
pub mod types;

pub use batch::{process_batch, BatchReport, SubjectInput, SubjectOutcome};
pub use config::{GroupPassages, ManipulationPassage, StudyConfig};
pub use error::PassageError;
pub use runner::{format_for_redcap, PassageTimeRunner};
pub use types::{
    Category, Condition, MetricKey, MetricKind, MetricValue, RawRecord, RawValue, RedcapRecord,
    RunnerResults,
};

/// Crate version, reported by the CLI
pub const PASSAGE_TIMES_VERSION: &str = env!("CARGO_PKG_VERSION");
