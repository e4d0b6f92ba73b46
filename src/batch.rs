//! Batch processing
//!
//! Runs one [`PassageTimeRunner`] per subject. A subject whose record is
//! unusable is flagged in the report instead of aborting the batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::StudyConfig;
use crate::error::PassageError;
use crate::runner::PassageTimeRunner;
use crate::types::{RawRecord, RunnerResults};

/// One subject to process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectInput {
    /// Subject label (e.g. the REDCap record id)
    pub label: String,
    /// 1-based group assignment; absent or 0 for unassigned subjects
    #[serde(default)]
    pub group: Option<u32>,
    /// Test version selecting the word-count table
    pub version: String,
    /// Raw session record
    pub record: RawRecord,
}

/// Result for one subject
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectOutcome {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<RunnerResults>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubjectOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Summary of a batch run
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: String,
    pub computed_at_utc: DateTime<Utc>,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub outcomes: Vec<SubjectOutcome>,
}

impl BatchReport {
    /// Results of every subject that processed cleanly, in input order
    pub fn successful_results(&self) -> impl Iterator<Item = &RunnerResults> {
        self.outcomes.iter().filter_map(|o| o.results.as_ref())
    }

    /// Outcomes of subjects that failed
    pub fn failures(&self) -> impl Iterator<Item = &SubjectOutcome> {
        self.outcomes.iter().filter(|o| !o.is_ok())
    }

    /// One `{label, results | error}` object per subject, in input order
    pub fn outcomes_to_ndjson(&self) -> Result<String, serde_json::Error> {
        let mut lines = Vec::with_capacity(self.outcomes.len());
        for outcome in &self.outcomes {
            lines.push(serde_json::to_string(outcome)?);
        }
        Ok(lines.join("\n") + "\n")
    }
}

/// Process one subject
pub fn process_subject(
    config: &StudyConfig,
    input: SubjectInput,
) -> Result<RunnerResults, PassageError> {
    let mut runner = PassageTimeRunner::new(
        input.label,
        input.group,
        input.record,
        input.version,
        config,
    );
    let results = runner.process()?.clone();
    Ok(results)
}

/// Process every subject, isolating per-subject failures
pub fn process_batch(config: &StudyConfig, inputs: Vec<SubjectInput>) -> BatchReport {
    let total = inputs.len();
    let mut outcomes = Vec::with_capacity(total);

    for input in inputs {
        let label = input.label.clone();
        match process_subject(config, input) {
            Ok(results) => outcomes.push(SubjectOutcome {
                label,
                results: Some(results),
                error: None,
            }),
            Err(e) => {
                warn!(label = %label, error = %e, "skipping subject");
                outcomes.push(SubjectOutcome {
                    label,
                    results: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    let succeeded = outcomes.iter().filter(|o| o.is_ok()).count();
    let failed = total - succeeded;
    info!(total, succeeded, failed, "batch complete");

    BatchReport {
        run_id: Uuid::new_v4().to_string(),
        computed_at_utc: Utc::now(),
        total,
        succeeded,
        failed,
        outcomes,
    }
}

/// Parse a JSON array of subjects
pub fn parse_array(json: &str) -> Result<Vec<SubjectInput>, PassageError> {
    let inputs: Vec<SubjectInput> = serde_json::from_str(json)?;
    Ok(inputs)
}

/// Parse NDJSON (one subject per line)
pub fn parse_ndjson(ndjson: &str) -> Result<Vec<SubjectInput>, PassageError> {
    let mut inputs = Vec::new();
    for (line_num, line) in ndjson.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<SubjectInput>(trimmed) {
            Ok(input) => inputs.push(input),
            Err(e) => {
                return Err(PassageError::ParseError(format!(
                    "Failed to parse line {}: {}",
                    line_num + 1,
                    e
                )));
            }
        }
    }
    Ok(inputs)
}
