//! Core data types for passage-time processing
//!
//! Raw records arrive as loosely typed key/value maps (REDCap exports every
//! field as a string). They are read through [`RawValue`] and turned into
//! tagged [`MetricValue`]s once, at the point each metric is produced, so the
//! final REDCap formatting is a total function over a known variant.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::PassageError;

/// Record key holding the subject's discontinued flag
pub const DISCONTINUED_KEY: &str = "passages_discontinued";

/// Suffix of a passage's elapsed-time key in the raw record
pub const TIME_SUFFIX: &str = "_time";

/// Decimal places kept for every floating-point metric
pub const DECIMALS: usize = 3;

// ============================================================================
// Raw input
// ============================================================================

/// A single value from a raw session record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Boolean(bool),
    Integer(i64),
    Number(f64),
    Text(String),
    Null,
}

impl From<bool> for RawValue {
    fn from(v: bool) -> Self {
        RawValue::Boolean(v)
    }
}

impl From<i64> for RawValue {
    fn from(v: i64) -> Self {
        RawValue::Integer(v)
    }
}

impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        RawValue::Number(v)
    }
}

impl From<&str> for RawValue {
    fn from(v: &str) -> Self {
        RawValue::Text(v.to_string())
    }
}

impl From<String> for RawValue {
    fn from(v: String) -> Self {
        RawValue::Text(v)
    }
}

impl RawValue {
    /// Truthiness of a flag field.
    ///
    /// Numeric strings are judged by value, so REDCap's `"0"`/`"1"` behave
    /// like the numbers they encode.
    pub fn is_truthy(&self) -> bool {
        match self {
            RawValue::Boolean(b) => *b,
            RawValue::Integer(i) => *i != 0,
            RawValue::Number(n) => *n != 0.0,
            RawValue::Text(s) => match MetricValue::parse(s) {
                MetricValue::Integer(i) => i != 0,
                MetricValue::Float(f) => f != 0.0,
                MetricValue::Text(t) => {
                    matches!(t.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "y")
                }
            },
            RawValue::Null => false,
        }
    }

    /// Convert to a tagged metric value, sniffing numeric strings
    pub fn to_metric(&self) -> MetricValue {
        match self {
            RawValue::Integer(i) => MetricValue::Integer(*i),
            RawValue::Number(n) => MetricValue::Float(*n),
            RawValue::Text(s) => MetricValue::parse(s),
            RawValue::Boolean(b) => MetricValue::Text(b.to_string()),
            RawValue::Null => MetricValue::Text(String::new()),
        }
    }
}

/// One subject's session record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord {
    fields: BTreeMap<String, RawValue>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, handy for fixtures
    pub fn with(mut self, key: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<RawValue>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&RawValue> {
        self.fields.get(key)
    }

    /// Look up a key, failing with [`PassageError::MissingData`] when absent
    pub fn require(&self, key: &str) -> Result<&RawValue, PassageError> {
        self.fields.get(key).ok_or_else(|| PassageError::MissingData {
            key: key.to_string(),
        })
    }

    /// Whether the session was stopped early
    pub fn discontinued(&self) -> Result<bool, PassageError> {
        Ok(self.require(DISCONTINUED_KEY)?.is_truthy())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RawValue)> {
        self.fields.iter()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl FromIterator<(String, RawValue)> for RawRecord {
    fn from_iter<I: IntoIterator<Item = (String, RawValue)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

// ============================================================================
// Metric keys
// ============================================================================

/// Cognitive categories, which double as manipulation-type labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Vocab,
    Cohesion,
    Decode,
    Syntax,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Vocab,
        Category::Cohesion,
        Category::Decode,
        Category::Syntax,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Vocab => "vocab",
            Category::Cohesion => "cohesion",
            Category::Decode => "decode",
            Category::Syntax => "syntax",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition a passage was administered under
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Condition {
    Baseline,
    Manipulation(Category),
    Near,
    Far,
}

impl Condition {
    pub fn label(&self) -> &'static str {
        match self {
            Condition::Baseline => "baseline",
            Condition::Manipulation(category) => category.as_str(),
            Condition::Near => "near",
            Condition::Far => "far",
        }
    }
}

/// What a per-passage metric measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetricKind {
    /// Elapsed seconds
    Sec,
    /// Words per minute
    Wpm,
}

impl MetricKind {
    pub fn suffix(&self) -> &'static str {
        match self {
            MetricKind::Sec => "sec",
            MetricKind::Wpm => "wpm",
        }
    }
}

/// Structured result key.
///
/// Renders to the legacy flat field name via `Display`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetricKey {
    Passage {
        passage: String,
        condition: Condition,
        kind: MetricKind,
    },
    BaselineMeanSec,
    BaselineMeanStdev,
    BaselineWpmRaw,
    BaselineWpmStdev,
    Category(Category),
    Group,
}

impl MetricKey {
    pub fn passage(passage: &str, condition: Condition, kind: MetricKind) -> Self {
        MetricKey::Passage {
            passage: passage.to_string(),
            condition,
            kind,
        }
    }

    /// The `_wpm` counterpart of a `_sec` key
    pub fn to_wpm(&self) -> Option<MetricKey> {
        match self {
            MetricKey::Passage {
                passage,
                condition,
                kind: MetricKind::Sec,
            } => Some(MetricKey::passage(passage, *condition, MetricKind::Wpm)),
            _ => None,
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKey::Passage {
                passage,
                condition,
                kind,
            } => write!(f, "{}_{}_{}", passage, condition.label(), kind.suffix()),
            MetricKey::BaselineMeanSec => f.write_str("baseline_mean_sec"),
            MetricKey::BaselineMeanStdev => f.write_str("baseline_mean_stdev"),
            MetricKey::BaselineWpmRaw => f.write_str("baseline_wpm_raw"),
            MetricKey::BaselineWpmStdev => f.write_str("baseline_wpm_stdev"),
            MetricKey::Category(category) => f.write_str(category.as_str()),
            MetricKey::Group => f.write_str("group"),
        }
    }
}

// ============================================================================
// Metric values
// ============================================================================

/// Tagged metric value
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl MetricValue {
    /// Classify a string as integer, float, or text
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            return MetricValue::Integer(i);
        }
        match trimmed.parse::<f64>() {
            Ok(f) if f.is_finite() => MetricValue::Float(f),
            _ => MetricValue::Text(s.to_string()),
        }
    }

    pub fn empty() -> Self {
        MetricValue::Text(String::new())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Integer(i) => Some(*i as f64),
            MetricValue::Float(f) => Some(*f),
            MetricValue::Text(_) => None,
        }
    }

    /// REDCap field rendering: `%d` for integers, `%0.3f` for floats, text as-is
    pub fn to_redcap(&self) -> String {
        match self {
            MetricValue::Integer(i) => i.to_string(),
            MetricValue::Float(f) => format!("{:.*}", DECIMALS, f),
            MetricValue::Text(s) => s.clone(),
        }
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Integer(v)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::Text(v)
    }
}

/// Intermediate metrics keyed by structured key
pub type Metrics = BTreeMap<MetricKey, MetricValue>;

/// Final flat mapping of REDCap field name to formatted value
pub type RedcapRecord = BTreeMap<String, String>;

/// Outcome of processing one subject
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RunnerResults {
    /// No group assigned: the raw record, untouched
    Unassigned(RawRecord),
    /// Computed and REDCap-formatted metrics
    Formatted(RedcapRecord),
}

impl RunnerResults {
    pub fn formatted(&self) -> Option<&RedcapRecord> {
        match self {
            RunnerResults::Formatted(record) => Some(record),
            RunnerResults::Unassigned(_) => None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
