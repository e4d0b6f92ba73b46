//! Error types for passage-time processing

use thiserror::Error;

use crate::types::Category;

/// Errors that can occur while loading tables or processing a subject
#[derive(Debug, Error)]
pub enum PassageError {
    /// A key the pipeline needs is absent from the raw record.
    /// Aborts processing for that subject.
    #[error("Missing data in raw record: {key}")]
    MissingData { key: String },

    #[error("Group {0} is not present in the study tables")]
    UnknownGroup(u32),

    #[error("Version '{0}' has no word-count table")]
    UnknownVersion(String),

    #[error("No word count for passage '{passage}' in version '{version}'")]
    MissingWordCount { version: String, passage: String },

    #[error("Group {group} has no manipulation passage for category '{category}'")]
    MissingCategory { group: u32, category: Category },

    #[error("Invalid study configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid TOML: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PassageError {
    /// True for errors caused by incomplete static tables rather than by the
    /// subject's data.
    pub fn is_configuration_gap(&self) -> bool {
        matches!(
            self,
            PassageError::UnknownGroup(_)
                | PassageError::UnknownVersion(_)
                | PassageError::MissingWordCount { .. }
                | PassageError::MissingCategory { .. }
                | PassageError::InvalidConfig(_)
        )
    }
}
