//! Study tables
//!
//! The passage battery is static data: which passages each group reads under
//! baseline, manipulation, near and far conditions, and how many words each
//! passage has in every test version. Tables are loaded once, validated, and
//! then shared read-only by every runner.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use crate::error::PassageError;
use crate::types::Category;

/// A manipulation passage and the category it manipulates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManipulationPassage {
    pub passage: String,
    pub category: Category,
}

/// Passages assigned to one group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPassages {
    pub baseline: Vec<String>,
    #[serde(default)]
    pub manipulation: Vec<ManipulationPassage>,
    pub near: String,
    pub far: String,
}

impl GroupPassages {
    /// The manipulation passage for a category, if the group has one
    pub fn manipulation_for(&self, category: Category) -> Option<&ManipulationPassage> {
        self.manipulation.iter().find(|m| m.category == category)
    }

    /// Every passage the group reads, in administration order
    pub fn all_passages(&self) -> Vec<&str> {
        self.baseline
            .iter()
            .map(String::as_str)
            .chain(self.manipulation.iter().map(|m| m.passage.as_str()))
            .chain([self.near.as_str(), self.far.as_str()])
            .collect()
    }
}

/// Complete lookup tables for a study
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyConfig {
    /// Group id (1-based) to assigned passages
    #[serde(with = "keyed_by_string")]
    pub groups: BTreeMap<u32, GroupPassages>,
    /// Version id to passage name to total word count
    pub word_counts: BTreeMap<String, BTreeMap<String, u32>>,
}

impl StudyConfig {
    /// Parse and validate tables from TOML
    pub fn from_toml_str(toml_str: &str) -> Result<Self, PassageError> {
        let config: StudyConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate tables from JSON
    pub fn from_json_str(json: &str) -> Result<Self, PassageError> {
        let config: StudyConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load tables from a `.toml` or `.json` file
    pub fn from_path(path: &Path) -> Result<Self, PassageError> {
        let content = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            Some("json") => Self::from_json_str(&content),
            _ => Err(PassageError::InvalidConfig(format!(
                "unsupported config format: {} (expected .toml or .json)",
                path.display()
            ))),
        }
    }

    /// Check the tables are internally consistent
    pub fn validate(&self) -> Result<(), PassageError> {
        if self.groups.is_empty() {
            return Err(PassageError::InvalidConfig("no groups defined".to_string()));
        }

        for (&id, group) in &self.groups {
            if id == 0 {
                return Err(PassageError::InvalidConfig(
                    "group ids start at 1; 0 means unassigned".to_string(),
                ));
            }
            if group.baseline.is_empty() {
                return Err(PassageError::InvalidConfig(format!(
                    "group {} has no baseline passages",
                    id
                )));
            }

            let mut seen = BTreeSet::new();
            for manip in &group.manipulation {
                if !seen.insert(manip.category) {
                    return Err(PassageError::InvalidConfig(format!(
                        "group {} lists more than one '{}' manipulation passage",
                        id, manip.category
                    )));
                }
            }
        }

        for (version, counts) in &self.word_counts {
            if counts.is_empty() {
                return Err(PassageError::InvalidConfig(format!(
                    "version '{}' has an empty word-count table",
                    version
                )));
            }
            if let Some((passage, _)) = counts.iter().find(|(_, &words)| words == 0) {
                return Err(PassageError::InvalidConfig(format!(
                    "passage '{}' in version '{}' has a zero word count",
                    passage, version
                )));
            }
        }

        Ok(())
    }

    pub fn group(&self, id: u32) -> Result<&GroupPassages, PassageError> {
        self.groups.get(&id).ok_or(PassageError::UnknownGroup(id))
    }

    pub fn word_count(&self, version: &str, passage: &str) -> Result<u32, PassageError> {
        let table = self
            .word_counts
            .get(version)
            .ok_or_else(|| PassageError::UnknownVersion(version.to_string()))?;
        table
            .get(passage)
            .copied()
            .ok_or_else(|| PassageError::MissingWordCount {
                version: version.to_string(),
                passage: passage.to_string(),
            })
    }

    /// Passages some group reads that `version` has no word count for
    pub fn coverage_gaps(&self, version: &str) -> Vec<String> {
        let Some(table) = self.word_counts.get(version) else {
            return Vec::new();
        };
        let mut missing: BTreeSet<String> = BTreeSet::new();
        for group in self.groups.values() {
            for passage in group.all_passages() {
                if !table.contains_key(passage) {
                    missing.insert(passage.to_string());
                }
            }
        }
        missing.into_iter().collect()
    }
}

/// TOML tables only allow string keys, so group ids travel as strings
mod keyed_by_string {
    use super::GroupPassages;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        groups: &BTreeMap<u32, GroupPassages>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        groups
            .iter()
            .map(|(id, group)| (id.to_string(), group))
            .collect::<BTreeMap<String, &GroupPassages>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<u32, GroupPassages>, D::Error> {
        let raw = BTreeMap::<String, GroupPassages>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(id, group)| {
                id.trim()
                    .parse::<u32>()
                    .map(|id| (id, group))
                    .map_err(|_| D::Error::custom(format!("group id '{}' is not a number", id)))
            })
            .collect()
    }
}
