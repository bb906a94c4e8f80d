use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{ClutError, Result};
use crate::version::ParsedVersion;

/// Result of looking up a version in the override table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideLookup {
    NotOverridden,
    /// The version graph should continue from this version instead.
    Redirect(ParsedVersion),
    /// The chain ends at the looked-up version.
    Terminate,
}

/// Per-repository corrections to an upstream version graph.
///
/// Keyed by repository slug, then by version; a `null` target terminates the chain. In JSON:
///
/// ```json
/// { "4e9a232b": { "2024.04.23.0000.0000": "2024.04.22.0000.0001", "H2017.06.06.0000.0001a": null } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionOverrides {
    repositories: HashMap<String, BTreeMap<ParsedVersion, Option<ParsedVersion>>>,
}

impl VersionOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ClutError::validation(format!("Invalid version override table: {e}")))
    }

    pub fn insert(&mut self, slug: impl Into<String>, version: ParsedVersion, target: Option<ParsedVersion>) {
        self.repositories.entry(slug.into()).or_default().insert(version, target);
    }

    pub fn lookup(&self, slug: &str, version: &ParsedVersion) -> OverrideLookup {
        match self.repositories.get(slug).and_then(|m| m.get(version)) {
            None => OverrideLookup::NotOverridden,
            Some(Some(target)) => OverrideLookup::Redirect(target.clone()),
            Some(None) => OverrideLookup::Terminate,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.values().all(|m| m.is_empty())
    }
}
