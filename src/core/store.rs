//! Identifiers and provenance types shared by every tier.
//!
//! A record is addressed by `(ProjectId, StateKey)`. Both halves end up as path
//! components of the primary tier and as segments of the secondary key space, so
//! both are validated to a conservative character set on construction.

use crate::core::error::StateError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shared rule for anything that becomes a path component or key segment.
pub fn validate_segment(kind: &str, raw: &str) -> Result<(), StateError> {
    if raw.is_empty() {
        return Err(StateError::ValidationError(format!("{} must not be empty", kind)));
    }
    if raw.starts_with('.') || raw.contains("..") {
        return Err(StateError::ValidationError(format!(
            "{} '{}' must not start with '.' or contain '..'",
            kind, raw
        )));
    }
    if let Some(bad) = raw
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(StateError::ValidationError(format!(
            "{} '{}' contains invalid character {:?}",
            kind, raw, bad
        )));
    }
    Ok(())
}

/// Opaque, stable project identifier. Scopes every storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(raw: impl Into<String>) -> Result<Self, StateError> {
        let raw = raw.into();
        validate_segment("project id", &raw)?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ProjectId {
    type Error = StateError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProjectId> for String {
    fn from(value: ProjectId) -> Self {
        value.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Namespaced name of one logical record within a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateKey(String);

impl StateKey {
    pub const REQUIREMENTS: &'static str = "requirements";
    pub const IMPLEMENTATION_SCOPE: &'static str = "implementationScope";
    pub const MOCKUPS: &'static str = "mockups";

    pub fn new(raw: impl Into<String>) -> Result<Self, StateError> {
        let raw = raw.into();
        validate_segment("state key", &raw)?;
        Ok(Self(raw))
    }

    pub fn requirements() -> Self {
        Self(Self::REQUIREMENTS.to_string())
    }

    pub fn implementation_scope() -> Self {
        Self(Self::IMPLEMENTATION_SCOPE.to_string())
    }

    pub fn mockups() -> Self {
        Self(Self::MOCKUPS.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The three storage backends, in default read priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierKind {
    Primary,
    Backup,
    Secondary,
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TierKind::Primary => "primary",
            TierKind::Backup => "backup",
            TierKind::Secondary => "secondary",
        };
        f.write_str(s)
    }
}

/// Why `load` fell back to the caller-supplied default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultReason {
    /// No tier held anything for the key.
    Empty,
    /// At least one tier held bytes, but none of them parsed.
    AllUnreadable,
}

/// Where a loaded value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "source", content = "detail")]
pub enum Provenance {
    Tier(TierKind),
    Default(DefaultReason),
}

/// A value returned by the read pipeline together with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded<T> {
    pub value: T,
    pub provenance: Provenance,
}

impl<T> Loaded<T> {
    pub fn from_tier(&self) -> Option<TierKind> {
        match self.provenance {
            Provenance::Tier(kind) => Some(kind),
            Provenance::Default(_) => None,
        }
    }
}
