//! Package identifiers.
//!
//! A package ID is an opaque, serde-transparent string. Its grammar is
//! enforced by the manifest reader's ID rule, not by this type, so that a
//! registry restored from disk can still name packages whose manifest no
//! longer parses.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique, author-scoped identifier of a package (`author/name`).
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PackageId(String);

impl PackageId {
    /// Create from any string value.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// View as string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Path-safe directory name: `author/name` becomes `author@name`.
    pub fn dir_name(&self) -> String {
        self.0.replace('/', "@")
    }

    /// The author segment, when the ID has the `author/name` shape.
    pub fn author(&self) -> Option<&str> {
        self.0.split_once('/').map(|(author, _)| author)
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PackageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PackageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for PackageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
