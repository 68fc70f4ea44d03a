//! Error taxonomy for package operations.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;
use crate::ids::PackageId;
use crate::permission::PermissionError;

/// Errors returned by manifest parsing, sandbox checks, and manager operations.
#[derive(Debug, Error)]
pub enum PackageError {
    #[error("malformed manifest: {0}")]
    MalformedManifest(String),
    #[error("manifest not found: {0}")]
    ManifestNotFound(String),
    #[error("manifest is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("invalid package id `{id}`: {reason}")]
    InvalidPackageId { id: String, reason: String },
    #[error("invalid version `{value}`: {reason}")]
    InvalidVersion { value: String, reason: String },
    #[error("invalid version constraint `{value}`: {reason}")]
    InvalidConstraint { value: String, reason: String },
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),
    #[error("package {package_id} requires host {required}, running {host}")]
    HostIncompatible {
        package_id: PackageId,
        required: String,
        host: String,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Permission(#[from] PermissionError),
    #[error("package already installed: {0}")]
    AlreadyInstalled(PackageId),
    #[error("package not found: {0}")]
    NotFound(PackageId),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("unmet dependencies for {package_id}: {}", join_issues(.issues))]
    Dependency {
        package_id: PackageId,
        issues: Vec<DependencyIssue>,
    },
    #[error("package {package_id} is required by enabled packages: {}", join_ids(.dependents))]
    DependentsEnabled {
        package_id: PackageId,
        dependents: Vec<PackageId>,
    },
    #[error("malformed archive: {0}")]
    MalformedArchive(String),
    #[error("download failed: {0}")]
    Download(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("reload failed: {0}")]
    Reload(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for PackageError {
    fn from(error: serde_json::Error) -> Self {
        PackageError::Serialization(error.to_string())
    }
}

/// Convenience result type for package operations.
pub type PackageResult<T> = Result<T, PackageError>;

/// One dependency that is absent or whose installed version falls outside
/// the declared constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyIssue {
    pub dependency: PackageId,
    pub constraint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed: Option<String>,
}

impl fmt::Display for DependencyIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.installed {
            Some(version) => write!(
                f,
                "{} {} does not satisfy {}",
                self.dependency, version, self.constraint
            ),
            None => write!(f, "{} ({}) is not installed", self.dependency, self.constraint),
        }
    }
}

fn join_issues(issues: &[DependencyIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn join_ids(ids: &[PackageId]) -> String {
    ids.iter().map(PackageId::as_str).collect::<Vec<_>>().join(", ")
}
