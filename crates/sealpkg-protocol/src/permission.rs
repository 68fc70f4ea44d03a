//! Structured sandbox denials.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::PackageId;

/// The capability a denied request needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKind {
    Network,
    NetworkHost,
    FileRead,
    FileWrite,
    /// `..` traversal or an absolute path outside the package's roots.
    PathTraversal,
    Dangerous,
    HttpServer,
    Ipc,
}

impl PermissionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionKind::Network => "network",
            PermissionKind::NetworkHost => "network_host",
            PermissionKind::FileRead => "file_read",
            PermissionKind::FileWrite => "file_write",
            PermissionKind::PathTraversal => "path_traversal",
            PermissionKind::Dangerous => "dangerous",
            PermissionKind::HttpServer => "http_server",
            PermissionKind::Ipc => "ipc",
        }
    }
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("package {package_id} denied {permission} for `{requested}`: {reason}")]
pub struct PermissionError {
    pub package_id: PackageId,
    pub permission: PermissionKind,
    pub requested: String,
    pub reason: String,
}

impl PermissionError {
    pub fn new(
        package_id: &PackageId,
        permission: PermissionKind,
        requested: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            package_id: package_id.clone(),
            permission,
            requested: requested.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_error_serializes_machine_readable_kind() {
        let error = PermissionError::new(
            &PackageId::from("demo/pkg"),
            PermissionKind::NetworkHost,
            "evil.com",
            "host not in allow-list",
        );
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["permission"], "network_host");
        assert_eq!(json["package_id"], "demo/pkg");
        assert!(error.to_string().contains("evil.com"));
    }
}
