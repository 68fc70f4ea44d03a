//! Capability enforcement for one installed package.
//!
//! A [`Sandbox`] is built from the package's declared permissions and its
//! two roots: the install directory (read-mostly content) and the user-data
//! directory, which packages address through the virtual `_userdata/`
//! prefix. Every check either returns the normalized request or a
//! [`PermissionError`] naming the capability that was missing.
//!
//! [`SandboxedFs`] and [`SandboxedHttp`] wrap the common operations so that
//! a check always runs before the side effect.

mod fs;
mod http;
pub mod pattern;

use std::path::{Path, PathBuf};

use sealpkg_protocol::{
    PackageId, PermissionDeclaration, PermissionError, PermissionKind, USER_DATA_DIR,
};
use tracing::warn;

pub use fs::SandboxedFs;
pub use http::SandboxedHttp;
pub use pattern::{host_allowed, matches_any, matches_pattern};

#[derive(Debug, Clone)]
pub struct Sandbox {
    package_id: PackageId,
    permissions: PermissionDeclaration,
    install_path: PathBuf,
    user_data_path: PathBuf,
}

impl Sandbox {
    pub fn new(
        package_id: PackageId,
        permissions: PermissionDeclaration,
        install_path: impl Into<PathBuf>,
        user_data_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            package_id,
            permissions,
            install_path: install_path.into(),
            user_data_path: user_data_path.into(),
        }
    }

    pub fn package_id(&self) -> &PackageId {
        &self.package_id
    }

    pub fn permissions(&self) -> &PermissionDeclaration {
        &self.permissions
    }

    pub fn install_path(&self) -> &Path {
        &self.install_path
    }

    pub fn user_data_path(&self) -> &Path {
        &self.user_data_path
    }

    fn deny(
        &self,
        permission: PermissionKind,
        requested: impl Into<String>,
        reason: impl Into<String>,
    ) -> PermissionError {
        let error = PermissionError::new(&self.package_id, permission, requested, reason);
        warn!(
            package_id = %error.package_id,
            permission = %error.permission,
            requested = %error.requested,
            reason = %error.reason,
            "sandbox denied request"
        );
        error
    }

    /// Rewrite `path` relative to the package, using `/` separators.
    ///
    /// Absolute paths are accepted only inside the install or user-data
    /// directory. Any `..` segment is rejected.
    pub fn normalize_path(&self, path: &str) -> Result<String, PermissionError> {
        if path.trim().is_empty() {
            return Err(self.deny(PermissionKind::PathTraversal, path, "empty path"));
        }

        let candidate = Path::new(path);
        let relative = if candidate.is_absolute() || path.starts_with('/') {
            if let Ok(rest) = candidate.strip_prefix(&self.user_data_path) {
                Path::new(USER_DATA_DIR).join(rest).to_string_lossy().into_owned()
            } else if let Ok(rest) = candidate.strip_prefix(&self.install_path) {
                rest.to_string_lossy().into_owned()
            } else {
                return Err(self.deny(
                    PermissionKind::PathTraversal,
                    path,
                    "absolute path is outside the package directory",
                ));
            }
        } else {
            path.to_owned()
        };

        let mut segments = Vec::new();
        for segment in relative.split(['/', '\\']) {
            match segment {
                ".." => {
                    return Err(self.deny(
                        PermissionKind::PathTraversal,
                        path,
                        "path traversal is not allowed",
                    ));
                }
                "" | "." => {}
                other => segments.push(other),
            }
        }
        Ok(segments.join("/"))
    }

    /// Check a read and return the normalized path.
    pub fn check_read(&self, path: &str) -> Result<String, PermissionError> {
        let normalized = self.normalize_path(path)?;
        if !matches_any(&normalized, &self.permissions.file_read) {
            return Err(self.deny(
                PermissionKind::FileRead,
                normalized,
                "path matches no declared read pattern",
            ));
        }
        Ok(normalized)
    }

    /// Check a write and return the normalized path. Without declared write
    /// patterns only `_userdata/*` is writable.
    pub fn check_write(&self, path: &str) -> Result<String, PermissionError> {
        let normalized = self.normalize_path(path)?;
        if !matches_any(&normalized, &self.permissions.effective_write_patterns()) {
            return Err(self.deny(
                PermissionKind::FileWrite,
                normalized,
                "path matches no declared write pattern",
            ));
        }
        Ok(normalized)
    }

    pub fn check_network(&self, url: &str) -> Result<(), PermissionError> {
        if !self.permissions.network {
            return Err(self.deny(
                PermissionKind::Network,
                url,
                "network access is not declared",
            ));
        }
        if self.permissions.network_hosts.is_empty() {
            return Ok(());
        }

        let host = reqwest::Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(str::to_owned));
        let Some(host) = host else {
            return Err(self.deny(PermissionKind::NetworkHost, url, "url has no host"));
        };
        if !host_allowed(&host, &self.permissions.network_hosts) {
            return Err(self.deny(
                PermissionKind::NetworkHost,
                host,
                "host is not in the declared allow-list",
            ));
        }
        Ok(())
    }

    pub fn check_dangerous(&self, operation: &str) -> Result<(), PermissionError> {
        if self.permissions.dangerous {
            Ok(())
        } else {
            Err(self.deny(
                PermissionKind::Dangerous,
                operation,
                "privileged operations are not declared",
            ))
        }
    }

    pub fn check_http_server(&self) -> Result<(), PermissionError> {
        if self.permissions.http_server {
            Ok(())
        } else {
            Err(self.deny(
                PermissionKind::HttpServer,
                "http_server",
                "serving HTTP is not declared",
            ))
        }
    }

    pub fn check_ipc(&self, target: &str) -> Result<(), PermissionError> {
        let allowed = self
            .permissions
            .ipc
            .iter()
            .any(|peer| peer == "*" || peer == target);
        if allowed {
            Ok(())
        } else {
            Err(self.deny(
                PermissionKind::Ipc,
                target,
                "peer is not in the declared ipc list",
            ))
        }
    }

    /// Host path for an already-normalized package path.
    pub fn resolve(&self, normalized: &str) -> PathBuf {
        if normalized == USER_DATA_DIR {
            return self.user_data_path.clone();
        }
        match normalized
            .strip_prefix(USER_DATA_DIR)
            .and_then(|rest| rest.strip_prefix('/'))
        {
            Some(rest) => self.user_data_path.join(rest),
            None => self.install_path.join(normalized),
        }
    }
}
