//! Instance lifecycle, the persisted registry projection, and operation outcomes.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ConfigMap;
use crate::ids::PackageId;
use crate::manifest::{PackageDescriptor, ResourceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageState {
    /// Installed and never enabled.
    Installed,
    Enabled,
    /// Explicitly disabled after having been enabled.
    Disabled,
    /// Manifest failed to re-parse or a resource failed to load.
    Error,
}

impl PackageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageState::Installed => "installed",
            PackageState::Enabled => "enabled",
            PackageState::Disabled => "disabled",
            PackageState::Error => "error",
        }
    }
}

impl fmt::Display for PackageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UninstallMode {
    /// Remove install files, user data, and the registry record.
    #[default]
    Full,
    /// Remove install files and the registry record, keep user data.
    KeepData,
    /// Keep everything on disk, only disable.
    DisableOnly,
}

impl UninstallMode {
    /// Unknown or empty input means `Full`.
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "keep_data" => UninstallMode::KeepData,
            "disable_only" => UninstallMode::DisableOnly,
            _ => UninstallMode::Full,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UninstallMode::Full => "full",
            UninstallMode::KeepData => "keep_data",
            UninstallMode::DisableOnly => "disable_only",
        }
    }
}

/// A registered package as the manager holds it in memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageInstance {
    pub id: PackageId,
    /// Absent when the installed manifest could not be re-parsed at startup.
    #[serde(rename = "manifest")]
    pub descriptor: Option<PackageDescriptor>,
    pub state: PackageState,
    pub install_time: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub install_path: PathBuf,
    pub source_path: PathBuf,
    pub user_data_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default)]
    pub config: ConfigMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err_text: Option<String>,
    #[serde(default)]
    pub pending_reload: Vec<ResourceKind>,
}

impl PackageInstance {
    pub fn to_persisted(&self) -> PersistedInstance {
        PersistedInstance {
            state: self.state,
            install_time: self.install_time,
            updated_at: self.updated_at,
            install_path: self.install_path.clone(),
            source_path: self.source_path.clone(),
            user_data_path: Some(self.user_data_path.clone()),
            checksum: self.checksum.clone(),
            config: self.config.clone(),
        }
    }

    /// Content kinds declared by the bound descriptor.
    pub fn content_kinds(&self) -> Vec<ResourceKind> {
        self.descriptor
            .as_ref()
            .map(|descriptor| descriptor.contents.kinds())
            .unwrap_or_default()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Trimmed projection of an instance written to the registry file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedInstance {
    pub state: PackageState,
    pub install_time: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub install_path: PathBuf,
    pub source_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default)]
    pub config: ConfigMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedRegistry {
    #[serde(default)]
    pub packages: BTreeMap<PackageId, PersistedInstance>,
}

/// Result of install, uninstall, enable, and disable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub success: bool,
    pub message: String,
    pub reload_needed: bool,
    #[serde(default)]
    pub reload_hints: Vec<String>,
}

impl OperationOutcome {
    pub fn done(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            reload_needed: false,
            reload_hints: Vec::new(),
        }
    }

    /// Successful outcome that asks for the given kinds to be reloaded.
    pub fn with_reload(message: impl Into<String>, kinds: &[ResourceKind]) -> Self {
        Self {
            success: true,
            message: message.into(),
            reload_needed: !kinds.is_empty(),
            reload_hints: kinds.iter().map(|kind| kind.as_str().to_owned()).collect(),
        }
    }
}

/// Result of reload and reload-all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadOutcome {
    pub success: bool,
    pub message: String,
    /// Resource kind to the loader's result text.
    #[serde(default)]
    pub reloaded_items: BTreeMap<String, String>,
    pub need_restart: bool,
    #[serde(default)]
    pub restart_hints: Vec<String>,
}

impl ReloadOutcome {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Self::default()
        }
    }
}
