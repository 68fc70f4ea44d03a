//! Manifest model: the package's self-declaration.
//!
//! Every section is optional at decode time so that a structurally valid but
//! incomplete manifest can still be decoded and reported on issue by issue.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ConfigFieldSchema;
use crate::ids::PackageId;

/// Fixed name of the declaration file at the archive root.
pub const MANIFEST_FILE: &str = "manifest.toml";
/// Installer archive extension (gzip-compressed tar).
pub const PACKAGE_EXTENSION: &str = "sealpkg";
/// Registry state file name under the data root.
pub const REGISTRY_FILE: &str = "packages.json";
/// Per-package writable area, exposed to packages as a virtual prefix.
pub const USER_DATA_DIR: &str = "_userdata";
/// Config file written into the user-data directory.
pub const CONFIG_FILE: &str = "config.json";
/// Write pattern applied when a manifest declares none.
pub const DEFAULT_WRITE_PATTERN: &str = "_userdata/*";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    #[serde(default)]
    pub package: PackageIdentity,
    /// Package ID to version constraint.
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub permissions: PermissionDeclaration,
    #[serde(default)]
    pub contents: ContentManifest,
    #[serde(default)]
    pub config: BTreeMap<String, ConfigFieldSchema>,
}

impl PackageDescriptor {
    pub fn id(&self) -> &PackageId {
        &self.package.id
    }

    pub fn version(&self) -> &str {
        &self.package.version
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageIdentity {
    #[serde(default)]
    pub id: PackageId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Host-version bounds; `[package.seal]` is accepted as an alias.
    #[serde(default, alias = "seal")]
    pub host: HostRequirement,
}

/// Inclusive semantic-version bounds the host must satisfy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRequirement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDeclaration {
    #[serde(default)]
    pub network: bool,
    /// Exact hostnames or `*.domain` wildcards. Empty means any host.
    #[serde(default)]
    pub network_hosts: Vec<String>,
    #[serde(default)]
    pub file_read: Vec<String>,
    #[serde(default)]
    pub file_write: Vec<String>,
    #[serde(default)]
    pub dangerous: bool,
    #[serde(default)]
    pub http_server: bool,
    /// Peer package IDs, `*` for any.
    #[serde(default)]
    pub ipc: Vec<String>,
}

impl PermissionDeclaration {
    /// Write patterns in force: the declared list, or `_userdata/*`.
    pub fn effective_write_patterns(&self) -> Vec<String> {
        if self.file_write.is_empty() {
            vec![DEFAULT_WRITE_PATTERN.to_owned()]
        } else {
            self.file_write.clone()
        }
    }
}

/// Relative content paths contributed by the package, per resource kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentManifest {
    #[serde(default)]
    pub scripts: Vec<String>,
    #[serde(default)]
    pub decks: Vec<String>,
    #[serde(default)]
    pub reply: Vec<String>,
    #[serde(default)]
    pub helpdoc: Vec<String>,
    #[serde(default)]
    pub template: Vec<String>,
}

impl ContentManifest {
    pub fn entries(&self, kind: ResourceKind) -> &[String] {
        match kind {
            ResourceKind::Scripts => &self.scripts,
            ResourceKind::Decks => &self.decks,
            ResourceKind::Replies => &self.reply,
            ResourceKind::HelpDocs => &self.helpdoc,
            ResourceKind::Templates => &self.template,
        }
    }

    /// Kinds this package contributes at least one path to, in canonical order.
    pub fn kinds(&self) -> Vec<ResourceKind> {
        ResourceKind::ALL
            .into_iter()
            .filter(|kind| !self.entries(*kind).is_empty())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceKind, &String)> {
        ResourceKind::ALL
            .into_iter()
            .flat_map(move |kind| self.entries(kind).iter().map(move |path| (kind, path)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    #[serde(rename = "scripts")]
    Scripts,
    #[serde(rename = "decks")]
    Decks,
    #[serde(rename = "reply")]
    Replies,
    #[serde(rename = "helpdoc")]
    HelpDocs,
    #[serde(rename = "template")]
    Templates,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Scripts,
        ResourceKind::Decks,
        ResourceKind::Replies,
        ResourceKind::HelpDocs,
        ResourceKind::Templates,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Scripts => "scripts",
            ResourceKind::Decks => "decks",
            ResourceKind::Replies => "reply",
            ResourceKind::HelpDocs => "helpdoc",
            ResourceKind::Templates => "template",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
