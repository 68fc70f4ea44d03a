//! # sealpkg-protocol: package model contract
//!
//! Shared types for the extension-package subsystem: the manifest model,
//! configuration values and schemas, instance and registry records, the
//! error taxonomy, and the port through which resource loaders are told to
//! reload.
//!
//! The crate carries no runtime dependencies (no tokio, no filesystem access)
//! so it can be shared by the reader, the sandbox, the manager, and any host
//! code implementing a loader.
//!
//! ## Module Overview
//!
//! - [`ids`]: `PackageId` and its on-disk encoding
//! - [`manifest`]: `PackageDescriptor`, its sections, `ResourceKind`, file-name constants
//! - [`config`]: `ConfigValue`, `ConfigFieldSchema`, `ConfigError`
//! - [`permission`]: `PermissionKind`, `PermissionError`
//! - [`state`]: `PackageState`, `PackageInstance`, persisted registry, outcomes
//! - [`ports`]: `ResourceReloader`, `ResourceSource`
//! - [`error`]: `PackageError`, `PackageResult`

pub mod config;
pub mod error;
pub mod ids;
pub mod manifest;
pub mod permission;
pub mod ports;
pub mod state;

pub use config::{ConfigError, ConfigFieldSchema, ConfigMap, ConfigType, ConfigValue};
pub use error::{DependencyIssue, PackageError, PackageResult};
pub use ids::PackageId;
pub use manifest::{
    CONFIG_FILE, ContentManifest, DEFAULT_WRITE_PATTERN, HostRequirement, MANIFEST_FILE,
    PACKAGE_EXTENSION, PackageDescriptor, PackageIdentity, PermissionDeclaration, REGISTRY_FILE,
    ResourceKind, USER_DATA_DIR,
};
pub use permission::{PermissionError, PermissionKind};
pub use ports::{ResourceReloader, ResourceSource};
pub use state::{
    OperationOutcome, PackageInstance, PackageState, PersistedInstance, PersistedRegistry,
    ReloadOutcome, UninstallMode,
};
