use std::path::Path;
use std::sync::Arc;

use sealpkg_protocol::{
    ConfigFieldSchema, ConfigType, PackageDescriptor, PackageError, PackageResult,
};
use tracing::{debug, instrument};

use crate::archive::read_manifest_bytes;
use crate::id_rule::{AuthorSlashName, PackageIdRule};
use crate::version::{VersionConstraint, parse_version};

/// Parses and validates `manifest.toml`.
#[derive(Debug, Clone)]
pub struct ManifestReader {
    id_rule: Arc<dyn PackageIdRule>,
}

impl Default for ManifestReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ManifestReader {
    pub fn new() -> Self {
        Self {
            id_rule: Arc::new(AuthorSlashName),
        }
    }

    pub fn with_id_rule(id_rule: Arc<dyn PackageIdRule>) -> Self {
        Self { id_rule }
    }

    /// Decode only. Missing sections come back empty.
    pub fn parse(&self, bytes: &[u8]) -> PackageResult<PackageDescriptor> {
        let text = std::str::from_utf8(bytes)
            .map_err(|error| PackageError::MalformedManifest(error.to_string()))?;
        toml::from_str(text).map_err(|error| PackageError::MalformedManifest(error.to_string()))
    }

    /// Every problem found, in a stable order. Empty for a valid manifest.
    pub fn validate(&self, descriptor: &PackageDescriptor) -> Vec<String> {
        let mut issues = Vec::new();
        let package = &descriptor.package;

        if package.id.is_empty() {
            issues.push("package.id is required".to_owned());
        } else if let Err(reason) = self.id_rule.check(package.id.as_str()) {
            issues.push(format!("package.id `{}` is invalid: {reason}", package.id));
        }
        if package.name.trim().is_empty() {
            issues.push("package.name is required".to_owned());
        }
        if package.version.trim().is_empty() {
            issues.push("package.version is required".to_owned());
        } else if let Err(error) = parse_version(&package.version) {
            issues.push(format!("package.version: {error}"));
        }

        for (dependency, constraint) in &descriptor.dependencies {
            if let Err(error) = VersionConstraint::parse(constraint) {
                issues.push(format!("dependencies.{dependency}: {error}"));
            }
        }

        for (key, schema) in &descriptor.config {
            schema_issues(key, schema, &mut issues);
        }

        issues
    }

    /// Decode and fail on the first violation.
    pub fn parse_strict(&self, bytes: &[u8]) -> PackageResult<PackageDescriptor> {
        let descriptor = self.parse(bytes)?;
        let package = &descriptor.package;

        if package.id.is_empty() {
            return Err(PackageError::MissingField("package.id"));
        }
        self.id_rule
            .check(package.id.as_str())
            .map_err(|reason| PackageError::InvalidPackageId {
                id: package.id.to_string(),
                reason,
            })?;
        if package.name.trim().is_empty() {
            return Err(PackageError::MissingField("package.name"));
        }
        if package.version.trim().is_empty() {
            return Err(PackageError::MissingField("package.version"));
        }
        parse_version(&package.version)?;

        for constraint in descriptor.dependencies.values() {
            VersionConstraint::parse(constraint)?;
        }

        let mut schema_problems = Vec::new();
        for (key, schema) in &descriptor.config {
            schema_issues(key, schema, &mut schema_problems);
        }
        if let Some(first) = schema_problems.into_iter().next() {
            return Err(PackageError::InvalidManifest(first));
        }

        for (kind, path) in descriptor.contents.iter() {
            if let Some(reason) = content_path_issue(path) {
                return Err(PackageError::InvalidManifest(format!(
                    "contents.{kind} entry `{path}` {reason}"
                )));
            }
        }

        debug!(package_id = %package.id, version = %package.version, "manifest parsed");
        Ok(descriptor)
    }

    pub fn parse_file(&self, path: &Path) -> PackageResult<PackageDescriptor> {
        let bytes = std::fs::read(path).map_err(|error| match error.kind() {
            std::io::ErrorKind::NotFound => {
                PackageError::ManifestNotFound(path.display().to_string())
            }
            _ => PackageError::Io(error),
        })?;
        self.parse_strict(&bytes)
    }

    #[instrument(skip(self), fields(archive = %path.display()))]
    pub fn parse_from_archive(&self, path: &Path) -> PackageResult<PackageDescriptor> {
        let bytes = read_manifest_bytes(path)?;
        self.parse_strict(&bytes)
    }
}

fn schema_issues(key: &str, schema: &ConfigFieldSchema, issues: &mut Vec<String>) {
    if schema.kind.trim().is_empty() {
        issues.push(format!("config.{key} is missing a type"));
        return;
    }
    match schema.config_type() {
        None => issues.push(format!("config.{key} has unsupported type `{}`", schema.kind)),
        Some(ConfigType::Array) => {
            if let Some(items) = &schema.items {
                schema_issues(&format!("{key}[]"), items, issues);
            }
        }
        Some(ConfigType::Object) => {
            for (property, nested) in &schema.properties {
                schema_issues(&format!("{key}.{property}"), nested, issues);
            }
        }
        Some(_) => {}
    }
}

fn content_path_issue(path: &str) -> Option<&'static str> {
    if path.trim().is_empty() {
        return Some("is empty");
    }
    let bytes = path.as_bytes();
    if path.starts_with('/')
        || path.starts_with('\\')
        || (bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':')
    {
        return Some("is absolute");
    }
    if path.split(['/', '\\']).any(|segment| segment == "..") {
        return Some("escapes the package directory");
    }
    None
}
