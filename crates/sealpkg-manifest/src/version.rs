//! Semantic-version checks for host bounds and dependency constraints.
//!
//! Constraints use Cargo requirement syntax (`^1.2`, `>=1.0, <2.0`, `~0.3`,
//! `*`) with `||` separating alternatives.

use std::fmt;

use sealpkg_protocol::{PackageDescriptor, PackageError, PackageResult};
use semver::{Version, VersionReq};
use tracing::debug;

pub fn parse_version(value: &str) -> PackageResult<Version> {
    Version::parse(value.trim()).map_err(|error| PackageError::InvalidVersion {
        value: value.to_owned(),
        reason: error.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    raw: String,
    alternatives: Vec<VersionReq>,
}

impl VersionConstraint {
    pub fn parse(raw: &str) -> PackageResult<Self> {
        let invalid = |reason: String| PackageError::InvalidConstraint {
            value: raw.to_owned(),
            reason,
        };
        if raw.trim().is_empty() {
            return Err(invalid("constraint is empty".to_owned()));
        }

        let alternatives = raw
            .split("||")
            .map(|alternative| {
                let alternative = alternative.trim();
                if alternative.is_empty() {
                    return Err(invalid("empty alternative".to_owned()));
                }
                VersionReq::parse(alternative).map_err(|error| invalid(error.to_string()))
            })
            .collect::<PackageResult<Vec<_>>>()?;

        Ok(Self {
            raw: raw.to_owned(),
            alternatives,
        })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Whether `version` satisfies `constraint`. Malformed input on either side
/// is an error, never `false`.
pub fn check_dependency_constraint(constraint: &str, version: &str) -> PackageResult<bool> {
    let constraint = VersionConstraint::parse(constraint)?;
    let version = parse_version(version)?;
    Ok(constraint.matches(&version))
}

/// Compare the host version against the descriptor's inclusive bounds.
///
/// An unparsable host version or bound is treated as no constraint.
pub fn check_host_compatibility(
    descriptor: &PackageDescriptor,
    host_version: &str,
) -> PackageResult<()> {
    let Ok(host) = Version::parse(host_version.trim()) else {
        debug!(host_version, "host version unparsable, skipping compatibility check");
        return Ok(());
    };
    let bounds = &descriptor.package.host;

    if let Some(min) = bounds.min_version.as_deref()
        && let Ok(min_version) = Version::parse(min.trim())
        && host < min_version
    {
        return Err(PackageError::HostIncompatible {
            package_id: descriptor.id().clone(),
            required: format!(">= {min}"),
            host: host_version.to_owned(),
        });
    }

    if let Some(max) = bounds.max_version.as_deref()
        && let Ok(max_version) = Version::parse(max.trim())
        && host > max_version
    {
        return Err(PackageError::HostIncompatible {
            package_id: descriptor.id().clone(),
            required: format!("<= {max}"),
            host: host_version.to_owned(),
        });
    }

    Ok(())
}
