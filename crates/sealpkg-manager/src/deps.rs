//! Dependency checks over the in-memory registry.

use sealpkg_manifest::check_dependency_constraint;
use sealpkg_protocol::{DependencyIssue, PackageDescriptor, PackageId, PackageState};

use crate::Entries;

/// Declared dependencies that are not installed, or whose installed version
/// falls outside the constraint.
pub(crate) fn unmet_dependencies(
    descriptor: &PackageDescriptor,
    entries: &Entries,
) -> Vec<DependencyIssue> {
    let mut issues = Vec::new();
    for (dependency, constraint) in &descriptor.dependencies {
        let dependency_id = PackageId::from(dependency.as_str());
        let installed = entries
            .get(&dependency_id)
            .map(|entry| entry.instance.descriptor.as_ref().map(|d| d.version().to_owned()));

        let satisfied = match &installed {
            Some(Some(version)) => {
                check_dependency_constraint(constraint, version).unwrap_or(false)
            }
            _ => false,
        };
        if !satisfied {
            issues.push(DependencyIssue {
                dependency: dependency_id,
                constraint: constraint.clone(),
                installed: installed.map(|version| version.unwrap_or_else(|| "unknown".into())),
            });
        }
    }
    issues
}

/// Enabled packages that declare `id` as a dependency, sorted.
pub(crate) fn enabled_dependents(entries: &Entries, id: &PackageId) -> Vec<PackageId> {
    let mut dependents: Vec<PackageId> = entries
        .iter()
        .filter(|(other, entry)| {
            *other != id
                && entry.instance.state == PackageState::Enabled
                && entry
                    .instance
                    .descriptor
                    .as_ref()
                    .is_some_and(|d| d.dependencies.contains_key(id.as_str()))
        })
        .map(|(other, _)| other.clone())
        .collect();
    dependents.sort();
    dependents
}
