//! Reading package declarations.
//!
//! [`ManifestReader`] decodes `manifest.toml`, either from bytes, from a
//! file, or straight out of a `.sealpkg` installer archive. Version and
//! constraint checks live in [`version`], archive handling in [`archive`].

pub mod archive;
pub mod id_rule;
pub mod reader;
pub mod version;

pub use archive::{ExtractLimits, extract_archive, pack_directory, read_manifest_bytes};
pub use id_rule::{AuthorSlashName, PackageIdRule};
pub use reader::ManifestReader;
pub use version::{
    VersionConstraint, check_dependency_constraint, check_host_compatibility, parse_version,
};
