use std::path::PathBuf;
use std::time::Duration;

use sealpkg_protocol::{PACKAGE_EXTENSION, PackageId, REGISTRY_FILE, USER_DATA_DIR};

/// Manager settings and the on-disk layout under `root`:
///
/// ```text
/// <root>/packages.json               registry state
/// <root>/packages/<author@name>/     installed content + manifest.toml
/// <root>/data/<author@name>/_userdata/
/// <root>/archives/<author@name>.sealpkg
/// <root>/.staging/                   extraction and downloads in flight
/// ```
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub root: PathBuf,
    pub host_version: String,
    pub download_timeout: Duration,
    pub max_download_bytes: u64,
    /// Total uncompressed size an archive may extract to.
    pub max_unpacked_bytes: u64,
    pub max_archive_entries: usize,
}

impl ManagerConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            host_version: env!("CARGO_PKG_VERSION").to_owned(),
            download_timeout: Duration::from_secs(60),
            max_download_bytes: 32 * 1024 * 1024,
            max_unpacked_bytes: 256 * 1024 * 1024,
            max_archive_entries: 10_000,
        }
    }

    pub fn registry_file(&self) -> PathBuf {
        self.root.join(REGISTRY_FILE)
    }

    pub fn packages_dir(&self) -> PathBuf {
        self.root.join("packages")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn archives_dir(&self) -> PathBuf {
        self.root.join("archives")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(".staging")
    }

    pub fn install_path(&self, id: &PackageId) -> PathBuf {
        self.packages_dir().join(id.dir_name())
    }

    /// Parent of the user-data directory; removed as a whole on full uninstall.
    pub fn data_path(&self, id: &PackageId) -> PathBuf {
        self.data_dir().join(id.dir_name())
    }

    pub fn user_data_path(&self, id: &PackageId) -> PathBuf {
        self.data_path(id).join(USER_DATA_DIR)
    }

    pub fn archive_path(&self, id: &PackageId) -> PathBuf {
        self.archives_dir()
            .join(format!("{}.{PACKAGE_EXTENSION}", id.dir_name()))
    }
}
