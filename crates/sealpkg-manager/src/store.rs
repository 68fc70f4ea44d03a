use std::path::{Path, PathBuf};

use sealpkg_protocol::{PackageResult, PersistedRegistry};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

/// The registry file. Writes go through a temp file and a rename so a
/// reader never observes a partial document.
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty registry.
    pub async fn load(&self) -> PackageResult<PersistedRegistry> {
        if !fs::try_exists(&self.path).await? {
            return Ok(PersistedRegistry::default());
        }
        let bytes = fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn save(&self, registry: &PersistedRegistry) -> PackageResult<()> {
        let parent = self
            .path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).await?;

        let file_name = self
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("registry");
        let temp_path = parent.join(format!(".{file_name}.tmp-{}", Uuid::new_v4().simple()));
        let payload = serde_json::to_vec_pretty(registry)?;

        fs::write(&temp_path, payload).await?;
        if let Err(error) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(error.into());
        }
        debug!(path = %self.path.display(), packages = registry.packages.len(), "registry persisted");
        Ok(())
    }
}
