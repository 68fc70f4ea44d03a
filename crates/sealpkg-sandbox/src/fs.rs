use std::fs::Metadata;
use std::sync::Arc;

use sealpkg_protocol::PackageResult;
use tokio::fs;
use tracing::debug;

use crate::Sandbox;

/// Filesystem access for package code, checked against the sandbox first.
#[derive(Debug, Clone)]
pub struct SandboxedFs {
    sandbox: Arc<Sandbox>,
}

impl SandboxedFs {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }

    pub async fn read(&self, path: &str) -> PackageResult<Vec<u8>> {
        let normalized = self.sandbox.check_read(path)?;
        Ok(fs::read(self.sandbox.resolve(&normalized)).await?)
    }

    pub async fn read_to_string(&self, path: &str) -> PackageResult<String> {
        let normalized = self.sandbox.check_read(path)?;
        Ok(fs::read_to_string(self.sandbox.resolve(&normalized)).await?)
    }

    /// Creates missing parent directories.
    pub async fn write(&self, path: &str, contents: impl AsRef<[u8]>) -> PackageResult<()> {
        let normalized = self.sandbox.check_write(path)?;
        let target = self.sandbox.resolve(&normalized);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&target, contents).await?;
        debug!(package_id = %self.sandbox.package_id(), path = %normalized, "package file written");
        Ok(())
    }

    pub async fn stat(&self, path: &str) -> PackageResult<Metadata> {
        let normalized = self.sandbox.check_read(path)?;
        Ok(fs::metadata(self.sandbox.resolve(&normalized)).await?)
    }

    /// Entry names of a directory, sorted.
    pub async fn list(&self, path: &str) -> PackageResult<Vec<String>> {
        let normalized = self.sandbox.check_read(path)?;
        let mut entries = fs::read_dir(self.sandbox.resolve(&normalized)).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    pub async fn create_dir(&self, path: &str) -> PackageResult<()> {
        let normalized = self.sandbox.check_write(path)?;
        fs::create_dir_all(self.sandbox.resolve(&normalized)).await?;
        Ok(())
    }

    /// Removes a file or an empty directory.
    pub async fn remove(&self, path: &str) -> PackageResult<()> {
        let normalized = self.sandbox.check_write(path)?;
        let target = self.sandbox.resolve(&normalized);
        if fs::metadata(&target).await?.is_dir() {
            fs::remove_dir(&target).await?;
        } else {
            fs::remove_file(&target).await?;
        }
        debug!(package_id = %self.sandbox.package_id(), path = %normalized, "package file removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use anyhow::Result;
    use sealpkg_protocol::{PackageError, PackageId, PermissionDeclaration, PermissionKind};

    use super::*;

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    #[tokio::test]
    async fn writes_land_in_user_data_and_reads_need_patterns() -> Result<()> {
        let root = unique_test_root("sealpkg-sandbox-fs");
        let install = root.join("install");
        let user_data = root.join("data/_userdata");
        fs::create_dir_all(install.join("decks")).await?;
        fs::write(install.join("decks/tarot.toml"), "cards = []").await?;

        let sandbox = Arc::new(Sandbox::new(
            PackageId::from("demo/pkg"),
            PermissionDeclaration {
                file_read: vec!["decks/*".to_owned(), "_userdata/**".to_owned()],
                ..PermissionDeclaration::default()
            },
            &install,
            &user_data,
        ));
        let files = SandboxedFs::new(sandbox);

        files.write("_userdata/saves/slot1.json", b"{}").await?;
        assert_eq!(
            fs::read_to_string(user_data.join("saves/slot1.json")).await?,
            "{}"
        );
        assert_eq!(files.list("_userdata/saves").await?, vec!["slot1.json"]);
        assert!(files.stat("_userdata/saves/slot1.json").await?.is_file());
        assert_eq!(files.read_to_string("decks/tarot.toml").await?, "cards = []");

        match files.write("decks/tarot.toml", "overwrite").await {
            Err(PackageError::Permission(error)) => {
                assert_eq!(error.permission, PermissionKind::FileWrite)
            }
            other => panic!("expected write denial, got {other:?}"),
        }
        assert_eq!(
            fs::read_to_string(install.join("decks/tarot.toml")).await?,
            "cards = []"
        );

        files.remove("_userdata/saves/slot1.json").await?;
        files.remove("_userdata/saves").await?;
        assert!(!fs::try_exists(user_data.join("saves")).await?);

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }
}
