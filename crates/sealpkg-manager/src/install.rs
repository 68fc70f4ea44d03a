//! Install from a local archive or a URL.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use sealpkg_config::init_defaults;
use sealpkg_manifest::{ExtractLimits, check_host_compatibility, extract_archive};
use sealpkg_protocol::{
    OperationOutcome, PACKAGE_EXTENSION, PackageDescriptor, PackageError, PackageInstance,
    PackageResult, PackageState,
};
use sealpkg_sandbox::Sandbox;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{PackageManager, RegistryEntry, deps, write_config_mirror};

/// A per-operation directory under the staging root, removed on drop.
struct StagingDir {
    path: PathBuf,
}

impl StagingDir {
    async fn create(staging_root: &Path) -> PackageResult<Self> {
        let path = staging_root.join(Uuid::new_v4().simple().to_string());
        fs::create_dir_all(&path).await?;
        Ok(Self { path })
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if let Err(error) = std::fs::remove_dir_all(&self.path)
            && error.kind() != io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), %error, "failed to clean staging directory");
        }
    }
}

fn join_error(error: tokio::task::JoinError) -> PackageError {
    PackageError::Io(io::Error::other(error.to_string()))
}

fn sha256_file(path: &Path) -> PackageResult<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

impl PackageManager {
    /// Install a package archive from the local filesystem.
    #[instrument(skip(self), fields(archive = %archive.display()))]
    pub async fn install(&self, archive: &Path) -> PackageResult<OperationOutcome> {
        let _gate = self.inner.fs_gate.lock().await;
        self.install_locked(archive).await
    }

    /// Download an archive and install it. A failed download leaves the
    /// registry untouched.
    #[instrument(skip(self))]
    pub async fn install_from_url(&self, url: &str) -> PackageResult<OperationOutcome> {
        let staging = StagingDir::create(&self.inner.config.staging_dir()).await?;
        let target = staging.path.join(format!("download.{PACKAGE_EXTENSION}"));
        let timeout = self.inner.config.download_timeout;

        match tokio::time::timeout(timeout, self.download(url, &target)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(PackageError::Download(format!(
                    "{url}: timed out after {}s",
                    timeout.as_secs()
                )));
            }
        }

        let _gate = self.inner.fs_gate.lock().await;
        self.install_locked(&target).await
    }

    async fn download(&self, url: &str, target: &Path) -> PackageResult<()> {
        let max_bytes = self.inner.config.max_download_bytes;
        let mut response = self
            .inner
            .http
            .get(url)
            .send()
            .await
            .map_err(|error| PackageError::Download(format!("{url}: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PackageError::Download(format!("{url}: HTTP {status}")));
        }
        if let Some(length) = response.content_length()
            && length > max_bytes
        {
            return Err(PackageError::Download(format!(
                "{url}: archive is {length} bytes, limit is {max_bytes}"
            )));
        }

        let mut file = fs::File::create(target).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|error| PackageError::Download(format!("{url}: {error}")))?
        {
            written += chunk.len() as u64;
            if written > max_bytes {
                return Err(PackageError::Download(format!(
                    "{url}: archive exceeds {max_bytes} bytes"
                )));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        debug!(bytes = written, "archive downloaded");
        Ok(())
    }

    async fn install_locked(&self, archive: &Path) -> PackageResult<OperationOutcome> {
        let reader = self.inner.reader.clone();
        let archive_owned = archive.to_path_buf();
        let descriptor =
            tokio::task::spawn_blocking(move || reader.parse_from_archive(&archive_owned))
                .await
                .map_err(join_error)??;
        let id = descriptor.id().clone();
        check_host_compatibility(&descriptor, &self.inner.config.host_version)?;
        self.check_installable(&descriptor)?;

        let config = &self.inner.config;
        let staging = StagingDir::create(&config.staging_dir()).await?;
        let content = staging.path.join("content");
        let limits = ExtractLimits {
            max_bytes: config.max_unpacked_bytes,
            max_entries: config.max_archive_entries,
        };
        let (files, checksum) = {
            let archive = archive.to_path_buf();
            let content = content.clone();
            tokio::task::spawn_blocking(move || -> PackageResult<(usize, String)> {
                let files = extract_archive(&archive, &content, limits)?;
                Ok((files.len(), sha256_file(&archive)?))
            })
            .await
            .map_err(join_error)??
        };
        debug!(files, "archive extracted");

        let install_path = config.install_path(&id);
        let user_data_path = config.user_data_path(&id);
        let source_path = config.archive_path(&id);

        if fs::try_exists(&install_path).await? {
            warn!(path = %install_path.display(), "removing stale install directory");
            fs::remove_dir_all(&install_path).await?;
        }
        if let Some(parent) = install_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&content, &install_path).await?;

        let placed = async {
            fs::create_dir_all(&user_data_path).await?;
            if let Some(parent) = source_path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::copy(archive, &source_path).await?;
            Ok::<_, PackageError>(())
        }
        .await;
        if let Err(error) = placed {
            self.discard_install(&install_path, &source_path).await;
            return Err(error);
        }

        let now = Utc::now();
        let defaults = init_defaults(&descriptor.config);
        let sandbox = Arc::new(Sandbox::new(
            id.clone(),
            descriptor.permissions.clone(),
            &install_path,
            &user_data_path,
        ));
        let version = descriptor.version().to_owned();
        let instance = PackageInstance {
            id: id.clone(),
            descriptor: Some(descriptor),
            state: PackageState::Installed,
            install_time: now,
            updated_at: now,
            install_path: install_path.clone(),
            source_path: source_path.clone(),
            user_data_path: user_data_path.clone(),
            checksum: Some(checksum),
            config: defaults.clone(),
            err_text: None,
            pending_reload: Vec::new(),
        };

        let committed = self
            .commit(|entries| {
                if entries.contains_key(&id) {
                    return Err(PackageError::AlreadyInstalled(id.clone()));
                }
                entries.insert(
                    id.clone(),
                    RegistryEntry {
                        instance,
                        sandbox: Some(sandbox),
                    },
                );
                Ok(())
            })
            .await;
        if let Err(error) = committed {
            self.discard_install(&install_path, &source_path).await;
            return Err(error);
        }

        write_config_mirror(&user_data_path, &defaults).await;
        info!(package_id = %id, %version, files, "package installed");
        Ok(OperationOutcome::done(format!(
            "package {id} {version} installed"
        )))
    }

    fn check_installable(&self, descriptor: &PackageDescriptor) -> PackageResult<()> {
        let entries = self.inner.entries.read();
        let id = descriptor.id();
        if entries.contains_key(id) {
            return Err(PackageError::AlreadyInstalled(id.clone()));
        }
        // Distinct ids must never share on-disk locations, whatever the id rule.
        let config = &self.inner.config;
        let claimed = [
            config.install_path(id),
            config.data_path(id),
            config.archive_path(id),
        ];
        if let Some(owner) = entries.values().map(|entry| &entry.instance).find(|other| {
            claimed.contains(&other.install_path)
                || claimed.contains(&other.source_path)
                || other.user_data_path.parent() == Some(claimed[1].as_path())
        }) {
            return Err(PackageError::InvalidState(format!(
                "package {id} would reuse the directories of installed package {}",
                owner.id
            )));
        }
        let issues = deps::unmet_dependencies(descriptor, &entries);
        if !issues.is_empty() {
            return Err(PackageError::Dependency {
                package_id: id.clone(),
                issues,
            });
        }
        Ok(())
    }

    async fn discard_install(&self, install_path: &Path, source_path: &Path) {
        if let Err(error) = fs::remove_dir_all(install_path).await {
            warn!(path = %install_path.display(), %error, "failed to remove partial install");
        }
        if let Err(error) = fs::remove_file(source_path).await
            && error.kind() != io::ErrorKind::NotFound
        {
            warn!(path = %source_path.display(), %error, "failed to remove archive copy");
        }
    }
}
