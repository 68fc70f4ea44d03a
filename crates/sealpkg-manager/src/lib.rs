//! Package registry and lifecycle.
//!
//! [`PackageManager`] owns every installed [`PackageInstance`], drives the
//! `Installed → Enabled ⇄ Disabled` state machine (with `Error` for broken
//! manifests and failed loads), persists the registry after each mutation,
//! and tells the host's resource loaders when to refresh.
//!
//! Locking: the registry table sits behind a synchronous `RwLock` that is
//! held only for the metadata update itself, never across I/O. Mutations
//! are serialized by an async commit lock so that a failed registry write
//! can restore the previous table. Install and uninstall additionally hold
//! a filesystem gate around the package directories.

mod config;
mod deps;
mod install;
mod reload;
mod store;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use sealpkg_config::{validate_config, with_defaults};
use sealpkg_manifest::{ManifestReader, PackageIdRule};
use sealpkg_protocol::{
    CONFIG_FILE, ConfigFieldSchema, ConfigMap, MANIFEST_FILE, OperationOutcome, PackageError,
    PackageId, PackageInstance, PackageResult, PackageState, PersistedInstance,
    PersistedRegistry, ResourceKind, ResourceReloader, ResourceSource, UninstallMode,
};
use sealpkg_sandbox::Sandbox;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub use config::ManagerConfig;
pub use reload::{LoggingReloader, ReloaderSet};
pub use store::RegistryStore;

#[derive(Debug, Clone)]
pub(crate) struct RegistryEntry {
    pub(crate) instance: PackageInstance,
    pub(crate) sandbox: Option<Arc<Sandbox>>,
}

pub(crate) type Entries = HashMap<PackageId, RegistryEntry>;

pub struct PackageManagerBuilder {
    config: ManagerConfig,
    reader: ManifestReader,
    reloaders: ReloaderSet,
}

impl PackageManagerBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            config: ManagerConfig::new(root),
            reader: ManifestReader::new(),
            reloaders: ReloaderSet::default(),
        }
    }

    pub fn host_version(mut self, host_version: impl Into<String>) -> Self {
        self.config.host_version = host_version.into();
        self
    }

    pub fn download_timeout(mut self, timeout: Duration) -> Self {
        self.config.download_timeout = timeout;
        self
    }

    pub fn max_download_bytes(mut self, max_bytes: u64) -> Self {
        self.config.max_download_bytes = max_bytes;
        self
    }

    pub fn max_unpacked_bytes(mut self, max_bytes: u64) -> Self {
        self.config.max_unpacked_bytes = max_bytes;
        self
    }

    pub fn id_rule(mut self, rule: Arc<dyn PackageIdRule>) -> Self {
        self.reader = ManifestReader::with_id_rule(rule);
        self
    }

    pub fn reloader(mut self, reloader: Arc<dyn ResourceReloader>) -> Self {
        self.reloaders.register(reloader);
        self
    }

    /// Prepare the directory layout and restore the persisted registry.
    #[instrument(skip(self), fields(root = %self.config.root.display()))]
    pub async fn build(self) -> PackageResult<PackageManager> {
        let config = self.config;
        for dir in [
            config.packages_dir(),
            config.data_dir(),
            config.archives_dir(),
        ] {
            fs::create_dir_all(&dir).await?;
        }
        let staging = config.staging_dir();
        if fs::try_exists(&staging).await? {
            fs::remove_dir_all(&staging).await?;
        }
        fs::create_dir_all(&staging).await?;

        let http = reqwest::Client::builder()
            .timeout(config.download_timeout)
            .build()
            .map_err(|error| PackageError::Network(error.to_string()))?;

        let store = RegistryStore::new(config.registry_file());
        let persisted = store.load().await?;
        let mut entries = Entries::new();
        for (id, record) in persisted.packages {
            let entry = restore_entry(&config, &self.reader, id.clone(), record).await;
            entries.insert(id, entry);
        }
        info!(packages = entries.len(), "package registry restored");

        Ok(PackageManager {
            inner: Arc::new(ManagerInner {
                config,
                reader: self.reader,
                store,
                entries: RwLock::new(entries),
                commit_lock: Mutex::new(()),
                fs_gate: Mutex::new(()),
                reload_lock: Mutex::new(()),
                reloaders: self.reloaders,
                http,
            }),
        })
    }
}

async fn restore_entry(
    config: &ManagerConfig,
    reader: &ManifestReader,
    id: PackageId,
    record: PersistedInstance,
) -> RegistryEntry {
    let user_data_path = record
        .user_data_path
        .clone()
        .unwrap_or_else(|| config.user_data_path(&id));
    if let Err(error) = fs::create_dir_all(&user_data_path).await {
        warn!(package_id = %id, %error, "failed to prepare user data directory");
    }

    let manifest_path = record.install_path.join(MANIFEST_FILE);
    let parsed = match fs::read(&manifest_path).await {
        Ok(bytes) => reader.parse_strict(&bytes).and_then(|descriptor| {
            if descriptor.id() == &id {
                Ok(descriptor)
            } else {
                Err(PackageError::InvalidManifest(format!(
                    "installed manifest declares id {}",
                    descriptor.id()
                )))
            }
        }),
        Err(error) => Err(PackageError::ManifestNotFound(format!(
            "{}: {error}",
            manifest_path.display()
        ))),
    };

    let mut instance = PackageInstance {
        id: id.clone(),
        descriptor: None,
        state: record.state,
        install_time: record.install_time,
        updated_at: record.updated_at,
        install_path: record.install_path,
        source_path: record.source_path,
        user_data_path,
        checksum: record.checksum,
        config: record.config,
        err_text: None,
        pending_reload: Vec::new(),
    };

    match parsed {
        Ok(descriptor) => {
            if instance.state == PackageState::Enabled {
                instance.pending_reload = descriptor.contents.kinds();
            }
            let sandbox = Arc::new(Sandbox::new(
                id,
                descriptor.permissions.clone(),
                &instance.install_path,
                &instance.user_data_path,
            ));
            instance.descriptor = Some(descriptor);
            RegistryEntry {
                instance,
                sandbox: Some(sandbox),
            }
        }
        Err(error) => {
            warn!(package_id = %id, %error, "installed package failed to restore");
            instance.state = PackageState::Error;
            instance.err_text = Some(error.to_string());
            RegistryEntry {
                instance,
                sandbox: None,
            }
        }
    }
}

struct ManagerInner {
    config: ManagerConfig,
    reader: ManifestReader,
    store: RegistryStore,
    entries: RwLock<Entries>,
    commit_lock: Mutex<()>,
    fs_gate: Mutex<()>,
    reload_lock: Mutex<()>,
    reloaders: ReloaderSet,
    http: reqwest::Client,
}

#[derive(Clone)]
pub struct PackageManager {
    inner: Arc<ManagerInner>,
}

impl PackageManager {
    pub fn builder(root: impl Into<PathBuf>) -> PackageManagerBuilder {
        PackageManagerBuilder::new(root)
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub fn reader(&self) -> &ManifestReader {
        &self.inner.reader
    }

    /// Apply `mutate` to the registry and persist the result.
    ///
    /// If `mutate` fails or the registry file cannot be written, the table
    /// is restored to what it was before the call.
    pub(crate) async fn commit<R>(
        &self,
        mutate: impl FnOnce(&mut Entries) -> PackageResult<R>,
    ) -> PackageResult<R> {
        let _commit = self.inner.commit_lock.lock().await;

        let (result, previous, snapshot) = {
            let mut entries = self.inner.entries.write();
            let previous = entries.clone();
            let result = match mutate(&mut *entries) {
                Ok(result) => result,
                Err(error) => {
                    *entries = previous;
                    return Err(error);
                }
            };
            (result, previous, snapshot_of(&entries))
        };

        if let Err(error) = self.inner.store.save(&snapshot).await {
            warn!(%error, "registry write failed, restoring previous state");
            *self.inner.entries.write() = previous;
            return Err(error);
        }
        Ok(result)
    }

    pub fn list(&self) -> Vec<PackageInstance> {
        let mut instances: Vec<PackageInstance> = self
            .inner
            .entries
            .read()
            .values()
            .map(|entry| entry.instance.clone())
            .collect();
        instances.sort_by(|a, b| a.id.cmp(&b.id));
        instances
    }

    pub fn get(&self, id: &PackageId) -> PackageResult<PackageInstance> {
        self.inner
            .entries
            .read()
            .get(id)
            .map(|entry| entry.instance.clone())
            .ok_or_else(|| PackageError::NotFound(id.clone()))
    }

    /// The package's capability boundary.
    pub fn sandbox(&self, id: &PackageId) -> PackageResult<Arc<Sandbox>> {
        let entries = self.inner.entries.read();
        let entry = entries
            .get(id)
            .ok_or_else(|| PackageError::NotFound(id.clone()))?;
        entry.sandbox.clone().ok_or_else(|| {
            PackageError::InvalidState(format!("package {id} has no valid manifest"))
        })
    }

    pub fn get_config(&self, id: &PackageId) -> PackageResult<ConfigMap> {
        Ok(self.get(id)?.config)
    }

    pub fn config_schema(&self, id: &PackageId) -> PackageResult<BTreeMap<String, ConfigFieldSchema>> {
        let instance = self.get(id)?;
        instance
            .descriptor
            .map(|descriptor| descriptor.config)
            .ok_or_else(|| {
                PackageError::InvalidState(format!("package {id} has no valid manifest"))
            })
    }

    /// Validate `config` against the schema, fill in declared defaults, and
    /// store it. The accepted config is mirrored to `_userdata/config.json`.
    #[instrument(skip(self, config), fields(package_id = %id, keys = config.len()))]
    pub async fn set_config(&self, id: &PackageId, config: ConfigMap) -> PackageResult<ConfigMap> {
        let schema = self.config_schema(id)?;
        validate_config(&config, &schema)?;
        let accepted = with_defaults(&config, &schema);

        let stored = accepted.clone();
        let user_data_path = self
            .commit(move |entries| {
                let entry = entries
                    .get_mut(id)
                    .ok_or_else(|| PackageError::NotFound(id.clone()))?;
                entry.instance.config = stored;
                entry.instance.touch();
                Ok(entry.instance.user_data_path.clone())
            })
            .await?;

        write_config_mirror(&user_data_path, &accepted).await;
        info!("package config updated");
        Ok(accepted)
    }

    #[instrument(skip(self), fields(package_id = %id))]
    pub async fn enable(&self, id: &PackageId) -> PackageResult<OperationOutcome> {
        let enabled = self
            .commit(|entries| {
                let mut enabled = Vec::new();
                enable_in(entries, id, &mut enabled)?;
                Ok(enabled)
            })
            .await?;

        if enabled.is_empty() {
            return Ok(OperationOutcome::done(format!("package {id} is already enabled")));
        }

        let kinds = self.kinds_of(&enabled);
        let mut message = format!("package {id} enabled");
        let extra: Vec<&str> = enabled
            .iter()
            .filter(|other| *other != id)
            .map(PackageId::as_str)
            .collect();
        if !extra.is_empty() {
            message.push_str(&format!(" (dependencies enabled: {})", extra.join(", ")));
        }
        info!(enabled = enabled.len(), "package enabled");
        Ok(OperationOutcome::with_reload(message, &kinds))
    }

    #[instrument(skip(self), fields(package_id = %id))]
    pub async fn disable(&self, id: &PackageId) -> PackageResult<OperationOutcome> {
        let outcome = self
            .commit(|entries| {
                let state = entries
                    .get(id)
                    .map(|entry| entry.instance.state)
                    .ok_or_else(|| PackageError::NotFound(id.clone()))?;
                match state {
                    PackageState::Enabled => {}
                    PackageState::Installed | PackageState::Disabled => {
                        return Ok(OperationOutcome::done(format!(
                            "package {id} is not enabled"
                        )));
                    }
                    PackageState::Error => {
                        return Err(PackageError::InvalidState(format!(
                            "package {id} is in error state; reinstall or reload it first"
                        )));
                    }
                }

                let dependents = deps::enabled_dependents(entries, id);
                if !dependents.is_empty() {
                    return Err(PackageError::DependentsEnabled {
                        package_id: id.clone(),
                        dependents,
                    });
                }

                let entry = entries
                    .get_mut(id)
                    .ok_or_else(|| PackageError::NotFound(id.clone()))?;
                let kinds = entry.instance.content_kinds();
                entry.instance.state = PackageState::Disabled;
                mark_pending(&mut entry.instance, &kinds);
                entry.instance.touch();
                Ok(OperationOutcome::with_reload(
                    format!("package {id} disabled; its resources stay loaded until reload"),
                    &kinds,
                ))
            })
            .await?;
        info!(reload_needed = outcome.reload_needed, "package disabled");
        Ok(outcome)
    }

    #[instrument(skip(self), fields(package_id = %id, mode = mode.as_str()))]
    pub async fn uninstall(
        &self,
        id: &PackageId,
        mode: UninstallMode,
    ) -> PackageResult<OperationOutcome> {
        if mode == UninstallMode::DisableOnly {
            return self.uninstall_disable_only(id).await;
        }

        let _gate = self.inner.fs_gate.lock().await;
        let instance = self.get(id)?;
        {
            let entries = self.inner.entries.read();
            let dependents = deps::enabled_dependents(&entries, id);
            if !dependents.is_empty() {
                return Err(PackageError::DependentsEnabled {
                    package_id: id.clone(),
                    dependents,
                });
            }
        }

        // Move directories aside first so a failure leaves nothing half-deleted.
        let mut moved = Vec::new();
        let mut targets = vec![instance.install_path.clone()];
        if mode == UninstallMode::Full {
            targets.push(self.inner.config.data_path(id));
        }
        for original in targets {
            match self.move_to_trash(&original).await {
                Ok(Some(trash)) => moved.push((original, trash)),
                Ok(None) => {}
                Err(error) => {
                    restore_moved(&moved).await;
                    return Err(error);
                }
            }
        }

        let removed = self
            .commit(|entries| {
                let dependents = deps::enabled_dependents(entries, id);
                if !dependents.is_empty() {
                    return Err(PackageError::DependentsEnabled {
                        package_id: id.clone(),
                        dependents,
                    });
                }
                entries
                    .remove(id)
                    .map(|entry| entry.instance)
                    .ok_or_else(|| PackageError::NotFound(id.clone()))
            })
            .await;
        let removed = match removed {
            Ok(removed) => removed,
            Err(error) => {
                restore_moved(&moved).await;
                return Err(error);
            }
        };

        for (_, trash) in &moved {
            if let Err(error) = fs::remove_dir_all(trash).await {
                warn!(path = %trash.display(), %error, "failed to delete uninstalled files");
            }
        }
        if let Err(error) = fs::remove_file(&removed.source_path).await
            && error.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %removed.source_path.display(), %error, "failed to delete package archive");
        }

        let kinds = if removed.state == PackageState::Enabled {
            removed.content_kinds()
        } else {
            Vec::new()
        };
        info!(was = %removed.state, "package uninstalled");
        Ok(OperationOutcome::with_reload(
            format!("package {id} uninstalled ({})", mode.as_str()),
            &kinds,
        ))
    }

    async fn uninstall_disable_only(&self, id: &PackageId) -> PackageResult<OperationOutcome> {
        let outcome = self
            .commit(|entries| {
                let state = entries
                    .get(id)
                    .map(|entry| entry.instance.state)
                    .ok_or_else(|| PackageError::NotFound(id.clone()))?;
                if state != PackageState::Enabled {
                    return Ok(OperationOutcome::done(format!(
                        "package {id} kept on disk; it was not enabled"
                    )));
                }
                let dependents = deps::enabled_dependents(entries, id);
                if !dependents.is_empty() {
                    return Err(PackageError::DependentsEnabled {
                        package_id: id.clone(),
                        dependents,
                    });
                }
                let entry = entries
                    .get_mut(id)
                    .ok_or_else(|| PackageError::NotFound(id.clone()))?;
                let kinds = entry.instance.content_kinds();
                entry.instance.state = PackageState::Disabled;
                mark_pending(&mut entry.instance, &kinds);
                entry.instance.touch();
                Ok(OperationOutcome::with_reload(
                    format!("package {id} disabled and kept on disk"),
                    &kinds,
                ))
            })
            .await?;
        info!("package disabled by uninstall");
        Ok(outcome)
    }

    async fn move_to_trash(&self, path: &Path) -> PackageResult<Option<PathBuf>> {
        if !fs::try_exists(path).await? {
            return Ok(None);
        }
        let trash = self
            .inner
            .config
            .staging_dir()
            .join(format!("trash-{}", Uuid::new_v4().simple()));
        fs::create_dir_all(self.inner.config.staging_dir()).await?;
        fs::rename(path, &trash).await?;
        debug!(from = %path.display(), to = %trash.display(), "moved aside for removal");
        Ok(Some(trash))
    }

    /// Active files of `kind` from every enabled package.
    pub fn enabled_sources(&self, kind: ResourceKind) -> Vec<ResourceSource> {
        self.sources_for(kind, None)
    }

    pub(crate) fn sources_for(
        &self,
        kind: ResourceKind,
        also: Option<&PackageId>,
    ) -> Vec<ResourceSource> {
        let entries = self.inner.entries.read();
        let mut sources: Vec<ResourceSource> = entries
            .values()
            .filter(|entry| {
                entry.instance.state == PackageState::Enabled
                    || also.is_some_and(|id| *id == entry.instance.id)
            })
            .filter_map(|entry| {
                let descriptor = entry.instance.descriptor.as_ref()?;
                let paths = descriptor.contents.entries(kind);
                if paths.is_empty() {
                    return None;
                }
                Some(ResourceSource {
                    package_id: entry.instance.id.clone(),
                    install_path: entry.instance.install_path.clone(),
                    paths: paths
                        .iter()
                        .map(|path| entry.instance.install_path.join(path))
                        .collect(),
                })
            })
            .collect();
        sources.sort_by(|a, b| a.package_id.cmp(&b.package_id));
        sources
    }

    fn kinds_of(&self, ids: &[PackageId]) -> Vec<ResourceKind> {
        let entries = self.inner.entries.read();
        let mut kinds: Vec<ResourceKind> = ids
            .iter()
            .filter_map(|id| entries.get(id))
            .flat_map(|entry| entry.instance.content_kinds())
            .collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }
}

/// Enable `id` and, first, each of its direct dependencies that is not yet
/// enabled. `enabled` collects every package whose state changed.
fn enable_in(
    entries: &mut Entries,
    id: &PackageId,
    enabled: &mut Vec<PackageId>,
) -> PackageResult<()> {
    let entry = entries
        .get(id)
        .ok_or_else(|| PackageError::NotFound(id.clone()))?;
    match entry.instance.state {
        PackageState::Enabled => return Ok(()),
        PackageState::Error => {
            return Err(PackageError::InvalidState(format!(
                "package {id} is in error state: {}",
                entry.instance.err_text.as_deref().unwrap_or("unknown error")
            )));
        }
        PackageState::Installed | PackageState::Disabled => {}
    }
    let descriptor = entry.instance.descriptor.clone().ok_or_else(|| {
        PackageError::InvalidState(format!("package {id} has no valid manifest"))
    })?;

    let issues = deps::unmet_dependencies(&descriptor, entries);
    if !issues.is_empty() {
        return Err(PackageError::Dependency {
            package_id: id.clone(),
            issues,
        });
    }

    let kinds = descriptor.contents.kinds();
    if let Some(entry) = entries.get_mut(id) {
        entry.instance.state = PackageState::Enabled;
        mark_pending(&mut entry.instance, &kinds);
        entry.instance.touch();
    }
    enabled.push(id.clone());

    for dependency in descriptor.dependencies.keys() {
        enable_in(entries, &PackageId::from(dependency.as_str()), enabled)?;
    }
    Ok(())
}

fn mark_pending(instance: &mut PackageInstance, kinds: &[ResourceKind]) {
    for kind in kinds {
        if !instance.pending_reload.contains(kind) {
            instance.pending_reload.push(*kind);
        }
    }
    instance.pending_reload.sort();
}

fn snapshot_of(entries: &Entries) -> PersistedRegistry {
    PersistedRegistry {
        packages: entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.instance.to_persisted()))
            .collect(),
    }
}

async fn restore_moved(moved: &[(PathBuf, PathBuf)]) {
    for (original, trash) in moved {
        if let Err(error) = fs::rename(trash, original).await {
            warn!(path = %original.display(), %error, "failed to restore package files");
        }
    }
}

pub(crate) async fn write_config_mirror(user_data_path: &Path, config: &ConfigMap) {
    let target = user_data_path.join(CONFIG_FILE);
    let result = async {
        fs::create_dir_all(user_data_path).await?;
        let payload = serde_json::to_vec_pretty(config)?;
        fs::write(&target, payload).await?;
        Ok::<_, PackageError>(())
    }
    .await;
    if let Err(error) = result {
        warn!(path = %target.display(), %error, "failed to write config mirror");
    }
}

#[cfg(test)]
mod tests;
