//! Reload orchestration through the host's [`ResourceReloader`]s.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use sealpkg_protocol::{
    PackageId, PackageResult, PackageState, ReloadOutcome, ResourceKind, ResourceReloader,
    ResourceSource,
};
use tracing::{info, instrument, warn};

use crate::{Entries, PackageManager};

/// One reloader per resource kind. Registering a second reloader for a
/// kind replaces the first.
#[derive(Clone, Default)]
pub struct ReloaderSet {
    by_kind: HashMap<ResourceKind, Arc<dyn ResourceReloader>>,
}

impl ReloaderSet {
    pub fn register(&mut self, reloader: Arc<dyn ResourceReloader>) {
        self.by_kind.insert(reloader.kind(), reloader);
    }

    pub fn get(&self, kind: ResourceKind) -> Option<Arc<dyn ResourceReloader>> {
        self.by_kind.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<ResourceKind> {
        let mut kinds: Vec<ResourceKind> = self.by_kind.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

/// Reloader that only records what it was handed. Used by the standalone
/// binaries, which have no script engine or deck loader of their own.
#[derive(Debug, Clone, Copy)]
pub struct LoggingReloader {
    kind: ResourceKind,
    hot: bool,
}

impl LoggingReloader {
    pub fn new(kind: ResourceKind) -> Self {
        Self { kind, hot: true }
    }

    /// A loader that needs a process restart to pick up changes.
    pub fn restart_only(kind: ResourceKind) -> Self {
        Self { kind, hot: false }
    }
}

#[async_trait]
impl ResourceReloader for LoggingReloader {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn hot_reloadable(&self) -> bool {
        self.hot
    }

    async fn reload(&self, sources: &[ResourceSource]) -> PackageResult<String> {
        let files: usize = sources.iter().map(|source| source.paths.len()).sum();
        info!(kind = %self.kind, packages = sources.len(), files, "resources reloaded");
        Ok(format!(
            "{files} file(s) from {} package(s)",
            sources.len()
        ))
    }
}

#[derive(Debug, Default)]
struct ReloadPass {
    items: BTreeMap<String, String>,
    reloaded: Vec<ResourceKind>,
    restart: Vec<ResourceKind>,
    failed: Vec<(ResourceKind, String)>,
}

impl ReloadPass {
    fn failed_kinds(&self) -> Vec<ResourceKind> {
        self.failed.iter().map(|(kind, _)| *kind).collect()
    }

    fn failure_text(&self) -> String {
        self.failed
            .iter()
            .map(|(kind, error)| format!("{kind}: {error}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn into_outcome(self, subject: &str) -> ReloadOutcome {
        let success = self.failed.is_empty();
        let message = if success {
            format!("{subject} reloaded")
        } else {
            format!("{subject} reload failed: {}", self.failure_text())
        };
        ReloadOutcome {
            success,
            message,
            reloaded_items: self.items,
            need_restart: !self.restart.is_empty(),
            restart_hints: self
                .restart
                .iter()
                .map(|kind| kind.as_str().to_owned())
                .collect(),
        }
    }

    /// Clear pending reloads of refreshed kinds on every package and keep
    /// restart-only kinds pending on the packages that declare them.
    fn settle_pending(&self, entries: &mut Entries) {
        for entry in entries.values_mut() {
            let declared = entry.instance.content_kinds();
            let pending = &mut entry.instance.pending_reload;
            pending.retain(|kind| !self.reloaded.contains(kind));
            for kind in self.restart.iter().chain(self.failed.iter().map(|(k, _)| k)) {
                if entry.instance.state == PackageState::Enabled
                    && declared.contains(kind)
                    && !pending.contains(kind)
                {
                    pending.push(*kind);
                }
            }
            pending.sort();
        }
    }
}

impl PackageManager {
    /// Refresh every resource kind `id` declares.
    ///
    /// Only enabled packages, or packages in `Error` that still have a
    /// parsed manifest, can be reloaded. A failed kind moves the package to
    /// `Error`; a clean pass brings an `Error` package back to `Enabled`.
    #[instrument(skip(self), fields(package_id = %id))]
    pub async fn reload(&self, id: &PackageId) -> PackageResult<ReloadOutcome> {
        let _reload = self.inner.reload_lock.lock().await;
        let instance = self.get(id)?;
        match instance.state {
            PackageState::Enabled | PackageState::Error => {}
            state => {
                return Ok(ReloadOutcome::rejected(format!(
                    "package {id} is {state}; only enabled packages can be reloaded"
                )));
            }
        }
        let Some(descriptor) = instance.descriptor else {
            return Ok(ReloadOutcome::rejected(format!(
                "package {id} has no valid manifest; reinstall it"
            )));
        };

        let pass = self.run_reload(&descriptor.contents.kinds(), Some(id)).await;
        self.commit(|entries| {
            pass.settle_pending(entries);
            if let Some(entry) = entries.get_mut(id) {
                if pass.failed.is_empty() {
                    entry.instance.state = PackageState::Enabled;
                    entry.instance.err_text = None;
                } else {
                    entry.instance.state = PackageState::Error;
                    entry.instance.err_text = Some(pass.failure_text());
                }
                entry.instance.touch();
            }
            Ok(())
        })
        .await?;

        if pass.failed.is_empty() {
            info!(kinds = pass.items.len(), "package reloaded");
        } else {
            warn!(failed = %pass.failure_text(), "package reload failed");
        }
        Ok(pass.into_outcome(&format!("package {id}")))
    }

    /// Refresh every kind declared by any enabled package, calling each
    /// reloader once with all enabled sources of its kind.
    #[instrument(skip(self))]
    pub async fn reload_all(&self) -> PackageResult<ReloadOutcome> {
        let _reload = self.inner.reload_lock.lock().await;
        let kinds = {
            let entries = self.inner.entries.read();
            let mut kinds: Vec<ResourceKind> = entries
                .values()
                .filter(|entry| entry.instance.state == PackageState::Enabled)
                .flat_map(|entry| entry.instance.content_kinds())
                .collect();
            kinds.sort();
            kinds.dedup();
            kinds
        };
        if kinds.is_empty() {
            return Ok(ReloadOutcome {
                success: true,
                message: "no enabled package declares reloadable content".to_owned(),
                ..ReloadOutcome::default()
            });
        }

        let pass = self.run_reload(&kinds, None).await;
        let failed_kinds = pass.failed_kinds();
        let failure_text = pass.failure_text();
        let broken = self
            .commit(|entries| {
                pass.settle_pending(entries);
                let mut broken = Vec::new();
                for entry in entries.values_mut() {
                    if entry.instance.state != PackageState::Enabled {
                        continue;
                    }
                    let declared = entry.instance.content_kinds();
                    let hit: Vec<String> = failed_kinds
                        .iter()
                        .filter(|kind| declared.contains(kind))
                        .map(|kind| kind.as_str().to_owned())
                        .collect();
                    if !hit.is_empty() {
                        entry.instance.state = PackageState::Error;
                        entry.instance.err_text =
                            Some(format!("reload failed for {}: {failure_text}", hit.join(", ")));
                        entry.instance.touch();
                        broken.push(entry.instance.id.clone());
                    }
                }
                Ok(broken)
            })
            .await?;

        if broken.is_empty() {
            info!(kinds = kinds.len(), "all packages reloaded");
        } else {
            warn!(packages = broken.len(), failed = %failure_text, "reload-all left packages in error");
        }
        Ok(pass.into_outcome("all packages"))
    }

    async fn run_reload(&self, kinds: &[ResourceKind], also: Option<&PackageId>) -> ReloadPass {
        let mut pass = ReloadPass::default();
        for kind in kinds {
            let reloader = match self.inner.reloaders.get(*kind) {
                Some(reloader) if reloader.hot_reloadable() => reloader,
                _ => {
                    pass.restart.push(*kind);
                    continue;
                }
            };
            let sources = self.sources_for(*kind, also);
            match reloader.reload(&sources).await {
                Ok(summary) => {
                    pass.items.insert(kind.as_str().to_owned(), summary);
                    pass.reloaded.push(*kind);
                }
                Err(error) => {
                    pass.items
                        .insert(kind.as_str().to_owned(), format!("failed: {error}"));
                    pass.failed.push((*kind, error.to_string()));
                }
            }
        }
        pass
    }
}
