//! Port between the package manager and the host's resource loaders.
//!
//! The manager never interprets package content. It only tells the loader
//! registered for a resource kind which package files of that kind are
//! currently active and asks it to refresh.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PackageResult;
use crate::ids::PackageId;
use crate::manifest::ResourceKind;

/// Active files of one resource kind contributed by one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSource {
    pub package_id: PackageId,
    pub install_path: PathBuf,
    pub paths: Vec<PathBuf>,
}

/// "Reload kind K" capability implemented by the host.
#[async_trait]
pub trait ResourceReloader: Send + Sync {
    fn kind(&self) -> ResourceKind;

    /// Loaders that cannot refresh in place are reported as restart hints
    /// and never invoked.
    fn hot_reloadable(&self) -> bool {
        true
    }

    /// Replace everything this loader holds from packages with `sources`.
    /// Returns a short human-readable summary.
    async fn reload(&self, sources: &[ResourceSource]) -> PackageResult<String>;
}
