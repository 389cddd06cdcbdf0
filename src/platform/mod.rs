//! Host platform collaborators.
//!
//! Everything the engine needs from the running system goes through the
//! [`Platform`] trait: installed-state queries, the system package manager,
//! local artifact installation and network reachability.

mod pacman;
mod probe;

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

pub use pacman::{PacmanPlatform, parse_depends_on};
pub use probe::{DEFAULT_PROBE_HOSTS, ReachabilityProbe};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Platform: Send + Sync {
    /// Whether the package is already present on this system.
    async fn is_installed(&self, key: &str) -> bool;

    /// Install packages by name through the system package manager.
    async fn install_from_repositories(&self, keys: &[String]) -> Result<()>;

    /// Install verified artifact files, in the given order, as one transaction.
    async fn install_files(&self, paths: &[PathBuf]) -> Result<()>;

    /// Dependency names declared by an artifact, version constraints removed.
    async fn declared_dependencies(&self, artifact: &Path) -> Result<Vec<String>>;

    async fn is_network_reachable(&self) -> bool;
}
