//! Acquisition engine: one artifact from cache or network into the cache root.
//!
//! A file at an artifact's final path is either fully verified or absent.
//! Downloads land in a `.part` file that is only renamed into place after the
//! verifier accepts it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use log::{debug, info, warn};

use crate::cache::{CacheEntry, CacheStore, partial_path, signature_path};
use crate::cleanup::{CleanupGuard, SharedCleanupContext};
use crate::error::FailureReason;
use crate::http::HttpClient;
use crate::registry::PackageSource;
use crate::runtime::Runtime;
use crate::verify::{Verification, Verifier};

/// How an artifact became available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquired {
    /// Downloaded and verified during this call.
    Fresh(CacheEntry),
    /// Already present and re-verified in place; no network activity.
    Cached(CacheEntry),
}

impl Acquired {
    pub fn entry(&self) -> &CacheEntry {
        match self {
            Acquired::Fresh(entry) | Acquired::Cached(entry) => entry,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquireOptions {
    /// Ignore a valid cached artifact and fetch it again.
    pub force_redownload: bool,
    /// Never touch the network; only cached artifacts can be acquired.
    pub offline: bool,
    /// Fetch `<url>.sig` next to the artifact.
    pub verify_signatures: bool,
}

pub struct Acquirer<R: Runtime + 'static> {
    runtime: Arc<R>,
    http: HttpClient,
    verifier: Verifier<R>,
    options: AcquireOptions,
    cleanup: SharedCleanupContext,
}

impl<R: Runtime + 'static> Acquirer<R> {
    pub fn new(
        runtime: Arc<R>,
        http: HttpClient,
        verifier: Verifier<R>,
        options: AcquireOptions,
        cleanup: SharedCleanupContext,
    ) -> Self {
        Self {
            runtime,
            http,
            verifier,
            options,
            cleanup,
        }
    }

    /// Make the artifact of `source` available as a verified file under `dest_dir`.
    #[tracing::instrument(skip(self, source), fields(key = %source.key))]
    pub async fn acquire(
        &self,
        source: &PackageSource,
        dest_dir: &Path,
    ) -> Result<Acquired, FailureReason> {
        let store = CacheStore::new(Arc::clone(&self.runtime), dest_dir.to_path_buf());

        // Offline there is nothing to redownload from
        let reuse_cache = !self.options.force_redownload || self.options.offline;
        let mut rejected = None;
        if let Some(entry) = store.find(source).filter(|_| reuse_cache) {
            let signature = self.signature_for(&entry.path);
            match self.verify(source, &entry.path, signature).await {
                Ok(_) => {
                    debug!("{}: using cached {}", source.key, entry.path.display());
                    return Ok(Acquired::Cached(entry));
                }
                Err(reason) => {
                    warn!(
                        "{}: cached artifact {} is invalid ({}), discarding it",
                        source.key,
                        entry.path.display(),
                        reason
                    );
                    store.remove(&entry.path).map_err(FailureReason::io)?;
                    rejected = Some(reason);
                }
            }
        }

        // Offline, a discarded artifact fails with the reason it was discarded
        if self.options.offline {
            return Err(rejected.unwrap_or(FailureReason::NotCached));
        }

        let dest = store.path_for(source);
        if let Some(dir) = dest.parent() {
            self.runtime
                .create_dir_all(dir)
                .with_context(|| format!("Failed to create cache directory {}", dir.display()))
                .map_err(FailureReason::io)?;
        }

        let part = partial_path(&dest);
        let guard = CleanupGuard::new(Arc::clone(&self.cleanup), part.clone());

        let result = self.fetch(source, &part, &dest).await;
        if result.is_err() {
            self.discard(&part);
            self.discard(&signature_path(&dest));
        }
        guard.disarm();

        result.map(|()| Acquired::Fresh(CacheEntry::new(dest, &source.key)))
    }

    async fn fetch(
        &self,
        source: &PackageSource,
        part: &Path,
        dest: &Path,
    ) -> Result<(), FailureReason> {
        println!("   downloading {} {}", source.display_name, source.version);

        let downloaded = self
            .http
            .download_file(source.url.as_str(), || {
                self.runtime
                    .create_file(part)
                    .with_context(|| format!("Failed to create {}", part.display()))
            })
            .await
            .map_err(FailureReason::network)?;
        debug!(
            "{}: {} bytes in {} attempt(s)",
            source.key, downloaded.bytes, downloaded.attempts
        );

        let signature = if self.options.verify_signatures {
            self.fetch_signature(source, dest).await
        } else {
            None
        };

        self.verify(source, part, signature).await?;

        self.runtime
            .rename(part, dest)
            .with_context(|| format!("Failed to move {} into place", part.display()))
            .map_err(FailureReason::io)?;

        info!("{}: cached at {}", source.key, dest.display());
        Ok(())
    }

    /// Best-effort download of the detached signature; failures only warn.
    async fn fetch_signature(&self, source: &PackageSource, dest: &Path) -> Option<PathBuf> {
        let url = format!("{}.sig", source.url);
        let path = signature_path(dest);
        let guard = CleanupGuard::new(Arc::clone(&self.cleanup), path.clone());

        let result = self
            .http
            .download_file(&url, || {
                self.runtime
                    .create_file(&path)
                    .with_context(|| format!("Failed to create {}", path.display()))
            })
            .await;
        guard.disarm();

        match result {
            Ok(_) => Some(path),
            Err(e) => {
                warn!("{}: no detached signature at {}: {:#}", source.key, url, e);
                self.discard(&path);
                None
            }
        }
    }

    fn signature_for(&self, artifact: &Path) -> Option<PathBuf> {
        self.options
            .verify_signatures
            .then(|| signature_path(artifact))
    }

    /// Hashing and archive walks are blocking work.
    async fn verify(
        &self,
        source: &PackageSource,
        artifact: &Path,
        signature: Option<PathBuf>,
    ) -> Result<Verification, FailureReason> {
        let verifier = self.verifier.clone();
        let source = source.clone();
        let artifact = artifact.to_path_buf();

        tokio::task::spawn_blocking(move || {
            verifier.verify(&source, &artifact, signature.as_deref())
        })
        .await
        .map_err(|e| FailureReason::Io(format!("verification task failed: {}", e)))?
    }

    fn discard(&self, path: &Path) {
        if !self.runtime.exists(path) {
            return;
        }
        if let Err(e) = self.runtime.remove_file(path) {
            warn!("Failed to remove {}: {:#}", path.display(), e);
        }
    }
}
