//! Installation orchestrator.
//!
//! One `ensure` run walks the [`Stage`] machine: check what is installed, try
//! the system package manager when online, otherwise (or for whatever it left
//! missing) resolve and acquire artifacts into the cache, then install them
//! from the cache. Every requested key that is still unsatisfied at the end is
//! reported with the reason it failed.

mod report;
mod state;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use log::{debug, info, warn};

use crate::acquire::Acquirer;
use crate::cache::{CacheStore, signature_path};
use crate::cleanup::{self, SharedCleanupContext};
use crate::config::EngineConfig;
use crate::error::FailureReason;
use crate::http::HttpClient;
use crate::platform::{PacmanPlatform, Platform};
use crate::registry::SourceRegistry;
use crate::resolve::{Resolution, Resolver};
use crate::runtime::{RealRuntime, Runtime};
use crate::schedule::Scheduler;
use crate::verify::{GpgSignatureCheck, SignatureCheck, Verifier};

pub use report::{EnsureStatus, FailedPackage, InstallationResult};
pub use state::{Stage, after_check_installed, after_resolve, after_system_manager};

/// Result of re-verifying the cache directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheReport {
    pub valid: Vec<String>,
    pub removed: Vec<(String, FailureReason)>,
    pub stale_partials: Vec<PathBuf>,
}

pub struct Orchestrator<R: Runtime + 'static, P: Platform> {
    runtime: Arc<R>,
    platform: P,
    registry: SourceRegistry,
    config: EngineConfig,
    http: HttpClient,
    signatures: Arc<dyn SignatureCheck>,
    cleanup: SharedCleanupContext,
}

impl<R: Runtime + 'static, P: Platform> Orchestrator<R, P> {
    pub fn new(
        runtime: Arc<R>,
        platform: P,
        registry: SourceRegistry,
        config: EngineConfig,
    ) -> Result<Self> {
        let http = HttpClient::new(config.http_client()?, config.retry_policy());
        Ok(Self {
            runtime,
            platform,
            registry,
            config,
            http,
            signatures: Arc::new(GpgSignatureCheck::default()),
            cleanup: cleanup::new_shared(),
        })
    }

    /// Replace the default `gpg` signature check.
    pub fn with_signature_check(mut self, check: Arc<dyn SignatureCheck>) -> Self {
        self.signatures = check;
        self
    }

    /// Partial files registered here are removed on interruption.
    pub fn cleanup_context(&self) -> SharedCleanupContext {
        Arc::clone(&self.cleanup)
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Make sure every key is installed, falling back as far as needed.
    #[tracing::instrument(skip(self))]
    pub async fn ensure(&self, keys: &[String]) -> InstallationResult {
        let requested = distinct(keys);
        let mut result = InstallationResult::new(requested.clone());
        let mut missing: Vec<String> = Vec::new();
        let mut failures: HashMap<String, FailureReason> = HashMap::new();
        let mut resolution: Option<Resolution> = None;
        let mut online = false;

        let mut stage = Stage::CheckInstalled;
        loop {
            debug!("Stage: {:?}", stage);
            stage = match stage {
                Stage::CheckInstalled => {
                    for key in &requested {
                        if self.platform.is_installed(key).await {
                            debug!("{}: already installed", key);
                            result.already_satisfied.push(key.clone());
                        } else {
                            missing.push(key.clone());
                        }
                    }
                    if !missing.is_empty() {
                        online = self.is_online().await;
                    }
                    after_check_installed(missing.len(), online)
                }
                Stage::TrySystemManager => {
                    println!("   installing {} from repositories", missing.join(" "));
                    if let Err(e) = self.platform.install_from_repositories(&missing).await {
                        warn!("System package manager failed: {:#}", e);
                    }
                    let mut still_missing = Vec::new();
                    for key in missing.drain(..) {
                        if self.platform.is_installed(&key).await {
                            result.installed.push(key);
                        } else {
                            still_missing.push(key);
                        }
                    }
                    missing = still_missing;
                    after_system_manager(missing.len())
                }
                Stage::ResolveAndAcquire => {
                    if !online {
                        println!("   offline: using cached packages only");
                    }
                    let scheduler = self.scheduler(!online);
                    let resolved = Resolver::new(
                        Arc::clone(&self.runtime),
                        &self.registry,
                        &scheduler,
                        &self.platform,
                    )
                    .resolve(&missing)
                    .await;

                    for outcome in &resolved.outcomes {
                        if let Some(reason) = outcome.failure() {
                            failures.insert(outcome.key.clone(), reason.clone());
                        }
                    }
                    let acquired = resolved.order.len();
                    resolution = Some(resolved);
                    after_resolve(acquired)
                }
                Stage::InstallFromCache => {
                    if let Some(resolved) = &resolution {
                        self.install_from_cache(resolved, &missing, &mut result, &mut failures)
                            .await;
                    }
                    Stage::Done
                }
                Stage::Done => break,
            };
        }

        for key in &requested {
            if result.is_satisfied(key) {
                continue;
            }
            let reason = failures.remove(key).unwrap_or_else(|| {
                FailureReason::Install("still not installed after every fallback".into())
            });
            result.failed.push(FailedPackage::new(key.as_str(), &reason));
        }

        let mut dependency_failures: Vec<_> = failures.into_iter().collect();
        dependency_failures.sort_by(|a, b| a.0.cmp(&b.0));
        result.dependency_failures = dependency_failures
            .iter()
            .map(|(key, reason)| FailedPackage::new(key.as_str(), reason))
            .collect();
        if let Some(resolved) = resolution {
            result.unresolved = resolved.unresolved;
        }

        info!(
            "ensure finished: {:?} ({} failed)",
            result.status(),
            result.failed.len()
        );
        result
    }

    /// Resolve and acquire into the cache without installing anything.
    #[tracing::instrument(skip(self))]
    pub async fn fetch(&self, keys: &[String]) -> Resolution {
        let requested = distinct(keys);
        let online = !requested.is_empty() && self.is_online().await;
        let scheduler = self.scheduler(!online);
        Resolver::new(
            Arc::clone(&self.runtime),
            &self.registry,
            &scheduler,
            &self.platform,
        )
        .resolve(&requested)
        .await
    }

    /// Re-verify every cached artifact of a registered source. Invalid
    /// artifacts and leftover partial downloads are deleted.
    #[tracing::instrument(skip(self))]
    pub fn verify_cache(&self) -> Result<CacheReport> {
        let store = CacheStore::new(Arc::clone(&self.runtime), self.config.cache_dir.clone());
        let mut report = CacheReport {
            stale_partials: store.remove_stale_partials()?,
            ..Default::default()
        };

        let verifier = self.verifier();
        for source in self.registry.iter() {
            let Some(entry) = store.find(source) else {
                continue;
            };
            let signature = self
                .config
                .verify_signatures
                .then(|| signature_path(&entry.path));

            match verifier.verify(source, &entry.path, signature.as_deref()) {
                Ok(_) => report.valid.push(source.key.clone()),
                Err(reason) => {
                    warn!("{}: removing invalid cached artifact: {}", source.key, reason);
                    store.remove(&entry.path)?;
                    report.removed.push((source.key.clone(), reason));
                }
            }
        }
        Ok(report)
    }

    async fn is_online(&self) -> bool {
        if self.config.offline {
            info!("Offline mode configured");
            return false;
        }
        let reachable = self.platform.is_network_reachable().await;
        if !reachable {
            warn!("Network is unreachable, continuing offline");
        }
        reachable
    }

    fn verifier(&self) -> Verifier<R> {
        let verifier = Verifier::new(Arc::clone(&self.runtime), self.config.skip_checksum);
        if self.config.verify_signatures {
            verifier.with_signature_check(Arc::clone(&self.signatures))
        } else {
            verifier
        }
    }

    /// Per-run scheduler; `offline` restricts acquisition to the cache.
    fn scheduler(&self, offline: bool) -> Scheduler<R> {
        let mut options = self.config.acquire_options();
        options.offline = offline;
        let acquirer = Acquirer::new(
            Arc::clone(&self.runtime),
            self.http.clone(),
            self.verifier(),
            options,
            Arc::clone(&self.cleanup),
        );
        Scheduler::new(
            Arc::new(acquirer),
            self.config.cache_dir.clone(),
            self.config.jobs,
        )
    }

    /// Install acquired artifacts in dependency order as one transaction; if
    /// that fails, one by one so only the culprits fail.
    async fn install_from_cache(
        &self,
        resolution: &Resolution,
        requested: &[String],
        result: &mut InstallationResult,
        failures: &mut HashMap<String, FailureReason>,
    ) {
        let mut batch: Vec<(String, PathBuf)> = Vec::new();
        for key in &resolution.order {
            let Some(entry) = resolution.entry(key) else {
                continue;
            };
            let is_requested = requested.contains(key);
            if !is_requested && self.platform.is_installed(key).await {
                debug!("{}: dependency already installed", key);
                continue;
            }
            batch.push((key.clone(), entry.path.clone()));
        }
        if batch.is_empty() {
            return;
        }

        let keys: Vec<&str> = batch.iter().map(|(key, _)| key.as_str()).collect();
        println!("   installing {} from cache", keys.join(" "));
        let paths: Vec<PathBuf> = batch.iter().map(|(_, path)| path.clone()).collect();

        match self.platform.install_files(&paths).await {
            Ok(()) => {
                for (key, _) in batch {
                    println!("   installed {}", key);
                    result.installed.push(key);
                }
            }
            Err(e) => {
                warn!(
                    "Installing {} package(s) at once failed ({:#}), retrying one at a time",
                    batch.len(),
                    e
                );
                for (key, path) in batch {
                    match self.platform.install_files(std::slice::from_ref(&path)).await {
                        Ok(()) => {
                            println!("   installed {}", key);
                            result.installed.push(key);
                        }
                        Err(e) => {
                            warn!("{}: installation failed: {:#}", key, e);
                            failures.insert(key, FailureReason::Install(format!("{:#}", e)));
                        }
                    }
                }
            }
        }
    }
}

/// Keys in first-seen order without repeats.
fn distinct(keys: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    keys.iter()
        .filter(|key| seen.insert(key.as_str()))
        .cloned()
        .collect()
}

/// Orchestrator for this host: real filesystem, `pacman`, and the registry
/// named by `config`.
pub fn system_orchestrator(
    config: EngineConfig,
) -> Result<Orchestrator<RealRuntime, PacmanPlatform>> {
    let runtime = Arc::new(RealRuntime);
    let registry = config.load_registry(runtime.as_ref())?;
    let platform = PacmanPlatform::new(config.probe());
    Orchestrator::new(runtime, platform, registry, config)
}

/// Ensure packages on this host.
///
/// A Ctrl-C handler removes in-flight partial downloads for the duration of
/// the run.
pub async fn ensure(config: EngineConfig, keys: &[String]) -> Result<InstallationResult> {
    let orchestrator = system_orchestrator(config)?;

    let interrupt = cleanup::spawn_interrupt_handler(orchestrator.cleanup_context());
    let result = orchestrator.ensure(keys).await;
    interrupt.abort();

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::platform::MockPlatform;
    use crate::registry::parse_record;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use mockito::ServerGuard;
    use sha2::{Digest, Sha256};
    use std::io::Write;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    fn package(name: &str, depends: &[&str]) -> Vec<u8> {
        let mut pkginfo = format!("pkgname = {}\n", name);
        for dependency in depends {
            pkginfo.push_str(&format!("depend = {}\n", dependency));
        }
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(pkginfo.len() as u64);
        header.set_path(".PKGINFO").unwrap();
        header.set_cksum();
        builder.append(&header, pkginfo.as_bytes()).unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&builder.into_inner().unwrap()).unwrap();
        encoder.finish().unwrap()
    }

    fn test_config(cache_dir: &Path) -> EngineConfig {
        EngineConfig {
            cache_dir: cache_dir.to_path_buf(),
            sources: None,
            max_retries: 1,
            retry_delay: Duration::from_millis(1),
            connect_timeout: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
            proxy: None,
            offline: false,
            force_redownload: false,
            skip_checksum: false,
            verify_signatures: false,
            jobs: 2,
            probe_hosts: Vec::new(),
        }
    }

    struct Fixture {
        server: ServerGuard,
        registry: SourceRegistry,
        mocks: Vec<mockito::Mock>,
        cache: TempDir,
    }

    impl Fixture {
        async fn new() -> Self {
            Self {
                server: mockito::Server::new_async().await,
                registry: SourceRegistry::new(),
                mocks: Vec::new(),
                cache: tempdir().unwrap(),
            }
        }

        /// Register `key` and serve `served` for it; the registry checksum is
        /// computed from `declared`.
        async fn publish(&mut self, key: &str, declared: &[u8], served: &[u8], downloads: usize) {
            let filename = format!("{}-1-1.tar.gz", key);
            let mock = self
                .server
                .mock("GET", format!("/{}", filename).as_str())
                .with_status(200)
                .with_body(served)
                .expect(downloads)
                .create_async()
                .await;
            self.mocks.push(mock);
            self.registry.insert(
                parse_record(&format!(
                    "{};{}/{};{};1-1;any",
                    key,
                    self.server.url(),
                    filename,
                    hex::encode(Sha256::digest(declared))
                ))
                .unwrap(),
            );
        }

        async fn serve(&mut self, key: &str, depends: &[&str]) {
            let data = package(key, depends);
            self.publish(key, &data, &data, 1).await;
        }

        fn artifact(&self, key: &str) -> PathBuf {
            self.cache.path().join(key).join(format!("{}-1-1.tar.gz", key))
        }

        /// Place `data` where the cache keeps the artifact for `key`.
        fn seed(&self, key: &str, data: &[u8]) {
            let path = self.artifact(key);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, data).unwrap();
        }

        fn orchestrator(&self, platform: MockPlatform) -> Orchestrator<RealRuntime, MockPlatform> {
            self.orchestrator_with(platform, test_config(self.cache.path()))
        }

        fn orchestrator_with(
            &self,
            platform: MockPlatform,
            config: EngineConfig,
        ) -> Orchestrator<RealRuntime, MockPlatform> {
            Orchestrator::new(
                Arc::new(RealRuntime),
                platform,
                self.registry.clone(),
                config,
            )
            .unwrap()
        }

        async fn assert_downloads(&self) {
            for mock in &self.mocks {
                mock.assert_async().await;
            }
        }
    }

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|k| k.to_string()).collect()
    }

    /// Platform where nothing is installed until `install_files` installs it,
    /// the network is reachable and the system package manager fails.
    fn empty_system() -> (MockPlatform, Arc<Mutex<HashSet<String>>>) {
        let installed = Arc::new(Mutex::new(HashSet::new()));
        let mut platform = MockPlatform::new();

        let state = Arc::clone(&installed);
        platform
            .expect_is_installed()
            .returning(move |key| state.lock().unwrap().contains(key));
        platform.expect_is_network_reachable().returning(|| true);
        platform
            .expect_install_from_repositories()
            .returning(|_| Err(anyhow::anyhow!("target not found")));

        (platform, installed)
    }

    fn record_installs(platform: &mut MockPlatform, installed: &Arc<Mutex<HashSet<String>>>) {
        let state = Arc::clone(installed);
        platform.expect_install_files().returning(move |paths| {
            let mut state = state.lock().unwrap();
            for path in paths {
                let name = path.file_name().unwrap().to_string_lossy().into_owned();
                state.insert(name.trim_end_matches("-1-1.tar.gz").to_string());
            }
            Ok(())
        });
    }

    #[tokio::test]
    async fn test_empty_request_is_complete() {
        let fixture = Fixture::new().await;
        let result = fixture.orchestrator(MockPlatform::new()).ensure(&[]).await;

        assert_eq!(result.status(), EnsureStatus::Complete);
        assert_eq!(result.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_already_installed_needs_nothing() {
        let fixture = Fixture::new().await;
        let mut platform = MockPlatform::new();
        platform.expect_is_installed().returning(|_| true);
        platform.expect_is_network_reachable().never();
        platform.expect_install_files().never();

        let result = fixture
            .orchestrator(platform)
            .ensure(&keys(&["zfs-utils", "zfs-utils"]))
            .await;

        assert_eq!(result.already_satisfied, keys(&["zfs-utils"]));
        assert_eq!(result.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_system_manager_success_skips_cache() {
        let fixture = Fixture::new().await;
        let installed = Arc::new(Mutex::new(HashSet::<String>::new()));
        let mut platform = MockPlatform::new();

        let state = Arc::clone(&installed);
        platform
            .expect_is_installed()
            .returning(move |key| state.lock().unwrap().contains(key));
        platform.expect_is_network_reachable().returning(|| true);
        let state = Arc::clone(&installed);
        platform
            .expect_install_from_repositories()
            .times(1)
            .returning(move |keys| {
                state.lock().unwrap().extend(keys.iter().cloned());
                Ok(())
            });
        platform.expect_install_files().never();

        let result = fixture
            .orchestrator(platform)
            .ensure(&keys(&["grub", "efibootmgr"]))
            .await;

        assert_eq!(result.installed, keys(&["grub", "efibootmgr"]));
        assert_eq!(result.status(), EnsureStatus::Complete);
    }

    #[tokio::test]
    async fn test_partial_batch_with_checksum_mismatch() {
        let mut fixture = Fixture::new().await;
        fixture.serve("a", &[]).await;
        fixture
            .publish("b", &package("b", &[]), &package("tampered", &[]), 1)
            .await;
        fixture.serve("c", &[]).await;

        let (mut platform, installed) = empty_system();
        record_installs(&mut platform, &installed);

        let result = fixture
            .orchestrator(platform)
            .ensure(&keys(&["a", "b", "c"]))
            .await;

        fixture.assert_downloads().await;
        let mut done = result.installed.clone();
        done.sort();
        assert_eq!(done, keys(&["a", "c"]));
        assert_eq!(result.failed_keys(), vec!["b"]);
        assert_eq!(result.failed[0].kind, FailureKind::Integrity);
        assert_eq!(result.status(), EnsureStatus::Partial);
        assert_eq!(result.exit_code(), 2);
        assert!(!fixture.artifact("b").exists());
    }

    #[tokio::test]
    async fn test_second_run_uses_cache_without_network() {
        let mut fixture = Fixture::new().await;
        fixture.serve("pkgx", &[]).await;

        // Nothing ever reports as installed, so both runs reach the cache
        let mut platform = MockPlatform::new();
        platform.expect_is_installed().returning(|_| false);
        platform.expect_is_network_reachable().returning(|| true);
        platform
            .expect_install_from_repositories()
            .returning(|_| Err(anyhow::anyhow!("target not found")));
        platform.expect_install_files().times(2).returning(|_| Ok(()));

        let orchestrator = fixture.orchestrator(platform);
        let first = orchestrator.ensure(&keys(&["pkgx"])).await;
        let second = orchestrator.ensure(&keys(&["pkgx"])).await;

        // Exactly one request over both runs
        fixture.assert_downloads().await;
        assert_eq!(first.installed, keys(&["pkgx"]));
        assert_eq!(second.installed, keys(&["pkgx"]));
    }

    #[tokio::test]
    async fn test_offline_installs_from_existing_cache() {
        let mut fixture = Fixture::new().await;
        let data = package("pkgx", &[]);
        fixture.publish("pkgx", &data, &data, 0).await;
        fixture.seed("pkgx", &data);

        let mut platform = MockPlatform::new();
        platform.expect_is_installed().returning(|_| false);
        platform.expect_is_network_reachable().never();
        platform.expect_install_from_repositories().never();
        platform
            .expect_install_files()
            .times(1)
            .returning(|_| Ok(()));

        let mut config = test_config(fixture.cache.path());
        config.offline = true;
        let result = fixture
            .orchestrator_with(platform, config)
            .ensure(&keys(&["pkgx"]))
            .await;

        fixture.assert_downloads().await;
        assert_eq!(result.installed, keys(&["pkgx"]));
        assert_eq!(result.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_network_without_cache_is_critical() {
        let mut fixture = Fixture::new().await;
        let data = package("pkgx", &[]);
        fixture.publish("pkgx", &data, &data, 0).await;

        let mut platform = MockPlatform::new();
        platform.expect_is_installed().returning(|_| false);
        platform.expect_is_network_reachable().returning(|| false);
        platform.expect_install_from_repositories().never();
        platform.expect_install_files().never();

        let result = fixture
            .orchestrator(platform)
            .ensure(&keys(&["pkgx", "unknown"]))
            .await;

        fixture.assert_downloads().await;
        assert_eq!(result.failed_keys(), vec!["pkgx", "unknown"]);
        assert_eq!(result.failed[0].kind, FailureKind::Network);
        assert_eq!(result.failed[1].kind, FailureKind::Registry);
        assert_eq!(result.status(), EnsureStatus::Critical);
        assert_eq!(result.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_batch_failure_isolates_culprit() {
        let mut fixture = Fixture::new().await;
        fixture.serve("good", &[]).await;
        fixture.serve("bad", &[]).await;

        let (mut platform, _) = empty_system();
        platform.expect_install_files().returning(|paths| {
            let culprit = paths
                .iter()
                .any(|p| p.to_string_lossy().contains("bad-1-1"));
            if culprit {
                Err(anyhow::anyhow!("conflicting files"))
            } else {
                Ok(())
            }
        });

        let result = fixture
            .orchestrator(platform)
            .ensure(&keys(&["good", "bad"]))
            .await;

        assert_eq!(result.installed, keys(&["good"]));
        assert_eq!(result.failed_keys(), vec!["bad"]);
        assert_eq!(result.failed[0].kind, FailureKind::Installation);
        assert_eq!(result.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_dependencies_installed_first_unless_present() {
        let mut fixture = Fixture::new().await;
        fixture.serve("zfs-dkms", &["zfs-utils", "dkms", "linux-headers"]).await;
        fixture.serve("zfs-utils", &[]).await;
        fixture.serve("dkms", &[]).await;

        let mut platform = MockPlatform::new();
        platform
            .expect_is_installed()
            .returning(|key| key == "dkms");
        platform.expect_is_network_reachable().returning(|| true);
        platform
            .expect_install_from_repositories()
            .returning(|_| Err(anyhow::anyhow!("target not found")));
        let batches = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&batches);
        platform.expect_install_files().returning(move |paths| {
            seen.lock().unwrap().push(paths.to_vec());
            Ok(())
        });

        let result = fixture
            .orchestrator(platform)
            .ensure(&keys(&["zfs-dkms"]))
            .await;

        fixture.assert_downloads().await;
        assert_eq!(
            *batches.lock().unwrap(),
            vec![vec![fixture.artifact("zfs-utils"), fixture.artifact("zfs-dkms")]]
        );
        assert_eq!(result.installed, keys(&["zfs-utils", "zfs-dkms"]));
        assert_eq!(result.unresolved, keys(&["linux-headers"]));
        assert_eq!(result.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_failed_dependency_is_reported_separately() {
        let mut fixture = Fixture::new().await;
        fixture.serve("app", &["lib"]).await;
        fixture
            .publish("lib", &package("lib", &[]), b"truncated", 1)
            .await;

        let (mut platform, installed) = empty_system();
        record_installs(&mut platform, &installed);

        let result = fixture.orchestrator(platform).ensure(&keys(&["app"])).await;

        assert_eq!(result.installed, keys(&["app"]));
        assert!(result.failed.is_empty());
        assert_eq!(result.dependency_failures.len(), 1);
        assert_eq!(result.dependency_failures[0].key, "lib");
    }

    #[tokio::test]
    async fn test_fetch_populates_cache_without_installing() {
        let mut fixture = Fixture::new().await;
        fixture.serve("a", &["b"]).await;
        fixture.serve("b", &[]).await;

        let mut platform = MockPlatform::new();
        platform.expect_is_network_reachable().returning(|| true);
        platform.expect_install_files().never();
        platform.expect_install_from_repositories().never();

        let resolution = fixture.orchestrator(platform).fetch(&keys(&["a"])).await;

        fixture.assert_downloads().await;
        assert_eq!(resolution.order, keys(&["b", "a"]));
        assert!(fixture.artifact("a").exists());
        assert!(fixture.artifact("b").exists());
    }

    #[tokio::test]
    async fn test_verify_cache_removes_invalid_artifacts() {
        let mut fixture = Fixture::new().await;
        let good = package("good", &[]);
        let bad = package("bad", &[]);
        fixture.publish("good", &good, &good, 0).await;
        fixture.publish("bad", &bad, &bad, 0).await;
        fixture.publish("absent", &bad, &bad, 0).await;
        fixture.seed("good", &good);
        fixture.seed("bad", b"corrupted");
        let stale = fixture.cache.path().join("other-1-1.tar.gz.part");
        std::fs::write(&stale, b"half").unwrap();

        let report = fixture
            .orchestrator(MockPlatform::new())
            .verify_cache()
            .unwrap();

        assert_eq!(report.valid, keys(&["good"]));
        assert_eq!(report.removed.len(), 1);
        assert_eq!(report.removed[0].0, "bad");
        assert_eq!(report.stale_partials, vec![stale]);
        assert!(fixture.artifact("good").exists());
        assert!(!fixture.artifact("bad").exists());
    }
}
