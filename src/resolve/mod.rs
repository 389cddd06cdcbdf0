//! Dependency resolver: requested keys → transitive closure, dependencies first.
//!
//! Dependency edges are only known once an artifact is on disk, so discovery
//! proceeds in waves: every newly seen key of a wave is acquired in one batch
//! through the scheduler, its declared dependencies are read, and unseen ones
//! form the next wave. A key enters the visited set before it is expanded,
//! which keeps self references and cycles finite.

mod metadata;

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::cache::CacheEntry;
use crate::platform::Platform;
use crate::registry::{PackageSource, SourceRegistry};
use crate::runtime::Runtime;
use crate::schedule::{AcquisitionOutcome, Scheduler};
use crate::verify::ArchiveFormat;

pub use metadata::{embedded_dependencies, parse_pkginfo, strip_version_constraint};

/// Outcome of resolving one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Every acquired key exactly once, dependencies before dependents.
    pub order: Vec<String>,
    /// One outcome per key that was looked up, requested or discovered.
    pub outcomes: Vec<AcquisitionOutcome>,
    /// Declared dependencies with no registry entry, left to the platform.
    pub unresolved: Vec<String>,
}

impl Resolution {
    pub fn outcome(&self, key: &str) -> Option<&AcquisitionOutcome> {
        self.outcomes.iter().find(|outcome| outcome.key == key)
    }

    pub fn entry(&self, key: &str) -> Option<&CacheEntry> {
        self.outcome(key).and_then(AcquisitionOutcome::entry)
    }
}

pub struct Resolver<'a, R: Runtime + 'static, P: Platform + ?Sized> {
    runtime: Arc<R>,
    registry: &'a SourceRegistry,
    scheduler: &'a Scheduler<R>,
    platform: &'a P,
}

impl<'a, R: Runtime + 'static, P: Platform + ?Sized> Resolver<'a, R, P> {
    pub fn new(
        runtime: Arc<R>,
        registry: &'a SourceRegistry,
        scheduler: &'a Scheduler<R>,
        platform: &'a P,
    ) -> Self {
        Self {
            runtime,
            registry,
            scheduler,
            platform,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self, requested: &[String]) -> Resolution {
        let mut visited: HashSet<String> = HashSet::new();
        let mut graph: HashMap<String, Vec<String>> = HashMap::new();
        let mut outcomes = Vec::new();
        let mut unresolved: Vec<String> = Vec::new();

        let mut wave: Vec<PackageSource> = Vec::new();
        for key in requested {
            if !visited.insert(key.clone()) {
                continue;
            }
            match self.registry.lookup(key) {
                Ok(source) => wave.push(source.clone()),
                Err(reason) => {
                    warn!("{}: {}", key, reason);
                    outcomes.push(AcquisitionOutcome::failed(key.as_str(), reason));
                }
            }
        }

        while !wave.is_empty() {
            debug!("Resolving wave of {} package(s)", wave.len());
            let mut next = Vec::new();

            for outcome in self.scheduler.acquire_all(&wave).await {
                if let Some(entry) = outcome.entry() {
                    let declared = self.dependencies_of(&outcome.key, &entry.path).await;
                    let mut edges = Vec::new();
                    for dependency in declared {
                        let Ok(source) = self.registry.lookup(&dependency) else {
                            if !unresolved.contains(&dependency) {
                                info!(
                                    "{}: dependency {} is not in the source registry, leaving it to the platform",
                                    outcome.key, dependency
                                );
                                unresolved.push(dependency);
                            }
                            continue;
                        };
                        if visited.insert(dependency.clone()) {
                            next.push(source.clone());
                        }
                        edges.push(dependency);
                    }
                    graph.insert(outcome.key.clone(), edges);
                }
                outcomes.push(outcome);
            }

            wave = next;
        }

        unresolved.sort();
        Resolution {
            order: dependency_order(requested, &graph),
            outcomes,
            unresolved,
        }
    }

    /// Declared dependencies of an acquired artifact. Embedded `.PKGINFO`
    /// metadata wins; otherwise the platform is asked. Unreadable metadata
    /// counts as no dependencies.
    async fn dependencies_of(&self, key: &str, artifact: &Path) -> Vec<String> {
        let filename = artifact
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        if ArchiveFormat::detect(&filename) == ArchiveFormat::TarGz {
            let runtime = Arc::clone(&self.runtime);
            let path = artifact.to_path_buf();
            let embedded = tokio::task::spawn_blocking(move || {
                embedded_dependencies(runtime.open(&path)?)
            })
            .await;

            match embedded {
                Ok(Ok(Some(dependencies))) => return dependencies,
                Ok(Ok(None)) => debug!("{}: no embedded metadata", key),
                Ok(Err(e)) => warn!("{}: unreadable embedded metadata: {:#}", key, e),
                Err(e) => warn!("{}: metadata task failed: {}", key, e),
            }
        }

        match self.platform.declared_dependencies(artifact).await {
            Ok(dependencies) => dependencies,
            Err(e) => {
                warn!("{}: cannot read declared dependencies: {:#}", key, e);
                Vec::new()
            }
        }
    }
}

/// Post-order walk from each root so that dependencies precede dependents.
///
/// Keys absent from `graph` (never acquired) are left out. A node is marked
/// before its children are walked, so a back edge of a cycle is skipped and
/// every node appears once.
fn dependency_order(roots: &[String], graph: &HashMap<String, Vec<String>>) -> Vec<String> {
    let mut order = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for root in roots {
        if !graph.contains_key(root.as_str()) || !seen.insert(root.as_str()) {
            continue;
        }

        let mut stack: Vec<(&str, usize)> = vec![(root.as_str(), 0)];
        while let Some((node, index)) = stack.pop() {
            let edges = graph.get(node).map(Vec::as_slice).unwrap_or_default();
            match edges.get(index) {
                Some(child) => {
                    stack.push((node, index + 1));
                    if graph.contains_key(child.as_str()) && seen.insert(child.as_str()) {
                        stack.push((child.as_str(), 0));
                    }
                }
                None => order.push(node.to_string()),
            }
        }
    }

    order
}
