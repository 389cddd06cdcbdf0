//! Source registry: package key → download URL, checksum, version, architecture.
//!
//! Records are parsed once at load time into [`PackageSource`] values and are
//! read-only afterwards. Invalid records never enter the registry; they are
//! kept aside in [`SourceRegistry::rejected`] so they can be reported.

mod parse;

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, warn};
use reqwest::Url;

use crate::error::FailureReason;
use crate::runtime::Runtime;

pub use parse::{RecordError, parse_record, validate_url};

/// Records compiled into the binary, used when no registry file is configured.
const DEFAULT_SOURCES: &str = "\
# key;url;checksum;version;architecture[;display name]
zfs-utils;https://github.com/archzfs/archzfs/releases/download/experimental/zfs-utils-2.2.7-1-x86_64.pkg.tar.zst;;2.2.7-1;x86_64;OpenZFS userland utilities
zfs-dkms;https://github.com/archzfs/archzfs/releases/download/experimental/zfs-dkms-2.2.7-1-x86_64.pkg.tar.zst;;2.2.7-1;x86_64;OpenZFS kernel modules (DKMS)
";

/// One downloadable package, immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSource {
    pub key: String,
    pub display_name: String,
    pub url: Url,
    /// Lowercase hex SHA-256, or `None` when the record declares no checksum.
    pub checksum: Option<String>,
    pub version: String,
    pub arch: String,
}

impl PackageSource {
    /// Whether this artifact can be installed on a host of the given architecture.
    pub fn matches_arch(&self, host_arch: &str) -> bool {
        self.arch.is_empty()
            || self.arch.eq_ignore_ascii_case("any")
            || self.arch.eq_ignore_ascii_case("noarch")
            || self.arch == host_arch
    }
}

/// A record that was skipped while loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecord {
    /// 1-based line number in the registry text.
    pub line: usize,
    /// First field of the line, empty when the line has none.
    pub key: String,
    pub text: String,
    pub reason: RecordError,
}

/// Mapping from package key to its source, owned by one engine run.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<String, PackageSource>,
    rejected: Vec<RejectedRecord>,
}

impl SourceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry built from the compiled-in defaults.
    pub fn builtin() -> Self {
        Self::parse(DEFAULT_SOURCES, std::env::consts::ARCH)
    }

    /// Load a registry file through the runtime.
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime + ?Sized>(runtime: &R, path: &Path) -> Result<Self> {
        let text = runtime
            .read_to_string(path)
            .with_context(|| format!("Failed to read source registry {}", path.display()))?;
        let registry = Self::parse(&text, std::env::consts::ARCH);
        debug!(
            "Loaded {} source(s) from {} ({} rejected)",
            registry.len(),
            path.display(),
            registry.rejected.len()
        );
        Ok(registry)
    }

    /// Parse registry text. Blank lines and `#` comments are ignored; every
    /// other line that does not produce a usable source is logged and kept in
    /// [`rejected`](Self::rejected).
    pub fn parse(text: &str, host_arch: &str) -> Self {
        let mut registry = Self::new();

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let result = parse_record(line).and_then(|source| {
                if source.matches_arch(host_arch) {
                    Ok(source)
                } else {
                    Err(RecordError::ForeignArch {
                        arch: source.arch,
                        host: host_arch.to_string(),
                    })
                }
            });

            let reason = match result {
                Ok(source) => {
                    let key = source.key.clone();
                    if registry.insert(source) {
                        continue;
                    }
                    RecordError::DuplicateKey(key)
                }
                Err(reason) => reason,
            };

            warn!("Skipping source registry line {}: {}", index + 1, reason);
            registry.rejected.push(RejectedRecord {
                line: index + 1,
                key: line.split(';').next().unwrap_or_default().trim().to_string(),
                text: line.to_string(),
                reason,
            });
        }

        registry
    }

    /// Add a source. The first declaration of a key wins; returns false if the
    /// key was already present.
    pub fn insert(&mut self, source: PackageSource) -> bool {
        if self.sources.contains_key(&source.key) {
            return false;
        }
        self.sources.insert(source.key.clone(), source);
        true
    }

    /// Look up a key. A key whose records were all rejected fails with
    /// `InvalidSource`, any other unknown key with `NotFound`. Both are
    /// terminal for that key only.
    pub fn lookup(&self, key: &str) -> Result<&PackageSource, FailureReason> {
        if let Some(source) = self.sources.get(key) {
            return Ok(source);
        }
        match self.rejected.iter().find(|record| record.key == key) {
            Some(record) => Err(FailureReason::InvalidSource(record.reason.to_string())),
            None => Err(FailureReason::NotFound),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.sources.contains_key(key)
    }

    /// Iterate sources ordered by key.
    pub fn iter(&self) -> impl Iterator<Item = &PackageSource> {
        self.sources.values()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn rejected(&self) -> &[RejectedRecord] {
        &self.rejected
    }
}
