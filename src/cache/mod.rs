//! Cache store: a directory of previously downloaded artifacts.
//!
//! Each source owns a directory named after its key; the artifact keeps the
//! file name from its URL inside it, so two keys never share a path. A file's
//! presence says nothing about its validity; callers re-verify on every run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::debug;
use serde::Serialize;

use crate::registry::PackageSource;
use crate::runtime::Runtime;

const PARTIAL_SUFFIX: &str = ".part";
const SIGNATURE_SUFFIX: &str = ".sig";

/// An artifact file present under the cache root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub source_key: String,
}

impl CacheEntry {
    pub fn new(path: PathBuf, source_key: impl Into<String>) -> Self {
        Self {
            path,
            source_key: source_key.into(),
        }
    }
}

/// File name an artifact is stored under: the last URL path segment, or a
/// name built from key, version and architecture when the URL has none.
pub fn artifact_filename(source: &PackageSource) -> String {
    let from_url = source
        .url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| is_safe_filename(name));

    match from_url {
        Some(name) => name.to_string(),
        None => format!("{}-{}-{}.pkg", source.key, source.version, source.arch),
    }
}

fn is_safe_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.ends_with(PARTIAL_SUFFIX)
}

/// Where an in-flight download is written before it is verified.
pub fn partial_path(path: &Path) -> PathBuf {
    with_suffix(path, PARTIAL_SUFFIX)
}

/// Where the detached signature of an artifact is stored.
pub fn signature_path(path: &Path) -> PathBuf {
    with_suffix(path, SIGNATURE_SUFFIX)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Cache directory bookkeeping.
pub struct CacheStore<R: Runtime> {
    runtime: Arc<R>,
    root: PathBuf,
}

impl<R: Runtime> CacheStore<R> {
    pub fn new(runtime: Arc<R>, root: PathBuf) -> Self {
        Self { runtime, root }
    }

    /// Path the artifact of `source` lives at, whether or not it exists.
    pub fn path_for(&self, source: &PackageSource) -> PathBuf {
        self.root
            .join(&source.key)
            .join(artifact_filename(source))
    }

    /// The cache entry for `source`, if its file is present.
    pub fn find(&self, source: &PackageSource) -> Option<CacheEntry> {
        let path = self.path_for(source);
        self.runtime
            .exists(&path)
            .then(|| CacheEntry::new(path, &source.key))
    }

    /// Delete an artifact together with its detached signature.
    pub fn remove(&self, path: &Path) -> Result<()> {
        debug!("Removing cached artifact {}", path.display());
        self.runtime
            .remove_file(path)
            .with_context(|| format!("Failed to remove {}", path.display()))?;
        let signature = signature_path(path);
        if self.runtime.exists(&signature) {
            self.runtime.remove_file(&signature)?;
        }
        Ok(())
    }

    /// Delete `.part` files left behind by a killed process, at the root and
    /// one level down in the per-key directories.
    pub fn remove_stale_partials(&self) -> Result<Vec<PathBuf>> {
        if !self.runtime.exists(&self.root) {
            return Ok(Vec::new());
        }

        let mut removed = Vec::new();
        for path in self.runtime.read_dir(&self.root)? {
            if self.runtime.is_dir(&path) {
                for nested in self.runtime.read_dir(&path)? {
                    self.remove_if_partial(nested, &mut removed)?;
                }
            } else {
                self.remove_if_partial(path, &mut removed)?;
            }
        }
        removed.sort();
        Ok(removed)
    }

    fn remove_if_partial(&self, path: PathBuf, removed: &mut Vec<PathBuf>) -> Result<()> {
        let is_partial = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(PARTIAL_SUFFIX));
        if is_partial {
            self.runtime.remove_file(&path)?;
            removed.push(path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::parse_record;
    use crate::runtime::{MockRuntime, RealRuntime};
    use tempfile::tempdir;

    fn source(line: &str) -> PackageSource {
        parse_record(line).unwrap()
    }

    #[test]
    fn test_artifact_filename_from_url() {
        let s = source(
            "zfs-utils;https://mirror.example.org/repo/zfs-utils-2.2.7-1-x86_64.pkg.tar.zst?sig=1;;2.2.7-1;x86_64",
        );
        assert_eq!(artifact_filename(&s), "zfs-utils-2.2.7-1-x86_64.pkg.tar.zst");
    }

    #[test]
    fn test_artifact_filename_fallback() {
        let s = source("efibootmgr;https://mirror.example.org/;;18-2;any");
        assert_eq!(artifact_filename(&s), "efibootmgr-18-2-any.pkg");
    }

    #[test]
    fn test_partial_and_signature_paths() {
        let path = Path::new("/var/cache/pkgensure/a.pkg.tar.zst");
        assert_eq!(
            partial_path(path),
            PathBuf::from("/var/cache/pkgensure/a.pkg.tar.zst.part")
        );
        assert_eq!(
            signature_path(path),
            PathBuf::from("/var/cache/pkgensure/a.pkg.tar.zst.sig")
        );
    }

    #[test]
    fn test_find_only_when_present() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(Arc::new(RealRuntime), dir.path().to_path_buf());
        let s = source("a;https://example.org/a-1.tar.gz;;1;any");

        assert_eq!(store.find(&s), None);

        let path = dir.path().join("a").join("a-1.tar.gz");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "x").unwrap();
        assert_eq!(store.find(&s), Some(CacheEntry::new(path, "a")));
    }

    #[test]
    fn test_same_file_name_under_different_keys() {
        let store = CacheStore::new(
            Arc::new(RealRuntime),
            PathBuf::from("/var/cache/pkgensure"),
        );
        let a = source("a;https://github.com/one/a/releases/download/v1/pkg.tar.gz;;1;any");
        let b = source("b;https://github.com/two/b/releases/download/v1/pkg.tar.gz;;1;any");

        assert_eq!(
            store.path_for(&a),
            PathBuf::from("/var/cache/pkgensure/a/pkg.tar.gz")
        );
        assert_eq!(
            store.path_for(&b),
            PathBuf::from("/var/cache/pkgensure/b/pkg.tar.gz")
        );
    }

    #[test]
    fn test_remove_takes_signature_along() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(Arc::new(RealRuntime), dir.path().to_path_buf());
        let artifact = dir.path().join("a-1.tar.gz");
        std::fs::write(&artifact, "x").unwrap();
        std::fs::write(signature_path(&artifact), "sig").unwrap();

        store.remove(&artifact).unwrap();

        assert!(!artifact.exists());
        assert!(!signature_path(&artifact).exists());
    }

    #[test]
    fn test_remove_stale_partials() {
        let dir = tempdir().unwrap();
        let store = CacheStore::new(Arc::new(RealRuntime), dir.path().to_path_buf());
        let keyed = dir.path().join("b");
        std::fs::create_dir(&keyed).unwrap();
        std::fs::write(keyed.join("b-1.tar.gz"), "x").unwrap();
        std::fs::write(keyed.join("b-2.tar.gz.part"), "half").unwrap();
        std::fs::write(dir.path().join("a-1.tar.gz.part"), "half").unwrap();

        let removed = store.remove_stale_partials().unwrap();

        assert_eq!(
            removed,
            vec![dir.path().join("a-1.tar.gz.part"), keyed.join("b-2.tar.gz.part")]
        );
        assert!(keyed.join("b-1.tar.gz").exists());
    }

    #[test]
    fn test_remove_stale_partials_missing_root() {
        let mut runtime = MockRuntime::new();
        runtime.expect_exists().returning(|_| false);
        let store = CacheStore::new(Arc::new(runtime), PathBuf::from("/nonexistent"));

        assert!(store.remove_stale_partials().unwrap().is_empty());
    }
}
