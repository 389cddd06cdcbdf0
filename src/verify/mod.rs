//! Integrity verifier for a single artifact file.
//!
//! Checks run in order: SHA-256 checksum, archive readability, detached
//! signature. Only the first two can fail an artifact; signature problems are
//! reported as warnings.

mod archive;
mod signature;

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, warn};
use sha2::{Digest, Sha256};

use crate::cache::artifact_filename;
use crate::error::FailureReason;
use crate::registry::PackageSource;
use crate::runtime::Runtime;

pub use archive::{ArchiveFormat, check_readable};
pub use signature::{GpgSignatureCheck, SignatureCheck};

#[cfg(test)]
pub use signature::MockSignatureCheck;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumStatus {
    Matched,
    /// The registry record declares no checksum.
    NotDeclared,
    /// Mismatch tolerated because checksum enforcement is disabled.
    MismatchIgnored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStatus {
    Disabled,
    Verified,
    Missing,
    Invalid(String),
}

/// What passed verification, and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub checksum: ChecksumStatus,
    pub signature: SignatureStatus,
}

pub struct Verifier<R: Runtime> {
    runtime: Arc<R>,
    skip_checksum: bool,
    signatures: Option<Arc<dyn SignatureCheck>>,
}

impl<R: Runtime> Clone for Verifier<R> {
    fn clone(&self) -> Self {
        Self {
            runtime: Arc::clone(&self.runtime),
            skip_checksum: self.skip_checksum,
            signatures: self.signatures.clone(),
        }
    }
}

impl<R: Runtime> Verifier<R> {
    pub fn new(runtime: Arc<R>, skip_checksum: bool) -> Self {
        Self {
            runtime,
            skip_checksum,
            signatures: None,
        }
    }

    /// Enable advisory signature verification.
    pub fn with_signature_check(mut self, check: Arc<dyn SignatureCheck>) -> Self {
        self.signatures = Some(check);
        self
    }

    /// Streams the file through SHA-256 and returns the lowercase hex digest.
    pub fn sha256_file(&self, path: &Path) -> Result<String> {
        let mut reader = self.runtime.open(path)?;
        let mut hasher = Sha256::new();
        io::copy(&mut reader, &mut hasher)
            .with_context(|| format!("Failed to hash {}", path.display()))?;
        Ok(hex::encode(hasher.finalize()))
    }

    /// Verify `artifact` as the artifact of `source`.
    ///
    /// `artifact` may be an in-flight `.part` file, so the archive format is
    /// taken from the source's file name rather than from the path.
    #[tracing::instrument(skip(self, source), fields(key = %source.key))]
    pub fn verify(
        &self,
        source: &PackageSource,
        artifact: &Path,
        signature: Option<&Path>,
    ) -> Result<Verification, FailureReason> {
        let checksum = self.verify_checksum(source, artifact)?;
        self.verify_archive(source, artifact)?;
        let signature = self.verify_signature(source, artifact, signature);

        Ok(Verification {
            checksum,
            signature,
        })
    }

    fn verify_checksum(
        &self,
        source: &PackageSource,
        artifact: &Path,
    ) -> Result<ChecksumStatus, FailureReason> {
        let Some(expected) = source.checksum.as_deref() else {
            warn!(
                "{}: no checksum declared, relying on archive checks only",
                source.key
            );
            return Ok(ChecksumStatus::NotDeclared);
        };

        let actual = self.sha256_file(artifact).map_err(FailureReason::io)?;
        if actual == expected {
            debug!("{}: checksum ok", source.key);
            return Ok(ChecksumStatus::Matched);
        }

        if self.skip_checksum {
            warn!(
                "{}: checksum mismatch ignored (expected {}, got {})",
                source.key, expected, actual
            );
            return Ok(ChecksumStatus::MismatchIgnored);
        }

        Err(FailureReason::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }

    fn verify_archive(&self, source: &PackageSource, artifact: &Path) -> Result<(), FailureReason> {
        let format = ArchiveFormat::detect(&artifact_filename(source));
        if format == ArchiveFormat::Opaque {
            return Ok(());
        }

        let reader = self.runtime.open(artifact).map_err(FailureReason::io)?;
        let entries = check_readable(reader, format)
            .map_err(|e| FailureReason::Archive(format!("{:#}", e)))?;
        debug!("{}: archive ok ({} entries)", source.key, entries);
        Ok(())
    }

    fn verify_signature(
        &self,
        source: &PackageSource,
        artifact: &Path,
        signature: Option<&Path>,
    ) -> SignatureStatus {
        let Some(check) = &self.signatures else {
            return SignatureStatus::Disabled;
        };

        let Some(signature) = signature.filter(|path| self.runtime.exists(path)) else {
            warn!("{}: no detached signature available", source.key);
            return SignatureStatus::Missing;
        };

        match check.check(artifact, signature) {
            Ok(()) => SignatureStatus::Verified,
            Err(e) => {
                warn!(
                    "{}: signature verification failed, continuing anyway: {:#}",
                    source.key, e
                );
                SignatureStatus::Invalid(format!("{:#}", e))
            }
        }
    }
}
