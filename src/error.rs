//! Per-package failure taxonomy.
//!
//! Every terminal failure is attributed to exactly one package key. Process
//! level errors (bad configuration, unreadable registry file) use `anyhow`
//! instead and never end up here.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Category a failure belongs to, used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Network,
    Integrity,
    Registry,
    Installation,
    Io,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Network => "network",
            FailureKind::Integrity => "integrity",
            FailureKind::Registry => "registry",
            FailureKind::Installation => "installation",
            FailureKind::Io => "io",
        };
        f.write_str(name)
    }
}

/// Why a single package could not be acquired or installed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("package is not declared in the source registry")]
    NotFound,

    #[error("invalid source: {0}")]
    InvalidSource(String),

    #[error("download failed: {0}")]
    Network(String),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("artifact is not a readable archive: {0}")]
    Archive(String),

    #[error("not present in the local cache and network access is disabled")]
    NotCached,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("installation failed: {0}")]
    Install(String),
}

impl FailureReason {
    pub fn kind(&self) -> FailureKind {
        match self {
            FailureReason::NotFound | FailureReason::InvalidSource(_) => FailureKind::Registry,
            FailureReason::Network(_) | FailureReason::NotCached => FailureKind::Network,
            FailureReason::ChecksumMismatch { .. } | FailureReason::Archive(_) => {
                FailureKind::Integrity
            }
            FailureReason::Io(_) => FailureKind::Io,
            FailureReason::Install(_) => FailureKind::Installation,
        }
    }

    /// Wraps an `anyhow` chain as an I/O failure, keeping every context layer.
    pub fn io(error: anyhow::Error) -> Self {
        FailureReason::Io(format!("{:#}", error))
    }

    pub fn network(error: anyhow::Error) -> Self {
        FailureReason::Network(format!("{:#}", error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kinds() {
        assert_eq!(FailureReason::NotFound.kind(), FailureKind::Registry);
        assert_eq!(
            FailureReason::InvalidSource("x".into()).kind(),
            FailureKind::Registry
        );
        assert_eq!(FailureReason::NotCached.kind(), FailureKind::Network);
        assert_eq!(
            FailureReason::ChecksumMismatch {
                expected: "a".into(),
                actual: "b".into()
            }
            .kind(),
            FailureKind::Integrity
        );
        assert_eq!(
            FailureReason::Install("exit 1".into()).kind(),
            FailureKind::Installation
        );
    }

    #[test]
    fn test_failure_display_keeps_context_chain() {
        let err = anyhow::anyhow!("connection refused").context("GET https://example.com/a");
        let reason = FailureReason::network(err);
        let text = reason.to_string();
        assert!(text.contains("GET https://example.com/a"));
        assert!(text.contains("connection refused"));
    }

    #[test]
    fn test_checksum_mismatch_display() {
        let reason = FailureReason::ChecksumMismatch {
            expected: "aaaa".into(),
            actual: "bbbb".into(),
        };
        assert_eq!(
            reason.to_string(),
            "checksum mismatch: expected aaaa, got bbbb"
        );
    }

    #[test]
    fn test_failure_kind_serializes_lowercase() {
        let json = serde_json::to_string(&FailureKind::Integrity).unwrap();
        assert_eq!(json, "\"integrity\"");
    }
}
