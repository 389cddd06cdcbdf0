use serde::Serialize;
use std::fmt;

use crate::error::{FailureKind, FailureReason};

/// Aggregate outcome of a run, mapped onto the process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnsureStatus {
    /// Every requested package is satisfied.
    Complete,
    /// Some but not all requested packages are satisfied.
    Partial,
    /// No requested package is satisfied.
    Critical,
}

impl EnsureStatus {
    pub fn from_counts(requested: usize, unsatisfied: usize) -> Self {
        if unsatisfied == 0 {
            EnsureStatus::Complete
        } else if unsatisfied >= requested {
            EnsureStatus::Critical
        } else {
            EnsureStatus::Partial
        }
    }

    pub fn exit_code(self) -> u8 {
        match self {
            EnsureStatus::Complete => 0,
            EnsureStatus::Critical => 1,
            EnsureStatus::Partial => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedPackage {
    pub key: String,
    pub kind: FailureKind,
    pub reason: String,
}

impl FailedPackage {
    pub fn new(key: impl Into<String>, reason: &FailureReason) -> Self {
        Self {
            key: key.into(),
            kind: reason.kind(),
            reason: reason.to_string(),
        }
    }
}

/// What one `ensure` run achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallationResult {
    /// Distinct requested keys, in request order.
    pub requested: Vec<String>,
    /// Keys installed during this run, dependencies included.
    pub installed: Vec<String>,
    /// Requested keys that were present before the run.
    pub already_satisfied: Vec<String>,
    /// Requested keys left unsatisfied, in request order.
    pub failed: Vec<FailedPackage>,
    /// Discovered dependencies that could not be acquired or installed.
    pub dependency_failures: Vec<FailedPackage>,
    /// Declared dependencies without a registry entry.
    pub unresolved: Vec<String>,
}

impl InstallationResult {
    pub fn new(requested: Vec<String>) -> Self {
        Self {
            requested,
            ..Default::default()
        }
    }

    pub fn status(&self) -> EnsureStatus {
        EnsureStatus::from_counts(self.requested.len(), self.failed.len())
    }

    pub fn exit_code(&self) -> u8 {
        self.status().exit_code()
    }

    pub fn failed_keys(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.key.as_str()).collect()
    }

    pub fn is_satisfied(&self, key: &str) -> bool {
        self.installed.iter().any(|k| k == key) || self.already_satisfied.iter().any(|k| k == key)
    }

    /// Machine-readable report for later installer stages.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&JsonReport {
            status: self.status(),
            exit_code: self.exit_code(),
            result: self,
        })
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    status: EnsureStatus,
    exit_code: u8,
    #[serde(flatten)]
    result: &'a InstallationResult,
}

impl fmt::Display for InstallationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} installed, {} already satisfied, {} failed",
            self.installed.len(),
            self.already_satisfied.len(),
            self.failed.len()
        )?;
        for failure in &self.failed {
            writeln!(f, "   failed {} ({}): {}", failure.key, failure.kind, failure.reason)?;
        }
        for failure in &self.dependency_failures {
            writeln!(
                f,
                "   dependency {} ({}): {}",
                failure.key, failure.kind, failure.reason
            )?;
        }
        if !self.unresolved.is_empty() {
            writeln!(f, "   left to the platform: {}", self.unresolved.join(", "))?;
        }
        Ok(())
    }
}
