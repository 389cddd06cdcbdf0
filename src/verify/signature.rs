use anyhow::{Context, Result, bail};
use std::path::Path;
use std::process::Command;

/// Checks a detached signature against an artifact.
#[cfg_attr(test, mockall::automock)]
pub trait SignatureCheck: Send + Sync {
    fn check(&self, artifact: &Path, signature: &Path) -> Result<()>;
}

/// Verifies detached signatures with `gpg --verify` against the caller's keyring.
pub struct GpgSignatureCheck {
    program: String,
}

impl Default for GpgSignatureCheck {
    fn default() -> Self {
        Self {
            program: "gpg".to_string(),
        }
    }
}

impl GpgSignatureCheck {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl SignatureCheck for GpgSignatureCheck {
    #[tracing::instrument(skip(self))]
    fn check(&self, artifact: &Path, signature: &Path) -> Result<()> {
        let output = Command::new(&self.program)
            .args(["--batch", "--verify"])
            .arg(signature)
            .arg(artifact)
            .output()
            .with_context(|| format!("Failed to run {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} rejected the signature ({}): {}",
                self.program,
                output.status,
                stderr.trim()
            );
        }
        Ok(())
    }
}
