use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use log::{debug, info};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;

use super::Platform;
use super::probe::ReachabilityProbe;
use crate::resolve::strip_version_constraint;

/// [`Platform`] backed by `pacman`.
pub struct PacmanPlatform {
    program: String,
    probe: ReachabilityProbe,
}

impl PacmanPlatform {
    pub fn new(probe: ReachabilityProbe) -> Self {
        Self::with_program("pacman", probe)
    }

    /// Use a different executable with pacman's command line interface.
    pub fn with_program(program: impl Into<String>, probe: ReachabilityProbe) -> Self {
        Self {
            program: program.into(),
            probe,
        }
    }

    async fn exec<I, S>(&self, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        debug!("Executing: {:?}", command.as_std());

        command
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.program))
    }

    fn check(&self, output: &Output, action: &str) -> Result<()> {
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "{} {} failed ({}): {}",
            self.program,
            action,
            output.status,
            stderr.trim()
        )
    }
}

#[async_trait]
impl Platform for PacmanPlatform {
    async fn is_installed(&self, key: &str) -> bool {
        match self.exec(["-Q", key]).await {
            Ok(output) => output.status.success(),
            Err(e) => {
                debug!("Cannot query {}: {:#}", key, e);
                false
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn install_from_repositories(&self, keys: &[String]) -> Result<()> {
        info!("Installing from repositories: {}", keys.join(" "));
        let mut args = vec!["-S", "--needed", "--noconfirm"];
        args.extend(keys.iter().map(String::as_str));
        let output = self.exec(args).await?;
        self.check(&output, "-S")
    }

    #[tracing::instrument(skip(self))]
    async fn install_files(&self, paths: &[PathBuf]) -> Result<()> {
        let mut args = vec![OsStr::new("-U"), OsStr::new("--noconfirm")];
        args.extend(paths.iter().map(|path| path.as_os_str()));
        let output = self.exec(args).await?;
        self.check(&output, "-U")
    }

    async fn declared_dependencies(&self, artifact: &Path) -> Result<Vec<String>> {
        let output = self
            .exec([OsStr::new("-Qip"), artifact.as_os_str()])
            .await?;
        self.check(&output, "-Qip")?;
        Ok(parse_depends_on(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn is_network_reachable(&self) -> bool {
        self.probe.is_reachable().await
    }
}

/// Extracts the `Depends On` field from `pacman -Qi`/`-Qip` output.
///
/// Long values wrap onto indented continuation lines. `None` means no
/// dependencies.
pub fn parse_depends_on(info: &str) -> Vec<String> {
    let mut value = String::new();
    let mut in_field = false;

    for line in info.lines() {
        if in_field {
            if line.starts_with(char::is_whitespace) && !line.trim().is_empty() {
                value.push(' ');
                value.push_str(line.trim());
                continue;
            }
            break;
        }
        let Some((name, rest)) = line.split_once(':') else {
            continue;
        };
        if name.trim() == "Depends On" {
            value.push_str(rest.trim());
            in_field = true;
        }
    }

    if value == "None" {
        return Vec::new();
    }
    value
        .split_whitespace()
        .map(strip_version_constraint)
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect()
}
