//! Engine configuration from `PKGENSURE_*` environment variables.

use anyhow::{Context, Result};
use log::debug;
use reqwest::Client;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::acquire::AcquireOptions;
use crate::http::{MAX_RETRIES, RETRY_DELAY_MS, RetryPolicy};
use crate::platform::{DEFAULT_PROBE_HOSTS, ReachabilityProbe};
use crate::registry::SourceRegistry;
use crate::runtime::Runtime;
use crate::schedule::default_workers;

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_PROXY_PORT: u16 = 8080;

/// Cache root used by privileged runs, or when no per-user cache exists.
pub const SYSTEM_CACHE_DIR: &str = "/var/cache/pkgensure";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proxy {
    pub host: String,
    pub port: u16,
}

impl Proxy {
    fn bare_host(&self) -> &str {
        self.host
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.host)
    }

    pub fn url(&self) -> String {
        if self.host.contains("://") {
            format!("{}:{}", self.host, self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }

    /// `host:port` for the reachability probe.
    pub fn target(&self) -> String {
        format!("{}:{}", self.bare_host(), self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub cache_dir: PathBuf,
    /// Registry file; the compiled-in registry is used when unset.
    pub sources: Option<PathBuf>,
    pub max_retries: usize,
    pub retry_delay: Duration,
    pub connect_timeout: Duration,
    pub timeout: Duration,
    pub proxy: Option<Proxy>,
    pub offline: bool,
    pub force_redownload: bool,
    pub skip_checksum: bool,
    pub verify_signatures: bool,
    pub jobs: usize,
    pub probe_hosts: Vec<String>,
}

impl EngineConfig {
    #[tracing::instrument(skip(runtime))]
    pub fn from_env<R: Runtime + ?Sized>(runtime: &R) -> Result<Self> {
        let cache_dir = match var(runtime, "PKGENSURE_CACHE_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => default_cache_dir(runtime),
        };

        let proxy = match var(runtime, "PKGENSURE_PROXY_HOST") {
            Some(host) => Some(Proxy {
                host,
                port: parse_var(runtime, "PKGENSURE_PROXY_PORT", DEFAULT_PROXY_PORT)?,
            }),
            None => None,
        };

        let probe_hosts = var(runtime, "PKGENSURE_PROBE_HOSTS")
            .map(|list| ReachabilityProbe::parse_targets(&list))
            .unwrap_or_else(|| ReachabilityProbe::parse_targets(DEFAULT_PROBE_HOSTS));

        let config = Self {
            cache_dir,
            sources: var(runtime, "PKGENSURE_SOURCES").map(PathBuf::from),
            max_retries: parse_var(runtime, "PKGENSURE_MAX_RETRIES", MAX_RETRIES)?,
            retry_delay: Duration::from_millis(parse_var(
                runtime,
                "PKGENSURE_RETRY_DELAY_MS",
                RETRY_DELAY_MS,
            )?),
            connect_timeout: Duration::from_secs(parse_var(
                runtime,
                "PKGENSURE_CONNECT_TIMEOUT",
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )?),
            timeout: Duration::from_secs(parse_var(
                runtime,
                "PKGENSURE_TIMEOUT",
                DEFAULT_TIMEOUT_SECS,
            )?),
            proxy,
            offline: flag(runtime, "PKGENSURE_OFFLINE"),
            force_redownload: flag(runtime, "PKGENSURE_FORCE_REDOWNLOAD"),
            skip_checksum: flag(runtime, "PKGENSURE_SKIP_CHECKSUM"),
            verify_signatures: flag(runtime, "PKGENSURE_VERIFY_SIGNATURES"),
            jobs: parse_var(runtime, "PKGENSURE_JOBS", default_workers())?.max(1),
            probe_hosts,
        };
        debug!("Configuration: {:?}", config);
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_delay)
    }

    /// HTTP client carrying the configured timeouts and proxy.
    pub fn http_client(&self) -> Result<Client> {
        let mut builder = Client::builder()
            .user_agent(format!("pkgensure/{}", env!("PKGENSURE_VERSION")))
            .connect_timeout(self.connect_timeout)
            .timeout(self.timeout);

        if let Some(proxy) = &self.proxy {
            let url = proxy.url();
            builder = builder.proxy(
                reqwest::Proxy::all(&url).with_context(|| format!("Invalid proxy {}", url))?,
            );
        }

        builder.build().context("Failed to build HTTP client")
    }

    pub fn acquire_options(&self) -> AcquireOptions {
        AcquireOptions {
            force_redownload: self.force_redownload,
            offline: self.offline,
            verify_signatures: self.verify_signatures,
        }
    }

    /// Behind a proxy only the proxy itself has to be reachable.
    pub fn probe(&self) -> ReachabilityProbe {
        let targets = match &self.proxy {
            Some(proxy) => vec![proxy.target()],
            None => self.probe_hosts.clone(),
        };
        ReachabilityProbe::new(targets, self.connect_timeout)
    }

    pub fn load_registry<R: Runtime + ?Sized>(&self, runtime: &R) -> Result<SourceRegistry> {
        match &self.sources {
            Some(path) => SourceRegistry::load(runtime, path),
            None => Ok(SourceRegistry::builtin()),
        }
    }
}

fn default_cache_dir<R: Runtime + ?Sized>(runtime: &R) -> PathBuf {
    if runtime.is_privileged() {
        return PathBuf::from(SYSTEM_CACHE_DIR);
    }
    runtime
        .cache_dir()
        .map(|dir| dir.join("pkgensure"))
        .unwrap_or_else(|| PathBuf::from(SYSTEM_CACHE_DIR))
}

/// A set, non-blank variable.
fn var<R: Runtime + ?Sized>(runtime: &R, key: &str) -> Option<String> {
    runtime
        .env_var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_var<R, T>(runtime: &R, key: &str, default: T) -> Result<T>
where
    R: Runtime + ?Sized,
    T: FromStr,
    T::Err: Display,
{
    match var(runtime, key) {
        Some(value) => value
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {:?} ({})", key, value, e)),
        None => Ok(default),
    }
}

fn flag<R: Runtime + ?Sized>(runtime: &R, key: &str) -> bool {
    var(runtime, key).is_some_and(|value| {
        matches!(
            value.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}
