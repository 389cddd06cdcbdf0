use anyhow::Result;
use clap::Parser;
use pkgensure::config::EngineConfig;
use pkgensure::runtime::RealRuntime;
use pkgensure::{ensure, system_orchestrator};
use std::path::PathBuf;
use std::process::ExitCode;

/// pkgensure - make sure packages are installed, online or offline
///
/// Packages are looked up in a source registry, downloaded into a verified
/// local cache together with their dependencies and installed with pacman.
/// When the network is unavailable, previously cached artifacts are used.
///
/// Every flag can also be set through its PKGENSURE_* environment variable.
///
/// Examples:
///   pkgensure ensure zfs-utils zfs-dkms   # Install, fetching as needed
///   pkgensure fetch zfs-utils             # Fill the cache for an offline run
#[derive(Parser, Debug)]
#[command(author, version = env!("PKGENSURE_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Source registry file (defaults to the compiled-in registry)
    #[arg(long, value_name = "PATH", global = true)]
    sources: Option<PathBuf>,

    /// Cache directory for downloaded artifacts
    #[arg(long = "cache-dir", value_name = "PATH", global = true)]
    cache_dir: Option<PathBuf>,

    /// Never touch the network; use cached artifacts only
    #[arg(long, global = true)]
    offline: bool,

    /// Download again even when a valid cached artifact exists
    #[arg(long = "force-redownload", global = true)]
    force_redownload: bool,

    /// Warn instead of failing on checksum mismatches
    #[arg(long = "skip-checksum", global = true)]
    skip_checksum: bool,

    /// Check detached signatures (advisory only)
    #[arg(long = "verify-signatures", global = true)]
    verify_signatures: bool,

    /// Download attempts per artifact
    #[arg(long, value_name = "N", global = true)]
    retries: Option<usize>,

    /// Concurrent downloads
    #[arg(long, short = 'j', value_name = "N", global = true)]
    jobs: Option<usize>,

    /// More log output (-v info, -vv debug)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Install packages and their dependencies, exit 0 (all), 2 (some) or 1 (none)
    Ensure(EnsureArgs),

    /// Download packages and their dependencies into the cache without installing
    Fetch(FetchArgs),

    /// Re-verify every cached artifact and delete invalid ones
    Verify,

    /// List the source registry
    Sources,
}

#[derive(clap::Args, Debug)]
pub struct EnsureArgs {
    /// Package keys
    #[arg(value_name = "KEY", required = true)]
    pub keys: Vec<String>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args, Debug)]
pub struct FetchArgs {
    /// Package keys
    #[arg(value_name = "KEY", required = true)]
    pub keys: Vec<String>,
}

impl Cli {
    /// Flags win over environment variables.
    fn apply(&self, config: &mut EngineConfig) {
        if let Some(sources) = &self.sources {
            config.sources = Some(sources.clone());
        }
        if let Some(cache_dir) = &self.cache_dir {
            config.cache_dir = cache_dir.clone();
        }
        if let Some(retries) = self.retries {
            config.max_retries = retries;
        }
        if let Some(jobs) = self.jobs {
            config.jobs = jobs.max(1);
        }
        config.offline |= self.offline;
        config.force_redownload |= self.force_redownload;
        config.skip_checksum |= self.skip_checksum;
        config.verify_signatures |= self.verify_signatures;
    }

    fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_level()))
        .init();

    let mut config = EngineConfig::from_env(&RealRuntime)?;
    cli.apply(&mut config);

    match cli.command {
        Commands::Ensure(args) => {
            let result = ensure(config, &args.keys).await?;
            if args.json {
                println!("{}", result.to_json()?);
            } else {
                print!("{}", result);
            }
            Ok(ExitCode::from(result.exit_code()))
        }
        Commands::Fetch(args) => {
            let orchestrator = system_orchestrator(config)?;
            let interrupt =
                pkgensure::cleanup::spawn_interrupt_handler(orchestrator.cleanup_context());
            let resolution = orchestrator.fetch(&args.keys).await;
            interrupt.abort();

            for key in &resolution.order {
                if let Some(entry) = resolution.entry(key) {
                    println!("   cached {} {}", key, entry.path.display());
                }
            }
            let mut failed = false;
            for outcome in &resolution.outcomes {
                if let Some(reason) = outcome.failure() {
                    println!("   failed {} ({}): {}", outcome.key, reason.kind(), reason);
                    failed |= args.keys.contains(&outcome.key);
                }
            }
            if !resolution.unresolved.is_empty() {
                println!("   left to the platform: {}", resolution.unresolved.join(", "));
            }
            Ok(if failed {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
        Commands::Verify => {
            let report = system_orchestrator(config)?.verify_cache()?;
            for path in &report.stale_partials {
                println!("   removed partial {}", path.display());
            }
            for (key, reason) in &report.removed {
                println!("   removed {}: {}", key, reason);
            }
            println!(
                "{} valid, {} removed",
                report.valid.len(),
                report.removed.len()
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Sources => {
            let orchestrator = system_orchestrator(config)?;
            for source in orchestrator.registry().iter() {
                println!(
                    "{} {} {} {}",
                    source.key, source.version, source.arch, source.url
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
