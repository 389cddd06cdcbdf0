use log::debug;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Tracks in-flight partial downloads that must not survive an interruption
#[derive(Default)]
pub struct CleanupContext {
    #[cfg(test)]
    pub paths: Vec<PathBuf>,
    #[cfg(not(test))]
    paths: Vec<PathBuf>,
}

impl CleanupContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a path to be cleaned up on interruption
    pub fn add(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    /// Remove a path from cleanup list (e.g., when the file was renamed into place)
    pub fn remove(&mut self, path: &Path) {
        self.paths.retain(|p| p != path);
    }

    /// Remove every registered file that still exists
    pub fn cleanup(&self) {
        for path in &self.paths {
            debug!("Cleaning up: {:?}", path);
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Type alias for shared cleanup context
pub type SharedCleanupContext = Arc<Mutex<CleanupContext>>;

/// Create a new shared cleanup context
pub fn new_shared() -> SharedCleanupContext {
    Arc::new(Mutex::new(CleanupContext::new()))
}

/// Exit status for a run stopped by Ctrl-C
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Spawn a Ctrl-C handler that removes every registered partial file and
/// exits with [`INTERRUPTED_EXIT_CODE`]. Abort the handle once the work is done.
pub fn spawn_interrupt_handler(ctx: SharedCleanupContext) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, cleaning up...");
            ctx.lock().unwrap().cleanup();
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    })
}

/// Registers a path for the lifetime of one download.
///
/// The path stays registered until [`CleanupGuard::disarm`] is called, so an
/// interruption at any point in between removes the partial file.
pub struct CleanupGuard {
    ctx: SharedCleanupContext,
    path: PathBuf,
}

impl CleanupGuard {
    /// Create a new cleanup guard and register the path
    pub fn new(ctx: SharedCleanupContext, path: PathBuf) -> Self {
        {
            let mut guard = ctx.lock().unwrap();
            guard.add(path.clone());
        }
        Self { ctx, path }
    }

    /// The partial file is gone or has been moved into place; stop tracking it
    pub fn disarm(self) {
        let mut guard = self.ctx.lock().unwrap();
        guard.remove(&self.path);
    }
}
