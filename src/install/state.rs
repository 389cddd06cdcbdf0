//! Fallback stages of one `ensure` run and the predicates between them.

/// Where an `ensure` run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CheckInstalled,
    TrySystemManager,
    ResolveAndAcquire,
    InstallFromCache,
    Done,
}

/// After the installed-state check.
///
/// Without connectivity the system package manager cannot fetch anything, so
/// the run goes straight to the cache.
pub fn after_check_installed(missing: usize, online: bool) -> Stage {
    if missing == 0 {
        Stage::Done
    } else if online {
        Stage::TrySystemManager
    } else {
        Stage::ResolveAndAcquire
    }
}

pub fn after_system_manager(still_missing: usize) -> Stage {
    if still_missing == 0 {
        Stage::Done
    } else {
        Stage::ResolveAndAcquire
    }
}

/// Whatever was acquired is installed, even when other packages failed.
pub fn after_resolve(acquired: usize) -> Stage {
    if acquired == 0 {
        Stage::Done
    } else {
        Stage::InstallFromCache
    }
}
