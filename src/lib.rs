//! Package acquisition and dependency resolution for an installer.
//!
//! Requested package keys are looked up in a [`registry::SourceRegistry`],
//! downloaded into a verified local cache by a bounded worker pool, expanded
//! into their transitive dependencies and finally installed through the host
//! [`platform::Platform`].

pub mod acquire;
pub mod cache;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod http;
pub mod install;
pub mod platform;
pub mod registry;
pub mod resolve;
pub mod runtime;
pub mod schedule;
pub mod verify;

pub use config::EngineConfig;
pub use error::{FailureKind, FailureReason};
pub use install::{EnsureStatus, InstallationResult, Orchestrator, ensure, system_orchestrator};
