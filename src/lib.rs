//! Supervision of Minecraft server processes.
//!
//! A [`ServerRegistry`] owns a set of [`ManagedServer`]s persisted in
//! `<root>/servers.json`. Each server pairs a [`ProcessSupervisor`] with a
//! [`LivenessMonitor`]; their shared runtime state folds into one
//! [`LifecycleStatus`]. The `downloads` feature adds a URL-keyed artifact cache
//! and a Paper build resolver.

pub mod config;
#[cfg(feature = "downloads")]
pub mod download;
pub mod error;
pub mod instance;
pub mod probe;
pub mod server;

pub use config::{
    Environment, ProtocolKind, RegistryOptions, ServerConfig, ServerConfigPatch, ServerSettings,
};
pub use error::{ConfigError, ProbeError, RegistryError, ServerError};
pub use instance::{LifecycleStatus, ProcessSupervisor, StopOutcome};
pub use probe::{LivenessMonitor, ProbeResult, ProbeSet, ProbeStatus, ProtocolProbe};
pub use server::{ManagedServer, ServerRegistry};

#[cfg(feature = "downloads")]
pub use download::{DownloadCache, FetchOptions, PaperDownloader};
#[cfg(feature = "downloads")]
pub use error::DownloadError;
