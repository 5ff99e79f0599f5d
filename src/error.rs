use std::path::PathBuf;

use thiserror::Error;

use crate::instance::ExitOutcome;

#[derive(Debug, Clone, Error)]
pub enum AddressError {
    #[error("Address has no host: {0}")]
    MissingHost(String),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Server is already running")]
    AlreadyRunning,

    #[error("Server is not running")]
    NotRunning,

    #[error("Process exited before start was confirmed: {0}")]
    ProcessExitedUnexpectedly(ExitOutcome),

    #[error("Launch command is empty")]
    EmptyCommand,

    #[error("Invalid launch command: {0}")]
    InvalidCommand(String),

    #[error("Failed to parse env file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to access child stdout pipe")]
    NoStdoutPipe,

    #[error("Failed to access child stdin pipe")]
    NoStdinPipe,

    #[error("Failed to access child stderr pipe")]
    NoStderrPipe,

    #[error("Failed to write to stdin")]
    StdinWriteFailed,

    #[error("Process exit could not be observed")]
    ExitUnobserved,

    #[error("Cannot change server id from {current} to {requested}")]
    IdImmutable { current: String, requested: String },

    #[error(transparent)]
    InvalidAddress(#[from] AddressError),
}

/// Returned by [`ProtocolProbe`](crate::probe::ProtocolProbe) implementations.
/// The liveness monitor folds every variant into an `offline` sample.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Probe timed out")]
    Timeout,

    #[error("Probe I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid server record #{index}{}: {message}", id.as_ref().map(|id| format!(" ({id})")).unwrap_or_default())]
    Validation {
        index: usize,
        id: Option<String>,
        message: String,
    },

    #[error("Duplicate server id in config: {0}")]
    DuplicateId(String),

    #[error("Failed to serialize server list: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(feature = "downloads")]
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Destination already exists: {0}")]
    DestinationExists(PathBuf),

    #[error("Download of {url} failed with status {status}")]
    DownloadFailed {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("Unsupported checksum algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("API request to {url} failed with status {status}")]
    Api {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("No builds found")]
    NoBuildsFound,

    #[error("Build {build} has no {artifact} artifact")]
    MissingArtifact { build: u64, artifact: String },
}

#[cfg(feature = "downloads")]
impl DownloadError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Server not found: {0}")]
    NotFound(String),

    #[error("Server already exists: {0}")]
    DuplicateId(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[cfg(feature = "downloads")]
    #[error(transparent)]
    Download(#[from] DownloadError),
}
