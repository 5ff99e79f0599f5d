use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::probe::ProbeResult;

use super::status::derive_status;

/// Aggregated lifecycle status of one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    Online,
    Offline,
    Starting,
    Stopping,
    Detached,
}

impl Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleStatus::Online => "online",
            LifecycleStatus::Offline => "offline",
            LifecycleStatus::Starting => "starting",
            LifecycleStatus::Stopping => "stopping",
            LifecycleStatus::Detached => "detached",
        };
        write!(f, "{s}")
    }
}

/// What the supervisor knows about the OS process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessPhase {
    #[default]
    Stopped,
    Running,
    /// Running, with a termination already requested.
    Stopping,
}

impl ProcessPhase {
    pub fn is_running(self) -> bool {
        !matches!(self, ProcessPhase::Stopped)
    }

    pub fn is_stopping(self) -> bool {
        matches!(self, ProcessPhase::Stopping)
    }
}

/// How a supervised process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum ExitOutcome {
    Success,
    /// Non-zero exit. `code` is `None` when the process was ended by a signal.
    Failure { code: Option<i32> },
    /// Waiting on the process failed; no exit status is available.
    Error { message: String },
}

impl ExitOutcome {
    pub fn code(&self) -> Option<i32> {
        match self {
            ExitOutcome::Success => Some(0),
            ExitOutcome::Failure { code } => *code,
            ExitOutcome::Error { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitOutcome::Success)
    }
}

impl From<std::io::Result<std::process::ExitStatus>> for ExitOutcome {
    fn from(result: std::io::Result<std::process::ExitStatus>) -> Self {
        match result {
            Ok(status) if status.success() => ExitOutcome::Success,
            Ok(status) => ExitOutcome::Failure {
                code: status.code(),
            },
            Err(e) => ExitOutcome::Error {
                message: e.to_string(),
            },
        }
    }
}

impl Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Success => write!(f, "exited successfully"),
            ExitOutcome::Failure { code: Some(code) } => write!(f, "exited with code {code}"),
            ExitOutcome::Failure { code: None } => write!(f, "terminated by signal"),
            ExitOutcome::Error { message } => write!(f, "wait failed: {message}"),
        }
    }
}

/// Result of a `stop` or `kill` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Exited(ExitOutcome),
}

impl StopOutcome {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            StopOutcome::NotRunning => None,
            StopOutcome::Exited(exit) => exit.code(),
        }
    }
}

/// Everything the status of a server is derived from, updated as one unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeState {
    pub process: ProcessPhase,
    pub probe: Option<ProbeResult>,
}

impl RuntimeState {
    pub fn status(&self) -> LifecycleStatus {
        derive_status(self.process, self.probe.as_ref().map(|p| p.status))
    }
}
