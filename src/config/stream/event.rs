use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    instance::{ExitOutcome, LifecycleStatus},
    probe::{ProbeResult, ProbeStatus},
};

use super::line::StreamLine;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EventPayload {
    ProcessStart {
        pid: Option<u32>,
    },

    ProcessStop {
        exit: ExitOutcome,
    },

    StdLine {
        line: StreamLine,
    },

    /// Raised after every probe cycle.
    ProbeUpdate {
        result: ProbeResult,
    },

    /// Raised only when the probed online/offline status flips.
    ReachabilityChange {
        old: Option<ProbeStatus>,
        new: ProbeStatus,
    },

    /// Raised when the aggregated lifecycle status changes.
    StateChange {
        old: LifecycleStatus,
        new: LifecycleStatus,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceEvent {
    pub id: Uuid,

    pub timestamp: DateTime<Utc>,

    pub payload: EventPayload,
}

impl InstanceEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn line(line: StreamLine) -> Self {
        let timestamp = line.extract_timestamp().unwrap_or_else(Utc::now);
        Self {
            id: Uuid::new_v4(),
            timestamp,
            payload: EventPayload::StdLine { line },
        }
    }

    pub fn stdout<S: Into<String>>(line: S) -> Self {
        Self::line(StreamLine::stdout(line))
    }

    pub fn stderr<S: Into<String>>(line: S) -> Self {
        Self::line(StreamLine::stderr(line))
    }
}

impl Display for InstanceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UUID: {}\nTimestamp: {}\nPayload:\n", self.id, self.timestamp)?;
        match &self.payload {
            EventPayload::ProcessStart { pid } => match pid {
                Some(pid) => writeln!(f, "Process started (pid {pid})"),
                None => writeln!(f, "Process started"),
            },
            EventPayload::ProcessStop { exit } => writeln!(f, "Process stopped: {exit}"),
            EventPayload::StdLine { line } => writeln!(f, "{line}"),
            EventPayload::ProbeUpdate { result } => {
                writeln!(f, "Probe {}: {:?}", result.address, result.status)
            }
            EventPayload::ReachabilityChange { old, new } => {
                writeln!(f, "Reachability changed: {:?} -> {:?}", old, new)
            }
            EventPayload::StateChange { old, new } => {
                writeln!(f, "State changed: {:?} -> {:?}", old, new)
            }
        }
    }
}

/// Lifecycle notifications raised by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RegistryEvent {
    Created { id: String },
    Deleted { id: String },
}
