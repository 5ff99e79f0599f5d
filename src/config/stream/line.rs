use std::{
    fmt::{self, Display},
    sync::LazyLock,
};

use chrono::{DateTime, Local, NaiveTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Leading `[HH:MM:SS]` stamp written by both Java and Bedrock server logs.
static LOG_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[(\d{2}:\d{2}:\d{2})").expect("valid log time regex"));

/// Identifies which stream a subscriber wants, or which process stream produced a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamSource {
    Stdout,
    Stderr,
    Event,
}

/// Captures a single line of process output along with its origin stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamLine {
    pub line: String,
    pub source: StreamSource,
}

impl StreamLine {
    pub fn new<S: Into<String>>(line: S, source: StreamSource) -> Self {
        Self {
            line: line.into(),
            source,
        }
    }

    pub fn stdout<S: Into<String>>(line: S) -> Self {
        Self::new(line, StreamSource::Stdout)
    }

    pub fn stderr<S: Into<String>>(line: S) -> Self {
        Self::new(line, StreamSource::Stderr)
    }

    pub fn msg(&self) -> &str {
        &self.line
    }

    /// Reads the wall-clock stamp at the start of a server log line, assuming today's date.
    pub fn extract_timestamp(&self) -> Option<DateTime<Utc>> {
        let caps = LOG_TIME.captures(&self.line)?;
        let time = NaiveTime::parse_from_str(&caps[1], "%H:%M:%S").ok()?;

        let today = Local::now().date_naive();
        let local_dt = Local.from_local_datetime(&today.and_time(time)).single()?;

        Some(local_dt.with_timezone(&Utc))
    }
}

impl Display for StreamLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.line)
    }
}
