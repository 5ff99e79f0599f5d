use std::{
    collections::{BTreeMap, HashSet},
    fmt::{self, Display},
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AddressError, ConfigError};

pub mod stream;

pub use stream::{EventPayload, InstanceEvent, StreamLine, StreamSource};

/// Name of the persisted server list inside a registry root.
pub const SERVERS_FILE: &str = "servers.json";

/// Name of the download cache directory inside a registry root.
pub const CACHE_DIR: &str = ".cache";

/// Probe timeout used when none is configured.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Java,
    Bedrock,
}

impl ProtocolKind {
    pub fn default_port(self) -> u16 {
        match self {
            ProtocolKind::Java => 25565,
            ProtocolKind::Bedrock => 19132,
        }
    }

    /// Formats an address the way probe results report it: java keeps the
    /// configured form, bedrock always spells out the port.
    pub fn display_address(self, address: &Address) -> String {
        match (self, address.port) {
            (ProtocolKind::Java, Some(port)) => format!("{}:{}", address.host, port),
            (ProtocolKind::Java, None) => address.host.clone(),
            (ProtocolKind::Bedrock, port) => {
                format!("{}:{}", address.host, port.unwrap_or(self.default_port()))
            }
        }
    }
}

impl Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ProtocolKind::Java => write!(f, "java"),
            ProtocolKind::Bedrock => write!(f, "bedrock"),
        }
    }
}

/// A `host[:port]` network address. A port that does not parse is treated as absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub host: String,
    pub port: Option<u16>,
}

impl Address {
    pub fn port_or_default(&self, protocol: ProtocolKind) -> u16 {
        self.port.unwrap_or(protocol.default_port())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (host, port) = match trimmed.split_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().ok()),
            None => (trimmed, None),
        };

        if host.is_empty() {
            return Err(AddressError::MissingHost(s.to_string()));
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => write!(f, "{}", self.host),
        }
    }
}

/// Environment for a launched process: either an inline map or a path to an
/// env file that is read when the process starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Environment {
    Inline(BTreeMap<String, String>),
    FileRef(PathBuf),
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Inline(BTreeMap::new())
    }
}

/// One persisted server record, as stored in `servers.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub id: String,
    pub name: String,
    pub directory: PathBuf,
    pub command: String,
    pub persist: bool,
    pub env: Environment,
    #[serde(rename = "type")]
    pub protocol: ProtocolKind,
    pub address: String,
    /// Probe period in milliseconds.
    pub ping_interval: u64,
}

impl ServerConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval)
    }

    /// Working directory of the server, resolved against the registry root.
    pub fn working_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.directory)
    }

    pub fn parsed_address(&self) -> Result<Address, AddressError> {
        self.address.parse()
    }
}

/// Parses a persisted server list.
///
/// The whole list is rejected if any record fails: a record that does not match
/// the schema, has an empty id or an unusable address yields
/// [`ConfigError::Validation`] naming its position, and a repeated id yields
/// [`ConfigError::DuplicateId`].
pub fn parse_server_list(path: &Path, data: &[u8]) -> Result<Vec<ServerConfig>, ConfigError> {
    let records: Vec<Value> = serde_json::from_slice(data).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let mut seen = HashSet::with_capacity(records.len());
    let mut configs = Vec::with_capacity(records.len());

    for (index, record) in records.into_iter().enumerate() {
        let id = record.get("id").and_then(Value::as_str).map(str::to_string);
        let invalid = |message: String| ConfigError::Validation {
            index,
            id: id.clone(),
            message,
        };

        let config: ServerConfig =
            serde_json::from_value(record).map_err(|e| invalid(e.to_string()))?;
        if config.id.trim().is_empty() {
            return Err(invalid("id must not be empty".to_string()));
        }
        config.parsed_address().map_err(|e| invalid(e.to_string()))?;

        if !seen.insert(config.id.clone()) {
            return Err(ConfigError::DuplicateId(config.id));
        }
        configs.push(config);
    }

    Ok(configs)
}

/// Partial update of a [`ServerConfig`]. `id` may be supplied but must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfigPatch {
    pub id: Option<String>,
    pub name: Option<String>,
    pub directory: Option<PathBuf>,
    pub command: Option<String>,
    pub persist: Option<bool>,
    pub env: Option<Environment>,
    #[serde(rename = "type")]
    pub protocol: Option<ProtocolKind>,
    pub address: Option<String>,
    pub ping_interval: Option<u64>,
}

impl ServerConfigPatch {
    pub(crate) fn apply_to(self, config: &mut ServerConfig) {
        if let Some(name) = self.name {
            config.name = name;
        }
        if let Some(directory) = self.directory {
            config.directory = directory;
        }
        if let Some(command) = self.command {
            config.command = command;
        }
        if let Some(persist) = self.persist {
            config.persist = persist;
        }
        if let Some(env) = self.env {
            config.env = env;
        }
        if let Some(protocol) = self.protocol {
            config.protocol = protocol;
        }
        if let Some(address) = self.address {
            config.address = address;
        }
        if let Some(ping_interval) = self.ping_interval {
            config.ping_interval = ping_interval;
        }
    }
}

impl From<ServerConfig> for ServerConfigPatch {
    fn from(config: ServerConfig) -> Self {
        Self {
            id: Some(config.id),
            name: Some(config.name),
            directory: Some(config.directory),
            command: Some(config.command),
            persist: Some(config.persist),
            env: Some(config.env),
            protocol: Some(config.protocol),
            address: Some(config.address),
            ping_interval: Some(config.ping_interval),
        }
    }
}

/// Per-server runtime knobs that are not part of the persisted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub probe_timeout: Duration,
    /// How long `stop` waits for a graceful exit before escalating to a kill.
    /// `None` waits indefinitely.
    pub stop_timeout: Option<Duration>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            stop_timeout: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryOptions {
    pub root: PathBuf,
    pub cache_dir: PathBuf,
    pub settings: ServerSettings,
}

impl RegistryOptions {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        let root = root.into();
        Self {
            cache_dir: root.join(CACHE_DIR),
            root,
            settings: ServerSettings::default(),
        }
    }

    pub fn with_cache_dir<P: Into<PathBuf>>(mut self, cache_dir: P) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.settings.probe_timeout = timeout;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.settings.stop_timeout = Some(timeout);
        self
    }

    pub fn servers_file(&self) -> PathBuf {
        self.root.join(SERVERS_FILE)
    }
}
