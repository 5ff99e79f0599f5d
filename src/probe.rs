//! Network reachability probing.
//!
//! The wire protocols themselves live behind [`ProtocolProbe`]; this module only
//! turns their answers (or failures) into [`ProbeResult`] samples.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    config::{Address, ProtocolKind},
    error::ProbeError,
};

mod monitor;

pub use monitor::{LivenessMonitor, ProbeTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSample {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerCounts {
    pub online: i64,
    pub max: i64,
    #[serde(default)]
    pub sample: Vec<PlayerSample>,
}

/// A successful status handshake as reported by a protocol implementation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeResponse {
    pub players: Option<PlayerCounts>,
    pub motd: Option<String>,
    pub version: Option<String>,
    pub protocol_version: Option<i32>,
    /// Latency measured by the protocol itself, if it reports one.
    pub latency: Option<Duration>,
}

impl ProbeResponse {
    /// Online iff the server reported a player capacity that is not negative.
    pub fn status(&self) -> ProbeStatus {
        match &self.players {
            Some(players) if players.max >= 0 => ProbeStatus::Online,
            _ => ProbeStatus::Offline,
        }
    }
}

/// One status handshake for one game protocol.
#[async_trait]
pub trait ProtocolProbe: Send + Sync {
    async fn probe(&self, request: &ProbeRequest) -> Result<ProbeResponse, ProbeError>;
}

/// The probe implementation to use for each protocol kind.
#[derive(Clone)]
pub struct ProbeSet {
    java: Arc<dyn ProtocolProbe>,
    bedrock: Arc<dyn ProtocolProbe>,
}

impl ProbeSet {
    pub fn new(java: Arc<dyn ProtocolProbe>, bedrock: Arc<dyn ProtocolProbe>) -> Self {
        Self { java, bedrock }
    }

    pub fn get(&self, protocol: ProtocolKind) -> Arc<dyn ProtocolProbe> {
        match protocol {
            ProtocolKind::Java => self.java.clone(),
            ProtocolKind::Bedrock => self.bedrock.clone(),
        }
    }
}

impl std::fmt::Debug for ProbeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeSet").finish_non_exhaustive()
    }
}

/// Last-known reachability sample of one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub status: ProbeStatus,
    #[serde(rename = "type")]
    pub protocol: ProtocolKind,
    pub address: String,
    pub players: Option<PlayerCounts>,
    pub motd: Option<String>,
    pub version: Option<String>,
    pub protocol_version: Option<i32>,
    pub latency_ms: u64,
    pub captured_at: DateTime<Utc>,
}

impl ProbeResult {
    pub fn offline(protocol: ProtocolKind, address: &Address, elapsed: Duration) -> Self {
        Self {
            status: ProbeStatus::Offline,
            protocol,
            address: protocol.display_address(address),
            players: None,
            motd: None,
            version: None,
            protocol_version: None,
            latency_ms: duration_ms(elapsed),
            captured_at: Utc::now(),
        }
    }

    pub fn from_response(
        protocol: ProtocolKind,
        address: &Address,
        response: ProbeResponse,
        elapsed: Duration,
    ) -> Self {
        Self {
            status: response.status(),
            protocol,
            address: protocol.display_address(address),
            latency_ms: duration_ms(response.latency.unwrap_or(elapsed)),
            players: response.players,
            motd: response.motd,
            version: response.version,
            protocol_version: response.protocol_version,
            captured_at: Utc::now(),
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == ProbeStatus::Online
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
