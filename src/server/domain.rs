use std::path::{Path, PathBuf};

use tokio::sync::{RwLock, watch};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info};

use crate::{
    config::{ServerConfig, ServerConfigPatch, ServerSettings, StreamSource, stream::InstanceEvent},
    error::ServerError,
    instance::{LaunchConfig, LifecycleStatus, ProcessSupervisor, RuntimeState, SharedState, StopOutcome},
    probe::{LivenessMonitor, ProbeResult, ProbeSet, ProbeTarget},
};

/// One managed server: its declarative config plus the process supervisor and
/// liveness monitor wired to a shared runtime state.
#[derive(Debug)]
pub struct ManagedServer {
    id: String,
    root: PathBuf,
    config: RwLock<ServerConfig>,
    shared: SharedState,
    supervisor: ProcessSupervisor,
    monitor: LivenessMonitor,
}

impl ManagedServer {
    /// Wires up a server without starting anything. Relative directories are
    /// resolved against `root`.
    pub fn new(
        config: ServerConfig,
        root: impl Into<PathBuf>,
        probes: ProbeSet,
        settings: &ServerSettings,
    ) -> Result<Self, ServerError> {
        let target = ProbeTarget {
            protocol: config.protocol,
            address: config.parsed_address()?,
        };

        let shared = SharedState::new();
        let supervisor = ProcessSupervisor::new(shared.clone(), settings.stop_timeout);
        let monitor = LivenessMonitor::new(probes, target, settings.probe_timeout, shared.clone());

        Ok(Self {
            id: config.id.clone(),
            root: root.into(),
            config: RwLock::new(config),
            shared,
            supervisor,
            monitor,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn config(&self) -> ServerConfig {
        self.config.read().await.clone()
    }

    pub fn status(&self) -> LifecycleStatus {
        self.shared.status()
    }

    pub fn runtime_state(&self) -> RuntimeState {
        self.shared.snapshot()
    }

    pub fn watch_status(&self) -> watch::Receiver<LifecycleStatus> {
        self.shared.watch_status()
    }

    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    pub async fn pid(&self) -> Option<u32> {
        self.supervisor.pid().await
    }

    pub fn latest_probe(&self) -> Option<ProbeResult> {
        self.monitor.latest()
    }

    pub fn subscribe(&self, stream: StreamSource) -> BroadcastStream<InstanceEvent> {
        self.shared.hub().subscribe(stream)
    }

    /// Launches the process and restarts probing so the first sample is taken
    /// right away.
    pub async fn start(&self) -> Result<Option<u32>, ServerError> {
        let (launch, interval) = {
            let config = self.config.read().await;
            (LaunchConfig::from_server(&config, &self.root), config.ping_interval())
        };

        let pid = self.supervisor.start(&launch).await?;
        self.monitor.start_probing(interval);
        info!(id = %self.id, ?pid, "server started");
        Ok(pid)
    }

    pub async fn stop(&self) -> Result<StopOutcome, ServerError> {
        self.supervisor.stop().await
    }

    pub async fn kill(&self) -> Result<StopOutcome, ServerError> {
        self.supervisor.kill().await
    }

    pub async fn send_command<S: Into<String>>(&self, cmd: S) -> Result<(), ServerError> {
        self.supervisor.send_command(cmd).await
    }

    pub async fn start_probing(&self) {
        let interval = self.config.read().await.ping_interval();
        self.monitor.start_probing(interval);
    }

    pub fn stop_probing(&self) {
        self.monitor.stop_probing();
    }

    pub fn is_probing(&self) -> bool {
        self.monitor.is_probing()
    }

    /// Probes once, outside the schedule.
    pub async fn probe(&self) -> ProbeResult {
        self.monitor.probe().await
    }

    /// Applies a partial update of the declarative fields. The running process
    /// is left alone; probe target and period changes apply to the schedule.
    pub async fn edit(&self, patch: ServerConfigPatch) -> Result<(), ServerError> {
        if let Some(requested) = patch.id.as_ref().filter(|id| **id != self.id) {
            return Err(ServerError::IdImmutable {
                current: self.id.clone(),
                requested: requested.clone(),
            });
        }

        let mut config = self.config.write().await;
        let mut next = config.clone();
        patch.apply_to(&mut next);
        let address = next.parsed_address()?;

        let retarget = next.protocol != config.protocol || next.address != config.address;
        let reschedule = retarget || next.ping_interval != config.ping_interval;
        let protocol = next.protocol;
        let interval = next.ping_interval();
        *config = next;
        drop(config);

        if retarget {
            debug!(id = %self.id, %protocol, %address, "probe target changed");
            self.monitor.set_target(ProbeTarget { protocol, address });
        }
        if reschedule && self.monitor.is_probing() {
            self.monitor.start_probing(interval);
        }
        Ok(())
    }
}
