use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

use crate::config::{EventPayload, InstanceEvent, StreamLine, StreamSource};

use super::types::{LifecycleStatus, RuntimeState};

const CHANNEL_CAPACITY: usize = 2048;

/// Per-server fan-out of output lines and lifecycle events.
#[derive(Debug, Clone)]
pub struct EventHub {
    stdout_tx: broadcast::Sender<InstanceEvent>,
    stderr_tx: broadcast::Sender<InstanceEvent>,
    events_tx: broadcast::Sender<InstanceEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            stdout_tx: broadcast::Sender::new(CHANNEL_CAPACITY),
            stderr_tx: broadcast::Sender::new(CHANNEL_CAPACITY),
            events_tx: broadcast::Sender::new(CHANNEL_CAPACITY),
        }
    }

    pub fn emit(&self, payload: EventPayload) {
        _ = self.events_tx.send(InstanceEvent::new(payload));
    }

    pub fn line(&self, line: StreamLine) {
        let tx = match line.source {
            StreamSource::Stderr => &self.stderr_tx,
            _ => &self.stdout_tx,
        };
        _ = tx.send(InstanceEvent::line(line));
    }

    pub fn subscribe(&self, stream: StreamSource) -> BroadcastStream<InstanceEvent> {
        let rx = match stream {
            StreamSource::Stdout => self.stdout_tx.subscribe(),
            StreamSource::Stderr => self.stderr_tx.subscribe(),
            StreamSource::Event => self.events_tx.subscribe(),
        };
        BroadcastStream::new(rx)
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Runtime state of one server, shared by its supervisor and monitor.
///
/// Every mutation goes through [`SharedState::update`], which recomputes the
/// aggregated status under the same lock and publishes a `StateChange` when it moves.
#[derive(Debug, Clone)]
pub struct SharedState {
    state: Arc<Mutex<RuntimeState>>,
    status_tx: Arc<watch::Sender<LifecycleStatus>>,
    hub: EventHub,
}

impl SharedState {
    pub fn new() -> Self {
        let state = RuntimeState::default();
        let (status_tx, _) = watch::channel(state.status());
        Self {
            state: Arc::new(Mutex::new(state)),
            status_tx: Arc::new(status_tx),
            hub: EventHub::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> RuntimeState {
        self.lock().clone()
    }

    pub fn status(&self) -> LifecycleStatus {
        self.lock().status()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut RuntimeState) -> R) -> R {
        let mut state = self.lock();
        let old = state.status();
        let out = f(&mut state);
        let new = state.status();

        if old != new {
            debug!(%old, %new, "status changed");
            self.status_tx.send_replace(new);
            self.hub.emit(EventPayload::StateChange { old, new });
        }
        out
    }

    pub fn watch_status(&self) -> watch::Receiver<LifecycleStatus> {
        self.status_tx.subscribe()
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
