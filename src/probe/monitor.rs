use std::{
    sync::{Arc, Mutex, PoisonError, RwLock},
    time::{Duration, Instant},
};

use tokio::time::{MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    config::{Address, EventPayload, ProtocolKind},
    instance::SharedState,
};

use super::{ProbeRequest, ProbeResult, ProbeSet};

/// Where and how to probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub protocol: ProtocolKind,
    pub address: Address,
}

struct MonitorInner {
    probes: ProbeSet,
    target: RwLock<ProbeTarget>,
    timeout: Duration,
    shared: SharedState,
}

impl MonitorInner {
    fn target(&self) -> ProbeTarget {
        self.target
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn probe_once(&self) -> ProbeResult {
        let ProbeTarget { protocol, address } = self.target();
        let request = ProbeRequest {
            host: address.host.clone(),
            port: address.port_or_default(protocol),
            timeout: self.timeout,
        };
        let probe = self.probes.get(protocol);

        let started = Instant::now();
        let result = match timeout(self.timeout, probe.probe(&request)).await {
            Ok(Ok(response)) => {
                ProbeResult::from_response(protocol, &address, response, started.elapsed())
            }
            Ok(Err(e)) => {
                debug!(%protocol, %address, error = %e, "probe failed");
                ProbeResult::offline(protocol, &address, started.elapsed())
            }
            Err(_) => {
                debug!(%protocol, %address, timeout = ?self.timeout, "probe timed out");
                ProbeResult::offline(protocol, &address, started.elapsed())
            }
        };

        self.record(result.clone());
        result
    }

    fn record(&self, result: ProbeResult) {
        let hub = self.shared.hub();
        let new = result.status;

        self.shared.update(|state| {
            hub.emit(EventPayload::ProbeUpdate {
                result: result.clone(),
            });

            let old = state.probe.replace(result).map(|p| p.status);
            if old != Some(new) {
                info!(?old, ?new, "reachability changed");
                hub.emit(EventPayload::ReachabilityChange { old, new });
            }
        });
    }
}

/// Periodically probes one server's address, independent of its process.
///
/// Probe failures are recorded as `offline` samples and never surface as errors.
pub struct LivenessMonitor {
    inner: Arc<MonitorInner>,
    schedule: Mutex<Option<CancellationToken>>,
}

impl LivenessMonitor {
    pub fn new(probes: ProbeSet, target: ProbeTarget, timeout: Duration, shared: SharedState) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                probes,
                target: RwLock::new(target),
                timeout,
                shared,
            }),
            schedule: Mutex::new(None),
        }
    }

    pub fn target(&self) -> ProbeTarget {
        self.inner.target()
    }

    /// Takes effect from the next probe cycle.
    pub fn set_target(&self, target: ProbeTarget) {
        *self
            .inner
            .target
            .write()
            .unwrap_or_else(PoisonError::into_inner) = target;
    }

    pub fn latest(&self) -> Option<ProbeResult> {
        self.inner.shared.snapshot().probe
    }

    pub fn is_probing(&self) -> bool {
        self.schedule
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    /// Runs a single probe now and records it.
    pub async fn probe(&self) -> ProbeResult {
        self.inner.probe_once().await
    }

    /// Replaces any running schedule: probes immediately, then every `period`.
    /// A zero period probes once without scheduling more.
    pub fn start_probing(&self, period: Duration) {
        let inner = self.inner.clone();
        if period.is_zero() {
            self.stop_probing();
            tokio::spawn(async move {
                inner.probe_once().await;
            });
            return;
        }

        let token = CancellationToken::new();
        let previous = self
            .schedule
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                // An in-flight probe finishes even if cancelled meanwhile.
                inner.probe_once().await;

                if token.is_cancelled() {
                    break;
                }
            }
            debug!("probe schedule ended");
        });
    }

    /// Cancels the schedule. Idempotent.
    pub fn stop_probing(&self) {
        let current = self
            .schedule
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(token) = current {
            token.cancel();
        }
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        self.stop_probing();
    }
}

impl std::fmt::Debug for LivenessMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivenessMonitor")
            .field("target", &self.target())
            .field("timeout", &self.inner.timeout)
            .field("probing", &self.is_probing())
            .finish()
    }
}
