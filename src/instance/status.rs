use crate::probe::ProbeStatus;

use super::types::{LifecycleStatus, ProcessPhase};

/// Combines process liveness with the latest probe sample.
///
/// A live process the network cannot see yet is `Starting`; a dead process that
/// still answers probes is `Detached`. An absent sample counts as offline.
pub fn aggregate_status(
    is_process_running: bool,
    is_stopping: bool,
    latest_probe: Option<ProbeStatus>,
) -> LifecycleStatus {
    let online = latest_probe == Some(ProbeStatus::Online);

    match (is_process_running, is_stopping, online) {
        (true, false, true) => LifecycleStatus::Online,
        (true, false, false) => LifecycleStatus::Starting,
        (true, true, _) => LifecycleStatus::Stopping,
        (false, _, false) => LifecycleStatus::Offline,
        (false, _, true) => LifecycleStatus::Detached,
    }
}

pub fn derive_status(process: ProcessPhase, latest_probe: Option<ProbeStatus>) -> LifecycleStatus {
    aggregate_status(process.is_running(), process.is_stopping(), latest_probe)
}
