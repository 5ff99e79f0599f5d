mod command;
mod handle;
mod state;
mod status;
mod types;

pub use command::{LaunchConfig, parse_command_line, resolve_environment};
pub use handle::ProcessSupervisor;
pub use state::{EventHub, SharedState};
pub use status::{aggregate_status, derive_status};
pub use types::{ExitOutcome, LifecycleStatus, ProcessPhase, RuntimeState, StopOutcome};
