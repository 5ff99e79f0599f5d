mod event;
mod line;

pub use event::{EventPayload, InstanceEvent, RegistryEvent};
pub use line::{StreamLine, StreamSource};
