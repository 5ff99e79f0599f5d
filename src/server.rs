mod domain;
mod registry;

pub use domain::ManagedServer;
pub use registry::ServerRegistry;
