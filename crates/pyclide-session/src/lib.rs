//! pyclide-session: per-workspace worker lifecycle for the pyclide client.

pub mod config;
mod detach;
pub mod dispatch;
pub mod health;
pub mod launcher;
pub mod port;
pub mod protocol;
pub mod registry;
pub mod resolver;
mod version;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{ConfigError, SessionConfig};
pub use dispatch::{AttemptError, DispatchError, Dispatcher};
pub use health::{HealthProber, WorkerHealth};
pub use launcher::{LaunchError, Launcher, RunnerSpawner, SpawnError, WorkerSpawnConfig, WorkerSpawner};
pub use protocol::{Operation, OutputFormat, WorkerRequest};
pub use registry::{Registry, RegistryError, RegistryStore, WorkerRecord, canonical_workspace};
pub use resolver::{SessionResolver, SessionStatus};
pub use version::{PYCLIDE_VERSION, user_agent};
