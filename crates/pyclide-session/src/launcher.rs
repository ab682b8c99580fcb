//! Launcher - starts a detached worker for a workspace and waits for it.
//!
//! Flow:
//! 1. Confirm the runner tool can be invoked
//! 2. Allocate a loopback port
//! 3. Spawn the worker detached from this process
//! 4. Poll its health endpoint until it answers or attempts run out
//! 5. Register the worker only once it has answered

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::SessionConfig;
use crate::detach::DetachExt;
use crate::health::HealthProber;
use crate::port;
use crate::registry::{RegistryError, RegistryStore, WorkerRecord, canonical_workspace};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpawnConfig {
    pub workspace_root: PathBuf,
    pub port: u16,
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to spawn process: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

/// Extension point for how worker processes are started.
pub trait WorkerSpawner: Send + Sync {
    /// Confirm the tool that runs workers can be invoked at all.
    fn check_available(&self) -> Result<(), SpawnError>;

    /// Start a worker for `config` without waiting for it.
    fn spawn(&self, config: &WorkerSpawnConfig) -> Result<(), SpawnError>;
}

/// Starts workers through an external package runner (`uvx` by default):
/// `<runner> --from <source> <entrypoint> --root <root> --port <port> --daemon`.
#[derive(Debug, Clone)]
pub struct RunnerSpawner {
    runner: String,
    worker_source: String,
    worker_entrypoint: String,
    probe_timeout: Duration,
}

impl RunnerSpawner {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            runner: config.runner.clone(),
            worker_source: config.worker_source.clone(),
            worker_entrypoint: config.worker_entrypoint.clone(),
            probe_timeout: config.tool_probe_timeout,
        }
    }

    fn command(&self, config: &WorkerSpawnConfig) -> Command {
        let mut command = Command::new(&self.runner);
        command
            .arg("--from")
            .arg(&self.worker_source)
            .arg(&self.worker_entrypoint)
            .arg("--root")
            .arg(&config.workspace_root)
            .arg("--port")
            .arg(config.port.to_string())
            .arg("--daemon");
        command
    }
}

impl WorkerSpawner for RunnerSpawner {
    fn check_available(&self) -> Result<(), SpawnError> {
        let mut child = Command::new(&self.runner)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                SpawnError::Other(format!(
                    "cannot run `{} --version`: {e}. Install uv: https://docs.astral.sh/uv/",
                    self.runner
                ))
            })?;

        let deadline = Instant::now() + self.probe_timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                if status.success() {
                    return Ok(());
                }
                return Err(SpawnError::Other(format!(
                    "`{} --version` exited with {status}",
                    self.runner
                )));
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SpawnError::Other(format!(
                    "`{} --version` did not finish within {:?}",
                    self.runner, self.probe_timeout
                )));
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    fn spawn(&self, config: &WorkerSpawnConfig) -> Result<(), SpawnError> {
        let child = self
            .command(config)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .detached()
            .spawn()?;
        tracing::debug!(
            pid = child.id(),
            runner = %self.runner,
            port = config.port,
            "Spawned worker process"
        );
        // Dropping the handle neither waits for nor kills the worker.
        drop(child);
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("worker runner unavailable: {0}")]
    ToolUnavailable(#[source] SpawnError),
    #[error("worker on port {port} did not become healthy after {attempts} attempts")]
    StartupTimeout { port: u16, attempts: u32 },
    #[error("failed to allocate a loopback port: {0}")]
    PortAllocation(#[source] std::io::Error),
    #[error("failed to start worker: {0}")]
    Spawn(#[from] SpawnError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Clone)]
pub struct Launcher {
    spawner: Arc<dyn WorkerSpawner>,
    prober: HealthProber,
    registry: RegistryStore,
    poll_interval: Duration,
    attempts: u32,
}

impl Launcher {
    pub fn new(
        config: &SessionConfig,
        spawner: Arc<dyn WorkerSpawner>,
        prober: HealthProber,
        registry: RegistryStore,
    ) -> Self {
        Self {
            spawner,
            prober,
            registry,
            poll_interval: config.startup_poll_interval,
            attempts: config.startup_attempts.max(1),
        }
    }

    /// Start a worker for `workspace`, wait until it is healthy and register it.
    pub fn launch(&self, workspace: &Path) -> Result<WorkerRecord, LaunchError> {
        self.spawner
            .check_available()
            .map_err(LaunchError::ToolUnavailable)?;

        let workspace_root = canonical_workspace(workspace)?;
        let port = port::allocate().map_err(LaunchError::PortAllocation)?;

        tracing::info!(
            workspace = %workspace_root.display(),
            port,
            "Starting worker"
        );
        self.spawner.spawn(&WorkerSpawnConfig {
            workspace_root: workspace_root.clone(),
            port,
        })?;

        let candidate = WorkerRecord::new(workspace_root.clone(), port);
        for attempt in 1..=self.attempts {
            if self.prober.is_healthy(&candidate) {
                let record = self.registry.add(&workspace_root, port)?;
                tracing::info!(port, attempt, "Worker ready");
                return Ok(record);
            }
            tracing::debug!(port, attempt, "Worker not ready yet");
            if attempt < self.attempts {
                std::thread::sleep(self.poll_interval);
            }
        }

        tracing::error!(port, attempts = self.attempts, "Worker failed to start");
        Err(LaunchError::StartupTimeout {
            port,
            attempts: self.attempts,
        })
    }
}
