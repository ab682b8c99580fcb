//! Session resolution: turn a workspace into a live worker record.

use std::path::Path;
use std::sync::Arc;

use crate::config::SessionConfig;
use crate::health::HealthProber;
use crate::launcher::{LaunchError, Launcher, WorkerSpawner};
use crate::registry::{RegistryError, RegistryStore, WorkerRecord};

/// A registry record with the result of a fresh health probe.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub record: WorkerRecord,
    pub healthy: bool,
}

#[derive(Clone)]
pub struct SessionResolver {
    registry: RegistryStore,
    prober: HealthProber,
    launcher: Launcher,
}

impl SessionResolver {
    pub fn new(config: &SessionConfig, spawner: Arc<dyn WorkerSpawner>) -> Self {
        let registry = RegistryStore::new(&config.registry_path);
        let prober = HealthProber::new(config.health_timeout);
        let launcher = Launcher::new(config, spawner, prober.clone(), registry.clone());
        Self {
            registry,
            prober,
            launcher,
        }
    }

    pub fn registry(&self) -> &RegistryStore {
        &self.registry
    }

    pub fn prober(&self) -> &HealthProber {
        &self.prober
    }

    /// Return a live worker for `workspace`, reusing a healthy one, replacing
    /// a stale one, or launching the first one.
    pub fn resolve(&self, workspace: &Path) -> Result<WorkerRecord, LaunchError> {
        match self.registry.find(workspace)? {
            Some(record) if self.prober.is_healthy(&record) => {
                tracing::debug!(port = record.port, "Reusing live worker");
                Ok(record)
            }
            Some(stale) => {
                tracing::warn!(
                    workspace = %stale.workspace_root.display(),
                    port = stale.port,
                    "Registered worker is not responding; replacing it"
                );
                self.registry.remove(workspace)?;
                self.launcher.launch(workspace)
            }
            None => self.launcher.launch(workspace),
        }
    }

    /// Every registered worker with a fresh probe result.
    pub fn sessions(&self) -> Result<Vec<SessionStatus>, RegistryError> {
        Ok(self
            .registry
            .load()?
            .servers
            .into_iter()
            .map(|record| SessionStatus {
                healthy: self.prober.is_healthy(&record),
                record,
            })
            .collect())
    }

    /// Drop every record whose worker does not answer; returns the dropped ones.
    pub fn prune(&self) -> Result<Vec<WorkerRecord>, RegistryError> {
        let mut registry = self.registry.load()?;
        let (live, dead): (Vec<_>, Vec<_>) = registry
            .servers
            .into_iter()
            .partition(|record| self.prober.is_healthy(record));

        if !dead.is_empty() {
            registry.servers = live;
            self.registry.save(&registry)?;
            tracing::info!(removed = dead.len(), "Pruned unresponsive workers");
        }
        Ok(dead)
    }
}

#[cfg(test)]
mod tests {
    use wiremock::MockServer;

    use super::*;
    use crate::registry::canonical_workspace;
    use crate::test_support::{FakeSpawner, dead_port, healthy_worker, server_port, test_config};

    #[tokio::test(flavor = "multi_thread")]
    async fn live_record_is_returned_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let worker = healthy_worker().await;
        let spawner = Arc::new(FakeSpawner::healthy());
        let resolver = SessionResolver::new(&config, spawner.clone());

        let existing = resolver
            .registry()
            .add(dir.path(), server_port(&worker))
            .unwrap();
        let document = std::fs::read_to_string(&config.registry_path).unwrap();

        let ws = dir.path().to_path_buf();
        let resolved = tokio::task::spawn_blocking(move || resolver.resolve(&ws))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(resolved, existing);
        assert!(spawner.spawned().is_empty());
        assert_eq!(
            std::fs::read_to_string(&config.registry_path).unwrap(),
            document
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stale_record_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let spawner = Arc::new(FakeSpawner::healthy());
        let resolver = SessionResolver::new(&config, spawner.clone());
        let stale_port = dead_port();
        resolver.registry().add(dir.path(), stale_port).unwrap();

        let ws = dir.path().to_path_buf();
        let check = resolver.clone();
        let resolved = tokio::task::spawn_blocking(move || resolver.resolve(&ws))
            .await
            .unwrap()
            .unwrap();

        assert_ne!(resolved.port, stale_port);
        assert_eq!(spawner.spawned().len(), 1);
        let servers = check.registry().load().unwrap().servers;
        assert_eq!(servers, vec![resolved]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn absent_record_launches_worker() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let spawner = Arc::new(FakeSpawner::healthy());
        let resolver = SessionResolver::new(&config, spawner.clone());

        let ws = dir.path().to_path_buf();
        let resolved = tokio::task::spawn_blocking(move || resolver.resolve(&ws))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            resolved.workspace_root,
            canonical_workspace(dir.path()).unwrap()
        );
        assert_eq!(spawner.spawned().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stale_record_is_removed_even_when_relaunch_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let resolver = SessionResolver::new(&config, Arc::new(FakeSpawner::unavailable()));
        resolver.registry().add(dir.path(), dead_port()).unwrap();

        let ws = dir.path().to_path_buf();
        let check = resolver.clone();
        let err = tokio::task::spawn_blocking(move || resolver.resolve(&ws))
            .await
            .unwrap()
            .unwrap_err();

        assert!(matches!(err, LaunchError::ToolUnavailable(_)));
        assert!(check.registry().load().unwrap().servers.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sessions_and_prune_report_health() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);
        let live: MockServer = healthy_worker().await;
        let resolver = SessionResolver::new(&config, Arc::new(FakeSpawner::healthy()));

        let live_ws = dir.path().join("live");
        let dead_ws = dir.path().join("dead");
        std::fs::create_dir_all(&live_ws).unwrap();
        std::fs::create_dir_all(&dead_ws).unwrap();
        resolver.registry().add(&live_ws, server_port(&live)).unwrap();
        let dead = resolver.registry().add(&dead_ws, dead_port()).unwrap();

        let (sessions, pruned, remaining) = tokio::task::spawn_blocking(move || {
            let sessions = resolver.sessions().unwrap();
            let pruned = resolver.prune().unwrap();
            let remaining = resolver.registry().load().unwrap().servers;
            (sessions, pruned, remaining)
        })
        .await
        .unwrap();

        let health: Vec<bool> = sessions.iter().map(|s| s.healthy).collect();
        assert_eq!(health, [true, false]);
        assert_eq!(pruned, vec![dead]);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].port, server_port(&live));
    }
}
