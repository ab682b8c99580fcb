//! Shared fixtures: loopback fake workers and a spawner that starts them.

use std::net::{Ipv4Addr, TcpListener};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::config::SessionConfig;
use crate::health::HEALTH_PATH;
use crate::launcher::{SpawnError, WorkerSpawnConfig, WorkerSpawner};
use crate::registry::WorkerRecord;

pub(crate) fn test_config(dir: &TempDir) -> SessionConfig {
    SessionConfig::new(dir.path().join("home"))
        .with_health_timeout(Duration::from_millis(500))
        .with_dispatch_timeout(Duration::from_secs(2))
        .with_startup_polling(Duration::from_millis(20), 50)
}

/// A loopback port with nothing listening on it.
pub(crate) fn dead_port() -> u16 {
    crate::port::allocate().unwrap()
}

pub(crate) fn record_for_port(port: u16) -> WorkerRecord {
    WorkerRecord {
        workspace_root: PathBuf::from("/srv/app"),
        port,
        started_at: 0.0,
    }
}

pub(crate) fn server_port(server: &MockServer) -> u16 {
    server.address().port()
}

pub(crate) fn health_body() -> serde_json::Value {
    serde_json::json!({
        "status": "ok",
        "workspace": "/srv/app",
        "uptime": 12.5,
        "requests": 3,
        "cache_size": 1,
        "cache_invalidations": 0
    })
}

async fn mount_health(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(HEALTH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(health_body()))
        .mount(server)
        .await;
}

/// A worker that answers health probes and nothing else.
pub(crate) async fn healthy_worker() -> MockServer {
    let server = MockServer::start().await;
    mount_health(&server).await;
    server
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Healthy,
    Silent,
    Unavailable,
}

/// Records spawn requests and, when healthy, starts a fake worker on the
/// requested port. Must be built inside a multi-threaded tokio runtime and
/// driven from blocking threads.
pub(crate) struct FakeSpawner {
    behavior: Behavior,
    reply: ResponseTemplate,
    runtime: tokio::runtime::Handle,
    spawned: Mutex<Vec<WorkerSpawnConfig>>,
    workers: Mutex<Vec<Arc<MockServer>>>,
}

impl FakeSpawner {
    fn with_behavior(behavior: Behavior) -> Self {
        Self {
            behavior,
            reply: ResponseTemplate::new(200).set_body_json(serde_json::json!({"locations": []})),
            runtime: tokio::runtime::Handle::current(),
            spawned: Mutex::new(Vec::new()),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawned workers come up and answer every POST with the configured reply.
    pub(crate) fn healthy() -> Self {
        Self::with_behavior(Behavior::Healthy)
    }

    /// Spawns "succeed" but nothing ever listens on the port.
    pub(crate) fn silent() -> Self {
        Self::with_behavior(Behavior::Silent)
    }

    /// The runner tool cannot be invoked.
    pub(crate) fn unavailable() -> Self {
        Self::with_behavior(Behavior::Unavailable)
    }

    pub(crate) fn replying(mut self, reply: ResponseTemplate) -> Self {
        self.reply = reply;
        self
    }

    pub(crate) fn spawned(&self) -> Vec<WorkerSpawnConfig> {
        self.spawned.lock().unwrap().clone()
    }

    /// Requests received by the `index`-th started worker.
    pub(crate) async fn worker_requests(&self, index: usize) -> Vec<wiremock::Request> {
        let worker = Arc::clone(&self.workers.lock().unwrap()[index]);
        worker.received_requests().await.unwrap_or_default()
    }
}

impl WorkerSpawner for FakeSpawner {
    fn check_available(&self) -> Result<(), SpawnError> {
        match self.behavior {
            Behavior::Unavailable => Err(SpawnError::Other("fake runner not installed".to_string())),
            _ => Ok(()),
        }
    }

    fn spawn(&self, config: &WorkerSpawnConfig) -> Result<(), SpawnError> {
        self.spawned.lock().unwrap().push(config.clone());
        if self.behavior != Behavior::Healthy {
            return Ok(());
        }

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, config.port))?;
        let reply = self.reply.clone();
        let server = self.runtime.block_on(async move {
            let server = MockServer::builder().listener(listener).start().await;
            mount_health(&server).await;
            Mock::given(method("POST"))
                .respond_with(reply)
                .mount(&server)
                .await;
            server
        });
        self.workers.lock().unwrap().push(Arc::new(server));
        Ok(())
    }
}
