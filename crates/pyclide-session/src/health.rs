//! Worker liveness probing.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::registry::WorkerRecord;
use crate::version::user_agent;

/// Fixed liveness endpoint of every worker.
pub const HEALTH_PATH: &str = "/health";

/// Body of a worker's `GET /health` answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerHealth {
    pub status: String,
    /// Workspace the worker believes it serves.
    pub workspace: PathBuf,
    /// Seconds since the worker started.
    pub uptime: f64,
    pub requests: u64,
    pub cache_size: u64,
    #[serde(default)]
    pub cache_invalidations: u64,
}

/// Issues bounded-latency `GET /health` probes on loopback.
#[derive(Clone)]
pub struct HealthProber {
    agent: ureq::Agent,
    user_agent: String,
}

impl HealthProber {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self {
            agent,
            user_agent: user_agent(),
        }
    }

    /// True only when the worker answers 200. Refused connections, timeouts
    /// and every other failure are indistinguishable false.
    pub fn is_healthy(&self, record: &WorkerRecord) -> bool {
        match self.probe(record) {
            Ok(response) => {
                let healthy = response.status() == 200;
                if !healthy {
                    tracing::debug!(
                        port = record.port,
                        status = response.status().as_u16(),
                        "Health probe answered with non-200"
                    );
                }
                healthy
            }
            Err(e) => {
                tracing::debug!(port = record.port, error = %e, "Health probe failed");
                false
            }
        }
    }

    /// Parsed health document, or `None` on any failure.
    pub fn fetch(&self, record: &WorkerRecord) -> Option<WorkerHealth> {
        let mut response = self.probe(record).ok()?;
        if response.status() != 200 {
            return None;
        }
        response.body_mut().read_json::<WorkerHealth>().ok()
    }

    fn probe(
        &self,
        record: &WorkerRecord,
    ) -> Result<ureq::http::Response<ureq::Body>, ureq::Error> {
        let url = format!("{}{}", record.base_url(), HEALTH_PATH);
        self.agent
            .get(&url)
            .header("User-Agent", &self.user_agent)
            .call()
    }
}
