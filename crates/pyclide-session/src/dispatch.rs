//! Request dispatch with a single reconcile-and-retry on transport failure.
//!
//! Per request:
//! - send once; success or an application error ends the request
//! - on a transport failure, forget the worker, resolve a fresh one and send
//!   the identical payload again
//! - whatever the second send returns is final; there is no third attempt

use std::path::Path;
use std::sync::Arc;

use crate::config::SessionConfig;
use crate::launcher::{LaunchError, RunnerSpawner, WorkerSpawner};
use crate::protocol::{Operation, WorkerRequest};
use crate::registry::{RegistryError, WorkerRecord};
use crate::resolver::SessionResolver;
use crate::version::user_agent;

/// Failure of a single HTTP exchange with a worker.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error("worker unreachable: {0}")]
    Transport(#[source] ureq::Error),
    #[error("request to worker failed: {0}")]
    Request(#[source] ureq::Error),
    #[error("worker answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("worker sent malformed JSON: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("unexpected response shape for '{operation}': {source}")]
    UnexpectedShape {
        operation: Operation,
        #[source]
        source: serde_json::Error,
    },
}

impl AttemptError {
    fn from_ureq(error: ureq::Error) -> Self {
        match error {
            ureq::Error::Io(_)
            | ureq::Error::Timeout(_)
            | ureq::Error::ConnectionFailed
            | ureq::Error::HostNotFound => Self::Transport(error),
            _ => Self::Request(error),
        }
    }

    /// Connection-level failure (refused, reset, timed out); the only kind
    /// that earns a retry.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("worker unreachable after {attempts} attempts: {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: AttemptError,
    },
    #[error(transparent)]
    Application(AttemptError),
    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Clone)]
pub struct Dispatcher {
    resolver: SessionResolver,
    agent: ureq::Agent,
    user_agent: String,
}

impl Dispatcher {
    pub fn new(config: &SessionConfig, spawner: Arc<dyn WorkerSpawner>) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(config.dispatch_timeout))
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self {
            resolver: SessionResolver::new(config, spawner),
            agent,
            user_agent: user_agent(),
        }
    }

    /// Dispatcher that launches workers through the configured runner.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config, Arc::new(RunnerSpawner::from_config(config)))
    }

    pub fn resolver(&self) -> &SessionResolver {
        &self.resolver
    }

    /// Resolve a live worker for `workspace` and run `request` on it.
    pub fn request(
        &self,
        workspace: &Path,
        request: &WorkerRequest,
    ) -> Result<serde_json::Value, DispatchError> {
        let record = self.resolver.resolve(workspace)?;
        let body = request
            .body(&record.workspace_root)
            .map_err(DispatchError::Encode)?;
        self.dispatch(&record, request.operation(), &body)
    }

    /// Send `payload` to `record`'s worker and return its JSON answer verbatim.
    pub fn dispatch(
        &self,
        record: &WorkerRecord,
        operation: Operation,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, DispatchError> {
        let failure = match self.send(record, operation, payload) {
            Ok(body) => return Ok(body),
            Err(e) if e.is_transport() => e,
            Err(e) => {
                tracing::error!(%operation, port = record.port, error = %e, "Worker request failed");
                return Err(DispatchError::Application(e));
            }
        };

        tracing::warn!(
            %operation,
            port = record.port,
            error = %failure,
            "Worker unreachable; restarting it and retrying once"
        );
        self.resolver.registry().remove(&record.workspace_root)?;
        let fresh = self.resolver.resolve(&record.workspace_root)?;

        match self.send(&fresh, operation, payload) {
            Ok(body) => Ok(body),
            Err(e) if e.is_transport() => {
                tracing::error!(%operation, port = fresh.port, error = %e, "Retry failed");
                Err(DispatchError::Transport {
                    attempts: 2,
                    source: e,
                })
            }
            Err(e) => {
                tracing::error!(%operation, port = fresh.port, error = %e, "Retry failed");
                Err(DispatchError::Application(e))
            }
        }
    }

    /// Ask the worker for `workspace` to stop and forget it. Stop failures are
    /// ignored; the record is removed either way.
    pub fn shutdown(&self, workspace: &Path) -> Result<Option<WorkerRecord>, RegistryError> {
        let registry = self.resolver.registry();
        let Some(record) = registry.find(workspace)? else {
            return Ok(None);
        };

        let url = format!("{}/shutdown", record.base_url());
        match self
            .agent
            .post(&url)
            .header("User-Agent", &self.user_agent)
            .send_empty()
        {
            Ok(response) => {
                tracing::info!(port = record.port, status = response.status().as_u16(), "Worker asked to stop");
            }
            Err(e) => {
                tracing::debug!(port = record.port, error = %e, "Shutdown request failed; ignoring");
            }
        }

        registry.remove(&record.workspace_root)?;
        Ok(Some(record))
    }

    fn send(
        &self,
        record: &WorkerRecord,
        operation: Operation,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, AttemptError> {
        let url = format!("{}/{}", record.base_url(), operation.name());
        tracing::debug!(%operation, port = record.port, "Sending request");

        let mut response = self
            .agent
            .post(&url)
            .header("User-Agent", &self.user_agent)
            .send_json(payload)
            .map_err(AttemptError::from_ureq)?;

        let status = response.status();
        let text = response
            .body_mut()
            .read_to_string()
            .map_err(AttemptError::from_ureq)?;

        if !status.is_success() {
            return Err(AttemptError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let body: serde_json::Value =
            serde_json::from_str(&text).map_err(AttemptError::Malformed)?;
        operation
            .validate_response(&body)
            .map_err(|source| AttemptError::UnexpectedShape { operation, source })?;
        Ok(body)
    }
}
