//! Client configuration: where the registry lives, how workers are launched,
//! and the fixed timeouts of the session protocol.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the registry inside the pyclide home directory.
pub const REGISTRY_FILE_NAME: &str = "servers.json";

const DEFAULT_RUNNER: &str = "uvx";
const DEFAULT_WORKER_SOURCE: &str = "git+https://github.com/GiampaoloGabba/pyclide";
const DEFAULT_WORKER_ENTRYPOINT: &str = "pyclide-server";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot determine the home directory; set PYCLIDE_HOME")]
    HomeDirUnavailable,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Path of the persisted registry document.
    pub registry_path: PathBuf,
    /// External tool that fetches and runs the worker.
    pub runner: String,
    /// Package source handed to the runner (`--from`).
    pub worker_source: String,
    /// Executable the runner starts inside the package.
    pub worker_entrypoint: String,
    /// Budget for one `GET /health` probe.
    pub health_timeout: Duration,
    /// Budget for `<runner> --version`.
    pub tool_probe_timeout: Duration,
    /// Budget for one operation request.
    pub dispatch_timeout: Duration,
    /// Pause between startup health probes.
    pub startup_poll_interval: Duration,
    /// Startup health probes before giving up.
    pub startup_attempts: u32,
}

impl SessionConfig {
    /// Defaults with the registry stored under `home`.
    pub fn new(home: impl AsRef<Path>) -> Self {
        Self {
            registry_path: home.as_ref().join(REGISTRY_FILE_NAME),
            runner: DEFAULT_RUNNER.to_string(),
            worker_source: DEFAULT_WORKER_SOURCE.to_string(),
            worker_entrypoint: DEFAULT_WORKER_ENTRYPOINT.to_string(),
            health_timeout: Duration::from_secs(1),
            tool_probe_timeout: Duration::from_secs(2),
            dispatch_timeout: Duration::from_secs(10),
            startup_poll_interval: Duration::from_millis(100),
            startup_attempts: 30,
        }
    }

    /// Defaults with overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok(), dirs::home_dir())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        home_dir: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let home = match lookup("PYCLIDE_HOME") {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => home_dir
                .map(|home| home.join(".pyclide"))
                .ok_or(ConfigError::HomeDirUnavailable)?,
        };

        let mut config = Self::new(home);

        if let Some(runner) = lookup("PYCLIDE_RUNNER").filter(|s| !s.is_empty()) {
            config.runner = runner;
        }
        if let Some(source) = lookup("PYCLIDE_SERVER_SOURCE").filter(|s| !s.is_empty()) {
            config.worker_source = source;
        }
        if let Some(ms) = parse_override::<u64>(&lookup, "PYCLIDE_STARTUP_POLL_MS") {
            config.startup_poll_interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse_override::<u32>(&lookup, "PYCLIDE_STARTUP_ATTEMPTS") {
            config.startup_attempts = attempts.max(1);
        }

        Ok(config)
    }

    pub fn with_registry_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.registry_path = path.into();
        self
    }

    pub fn with_runner(mut self, runner: impl Into<String>) -> Self {
        self.runner = runner.into();
        self
    }

    pub fn with_worker_source(mut self, source: impl Into<String>) -> Self {
        self.worker_source = source.into();
        self
    }

    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    pub fn with_startup_polling(mut self, interval: Duration, attempts: u32) -> Self {
        self.startup_poll_interval = interval;
        self.startup_attempts = attempts.max(1);
        self
    }
}

fn parse_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparsable override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_protocol_timeouts() {
        let config = SessionConfig::new("/home/user/.pyclide");
        assert_eq!(
            config.registry_path,
            PathBuf::from("/home/user/.pyclide/servers.json")
        );
        assert_eq!(config.runner, "uvx");
        assert_eq!(config.health_timeout, Duration::from_secs(1));
        assert_eq!(config.tool_probe_timeout, Duration::from_secs(2));
        assert_eq!(config.dispatch_timeout, Duration::from_secs(10));
        assert_eq!(config.startup_poll_interval, Duration::from_millis(100));
        assert_eq!(config.startup_attempts, 30);
    }

    #[test]
    fn registry_defaults_to_dot_pyclide_under_home() {
        let config =
            SessionConfig::from_lookup(lookup_from(&[]), Some(PathBuf::from("/home/ada"))).unwrap();
        assert_eq!(
            config.registry_path,
            PathBuf::from("/home/ada/.pyclide/servers.json")
        );
    }

    #[test]
    fn pyclide_home_overrides_registry_location() {
        let config = SessionConfig::from_lookup(
            lookup_from(&[("PYCLIDE_HOME", "/tmp/pyclide-test")]),
            Some(PathBuf::from("/home/ada")),
        )
        .unwrap();
        assert_eq!(
            config.registry_path,
            PathBuf::from("/tmp/pyclide-test/servers.json")
        );
    }

    #[test]
    fn missing_home_is_an_error() {
        let result = SessionConfig::from_lookup(lookup_from(&[]), None);
        assert!(matches!(result, Err(ConfigError::HomeDirUnavailable)));
    }

    #[test]
    fn runner_and_polling_overrides() {
        let config = SessionConfig::from_lookup(
            lookup_from(&[
                ("PYCLIDE_HOME", "/tmp/p"),
                ("PYCLIDE_RUNNER", "/opt/bin/uvx"),
                ("PYCLIDE_SERVER_SOURCE", "pyclide==0.3.0"),
                ("PYCLIDE_STARTUP_POLL_MS", "250"),
                ("PYCLIDE_STARTUP_ATTEMPTS", "4"),
            ]),
            None,
        )
        .unwrap();
        assert_eq!(config.runner, "/opt/bin/uvx");
        assert_eq!(config.worker_source, "pyclide==0.3.0");
        assert_eq!(config.startup_poll_interval, Duration::from_millis(250));
        assert_eq!(config.startup_attempts, 4);
    }

    #[test]
    fn unparsable_overrides_keep_defaults() {
        let config = SessionConfig::from_lookup(
            lookup_from(&[
                ("PYCLIDE_HOME", "/tmp/p"),
                ("PYCLIDE_STARTUP_POLL_MS", "soon"),
                ("PYCLIDE_STARTUP_ATTEMPTS", "-3"),
            ]),
            None,
        )
        .unwrap();
        assert_eq!(config.startup_poll_interval, Duration::from_millis(100));
        assert_eq!(config.startup_attempts, 30);
    }

    #[test]
    fn startup_attempts_never_zero() {
        let config =
            SessionConfig::new("/tmp/p").with_startup_polling(Duration::from_millis(5), 0);
        assert_eq!(config.startup_attempts, 1);
    }
}
