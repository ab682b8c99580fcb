//! Durable workspace -> worker registry.
//!
//! The registry is a single JSON document shared by every invocation of the
//! client. Reads and writes are plain read-modify-write with no lock, so two
//! concurrent invocations can both append a record for the same workspace or
//! overwrite each other's update. Writes go through an atomic rename, so a
//! reader never sees a torn document.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("failed to access registry {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("registry {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize registry: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("cannot resolve workspace {path}: {source}")]
    Canonicalize {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One live (or presumed live) worker serving a workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    /// Canonical absolute workspace path; the registry key.
    pub workspace_root: PathBuf,
    /// Loopback port the worker listens on.
    pub port: u16,
    /// Registration time, seconds since the Unix epoch.
    pub started_at: f64,
}

impl WorkerRecord {
    pub fn new(workspace_root: PathBuf, port: u16) -> Self {
        Self {
            workspace_root,
            port,
            started_at: epoch_seconds(Utc::now()),
        }
    }

    /// Base URL of the worker, always on loopback.
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    pub fn started_at_utc(&self) -> Option<DateTime<Utc>> {
        if !self.started_at.is_finite() {
            return None;
        }
        let secs = self.started_at.floor();
        let nanos = ((self.started_at - secs) * 1e9) as u32;
        DateTime::from_timestamp(secs as i64, nanos)
    }
}

/// The persisted document: `{"servers": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    pub servers: Vec<WorkerRecord>,
}

impl Registry {
    /// First record for an already-canonical workspace root.
    pub fn find(&self, workspace_root: &Path) -> Option<&WorkerRecord> {
        self.servers
            .iter()
            .find(|record| record.workspace_root == workspace_root)
    }
}

pub(crate) fn epoch_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp() as f64 + f64::from(at.timestamp_subsec_micros()) / 1e6
}

/// Absolute, symlink-resolved form of a workspace path.
///
/// A workspace that no longer exists keeps its absolute spelling so that its
/// stale record can still be found and removed.
pub fn canonical_workspace(path: &Path) -> Result<PathBuf, RegistryError> {
    match std::fs::canonicalize(path) {
        Ok(resolved) => Ok(resolved),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => std::path::absolute(path)
            .map_err(|source| RegistryError::Canonicalize {
                path: path.to_path_buf(),
                source,
            }),
        Err(source) => Err(RegistryError::Canonicalize {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document. A missing file is an empty registry; an unparsable
    /// one is an error and is left untouched.
    pub fn load(&self) -> Result<Registry, RegistryError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No registry yet");
                return Ok(Registry::default());
            }
            Err(source) => {
                return Err(RegistryError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        serde_json::from_str(&text).map_err(|source| RegistryError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Overwrite the document with `registry`, creating the directory first.
    pub fn save(&self, registry: &Registry) -> Result<(), RegistryError> {
        let io_err = |source| RegistryError::Io {
            path: self.path.clone(),
            source,
        };

        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent).map_err(io_err)?;

        let mut json = serde_json::to_vec_pretty(registry)?;
        json.push(b'\n');

        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }

    pub fn find(&self, workspace: &Path) -> Result<Option<WorkerRecord>, RegistryError> {
        let root = canonical_workspace(workspace)?;
        Ok(self.load()?.find(&root).cloned())
    }

    /// Append a fresh record for `workspace` stamped with the current time.
    pub fn add(&self, workspace: &Path, port: u16) -> Result<WorkerRecord, RegistryError> {
        let record = WorkerRecord::new(canonical_workspace(workspace)?, port);
        let mut registry = self.load()?;
        registry.servers.push(record.clone());
        self.save(&registry)?;
        tracing::debug!(
            workspace = %record.workspace_root.display(),
            port,
            "Registered worker"
        );
        Ok(record)
    }

    /// Drop every record for `workspace`. Returns how many were dropped;
    /// nothing is written when there was nothing to drop.
    pub fn remove(&self, workspace: &Path) -> Result<usize, RegistryError> {
        let root = canonical_workspace(workspace)?;
        let mut registry = self.load()?;
        let before = registry.servers.len();
        registry.servers.retain(|record| record.workspace_root != root);
        let removed = before - registry.servers.len();

        if removed > 0 {
            self.save(&registry)?;
            tracing::debug!(workspace = %root.display(), removed, "Unregistered worker");
        }
        Ok(removed)
    }
}
