//! Worker wire protocol: operations, request bodies and response shapes.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Operations a worker serves, one `POST /<name>` endpoint each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Defs,
    Refs,
    Hover,
    Rename,
    Occurrences,
    ExtractVar,
    ExtractMethod,
    Move,
    OrganizeImports,
}

impl Operation {
    pub const ALL: [Operation; 9] = [
        Self::Defs,
        Self::Refs,
        Self::Hover,
        Self::Rename,
        Self::Occurrences,
        Self::ExtractVar,
        Self::ExtractMethod,
        Self::Move,
        Self::OrganizeImports,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Defs => "defs",
            Self::Refs => "refs",
            Self::Hover => "hover",
            Self::Rename => "rename",
            Self::Occurrences => "occurrences",
            Self::ExtractVar => "extract-var",
            Self::ExtractMethod => "extract-method",
            Self::Move => "move",
            Self::OrganizeImports => "organize-imports",
        }
    }

    /// Check that `body` has the response shape this operation promises.
    pub fn validate_response(&self, body: &serde_json::Value) -> Result<(), serde_json::Error> {
        match self {
            Self::Defs | Self::Refs | Self::Occurrences => {
                LocationsResponse::deserialize(body).map(drop)
            }
            Self::Hover => HoverInfo::deserialize(body).map(drop),
            Self::Rename
            | Self::ExtractVar
            | Self::ExtractMethod
            | Self::Move
            | Self::OrganizeImports => PatchesResponse::deserialize(body).map(drop),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown operation '{0}'")]
pub struct UnknownOperation(pub String);

impl FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.name() == s)
            .ok_or_else(|| UnknownOperation(s.to_string()))
    }
}

/// How refactorings report changed files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Unified diffs
    #[default]
    Diff,
    /// Complete new file contents
    Full,
}

/// A cursor position; lines and columns are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRequest {
    /// Path relative to the workspace root.
    pub file: String,
    pub line: u32,
    pub col: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRequest {
    #[serde(flatten)]
    pub position: PositionRequest,
    pub new_name: String,
    #[serde(default)]
    pub output_format: OutputFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractMethodRequest {
    pub file: String,
    pub start_line: u32,
    pub end_line: u32,
    pub method_name: String,
    #[serde(default)]
    pub output_format: OutputFormat,
}

/// Without columns whole lines are extracted; `start_col` alone runs to the
/// end of `end_line`, `end_col` alone starts at the beginning of `start_line`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractVarRequest {
    pub file: String,
    pub start_line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_col: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_col: Option<u32>,
    pub var_name: String,
    #[serde(default)]
    pub output_format: OutputFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    #[serde(flatten)]
    pub position: PositionRequest,
    pub dest_file: String,
    #[serde(default)]
    pub output_format: OutputFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizeImportsRequest {
    pub file: String,
    #[serde(default)]
    pub output_format: OutputFormat,
}

/// One request per operation, validated before it leaves the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerRequest {
    Defs(PositionRequest),
    Refs(PositionRequest),
    Hover(PositionRequest),
    Occurrences(PositionRequest),
    Rename(RenameRequest),
    ExtractVar(ExtractVarRequest),
    ExtractMethod(ExtractMethodRequest),
    Move(MoveRequest),
    OrganizeImports(OrganizeImportsRequest),
}

impl WorkerRequest {
    pub fn operation(&self) -> Operation {
        match self {
            Self::Defs(_) => Operation::Defs,
            Self::Refs(_) => Operation::Refs,
            Self::Hover(_) => Operation::Hover,
            Self::Occurrences(_) => Operation::Occurrences,
            Self::Rename(_) => Operation::Rename,
            Self::ExtractVar(_) => Operation::ExtractVar,
            Self::ExtractMethod(_) => Operation::ExtractMethod,
            Self::Move(_) => Operation::Move,
            Self::OrganizeImports(_) => Operation::OrganizeImports,
        }
    }

    /// JSON body for the worker, with `root` set to the workspace root.
    pub fn body(&self, root: &Path) -> Result<serde_json::Value, serde_json::Error> {
        let mut body = match self {
            Self::Defs(req) | Self::Refs(req) | Self::Hover(req) | Self::Occurrences(req) => {
                serde_json::to_value(req)?
            }
            Self::Rename(req) => serde_json::to_value(req)?,
            Self::ExtractVar(req) => serde_json::to_value(req)?,
            Self::ExtractMethod(req) => serde_json::to_value(req)?,
            Self::Move(req) => serde_json::to_value(req)?,
            Self::OrganizeImports(req) => serde_json::to_value(req)?,
        };
        if let Some(fields) = body.as_object_mut() {
            fields.insert(
                "root".to_string(),
                serde_json::Value::String(root.to_string_lossy().into_owned()),
            );
        }
        Ok(body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub line: u32,
    pub column: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_column: Option<u32>,
}

/// Response of `defs`, `refs` and `occurrences`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationsResponse {
    pub locations: Vec<Location>,
}

/// Response of `hover`; every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoverInfo {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub signature: Option<String>,
    pub docstring: Option<String>,
}

/// Response of every refactoring: file path -> diff or full content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchesResponse {
    pub patches: BTreeMap<String, String>,
    #[serde(default)]
    pub format: OutputFormat,
}
