//! Tool invocation types and the executor seam.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

use crate::{ActivityStatus, ScopedFolderSet};

/// A tool call received from the service.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRequest {
    pub request_id: String,
    pub tool: String,
    pub params: Value,
}

impl ToolRequest {
    #[must_use]
    pub fn new(request_id: impl Into<String>, tool: impl Into<String>, params: Value) -> Self {
        Self {
            request_id: request_id.into(),
            tool: tool.into(),
            params,
        }
    }

    /// The `path` parameter, if the tool takes one.
    #[must_use]
    pub fn path_param(&self) -> Option<&str> {
        self.params.get("path").and_then(Value::as_str)
    }
}

/// Successful tool result.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// Structured result.
    Json {
        data: Value,
        bytes_transferred: Option<u64>,
    },
    /// Raw file bytes; base64-encoded on the wire.
    Binary(Bytes),
}

impl ToolOutput {
    #[must_use]
    pub const fn json(data: Value) -> Self {
        Self::Json {
            data,
            bytes_transferred: None,
        }
    }

    #[must_use]
    pub fn bytes_transferred(&self) -> Option<u64> {
        match self {
            Self::Json {
                bytes_transferred, ..
            } => *bytes_transferred,
            Self::Binary(bytes) => u64::try_from(bytes.len()).ok(),
        }
    }
}

/// Tool failure, reported back to the service as an error response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("Path is outside scoped folders: {0}")]
    OutOfScope(String),
    #[error("Access denied, sensitive file: {0}")]
    Denied(String),
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
    #[error("Tool timed out after {0:?}")]
    TimedOut(Duration),
    #[error("Agent is not connected yet, retry shortly")]
    NotReady,
    #[error("{0}")]
    Failed(String),
}

/// Outcome of a tool call.
pub type ToolResult = Result<ToolOutput, ToolError>;

/// Activity status corresponding to a tool result.
#[must_use]
pub const fn activity_status(result: &ToolResult) -> ActivityStatus {
    match result {
        Ok(_) => ActivityStatus::Success,
        Err(_) => ActivityStatus::Error,
    }
}

/// Executes tool calls. Implementations must consult `scope` before any
/// filesystem access.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, request: &ToolRequest, scope: &ScopedFolderSet) -> ToolResult;
}
