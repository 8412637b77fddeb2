//! Minimal file tools served by the daemon.

use std::sync::Arc;

use async_trait::async_trait;
use desktop_agent_core::{ScopedFolderSet, ToolError, ToolOutput, ToolResult};
use desktop_agent_executor::{GuardedExecutor, ToolHandler, ToolRegistry};
use serde_json::{Value, json};

/// Largest file `read_file` returns.
const MAX_READ_BYTES: u64 = 10 * 1024 * 1024;

/// Registry of the built-in tools behind the scope guard.
pub fn executor() -> GuardedExecutor<ToolRegistry> {
    GuardedExecutor::new(
        ToolRegistry::new()
            .with_tool("list_files", Arc::new(ListFiles))
            .with_tool("read_file", Arc::new(ReadFile)),
    )
}

fn path_param(params: &Value) -> Result<&str, ToolError> {
    params
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidParams("missing 'path'".to_string()))
}

fn io_error(e: &std::io::Error) -> ToolError {
    ToolError::Failed(e.to_string())
}

struct ListFiles;

#[async_trait]
impl ToolHandler for ListFiles {
    async fn handle(&self, params: &Value, _scope: &ScopedFolderSet) -> ToolResult {
        let path = path_param(params)?;
        let mut dir = tokio::fs::read_dir(path).await.map_err(|e| io_error(&e))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| io_error(&e))? {
            let metadata = entry.metadata().await.map_err(|e| io_error(&e))?;
            entries.push(json!({
                "name": entry.file_name().to_string_lossy(),
                "is_dir": metadata.is_dir(),
                "size": metadata.len(),
            }));
        }
        entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
        Ok(ToolOutput::json(json!({ "path": path, "entries": entries })))
    }
}

struct ReadFile;

#[async_trait]
impl ToolHandler for ReadFile {
    async fn handle(&self, params: &Value, _scope: &ScopedFolderSet) -> ToolResult {
        let path = path_param(params)?;
        let metadata = tokio::fs::metadata(path).await.map_err(|e| io_error(&e))?;
        if metadata.len() > MAX_READ_BYTES {
            return Err(ToolError::Failed(format!(
                "File too large: {} bytes (limit {MAX_READ_BYTES})",
                metadata.len()
            )));
        }
        let bytes = tokio::fs::read(path).await.map_err(|e| io_error(&e))?;
        Ok(ToolOutput::Binary(bytes.into()))
    }
}
