//! Scope enforcement in front of a tool executor.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use desktop_agent_core::{ScopedFolderSet, ToolError, ToolExecutor, ToolRequest, ToolResult};

use crate::{deny_list::is_denied, unicode::resolve_unicode_path};

/// Wraps an executor and refuses requests whose `path` parameter resolves
/// outside the scoped folders or onto a sensitive file.
///
/// Symlinks and `..` are resolved before the check, on both the target and
/// the scoped folders, so a link inside a scoped folder cannot escape it.
/// Requests without a `path` parameter are passed through unchanged.
#[derive(Debug, Clone)]
pub struct GuardedExecutor<E> {
    inner: E,
}

impl<E> GuardedExecutor<E> {
    #[must_use]
    pub const fn new(inner: E) -> Self {
        Self { inner }
    }

    pub const fn inner(&self) -> &E {
        &self.inner
    }
}

#[async_trait]
impl<E: ToolExecutor> ToolExecutor for GuardedExecutor<E> {
    async fn execute(&self, request: &ToolRequest, scope: &ScopedFolderSet) -> ToolResult {
        if let Some(path) = request.path_param() {
            let resolved = authorize_path(path, scope).await?;
            tracing::debug!(
                request_id = %request.request_id,
                tool = %request.tool,
                path = %resolved.display(),
                "path authorized"
            );
        }
        self.inner.execute(request, scope).await
    }
}

/// Resolve `path` and check it against `scope` and the deny list.
///
/// Returns the canonical path on success.
///
/// # Errors
/// [`ToolError::OutOfScope`] when no scoped folder contains the path,
/// [`ToolError::Denied`] for sensitive files, [`ToolError::Failed`] when
/// the path cannot be resolved.
pub async fn authorize_path(path: &str, scope: &ScopedFolderSet) -> Result<PathBuf, ToolError> {
    if scope.is_empty() {
        return Err(ToolError::OutOfScope(
            "No scoped folders configured".to_string(),
        ));
    }

    let canonical = canonicalize_lenient(Path::new(path)).await?;
    let canonical_scope = canonical_scope(scope).await;

    if !canonical_scope.is_authorized(&canonical.to_string_lossy()) {
        return Err(ToolError::OutOfScope(canonical.display().to_string()));
    }
    if is_denied(&canonical) {
        return Err(ToolError::Denied(path.to_string()));
    }
    Ok(canonical)
}

async fn canonicalize_lenient(path: &Path) -> Result<PathBuf, ToolError> {
    match tokio::fs::canonicalize(path).await {
        Ok(canonical) => Ok(canonical),
        Err(e) => {
            let Some(actual) = resolve_unicode_path(path).await else {
                return Err(ToolError::Failed(format!(
                    "Path resolution failed: {}: {e}",
                    path.display()
                )));
            };
            tracing::debug!(requested = %path.display(), actual = %actual.display(), "resolved unicode filename");
            tokio::fs::canonicalize(&actual).await.map_err(|e| {
                ToolError::Failed(format!("Path resolution failed: {}: {e}", actual.display()))
            })
        }
    }
}

/// Scoped folders with symlinks resolved. Folders that no longer exist are skipped.
async fn canonical_scope(scope: &ScopedFolderSet) -> ScopedFolderSet {
    let mut resolved = ScopedFolderSet::new();
    for folder in scope.paths() {
        let Ok(canonical) = tokio::fs::canonicalize(folder).await else {
            continue;
        };
        let _ = resolved.add(&canonical.to_string_lossy());
    }
    resolved
}
