//! Per-attempt working directories under a shared root.

use std::path::{Path, PathBuf};

use scriptflow_core::ExecutionId;
use tracing::warn;

use crate::error::{Result, RunnerError};

/// Create a fresh, empty `{root}/{execution_id}` directory.
///
/// A leftover directory with the same name (from a crash) is wiped first.
pub async fn prepare(root: &Path, execution_id: &ExecutionId) -> Result<PathBuf> {
    let dir = root.join(execution_id.as_str());
    if tokio::fs::try_exists(&dir).await.unwrap_or(false) {
        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|source| RunnerError::WorkingDir {
                path: dir.clone(),
                source,
            })?;
    }
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|source| RunnerError::WorkingDir {
            path: dir.clone(),
            source,
        })?;
    Ok(dir)
}

/// Best-effort removal; failures are logged and otherwise ignored.
pub async fn remove(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %dir.display(), error = %e, "failed to remove working directory");
        }
    }
}
