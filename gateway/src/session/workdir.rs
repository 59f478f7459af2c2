//! Per-session work directories: the materialized file map the worker
//! bind-mounts at `/app`.

use std::collections::HashMap;
use std::path::{Component, Path};

use crate::error::GatewayError;

/// Normalize a client-supplied file path: strip leading separators, collapse
/// `.` segments, forbid traversal out of the work directory.
pub fn normalize_path(raw: &str) -> Result<String, GatewayError> {
    let trimmed = raw.trim_start_matches(['/', '\\']);
    if trimmed.is_empty() {
        return Err(GatewayError::Validation("file path is empty".into()));
    }

    let mut parts: Vec<&str> = Vec::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => match part.to_str() {
                Some(part) => parts.push(part),
                None => {
                    return Err(GatewayError::Validation(format!(
                        "file path is not valid UTF-8: {raw:?}"
                    )))
                }
            },
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(GatewayError::Validation(format!(
                    "file path escapes the project root: {raw}"
                )))
            }
        }
    }
    if parts.is_empty() {
        return Err(GatewayError::Validation("file path is empty".into()));
    }
    Ok(parts.join("/"))
}

/// Write one file under `root`, creating intermediate directories.
pub async fn write_file(root: &Path, relative: &str, content: &str) -> anyhow::Result<()> {
    let target = root.join(relative);
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&target, content).await?;
    Ok(())
}

/// Materialize a whole file map under `root`.
pub async fn materialize(root: &Path, files: &HashMap<String, String>) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(root).await?;
    for (path, content) in files {
        write_file(root, path, content).await?;
    }
    Ok(())
}

/// Remove a work directory. Absence is success; cleanup runs more than once.
pub async fn remove(root: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(root).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!(path = %root.display(), "workdir removal failed: {e}");
        }
    }
}
