use std::path::Path;
use std::path::PathBuf;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;
use tokio::fs;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("filesystem error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("malformed record in {path} at line {line}: {source}")]
    Malformed {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Atomically replaces the contents of `path` with `value` serialized as
/// pretty JSON: mkdir-p the parent, write a sibling temp file, rename it
/// over the target, and unlink the temp file on any exit path (spec §4.8).
pub async fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Serialize {
        what: "json document",
        source,
    })?;
    atomic_write_bytes(path, &bytes).await
}

/// Atomically replaces the contents of `path` with raw `bytes`.
pub async fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| io_err(parent, e))?;
    }

    let pid = std::process::id();
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let tmp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension()
            .map(|e| format!("{}.{pid}.{now}", e.to_string_lossy()))
            .unwrap_or_else(|| format!("{pid}.{now}"))
    ));

    let write_result = fs::write(&tmp_path, bytes).await;
    if let Err(e) = write_result {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(io_err(&tmp_path, e));
    }

    if let Err(e) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(io_err(path, e));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Doc {
        n: u32,
    }

    #[tokio::test]
    async fn atomic_write_creates_parent_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/doc.json");

        atomic_write_json(&path, &Doc { n: 1 }).await.unwrap();
        let read: Doc = serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        assert_eq!(read, Doc { n: 1 });

        atomic_write_json(&path, &Doc { n: 2 }).await.unwrap();
        let read: Doc = serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        assert_eq!(read, Doc { n: 2 });

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
