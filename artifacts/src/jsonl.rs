use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::atomic::StoreError;

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Appends one JSON-serialized line to `path`, creating the parent
/// directory and the file as needed (spec §4.9, §5: one line per logical
/// event, never a partial write mid-line).
pub async fn append_line<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| io_err(parent, e))?;
    }
    let line = serde_json::to_string(value).map_err(|source| StoreError::Serialize {
        what: "jsonl record",
        source,
    })?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| io_err(path, e))?;
    file.write_all(line.as_bytes())
        .await
        .map_err(|e| io_err(path, e))?;
    file.write_all(b"\n").await.map_err(|e| io_err(path, e))?;
    file.flush().await.map_err(|e| io_err(path, e))
}

/// Reads every well-formed line from a JSONL file. A dangling partial final
/// line (a crash-torn write) is skipped rather than treated as an error
/// (spec §9: readers tolerate a dangling partial final line).
pub async fn read_tolerant<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    let contents = match fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(path, e)),
    };

    let lines: Vec<&str> = contents.lines().collect();
    let mut out = Vec::with_capacity(lines.len());
    for (idx, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(value) => out.push(value),
            Err(_) if idx == lines.len() - 1 => {
                // Tolerate a torn last line; anything earlier is corruption.
                tracing::warn!(path = %path.display(), "skipping torn final jsonl line");
            }
            Err(source) => {
                return Err(StoreError::Malformed {
                    path: path.to_path_buf(),
                    line: idx + 1,
                    source,
                });
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Rec {
        n: u32,
    }

    #[tokio::test]
    async fn append_and_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        append_line(&path, &Rec { n: 1 }).await.unwrap();
        append_line(&path, &Rec { n: 2 }).await.unwrap();
        let recs: Vec<Rec> = read_tolerant(&path).await.unwrap();
        assert_eq!(recs, vec![Rec { n: 1 }, Rec { n: 2 }]);
    }

    #[tokio::test]
    async fn torn_last_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        append_line(&path, &Rec { n: 1 }).await.unwrap();
        let mut file = OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .unwrap();
        file.write_all(b"{\"n\": 2, \"trunc").await.unwrap();
        file.flush().await.unwrap();

        let recs: Vec<Rec> = read_tolerant(&path).await.unwrap();
        assert_eq!(recs, vec![Rec { n: 1 }]);
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.jsonl");
        let recs: Vec<Rec> = read_tolerant(&path).await.unwrap();
        assert!(recs.is_empty());
    }
}
