//! Persists run-corpus snapshots under `.opta/browser/run-corpus/` and
//! guards concurrent refreshes with a single-flight lock (spec §4.6, §4.7).

use std::path::Path;
use std::path::PathBuf;

use opta_browser_artifacts::atomic_write_json;
use opta_browser_protocol::RunCorpusSummary;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::aggregate::RunCorpusError;
use crate::aggregate::build_summary;

fn slug_for(now: OffsetDateTime, reason: &str) -> String {
    let format = time::macros::format_description!(
        "[year]-[month]-[day]T[hour]-[minute]-[second]"
    );
    let stamp = now
        .format(&format)
        .unwrap_or_else(|_| "unknown-time".to_string());
    format!("{stamp}-{reason}")
}

/// Owns the single-flight guard for one `(cwd, window)` pair's run-corpus
/// refresh (spec §4.6: "a single-flight guard per (cwd, window)").
pub struct RunCorpusStore {
    browser_root: PathBuf,
    window_hours: u64,
    refreshing: Mutex<()>,
}

impl RunCorpusStore {
    pub fn new(browser_root: impl Into<PathBuf>, window_hours: u64) -> Self {
        Self {
            browser_root: browser_root.into(),
            window_hours,
            refreshing: Mutex::new(()),
        }
    }

    fn dir(&self) -> PathBuf {
        self.browser_root.join("run-corpus")
    }

    pub fn latest_path(&self) -> PathBuf {
        self.dir().join("latest.json")
    }

    /// Rebuilds the summary and persists `latest.json` plus a timestamped
    /// snapshot. Concurrent calls serialize on the internal lock rather than
    /// racing each other's writes.
    pub async fn refresh(&self, reason: &str) -> Result<RunCorpusSummary, RunCorpusError> {
        let _guard = self.refreshing.lock().await;
        let now = OffsetDateTime::now_utc();
        let summary = build_summary(&self.browser_root, self.window_hours, now).await?;

        let dir = self.dir();
        atomic_write_json(&dir.join("latest.json"), &summary).await?;
        let slug = slug_for(now, reason);
        atomic_write_json(&dir.join(format!("{slug}.json")), &summary).await?;

        tracing::info!(
            assessed = summary.assessed_session_count,
            regression = summary.regression_session_count,
            %reason,
            "run-corpus refreshed"
        );
        Ok(summary)
    }

    pub async fn read_latest(&self) -> Result<Option<RunCorpusSummary>, RunCorpusError> {
        let path = self.latest_path();
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|source| RunCorpusError::Store(opta_browser_artifacts::StoreError::Serialize {
                    what: "run-corpus/latest.json",
                    source,
                })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RunCorpusError::Io {
                path,
                source: e,
            }),
        }
    }

    pub fn browser_root(&self) -> &Path {
        &self.browser_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refresh_writes_latest_and_slug_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunCorpusStore::new(dir.path(), 24);
        let summary = store.refresh("startup").await.unwrap();
        assert_eq!(summary.assessed_session_count, 0);

        let latest = store.read_latest().await.unwrap().unwrap();
        assert_eq!(latest.window_hours, 24);

        let mut entries = tokio::fs::read_dir(dir.path().join("run-corpus"))
            .await
            .unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        assert!(names.contains(&"latest.json".to_string()));
        assert!(names.iter().any(|n| n.ends_with("-startup.json")));
    }

    #[tokio::test]
    async fn missing_latest_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunCorpusStore::new(dir.path(), 24);
        assert!(store.read_latest().await.unwrap().is_none());
    }
}
