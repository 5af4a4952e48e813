//! Append-only audit trail of gated/approved/denied decisions
//! (`.opta/browser/approval-log.jsonl`).

use std::path::Path;
use std::path::PathBuf;

use opta_browser_protocol::ApprovalEvent;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::fs;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

#[derive(Debug, thiserror::Error)]
pub enum ApprovalLogError {
    #[error("filesystem error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize approval event: {0}")]
    Serialize(#[source] serde_json::Error),
}

fn io_err(path: &Path, source: std::io::Error) -> ApprovalLogError {
    ApprovalLogError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Retention policy applied by [`ApprovalLog::prune`] (spec §4.9).
#[derive(Debug, Clone, Copy)]
pub struct ApprovalRetention {
    pub max_age_days: Option<u64>,
    pub max_entries: Option<usize>,
}

impl Default for ApprovalRetention {
    fn default() -> Self {
        Self {
            max_age_days: Some(90),
            max_entries: Some(5_000),
        }
    }
}

pub struct ApprovalLog {
    path: PathBuf,
}

impl ApprovalLog {
    pub fn new(browser_root: &Path) -> Self {
        Self {
            path: browser_root.join("approval-log.jsonl"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one event, creating the parent directory as needed.
    pub async fn append(&self, event: &ApprovalEvent) -> Result<(), ApprovalLogError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err(parent, e))?;
        }
        let line = serde_json::to_string(event).map_err(ApprovalLogError::Serialize)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| io_err(&self.path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| io_err(&self.path, e))?;
        file.write_all(b"\n")
            .await
            .map_err(|e| io_err(&self.path, e))?;
        file.flush().await.map_err(|e| io_err(&self.path, e))
    }

    /// Reads every well-formed line, in file order. Unlike the step logs, any
    /// malformed line (not just a torn trailing one) is skipped rather than
    /// treated as an error (spec §4.9: "readers tolerate malformed lines").
    pub async fn read_all(&self) -> Result<Vec<ApprovalEvent>, ApprovalLogError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&self.path, e)),
        };

        let mut out = Vec::new();
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ApprovalEvent>(line) {
                Ok(event) => out.push(event),
                Err(source) => {
                    tracing::warn!(path = %self.path.display(), %source, "skipping malformed approval log line");
                }
            }
        }
        Ok(out)
    }

    /// Keeps entries within `max_age_days` of `now`, then truncates to the
    /// newest `max_entries` (spec §4.9). Rewrites the whole file and returns
    /// the number of entries dropped.
    pub async fn prune(
        &self,
        now: OffsetDateTime,
        retention: ApprovalRetention,
    ) -> Result<usize, ApprovalLogError> {
        let mut events = self.read_all().await?;
        let before = events.len();

        if let Some(max_age_days) = retention.max_age_days {
            let cutoff = now - time::Duration::days(max_age_days as i64);
            events.retain(|event| {
                OffsetDateTime::parse(&event.timestamp, &Rfc3339)
                    .map(|ts| ts >= cutoff)
                    .unwrap_or(true)
            });
        }

        if let Some(max_entries) = retention.max_entries {
            if events.len() > max_entries {
                let drop_count = events.len() - max_entries;
                events.drain(0..drop_count);
            }
        }

        let dropped = before - events.len();
        if dropped > 0 {
            self.rewrite(&events).await?;
        }
        Ok(dropped)
    }

    async fn rewrite(&self, events: &[ApprovalEvent]) -> Result<(), ApprovalLogError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err(parent, e))?;
        }
        let pid = std::process::id();
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let tmp_path = self.path.with_extension(format!("jsonl.{pid}.{now}.tmp"));

        let mut body = String::new();
        for event in events {
            let line = serde_json::to_string(event).map_err(ApprovalLogError::Serialize)?;
            body.push_str(&line);
            body.push('\n');
        }

        if let Err(e) = fs::write(&tmp_path, body.as_bytes()).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(io_err(&tmp_path, e));
        }
        if let Err(e) = fs::rename(&tmp_path, &self.path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(io_err(&self.path, e));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opta_browser_protocol::ApprovalDecision;
    use opta_browser_protocol::Risk;

    fn event(timestamp: &str) -> ApprovalEvent {
        ApprovalEvent {
            timestamp: timestamp.to_string(),
            tool: "navigate".to_string(),
            session_id: Some("s1".to_string()),
            decision: ApprovalDecision::Approved,
            risk: Some(Risk::High),
            action_key: Some("auth_submit".to_string()),
            target_host: Some("example.com".to_string()),
            target_origin: Some("https://example.com".to_string()),
            policy_reason: None,
            risk_evidence: None,
        }
    }

    #[tokio::test]
    async fn append_and_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let log = ApprovalLog::new(dir.path());
        log.append(&event("2026-01-01T00:00:00Z")).await.unwrap();
        log.append(&event("2026-01-02T00:00:00Z")).await.unwrap();

        let events = log.read_all().await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].decision, ApprovalDecision::Approved);
    }

    #[tokio::test]
    async fn malformed_line_is_skipped_even_mid_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = ApprovalLog::new(dir.path());
        log.append(&event("2026-01-01T00:00:00Z")).await.unwrap();

        let mut file = OpenOptions::new()
            .append(true)
            .open(log.path())
            .await
            .unwrap();
        file.write_all(b"not json at all\n").await.unwrap();
        file.flush().await.unwrap();

        log.append(&event("2026-01-03T00:00:00Z")).await.unwrap();

        let events = log.read_all().await.unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn prune_drops_old_entries_and_caps_count() {
        let dir = tempfile::tempdir().unwrap();
        let log = ApprovalLog::new(dir.path());
        log.append(&event("2020-01-01T00:00:00Z")).await.unwrap();
        log.append(&event("2026-01-01T00:00:00Z")).await.unwrap();
        log.append(&event("2026-01-02T00:00:00Z")).await.unwrap();

        let now = OffsetDateTime::parse("2026-01-03T00:00:00Z", &Rfc3339).unwrap();
        let dropped = log
            .prune(
                now,
                ApprovalRetention {
                    max_age_days: Some(90),
                    max_entries: Some(1),
                },
            )
            .await
            .unwrap();

        assert_eq!(dropped, 2);
        let remaining = log.read_all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].timestamp, "2026-01-02T00:00:00Z");
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = ApprovalLog::new(dir.path());
        assert!(log.read_all().await.unwrap().is_empty());
    }
}
