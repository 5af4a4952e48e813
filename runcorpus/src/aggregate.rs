//! Scans `.opta/browser/*` and builds a [`RunCorpusSummary`] (spec §4.7).

use std::path::Path;
use std::path::PathBuf;

use opta_browser_approval::ApprovalLog;
use opta_browser_artifacts::SessionDir;
use opta_browser_artifacts::StoreError;
use opta_browser_protocol::ApprovalDecision;
use opta_browser_protocol::RegressionSignalCounts;
use opta_browser_protocol::Risk;
use opta_browser_protocol::RunCorpusEntry;
use opta_browser_protocol::RunCorpusSummary;
use opta_browser_protocol::now_iso8601;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::fs;

/// Top-level directories under `.opta/browser/` that are infrastructure, not
/// session subtrees (spec §4.6, §4.7: "skipping reserved directories").
pub const RESERVED_DIRS: &[&str] = &["profiles", "canary-evidence", "run-corpus"];

#[derive(Debug, thiserror::Error)]
pub enum RunCorpusError {
    #[error("filesystem error scanning {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Approval(#[from] opta_browser_approval::ApprovalLogError),
}

fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339).ok()
}

async fn candidate_session_ids(browser_root: &Path) -> Result<Vec<String>, RunCorpusError> {
    let mut entries = match fs::read_dir(browser_root).await {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(RunCorpusError::Io {
                path: browser_root.to_path_buf(),
                source: e,
            });
        }
    };

    let mut ids = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| RunCorpusError::Io {
        path: browser_root.to_path_buf(),
        source: e,
    })? {
        let file_type = entry.file_type().await.map_err(|e| RunCorpusError::Io {
            path: entry.path(),
            source: e,
        })?;
        if !file_type.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if RESERVED_DIRS.contains(&name.as_str()) {
            continue;
        }
        ids.push(name);
    }
    Ok(ids)
}

/// Builds one [`RunCorpusEntry`] for a session whose metadata was updated
/// within the window, or `None` if the session has no metadata yet or falls
/// outside the window.
async fn build_entry(
    browser_root: &Path,
    session_id: &str,
    cutoff: OffsetDateTime,
    approved_high_risk_tools: &std::collections::HashMap<String, Vec<String>>,
) -> Result<Option<RunCorpusEntry>, RunCorpusError> {
    let dir = SessionDir::new(browser_root, session_id);
    let Some(metadata) = dir.read_metadata().await? else {
        return Ok(None);
    };
    let Some(updated_at) = parse_timestamp(&metadata.updated_at) else {
        return Ok(None);
    };
    if updated_at < cutoff {
        return Ok(None);
    }

    let steps = dir.read_steps().await?;
    let diffs = dir.read_diff_results().await?;

    let step_count = steps.len() as u64;
    let failure_count = steps.iter().filter(|s| !s.ok).count() as u64;

    let mut counts = RegressionSignalCounts::default();
    let mut max_regression_score = 0.0f64;
    for diff in &diffs {
        match diff.regression_signal {
            opta_browser_protocol::RegressionSignal::None => counts.none += 1,
            opta_browser_protocol::RegressionSignal::Investigate => counts.investigate += 1,
            opta_browser_protocol::RegressionSignal::Regression => counts.regression += 1,
        }
        if diff.regression_score > max_regression_score {
            max_regression_score = diff.regression_score;
        }
    }

    let used_high_risk_tools = approved_high_risk_tools
        .get(session_id)
        .cloned()
        .unwrap_or_default();

    Ok(Some(RunCorpusEntry {
        session_id: session_id.to_string(),
        run_id: metadata.run_id,
        updated_at: metadata.updated_at,
        step_count,
        failure_count,
        max_regression_score,
        regression_signal_counts: counts,
        used_high_risk_tools,
    }))
}

/// Maps `sessionId -> [tool, ...]` for approved high-risk (`Risk::High`)
/// approval-log entries, used to annotate run-corpus entries (spec §4.7:
/// "may additionally annotate entries that used high-risk MCP tools, by
/// joining with the approval log").
async fn high_risk_tools_by_session(
    approval_log: &ApprovalLog,
) -> Result<std::collections::HashMap<String, Vec<String>>, RunCorpusError> {
    let events = approval_log.read_all().await?;
    let mut map: std::collections::HashMap<String, Vec<String>> = std::collections::HashMap::new();
    for event in events {
        if event.decision != ApprovalDecision::Approved || event.risk != Some(Risk::High) {
            continue;
        }
        let Some(session_id) = event.session_id else {
            continue;
        };
        let tools = map.entry(session_id).or_default();
        if !tools.contains(&event.tool) {
            tools.push(event.tool);
        }
    }
    Ok(map)
}

/// Rebuilds a [`RunCorpusSummary`] over every session updated within
/// `window_hours` of `now` (spec §4.7). `browser_root` is
/// `.opta/browser` for the daemon's configured `cwd`.
pub async fn build_summary(
    browser_root: &Path,
    window_hours: u64,
    now: OffsetDateTime,
) -> Result<RunCorpusSummary, RunCorpusError> {
    let cutoff = now - time::Duration::hours(window_hours as i64);
    let approval_log = ApprovalLog::new(browser_root);
    let high_risk_tools = high_risk_tools_by_session(&approval_log).await?;

    let session_ids = candidate_session_ids(browser_root).await?;
    let mut entries = Vec::new();
    for session_id in session_ids {
        if let Some(entry) = build_entry(browser_root, &session_id, cutoff, &high_risk_tools).await? {
            entries.push(entry);
        }
    }
    entries.sort_by(|a, b| a.session_id.cmp(&b.session_id));

    let assessed_session_count = entries.len() as u64;
    let regression_session_count = entries
        .iter()
        .filter(|e| e.regression_signal_counts.regression > 0)
        .count() as u64;
    let investigate_session_count = entries
        .iter()
        .filter(|e| e.regression_signal_counts.regression == 0 && e.regression_signal_counts.investigate > 0)
        .count() as u64;
    let mean_regression_score = if entries.is_empty() {
        0.0
    } else {
        entries.iter().map(|e| e.max_regression_score).sum::<f64>() / entries.len() as f64
    };
    let max_regression_score = entries
        .iter()
        .map(|e| e.max_regression_score)
        .fold(0.0, f64::max);

    Ok(RunCorpusSummary {
        schema_version: 1,
        generated_at: now_iso8601(),
        window_hours,
        assessed_session_count,
        regression_session_count,
        investigate_session_count,
        mean_regression_score,
        max_regression_score,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use opta_browser_protocol::ActionType;
    use opta_browser_protocol::RegressionSignal;
    use opta_browser_protocol::Severity;
    use opta_browser_protocol::StepRecord;
    use opta_browser_protocol::VisualDiffResultEntry;
    use opta_browser_protocol::VisualDiffStatus;

    fn step(sequence: u64, ok: bool) -> StepRecord {
        StepRecord {
            sequence,
            session_id: "s1".into(),
            run_id: None,
            action_id: format!("action-{sequence:06}"),
            action_type: ActionType::Navigate,
            timestamp: now_iso8601(),
            ok,
            error: None,
            artifact_ids: Vec::new(),
            artifact_paths: Vec::new(),
        }
    }

    fn diff(regression_score: f64, signal: RegressionSignal) -> VisualDiffResultEntry {
        VisualDiffResultEntry {
            index: 0,
            from_sequence: 1,
            from_action_id: "action-000001".into(),
            from_action_type: ActionType::Navigate,
            to_sequence: 2,
            to_action_id: "action-000002".into(),
            to_action_type: ActionType::Navigate,
            from_screenshot_path: None,
            to_screenshot_path: None,
            status: VisualDiffStatus::Changed,
            changed_byte_ratio: Some(0.5),
            perceptual_diff_score: Some(0.5),
            severity: Severity::High,
            regression_score,
            regression_signal: signal,
        }
    }

    #[tokio::test]
    async fn summary_skips_reserved_dirs_and_stale_sessions() {
        let root = tempfile::tempdir().unwrap();
        let fresh = SessionDir::new(root.path(), "s1");
        let mut metadata = opta_browser_protocol::SessionMetadata {
            schema_version: 1,
            session_id: "s1".into(),
            run_id: None,
            mode: opta_browser_protocol::SessionMode::Isolated,
            status: opta_browser_protocol::SessionStatus::Open,
            runtime: opta_browser_protocol::SessionRuntime::DriverAvailable,
            created_at: now_iso8601(),
            updated_at: now_iso8601(),
            current_url: None,
            ws_endpoint: None,
            profile_dir: None,
            last_error: None,
            artifacts: Vec::new(),
            actions: Vec::new(),
            recovered_at: None,
        };
        fresh.write_metadata(&metadata).await.unwrap();
        fresh.append_step(&step(1, true)).await.unwrap();
        fresh.append_step(&step(2, false)).await.unwrap();
        fresh
            .append_diff_result(&diff(0.8, RegressionSignal::Regression))
            .await
            .unwrap();

        let stale = SessionDir::new(root.path(), "s2");
        metadata.session_id = "s2".into();
        metadata.updated_at = "2000-01-01T00:00:00Z".to_string();
        stale.write_metadata(&metadata).await.unwrap();

        tokio::fs::create_dir_all(root.path().join("run-corpus"))
            .await
            .unwrap();
        tokio::fs::create_dir_all(root.path().join("profiles"))
            .await
            .unwrap();

        let summary = build_summary(root.path(), 24, OffsetDateTime::now_utc())
            .await
            .unwrap();
        assert_eq!(summary.assessed_session_count, 1);
        assert_eq!(summary.entries[0].session_id, "s1");
        assert_eq!(summary.entries[0].failure_count, 1);
        assert_eq!(summary.regression_session_count, 1);
    }
}
