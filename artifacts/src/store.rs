use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;

use opta_browser_protocol::ArtifactKind;
use opta_browser_protocol::ArtifactMetadata;
use opta_browser_protocol::RecordingEntry;
use opta_browser_protocol::SessionMetadata;
use opta_browser_protocol::StepRecord;
use opta_browser_protocol::VisualDiffManifestEntry;
use opta_browser_protocol::VisualDiffResultEntry;
use opta_browser_protocol::now_iso8601;
use tokio::fs;

use crate::atomic::StoreError;
use crate::atomic::atomic_write_bytes;
use crate::atomic::atomic_write_json;
use crate::jsonl;

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Owns the on-disk subtree for one session: `.opta/browser/<sessionId>/`
/// (spec §3, §6). All methods operate on this one directory; cross-session
/// serialization is the caller's job (the per-session write chain in
/// `opta-browser-session`).
#[derive(Debug, Clone)]
pub struct SessionDir {
    dir: PathBuf,
}

impl SessionDir {
    pub fn new(browser_root: &Path, session_id: &str) -> Self {
        Self {
            dir: browser_root.join(session_id),
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join("metadata.json")
    }

    pub fn steps_path(&self) -> PathBuf {
        self.dir.join("steps.jsonl")
    }

    pub fn recordings_path(&self) -> PathBuf {
        self.dir.join("recordings.json")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join("visual-diff-manifest.jsonl")
    }

    pub fn diff_results_path(&self) -> PathBuf {
        self.dir.join("visual-diff-results.jsonl")
    }

    fn artifact_ext(kind: ArtifactKind, content_type_hint: &str) -> &'static str {
        match kind {
            ArtifactKind::Snapshot => "html",
            ArtifactKind::Screenshot if content_type_hint == "jpeg" => "jpg",
            ArtifactKind::Screenshot => "png",
            ArtifactKind::Metadata => "json",
        }
    }

    /// Writes one artifact file as `NNNN-<kind>.<ext>` (spec §6) and returns
    /// its metadata record. `sequence` is zero-padded to 4 digits.
    pub async fn write_artifact(
        &self,
        session_id: &str,
        action_id: &str,
        kind: ArtifactKind,
        sequence: u64,
        bytes: &[u8],
        content_type_hint: &str,
    ) -> Result<ArtifactMetadata, StoreError> {
        let ext = Self::artifact_ext(kind, content_type_hint);
        let kind_name = match kind {
            ArtifactKind::Snapshot => "snapshot",
            ArtifactKind::Screenshot => "screenshot",
            ArtifactKind::Metadata => "metadata",
        };
        let filename = format!("{sequence:04}-{kind_name}.{ext}");
        let absolute_path = self.dir.join(&filename);
        atomic_write_bytes(&absolute_path, bytes).await?;

        let mime_type = mime_guess::from_path(&absolute_path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Ok(ArtifactMetadata {
            id: ArtifactMetadata::make_id(session_id, action_id, kind),
            session_id: session_id.to_string(),
            action_id: action_id.to_string(),
            kind,
            created_at: now_iso8601(),
            relative_path: filename,
            absolute_path: absolute_path.to_string_lossy().to_string(),
            mime_type,
            size_bytes: bytes.len() as u64,
        })
    }

    pub async fn read_artifact_bytes(&self, relative_path: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.dir.join(relative_path);
        fs::read(&path).await.map_err(|e| io_err(&path, e))
    }

    pub async fn artifact_exists(&self, relative_path: &str) -> bool {
        fs::metadata(self.dir.join(relative_path)).await.is_ok()
    }

    pub async fn write_metadata(&self, metadata: &SessionMetadata) -> Result<(), StoreError> {
        atomic_write_json(&self.metadata_path(), metadata).await
    }

    pub async fn read_metadata(&self) -> Result<Option<SessionMetadata>, StoreError> {
        let path = self.metadata_path();
        match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|source| StoreError::Serialize {
                    what: "metadata.json",
                    source,
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    pub async fn append_step(&self, record: &StepRecord) -> Result<(), StoreError> {
        jsonl::append_line(&self.steps_path(), record).await
    }

    pub async fn read_steps(&self) -> Result<Vec<StepRecord>, StoreError> {
        jsonl::read_tolerant(&self.steps_path()).await
    }

    /// Rewrites `recordings.json` as a pretty JSON array sorted by sequence
    /// (spec §3: `RecordingsIndex`).
    pub async fn write_recordings(
        &self,
        recordings: &[RecordingEntry],
    ) -> Result<(), StoreError> {
        let mut sorted = recordings.to_vec();
        sorted.sort_by_key(|r| r.sequence);
        atomic_write_json(&self.recordings_path(), &sorted).await
    }

    pub async fn read_recordings(&self) -> Result<Vec<RecordingEntry>, StoreError> {
        let path = self.recordings_path();
        match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Serialize {
                what: "recordings.json",
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    pub async fn append_manifest_entry(
        &self,
        entry: &VisualDiffManifestEntry,
    ) -> Result<(), StoreError> {
        jsonl::append_line(&self.manifest_path(), entry).await
    }

    pub async fn read_manifest(&self) -> Result<Vec<VisualDiffManifestEntry>, StoreError> {
        jsonl::read_tolerant(&self.manifest_path()).await
    }

    pub async fn append_diff_result(
        &self,
        entry: &VisualDiffResultEntry,
    ) -> Result<(), StoreError> {
        jsonl::append_line(&self.diff_results_path(), entry).await
    }

    pub async fn read_diff_results(&self) -> Result<Vec<VisualDiffResultEntry>, StoreError> {
        jsonl::read_tolerant(&self.diff_results_path()).await
    }
}

/// Result of checking invariants P1-P4 (spec §8) for one session directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantReport {
    pub lengths_equal: bool,
    pub sequences_contiguous: bool,
    pub artifact_sets_equal: bool,
    pub all_artifacts_exist: bool,
    pub recordings_match_steps: bool,
}

impl InvariantReport {
    pub fn all_hold(&self) -> bool {
        self.lengths_equal
            && self.sequences_contiguous
            && self.artifact_sets_equal
            && self.all_artifacts_exist
            && self.recordings_match_steps
    }
}

/// Checks P1-P4 from spec §8 against the current state of `dir`. Intended
/// for tests and health checks, not the hot write path.
pub async fn check_invariants(dir: &SessionDir) -> Result<InvariantReport, StoreError> {
    let steps = dir.read_steps().await?;
    let recordings = dir.read_recordings().await?;
    let manifest = dir.read_manifest().await?;
    let metadata = dir.read_metadata().await?;
    let actions_len = metadata.as_ref().map(|m| m.actions.len()).unwrap_or(0);

    let lengths_equal =
        steps.len() == recordings.len() && steps.len() == manifest.len() && steps.len() == actions_len;

    let mut sorted_steps = steps.clone();
    sorted_steps.sort_by_key(|s| s.sequence);
    let sequences_contiguous = sorted_steps
        .iter()
        .enumerate()
        .all(|(idx, s)| s.sequence == (idx as u64) + 1);

    let step_artifact_ids: BTreeSet<&str> = steps
        .iter()
        .flat_map(|s| s.artifact_ids.iter().map(String::as_str))
        .collect();
    let recording_artifact_ids: BTreeSet<&str> = recordings
        .iter()
        .flat_map(|s| s.artifact_ids.iter().map(String::as_str))
        .collect();
    let manifest_artifact_ids: BTreeSet<&str> = manifest
        .iter()
        .flat_map(|s| s.artifact_ids.iter().map(String::as_str))
        .collect();
    let metadata_artifact_ids: BTreeSet<&str> = metadata
        .as_ref()
        .map(|m| m.artifacts.iter().map(|a| a.id.as_str()).collect())
        .unwrap_or_default();

    let artifact_sets_equal = step_artifact_ids == recording_artifact_ids
        && step_artifact_ids == manifest_artifact_ids
        && step_artifact_ids == metadata_artifact_ids;

    let mut all_artifacts_exist = true;
    if let Some(metadata) = &metadata {
        for artifact in &metadata.artifacts {
            if !dir.artifact_exists(&artifact.relative_path).await {
                all_artifacts_exist = false;
                break;
            }
        }
    }

    let mut sorted_recordings = recordings;
    sorted_recordings.sort_by_key(|r| r.sequence);
    let recordings_match_steps = sorted_recordings == sorted_steps;

    Ok(InvariantReport {
        lengths_equal,
        sequences_contiguous,
        artifact_sets_equal,
        all_artifacts_exist,
        recordings_match_steps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use opta_browser_protocol::ActionType;

    fn step(sequence: u64, artifact_id: &str) -> StepRecord {
        StepRecord {
            sequence,
            session_id: "s1".into(),
            run_id: None,
            action_id: format!("action-{sequence:06}"),
            action_type: ActionType::Navigate,
            timestamp: now_iso8601(),
            ok: true,
            error: None,
            artifact_ids: vec![artifact_id.to_string()],
            artifact_paths: vec!["0001-snapshot.html".to_string()],
        }
    }

    #[tokio::test]
    async fn write_and_read_artifact_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let session_dir = SessionDir::new(dir.path(), "s1");
        let artifact = session_dir
            .write_artifact("s1", "action-000001", ArtifactKind::Snapshot, 1, b"<html/>", "html")
            .await
            .unwrap();
        assert_eq!(artifact.relative_path, "0001-snapshot.html");
        let bytes = session_dir
            .read_artifact_bytes(&artifact.relative_path)
            .await
            .unwrap();
        assert_eq!(bytes, b"<html/>");
    }

    #[tokio::test]
    async fn invariants_hold_on_fresh_directory() {
        let dir = tempfile::tempdir().unwrap();
        let session_dir = SessionDir::new(dir.path(), "s1");
        let report = check_invariants(&session_dir).await.unwrap();
        assert!(report.all_hold());
    }

    #[tokio::test]
    async fn recordings_equal_steps_after_sort() {
        let dir = tempfile::tempdir().unwrap();
        let session_dir = SessionDir::new(dir.path(), "s1");
        let s1 = step(1, "s1:action-000001:snapshot");
        let s2 = step(2, "s1:action-000002:snapshot");
        session_dir.append_step(&s1).await.unwrap();
        session_dir.append_step(&s2).await.unwrap();
        session_dir
            .write_recordings(&[s2.clone(), s1.clone()])
            .await
            .unwrap();

        let recordings = session_dir.read_recordings().await.unwrap();
        assert_eq!(recordings, vec![s1, s2]);
    }
}
