use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Metadata,
    Snapshot,
    Screenshot,
}

/// A file produced by an action, owned by the session directory (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub id: String,
    pub session_id: String,
    pub action_id: String,
    pub kind: ArtifactKind,
    pub created_at: String,
    pub relative_path: String,
    pub absolute_path: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

impl ArtifactMetadata {
    pub fn make_id(session_id: &str, action_id: &str, kind: ArtifactKind) -> String {
        let kind_str = match kind {
            ArtifactKind::Metadata => "metadata",
            ArtifactKind::Snapshot => "snapshot",
            ArtifactKind::Screenshot => "screenshot",
        };
        format!("{session_id}:{action_id}:{kind_str}")
    }
}
