//! Daemon lifecycle state and the structured health snapshot (spec §4.6).

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonState {
    Stopped,
    Running,
    Paused,
    Killed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PruneHealth {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_profile_prune_at: Option<String>,
    pub last_profile_prune_removed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_artifact_prune_at: Option<String>,
    pub last_artifact_prune_removed: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunCorpusHealth {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refresh_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assessed_session_count: Option<u64>,
}

/// Structured point-in-time view of the daemon (spec §4.6: "Health exposes
/// a structured snapshot").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonHealth {
    pub state: DaemonState,
    pub session_ids: Vec<String>,
    pub recovered_session_ids: Vec<String>,
    pub prune: PruneHealth,
    pub run_corpus: RunCorpusHealth,
}
