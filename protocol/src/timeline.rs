use serde::Deserialize;
use serde::Serialize;

use crate::action::ActionType;
use crate::errors::ActionError;

/// One append-only line in `steps.jsonl` (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepRecord {
    pub sequence: u64,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub action_id: String,
    pub action_type: ActionType,
    pub timestamp: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionError>,
    pub artifact_ids: Vec<String>,
    pub artifact_paths: Vec<String>,
}

/// Identical shape to [`StepRecord`], persisted as a sorted JSON array
/// (spec §3: `recordings.json`).
pub type RecordingEntry = StepRecord;
