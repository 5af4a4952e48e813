use serde::Deserialize;
use serde::Serialize;

use crate::action::ActionType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualDiffStatus {
    Pending,
    Changed,
    Unchanged,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressionSignal {
    None,
    Investigate,
    Regression,
}

/// One per-step placeholder line in `visual-diff-manifest.jsonl` (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisualDiffManifestEntry {
    pub schema_version: u32,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub sequence: u64,
    pub action_id: String,
    pub action_type: ActionType,
    pub timestamp: String,
    pub status: VisualDiffStatus,
    pub artifact_ids: Vec<String>,
    pub artifact_paths: Vec<String>,
}

/// One computed (previous, current) screenshot comparison (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisualDiffResultEntry {
    pub index: u64,
    pub from_sequence: u64,
    pub from_action_id: String,
    pub from_action_type: ActionType,
    pub to_sequence: u64,
    pub to_action_id: String,
    pub to_action_type: ActionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_screenshot_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_screenshot_path: Option<String>,
    pub status: VisualDiffStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed_byte_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perceptual_diff_score: Option<f64>,
    pub severity: Severity,
    pub regression_score: f64,
    pub regression_signal: RegressionSignal,
}
