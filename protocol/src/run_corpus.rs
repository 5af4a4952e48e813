use serde::Deserialize;
use serde::Serialize;

/// Per-session row contributed to a [`RunCorpusSummary`] (spec §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCorpusEntry {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub updated_at: String,
    pub step_count: u64,
    pub failure_count: u64,
    pub max_regression_score: f64,
    pub regression_signal_counts: RegressionSignalCounts,
    #[serde(default)]
    pub used_high_risk_tools: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RegressionSignalCounts {
    pub none: u64,
    pub investigate: u64,
    pub regression: u64,
}

/// Rolling summary of recent sessions used to derive adaptation hints
/// (spec §3, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCorpusSummary {
    pub schema_version: u32,
    pub generated_at: String,
    pub window_hours: u64,
    pub assessed_session_count: u64,
    pub regression_session_count: u64,
    pub investigate_session_count: u64,
    pub mean_regression_score: f64,
    pub max_regression_score: f64,
    pub entries: Vec<RunCorpusEntry>,
}
