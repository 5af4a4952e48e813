use serde::Deserialize;
use serde::Serialize;

use crate::policy::Risk;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classifier {
    Static,
    AdaptiveEscalation,
}

/// Why a decision landed where it did (spec §3, §4.3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskEvidence {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifier: Option<Classifier>,
    pub matched_signals: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adaptation_reason: Option<String>,
}

/// One append-only line in `approval-log.jsonl` (spec §3, §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalEvent {
    pub timestamp: String,
    pub tool: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub decision: ApprovalDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<Risk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_evidence: Option<RiskEvidence>,
}
