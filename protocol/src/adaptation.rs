use serde::Deserialize;
use serde::Serialize;

/// The policy-facing half of an [`AdaptationHint`] (spec §3, §4.7).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PolicyAdaptation {
    pub escalate_risk: bool,
}

/// The intent-routing-facing half of an [`AdaptationHint`] (spec §3, §4.7).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IntentAdaptation {
    pub route_penalty: f64,
}

/// Derived directive from the run-corpus that may escalate risk
/// classification and/or penalize intent routing (spec §3, §4.7).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdaptationHint {
    pub enabled: bool,
    pub policy: PolicyAdaptation,
    pub intent: IntentAdaptation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}
