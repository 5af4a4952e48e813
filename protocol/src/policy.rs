use std::collections::BTreeMap;
use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

use crate::approval::RiskEvidence;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitiveAction {
    AuthSubmit,
    Post,
    Checkout,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskDecision {
    Allow,
    Gate,
    Deny,
}

/// A host/origin pattern as accepted by `allowedHosts`/`blockedOrigins`
/// (spec §4.3): `*`, `*.host`, a bare host, a URL, or `{ "regex": "…" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HostPattern {
    Regex { regex: String },
    Literal(String),
}

/// Pure configuration consumed by the policy engine (spec §3, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_true")]
    pub require_approval_for_high_risk: bool,
    #[serde(default)]
    pub allowed_hosts: Vec<HostPattern>,
    #[serde(default)]
    pub blocked_origins: Vec<HostPattern>,
    #[serde(default = "default_sensitive_actions")]
    pub sensitive_actions: Vec<SensitiveAction>,
    #[serde(default)]
    pub credential_isolation: bool,
    /// Keyword → sensitive action mapping used for risk escalation
    /// (SPEC_FULL §4.3: resolves the spec's open question on keyword set).
    /// Ordered so "first match wins" is reproducible across two
    /// content-identical configs (spec P6: `evaluate` must be pure).
    #[serde(default = "default_sensitive_keywords")]
    pub sensitive_keywords: BTreeMap<String, SensitiveAction>,
}

fn default_true() -> bool {
    true
}

fn default_sensitive_actions() -> Vec<SensitiveAction> {
    vec![
        SensitiveAction::AuthSubmit,
        SensitiveAction::Post,
        SensitiveAction::Checkout,
        SensitiveAction::Delete,
    ]
}

fn default_sensitive_keywords() -> BTreeMap<String, SensitiveAction> {
    let mut map = BTreeMap::new();
    map.insert("auth".to_string(), SensitiveAction::AuthSubmit);
    map.insert("login".to_string(), SensitiveAction::AuthSubmit);
    map.insert("checkout".to_string(), SensitiveAction::Checkout);
    map.insert("delete".to_string(), SensitiveAction::Delete);
    map.insert("remove".to_string(), SensitiveAction::Delete);
    map.insert("post".to_string(), SensitiveAction::Post);
    map.insert("publish".to_string(), SensitiveAction::Post);
    map.insert("submit".to_string(), SensitiveAction::Post);
    map
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            require_approval_for_high_risk: true,
            allowed_hosts: Vec::new(),
            blocked_origins: Vec::new(),
            sensitive_actions: default_sensitive_actions(),
            credential_isolation: false,
            sensitive_keywords: default_sensitive_keywords(),
        }
    }
}

/// One evaluation call's worth of context (spec §4.3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyRequest {
    pub tool: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub args: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub current_origin: Option<String>,
    #[serde(default)]
    pub current_page_has_credentials: bool,
    #[serde(default)]
    pub pre_approved: bool,
    #[serde(default)]
    pub adaptation_escalate: bool,
    #[serde(default)]
    pub adaptation_reason: Option<String>,
}

/// The result of `evaluate(config, request)` (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub decision: RiskDecision,
    pub risk: Risk,
    pub action_key: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_origin: Option<String>,
    pub risk_evidence: RiskEvidence,
}
