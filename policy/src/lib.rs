//! Pure risk classification and allow/gate/deny decision for one tool call
//! against page context (spec §4.3). `evaluate` has no side effects: the
//! same `(config, request)` pair always yields the same `PolicyDecision`.

use std::collections::BTreeSet;

use opta_browser_protocol::ApprovalDecision;
use opta_browser_protocol::Classifier;
use opta_browser_protocol::HostPattern;
use opta_browser_protocol::PolicyConfig;
use opta_browser_protocol::PolicyDecision;
use opta_browser_protocol::PolicyRequest;
use opta_browser_protocol::Risk;
use opta_browser_protocol::RiskDecision;
use opta_browser_protocol::RiskEvidence;
use opta_browser_protocol::SensitiveAction;
use regex_lite::Regex;

const INTERACTIVE_TOOLS: &[&str] = &["click", "type", "handle_dialog"];

struct Target {
    /// Host/origin used for allowlist matching. Falls back to
    /// `currentOrigin` for non-URL interactive actions (spec §4.3).
    host: Option<String>,
    origin: Option<String>,
    /// Origin as explicitly stated by the request's own URL, with no
    /// `currentOrigin` fallback. Credential isolation (gate 2c) asks whether
    /// this action is *provably* staying on the current origin; an
    /// interactive action with no URL at all cannot prove that, so it is
    /// treated as crossing origins rather than matching by fallback.
    explicit_origin: Option<String>,
    url_was_present: bool,
    url_was_valid: bool,
}

fn lower_host(host: &str) -> String {
    host.to_ascii_lowercase()
}

fn extract_target(request: &PolicyRequest) -> Target {
    match &request.url {
        Some(raw) => match url::Url::parse(raw) {
            Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => {
                let host = parsed.host_str().map(lower_host);
                let origin = host.as_ref().map(|h| {
                    let port = parsed
                        .port()
                        .map(|p| format!(":{p}"))
                        .unwrap_or_default();
                    format!("{}://{h}{port}", parsed.scheme())
                });
                Target {
                    host,
                    explicit_origin: origin.clone(),
                    origin,
                    url_was_present: true,
                    url_was_valid: true,
                }
            }
            _ => Target {
                host: None,
                origin: None,
                explicit_origin: None,
                url_was_present: true,
                url_was_valid: false,
            },
        },
        None => {
            let origin = request.current_origin.clone();
            let host = origin
                .as_deref()
                .and_then(|o| url::Url::parse(o).ok())
                .and_then(|u| u.host_str().map(lower_host));
            Target {
                host,
                origin,
                explicit_origin: None,
                url_was_present: false,
                url_was_valid: true,
            }
        }
    }
}

fn host_pattern_matches(pattern: &HostPattern, host: &str, origin: Option<&str>) -> bool {
    match pattern {
        HostPattern::Regex { regex } => Regex::new(regex)
            .ok()
            .is_some_and(|re| re.is_match(host) || origin.is_some_and(|o| re.is_match(o))),
        HostPattern::Literal(raw) => {
            let raw = raw.to_ascii_lowercase();
            if raw == "*" {
                return true;
            }
            if let Some(suffix) = raw.strip_prefix("*.") {
                return host == suffix || host.ends_with(&format!(".{suffix}"));
            }
            if raw.starts_with("http://") || raw.starts_with("https://") {
                return url::Url::parse(&raw)
                    .ok()
                    .and_then(|u| u.host_str().map(lower_host))
                    .is_some_and(|h| h == host)
                    || origin.is_some_and(|o| o.eq_ignore_ascii_case(&raw));
            }
            raw == host
        }
    }
}

fn any_pattern_matches(patterns: &[HostPattern], host: &str, origin: Option<&str>) -> bool {
    patterns
        .iter()
        .any(|p| host_pattern_matches(p, host, origin))
}

fn allowed_hosts_is_wildcard(config: &PolicyConfig) -> bool {
    config
        .allowed_hosts
        .iter()
        .any(|p| matches!(p, HostPattern::Literal(s) if s == "*"))
}

/// Scans free-text fields (URL components, click/type args) for configured
/// sensitive keywords; returns the first matching `(keyword, action)` pair.
fn matched_sensitive_keyword<'a>(
    config: &'a PolicyConfig,
    haystacks: &[String],
) -> Option<(&'a str, SensitiveAction)> {
    for haystack in haystacks {
        let lower = haystack.to_ascii_lowercase();
        for (keyword, action) in &config.sensitive_keywords {
            if lower.contains(keyword.as_str()) && config.sensitive_actions.contains(action) {
                return Some((keyword.as_str(), *action));
            }
        }
    }
    None
}

fn action_key_for(action: SensitiveAction) -> &'static str {
    match action {
        SensitiveAction::AuthSubmit => "auth_submit",
        SensitiveAction::Post => "post",
        SensitiveAction::Checkout => "checkout",
        SensitiveAction::Delete => "delete",
    }
}

fn string_args(request: &PolicyRequest) -> Vec<String> {
    request
        .args
        .values()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}

fn url_keyword_haystacks(url: &str) -> Vec<String> {
    url::Url::parse(url)
        .map(|parsed| {
            let mut parts = vec![parsed.path().to_string()];
            if let Some(q) = parsed.query() {
                parts.push(q.to_string());
            }
            if let Some(f) = parsed.fragment() {
                parts.push(f.to_string());
            }
            parts
        })
        .unwrap_or_default()
}

struct Classification {
    risk: Risk,
    action_key: String,
    signals: Vec<String>,
}

fn classify(config: &PolicyConfig, request: &PolicyRequest) -> Classification {
    let mut signals = Vec::new();
    let tool = request.tool.as_str();

    match tool {
        "snapshot" | "screenshot" | "close_session" | "close" => Classification {
            risk: Risk::Low,
            action_key: "observe".to_string(),
            signals,
        },
        "browser_open" | "open_session" => {
            let is_attach = request
                .args
                .get("mode")
                .and_then(|v| v.as_str())
                .is_some_and(|m| m == "attach");
            Classification {
                risk: if is_attach { Risk::Medium } else { Risk::Low },
                action_key: "browser_open".to_string(),
                signals,
            }
        }
        "navigate" => {
            let haystacks = request
                .url
                .as_deref()
                .map(url_keyword_haystacks)
                .unwrap_or_default();
            match matched_sensitive_keyword(config, &haystacks) {
                Some((keyword, action)) => {
                    signals.push(format!("keyword:{keyword}"));
                    Classification {
                        risk: Risk::High,
                        action_key: action_key_for(action).to_string(),
                        signals,
                    }
                }
                None => Classification {
                    risk: Risk::Medium,
                    action_key: "navigate".to_string(),
                    signals,
                },
            }
        }
        "click" | "type" => {
            let submit = tool == "type"
                && request
                    .args
                    .get("submit")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
            if submit && config.sensitive_actions.contains(&SensitiveAction::Post) {
                signals.push("submit:true".to_string());
                return Classification {
                    risk: Risk::High,
                    action_key: action_key_for(SensitiveAction::Post).to_string(),
                    signals,
                };
            }
            let haystacks = string_args(request);
            match matched_sensitive_keyword(config, &haystacks) {
                Some((keyword, action)) => {
                    signals.push(format!("keyword:{keyword}"));
                    Classification {
                        risk: Risk::High,
                        action_key: action_key_for(action).to_string(),
                        signals,
                    }
                }
                None => Classification {
                    risk: Risk::Medium,
                    action_key: tool.to_string(),
                    signals,
                },
            }
        }
        "handle_dialog" => {
            let accept = request
                .args
                .get("accept")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if !accept {
                return Classification {
                    risk: Risk::Low,
                    action_key: "dismiss".to_string(),
                    signals,
                };
            }
            let haystacks = string_args(request);
            match matched_sensitive_keyword(config, &haystacks) {
                Some((keyword, action)) => {
                    signals.push(format!("keyword:{keyword}"));
                    Classification {
                        risk: Risk::High,
                        action_key: action_key_for(action).to_string(),
                        signals,
                    }
                }
                None => Classification {
                    risk: Risk::Medium,
                    action_key: "confirm".to_string(),
                    signals,
                },
            }
        }
        "evaluate" => Classification {
            risk: Risk::High,
            action_key: "js_execution".to_string(),
            signals,
        },
        "file_upload" => Classification {
            risk: Risk::High,
            action_key: "filesystem".to_string(),
            signals,
        },
        "select_option" | "press_key" | "keyboard_type" => {
            let haystacks = string_args(request);
            match matched_sensitive_keyword(config, &haystacks) {
                Some((keyword, action)) => {
                    signals.push(format!("keyword:{keyword}"));
                    Classification {
                        risk: Risk::High,
                        action_key: action_key_for(action).to_string(),
                        signals,
                    }
                }
                None => Classification {
                    risk: Risk::Medium,
                    action_key: tool.to_string(),
                    signals,
                },
            }
        }
        "drag" | "go_back" | "go_forward" | "reload" | "tab_new" | "tab_close" | "tab_select" => {
            Classification {
                risk: Risk::Medium,
                action_key: tool.to_string(),
                signals,
            }
        }
        other => Classification {
            risk: Risk::Medium,
            action_key: other.to_string(),
            signals,
        },
    }
}

fn escalate(risk: Risk) -> Risk {
    match risk {
        Risk::Low => Risk::Medium,
        Risk::Medium | Risk::High => Risk::High,
    }
}

fn is_observe_only(tool: &str) -> bool {
    matches!(tool, "snapshot" | "screenshot" | "close_session" | "close")
}

/// Evaluates one tool call against policy config and page context
/// (spec §4.3). Pure: identical inputs always produce an identical decision.
pub fn evaluate(config: &PolicyConfig, request: &PolicyRequest) -> PolicyDecision {
    let target = extract_target(request);

    // Gate 1: navigate with missing/invalid URL.
    if request.tool == "navigate" && (!target.url_was_present || !target.url_was_valid) {
        return PolicyDecision {
            decision: RiskDecision::Deny,
            risk: Risk::High,
            action_key: "url:invalid".to_string(),
            reason: "url:invalid".to_string(),
            target_host: None,
            target_origin: None,
            risk_evidence: RiskEvidence {
                classifier: Some(Classifier::Static),
                matched_signals: vec!["url:invalid".to_string()],
                adaptation_reason: None,
            },
        };
    }

    if let Some(host) = target.host.clone() {
        if any_pattern_matches(&config.blocked_origins, &host, target.origin.as_deref()) {
            return deny_with_reason(
                "policy:blocked-origin",
                target.host,
                target.origin,
            );
        }
        if !allowed_hosts_is_wildcard(config)
            && !any_pattern_matches(&config.allowed_hosts, &host, target.origin.as_deref())
        {
            return deny_with_reason(
                "policy:allowlist-mismatch",
                target.host,
                target.origin,
            );
        }
        if config.credential_isolation
            && request.current_page_has_credentials
            && target.explicit_origin.as_deref() != request.current_origin.as_deref()
        {
            return deny_with_reason(
                "policy:credential-isolation",
                target.host,
                target.origin,
            );
        }
    } else if INTERACTIVE_TOOLS.contains(&request.tool.as_str())
        && !config.allowed_hosts.is_empty()
        && !allowed_hosts_is_wildcard(config)
    {
        return deny_with_reason("policy:no-origin-for-allowlist", None, None);
    }

    let mut classification = classify(config, request);

    let mut classifier = Classifier::Static;
    let mut adaptation_reason = None;
    if request.adaptation_escalate && !is_observe_only(&request.tool) {
        classification.risk = escalate(classification.risk);
        classifier = Classifier::AdaptiveEscalation;
        adaptation_reason = request.adaptation_reason.clone();
    }

    let decision = if classification.risk == Risk::High
        && config.require_approval_for_high_risk
        && !request.pre_approved
    {
        RiskDecision::Gate
    } else {
        RiskDecision::Allow
    };

    let mut matched_signals: BTreeSet<String> = classification.signals.into_iter().collect();
    if classifier == Classifier::AdaptiveEscalation {
        matched_signals.insert("adaptive:escalated".to_string());
    }

    PolicyDecision {
        decision,
        risk: classification.risk,
        action_key: classification.action_key.clone(),
        reason: classification.action_key,
        target_host: target.host,
        target_origin: target.origin,
        risk_evidence: RiskEvidence {
            classifier: Some(classifier),
            matched_signals: matched_signals.into_iter().collect(),
            adaptation_reason,
        },
    }
}

fn deny_with_reason(
    reason: &str,
    target_host: Option<String>,
    target_origin: Option<String>,
) -> PolicyDecision {
    PolicyDecision {
        decision: RiskDecision::Deny,
        risk: Risk::High,
        action_key: reason.to_string(),
        reason: reason.to_string(),
        target_host,
        target_origin,
        risk_evidence: RiskEvidence {
            classifier: Some(Classifier::Static),
            matched_signals: vec![reason.to_string()],
            adaptation_reason: None,
        },
    }
}

/// Converts an approved-by-gate outcome into the terminal callback decision
/// used by the interceptor (spec §4.4): absent/non-approved implies denied.
pub fn resolve_gate_outcome(callback_result: Option<ApprovalDecision>) -> ApprovalDecision {
    callback_result.unwrap_or(ApprovalDecision::Denied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(allowed_hosts: &[&str]) -> PolicyConfig {
        PolicyConfig {
            allowed_hosts: allowed_hosts
                .iter()
                .map(|h| HostPattern::Literal(h.to_string()))
                .collect(),
            ..PolicyConfig::default()
        }
    }

    fn navigate(url: &str) -> PolicyRequest {
        PolicyRequest {
            tool: "navigate".to_string(),
            url: Some(url.to_string()),
            ..PolicyRequest::default()
        }
    }

    #[test]
    fn s1_gate_on_sensitive_navigate() {
        let cfg = config(&["example.com"]);
        let decision = evaluate(&cfg, &navigate("https://example.com/login"));
        assert_eq!(decision.decision, RiskDecision::Gate);
        assert_eq!(decision.risk, Risk::High);
        assert_eq!(decision.action_key, "auth_submit");
    }

    #[test]
    fn s2_credential_isolation_denies_click_with_no_explicit_target() {
        let mut cfg = config(&["*"]);
        cfg.credential_isolation = true;
        let request = PolicyRequest {
            tool: "click".to_string(),
            url: None,
            current_origin: Some("https://bank.example".to_string()),
            current_page_has_credentials: true,
            args: {
                let mut m = HashMap::new();
                m.insert("selector".to_string(), serde_json::json!("#pay"));
                m
            },
            ..PolicyRequest::default()
        };
        let decision = evaluate(&cfg, &request);
        assert_eq!(decision.decision, RiskDecision::Deny);
        assert!(
            decision
                .risk_evidence
                .matched_signals
                .contains(&"policy:credential-isolation".to_string())
        );
    }

    #[test]
    fn b3_credential_isolation_denies_explicit_cross_origin_navigate() {
        let mut cfg = config(&["*"]);
        cfg.credential_isolation = true;
        let request = PolicyRequest {
            current_origin: Some("https://bank.example".to_string()),
            current_page_has_credentials: true,
            ..navigate("https://other.example")
        };
        let decision = evaluate(&cfg, &request);
        assert_eq!(decision.decision, RiskDecision::Deny);
        assert_eq!(decision.action_key, "policy:credential-isolation");
    }

    #[test]
    fn b1_invalid_url_denies_without_driver_call() {
        let cfg = config(&["*"]);
        let decision = evaluate(&cfg, &navigate("not-a-url"));
        assert_eq!(decision.decision, RiskDecision::Deny);
        assert_eq!(decision.action_key, "url:invalid");
    }

    #[test]
    fn b2_empty_allowlist_denies_url_actions() {
        let cfg = config(&[]);
        let decision = evaluate(&cfg, &navigate("https://example.com"));
        assert_eq!(decision.decision, RiskDecision::Deny);
        assert_eq!(decision.action_key, "policy:allowlist-mismatch");

        let cfg_wild = config(&["*"]);
        let decision = evaluate(&cfg_wild, &navigate("https://example.com"));
        assert_ne!(decision.decision, RiskDecision::Deny);
    }

    #[test]
    fn observe_actions_are_always_low_risk() {
        let cfg = config(&["*"]);
        let request = PolicyRequest {
            tool: "snapshot".to_string(),
            ..PolicyRequest::default()
        };
        let decision = evaluate(&cfg, &request);
        assert_eq!(decision.risk, Risk::Low);
        assert_eq!(decision.decision, RiskDecision::Allow);
    }

    #[test]
    fn adaptive_escalation_raises_medium_to_high_and_gates() {
        let cfg = config(&["*"]);
        let request = PolicyRequest {
            tool: "click".to_string(),
            current_origin: Some("https://example.com".to_string()),
            adaptation_escalate: true,
            adaptation_reason: Some("regression pressure above threshold".to_string()),
            args: {
                let mut m = HashMap::new();
                m.insert("selector".to_string(), serde_json::json!("#add-to-cart"));
                m
            },
            ..PolicyRequest::default()
        };
        let decision = evaluate(&cfg, &request);
        assert_eq!(decision.risk, Risk::High);
        assert_eq!(decision.decision, RiskDecision::Gate);
        assert_eq!(
            decision.risk_evidence.classifier,
            Some(Classifier::AdaptiveEscalation)
        );
    }

    #[test]
    fn p6_purity_same_input_same_decision() {
        let cfg = config(&["example.com"]);
        let request = navigate("https://example.com/checkout");
        let first = evaluate(&cfg, &request);
        let second = evaluate(&cfg, &request);
        assert_eq!(first.decision, second.decision);
        assert_eq!(first.risk, second.risk);
        assert_eq!(first.action_key, second.action_key);
    }
}
