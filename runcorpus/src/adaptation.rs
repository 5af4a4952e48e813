//! Pure derivation of an [`AdaptationHint`] from a [`RunCorpusSummary`]
//! (spec §4.7). Identical inputs always produce an identical hint.

use opta_browser_protocol::AdaptationHint;
use opta_browser_protocol::IntentAdaptation;
use opta_browser_protocol::PolicyAdaptation;
use opta_browser_protocol::RunCorpusSummary;
use serde::Deserialize;
use serde::Serialize;

/// Thresholds and weights controlling adaptation (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdaptationConfig {
    pub enabled: bool,
    pub min_assessed_sessions: u64,
    pub investigate_weight: f64,
    pub regression_pressure_threshold: f64,
    pub mean_regression_score_threshold: f64,
    pub failure_rate_threshold: f64,
    pub intent_route_penalty: f64,
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_assessed_sessions: 5,
            investigate_weight: 0.5,
            regression_pressure_threshold: 0.35,
            mean_regression_score_threshold: 0.5,
            failure_rate_threshold: 0.25,
            intent_route_penalty: 0.25,
        }
    }
}

fn regression_pressure(summary: &RunCorpusSummary, investigate_weight: f64) -> f64 {
    if summary.assessed_session_count == 0 {
        return 0.0;
    }
    (summary.regression_session_count as f64
        + investigate_weight * summary.investigate_session_count as f64)
        / summary.assessed_session_count as f64
}

fn failure_rate(summary: &RunCorpusSummary) -> f64 {
    let total_actions: u64 = summary.entries.iter().map(|e| e.step_count).sum();
    if total_actions == 0 {
        return 0.0;
    }
    let total_failures: u64 = summary.entries.iter().map(|e| e.failure_count).sum();
    total_failures as f64 / total_actions as f64
}

/// Derives an [`AdaptationHint`] from `summary` and `config` (spec §4.7,
/// §8 S6). Pure: the same `(summary, config)` pair always yields the same
/// hint, and `enabled=false` always yields a disabled, non-escalating hint
/// regardless of how bad `summary` looks.
pub fn derive_adaptation_hint(summary: &RunCorpusSummary, config: &AdaptationConfig) -> AdaptationHint {
    if !config.enabled {
        return AdaptationHint {
            enabled: false,
            policy: PolicyAdaptation::default(),
            intent: IntentAdaptation::default(),
            rationale: None,
        };
    }

    let pressure = regression_pressure(summary, config.investigate_weight);
    let failure = failure_rate(summary);

    if summary.assessed_session_count < config.min_assessed_sessions {
        return AdaptationHint {
            enabled: true,
            policy: PolicyAdaptation::default(),
            intent: IntentAdaptation::default(),
            rationale: Some(format!(
                "assessed_session_count {} below minimum {}",
                summary.assessed_session_count, config.min_assessed_sessions
            )),
        };
    }

    let mut reasons = Vec::new();
    if pressure >= config.regression_pressure_threshold {
        reasons.push(format!(
            "regression_pressure {:.3} >= threshold {:.3}",
            pressure, config.regression_pressure_threshold
        ));
    }
    if summary.mean_regression_score >= config.mean_regression_score_threshold {
        reasons.push(format!(
            "mean_regression_score {:.3} >= threshold {:.3}",
            summary.mean_regression_score, config.mean_regression_score_threshold
        ));
    }
    if failure >= config.failure_rate_threshold {
        reasons.push(format!(
            "failure_rate {:.3} >= threshold {:.3}",
            failure, config.failure_rate_threshold
        ));
    }

    if reasons.is_empty() {
        return AdaptationHint {
            enabled: true,
            policy: PolicyAdaptation::default(),
            intent: IntentAdaptation::default(),
            rationale: Some("no threshold exceeded".to_string()),
        };
    }

    AdaptationHint {
        enabled: true,
        policy: PolicyAdaptation { escalate_risk: true },
        intent: IntentAdaptation {
            route_penalty: config.intent_route_penalty,
        },
        rationale: Some(reasons.join("; ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opta_browser_protocol::RunCorpusEntry;

    fn summary_with(regression: u64, investigate: u64, assessed: u64, mean: f64) -> RunCorpusSummary {
        RunCorpusSummary {
            schema_version: 1,
            generated_at: "2026-01-01T00:00:00Z".into(),
            window_hours: 24,
            assessed_session_count: assessed,
            regression_session_count: regression,
            investigate_session_count: investigate,
            mean_regression_score: mean,
            max_regression_score: mean,
            entries: (0..assessed)
                .map(|i| RunCorpusEntry {
                    session_id: format!("s{i}"),
                    run_id: None,
                    updated_at: "2026-01-01T00:00:00Z".into(),
                    step_count: 10,
                    failure_count: 0,
                    max_regression_score: mean,
                    regression_signal_counts: Default::default(),
                    used_high_risk_tools: Vec::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn disabled_never_escalates_regardless_of_summary() {
        let config = AdaptationConfig {
            enabled: false,
            ..AdaptationConfig::default()
        };
        let summary = summary_with(10, 10, 10, 0.9);
        let hint = derive_adaptation_hint(&summary, &config);
        assert!(!hint.enabled);
        assert_eq!(hint.intent.route_penalty, 0.0);
        assert!(!hint.policy.escalate_risk);
    }

    #[test]
    fn s6_enabled_above_threshold_escalates() {
        let config = AdaptationConfig {
            enabled: true,
            min_assessed_sessions: 5,
            regression_pressure_threshold: 0.35,
            ..AdaptationConfig::default()
        };
        // regressionPressure = (3 + 0.5*4) / 10 = 0.5 >= 0.35
        let summary = summary_with(3, 4, 10, 0.1);
        let hint = derive_adaptation_hint(&summary, &config);
        assert!(hint.policy.escalate_risk);
        assert_eq!(hint.intent.route_penalty, config.intent_route_penalty);
    }

    #[test]
    fn below_minimum_assessed_sessions_does_not_escalate() {
        let config = AdaptationConfig::default();
        let summary = summary_with(3, 3, 4, 0.9);
        let hint = derive_adaptation_hint(&summary, &config);
        assert!(hint.enabled);
        assert!(!hint.policy.escalate_risk);
    }

    #[test]
    fn identical_inputs_produce_identical_hint() {
        let config = AdaptationConfig::default();
        let summary = summary_with(3, 4, 10, 0.6);
        let a = derive_adaptation_hint(&summary, &config);
        let b = derive_adaptation_hint(&summary, &config);
        assert_eq!(a.policy.escalate_risk, b.policy.escalate_risk);
        assert_eq!(a.rationale, b.rationale);
    }
}
