//! MCP Interceptor: the thin per-tool-call pipeline composing the Policy
//! Engine, Approval Log, and retry taxonomy ahead of whatever actually
//! drives the browser (spec §4.4). The interceptor never talks to the
//! Runtime Daemon or Native Session Manager directly — callers inject the
//! actual execution as a thunk, so this crate sits below both in the
//! dependency graph despite being invoked above them at runtime.

mod config;
mod error;
mod hooks;
mod tool;

pub use config::InterceptorConfig;
pub use error::PolicyDenied;
pub use hooks::InterceptorHooks;
pub use hooks::NoopHooks;
pub use tool::BROWSER_TOOL_NAMES;
pub use tool::is_browser_tool;
pub use tool::supports_selector_healing;

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use opta_browser_approval::ApprovalLog;
use opta_browser_approval::ApprovalLogError;
use opta_browser_policy::evaluate;
use opta_browser_policy::resolve_gate_outcome;
use opta_browser_protocol::ActionResult;
use opta_browser_protocol::AdaptationHint;
use opta_browser_protocol::ApprovalDecision;
use opta_browser_protocol::ApprovalEvent;
use opta_browser_protocol::PolicyDecision;
use opta_browser_protocol::PolicyRequest;
use opta_browser_protocol::RetryCategory;
use opta_browser_protocol::RiskDecision;
use opta_browser_protocol::now_iso8601;
use opta_browser_retry::classify_retry;
use time::OffsetDateTime;

/// Composes the policy pipeline, approval logging, and the retry/selector
/// healing loop around one injected execution thunk per call (spec §4.4).
pub struct Interceptor {
    config: InterceptorConfig,
    approval_log: ApprovalLog,
}

impl Interceptor {
    pub fn new(browser_root: &Path, config: InterceptorConfig) -> Self {
        Self {
            approval_log: ApprovalLog::new(browser_root),
            config,
        }
    }

    pub fn config(&self) -> &InterceptorConfig {
        &self.config
    }

    pub fn approval_log(&self) -> &ApprovalLog {
        &self.approval_log
    }

    /// Applies the retention policy to the approval log (spec §4.9). Not
    /// driven by a timer in this crate — the interceptor is a per-call
    /// pipeline, not an orchestrator, so the embedder schedules this the
    /// way it schedules any other periodic maintenance.
    pub async fn prune_approval_log(&self, now: OffsetDateTime) -> Result<usize, ApprovalLogError> {
        self.approval_log
            .prune(now, self.config.approval_retention)
            .await
    }

    /// Runs one tool call through the governed pipeline (spec §4.4).
    ///
    /// `request.tool` outside [`BROWSER_TOOL_NAMES`] bypasses policy, retry,
    /// and approval logging entirely (step 1). Otherwise: evaluate policy
    /// (step 2-3, logging a denied/approved [`ApprovalEvent`] whenever the
    /// decision wasn't a plain allow), then retry `execute` up to
    /// `max_retries` times per the taxonomy (step 4), then run the
    /// selector-healing hook if the exhausted failure was a selector
    /// mismatch on click/type (step 5). The original [`ActionResult`] is
    /// always what's returned on the non-deny path — a best-effort hook
    /// never replaces it (spec §7).
    pub async fn intercept<F, Fut, G, Gut, H>(
        &self,
        session_id: &str,
        mut request: PolicyRequest,
        hint: &AdaptationHint,
        hooks: &H,
        execute: F,
        execute_snapshot: Option<G>,
    ) -> Result<ActionResult, PolicyDenied>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ActionResult>,
        G: Fn() -> Gut,
        Gut: Future<Output = Option<String>>,
        H: InterceptorHooks,
    {
        if !is_browser_tool(&request.tool) {
            return Ok(execute().await);
        }

        request.adaptation_escalate = hint.enabled && hint.policy.escalate_risk;
        request.adaptation_reason = hint.rationale.clone();

        let decision = evaluate(&self.config.policy, &request);
        match decision.decision {
            RiskDecision::Deny => {
                self.log_approval(session_id, &request, &decision, ApprovalDecision::Denied)
                    .await;
                return Err(PolicyDenied(decision));
            }
            RiskDecision::Gate => {
                let callback_result = hooks.on_gate(&request.tool, &decision).await;
                let outcome = resolve_gate_outcome(callback_result);
                self.log_approval(session_id, &request, &decision, outcome)
                    .await;
                if outcome != ApprovalDecision::Approved {
                    return Err(PolicyDenied(decision));
                }
            }
            RiskDecision::Allow => {}
        }

        let mut attempt = 0u32;
        loop {
            let result = execute().await;
            if result.ok {
                hooks.on_browser_event(&request.tool, &result).await;
                return Ok(result);
            }

            let Some(error) = result.error.clone() else {
                return Ok(result);
            };
            let classification = classify_retry(&error.code.to_string(), &error.message);
            let exhausted = !classification.retryable || attempt >= self.config.max_retries;
            if exhausted {
                if classification.category == RetryCategory::Selector
                    && supports_selector_healing(&request.tool)
                {
                    self.run_selector_healing(&request, execute_snapshot.as_ref(), hooks)
                        .await;
                }
                return Ok(result);
            }

            attempt += 1;
            let wait_ms = self.config.linear_backoff_ms.saturating_mul(u64::from(attempt));
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;
        }
    }

    async fn run_selector_healing<G, Gut, H>(
        &self,
        request: &PolicyRequest,
        execute_snapshot: Option<&G>,
        hooks: &H,
    ) where
        G: Fn() -> Gut,
        Gut: Future<Output = Option<String>>,
        H: InterceptorHooks,
    {
        let selector = request
            .args
            .get("selector")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let snapshot = match execute_snapshot {
            Some(thunk) => thunk().await,
            None => None,
        };
        hooks
            .on_selector_fail(&request.tool, selector, snapshot.as_deref())
            .await;
    }

    async fn log_approval(
        &self,
        session_id: &str,
        request: &PolicyRequest,
        decision: &PolicyDecision,
        outcome: ApprovalDecision,
    ) {
        let event = ApprovalEvent {
            timestamp: now_iso8601(),
            tool: request.tool.clone(),
            session_id: Some(session_id.to_string()),
            decision: outcome,
            risk: Some(decision.risk),
            action_key: Some(decision.action_key.clone()),
            target_host: decision.target_host.clone(),
            target_origin: decision.target_origin.clone(),
            policy_reason: Some(decision.reason.clone()),
            risk_evidence: Some(decision.risk_evidence.clone()),
        };
        if let Err(source) = self.approval_log.append(&event).await {
            tracing::warn!(%source, "failed to append approval log event");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    use async_trait::async_trait;
    use opta_browser_protocol::Action;
    use opta_browser_protocol::ActionData;
    use opta_browser_protocol::ActionError;
    use opta_browser_protocol::ActionInput;
    use opta_browser_protocol::ActionType;
    use opta_browser_protocol::ClickInput;
    use opta_browser_protocol::ErrorCode;
    use opta_browser_protocol::HostPattern;
    use opta_browser_protocol::NavigateInput;
    use tokio::sync::Mutex as AsyncMutex;

    use super::*;

    fn navigate_action(session_id: &str, url: &str) -> Action {
        Action {
            id: "a-1".to_string(),
            session_id: session_id.to_string(),
            action_type: ActionType::Navigate,
            created_at: now_iso8601(),
            input: ActionInput::Navigate(NavigateInput {
                url: url.to_string(),
                timeout_ms: None,
                wait_until: None,
            }),
        }
    }

    fn click_action(session_id: &str, selector: &str) -> Action {
        Action {
            id: "a-1".to_string(),
            session_id: session_id.to_string(),
            action_type: ActionType::Click,
            created_at: now_iso8601(),
            input: ActionInput::Click(ClickInput {
                selector: selector.to_string(),
                timeout_ms: None,
            }),
        }
    }

    fn allow_all_config() -> InterceptorConfig {
        InterceptorConfig {
            policy: opta_browser_protocol::PolicyConfig {
                allowed_hosts: vec![HostPattern::Literal("*".to_string())],
                ..Default::default()
            },
            max_retries: 2,
            linear_backoff_ms: 1,
            approval_retention: opta_browser_approval::ApprovalRetention::default(),
        }
    }

    fn navigate_request(tool: &str, url: &str) -> PolicyRequest {
        PolicyRequest {
            tool: tool.to_string(),
            url: Some(url.to_string()),
            ..Default::default()
        }
    }

    #[derive(Default)]
    struct SpyHooks {
        gate_calls: AsyncMutex<u32>,
        gate_answer: Option<ApprovalDecision>,
        browser_events: AsyncMutex<u32>,
        selector_fail_calls: AsyncMutex<Vec<(String, String, Option<String>)>>,
    }

    #[async_trait]
    impl InterceptorHooks for SpyHooks {
        async fn on_gate(&self, _tool: &str, _decision: &PolicyDecision) -> Option<ApprovalDecision> {
            *self.gate_calls.lock().await += 1;
            self.gate_answer
        }

        async fn on_browser_event(&self, _tool: &str, _result: &ActionResult) {
            *self.browser_events.lock().await += 1;
        }

        async fn on_selector_fail(&self, tool: &str, selector: &str, snapshot: Option<&str>) {
            self.selector_fail_calls.lock().await.push((
                tool.to_string(),
                selector.to_string(),
                snapshot.map(str::to_string),
            ));
        }
    }

    #[tokio::test]
    async fn non_browser_tool_bypasses_policy_entirely() {
        let dir = tempfile::tempdir().unwrap();
        let interceptor = Interceptor::new(dir.path(), allow_all_config());
        let request = PolicyRequest {
            tool: "read_file".to_string(),
            ..Default::default()
        };
        let hooks = NoopHooks;
        let hint = AdaptationHint::default();

        let result = interceptor
            .intercept(
                "s1",
                request,
                &hint,
                &hooks,
                || async {
                    ActionResult::success(
                        navigate_action("s1", "https://example.com"),
                        ActionData::None,
                    )
                },
                None::<fn() -> std::future::Ready<Option<String>>>,
            )
            .await;

        assert!(result.is_ok());
        assert!(
            interceptor
                .approval_log()
                .read_all()
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn gated_high_risk_navigate_logs_one_approved_event() {
        let dir = tempfile::tempdir().unwrap();
        let interceptor = Interceptor::new(dir.path(), allow_all_config());
        let request = navigate_request("navigate", "https://example.com/login");
        let hooks = SpyHooks {
            gate_answer: Some(ApprovalDecision::Approved),
            ..Default::default()
        };
        let hint = AdaptationHint::default();

        let result = interceptor
            .intercept(
                "s1",
                request,
                &hint,
                &hooks,
                || async {
                    ActionResult::success(
                        navigate_action("s1", "https://example.com/login"),
                        ActionData::None,
                    )
                },
                None::<fn() -> std::future::Ready<Option<String>>>,
            )
            .await;

        assert!(result.is_ok());
        assert_eq!(*hooks.gate_calls.lock().await, 1);
        let events = interceptor
            .approval_log()
            .read_all()
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].decision, ApprovalDecision::Approved);
        assert_eq!(events[0].session_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn gate_with_no_callback_answer_denies_fail_safe() {
        let dir = tempfile::tempdir().unwrap();
        let interceptor = Interceptor::new(dir.path(), allow_all_config());
        let request = navigate_request("navigate", "https://example.com/login");
        let hooks = SpyHooks::default();
        let hint = AdaptationHint::default();

        let result = interceptor
            .intercept(
                "s1",
                request,
                &hint,
                &hooks,
                || async {
                    ActionResult::success(
                        navigate_action("s1", "https://example.com/login"),
                        ActionData::None,
                    )
                },
                None::<fn() -> std::future::Ready<Option<String>>>,
            )
            .await;

        assert!(matches!(result, Err(PolicyDenied(_))));
        let events = interceptor
            .approval_log()
            .read_all()
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].decision, ApprovalDecision::Denied);
    }

    #[tokio::test]
    async fn deny_decision_never_calls_execute() {
        let dir = tempfile::tempdir().unwrap();
        let config = InterceptorConfig {
            policy: opta_browser_protocol::PolicyConfig {
                allowed_hosts: Vec::new(),
                ..Default::default()
            },
            ..allow_all_config()
        };
        let interceptor = Interceptor::new(dir.path(), config);
        let request = navigate_request("navigate", "https://example.com");
        let hooks = NoopHooks;
        let hint = AdaptationHint::default();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result = interceptor
            .intercept(
                "s1",
                request,
                &hint,
                &hooks,
                move || {
                    let calls = Arc::clone(&calls_clone);
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        ActionResult::success(
                            navigate_action("s1", "https://example.com"),
                            ActionData::None,
                        )
                    }
                },
                None::<fn() -> std::future::Ready<Option<String>>>,
            )
            .await;

        assert!(matches!(result, Err(PolicyDenied(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let dir = tempfile::tempdir().unwrap();
        let interceptor = Interceptor::new(dir.path(), allow_all_config());
        let request = navigate_request("navigate", "https://example.com");
        let hooks = SpyHooks::default();
        let hint = AdaptationHint::default();
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let result = interceptor
            .intercept(
                "s1",
                request,
                &hint,
                &hooks,
                move || {
                    let attempts = Arc::clone(&attempts_clone);
                    async move {
                        let n = attempts.fetch_add(1, Ordering::SeqCst);
                        let action = navigate_action("s1", "https://example.com");
                        if n < 2 {
                            ActionResult::failure(
                                action,
                                ActionError::new(ErrorCode::NavigateFailed, "net::ERR_CONNECTION_RESET"),
                            )
                        } else {
                            ActionResult::success(action, ActionData::None)
                        }
                    }
                },
                None::<fn() -> std::future::Ready<Option<String>>>,
            )
            .await;

        assert!(result.unwrap().ok);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(*hooks.browser_events.lock().await, 1);
    }

    #[tokio::test]
    async fn exhausted_selector_failure_triggers_healing_without_masking_error() {
        let dir = tempfile::tempdir().unwrap();
        let interceptor = Interceptor::new(dir.path(), allow_all_config());
        let request = PolicyRequest {
            tool: "click".to_string(),
            current_origin: Some("https://example.com".to_string()),
            args: [(
                "selector".to_string(),
                serde_json::Value::String("#missing".to_string()),
            )]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        let hooks = SpyHooks::default();
        let hint = AdaptationHint::default();

        let result = interceptor
            .intercept(
                "s1",
                request,
                &hint,
                &hooks,
                || async {
                    ActionResult::failure(
                        click_action("s1", "#missing"),
                        ActionError::new(ErrorCode::ClickFailed, "no node found matching selector"),
                    )
                },
                Some(|| async { Some("<html></html>".to_string()) }),
            )
            .await;

        let result = result.unwrap();
        assert!(!result.ok);
        let healed = hooks.selector_fail_calls.lock().await;
        assert_eq!(healed.len(), 1);
        assert_eq!(healed[0].0, "click");
        assert_eq!(healed[0].1, "#missing");
        assert_eq!(healed[0].2.as_deref(), Some("<html></html>"));
    }
}
