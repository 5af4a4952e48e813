//! Observability hooks injected at interceptor construction (spec §4.4,
//! §9: "model as optional callback traits/interfaces... callers can pass
//! no-ops").

use async_trait::async_trait;
use opta_browser_protocol::ActionResult;
use opta_browser_protocol::ApprovalDecision;
use opta_browser_protocol::PolicyDecision;

/// Callback surface for one intercepted tool call. Every method has a
/// no-op default, so implementors only override the hooks they care about.
#[async_trait]
pub trait InterceptorHooks: Send + Sync {
    /// Approval callback (spec §6: "absent callback implies denied"). The
    /// default returns `None`, which [`opta_browser_policy::resolve_gate_outcome`]
    /// resolves to denied.
    async fn on_gate(&self, _tool: &str, _decision: &PolicyDecision) -> Option<ApprovalDecision> {
        None
    }

    /// Fires once per successful execution (spec §4.4 step 4).
    async fn on_browser_event(&self, _tool: &str, _result: &ActionResult) {}

    /// Best-effort selector-healing hook (spec §4.4 step 5). `snapshot` is
    /// `None` when the caller supplied no snapshot thunk, or the thunk
    /// itself produced nothing.
    async fn on_selector_fail(&self, _tool: &str, _selector: &str, _snapshot: Option<&str>) {}
}

/// A hooks implementation that does nothing; the default choice for
/// callers with no observability needs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

#[async_trait]
impl InterceptorHooks for NoopHooks {}
