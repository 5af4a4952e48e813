use opta_browser_protocol::PolicyDecision;

/// Terminal failure of the interceptor pipeline, distinct from a driver
/// error surfaced inside an [`opta_browser_protocol::ActionResult`] (spec
/// §9: "the interceptor's gate-denied path uses a distinct error variant
/// rather than a general exception").
#[derive(Debug, Clone, thiserror::Error)]
#[error("policy denied tool call: {reason}", reason = self.0.reason)]
pub struct PolicyDenied(pub PolicyDecision);
