use opta_browser_approval::ApprovalRetention;
use opta_browser_protocol::PolicyConfig;

/// Configuration for one [`crate::Interceptor`] (spec §4.4, §4.9, §5:
/// "Timeouts... Retry backoff is linear (backoffMs × attempt)").
#[derive(Debug, Clone)]
pub struct InterceptorConfig {
    pub policy: PolicyConfig,
    pub max_retries: u32,
    pub linear_backoff_ms: u64,
    pub approval_retention: ApprovalRetention,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            policy: PolicyConfig::default(),
            max_retries: 2,
            linear_backoff_ms: 250,
            approval_retention: ApprovalRetention::default(),
        }
    }
}
