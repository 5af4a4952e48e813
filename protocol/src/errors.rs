use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;
use strum_macros::EnumString;

/// Stable error codes surfaced at the boundary (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SessionNotFound,
    SessionExists,
    SessionOpening,
    SessionClosed,
    MaxSessionsReached,
    DaemonStopped,
    DaemonPaused,
    RuntimeUnavailable,
    RuntimeDisabled,
    OpenSessionFailed,
    NavigateFailed,
    ClickFailed,
    TypeFailed,
    SnapshotFailed,
    ScreenshotFailed,
    ActionCancelled,
    PolicyDeny,
    ApprovalRequired,
}

/// Retry taxonomy category (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RetryCategory {
    Policy,
    RuntimeUnavailable,
    SessionState,
    InvalidInput,
    Selector,
    Timeout,
    Network,
    Transient,
    Unknown,
}

/// The error half of an [`crate::ActionResult`] (spec §3, §7).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ActionError {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
    pub retry_category: RetryCategory,
    pub retry_hint: Option<String>,
}

impl ActionError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        let classification = crate_classify_for_code(code);
        Self {
            code,
            message,
            retryable: classification.0,
            retry_category: classification.1,
            retry_hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.retry_hint = Some(hint.into());
        self
    }
}

/// Minimal classification for error codes that never reach the dynamic
/// `opta-browser-retry` classifier (gate errors raised directly by this
/// crate's owners, e.g. the daemon). The full (code, message) taxonomy lives
/// in `opta-browser-retry`; this keeps the gate errors self-consistent even
/// before that crate sees them.
fn crate_classify_for_code(code: ErrorCode) -> (bool, RetryCategory) {
    use ErrorCode::*;
    match code {
        PolicyDeny | ApprovalRequired => (false, RetryCategory::Policy),
        RuntimeUnavailable | DaemonStopped | RuntimeDisabled | ActionCancelled => {
            (false, RetryCategory::RuntimeUnavailable)
        }
        SessionNotFound | SessionClosed | SessionExists | SessionOpening | MaxSessionsReached
        | DaemonPaused => (false, RetryCategory::SessionState),
        OpenSessionFailed | NavigateFailed | ClickFailed | TypeFailed | SnapshotFailed
        | ScreenshotFailed => (false, RetryCategory::Unknown),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::MaxSessionsReached).unwrap();
        assert_eq!(json, "\"MAX_SESSIONS_REACHED\"");
    }

    #[test]
    fn policy_deny_is_not_retryable() {
        let err = ActionError::new(ErrorCode::PolicyDeny, "blocked");
        assert!(!err.retryable);
        assert_eq!(err.retry_category, RetryCategory::Policy);
    }
}
