//! Pure classification of `(code, message)` into a retry taxonomy
//! (spec §4.1). No I/O, no clock — the same inputs always return the same
//! classification (spec §8, R1).

use std::sync::OnceLock;

use opta_browser_protocol::RetryCategory;
use regex_lite::Regex;

/// Result of classifying a failed action (spec §4.1, §7).
#[derive(Debug, Clone, PartialEq)]
pub struct RetryClassification {
    pub retryable: bool,
    pub category: RetryCategory,
    pub hint: String,
}

impl RetryClassification {
    fn new(retryable: bool, category: RetryCategory, hint: &str) -> Self {
        Self {
            retryable,
            category,
            hint: hint.to_string(),
        }
    }
}

const POLICY_CODES: &[&str] = &["POLICY_DENY", "APPROVAL_REQUIRED"];
const RUNTIME_UNAVAILABLE_CODES: &[&str] = &[
    "RUNTIME_UNAVAILABLE",
    "DAEMON_STOPPED",
    "RUNTIME_DISABLED",
    "ACTION_CANCELLED",
];
const SESSION_STATE_CODES: &[&str] = &[
    "SESSION_NOT_FOUND",
    "SESSION_CLOSED",
    "SESSION_EXISTS",
    "SESSION_OPENING",
    "MAX_SESSIONS_REACHED",
    "DAEMON_PAUSED",
];

fn invalid_input_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(missing|required).*(url|selector|session ?id)")
            .expect("valid invalid-input regex")
    })
}

fn selector_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(strict mode violation|no node found|not visible|not attached)")
            .expect("valid selector regex")
    })
}

fn timeout_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)timeout").expect("valid timeout regex"))
}

fn network_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(net::err|connection reset|econnreset|econnrefused|dns|socket hang up)")
            .expect("valid network regex")
    })
}

fn transient_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(target closed|page crashed|context closed)")
            .expect("valid transient regex")
    })
}

/// Classify a `(code, message)` pair per the ordered rules in spec §4.1.
pub fn classify_retry(code: &str, message: &str) -> RetryClassification {
    if POLICY_CODES.contains(&code) {
        return RetryClassification::new(false, RetryCategory::Policy, "denied by policy");
    }
    if RUNTIME_UNAVAILABLE_CODES.contains(&code) {
        return RetryClassification::new(
            false,
            RetryCategory::RuntimeUnavailable,
            "runtime is not available",
        );
    }
    if SESSION_STATE_CODES.contains(&code) {
        return RetryClassification::new(
            false,
            RetryCategory::SessionState,
            "session is not in a usable state",
        );
    }
    if invalid_input_re().is_match(message) {
        return RetryClassification::new(
            false,
            RetryCategory::InvalidInput,
            "fix the missing/required input before retrying",
        );
    }
    if selector_re().is_match(message) {
        return RetryClassification::new(
            false,
            RetryCategory::Selector,
            "selector did not resolve; consider selector healing",
        );
    }
    if code.contains("TIMEOUT") || timeout_re().is_match(message) {
        return RetryClassification::new(true, RetryCategory::Timeout, "retry with backoff");
    }
    if network_re().is_match(message) {
        return RetryClassification::new(
            true,
            RetryCategory::Network,
            "retry once connectivity recovers",
        );
    }
    if transient_re().is_match(message) {
        return RetryClassification::new(
            true,
            RetryCategory::Transient,
            "the browser context closed unexpectedly; retry",
        );
    }
    RetryClassification::new(false, RetryCategory::Unknown, "no known recovery")
}

/// True when `category` should trigger the selector-healing hook in the
/// interceptor (spec §4.4 step 5).
pub fn triggers_selector_healing(category: RetryCategory) -> bool {
    category == RetryCategory::Selector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_codes_are_not_retryable() {
        let c = classify_retry("POLICY_DENY", "blocked");
        assert!(!c.retryable);
        assert_eq!(c.category, RetryCategory::Policy);
    }

    #[test]
    fn session_state_codes_are_not_retryable() {
        let c = classify_retry("MAX_SESSIONS_REACHED", "too many sessions");
        assert_eq!(c.category, RetryCategory::SessionState);
        assert!(!c.retryable);
    }

    #[test]
    fn missing_url_is_invalid_input() {
        let c = classify_retry("NAVIGATE_FAILED", "missing required url");
        assert_eq!(c.category, RetryCategory::InvalidInput);
        assert!(!c.retryable);
    }

    #[test]
    fn selector_not_found_triggers_healing() {
        let c = classify_retry("CLICK_FAILED", "Error: no node found for selector");
        assert_eq!(c.category, RetryCategory::Selector);
        assert!(!c.retryable);
        assert!(triggers_selector_healing(c.category));
    }

    #[test]
    fn timeout_is_retryable() {
        let c = classify_retry("NAVIGATE_FAILED", "Timeout 30000ms exceeded");
        assert_eq!(c.category, RetryCategory::Timeout);
        assert!(c.retryable);
    }

    #[test]
    fn network_reset_is_retryable() {
        let c = classify_retry("NAVIGATE_FAILED", "net::ERR_CONNECTION_RESET at https://x");
        assert_eq!(c.category, RetryCategory::Network);
        assert!(c.retryable);
    }

    #[test]
    fn target_closed_is_transient() {
        let c = classify_retry("CLICK_FAILED", "Protocol error: Target closed");
        assert_eq!(c.category, RetryCategory::Transient);
        assert!(c.retryable);
    }

    #[test]
    fn unknown_message_is_unknown_and_not_retryable() {
        let c = classify_retry("CLICK_FAILED", "something unexpected happened");
        assert_eq!(c.category, RetryCategory::Unknown);
        assert!(!c.retryable);
    }

    #[test]
    fn classification_is_pure_and_idempotent() {
        let a = classify_retry("NAVIGATE_FAILED", "net::ERR_CONNECTION_REFUSED");
        let b = classify_retry("NAVIGATE_FAILED", "net::ERR_CONNECTION_REFUSED");
        assert_eq!(a, b);
    }
}
