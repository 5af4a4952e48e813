//! The runtime daemon's singleton key (spec §4.6).

use std::path::PathBuf;

use opta_browser_runcorpus::AdaptationConfig;

/// Age/count-bounded retention applied to profile directories and session
/// artifact directories (spec §4.6 periodic work).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetentionPolicy {
    pub max_age_days: Option<u64>,
    pub max_count: Option<usize>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age_days: Some(30),
            max_count: Some(50),
        }
    }
}

/// Everything that identifies one runtime daemon instance. Two configs that
/// compare equal share a singleton; otherwise the shared daemon is stopped
/// and replaced (spec §4.6).
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    pub cwd: PathBuf,
    pub persist_sessions: bool,
    pub persist_profile: bool,
    pub max_sessions: usize,
    pub profile_retention: RetentionPolicy,
    /// `None` disables artifact-directory pruning entirely.
    pub artifact_retention: Option<RetentionPolicy>,
    pub prune_interval_secs: u64,
    pub run_corpus_enabled: bool,
    pub run_corpus_window_hours: u64,
    pub run_corpus_refresh_interval_secs: u64,
    pub adaptation: AdaptationConfig,
}

impl DaemonConfig {
    pub fn browser_root(&self) -> PathBuf {
        self.cwd.join(".opta").join("browser")
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.browser_root().join("profiles")
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            cwd: PathBuf::from("."),
            persist_sessions: true,
            persist_profile: true,
            max_sessions: 10,
            profile_retention: RetentionPolicy::default(),
            artifact_retention: Some(RetentionPolicy::default()),
            prune_interval_secs: 3600,
            run_corpus_enabled: false,
            run_corpus_window_hours: 24,
            run_corpus_refresh_interval_secs: 1800,
            adaptation: AdaptationConfig::default(),
        }
    }
}
