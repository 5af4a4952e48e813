//! The Runtime Daemon: singleton orchestrator composing the Native Session
//! Manager, Session Store, and Run-Corpus Aggregator (spec §4.6).

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use opta_browser_protocol::Action;
use opta_browser_protocol::ActionData;
use opta_browser_protocol::AdaptationHint;
use opta_browser_protocol::ActionError;
use opta_browser_protocol::ActionInput;
use opta_browser_protocol::ActionResult;
use opta_browser_protocol::CancellationToken;
use opta_browser_protocol::ClickInput;
use opta_browser_protocol::ErrorCode;
use opta_browser_protocol::NavigateInput;
use opta_browser_protocol::OpenSessionInput;
use opta_browser_protocol::ScreenshotInput;
use opta_browser_protocol::Session;
use opta_browser_protocol::SessionMode;
use opta_browser_protocol::SessionStatus;
use opta_browser_protocol::SnapshotInput;
use opta_browser_protocol::TypeInput;
use opta_browser_protocol::now_iso8601;
use opta_browser_runcorpus::RESERVED_DIRS;
use opta_browser_runcorpus::RunCorpusStore;
use opta_browser_runcorpus::derive_adaptation_hint;
use opta_browser_session::BrowserDriver;
use opta_browser_session::SessionManager;
use opta_browser_session_store::SessionStore;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::config::DaemonConfig;
use crate::retention::prune_artifacts;
use crate::retention::prune_profiles;
use crate::state::DaemonHealth;
use crate::state::DaemonState;
use crate::state::PruneHealth;
use crate::state::RunCorpusHealth;

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("daemon has been killed and cannot be restarted")]
    Killed,
    #[error("daemon must be running or paused for this operation")]
    NotRunning,
}

struct HealthState {
    last_profile_prune_at: Option<String>,
    last_profile_prune_removed: u64,
    last_artifact_prune_at: Option<String>,
    last_artifact_prune_removed: u64,
    last_run_corpus_refresh_at: Option<String>,
    last_run_corpus_assessed: Option<u64>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            last_profile_prune_at: None,
            last_profile_prune_removed: 0,
            last_artifact_prune_at: None,
            last_artifact_prune_removed: 0,
            last_run_corpus_refresh_at: None,
            last_run_corpus_assessed: None,
        }
    }
}

/// Singleton orchestrator composing the session manager, session store, and
/// run-corpus aggregator behind running/paused/killed gates (spec §4.6).
pub struct RuntimeDaemon {
    config: DaemonConfig,
    manager: SessionManager,
    session_store: SessionStore,
    run_corpus: RunCorpusStore,
    cancellation: CancellationToken,
    state: RwLock<DaemonState>,
    sessions: RwLock<HashMap<String, Session>>,
    pending_opens: Mutex<HashSet<String>>,
    recovered_session_ids: RwLock<HashSet<String>>,
    health: Mutex<HealthState>,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

impl RuntimeDaemon {
    pub fn new(config: DaemonConfig, driver: Arc<dyn BrowserDriver>) -> Arc<Self> {
        let browser_root = config.browser_root();
        let manager = SessionManager::new(browser_root.clone(), driver);
        let session_store = SessionStore::new(&browser_root);
        let run_corpus = RunCorpusStore::new(browser_root, config.run_corpus_window_hours);
        Arc::new(Self {
            config,
            manager,
            session_store,
            run_corpus,
            cancellation: CancellationToken::new(),
            state: RwLock::new(DaemonState::Stopped),
            sessions: RwLock::new(HashMap::new()),
            pending_opens: Mutex::new(HashSet::new()),
            recovered_session_ids: RwLock::new(HashSet::new()),
            health: Mutex::new(HealthState::default()),
            timers: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    // ---- lifecycle -------------------------------------------------

    /// Idempotent: recovers persisted sessions, prunes on startup, refreshes
    /// the run-corpus, and installs periodic timers (spec §4.6).
    pub async fn start(self: &Arc<Self>) -> Result<(), DaemonError> {
        let mut state = self.state.write().await;
        match *state {
            DaemonState::Killed => return Err(DaemonError::Killed),
            DaemonState::Running | DaemonState::Paused => return Ok(()),
            DaemonState::Stopped => {}
        }

        if self.config.persist_sessions {
            self.recover_persisted_sessions().await;
        }
        self.run_startup_pruning().await;
        if self.config.run_corpus_enabled {
            self.refresh_run_corpus("startup").await;
        }

        *state = DaemonState::Running;
        drop(state);
        self.install_timers().await;
        Ok(())
    }

    /// Clears timers; optionally closes every open session; always persists
    /// whatever remains and refreshes the run-corpus with `reason=stop`.
    pub async fn stop(self: &Arc<Self>, close_sessions: bool) {
        self.abort_timers().await;

        if close_sessions {
            let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
            for id in ids {
                let _ = self.manager.close_session(&id).await;
                self.sessions.write().await.remove(&id);
            }
        }
        self.persist_sessions().await;
        if self.config.run_corpus_enabled {
            self.refresh_run_corpus("stop").await;
        }

        let mut state = self.state.write().await;
        if *state != DaemonState::Killed {
            *state = DaemonState::Stopped;
        }
    }

    pub async fn pause(&self) -> Result<(), DaemonError> {
        let mut state = self.state.write().await;
        if *state != DaemonState::Running {
            return Err(DaemonError::NotRunning);
        }
        *state = DaemonState::Paused;
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), DaemonError> {
        let mut state = self.state.write().await;
        if *state != DaemonState::Paused {
            return Err(DaemonError::NotRunning);
        }
        *state = DaemonState::Running;
        Ok(())
    }

    /// Aborts every in-flight operation via the shared cancellation handle,
    /// closes every session, and transitions to `killed`. Terminal.
    pub async fn kill(self: &Arc<Self>) {
        self.cancellation.cancel();
        self.stop(true).await;
        *self.state.write().await = DaemonState::Killed;
    }

    pub async fn state(&self) -> DaemonState {
        *self.state.read().await
    }

    // ---- session operations -----------------------------------------

    pub async fn open_session(&self, mut input: OpenSessionInput) -> ActionResult {
        let session_id = input.session_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        input.session_id = Some(session_id.clone());

        if let Some(code) = self.gate().await {
            return self.gate_error(&session_id, ActionInput::OpenSession(input), code);
        }

        {
            let mut pending = self.pending_opens.lock().await;
            if pending.contains(&session_id) {
                return self.gate_error(
                    &session_id,
                    ActionInput::OpenSession(input),
                    ErrorCode::SessionOpening,
                );
            }
            let active = self.sessions.read().await.len();
            if active + pending.len() >= self.config.max_sessions {
                return self.gate_error(
                    &session_id,
                    ActionInput::OpenSession(input),
                    ErrorCode::MaxSessionsReached,
                );
            }
            pending.insert(session_id.clone());
        }

        let result = self.manager.open_session(input, self.cancellation.clone()).await;
        self.pending_opens.lock().await.remove(&session_id);

        if result.ok {
            if let Some(ActionData::Session(session)) = &result.data {
                self.sessions.write().await.insert(session_id, session.clone());
                self.persist_sessions().await;
            }
        }
        result
    }

    pub async fn close_session(&self, session_id: &str) -> ActionResult {
        if *self.state.read().await == DaemonState::Killed {
            return self.gate_error(
                session_id,
                ActionInput::CloseSession {},
                ErrorCode::DaemonStopped,
            );
        }
        let result = self.manager.close_session(session_id).await;
        if result.ok {
            self.sessions.write().await.remove(session_id);
            self.persist_sessions().await;
        }
        result
    }

    pub async fn navigate(&self, session_id: &str, input: NavigateInput) -> ActionResult {
        if let Some(code) = self.gate().await {
            return self.gate_error(session_id, ActionInput::Navigate(input), code);
        }
        let result = self
            .manager
            .navigate(session_id, input, self.cancellation.clone())
            .await;
        if result.ok {
            self.touch_current_url(session_id, &result.action).await;
        }
        result
    }

    pub async fn click(&self, session_id: &str, input: ClickInput) -> ActionResult {
        if let Some(code) = self.gate().await {
            return self.gate_error(session_id, ActionInput::Click(input), code);
        }
        self.manager.click(session_id, input, self.cancellation.clone()).await
    }

    pub async fn type_action(&self, session_id: &str, input: TypeInput) -> ActionResult {
        if let Some(code) = self.gate().await {
            return self.gate_error(session_id, ActionInput::Type(input), code);
        }
        self.manager
            .type_action(session_id, input, self.cancellation.clone())
            .await
    }

    pub async fn snapshot(&self, session_id: &str, input: SnapshotInput) -> ActionResult {
        if let Some(code) = self.gate().await {
            return self.gate_error(session_id, ActionInput::Snapshot(input), code);
        }
        self.manager.snapshot(session_id, input, self.cancellation.clone()).await
    }

    pub async fn screenshot(&self, session_id: &str, input: ScreenshotInput) -> ActionResult {
        if let Some(code) = self.gate().await {
            return self.gate_error(session_id, ActionInput::Screenshot(input), code);
        }
        self.manager
            .screenshot(session_id, input, self.cancellation.clone())
            .await
    }

    // ---- health --------------------------------------------------------

    pub async fn health(&self) -> DaemonHealth {
        let health = self.health.lock().await;
        DaemonHealth {
            state: self.state().await,
            session_ids: self.sessions.read().await.keys().cloned().collect(),
            recovered_session_ids: self.recovered_session_ids.read().await.iter().cloned().collect(),
            prune: PruneHealth {
                last_profile_prune_at: health.last_profile_prune_at.clone(),
                last_profile_prune_removed: health.last_profile_prune_removed,
                last_artifact_prune_at: health.last_artifact_prune_at.clone(),
                last_artifact_prune_removed: health.last_artifact_prune_removed,
            },
            run_corpus: RunCorpusHealth {
                last_refresh_at: health.last_run_corpus_refresh_at.clone(),
                assessed_session_count: health.last_run_corpus_assessed,
            },
        }
    }

    /// Derives the current adaptation hint from the last-persisted
    /// run-corpus summary (spec §4.7). Callers (normally the interceptor,
    /// ahead of a policy evaluation) get a disabled hint until the first
    /// refresh has run.
    pub async fn adaptation_hint(&self) -> AdaptationHint {
        if !self.config.run_corpus_enabled {
            return AdaptationHint::default();
        }
        match self.run_corpus.read_latest().await {
            Ok(Some(summary)) => derive_adaptation_hint(&summary, &self.config.adaptation),
            Ok(None) => AdaptationHint::default(),
            Err(source) => {
                tracing::warn!(%source, "failed to read run-corpus summary for adaptation hint");
                AdaptationHint::default()
            }
        }
    }

    // ---- internals -------------------------------------------------

    /// `None` means the operation may proceed. `close_session` bypasses this
    /// gate entirely (spec §4.6: "closeSession is still permitted" while paused).
    async fn gate(&self) -> Option<ErrorCode> {
        match *self.state.read().await {
            DaemonState::Killed | DaemonState::Stopped => Some(ErrorCode::DaemonStopped),
            DaemonState::Paused => Some(ErrorCode::DaemonPaused),
            DaemonState::Running => None,
        }
    }

    /// Mints a synthetic action on the manager's shared id counter and
    /// wraps `code` as a failure. These gate errors are raised before the
    /// manager is ever consulted, so they are not written to any session
    /// timeline (the manager is the sole owner of that I/O).
    fn gate_error(&self, session_id: &str, input: ActionInput, code: ErrorCode) -> ActionResult {
        let action: Action = self.manager.mint_action(session_id, input);
        let message = match code {
            ErrorCode::DaemonStopped => "runtime daemon is not running",
            ErrorCode::DaemonPaused => "runtime daemon is paused",
            ErrorCode::SessionOpening => "an open is already in progress for this session id",
            ErrorCode::MaxSessionsReached => "maximum concurrent session count reached",
            _ => "daemon gate rejected the action",
        };
        ActionResult::failure(action, ActionError::new(code, message))
    }

    async fn touch_current_url(&self, session_id: &str, action: &Action) {
        if let ActionInput::Navigate(navigate) = &action.input {
            let mut sessions = self.sessions.write().await;
            if let Some(session) = sessions.get_mut(session_id) {
                session.current_url = Some(navigate.url.clone());
                session.updated_at = now_iso8601();
            }
        }
        self.persist_sessions().await;
    }

    async fn persist_sessions(&self) {
        if !self.config.persist_sessions {
            return;
        }
        let sessions: Vec<Session> = self.sessions.read().await.values().cloned().collect();
        if let Err(err) = self.session_store.replace_sessions(sessions).await {
            tracing::warn!(%err, "failed to persist runtime-sessions.json");
        }
    }

    async fn recover_persisted_sessions(&self) {
        let file = match self.session_store.read().await {
            Ok(f) => f,
            Err(err) => {
                tracing::warn!(%err, "failed to read runtime-sessions.json during recovery");
                return;
            }
        };

        let mut recovered = Vec::new();
        for descriptor in file.sessions.into_iter().filter(|s| s.status == SessionStatus::Open) {
            if recovered.len() >= self.config.max_sessions {
                tracing::warn!(
                    session_id = %descriptor.id,
                    "skipping recovery; max_sessions reached"
                );
                continue;
            }

            let input = OpenSessionInput {
                session_id: Some(descriptor.id.clone()),
                run_id: descriptor.run_id.clone(),
                mode: descriptor.mode,
                ws_endpoint: descriptor.ws_endpoint.clone(),
                headless: true,
                profile_dir: descriptor.profile_dir.clone(),
            };

            let result = self.manager.open_session(input, self.cancellation.clone()).await;
            if !result.ok {
                tracing::warn!(session_id = %descriptor.id, "failed to recover session");
                continue;
            }

            if descriptor.mode == SessionMode::Attach {
                let probe = self
                    .manager
                    .snapshot(&descriptor.id, SnapshotInput {}, self.cancellation.clone())
                    .await;
                if !probe.ok {
                    tracing::warn!(
                        session_id = %descriptor.id,
                        "recovery snapshot probe failed; closing session"
                    );
                    let _ = self.manager.close_session(&descriptor.id).await;
                    continue;
                }
            }

            let mut session = descriptor;
            session.recovered_at = Some(now_iso8601());
            self.recovered_session_ids.write().await.insert(session.id.clone());
            recovered.push(session);
        }

        let mut sessions = self.sessions.write().await;
        for session in recovered {
            sessions.insert(session.id.clone(), session);
        }
        drop(sessions);
        self.persist_sessions().await;
    }

    async fn run_startup_pruning(&self) {
        self.prune_once().await;
    }

    async fn prune_once(&self) {
        let active: HashSet<String> = self.sessions.read().await.keys().cloned().collect();
        let now = OffsetDateTime::now_utc();

        if self.config.persist_profile {
            let removed = prune_profiles(&self.config.profiles_dir(), self.config.profile_retention, &active, now).await;
            let mut health = self.health.lock().await;
            health.last_profile_prune_at = Some(now_iso8601());
            health.last_profile_prune_removed = removed;
        }

        if let Some(retention) = self.config.artifact_retention {
            let mut reserved: Vec<&str> = RESERVED_DIRS.to_vec();
            reserved.push("profiles");
            let removed = prune_artifacts(&self.config.browser_root(), retention, &active, now, &reserved).await;
            let mut health = self.health.lock().await;
            health.last_artifact_prune_at = Some(now_iso8601());
            health.last_artifact_prune_removed = removed;
        }
    }

    async fn refresh_run_corpus(&self, reason: &str) {
        match self.run_corpus.refresh(reason).await {
            Ok(summary) => {
                let mut health = self.health.lock().await;
                health.last_run_corpus_refresh_at = Some(now_iso8601());
                health.last_run_corpus_assessed = Some(summary.assessed_session_count);
            }
            Err(err) => {
                tracing::warn!(%err, %reason, "run-corpus refresh failed");
            }
        }
    }

    async fn install_timers(self: &Arc<Self>) {
        let daemon = Arc::clone(self);
        let prune_interval = self.config.prune_interval_secs.max(1);
        let prune_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(prune_interval));
            interval.tick().await;
            loop {
                interval.tick().await;
                if daemon.state().await != DaemonState::Running {
                    continue;
                }
                daemon.prune_once().await;
            }
        });

        let mut handles = vec![prune_handle];

        if self.config.run_corpus_enabled {
            let daemon = Arc::clone(self);
            let refresh_interval = self.config.run_corpus_refresh_interval_secs.max(1);
            let run_corpus_handle = tokio::spawn(async move {
                let mut interval = tokio::time::interval(std::time::Duration::from_secs(refresh_interval));
                interval.tick().await;
                loop {
                    interval.tick().await;
                    if daemon.state().await != DaemonState::Running {
                        continue;
                    }
                    daemon.refresh_run_corpus("interval").await;
                }
            });
            handles.push(run_corpus_handle);
        }

        self.timers.lock().await.extend(handles);
    }

    async fn abort_timers(&self) {
        let mut handles = self.timers.lock().await;
        for handle in handles.drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use opta_browser_protocol::SessionMode;
    use opta_browser_session::FakeDriver;
    use pretty_assertions::assert_eq;

    use super::*;

    fn config(dir: &std::path::Path) -> DaemonConfig {
        DaemonConfig {
            cwd: dir.to_path_buf(),
            max_sessions: 2,
            run_corpus_enabled: false,
            prune_interval_secs: 3600,
            ..DaemonConfig::default()
        }
    }

    fn isolated_open(id: &str) -> OpenSessionInput {
        OpenSessionInput {
            session_id: Some(id.to_string()),
            run_id: None,
            mode: SessionMode::Isolated,
            ws_endpoint: None,
            headless: true,
            profile_dir: None,
        }
    }

    #[tokio::test]
    async fn b4_max_sessions_reached_then_frees_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = RuntimeDaemon::new(config(dir.path()), Arc::new(FakeDriver::default()));
        daemon.start().await.unwrap();

        assert!(daemon.open_session(isolated_open("x")).await.ok);
        assert!(daemon.open_session(isolated_open("y")).await.ok);

        let z = daemon.open_session(isolated_open("z")).await;
        assert!(!z.ok);
        assert_eq!(z.error.unwrap().code, ErrorCode::MaxSessionsReached);

        assert!(daemon.close_session("y").await.ok);
        assert!(daemon.open_session(isolated_open("z")).await.ok);

        daemon.stop(true).await;
    }

    #[tokio::test]
    async fn paused_rejects_navigate_but_allows_close() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = RuntimeDaemon::new(config(dir.path()), Arc::new(FakeDriver::default()));
        daemon.start().await.unwrap();
        daemon.open_session(isolated_open("x")).await;

        daemon.pause().await.unwrap();

        let nav = daemon
            .navigate(
                "x",
                NavigateInput {
                    url: "https://example.com".to_string(),
                    timeout_ms: None,
                    wait_until: None,
                },
            )
            .await;
        assert!(!nav.ok);
        assert_eq!(nav.error.unwrap().code, ErrorCode::DaemonPaused);

        assert!(daemon.close_session("x").await.ok);
        daemon.stop(true).await;
    }

    #[tokio::test]
    async fn stopped_daemon_rejects_open_session() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = RuntimeDaemon::new(config(dir.path()), Arc::new(FakeDriver::default()));

        let result = daemon.open_session(isolated_open("x")).await;
        assert!(!result.ok);
        assert_eq!(result.error.unwrap().code, ErrorCode::DaemonStopped);
    }

    #[tokio::test]
    async fn recovers_persisted_open_session_on_restart() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Arc::new(FakeDriver::default());

        let first = RuntimeDaemon::new(config(dir.path()), driver.clone());
        first.start().await.unwrap();
        first.open_session(isolated_open("x")).await;
        first.stop(false).await;

        let second = RuntimeDaemon::new(config(dir.path()), driver);
        second.start().await.unwrap();

        let health = second.health().await;
        assert_eq!(health.session_ids, vec!["x".to_string()]);
        assert_eq!(health.recovered_session_ids, vec!["x".to_string()]);

        second.stop(true).await;
    }

    #[tokio::test]
    async fn kill_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = RuntimeDaemon::new(config(dir.path()), Arc::new(FakeDriver::default()));
        daemon.start().await.unwrap();
        daemon.kill().await;

        assert_eq!(daemon.state().await, DaemonState::Killed);
        assert!(matches!(daemon.start().await, Err(DaemonError::Killed)));
    }
}
