//! In-memory managed sessions: driver I/O, artifact emission, cancellation,
//! and the per-session timeline write chain (spec §4.5, §5).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use opta_browser_artifacts::SessionDir;
use opta_browser_artifacts::StoreError;
use opta_browser_protocol::Action;
use opta_browser_protocol::ActionData;
use opta_browser_protocol::ActionError;
use opta_browser_protocol::ActionIdGenerator;
use opta_browser_protocol::ActionInput;
use opta_browser_protocol::ActionResult;
use opta_browser_protocol::ArtifactKind;
use opta_browser_protocol::ArtifactMetadata;
use opta_browser_protocol::CancellationToken;
use opta_browser_protocol::ClickInput;
use opta_browser_protocol::ErrorCode;
use opta_browser_protocol::NavigateInput;
use opta_browser_protocol::OpenSessionInput;
use opta_browser_protocol::ScreenshotInput;
use opta_browser_protocol::ScreenshotKind;
use opta_browser_protocol::SequenceGenerator;
use opta_browser_protocol::Session;
use opta_browser_protocol::SessionMetadata;
use opta_browser_protocol::SessionMode;
use opta_browser_protocol::SessionRuntime;
use opta_browser_protocol::SessionStatus;
use opta_browser_protocol::SnapshotInput;
use opta_browser_protocol::StepRecord;
use opta_browser_protocol::TypeInput;
use opta_browser_protocol::VisualDiffManifestEntry;
use opta_browser_protocol::VisualDiffResultEntry;
use opta_browser_protocol::VisualDiffStatus;
use opta_browser_protocol::now_iso8601;
use tokio::sync::Mutex;
use tokio::sync::RwLock;

use crate::driver::BrowserDriver;
use crate::driver::DriverContext;
use crate::driver::DriverPage;
use crate::driver::LaunchOptions;
use crate::driver::NavigateOptions;
use crate::driver::ScreenshotOptions;

const DEFAULT_NAVIGATE_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_ACTION_TIMEOUT_MS: u64 = 10_000;

/// Injected on every opened context, best-effort (spec §4.5). The concrete
/// overlay implementation lives outside this crate's scope; this marker is
/// enough for a driver to recognize the page as governed.
const OVERLAY_INIT_SCRIPT: &str = "window.__opta_browser_governed__ = true;";

struct ManagedSessionState {
    session: Session,
    dir: SessionDir,
    context: Option<Box<dyn DriverContext>>,
    page: Option<Box<dyn DriverPage>>,
    sequence: SequenceGenerator,
    artifacts: Vec<ArtifactMetadata>,
    actions: Vec<Action>,
    recordings: Vec<StepRecord>,
    last_screenshot: Option<ArtifactMetadata>,
}

/// Owns every open session's driver handles and timeline state (spec §4.5).
/// One instance is shared by a single runtime daemon; concurrent sessions
/// proceed independently, each serialized through its own lock.
pub struct SessionManager {
    browser_root: PathBuf,
    driver: Arc<dyn BrowserDriver>,
    action_ids: ActionIdGenerator,
    sessions: RwLock<HashMap<String, Arc<Mutex<ManagedSessionState>>>>,
}

impl SessionManager {
    pub fn new(browser_root: impl Into<PathBuf>, driver: Arc<dyn BrowserDriver>) -> Self {
        Self {
            browser_root: browser_root.into(),
            driver,
            action_ids: ActionIdGenerator::new(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn is_open(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// Mints an [`Action`] from the manager's shared ID counter without
    /// recording it anywhere. Lets callers above the manager (the runtime
    /// daemon's own gate checks) report failures using the same globally
    /// monotonic action-ID sequence as every manager-issued action.
    pub fn mint_action(&self, session_id: &str, input: ActionInput) -> Action {
        self.new_action(session_id, input)
    }

    fn new_action(&self, session_id: &str, input: ActionInput) -> Action {
        Action {
            id: self.action_ids.next_id(),
            session_id: session_id.to_string(),
            action_type: input.action_type(),
            created_at: now_iso8601(),
            input,
        }
    }

    /// Records a failed gate (SESSION_NOT_FOUND / SESSION_EXISTS /
    /// SESSION_CLOSED / RUNTIME_UNAVAILABLE / OPEN_SESSION_FAILED /
    /// ACTION_CANCELLED before a driver call) to the timeline, per spec
    /// §4.5: "Those gate errors are still recorded to the timeline."
    async fn gate_error(
        &self,
        session_id: &str,
        action: Action,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> ActionResult {
        let error = ActionError::new(code, message);
        let result = ActionResult::failure(action.clone(), error.clone());

        let managed = self.sessions.read().await.get(session_id).cloned();
        match managed {
            Some(state_lock) => {
                let mut state = state_lock.lock().await;
                if let Err(err) = write_timeline(&mut state, action, false, Some(error), Vec::new()).await
                {
                    tracing::warn!(session_id, %err, "failed to persist gate-error timeline");
                }
            }
            None => {
                let dir = SessionDir::new(&self.browser_root, session_id);
                if let Err(err) = write_unmanaged_gate_step(&dir, &action, &error).await {
                    tracing::warn!(session_id, %err, "failed to persist unmanaged gate-error step");
                }
            }
        }

        result
    }

    async fn require_open_session(
        &self,
        session_id: &str,
        action: Action,
    ) -> Result<Arc<Mutex<ManagedSessionState>>, ActionResult> {
        let state_lock = match self.sessions.read().await.get(session_id).cloned() {
            Some(s) => s,
            None => {
                return Err(self
                    .gate_error(session_id, action, ErrorCode::SessionNotFound, "session not found")
                    .await);
            }
        };
        {
            let state = state_lock.lock().await;
            if state.session.status != SessionStatus::Open {
                return Err(self
                    .gate_error(session_id, action, ErrorCode::SessionClosed, "session is closed")
                    .await);
            }
            if state.context.is_none() || state.page.is_none() {
                return Err(self
                    .gate_error(
                        session_id,
                        action,
                        ErrorCode::RuntimeUnavailable,
                        "driver is not available for this session",
                    )
                    .await);
            }
        }
        Ok(state_lock)
    }

    pub async fn open_session(
        &self,
        input: OpenSessionInput,
        cancellation: CancellationToken,
    ) -> ActionResult {
        let session_id = input
            .session_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let action = self.new_action(&session_id, ActionInput::OpenSession(input.clone()));

        if self.sessions.read().await.contains_key(&session_id) {
            return self
                .gate_error(&session_id, action, ErrorCode::SessionExists, "session already open")
                .await;
        }

        if cancellation.is_cancelled() {
            return self
                .gate_error(&session_id, action, ErrorCode::ActionCancelled, "cancelled before open")
                .await;
        }

        let validated_endpoint = if input.mode == SessionMode::Attach {
            match &input.ws_endpoint {
                None => {
                    return self
                        .gate_error(
                            &session_id,
                            action,
                            ErrorCode::OpenSessionFailed,
                            "attach mode requires a wsEndpoint",
                        )
                        .await;
                }
                Some(endpoint) => match validate_attach_endpoint(endpoint) {
                    Ok(valid) => Some(valid),
                    Err(msg) => {
                        return self
                            .gate_error(&session_id, action, ErrorCode::OpenSessionFailed, msg)
                            .await;
                    }
                },
            }
        } else {
            None
        };

        let driver = Arc::clone(&self.driver);
        let mode = input.mode;
        let headless = input.headless;
        let profile_dir = input.profile_dir.clone();

        let open_fut = async move {
            let context = match mode {
                SessionMode::Isolated => {
                    driver
                        .launch(LaunchOptions {
                            headless,
                            profile_dir,
                        })
                        .await?
                }
                SessionMode::Attach => match validated_endpoint {
                    Some(endpoint) => driver.connect(&endpoint).await?,
                    None => {
                        return Err(opta_browser_protocol::BrowserDriverError::new(
                            "OPEN_SESSION_FAILED",
                            "attach mode requires a validated wsEndpoint",
                        ));
                    }
                },
            };
            let page = match mode {
                SessionMode::Isolated => context.new_page().await?,
                SessionMode::Attach => context.first_page().await?,
            };
            if let Err(err) = context.inject_init_script(OVERLAY_INIT_SCRIPT).await {
                tracing::warn!(%err, "init script injection failed; continuing without it");
            }
            Ok((context, page))
        };

        let outcome = tokio::select! {
            res = open_fut => Some(res),
            _ = cancellation.cancelled() => None,
        };

        let (context, page) = match outcome {
            None => {
                return self
                    .gate_error(&session_id, action, ErrorCode::ActionCancelled, "cancelled during open")
                    .await;
            }
            Some(Err(err)) => {
                return self
                    .gate_error(&session_id, action, ErrorCode::OpenSessionFailed, err.message)
                    .await;
            }
            Some(Ok(pair)) => pair,
        };

        let now = now_iso8601();
        let session = Session {
            id: session_id.clone(),
            run_id: input.run_id.clone(),
            mode: input.mode,
            status: SessionStatus::Open,
            runtime: SessionRuntime::DriverAvailable,
            created_at: now.clone(),
            updated_at: now,
            artifacts_dir: self.browser_root.join(&session_id).to_string_lossy().to_string(),
            profile_dir: input.profile_dir.clone(),
            current_url: None,
            ws_endpoint: input.ws_endpoint.clone(),
            last_error: None,
            recovered_at: None,
        };

        let mut state = ManagedSessionState {
            session: session.clone(),
            dir: SessionDir::new(&self.browser_root, &session_id),
            context: Some(context),
            page: Some(page),
            sequence: SequenceGenerator::new(),
            artifacts: Vec::new(),
            actions: Vec::new(),
            recordings: Vec::new(),
            last_screenshot: None,
        };

        let result = ActionResult::success(action.clone(), ActionData::Session(session));
        if let Err(err) = write_timeline(&mut state, action, true, None, Vec::new()).await {
            tracing::warn!(session_id = %session_id, %err, "failed to persist timeline for open_session");
        }

        self.sessions
            .write()
            .await
            .insert(session_id, Arc::new(Mutex::new(state)));
        result
    }

    pub async fn close_session(&self, session_id: &str) -> ActionResult {
        let action = self.new_action(session_id, ActionInput::CloseSession {});
        let state_lock = match self.sessions.write().await.remove(session_id) {
            Some(s) => s,
            None => {
                return self
                    .gate_error(session_id, action, ErrorCode::SessionNotFound, "session not found")
                    .await;
            }
        };
        let mut state = state_lock.lock().await;

        if let Some(context) = state.context.take() {
            if let Err(err) = context.close().await {
                tracing::warn!(session_id, %err, "best-effort context close failed");
            }
        }
        state.page = None;
        state.session.status = SessionStatus::Closed;
        state.session.updated_at = now_iso8601();

        let session = state.session.clone();
        let result = ActionResult::success(action.clone(), ActionData::Session(session));
        if let Err(err) = write_timeline(&mut state, action, true, None, Vec::new()).await {
            tracing::warn!(session_id, %err, "failed to persist timeline for close_session");
        }
        result
    }

    pub async fn navigate(
        &self,
        session_id: &str,
        input: NavigateInput,
        cancellation: CancellationToken,
    ) -> ActionResult {
        let action = self.new_action(session_id, ActionInput::Navigate(input.clone()));
        let state_lock = match self.require_open_session(session_id, action.clone()).await {
            Ok(s) => s,
            Err(result) => return result,
        };
        if cancellation.is_cancelled() {
            return self
                .gate_error(session_id, action, ErrorCode::ActionCancelled, "cancelled before navigate")
                .await;
        }

        let timeout_ms = input.timeout_ms.unwrap_or(DEFAULT_NAVIGATE_TIMEOUT_MS);
        let url = input.url.clone();
        let mut state = state_lock.lock().await;
        let Some(page) = state.page.as_deref() else {
            return self
                .fail_and_record(&mut state, action, ErrorCode::RuntimeUnavailable, "driver not available")
                .await;
        };
        let call = page.goto(
            &url,
            NavigateOptions {
                timeout_ms: Some(timeout_ms),
                wait_until: input.wait_until,
            },
        );

        let outcome = tokio::select! {
            res = call => Some(res),
            _ = cancellation.cancelled() => None,
        };

        match outcome {
            None => {
                self.abort_driver(&mut state, session_id).await;
                self.fail_and_record(&mut state, action, ErrorCode::ActionCancelled, "cancelled during navigate")
                    .await
            }
            Some(Ok(())) => {
                state.session.current_url = Some(url);
                state.session.updated_at = now_iso8601();
                let result = ActionResult::success(action.clone(), ActionData::None);
                if let Err(err) = write_timeline(&mut state, action, true, None, Vec::new()).await {
                    tracing::warn!(session_id, %err, "failed to persist timeline for navigate");
                }
                result
            }
            Some(Err(driver_err)) => {
                self.fail_and_record(&mut state, action, ErrorCode::NavigateFailed, driver_err.message)
                    .await
            }
        }
    }

    pub async fn click(
        &self,
        session_id: &str,
        input: ClickInput,
        cancellation: CancellationToken,
    ) -> ActionResult {
        let action = self.new_action(session_id, ActionInput::Click(input.clone()));
        let state_lock = match self.require_open_session(session_id, action.clone()).await {
            Ok(s) => s,
            Err(result) => return result,
        };
        if cancellation.is_cancelled() {
            return self
                .gate_error(session_id, action, ErrorCode::ActionCancelled, "cancelled before click")
                .await;
        }

        let timeout_ms = input.timeout_ms.unwrap_or(DEFAULT_ACTION_TIMEOUT_MS);
        let mut state = state_lock.lock().await;
        let Some(page) = state.page.as_deref() else {
            return self
                .fail_and_record(&mut state, action, ErrorCode::RuntimeUnavailable, "driver not available")
                .await;
        };
        let call = page.click(&input.selector, timeout_ms);

        let outcome = tokio::select! {
            res = call => Some(res),
            _ = cancellation.cancelled() => None,
        };

        match outcome {
            None => {
                self.abort_driver(&mut state, session_id).await;
                self.fail_and_record(&mut state, action, ErrorCode::ActionCancelled, "cancelled during click")
                    .await
            }
            Some(Ok(())) => {
                state.session.updated_at = now_iso8601();
                let result = ActionResult::success(action.clone(), ActionData::None);
                if let Err(err) = write_timeline(&mut state, action, true, None, Vec::new()).await {
                    tracing::warn!(session_id, %err, "failed to persist timeline for click");
                }
                result
            }
            Some(Err(driver_err)) => {
                self.fail_and_record(&mut state, action, ErrorCode::ClickFailed, driver_err.message)
                    .await
            }
        }
    }

    pub async fn type_action(
        &self,
        session_id: &str,
        input: TypeInput,
        cancellation: CancellationToken,
    ) -> ActionResult {
        let action = self.new_action(session_id, ActionInput::Type(input.clone()));
        let state_lock = match self.require_open_session(session_id, action.clone()).await {
            Ok(s) => s,
            Err(result) => return result,
        };
        if cancellation.is_cancelled() {
            return self
                .gate_error(session_id, action, ErrorCode::ActionCancelled, "cancelled before type")
                .await;
        }

        let timeout_ms = input.timeout_ms.unwrap_or(DEFAULT_ACTION_TIMEOUT_MS);
        let mut state = state_lock.lock().await;
        let Some(page) = state.page.as_deref() else {
            return self
                .fail_and_record(&mut state, action, ErrorCode::RuntimeUnavailable, "driver not available")
                .await;
        };
        let call = page.type_text(&input.selector, &input.text, timeout_ms);

        let outcome = tokio::select! {
            res = call => Some(res),
            _ = cancellation.cancelled() => None,
        };

        match outcome {
            None => {
                self.abort_driver(&mut state, session_id).await;
                self.fail_and_record(&mut state, action, ErrorCode::ActionCancelled, "cancelled during type")
                    .await
            }
            Some(Ok(())) => {
                state.session.updated_at = now_iso8601();
                let result = ActionResult::success(action.clone(), ActionData::None);
                if let Err(err) = write_timeline(&mut state, action, true, None, Vec::new()).await {
                    tracing::warn!(session_id, %err, "failed to persist timeline for type");
                }
                result
            }
            Some(Err(driver_err)) => {
                self.fail_and_record(&mut state, action, ErrorCode::TypeFailed, driver_err.message)
                    .await
            }
        }
    }

    pub async fn snapshot(
        &self,
        session_id: &str,
        input: SnapshotInput,
        cancellation: CancellationToken,
    ) -> ActionResult {
        let action = self.new_action(session_id, ActionInput::Snapshot(input));
        let state_lock = match self.require_open_session(session_id, action.clone()).await {
            Ok(s) => s,
            Err(result) => return result,
        };
        if cancellation.is_cancelled() {
            return self
                .gate_error(session_id, action, ErrorCode::ActionCancelled, "cancelled before snapshot")
                .await;
        }

        let mut state = state_lock.lock().await;
        let Some(page) = state.page.as_deref() else {
            return self
                .fail_and_record(&mut state, action, ErrorCode::RuntimeUnavailable, "driver not available")
                .await;
        };
        let call = page.content();

        let outcome = tokio::select! {
            res = call => Some(res),
            _ = cancellation.cancelled() => None,
        };

        match outcome {
            None => {
                self.abort_driver(&mut state, session_id).await;
                self.fail_and_record(&mut state, action, ErrorCode::ActionCancelled, "cancelled during snapshot")
                    .await
            }
            Some(Ok(html)) => {
                let sequence_hint = state.sequence.current();
                let action_id = action.id.clone();
                let artifact = match state
                    .dir
                    .write_artifact(
                        session_id,
                        &action_id,
                        ArtifactKind::Snapshot,
                        sequence_hint,
                        html.as_bytes(),
                        "html",
                    )
                    .await
                {
                    Ok(a) => a,
                    Err(err) => {
                        return self
                            .fail_and_record(
                                &mut state,
                                action,
                                ErrorCode::SnapshotFailed,
                                format!("failed to persist snapshot artifact: {err}"),
                            )
                            .await;
                    }
                };
                state.session.updated_at = now_iso8601();
                let html_len = html.len();
                let result = ActionResult::success(
                    action.clone(),
                    ActionData::Snapshot {
                        artifact_id: artifact.id.clone(),
                        html_len,
                    },
                );
                if let Err(err) = write_timeline(&mut state, action, true, None, vec![artifact]).await {
                    tracing::warn!(session_id, %err, "failed to persist timeline for snapshot");
                }
                result
            }
            Some(Err(driver_err)) => {
                self.fail_and_record(&mut state, action, ErrorCode::SnapshotFailed, driver_err.message)
                    .await
            }
        }
    }

    pub async fn screenshot(
        &self,
        session_id: &str,
        input: ScreenshotInput,
        cancellation: CancellationToken,
    ) -> ActionResult {
        let action = self.new_action(session_id, ActionInput::Screenshot(input.clone()));
        let state_lock = match self.require_open_session(session_id, action.clone()).await {
            Ok(s) => s,
            Err(result) => return result,
        };
        if cancellation.is_cancelled() {
            return self
                .gate_error(session_id, action, ErrorCode::ActionCancelled, "cancelled before screenshot")
                .await;
        }

        let opts = ScreenshotOptions {
            full_page: input.full_page,
            kind: input.kind,
            quality: input.quality,
        };
        let mut state = state_lock.lock().await;
        let Some(page) = state.page.as_deref() else {
            return self
                .fail_and_record(&mut state, action, ErrorCode::RuntimeUnavailable, "driver not available")
                .await;
        };
        let call = page.screenshot(opts);

        let outcome = tokio::select! {
            res = call => Some(res),
            _ = cancellation.cancelled() => None,
        };

        match outcome {
            None => {
                self.abort_driver(&mut state, session_id).await;
                self.fail_and_record(
                    &mut state,
                    action,
                    ErrorCode::ActionCancelled,
                    "cancelled during screenshot",
                )
                .await
            }
            Some(Ok(bytes)) => {
                let sequence_hint = state.sequence.current();
                let action_id = action.id.clone();
                let hint = match input.kind {
                    ScreenshotKind::Jpeg => "jpeg",
                    ScreenshotKind::Png => "png",
                };
                let artifact = match state
                    .dir
                    .write_artifact(
                        session_id,
                        &action_id,
                        ArtifactKind::Screenshot,
                        sequence_hint,
                        &bytes,
                        hint,
                    )
                    .await
                {
                    Ok(a) => a,
                    Err(err) => {
                        return self
                            .fail_and_record(
                                &mut state,
                                action,
                                ErrorCode::ScreenshotFailed,
                                format!("failed to persist screenshot artifact: {err}"),
                            )
                            .await;
                    }
                };
                state.session.updated_at = now_iso8601();
                let size_bytes = artifact.size_bytes;
                let result = ActionResult::success(
                    action.clone(),
                    ActionData::Screenshot {
                        artifact_id: artifact.id.clone(),
                        size_bytes,
                    },
                );
                if let Err(err) = write_timeline(&mut state, action, true, None, vec![artifact]).await {
                    tracing::warn!(session_id, %err, "failed to persist timeline for screenshot");
                }
                result
            }
            Some(Err(driver_err)) => {
                self.fail_and_record(&mut state, action, ErrorCode::ScreenshotFailed, driver_err.message)
                    .await
            }
        }
    }

    /// Best-effort driver teardown after a cancellation wins the race
    /// against an in-flight call (spec §5: "cancellation never leaks
    /// driver handles").
    async fn abort_driver(&self, state: &mut ManagedSessionState, session_id: &str) {
        if let Some(context) = state.context.take() {
            if let Err(err) = context.close().await {
                tracing::warn!(session_id, %err, "best-effort context close after cancellation failed");
            }
        }
        state.page = None;
        state.session.runtime = SessionRuntime::Unavailable;
    }

    async fn fail_and_record(
        &self,
        state: &mut ManagedSessionState,
        action: Action,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> ActionResult {
        let message = message.into();
        let classification = opta_browser_retry::classify_retry(&code.to_string(), &message);
        let error = ActionError {
            code,
            message,
            retryable: classification.retryable,
            retry_category: classification.category,
            retry_hint: Some(classification.hint),
        };
        let result = ActionResult::failure(action.clone(), error.clone());
        if let Err(err) = write_timeline(state, action, false, Some(error), Vec::new()).await {
            tracing::warn!(%err, "failed to persist timeline for failed action");
        }
        result
    }
}

/// Validates an attach-mode endpoint per spec §4.5/§6: ws/wss scheme,
/// loopback host only.
fn validate_attach_endpoint(endpoint: &str) -> Result<String, String> {
    let parsed = url::Url::parse(endpoint).map_err(|e| format!("invalid wsEndpoint: {e}"))?;
    match parsed.scheme() {
        "ws" | "wss" => {}
        other => return Err(format!("wsEndpoint scheme must be ws or wss, got {other}")),
    }
    let host = parsed.host_str().unwrap_or_default();
    if host != "localhost" && host != "127.0.0.1" && host != "::1" {
        return Err(format!("wsEndpoint host must be loopback, got {host}"));
    }
    Ok(endpoint.to_string())
}

/// The per-session append-only write chain run after every operation, pass
/// or fail (spec §4.5, §5): steps.jsonl, recordings.json, metadata.json,
/// visual-diff-manifest.jsonl, and — if a previous step exists — a
/// visual-diff-results.jsonl entry comparing the most recent screenshot on
/// each side.
async fn write_timeline(
    state: &mut ManagedSessionState,
    action: Action,
    ok: bool,
    error: Option<ActionError>,
    new_artifacts: Vec<ArtifactMetadata>,
) -> Result<(), StoreError> {
    let previous_step = state.recordings.last().cloned();
    let sequence = state.sequence.next_sequence();

    let artifact_ids: Vec<String> = new_artifacts.iter().map(|a| a.id.clone()).collect();
    let artifact_paths: Vec<String> = new_artifacts.iter().map(|a| a.relative_path.clone()).collect();

    let step = StepRecord {
        sequence,
        session_id: state.session.id.clone(),
        run_id: state.session.run_id.clone(),
        action_id: action.id.clone(),
        action_type: action.action_type,
        timestamp: now_iso8601(),
        ok,
        error,
        artifact_ids: artifact_ids.clone(),
        artifact_paths: artifact_paths.clone(),
    };

    state.actions.push(action);
    state.artifacts.extend(new_artifacts.iter().cloned());
    state.recordings.push(step.clone());

    let mut metadata = SessionMetadata::from_session(&state.session);
    metadata.artifacts = state.artifacts.clone();
    metadata.actions = state.actions.clone();

    state.dir.write_metadata(&metadata).await?;
    state.dir.write_recordings(&state.recordings).await?;
    state.dir.append_step(&step).await?;

    let manifest_entry = VisualDiffManifestEntry {
        schema_version: 1,
        session_id: step.session_id.clone(),
        run_id: step.run_id.clone(),
        sequence,
        action_id: step.action_id.clone(),
        action_type: step.action_type,
        timestamp: step.timestamp.clone(),
        status: VisualDiffStatus::Pending,
        artifact_ids,
        artifact_paths,
    };
    state.dir.append_manifest_entry(&manifest_entry).await?;

    let from_screenshot = state.last_screenshot.clone();
    let to_screenshot = new_artifacts
        .into_iter()
        .find(|a| a.kind == ArtifactKind::Screenshot)
        .or_else(|| from_screenshot.clone());
    state.last_screenshot = to_screenshot.clone();

    if let Some(previous) = previous_step {
        let from_bytes = match &from_screenshot {
            Some(a) => state.dir.read_artifact_bytes(&a.relative_path).await.ok(),
            None => None,
        };
        let to_bytes = match &to_screenshot {
            Some(a) => state.dir.read_artifact_bytes(&a.relative_path).await.ok(),
            None => None,
        };

        let assessment = opta_browser_visualdiff::assess(from_bytes.as_deref(), to_bytes.as_deref());
        let result_entry = VisualDiffResultEntry {
            index: sequence - 2,
            from_sequence: previous.sequence,
            from_action_id: previous.action_id,
            from_action_type: previous.action_type,
            to_sequence: sequence,
            to_action_id: step.action_id,
            to_action_type: step.action_type,
            from_screenshot_path: from_screenshot.map(|a| a.relative_path),
            to_screenshot_path: to_screenshot.map(|a| a.relative_path),
            status: assessment.status,
            changed_byte_ratio: assessment.changed_byte_ratio,
            perceptual_diff_score: assessment.perceptual_diff_score,
            severity: assessment.severity,
            regression_score: assessment.regression_score,
            regression_signal: assessment.regression_signal,
        };
        state.dir.append_diff_result(&result_entry).await?;
    }

    Ok(())
}

/// SESSION_NOT_FOUND (and similar pre-session gates) still get a step
/// recorded, even though no managed descriptor was ever created. Only the
/// append-only logs are touched: there is no in-memory `SessionMetadata` /
/// `RecordingsIndex` to rewrite around a session that was never opened.
async fn write_unmanaged_gate_step(
    dir: &SessionDir,
    action: &Action,
    error: &ActionError,
) -> Result<(), StoreError> {
    let sequence = dir.read_steps().await?.len() as u64 + 1;
    let step = StepRecord {
        sequence,
        session_id: action.session_id.clone(),
        run_id: None,
        action_id: action.id.clone(),
        action_type: action.action_type,
        timestamp: now_iso8601(),
        ok: false,
        error: Some(error.clone()),
        artifact_ids: Vec::new(),
        artifact_paths: Vec::new(),
    };
    dir.append_step(&step).await?;

    let manifest_entry = VisualDiffManifestEntry {
        schema_version: 1,
        session_id: step.session_id.clone(),
        run_id: None,
        sequence,
        action_id: step.action_id.clone(),
        action_type: step.action_type,
        timestamp: step.timestamp.clone(),
        status: VisualDiffStatus::Pending,
        artifact_ids: Vec::new(),
        artifact_paths: Vec::new(),
    };
    dir.append_manifest_entry(&manifest_entry).await
}
