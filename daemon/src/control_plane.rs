//! `BrowserControlPlane`: the single in-process facade an embedder
//! constructs once. It owns the shared daemon handle and exposes the action
//! surface a caller (normally the MCP interceptor) drives (spec §1, §4.6).

use std::sync::Arc;

use opta_browser_protocol::ActionResult;
use opta_browser_protocol::AdaptationHint;
use opta_browser_protocol::ClickInput;
use opta_browser_protocol::NavigateInput;
use opta_browser_protocol::OpenSessionInput;
use opta_browser_protocol::ScreenshotInput;
use opta_browser_protocol::SnapshotInput;
use opta_browser_protocol::TypeInput;
use opta_browser_session::BrowserDriver;

use crate::config::DaemonConfig;
use crate::daemon::DaemonError;
use crate::daemon::RuntimeDaemon;
use crate::state::DaemonHealth;

/// Thin wrapper owning one [`RuntimeDaemon`] handle, obtained from (and
/// released back to) the process-wide singleton registry. Embedders hold
/// one of these for the lifetime of the governed browser surface.
pub struct BrowserControlPlane {
    daemon: Arc<RuntimeDaemon>,
}

impl BrowserControlPlane {
    pub async fn new(config: DaemonConfig, driver: Arc<dyn BrowserDriver>) -> Result<Self, DaemonError> {
        let daemon = crate::shared::get_shared_daemon(config, driver).await?;
        Ok(Self { daemon })
    }

    pub async fn open_session(&self, input: OpenSessionInput) -> ActionResult {
        self.daemon.open_session(input).await
    }

    pub async fn close_session(&self, session_id: &str) -> ActionResult {
        self.daemon.close_session(session_id).await
    }

    pub async fn navigate(&self, session_id: &str, input: NavigateInput) -> ActionResult {
        self.daemon.navigate(session_id, input).await
    }

    pub async fn click(&self, session_id: &str, input: ClickInput) -> ActionResult {
        self.daemon.click(session_id, input).await
    }

    pub async fn type_action(&self, session_id: &str, input: TypeInput) -> ActionResult {
        self.daemon.type_action(session_id, input).await
    }

    pub async fn snapshot(&self, session_id: &str, input: SnapshotInput) -> ActionResult {
        self.daemon.snapshot(session_id, input).await
    }

    pub async fn screenshot(&self, session_id: &str, input: ScreenshotInput) -> ActionResult {
        self.daemon.screenshot(session_id, input).await
    }

    pub async fn pause(&self) -> Result<(), DaemonError> {
        self.daemon.pause().await
    }

    pub async fn resume(&self) -> Result<(), DaemonError> {
        self.daemon.resume().await
    }

    pub async fn kill(&self) {
        self.daemon.kill().await
    }

    pub async fn health(&self) -> DaemonHealth {
        self.daemon.health().await
    }

    pub async fn adaptation_hint(&self) -> AdaptationHint {
        self.daemon.adaptation_hint().await
    }
}
