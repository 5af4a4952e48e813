//! Process-wide singleton accessor (spec §4.6, §4.10:
//! "getSharedDaemon() replaces the current instance only after stopping it").

use std::sync::Arc;
use std::sync::OnceLock;

use opta_browser_session::BrowserDriver;
use tokio::sync::Mutex as AsyncMutex;

use crate::config::DaemonConfig;
use crate::daemon::DaemonError;
use crate::daemon::RuntimeDaemon;

static SHARED: OnceLock<AsyncMutex<Option<Arc<RuntimeDaemon>>>> = OnceLock::new();

fn slot() -> &'static AsyncMutex<Option<Arc<RuntimeDaemon>>> {
    SHARED.get_or_init(|| AsyncMutex::new(None))
}

/// Returns the process-wide daemon for `config`, constructing (and
/// starting) one if none exists yet, or if the existing one was built with
/// a different config. Replacing always stops the old instance first with
/// `closeSessions=true`.
pub async fn get_shared_daemon(
    config: DaemonConfig,
    driver: Arc<dyn BrowserDriver>,
) -> Result<Arc<RuntimeDaemon>, DaemonError> {
    let mut guard = slot().lock().await;

    if let Some(existing) = guard.as_ref() {
        if existing.config() == &config {
            return Ok(Arc::clone(existing));
        }
        existing.stop(true).await;
    }

    let daemon = RuntimeDaemon::new(config, driver);
    daemon.start().await?;
    *guard = Some(Arc::clone(&daemon));
    Ok(daemon)
}

/// Stops and clears the process-wide daemon, if one exists. Intended for
/// clean shutdown paths (tests, process exit hooks).
pub async fn clear_shared_daemon(close_sessions: bool) {
    let mut guard = slot().lock().await;
    if let Some(daemon) = guard.take() {
        daemon.stop(close_sessions).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opta_browser_session::FakeDriver;

    #[tokio::test]
    async fn same_config_returns_same_instance() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaemonConfig {
            cwd: dir.path().to_path_buf(),
            persist_sessions: false,
            ..DaemonConfig::default()
        };
        let driver = Arc::new(FakeDriver::default());

        let a = get_shared_daemon(config.clone(), driver.clone()).await.unwrap();
        let b = get_shared_daemon(config, driver).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        clear_shared_daemon(true).await;
    }

    #[tokio::test]
    async fn differing_config_replaces_instance() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Arc::new(FakeDriver::default());

        let config_a = DaemonConfig {
            cwd: dir.path().to_path_buf(),
            persist_sessions: false,
            max_sessions: 2,
            ..DaemonConfig::default()
        };
        let config_b = DaemonConfig {
            max_sessions: 5,
            ..config_a.clone()
        };

        let a = get_shared_daemon(config_a, driver.clone()).await.unwrap();
        let b = get_shared_daemon(config_b, driver).await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.state().await, crate::state::DaemonState::Stopped);

        clear_shared_daemon(true).await;
    }
}
