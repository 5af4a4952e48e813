//! In-memory `BrowserDriver` test double. No real browser: `navigate`
//! records the URL, `content`/`screenshot` return deterministic canned
//! bytes keyed off a failure switchboard so tests can force specific
//! driver-layer errors (spec §4.5's NAVIGATE_FAILED / CLICK_FAILED / ...).
//!
//! `Mutex::lock()` is unwrapped throughout: this switchboard is only ever
//! touched from test code, so a poisoned lock means an earlier assertion
//! already panicked and the test is failing anyway.
#![allow(clippy::unwrap_used)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use opta_browser_protocol::BrowserDriverError;

use crate::driver::BrowserDriver;
use crate::driver::DriverContext;
use crate::driver::DriverPage;
use crate::driver::LaunchOptions;
use crate::driver::NavigateOptions;
use crate::driver::ScreenshotOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeFailure {
    Goto,
    Click,
    Type,
    Content,
    Screenshot,
    Launch,
    Connect,
}

#[derive(Default)]
struct FakeState {
    url: String,
}

/// Shared switchboard: tests flip entries on to force a specific call to
/// fail with a chosen (code, message) pair.
#[derive(Clone, Default)]
pub struct FakeDriver {
    failures: Arc<Mutex<HashSet<FakeFailure>>>,
    failure_message: Arc<Mutex<String>>,
    screenshot_bytes: Arc<Mutex<Vec<u8>>>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self {
            failures: Arc::new(Mutex::new(HashSet::new())),
            failure_message: Arc::new(Mutex::new("fake driver failure".to_string())),
            screenshot_bytes: Arc::new(Mutex::new(vec![0u8; 16])),
        }
    }

    pub fn fail(&self, which: FakeFailure, message: impl Into<String>) {
        self.failures.lock().unwrap().insert(which);
        *self.failure_message.lock().unwrap() = message.into();
    }

    pub fn clear_failure(&self, which: FakeFailure) {
        self.failures.lock().unwrap().remove(&which);
    }

    pub fn set_screenshot_bytes(&self, bytes: Vec<u8>) {
        *self.screenshot_bytes.lock().unwrap() = bytes;
    }

    fn should_fail(&self, which: FakeFailure) -> Option<String> {
        let failing = self.failures.lock().unwrap().contains(&which);
        if failing {
            Some(self.failure_message.lock().unwrap().clone())
        } else {
            None
        }
    }
}

struct FakeContext {
    driver: FakeDriver,
}

struct FakePage {
    driver: FakeDriver,
    state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn launch(
        &self,
        _opts: LaunchOptions,
    ) -> Result<Box<dyn DriverContext>, BrowserDriverError> {
        if let Some(message) = self.should_fail(FakeFailure::Launch) {
            return Err(BrowserDriverError::new("LAUNCH_FAILED", message));
        }
        Ok(Box::new(FakeContext {
            driver: self.clone(),
        }))
    }

    async fn connect(
        &self,
        _ws_endpoint: &str,
    ) -> Result<Box<dyn DriverContext>, BrowserDriverError> {
        if let Some(message) = self.should_fail(FakeFailure::Connect) {
            return Err(BrowserDriverError::new("CONNECT_FAILED", message));
        }
        Ok(Box::new(FakeContext {
            driver: self.clone(),
        }))
    }
}

#[async_trait]
impl DriverContext for FakeContext {
    async fn new_page(&self) -> Result<Box<dyn DriverPage>, BrowserDriverError> {
        Ok(Box::new(FakePage {
            driver: self.driver.clone(),
            state: Arc::new(Mutex::new(FakeState::default())),
        }))
    }

    async fn first_page(&self) -> Result<Box<dyn DriverPage>, BrowserDriverError> {
        self.new_page().await
    }

    async fn inject_init_script(&self, _script: &str) -> Result<(), BrowserDriverError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), BrowserDriverError> {
        Ok(())
    }
}

#[async_trait]
impl DriverPage for FakePage {
    async fn goto(&self, url: &str, _opts: NavigateOptions) -> Result<(), BrowserDriverError> {
        if let Some(message) = self.driver.should_fail(FakeFailure::Goto) {
            return Err(BrowserDriverError::new("GOTO_FAILED", message));
        }
        self.state.lock().unwrap().url = url.to_string();
        Ok(())
    }

    async fn click(&self, _selector: &str, _timeout_ms: u64) -> Result<(), BrowserDriverError> {
        if let Some(message) = self.driver.should_fail(FakeFailure::Click) {
            return Err(BrowserDriverError::new("CLICK_FAILED", message));
        }
        Ok(())
    }

    async fn type_text(
        &self,
        _selector: &str,
        _text: &str,
        _timeout_ms: u64,
    ) -> Result<(), BrowserDriverError> {
        if let Some(message) = self.driver.should_fail(FakeFailure::Type) {
            return Err(BrowserDriverError::new("TYPE_FAILED", message));
        }
        Ok(())
    }

    async fn content(&self) -> Result<String, BrowserDriverError> {
        if let Some(message) = self.driver.should_fail(FakeFailure::Content) {
            return Err(BrowserDriverError::new("CONTENT_FAILED", message));
        }
        let url = self.state.lock().unwrap().url.clone();
        Ok(format!("<html><body>{url}</body></html>"))
    }

    async fn screenshot(&self, _opts: ScreenshotOptions) -> Result<Vec<u8>, BrowserDriverError> {
        if let Some(message) = self.driver.should_fail(FakeFailure::Screenshot) {
            return Err(BrowserDriverError::new("SCREENSHOT_FAILED", message));
        }
        Ok(self.driver.screenshot_bytes.lock().unwrap().clone())
    }

    fn url(&self) -> String {
        self.state.lock().unwrap().url.clone()
    }
}
