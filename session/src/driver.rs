//! The `BrowserDriver` contract (spec §1, §4.5). The concrete driver is out
//! of scope for this crate — named only by contract ("a page with
//! goto/click/fill/content/screenshot and a context with init-script
//! injection"). `FakeDriver` in this module's test sibling stands in for
//! unit tests the way `metjm-planning-agent`'s `EventStore` trait is backed
//! by an in-memory fake.

use async_trait::async_trait;
use opta_browser_protocol::BrowserDriverError;
use opta_browser_protocol::ScreenshotKind;
use opta_browser_protocol::WaitUntil;

#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub headless: bool,
    pub profile_dir: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NavigateOptions {
    pub timeout_ms: Option<u64>,
    pub wait_until: Option<WaitUntil>,
}

#[derive(Debug, Clone, Copy)]
pub struct ScreenshotOptions {
    pub full_page: bool,
    pub kind: ScreenshotKind,
    pub quality: Option<u8>,
}

impl Default for ScreenshotOptions {
    fn default() -> Self {
        Self {
            full_page: false,
            kind: ScreenshotKind::Png,
            quality: None,
        }
    }
}

#[async_trait]
pub trait DriverPage: Send + Sync {
    async fn goto(&self, url: &str, opts: NavigateOptions) -> Result<(), BrowserDriverError>;
    async fn click(&self, selector: &str, timeout_ms: u64) -> Result<(), BrowserDriverError>;
    async fn type_text(
        &self,
        selector: &str,
        text: &str,
        timeout_ms: u64,
    ) -> Result<(), BrowserDriverError>;
    async fn content(&self) -> Result<String, BrowserDriverError>;
    async fn screenshot(&self, opts: ScreenshotOptions) -> Result<Vec<u8>, BrowserDriverError>;
    fn url(&self) -> String;
}

#[async_trait]
pub trait DriverContext: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn DriverPage>, BrowserDriverError>;
    async fn first_page(&self) -> Result<Box<dyn DriverPage>, BrowserDriverError>;
    async fn inject_init_script(&self, script: &str) -> Result<(), BrowserDriverError>;
    async fn close(&self) -> Result<(), BrowserDriverError>;
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn launch(
        &self,
        opts: LaunchOptions,
    ) -> Result<Box<dyn DriverContext>, BrowserDriverError>;
    async fn connect(&self, ws_endpoint: &str)
    -> Result<Box<dyn DriverContext>, BrowserDriverError>;
}
