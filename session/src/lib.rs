//! Native Session Manager: per-session open/navigate/click/type/snapshot/
//! screenshot, artifact production, and cancellation (spec §4.5). The
//! concrete browser driver is out of scope; this crate depends only on the
//! `BrowserDriver` contract in [`driver`].

mod driver;
mod fake_driver;
mod manager;

pub use driver::BrowserDriver;
pub use driver::DriverContext;
pub use driver::DriverPage;
pub use driver::LaunchOptions;
pub use driver::NavigateOptions;
pub use driver::ScreenshotOptions;
pub use fake_driver::FakeDriver;
pub use fake_driver::FakeFailure;
pub use manager::SessionManager;
