//! Runtime Daemon: the singleton orchestrator composing the Native Session
//! Manager, Session Store, and Run-Corpus Aggregator behind
//! running/paused/killed gates and session caps (spec §4.6).
//!
//! [`control_plane::BrowserControlPlane`] is the facade an embedder
//! constructs once; it owns [`get_shared_daemon`] on the caller's behalf.

mod config;
mod control_plane;
mod daemon;
mod retention;
mod shared;
mod state;

pub use config::DaemonConfig;
pub use config::RetentionPolicy;
pub use control_plane::BrowserControlPlane;
pub use daemon::DaemonError;
pub use daemon::RuntimeDaemon;
pub use shared::clear_shared_daemon;
pub use shared::get_shared_daemon;
pub use state::DaemonHealth;
pub use state::DaemonState;
pub use state::PruneHealth;
pub use state::RunCorpusHealth;
