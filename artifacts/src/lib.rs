//! Filesystem layout, append-only logs, and JSON metadata for one session
//! directory under `.opta/browser/<sessionId>/` (spec §3, §6).

mod atomic;
mod jsonl;
mod store;

pub use atomic::StoreError;
pub use atomic::atomic_write_bytes;
pub use atomic::atomic_write_json;
pub use store::InvariantReport;
pub use store::SessionDir;
pub use store::check_invariants;
