//! Run-Corpus Aggregator + Adaptation Hint derivation (spec §4.7).
//!
//! Scans recent sessions under `.opta/browser/`, builds a
//! [`RunCorpusSummary`], persists it, and derives an
//! [`opta_browser_protocol::AdaptationHint`] that may escalate policy risk
//! and/or penalize intent routing.

mod adaptation;
mod aggregate;
mod persist;

pub use adaptation::AdaptationConfig;
pub use adaptation::derive_adaptation_hint;
pub use aggregate::RESERVED_DIRS;
pub use aggregate::RunCorpusError;
pub use aggregate::build_summary;
pub use persist::RunCorpusStore;
