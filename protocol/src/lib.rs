//! Shared data model for the governed browser-automation control plane.
//!
//! This crate has no logic beyond small constructors and `Default` impls: it
//! defines the wire/disk shape every other crate in the workspace agrees on,
//! the way `codex-protocol` is the leaf data crate under `codex-core`.

mod action;
mod adaptation;
mod approval;
mod artifact;
mod driver;
mod errors;
mod ids;
mod policy;
mod run_corpus;
mod session;
mod timeline;
mod time_fmt;
mod visual_diff;

pub use action::Action;
pub use action::ActionData;
pub use action::ActionInput;
pub use action::ActionResult;
pub use action::ActionType;
pub use action::ClickInput;
pub use action::NavigateInput;
pub use action::OpenSessionInput;
pub use action::ScreenshotInput;
pub use action::ScreenshotKind;
pub use action::SnapshotInput;
pub use action::TypeInput;
pub use action::WaitUntil;
pub use adaptation::AdaptationHint;
pub use adaptation::IntentAdaptation;
pub use adaptation::PolicyAdaptation;
pub use approval::ApprovalDecision;
pub use approval::ApprovalEvent;
pub use approval::Classifier;
pub use approval::RiskEvidence;
pub use artifact::ArtifactKind;
pub use artifact::ArtifactMetadata;
pub use driver::BrowserDriverError;
pub use driver::CancellationToken;
pub use errors::ActionError;
pub use errors::ErrorCode;
pub use errors::RetryCategory;
pub use ids::ActionIdGenerator;
pub use ids::SequenceGenerator;
pub use policy::HostPattern;
pub use policy::PolicyConfig;
pub use policy::PolicyDecision;
pub use policy::PolicyRequest;
pub use policy::Risk;
pub use policy::RiskDecision;
pub use policy::SensitiveAction;
pub use run_corpus::RegressionSignalCounts;
pub use run_corpus::RunCorpusEntry;
pub use run_corpus::RunCorpusSummary;
pub use session::Session;
pub use session::SessionMetadata;
pub use session::SessionMode;
pub use session::SessionRuntime;
pub use session::SessionStatus;
pub use time_fmt::now_iso8601;
pub use timeline::RecordingEntry;
pub use timeline::StepRecord;
pub use visual_diff::RegressionSignal;
pub use visual_diff::Severity;
pub use visual_diff::VisualDiffManifestEntry;
pub use visual_diff::VisualDiffResultEntry;
pub use visual_diff::VisualDiffStatus;
