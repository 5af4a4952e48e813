use serde::Deserialize;
use serde::Serialize;

use crate::action::Action;
use crate::artifact::ArtifactMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    #[default]
    Isolated,
    Attach,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionRuntime {
    DriverAvailable,
    Unavailable,
}

/// One browser context and its durable artifact set (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub mode: SessionMode,
    pub status: SessionStatus,
    pub runtime: SessionRuntime,
    pub created_at: String,
    pub updated_at: String,
    pub artifacts_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Stamped by the runtime daemon when this session was restored from
    /// `runtime-sessions.json` after a restart (spec §4.6 recovery).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovered_at: Option<String>,
}

/// Consolidated per-session JSON document (spec §3, §6: `metadata.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub schema_version: u32,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub mode: SessionMode,
    pub status: SessionStatus,
    pub runtime: SessionRuntime,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub artifacts: Vec<ArtifactMetadata>,
    pub actions: Vec<Action>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovered_at: Option<String>,
}

impl SessionMetadata {
    pub fn from_session(session: &Session) -> Self {
        Self {
            schema_version: 1,
            session_id: session.id.clone(),
            run_id: session.run_id.clone(),
            mode: session.mode,
            status: session.status,
            runtime: session.runtime,
            created_at: session.created_at.clone(),
            updated_at: session.updated_at.clone(),
            current_url: session.current_url.clone(),
            ws_endpoint: session.ws_endpoint.clone(),
            profile_dir: session.profile_dir.clone(),
            last_error: session.last_error.clone(),
            artifacts: Vec::new(),
            actions: Vec::new(),
            recovered_at: session.recovered_at.clone(),
        }
    }
}
