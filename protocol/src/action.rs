use serde::Deserialize;
use serde::Serialize;

use crate::errors::ActionError;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    OpenSession,
    CloseSession,
    Navigate,
    Click,
    Type,
    Snapshot,
    Screenshot,
}

impl ActionType {
    /// True for actions that only read page state (spec §4.3 classification).
    pub fn is_observe_only(self) -> bool {
        matches!(
            self,
            ActionType::Snapshot | ActionType::Screenshot | ActionType::CloseSession
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitUntil {
    Load,
    DomContentLoaded,
    NetworkIdle,
    Commit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenshotKind {
    Png,
    Jpeg,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenSessionInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub mode: crate::session::SessionMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_endpoint: Option<String>,
    #[serde(default)]
    pub headless: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigateInput {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_until: Option<WaitUntil>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickInput {
    pub selector: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeInput {
    pub selector: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub submit: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotInput {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotInput {
    #[serde(default)]
    pub full_page: bool,
    #[serde(default = "default_screenshot_kind")]
    pub kind: ScreenshotKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
}

fn default_screenshot_kind() -> ScreenshotKind {
    ScreenshotKind::Png
}

impl Default for ScreenshotInput {
    fn default() -> Self {
        Self {
            full_page: false,
            kind: ScreenshotKind::Png,
            quality: None,
        }
    }
}

/// The recognized options for an action, tagged by [`ActionType`] (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionInput {
    OpenSession(OpenSessionInput),
    CloseSession {},
    Navigate(NavigateInput),
    Click(ClickInput),
    Type(TypeInput),
    Snapshot(SnapshotInput),
    Screenshot(ScreenshotInput),
}

impl ActionInput {
    pub fn action_type(&self) -> ActionType {
        match self {
            ActionInput::OpenSession(_) => ActionType::OpenSession,
            ActionInput::CloseSession {} => ActionType::CloseSession,
            ActionInput::Navigate(_) => ActionType::Navigate,
            ActionInput::Click(_) => ActionType::Click,
            ActionInput::Type(_) => ActionType::Type,
            ActionInput::Snapshot(_) => ActionType::Snapshot,
            ActionInput::Screenshot(_) => ActionType::Screenshot,
        }
    }
}

/// A single logical browser operation with a durable id (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub session_id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub created_at: String,
    pub input: ActionInput,
}

/// Data payload returned alongside a successful [`ActionResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionData {
    Session(Session),
    Snapshot { artifact_id: String, html_len: usize },
    Screenshot { artifact_id: String, size_bytes: u64 },
    None,
}

/// Outcome of a single action (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub ok: bool,
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ActionData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionError>,
}

impl ActionResult {
    pub fn success(action: Action, data: ActionData) -> Self {
        Self {
            ok: true,
            action,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(action: Action, error: ActionError) -> Self {
        Self {
            ok: false,
            action,
            data: None,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_input_tags_round_trip() {
        let input = ActionInput::Navigate(NavigateInput {
            url: "https://example.com".into(),
            timeout_ms: Some(1000),
            wait_until: Some(WaitUntil::Load),
        });
        let json = serde_json::to_value(&input).unwrap();
        assert_eq!(json["type"], "navigate");
        let back: ActionInput = serde_json::from_value(json).unwrap();
        assert_eq!(back.action_type(), ActionType::Navigate);
    }

    #[test]
    fn observe_only_actions() {
        assert!(ActionType::Snapshot.is_observe_only());
        assert!(ActionType::Screenshot.is_observe_only());
        assert!(!ActionType::Click.is_observe_only());
    }
}
