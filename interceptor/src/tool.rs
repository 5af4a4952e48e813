//! Which MCP tool names this crate treats as governed browser tools (spec
//! §4.3's classification list feeds this; spec §4.4 step 1 consults it).

/// Every tool name the policy engine knows how to classify (spec §4.3).
/// A tool outside this set bypasses policy, retry, and approval logging
/// entirely (spec §4.4 step 1: "If tool is not a browser tool → execute
/// directly").
pub const BROWSER_TOOL_NAMES: &[&str] = &[
    "browser_open",
    "open_session",
    "close_session",
    "navigate",
    "click",
    "type",
    "snapshot",
    "screenshot",
    "handle_dialog",
    "evaluate",
    "file_upload",
    "select_option",
    "press_key",
    "keyboard_type",
    "drag",
    "go_back",
    "go_forward",
    "reload",
    "tab_new",
    "tab_close",
    "tab_select",
];

pub fn is_browser_tool(tool: &str) -> bool {
    BROWSER_TOOL_NAMES.contains(&tool)
}

const SELECTOR_HEALING_TOOLS: &[&str] = &["click", "type"];

/// True for tools eligible for the selector-healing hook (spec §4.4 step 5:
/// "tool ∈ {click, type}").
pub fn supports_selector_healing(tool: &str) -> bool {
    SELECTOR_HEALING_TOOLS.contains(&tool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_and_unknown_tools() {
        assert!(is_browser_tool("navigate"));
        assert!(is_browser_tool("tab_select"));
        assert!(!is_browser_tool("read_file"));
    }

    #[test]
    fn only_click_and_type_heal() {
        assert!(supports_selector_healing("click"));
        assert!(supports_selector_healing("type"));
        assert!(!supports_selector_healing("navigate"));
        assert!(!supports_selector_healing("evaluate"));
    }
}
