use crate::errors::{DeskAgentError, DeskAgentResult};
use crate::llm::types::ToolDef;

/// Name of the desktop action tool.
pub const COMPUTER_TOOL: &str = "computer";
/// Name of the shell command tool.
pub const BASH_TOOL: &str = "bash";

/// Loads the tool definitions from prompts/tools/builtin.json.
/// The JSON is embedded at compile time via include_str!.
pub fn load_builtin_tools() -> DeskAgentResult<Vec<ToolDef>> {
    let json = include_str!("../../prompts/tools/builtin.json");
    serde_json::from_str(json)
        .map_err(|e| DeskAgentError::Config(format!("Failed to parse builtin tools: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declares_computer_and_bash() {
        let tools = load_builtin_tools().unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t.function.name.as_str()).collect();
        assert_eq!(names, [COMPUTER_TOOL, BASH_TOOL]);

        let actions = tools[0].function.parameters["properties"]["action"]["enum"]
            .as_array()
            .unwrap();
        assert_eq!(actions.len(), 10);
        assert!(actions.iter().any(|a| a == "left_click_drag"));
        assert_eq!(tools[1].function.parameters["required"][0], "command");
    }
}
