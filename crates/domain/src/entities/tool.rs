use serde::{Deserialize, Serialize};

/// A function tool declared on an Assistant (spec §3: "`function` with
/// JSON-Schema parameters") or a built-in opaque tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantTool {
    Function { function: FunctionDef },
    CodeInterpreter,
    FileSearch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: serde_json::Value,
}

/// An LLM-emitted tool call: ID, tool name, structured arguments (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// The matching result for a `ToolCall`, keyed by ID (spec §3).
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub call_id: String,
    pub outcome: ToolOutcome,
}

#[derive(Debug, Clone)]
pub enum ToolOutcome {
    Value(serde_json::Value),
    Error(String),
}

impl ToolResult {
    pub fn ok(call_id: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            call_id: call_id.into(),
            outcome: ToolOutcome::Value(value),
        }
    }

    pub fn err(call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            outcome: ToolOutcome::Error(message.into()),
        }
    }

    /// Render this result as the JSON-encoded string stored in a tool-role
    /// message's text content.
    pub fn to_content_string(&self) -> String {
        match &self.outcome {
            ToolOutcome::Value(v) => v.to_string(),
            ToolOutcome::Error(msg) => serde_json::json!({ "error": msg }).to_string(),
        }
    }
}
