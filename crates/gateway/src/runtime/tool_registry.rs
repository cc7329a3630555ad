//! In-process tool dispatch (spec §4.4: "Tool Executor — contract only").
//!
//! The engine resolves each tool call the provider emits against this
//! registry. A call whose name isn't among the Assistant's declared tools at
//! all is a genuinely unknown tool (§4.4: not registered anywhere) and gets
//! an inline error result. A call whose name *is* declared but has no bound
//! in-process executor is externally resolved — the caller supplies the
//! result via `submit_tool_outputs`. Only a call bound to a `Tool` here is
//! executed in-process, mirroring the teacher's `dispatch_tool` match-by-name
//! shape but keyed off a registry instead of a fixed list, since nothing in
//! this gateway ships built-in business tools.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::runtime::cancel::CancelToken;

/// Supplied to every `execute` call (spec §4.4: `{agent_id, run_id,
/// cancel_signal}`).
#[derive(Clone)]
pub struct ToolContext {
    pub agent_id: String,
    pub run_id: String,
    pub cancel_signal: CancelToken,
}

/// Side-effect metadata the engine surfaces but never interprets (spec
/// §4.4).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToolSideEffects {
    pub network: bool,
    pub filesystem: bool,
    pub process: bool,
    pub external: bool,
}

/// An in-process tool executor. `name` must match the `function.name` on
/// the Assistant's declared tool for this binding to take effect.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn side_effects(&self) -> ToolSideEffects {
        ToolSideEffects::default()
    }

    fn requires_approval(&self) -> bool {
        false
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> Result<Value, String>;
}

/// Process-wide table of in-process tools, built once at startup and shared
/// via `AppState`. Run-scoped "is this declared tool registered" checks are
/// a simple name lookup against this table.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }
}

/// Outcome of dispatching one tool call: the JSON-encoded string to store as
/// a tool-role message's content, and whether it represents an error.
pub struct DispatchOutcome {
    pub content: String,
    pub is_error: bool,
}

/// Execute a single call against a bound `Tool`, rendering its result or
/// error into the tool-role message content string (spec §4.4: "If a tool
/// throws, its error message is serialized into the tool result").
pub async fn dispatch(tool: &Arc<dyn Tool>, arguments: Value, context: &ToolContext) -> DispatchOutcome {
    match tool.execute(arguments, context).await {
        Ok(value) => DispatchOutcome {
            content: value.to_string(),
            is_error: false,
        },
        Err(message) => DispatchOutcome {
            content: serde_json::json!({ "error": message }).to_string(),
            is_error: true,
        },
    }
}

/// Render the §4.4 "not registered anywhere" fallback: a tool call whose
/// name doesn't even appear among the Assistant's declared tools.
pub fn not_found_outcome(name: &str) -> DispatchOutcome {
    DispatchOutcome {
        content: serde_json::json!({ "error": format!("Tool not found: {name}") }).to_string(),
        is_error: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        async fn execute(&self, arguments: Value, _context: &ToolContext) -> Result<Value, String> {
            Ok(arguments)
        }
    }

    struct WeatherTool;

    #[async_trait]
    impl Tool for WeatherTool {
        fn name(&self) -> &str {
            "get_weather"
        }

        async fn execute(&self, _arguments: Value, _context: &ToolContext) -> Result<Value, String> {
            Ok(serde_json::json!({ "temperature": 25 }))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "always_fails"
        }

        async fn execute(&self, _arguments: Value, _context: &ToolContext) -> Result<Value, String> {
            Err("boom".to_string())
        }
    }

    fn context() -> ToolContext {
        ToolContext {
            agent_id: "asst_1".into(),
            run_id: "run_1".into(),
            cancel_signal: CancelToken::new(),
        }
    }

    #[test]
    fn register_then_lookup_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        assert!(registry.is_registered("echo"));
        assert!(!registry.is_registered("missing"));
    }

    #[tokio::test]
    async fn dispatch_returns_tool_result_as_json_content() {
        let tool: Arc<dyn Tool> = Arc::new(WeatherTool);
        let outcome = dispatch(&tool, serde_json::json!({"city":"Tokyo"}), &context()).await;
        assert!(!outcome.is_error);
        assert_eq!(outcome.content, r#"{"temperature":25}"#);
    }

    #[tokio::test]
    async fn dispatch_serializes_tool_error() {
        let tool: Arc<dyn Tool> = Arc::new(FailingTool);
        let outcome = dispatch(&tool, serde_json::json!({}), &context()).await;
        assert!(outcome.is_error);
        assert_eq!(outcome.content, r#"{"error":"boom"}"#);
    }

    #[test]
    fn not_found_outcome_reports_the_missing_name() {
        let outcome = not_found_outcome("ghost_tool");
        assert!(outcome.is_error);
        assert_eq!(outcome.content, r#"{"error":"Tool not found: ghost_tool"}"#);
    }
}
