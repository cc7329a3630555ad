use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::tool::AssistantTool;

/// Optional output-shape directive carried on an Assistant or a Run's
/// per-request config snapshot (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    JsonObject,
    JsonSchema { json_schema: serde_json::Value },
}

impl Default for ResponseFormat {
    fn default() -> Self {
        Self::Text
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assistant {
    pub id: String,
    pub object: String,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default)]
    pub tools: Vec<AssistantTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Assistant {
    pub fn new(id: String, created_at: i64, model: impl Into<String>) -> Self {
        Self {
            id,
            object: "assistant".to_string(),
            created_at,
            name: None,
            description: None,
            model: model.into(),
            instructions: None,
            tools: Vec::new(),
            response_format: None,
            temperature: None,
            top_p: None,
            metadata: HashMap::new(),
        }
    }
}
