use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::tool::ToolCall;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    /// Tool-result role. Never sent by a caller directly — produced by the
    /// Run Engine when a tool call resolves (spec §3).
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: TextValue },
    ImageUrl { image_url: ImageUrlValue },
    ImageBase64 { image_base64: ImageBase64Value },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextValue {
    pub value: String,
    #[serde(default)]
    pub annotations: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrlValue {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageBase64Value {
    pub media_type: String,
    pub data: String,
}

/// Caller-supplied content, accepted either as a bare string or an explicit
/// part list (spec §8 round-trip law: a string round-trips as a single text
/// part with empty annotations).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContentInput {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContentInput {
    pub fn into_parts(self) -> Vec<ContentPart> {
        match self {
            Self::Text(value) => vec![ContentPart::Text {
                text: TextValue {
                    value,
                    annotations: Vec::new(),
                },
            }],
            Self::Parts(parts) => parts,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub object: String,
    pub thread_id: String,
    pub created_at: i64,
    pub role: MessageRole,
    pub content: Vec<ContentPart>,
    pub status: MessageStatus,
    /// Set for assistant/tool messages: the Run that produced them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,
    /// Set on assistant messages that requested tool calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Set on tool-role messages: which call this message answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Message {
    pub fn new(
        id: String,
        thread_id: impl Into<String>,
        created_at: i64,
        role: MessageRole,
        content: Vec<ContentPart>,
    ) -> Self {
        Self {
            id,
            object: "thread.message".to_string(),
            thread_id: thread_id.into(),
            created_at,
            role,
            content,
            status: MessageStatus::Completed,
            run_id: None,
            assistant_id: None,
            tool_calls: None,
            tool_call_id: None,
            metadata: HashMap::new(),
        }
    }

    /// Join all text parts with newlines, skipping non-text parts — used to
    /// build provider-normalized message content.
    pub fn extract_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.value.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_content_round_trips_as_single_text_part() {
        let parts = MessageContentInput::Text("hello".into()).into_parts();
        assert_eq!(parts.len(), 1);
        match &parts[0] {
            ContentPart::Text { text } => {
                assert_eq!(text.value, "hello");
                assert!(text.annotations.is_empty());
            }
            _ => panic!("expected text part"),
        }
    }

    #[test]
    fn extract_text_skips_non_text_parts() {
        let msg = Message::new(
            "msg_1".into(),
            "thread_1",
            0,
            MessageRole::User,
            vec![
                ContentPart::Text {
                    text: TextValue {
                        value: "a".into(),
                        annotations: vec![],
                    },
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrlValue {
                        url: "http://x".into(),
                    },
                },
                ContentPart::Text {
                    text: TextValue {
                        value: "b".into(),
                        annotations: vec![],
                    },
                },
            ],
        );
        assert_eq!(msg.extract_text(), "a\nb");
    }
}
