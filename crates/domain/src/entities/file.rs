use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub id: String,
    pub object: String,
    pub bytes: u64,
    pub created_at: i64,
    pub filename: String,
    pub purpose: String,
    /// Raw file bytes, kept out of the wire representation — the REST layer
    /// serves content through a dedicated download route, never inline.
    #[serde(skip)]
    pub content: Vec<u8>,
}

impl File {
    pub fn new(
        id: String,
        created_at: i64,
        filename: impl Into<String>,
        purpose: impl Into<String>,
        content: Vec<u8>,
    ) -> Self {
        Self {
            id,
            object: "file".to_string(),
            bytes: content.len() as u64,
            created_at,
            filename: filename.into(),
            purpose: purpose.into(),
            content,
        }
    }
}
