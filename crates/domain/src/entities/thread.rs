use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A conversation container (spec §3). Has no owning Assistant — a Run binds
/// an Assistant to a Thread at execution time. Message ordering is owned by
/// the Store, not by this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub object: String,
    pub created_at: i64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Thread {
    pub fn new(id: String, created_at: i64) -> Self {
        Self {
            id,
            object: "thread".to_string(),
            created_at,
            metadata: HashMap::new(),
        }
    }
}
