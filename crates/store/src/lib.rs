//! The persistence interface for Assistants, Threads (with their Message
//! sequences), and Files (spec §4.1), plus three backends behind one trait:
//! in-memory, Redis-shaped key-value, and relational (`sqlx`).
//!
//! Every backend honors the same contract: create/get/update/delete per
//! entity, thread-scoped message append/get/list with cursor pagination, and
//! a write-through cache in front of the non-memory backends.

pub mod memory;
pub mod redis;
pub mod sql;

use std::collections::HashMap;

use ag_domain::entities::{Assistant, File, Message, Run, Thread};
use ag_domain::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use memory::MemoryStore;
pub use redis::RedisStore;
pub use sql::SqlStore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pagination
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// A caller-supplied page request (spec §4.1: `{limit, order, after?, before?}`).
#[derive(Debug, Clone)]
pub struct Page {
    pub limit: usize,
    pub order: SortOrder,
    pub after: Option<String>,
    pub before: Option<String>,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 20,
            order: SortOrder::Desc,
            after: None,
            before: None,
        }
    }
}

/// A page of results plus OpenAI-shaped pagination metadata.
#[derive(Debug, Clone)]
pub struct Listing<T> {
    pub data: Vec<T>,
    pub has_more: bool,
    pub first_id: Option<String>,
    pub last_id: Option<String>,
}

/// Apply cursor-based pagination to an already-ordered id sequence. `ids` must
/// already be sorted in the requested `order`. Returns the slice of ids to
/// materialize plus whether more remain, per spec §4.1's "request limit+1 and
/// truncate" rule.
pub fn paginate_ids(ids: &[String], page: &Page) -> (Vec<String>, bool) {
    let mut start = 0usize;
    let mut end = ids.len();

    if let Some(after) = &page.after {
        if let Some(pos) = ids.iter().position(|id| id == after) {
            start = pos + 1;
        }
    }
    if let Some(before) = &page.before {
        if let Some(pos) = ids.iter().position(|id| id == before) {
            end = pos;
        }
    }

    let window = &ids[start.min(end)..end];
    let take = page.limit + 1;
    let has_more = window.len() > take;
    let slice: Vec<String> = window.iter().take(page.limit).cloned().collect();
    (slice, has_more)
}

fn listing_from<T: Clone>(items: Vec<T>, ids: &[String], has_more: bool) -> Listing<T> {
    Listing {
        data: items,
        has_more,
        first_id: ids.first().cloned(),
        last_id: ids.last().cloned(),
    }
}

pub(crate) fn build_listing<T: Clone>(items: Vec<(String, T)>, has_more: bool) -> Listing<T> {
    let ids: Vec<String> = items.iter().map(|(id, _)| id.clone()).collect();
    let values: Vec<T> = items.into_iter().map(|(_, v)| v).collect();
    listing_from(values, &ids, has_more)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Partial updates
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Field-level partial update for an Assistant. `None` means "leave
/// unchanged"; this mirrors the OpenAI `POST /assistants/:id` semantics
/// (spec §6: "`POST /:id` is update").
#[derive(Debug, Clone, Default)]
pub struct AssistantPatch {
    pub name: Option<Option<String>>,
    pub description: Option<Option<String>>,
    pub model: Option<String>,
    pub instructions: Option<Option<String>>,
    pub tools: Option<Vec<ag_domain::entities::AssistantTool>>,
    pub response_format: Option<Option<ag_domain::entities::ResponseFormat>>,
    pub temperature: Option<Option<f32>>,
    pub top_p: Option<Option<f32>>,
    pub metadata: Option<HashMap<String, String>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The persistence interface every backend implements. Inputs are IDs and
/// already-validated payloads; the Store does not enforce cross-entity
/// invariants (spec §4.1) — that is the Run Engine's responsibility.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_assistant(&self, assistant: Assistant) -> Result<Assistant>;
    async fn get_assistant(&self, id: &str) -> Result<Option<Assistant>>;
    async fn update_assistant(&self, id: &str, patch: AssistantPatch) -> Result<Option<Assistant>>;
    async fn delete_assistant(&self, id: &str) -> Result<bool>;
    async fn list_assistants(&self, page: &Page) -> Result<Listing<Assistant>>;

    async fn create_thread(&self, thread: Thread) -> Result<Thread>;
    async fn get_thread(&self, id: &str) -> Result<Option<Thread>>;
    async fn update_thread_metadata(
        &self,
        id: &str,
        metadata: HashMap<String, String>,
    ) -> Result<Option<Thread>>;
    async fn delete_thread(&self, id: &str) -> Result<bool>;

    /// Append a message to its thread's ordered sequence. The store assigns
    /// no ordering key of its own beyond arrival order — callers (the Run
    /// Engine) are responsible for calling this serially per-thread when
    /// ordering matters (spec §5).
    async fn append_message(&self, message: Message) -> Result<Message>;
    async fn get_message(&self, thread_id: &str, id: &str) -> Result<Option<Message>>;
    async fn list_messages(&self, thread_id: &str, page: &Page) -> Result<Listing<Message>>;

    async fn create_file(&self, file: File) -> Result<File>;
    async fn get_file(&self, id: &str) -> Result<Option<File>>;
    async fn delete_file(&self, id: &str) -> Result<bool>;
    async fn list_files(&self, page: &Page) -> Result<Listing<File>>;

    /// Runs are thread-scoped the same way messages are (spec §3). The Run
    /// Engine owns all state transitions; the store just persists whatever
    /// snapshot it is handed.
    async fn create_run(&self, run: Run) -> Result<Run>;
    async fn get_run(&self, thread_id: &str, id: &str) -> Result<Option<Run>>;
    async fn update_run(&self, run: Run) -> Result<Run>;
    async fn list_runs(&self, thread_id: &str, page: &Page) -> Result<Listing<Run>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn paginate_first_page_has_more() {
        let all = ids(&["a", "b", "c", "d", "e"]);
        let page = Page {
            limit: 2,
            order: SortOrder::Asc,
            after: None,
            before: None,
        };
        let (slice, has_more) = paginate_ids(&all, &page);
        assert_eq!(slice, ids(&["a", "b"]));
        assert!(has_more);
    }

    #[test]
    fn paginate_after_cursor_skips_up_to_and_including() {
        let all = ids(&["a", "b", "c", "d", "e"]);
        let page = Page {
            limit: 2,
            order: SortOrder::Asc,
            after: Some("b".into()),
            before: None,
        };
        let (slice, has_more) = paginate_ids(&all, &page);
        assert_eq!(slice, ids(&["c", "d"]));
        assert!(has_more);
    }

    #[test]
    fn paginate_before_cursor_truncates_strictly_before() {
        let all = ids(&["a", "b", "c", "d", "e"]);
        let page = Page {
            limit: 10,
            order: SortOrder::Asc,
            after: None,
            before: Some("d".into()),
        };
        let (slice, has_more) = paginate_ids(&all, &page);
        assert_eq!(slice, ids(&["a", "b", "c"]));
        assert!(!has_more);
    }

    #[test]
    fn paginate_last_page_has_no_more() {
        let all = ids(&["a", "b", "c"]);
        let page = Page {
            limit: 10,
            order: SortOrder::Asc,
            after: None,
            before: None,
        };
        let (slice, has_more) = paginate_ids(&all, &page);
        assert_eq!(slice, ids(&["a", "b", "c"]));
        assert!(!has_more);
    }
}
