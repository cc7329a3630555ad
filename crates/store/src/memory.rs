//! In-memory backend. Maps keyed by entity ID under a `parking_lot::RwLock`,
//! the same shape as this workspace's session store
//! (`RwLock<HashMap<String, Entry>>`, write-through, no external I/O).

use std::collections::HashMap;

use ag_domain::entities::{Assistant, File, Message, Run, Thread};
use ag_domain::error::Result;
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{build_listing, paginate_ids, AssistantPatch, Listing, Page, SortOrder, Store};

#[derive(Default)]
struct Tables {
    assistants: HashMap<String, Assistant>,
    assistant_order: Vec<String>,
    threads: HashMap<String, Thread>,
    thread_order: Vec<String>,
    /// thread_id -> ordered message ids (arrival order).
    thread_messages: HashMap<String, Vec<String>>,
    messages: HashMap<String, Message>,
    files: HashMap<String, File>,
    file_order: Vec<String>,
    /// thread_id -> ordered run ids (arrival order).
    thread_runs: HashMap<String, Vec<String>>,
    runs: HashMap<String, Run>,
}

/// The in-memory Store backend (spec §4.1 "in-memory (maps)"). Suitable for
/// tests and single-process deployments with no durability requirement.
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn ordered_ids(all: &[String], order: SortOrder) -> Vec<String> {
    let mut ids = all.to_vec();
    if order == SortOrder::Desc {
        ids.reverse();
    }
    ids
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_assistant(&self, assistant: Assistant) -> Result<Assistant> {
        let mut t = self.tables.write();
        t.assistant_order.push(assistant.id.clone());
        t.assistants.insert(assistant.id.clone(), assistant.clone());
        Ok(assistant)
    }

    async fn get_assistant(&self, id: &str) -> Result<Option<Assistant>> {
        Ok(self.tables.read().assistants.get(id).cloned())
    }

    async fn update_assistant(&self, id: &str, patch: AssistantPatch) -> Result<Option<Assistant>> {
        let mut t = self.tables.write();
        let Some(a) = t.assistants.get_mut(id) else {
            return Ok(None);
        };
        if let Some(v) = patch.name {
            a.name = v;
        }
        if let Some(v) = patch.description {
            a.description = v;
        }
        if let Some(v) = patch.model {
            a.model = v;
        }
        if let Some(v) = patch.instructions {
            a.instructions = v;
        }
        if let Some(v) = patch.tools {
            a.tools = v;
        }
        if let Some(v) = patch.response_format {
            a.response_format = v;
        }
        if let Some(v) = patch.temperature {
            a.temperature = v;
        }
        if let Some(v) = patch.top_p {
            a.top_p = v;
        }
        if let Some(v) = patch.metadata {
            a.metadata = v;
        }
        Ok(Some(a.clone()))
    }

    async fn delete_assistant(&self, id: &str) -> Result<bool> {
        let mut t = self.tables.write();
        t.assistant_order.retain(|x| x != id);
        Ok(t.assistants.remove(id).is_some())
    }

    async fn list_assistants(&self, page: &Page) -> Result<Listing<Assistant>> {
        let t = self.tables.read();
        let ids = ordered_ids(&t.assistant_order, page.order);
        let (slice, has_more) = paginate_ids(&ids, page);
        let items: Vec<(String, Assistant)> = slice
            .into_iter()
            .filter_map(|id| t.assistants.get(&id).cloned().map(|a| (id, a)))
            .collect();
        Ok(build_listing(items, has_more))
    }

    async fn create_thread(&self, thread: Thread) -> Result<Thread> {
        let mut t = self.tables.write();
        t.thread_order.push(thread.id.clone());
        t.thread_messages.entry(thread.id.clone()).or_default();
        t.threads.insert(thread.id.clone(), thread.clone());
        Ok(thread)
    }

    async fn get_thread(&self, id: &str) -> Result<Option<Thread>> {
        Ok(self.tables.read().threads.get(id).cloned())
    }

    async fn update_thread_metadata(
        &self,
        id: &str,
        metadata: HashMap<String, String>,
    ) -> Result<Option<Thread>> {
        let mut t = self.tables.write();
        let Some(thread) = t.threads.get_mut(id) else {
            return Ok(None);
        };
        thread.metadata = metadata;
        Ok(Some(thread.clone()))
    }

    async fn delete_thread(&self, id: &str) -> Result<bool> {
        let mut t = self.tables.write();
        t.thread_order.retain(|x| x != id);
        if let Some(msg_ids) = t.thread_messages.remove(id) {
            for mid in msg_ids {
                t.messages.remove(&mid);
            }
        }
        Ok(t.threads.remove(id).is_some())
    }

    async fn append_message(&self, message: Message) -> Result<Message> {
        let mut t = self.tables.write();
        t.thread_messages
            .entry(message.thread_id.clone())
            .or_default()
            .push(message.id.clone());
        t.messages.insert(message.id.clone(), message.clone());
        Ok(message)
    }

    async fn get_message(&self, thread_id: &str, id: &str) -> Result<Option<Message>> {
        let t = self.tables.read();
        Ok(t.messages
            .get(id)
            .filter(|m| m.thread_id == thread_id)
            .cloned())
    }

    async fn list_messages(&self, thread_id: &str, page: &Page) -> Result<Listing<Message>> {
        let t = self.tables.read();
        let all = t.thread_messages.get(thread_id).cloned().unwrap_or_default();
        let ids = ordered_ids(&all, page.order);
        let (slice, has_more) = paginate_ids(&ids, page);
        let items: Vec<(String, Message)> = slice
            .into_iter()
            .filter_map(|id| t.messages.get(&id).cloned().map(|m| (id, m)))
            .collect();
        Ok(build_listing(items, has_more))
    }

    async fn create_file(&self, file: File) -> Result<File> {
        let mut t = self.tables.write();
        t.file_order.push(file.id.clone());
        t.files.insert(file.id.clone(), file.clone());
        Ok(file)
    }

    async fn get_file(&self, id: &str) -> Result<Option<File>> {
        Ok(self.tables.read().files.get(id).cloned())
    }

    async fn delete_file(&self, id: &str) -> Result<bool> {
        let mut t = self.tables.write();
        t.file_order.retain(|x| x != id);
        Ok(t.files.remove(id).is_some())
    }

    async fn list_files(&self, page: &Page) -> Result<Listing<File>> {
        let t = self.tables.read();
        let ids = ordered_ids(&t.file_order, page.order);
        let (slice, has_more) = paginate_ids(&ids, page);
        let items: Vec<(String, File)> = slice
            .into_iter()
            .filter_map(|id| t.files.get(&id).cloned().map(|f| (id, f)))
            .collect();
        Ok(build_listing(items, has_more))
    }

    async fn create_run(&self, run: Run) -> Result<Run> {
        let mut t = self.tables.write();
        t.thread_runs.entry(run.thread_id.clone()).or_default().push(run.id.clone());
        t.runs.insert(run.id.clone(), run.clone());
        Ok(run)
    }

    async fn get_run(&self, thread_id: &str, id: &str) -> Result<Option<Run>> {
        let t = self.tables.read();
        Ok(t.runs.get(id).filter(|r| r.thread_id == thread_id).cloned())
    }

    async fn update_run(&self, run: Run) -> Result<Run> {
        let mut t = self.tables.write();
        t.runs.insert(run.id.clone(), run.clone());
        Ok(run)
    }

    async fn list_runs(&self, thread_id: &str, page: &Page) -> Result<Listing<Run>> {
        let t = self.tables.read();
        let all = t.thread_runs.get(thread_id).cloned().unwrap_or_default();
        let ids = ordered_ids(&all, page.order);
        let (slice, has_more) = paginate_ids(&ids, page);
        let items: Vec<(String, Run)> = slice
            .into_iter()
            .filter_map(|id| t.runs.get(&id).cloned().map(|r| (id, r)))
            .collect();
        Ok(build_listing(items, has_more))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ag_domain::entities::MessageRole;

    fn text_message(id: &str, thread_id: &str) -> Message {
        Message::new(
            id.into(),
            thread_id,
            0,
            MessageRole::User,
            vec![ag_domain::entities::ContentPart::Text {
                text: ag_domain::entities::TextValue {
                    value: "hi".into(),
                    annotations: vec![],
                },
            }],
        )
    }

    #[tokio::test]
    async fn create_and_get_assistant_round_trips() {
        let store = MemoryStore::new();
        let a = Assistant::new("asst_1".into(), 0, "gpt-4o");
        store.create_assistant(a.clone()).await.unwrap();
        let got = store.get_assistant("asst_1").await.unwrap().unwrap();
        assert_eq!(got.model, "gpt-4o");
    }

    #[tokio::test]
    async fn update_assistant_only_touches_patched_fields() {
        let store = MemoryStore::new();
        let mut a = Assistant::new("asst_1".into(), 0, "gpt-4o");
        a.name = Some("original".into());
        store.create_assistant(a).await.unwrap();

        let patch = AssistantPatch {
            model: Some("gpt-4o-mini".into()),
            ..Default::default()
        };
        let updated = store.update_assistant("asst_1", patch).await.unwrap().unwrap();
        assert_eq!(updated.model, "gpt-4o-mini");
        assert_eq!(updated.name.as_deref(), Some("original"));
    }

    #[tokio::test]
    async fn delete_assistant_returns_false_when_absent() {
        let store = MemoryStore::new();
        assert!(!store.delete_assistant("asst_missing").await.unwrap());
    }

    #[tokio::test]
    async fn deleting_thread_removes_its_messages() {
        let store = MemoryStore::new();
        store.create_thread(Thread::new("thread_1".into(), 0)).await.unwrap();
        store.append_message(text_message("msg_1", "thread_1")).await.unwrap();

        store.delete_thread("thread_1").await.unwrap();
        assert!(store.get_message("thread_1", "msg_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_messages_preserves_append_order() {
        let store = MemoryStore::new();
        store.create_thread(Thread::new("thread_1".into(), 0)).await.unwrap();
        for i in 0..3 {
            store
                .append_message(text_message(&format!("msg_{i}"), "thread_1"))
                .await
                .unwrap();
        }

        let page = Page {
            limit: 10,
            order: SortOrder::Asc,
            after: None,
            before: None,
        };
        let listing = store.list_messages("thread_1", &page).await.unwrap();
        let ids: Vec<String> = listing.data.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, vec!["msg_0", "msg_1", "msg_2"]);
        assert!(!listing.has_more);
    }

    #[tokio::test]
    async fn get_message_rejects_wrong_thread() {
        let store = MemoryStore::new();
        store.create_thread(Thread::new("thread_1".into(), 0)).await.unwrap();
        store.append_message(text_message("msg_1", "thread_1")).await.unwrap();

        assert!(store.get_message("thread_other", "msg_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn run_update_round_trips_and_stays_thread_scoped() {
        use ag_domain::entities::{Run, RunConfig, RunStatus};
        let store = MemoryStore::new();
        store.create_thread(Thread::new("thread_1".into(), 0)).await.unwrap();

        let config = RunConfig {
            model: "gpt-4o".into(),
            instructions: None,
            tools: vec![],
            response_format: None,
            temperature: None,
            top_p: None,
            parallel_tool_calls: false,
            max_completion_tokens: None,
            max_iterations: None,
        };
        let run = Run::new("run_1".into(), "thread_1", "asst_1", 0, config);
        store.create_run(run.clone()).await.unwrap();

        let mut fetched = store.get_run("thread_1", "run_1").await.unwrap().unwrap();
        assert_eq!(fetched.status, RunStatus::Queued);
        fetched.status = RunStatus::Completed;
        store.update_run(fetched).await.unwrap();

        let updated = store.get_run("thread_1", "run_1").await.unwrap().unwrap();
        assert_eq!(updated.status, RunStatus::Completed);
        assert!(store.get_run("thread_other", "run_1").await.unwrap().is_none());
    }
}
