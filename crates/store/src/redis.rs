//! Redis-shaped key-value backend (spec §4.1): `set/get/del/keys` semantics
//! against a real Redis server via the `redis` crate's async multiplexed
//! connection, with a write-through in-process cache in front of it.
//!
//! Entity payloads are stored as JSON strings under `ag:<kind>:<id>`;
//! per-kind and per-thread ordering is tracked with Redis lists
//! (`ag:<kind>:order`, `ag:thread:<id>:messages`). Binary file content is
//! base64-encoded inside the JSON payload (spec §4.1).

use std::collections::HashMap;
use std::sync::Arc;

use ag_domain::entities::{Assistant, File, Message, Run, Thread};
use ag_domain::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::OnceCell;

use crate::{build_listing, paginate_ids, AssistantPatch, Listing, Page, SortOrder, Store};

/// The Redis-backed Store (spec §4.1). Connects lazily; a connection failure
/// surfaces as `Error::Config` on first use, not at construction time.
pub struct RedisStore {
    client: redis::Client,
    manager: OnceCell<ConnectionManager>,
    cache: RwLock<HashMap<String, String>>,
}

impl RedisStore {
    pub fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::Config(format!("invalid redis url: {e}")))?;
        Ok(Self {
            client,
            manager: OnceCell::new(),
            cache: RwLock::new(HashMap::new()),
        })
    }

    async fn conn(&self) -> Result<ConnectionManager> {
        self.manager
            .get_or_try_init(|| async {
                ConnectionManager::new(self.client.clone())
                    .await
                    .map_err(|e| Error::Config(format!("redis connect: {e}")))
            })
            .await
            .cloned()
    }

    fn entity_key(kind: &str, id: &str) -> String {
        format!("ag:{kind}:{id}")
    }

    fn order_key(kind: &str) -> String {
        format!("ag:{kind}:order")
    }

    fn thread_messages_key(thread_id: &str) -> String {
        format!("ag:thread:{thread_id}:messages")
    }

    fn thread_runs_key(thread_id: &str) -> String {
        format!("ag:thread:{thread_id}:runs")
    }

    async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        let mut conn = self.conn().await?;
        conn.set::<_, _, ()>(key, &json)
            .await
            .map_err(|e| Error::Other(format!("redis SET {key}: {e}")))?;
        self.cache.write().insert(key.to_string(), json);
        Ok(())
    }

    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        if let Some(cached) = self.cache.read().get(key).cloned() {
            return Ok(Some(serde_json::from_str(&cached)?));
        }
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| Error::Other(format!("redis GET {key}: {e}")))?;
        match raw {
            Some(json) => {
                self.cache.write().insert(key.to_string(), json.clone());
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn
            .del(key)
            .await
            .map_err(|e| Error::Other(format!("redis DEL {key}: {e}")))?;
        self.cache.write().remove(key);
        Ok(removed > 0)
    }

    async fn list_push(&self, key: &str, id: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.rpush::<_, _, ()>(key, id)
            .await
            .map_err(|e| Error::Other(format!("redis RPUSH {key}: {e}")))?;
        Ok(())
    }

    async fn list_remove(&self, key: &str, id: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.lrem::<_, _, ()>(key, 0, id)
            .await
            .map_err(|e| Error::Other(format!("redis LREM {key}: {e}")))?;
        Ok(())
    }

    async fn list_all(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        conn.lrange(key, 0, -1)
            .await
            .map_err(|e| Error::Other(format!("redis LRANGE {key}: {e}")))
    }

    async fn list_page<T: DeserializeOwned + Clone>(
        &self,
        order_key: &str,
        kind: &str,
        page: &Page,
    ) -> Result<Listing<T>> {
        let mut ids = self.list_all(order_key).await?;
        if page.order == SortOrder::Desc {
            ids.reverse();
        }
        let (slice, has_more) = paginate_ids(&ids, page);

        let mut items = Vec::with_capacity(slice.len());
        for id in slice {
            if let Some(v) = self.get::<T>(&Self::entity_key(kind, &id)).await? {
                items.push((id, v));
            }
        }
        Ok(build_listing(items, has_more))
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn create_assistant(&self, assistant: Assistant) -> Result<Assistant> {
        self.set(&Self::entity_key("assistant", &assistant.id), &assistant)
            .await?;
        self.list_push(&Self::order_key("assistant"), &assistant.id).await?;
        Ok(assistant)
    }

    async fn get_assistant(&self, id: &str) -> Result<Option<Assistant>> {
        self.get(&Self::entity_key("assistant", id)).await
    }

    async fn update_assistant(&self, id: &str, patch: AssistantPatch) -> Result<Option<Assistant>> {
        let Some(mut a) = self.get_assistant(id).await? else {
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
        self.set(&Self::entity_key("assistant", id), &a).await?;
        Ok(Some(a))
    }

    async fn delete_assistant(&self, id: &str) -> Result<bool> {
        self.list_remove(&Self::order_key("assistant"), id).await?;
        self.del(&Self::entity_key("assistant", id)).await
    }

    async fn list_assistants(&self, page: &Page) -> Result<Listing<Assistant>> {
        self.list_page(&Self::order_key("assistant"), "assistant", page).await
    }

    async fn create_thread(&self, thread: Thread) -> Result<Thread> {
        self.set(&Self::entity_key("thread", &thread.id), &thread).await?;
        self.list_push(&Self::order_key("thread"), &thread.id).await?;
        Ok(thread)
    }

    async fn get_thread(&self, id: &str) -> Result<Option<Thread>> {
        self.get(&Self::entity_key("thread", id)).await
    }

    async fn update_thread_metadata(
        &self,
        id: &str,
        metadata: HashMap<String, String>,
    ) -> Result<Option<Thread>> {
        let Some(mut thread) = self.get_thread(id).await? else {
            return Ok(None);
        };
        thread.metadata = metadata;
        self.set(&Self::entity_key("thread", id), &thread).await?;
        Ok(Some(thread))
    }

    async fn delete_thread(&self, id: &str) -> Result<bool> {
        let msg_ids = self.list_all(&Self::thread_messages_key(id)).await.unwrap_or_default();
        for mid in msg_ids {
            self.del(&Self::entity_key("message", &mid)).await?;
        }
        self.del(&Self::thread_messages_key(id)).await?;
        self.list_remove(&Self::order_key("thread"), id).await?;
        self.del(&Self::entity_key("thread", id)).await
    }

    async fn append_message(&self, message: Message) -> Result<Message> {
        self.set(&Self::entity_key("message", &message.id), &message).await?;
        self.list_push(&Self::thread_messages_key(&message.thread_id), &message.id)
            .await?;
        Ok(message)
    }

    async fn get_message(&self, thread_id: &str, id: &str) -> Result<Option<Message>> {
        let msg: Option<Message> = self.get(&Self::entity_key("message", id)).await?;
        Ok(msg.filter(|m| m.thread_id == thread_id))
    }

    async fn list_messages(&self, thread_id: &str, page: &Page) -> Result<Listing<Message>> {
        self.list_page(&Self::thread_messages_key(thread_id), "message", page).await
    }

    async fn create_file(&self, file: File) -> Result<File> {
        #[derive(Serialize, serde::Deserialize)]
        struct StoredFile {
            id: String,
            object: String,
            bytes: u64,
            created_at: i64,
            filename: String,
            purpose: String,
            content_b64: String,
        }
        use base64::Engine;
        let stored = StoredFile {
            id: file.id.clone(),
            object: file.object.clone(),
            bytes: file.bytes,
            created_at: file.created_at,
            filename: file.filename.clone(),
            purpose: file.purpose.clone(),
            content_b64: base64::engine::general_purpose::STANDARD.encode(&file.content),
        };
        self.set(&Self::entity_key("file", &file.id), &stored).await?;
        self.list_push(&Self::order_key("file"), &file.id).await?;
        Ok(file)
    }

    async fn get_file(&self, id: &str) -> Result<Option<File>> {
        #[derive(serde::Deserialize)]
        struct StoredFile {
            id: String,
            object: String,
            bytes: u64,
            created_at: i64,
            filename: String,
            purpose: String,
            content_b64: String,
        }
        use base64::Engine;
        let stored: Option<StoredFile> = self.get(&Self::entity_key("file", id)).await?;
        Ok(stored.map(|s| File {
            id: s.id,
            object: s.object,
            bytes: s.bytes,
            created_at: s.created_at,
            filename: s.filename,
            purpose: s.purpose,
            content: base64::engine::general_purpose::STANDARD
                .decode(s.content_b64)
                .unwrap_or_default(),
        }))
    }

    async fn delete_file(&self, id: &str) -> Result<bool> {
        self.list_remove(&Self::order_key("file"), id).await?;
        self.del(&Self::entity_key("file", id)).await
    }

    async fn list_files(&self, page: &Page) -> Result<Listing<File>> {
        let mut ids = self.list_all(&Self::order_key("file")).await?;
        if page.order == SortOrder::Desc {
            ids.reverse();
        }
        let (slice, has_more) = paginate_ids(&ids, page);
        let mut items = Vec::with_capacity(slice.len());
        for id in slice {
            if let Some(f) = self.get_file(&id).await? {
                items.push((id, f));
            }
        }
        Ok(build_listing(items, has_more))
    }

    async fn create_run(&self, run: Run) -> Result<Run> {
        self.set(&Self::entity_key("run", &run.id), &run).await?;
        self.list_push(&Self::thread_runs_key(&run.thread_id), &run.id).await?;
        Ok(run)
    }

    async fn get_run(&self, thread_id: &str, id: &str) -> Result<Option<Run>> {
        let run: Option<Run> = self.get(&Self::entity_key("run", id)).await?;
        Ok(run.filter(|r| r.thread_id == thread_id))
    }

    async fn update_run(&self, run: Run) -> Result<Run> {
        self.set(&Self::entity_key("run", &run.id), &run).await?;
        Ok(run)
    }

    async fn list_runs(&self, thread_id: &str, page: &Page) -> Result<Listing<Run>> {
        self.list_page(&Self::thread_runs_key(thread_id), "run", page).await
    }
}

/// Shared handle alias — `RedisStore` is cheap to clone-share behind an `Arc`
/// since `ConnectionManager` itself is internally multiplexed.
pub type SharedRedisStore = Arc<RedisStore>;
