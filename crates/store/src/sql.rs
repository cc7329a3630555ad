//! Relational backend (spec §4.1): a single wide `entities` table keyed by
//! `(kind, id)` holding a JSON payload, plus a secondary `messages` table
//! ordered by an app-assigned monotonic sequence column for cursor
//! pagination. Works against Postgres or SQLite via `sqlx::Any`.

use std::collections::HashMap;

use ag_domain::entities::{Assistant, File, Message, Run, Thread};
use ag_domain::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};

use crate::{build_listing, paginate_ids, AssistantPatch, Listing, Page, SortOrder, Store};

const CREATE_ENTITIES: &str = "
CREATE TABLE IF NOT EXISTS entities (
    kind TEXT NOT NULL,
    id TEXT NOT NULL,
    payload TEXT NOT NULL,
    order_seq BIGINT NOT NULL,
    updated_at BIGINT NOT NULL,
    PRIMARY KEY (kind, id)
)";

const CREATE_MESSAGES: &str = "
CREATE TABLE IF NOT EXISTS messages (
    thread_id TEXT NOT NULL,
    message_id TEXT NOT NULL,
    seq BIGINT NOT NULL,
    payload TEXT NOT NULL,
    PRIMARY KEY (thread_id, message_id)
)";

const CREATE_RUNS: &str = "
CREATE TABLE IF NOT EXISTS runs (
    thread_id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    seq BIGINT NOT NULL,
    payload TEXT NOT NULL,
    PRIMARY KEY (thread_id, run_id)
)";

/// The `sqlx`-backed Store (spec §4.1). Connects eagerly at construction so
/// a misconfigured URL fails fast at startup rather than on first request.
pub struct SqlStore {
    pool: AnyPool,
    cache: RwLock<HashMap<String, String>>,
}

impl SqlStore {
    pub async fn connect(url: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(8)
            .connect(url)
            .await
            .map_err(|e| Error::Config(format!("sql connect: {e}")))?;

        sqlx::query(CREATE_ENTITIES)
            .execute(&pool)
            .await
            .map_err(|e| Error::Config(format!("sql migrate entities: {e}")))?;
        sqlx::query(CREATE_MESSAGES)
            .execute(&pool)
            .await
            .map_err(|e| Error::Config(format!("sql migrate messages: {e}")))?;
        sqlx::query(CREATE_RUNS)
            .execute(&pool)
            .await
            .map_err(|e| Error::Config(format!("sql migrate runs: {e}")))?;

        Ok(Self {
            pool,
            cache: RwLock::new(HashMap::new()),
        })
    }

    fn cache_key(kind: &str, id: &str) -> String {
        format!("{kind}:{id}")
    }

    async fn next_order_seq(&self, kind: &str) -> Result<i64> {
        let row: Option<AnyRow> = sqlx::query("SELECT COALESCE(MAX(order_seq), 0) AS m FROM entities WHERE kind = ?")
            .bind(kind)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("sql next_order_seq: {e}")))?;
        let max: i64 = row.map(|r| r.try_get::<i64, _>("m").unwrap_or(0)).unwrap_or(0);
        Ok(max + 1)
    }

    async fn next_message_seq(&self, thread_id: &str) -> Result<i64> {
        let row: Option<AnyRow> =
            sqlx::query("SELECT COALESCE(MAX(seq), 0) AS m FROM messages WHERE thread_id = ?")
                .bind(thread_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| Error::Other(format!("sql next_message_seq: {e}")))?;
        let max: i64 = row.map(|r| r.try_get::<i64, _>("m").unwrap_or(0)).unwrap_or(0);
        Ok(max + 1)
    }

    async fn next_run_seq(&self, thread_id: &str) -> Result<i64> {
        let row: Option<AnyRow> =
            sqlx::query("SELECT COALESCE(MAX(seq), 0) AS m FROM runs WHERE thread_id = ?")
                .bind(thread_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| Error::Other(format!("sql next_run_seq: {e}")))?;
        let max: i64 = row.map(|r| r.try_get::<i64, _>("m").unwrap_or(0)).unwrap_or(0);
        Ok(max + 1)
    }

    async fn upsert_entity<T: Serialize>(&self, kind: &str, id: &str, value: &T, updated_at: i64) -> Result<()> {
        let payload = serde_json::to_string(value)?;
        let existing: Option<AnyRow> = sqlx::query("SELECT order_seq FROM entities WHERE kind = ? AND id = ?")
            .bind(kind)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("sql select entity: {e}")))?;

        let order_seq = match existing {
            Some(row) => row.try_get::<i64, _>("order_seq").unwrap_or(0),
            None => self.next_order_seq(kind).await?,
        };

        sqlx::query(
            "INSERT INTO entities (kind, id, payload, order_seq, updated_at) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (kind, id) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
        )
        .bind(kind)
        .bind(id)
        .bind(&payload)
        .bind(order_seq)
        .bind(updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Other(format!("sql upsert entity: {e}")))?;

        self.cache.write().insert(Self::cache_key(kind, id), payload);
        Ok(())
    }

    async fn fetch_entity<T: DeserializeOwned>(&self, kind: &str, id: &str) -> Result<Option<T>> {
        if let Some(cached) = self.cache.read().get(&Self::cache_key(kind, id)).cloned() {
            return Ok(Some(serde_json::from_str(&cached)?));
        }
        let row: Option<AnyRow> = sqlx::query("SELECT payload FROM entities WHERE kind = ? AND id = ?")
            .bind(kind)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("sql fetch entity: {e}")))?;
        match row {
            Some(row) => {
                let payload: String = row
                    .try_get("payload")
                    .map_err(|e| Error::Other(format!("sql decode payload: {e}")))?;
                self.cache.write().insert(Self::cache_key(kind, id), payload.clone());
                Ok(Some(serde_json::from_str(&payload)?))
            }
            None => Ok(None),
        }
    }

    async fn delete_entity(&self, kind: &str, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM entities WHERE kind = ? AND id = ?")
            .bind(kind)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("sql delete entity: {e}")))?;
        self.cache.write().remove(&Self::cache_key(kind, id));
        Ok(result.rows_affected() > 0)
    }

    async fn list_entities<T: DeserializeOwned + Clone>(&self, kind: &str, page: &Page) -> Result<Listing<T>> {
        let order_sql = match page.order {
            SortOrder::Asc => "ORDER BY order_seq ASC",
            SortOrder::Desc => "ORDER BY order_seq DESC",
        };
        let rows: Vec<AnyRow> = sqlx::query(&format!("SELECT id, payload FROM entities WHERE kind = ? {order_sql}"))
            .bind(kind)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("sql list entities: {e}")))?;

        let all_ids: Vec<String> = rows
            .iter()
            .map(|r| r.try_get::<String, _>("id").unwrap_or_default())
            .collect();
        let (slice, has_more) = paginate_ids(&all_ids, page);

        let by_id: HashMap<String, String> = rows
            .into_iter()
            .map(|r| {
                let id: String = r.try_get("id").unwrap_or_default();
                let payload: String = r.try_get("payload").unwrap_or_default();
                (id, payload)
            })
            .collect();

        let mut items = Vec::with_capacity(slice.len());
        for id in slice {
            if let Some(payload) = by_id.get(&id) {
                items.push((id, serde_json::from_str::<T>(payload)?));
            }
        }
        Ok(build_listing(items, has_more))
    }
}

#[async_trait]
impl Store for SqlStore {
    async fn create_assistant(&self, assistant: Assistant) -> Result<Assistant> {
        self.upsert_entity("assistant", &assistant.id, &assistant, assistant.created_at)
            .await?;
        Ok(assistant)
    }

    async fn get_assistant(&self, id: &str) -> Result<Option<Assistant>> {
        self.fetch_entity("assistant", id).await
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
        self.upsert_entity("assistant", id, &a, a.created_at).await?;
        Ok(Some(a))
    }

    async fn delete_assistant(&self, id: &str) -> Result<bool> {
        self.delete_entity("assistant", id).await
    }

    async fn list_assistants(&self, page: &Page) -> Result<Listing<Assistant>> {
        self.list_entities("assistant", page).await
    }

    async fn create_thread(&self, thread: Thread) -> Result<Thread> {
        self.upsert_entity("thread", &thread.id, &thread, thread.created_at).await?;
        Ok(thread)
    }

    async fn get_thread(&self, id: &str) -> Result<Option<Thread>> {
        self.fetch_entity("thread", id).await
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
        self.upsert_entity("thread", id, &thread, thread.created_at).await?;
        Ok(Some(thread))
    }

    async fn delete_thread(&self, id: &str) -> Result<bool> {
        sqlx::query("DELETE FROM messages WHERE thread_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("sql delete thread messages: {e}")))?;
        self.delete_entity("thread", id).await
    }

    async fn append_message(&self, message: Message) -> Result<Message> {
        let seq = self.next_message_seq(&message.thread_id).await?;
        let payload = serde_json::to_string(&message)?;
        sqlx::query("INSERT INTO messages (thread_id, message_id, seq, payload) VALUES (?, ?, ?, ?)")
            .bind(&message.thread_id)
            .bind(&message.id)
            .bind(seq)
            .bind(&payload)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("sql append message: {e}")))?;
        self.cache
            .write()
            .insert(Self::cache_key("message", &message.id), payload);
        Ok(message)
    }

    async fn get_message(&self, thread_id: &str, id: &str) -> Result<Option<Message>> {
        if let Some(cached) = self.cache.read().get(&Self::cache_key("message", id)).cloned() {
            let msg: Message = serde_json::from_str(&cached)?;
            return Ok((msg.thread_id == thread_id).then_some(msg));
        }
        let row: Option<AnyRow> =
            sqlx::query("SELECT payload FROM messages WHERE thread_id = ? AND message_id = ?")
                .bind(thread_id)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| Error::Other(format!("sql get message: {e}")))?;
        match row {
            Some(row) => {
                let payload: String = row
                    .try_get("payload")
                    .map_err(|e| Error::Other(format!("sql decode message payload: {e}")))?;
                self.cache
                    .write()
                    .insert(Self::cache_key("message", id), payload.clone());
                Ok(Some(serde_json::from_str(&payload)?))
            }
            None => Ok(None),
        }
    }

    async fn list_messages(&self, thread_id: &str, page: &Page) -> Result<Listing<Message>> {
        let order_sql = match page.order {
            SortOrder::Asc => "ORDER BY seq ASC",
            SortOrder::Desc => "ORDER BY seq DESC",
        };
        let rows: Vec<AnyRow> = sqlx::query(&format!(
            "SELECT message_id, payload FROM messages WHERE thread_id = ? {order_sql}"
        ))
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Other(format!("sql list messages: {e}")))?;

        let all_ids: Vec<String> = rows
            .iter()
            .map(|r| r.try_get::<String, _>("message_id").unwrap_or_default())
            .collect();
        let (slice, has_more) = paginate_ids(&all_ids, page);

        let by_id: HashMap<String, String> = rows
            .into_iter()
            .map(|r| {
                let id: String = r.try_get("message_id").unwrap_or_default();
                let payload: String = r.try_get("payload").unwrap_or_default();
                (id, payload)
            })
            .collect();

        let mut items = Vec::with_capacity(slice.len());
        for id in slice {
            if let Some(payload) = by_id.get(&id) {
                items.push((id, serde_json::from_str::<Message>(payload)?));
            }
        }
        Ok(build_listing(items, has_more))
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
        self.upsert_entity("file", &file.id, &stored, file.created_at).await?;
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
        let stored: Option<StoredFile> = self.fetch_entity("file", id).await?;
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
        self.delete_entity("file", id).await
    }

    async fn list_files(&self, page: &Page) -> Result<Listing<File>> {
        #[derive(serde::Deserialize, Clone)]
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
        let listing: Listing<StoredFile> = self.list_entities("file", page).await?;
        let data = listing
            .data
            .into_iter()
            .map(|s| File {
                id: s.id,
                object: s.object,
                bytes: s.bytes,
                created_at: s.created_at,
                filename: s.filename,
                purpose: s.purpose,
                content: base64::engine::general_purpose::STANDARD
                    .decode(s.content_b64)
                    .unwrap_or_default(),
            })
            .collect();
        Ok(Listing {
            data,
            has_more: listing.has_more,
            first_id: listing.first_id,
            last_id: listing.last_id,
        })
    }

    async fn create_run(&self, run: Run) -> Result<Run> {
        let seq = self.next_run_seq(&run.thread_id).await?;
        let payload = serde_json::to_string(&run)?;
        sqlx::query("INSERT INTO runs (thread_id, run_id, seq, payload) VALUES (?, ?, ?, ?)")
            .bind(&run.thread_id)
            .bind(&run.id)
            .bind(seq)
            .bind(&payload)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("sql create run: {e}")))?;
        self.cache.write().insert(Self::cache_key("run", &run.id), payload);
        Ok(run)
    }

    async fn get_run(&self, thread_id: &str, id: &str) -> Result<Option<Run>> {
        if let Some(cached) = self.cache.read().get(&Self::cache_key("run", id)).cloned() {
            let run: Run = serde_json::from_str(&cached)?;
            return Ok((run.thread_id == thread_id).then_some(run));
        }
        let row: Option<AnyRow> = sqlx::query("SELECT payload FROM runs WHERE thread_id = ? AND run_id = ?")
            .bind(thread_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("sql get run: {e}")))?;
        match row {
            Some(row) => {
                let payload: String = row
                    .try_get("payload")
                    .map_err(|e| Error::Other(format!("sql decode run payload: {e}")))?;
                self.cache.write().insert(Self::cache_key("run", id), payload.clone());
                Ok(Some(serde_json::from_str(&payload)?))
            }
            None => Ok(None),
        }
    }

    async fn update_run(&self, run: Run) -> Result<Run> {
        let payload = serde_json::to_string(&run)?;
        sqlx::query("UPDATE runs SET payload = ? WHERE thread_id = ? AND run_id = ?")
            .bind(&payload)
            .bind(&run.thread_id)
            .bind(&run.id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Other(format!("sql update run: {e}")))?;
        self.cache.write().insert(Self::cache_key("run", &run.id), payload);
        Ok(run)
    }

    async fn list_runs(&self, thread_id: &str, page: &Page) -> Result<Listing<Run>> {
        let order_sql = match page.order {
            SortOrder::Asc => "ORDER BY seq ASC",
            SortOrder::Desc => "ORDER BY seq DESC",
        };
        let rows: Vec<AnyRow> = sqlx::query(&format!(
            "SELECT run_id, payload FROM runs WHERE thread_id = ? {order_sql}"
        ))
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Other(format!("sql list runs: {e}")))?;

        let all_ids: Vec<String> = rows
            .iter()
            .map(|r| r.try_get::<String, _>("run_id").unwrap_or_default())
            .collect();
        let (slice, has_more) = paginate_ids(&all_ids, page);

        let by_id: HashMap<String, String> = rows
            .into_iter()
            .map(|r| {
                let id: String = r.try_get("run_id").unwrap_or_default();
                let payload: String = r.try_get("payload").unwrap_or_default();
                (id, payload)
            })
            .collect();

        let mut items = Vec::with_capacity(slice.len());
        for id in slice {
            if let Some(payload) = by_id.get(&id) {
                items.push((id, serde_json::from_str::<Run>(payload)?));
            }
        }
        Ok(build_listing(items, has_more))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sqlite_round_trips_assistant_and_paginated_messages() {
        let store = SqlStore::connect("sqlite::memory:").await.unwrap();

        let a = Assistant::new("asst_1".into(), 0, "gpt-4o");
        store.create_assistant(a).await.unwrap();
        let got = store.get_assistant("asst_1").await.unwrap().unwrap();
        assert_eq!(got.model, "gpt-4o");

        store
            .create_thread(Thread::new("thread_1".into(), 0))
            .await
            .unwrap();
        for i in 0..3 {
            let msg = Message::new(
                format!("msg_{i}"),
                "thread_1",
                i as i64,
                ag_domain::entities::MessageRole::User,
                vec![ag_domain::entities::ContentPart::Text {
                    text: ag_domain::entities::TextValue {
                        value: format!("hello {i}"),
                        annotations: vec![],
                    },
                }],
            );
            store.append_message(msg).await.unwrap();
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
    }

    #[tokio::test]
    async fn sqlite_delete_thread_cascades_messages() {
        let store = SqlStore::connect("sqlite::memory:").await.unwrap();
        store
            .create_thread(Thread::new("thread_1".into(), 0))
            .await
            .unwrap();
        let msg = Message::new(
            "msg_1".into(),
            "thread_1",
            0,
            ag_domain::entities::MessageRole::User,
            vec![],
        );
        store.append_message(msg).await.unwrap();

        store.delete_thread("thread_1").await.unwrap();
        assert!(store.get_message("thread_1", "msg_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sqlite_run_update_round_trips() {
        use ag_domain::entities::{Run, RunConfig, RunStatus};
        let store = SqlStore::connect("sqlite::memory:").await.unwrap();
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
        store.create_run(run).await.unwrap();

        let mut fetched = store.get_run("thread_1", "run_1").await.unwrap().unwrap();
        fetched.status = RunStatus::InProgress;
        store.update_run(fetched).await.unwrap();

        let updated = store.get_run("thread_1", "run_1").await.unwrap().unwrap();
        assert_eq!(updated.status, RunStatus::InProgress);
    }
}
