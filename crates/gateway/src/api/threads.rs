//! `/v1/threads[/:id]` CRUD (spec §6). Threads own no Assistant binding and
//! no message ordering logic of their own — both live elsewhere (a Run
//! binds Assistant to Thread; the Store owns message arrival order).

use std::collections::HashMap;

use ag_domain::entities::{ContentPart, Message, MessageContentInput, MessageRole, Thread};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Debug, Deserialize, Default)]
pub struct CreateThreadBody {
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Optional seed messages, appended in order right after creation.
    #[serde(default)]
    pub messages: Vec<InitialMessage>,
}

#[derive(Debug, Deserialize)]
pub struct InitialMessage {
    pub content: MessageContentInput,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

pub async fn create_thread(
    State(state): State<AppState>,
    Json(body): Json<CreateThreadBody>,
) -> ApiResult<impl IntoResponse> {
    let mut thread = Thread::new(ag_domain::ids::thread_id(), now_unix());
    thread.metadata = body.metadata;
    let created = state.store.create_thread(thread).await?;

    for seed in body.messages {
        let content: Vec<ContentPart> = seed.content.into_parts();
        let mut msg = Message::new(ag_domain::ids::message_id(), created.id.clone(), now_unix(), MessageRole::User, content);
        msg.metadata = seed.metadata;
        state.store.append_message(msg).await?;
    }

    Ok(Json(created))
}

pub async fn get_thread(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let thread = state
        .store
        .get_thread(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No thread found with id '{id}'")))?;
    Ok(Json(thread))
}

pub async fn delete_thread(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let deleted = state.store.delete_thread(&id).await?;
    if !deleted {
        return Err(ApiError::not_found(format!("No thread found with id '{id}'")));
    }
    Ok(Json(serde_json::json!({
        "id": id,
        "object": "thread.deleted",
        "deleted": true,
    })))
}
