//! `/v1/threads/:tid/messages[/:mid]` (spec §6).

use std::collections::HashMap;

use ag_domain::entities::{Message, MessageContentInput, MessageRole};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use crate::api::assistants::{page_from_query, ListQuery};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Debug, Deserialize)]
pub struct CreateMessageBody {
    /// Callers may only append `user` messages directly — `assistant` and
    /// `tool` roles are produced internally by the Run Engine.
    pub role: String,
    pub content: MessageContentInput,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

pub async fn create_message(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Json(body): Json<CreateMessageBody>,
) -> ApiResult<impl IntoResponse> {
    if body.role != "user" {
        return Err(ApiError::invalid_request(format!(
            "invalid role '{}': only 'user' messages may be created directly",
            body.role
        )));
    }
    state
        .store
        .get_thread(&thread_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No thread found with id '{thread_id}'")))?;

    let mut msg = Message::new(
        ag_domain::ids::message_id(),
        thread_id,
        now_unix(),
        MessageRole::User,
        body.content.into_parts(),
    );
    msg.metadata = body.metadata;

    let created = state.store.append_message(msg).await?;
    Ok(Json(created))
}

pub async fn get_message(
    State(state): State<AppState>,
    Path((thread_id, message_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let message = state
        .store
        .get_message(&thread_id, &message_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No message found with id '{message_id}'")))?;
    Ok(Json(message))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Query(q): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = page_from_query(&q);
    let listing = state.store.list_messages(&thread_id, &page).await?;
    Ok(Json(serde_json::json!({
        "object": "list",
        "data": listing.data,
        "first_id": listing.first_id,
        "last_id": listing.last_id,
        "has_more": listing.has_more,
    })))
}
