//! `/v1/assistants[/:id]` CRUD (spec §6).

use std::collections::HashMap;

use ag_domain::entities::{Assistant, AssistantTool, ResponseFormat};
use ag_store::{AssistantPatch, Page, SortOrder};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Deserializer};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Distinguishes "field absent" (`None`) from "field explicitly `null`"
/// (`Some(None)`) on a `POST /assistants/:id` update body — the standard
/// double-`Option` trick, since serde otherwise collapses both to `None`.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
pub struct CreateAssistantBody {
    pub model: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub tools: Vec<AssistantTool>,
    #[serde(default)]
    pub response_format: Option<ResponseFormat>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

pub async fn create_assistant(
    State(state): State<AppState>,
    Json(body): Json<CreateAssistantBody>,
) -> ApiResult<impl IntoResponse> {
    let mut assistant = Assistant::new(ag_domain::ids::assistant_id(), now_unix(), body.model);
    assistant.name = body.name;
    assistant.description = body.description;
    assistant.instructions = body.instructions;
    assistant.tools = body.tools;
    assistant.response_format = body.response_format;
    assistant.temperature = body.temperature;
    assistant.top_p = body.top_p;
    assistant.metadata = body.metadata;

    let created = state.store.create_assistant(assistant).await?;
    Ok(Json(created))
}

pub async fn get_assistant(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let assistant = state
        .store
        .get_assistant(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No assistant found with id '{id}'")))?;
    Ok(Json(assistant))
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateAssistantBody {
    #[serde(default, deserialize_with = "double_option")]
    pub name: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub instructions: Option<Option<String>>,
    #[serde(default)]
    pub tools: Option<Vec<AssistantTool>>,
    #[serde(default, deserialize_with = "double_option")]
    pub response_format: Option<Option<ResponseFormat>>,
    #[serde(default, deserialize_with = "double_option")]
    pub temperature: Option<Option<f32>>,
    #[serde(default, deserialize_with = "double_option")]
    pub top_p: Option<Option<f32>>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,
}

pub async fn update_assistant(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateAssistantBody>,
) -> ApiResult<impl IntoResponse> {
    let patch = AssistantPatch {
        name: body.name,
        description: body.description,
        model: body.model,
        instructions: body.instructions,
        tools: body.tools,
        response_format: body.response_format,
        temperature: body.temperature,
        top_p: body.top_p,
        metadata: body.metadata,
    };
    let updated = state
        .store
        .update_assistant(&id, patch)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No assistant found with id '{id}'")))?;
    Ok(Json(updated))
}

pub async fn delete_assistant(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let deleted = state.store.delete_assistant(&id).await?;
    if !deleted {
        return Err(ApiError::not_found(format!("No assistant found with id '{id}'")));
    }
    Ok(Json(serde_json::json!({
        "id": id,
        "object": "assistant.deleted",
        "deleted": true,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub order: Option<String>,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub before: Option<String>,
}

fn default_limit() -> usize {
    20
}

pub fn page_from_query(q: &ListQuery) -> Page {
    Page {
        limit: q.limit.min(100),
        order: match q.order.as_deref() {
            Some("asc") => SortOrder::Asc,
            _ => SortOrder::Desc,
        },
        after: q.after.clone(),
        before: q.before.clone(),
    }
}

pub async fn list_assistants(State(state): State<AppState>, Query(q): Query<ListQuery>) -> ApiResult<impl IntoResponse> {
    let page = page_from_query(&q);
    let listing = state.store.list_assistants(&page).await?;
    Ok(Json(serde_json::json!({
        "object": "list",
        "data": listing.data,
        "first_id": listing.first_id,
        "last_id": listing.last_id,
        "has_more": listing.has_more,
    })))
}
