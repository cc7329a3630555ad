//! `/v1/threads/:tid/runs[/:rid]` plus the `/v1/threads/runs` convenience
//! endpoint, `/cancel`, and `/submit_tool_outputs` (spec §6). A run created
//! with `stream: true` opens an SSE pump over the engine's per-Run
//! `StreamBus` (spec §4.5) instead of returning the `queued` snapshot.

use std::collections::HashMap;

use ag_domain::entities::{
    Assistant, AssistantTool, ContentPart, Message, MessageContentInput, MessageRole, ResponseFormat, Run, RunConfig,
    RunStatus,
};
use ag_store::Page;
use axum::extract::{Path, Query, State};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use crate::api::assistants::{page_from_query, ListQuery};
use crate::error::{ApiError, ApiResult};
use crate::runtime::engine;
use crate::runtime::stream_bus::sse_stream;
use crate::state::AppState;

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Debug, Deserialize)]
pub struct AdditionalMessage {
    pub content: MessageContentInput,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRunBody {
    pub assistant_id: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub additional_messages: Vec<AdditionalMessage>,
    #[serde(default)]
    pub tools: Option<Vec<AssistantTool>>,
    #[serde(default)]
    pub response_format: Option<ResponseFormat>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub parallel_tool_calls: bool,
    #[serde(default)]
    pub max_completion_tokens: Option<u32>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub stream: bool,
}

/// Build a Run's frozen config snapshot (spec §3 ownership rule: later
/// Assistant edits never affect an in-flight or completed Run) — the
/// Assistant's own settings, overridden field-by-field by the request.
fn build_run_config(assistant: &Assistant, body: &CreateRunBody) -> RunConfig {
    RunConfig {
        model: body.model.clone().unwrap_or_else(|| assistant.model.clone()),
        instructions: body.instructions.clone().or_else(|| assistant.instructions.clone()),
        tools: body.tools.clone().unwrap_or_else(|| assistant.tools.clone()),
        response_format: body.response_format.clone().or_else(|| assistant.response_format.clone()),
        temperature: body.temperature.or(assistant.temperature),
        top_p: body.top_p.or(assistant.top_p),
        parallel_tool_calls: body.parallel_tool_calls,
        max_completion_tokens: body.max_completion_tokens,
        max_iterations: body.max_iterations,
    }
}

async fn append_additional_messages(
    state: &AppState,
    thread_id: &str,
    messages: Vec<AdditionalMessage>,
) -> ApiResult<()> {
    for extra in messages {
        let content: Vec<ContentPart> = extra.content.into_parts();
        let mut msg = Message::new(
            ag_domain::ids::message_id(),
            thread_id.to_string(),
            now_unix(),
            MessageRole::User,
            content,
        );
        msg.metadata = extra.metadata;
        state.store.append_message(msg).await?;
    }
    Ok(())
}

async fn start_run(state: AppState, thread_id: String, mut body: CreateRunBody) -> ApiResult<impl IntoResponse> {
    let assistant = state
        .store
        .get_assistant(&body.assistant_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No assistant found with id '{}'", body.assistant_id)))?;

    let additional_messages = std::mem::take(&mut body.additional_messages);
    append_additional_messages(&state, &thread_id, additional_messages).await?;

    let config = build_run_config(&assistant, &body);
    let created_at = now_unix();
    let mut run = Run::new(ag_domain::ids::run_id(), thread_id.clone(), assistant.id.clone(), created_at, config);
    run.expires_at = Some(engine::default_expiry(created_at));
    let run = state.store.create_run(run).await?;

    let state = std::sync::Arc::new(state);
    if body.stream {
        engine::spawn(state.clone(), thread_id.clone(), run.id.clone());
        let rx = state
            .stream_bus
            .subscribe(&run.id)
            .ok_or_else(|| ApiError::server_error("run stream closed before it could be subscribed to"))?;
        return Ok(Sse::new(sse_stream(rx)).keep_alive(KeepAlive::default()).into_response());
    }

    engine::spawn(state, thread_id, run.id.clone());
    Ok(Json(run).into_response())
}

pub async fn create_run(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Json(body): Json<CreateRunBody>,
) -> ApiResult<impl IntoResponse> {
    state
        .store
        .get_thread(&thread_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No thread found with id '{thread_id}'")))?;
    start_run(state, thread_id, body).await
}

#[derive(Debug, Deserialize, Default)]
pub struct CreateThreadAndRunBody {
    #[serde(default)]
    pub thread_metadata: HashMap<String, String>,
    #[serde(flatten)]
    pub run: CreateRunBody,
}

pub async fn create_thread_and_run(
    State(state): State<AppState>,
    Json(body): Json<CreateThreadAndRunBody>,
) -> ApiResult<impl IntoResponse> {
    let mut thread = ag_domain::entities::Thread::new(ag_domain::ids::thread_id(), now_unix());
    thread.metadata = body.thread_metadata;
    let thread = state.store.create_thread(thread).await?;
    start_run(state, thread.id, body.run).await
}

pub async fn get_run(
    State(state): State<AppState>,
    Path((thread_id, run_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let run = state
        .store
        .get_run(&thread_id, &run_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No run found with id '{run_id}'")))?;
    Ok(Json(run))
}

pub async fn list_runs(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Query(q): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let page: Page = page_from_query(&q);
    let listing = state.store.list_runs(&thread_id, &page).await?;
    Ok(Json(serde_json::json!({
        "object": "list",
        "data": listing.data,
        "first_id": listing.first_id,
        "last_id": listing.last_id,
        "has_more": listing.has_more,
    })))
}

pub async fn cancel_run(
    State(state): State<AppState>,
    Path((thread_id, run_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let mut run = state
        .store
        .get_run(&thread_id, &run_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No run found with id '{run_id}'")))?;

    let was_running = state.cancel_map.cancel(&run_id);
    if was_running && !run.status.is_terminal() {
        run.status = RunStatus::Cancelling;
    }
    Ok(Json(run))
}

#[derive(Debug, Deserialize)]
pub struct ToolOutputSubmission {
    pub tool_call_id: String,
    pub output: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct SubmitToolOutputsBody {
    pub tool_outputs: Vec<ToolOutputSubmission>,
    #[serde(default)]
    pub stream: bool,
}

pub async fn submit_tool_outputs(
    State(state): State<AppState>,
    Path((thread_id, run_id)): Path<(String, String)>,
    Json(body): Json<SubmitToolOutputsBody>,
) -> ApiResult<impl IntoResponse> {
    let mut run = state
        .store
        .get_run(&thread_id, &run_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("No run found with id '{run_id}'")))?;

    let required = run
        .required_action
        .as_ref()
        .ok_or_else(|| ApiError::invalid_request(format!("Run '{run_id}' is not awaiting tool outputs")))?
        .clone();

    let names: HashMap<String, String> = required
        .submit_tool_outputs
        .tool_calls
        .iter()
        .map(|c| (c.id.clone(), c.name.clone()))
        .collect();

    for submission in body.tool_outputs {
        let content = match &submission.output {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let mut msg = Message::new(
            ag_domain::ids::message_id(),
            thread_id.clone(),
            now_unix(),
            MessageRole::Tool,
            vec![ContentPart::Text {
                text: ag_domain::entities::TextValue {
                    value: content,
                    annotations: Vec::new(),
                },
            }],
        );
        msg.run_id = Some(run_id.clone());
        msg.assistant_id = Some(run.assistant_id.clone());
        msg.tool_call_id = Some(submission.tool_call_id.clone());
        if let Some(name) = names.get(&submission.tool_call_id) {
            msg.metadata.insert("tool_name".to_string(), name.clone());
        }
        state.store.append_message(msg).await?;
    }

    run.required_action = None;
    run.status = RunStatus::Queued;
    let run = state.store.update_run(run).await?;

    let state = std::sync::Arc::new(state);
    if body.stream {
        engine::resume(state.clone(), thread_id, run_id.clone());
        let rx = state
            .stream_bus
            .subscribe(&run_id)
            .ok_or_else(|| ApiError::server_error("run stream closed before it could be subscribed to"))?;
        return Ok(Sse::new(sse_stream(rx)).keep_alive(KeepAlive::default()).into_response());
    }

    engine::resume(state, thread_id, run_id);
    Ok(Json(run).into_response())
}
