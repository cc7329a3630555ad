//! The per-Run turn loop (spec §4.2): build a provider request from the
//! thread's message history, invoke the resolved provider, classify the
//! finish reason, and either terminate the Run or loop for another
//! iteration. Runs as a detached `tokio` task per Run; progress is narrated
//! onto the Run's `StreamBus` channel regardless of whether any SSE client
//! is attached.
//!
//! Tool calls are resolved against the Run's declared tools (spec §4.2 step
//! 4, §4.4): a call bound to an in-process `Tool` is executed and the loop
//! continues; a call the Assistant declared but nothing executes in-process
//! is left outstanding and the Run suspends to `requires_action`; a call
//! whose name isn't declared at all gets an inline "Tool not found" result
//! and the loop continues.

use std::sync::Arc;

use ag_domain::chat::{self, ToolCall as ChatToolCall};
use ag_domain::entities::{AssistantTool, ContentPart, LastError, LastErrorCode, Message, MessageRole, Run, RunStatus};
use ag_domain::entities::{IncompleteDetails, IncompleteReason};
use ag_domain::entities::{RequiredAction, SubmitToolOutputs, ToolCall as EntityToolCall};
use ag_domain::stream::StreamEvent;
use ag_providers::traits::ChatRequest;
use futures_util::future::join_all;
use futures_util::StreamExt;

use crate::runtime::cancel::CancelToken;
use crate::runtime::stream_bus::SseEvent;
use crate::runtime::tool_registry::{self, ToolContext};
use crate::state::AppState;

const DEFAULT_RUN_TIMEOUT_SECS: i64 = 600;

fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    ((chars as f64) / 4.0).ceil() as u32
}

fn assistant_tools_to_defs(run: &Run) -> Vec<chat::ToolDefinition> {
    run.config
        .tools
        .iter()
        .filter_map(|tool| match tool {
            ag_domain::entities::AssistantTool::Function { function } => Some(chat::ToolDefinition {
                name: function.name.clone(),
                description: function.description.clone().unwrap_or_default(),
                parameters: function.parameters.clone(),
            }),
            _ => None,
        })
        .collect()
}

/// Project a thread's persisted messages into the normalized provider wire
/// shape (spec §4.3): system instructions, then history in ascending order.
fn to_chat_messages(run: &Run, history: &[Message]) -> Vec<chat::Message> {
    let mut out = Vec::with_capacity(history.len() + 1);
    if let Some(instructions) = &run.config.instructions {
        if !instructions.is_empty() {
            out.push(chat::Message::system(instructions.clone()));
        }
    }
    for msg in history {
        out.push(entity_message_to_chat(msg));
    }
    out
}

fn entity_message_to_chat(msg: &Message) -> chat::Message {
    match msg.role {
        MessageRole::User => chat::Message::user(msg.extract_text()),
        MessageRole::Assistant => match &msg.tool_calls {
            Some(calls) if !calls.is_empty() => {
                let text = msg.extract_text();
                chat::Message::assistant_tool_calls(
                    (!text.is_empty()).then_some(text),
                    calls.iter().map(|c| (c.id.clone(), c.name.clone(), c.arguments.clone())).collect(),
                )
            }
            _ => chat::Message::assistant(msg.extract_text()),
        },
        MessageRole::Tool => {
            let tool_call_id = msg.tool_call_id.clone().unwrap_or_default();
            let tool_name = msg.metadata.get("tool_name").cloned().unwrap_or_default();
            chat::Message::tool_result(tool_call_id, tool_name, msg.extract_text())
        }
    }
}

struct Assembled {
    text: String,
    tool_calls: Vec<ChatToolCall>,
    finish_reason: Option<String>,
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    stream_error: Option<String>,
}

/// In-progress tool call assembly state, keyed by `call_id`, for streams
/// that emit `ToolCallStarted`/`ToolCallDelta` before `ToolCallFinished`.
#[derive(Default)]
struct ToolCallBuilder {
    tool_name: String,
    argument_buffer: String,
}

async fn consume_stream(
    state: &Arc<AppState>,
    run_id: &str,
    message_id: &str,
    mut stream: ag_domain::stream::BoxStream<'static, ag_domain::error::Result<StreamEvent>>,
) -> Assembled {
    let mut text = String::new();
    let mut builders: std::collections::HashMap<String, ToolCallBuilder> = std::collections::HashMap::new();
    let mut finished_calls: Vec<ChatToolCall> = Vec::new();
    let mut finish_reason = None;
    let mut prompt_tokens = None;
    let mut completion_tokens = None;
    let mut stream_error = None;

    while let Some(event) = stream.next().await {
        match event {
            Ok(StreamEvent::Thinking { .. }) => {}
            Ok(StreamEvent::Token { text: delta }) => {
                text.push_str(&delta);
                state.stream_bus.publish(
                    run_id,
                    SseEvent::named(
                        "thread.message.delta",
                        serde_json::json!({
                            "id": message_id,
                            "object": "thread.message.delta",
                            "delta": { "content": [{ "index": 0, "type": "text", "text": { "value": delta } }] }
                        }),
                    ),
                );
            }
            Ok(StreamEvent::ToolCallStarted { call_id, tool_name }) => {
                builders.entry(call_id).or_default().tool_name = tool_name;
            }
            Ok(StreamEvent::ToolCallDelta { call_id, delta }) => {
                builders.entry(call_id).or_default().argument_buffer.push_str(&delta);
            }
            Ok(StreamEvent::ToolCallFinished { call_id, tool_name, arguments }) => {
                finished_calls.push(ChatToolCall {
                    call_id,
                    tool_name,
                    arguments,
                });
            }
            Ok(StreamEvent::Done { usage, finish_reason: reason }) => {
                finish_reason = reason;
                if let Some(u) = usage {
                    prompt_tokens = Some(u.prompt_tokens);
                    completion_tokens = Some(u.completion_tokens);
                }
            }
            Ok(StreamEvent::Error { message }) => {
                stream_error = Some(message);
            }
            Err(e) => {
                stream_error = Some(e.to_string());
            }
        }
    }

    // Assemble tool calls that only ever reached Started/Delta without a
    // Finished event — defaults to an empty-object argument set on invalid
    // JSON rather than dropping the call.
    for (call_id, builder) in builders {
        if finished_calls.iter().any(|c| c.call_id == call_id) {
            continue;
        }
        let arguments = serde_json::from_str(&builder.argument_buffer).unwrap_or_else(|_| serde_json::json!({}));
        finished_calls.push(ChatToolCall {
            call_id,
            tool_name: builder.tool_name,
            arguments,
        });
    }

    Assembled {
        text,
        tool_calls: finished_calls,
        finish_reason,
        prompt_tokens,
        completion_tokens,
        stream_error,
    }
}

fn declared_tool_names(run: &Run) -> std::collections::HashSet<String> {
    run.config
        .tools
        .iter()
        .filter_map(|tool| match tool {
            AssistantTool::Function { function } => Some(function.name.clone()),
            _ => None,
        })
        .collect()
}

/// Resolve and run every tool call from one iteration (spec §4.2 step 4,
/// §4.4). Returns the in-process results (in dispatch order, ready to
/// persist as tool-role messages) and the subset of calls left outstanding
/// because they were declared but have no in-process executor bound.
async fn execute_tool_calls(
    state: &Arc<AppState>,
    run: &Run,
    token: &CancelToken,
    calls: &[EntityToolCall],
) -> (Vec<(EntityToolCall, tool_registry::DispatchOutcome)>, Vec<EntityToolCall>) {
    let declared = declared_tool_names(run);
    let context = ToolContext {
        agent_id: run.assistant_id.clone(),
        run_id: run.id.clone(),
        cancel_signal: token.clone(),
    };

    let mut pending_external = Vec::new();
    let mut dispatchable: Vec<(EntityToolCall, Option<Arc<dyn tool_registry::Tool>>)> = Vec::new();

    for call in calls {
        if let Some(tool) = state.tool_registry.get(&call.name) {
            dispatchable.push((call.clone(), Some(tool)));
        } else if declared.contains(&call.name) {
            pending_external.push(call.clone());
        } else {
            dispatchable.push((call.clone(), None));
        }
    }

    async fn run_one(
        call: EntityToolCall,
        tool: Option<Arc<dyn tool_registry::Tool>>,
        context: ToolContext,
    ) -> (EntityToolCall, tool_registry::DispatchOutcome) {
        let outcome = match &tool {
            Some(tool) => tool_registry::dispatch(tool, call.arguments.clone(), &context).await,
            None => tool_registry::not_found_outcome(&call.name),
        };
        (call, outcome)
    }

    // Serial by default so tool-role messages land in call order (spec §5);
    // concurrent only when the Run's captured config asked for it, trading
    // total-order latency for max-latency.
    let results = if run.config.parallel_tool_calls {
        let futures = dispatchable
            .into_iter()
            .map(|(call, tool)| run_one(call, tool, context.clone()));
        join_all(futures).await
    } else {
        let mut results = Vec::with_capacity(dispatchable.len());
        for (call, tool) in dispatchable {
            results.push(run_one(call, tool, context.clone()).await);
        }
        results
    };

    (results, pending_external)
}

/// Drive a Run to completion (or to a suspended `requires_action`/terminal
/// state). Safe to call again after `submit_tool_outputs` appends new tool
/// result messages — iteration count is not reset.
pub async fn drive(state: Arc<AppState>, thread_id: String, run_id: String) {
    let token = state.cancel_map.register(&run_id);

    loop {
        let Ok(Some(mut run)) = state.store.get_run(&thread_id, &run_id).await else {
            tracing::error!(run_id = %run_id, "engine: run vanished mid-flight");
            return;
        };
        if run.status.is_terminal() {
            state.cancel_map.remove(&run_id);
            return;
        }

        // Suspension point 1: cancellation / expiration (spec §5).
        if token.is_cancelled() {
            transition_cancelled(&state, &mut run).await;
            return;
        }
        if let Some(expires_at) = run.expires_at {
            if now_unix() >= expires_at {
                transition_expired(&state, &mut run).await;
                return;
            }
        }

        // Step 5 of spec §4.2's per-iteration algorithm: bound the number of
        // provider calls this Run may make, whether this pass started fresh
        // or is a continuation after an in-process tool dispatch.
        let max_iterations = run.config.max_iterations.unwrap_or(state.config.runs.default_max_iterations);
        run.iterations += 1;
        if run.iterations > max_iterations {
            run.incomplete_details = Some(IncompleteDetails {
                reason: IncompleteReason::MaxIterations,
            });
            run.status = RunStatus::Incomplete;
            run.completed_at = Some(now_unix());
            finish(&state, &run_id, run).await;
            return;
        }

        if run.started_at.is_none() {
            run.started_at = Some(now_unix());
        }
        run.status = RunStatus::InProgress;
        let _ = state.store.update_run(run.clone()).await;
        state.stream_bus.publish(&run_id, SseEvent::named("thread.run.in_progress", &run));

        let Some((provider, resolved_model)) = state.resolve_model(&run.config.model) else {
            run.status = RunStatus::Failed;
            run.failed_at = Some(now_unix());
            run.last_error = Some(LastError {
                code: LastErrorCode::ServerError,
                message: format!("no provider configured for model \"{}\"", run.config.model),
            });
            finish(&state, &run_id, run).await;
            return;
        };

        let history = match state
            .store
            .list_messages(
                &thread_id,
                &ag_store::Page {
                    limit: usize::MAX / 2,
                    order: ag_store::SortOrder::Asc,
                    after: None,
                    before: None,
                },
            )
            .await
        {
            Ok(listing) => listing.data,
            Err(e) => {
                run.status = RunStatus::Failed;
                run.failed_at = Some(now_unix());
                run.last_error = Some(LastError {
                    code: LastErrorCode::ServerError,
                    message: format!("loading thread history: {e}"),
                });
                finish(&state, &run_id, run).await;
                return;
            }
        };

        let messages = to_chat_messages(&run, &history);
        let prompt_chars: usize = messages
            .iter()
            .map(|m| m.content.extract_all_text().chars().count())
            .sum();

        let json_mode = matches!(
            run.config.response_format,
            Some(ag_domain::entities::ResponseFormat::JsonObject)
                | Some(ag_domain::entities::ResponseFormat::JsonSchema { .. })
        );
        let req = ChatRequest {
            messages,
            tools: assistant_tools_to_defs(&run),
            temperature: run.config.temperature,
            max_tokens: run.config.max_completion_tokens,
            json_mode,
            model: Some(resolved_model.clone()),
        };

        // Suspension point 2: mid-provider-call cancellation is honored by
        // racing the provider call against the cancel flag's eventual flip;
        // cooperative cancellation means we still let the in-flight call
        // finish, then check before committing its result.
        let stream = match provider.chat_stream(&req).await {
            Ok(s) => s,
            Err(e) => {
                run.status = RunStatus::Failed;
                run.failed_at = Some(now_unix());
                run.last_error = Some(LastError {
                    code: LastErrorCode::ServerError,
                    message: e.to_string(),
                });
                finish(&state, &run_id, run).await;
                return;
            }
        };

        let message_id = ag_domain::ids::message_id();
        state.stream_bus.publish(
            &run_id,
            SseEvent::named(
                "thread.message.created",
                serde_json::json!({ "id": message_id, "object": "thread.message", "thread_id": thread_id, "role": "assistant", "status": "in_progress" }),
            ),
        );

        let assembled = consume_stream(&state, &run_id, &message_id, stream).await;

        // Suspension point 3: between streaming chunks / tool execution —
        // checked again now that the provider call has unwound.
        if token.is_cancelled() {
            transition_cancelled(&state, &mut run).await;
            return;
        }

        let prompt_tokens = assembled.prompt_tokens.unwrap_or_else(|| estimate_tokens_for_chars(prompt_chars));
        let completion_tokens = assembled
            .completion_tokens
            .unwrap_or_else(|| estimate_tokens(&assembled.text));
        run.usage.add(prompt_tokens as u64, completion_tokens as u64);

        if let Some(err) = assembled.stream_error {
            run.status = RunStatus::Failed;
            run.failed_at = Some(now_unix());
            run.last_error = Some(LastError {
                code: LastErrorCode::ServerError,
                message: err,
            });
            finish(&state, &run_id, run).await;
            return;
        }

        let assistant_content = if assembled.text.is_empty() {
            Vec::new()
        } else {
            vec![ContentPart::Text {
                text: ag_domain::entities::TextValue {
                    value: assembled.text.clone(),
                    annotations: Vec::new(),
                },
            }]
        };
        let mut assistant_msg = Message::new(
            message_id.clone(),
            thread_id.clone(),
            now_unix(),
            MessageRole::Assistant,
            assistant_content,
        );
        assistant_msg.run_id = Some(run_id.clone());
        assistant_msg.assistant_id = Some(run.assistant_id.clone());
        if !assembled.tool_calls.is_empty() {
            assistant_msg.tool_calls = Some(
                assembled
                    .tool_calls
                    .iter()
                    .map(|c| EntityToolCall {
                        id: c.call_id.clone(),
                        name: c.tool_name.clone(),
                        arguments: c.arguments.clone(),
                    })
                    .collect(),
            );
        }
        if let Err(e) = state.store.append_message(assistant_msg.clone()).await {
            run.status = RunStatus::Failed;
            run.failed_at = Some(now_unix());
            run.last_error = Some(LastError {
                code: LastErrorCode::ServerError,
                message: format!("persisting assistant message: {e}"),
            });
            finish(&state, &run_id, run).await;
            return;
        }
        state.stream_bus.publish(&run_id, SseEvent::named("thread.message.completed", &assistant_msg));

        match assembled.finish_reason.as_deref() {
            Some("tool_calls") if !assembled.tool_calls.is_empty() => {
                let calls = assistant_msg.tool_calls.clone().unwrap_or_default();
                let (results, pending_external) = execute_tool_calls(&state, &run, &token, &calls).await;

                let mut store_failed = None;
                for (call, outcome) in results {
                    let mut tool_msg = Message::new(
                        ag_domain::ids::message_id(),
                        thread_id.clone(),
                        now_unix(),
                        MessageRole::Tool,
                        vec![ContentPart::Text {
                            text: ag_domain::entities::TextValue {
                                value: outcome.content,
                                annotations: Vec::new(),
                            },
                        }],
                    );
                    tool_msg.run_id = Some(run_id.clone());
                    tool_msg.assistant_id = Some(run.assistant_id.clone());
                    tool_msg.tool_call_id = Some(call.id.clone());
                    tool_msg.metadata.insert("tool_name".to_string(), call.name.clone());
                    if outcome.is_error {
                        tool_msg.metadata.insert("tool_error".to_string(), "true".to_string());
                    }
                    match state.store.append_message(tool_msg.clone()).await {
                        Ok(_) => {
                            state
                                .stream_bus
                                .publish(&run_id, SseEvent::named("thread.message.completed", &tool_msg));
                        }
                        Err(e) => {
                            store_failed = Some(e);
                            break;
                        }
                    }
                }

                if let Some(e) = store_failed {
                    run.status = RunStatus::Failed;
                    run.failed_at = Some(now_unix());
                    run.last_error = Some(LastError {
                        code: LastErrorCode::ServerError,
                        message: format!("persisting tool result message: {e}"),
                    });
                    finish(&state, &run_id, run).await;
                    return;
                }

                if !pending_external.is_empty() {
                    run.required_action = Some(RequiredAction {
                        kind: "submit_tool_outputs".to_string(),
                        submit_tool_outputs: SubmitToolOutputs {
                            tool_calls: pending_external,
                        },
                    });
                    run.status = RunStatus::RequiresAction;
                    finish(&state, &run_id, run).await;
                    return;
                }

                // Every call in this iteration resolved in-process — persist
                // the accumulated usage/iteration count and loop for another
                // provider turn instead of suspending.
                let _ = state.store.update_run(run.clone()).await;
            }
            Some("length") => {
                run.incomplete_details = Some(IncompleteDetails {
                    reason: IncompleteReason::MaxCompletionTokens,
                });
                run.status = RunStatus::Incomplete;
                run.completed_at = Some(now_unix());
                finish(&state, &run_id, run).await;
                return;
            }
            Some("error") => {
                run.status = RunStatus::Failed;
                run.failed_at = Some(now_unix());
                run.last_error = Some(LastError {
                    code: LastErrorCode::ServerError,
                    message: "provider reported an error finish reason".to_string(),
                });
                finish(&state, &run_id, run).await;
                return;
            }
            _ => {
                run.status = RunStatus::Completed;
                run.completed_at = Some(now_unix());
                finish(&state, &run_id, run).await;
                return;
            }
        }
    }
}

/// Resume a Run previously suspended in `requires_action` after the caller
/// has appended tool-result messages via `submit_tool_outputs`. Iteration
/// counting and the cap check happen inside `drive`'s own loop, the same as
/// every other pass.
pub fn resume(state: Arc<AppState>, thread_id: String, run_id: String) {
    state.stream_bus.open(&run_id);
    tokio::spawn(async move {
        drive(state, thread_id, run_id).await;
    });
}

async fn finish(state: &Arc<AppState>, run_id: &str, run: Run) {
    let terminal = run.status.is_terminal() || run.status == RunStatus::RequiresAction;
    let event_name = match run.status {
        RunStatus::RequiresAction => "thread.run.requires_action",
        RunStatus::Completed => "thread.run.completed",
        RunStatus::Failed => "thread.run.failed",
        RunStatus::Cancelled => "thread.run.cancelled",
        RunStatus::Expired => "thread.run.expired",
        RunStatus::Incomplete => "thread.run.incomplete",
        _ => "thread.run.in_progress",
    };
    let _ = state.store.update_run(run.clone()).await;
    state.stream_bus.publish(run_id, SseEvent::named(event_name, &run));
    if terminal {
        state.stream_bus.publish(run_id, SseEvent::Done);
        state.stream_bus.close(run_id);
        if run.status != RunStatus::RequiresAction {
            state.cancel_map.remove(run_id);
        }
    }
}

async fn transition_cancelled(state: &Arc<AppState>, run: &mut Run) {
    run.status = RunStatus::Cancelled;
    run.cancelled_at = Some(now_unix());
    let run_id = run.id.clone();
    finish(state, &run_id, run.clone()).await;
}

async fn transition_expired(state: &Arc<AppState>, run: &mut Run) {
    run.status = RunStatus::Expired;
    let run_id = run.id.clone();
    finish(state, &run_id, run.clone()).await;
}

fn estimate_tokens_for_chars(chars: usize) -> u32 {
    ((chars as f64) / 4.0).ceil() as u32
}

pub fn default_expiry(created_at: i64) -> i64 {
    created_at + DEFAULT_RUN_TIMEOUT_SECS
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Spawn the engine loop as a detached task, so the HTTP handler that
/// created the Run can return its `queued` snapshot (or open an SSE stream)
/// without blocking on the first provider call.
pub fn spawn(state: Arc<AppState>, thread_id: String, run_id: String) {
    state.stream_bus.open(&run_id);
    tokio::spawn(async move {
        drive(state, thread_id, run_id).await;
    });
}
