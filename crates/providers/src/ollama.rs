//! Ollama adapter.
//!
//! Unlike the other HTTP adapters, Ollama's native `/api/chat` endpoint
//! streams newline-delimited JSON objects rather than SSE `data:` frames, so
//! this adapter buffers and splits on `\n` instead of reusing `crate::sse`.
//! Auth is optional: most Ollama deployments are unauthenticated localhost
//! daemons, but a bearer token is sent when one is configured (e.g. behind a
//! reverse proxy).

use crate::auth::AuthRotator;
use crate::traits::{ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, LlmProvider};
use crate::util::from_reqwest;
use ag_domain::capability::LlmCapabilities;
use ag_domain::chat::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};
use ag_domain::config::{ProviderAuthMode, ProviderConfig};
use ag_domain::error::{Error, ProviderErrorKind, Result};
use ag_domain::stream::{BoxStream, StreamEvent, Usage};
use serde_json::Value;
use std::sync::Arc;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An LLM provider adapter for Ollama's native `/api/chat` endpoint.
pub struct OllamaProvider {
    id: String,
    base_url: String,
    auth: Option<Arc<AuthRotator>>,
    default_model: String,
    capabilities: LlmCapabilities,
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Create a new provider from the deserialized provider config.
    pub fn from_config(cfg: &ProviderConfig) -> Result<Self> {
        let auth = if cfg.auth.mode == ProviderAuthMode::None {
            None
        } else {
            Some(Arc::new(AuthRotator::from_auth_config(&cfg.auth)?))
        };

        let default_model = cfg.default_model.clone().unwrap_or_else(|| "llama3.1".into());

        let capabilities = LlmCapabilities {
            supports_tools: ag_domain::capability::ToolSupport::Basic,
            supports_streaming: true,
            supports_json_mode: true,
            supports_vision: false,
            context_window_tokens: None,
            max_output_tokens: None,
        };

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            auth,
            default_model,
            capabilities,
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(url).header("Content-Type", "application/json");
        if let Some(auth) = &self.auth {
            let entry = auth.next_key();
            builder = builder.header("Authorization", format!("Bearer {}", entry.key));
        }
        builder
    }

    fn build_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let model = req.model.clone().unwrap_or_else(|| self.default_model.clone());
        let messages: Vec<Value> = req.messages.iter().map(msg_to_ollama).collect();

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": stream,
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_ollama).collect();
            body["tools"] = Value::Array(tools);
        }
        if req.json_mode {
            body["format"] = Value::String("json".into());
        }

        let mut options = serde_json::json!({});
        if let Some(temp) = req.temperature {
            options["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            options["num_predict"] = serde_json::json!(max);
        }
        if options.as_object().is_some_and(|o| !o.is_empty()) {
            body["options"] = options;
        }

        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_ollama(msg: &Message) -> Value {
    match msg.role {
        Role::Assistant => assistant_to_ollama(msg),
        Role::Tool => tool_result_to_ollama(msg),
        _ => serde_json::json!({
            "role": role_to_str(msg.role),
            "content": msg.content.extract_all_text(),
        }),
    }
}

fn assistant_to_ollama(msg: &Message) -> Value {
    let mut text = String::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    match &msg.content {
        MessageContent::Text(t) => text.push_str(t),
        MessageContent::Parts(parts) => {
            for p in parts {
                match p {
                    ContentPart::Text { text: t } => text.push_str(t),
                    ContentPart::ToolUse { name, input, .. } => {
                        tool_calls.push(serde_json::json!({
                            "function": {
                                "name": name,
                                "arguments": input,
                            }
                        }));
                    }
                    _ => {}
                }
            }
        }
    }

    let mut obj = serde_json::json!({
        "role": "assistant",
        "content": text,
    });
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn tool_result_to_ollama(msg: &Message) -> Value {
    let content = match &msg.content {
        MessageContent::Text(t) => t.clone(),
        MessageContent::Parts(parts) => parts
            .iter()
            .find_map(|p| match p {
                ContentPart::ToolResult { content, .. } => Some(content.clone()),
                _ => None,
            })
            .unwrap_or_default(),
    };
    serde_json::json!({
        "role": "tool",
        "content": content,
    })
}

fn tool_to_ollama(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_ollama_response(body: &Value) -> Result<ChatResponse> {
    let message = body.get("message").ok_or_else(|| Error::Provider {
        provider: "ollama".into(),
        kind: ProviderErrorKind::InvalidResponse,
        message: "no 'message' field in response".into(),
    })?;

    let content = message.get("content").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let tool_calls = parse_ollama_tool_calls(message);

    let model = body.get("model").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();

    let finish_reason = body
        .get("done_reason")
        .and_then(|v| v.as_str())
        .map(|s| match s {
            "stop" if !tool_calls.is_empty() => "tool_calls".to_string(),
            other => other.to_string(),
        })
        .or_else(|| body.get("done").and_then(|v| v.as_bool()).and_then(|d| d.then(|| "stop".to_string())));

    let usage = parse_ollama_usage(body);

    Ok(ChatResponse {
        content,
        tool_calls,
        usage,
        model,
        finish_reason,
    })
}

fn parse_ollama_tool_calls(message: &Value) -> Vec<ToolCall> {
    let arr = match message.get("tool_calls").and_then(|v| v.as_array()) {
        Some(a) => a,
        None => return Vec::new(),
    };
    arr.iter()
        .filter_map(|tc| {
            let func = tc.get("function")?;
            let tool_name = func.get("name")?.as_str()?.to_string();
            let arguments = func.get("arguments").cloned().unwrap_or(Value::Object(Default::default()));
            // Ollama does not assign call ids; synthesize one so downstream
            // tool-result correlation (call_id) still works.
            let call_id = format!("call_{}", uuid::Uuid::new_v4());
            Some(ToolCall {
                call_id,
                tool_name,
                arguments,
            })
        })
        .collect()
}

fn parse_ollama_usage(body: &Value) -> Option<Usage> {
    let prompt = body.get("prompt_eval_count")?.as_u64()? as u32;
    let completion = body.get("eval_count").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    Some(Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: prompt + completion,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// NDJSON streaming
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Extract complete newline-delimited JSON lines from a buffer, draining
/// consumed bytes and leaving any trailing partial line for the next call.
/// Generalizes [`crate::sse::drain_data_lines`]'s buffering approach to a
/// delimiter-per-line framing instead of a `data:`-prefixed, blank-line
/// delimited one.
pub(crate) fn drain_json_lines(buffer: &mut String) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.find('\n') {
        let line: String = buffer.drain(..=pos).collect();
        let line = line.trim();
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    lines
}

fn parse_ollama_ndjson_line(line: &str) -> Vec<Result<StreamEvent>> {
    let v: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let mut events = Vec::new();

    if let Some(message) = v.get("message") {
        if let Some(text) = message.get("content").and_then(|c| c.as_str()) {
            if !text.is_empty() {
                events.push(Ok(StreamEvent::Token { text: text.to_string() }));
            }
        }
        for tc in parse_ollama_tool_calls(message) {
            events.push(Ok(StreamEvent::ToolCallStarted {
                call_id: tc.call_id.clone(),
                tool_name: tc.tool_name.clone(),
            }));
            events.push(Ok(StreamEvent::ToolCallFinished {
                call_id: tc.call_id,
                tool_name: tc.tool_name,
                arguments: tc.arguments,
            }));
        }
    }

    if v.get("done").and_then(|d| d.as_bool()).unwrap_or(false) {
        let finish_reason = v.get("done_reason").and_then(|v| v.as_str()).map(String::from);
        events.push(Ok(StreamEvent::Done {
            usage: parse_ollama_usage(&v),
            finish_reason: finish_reason.or_else(|| Some("stop".into())),
        }));
    }

    events
}

fn ndjson_response_stream(
    response: reqwest::Response,
) -> BoxStream<'static, Result<StreamEvent>> {
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut done_emitted = false;

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for line in drain_json_lines(&mut buffer) {
                        for event in parse_ollama_ndjson_line(&line) {
                            if matches!(&event, Ok(StreamEvent::Done { .. })) {
                                done_emitted = true;
                            }
                            yield event;
                        }
                    }
                }
                Ok(None) => {
                    if !buffer.trim().is_empty() {
                        for event in parse_ollama_ndjson_line(buffer.trim()) {
                            if matches!(&event, Ok(StreamEvent::Done { .. })) {
                                done_emitted = true;
                            }
                            yield event;
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            }
        }

        if !done_emitted {
            yield Ok(StreamEvent::Done { usage: None, finish_reason: Some("stop".into()) });
        }
    };

    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OllamaProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/api/chat", self.base_url);
        let body = self.build_body(req, false);

        tracing::debug!(provider = %self.id, url = %url, "ollama chat request");

        let resp = self.authed_post(&url).json(&body).send().await.map_err(from_reqwest)?;
        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            return Err(Error::Provider {
                provider: self.id.clone(),
                kind: ProviderErrorKind::from_status(status.as_u16()),
                message: format!("HTTP {} - {}", status.as_u16(), resp_text),
            });
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        parse_ollama_response(&resp_json)
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/api/chat", self.base_url);
        let body = self.build_body(req, true);

        tracing::debug!(provider = %self.id, url = %url, "ollama stream request");

        let resp = self.authed_post(&url).json(&body).send().await.map_err(from_reqwest)?;
        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.map_err(from_reqwest)?;
            return Err(Error::Provider {
                provider: self.id.clone(),
                kind: ProviderErrorKind::from_status(status.as_u16()),
                message: format!("HTTP {} - {}", status.as_u16(), err_text),
            });
        }

        Ok(ndjson_response_stream(resp))
    }

    async fn embeddings(&self, req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        let model = req.model.unwrap_or_else(|| "nomic-embed-text".into());
        let url = format!("{}/api/embed", self.base_url);
        let body = serde_json::json!({ "model": model, "input": req.input });

        let resp = self.authed_post(&url).json(&body).send().await.map_err(from_reqwest)?;
        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            return Err(Error::Provider {
                provider: self.id.clone(),
                kind: ProviderErrorKind::from_status(status.as_u16()),
                message: format!("HTTP {} - {}", status.as_u16(), resp_text),
            });
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        let embed_arr = resp_json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| Error::Provider {
                provider: self.id.clone(),
                kind: ProviderErrorKind::InvalidResponse,
                message: "missing 'embeddings' array in response".into(),
            })?;

        let embeddings: Vec<Vec<f32>> = embed_arr
            .iter()
            .filter_map(|item| {
                let arr = item.as_array()?;
                Some(arr.iter().filter_map(|v| v.as_f64().map(|f| f as f32)).collect())
            })
            .collect();

        Ok(EmbeddingsResponse { embeddings })
    }

    fn capabilities(&self) -> &LlmCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_json_lines_splits_on_newline() {
        let mut buf = String::from("{\"a\":1}\n{\"b\":2}\n");
        let lines = drain_json_lines(&mut buf);
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_json_lines_keeps_partial_trailing_line() {
        let mut buf = String::from("{\"a\":1}\n{\"partial\":");
        let lines = drain_json_lines(&mut buf);
        assert_eq!(lines, vec!["{\"a\":1}"]);
        assert_eq!(buf, "{\"partial\":");
    }

    #[test]
    fn parse_ndjson_token_line() {
        let line = r#"{"message":{"role":"assistant","content":"hi"},"done":false}"#;
        let events = parse_ollama_ndjson_line(line);
        assert_eq!(events.len(), 1);
        match events.into_iter().next().unwrap().unwrap() {
            StreamEvent::Token { text } => assert_eq!(text, "hi"),
            other => panic!("expected Token, got {other:?}"),
        }
    }

    #[test]
    fn parse_ndjson_done_line_emits_done() {
        let line = r#"{"message":{"role":"assistant","content":""},"done":true,"done_reason":"stop","prompt_eval_count":10,"eval_count":5}"#;
        let events = parse_ollama_ndjson_line(line);
        assert!(events
            .iter()
            .any(|e| matches!(e, Ok(StreamEvent::Done { .. }))));
    }

    #[test]
    fn parse_response_extracts_tool_calls() {
        let body = serde_json::json!({
            "model": "llama3.1",
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [{"function": {"name": "get_weather", "arguments": {"city": "Boston"}}}]
            },
            "done": true,
            "done_reason": "stop",
        });
        let resp = parse_ollama_response(&body).unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].tool_name, "get_weather");
        assert_eq!(resp.finish_reason.as_deref(), Some("tool_calls"));
    }
}
