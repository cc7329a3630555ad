//! AWS Bedrock adapter, using the native Converse / ConverseStream API.
//!
//! Unlike the other adapters this one does not speak HTTP + JSON directly:
//! the `aws-sdk-bedrockruntime` client handles SigV4 signing and transport,
//! and we translate to/from its typed `Message`/`ContentBlock` builders
//! instead of building `serde_json::Value` bodies by hand.

use crate::traits::{ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, LlmProvider};
use ag_domain::capability::LlmCapabilities;
use ag_domain::chat::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};
use ag_domain::config::ProviderConfig;
use ag_domain::error::{Error, ProviderErrorKind, Result};
use ag_domain::stream::{BoxStream, StreamEvent, Usage};
use aws_sdk_bedrockruntime::types::{
    ContentBlock, ConversationRole, ConverseStreamOutput, Message as BedrockMessage, SystemContentBlock,
    Tool, ToolConfiguration, ToolInputSchema, ToolResultBlock, ToolResultContentBlock, ToolSpec,
    ToolUseBlock,
};
use aws_smithy_types::{Document, Number};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An LLM provider adapter for AWS Bedrock's Converse API.
///
/// Credentials come from the standard AWS provider chain (environment,
/// shared config/credentials files, IMDS, web identity). `base_url` in the
/// provider config is interpreted as the AWS region when it does not look
/// like a URL, and as an endpoint override otherwise (for VPC endpoints /
/// local testing against a Bedrock-compatible proxy).
pub struct BedrockProvider {
    id: String,
    client: aws_sdk_bedrockruntime::Client,
    default_model: String,
    capabilities: LlmCapabilities,
}

impl BedrockProvider {
    /// Create a new provider from the deserialized provider config.
    ///
    /// Loads the AWS SDK config via the default credential chain (env,
    /// shared config/credentials files, IMDS, web identity). Async because
    /// credential resolution may itself make network calls (e.g. IMDS, STS
    /// AssumeRoleWithWebIdentity).
    pub async fn from_config(cfg: &ProviderConfig) -> Result<Self> {
        let region = if cfg.base_url.starts_with("http://") || cfg.base_url.starts_with("https://") {
            None
        } else if cfg.base_url.is_empty() {
            None
        } else {
            Some(cfg.base_url.clone())
        };

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_bedrockruntime::config::Builder::from(&sdk_config);
        if cfg.base_url.starts_with("http://") || cfg.base_url.starts_with("https://") {
            builder = builder.endpoint_url(cfg.base_url.clone());
        }
        let client = aws_sdk_bedrockruntime::Client::from_conf(builder.build());

        let default_model = cfg
            .default_model
            .clone()
            .unwrap_or_else(|| "anthropic.claude-3-5-sonnet-20241022-v2:0".into());

        let capabilities = LlmCapabilities {
            supports_tools: ag_domain::capability::ToolSupport::StrictJson,
            supports_streaming: true,
            supports_json_mode: false,
            supports_vision: true,
            context_window_tokens: Some(200_000),
            max_output_tokens: Some(8_192),
        };

        Ok(Self {
            id: cfg.id.clone(),
            client,
            default_model,
            capabilities,
        })
    }

    fn effective_model(&self, req: &ChatRequest) -> String {
        req.model.clone().unwrap_or_else(|| self.default_model.clone())
    }

    fn build_messages_and_system(
        &self,
        req: &ChatRequest,
    ) -> Result<(Vec<SystemContentBlock>, Vec<BedrockMessage>)> {
        let mut system = Vec::new();
        let mut messages = Vec::new();

        for msg in &req.messages {
            match msg.role {
                Role::System => {
                    system.push(SystemContentBlock::Text(msg.content.extract_all_text()));
                }
                Role::User => messages.push(user_to_bedrock(msg)?),
                Role::Assistant => messages.push(assistant_to_bedrock(msg)?),
                Role::Tool => messages.push(tool_result_to_bedrock(msg)?),
            }
        }

        Ok((system, messages))
    }

    fn build_tool_config(&self, req: &ChatRequest) -> Result<Option<ToolConfiguration>> {
        if req.tools.is_empty() {
            return Ok(None);
        }
        let tools: Result<Vec<Tool>> = req.tools.iter().map(tool_to_bedrock).collect();
        let config = ToolConfiguration::builder()
            .set_tools(Some(tools?))
            .build()
            .map_err(|e| Error::Provider {
                provider: self.id.clone(),
                kind: ProviderErrorKind::ConfigError,
                message: format!("invalid tool configuration: {e}"),
            })?;
        Ok(Some(config))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message translation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn value_to_document(v: &serde_json::Value) -> Document {
    match v {
        serde_json::Value::Null => Document::Null,
        serde_json::Value::Bool(b) => Document::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Document::Number(Number::NegInt(i))
            } else if let Some(u) = n.as_u64() {
                Document::Number(Number::PosInt(u))
            } else {
                Document::Number(Number::Float(n.as_f64().unwrap_or(0.0)))
            }
        }
        serde_json::Value::String(s) => Document::String(s.clone()),
        serde_json::Value::Array(arr) => Document::Array(arr.iter().map(value_to_document).collect()),
        serde_json::Value::Object(obj) => Document::Object(
            obj.iter()
                .map(|(k, v)| (k.clone(), value_to_document(v)))
                .collect(),
        ),
    }
}

fn document_to_value(doc: &Document) -> serde_json::Value {
    match doc {
        Document::Null => serde_json::Value::Null,
        Document::Bool(b) => serde_json::Value::Bool(*b),
        Document::Number(Number::PosInt(u)) => serde_json::json!(u),
        Document::Number(Number::NegInt(i)) => serde_json::json!(i),
        Document::Number(Number::Float(f)) => serde_json::json!(f),
        Document::String(s) => serde_json::Value::String(s.clone()),
        Document::Array(arr) => serde_json::Value::Array(arr.iter().map(document_to_value).collect()),
        Document::Object(obj) => serde_json::Value::Object(
            obj.iter()
                .map(|(k, v)| (k.clone(), document_to_value(v)))
                .collect(),
        ),
    }
}

fn user_to_bedrock(msg: &Message) -> Result<BedrockMessage> {
    let blocks = content_to_blocks(&msg.content);
    BedrockMessage::builder()
        .role(ConversationRole::User)
        .set_content(Some(blocks))
        .build()
        .map_err(|e| Error::Provider {
            provider: "bedrock".into(),
            kind: ProviderErrorKind::InvalidResponse,
            message: format!("failed to build user message: {e}"),
        })
}

fn assistant_to_bedrock(msg: &Message) -> Result<BedrockMessage> {
    let mut blocks = Vec::new();
    match &msg.content {
        MessageContent::Text(t) => blocks.push(ContentBlock::Text(t.clone())),
        MessageContent::Parts(parts) => {
            for p in parts {
                match p {
                    ContentPart::Text { text } => blocks.push(ContentBlock::Text(text.clone())),
                    ContentPart::ToolUse { id, name, input } => {
                        let tool_use = ToolUseBlock::builder()
                            .tool_use_id(id.clone())
                            .name(name.clone())
                            .input(value_to_document(input))
                            .build()
                            .map_err(|e| Error::Provider {
                                provider: "bedrock".into(),
                                kind: ProviderErrorKind::InvalidResponse,
                                message: format!("failed to build tool_use block: {e}"),
                            })?;
                        blocks.push(ContentBlock::ToolUse(tool_use));
                    }
                    _ => {}
                }
            }
        }
    }
    BedrockMessage::builder()
        .role(ConversationRole::Assistant)
        .set_content(Some(blocks))
        .build()
        .map_err(|e| Error::Provider {
            provider: "bedrock".into(),
            kind: ProviderErrorKind::InvalidResponse,
            message: format!("failed to build assistant message: {e}"),
        })
}

fn tool_result_to_bedrock(msg: &Message) -> Result<BedrockMessage> {
    let mut blocks = Vec::new();
    if let MessageContent::Parts(parts) = &msg.content {
        for p in parts {
            if let ContentPart::ToolResult {
                tool_use_id,
                content,
                is_error,
                ..
            } = p
            {
                let result = ToolResultBlock::builder()
                    .tool_use_id(tool_use_id.clone())
                    .content(ToolResultContentBlock::Text(content.clone()))
                    .status(if *is_error {
                        aws_sdk_bedrockruntime::types::ToolResultStatus::Error
                    } else {
                        aws_sdk_bedrockruntime::types::ToolResultStatus::Success
                    })
                    .build()
                    .map_err(|e| Error::Provider {
                        provider: "bedrock".into(),
                        kind: ProviderErrorKind::InvalidResponse,
                        message: format!("failed to build tool_result block: {e}"),
                    })?;
                blocks.push(ContentBlock::ToolResult(result));
            }
        }
    }
    BedrockMessage::builder()
        .role(ConversationRole::User)
        .set_content(Some(blocks))
        .build()
        .map_err(|e| Error::Provider {
            provider: "bedrock".into(),
            kind: ProviderErrorKind::InvalidResponse,
            message: format!("failed to build tool result message: {e}"),
        })
}

fn content_to_blocks(content: &MessageContent) -> Vec<ContentBlock> {
    match content {
        MessageContent::Text(t) => vec![ContentBlock::Text(t.clone())],
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(ContentBlock::Text(text.clone())),
                _ => None,
            })
            .collect(),
    }
}

fn tool_to_bedrock(tool: &ToolDefinition) -> Result<Tool> {
    let schema = ToolInputSchema::Json(value_to_document(&tool.parameters));
    let spec = ToolSpec::builder()
        .name(tool.name.clone())
        .description(tool.description.clone())
        .input_schema(schema)
        .build()
        .map_err(|e| Error::Provider {
            provider: "bedrock".into(),
            kind: ProviderErrorKind::ConfigError,
            message: format!("invalid tool spec for \"{}\": {e}", tool.name),
        })?;
    Ok(Tool::ToolSpec(spec))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for BedrockProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let model = self.effective_model(req);
        let (system, messages) = self.build_messages_and_system(req)?;
        let tool_config = self.build_tool_config(req)?;

        tracing::debug!(provider = %self.id, model = %model, "bedrock converse request");

        let mut call = self
            .client
            .converse()
            .model_id(&model)
            .set_system(Some(system))
            .set_messages(Some(messages));
        if let Some(tc) = tool_config {
            call = call.tool_config(tc);
        }
        if let Some(max) = req.max_tokens {
            call = call.inference_config(
                aws_sdk_bedrockruntime::types::InferenceConfiguration::builder()
                    .max_tokens(max as i32)
                    .set_temperature(req.temperature)
                    .build(),
            );
        }

        let output = call.send().await.map_err(|e| Error::Provider {
            provider: self.id.clone(),
            kind: ProviderErrorKind::Unavailable,
            message: format!("converse call failed: {e}"),
        })?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        if let Some(aws_sdk_bedrockruntime::types::ConverseOutput::Message(msg)) = output.output {
            for block in msg.content {
                match block {
                    ContentBlock::Text(t) => content.push_str(&t),
                    ContentBlock::ToolUse(tu) => tool_calls.push(ToolCall {
                        call_id: tu.tool_use_id,
                        tool_name: tu.name,
                        arguments: document_to_value(&tu.input),
                    }),
                    _ => {}
                }
            }
        }

        let usage = output.usage.map(|u| Usage {
            prompt_tokens: u.input_tokens.max(0) as u32,
            completion_tokens: u.output_tokens.max(0) as u32,
            total_tokens: u.total_tokens.max(0) as u32,
        });

        let finish_reason = Some(match output.stop_reason {
            aws_sdk_bedrockruntime::types::StopReason::EndTurn => "stop".to_string(),
            aws_sdk_bedrockruntime::types::StopReason::ToolUse => "tool_calls".to_string(),
            aws_sdk_bedrockruntime::types::StopReason::MaxTokens => "length".to_string(),
            other => other.as_str().to_lowercase(),
        });

        Ok(ChatResponse {
            content,
            tool_calls,
            usage,
            model,
            finish_reason,
        })
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let model = self.effective_model(req);
        let (system, messages) = self.build_messages_and_system(req)?;
        let tool_config = self.build_tool_config(req)?;
        let provider_id = self.id.clone();

        tracing::debug!(provider = %self.id, model = %model, "bedrock converse_stream request");

        let mut call = self
            .client
            .converse_stream()
            .model_id(&model)
            .set_system(Some(system))
            .set_messages(Some(messages));
        if let Some(tc) = tool_config {
            call = call.tool_config(tc);
        }

        let output = call.send().await.map_err(|e| Error::Provider {
            provider: provider_id.clone(),
            kind: ProviderErrorKind::Unavailable,
            message: format!("converse_stream call failed: {e}"),
        })?;

        let mut stream = output.stream;
        let stream = async_stream::stream! {
            // Active tool_use block index -> (call_id, name).
            let mut active: Option<(String, String)> = None;
            loop {
                match stream.recv().await {
                    Ok(Some(ConverseStreamOutput::ContentBlockStart(ev))) => {
                        if let Some(aws_sdk_bedrockruntime::types::ContentBlockStart::ToolUse(tu)) = ev.start {
                            active = Some((tu.tool_use_id.clone(), tu.name.clone()));
                            yield Ok(StreamEvent::ToolCallStarted {
                                call_id: tu.tool_use_id,
                                tool_name: tu.name,
                            });
                        }
                    }
                    Ok(Some(ConverseStreamOutput::ContentBlockDelta(ev))) => {
                        match ev.delta {
                            Some(aws_sdk_bedrockruntime::types::ContentBlockDelta::Text(t)) => {
                                yield Ok(StreamEvent::Token { text: t });
                            }
                            Some(aws_sdk_bedrockruntime::types::ContentBlockDelta::ToolUse(tu)) => {
                                if let Some((call_id, _)) = &active {
                                    yield Ok(StreamEvent::ToolCallDelta {
                                        call_id: call_id.clone(),
                                        delta: tu.input,
                                    });
                                }
                            }
                            _ => {}
                        }
                    }
                    Ok(Some(ConverseStreamOutput::ContentBlockStop(_))) => {
                        active = None;
                    }
                    Ok(Some(ConverseStreamOutput::MessageStop(ev))) => {
                        let finish_reason = Some(match ev.stop_reason {
                            aws_sdk_bedrockruntime::types::StopReason::EndTurn => "stop".to_string(),
                            aws_sdk_bedrockruntime::types::StopReason::ToolUse => "tool_calls".to_string(),
                            aws_sdk_bedrockruntime::types::StopReason::MaxTokens => "length".to_string(),
                            other => other.as_str().to_lowercase(),
                        });
                        yield Ok(StreamEvent::Done { usage: None, finish_reason });
                    }
                    Ok(Some(ConverseStreamOutput::Metadata(ev))) => {
                        if let Some(u) = ev.usage {
                            yield Ok(StreamEvent::Done {
                                usage: Some(Usage {
                                    prompt_tokens: u.input_tokens.max(0) as u32,
                                    completion_tokens: u.output_tokens.max(0) as u32,
                                    total_tokens: u.total_tokens.max(0) as u32,
                                }),
                                finish_reason: None,
                            });
                        }
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(Error::Provider {
                            provider: provider_id.clone(),
                            kind: ProviderErrorKind::Unavailable,
                            message: format!("stream error: {e}"),
                        });
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn embeddings(&self, _req: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        Err(Error::Provider {
            provider: self.id.clone(),
            kind: ProviderErrorKind::NotImplemented,
            message: "Bedrock embeddings are not implemented; use Titan Embeddings via a \
                      dedicated bedrock-runtime InvokeModel call, or use an OpenAI-compatible \
                      or Google provider for embeddings"
                .into(),
        })
    }

    fn capabilities(&self) -> &LlmCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}
