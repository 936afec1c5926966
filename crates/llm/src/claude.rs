//! Claude backend with native tool use
//!
//! Implements the Anthropic Messages API with tool_use content blocks. The
//! dialogue machine feeds the fused turn list plus the two tool families and
//! receives either final text or tool-call requests.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use admissions_agent_config::LlmSettings;
use admissions_agent_core::{
    CollaboratorError, CollaboratorResult, FinishReason, GenerationResult, LanguageModel,
    Message, Role, ToolCall, ToolDefinition,
};

use crate::LlmError;

/// Configuration for the Claude backend.
#[derive(Debug, Clone)]
pub struct ClaudeConfig {
    pub api_key: String,
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub timeout: Duration,
    /// API endpoint (overridable for tests/proxies)
    pub endpoint: String,
}

impl ClaudeConfig {
    /// Build from settings, resolving the API key from the configured
    /// environment variable.
    pub fn from_settings(settings: &LlmSettings) -> Result<Self, LlmError> {
        let api_key = std::env::var(&settings.api_key_env).map_err(|_| {
            LlmError::Configuration(format!("{} not set in environment", settings.api_key_env))
        })?;
        Ok(Self {
            api_key,
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature.clamp(0.0, 1.0),
            timeout: settings.timeout(),
            endpoint: settings.endpoint.clone(),
        })
    }
}

/// Claude Messages API backend.
pub struct ClaudeBackend {
    config: ClaudeConfig,
    client: Client,
}

impl ClaudeBackend {
    pub fn new(config: ClaudeConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::Configuration("API key is empty".to_string()));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;
        Ok(Self { config, client })
    }

    /// Convert neutral messages to API messages.
    ///
    /// - `System` entries inside the list (ephemeral pipeline notes) become
    ///   user-role messages; their content already carries its own marker.
    /// - `Tool` results become user-role `tool_result` blocks.
    /// - Consecutive same-role messages are fused: the API requires strict
    ///   user/assistant alternation.
    fn convert_messages(&self, messages: &[Message]) -> Vec<ApiMessage> {
        let mut converted: Vec<ApiMessage> = Vec::with_capacity(messages.len());

        for message in messages {
            let (role, blocks) = match message.role {
                Role::System | Role::User => (
                    "user",
                    vec![ContentBlock::Text { text: message.content.clone() }],
                ),
                Role::Assistant => {
                    let mut blocks = Vec::new();
                    if !message.content.is_empty() {
                        blocks.push(ContentBlock::Text { text: message.content.clone() });
                    }
                    for call in &message.tool_calls {
                        blocks.push(ContentBlock::ToolUse {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            input: call.arguments.clone(),
                        });
                    }
                    ("assistant", blocks)
                }
                Role::Tool => (
                    "user",
                    vec![ContentBlock::ToolResult {
                        tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                        content: message.content.clone(),
                    }],
                ),
            };

            if blocks.is_empty() {
                continue;
            }

            match converted.last_mut() {
                Some(last) if last.role == role => last.content.extend(blocks),
                _ => converted.push(ApiMessage { role: role.to_string(), content: blocks }),
            }
        }

        converted
    }

    fn convert_tools(&self, tools: &[ToolDefinition]) -> Vec<ApiTool> {
        tools
            .iter()
            .map(|t| ApiTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
            })
            .collect()
    }

    fn parse_response(&self, response: ApiResponse) -> GenerationResult {
        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for block in response.content {
            match block {
                ContentBlock::Text { text: t } => {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(&t);
                }
                ContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall { id, name, arguments: input });
                }
                ContentBlock::ToolResult { .. } => {}
            }
        }

        let finish_reason = match response.stop_reason.as_deref() {
            Some("tool_use") => FinishReason::ToolUse,
            Some("max_tokens") => FinishReason::MaxTokens,
            _ => FinishReason::Stop,
        };

        GenerationResult { text, tool_calls, finish_reason }
    }

    async fn generate_inner(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<GenerationResult, LlmError> {
        let api_messages = self.convert_messages(messages);
        let api_tools = self.convert_tools(tools);

        let request = ApiRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            system: if system.is_empty() { None } else { Some(system.to_string()) },
            messages: api_messages,
            tools: if api_tools.is_empty() { None } else { Some(api_tools) },
            temperature: Some(self.config.temperature),
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.endpoint))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("HTTP {}: {}", status, error_text)));
        }

        let response: ApiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let result = self.parse_response(response);
        tracing::debug!(
            model = %self.config.model,
            tool_calls = result.tool_calls.len(),
            finish = ?result.finish_reason,
            "Model generation complete"
        );
        Ok(result)
    }
}

#[async_trait]
impl LanguageModel for ClaudeBackend {
    async fn generate(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> CollaboratorResult<GenerationResult> {
        self.generate_inner(system, messages, tools)
            .await
            .map_err(CollaboratorError::from)
    }
}

// --- API wire types ---

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ApiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
struct ApiTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> ClaudeBackend {
        ClaudeBackend::new(ClaudeConfig {
            api_key: "test-key".into(),
            model: "claude-3-5-haiku-20241022".into(),
            max_tokens: 512,
            temperature: 0.7,
            timeout: Duration::from_secs(5),
            endpoint: "http://localhost:0".into(),
        })
        .unwrap()
    }

    #[test]
    fn system_notes_and_tool_results_become_user_blocks() {
        let backend = backend();
        let messages = vec![
            Message::user("Hola"),
            Message::assistant("¿Qué plantel te interesa?"),
            Message::system("[SISTEMA]: dato pre-capturado"),
            Message::user("Puebla"),
        ];
        let converted = backend.convert_messages(&messages);
        assert_eq!(converted.len(), 3);
        // system note fused with the following user message
        assert_eq!(converted[2].role, "user");
        assert_eq!(converted[2].content.len(), 2);
    }

    #[test]
    fn assistant_tool_calls_round_trip() {
        let backend = backend();
        let mut assistant = Message::assistant("");
        assistant.tool_calls.push(ToolCall {
            id: "tu_1".into(),
            name: "get_levels_by_campus".into(),
            arguments: serde_json::json!({"campus_name": "Puebla"}),
        });
        let messages = vec![
            Message::user("niveles?"),
            assistant,
            Message::tool_result("tu_1", "PRIMARIA:\n- Primaria Puebla"),
        ];
        let converted = backend.convert_messages(&messages);
        assert_eq!(converted[1].role, "assistant");
        assert!(matches!(converted[1].content[0], ContentBlock::ToolUse { .. }));
        assert!(matches!(converted[2].content[0], ContentBlock::ToolResult { .. }));
    }

    #[test]
    fn parse_response_extracts_tool_calls() {
        let backend = backend();
        let response = ApiResponse {
            content: vec![
                ContentBlock::Text { text: "Déjame consultar".into() },
                ContentBlock::ToolUse {
                    id: "tu_9".into(),
                    name: "get_campus_info".into(),
                    input: serde_json::json!({"campus_name": "Poza Rica"}),
                },
            ],
            stop_reason: Some("tool_use".into()),
        };
        let result = backend.parse_response(response);
        assert!(result.wants_tools());
        assert_eq!(result.tool_calls[0].name, "get_campus_info");
        assert_eq!(result.finish_reason, FinishReason::ToolUse);
    }

    #[test]
    fn empty_key_rejected() {
        let err = ClaudeBackend::new(ClaudeConfig {
            api_key: String::new(),
            model: "m".into(),
            max_tokens: 10,
            temperature: 0.0,
            timeout: Duration::from_secs(1),
            endpoint: "http://localhost".into(),
        });
        assert!(err.is_err());
    }
}
