//! Chat model clients.
//!
//! Every supported provider is reached through its OpenAI-compatible
//! `POST {base_url}/chat/completions` endpoint, so one client covers Groq,
//! Google, Ollama and OpenAI. The pipeline only sees the [`ChatModel`]
//! trait, which keeps tests free to script model replies.
//!
//! Retry strategy (per call):
//! - HTTP 429 or 5xx → retry with exponential backoff
//! - HTTP 4xx (not 429) → fail immediately
//! - Network error → retry

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::{ModelSettings, Provider};
use crate::messages::{Message, Role, ToolCall};

/// Function schema advertised to a model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
}

/// One model call: system prompt, conversation and the tools on offer.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub system: &'a str,
    pub messages: &'a [Message],
    pub tools: &'a [ToolSpec],
}

/// A model that answers with one assistant message, possibly with tool calls.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Provider and model, e.g. `groq/llama-3.3-70b-versatile`.
    fn name(&self) -> String;

    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Message>;
}

/// Client for OpenAI-compatible chat-completions endpoints.
pub struct OpenAiCompatClient {
    settings: ModelSettings,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(settings: ModelSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self { settings, client })
    }

    fn api_key(&self) -> Result<Option<String>> {
        match self.settings.api_key_env() {
            Some(var) => std::env::var(var)
                .map(Some)
                .map_err(|_| anyhow!("{} not set", var)),
            None => Ok(None),
        }
    }

    fn request_body(&self, request: &CompletionRequest<'_>) -> Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system.is_empty() {
            messages.push(json!({ "role": "system", "content": request.system }));
        }
        messages.extend(request.messages.iter().map(wire_message));

        let mut body = json!({
            "model": self.settings.model,
            "temperature": self.settings.temperature,
            "messages": messages,
        });
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
            body["tool_choice"] = json!("auto");
        }
        body
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatClient {
    fn name(&self) -> String {
        format!("{}/{}", self.settings.provider, self.settings.model)
    }

    async fn complete(&self, request: CompletionRequest<'_>) -> Result<Message> {
        let api_key = self.api_key()?;
        let url = format!(
            "{}/chat/completions",
            self.settings.base_url().trim_end_matches('/')
        );
        let body = self.request_body(&request);

        let mut last_err = None;

        for attempt in 0..=self.settings.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut builder = self.client.post(&url).json(&body);
            if let Some(key) = &api_key {
                builder = builder.bearer_auth(key);
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: Value = response.json().await?;
                        let message = parse_completion(&json)?;
                        debug!(
                            model = %self.name(),
                            tool_calls = message.tool_calls.len(),
                            "model replied"
                        );
                        return Ok(message);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(
                            model = %self.name(),
                            %status,
                            attempt,
                            "model call failed, retrying"
                        );
                        last_err = Some(anyhow!(
                            "{} API error {}: {}",
                            self.settings.provider,
                            status,
                            body_text
                        ));
                        continue;
                    }

                    bail!(
                        "{} API error {}: {}",
                        self.settings.provider,
                        status,
                        body_text
                    );
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Model call failed after retries")))
    }
}

fn wire_message(message: &Message) -> Value {
    match message.role {
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id.clone().unwrap_or_default(),
            "content": message.content,
        }),
        Role::Assistant if message.has_tool_calls() => {
            let calls: Vec<Value> = message
                .tool_calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": {
                            "name": c.name,
                            "arguments": c.arguments.to_string(),
                        }
                    })
                })
                .collect();
            json!({
                "role": "assistant",
                "content": message.content,
                "tool_calls": calls,
            })
        }
        role => json!({ "role": role, "content": message.content }),
    }
}

/// Parse `choices[0].message` of a chat-completions response.
fn parse_completion(json: &Value) -> Result<Message> {
    let message = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| anyhow!("Invalid completion response: missing choices[0].message"))?;

    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or_default();

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(|c| c.as_array()) {
        for call in calls {
            let function = call
                .get("function")
                .ok_or_else(|| anyhow!("Invalid tool call: missing function"))?;
            let name = function
                .get("name")
                .and_then(|n| n.as_str())
                .ok_or_else(|| anyhow!("Invalid tool call: missing function.name"))?;
            let arguments = match function.get("arguments") {
                Some(Value::String(raw)) if raw.trim().is_empty() => json!({}),
                Some(Value::String(raw)) => serde_json::from_str(raw)
                    .with_context(|| format!("Invalid arguments for tool call {}", name))?,
                Some(other) => other.clone(),
                None => json!({}),
            };
            let id = call
                .get("id")
                .and_then(|i| i.as_str())
                .filter(|i| !i.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
            tool_calls.push(ToolCall {
                id,
                name: name.to_string(),
                arguments,
            });
        }
    }

    Ok(Message::assistant(content).with_tool_calls(tool_calls))
}

/// Build the client for one model role.
pub fn create_model(settings: &ModelSettings) -> Result<Arc<dyn ChatModel>> {
    info!(
        provider = %settings.provider,
        model = %settings.model,
        "using model"
    );
    Ok(Arc::new(OpenAiCompatClient::new(settings.clone())?))
}

/// Pull an Ollama model through `POST /api/pull`. No-op for other providers.
pub async fn ensure_ollama_model(settings: &ModelSettings) -> Result<()> {
    if settings.provider != Provider::Ollama || !settings.auto_pull {
        return Ok(());
    }
    let base = settings.base_url().trim_end_matches('/');
    let base = base.strip_suffix("/v1").unwrap_or(base);
    let url = format!("{}/api/pull", base);

    info!(model = %settings.model, "pulling ollama model");
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.timeout_secs.max(600)))
        .build()?;
    let response = client
        .post(&url)
        .json(&json!({ "model": settings.model, "stream": false }))
        .send()
        .await
        .with_context(|| format!("Failed to reach Ollama at {}", base))?;
    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        bail!("Ollama pull failed {}: {}", status, body_text);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_answer() {
        let json = json!({
            "choices": [{ "message": { "role": "assistant", "content": "Olá!" } }]
        });
        let msg = parse_completion(&json).unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(msg.content, "Olá!");
        assert!(!msg.has_tool_calls());
    }

    #[test]
    fn parses_tool_calls_with_string_arguments() {
        let json = json!({
            "choices": [{ "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [
                    { "id": "call_1", "type": "function",
                      "function": { "name": "search_process", "arguments": "{\"id\":\"123/2024\"}" } },
                    { "type": "function",
                      "function": { "name": "transfer_to_sei_research_agent", "arguments": "" } }
                ]
            } }]
        });
        let msg = parse_completion(&json).unwrap();
        assert_eq!(msg.content, "");
        assert_eq!(msg.tool_calls.len(), 2);
        assert_eq!(msg.tool_calls[0].id, "call_1");
        assert_eq!(msg.tool_calls[0].arguments["id"], "123/2024");
        assert!(msg.tool_calls[1].id.starts_with("call_"));
        assert_eq!(msg.tool_calls[1].arguments, json!({}));
    }

    #[test]
    fn rejects_malformed_response() {
        assert!(parse_completion(&json!({ "choices": [] })).is_err());
    }

    #[test]
    fn wire_format_round_trips_tool_exchange() {
        let call = ToolCall {
            id: "c1".to_string(),
            name: "search_process".to_string(),
            arguments: json!({ "id": "1/2020" }),
        };
        let assistant = wire_message(&Message::assistant("").with_tool_calls(vec![call]));
        assert_eq!(
            assistant["tool_calls"][0]["function"]["arguments"],
            "{\"id\":\"1/2020\"}"
        );
        let tool = wire_message(&Message::tool("c1", "search_process", "ok"));
        assert_eq!(tool["role"], "tool");
        assert_eq!(tool["tool_call_id"], "c1");
    }

    #[test]
    fn request_includes_system_prompt_and_tools() {
        let client =
            OpenAiCompatClient::new(ModelSettings::new(Provider::Ollama, "llama3.2")).unwrap();
        let tools = [ToolSpec {
            name: "search_process".to_string(),
            description: "Search".to_string(),
            parameters: json!({ "type": "object" }),
        }];
        let messages = [Message::user("oi")];
        let body = client.request_body(&CompletionRequest {
            system: "prompt",
            messages: &messages,
            tools: &tools,
        });
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "oi");
        assert_eq!(body["tools"][0]["function"]["name"], "search_process");
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(client.name(), "ollama/llama3.2");
    }
}
