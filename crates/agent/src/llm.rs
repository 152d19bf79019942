use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use std::time::Duration;
use tabletalk_core::config::{LlmConfig, LlmProvider};

use crate::conversation::{Message, Role, ToolCallRequest};
use crate::tools::{FunctionSchema, RawArguments};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// "Send the conversation, get the next message." The only capability the
/// turn loop needs from a language model.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn send(&self, messages: &[Message], functions: &[FunctionSchema]) -> Result<Message>;
}

/// Chat-completions adapter for OpenAI and Ollama's OpenAI-compatible API.
#[derive(Clone, Debug)]
pub struct OpenAiCompatibleClient {
    client: Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
    temperature: f32,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build HTTP client for the model endpoint")?;

        Ok(Self {
            client,
            endpoint: chat_completions_endpoint(config),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body(&self, messages: &[Message], functions: &[FunctionSchema]) -> Value {
        let mut body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": messages.iter().map(wire_message).collect::<Vec<_>>(),
        });
        if !functions.is_empty() {
            let tools: Vec<Value> = functions
                .iter()
                .map(|function| json!({ "type": "function", "function": function }))
                .collect();
            body["tools"] = Value::Array(tools);
        }
        body
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatibleClient {
    async fn send(&self, messages: &[Message], functions: &[FunctionSchema]) -> Result<Message> {
        let body = self.request_body(messages, functions);
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.context("model request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!("model endpoint returned {}", response.status()));
        }

        let body: Value = response.json().await.context("failed to decode model response")?;
        parse_completion(&body)
    }
}

fn chat_completions_endpoint(config: &LlmConfig) -> String {
    let base = config.base_url.as_deref().map(|url| url.trim_end_matches('/'));
    let base = match (config.provider, base) {
        (LlmProvider::OpenAi, url) => url.unwrap_or(OPENAI_BASE_URL).to_owned(),
        (LlmProvider::Ollama, Some(url)) if url.ends_with("/v1") => url.to_owned(),
        (LlmProvider::Ollama, url) => format!("{}/v1", url.unwrap_or(OLLAMA_BASE_URL)),
    };
    format!("{base}/chat/completions")
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn wire_message(message: &Message) -> Value {
    let mut wire = json!({ "role": role_name(message.role), "content": message.content });
    if message.has_tool_calls() {
        let calls: Vec<Value> = message
            .tool_calls
            .iter()
            .map(|call| {
                let arguments = match &call.raw_arguments {
                    RawArguments::Text(text) => text.clone(),
                    RawArguments::Structured(value) => value.to_string(),
                };
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": { "name": call.tool_name, "arguments": arguments },
                })
            })
            .collect();
        wire["tool_calls"] = Value::Array(calls);
    }
    if let Some(call_id) = &message.tool_call_id {
        wire["tool_call_id"] = Value::String(call_id.clone());
    }
    wire
}

fn raw_arguments(value: Option<&Value>) -> RawArguments {
    match value {
        Some(Value::String(text)) => RawArguments::Text(text.clone()),
        Some(other) => RawArguments::Structured(other.clone()),
        None => RawArguments::Text(String::new()),
    }
}

fn call_request(id: Option<&Value>, function: &Value) -> Result<ToolCallRequest> {
    let name = function
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("tool call without a function name"))?;
    let id = id.and_then(Value::as_str).map(str::to_owned);
    Ok(ToolCallRequest::new(id, name, raw_arguments(function.get("arguments"))))
}

/// Reads `choices[0].message`, accepting a `tool_calls` batch or a single
/// legacy `function_call`.
pub fn parse_completion(body: &Value) -> Result<Message> {
    let message = body
        .pointer("/choices/0/message")
        .ok_or_else(|| anyhow!("model response has no choices"))?;
    let content = message.get("content").and_then(Value::as_str).unwrap_or_default();

    let mut calls = Vec::new();
    if let Some(tool_calls) = message.get("tool_calls").and_then(Value::as_array) {
        for tool_call in tool_calls {
            let function = tool_call
                .get("function")
                .ok_or_else(|| anyhow!("tool call without a function"))?;
            calls.push(call_request(tool_call.get("id"), function)?);
        }
    } else if let Some(function) = message.get("function_call").filter(|value| !value.is_null()) {
        calls.push(call_request(None, function)?);
    }

    Ok(Message::assistant_with_calls(content, calls))
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use serde_json::json;
    use tabletalk_core::config::{LlmConfig, LlmProvider};

    use super::{parse_completion, OpenAiCompatibleClient};
    use crate::conversation::{Message, Role, ToolCallRequest};
    use crate::tools::{FunctionSchema, RawArguments};

    fn config(provider: LlmProvider, base_url: Option<&str>) -> LlmConfig {
        LlmConfig {
            provider,
            api_key: Some(SecretString::from("sk-test".to_owned())),
            base_url: base_url.map(str::to_owned),
            model: "test-model".to_owned(),
            temperature: 0.0,
            timeout_secs: 5,
        }
    }

    #[test]
    fn endpoints_follow_the_provider() {
        let openai = OpenAiCompatibleClient::from_config(&config(LlmProvider::OpenAi, None))
            .expect("client");
        assert_eq!(openai.endpoint(), "https://api.openai.com/v1/chat/completions");

        let ollama = OpenAiCompatibleClient::from_config(&config(
            LlmProvider::Ollama,
            Some("http://gpu-box:11434/"),
        ))
        .expect("client");
        assert_eq!(ollama.endpoint(), "http://gpu-box:11434/v1/chat/completions");

        let proxy = OpenAiCompatibleClient::from_config(&config(
            LlmProvider::OpenAi,
            Some("http://proxy.internal/v1"),
        ))
        .expect("client");
        assert_eq!(proxy.endpoint(), "http://proxy.internal/v1/chat/completions");
    }

    #[test]
    fn request_body_carries_messages_calls_and_catalog() {
        let client = OpenAiCompatibleClient::from_config(&config(LlmProvider::OpenAi, None))
            .expect("client");
        let call = ToolCallRequest::new(
            Some("call_1".to_owned()),
            "list_tables",
            RawArguments::Structured(json!({})),
        );
        let messages = vec![
            Message::system("be brief"),
            Message::user("what tables exist?"),
            Message::assistant_with_calls("", vec![call]),
            Message::tool_result("call_1", "[]"),
        ];
        let functions = vec![FunctionSchema {
            name: "list_tables".to_owned(),
            description: "List tables.".to_owned(),
            parameters: json!({"type": "object", "properties": {}, "required": []}),
        }];

        let body = client.request_body(&messages, &functions);

        assert_eq!(body["model"], "test-model");
        assert_eq!(body["messages"][0], json!({"role": "system", "content": "be brief"}));
        assert_eq!(body["messages"][2]["tool_calls"][0]["id"], "call_1");
        assert_eq!(body["messages"][2]["tool_calls"][0]["function"]["arguments"], "{}");
        assert_eq!(body["messages"][3]["tool_call_id"], "call_1");
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "list_tables");
    }

    #[test]
    fn parses_tool_call_batches() {
        let body = json!({"choices": [{"message": {
            "role": "assistant",
            "content": null,
            "tool_calls": [
                {"id": "a", "type": "function",
                 "function": {"name": "select_rows", "arguments": "{\"table\":\"items\"}"}},
                {"type": "function",
                 "function": {"name": "list_tables", "arguments": {}}}
            ]
        }}]});

        let message = parse_completion(&body).expect("parse");

        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.content, "");
        assert_eq!(message.tool_calls.len(), 2);
        assert_eq!(message.tool_calls[0].id, "a");
        assert_eq!(
            message.tool_calls[0].raw_arguments,
            RawArguments::Text("{\"table\":\"items\"}".to_owned())
        );
        assert!(message.tool_calls[1].id.starts_with("call_"));
        assert_eq!(message.tool_calls[1].raw_arguments, RawArguments::Structured(json!({})));
    }

    #[test]
    fn parses_legacy_function_call_and_plain_answers() {
        let legacy = json!({"choices": [{"message": {
            "content": "",
            "function_call": {"name": "describe_table", "arguments": "{\"table\":\"t\"}"}
        }}]});
        let message = parse_completion(&legacy).expect("parse");
        assert_eq!(message.tool_calls.len(), 1);
        assert_eq!(message.tool_calls[0].tool_name, "describe_table");

        let answer = json!({"choices": [{"message": {"content": "There are 3 rows."}}]});
        let message = parse_completion(&answer).expect("parse");
        assert!(!message.has_tool_calls());
        assert_eq!(message.content, "There are 3 rows.");

        assert!(parse_completion(&json!({"choices": []})).is_err());
    }
}
