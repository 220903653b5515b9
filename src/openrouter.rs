//! OpenRouter chat-completions client.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::OpenRouterConfig;

const API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One turn of a conversation. Also the entry type of the per-channel windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, deserialize_with = "nullable_string")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Result of a tool call, answering `call_id`.
    pub fn tool_result(call_id: &str, name: &str, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            name: Some(name.to_string()),
            tool_call_id: Some(call_id.to_string()),
            tool_calls: Vec::new(),
        }
    }
}

fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Option::unwrap_or_default)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, as the model produced them.
    #[serde(default)]
    pub arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

/// Tool declaration sent with a request.
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: FunctionDef,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDef {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: serde_json::Value,
}

/// The web search tool offered to the model when it is engaged directly.
pub fn search_tool() -> Tool {
    Tool {
        kind: "function",
        function: FunctionDef {
            name: "search",
            description: "Search the internet for information",
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" }
                },
                "required": ["query"]
            }),
        },
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub temperature: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
}

impl Request {
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
    }

    fn has_prompt(&self) -> bool {
        self.messages.iter().any(|m| m.role != Role::System)
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<serde_json::Value>,
    message: String,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("empty prompt provided")]
    EmptyPrompt,
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("API returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("API error: {0}")]
    Api(String),
    #[error("failed to decode response: {0}")]
    Parse(String),
    #[error("no choices in response")]
    Empty,
}

pub struct Client {
    key: String,
    model: String,
    system_prompt: String,
    temperature: f64,
    max_tokens: u32,
    http: reqwest::Client,
}

impl Client {
    pub fn new(config: &OpenRouterConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| LlmError::Http(e.to_string()))?;

        Ok(Self {
            key: config.key.clone(),
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            http,
        })
    }

    /// Start a request carrying the system prompt and no tools.
    pub fn request(&self) -> Request {
        let mut messages = Vec::new();
        if !self.system_prompt.is_empty() {
            messages.push(Message::system(self.system_prompt.clone()));
        }
        Request {
            model: self.model.clone(),
            messages,
            max_tokens: (self.max_tokens > 0).then_some(self.max_tokens),
            temperature: self.temperature,
            tools: Vec::new(),
        }
    }

    /// Start a request that also declares the search tool.
    pub fn request_with_tools(&self) -> Request {
        let mut request = self.request();
        request.tools.push(search_tool());
        request
    }

    /// Send a request and return the first choice's message.
    pub async fn send(&self, request: &Request) -> Result<Message, LlmError> {
        if !request.has_prompt() {
            return Err(LlmError::EmptyPrompt);
        }

        debug!("Sending {} message(s) to {}", request.messages.len(), request.model);

        let response = self
            .http
            .post(API_URL)
            .bearer_auth(&self.key)
            .header("X-Title", "Chad Discord Bot")
            .json(request)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status: status.as_u16(), body });
        }

        let body = response
            .text()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;
        parse_response(&body)
    }
}

fn parse_response(body: &str) -> Result<Message, LlmError> {
    let parsed: ApiResponse =
        serde_json::from_str(body).map_err(|e| LlmError::Parse(e.to_string()))?;

    if let Some(error) = parsed.error {
        let code = error.code.map(|c| format!(" ({c})")).unwrap_or_default();
        return Err(LlmError::Api(format!("{}{code}", error.message)));
    }

    parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or(LlmError::Empty)
}
