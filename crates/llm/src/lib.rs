//! Conversation model and model-provider clients.
//!
//! Defines the transcript shapes shared by the whole workspace (messages,
//! content blocks, tool calls) and the [`LlmProvider`] trait the agent loop
//! drives.  Two reference clients are included: an Anthropic-style messages
//! API client with native tool calling, and an Ollama client that only
//! generates free text (the agent falls back to prompt-based tool calling
//! for it).

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

// ── Transcript model ─────────────────────────────────────────────────────────

/// Who produced a conversational turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    /// A turn carrying only tool-result blocks, each answering a preceding
    /// `tool_use` block by id.
    ToolResult,
}

/// One typed block inside a structured message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
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
        #[serde(default)]
        is_error: bool,
    },
}

/// Message content: plain text for simple turns, ordered blocks when a turn
/// mixes text with tool use or carries tool results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// A single conversational turn.  The transcript is a `Vec<ChatMessage>`
/// owned by the caller; the agent loop only appends to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Assistant turn mixing optional text with `tool_use` blocks.
    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// A tool-result turn.  Callers must pass only `ContentBlock::ToolResult`
    /// blocks, each referencing a `tool_use` id from the preceding assistant
    /// turn.
    pub fn tool_results(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::ToolResult,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// Concatenated plain text of the turn (text blocks only).
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

// ── Tool calls ───────────────────────────────────────────────────────────────

/// One request from the model to execute a tool.  The `id` comes from the
/// provider for native tool calling, or is synthesized locally when the call
/// was parsed out of free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Argument object; values may be strings, numbers, or booleans
    /// depending on what the model emitted.
    pub arguments: Value,
}

/// Why the provider stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Other,
}

impl StopReason {
    fn parse(s: &str) -> Self {
        match s {
            "end_turn" => Self::EndTurn,
            "tool_use" => Self::ToolUse,
            "max_tokens" => Self::MaxTokens,
            _ => Self::Other,
        }
    }
}

/// Parsed provider response: accumulated text plus any requested tool calls.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            stop_reason: StopReason::EndTurn,
        }
    }
}

// ── Provider trait ───────────────────────────────────────────────────────────

/// Whether a provider speaks a native tool-calling protocol or only free
/// text.  Decided once at provider construction; the agent loop inspects it
/// once per run and never mid-loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCapability {
    Native,
    PromptFallback,
}

/// A conversational model endpoint.
///
/// Errors returned here are provider errors: the agent loop aborts the run
/// on them rather than feeding them back to the model.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn tool_capability(&self) -> ToolCapability;

    /// Native tool calling: send the running transcript, the tool schema,
    /// and a system prompt.  Only meaningful for `ToolCapability::Native`
    /// providers.
    async fn generate_with_tools(
        &self,
        system: &str,
        messages: &[ChatMessage],
        tools: &Value,
    ) -> Result<ChatResponse> {
        let _ = (system, messages, tools);
        bail!("provider does not support native tool calling");
    }

    /// Free-text generation, used by the prompt-fallback loop flavor.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

// ── Anthropic-style messages API client ──────────────────────────────────────

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Messages-API client with native `tool_use`/`tool_result` blocks.
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: ANTHROPIC_API_URL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_payload(&self, system: &str, messages: &[ChatMessage], tools: &Value) -> Value {
        let api_messages: Vec<Value> = messages
            .iter()
            .map(|m| {
                // The wire protocol has no tool_result role; those turns go
                // out as user messages carrying tool_result blocks.
                let role = match m.role {
                    Role::Assistant => "assistant",
                    Role::User | Role::ToolResult => "user",
                };
                json!({ "role": role, "content": m.content })
            })
            .collect();

        let mut payload = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": api_messages,
        });
        if !system.is_empty() {
            payload["system"] = json!(system);
        }
        if tools.as_array().is_some_and(|a| !a.is_empty()) {
            payload["tools"] = tools.clone();
        }
        payload
    }
}

/// Parse a messages-API response body into a [`ChatResponse`].
///
/// Text blocks are concatenated; each `tool_use` block becomes a
/// [`ToolCall`] in declared order.
pub fn parse_messages_response(body: &Value) -> Result<ChatResponse> {
    let blocks = body
        .get("content")
        .and_then(|c| c.as_array())
        .context("response has no content array")?;

    let mut content = String::new();
    let mut tool_calls = Vec::new();
    for block in blocks {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                    content.push_str(text);
                }
            }
            Some("tool_use") => {
                let id = block
                    .get("id")
                    .and_then(|v| v.as_str())
                    .context("tool_use block missing id")?;
                let name = block
                    .get("name")
                    .and_then(|v| v.as_str())
                    .context("tool_use block missing name")?;
                tool_calls.push(ToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments: block.get("input").cloned().unwrap_or_else(|| json!({})),
                });
            }
            _ => {}
        }
    }

    let stop_reason = body
        .get("stop_reason")
        .and_then(|v| v.as_str())
        .map(StopReason::parse)
        .unwrap_or(StopReason::Other);

    Ok(ChatResponse {
        content,
        tool_calls,
        stop_reason,
    })
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn tool_capability(&self) -> ToolCapability {
        ToolCapability::Native
    }

    async fn generate_with_tools(
        &self,
        system: &str,
        messages: &[ChatMessage],
        tools: &Value,
    ) -> Result<ChatResponse> {
        let payload = self.build_payload(system, messages, tools);
        debug!(model = %self.model, messages = messages.len(), "messages API request");

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await
            .context("messages API request failed")?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .context("messages API returned non-JSON body")?;
        if !status.is_success() {
            bail!("messages API error ({status}): {body}");
        }

        parse_messages_response(&body)
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let messages = [ChatMessage::user(prompt)];
        let response = self
            .generate_with_tools("", &messages, &json!([]))
            .await?;
        Ok(response.content)
    }
}

// ── Ollama client (free text only) ───────────────────────────────────────────

const OLLAMA_DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Local Ollama endpoint.  `/api/generate` only produces text, so the agent
/// uses the prompt-fallback flavor with this provider.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: reqwest::Client,
    model: String,
    base_url: String,
}

impl OllamaProvider {
    pub fn new(model: impl Into<String>) -> Self {
        let base_url = std::env::var("OLLAMA_BASE_URL")
            .unwrap_or_else(|_| OLLAMA_DEFAULT_BASE_URL.to_string());
        Self {
            client: reqwest::Client::new(),
            model: model.into(),
            base_url: sanitize_base_url(&base_url),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = sanitize_base_url(&base_url.into());
        self
    }
}

/// Trim trailing slashes and whitespace; fall back to the default when the
/// configured value is empty.
fn sanitize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        OLLAMA_DEFAULT_BASE_URL.to_string()
    } else {
        trimmed.to_string()
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn tool_capability(&self) -> ToolCapability {
        ToolCapability::PromptFallback
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let endpoint = format!("{}/api/generate", self.base_url);
        let payload = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });
        debug!(model = %self.model, "ollama generate request");

        let response = self
            .client
            .post(&endpoint)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("ollama unavailable at {}", self.base_url))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .context("ollama returned non-JSON body")?;
        if !status.is_success() {
            bail!("ollama error ({status}): {body}");
        }

        body.get("response")
            .and_then(|v| v.as_str())
            .map(ToString::to_string)
            .with_context(|| format!("ollama response missing text: {body}"))
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
