//! Chat-completion client.
//!
//! [`ChatCompletionClient`] is the seam the conversation loop talks to.
//! [`LlmClient`] implements it against any OpenAI-compatible
//! `/chat/completions` endpoint, with an OpenRouter variant that adds
//! provider-routing fields.  The client does not retry and does not log
//! payloads; retry policy belongs to the caller or the transport.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{AgentError, Result};
use crate::llm::normalize::parse_chat_completion;
use crate::llm::types::{AssistantMessage, ChatOptions, Message, Role, ToolDefinition};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Fixed OpenRouter API base URL.
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 0.1;

/// Default generation cap per call.
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

/// Default request timeout (ten minutes).
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Inner error code Azure-hosted models use for content-policy refusals.
const CONTENT_FILTER_CODE: &str = "ResponsibleAIPolicyViolation";

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Abstraction over one chat-completion endpoint.
///
/// Implementations return a normalized [`AssistantMessage`] regardless of
/// which response shape the model used for tool calls.
#[async_trait]
pub trait ChatCompletionClient: Send + Sync {
    /// Send the conversation and tool schemas, return the assistant turn.
    async fn complete(&self, messages: &[Message], options: &ChatOptions)
    -> Result<AssistantMessage>;
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Identifies which endpoint flavour the client targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Any OpenAI-compatible endpoint at a configured base URL.
    #[default]
    OpenAI,
    /// OpenRouter, at its fixed base URL, with provider routing fields.
    OpenRouter,
}

/// OpenRouter routing preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenRouterOptions {
    /// Infrastructure providers allowed to serve the model, in priority order.
    pub allowed_providers: Vec<String>,
    /// Models to try when the primary model fails.
    pub fallback_models: Vec<String>,
    /// Data collection policy, `deny` or `allow`.
    pub data_collection: String,
    /// Zero data retention.
    pub zdr: bool,
}

impl Default for OpenRouterOptions {
    fn default() -> Self {
        Self {
            allowed_providers: Vec::new(),
            fallback_models: Vec::new(),
            data_collection: "deny".into(),
            zdr: true,
        }
    }
}

impl OpenRouterOptions {
    /// Extra request-body fields understood by OpenRouter.
    pub fn request_fields(&self) -> Value {
        let mut provider = json!({ "require_parameters": true });
        if !self.allowed_providers.is_empty() {
            provider["only"] = json!(self.allowed_providers);
            provider["order"] = json!(self.allowed_providers);
        }
        provider["data_collection"] = json!(self.data_collection);
        provider["zdr"] = json!(self.zdr);

        let mut fields = json!({ "provider": provider });
        if !self.fallback_models.is_empty() {
            fields["models"] = json!(self.fallback_models);
        }
        fields
    }
}

/// Connection settings for [`LlmClient`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmClientConfig {
    /// Which endpoint flavour to target.
    pub provider: LlmProvider,
    /// Base URL, e.g. `https://api.openai.com/v1`.  Ignored for OpenRouter.
    pub base_url: String,
    /// Bearer token.
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// Default sampling temperature.
    pub temperature: f32,
    /// Default generation cap.
    pub max_tokens: u32,
    /// Whole-request timeout in seconds.
    pub timeout_secs: u64,
    /// OpenRouter routing preferences.
    pub openrouter: OpenRouterOptions,
}

impl Default for LlmClientConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAI,
            base_url: String::new(),
            api_key: String::new(),
            model: String::new(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            openrouter: OpenRouterOptions::default(),
        }
    }
}

impl LlmClientConfig {
    /// Configuration for any OpenAI-compatible endpoint.
    pub fn openai_compatible(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            ..Self::default()
        }
    }

    /// Configuration for OpenRouter.
    pub fn openrouter(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: LlmProvider::OpenRouter,
            base_url: OPENROUTER_BASE_URL.to_owned(),
            api_key: api_key.into(),
            model: model.into(),
            ..Self::default()
        }
    }

    /// Overlay settings from environment-style variables.
    ///
    /// `lookup` is usually `|k| std::env::var(k).ok()`; tests pass a map.
    /// Recognised keys: `AI_PROVIDER`, `AI_BASE_URL`, `AI_API_KEY`,
    /// `AI_MODEL`, `AI_ALLOWED_PROVIDERS`, `AI_FALLBACK_MODELS`,
    /// `AI_DATA_COLLECTION`, `AI_ZDR`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(provider) = get("AI_PROVIDER") {
            match provider.trim().to_ascii_lowercase().as_str() {
                "openrouter" => self.provider = LlmProvider::OpenRouter,
                "openai" => self.provider = LlmProvider::OpenAI,
                other => tracing::warn!(provider = %other, "ignoring unknown AI_PROVIDER"),
            }
        }
        if let Some(url) = get("AI_BASE_URL") {
            self.base_url = url;
        }
        if let Some(key) = get("AI_API_KEY") {
            self.api_key = key;
        }
        if let Some(model) = get("AI_MODEL") {
            self.model = model;
        }
        if let Some(list) = get("AI_ALLOWED_PROVIDERS") {
            self.openrouter.allowed_providers = split_list(&list, true);
        }
        if let Some(list) = get("AI_FALLBACK_MODELS") {
            self.openrouter.fallback_models = split_list(&list, false);
        }
        if let Some(policy) = get("AI_DATA_COLLECTION") {
            self.openrouter.data_collection = policy.trim().to_owned();
        }
        if let Some(zdr) = get("AI_ZDR") {
            self.openrouter.zdr = zdr.trim().eq_ignore_ascii_case("true");
        }
    }

    /// The base URL requests go to, without a trailing slash.
    pub fn effective_base_url(&self) -> &str {
        match self.provider {
            LlmProvider::OpenRouter => OPENROUTER_BASE_URL,
            LlmProvider::OpenAI => self.base_url.trim_end_matches('/'),
        }
    }

    /// Check that every connection parameter is present.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::LlmNotConfigured`] naming the missing settings.
    pub fn ensure_configured(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.effective_base_url().is_empty() {
            missing.push("AI_BASE_URL");
        }
        if self.api_key.is_empty() {
            missing.push("AI_API_KEY");
        }
        if self.model.is_empty() {
            missing.push("AI_MODEL");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(AgentError::LlmNotConfigured {
                missing: missing.join(", "),
            })
        }
    }

    /// Whether [`Self::ensure_configured`] would succeed.
    pub fn is_configured(&self) -> bool {
        self.ensure_configured().is_ok()
    }

    fn provider_name(&self) -> &'static str {
        match self.provider {
            LlmProvider::OpenAI => "openai",
            LlmProvider::OpenRouter => "openrouter",
        }
    }
}

/// Split a comma-separated setting, dropping blanks and duplicates while
/// keeping first-seen order.
fn split_list(raw: &str, lowercase: bool) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let item = if lowercase {
            item.to_lowercase()
        } else {
            item.to_owned()
        };
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for an OpenAI-compatible chat-completion endpoint.
///
/// Construction never fails on missing credentials; the check happens on
/// every call so a misconfigured process surfaces a configuration error at
/// the point of use.
#[derive(Debug, Clone)]
pub struct LlmClient {
    config: LlmClientConfig,
    http: reqwest::Client,
}

impl LlmClient {
    /// Create a new client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::LlmRequestFailed`] if the HTTP client cannot be
    /// built.
    pub fn new(config: LlmClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::LlmRequestFailed {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { config, http })
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &LlmClientConfig {
        &self.config
    }

    /// Build the JSON body for `/chat/completions`.
    pub fn build_request_body(&self, messages: &[Message], options: &ChatOptions) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "messages": messages_to_openai(messages),
            "temperature": options.temperature.unwrap_or(self.config.temperature),
            "max_tokens": options.max_tokens.unwrap_or(self.config.max_tokens),
        });

        if !options.tools.is_empty() {
            body["tools"] = tools_to_openai(&options.tools);
            body["tool_choice"] = options.tool_choice.to_wire();
        }

        if let Some(format) = &options.response_format {
            body["response_format"] = format.clone();
        }

        if self.config.provider == LlmProvider::OpenRouter
            && let Value::Object(extra) = self.config.openrouter.request_fields()
            && let Value::Object(map) = &mut body
        {
            map.extend(extra);
        }

        body
    }

    /// Send the HTTP request to the `/chat/completions` endpoint.
    async fn send_request(&self, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.config.effective_base_url());

        let mut headers = HeaderMap::new();
        let auth_value = format!("Bearer {}", self.config.api_key);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value).map_err(|e| AgentError::ConfigError {
                reason: format!("invalid authorization header: {e}"),
            })?,
        );
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );

        tracing::debug!(
            url = %url,
            model = %self.config.model,
            provider = self.config.provider_name(),
            "sending LLM request"
        );

        self.http
            .post(&url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(|e| AgentError::LlmRequestFailed {
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl ChatCompletionClient for LlmClient {
    async fn complete(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<AssistantMessage> {
        self.config.ensure_configured()?;

        let body = self.build_request_body(messages, options);
        let started = Instant::now();
        let resp = self.send_request(&body).await?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AgentError::LlmRequestFailed {
                reason: format!("failed to read response body: {e}"),
            })?;

        tracing::debug!(
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "LLM response received"
        );

        if !status.is_success() {
            return Err(classify_http_failure(status.as_u16(), text));
        }

        let v: Value = serde_json::from_str(&text).map_err(|e| AgentError::LlmParseFailed {
            reason: format!("invalid JSON response: {e}"),
        })?;

        let mut message = parse_chat_completion(&v)?;
        if message.model.is_none() {
            message.model = Some(self.config.model.clone());
        }
        Ok(message)
    }
}

// ---------------------------------------------------------------------------
// Wire conversion (free functions)
// ---------------------------------------------------------------------------

/// Map a non-success status and body to the matching error variant.
pub fn classify_http_failure(status: u16, body: String) -> AgentError {
    if is_content_filter_response(status, &body) {
        AgentError::ContentFiltered { status, body }
    } else {
        AgentError::LlmHttpStatus { status, body }
    }
}

/// Whether a 400/403 body carries the content-policy inner error code,
/// either wrapped in an `error` envelope or at the top level.
pub fn is_content_filter_response(status: u16, body: &str) -> bool {
    if status != 400 && status != 403 {
        return false;
    }
    let Ok(v) = serde_json::from_str::<Value>(body) else {
        return false;
    };
    let payload = if v["error"].is_object() {
        &v["error"]
    } else {
        &v
    };
    payload["innererror"]["code"].as_str() == Some(CONTENT_FILTER_CODE)
}

/// Convert internal messages to the OpenAI Chat Completions wire format.
pub fn messages_to_openai(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| match msg.role {
            Role::System => json!({ "role": "system", "content": msg.content }),
            Role::User => json!({ "role": "user", "content": msg.content }),
            Role::Assistant => {
                let mut m = json!({ "role": "assistant", "content": msg.content });
                if !msg.tool_calls.is_empty() {
                    let calls: Vec<Value> = msg
                        .tool_calls
                        .iter()
                        .map(|tc| {
                            json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {
                                    "name": tc.name,
                                    "arguments": tc.arguments_or_empty(),
                                }
                            })
                        })
                        .collect();
                    m["tool_calls"] = json!(calls);
                }
                m
            }
            Role::Tool => json!({
                "role": "tool",
                "tool_call_id": msg.tool_call_id,
                "content": msg.content,
            }),
        })
        .collect()
}

/// Convert tool definitions into the OpenAI Chat Completions API format.
pub fn tools_to_openai(tools: &[ToolDefinition]) -> Value {
    let tool_values: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                }
            })
        })
        .collect();
    json!(tool_values)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
