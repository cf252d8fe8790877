//! Ollama chat client with automatic retry for transient errors.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::error::{classify_http_status, LlmError, LlmErrorKind, RetryConfig};
use super::{parse_agent_response, AgentResponse, ChatMessage, ModelGateway};
use crate::config::ModelConfig;

/// Build the default instructions, listing the given tools.
pub fn default_system_prompt(tools_section: &str) -> String {
    format!(
        r#"You are an AI coding agent that helps users modify code in their workspace.

You can only respond with JSON in this format:
{{
  "reasoning": "Why you're taking this action (optional)",
  "actions": [
    {{
      "tool": "tool_name",
      "params": {{"param1": "value1"}}
    }}
  ]
}}

{}
Work step by step: read before you edit, keep edits small, and run the tests when you change code.
When the request is complete, call the 'finish' tool with a summary message.

Always respond with valid JSON. No markdown, no explanations outside JSON."#,
        tools_section
    )
}

/// Model gateway backed by an Ollama server's `/api/chat` endpoint.
pub struct OllamaGateway {
    client: Client,
    host: String,
    model: String,
    temperature: f64,
    system_prompt: String,
    retry_config: RetryConfig,
}

impl OllamaGateway {
    /// Create a gateway. The system prompt comes from `config.system_prompt_path` when
    /// that file is readable, otherwise from `default_system_prompt(tools_section)`.
    pub fn new(config: &ModelConfig, tools_section: &str) -> Self {
        let system_prompt = match &config.system_prompt_path {
            Some(path) => match std::fs::read_to_string(path) {
                Ok(prompt) => {
                    tracing::info!("Loaded system prompt from {}", path.display());
                    prompt
                }
                Err(e) => {
                    tracing::warn!(
                        "Could not read system prompt {}: {}; using default",
                        path.display(),
                        e
                    );
                    default_system_prompt(tools_section)
                }
            },
            None => default_system_prompt(tools_section),
        };

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();

        tracing::info!(
            "OllamaGateway initialized: host={}, model={}, temperature={}",
            config.host,
            config.model,
            config.temperature
        );

        Self {
            client,
            host: config.host.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            system_prompt,
            retry_config: RetryConfig::default(),
        }
    }

    /// Replace the retry configuration.
    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn full_system_prompt(&self, workspace: &Path) -> String {
        format!(
            "{}\n\n**Current workspace**: {}\n**Important**: Respond ONLY with valid JSON. No markdown, no code blocks, just pure JSON.",
            self.system_prompt,
            workspace.display()
        )
    }

    fn build_request(&self, messages: &[ChatMessage], workspace: &Path) -> OllamaChatRequest {
        let mut all = Vec::with_capacity(messages.len() + 1);
        all.push(ChatMessage::system(self.full_system_prompt(workspace)));
        all.extend_from_slice(messages);

        OllamaChatRequest {
            model: self.model.clone(),
            messages: all,
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
            },
        }
    }

    /// Parse Retry-After header if present.
    fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
        headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok().map(Duration::from_secs))
    }

    fn create_error(status: reqwest::StatusCode, body: &str, retry_after: Option<Duration>) -> LlmError {
        let status_code = status.as_u16();
        match classify_http_status(status_code) {
            LlmErrorKind::RateLimited => LlmError::rate_limited(body.to_string(), retry_after),
            LlmErrorKind::ClientError => LlmError::client_error(status_code, body.to_string()),
            _ => LlmError::server_error(status_code, body.to_string()),
        }
    }

    fn transport_error(e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::network_error(format!("Request timeout: {}", e))
        } else if e.is_connect() {
            LlmError::network_error(format!("Connection failed: {}", e))
        } else {
            LlmError::network_error(format!("Request failed: {}", e))
        }
    }

    /// Execute a single request without retry, returning the assistant text.
    async fn execute_request(&self, request: &OllamaChatRequest) -> Result<String, LlmError> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.host))
            .json(request)
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = response.status();
        let retry_after = Self::parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(Self::create_error(status, &body, retry_after));
        }

        let parsed: OllamaChatResponse = serde_json::from_str(&body).map_err(|e| {
            LlmError::parse_error(format!("Failed to parse response: {}, body: {}", e, body))
        })?;

        Ok(parsed.message.content)
    }

    /// Execute a request with automatic retry for transient errors.
    async fn execute_with_retry(&self, request: &OllamaChatRequest) -> Result<String, LlmError> {
        let start = Instant::now();
        let mut attempt = 0;

        loop {
            match self.execute_request(request).await {
                Ok(content) => {
                    if attempt > 0 {
                        tracing::info!(
                            "Request succeeded after {} retries (total time: {:?})",
                            attempt,
                            start.elapsed()
                        );
                    }
                    return Ok(content);
                }
                Err(error) => {
                    let should_retry = self.retry_config.should_retry(&error)
                        && attempt < self.retry_config.max_retries;

                    if !should_retry {
                        if attempt > 0 {
                            tracing::error!(
                                "Request failed after {} retries (total time: {:?}): {}",
                                attempt,
                                start.elapsed(),
                                error
                            );
                        } else {
                            tracing::error!("Request failed (non-retryable): {}", error);
                        }
                        return Err(error);
                    }

                    let remaining = self
                        .retry_config
                        .max_retry_duration
                        .saturating_sub(start.elapsed());
                    let delay = error.suggested_delay(attempt).min(remaining);
                    if delay.is_zero() {
                        tracing::warn!(
                            "Retry attempt {} failed, no time remaining: {}",
                            attempt + 1,
                            error
                        );
                        return Err(error);
                    }

                    tracing::warn!(
                        "Retry attempt {} failed with {}, retrying in {:?}: {}",
                        attempt + 1,
                        error.kind,
                        delay,
                        error.message
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Probe the server and return the names of the models it has pulled.
    pub async fn check_connection(&self) -> Result<Vec<String>, LlmError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.host))
            .send()
            .await
            .map_err(Self::transport_error)?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Self::create_error(status, &body, None));
        }

        let tags: OllamaTags = serde_json::from_str(&body)
            .map_err(|e| LlmError::parse_error(format!("Failed to parse model list: {}", e)))?;
        let names: Vec<String> = tags.models.into_iter().map(|m| m.name).collect();

        tracing::info!("Connected to Ollama: {} models available", names.len());
        Ok(names)
    }

    /// Whether the configured model has been pulled on the server.
    pub async fn check_model_available(&self) -> Result<bool, LlmError> {
        let available = self
            .check_connection()
            .await?
            .iter()
            .any(|name| name.contains(&self.model));
        if !available {
            tracing::warn!(
                "Model {} not found. Download with: ollama pull {}",
                self.model,
                self.model
            );
        }
        Ok(available)
    }
}

#[async_trait]
impl ModelGateway for OllamaGateway {
    async fn next_actions(
        &self,
        messages: &[ChatMessage],
        workspace: &Path,
    ) -> Result<AgentResponse, LlmError> {
        let request = self.build_request(messages, workspace);

        tracing::info!(
            "Requesting next actions from {} (history: {} messages)",
            self.model,
            messages.len()
        );

        let raw = self.execute_with_retry(&request).await?;
        tracing::debug!("Model response ({} chars): {}", raw.len(), crate::util::preview(&raw, 200));

        let response = parse_agent_response(&raw)?;
        tracing::info!("Parsed model response: {} actions", response.actions.len());
        Ok(response)
    }
}

/// Ollama `/api/chat` request body.
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f64,
}

/// Ollama `/api/chat` response body (non-streaming).
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

/// Ollama `/api/tags` response body.
#[derive(Debug, Deserialize)]
struct OllamaTags {
    #[serde(default)]
    models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    name: String,
}
