//! Text-generation collaborator.
//!
//! The engine only sees the `Generator` contract. `HttpGenerator` talks to
//! an OpenAI-compatible `chat/completions` endpoint.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};
use url::Url;
use uuid::Uuid;

use crate::config::GenerationConfig;
use crate::recovery::Outcome;

use super::http::TransportPolicy;

const SYSTEM_PROMPT: &str = "You are a senior web developer. When asked to build something, \
reply with a JSON object {\"files\": [{\"path\": \"name.ext\", \"content\": \"...\"}]} inside a \
```json fenced block, followed by a short explanation. Use plain file names without directories.";

/// Response of a single generation call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationResult {
    pub success: bool,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GenerationResult {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            success: true,
            text: text.into(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            text: String::new(),
            error: Some(error.into()),
        }
    }
}

impl Outcome for GenerationResult {
    fn failure(&self) -> Option<String> {
        if !self.success {
            return Some(
                self.error
                    .clone()
                    .unwrap_or_else(|| "generation failed".to_string()),
            );
        }
        if self.text.trim().is_empty() {
            return Some("generation returned an empty response".to_string());
        }
        None
    }
}

/// Opaque text completion.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, user_id: &str, prompt: &str) -> Result<GenerationResult>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Generator backed by an OpenAI-compatible HTTP API.
pub struct HttpGenerator {
    client: Client,
    config: GenerationConfig,
    transport: TransportPolicy,
    session_id: String,
}

impl HttpGenerator {
    pub fn new(config: GenerationConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            config,
            transport: TransportPolicy::default(),
            session_id: Uuid::new_v4().to_string(),
        })
    }

    fn completions_url(&self) -> Result<Url> {
        let mut base = self.config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base).with_context(|| format!("Invalid API URL: {}", base))?;
        base.join("chat/completions")
            .context("Failed to build chat/completions URL")
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, user_id: &str, prompt: &str) -> Result<GenerationResult> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return Ok(GenerationResult::failed(
                "Generation endpoint is not configured (CONSTRUCTOR_API_KEY is not set)",
            ));
        };

        let url = self.completions_url()?;
        let request_id = Uuid::new_v4().to_string();
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.4,
            user: Some(user_id),
        };

        debug!("=== Generation Request ===");
        debug!("URL: {}", url);
        debug!("Prompt length: {}", prompt.len());

        let response = self
            .transport
            .send(|| {
                self.client
                    .post(url.clone())
                    .header("Authorization", format!("Bearer {}", api_key))
                    .header("x-request-id", &request_id)
                    .header("x-request-session-id", &self.session_id)
                    .json(&body)
            })
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;

        let status = response.status();
        debug!("=== Generation Response ===");
        debug!("Status: {}", status);

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                "Generation request failed with status {}: {}",
                status, error_text
            );
            return Ok(GenerationResult::failed(format!(
                "Generation request failed with status {}: {}",
                status, error_text
            )));
        }

        let response_text = response
            .text()
            .await
            .context("Failed to read response body")?;
        let parsed: ChatResponse =
            serde_json::from_str(&response_text).context("Failed to parse generation response")?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Ok(GenerationResult::failed("Generation returned an empty response"));
        }

        debug!("Generated text length: {}", text.len());
        Ok(GenerationResult::ok(text))
    }
}
