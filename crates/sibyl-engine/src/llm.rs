//! Language-model clients.
//!
//! [`HttpCompletionModel`] speaks the OpenAI-compatible chat-completions
//! shape over reqwest. [`ScriptedModel`] replays canned responses and is
//! the model every test uses.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use sibyl_core::config::LlmConfig;
use sibyl_core::errors::LlmError;
use sibyl_core::traits::ILanguageModel;

pub struct HttpCompletionModel {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl HttpCompletionModel {
    /// Build a client from config. The API key is read from the
    /// environment variable the config names, never stored in config.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| LlmError::Unavailable {
            reason: format!("environment variable {} is not set", config.api_key_env),
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Unavailable {
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl ILanguageModel for HttpCompletionModel {
    async fn complete(
        &self,
        prompt: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        let started = Instant::now();
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": temperature,
            "max_tokens": max_tokens,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    }
                } else {
                    LlmError::Unavailable {
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!(model = %self.model, "rate limited");
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            return Err(LlmError::Unavailable {
                reason: format!("http {status}"),
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| LlmError::Unavailable {
            reason: format!("malformed completion response: {e}"),
        })?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(LlmError::Unavailable {
                reason: "completion response had no choices".to_string(),
            })?;

        debug!(
            model = %self.model,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "completion received"
        );
        Ok(content)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Replays canned completions in order. Records every prompt it sees.
pub struct ScriptedModel {
    responses: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().rev().map(String::from).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompt log poisoned").clone()
    }
}

#[async_trait]
impl ILanguageModel for ScriptedModel {
    async fn complete(
        &self,
        prompt: &str,
        _temperature: f64,
        _max_tokens: u32,
    ) -> Result<String, LlmError> {
        self.prompts
            .lock()
            .expect("prompt log poisoned")
            .push(prompt.to_string());
        self.responses
            .lock()
            .expect("script poisoned")
            .pop()
            .ok_or(LlmError::Unavailable {
                reason: "script exhausted".to_string(),
            })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
