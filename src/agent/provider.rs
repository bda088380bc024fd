use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Text-completion capability every pipeline role goes through.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn generate(&self, model: &str, prompt: String, system: Option<String>) -> Result<String>;
}

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const MAX_ATTEMPTS: u32 = 3;
const TEMPERATURE: f32 = 0.2;

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn first_content(body: &str) -> Result<String> {
    let parsed: ChatResponse = serde_json::from_str(body).context("Model response is not a chat completion")?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| anyhow!("Model response carried no content"))
}

/// Any `/chat/completions` endpoint (OpenAI, OpenRouter, vLLM, llama.cpp).
pub struct OpenAICompatibleProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAICompatibleProvider {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn retryable(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }
}

#[async_trait]
impl LLMProvider for OpenAICompatibleProvider {
    async fn generate(&self, model: &str, prompt: String, system: Option<String>) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(ref sys) = system {
            messages.push(ChatMessage { role: "system", content: sys });
        }
        messages.push(ChatMessage { role: "user", content: &prompt });
        let body = ChatRequest {
            model,
            messages,
            temperature: TEMPERATURE,
        };
        let endpoint = format!("{}/chat/completions", self.base_url);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut request = self.client.post(&endpoint).json(&body);
            if let Some(ref key) = self.api_key {
                request = request.bearer_auth(key);
            }

            let res = request.send().await.context("Failed to reach model provider")?;
            let status = res.status();
            if Self::retryable(status) && attempt < MAX_ATTEMPTS {
                warn!("Model provider returned {} for {}, retrying ({}/{})", status, model, attempt, MAX_ATTEMPTS);
                tokio::time::sleep(Duration::from_millis(500 * 2u64.pow(attempt))).await;
                continue;
            }

            let text = res.error_for_status()?.text().await?;
            debug!("{} answered with {} bytes", model, text.len());
            return first_content(&text);
        }
    }
}
