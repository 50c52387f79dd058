use crate::error::ModelError;
use crate::traits::LanguageModel;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const GROQ_CHAT_COMPLETIONS_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const DEFAULT_CHAT_MODEL: &str = "llama3-8b-8192";

/// Any OpenAI-compatible chat completions endpoint, one user message per call.
pub struct ChatCompletionsModel {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    provider: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionsModel {
    /// A missing key is not an error here; every `complete` call reports it
    /// instead, so the rest of the pipeline still runs.
    pub fn new(
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            endpoint: GROQ_CHAT_COMPLETIONS_URL.to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            model: model.into(),
            provider: "groq".to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: &str, provider: impl Into<String>) -> Result<Self, ModelError> {
        url::Url::parse(endpoint)?;
        self.endpoint = endpoint.to_string();
        self.provider = provider.into();
        Ok(self)
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionsModel {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            ModelError::MissingCredential(format!("{} api key is not set", self.provider))
        })?;

        debug!(model = %self.model, prompt_len = prompt.len(), "requesting completion");
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&ChatRequest {
                model: &self.model,
                messages: [ChatMessage {
                    role: "user",
                    content: prompt,
                }],
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ModelError::Status {
                provider: self.provider.clone(),
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ModelError::EmptyCompletion(self.provider.clone()))
    }
}
