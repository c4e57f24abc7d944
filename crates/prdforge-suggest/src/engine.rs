use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use llm::builder::{LLMBackend, LLMBuilder};
use llm::chat::ChatMessage;
use prdforge_core::settings::ai_configured;
use prdforge_core::AiSettings;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::GatewayError;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

/// A chat-completion backend that answers with a JSON object.
#[async_trait]
pub trait ChatEngine: Send + Sync {
    fn model(&self) -> &str;

    async fn complete(&self, system: &str, user: &str) -> Result<Completion, GatewayError>;
}

/// Pick an engine for the configured provider.
pub fn engine_for(settings: &AiSettings) -> Result<Arc<dyn ChatEngine>, GatewayError> {
    if !ai_configured(settings) {
        return Err(GatewayError::NotConfigured);
    }
    if settings.provider == "openai" {
        return Ok(Arc::new(OpenAiEngine::new(settings)?));
    }
    map_backend(&settings.provider)?;
    Ok(Arc::new(LlmEngine::new(settings.clone())))
}

// --- Multi-provider engine ---

fn map_backend(provider: &str) -> Result<LLMBackend, GatewayError> {
    match provider {
        "openai" => Ok(LLMBackend::OpenAI),
        "anthropic" => Ok(LLMBackend::Anthropic),
        "google" => Ok(LLMBackend::Google),
        "ollama" => Ok(LLMBackend::Ollama),
        "groq" => Ok(LLMBackend::Groq),
        "mistral" => Ok(LLMBackend::Mistral),
        "deepseek" => Ok(LLMBackend::DeepSeek),
        other => Err(GatewayError::UnknownProvider(other.to_string())),
    }
}

/// Any provider the `llm` crate speaks. Token counts are not reported.
pub struct LlmEngine {
    settings: AiSettings,
}

impl LlmEngine {
    pub fn new(settings: AiSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ChatEngine for LlmEngine {
    fn model(&self) -> &str {
        &self.settings.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<Completion, GatewayError> {
        let backend = map_backend(&self.settings.provider)?;

        let mut builder = LLMBuilder::new()
            .backend(backend)
            .model(&self.settings.model)
            .system(system);

        if !self.settings.api_key.is_empty() {
            builder = builder.api_key(&self.settings.api_key);
        }

        let llm = builder
            .build()
            .map_err(|e| GatewayError::Provider(format!("build LLM: {e}")))?;

        let messages = vec![ChatMessage::user().content(user).build()];

        let response = llm
            .chat(&messages)
            .await
            .map_err(|e| GatewayError::classify(&e.to_string()))?;

        match response.text() {
            Some(text) if !text.trim().is_empty() => Ok(Completion { text, usage: None }),
            _ => Err(GatewayError::EmptyResponse),
        }
    }
}

// --- OpenAI-compatible engine ---

/// Chat Completions with `response_format: json_object`.
pub struct OpenAiEngine {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiEngine {
    pub fn new(settings: &AiSettings) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| GatewayError::Provider(e.to_string()))?;
        Ok(Self {
            client,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
        })
    }

    fn request_body(&self, system: &str, user: &str) -> serde_json::Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "response_format": { "type": "json_object" },
            "temperature": 0.7,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    choices: Vec<ChatChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl ChatEngine for OpenAiEngine {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<Completion, GatewayError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.request_body(system, user))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GatewayError::from_status(status.as_u16(), body));
        }

        let parsed: ChatCompletionsResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Parse(e.to_string()))?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or(GatewayError::EmptyResponse)?;
        Ok(Completion {
            text,
            usage: parsed.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ai(provider: &str, key: &str) -> AiSettings {
        AiSettings {
            provider: provider.into(),
            api_key: key.into(),
            model: "m".into(),
            base_url: None,
        }
    }

    #[test]
    fn unconfigured_settings_are_rejected() {
        assert!(matches!(engine_for(&ai("openai", "")), Err(GatewayError::NotConfigured)));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        assert!(matches!(
            engine_for(&ai("acme", "k")),
            Err(GatewayError::UnknownProvider(p)) if p == "acme"
        ));
    }

    #[test]
    fn picks_engine_by_provider() {
        assert_eq!(engine_for(&ai("openai", "k")).unwrap().model(), "m");
        assert_eq!(engine_for(&ai("ollama", "")).unwrap().model(), "m");
    }

    #[test]
    fn openai_body_requests_json_object() {
        let engine = OpenAiEngine::new(&ai("openai", "k")).unwrap();
        let body = engine.request_body("sys", "hi");
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(engine.base_url, OPENAI_BASE_URL);
    }
}
