use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};

/// A text+optional-images prompt sent to a provider.
#[derive(Debug, Clone, Default)]
pub struct AiRequest {
    pub prompt: String,
    pub image_paths: Vec<PathBuf>,
}

#[async_trait]
pub trait AIProvider: Send + Sync {
    async fn process(&self, model: &str, request: &AiRequest) -> Result<String>;
}

/// Routes a model name to its provider. Model names are free strings; the
/// prefix decides which API shape is spoken.
#[derive(Clone)]
pub struct AiRegistry {
    openai: Arc<OpenAiLike>,
    gemini: Arc<Gemini>,
    claude: Arc<Claude>,
    default_model: String,
}

impl AiRegistry {
    pub fn new(config: &Config) -> Self {
        let client = Client::new();
        Self {
            openai: Arc::new(OpenAiLike {
                client: client.clone(),
                api_key: config.ai_api_key.clone(),
                api_base: config.ai_api_base.clone(),
            }),
            gemini: Arc::new(Gemini {
                client: client.clone(),
                api_key: config.ai_api_key.clone(),
            }),
            claude: Arc::new(Claude {
                client,
                api_key: config.ai_api_key.clone(),
            }),
            default_model: config.default_ai_model.clone(),
        }
    }

    pub fn provider_for(&self, model: &str) -> Arc<dyn AIProvider> {
        if model.starts_with("gemini") {
            self.gemini.clone()
        } else if model.starts_with("claude") {
            self.claude.clone()
        } else {
            self.openai.clone()
        }
    }

    /// Processes with the given model, falling back to the configured
    /// default when unset.
    pub async fn process(&self, model: Option<&str>, request: &AiRequest) -> Result<String> {
        let model = model.unwrap_or(&self.default_model);
        self.provider_for(model).process(model, request).await
    }
}

fn encode_image(path: &PathBuf) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// OpenAI and every compatible endpoint (`/chat/completions`).
pub struct OpenAiLike {
    client: Client,
    api_key: Option<String>,
    api_base: String,
}

#[async_trait]
impl AIProvider for OpenAiLike {
    async fn process(&self, model: &str, request: &AiRequest) -> Result<String> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| Error::AiProvider("no API key configured".to_string()))?;

        debug!(model, "requesting chat completion");

        let content: Value = if request.image_paths.is_empty() {
            json!(request.prompt)
        } else {
            let mut parts = vec![json!({"type": "text", "text": request.prompt})];
            for path in &request.image_paths {
                let encoded = encode_image(path)?;
                parts.push(json!({
                    "type": "image_url",
                    "image_url": {"url": format!("data:image/jpeg;base64,{encoded}")}
                }));
            }
            json!(parts)
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&json!({
                "model": model,
                "messages": [{"role": "user", "content": content}],
            }))
            .send()
            .await
            .map_err(|e| Error::AiProvider(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::AiProvider(format!("{status}: {body}")));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| Error::AiProvider(e.to_string()))?;
        data["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| Error::AiProvider("response carried no content".to_string()))
    }
}

/// Google `generateContent` shape.
pub struct Gemini {
    client: Client,
    api_key: Option<String>,
}

#[async_trait]
impl AIProvider for Gemini {
    async fn process(&self, model: &str, request: &AiRequest) -> Result<String> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| Error::AiProvider("no API key configured".to_string()))?;

        let mut parts = vec![json!({"text": request.prompt})];
        for path in &request.image_paths {
            let encoded = encode_image(path)?;
            parts.push(json!({
                "inline_data": {"mime_type": "image/jpeg", "data": encoded}
            }));
        }

        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{model}:generateContent?key={api_key}"
        );
        let response = self
            .client
            .post(url)
            .json(&json!({"contents": [{"parts": parts}]}))
            .send()
            .await
            .map_err(|e| Error::AiProvider(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::AiProvider(format!("{status}: {body}")));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| Error::AiProvider(e.to_string()))?;
        data["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| Error::AiProvider("response carried no content".to_string()))
    }
}

/// Anthropic `messages` shape.
pub struct Claude {
    client: Client,
    api_key: Option<String>,
}

#[async_trait]
impl AIProvider for Claude {
    async fn process(&self, model: &str, request: &AiRequest) -> Result<String> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| Error::AiProvider("no API key configured".to_string()))?;

        let mut content = vec![json!({"type": "text", "text": request.prompt})];
        for path in &request.image_paths {
            let encoded = encode_image(path)?;
            content.push(json!({
                "type": "image",
                "source": {"type": "base64", "media_type": "image/jpeg", "data": encoded}
            }));
        }

        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&json!({
                "model": model,
                "max_tokens": 4096,
                "messages": [{"role": "user", "content": content}],
            }))
            .send()
            .await
            .map_err(|e| Error::AiProvider(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::AiProvider(format!("{status}: {body}")));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| Error::AiProvider(e.to_string()))?;
        data["content"][0]["text"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| Error::AiProvider("response carried no content".to_string()))
    }
}

/// Substitutes `{Message}` in a prompt template.
pub fn render_prompt(template: &str, message: &str) -> String {
    template.replace("{Message}", message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_template_substitutes_message() {
        assert_eq!(
            render_prompt("Summarize:\n{Message}", "hello"),
            "Summarize:\nhello"
        );
        assert_eq!(render_prompt("no placeholder", "x"), "no placeholder");
    }
}
