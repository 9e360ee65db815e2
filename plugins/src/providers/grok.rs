//! Grok (x.ai): OpenAI-compatible wire shape with a hard 900-character
//! prompt limit on the image endpoint, declared via `max_prompt_len` so the
//! fallback executor truncates before the call.

use async_trait::async_trait;
use serde_json::{json, Value};

use lumen_core::api::{
    AnalysisResult, AspectRatio, Capability, CapabilitySet, GenerationResult, ImageRef, Provider,
    ProviderError, ProviderId, Settings,
};

const BASE_URL: &str = "https://api.x.ai/v1";

const DEFAULT_CHAT_MODEL: &str = "grok-2-latest";

/// The image endpoint rejects prompts longer than this.
const MAX_PROMPT_LEN: usize = 900;

pub struct GrokProvider {
    client: reqwest::Client,
}

impl GrokProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn api_key(settings: &Settings) -> Result<String, ProviderError> {
        settings
            .providers
            .grok
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::Configuration("Grok API key is missing".into()))
    }

    async fn post(
        &self,
        settings: &Settings,
        path: &str,
        body: &Value,
    ) -> Result<Value, ProviderError> {
        let api_key = Self::api_key(settings)?;
        let response = self
            .client
            .post(format!("{BASE_URL}/{path}"))
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::backend(format!(
                "Grok error ({}): {}",
                status.as_u16(),
                body.trim_end()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| ProviderError::Validation(format!("invalid Grok response: {e}")))
    }

    async fn chat(&self, settings: &Settings, messages: Value) -> Result<String, ProviderError> {
        let data = self
            .post(
                settings,
                "chat/completions",
                &json!({ "model": DEFAULT_CHAT_MODEL, "messages": messages }),
            )
            .await?;
        data.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Validation("Grok returned no message content".into()))
    }
}

#[async_trait]
impl Provider for GrokProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Grok
    }

    fn display_name(&self) -> &'static str {
        "Grok"
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::empty()
            .with(Capability::Vision)
            .with(Capability::Generation)
            .with(Capability::TextGeneration)
            .with(Capability::Captioning)
    }

    fn is_configured(&self, settings: &Settings) -> bool {
        settings.providers.grok.api_key.is_some()
    }

    fn is_configured_for(&self, capability: Capability, settings: &Settings) -> bool {
        if !self.is_configured(settings) {
            return false;
        }
        match capability {
            Capability::Generation => settings.providers.grok.generation_model.is_some(),
            _ => true,
        }
    }

    fn max_prompt_len(&self) -> Option<usize> {
        Some(MAX_PROMPT_LEN)
    }

    async fn test_connection(&self, settings: &Settings) -> Result<(), ProviderError> {
        self.chat(
            settings,
            json!([{ "role": "user", "content": "Reply with the single word: ok" }]),
        )
        .await
        .map(|_| ())
    }

    async fn analyze_image(
        &self,
        image: &ImageRef,
        settings: &Settings,
    ) -> Result<AnalysisResult, ProviderError> {
        let text = self.caption_image(image, settings).await?;
        Ok(AnalysisResult {
            recreation_prompt: text,
            keywords: Vec::new(),
            stats: None,
        })
    }

    async fn caption_image(
        &self,
        image: &ImageRef,
        settings: &Settings,
    ) -> Result<String, ProviderError> {
        self.chat(
            settings,
            json!([{
                "role": "user",
                "content": [
                    { "type": "text", "text": "Describe this image in detail." },
                    { "type": "image_url", "image_url": { "url": image.data_url } }
                ]
            }]),
        )
        .await
    }

    async fn generate_image(
        &self,
        prompt: &str,
        _aspect_ratio: AspectRatio,
        _source_image: Option<&ImageRef>,
        settings: &Settings,
    ) -> Result<GenerationResult, ProviderError> {
        let model = settings
            .providers
            .grok
            .generation_model
            .clone()
            .ok_or_else(|| {
                ProviderError::Configuration("Grok generation model is not set".into())
            })?;
        let data = self
            .post(
                settings,
                "images/generations",
                &json!({
                    "model": model,
                    "prompt": prompt,
                    "response_format": "b64_json",
                }),
            )
            .await?;
        let image = data
            .pointer("/data/0/b64_json")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::backend("Grok returned no image data"))?;
        Ok(GenerationResult {
            image: image.to_string(),
            stats: None,
        })
    }

    async fn generate_keywords(
        &self,
        prompt: &str,
        settings: &Settings,
    ) -> Result<Vec<String>, ProviderError> {
        let text = self
            .chat(
                settings,
                json!([{
                    "role": "user",
                    "content": format!(
                        "Generate 10 descriptive keywords for this image prompt, comma \
                         separated, no sentences: {prompt}"
                    )
                }]),
            )
            .await?;
        Ok(text
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn enhance_prompt(
        &self,
        prompt: &str,
        keywords: &[String],
        settings: &Settings,
    ) -> Result<String, ProviderError> {
        self.chat(
            settings,
            json!([{
                "role": "user",
                "content": format!(
                    "Rewrite this image prompt so it naturally incorporates the keywords \
                     [{}]. Reply with the prompt only: {prompt}",
                    keywords.join(", ")
                )
            }]),
        )
        .await
    }

    async fn adapt_prompt_to_theme(
        &self,
        prompt: &str,
        theme: &str,
        settings: &Settings,
    ) -> Result<String, ProviderError> {
        self.chat(
            settings,
            json!([{
                "role": "user",
                "content": format!(
                    "Adapt this image prompt to the theme \"{theme}\". \
                     Reply with the prompt only: {prompt}"
                )
            }]),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declares_prompt_limit() {
        let provider = GrokProvider::new(reqwest::Client::new());
        assert_eq!(provider.max_prompt_len(), Some(900));
    }

    #[test]
    fn generation_needs_model_id() {
        let provider = GrokProvider::new(reqwest::Client::new());
        let mut settings = Settings::default();
        settings.providers.grok.api_key = Some("k".into());
        assert!(provider.is_configured_for(Capability::Vision, &settings));
        assert!(!provider.is_configured_for(Capability::Generation, &settings));
    }
}
