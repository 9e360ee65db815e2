//! OpenAI: image generation, captioning, and text transforms over the
//! standard chat/images endpoints.

use async_trait::async_trait;
use serde_json::{json, Value};

use lumen_core::api::{
    AspectRatio, Capability, CapabilitySet, GenerationResult, ImageRef, Provider, ProviderError,
    ProviderId, Settings,
};

const BASE_URL: &str = "https://api.openai.com/v1";

const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

pub struct OpenaiProvider {
    client: reqwest::Client,
}

impl OpenaiProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn api_key(settings: &Settings) -> Result<String, ProviderError> {
        settings
            .providers
            .openai
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::Configuration("OpenAI API key is missing".into()))
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
                "OpenAI error ({}): {}",
                status.as_u16(),
                body.trim_end()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| ProviderError::Validation(format!("invalid OpenAI response: {e}")))
    }

    async fn chat(
        &self,
        settings: &Settings,
        messages: Value,
    ) -> Result<String, ProviderError> {
        let model = settings
            .providers
            .openai
            .text_generation_model
            .clone()
            .unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string());
        let data = self
            .post(
                settings,
                "chat/completions",
                &json!({ "model": model, "messages": messages }),
            )
            .await?;
        data.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Validation("OpenAI returned no message content".into()))
    }
}

#[async_trait]
impl Provider for OpenaiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Openai
    }

    fn display_name(&self) -> &'static str {
        "OpenAI"
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::empty()
            .with(Capability::Generation)
            .with(Capability::TextGeneration)
            .with(Capability::Captioning)
    }

    fn is_configured(&self, settings: &Settings) -> bool {
        settings.providers.openai.api_key.is_some()
    }

    fn is_configured_for(&self, capability: Capability, settings: &Settings) -> bool {
        if !self.is_configured(settings) {
            return false;
        }
        match capability {
            Capability::Generation => settings.providers.openai.generation_model.is_some(),
            Capability::TextGeneration => {
                settings.providers.openai.text_generation_model.is_some()
            }
            _ => true,
        }
    }

    async fn test_connection(&self, settings: &Settings) -> Result<(), ProviderError> {
        let api_key = Self::api_key(settings)?;
        let response = self
            .client
            .get(format!("{BASE_URL}/models"))
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        match response.status().as_u16() {
            401 | 403 => Err(ProviderError::Configuration("invalid API key".into())),
            _ if response.status().is_success() => Ok(()),
            code => Err(ProviderError::backend(format!("unexpected status: {code}"))),
        }
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
        aspect_ratio: AspectRatio,
        _source_image: Option<&ImageRef>,
        settings: &Settings,
    ) -> Result<GenerationResult, ProviderError> {
        let model = settings
            .providers
            .openai
            .generation_model
            .clone()
            .ok_or_else(|| {
                ProviderError::Configuration("OpenAI generation model is not set".into())
            })?;
        let size = match aspect_ratio {
            AspectRatio::Square => "1024x1024",
            AspectRatio::Landscape | AspectRatio::Ultrawide => "1792x1024",
            AspectRatio::Portrait => "1024x1792",
        };
        let data = self
            .post(
                settings,
                "images/generations",
                &json!({
                    "model": model,
                    "prompt": prompt,
                    "size": size,
                    "response_format": "b64_json",
                }),
            )
            .await?;
        let image = data
            .pointer("/data/0/b64_json")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::backend("OpenAI returned no image data"))?;
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
