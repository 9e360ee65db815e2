//! Hosted Moondream API: vision, captioning, and tagging via `/query`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use lumen_core::api::{
    AnalysisResult, Capability, CapabilitySet, ImageRef, Provider, ProviderError, ProviderId,
    Settings,
};

use crate::transport::{call_model_api, ApiRequest};

const CLOUD_TIMEOUT: Duration = Duration::from_secs(120);

const ANALYSIS_PROMPT: &str = "Describe this image in detail. Respond as JSON with two fields: \
     \"recreationPrompt\" (a prompt that would recreate the image) and \
     \"keywords\" (a list of descriptive tags).";

pub struct MoondreamCloudProvider {
    client: reqwest::Client,
}

impl MoondreamCloudProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn endpoint(settings: &Settings) -> String {
        settings
            .providers
            .moondream_cloud
            .endpoint
            .trim_end_matches('/')
            .to_string()
    }

    fn api_key(settings: &Settings) -> Result<String, ProviderError> {
        settings
            .providers
            .moondream_cloud
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::Configuration("cloud API key is missing".into()))
    }
}

#[async_trait]
impl Provider for MoondreamCloudProvider {
    fn id(&self) -> ProviderId {
        ProviderId::MoondreamCloud
    }

    fn display_name(&self) -> &'static str {
        "Moondream Cloud"
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::empty()
            .with(Capability::Vision)
            .with(Capability::Captioning)
            .with(Capability::Tagging)
    }

    fn is_configured(&self, settings: &Settings) -> bool {
        settings.providers.moondream_cloud.api_key.is_some()
    }

    async fn test_connection(&self, settings: &Settings) -> Result<(), ProviderError> {
        let api_key = Self::api_key(settings)?;
        let url = format!("{}/caption", Self::endpoint(settings));
        let response = self
            .client
            .post(&url)
            .header(crate::transport::CLOUD_AUTH_HEADER, api_key)
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        match response.status().as_u16() {
            401 | 403 => Err(ProviderError::Configuration("invalid API key".into())),
            // A 400 means the key was accepted and the empty body rejected.
            code if response.status().is_success() || code == 400 => Ok(()),
            code => Err(ProviderError::backend(format!("unexpected status: {code}"))),
        }
    }

    async fn analyze_image(
        &self,
        image: &ImageRef,
        settings: &Settings,
    ) -> Result<AnalysisResult, ProviderError> {
        let api_key = Self::api_key(settings)?;
        let url = format!("{}/query", Self::endpoint(settings));
        let body = json!({
            "image_url": image.data_url,
            "question": ANALYSIS_PROMPT,
            "stream": false,
            "max_tokens": 1024,
        });

        let response = call_model_api(
            &self.client,
            ApiRequest {
                url: &url,
                api_key: Some(&api_key),
                cloud_auth: true,
                body: &body,
                timeout: CLOUD_TIMEOUT,
                memory_mode: settings.performance.vram_usage,
            },
        )
        .await?;

        // The model may answer with the requested JSON or with prose.
        if let Ok(parsed) = serde_json::from_str::<Value>(&response.text) {
            let recreation_prompt = parsed
                .get("recreationPrompt")
                .and_then(Value::as_str)
                .map(str::to_string);
            if let Some(recreation_prompt) = recreation_prompt {
                let keywords = parsed
                    .get("keywords")
                    .and_then(Value::as_array)
                    .map(|tags| {
                        tags.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                return Ok(AnalysisResult {
                    recreation_prompt,
                    keywords,
                    stats: response.stats,
                });
            }
        }

        Ok(AnalysisResult {
            recreation_prompt: response.text,
            keywords: Vec::new(),
            stats: response.stats,
        })
    }

    async fn caption_image(
        &self,
        image: &ImageRef,
        settings: &Settings,
    ) -> Result<String, ProviderError> {
        Ok(self.analyze_image(image, settings).await?.recreation_prompt)
    }

    async fn tag_image(
        &self,
        image: &ImageRef,
        settings: &Settings,
    ) -> Result<Vec<String>, ProviderError> {
        Ok(self.analyze_image(image, settings).await?.keywords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_only_with_api_key() {
        let provider = MoondreamCloudProvider::new(reqwest::Client::new());
        let mut settings = Settings::default();
        assert!(!provider.is_configured(&settings));
        settings.providers.moondream_cloud.api_key = Some("k".into());
        assert!(provider.is_configured(&settings));
    }

    #[tokio::test]
    async fn analyze_parses_structured_answer() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/query")
            .match_header(crate::transport::CLOUD_AUTH_HEADER, "key")
            .with_status(200)
            .with_body(
                r#"{"answer": "{\"recreationPrompt\": \"a foggy pier\", \"keywords\": [\"fog\", \"pier\"]}"}"#,
            )
            .create_async()
            .await;

        let mut settings = Settings::default();
        settings.providers.moondream_cloud.api_key = Some("key".into());
        settings.providers.moondream_cloud.endpoint = server.url();

        let provider = MoondreamCloudProvider::new(reqwest::Client::new());
        let image = ImageRef {
            id: "a".into(),
            file_name: "a.png".into(),
            data_url: "data:image/png;base64,AA==".into(),
        };
        let result = provider.analyze_image(&image, &settings).await.unwrap();
        assert_eq!(result.recreation_prompt, "a foggy pier");
        assert_eq!(result.keywords, vec!["fog", "pier"]);
    }
}
