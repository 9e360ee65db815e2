//! ComfyUI: template-driven workflow submission. The operator supplies a
//! workflow JSON with `{prompt}` / `{image}` placeholders; the provider
//! submits it to `/prompt` and polls `/history` for the output image.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use lumen_core::api::{
    AnimationResult, AspectRatio, Capability, CapabilitySet, GenerationResult, ImageRef,
    Provider, ProviderError, ProviderId, Settings,
};

use crate::transport::normalize_endpoint;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Diffusion/video workflows are slow; poll for up to four minutes.
const MAX_POLLS: usize = 240;

pub struct ComfyuiProvider {
    client: reqwest::Client,
}

impl ComfyuiProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn base_url(settings: &Settings) -> Result<String, ProviderError> {
        settings
            .providers
            .comfyui
            .endpoint
            .as_deref()
            .map(normalize_endpoint)
            .ok_or_else(|| ProviderError::Configuration("ComfyUI endpoint is missing".into()))
    }

    fn workflow(
        settings: &Settings,
        prompt: &str,
        image: Option<&ImageRef>,
    ) -> Result<Value, ProviderError> {
        let template = settings.providers.comfyui.workflow.as_deref().ok_or_else(|| {
            ProviderError::Configuration("ComfyUI workflow template is missing".into())
        })?;
        // Placeholders are substituted as JSON string content, so the prompt
        // must be escaped rather than spliced raw.
        let escaped = prompt.replace('\\', "\\\\").replace('"', "\\\"");
        let mut rendered = template.replace("{prompt}", &escaped);
        if let Some(image) = image {
            rendered = rendered.replace("{image}", image.base64_payload());
        }
        serde_json::from_str(&rendered).map_err(|e| {
            ProviderError::Configuration(format!("workflow template is not valid JSON: {e}"))
        })
    }

    async fn submit_and_wait(
        &self,
        settings: &Settings,
        prompt: &str,
        image: Option<&ImageRef>,
    ) -> Result<String, ProviderError> {
        let base = Self::base_url(settings)?;
        let workflow = Self::workflow(settings, prompt, image)?;
        let client_id = uuid::Uuid::new_v4().to_string();

        let mut request = self
            .client
            .post(format!("{base}/prompt"))
            .json(&json!({ "prompt": workflow, "client_id": client_id }));
        if let Some(key) = settings.providers.comfyui.api_key.as_deref() {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::backend(format!(
                "ComfyUI error ({}): {}",
                status.as_u16(),
                body.trim_end()
            )));
        }
        let data: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Validation(format!("invalid ComfyUI response: {e}")))?;
        let prompt_id = data
            .get("prompt_id")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Validation("ComfyUI returned no prompt_id".into()))?
            .to_string();
        tracing::debug!(prompt_id = %prompt_id, "workflow queued");

        for _ in 0..MAX_POLLS {
            tokio::time::sleep(POLL_INTERVAL).await;
            let history: Value = self
                .client
                .get(format!("{base}/history/{prompt_id}"))
                .send()
                .await
                .map_err(|e| ProviderError::Transport(e.to_string()))?
                .json()
                .await
                .map_err(|e| {
                    ProviderError::Validation(format!("invalid ComfyUI history: {e}"))
                })?;

            let Some(entry) = history.get(&prompt_id) else {
                continue;
            };
            if let Some(output) = first_output_image(entry) {
                return Ok(format!(
                    "{base}/view?filename={}&subfolder={}&type={}",
                    output.filename, output.subfolder, output.kind
                ));
            }
            let failed = entry
                .pointer("/status/status_str")
                .and_then(Value::as_str)
                .map(|s| s == "error")
                .unwrap_or(false);
            if failed {
                return Err(ProviderError::backend("ComfyUI workflow failed"));
            }
        }
        Err(ProviderError::backend(
            "timed out waiting for ComfyUI output",
        ))
    }
}

struct OutputImage {
    filename: String,
    subfolder: String,
    kind: String,
}

fn first_output_image(entry: &Value) -> Option<OutputImage> {
    let outputs = entry.get("outputs")?.as_object()?;
    for node in outputs.values() {
        let Some(images) = node.get("images").and_then(Value::as_array) else {
            continue;
        };
        if let Some(image) = images.first() {
            return Some(OutputImage {
                filename: image.get("filename")?.as_str()?.to_string(),
                subfolder: image
                    .get("subfolder")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                kind: image
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("output")
                    .to_string(),
            });
        }
    }
    None
}

#[async_trait]
impl Provider for ComfyuiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Comfyui
    }

    fn display_name(&self) -> &'static str {
        "ComfyUI"
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::empty()
            .with(Capability::Generation)
            .with(Capability::Animation)
            .with(Capability::Editing)
    }

    fn is_configured(&self, settings: &Settings) -> bool {
        // The endpoint is always required; the API key is optional.
        settings.providers.comfyui.endpoint.is_some()
    }

    async fn test_connection(&self, settings: &Settings) -> Result<(), ProviderError> {
        let base = Self::base_url(settings)?;
        let response = self
            .client
            .get(format!("{base}/system_stats"))
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProviderError::backend(format!(
                "unexpected status: {}",
                response.status().as_u16()
            )))
        }
    }

    async fn generate_image(
        &self,
        prompt: &str,
        _aspect_ratio: AspectRatio,
        source_image: Option<&ImageRef>,
        settings: &Settings,
    ) -> Result<GenerationResult, ProviderError> {
        let image = self.submit_and_wait(settings, prompt, source_image).await?;
        Ok(GenerationResult { image, stats: None })
    }

    async fn edit_image(
        &self,
        image: &ImageRef,
        prompt: &str,
        _strength: Option<f32>,
        settings: &Settings,
    ) -> Result<GenerationResult, ProviderError> {
        let edited = self.submit_and_wait(settings, prompt, Some(image)).await?;
        Ok(GenerationResult {
            image: edited,
            stats: None,
        })
    }

    async fn animate_image(
        &self,
        image: Option<&ImageRef>,
        prompt: &str,
        _aspect_ratio: AspectRatio,
        settings: &Settings,
    ) -> Result<AnimationResult, ProviderError> {
        let uri = self.submit_and_wait(settings, prompt, image).await?;
        Ok(AnimationResult {
            uri,
            api_key: settings
                .providers
                .comfyui
                .api_key
                .clone()
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_substitutes_and_escapes_prompt() {
        let mut settings = Settings::default();
        settings.providers.comfyui.workflow =
            Some(r#"{"1": {"inputs": {"text": "{prompt}"}}}"#.into());
        let workflow = ComfyuiProvider::workflow(&settings, r#"a "quoted" pier"#, None).unwrap();
        assert_eq!(
            workflow.pointer("/1/inputs/text").unwrap(),
            r#"a "quoted" pier"#
        );
    }

    #[test]
    fn missing_workflow_is_a_configuration_error() {
        let settings = Settings::default();
        let err = ComfyuiProvider::workflow(&settings, "p", None).unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[test]
    fn output_image_extraction() {
        let entry = serde_json::json!({
            "outputs": {
                "9": { "images": [{ "filename": "out_0001.png", "subfolder": "", "type": "output" }] }
            }
        });
        let output = first_output_image(&entry).unwrap();
        assert_eq!(output.filename, "out_0001.png");
        assert_eq!(output.kind, "output");
    }
}
