//! Google Gemini: the broadest remote provider. Vision, generation,
//! animation (Veo), editing, text generation, captioning, tagging.

use async_trait::async_trait;
use serde_json::{json, Value};

use lumen_core::api::{
    AnalysisResult, AnimationResult, AspectRatio, Capability, CapabilitySet, GenerationResult,
    ImageRef, Provider, ProviderError, ProviderId, Settings, SubjectPoint,
};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const DEFAULT_TEXT_MODEL: &str = "gemini-2.0-flash";

pub struct GeminiProvider {
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn api_key(settings: &Settings) -> Result<String, ProviderError> {
        settings
            .providers
            .gemini
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::Configuration("Gemini API key is missing".into()))
    }

    fn image_part(image: &ImageRef) -> Value {
        let (mime_type, data) = image
            .data_url
            .strip_prefix("data:")
            .and_then(|rest| rest.split_once(";base64,"))
            .unwrap_or(("image/png", image.base64_payload()));
        json!({ "inline_data": { "mime_type": mime_type, "data": data } })
    }

    async fn generate_content(
        &self,
        settings: &Settings,
        model: &str,
        parts: Value,
    ) -> Result<Value, ProviderError> {
        let api_key = Self::api_key(settings)?;
        let url = format!("{BASE_URL}/models/{model}:generateContent");
        let body = json!({ "contents": [{ "parts": parts }] });

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::backend(format!(
                "Gemini error ({}): {}",
                status.as_u16(),
                body.trim_end()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| ProviderError::Validation(format!("invalid Gemini response: {e}")))
    }

    async fn text_completion(
        &self,
        settings: &Settings,
        prompt: &str,
    ) -> Result<String, ProviderError> {
        let data = self
            .generate_content(settings, DEFAULT_TEXT_MODEL, json!([{ "text": prompt }]))
            .await?;
        first_text(&data)
            .ok_or_else(|| ProviderError::Validation("Gemini returned no text part".into()))
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    fn display_name(&self) -> &'static str {
        "Google Gemini"
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::empty()
            .with(Capability::Vision)
            .with(Capability::Generation)
            .with(Capability::Animation)
            .with(Capability::Editing)
            .with(Capability::TextGeneration)
            .with(Capability::Captioning)
            .with(Capability::Tagging)
    }

    fn is_configured(&self, settings: &Settings) -> bool {
        settings.providers.gemini.api_key.is_some()
    }

    fn is_configured_for(&self, capability: Capability, settings: &Settings) -> bool {
        if !self.is_configured(settings) {
            return false;
        }
        match capability {
            Capability::Generation => settings.providers.gemini.generation_model.is_some(),
            Capability::Animation => settings.providers.gemini.veo_model.is_some(),
            _ => true,
        }
    }

    async fn test_connection(&self, settings: &Settings) -> Result<(), ProviderError> {
        self.text_completion(settings, "Reply with the single word: ok")
            .await
            .map(|_| ())
    }

    async fn analyze_image(
        &self,
        image: &ImageRef,
        settings: &Settings,
    ) -> Result<AnalysisResult, ProviderError> {
        let prompt = "Describe this image. Respond as JSON with \"recreationPrompt\" (a prompt \
                      that would recreate it) and \"keywords\" (descriptive tags).";
        let data = self
            .generate_content(
                settings,
                DEFAULT_TEXT_MODEL,
                json!([{ "text": prompt }, Self::image_part(image)]),
            )
            .await?;
        let text = first_text(&data)
            .ok_or_else(|| ProviderError::Validation("Gemini returned no text part".into()))?;

        let cleaned = text.replace("```json", "").replace("```", "");
        if let Ok(parsed) = serde_json::from_str::<Value>(cleaned.trim()) {
            if let Some(recreation_prompt) =
                parsed.get("recreationPrompt").and_then(Value::as_str)
            {
                return Ok(AnalysisResult {
                    recreation_prompt: recreation_prompt.to_string(),
                    keywords: parsed
                        .get("keywords")
                        .and_then(Value::as_array)
                        .map(|tags| {
                            tags.iter()
                                .filter_map(Value::as_str)
                                .map(str::to_string)
                                .collect()
                        })
                        .unwrap_or_default(),
                    stats: None,
                });
            }
        }
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
        let data = self
            .generate_content(
                settings,
                DEFAULT_TEXT_MODEL,
                json!([{ "text": "Describe this image in detail." }, Self::image_part(image)]),
            )
            .await?;
        first_text(&data)
            .ok_or_else(|| ProviderError::Validation("Gemini returned no text part".into()))
    }

    async fn tag_image(
        &self,
        image: &ImageRef,
        settings: &Settings,
    ) -> Result<Vec<String>, ProviderError> {
        let data = self
            .generate_content(
                settings,
                DEFAULT_TEXT_MODEL,
                json!([
                    { "text": "List 15 descriptive tags for this image, comma separated. \
                               No sentences." },
                    Self::image_part(image)
                ]),
            )
            .await?;
        let text = first_text(&data)
            .ok_or_else(|| ProviderError::Validation("Gemini returned no text part".into()))?;
        Ok(text
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn detect_subject(
        &self,
        image: &ImageRef,
        settings: &Settings,
    ) -> Result<SubjectPoint, ProviderError> {
        let prompt = "Detect the main subject. Return JSON: \
                      {\"ymin\": 0.0, \"xmin\": 0.0, \"ymax\": 1.0, \"xmax\": 1.0}.";
        let data = self
            .generate_content(
                settings,
                DEFAULT_TEXT_MODEL,
                json!([{ "text": prompt }, Self::image_part(image)]),
            )
            .await?;
        let text = first_text(&data).unwrap_or_default();
        let cleaned = text.replace("```json", "").replace("```", "");
        let Ok(parsed) = serde_json::from_str::<Value>(cleaned.trim()) else {
            return Ok(SubjectPoint::CENTER);
        };
        let coord = |key: &str| parsed.get(key).and_then(Value::as_f64);
        match (coord("xmin"), coord("xmax"), coord("ymin"), coord("ymax")) {
            (Some(xmin), Some(xmax), Some(ymin), Some(ymax)) => Ok(SubjectPoint {
                x: (((xmin + xmax) / 2.0) * 100.0).round().clamp(0.0, 100.0) as u8,
                y: (((ymin + ymax) / 2.0) * 100.0).round().clamp(0.0, 100.0) as u8,
            }),
            _ => Ok(SubjectPoint::CENTER),
        }
    }

    async fn generate_image(
        &self,
        prompt: &str,
        aspect_ratio: AspectRatio,
        source_image: Option<&ImageRef>,
        settings: &Settings,
    ) -> Result<GenerationResult, ProviderError> {
        let model = settings
            .providers
            .gemini
            .generation_model
            .clone()
            .ok_or_else(|| {
                ProviderError::Configuration("Gemini generation model is not set".into())
            })?;
        let mut parts = vec![json!({
            "text": format!("{prompt} (aspect ratio {})", aspect_ratio.as_str())
        })];
        if let Some(source) = source_image {
            parts.push(Self::image_part(source));
        }
        let data = self
            .generate_content(settings, &model, Value::Array(parts))
            .await?;
        let image = first_inline_image(&data)
            .ok_or_else(|| ProviderError::backend("Gemini returned no image data"))?;
        Ok(GenerationResult { image, stats: None })
    }

    async fn animate_image(
        &self,
        image: Option<&ImageRef>,
        prompt: &str,
        aspect_ratio: AspectRatio,
        settings: &Settings,
    ) -> Result<AnimationResult, ProviderError> {
        let api_key = Self::api_key(settings)?;
        let model = settings.providers.gemini.veo_model.clone().ok_or_else(|| {
            ProviderError::Configuration("Gemini video model is not set".into())
        })?;

        let mut instance = json!({ "prompt": prompt });
        if let Some(image) = image {
            instance["image"] = json!({
                "bytesBase64Encoded": image.base64_payload(),
                "mimeType": "image/png",
            });
        }
        let body = json!({
            "instances": [instance],
            "parameters": { "aspectRatio": aspect_ratio.as_str() },
        });

        let url = format!("{BASE_URL}/models/{model}:predictLongRunning");
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::backend(format!(
                "Veo error ({}): {}",
                status.as_u16(),
                body.trim_end()
            )));
        }
        let data: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Validation(format!("invalid Veo response: {e}")))?;
        let operation = data
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Validation("Veo returned no operation name".into()))?;

        // The caller polls the operation and downloads with the same key.
        Ok(AnimationResult {
            uri: format!("{BASE_URL}/{operation}"),
            api_key,
        })
    }

    async fn edit_image(
        &self,
        image: &ImageRef,
        prompt: &str,
        _strength: Option<f32>,
        settings: &Settings,
    ) -> Result<GenerationResult, ProviderError> {
        let model = settings
            .providers
            .gemini
            .generation_model
            .clone()
            .ok_or_else(|| {
                ProviderError::Configuration("Gemini generation model is not set".into())
            })?;
        let data = self
            .generate_content(
                settings,
                &model,
                json!([{ "text": prompt }, Self::image_part(image)]),
            )
            .await?;
        let image = first_inline_image(&data)
            .ok_or_else(|| ProviderError::backend("Gemini returned no image data"))?;
        Ok(GenerationResult { image, stats: None })
    }

    async fn generate_keywords(
        &self,
        prompt: &str,
        settings: &Settings,
    ) -> Result<Vec<String>, ProviderError> {
        let text = self
            .text_completion(
                settings,
                &format!(
                    "Generate 10 descriptive keywords for this image prompt, comma separated, \
                     no sentences: {prompt}"
                ),
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
        self.text_completion(
            settings,
            &format!(
                "Rewrite this image prompt so it naturally incorporates the keywords \
                 [{}]. Reply with the prompt only: {prompt}",
                keywords.join(", ")
            ),
        )
        .await
    }

    async fn adapt_prompt_to_theme(
        &self,
        prompt: &str,
        theme: &str,
        settings: &Settings,
    ) -> Result<String, ProviderError> {
        self.text_completion(
            settings,
            &format!(
                "Adapt this image prompt to the theme \"{theme}\". \
                 Reply with the prompt only: {prompt}"
            ),
        )
        .await
    }
}

fn first_text(data: &Value) -> Option<String> {
    data.pointer("/candidates/0/content/parts")?
        .as_array()?
        .iter()
        .find_map(|part| part.get("text").and_then(Value::as_str))
        .map(str::to_string)
}

fn first_inline_image(data: &Value) -> Option<String> {
    data.pointer("/candidates/0/content/parts")?
        .as_array()?
        .iter()
        .find_map(|part| {
            part.pointer("/inline_data/data")
                .or_else(|| part.pointer("/inlineData/data"))
                .and_then(Value::as_str)
        })
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_requires_model_id() {
        let provider = GeminiProvider::new(reqwest::Client::new());
        let mut settings = Settings::default();
        settings.providers.gemini.api_key = Some("k".into());

        assert!(provider.is_configured_for(Capability::Vision, &settings));
        assert!(!provider.is_configured_for(Capability::Generation, &settings));
        assert!(!provider.is_configured_for(Capability::Animation, &settings));

        settings.providers.gemini.generation_model = Some("gemini-2.0-flash-image".into());
        settings.providers.gemini.veo_model = Some("veo-2".into());
        assert!(provider.is_configured_for(Capability::Generation, &settings));
        assert!(provider.is_configured_for(Capability::Animation, &settings));
    }

    #[test]
    fn image_part_splits_data_url() {
        let image = ImageRef {
            id: "a".into(),
            file_name: "a.jpg".into(),
            data_url: "data:image/jpeg;base64,QUJD".into(),
        };
        let part = GeminiProvider::image_part(&image);
        assert_eq!(part.pointer("/inline_data/mime_type").unwrap(), "image/jpeg");
        assert_eq!(part.pointer("/inline_data/data").unwrap(), "QUJD");
    }

    #[test]
    fn first_text_reads_candidate_parts() {
        let data = serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "hello" }] } }]
        });
        assert_eq!(first_text(&data).as_deref(), Some("hello"));
        assert_eq!(first_text(&serde_json::json!({})), None);
    }
}
