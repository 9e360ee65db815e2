//! Local inference server (Moondream-style): vision, captioning, tagging
//! (including the WD14 classifier path with the content-rating payload),
//! subject detection, and SDXL-style generation/editing.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use lumen_core::api::{
    AnalysisResult, AspectRatio, Capability, CapabilitySet, GenerationResult, ImageRef,
    MemoryMode, ModelInfo, Provider, ProviderError, ProviderId, Settings, SubjectPoint,
    TagBatchEntry,
};

use crate::transport::{call_model_api, normalize_endpoint, ApiRequest};

/// Score at or above which a classifier label becomes a tag.
const TAG_THRESHOLD: f64 = 0.35;

/// Classifier outputs that are rating signals, not subject tags.
const RATING_LABELS: [&str; 4] = ["general", "sensitive", "questionable", "explicit"];

/// Generation timeout is longer than the default: diffusion runs are slow.
const GENERATION_TIMEOUT: Duration = Duration::from_secs(240);

/// Served model list fallback when `/v1/models` is unreachable or empty.
fn default_models() -> Vec<ModelInfo> {
    vec![
        ModelInfo {
            id: "moondream-2".into(),
            name: "Moondream 2".into(),
            kind: Some("vision".into()),
        },
        ModelInfo {
            id: "wd-vit-tagger-v3".into(),
            name: "WD ViT Tagger v3".into(),
            kind: Some("tagging".into()),
        },
        ModelInfo {
            id: "sdxl-realism".into(),
            name: "SDXL Realism".into(),
            kind: Some("generation".into()),
        },
    ]
}

pub struct MoondreamLocalProvider {
    client: reqwest::Client,
}

impl MoondreamLocalProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn base_url(settings: &Settings) -> Result<String, ProviderError> {
        let endpoint = settings
            .providers
            .moondream_local
            .endpoint
            .as_deref()
            .ok_or_else(|| {
                ProviderError::Configuration("local backend endpoint is missing".into())
            })?;
        Ok(normalize_endpoint(endpoint))
    }

    fn timeout(settings: &Settings) -> Duration {
        Duration::from_secs(settings.providers.moondream_local.timeout_secs)
    }

    fn memory_mode(settings: &Settings) -> MemoryMode {
        settings.performance.vram_usage
    }

    /// Vision model to use; generation model ids are never valid here.
    fn vision_model(settings: &Settings) -> String {
        match settings.providers.moondream_local.model.as_deref() {
            Some(model) if !model.starts_with("sdxl-") => model.to_string(),
            _ => "moondream-2".to_string(),
        }
    }

    fn chat_body(model: &str, prompt: &str, image: &ImageRef, max_tokens: u32) -> Value {
        json!({
            "model": model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": image.data_url } }
                ]
            }],
            "stream": false,
            "max_tokens": max_tokens,
        })
    }

    async fn call(
        &self,
        settings: &Settings,
        url: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<crate::transport::ApiResponse, ProviderError> {
        call_model_api(
            &self.client,
            ApiRequest {
                url,
                api_key: settings.providers.moondream_local.api_key.as_deref(),
                cloud_auth: false,
                body,
                timeout,
                memory_mode: Self::memory_mode(settings),
            },
        )
        .await
    }

    async fn chat(
        &self,
        settings: &Settings,
        model: &str,
        prompt: &str,
        image: &ImageRef,
        max_tokens: u32,
    ) -> Result<crate::transport::ApiResponse, ProviderError> {
        let base = Self::base_url(settings)?;
        let url = format!("{base}/v1/chat/completions");
        let body = Self::chat_body(model, prompt, image, max_tokens);
        self.call(settings, &url, &body, Self::timeout(settings)).await
    }

    /// WD14-style classifier call, with one model fallback to the v2 tagger
    /// when the v3 tagger is unavailable.
    async fn classify(
        &self,
        settings: &Settings,
        model: &str,
        image: &ImageRef,
    ) -> Result<String, ProviderError> {
        let base = Self::base_url(settings)?;
        let url = format!("{base}/v1/classify");
        let body = json!({ "model": model, "image_url": image.data_url });
        match self.call(settings, &url, &body, Self::timeout(settings)).await {
            Ok(response) => Ok(response.text),
            Err(e) if model != "wd14-vit-v2" => {
                tracing::warn!(model, error = %e, "tagger failed, falling back to wd14-vit-v2");
                let body = json!({ "model": "wd14-vit-v2", "image_url": image.data_url });
                self.call(settings, &url, &body, Self::timeout(settings))
                    .await
                    .map(|r| r.text)
            }
            Err(e) => Err(e),
        }
    }

    async fn detect_object(
        &self,
        image: &ImageRef,
        object_name: &str,
        settings: &Settings,
    ) -> Result<Option<BoundingBox>, ProviderError> {
        let prompt = format!(
            "Detect {object_name}. Return the bounding box coordinates as a JSON object: \
             {{\"ymin\": 0.0, \"xmin\": 0.0, \"ymax\": 1.0, \"xmax\": 1.0}}."
        );
        let base = Self::base_url(settings)?;
        let url = format!("{base}/v1/chat/completions");
        let mut body = Self::chat_body(&Self::vision_model(settings), &prompt, image, 256);
        body["response_format"] = json!({ "type": "json_object" });

        let response = self.call(settings, &url, &body, Self::timeout(settings)).await?;
        Ok(parse_bounding_box(&response.text))
    }

    /// Models advertised by the backend, with a static fallback list.
    pub async fn list_models(&self, settings: &Settings) -> Vec<ModelInfo> {
        let Ok(base) = Self::base_url(settings) else {
            return default_models();
        };
        let url = format!("{base}/v1/models");
        let data: Value = match self.client.get(&url).send().await {
            Ok(response) => match response.json().await {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to decode model list, using defaults");
                    return default_models();
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "failed to list models, using defaults");
                return default_models();
            }
        };

        let list = data
            .get("data")
            .or_else(|| data.get("models"))
            .and_then(Value::as_array);
        match list {
            Some(models) if !models.is_empty() => models
                .iter()
                .filter_map(|m| {
                    let id = m.get("id").and_then(Value::as_str)?.to_string();
                    let name = m
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or(&id)
                        .to_string();
                    let kind = m
                        .get("type")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .or_else(|| classify_model_id(&id).map(str::to_string));
                    Some(ModelInfo { id, name, kind })
                })
                .collect(),
            _ => {
                tracing::warn!("empty model list returned, falling back to defaults");
                default_models()
            }
        }
    }

    /// Ask the backend to release cached models, freeing VRAM.
    pub async fn unload_models(&self, settings: &Settings) -> Result<(), ProviderError> {
        let base = Self::base_url(settings)?;
        let url = format!("{base}/v1/system/unload");
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProviderError::backend(format!(
                "unload failed with status {}",
                response.status().as_u16()
            )))
        }
    }
}

#[async_trait]
impl Provider for MoondreamLocalProvider {
    fn id(&self) -> ProviderId {
        ProviderId::MoondreamLocal
    }

    fn display_name(&self) -> &'static str {
        "Moondream Local"
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::empty()
            .with(Capability::Vision)
            .with(Capability::Generation)
            .with(Capability::Editing)
            .with(Capability::Captioning)
            .with(Capability::Tagging)
    }

    fn is_configured(&self, settings: &Settings) -> bool {
        settings.providers.moondream_local.endpoint.is_some()
    }

    fn supports_batch_tagging(&self, settings: &Settings) -> bool {
        let model = settings
            .providers
            .moondream_local
            .tagging_model
            .as_deref()
            .unwrap_or("wd-vit-tagger-v3");
        is_wd14_model(model)
    }

    async fn test_connection(&self, settings: &Settings) -> Result<(), ProviderError> {
        let base = Self::base_url(settings)?;
        let url = format!("{base}/health");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProviderError::backend(format!(
                "server reachable but returned unexpected status: {}",
                response.status().as_u16()
            )))
        }
    }

    async fn analyze_image(
        &self,
        image: &ImageRef,
        settings: &Settings,
    ) -> Result<AnalysisResult, ProviderError> {
        let config = &settings.providers.moondream_local;
        let model = Self::vision_model(settings);
        let response = self
            .chat(settings, &model, "Describe this image.", image, 1024)
            .await?;
        let mut result = AnalysisResult {
            recreation_prompt: response.text,
            keywords: Vec::new(),
            stats: response.stats,
        };

        // A dedicated tagging model enriches the keywords; its failure never
        // fails the analysis.
        if let Some(tagging_model) = config.tagging_model.as_deref() {
            if Some(tagging_model) != config.model.as_deref() {
                match self.tag_image(image, settings).await {
                    Ok(tags) => result.keywords.extend(tags),
                    Err(e) => {
                        tracing::warn!(error = %e, "tagging failed, using keyword prompt fallback");
                        match self
                            .chat(
                                settings,
                                "moondream-2",
                                "List 10 key descriptive tags for this image, comma separated. \
                                 Do not use sentences.",
                                image,
                                100,
                            )
                            .await
                        {
                            Ok(response) => result.keywords.extend(split_tag_list(&response.text)),
                            Err(e) => {
                                tracing::warn!(error = %e, "keyword prompt fallback also failed")
                            }
                        }
                    }
                }
            }
        }

        Ok(result)
    }

    async fn caption_image(
        &self,
        image: &ImageRef,
        settings: &Settings,
    ) -> Result<String, ProviderError> {
        // Caption model override rides through the analysis path.
        let mut effective = settings.clone();
        if let Some(caption_model) = settings.providers.moondream_local.caption_model.clone() {
            effective.providers.moondream_local.model = Some(caption_model);
        }
        effective.providers.moondream_local.tagging_model = None;
        let result = self.analyze_image(image, &effective).await?;
        Ok(result.recreation_prompt)
    }

    async fn tag_image(
        &self,
        image: &ImageRef,
        settings: &Settings,
    ) -> Result<Vec<String>, ProviderError> {
        let config = &settings.providers.moondream_local;
        let model = config
            .tagging_model
            .clone()
            .or_else(|| config.model.clone())
            .unwrap_or_else(|| "wd-vit-tagger-v3".to_string());

        if !is_wd14_model(&model) {
            // No classifier configured: keywords come from the vision model.
            let mut effective = settings.clone();
            effective.providers.moondream_local.model = Some(model);
            effective.providers.moondream_local.tagging_model = None;
            return Ok(self.analyze_image(image, &effective).await?.keywords);
        }

        let text = self.classify(settings, &model, image).await?;
        let parsed = parse_classifier_output(&text);
        let mut tags = parsed.tags;
        if let Some(scores) = parsed.scores {
            let rating = image_rating(&scores);
            tags.push(format!("rating:{rating}"));
            if let Some(explicit) = scores
                .iter()
                .find(|(label, _)| label == "explicit")
                .map(|(_, score)| *score)
            {
                if explicit > 0.0 {
                    tags.push(format!("score:explicit:{explicit:.2}"));
                }
            }
        }
        Ok(tags)
    }

    async fn batch_tag_images(
        &self,
        images: &[ImageRef],
        settings: &Settings,
    ) -> Result<Vec<TagBatchEntry>, ProviderError> {
        let model = settings
            .providers
            .moondream_local
            .tagging_model
            .clone()
            .unwrap_or_else(|| "wd-vit-tagger-v3".to_string());
        if !is_wd14_model(&model) {
            return Err(ProviderError::Configuration(
                "batch tagging is only supported for WD14 models".into(),
            ));
        }

        let base = Self::base_url(settings)?;
        let url = format!("{base}/v1/vision/batch-caption");
        let body = json!({
            "model": model,
            "images": images.iter().map(ImageRef::base64_payload).collect::<Vec<_>>(),
        });
        let response = self.call(settings, &url, &body, Self::timeout(settings)).await?;

        let parsed: Value = serde_json::from_str(&response.text)
            .map_err(|e| ProviderError::Validation(format!("invalid batch response: {e}")))?;
        let captions = parsed
            .get("captions")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ProviderError::Validation("batch response is missing 'captions'".into())
            })?;

        Ok(captions
            .iter()
            .zip(images)
            .map(|(caption, image)| TagBatchEntry {
                image_id: image.id.clone(),
                tags: split_tag_list(caption.get("text").and_then(Value::as_str).unwrap_or("")),
            })
            .collect())
    }

    async fn detect_subject(
        &self,
        image: &ImageRef,
        settings: &Settings,
    ) -> Result<SubjectPoint, ProviderError> {
        match self.detect_object(image, "main subject", settings).await? {
            Some(bounding_box) => Ok(bounding_box.center()),
            None => Ok(SubjectPoint::CENTER),
        }
    }

    async fn generate_image(
        &self,
        prompt: &str,
        aspect_ratio: AspectRatio,
        source_image: Option<&ImageRef>,
        settings: &Settings,
    ) -> Result<GenerationResult, ProviderError> {
        let config = &settings.providers.moondream_local;
        let base = Self::base_url(settings)?;
        let url = format!("{base}/v1/images/generations");
        let (width, height) = aspect_ratio.dimensions();

        let mut body = json!({
            "prompt": prompt,
            "model": config.generation_model.clone()
                .or_else(|| config.model.clone())
                .unwrap_or_else(|| "sdxl-realism".to_string()),
            "width": width,
            "height": height,
            "steps": 30,
            "scheduler": "euler",
            "strength": 0.75,
        });
        if let Some(source) = source_image {
            body["image"] = json!(source.base64_payload());
        }

        let response = self.call(settings, &url, &body, GENERATION_TIMEOUT).await?;
        let parsed: Value = serde_json::from_str(&response.text)
            .map_err(|e| ProviderError::Validation(format!("invalid generation response: {e}")))?;
        let image = parsed
            .pointer("/data/0/b64_json")
            .or_else(|| parsed.pointer("/data/0/url"))
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::backend("no image data returned from backend"))?;

        Ok(GenerationResult {
            image: image.to_string(),
            stats: response.stats,
        })
    }

    async fn edit_image(
        &self,
        image: &ImageRef,
        prompt: &str,
        strength: Option<f32>,
        settings: &Settings,
    ) -> Result<GenerationResult, ProviderError> {
        // Edit is generation with a source image and a gentler strength.
        let config = &settings.providers.moondream_local;
        let base = Self::base_url(settings)?;
        let url = format!("{base}/v1/images/generations");

        let body = json!({
            "prompt": prompt,
            "model": config.generation_model.clone()
                .or_else(|| config.model.clone())
                .unwrap_or_else(|| "sdxl-realism".to_string()),
            "width": 1024,
            "height": 1024,
            "steps": 30,
            "scheduler": "euler",
            "strength": strength.unwrap_or(0.6),
            "image": image.base64_payload(),
        });

        let response = self.call(settings, &url, &body, GENERATION_TIMEOUT).await?;
        let parsed: Value = serde_json::from_str(&response.text)
            .map_err(|e| ProviderError::Validation(format!("invalid generation response: {e}")))?;
        let edited = parsed
            .pointer("/data/0/b64_json")
            .or_else(|| parsed.pointer("/data/0/url"))
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::backend("no image data returned from backend"))?;

        Ok(GenerationResult {
            image: edited.to_string(),
            stats: response.stats,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct BoundingBox {
    ymin: f64,
    xmin: f64,
    ymax: f64,
    xmax: f64,
}

impl BoundingBox {
    /// Center of the box, both axes scaled to 0..=100.
    fn center(&self) -> SubjectPoint {
        let x = ((self.xmin + self.xmax) / 2.0 * 100.0).round();
        let y = ((self.ymin + self.ymax) / 2.0 * 100.0).round();
        SubjectPoint {
            x: x.clamp(0.0, 100.0) as u8,
            y: y.clamp(0.0, 100.0) as u8,
        }
    }
}

fn parse_bounding_box(text: &str) -> Option<BoundingBox> {
    let clean = text.replace("```json", "").replace("```", "");
    let value: Value = serde_json::from_str(clean.trim()).ok()?;
    Some(BoundingBox {
        ymin: value.get("ymin")?.as_f64()?,
        xmin: value.get("xmin")?.as_f64()?,
        ymax: value.get("ymax")?.as_f64()?,
        xmax: value.get("xmax")?.as_f64()?,
    })
}

fn is_wd14_model(model: &str) -> bool {
    let model = model.to_lowercase();
    model.contains("wd14") || model.contains("tagger") || model.contains("vit")
}

fn classify_model_id(id: &str) -> Option<&'static str> {
    let id = id.to_lowercase();
    if id.contains("sdxl") || id.contains("diffusion") || id.contains("flux") {
        Some("generation")
    } else if id.contains("moondream") || id.contains("llava") {
        Some("vision")
    } else if id.contains("caption") {
        Some("captioning")
    } else if id.contains("wd14") || id.contains("tagger") {
        Some("tagging")
    } else {
        None
    }
}

struct ClassifierOutput {
    tags: Vec<String>,
    scores: Option<Vec<(String, f64)>>,
}

/// Parse classifier output: a `scores` map, a `predictions` array, a bare
/// tag array, or (failing all of those) a comma-separated string.
fn parse_classifier_output(text: &str) -> ClassifierOutput {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return ClassifierOutput {
            tags: split_tag_list(text),
            scores: None,
        };
    };

    if let Some(score_map) = value.get("scores").and_then(Value::as_object) {
        let scores: Vec<(String, f64)> = score_map
            .iter()
            .filter_map(|(label, score)| score.as_f64().map(|s| (label.clone(), s)))
            .collect();
        let mut scored_tags: Vec<(String, f64)> = scores
            .iter()
            .filter(|(label, score)| {
                !RATING_LABELS.contains(&label.as_str()) && *score >= TAG_THRESHOLD
            })
            .cloned()
            .collect();
        scored_tags.sort_by(|a, b| b.1.total_cmp(&a.1));
        return ClassifierOutput {
            tags: scored_tags
                .into_iter()
                .map(|(label, _)| label.replace('_', " "))
                .collect(),
            scores: Some(scores),
        };
    }

    if let Some(predictions) = value.get("predictions").and_then(Value::as_array) {
        let scores: Vec<(String, f64)> = predictions
            .iter()
            .filter_map(|p| {
                let label = p.get("label").and_then(Value::as_str)?;
                let score = p.get("score").and_then(Value::as_f64)?;
                Some((label.to_string(), score))
            })
            .collect();
        let tags = scores
            .iter()
            .filter(|(_, score)| *score >= TAG_THRESHOLD)
            .map(|(label, _)| label.replace('_', " "))
            .collect();
        return ClassifierOutput {
            tags,
            scores: Some(scores),
        };
    }

    if let Some(array) = value.as_array() {
        return ClassifierOutput {
            tags: array
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            scores: None,
        };
    }

    ClassifierOutput {
        tags: split_tag_list(text),
        scores: None,
    }
}

fn split_tag_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|t| {
            !t.is_empty() && !t.eq_ignore_ascii_case("unknown") && *t != "LABEL 0"
        })
        .map(str::to_string)
        .collect()
}

/// Content-rating payload derived from classifier scores. Attached to tag
/// results as a `rating:<r>` pseudo-tag.
fn image_rating(scores: &[(String, f64)]) -> &'static str {
    let score_of = |label: &str| {
        scores
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, s)| *s)
            .unwrap_or(0.0)
    };
    let explicit = score_of("explicit");
    let questionable = score_of("questionable");
    let sensitive = score_of("sensitive");

    if explicit > 0.85 {
        "XXX"
    } else if explicit > 0.5 {
        "X"
    } else if questionable > 0.5 {
        "R"
    } else if sensitive > 0.5 {
        "PG-13"
    } else {
        "PG"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn wd14_model_detection() {
        assert!(is_wd14_model("wd-vit-tagger-v3"));
        assert!(is_wd14_model("wd14-vit-v2"));
        assert!(!is_wd14_model("moondream-2"));
    }

    #[test]
    fn classifier_scores_become_sorted_tags() {
        let output = parse_classifier_output(
            r#"{"scores": {"sky": 0.9, "tree_house": 0.5, "dust": 0.1, "general": 0.8}}"#,
        );
        assert_eq!(output.tags, vec!["sky", "tree house"]);
        assert!(output.scores.is_some());
    }

    #[test]
    fn classifier_predictions_are_thresholded() {
        let output = parse_classifier_output(
            r#"{"predictions": [{"label": "cat", "score": 0.8}, {"label": "dog", "score": 0.2}]}"#,
        );
        assert_eq!(output.tags, vec!["cat"]);
    }

    #[test]
    fn classifier_falls_back_to_comma_split() {
        let output = parse_classifier_output("cat, dog, unknown, ");
        assert_eq!(output.tags, vec!["cat", "dog"]);
    }

    #[test]
    fn rating_thresholds() {
        let rate = |explicit: f64, questionable: f64, sensitive: f64| {
            image_rating(&[
                ("explicit".to_string(), explicit),
                ("questionable".to_string(), questionable),
                ("sensitive".to_string(), sensitive),
            ])
        };
        assert_eq!(rate(0.9, 0.0, 0.0), "XXX");
        assert_eq!(rate(0.6, 0.0, 0.0), "X");
        assert_eq!(rate(0.1, 0.6, 0.0), "R");
        assert_eq!(rate(0.0, 0.1, 0.6), "PG-13");
        assert_eq!(rate(0.0, 0.0, 0.0), "PG");
    }

    #[test]
    fn bounding_box_center_with_fences() {
        let bounding_box = parse_bounding_box(
            "```json\n{\"ymin\": 0.2, \"xmin\": 0.4, \"ymax\": 0.6, \"xmax\": 0.8}\n```",
        )
        .unwrap();
        let center = bounding_box.center();
        assert_eq!((center.x, center.y), (60, 40));
    }

    #[test]
    fn unparseable_bounding_box_is_none() {
        assert!(parse_bounding_box("I cannot see a subject").is_none());
    }

    #[tokio::test]
    async fn generate_image_posts_sdxl_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/images/generations")
            .match_body(mockito::Matcher::PartialJson(json!({
                "model": "sdxl-realism",
                "width": 1216,
                "height": 832,
                "steps": 30,
            })))
            .with_status(200)
            .with_body(r#"{"data": [{"b64_json": "QUJD"}]}"#)
            .create_async()
            .await;

        let mut settings = Settings::default();
        settings.providers.moondream_local.endpoint = Some(server.url());
        let provider = MoondreamLocalProvider::new(reqwest::Client::new());
        let result = provider
            .generate_image("a lighthouse", AspectRatio::Landscape, None, &settings)
            .await
            .unwrap();

        assert_eq!(result.image, "QUJD");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn batch_tag_fans_out_by_image_order() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/v1/vision/batch-caption")
            .with_status(200)
            .with_body(r#"{"captions": [{"text": "cat, sofa"}, {"text": "dog"}]}"#)
            .create_async()
            .await;

        let mut settings = Settings::default();
        settings.providers.moondream_local.endpoint = Some(server.url());
        let provider = MoondreamLocalProvider::new(reqwest::Client::new());
        let images = [
            ImageRef {
                id: "one".into(),
                file_name: "one.png".into(),
                data_url: "data:image/png;base64,AA==".into(),
            },
            ImageRef {
                id: "two".into(),
                file_name: "two.png".into(),
                data_url: "data:image/png;base64,BB==".into(),
            },
        ];
        let entries = provider.batch_tag_images(&images, &settings).await.unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].image_id, "one");
        assert_eq!(entries[0].tags, vec!["cat", "sofa"]);
        assert_eq!(entries[1].image_id, "two");
        assert_eq!(entries[1].tags, vec!["dog"]);
    }
}
