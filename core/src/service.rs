//! Capability-routed execution with provider fallback.
//!
//! Every public operation resolves its capability's routing table entry and
//! walks the providers in order until one succeeds. Order encodes
//! preference; first success wins and no further providers are tried.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::capability::{Capability, ProviderId};
use crate::config::Settings;
use crate::error::{AttemptRecord, FallbackChainError, ProviderError, ServiceError};
use crate::provider::types::{
    AnalysisResult, AnimationResult, AspectRatio, GenerationResult, ImageRef, SubjectPoint,
    TagBatchEntry,
};
use crate::provider::{Provider, ProviderRegistry};

/// Live status of one provider attempt, surfaced to callers that want to
/// show chain progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    Attempting,
    FailedAttempt,
}

#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub provider: ProviderId,
    pub status: AttemptStatus,
    pub message: Option<String>,
}

pub type ProgressFn = dyn Fn(ProgressUpdate) + Send + Sync;

/// The service facade over the provider registry.
pub struct AiService {
    registry: Arc<ProviderRegistry>,
}

impl AiService {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Whether at least one routed provider could serve the capability.
    pub fn is_any_provider_configured(
        &self,
        settings: &Settings,
        capability: Capability,
    ) -> bool {
        settings
            .routing
            .route(capability)
            .iter()
            .filter_map(|id| self.registry.get(*id))
            .any(|p| {
                p.capabilities().contains(capability) && p.is_configured_for(capability, settings)
            })
    }

    /// Probe one provider's connectivity directly (no fallback).
    pub async fn test_provider_connection(
        &self,
        id: ProviderId,
        settings: &Settings,
    ) -> Result<(), ProviderError> {
        let provider = self
            .registry
            .get(id)
            .ok_or_else(|| ProviderError::Configuration(format!("unknown provider: {id}")))?;
        provider.test_connection(settings).await
    }

    async fn execute_with_fallback<'a, T>(
        &'a self,
        settings: &'a Settings,
        capability: Capability,
        op: impl Fn(Arc<dyn Provider>) -> BoxFuture<'a, Result<T, ProviderError>>,
        on_progress: Option<&'a ProgressFn>,
    ) -> Result<T, ServiceError> {
        self.execute_with_fallback_filtered(settings, capability, |_| true, op, on_progress)
            .await
    }

    /// Fallback chain with an extra eligibility predicate beyond the
    /// capability/configuration checks (used by batch operations).
    async fn execute_with_fallback_filtered<'a, T>(
        &'a self,
        settings: &'a Settings,
        capability: Capability,
        eligible: impl Fn(&dyn Provider) -> bool,
        op: impl Fn(Arc<dyn Provider>) -> BoxFuture<'a, Result<T, ProviderError>>,
        on_progress: Option<&'a ProgressFn>,
    ) -> Result<T, ServiceError> {
        let route = settings.routing.route(capability);
        if route.is_empty() {
            return Err(ServiceError::NoProvidersRouted(capability));
        }

        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut all_transport = true;

        for id in route {
            let Some(provider) = self.registry.get(*id) else {
                tracing::debug!(provider = %id, "routed provider is not registered, skipping");
                continue;
            };
            if !provider.capabilities().contains(capability) {
                tracing::debug!(provider = %id, capability = %capability,
                    "routed provider does not declare capability, skipping");
                continue;
            }
            if !provider.is_configured_for(capability, settings) {
                tracing::debug!(provider = %id, capability = %capability,
                    "routed provider is not configured, skipping");
                continue;
            }
            if !eligible(provider.as_ref()) {
                tracing::debug!(provider = %id, "routed provider not eligible for this call, skipping");
                continue;
            }

            if let Some(cb) = on_progress {
                cb(ProgressUpdate {
                    provider: *id,
                    status: AttemptStatus::Attempting,
                    message: None,
                });
            }
            tracing::debug!(provider = %id, capability = %capability, "attempting provider");

            match op(provider).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(provider = %id, capability = %capability, error = %e,
                        "provider attempt failed");
                    if let Some(cb) = on_progress {
                        cb(ProgressUpdate {
                            provider: *id,
                            status: AttemptStatus::FailedAttempt,
                            message: Some(e.to_string()),
                        });
                    }
                    if !matches!(e, ProviderError::Transport(_)) {
                        all_transport = false;
                    }
                    attempts.push(AttemptRecord {
                        provider: *id,
                        error: e.to_string(),
                    });
                }
            }
        }

        let Some(last_provider) = attempts.last().map(|a| a.provider) else {
            return Err(ServiceError::NotConfigured(capability));
        };
        let message = format!(
            "all routed providers failed for '{capability}'; last error from {last_provider}"
        );
        Err(FallbackChainError {
            message,
            attempts,
            all_transport,
        }
        .into())
    }

    pub async fn analyze_image(
        &self,
        image: &ImageRef,
        settings: &Settings,
        on_progress: Option<&ProgressFn>,
    ) -> Result<AnalysisResult, ServiceError> {
        self.execute_with_fallback(
            settings,
            Capability::Vision,
            |p| Box::pin(async move { p.analyze_image(image, settings).await }),
            on_progress,
        )
        .await
    }

    pub async fn caption_image(
        &self,
        image: &ImageRef,
        settings: &Settings,
        on_progress: Option<&ProgressFn>,
    ) -> Result<String, ServiceError> {
        self.execute_with_fallback(
            settings,
            Capability::Captioning,
            |p| Box::pin(async move { p.caption_image(image, settings).await }),
            on_progress,
        )
        .await
    }

    pub async fn tag_image(
        &self,
        image: &ImageRef,
        settings: &Settings,
        on_progress: Option<&ProgressFn>,
    ) -> Result<Vec<String>, ServiceError> {
        self.execute_with_fallback(
            settings,
            Capability::Tagging,
            |p| Box::pin(async move { p.tag_image(image, settings).await }),
            on_progress,
        )
        .await
    }

    /// One call covering a whole batch; only providers that support batch
    /// tagging under the current settings are eligible.
    pub async fn batch_tag_images(
        &self,
        images: &[ImageRef],
        settings: &Settings,
        on_progress: Option<&ProgressFn>,
    ) -> Result<Vec<TagBatchEntry>, ServiceError> {
        self.execute_with_fallback_filtered(
            settings,
            Capability::Tagging,
            |p| p.supports_batch_tagging(settings),
            |p| Box::pin(async move { p.batch_tag_images(images, settings).await }),
            on_progress,
        )
        .await
    }

    pub async fn detect_subject(
        &self,
        image: &ImageRef,
        settings: &Settings,
    ) -> Result<SubjectPoint, ServiceError> {
        self.execute_with_fallback(
            settings,
            Capability::Vision,
            |p| Box::pin(async move { p.detect_subject(image, settings).await }),
            None,
        )
        .await
    }

    pub async fn generate_image_from_prompt(
        &self,
        prompt: &str,
        aspect_ratio: AspectRatio,
        source_image: Option<&ImageRef>,
        settings: &Settings,
        on_progress: Option<&ProgressFn>,
    ) -> Result<GenerationResult, ServiceError> {
        self.execute_with_fallback(
            settings,
            Capability::Generation,
            |p| {
                let prompt = adapt_prompt(prompt, p.max_prompt_len());
                Box::pin(async move {
                    p.generate_image(&prompt, aspect_ratio, source_image, settings)
                        .await
                })
            },
            on_progress,
        )
        .await
    }

    pub async fn animate_image(
        &self,
        image: Option<&ImageRef>,
        prompt: &str,
        aspect_ratio: AspectRatio,
        settings: &Settings,
    ) -> Result<AnimationResult, ServiceError> {
        self.execute_with_fallback(
            settings,
            Capability::Animation,
            |p| {
                let prompt = adapt_prompt(prompt, p.max_prompt_len());
                Box::pin(async move {
                    p.animate_image(image, &prompt, aspect_ratio, settings).await
                })
            },
            None,
        )
        .await
    }

    pub async fn edit_image(
        &self,
        image: &ImageRef,
        prompt: &str,
        strength: Option<f32>,
        settings: &Settings,
    ) -> Result<GenerationResult, ServiceError> {
        self.execute_with_fallback(
            settings,
            Capability::Editing,
            |p| {
                let prompt = adapt_prompt(prompt, p.max_prompt_len());
                Box::pin(async move { p.edit_image(image, &prompt, strength, settings).await })
            },
            None,
        )
        .await
    }

    pub async fn generate_keywords_for_prompt(
        &self,
        prompt: &str,
        settings: &Settings,
    ) -> Result<Vec<String>, ServiceError> {
        self.execute_with_fallback(
            settings,
            Capability::TextGeneration,
            |p| Box::pin(async move { p.generate_keywords(prompt, settings).await }),
            None,
        )
        .await
    }

    pub async fn enhance_prompt_with_keywords(
        &self,
        prompt: &str,
        keywords: &[String],
        settings: &Settings,
    ) -> Result<String, ServiceError> {
        self.execute_with_fallback(
            settings,
            Capability::TextGeneration,
            |p| Box::pin(async move { p.enhance_prompt(prompt, keywords, settings).await }),
            None,
        )
        .await
    }

    pub async fn adapt_prompt_to_theme(
        &self,
        prompt: &str,
        theme: &str,
        settings: &Settings,
    ) -> Result<String, ServiceError> {
        self.execute_with_fallback(
            settings,
            Capability::TextGeneration,
            |p| Box::pin(async move { p.adapt_prompt_to_theme(prompt, theme, settings).await }),
            None,
        )
        .await
    }
}

/// Request adapter: providers with a hard prompt-length limit get a truncated
/// prompt instead of a guaranteed rejection.
fn adapt_prompt(prompt: &str, limit: Option<usize>) -> String {
    match limit {
        Some(limit) if prompt.len() > limit => {
            let mut end = limit;
            while end > 0 && !prompt.is_char_boundary(end) {
                end -= 1;
            }
            tracing::warn!(
                limit,
                original_len = prompt.len(),
                "prompt exceeds provider limit, truncating"
            );
            prompt[..end].to_string()
        }
        _ => prompt.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilitySet;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted provider: fails `fail_first` times, then succeeds.
    struct Scripted {
        id: ProviderId,
        caps: CapabilitySet,
        configured: bool,
        fail: bool,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn ok(id: ProviderId) -> Self {
            Self {
                id,
                caps: CapabilitySet::empty().with(Capability::Generation),
                configured: true,
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing(id: ProviderId) -> Self {
            Self {
                fail: true,
                ..Self::ok(id)
            }
        }

        fn unconfigured(id: ProviderId) -> Self {
            Self {
                configured: false,
                ..Self::ok(id)
            }
        }
    }

    #[async_trait]
    impl Provider for Scripted {
        fn id(&self) -> ProviderId {
            self.id
        }
        fn display_name(&self) -> &'static str {
            "scripted"
        }
        fn capabilities(&self) -> CapabilitySet {
            self.caps
        }
        fn is_configured(&self, _settings: &Settings) -> bool {
            self.configured
        }
        async fn generate_image(
            &self,
            prompt: &str,
            _aspect_ratio: AspectRatio,
            _source_image: Option<&ImageRef>,
            _settings: &Settings,
        ) -> Result<GenerationResult, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ProviderError::backend("boom"))
            } else {
                Ok(GenerationResult {
                    image: format!("image-from-{}:{prompt}", self.id),
                    stats: None,
                })
            }
        }
    }

    fn service(providers: Vec<Arc<dyn Provider>>) -> AiService {
        let mut registry = ProviderRegistry::new();
        for p in providers {
            registry.register(p);
        }
        AiService::new(Arc::new(registry))
    }

    fn settings_with_route(route: Vec<ProviderId>) -> Settings {
        let mut settings = Settings::default();
        settings.routing.set(Capability::Generation, route);
        settings
    }

    #[tokio::test]
    async fn empty_route_fails_immediately() {
        let svc = service(vec![Arc::new(Scripted::ok(ProviderId::Gemini))]);
        let settings = Settings::default();
        let err = svc
            .generate_image_from_prompt("p", AspectRatio::Square, None, &settings, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NoProvidersRouted(Capability::Generation)));
    }

    #[tokio::test]
    async fn first_success_wins_and_records_prior_failures() {
        let a = Arc::new(Scripted::failing(ProviderId::Gemini));
        let b = Arc::new(Scripted::failing(ProviderId::Grok));
        let c = Arc::new(Scripted::ok(ProviderId::Comfyui));
        let svc = service(vec![a.clone(), b.clone(), c.clone()]);
        let settings = settings_with_route(vec![
            ProviderId::Gemini,
            ProviderId::Grok,
            ProviderId::Comfyui,
        ]);

        let updates: Arc<Mutex<Vec<ProgressUpdate>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = updates.clone();
        let progress = move |u: ProgressUpdate| sink.lock().unwrap().push(u);

        let result = svc
            .generate_image_from_prompt("p", AspectRatio::Square, None, &settings, Some(&progress))
            .await
            .unwrap();
        assert!(result.image.starts_with("image-from-comfyui"));
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
        assert_eq!(c.calls.load(Ordering::SeqCst), 1);

        // attempting x3, failed x2
        let updates = updates.lock().unwrap();
        let failed: Vec<_> = updates
            .iter()
            .filter(|u| u.status == AttemptStatus::FailedAttempt)
            .map(|u| u.provider)
            .collect();
        assert_eq!(failed, vec![ProviderId::Gemini, ProviderId::Grok]);
    }

    #[tokio::test]
    async fn exhausted_chain_reports_all_attempts() {
        let svc = service(vec![
            Arc::new(Scripted::failing(ProviderId::Gemini)),
            Arc::new(Scripted::failing(ProviderId::Grok)),
        ]);
        let settings = settings_with_route(vec![ProviderId::Gemini, ProviderId::Grok]);
        let err = svc
            .generate_image_from_prompt("p", AspectRatio::Square, None, &settings, None)
            .await
            .unwrap_err();
        match err {
            ServiceError::FallbackChain(chain) => {
                assert_eq!(chain.attempts.len(), 2);
                assert_eq!(chain.attempts[0].provider, ProviderId::Gemini);
                assert_eq!(chain.attempts[1].provider, ProviderId::Grok);
                assert!(chain.message.contains("grok"));
            }
            other => panic!("expected FallbackChain, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unconfigured_providers_are_skipped_not_attempted() {
        let skipped = Arc::new(Scripted::unconfigured(ProviderId::Gemini));
        let ok = Arc::new(Scripted::ok(ProviderId::Grok));
        let svc = service(vec![skipped.clone(), ok.clone()]);
        let settings = settings_with_route(vec![ProviderId::Gemini, ProviderId::Grok]);
        svc.generate_image_from_prompt("p", AspectRatio::Square, None, &settings, None)
            .await
            .unwrap();
        assert_eq!(skipped.calls.load(Ordering::SeqCst), 0);
        assert_eq!(ok.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_eligible_provider_is_not_configured_error() {
        let svc = service(vec![Arc::new(Scripted::unconfigured(ProviderId::Gemini))]);
        let settings = settings_with_route(vec![ProviderId::Gemini]);
        let err = svc
            .generate_image_from_prompt("p", AspectRatio::Square, None, &settings, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotConfigured(Capability::Generation)));
    }

    #[test]
    fn adapt_prompt_truncates_over_limit() {
        let long = "x".repeat(1000);
        assert_eq!(adapt_prompt(&long, Some(900)).len(), 900);
        assert_eq!(adapt_prompt(&long, None).len(), 1000);
        assert_eq!(adapt_prompt("short", Some(900)), "short");
    }

    #[test]
    fn adapt_prompt_respects_char_boundaries() {
        // 'é' is two bytes; a limit landing mid-char must back off.
        let s = "ééééé";
        let adapted = adapt_prompt(s, Some(5));
        assert!(adapted.len() <= 5);
        assert!(s.starts_with(&adapted));
    }
}
