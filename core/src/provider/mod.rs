//! Provider abstraction: one implementation per backend, declaring an
//! explicit capability set. Callers branch on the declared set; unimplemented
//! operations fail with a structured `Unsupported` error instead of relying
//! on optional methods.

pub mod registry;
pub mod types;

pub use registry::ProviderRegistry;

use async_trait::async_trait;

use crate::capability::{Capability, CapabilitySet, ProviderId};
use crate::config::Settings;
use crate::error::ProviderError;

use types::{
    AnalysisResult, AnimationResult, AspectRatio, GenerationResult, ImageRef, SubjectPoint,
    TagBatchEntry,
};

/// A backend implementation of one or more capabilities.
///
/// Providers are constructed once at process start, registered, and never
/// mutated afterwards. Configuration arrives per call through [`Settings`] so
/// a settings reload does not require re-registration.
#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> ProviderId;

    fn display_name(&self) -> &'static str;

    fn capabilities(&self) -> CapabilitySet;

    /// Whether the provider has the credentials/endpoint it needs. Providers
    /// failing this check are skipped by the fallback chain, not retried.
    fn is_configured(&self, settings: &Settings) -> bool;

    /// Capability-specific configuration check. Defaults to the base check;
    /// providers override it when a capability needs extra settings (e.g. a
    /// dedicated generation model id).
    fn is_configured_for(&self, _capability: Capability, settings: &Settings) -> bool {
        self.is_configured(settings)
    }

    /// Hard prompt-length limit, if the backend enforces one. The fallback
    /// executor truncates generation prompts beyond this before invoking the
    /// provider.
    fn max_prompt_len(&self) -> Option<usize> {
        None
    }

    /// Whether `batch_tag_images` can be used under the current settings.
    fn supports_batch_tagging(&self, _settings: &Settings) -> bool {
        false
    }

    /// Probe reachability without performing real work.
    async fn test_connection(&self, _settings: &Settings) -> Result<(), ProviderError> {
        Err(self.unsupported("test_connection"))
    }

    async fn analyze_image(
        &self,
        _image: &ImageRef,
        _settings: &Settings,
    ) -> Result<AnalysisResult, ProviderError> {
        Err(self.unsupported("analyze_image"))
    }

    async fn caption_image(
        &self,
        _image: &ImageRef,
        _settings: &Settings,
    ) -> Result<String, ProviderError> {
        Err(self.unsupported("caption_image"))
    }

    async fn tag_image(
        &self,
        _image: &ImageRef,
        _settings: &Settings,
    ) -> Result<Vec<String>, ProviderError> {
        Err(self.unsupported("tag_image"))
    }

    async fn batch_tag_images(
        &self,
        _images: &[ImageRef],
        _settings: &Settings,
    ) -> Result<Vec<TagBatchEntry>, ProviderError> {
        Err(self.unsupported("batch_tag_images"))
    }

    async fn detect_subject(
        &self,
        _image: &ImageRef,
        _settings: &Settings,
    ) -> Result<SubjectPoint, ProviderError> {
        Err(self.unsupported("detect_subject"))
    }

    async fn generate_image(
        &self,
        _prompt: &str,
        _aspect_ratio: AspectRatio,
        _source_image: Option<&ImageRef>,
        _settings: &Settings,
    ) -> Result<GenerationResult, ProviderError> {
        Err(self.unsupported("generate_image"))
    }

    async fn animate_image(
        &self,
        _image: Option<&ImageRef>,
        _prompt: &str,
        _aspect_ratio: AspectRatio,
        _settings: &Settings,
    ) -> Result<AnimationResult, ProviderError> {
        Err(self.unsupported("animate_image"))
    }

    async fn edit_image(
        &self,
        _image: &ImageRef,
        _prompt: &str,
        _strength: Option<f32>,
        _settings: &Settings,
    ) -> Result<GenerationResult, ProviderError> {
        Err(self.unsupported("edit_image"))
    }

    async fn generate_keywords(
        &self,
        _prompt: &str,
        _settings: &Settings,
    ) -> Result<Vec<String>, ProviderError> {
        Err(self.unsupported("generate_keywords"))
    }

    async fn enhance_prompt(
        &self,
        _prompt: &str,
        _keywords: &[String],
        _settings: &Settings,
    ) -> Result<String, ProviderError> {
        Err(self.unsupported("enhance_prompt"))
    }

    async fn adapt_prompt_to_theme(
        &self,
        _prompt: &str,
        _theme: &str,
        _settings: &Settings,
    ) -> Result<String, ProviderError> {
        Err(self.unsupported("adapt_prompt_to_theme"))
    }
}

/// Helper available to default trait methods.
trait UnsupportedExt {
    fn unsupported(&self, operation: &'static str) -> ProviderError;
}

impl<P: Provider + ?Sized> UnsupportedExt for P {
    fn unsupported(&self, operation: &'static str) -> ProviderError {
        ProviderError::Unsupported {
            provider: self.id(),
            operation,
        }
    }
}
