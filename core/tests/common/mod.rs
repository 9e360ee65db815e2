//! Shared helpers for engine integration tests: a scripted provider with a
//! concurrency gauge, plus recording collaborator hooks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use lumen_core::api::{
    AiService, AnalysisResult, AnimationResult, Capability, CapabilitySet, EngineHooks,
    GenerationResult, ImageRef, Notification, NotificationSink, Provider, ProviderError,
    ProviderId, ProviderRegistry, ResilienceLog, Scheduler, Settings, SubjectPoint, SubjectStore,
    TagBatchEntry, TaskPayload, WorkItem,
};

/// Provider whose behavior is scripted per test: fixed latency, optional
/// failure set, and a high-water mark of concurrent calls.
pub struct StubProvider {
    pub latency: Duration,
    pub fail_ids: Mutex<Vec<String>>,
    pub fail_batches: bool,
    pub batch_capable: bool,
    gauge: AtomicUsize,
    max_in_flight: AtomicUsize,
    processed: Mutex<Vec<String>>,
}

impl StubProvider {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            fail_ids: Mutex::new(Vec::new()),
            fail_batches: false,
            batch_capable: false,
            gauge: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            processed: Mutex::new(Vec::new()),
        }
    }

    pub fn batch_capable(mut self, fail_batches: bool) -> Self {
        self.batch_capable = true;
        self.fail_batches = fail_batches;
        self
    }

    pub fn failing_for(self, ids: &[&str]) -> Self {
        *self.fail_ids.lock().unwrap() = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn processed(&self) -> Vec<String> {
        self.processed.lock().unwrap().clone()
    }

    async fn track<T>(
        &self,
        id: &str,
        result: Result<T, ProviderError>,
    ) -> Result<T, ProviderError> {
        let now = self.gauge.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        self.gauge.fetch_sub(1, Ordering::SeqCst);
        self.processed.lock().unwrap().push(id.to_string());
        result
    }

    fn should_fail(&self, id: &str) -> bool {
        self.fail_ids.lock().unwrap().iter().any(|f| f == id)
    }
}

#[async_trait]
impl Provider for StubProvider {
    fn id(&self) -> ProviderId {
        ProviderId::MoondreamLocal
    }

    fn display_name(&self) -> &'static str {
        "Stub Local"
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::empty()
            .with(Capability::Vision)
            .with(Capability::Generation)
            .with(Capability::Editing)
            .with(Capability::Animation)
            .with(Capability::Captioning)
            .with(Capability::Tagging)
    }

    fn is_configured(&self, _settings: &Settings) -> bool {
        true
    }

    fn supports_batch_tagging(&self, _settings: &Settings) -> bool {
        self.batch_capable
    }

    async fn analyze_image(
        &self,
        image: &ImageRef,
        _settings: &Settings,
    ) -> Result<AnalysisResult, ProviderError> {
        let result = if self.should_fail(&image.id) {
            Err(ProviderError::backend("scripted failure"))
        } else {
            Ok(AnalysisResult {
                recreation_prompt: format!("a picture of {}", image.file_name),
                keywords: vec!["stub".into()],
                stats: None,
            })
        };
        self.track(&image.id, result).await
    }

    async fn batch_tag_images(
        &self,
        images: &[ImageRef],
        _settings: &Settings,
    ) -> Result<Vec<TagBatchEntry>, ProviderError> {
        let result = if self.fail_batches {
            Err(ProviderError::Transport("connection reset".into()))
        } else {
            Ok(images
                .iter()
                .map(|image| TagBatchEntry {
                    image_id: image.id.clone(),
                    tags: vec!["batch".into()],
                })
                .collect())
        };
        self.track("batch", result).await
    }

    async fn detect_subject(
        &self,
        image: &ImageRef,
        _settings: &Settings,
    ) -> Result<SubjectPoint, ProviderError> {
        self.track(&image.id, Ok(SubjectPoint { x: 40, y: 60 })).await
    }

    async fn generate_image(
        &self,
        prompt: &str,
        _aspect_ratio: lumen_core::api::AspectRatio,
        _source_image: Option<&ImageRef>,
        _settings: &Settings,
    ) -> Result<GenerationResult, ProviderError> {
        let result = if self.should_fail(prompt) {
            Err(ProviderError::backend("scripted failure"))
        } else {
            Ok(GenerationResult {
                image: "AAAA".into(),
                stats: None,
            })
        };
        self.track(prompt, result).await
    }

    async fn animate_image(
        &self,
        _image: Option<&ImageRef>,
        prompt: &str,
        _aspect_ratio: lumen_core::api::AspectRatio,
        _settings: &Settings,
    ) -> Result<AnimationResult, ProviderError> {
        self.track(
            prompt,
            Ok(AnimationResult {
                uri: "file://video".into(),
                api_key: "k".into(),
            }),
        )
        .await
    }
}

/// Records every hook invocation for assertions.
#[derive(Default)]
pub struct Recorder {
    pub saved: Mutex<Vec<String>>,
    pub failed: Mutex<HashMap<String, String>>,
    pub cleared: Mutex<Vec<String>>,
    pub crops: Mutex<Vec<(String, SubjectPoint)>>,
    pub notifications: Mutex<Vec<Notification>>,
}

impl NotificationSink for Recorder {
    fn notify(&self, notification: Notification) {
        self.notifications.lock().unwrap().push(notification);
    }
}

impl SubjectStore for Recorder {
    fn save_analysis(&self, image_id: &str, _result: &AnalysisResult) {
        self.saved.lock().unwrap().push(image_id.to_string());
        self.failed.lock().unwrap().remove(image_id);
    }
    fn save_generation(&self, item_id: &str, _result: &GenerationResult) {
        self.saved.lock().unwrap().push(item_id.to_string());
    }
    fn save_animation(&self, item_id: &str, _result: &AnimationResult) {
        self.saved.lock().unwrap().push(item_id.to_string());
    }
    fn save_crop(&self, image_id: &str, point: SubjectPoint) {
        self.crops.lock().unwrap().push((image_id.to_string(), point));
    }
    fn mark_failed(&self, subject_id: &str, error: &str) {
        self.failed
            .lock()
            .unwrap()
            .insert(subject_id.to_string(), error.to_string());
    }
    fn clear_failure(&self, subject_id: &str) {
        self.cleared.lock().unwrap().push(subject_id.to_string());
        self.failed.lock().unwrap().remove(subject_id);
    }
}

pub struct Harness {
    pub scheduler: Scheduler,
    pub provider: Arc<StubProvider>,
    pub recorder: Arc<Recorder>,
}

pub fn image(id: &str) -> ImageRef {
    ImageRef {
        id: id.to_string(),
        file_name: format!("{id}.png"),
        data_url: "data:image/png;base64,AA==".to_string(),
    }
}

pub fn analysis_item(id: &str) -> WorkItem {
    WorkItem::new(id, format!("{id}.png"), TaskPayload::Analysis { image: image(id) })
}

pub fn harness(provider: StubProvider, mut settings: Settings) -> Harness {
    for capability in [
        Capability::Vision,
        Capability::Generation,
        Capability::Editing,
        Capability::Animation,
        Capability::Captioning,
        Capability::Tagging,
    ] {
        if !settings.routing.is_routed(capability) {
            settings
                .routing
                .set(capability, vec![ProviderId::MoondreamLocal]);
        }
    }

    let provider = Arc::new(provider);
    let mut registry = ProviderRegistry::new();
    registry.register(provider.clone());

    let recorder = Arc::new(Recorder::default());
    let hooks = EngineHooks {
        notifications: recorder.clone(),
        store: recorder.clone(),
        preprocess: None,
    };

    let scheduler = Scheduler::new(
        Arc::new(AiService::new(Arc::new(registry))),
        Arc::new(settings),
        Arc::new(ResilienceLog::default()),
        hooks,
    );

    Harness {
        scheduler,
        provider,
        recorder,
    }
}
