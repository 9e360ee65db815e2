//! Per-task-type executors. Each runs inside one dispatch slot, calls the
//! fallback service, pushes results/failures to the collaborator hooks, and
//! leaves counter/membership bookkeeping to the scheduler's completion path.

use std::sync::Arc;

use chrono::Utc;

use crate::error::ServiceError;
use crate::hooks::{Notification, NotificationStatus};
use crate::provider::types::{ImageRef, ProviderStats, StatsSample};
use crate::resilience::ResilienceKind;

use super::scheduler::SchedulerInner;
use super::types::{TaskPayload, WorkItem};

impl SchedulerInner {
    pub(crate) async fn execute_dispatch(self: &Arc<Self>, batch: Vec<WorkItem>) {
        if batch.len() > 1 {
            self.run_batch_analysis(batch).await;
            return;
        }
        let Some(item) = batch.into_iter().next() else {
            return;
        };
        match item.payload {
            TaskPayload::Analysis { .. } => self.run_analysis(item).await,
            TaskPayload::Generate { .. }
            | TaskPayload::Enhance { .. }
            | TaskPayload::Animate { .. } => self.run_generation(item).await,
            TaskPayload::SmartCrop { .. } => self.run_smart_crop(item).await,
        }
    }

    fn notify(&self, id: &str, status: NotificationStatus, message: impl Into<String>) {
        self.hooks.notifications.notify(Notification {
            id: id.to_string(),
            status,
            message: message.into(),
        });
    }

    fn record_stats(&self, stats: Option<&ProviderStats>) {
        if let Some(stats) = stats {
            self.stats.lock().expect("stats lock").push(StatsSample {
                timestamp: Utc::now(),
                tokens_per_sec: stats.tokens_per_sec,
                device: stats.device.clone(),
            });
        }
    }

    /// Localize a chain failure to this item; optionally pause the queue if
    /// the backend looks unreachable.
    fn fail_item(&self, item_id: &str, file_name: &str, err: &ServiceError) {
        let message = err.user_message();
        self.resilience
            .record(item_id, None, ResilienceKind::Failure, message.clone());
        self.hooks.store.mark_failed(item_id, &message);
        self.notify(
            item_id,
            NotificationStatus::Error,
            format!("Failed: {file_name}: {message}"),
        );

        if self.settings.resilience.pause_on_local_failure {
            if let ServiceError::FallbackChain(chain) = err {
                if chain.all_transport {
                    self.resilience.record_with_metrics(
                        item_id,
                        None,
                        ResilienceKind::Throttle,
                        "Backend Offline",
                        &[("Action", "Pausing".to_string())],
                    );
                    self.lock_state().paused = true;
                }
            }
        }
    }

    fn prepare_image(&self, image: &ImageRef) -> ImageRef {
        if !self.settings.performance.downscale_images {
            return image.clone();
        }
        match &self.hooks.preprocess {
            Some(prep) => {
                prep.as_ref()(image, self.settings.performance.max_analysis_dimension)
            }
            None => image.clone(),
        }
    }

    async fn run_analysis(self: &Arc<Self>, item: WorkItem) {
        let TaskPayload::Analysis { image } = &item.payload else {
            return;
        };
        self.lock_state().current_analysis_file = item.file_name.clone();
        self.notify(
            &item.id,
            NotificationStatus::Processing,
            format!("Analyzing {}...", item.file_name),
        );

        let prepared = self.prepare_image(image);
        match self
            .service
            .analyze_image(&prepared, &self.settings, None)
            .await
        {
            Ok(result) => {
                self.record_stats(result.stats.as_ref());
                self.hooks.store.save_analysis(&image.id, &result);
                self.notify(
                    &item.id,
                    NotificationStatus::Success,
                    format!("Analyzed {}.", item.file_name),
                );
            }
            Err(err) => self.fail_item(&item.id, &item.file_name, &err),
        }
    }

    /// One fallback call covering the whole batch; all-or-nothing. If no
    /// routed provider supports batched tagging, each image is analyzed
    /// sequentially inside this slot, but a single failure still fails the
    /// entire batch and nothing is persisted as partially succeeded.
    async fn run_batch_analysis(self: &Arc<Self>, items: Vec<WorkItem>) {
        let images: Vec<ImageRef> = items
            .iter()
            .filter_map(|item| match &item.payload {
                TaskPayload::Analysis { image } => Some(self.prepare_image(image)),
                _ => None,
            })
            .collect();
        if let Some(first) = items.first() {
            self.lock_state().current_analysis_file = first.file_name.clone();
        }
        self.notify(
            &items[0].id,
            NotificationStatus::Processing,
            format!("Analyzing batch of {}...", images.len()),
        );

        let outcome = self.run_batch_call(&images).await;

        match outcome {
            Ok(results) => {
                for (image_id, result) in &results {
                    self.hooks.store.save_analysis(image_id, result);
                }
                self.notify(
                    &items[0].id,
                    NotificationStatus::Success,
                    format!("Analyzed batch of {}.", results.len()),
                );
            }
            Err(err) => {
                // The entire batch is failed; no member keeps a partial result.
                self.resilience.record_with_metrics(
                    items[0].id.clone(),
                    None,
                    ResilienceKind::Failure,
                    "Batch Failed",
                    &[
                        ("Size", items.len().to_string()),
                        ("Error", err.user_message()),
                    ],
                );
                for item in &items {
                    self.hooks.store.mark_failed(&item.id, &err.user_message());
                    self.notify(
                        &item.id,
                        NotificationStatus::Error,
                        format!("Failed: {}: {}", item.file_name, err.user_message()),
                    );
                }
            }
        }
    }

    async fn run_batch_call(
        &self,
        images: &[ImageRef],
    ) -> Result<Vec<(String, crate::provider::types::AnalysisResult)>, ServiceError> {
        use crate::provider::types::AnalysisResult;

        match self.service.batch_tag_images(images, &self.settings, None).await {
            Ok(entries) => Ok(entries
                .into_iter()
                .map(|entry| {
                    (
                        entry.image_id,
                        AnalysisResult {
                            recreation_prompt: String::new(),
                            keywords: entry.tags,
                            stats: None,
                        },
                    )
                })
                .collect()),
            // No batch-capable provider routed: degrade to per-item calls
            // within this dispatch slot, keeping the all-or-nothing contract.
            Err(ServiceError::NotConfigured(_)) | Err(ServiceError::NoProvidersRouted(_)) => {
                let mut results = Vec::with_capacity(images.len());
                for image in images {
                    let result = self.service.analyze_image(image, &self.settings, None).await?;
                    results.push((image.id.clone(), result));
                }
                Ok(results)
            }
            Err(err) => Err(err),
        }
    }

    async fn run_generation(self: &Arc<Self>, item: WorkItem) {
        self.notify(
            &item.id,
            NotificationStatus::Processing,
            format!("Generating: {}...", item.file_name),
        );

        let result: Result<(), ServiceError> = match &item.payload {
            TaskPayload::Generate {
                prompt,
                aspect_ratio,
                source_image,
            } => self
                .service
                .generate_image_from_prompt(
                    prompt,
                    *aspect_ratio,
                    source_image.as_ref(),
                    &self.settings,
                    None,
                )
                .await
                .map(|generated| {
                    self.record_stats(generated.stats.as_ref());
                    self.hooks.store.save_generation(&item.id, &generated);
                }),
            TaskPayload::Enhance {
                image,
                prompt,
                strength,
            } => self
                .service
                .edit_image(image, prompt, *strength, &self.settings)
                .await
                .map(|edited| {
                    self.record_stats(edited.stats.as_ref());
                    self.hooks.store.save_generation(&item.id, &edited);
                }),
            TaskPayload::Animate {
                image,
                prompt,
                aspect_ratio,
            } => self
                .service
                .animate_image(image.as_ref(), prompt, *aspect_ratio, &self.settings)
                .await
                .map(|animated| {
                    self.hooks.store.save_animation(&item.id, &animated);
                }),
            _ => return,
        };

        match result {
            Ok(()) => self.notify(
                &item.id,
                NotificationStatus::Success,
                format!("Generated: {}", item.file_name),
            ),
            Err(err) => self.fail_item(&item.id, &item.file_name, &err),
        }
    }

    async fn run_smart_crop(self: &Arc<Self>, item: WorkItem) {
        let TaskPayload::SmartCrop { image } = &item.payload else {
            return;
        };
        match self.service.detect_subject(image, &self.settings).await {
            Ok(point) => self.hooks.store.save_crop(&image.id, point),
            Err(err) => self.fail_item(&item.id, &item.file_name, &err),
        }
    }
}
