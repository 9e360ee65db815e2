//! CLI-side collaborator implementations: live progress display for the
//! notification sink, and sidecar-file persistence for the subject store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use lumen_core::api::{
    AnalysisResult, AnimationResult, GenerationResult, Notification, NotificationSink,
    NotificationStatus, SubjectPoint, SubjectStore,
};

/// Renders engine notifications as per-item spinners.
pub struct ProgressNotifier {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
    enabled: bool,
}

impl ProgressNotifier {
    pub fn new(enabled: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
            enabled,
        }
    }

    fn spinner(&self, id: &str, message: String) {
        let bar = self.multi.add(ProgressBar::new_spinner());
        if let Ok(style) = ProgressStyle::default_spinner().template("  {spinner:.green} {msg}") {
            bar.set_style(style);
        }
        bar.set_message(message);
        bar.enable_steady_tick(Duration::from_millis(100));
        if let Some(old) = self
            .bars
            .lock()
            .expect("progress bars lock")
            .insert(id.to_string(), bar)
        {
            old.finish_and_clear();
        }
    }

    fn finish(&self, id: &str, message: String) {
        if let Some(bar) = self.bars.lock().expect("progress bars lock").remove(id) {
            bar.finish_with_message(message);
        } else {
            let _ = self.multi.println(message);
        }
    }
}

impl NotificationSink for ProgressNotifier {
    fn notify(&self, notification: Notification) {
        if !self.enabled {
            match notification.status {
                NotificationStatus::Error => tracing::error!("{}", notification.message),
                NotificationStatus::Warning => tracing::warn!("{}", notification.message),
                _ => tracing::info!("{}", notification.message),
            }
            return;
        }
        match notification.status {
            NotificationStatus::Processing => {
                self.spinner(&notification.id, notification.message)
            }
            NotificationStatus::Success => {
                self.finish(&notification.id, format!("✅ {}", notification.message))
            }
            NotificationStatus::Error => {
                self.finish(&notification.id, format!("❌ {}", notification.message))
            }
            NotificationStatus::Warning | NotificationStatus::Info => {
                let _ = self.multi.println(notification.message);
            }
        }
    }
}

/// Persists derived subject data as files: sidecar JSON next to analyzed
/// images, generated media under an output directory, and `.error` markers
/// for the failure flag.
pub struct FileStore {
    out_dir: PathBuf,
    paths: Mutex<HashMap<String, PathBuf>>,
    failures: Mutex<Vec<String>>,
}

impl FileStore {
    pub fn new(out_dir: PathBuf) -> Self {
        Self {
            out_dir,
            paths: Mutex::new(HashMap::new()),
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Associate a subject id with its source file so sidecars land next to
    /// the original.
    pub fn register(&self, id: &str, path: &Path) {
        self.paths
            .lock()
            .expect("store paths lock")
            .insert(id.to_string(), path.to_path_buf());
    }

    pub fn failure_count(&self) -> usize {
        self.failures.lock().expect("store failures lock").len()
    }

    fn target_for(&self, id: &str, extension: &str) -> PathBuf {
        let paths = self.paths.lock().expect("store paths lock");
        match paths.get(id) {
            Some(path) => path.with_extension(extension),
            None => self.out_dir.join(format!("{id}.{extension}")),
        }
    }

    fn write(&self, path: &Path, bytes: &[u8]) {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(path, bytes) {
            tracing::warn!(path = %path.display(), error = %e, "failed to write result");
        }
    }
}

impl SubjectStore for FileStore {
    fn save_analysis(&self, image_id: &str, result: &AnalysisResult) {
        let path = self.target_for(image_id, "lumen.json");
        match serde_json::to_vec_pretty(result) {
            Ok(bytes) => self.write(&path, &bytes),
            Err(e) => tracing::warn!(error = %e, "failed to serialize analysis"),
        }
        self.clear_failure(image_id);
    }

    fn save_generation(&self, item_id: &str, result: &GenerationResult) {
        use base64::Engine as _;
        let decoded = base64::engine::general_purpose::STANDARD.decode(&result.image);
        match decoded {
            Ok(bytes) => self.write(&self.out_dir.join(format!("{item_id}.png")), &bytes),
            // Not base64: the provider handed back a URL.
            Err(_) => self.write(
                &self.out_dir.join(format!("{item_id}.url")),
                result.image.as_bytes(),
            ),
        }
        self.clear_failure(item_id);
    }

    fn save_animation(&self, item_id: &str, result: &AnimationResult) {
        self.write(
            &self.out_dir.join(format!("{item_id}.video.url")),
            result.uri.as_bytes(),
        );
        self.clear_failure(item_id);
    }

    fn save_crop(&self, image_id: &str, point: SubjectPoint) {
        let path = self.target_for(image_id, "crop.json");
        match serde_json::to_vec_pretty(&point) {
            Ok(bytes) => self.write(&path, &bytes),
            Err(e) => tracing::warn!(error = %e, "failed to serialize crop"),
        }
    }

    fn mark_failed(&self, subject_id: &str, error: &str) {
        self.failures
            .lock()
            .expect("store failures lock")
            .push(subject_id.to_string());
        let path = self.target_for(subject_id, "error");
        self.write(&path, error.as_bytes());
    }

    fn clear_failure(&self, subject_id: &str) {
        self.failures
            .lock()
            .expect("store failures lock")
            .retain(|id| id != subject_id);
        let path = self.target_for(subject_id, "error");
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_sidecar_lands_next_to_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("photo.png");
        std::fs::write(&source, b"fake").unwrap();

        let store = FileStore::new(dir.path().join("out"));
        store.register("img-1", &source);
        store.save_analysis(
            "img-1",
            &AnalysisResult {
                recreation_prompt: "a photo".into(),
                keywords: vec!["tag".into()],
                stats: None,
            },
        );

        assert!(dir.path().join("photo.lumen.json").exists());
    }

    #[test]
    fn failure_flag_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        store.mark_failed("x", "boom");
        assert_eq!(store.failure_count(), 1);
        assert!(dir.path().join("x.error").exists());

        store.clear_failure("x");
        assert_eq!(store.failure_count(), 0);
        assert!(!dir.path().join("x.error").exists());
    }
}
