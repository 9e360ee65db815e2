//! Assembly of the engine from configuration: registry, service, scheduler,
//! calibrator, and the CLI collaborator hooks.

use std::path::PathBuf;
use std::sync::Arc;

use lumen_core::api::{
    AiService, Calibrator, EngineHooks, ResilienceLog, Scheduler, Settings,
};

use crate::output::{FileStore, ProgressNotifier};

pub struct Engine {
    pub settings: Arc<Settings>,
    pub service: Arc<AiService>,
    pub scheduler: Scheduler,
    pub calibrator: Arc<Calibrator>,
    pub resilience: Arc<ResilienceLog>,
    pub store: Arc<FileStore>,
}

pub fn build(settings: Settings, out_dir: PathBuf) -> Engine {
    let registry = Arc::new(lumen_plugins::factory::build_registry());
    let service = Arc::new(AiService::new(registry));
    let resilience = Arc::new(ResilienceLog::new(settings.resilience.log_cap));
    let store = Arc::new(FileStore::new(out_dir));
    let notifier = Arc::new(ProgressNotifier::new(atty::is(atty::Stream::Stderr)));

    let hooks = EngineHooks {
        notifications: notifier,
        store: store.clone(),
        preprocess: None,
    };

    let settings = Arc::new(settings);
    let scheduler = Scheduler::new(
        service.clone(),
        settings.clone(),
        resilience.clone(),
        hooks,
    );
    let calibrator = Arc::new(Calibrator::new(resilience.clone()));

    Engine {
        settings,
        service,
        scheduler,
        calibrator,
        resilience,
        store,
    }
}
