use crate::config::ServerConfig;
use chrono::{DateTime, Utc};
use runwatch_alert::{AlertSchedulerClient, DefinitionService};
use runwatch_storage::{AlertStore, DefinitionCache};
use std::path::Path;
use std::sync::Arc;

/// The alert lifecycle services, wired once at process start and shared by
/// reference with the HTTP layer, the poller and the cleanup task.
#[derive(Clone)]
pub struct AlertCore {
    pub store: Arc<AlertStore>,
    pub cache: Arc<DefinitionCache>,
    pub definitions: Arc<DefinitionService>,
    pub client: Arc<AlertSchedulerClient>,
}

impl AlertCore {
    pub fn new(store: Arc<AlertStore>) -> Self {
        let cache = Arc::new(DefinitionCache::new(store.clone()));
        let definitions = Arc::new(DefinitionService::new(store.clone(), cache.clone()));
        let client = Arc::new(AlertSchedulerClient::new(store.clone(), cache.clone()));
        Self {
            store,
            cache,
            definitions,
            client,
        }
    }

    pub fn open(config: &ServerConfig) -> anyhow::Result<Self> {
        let store = AlertStore::open(Path::new(&config.data_dir), &config.database_file)?;
        Ok(Self::new(Arc::new(store)))
    }
}

#[derive(Clone)]
pub struct AppState {
    pub core: AlertCore,
    pub start_time: DateTime<Utc>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(core: AlertCore, config: ServerConfig) -> Self {
        Self {
            core,
            start_time: Utc::now(),
            config: Arc::new(config),
        }
    }
}
