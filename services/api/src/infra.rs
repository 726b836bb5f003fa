use dossier_flow::config::DatabaseConfig;
use dossier_flow::error::AppError;
use dossier_flow::repository::{MemoryStore, SqliteStore, Store};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// SQLite when `DATABASE_PATH` is set, otherwise a store that forgets everything on exit.
pub(crate) fn build_store(config: &DatabaseConfig) -> Result<Arc<dyn Store>, AppError> {
    match &config.path {
        Some(path) => {
            let store = SqliteStore::open(path)?;
            let schema = store.schema_version()?;
            info!(path = %path.display(), schema, "using sqlite store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_PATH is not set; data is kept in memory only");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
