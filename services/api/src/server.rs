use crate::cli::ServeArgs;
use crate::infra::{build_store, AppState};
use crate::routes::with_operational_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use dossier_flow::config::AppConfig;
use dossier_flow::error::AppError;
use dossier_flow::http::{AppServices, Gateways};
use dossier_flow::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry, config.environment)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = build_store(&config.database)?;
    warn!("mail delivery and file storage run in-process; outgoing mail is kept in an outbox");
    let services = Arc::new(AppServices::new(store, Gateways::in_process(), &config));

    let app = with_operational_routes(services)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "dossier back office ready");

    axum::serve(listener, app).await?;
    Ok(())
}
