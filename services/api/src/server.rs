use crate::cli::ServeArgs;
use crate::infra::{load_directory, spawn_event_log, AppState};
use crate::routes::with_authorization_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use chapter_tickets::config::AppConfig;
use chapter_tickets::error::AppError;
use chapter_tickets::telemetry;
use chapter_tickets::workflows::authorization::{
    BroadcastNotifier, InMemoryDirectory, InMemoryRequestStore, JsonFileRequestStore,
    RequestStore, SubmissionCoordinator, WindowEvaluator,
};
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

    let (directory, imported) = load_directory(&config.roster)?;
    info!(
        matches = imported.matches,
        members = imported.members,
        "directory loaded"
    );

    match config.storage.requests_path.clone() {
        Some(path) => {
            let store = Arc::new(JsonFileRequestStore::open(path)?);
            serve(config, store, directory).await
        }
        None => {
            warn!("REQUESTS_PATH not set; requests are kept in memory and lost on restart");
            serve(config, Arc::new(InMemoryRequestStore::new()), directory).await
        }
    }
}

async fn serve<S>(
    config: AppConfig,
    store: Arc<S>,
    directory: InMemoryDirectory,
) -> Result<(), AppError>
where
    S: RequestStore + 'static,
{
    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let notifier = Arc::new(BroadcastNotifier::default());
    let _event_log = spawn_event_log(&notifier);

    let directory = Arc::new(directory);
    let coordinator = Arc::new(
        SubmissionCoordinator::new(
            store,
            notifier,
            directory.clone(),
            directory,
            WindowEvaluator::new(config.authorization.schedule_offset),
        )
        .with_commit_timeout(config.authorization.commit_timeout),
    );

    let app = with_authorization_routes(coordinator)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        offset = %config.authorization.schedule_offset,
        "chapter ticket authorization service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
