use crate::cli::ServeArgs;
use crate::infra::{build_admins, build_engine, AppState};
use crate::routes::router;
use axum_prometheus::PrometheusMetricLayer;
use chrono::Utc;
use donation_swap::config::AppConfig;
use donation_swap::error::AppError;
use donation_swap::swap::{CommandRegistry, TracingMailer};
use donation_swap::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let engine = Arc::new(build_engine(&config.swap, Arc::new(TracingMailer), false));
    let admins = Arc::new(build_admins(&config.swap));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
        engine: engine.clone(),
        admins,
        engine_commands: Arc::new(CommandRegistry::engine()),
        admin_commands: Arc::new(CommandRegistry::admin()),
    };

    let sweep_config = config.swap.sweep_config();
    let sweeper = engine.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60 * 60));
        // First tick fires immediately; skip it so startup stays quiet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match sweeper.run_sweep(&sweep_config, Utc::now()) {
                Ok(report) => info!(?report, "scheduled sweep complete"),
                Err(err) => error!(error = %err, "scheduled sweep failed"),
            }
        }
    });

    let app = router(app_state).layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "donation swap engine ready");

    axum::serve(listener, app).await?;
    Ok(())
}
