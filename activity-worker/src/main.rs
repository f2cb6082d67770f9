//! Poll tracked RuneMetrics profiles and post new activity notifications.
use std::sync::Arc;

use axum::{routing::get, Router};
use envconfig::Envconfig;
use eyre::{Result, WrapErr};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use activity_common::metrics::{serve, setup_metrics_routes};
use activity_common::state::StateStore;
use activity_worker::config::Config;
use activity_worker::notifier::{LogSink, Notifier, Sink, WebhookSink};
use activity_worker::pipeline::Pipeline;
use activity_worker::poller::RuneMetricsClient;
use health::HealthRegistry;

async fn listen(app: Router, bind: String) -> Result<()> {
    serve(app, &bind).await?;

    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
    let mut term = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    let mut interrupt = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    info!("shutting down gracefully, waiting for the current cycle to finish");
    token.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::init_from_env().wrap_err("invalid configuration")?;

    let store = StateStore::new(&config.state_path);
    let state = config.bootstrap_state(&store).await?;
    info!(
        players = state.tracked_entities().len(),
        seen = state.seen.len(),
        has_target = state.notification_target().is_some(),
        "loaded pipeline state"
    );

    let source = RuneMetricsClient::new(
        &config.profile_url,
        config.request_timeout.0,
        config.profile_activities,
    )?;
    let sink: Arc<dyn Sink> = if config.dry_run {
        Arc::new(LogSink)
    } else {
        Arc::new(WebhookSink::new(config.dispatch_timeout.0)?)
    };
    let notifier = Notifier::new(sink, config.dispatch_timeout.0);

    let liveness = HealthRegistry::new("liveness");
    let deadline = config
        .liveness_deadline()
        .ok_or_else(|| eyre::eyre!("check interval is too large"))?;
    let pipeline_liveness = liveness.register("pipeline".to_string(), deadline).await;

    let pipeline = Pipeline::new(
        state,
        store,
        Arc::new(source),
        notifier,
        config.pipeline_settings(),
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let app = setup_metrics_routes(
        Router::new()
            .route("/", get(|| async { "activity worker" }))
            .route("/_readiness", get(|| async { "ok" }))
            .route("/_liveness", get(move || std::future::ready(liveness.get_status()))),
    );
    let server = tokio::spawn(listen(app, config.bind()));

    let worker = tokio::spawn(pipeline.run(
        config.check_interval.0,
        pipeline_liveness,
        shutdown.clone(),
    ));

    tokio::select! {
        result = server => {
            match result {
                Ok(Ok(())) => info!("http server stopped"),
                Ok(Err(e)) => error!(error = %e, "http server failed"),
                Err(e) => error!(error = %e, "http server task panicked"),
            }
            shutdown.cancel();
        }
        _ = shutdown.cancelled() => {}
    }

    worker.await.wrap_err("pipeline task panicked")?;
    info!("pipeline stopped");

    Ok(())
}
