//! Replay spilled access events and expire old error journals.
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use envconfig::Envconfig;
use eyre::Result;
use futures::future::{select, Either};
use health::HealthRegistry;

use relay_common::kafka::ConnectionManager;
use relay_common::metrics::setup_metrics_router;
use relay_common::spillover::SpilloverStore;
use relay_common::time::ZonedClock;

use config::Config;
use requeue::RequeueWorker;

mod config;
mod requeue;
mod schedule;

async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("failed to load configuration from env");

    let liveness = HealthRegistry::new("liveness");
    // Runs are hours apart, the deadline only has to catch a wedged loop
    let scheduler_liveness = liveness
        .register("scheduler".to_string(), Duration::from_secs(25 * 60 * 60))
        .await;
    let kafka_liveness = liveness
        .register("rdkafka".to_string(), Duration::from_secs(30))
        .await;

    let worker = RequeueWorker::new(
        ConnectionManager::new(config.kafka.clone(), kafka_liveness),
        config.kafka_topic.clone(),
        SpilloverStore::new(config.log_dir.clone()),
        Arc::new(ZonedClock::new(config.timestamp_timezone.0)),
        config.run_times.0.clone(),
        config.error_log_retention_days,
        scheduler_liveness,
    );

    let requeue_loop = Box::pin(async move { worker.run().await });

    let app = setup_metrics_router(liveness);
    let http_server = Box::pin(listen(app, config.bind()));

    match select(http_server, requeue_loop).await {
        Either::Left((listen_result, _)) => match listen_result {
            Ok(_) => {}
            Err(e) => tracing::error!("failed to start the janitor http server, {}", e),
        },
        Either::Right((_, _)) => {
            tracing::error!("janitor requeue task exited")
        }
    };
}
