//! Consume access events and forward them to the attendance API.
use envconfig::Envconfig;
use health::HealthRegistry;

use relay_common::metrics::{serve, setup_metrics_router};
use relay_worker::config::Config;
use relay_worker::error::WorkerError;
use relay_worker::worker::AccessWorker;

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("invalid configuration");

    let liveness = HealthRegistry::new("liveness");

    let worker = AccessWorker::new(&config, &liveness).await?;

    let bind = config.bind();
    tokio::task::spawn(async move {
        let router = setup_metrics_router(liveness);
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    });

    worker.run().await;

    Ok(())
}
