use std::future::Future;
use std::time::Duration;

use health::HealthRegistry;
use tokio::net::TcpListener;

use relay_common::kafka::ConnectionManager;
use relay_common::spillover::SpilloverStore;
use relay_common::time::ZonedClock;

use crate::config::Config;
use crate::{router, sink};

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let liveness = HealthRegistry::new("liveness");
    let timesource = ZonedClock::new(config.timestamp_timezone.0);

    let app = if config.print_sink {
        router::router(
            timesource,
            liveness,
            sink::PrintSink {},
            config.export_prometheus,
        )
    } else {
        let handle = liveness
            .register("rdkafka".to_string(), Duration::from_secs(30))
            .await;
        let manager = ConnectionManager::new(config.kafka.clone(), handle);

        // Connect eagerly so a broker outage shows up in the logs right away,
        // but keep serving: events spill to disk until the broker returns.
        if let Err(err) = manager.ensure_connected().await {
            tracing::warn!(
                "broker unreachable at startup, events will spill to disk: {}",
                err
            );
        }

        let sink = sink::KafkaSink::new(
            manager,
            config.kafka_topic.clone(),
            config.publish_retry_schedule.0.clone(),
            SpilloverStore::new(config.log_dir.clone()),
        );
        router::router(timesource, liveness, sink, config.export_prometheus)
    };

    tracing::info!("listening on {:?}", listener.local_addr().unwrap());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .unwrap()
}
