use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use tracing::{error, info, instrument, warn};

use relay_common::event::AccessEvent;
use relay_common::kafka::{send_access, ConnectionManager, KafkaProduceError};
use relay_common::spillover::{LogCategory, SpilloverStore};

use crate::api::CaptureError;

#[async_trait]
pub trait EventSink {
    async fn send(&self, event: AccessEvent) -> Result<(), CaptureError>;
}

pub struct PrintSink {}

#[async_trait]
impl EventSink for PrintSink {
    async fn send(&self, event: AccessEvent) -> Result<(), CaptureError> {
        info!("event: {:?}", event);
        counter!("capture_events_ingested_total").increment(1);

        Ok(())
    }
}

/// Publishes each event to the access topic, walking the retry schedule on
/// failure. Once the schedule is exhausted the event is appended to the
/// day's spillover file and the request still succeeds: the scheduler will
/// replay the file later, the reader at the door never sees the outage.
pub struct KafkaSink {
    manager: ConnectionManager,
    topic: String,
    retry_schedule: Vec<Duration>,
    spillover: SpilloverStore,
}

impl KafkaSink {
    pub fn new(
        manager: ConnectionManager,
        topic: String,
        retry_schedule: Vec<Duration>,
        spillover: SpilloverStore,
    ) -> KafkaSink {
        KafkaSink {
            manager,
            topic,
            retry_schedule,
            spillover,
        }
    }

    async fn attempt(&self, event: &AccessEvent) -> Result<(), KafkaProduceError> {
        let producer = self
            .manager
            .ensure_connected()
            .await
            .map_err(|error| KafkaProduceError::KafkaProduceError { error })?;

        send_access(
            &producer,
            &self.topic,
            &event.profile,
            event.area.as_deref(),
            &event.payload,
        )
        .await
    }
}

#[async_trait]
impl EventSink for KafkaSink {
    #[instrument(skip_all, fields(profile = %event.profile))]
    async fn send(&self, event: AccessEvent) -> Result<(), CaptureError> {
        for (attempt, delay) in self.retry_schedule.iter().enumerate() {
            match self.attempt(&event).await {
                Ok(()) => {
                    counter!("capture_events_ingested_total").increment(1);
                    return Ok(());
                }
                Err(err) => {
                    counter!("capture_kafka_produce_errors_total").increment(1);
                    warn!(
                        "failed to publish (attempt {} of {}): {}",
                        attempt + 1,
                        self.retry_schedule.len(),
                        err
                    );
                    // The producer handle may be stale, reconnect on the next pass
                    self.manager.mark_dead().await;
                    tokio::time::sleep(*delay).await;
                }
            }
        }

        error!("exhausted publish retries, spilling the event to disk");
        self.spillover
            .append(LogCategory::Accesses, event.day, &event.payload)
            .await?;
        counter!("capture_events_spilled_total").increment(1);

        Ok(())
    }
}
