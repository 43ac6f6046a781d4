use envconfig::Envconfig;
use health::HealthHandle;
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::{ClientConfig, ClientContext};
use serde_json::error::Error as SerdeError;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,
}

pub struct KafkaContext {
    liveness: HealthHandle,
}

impl From<HealthHandle> for KafkaContext {
    fn from(value: HealthHandle) -> Self {
        KafkaContext { liveness: value }
    }
}

impl ClientContext for KafkaContext {
    fn stats(&self, _: rdkafka::Statistics) {
        // Signal liveness, as the main rdkafka loop is running and calling us
        self.liveness.report_healthy_blocking();
    }
}

/// Build a producer and ping the cluster, so connectivity problems surface
/// here instead of on the first publish.
pub async fn create_kafka_producer(
    config: &KafkaConfig,
    liveness: HealthHandle,
) -> Result<FutureProducer<KafkaContext>, KafkaError> {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_hosts)
        .set("statistics.interval.ms", "10000")
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        )
        .set(
            "compression.codec",
            config.kafka_compression_codec.to_owned(),
        )
        .set(
            "queue.buffering.max.kbytes",
            (config.kafka_producer_queue_mib * 1024).to_string(),
        );

    if config.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    };

    debug!("rdkafka configuration: {:?}", client_config);
    let producer: FutureProducer<KafkaContext> =
        client_config.create_with_context(liveness.into())?;

    // "Ping" the Kafka brokers by requesting metadata
    match producer
        .client()
        .fetch_metadata(None, std::time::Duration::from_secs(15))
    {
        Ok(metadata) => {
            info!(
                "connected to Kafka brokers, found {} topics",
                metadata.topics().len()
            );
        }
        Err(error) => {
            error!("failed to fetch metadata from Kafka brokers: {:?}", error);
            return Err(error);
        }
    }

    Ok(producer)
}

/// Single owner of the producer handle shared by a process.
///
/// `ensure_connected` hands out clones of a live handle, connecting lazily;
/// `mark_dead` drops the handle after a failed send so the next attempt
/// reconnects instead of reusing a broken one.
pub struct ConnectionManager {
    config: KafkaConfig,
    liveness: HealthHandle,
    producer: Mutex<Option<FutureProducer<KafkaContext>>>,
}

impl ConnectionManager {
    pub fn new(config: KafkaConfig, liveness: HealthHandle) -> Self {
        Self {
            config,
            liveness,
            producer: Mutex::new(None),
        }
    }

    pub async fn ensure_connected(&self) -> Result<FutureProducer<KafkaContext>, KafkaError> {
        let mut guard = self.producer.lock().await;
        if let Some(producer) = guard.as_ref() {
            return Ok(producer.clone());
        }
        let producer = create_kafka_producer(&self.config, self.liveness.clone()).await?;
        *guard = Some(producer.clone());
        Ok(producer)
    }

    pub async fn mark_dead(&self) {
        *self.producer.lock().await = None;
    }
}

#[derive(Error, Debug)]
pub enum KafkaProduceError {
    #[error("failed to serialize: {error}")]
    SerializationError { error: SerdeError },
    #[error("failed to produce to kafka: {error}")]
    KafkaProduceError { error: KafkaError },
    #[error("failed to produce to kafka (timeout)")]
    KafkaProduceCanceled,
}

/// Publish one access event with its routing key attached as message headers,
/// waiting for the broker delivery ack.
pub async fn send_access<C: ClientContext + 'static>(
    producer: &FutureProducer<C>,
    topic: &str,
    profile: &str,
    area: Option<&str>,
    payload: &Value,
) -> Result<(), KafkaProduceError> {
    let body = serde_json::to_string(payload)
        .map_err(|error| KafkaProduceError::SerializationError { error })?;

    let mut headers = OwnedHeaders::new().insert(Header {
        key: "profile",
        value: Some(profile),
    });
    if let Some(area) = area {
        headers = headers.insert(Header {
            key: "area",
            value: Some(area),
        });
    }

    let record = FutureRecord::<str, str> {
        topic,
        partition: None,
        payload: Some(&body),
        key: None,
        timestamp: None,
        headers: Some(headers),
    };

    let delivery = producer
        .send_result(record)
        .map_err(|(error, _)| KafkaProduceError::KafkaProduceError { error })?;
    await_delivery(delivery).await
}

/// Republish a consumed message verbatim, body and original headers, to
/// another topic. Used for dead-lettering.
pub async fn send_raw<C: ClientContext + 'static>(
    producer: &FutureProducer<C>,
    topic: &str,
    body: &[u8],
    headers: Option<OwnedHeaders>,
) -> Result<(), KafkaProduceError> {
    let record = FutureRecord::<str, [u8]> {
        topic,
        partition: None,
        payload: Some(body),
        key: None,
        timestamp: None,
        headers,
    };

    let delivery = producer
        .send_result(record)
        .map_err(|(error, _)| KafkaProduceError::KafkaProduceError { error })?;
    await_delivery(delivery).await
}

async fn await_delivery(
    delivery: rdkafka::producer::DeliveryFuture,
) -> Result<(), KafkaProduceError> {
    match delivery.await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err((error, _))) => Err(KafkaProduceError::KafkaProduceError { error }),
        // Cancelled while retrying, typically on producer shutdown
        Err(_) => Err(KafkaProduceError::KafkaProduceCanceled),
    }
}
