use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use health::HealthRegistry;
use metrics::counter;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Headers, OwnedHeaders};
use rdkafka::producer::FutureProducer;
use rdkafka::{ClientConfig, Message, Offset};
use reqwest::header;
use serde_json::Value;
use tracing::{error, info, warn};

use relay_common::event::{classify, AttendanceRecord, Destination};
use relay_common::kafka::{
    create_kafka_producer, send_raw, KafkaConfig, KafkaContext, KafkaProduceError,
};
use relay_common::spillover::{LogCategory, SpilloverStore};
use relay_common::time::{TimeSource, ZonedClock};

use crate::config::{Config, FailurePolicy};
use crate::error::{DispatchError, WorkerError};

/// A worker consuming the access topic one message at a time: classify the
/// event, forward it to its attendance endpoint, then store the offset.
/// Offsets are only stored after a terminal outcome, so an unclean shutdown
/// redelivers instead of losing events.
pub struct AccessWorker {
    consumer: StreamConsumer,
    dead_letters: FutureProducer<KafkaContext>,
    client: reqwest::Client,
    dead_letter_topic: String,
    staff_url: String,
    participant_url: String,
    policy: FailurePolicy,
    error_log: SpilloverStore,
    timesource: Arc<dyn TimeSource>,
    liveness: health::HealthHandle,
}

impl AccessWorker {
    pub async fn new(config: &Config, registry: &HealthRegistry) -> Result<Self, WorkerError> {
        let consumer = create_consumer(&config.kafka, &config.consumer_group, &config.kafka_topic)?;

        let producer_liveness = registry
            .register("rdkafka".to_string(), Duration::from_secs(30))
            .await;
        let dead_letters = create_kafka_producer(&config.kafka, producer_liveness).await?;

        let client = reqwest::Client::builder()
            .default_headers(parse_post_headers(&config.post_headers)?)
            .user_agent("Attendance Relay Worker")
            .timeout(config.request_timeout.0)
            .build()?;

        let liveness = registry
            .register("worker".to_string(), Duration::from_secs(60))
            .await;

        Ok(Self {
            consumer,
            dead_letters,
            client,
            dead_letter_topic: config.dead_letter_topic.clone(),
            staff_url: config.staff_url.clone(),
            participant_url: config.participant_url.clone(),
            policy: config.failure_policy,
            error_log: SpilloverStore::new(config.log_dir.clone()),
            timesource: Arc::new(ZonedClock::new(config.timestamp_timezone.0)),
            liveness,
        })
    }

    /// Run this worker to continuously process messages from the access topic.
    pub async fn run(&self) {
        loop {
            self.liveness.report_healthy().await;

            match tokio::time::timeout(Duration::from_secs(15), self.consumer.recv()).await {
                Ok(Ok(message)) => self.dispatch(&message).await,
                Ok(Err(err)) => {
                    counter!("worker_receive_errors_total").increment(1);
                    error!("failed to receive from the access topic: {}", err);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                // Idle topic, loop around to keep reporting liveness
                Err(_) => continue,
            }
        }
    }

    async fn dispatch(&self, message: &BorrowedMessage<'_>) {
        match self.process(message).await {
            Ok(kind) => {
                counter!("worker_events_forwarded_total", "kind" => kind).increment(1);
                self.ack(message);
            }
            Err(err) => {
                counter!("worker_events_failed_total").increment(1);
                warn!(
                    "failed to process message at offset {}: {}",
                    message.offset(),
                    err
                );
                match self.policy {
                    FailurePolicy::DeadLetter => self.dead_letter(message).await,
                    FailurePolicy::Requeue => self.requeue(message),
                }
            }
        }
    }

    async fn process(&self, message: &BorrowedMessage<'_>) -> Result<&'static str, DispatchError> {
        let profile = header_value(message, "profile").ok_or(DispatchError::MissingProfileHeader)?;
        let area = header_value(message, "area");
        let payload: Value = serde_json::from_slice(message.payload().unwrap_or_default())?;

        let classified = classify(&profile, area.as_deref(), &payload)?;
        let url = match classified.destination {
            Destination::Staff => &self.staff_url,
            Destination::Participant => &self.participant_url,
        };
        send_record(&self.client, url, &classified.record).await?;

        Ok(classified.record.kind())
    }

    fn ack(&self, message: &BorrowedMessage<'_>) {
        if let Err(err) =
            self.consumer
                .store_offset(message.topic(), message.partition(), message.offset())
        {
            error!("failed to store offset {}: {}", message.offset(), err);
        }
    }

    /// Journal the failed event, republish it to the dead letter topic with
    /// its original headers, then ack. If the republish fails the offset is
    /// left unstored: acking would drop the event with no trace anywhere.
    async fn dead_letter(&self, message: &BorrowedMessage<'_>) {
        let headers = message.headers().map(|headers| headers.detach());
        match record_dead_letter(
            &self.dead_letters,
            &self.dead_letter_topic,
            &self.error_log,
            self.timesource.stamp().day,
            message.payload().unwrap_or_default(),
            headers,
        )
        .await
        {
            Ok(()) => {
                counter!("worker_events_dead_lettered_total").increment(1);
                self.ack(message);
            }
            Err(err) => {
                error!("failed to publish to the dead letter topic: {}", err);
            }
        }
    }

    /// Rewind the partition to the failed offset so the next recv delivers
    /// the same message again.
    fn requeue(&self, message: &BorrowedMessage<'_>) {
        match self.consumer.seek(
            message.topic(),
            message.partition(),
            Offset::Offset(message.offset()),
            Duration::from_secs(5),
        ) {
            Ok(()) => {
                counter!("worker_events_requeued_total").increment(1);
            }
            Err(err) => {
                error!("failed to seek back to offset {}: {}", message.offset(), err);
            }
        }
    }
}

fn consumer_client_config(config: &KafkaConfig, group: &str) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_hosts)
        .set("statistics.interval.ms", "10000")
        .set("group.id", group)
        // A fresh group must start from the oldest retained event instead of
        // skipping whatever was published before the worker first joined
        .set("auto.offset.reset", "earliest")
        .set("enable.auto.offset.store", "false");

    if config.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    };

    client_config
}

fn create_consumer(
    config: &KafkaConfig,
    group: &str,
    topic: &str,
) -> Result<StreamConsumer, KafkaError> {
    let consumer: StreamConsumer = consumer_client_config(config, group).create()?;
    consumer.subscribe(&[topic])?;

    Ok(consumer)
}

/// Journal the failed event, then republish the raw body and its original
/// headers to the dead letter topic. Returns Ok only once the broker has
/// acknowledged the republish; the caller must not store the offset on Err,
/// or the event would vanish with no trace anywhere.
pub async fn record_dead_letter(
    producer: &FutureProducer<KafkaContext>,
    topic: &str,
    error_log: &SpilloverStore,
    day: NaiveDate,
    payload: &[u8],
    headers: Option<OwnedHeaders>,
) -> Result<(), KafkaProduceError> {
    let entry = error_log_entry(payload);
    if let Err(err) = error_log
        .append(LogCategory::AccessErrors, day, &entry)
        .await
    {
        error!("failed to journal the failed event: {}", err);
    }

    send_raw(producer, topic, payload, headers).await
}

/// Forward one record to the attendance API. The response is logged but
/// never interpreted: a downstream 4xx/5xx still acks the message.
pub async fn send_record(
    client: &reqwest::Client,
    url: &str,
    record: &AttendanceRecord,
) -> Result<(), reqwest::Error> {
    let response = client.post(url).json(record).send().await?;
    info!(
        "forwarded {} record: status={}",
        record.kind(),
        response.status()
    );

    Ok(())
}

/// Parse the POST_HEADERS env value, a JSON object of header names to values.
pub fn parse_post_headers(raw: &str) -> Result<header::HeaderMap, WorkerError> {
    let parsed: HashMap<String, String> =
        serde_json::from_str(raw).map_err(|e| WorkerError::InvalidHeaders(e.to_string()))?;

    (&parsed)
        .try_into()
        .map_err(|e: http::Error| WorkerError::InvalidHeaders(e.to_string()))
}

fn header_value(message: &BorrowedMessage<'_>, key: &str) -> Option<String> {
    message.headers()?.iter().find_map(|header| {
        if header.key == key {
            header
                .value
                .map(|value| String::from_utf8_lossy(value).into_owned())
        } else {
            None
        }
    })
}

/// What gets written to the error journal: the payload as JSON when it
/// parses, the raw text otherwise, so a malformed body is still kept.
pub fn error_log_entry(payload: &[u8]) -> Value {
    match serde_json::from_slice(payload) {
        Ok(value) => value,
        Err(_) => Value::String(String::from_utf8_lossy(payload).into_owned()),
    }
}
