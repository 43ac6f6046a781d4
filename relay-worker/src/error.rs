use thiserror::Error;

use relay_common::event::ClassifyError;

/// Errors raised while processing one consumed message. All of them hand the
/// message to the configured failure policy.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("message is missing the profile header")]
    MissingProfileHeader,
    #[error("message body is not valid JSON: {0}")]
    InvalidBody(#[from] serde_json::Error),
    #[error(transparent)]
    Classify(#[from] ClassifyError),
    #[error("failed to reach the attendance API: {0}")]
    Forward(#[from] reqwest::Error),
}

/// Errors raised while setting the worker up.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
    #[error("failed to build the HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("POST_HEADERS is not a valid header map: {0}")]
    InvalidHeaders(String),
}
