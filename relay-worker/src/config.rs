use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

use relay_common::kafka::KafkaConfig;
use relay_common::time::EnvTimezone;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3301")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(default = "attendance_access")]
    pub kafka_topic: String,

    #[envconfig(default = "attendance_access_errors")]
    pub dead_letter_topic: String,

    #[envconfig(default = "attendance-relay-worker")]
    pub consumer_group: String,

    #[envconfig(default = "https://larmeimei.org/api/resource/LM%20Attendance")]
    pub staff_url: String,

    #[envconfig(default = "https://larmeimei.org/api/resource/LM%20Attendance%20cst")]
    pub participant_url: String,

    // JSON object of default headers attached to every forwarded request
    #[envconfig(
        default = "{\"Content-Type\": \"application/json\", \"Accept\": \"application/json\"}"
    )]
    pub post_headers: String,

    #[envconfig(default = "5000")]
    pub request_timeout: EnvMsDuration,

    #[envconfig(default = "dead-letter")]
    pub failure_policy: FailurePolicy,

    #[envconfig(default = "logs")]
    pub log_dir: String,

    #[envconfig(default = "America/Sao_Paulo")]
    pub timestamp_timezone: EnvTimezone,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

/// What to do with a message that could not be processed: publish it to the
/// dead letter topic and move on (the default), or rewind and retry it in
/// place, blocking the partition until it goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    DeadLetter,
    Requeue,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dead-letter" | "dead_letter" => Ok(FailurePolicy::DeadLetter),
            "requeue" => Ok(FailurePolicy::Requeue),
            other => Err(format!("unknown failure policy {other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_failure_policy() {
        assert_eq!(
            "dead-letter".parse::<FailurePolicy>().unwrap(),
            FailurePolicy::DeadLetter
        );
        assert_eq!(
            "dead_letter".parse::<FailurePolicy>().unwrap(),
            FailurePolicy::DeadLetter
        );
        assert_eq!(
            "Requeue".parse::<FailurePolicy>().unwrap(),
            FailurePolicy::Requeue
        );
        assert!("drop".parse::<FailurePolicy>().is_err());
    }
}
