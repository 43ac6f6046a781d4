use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;

use relay_common::kafka::KafkaConfig;
use relay_common::time::EnvTimezone;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "false")]
    pub print_sink: bool,

    #[envconfig(default = "127.0.0.1:3000")]
    pub address: SocketAddr,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(default = "attendance_access")]
    pub kafka_topic: String,

    // Delay before each publish attempt is given up on, one entry per attempt
    #[envconfig(default = "1,5,10")]
    pub publish_retry_schedule: EnvSecondsList,

    #[envconfig(default = "logs")]
    pub log_dir: String,

    #[envconfig(default = "America/Sao_Paulo")]
    pub timestamp_timezone: EnvTimezone,
}

/// Comma-separated list of whole seconds, e.g. "1,5,10".
#[derive(Debug, Clone)]
pub struct EnvSecondsList(pub Vec<Duration>);

impl FromStr for EnvSecondsList {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(|part| {
                part.trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|e| format!("invalid retry delay {part:?}: {e}"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(EnvSecondsList)
    }
}
