use std::str::FromStr;

use chrono::NaiveTime;
use envconfig::Envconfig;

use relay_common::kafka::KafkaConfig;
use relay_common::time::EnvTimezone;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(default = "attendance_access")]
    pub kafka_topic: String,

    #[envconfig(default = "logs")]
    pub log_dir: String,

    // Fixed local times of day at which spillover files are replayed
    #[envconfig(default = "06:00,15:00,22:00")]
    pub run_times: EnvRunTimes,

    #[envconfig(default = "30")]
    pub error_log_retention_days: u32,

    #[envconfig(default = "America/Sao_Paulo")]
    pub timestamp_timezone: EnvTimezone,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Comma-separated list of `%H:%M` times, e.g. "06:00,15:00,22:00".
#[derive(Debug, Clone)]
pub struct EnvRunTimes(pub Vec<NaiveTime>);

impl FromStr for EnvRunTimes {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(|part| {
                NaiveTime::parse_from_str(part.trim(), "%H:%M")
                    .map_err(|e| format!("invalid run time {part:?}: {e}"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(EnvRunTimes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_run_times() {
        let times: EnvRunTimes = "06:00,15:00,22:00".parse().unwrap();
        assert_eq!(
            times.0,
            vec![
                NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(15, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            ]
        );

        assert!("25:00".parse::<EnvRunTimes>().is_err());
        assert!("06:00;15:00".parse::<EnvRunTimes>().is_err());
    }
}
