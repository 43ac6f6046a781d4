use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveTime;
use health::HealthHandle;
use metrics::counter;
use serde_json::Value;
use tracing::{error, info, warn};

use relay_common::event::normalize_area;
use relay_common::kafka::{send_access, ConnectionManager};
use relay_common::spillover::{LogCategory, SpilloverStore};
use relay_common::time::TimeSource;

use crate::schedule::next_run;

/// Replays spillover files back into the access topic at the fixed run
/// times, and applies retention to the error journals. Only files strictly
/// older than today are touched: the publisher may still be appending to
/// today's file.
pub struct RequeueWorker {
    manager: ConnectionManager,
    topic: String,
    spillover: SpilloverStore,
    timesource: Arc<dyn TimeSource>,
    run_times: Vec<NaiveTime>,
    retention_days: u32,
    liveness: HealthHandle,
}

impl RequeueWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        manager: ConnectionManager,
        topic: String,
        spillover: SpilloverStore,
        timesource: Arc<dyn TimeSource>,
        run_times: Vec<NaiveTime>,
        retention_days: u32,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            manager,
            topic,
            spillover,
            timesource,
            run_times,
            retention_days,
            liveness,
        }
    }

    /// One replay pass: republish every line of every pending spillover
    /// file, deleting a file only when all of its lines went through.
    pub async fn run_once(&self) {
        let today = self.timesource.stamp().day;

        let pending = match self
            .spillover
            .list_pending(LogCategory::Accesses, today)
            .await
        {
            Ok(pending) => pending,
            Err(err) => {
                error!("failed to list spillover files: {}", err);
                return;
            }
        };

        if pending.is_empty() {
            info!("no spillover files to replay");
        }

        for (day, path) in pending {
            let producer = match self.manager.ensure_connected().await {
                Ok(producer) => producer,
                Err(err) => {
                    error!("broker unreachable, leaving spillover files in place: {}", err);
                    return;
                }
            };
            let topic = self.topic.clone();

            let outcome = self
                .spillover
                .replay(&path, |payload: Value| {
                    let producer = producer.clone();
                    let topic = topic.clone();
                    async move {
                        let profile = payload
                            .get("profile")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_owned();
                        let area = normalize_area(payload.get("area").and_then(Value::as_str));

                        match send_access(&producer, &topic, &profile, area.as_deref(), &payload)
                            .await
                        {
                            Ok(()) => true,
                            Err(err) => {
                                warn!("failed to republish spilled event: {}", err);
                                false
                            }
                        }
                    }
                })
                .await;

            match outcome {
                Ok(outcome) => {
                    counter!("janitor_events_replayed_total").increment(outcome.replayed as u64);
                    if outcome.deleted {
                        counter!("janitor_files_replayed_total").increment(1);
                        info!(
                            "replayed {} events from {}, file deleted",
                            outcome.replayed, day
                        );
                    } else {
                        warn!(
                            "replayed {} of {} events from {}, keeping the file for the next pass",
                            outcome.replayed, outcome.total, day
                        );
                        // The producer may be broken, reconnect before the next file
                        self.manager.mark_dead().await;
                    }
                }
                Err(err) => {
                    error!("failed to replay {}: {}", path.display(), err);
                }
            }
        }

        match self
            .spillover
            .purge_older_than(LogCategory::AccessErrors, today, self.retention_days)
            .await
        {
            Ok(0) => {}
            Ok(removed) => info!("purged {} expired error journals", removed),
            Err(err) => error!("failed to purge error journals: {}", err),
        }
    }

    /// Run one pass at startup to drain whatever accumulated while we were
    /// down, then wait for the fixed run times.
    pub async fn run(&self) {
        self.liveness.report_healthy().await;
        self.run_once().await;

        loop {
            let now = self.timesource.now_local();
            let next = next_run(now, &self.run_times);
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            info!("next replay pass at {}", next);
            tokio::time::sleep(wait).await;

            self.liveness.report_healthy().await;
            self.run_once().await;
        }
    }
}
