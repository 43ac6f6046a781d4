//! Shared pieces of the attendance access relay: the event data model and
//! classifier, Kafka plumbing, the day-keyed spillover journal, time
//! stamping, and metrics helpers.

pub mod event;
pub mod kafka;
pub mod metrics;
pub mod spillover;
pub mod time;
