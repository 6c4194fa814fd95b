//! Generic multi-queue job service: priority scheduling, leases, retries with
//! backoff, dead-letter queues and derived health metrics.

pub mod broker;
pub mod error;
pub mod events;
pub mod memory;
pub mod service;

pub use broker::{Broker, Outcome, QueueCounters};
pub use error::QueueError;
pub use events::QueueEvent;
pub use memory::InMemoryBroker;
pub use service::{CleanupFuture, FailureOutcome, NewJob, QueueConfig, QueueService};
