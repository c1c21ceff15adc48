//! The scheduler runtime: owns cron and interval job tables and emits
//! `REQUEST` frames at their fire times, connecting to the broker as a
//! normal frontend peer. See [`runtime::SchedulerRuntime`] for the event
//! loop; [`job`] holds the two job tables it mutates.

pub mod clock;
pub mod config;
pub mod error;
pub mod job;
pub mod runtime;
pub mod transport;

pub use clock::{Clock, SystemClock};
pub use config::{CliOverrides, Config};
pub use error::{Result, SchedulerError};
pub use job::CronJobConfig;
pub use runtime::SchedulerRuntime;
pub use transport::{Transport, ZmqTransport};
