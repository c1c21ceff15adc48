//! The broker core: routing state machine and worker/scheduler lifecycle
//! bookkeeping for the job-execution message bus.
//!
//! The router is a single-threaded event loop over two ingress endpoints
//! (frontend = clients + schedulers, backend = workers). See [`Router`] for
//! the loop itself; [`worker`], [`scheduler`], and [`buffer`] hold the state
//! it mutates.

pub mod buffer;
pub mod clock;
pub mod config;
pub mod error;
pub mod router;
pub mod scheduler;
pub mod transport;
pub mod worker;

#[doc(hidden)]
pub mod testing;

pub use clock::{Clock, SystemClock};
pub use config::{CliOverrides, Config};
pub use error::{Result, RouterError};
pub use router::Router;
pub use transport::{Transport, ZmqTransport};
