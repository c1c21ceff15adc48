use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("failed to connect to broker at {addr}: {source}")]
    Connect { addr: String, source: zmq::Error },

    #[error(transparent)]
    Zmq(#[from] zmq::Error),

    #[error(transparent)]
    Protocol(#[from] jobbus_protocol::ProtocolError),

    /// The broker connection dropped the send. Recoverable at the call
    /// site: the next tick's `INFORM` re-establishes liveness.
    #[error("broker is no longer reachable")]
    PeerGoneAway,

    #[error("invalid cron schedule {id:?} ({expr:?}): {source}")]
    InvalidCronSchedule {
        id: String,
        expr: String,
        source: cron::error::Error,
    },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
