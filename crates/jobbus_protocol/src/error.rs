//! Protocol error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("empty frame set")]
    EmptyFrames,

    #[error("unknown command: {0:?}")]
    UnknownCommand(Vec<u8>),

    #[error("{command} requires at least {expected} payload frame(s), got {got}")]
    InvalidFrameCount {
        command: &'static str,
        expected: usize,
        got: usize,
    },
}
