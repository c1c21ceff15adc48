use thiserror::Error;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("failed to bind frontend socket to {addr}: {source}")]
    FrontendBind { addr: String, source: zmq::Error },

    #[error("failed to bind backend socket to {addr}: {source}")]
    BackendBind { addr: String, source: zmq::Error },

    #[error(transparent)]
    Zmq(#[from] zmq::Error),

    #[error(transparent)]
    Protocol(#[from] jobbus_protocol::ProtocolError),

    /// The transport rejected a send because the destination identity is no
    /// longer reachable. Recoverable: the caller retries against the next
    /// candidate rather than treating this as fatal.
    #[error("peer {0:?} is no longer reachable")]
    PeerGoneAway(Vec<u8>),
}

pub type Result<T> = std::result::Result<T, RouterError>;
