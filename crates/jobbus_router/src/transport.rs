//! Transport seam: the router core talks to this trait, not to ZeroMQ
//! directly, so the frame codec and routing logic are unit-testable without
//! a real socket round-trip.

use std::time::Duration;

use jobbus_protocol::Message;

use crate::error::{Result, RouterError};

/// Which of the two ingress endpoints had a message waiting after a poll.
#[derive(Debug, Default, Clone, Copy)]
pub struct Readiness {
    pub frontend: bool,
    pub backend: bool,
}

/// A received message together with the transport-assigned identity of its
/// sender.
pub type Inbound = (Vec<u8>, Message);

/// Everything the router core needs from the underlying transport.
///
/// Implementations map a rejected send (destination identity no longer
/// reachable) to `RouterError::PeerGoneAway` rather than a generic error, so
/// the router's retry logic can distinguish "try the next candidate" from
/// "something is actually broken".
pub trait Transport {
    /// Block for at most `timeout` waiting on either endpoint. Returning
    /// with neither ready is a legitimate tick, not an error.
    fn poll(&mut self, timeout: Duration) -> Result<Readiness>;

    /// Read one message from the frontend endpoint (clients + schedulers).
    /// `Ok(None)` if nothing was actually available despite `poll` having
    /// reported readiness (benign race with another reader).
    fn recv_frontend(&mut self) -> Result<Option<Inbound>>;

    /// Read one message from the backend endpoint (workers).
    fn recv_backend(&mut self) -> Result<Option<Inbound>>;

    /// Send to `identity` on the frontend endpoint.
    fn send_frontend(&mut self, identity: &[u8], msg: &Message) -> Result<()>;

    /// Send to `identity` on the backend endpoint.
    fn send_backend(&mut self, identity: &[u8], msg: &Message) -> Result<()>;
}

/// ZeroMQ ROUTER/ROUTER transport: one ROUTER socket per ingress endpoint.
pub struct ZmqTransport {
    _context: zmq::Context,
    frontend: zmq::Socket,
    backend: zmq::Socket,
}

impl ZmqTransport {
    pub fn bind(frontend_addr: &str, backend_addr: &str) -> Result<Self> {
        let context = zmq::Context::new();

        let frontend = context
            .socket(zmq::ROUTER)
            .map_err(RouterError::Zmq)?;
        frontend
            .bind(frontend_addr)
            .map_err(|source| RouterError::FrontendBind {
                addr: frontend_addr.to_string(),
                source,
            })?;

        let backend = context
            .socket(zmq::ROUTER)
            .map_err(RouterError::Zmq)?;
        backend
            .bind(backend_addr)
            .map_err(|source| RouterError::BackendBind {
                addr: backend_addr.to_string(),
                source,
            })?;

        Ok(Self {
            _context: context,
            frontend,
            backend,
        })
    }

    fn recv_from(socket: &zmq::Socket) -> Result<Option<Inbound>> {
        let frames = match socket.recv_multipart(zmq::DONTWAIT) {
            Ok(frames) => frames,
            Err(zmq::Error::EAGAIN) => return Ok(None),
            Err(e) => return Err(RouterError::Zmq(e)),
        };
        if frames.is_empty() {
            return Ok(None);
        }
        let identity = frames[0].clone();
        let message = Message::parse(&frames[1..])?;
        Ok(Some((identity, message)))
    }

    fn send_to(socket: &zmq::Socket, identity: &[u8], msg: &Message) -> Result<()> {
        let mut frames: Vec<Vec<u8>> = Vec::with_capacity(1 + msg.payload.len() + 2);
        frames.push(identity.to_vec());
        frames.extend(msg.encode());
        match socket.send_multipart(&frames, 0) {
            Ok(()) => Ok(()),
            Err(zmq::Error::EHOSTUNREACH) | Err(zmq::Error::EAGAIN) => {
                Err(RouterError::PeerGoneAway(identity.to_vec()))
            }
            Err(e) => Err(RouterError::Zmq(e)),
        }
    }
}

impl Transport for ZmqTransport {
    fn poll(&mut self, timeout: Duration) -> Result<Readiness> {
        let mut items = [
            self.frontend.as_poll_item(zmq::POLLIN),
            self.backend.as_poll_item(zmq::POLLIN),
        ];
        let timeout_ms = timeout.as_millis().min(i64::MAX as u128) as i64;
        zmq::poll(&mut items, timeout_ms).map_err(RouterError::Zmq)?;
        Ok(Readiness {
            frontend: items[0].is_readable(),
            backend: items[1].is_readable(),
        })
    }

    fn recv_frontend(&mut self) -> Result<Option<Inbound>> {
        Self::recv_from(&self.frontend)
    }

    fn recv_backend(&mut self) -> Result<Option<Inbound>> {
        Self::recv_from(&self.backend)
    }

    fn send_frontend(&mut self, identity: &[u8], msg: &Message) -> Result<()> {
        Self::send_to(&self.frontend, identity, msg)
    }

    fn send_backend(&mut self, identity: &[u8], msg: &Message) -> Result<()> {
        Self::send_to(&self.backend, identity, msg)
    }
}
