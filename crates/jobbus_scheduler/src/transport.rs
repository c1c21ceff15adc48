//! Transport seam: a single connected peer link to the broker's frontend.
//!
//! Unlike the router's two ROUTER sockets, the scheduler is one end of a
//! point-to-point DEALER/ROUTER pair: there is no destination identity to
//! address on send (ZeroMQ threads the scheduler's identity through on the
//! broker's ROUTER side automatically), so the trait is simpler than the
//! router's.

use std::time::Duration;

use jobbus_protocol::Message;

use crate::error::{Result, SchedulerError};

pub trait Transport {
    /// Block for at most `timeout` waiting for an inbound message.
    fn poll(&mut self, timeout: Duration) -> Result<bool>;

    /// Read one message, if any is actually available.
    fn recv(&mut self) -> Result<Option<Message>>;

    /// Send one message toward the broker.
    fn send(&mut self, msg: &Message) -> Result<()>;
}

/// ZeroMQ DEALER socket connected to the broker's frontend ROUTER.
pub struct ZmqTransport {
    _context: zmq::Context,
    socket: zmq::Socket,
}

impl ZmqTransport {
    pub fn connect(broker_addr: &str) -> Result<Self> {
        let context = zmq::Context::new();
        let socket = context.socket(zmq::DEALER).map_err(SchedulerError::Zmq)?;
        socket
            .connect(broker_addr)
            .map_err(|source| SchedulerError::Connect {
                addr: broker_addr.to_string(),
                source,
            })?;
        Ok(Self {
            _context: context,
            socket,
        })
    }
}

impl Transport for ZmqTransport {
    fn poll(&mut self, timeout: Duration) -> Result<bool> {
        let mut items = [self.socket.as_poll_item(zmq::POLLIN)];
        let timeout_ms = timeout.as_millis().min(i64::MAX as u128) as i64;
        zmq::poll(&mut items, timeout_ms).map_err(SchedulerError::Zmq)?;
        Ok(items[0].is_readable())
    }

    fn recv(&mut self) -> Result<Option<Message>> {
        let frames = match self.socket.recv_multipart(zmq::DONTWAIT) {
            Ok(frames) => frames,
            Err(zmq::Error::EAGAIN) => return Ok(None),
            Err(e) => return Err(SchedulerError::Zmq(e)),
        };
        if frames.is_empty() {
            return Ok(None);
        }
        Ok(Some(Message::parse(&frames)?))
    }

    fn send(&mut self, msg: &Message) -> Result<()> {
        match self.socket.send_multipart(msg.encode(), 0) {
            Ok(()) => Ok(()),
            Err(zmq::Error::EHOSTUNREACH) | Err(zmq::Error::EAGAIN) => {
                Err(SchedulerError::PeerGoneAway)
            }
            Err(e) => Err(SchedulerError::Zmq(e)),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;

    /// In-process fake for the scheduler's connected-peer transport.
    #[derive(Default)]
    pub struct FakeTransport {
        inbound: VecDeque<Message>,
        pub outbound: Vec<Message>,
        fail_next_sends: usize,
    }

    impl FakeTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_inbound(&mut self, msg: Message) {
            self.inbound.push_back(msg);
        }

        pub fn fail_next_sends(&mut self, count: usize) {
            self.fail_next_sends = count;
        }
    }

    impl Transport for FakeTransport {
        fn poll(&mut self, _timeout: Duration) -> Result<bool> {
            Ok(!self.inbound.is_empty())
        }

        fn recv(&mut self) -> Result<Option<Message>> {
            Ok(self.inbound.pop_front())
        }

        fn send(&mut self, msg: &Message) -> Result<()> {
            if self.fail_next_sends > 0 {
                self.fail_next_sends -= 1;
                return Err(SchedulerError::PeerGoneAway);
            }
            self.outbound.push(msg.clone());
            Ok(())
        }
    }
}
