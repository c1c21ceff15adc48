//! In-process fake transport. Lets the router's routing logic be exercised
//! end to end without a real ZeroMQ socket round-trip.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use jobbus_protocol::Message;

use crate::error::{Result, RouterError};
use crate::transport::{Inbound, Readiness, Transport};

/// One delivery attempt recorded by [`FakeTransport`], for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub identity: Vec<u8>,
    pub message: Message,
}

/// A transport double with two inbound queues (frontend/backend) a test can
/// push onto, and two outbound logs it can assert against.
///
/// `unreachable` lets a test simulate `PeerGoneAway`: any send addressed to
/// an identity in that set fails instead of succeeding, and the identity is
/// consumed (one-shot) so a retry against a different id can still succeed.
#[derive(Default)]
pub struct FakeTransport {
    frontend_in: VecDeque<Inbound>,
    backend_in: VecDeque<Inbound>,
    pub frontend_out: Vec<SentFrame>,
    pub backend_out: Vec<SentFrame>,
    unreachable: HashMap<Vec<u8>, usize>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_frontend(&mut self, identity: &[u8], message: Message) {
        self.frontend_in.push_back((identity.to_vec(), message));
    }

    pub fn push_backend(&mut self, identity: &[u8], message: Message) {
        self.backend_in.push_back((identity.to_vec(), message));
    }

    /// The next `count` sends to `identity` (on either endpoint) fail with
    /// `PeerGoneAway`.
    pub fn fail_sends_to(&mut self, identity: &[u8], count: usize) {
        self.unreachable.insert(identity.to_vec(), count);
    }

    fn consume_failure(&mut self, identity: &[u8]) -> bool {
        if let Some(remaining) = self.unreachable.get_mut(identity) {
            if *remaining > 0 {
                *remaining -= 1;
                return true;
            }
        }
        false
    }
}

impl Transport for FakeTransport {
    fn poll(&mut self, _timeout: Duration) -> Result<Readiness> {
        Ok(Readiness {
            frontend: !self.frontend_in.is_empty(),
            backend: !self.backend_in.is_empty(),
        })
    }

    fn recv_frontend(&mut self) -> Result<Option<Inbound>> {
        Ok(self.frontend_in.pop_front())
    }

    fn recv_backend(&mut self) -> Result<Option<Inbound>> {
        Ok(self.backend_in.pop_front())
    }

    fn send_frontend(&mut self, identity: &[u8], msg: &Message) -> Result<()> {
        if self.consume_failure(identity) {
            return Err(RouterError::PeerGoneAway(identity.to_vec()));
        }
        self.frontend_out.push(SentFrame {
            identity: identity.to_vec(),
            message: msg.clone(),
        });
        Ok(())
    }

    fn send_backend(&mut self, identity: &[u8], msg: &Message) -> Result<()> {
        if self.consume_failure(identity) {
            return Err(RouterError::PeerGoneAway(identity.to_vec()));
        }
        self.backend_out.push(SentFrame {
            identity: identity.to_vec(),
            message: msg.clone(),
        });
        Ok(())
    }
}
