//! Wire protocol for the broker: a variable-arity multi-frame message with a
//! stable command schema.
//!
//! A message on the wire is the sequence of frames that follows the
//! transport-supplied identity frame(s):
//!
//! ```text
//! [COMMAND][MSGID][payload...]
//! ```
//!
//! `COMMAND` is an uppercase ASCII command name (§ below). `MSGID` is an
//! opaque correlation token, any bytes, echoed unchanged in `ACK`. The
//! remaining frames are the command's payload and vary by command.

pub mod error;

pub use error::{ProtocolError, Result};

use uuid::Uuid;

/// The closed set of commands the broker understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Inform,
    Ready,
    Request,
    Reply,
    Heartbeat,
    Ack,
    Schedule,
    Unschedule,
    Disconnect,
}

impl Command {
    /// Minimum number of payload frames (after command + msgid) this
    /// command is valid with.
    pub fn min_payload_frames(self) -> usize {
        match self {
            Command::Inform => 2,     // queue_name, client_type
            Command::Ready => 0,
            Command::Request => 1,    // queue_name (+ job body frames)
            Command::Reply => 1,      // client id (+ body frames)
            Command::Heartbeat => 1,  // wall_ts
            Command::Ack => 0,
            Command::Schedule => 3,   // queue_name, interval_seconds, request_payload
            Command::Unschedule => 1, // job_handle
            Command::Disconnect => 0,
        }
    }

    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Command::Inform => b"INFORM",
            Command::Ready => b"READY",
            Command::Request => b"REQUEST",
            Command::Reply => b"REPLY",
            Command::Heartbeat => b"HEARTBEAT",
            Command::Ack => b"ACK",
            Command::Schedule => b"SCHEDULE",
            Command::Unschedule => b"UNSCHEDULE",
            Command::Disconnect => b"DISCONNECT",
        }
    }

    fn from_bytes(raw: &[u8]) -> Result<Self> {
        Ok(match raw {
            b"INFORM" => Command::Inform,
            b"READY" => Command::Ready,
            b"REQUEST" => Command::Request,
            b"REPLY" => Command::Reply,
            b"HEARTBEAT" => Command::Heartbeat,
            b"ACK" => Command::Ack,
            b"SCHEDULE" => Command::Schedule,
            b"UNSCHEDULE" => Command::Unschedule,
            b"DISCONNECT" => Command::Disconnect,
            other => return Err(ProtocolError::UnknownCommand(other.to_vec())),
        })
    }
}

/// A parsed message body: the command, its correlation token, and whatever
/// payload frames followed. Identity framing is the transport's concern and
/// is carried alongside a `Message`, not inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub command: Command,
    pub msgid: Vec<u8>,
    pub payload: Vec<Vec<u8>>,
}

impl Message {
    pub fn new(command: Command, msgid: Vec<u8>, payload: Vec<Vec<u8>>) -> Self {
        Self {
            command,
            msgid,
            payload,
        }
    }

    /// Build a message with a fresh random msgid, for commands the broker
    /// originates itself (e.g. outbound `HEARTBEAT`).
    pub fn originate(command: Command, payload: Vec<Vec<u8>>) -> Self {
        Self::new(command, Uuid::new_v4().as_bytes().to_vec(), payload)
    }

    /// Parse the frames that follow the identity frame(s) into a `Message`.
    pub fn parse(frames: &[Vec<u8>]) -> Result<Self> {
        if frames.is_empty() {
            return Err(ProtocolError::EmptyFrames);
        }
        if frames.len() < 2 {
            return Err(ProtocolError::InvalidFrameCount {
                command: "<header>",
                expected: 2,
                got: frames.len(),
            });
        }

        let command = Command::from_bytes(&frames[0])?;
        let msgid = frames[1].clone();
        let payload: Vec<Vec<u8>> = frames[2..].to_vec();

        let min = command.min_payload_frames();
        if payload.len() < min {
            return Err(ProtocolError::InvalidFrameCount {
                command: command_name(command),
                expected: min,
                got: payload.len(),
            });
        }

        Ok(Self {
            command,
            msgid,
            payload,
        })
    }

    /// Encode into frames suitable for `zmq::Socket::send_multipart`, not
    /// including the destination identity frame.
    pub fn encode(&self) -> Vec<Vec<u8>> {
        let mut frames = Vec::with_capacity(2 + self.payload.len());
        frames.push(self.command.as_bytes().to_vec());
        frames.push(self.msgid.clone());
        frames.extend(self.payload.iter().cloned());
        frames
    }

    /// Build the `ACK` response echoing this message's `msgid`.
    pub fn ack(&self) -> Self {
        Self::new(Command::Ack, self.msgid.clone(), Vec::new())
    }
}

fn command_name(command: Command) -> &'static str {
    match command {
        Command::Inform => "INFORM",
        Command::Ready => "READY",
        Command::Request => "REQUEST",
        Command::Reply => "REPLY",
        Command::Heartbeat => "HEARTBEAT",
        Command::Ack => "ACK",
        Command::Schedule => "SCHEDULE",
        Command::Unschedule => "UNSCHEDULE",
        Command::Disconnect => "DISCONNECT",
    }
}

/// The declared type of an `INFORM`ing peer, carried as the second payload
/// frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientType {
    Worker,
    Scheduler,
}

impl ClientType {
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            ClientType::Worker => b"worker",
            ClientType::Scheduler => b"scheduler",
        }
    }

    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        match raw {
            b"worker" => Some(ClientType::Worker),
            b"scheduler" => Some(ClientType::Scheduler),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_request() {
        let msg = Message::new(
            Command::Request,
            b"abc123".to_vec(),
            vec![b"default".to_vec(), b"job body".to_vec()],
        );
        let frames = msg.encode();
        let parsed = Message::parse(&frames).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn rejects_unknown_command() {
        let frames = vec![b"BOGUS".to_vec(), b"id".to_vec()];
        assert!(matches!(
            Message::parse(&frames),
            Err(ProtocolError::UnknownCommand(_))
        ));
    }

    #[test]
    fn rejects_short_inform() {
        let frames = vec![b"INFORM".to_vec(), b"id".to_vec(), b"default".to_vec()];
        assert!(matches!(
            Message::parse(&frames),
            Err(ProtocolError::InvalidFrameCount { .. })
        ));
    }

    #[test]
    fn rejects_empty_frames() {
        assert!(matches!(Message::parse(&[]), Err(ProtocolError::EmptyFrames)));
    }

    #[test]
    fn ack_echoes_msgid() {
        let msg = Message::new(Command::Inform, b"xyz".to_vec(), vec![b"q".to_vec(), b"worker".to_vec()]);
        let ack = msg.ack();
        assert_eq!(ack.command, Command::Ack);
        assert_eq!(ack.msgid, b"xyz".to_vec());
        assert!(ack.payload.is_empty());
    }

    #[test]
    fn client_type_round_trips() {
        assert_eq!(ClientType::from_bytes(b"worker"), Some(ClientType::Worker));
        assert_eq!(ClientType::from_bytes(b"scheduler"), Some(ClientType::Scheduler));
        assert_eq!(ClientType::from_bytes(b"bogus"), None);
        assert_eq!(ClientType::Worker.as_bytes(), b"worker");
    }
}
