//! Router core: the single-threaded event loop binding the worker registry,
//! scheduler registry, and waiting buffer together — classify incoming
//! frames, dispatch, forward, recover.

use std::time::Duration;

use jobbus_protocol::{ClientType, Command, Message};
use tracing::{debug, warn};

use crate::buffer::{EnqueueResult, RawRequest, WaitingBuffer};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{Result, RouterError};
use crate::scheduler::SchedulerRegistry;
use crate::transport::Transport;
use crate::worker::{PopResult, WorkerRegistry};

/// The broker's routing state machine, generic over its transport so it can
/// be driven by a real ZeroMQ pair in production or an in-process fake in
/// tests.
pub struct Router<T: Transport> {
    config: Config,
    transport: T,
    clock: Box<dyn Clock>,
    workers: WorkerRegistry,
    schedulers: SchedulerRegistry,
    waiting: WaitingBuffer,
    last_worker_hb_sent: Duration,
    last_scheduler_hb_sent: Duration,
    received_disconnect: bool,
}

impl<T: Transport> Router<T> {
    pub fn new(config: Config, transport: T) -> Self {
        Self::with_clock(config, transport, Box::new(SystemClock::new()))
    }

    pub fn with_clock(config: Config, transport: T, clock: Box<dyn Clock>) -> Self {
        let workers = WorkerRegistry::new(config.heartbeat_timeout, config.worker_cleanup_interval);
        let schedulers =
            SchedulerRegistry::new(config.heartbeat_timeout, config.scheduler_cleanup_interval);
        let waiting = WaitingBuffer::new(config.hwm);
        Self {
            config,
            transport,
            clock,
            workers,
            schedulers,
            waiting,
            last_worker_hb_sent: Duration::ZERO,
            last_scheduler_hb_sent: Duration::ZERO,
            received_disconnect: false,
        }
    }

    /// Run until `DISCONNECT` is received (or forced via `request_shutdown`).
    pub fn run(&mut self) -> Result<()> {
        while !self.received_disconnect {
            self.tick()?;
        }
        Ok(())
    }

    /// Force the loop to exit after the current iteration, as if a
    /// `DISCONNECT` had arrived. Used by signal handlers.
    pub fn request_shutdown(&mut self) {
        self.received_disconnect = true;
    }

    pub fn shutdown_requested(&self) -> bool {
        self.received_disconnect
    }

    /// Direct access to the transport, for tests driving the router through
    /// an in-process fake.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// One iteration of the event loop: poll, classify at most one frame per
    /// endpoint, then run periodic maintenance.
    pub fn tick(&mut self) -> Result<()> {
        let now = self.clock.monotonic();
        let readiness = self.transport.poll(self.config.heartbeat_interval)?;

        if readiness.frontend {
            if let Some((identity, msg)) = self.transport.recv_frontend()? {
                if let Err(e) = self.handle_frontend(identity, msg, now) {
                    warn!(error = %e, "error handling frontend message");
                }
            }
        }

        if readiness.backend {
            if let Some((identity, msg)) = self.transport.recv_backend()? {
                if let Err(e) = self.handle_backend(identity, msg, now) {
                    warn!(error = %e, "error handling backend message");
                }
            }
        }

        if !self.config.disable_heartbeats {
            self.maybe_send_heartbeats(now);
            self.workers.sweep(now);
            self.schedulers.sweep(now);
        }

        Ok(())
    }

    fn maybe_send_heartbeats(&mut self, now: Duration) {
        if now.saturating_sub(self.last_worker_hb_sent) >= self.config.heartbeat_interval {
            self.last_worker_hb_sent = now;
            let ts = self.clock.wall_timestamp().to_string().into_bytes();
            for id in self.workers.all_ids() {
                let hb = Message::originate(Command::Heartbeat, vec![ts.clone()]);
                if let Err(RouterError::PeerGoneAway(_)) = self.transport.send_backend(&id, &hb) {
                    debug!(worker = ?id, "worker gone during heartbeat broadcast");
                }
            }
        }

        if now.saturating_sub(self.last_scheduler_hb_sent) >= self.config.heartbeat_interval {
            self.last_scheduler_hb_sent = now;
            let ts = self.clock.wall_timestamp().to_string().into_bytes();
            for id in self.schedulers.all_schedulers() {
                let hb = Message::originate(Command::Heartbeat, vec![ts.clone()]);
                if let Err(RouterError::PeerGoneAway(_)) = self.transport.send_frontend(&id, &hb) {
                    debug!(scheduler = ?id, "scheduler gone during heartbeat broadcast");
                }
            }
        }
    }

    // ---- frontend (clients + schedulers) -----------------------------

    fn handle_frontend(&mut self, identity: Vec<u8>, msg: Message, now: Duration) -> Result<()> {
        if self.schedulers.is_known(&identity) {
            self.schedulers.touch(&identity, now);
            if msg.command == Command::Heartbeat {
                return Ok(());
            }
        }

        match msg.command {
            Command::Request => self.handle_request(identity, msg),
            Command::Inform => self.handle_inform_frontend(identity, msg, now),
            Command::Schedule => self.handle_schedule(msg),
            Command::Unschedule => self.handle_unschedule(msg),
            Command::Disconnect => {
                self.received_disconnect = true;
                Ok(())
            }
            Command::Heartbeat => Ok(()),
            other => {
                warn!(?other, "unexpected command on frontend, dropping");
                Ok(())
            }
        }
    }

    fn handle_request(&mut self, identity: Vec<u8>, msg: Message) -> Result<()> {
        let Some(queue) = parse_queue(&msg) else {
            warn!("REQUEST with unreadable queue name, dropping");
            return Ok(());
        };

        loop {
            match self.workers.pop_available(&queue) {
                PopResult::Unknown => {
                    warn!(%queue, "REQUEST for queue with no registered worker ever, dropping");
                    return Ok(());
                }
                PopResult::Empty => {
                    let raw = RawRequest {
                        identity,
                        message: msg,
                    };
                    match self.waiting.enqueue(&queue, raw) {
                        EnqueueResult::Ok => {}
                        EnqueueResult::Rejected => {
                            warn!(%queue, "waiting buffer at HWM, dropping REQUEST");
                        }
                    }
                    return Ok(());
                }
                PopResult::Worker(worker_id) => {
                    let fwd = build_worker_request(&identity, &msg);
                    match self.transport.send_backend(&worker_id, &fwd) {
                        Ok(()) => return Ok(()),
                        Err(RouterError::PeerGoneAway(_)) => {
                            warn!(worker = ?worker_id, "worker gone, retrying against next available");
                            self.workers.remove(&worker_id);
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    fn handle_inform_frontend(&mut self, identity: Vec<u8>, msg: Message, now: Duration) -> Result<()> {
        let client_type = msg.payload.get(1).and_then(|b| ClientType::from_bytes(b));
        if client_type == Some(ClientType::Scheduler) {
            self.schedulers.add_scheduler(identity.clone(), now);
        }
        let ack = msg.ack();
        match self.transport.send_frontend(&identity, &ack) {
            Ok(()) | Err(RouterError::PeerGoneAway(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn handle_schedule(&mut self, msg: Message) -> Result<()> {
        let attempts = self.schedulers.len();
        for _ in 0..attempts {
            let Some(sched_id) = self.schedulers.next_scheduler() else {
                break;
            };
            let fwd = Message::new(Command::Schedule, msg.msgid.clone(), msg.payload.clone());
            match self.transport.send_frontend(&sched_id, &fwd) {
                Ok(()) => return Ok(()),
                Err(RouterError::PeerGoneAway(_)) => {
                    warn!(scheduler = ?sched_id, "scheduler gone, trying next");
                    self.schedulers.remove(&sched_id);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        warn!("no scheduler available to receive SCHEDULE");
        Ok(())
    }

    fn handle_unschedule(&mut self, msg: Message) -> Result<()> {
        for sched_id in self.schedulers.all_schedulers() {
            let fwd = Message::new(Command::Unschedule, msg.msgid.clone(), msg.payload.clone());
            match self.transport.send_frontend(&sched_id, &fwd) {
                Ok(()) => {}
                Err(RouterError::PeerGoneAway(_)) => {
                    warn!(scheduler = ?sched_id, "scheduler gone during UNSCHEDULE broadcast");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    // ---- backend (workers) -------------------------------------------

    fn handle_backend(&mut self, identity: Vec<u8>, msg: Message, now: Duration) -> Result<()> {
        let known = self.workers.is_known(&identity);
        if known {
            self.workers.touch(&identity, now);
        } else if msg.command != Command::Inform {
            warn!(?msg.command, "unknown worker sent non-INFORM, dropping");
            return Ok(());
        }

        match msg.command {
            Command::Inform => self.handle_inform_backend(identity, msg, now),
            Command::Ready => self.handle_ready(identity),
            Command::Heartbeat => Ok(()),
            Command::Reply => self.handle_reply(msg),
            Command::Disconnect => {
                self.workers.remove(&identity);
                Ok(())
            }
            other => {
                warn!(?other, "unexpected command on backend, dropping");
                Ok(())
            }
        }
    }

    fn handle_inform_backend(&mut self, identity: Vec<u8>, msg: Message, now: Duration) -> Result<()> {
        let Some(queue) = parse_queue(&msg) else {
            warn!("worker INFORM with unreadable queue name, dropping");
            return Ok(());
        };
        self.workers.add_worker(identity.clone(), queue, now);
        let ack = msg.ack();
        match self.transport.send_backend(&identity, &ack) {
            Ok(()) | Err(RouterError::PeerGoneAway(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn handle_ready(&mut self, worker_id: Vec<u8>) -> Result<()> {
        let queues = self.workers.queues_of(&worker_id).to_vec();
        let Some(queue) = queues.first() else {
            return Ok(());
        };

        if let Some(raw) = self.waiting.pop_front(queue) {
            let fwd = build_worker_request(&raw.identity, &raw.message);
            match self.transport.send_backend(&worker_id, &fwd) {
                Ok(()) => {}
                Err(RouterError::PeerGoneAway(_)) => {
                    warn!(worker = ?worker_id, "worker gone immediately after READY, dropping backlog item");
                    self.workers.remove(&worker_id);
                }
                Err(e) => return Err(e),
            }
        } else {
            self.workers.requeue(&worker_id);
        }
        Ok(())
    }

    fn handle_reply(&mut self, msg: Message) -> Result<()> {
        let Some((client_id, rest)) = msg.payload.split_first() else {
            warn!("REPLY missing client-id frame, dropping");
            return Ok(());
        };
        let fwd = Message::new(Command::Reply, msg.msgid.clone(), rest.to_vec());
        match self.transport.send_frontend(client_id, &fwd) {
            Ok(()) | Err(RouterError::PeerGoneAway(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Build the `REQUEST` forwarded to a worker: the original client identity
/// is threaded through as the leading payload frame (not the transport
/// identity frame) so the worker can echo it back as the leading frame of
/// its eventual `REPLY`.
fn build_worker_request(client_id: &[u8], msg: &Message) -> Message {
    let mut payload = Vec::with_capacity(1 + msg.payload.len());
    payload.push(client_id.to_vec());
    payload.extend(msg.payload.iter().cloned());
    Message::new(Command::Request, msg.msgid.clone(), payload)
}

fn parse_queue(msg: &Message) -> Option<String> {
    let raw = msg.payload.first()?;
    String::from_utf8(raw.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::FakeClock;
    use crate::testing::FakeTransport;
    use jobbus_protocol::ClientType;

    fn cfg() -> Config {
        Config {
            hwm: 10,
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(60),
            worker_cleanup_interval: Duration::from_secs(10),
            scheduler_cleanup_interval: Duration::from_secs(10),
            disable_heartbeats: true,
            ..Config::default()
        }
    }

    fn router_with(transport: FakeTransport) -> Router<FakeTransport> {
        Router::with_clock(cfg(), transport, Box::new(FakeClock::new()))
    }

    fn inform(queue: &str, client_type: ClientType) -> Message {
        Message::new(
            Command::Inform,
            b"mid".to_vec(),
            vec![queue.as_bytes().to_vec(), client_type.as_bytes().to_vec()],
        )
    }

    #[test]
    fn basic_dispatch_strips_client_prefix_preserves_body() {
        let mut router = router_with(FakeTransport::new());
        router.transport.push_backend(b"w1", inform("default", ClientType::Worker));
        router.tick().unwrap();
        router.transport.push_backend(b"w1", Message::new(Command::Ready, b"r".to_vec(), vec![]));
        router.tick().unwrap();

        router.transport.push_frontend(
            b"c1",
            Message::new(Command::Request, b"req1".to_vec(), vec![b"default".to_vec(), b"body".to_vec()]),
        );
        router.tick().unwrap();

        let sent = &router.transport.backend_out;
        let dispatch = sent.iter().find(|f| f.message.command == Command::Request).unwrap();
        assert_eq!(dispatch.identity, b"w1".to_vec());
        assert_eq!(dispatch.message.payload[0], b"c1".to_vec());
        assert_eq!(dispatch.message.payload[1], b"default".to_vec());
        assert_eq!(dispatch.message.payload[2], b"body".to_vec());
    }

    #[test]
    fn backlog_then_ready_delivers_fifo() {
        let mut router = router_with(FakeTransport::new());
        // No workers yet: two REQUESTs buffer.
        router.transport.push_frontend(
            b"c1",
            Message::new(Command::Request, b"r1".to_vec(), vec![b"default".to_vec(), b"R1".to_vec()]),
        );
        router.tick().unwrap();
        assert_eq!(router.waiting.len("default"), 0); // Unknown queue: dropped, not buffered.

        router.transport.push_backend(b"w1", inform("default", ClientType::Worker));
        router.tick().unwrap();

        router.transport.push_frontend(
            b"c1",
            Message::new(Command::Request, b"r1".to_vec(), vec![b"default".to_vec(), b"R1".to_vec()]),
        );
        router.tick().unwrap();
        router.transport.push_frontend(
            b"c2",
            Message::new(Command::Request, b"r2".to_vec(), vec![b"default".to_vec(), b"R2".to_vec()]),
        );
        router.tick().unwrap();
        assert_eq!(router.waiting.len("default"), 2);

        router.transport.push_backend(b"w1", Message::new(Command::Ready, b"rdy".to_vec(), vec![]));
        router.tick().unwrap();
        assert_eq!(router.waiting.len("default"), 1);
        let first = router.transport.backend_out.last().unwrap();
        assert_eq!(first.message.payload[2], b"R1".to_vec());

        router.transport.push_backend(b"w1", Message::new(Command::Ready, b"rdy2".to_vec(), vec![]));
        router.tick().unwrap();
        assert!(!router.waiting.contains("default"));
        let second = router.transport.backend_out.last().unwrap();
        assert_eq!(second.message.payload[2], b"R2".to_vec());
    }

    #[test]
    fn hwm_rejects_past_capacity() {
        let mut cfg = cfg();
        cfg.hwm = 2;
        let mut router = Router::with_clock(cfg, FakeTransport::new(), Box::new(FakeClock::new()));
        router.transport.push_backend(b"w1", inform("default", ClientType::Worker));
        router.tick().unwrap();

        for i in 0..3 {
            router.transport.push_frontend(
                format!("c{i}").as_bytes(),
                Message::new(Command::Request, b"m".to_vec(), vec![b"default".to_vec()]),
            );
            router.tick().unwrap();
        }
        assert_eq!(router.waiting.len("default"), 2);
    }

    #[test]
    fn worker_timeout_scrubs_availability() {
        let clock = FakeClock::new();
        let clock_handle = clock.clone();
        let mut cfg = cfg();
        cfg.disable_heartbeats = false;
        let mut router = Router::with_clock(cfg, FakeTransport::new(), Box::new(clock));

        router.transport.push_backend(b"w1", inform("default", ClientType::Worker));
        router.tick().unwrap();
        router.transport.push_backend(b"w1", Message::new(Command::Ready, b"r1".to_vec(), vec![]));
        router.tick().unwrap();
        router.transport.push_backend(b"w1", Message::new(Command::Ready, b"r2".to_vec(), vec![]));
        router.tick().unwrap();

        // advance past HEARTBEAT_TIMEOUT
        clock_handle.advance(Duration::from_secs(60));
        router.tick().unwrap(); // sweep runs

        assert!(!router.workers.is_known(b"w1"));

        router.transport.push_frontend(
            b"c1",
            Message::new(Command::Request, b"m".to_vec(), vec![b"default".to_vec(), b"B".to_vec()]),
        );
        router.tick().unwrap();
        assert_eq!(router.waiting.len("default"), 1);
    }

    #[test]
    fn peer_gone_away_retries_next_available_worker() {
        let mut router = router_with(FakeTransport::new());
        router.transport.push_backend(b"w1", inform("default", ClientType::Worker));
        router.tick().unwrap();
        router.transport.push_backend(b"w2", inform("default", ClientType::Worker));
        router.tick().unwrap();
        router.transport.push_backend(b"w1", Message::new(Command::Ready, b"r".to_vec(), vec![]));
        router.tick().unwrap();
        router.transport.push_backend(b"w2", Message::new(Command::Ready, b"r".to_vec(), vec![]));
        router.tick().unwrap();

        router.transport.fail_sends_to(b"w1", 1);
        router.transport.push_frontend(
            b"c1",
            Message::new(Command::Request, b"m".to_vec(), vec![b"default".to_vec(), b"B".to_vec()]),
        );
        router.tick().unwrap();

        let dispatches: Vec<_> = router
            .transport
            .backend_out
            .iter()
            .filter(|f| f.message.command == Command::Request)
            .collect();
        assert_eq!(dispatches.len(), 1);
        assert_eq!(dispatches[0].identity, b"w2".to_vec());
        assert!(!router.workers.is_known(b"w1"));
    }

    #[test]
    fn unknown_queue_is_dropped_not_buffered() {
        let mut router = router_with(FakeTransport::new());
        router.transport.push_frontend(
            b"c1",
            Message::new(Command::Request, b"m".to_vec(), vec![b"ghost-queue".to_vec()]),
        );
        router.tick().unwrap();
        assert!(!router.waiting.contains("ghost-queue"));
    }

    #[test]
    fn scheduler_round_robin_four_consecutive_schedules() {
        let mut router = router_with(FakeTransport::new());
        for id in [b"s1".as_slice(), b"s2", b"s3"] {
            router.transport.push_frontend(id, inform("n/a", ClientType::Scheduler));
            router.tick().unwrap();
        }

        for _ in 0..4 {
            router.transport.push_frontend(
                b"c1",
                Message::new(Command::Schedule, b"m".to_vec(), vec![b"q".to_vec(), b"5".to_vec(), b"p".to_vec()]),
            );
            router.tick().unwrap();
        }

        let targets: Vec<Vec<u8>> = router
            .transport
            .frontend_out
            .iter()
            .filter(|f| f.message.command == Command::Schedule)
            .map(|f| f.identity.clone())
            .collect();
        assert_eq!(targets.len(), 4);
        assert_eq!(targets[0], targets[3]);
        assert_ne!(targets[0], targets[1]);
        assert_ne!(targets[1], targets[2]);
    }

    #[test]
    fn unschedule_broadcasts_to_every_scheduler() {
        let mut router = router_with(FakeTransport::new());
        for id in [b"s1".as_slice(), b"s2", b"s3"] {
            router.transport.push_frontend(id, inform("n/a", ClientType::Scheduler));
            router.tick().unwrap();
        }

        router.transport.push_frontend(
            b"c1",
            Message::new(Command::Unschedule, b"m".to_vec(), vec![b"job-handle".to_vec()]),
        );
        router.tick().unwrap();

        let targets: Vec<Vec<u8>> = router
            .transport
            .frontend_out
            .iter()
            .filter(|f| f.message.command == Command::Unschedule)
            .map(|f| f.identity.clone())
            .collect();
        assert_eq!(targets.len(), 3);
    }

    #[test]
    fn disconnect_sets_shutdown_flag() {
        let mut router = router_with(FakeTransport::new());
        router.transport.push_frontend(b"c1", Message::new(Command::Disconnect, b"m".to_vec(), vec![]));
        router.tick().unwrap();
        assert!(router.shutdown_requested());
    }

    #[test]
    fn reply_routes_to_original_client() {
        let mut router = router_with(FakeTransport::new());
        router.transport.push_backend(b"w1", inform("default", ClientType::Worker));
        router.tick().unwrap();

        router.transport.push_backend(
            b"w1",
            Message::new(Command::Reply, b"m".to_vec(), vec![b"c1".to_vec(), b"result".to_vec()]),
        );
        router.tick().unwrap();

        let reply = router
            .transport
            .frontend_out
            .iter()
            .find(|f| f.message.command == Command::Reply)
            .unwrap();
        assert_eq!(reply.identity, b"c1".to_vec());
        assert_eq!(reply.message.payload, vec![b"result".to_vec()]);
    }
}
