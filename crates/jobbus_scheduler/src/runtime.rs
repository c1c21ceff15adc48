//! Scheduler runtime: the event loop that fires cron and interval jobs and
//! injects them as routed `REQUEST`s, and that registers new interval jobs
//! forwarded by the broker as `SCHEDULE`.

use std::time::Duration;

use jobbus_protocol::{ClientType, Command, Message};
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::Result;
use crate::job::{CronJobConfig, DueJob, JobTables};
use crate::transport::Transport;

pub struct SchedulerRuntime<T: Transport> {
    config: Config,
    transport: T,
    clock: Box<dyn Clock>,
    jobs: JobTables,
    last_heartbeat_sent: Duration,
    informed: bool,
    shutdown_requested: bool,
}

impl<T: Transport> SchedulerRuntime<T> {
    pub fn new(config: Config, transport: T, preloaded_cron: &[CronJobConfig]) -> Result<Self> {
        Self::with_clock(config, transport, Box::new(SystemClock::new()), preloaded_cron)
    }

    pub fn with_clock(
        config: Config,
        transport: T,
        clock: Box<dyn Clock>,
        preloaded_cron: &[CronJobConfig],
    ) -> Result<Self> {
        let mut jobs = JobTables::new();
        jobs.load_cron_jobs(preloaded_cron, clock.wall_now())?;
        Ok(Self {
            config,
            transport,
            clock,
            jobs,
            last_heartbeat_sent: Duration::ZERO,
            informed: false,
            shutdown_requested: false,
        })
    }

    pub fn run(&mut self) -> Result<()> {
        while !self.shutdown_requested {
            self.tick()?;
        }
        Ok(())
    }

    pub fn request_shutdown(&mut self) {
        self.shutdown_requested = true;
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    /// One iteration: announce if not yet connected, poll for a forwarded
    /// frame, fire anything due, and keep the connection alive.
    pub fn tick(&mut self) -> Result<()> {
        if !self.informed {
            self.send_inform()?;
            self.informed = true;
        }

        if self.transport.poll(self.config.tick_interval)? {
            if let Some(msg) = self.transport.recv()? {
                self.handle_message(msg)?;
            }
        }

        self.fire_due_jobs()?;
        self.maybe_send_heartbeat()?;

        Ok(())
    }

    fn send_inform(&mut self) -> Result<()> {
        let msg = Message::originate(
            Command::Inform,
            vec![b"n/a".to_vec(), ClientType::Scheduler.as_bytes().to_vec()],
        );
        self.transport.send(&msg)
    }

    fn maybe_send_heartbeat(&mut self) -> Result<()> {
        let now = self.clock.monotonic();
        if now.saturating_sub(self.last_heartbeat_sent) >= self.config.heartbeat_interval {
            self.last_heartbeat_sent = now;
            let ts = self.clock.wall_now().timestamp().to_string().into_bytes();
            let hb = Message::originate(Command::Heartbeat, vec![ts]);
            self.transport.send(&hb)?;
        }
        Ok(())
    }

    fn handle_message(&mut self, msg: Message) -> Result<()> {
        match msg.command {
            Command::Schedule => self.handle_schedule(msg),
            Command::Unschedule => self.handle_unschedule(msg),
            Command::Ack | Command::Heartbeat => Ok(()),
            other => {
                warn!(?other, "unexpected command from broker, dropping");
                Ok(())
            }
        }
    }

    /// `SCHEDULE(sender, msgid, [queue_name, interval_seconds, request_payload])`.
    /// The job handle is the `msgid` the caller chose when issuing
    /// `SCHEDULE` — the one piece of correlating state that travels the
    /// wire without the broker or scheduler inventing a new identifier, and
    /// the only one a later `UNSCHEDULE` from the same caller can recompute
    /// without a return channel.
    fn handle_schedule(&mut self, msg: Message) -> Result<()> {
        let (Some(queue), Some(interval_raw), Some(payload)) =
            (msg.payload.first(), msg.payload.get(1), msg.payload.get(2))
        else {
            warn!("SCHEDULE with missing payload frames, dropping");
            return Ok(());
        };
        let Ok(queue) = String::from_utf8(queue.clone()) else {
            warn!("SCHEDULE with non-UTF8 queue name, dropping");
            return Ok(());
        };
        let Ok(interval_secs) = std::str::from_utf8(interval_raw).unwrap_or("").parse::<u64>() else {
            warn!("SCHEDULE with unparseable interval, dropping");
            return Ok(());
        };
        if interval_secs == 0 {
            warn!("SCHEDULE with zero interval_seconds, dropping");
            return Ok(());
        }

        let handle = hex::encode(&msg.msgid);
        let due = self.jobs.register_interval(
            handle,
            queue,
            payload.clone(),
            Duration::from_secs(interval_secs),
            self.clock.monotonic(),
        );
        self.emit(due)
    }

    fn handle_unschedule(&mut self, msg: Message) -> Result<()> {
        let Some(handle_raw) = msg.payload.first() else {
            warn!("UNSCHEDULE with no job handle, dropping");
            return Ok(());
        };
        let handle = hex::encode(handle_raw);
        if !self.jobs.unschedule(&handle) {
            debug!(%handle, "UNSCHEDULE for unknown job handle, no-op");
        }
        Ok(())
    }

    fn fire_due_jobs(&mut self) -> Result<()> {
        let ts = self.clock.wall_now();
        let m = self.clock.monotonic();
        let due = self.jobs.due_cron(ts);
        for job in due {
            self.emit(job)?;
        }
        let due = self.jobs.due_interval(m);
        for job in due {
            self.emit(job)?;
        }
        Ok(())
    }

    fn emit(&mut self, job: DueJob) -> Result<()> {
        let payload = vec![job.queue.into_bytes(), job.payload];
        let msg = Message::originate(Command::Request, payload);
        self.transport.send(&msg)
    }
}

/// Minimal hex encoding for job handles — msgids are opaque bytes and a job
/// handle must round-trip through a UTF-8-safe wire frame and a `HashMap`
/// key without caring what encoding the caller used for its msgid.
mod hex {
    pub fn encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::FakeClock;
    use crate::transport::testing::FakeTransport;

    fn cfg() -> Config {
        Config {
            broker_addr: "inproc://test".into(),
            heartbeat_interval: Duration::from_secs(15),
            tick_interval: Duration::from_millis(10),
        }
    }

    fn runtime_with(transport: FakeTransport) -> SchedulerRuntime<FakeTransport> {
        SchedulerRuntime::with_clock(cfg(), transport, Box::new(FakeClock::new()), &[]).unwrap()
    }

    #[test]
    fn first_tick_sends_inform_once() {
        let mut rt = runtime_with(FakeTransport::new());
        rt.tick().unwrap();
        rt.tick().unwrap();
        let informs = rt
            .transport
            .outbound
            .iter()
            .filter(|m| m.command == Command::Inform)
            .count();
        assert_eq!(informs, 1);
    }

    #[test]
    fn schedule_registers_and_fires_immediately() {
        let mut rt = runtime_with(FakeTransport::new());
        rt.tick().unwrap();

        rt.transport.push_inbound(Message::new(
            Command::Schedule,
            b"job-1".to_vec(),
            vec![b"default".to_vec(), b"30".to_vec(), b"do-thing".to_vec()],
        ));
        rt.tick().unwrap();

        let requests: Vec<_> = rt
            .transport
            .outbound
            .iter()
            .filter(|m| m.command == Command::Request)
            .collect();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].payload[0], b"default".to_vec());
        assert_eq!(requests[0].payload[1], b"do-thing".to_vec());
    }

    #[test]
    fn schedule_with_zero_interval_is_dropped_not_registered() {
        let mut rt = runtime_with(FakeTransport::new());
        rt.tick().unwrap();

        rt.transport.push_inbound(Message::new(
            Command::Schedule,
            b"job-1".to_vec(),
            vec![b"default".to_vec(), b"0".to_vec(), b"do-thing".to_vec()],
        ));
        rt.tick().unwrap();

        assert_eq!(rt.jobs.interval_len(), 0);
        let requests = rt
            .transport
            .outbound
            .iter()
            .filter(|m| m.command == Command::Request)
            .count();
        assert_eq!(requests, 0);
    }

    #[test]
    fn unschedule_removes_registered_job() {
        let mut rt = runtime_with(FakeTransport::new());
        rt.tick().unwrap();

        rt.transport.push_inbound(Message::new(
            Command::Schedule,
            b"job-1".to_vec(),
            vec![b"default".to_vec(), b"30".to_vec(), b"do-thing".to_vec()],
        ));
        rt.tick().unwrap();
        assert_eq!(rt.jobs.interval_len(), 1);

        let handle = super::hex::encode(b"job-1");
        rt.transport.push_inbound(Message::new(
            Command::Unschedule,
            b"m".to_vec(),
            vec![handle.into_bytes()],
        ));
        rt.tick().unwrap();
        assert_eq!(rt.jobs.interval_len(), 0);
    }

    #[test]
    fn unschedule_by_raw_msgid_bytes_matches_handle() {
        // A client recomputes the handle from the msgid it originally chose
        // for SCHEDULE — exercise that the hex encoding round-trips from
        // raw bytes, not just from a pre-hexed string.
        let mut rt = runtime_with(FakeTransport::new());
        rt.tick().unwrap();

        rt.transport.push_inbound(Message::new(
            Command::Schedule,
            vec![0xde, 0xad, 0xbe, 0xef],
            vec![b"default".to_vec(), b"10".to_vec(), b"p".to_vec()],
        ));
        rt.tick().unwrap();

        rt.transport.push_inbound(Message::new(
            Command::Unschedule,
            b"m".to_vec(),
            vec![super::hex::encode(&[0xde, 0xad, 0xbe, 0xef]).into_bytes()],
        ));
        rt.tick().unwrap();
        assert_eq!(rt.jobs.interval_len(), 0);
    }
}
