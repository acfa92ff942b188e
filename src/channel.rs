//! One exchange at a time over the transport.
//!
//! [`CommandChannel::send`] writes a command and reads lines until the final
//! result or the command timeout. URCs that interleave with the exchange are
//! handed to the subscribers and queued for the session, they never end up in
//! the response. A timed out exchange leaves the channel usable.

use embassy_time::{Duration, Instant};
use heapless::{Deque, String};

use crate::{
    command::{
        response::{Outcome, Response, Tokens},
        Command, CommandTable, Op,
    },
    config::{Config, EchoMode},
    error::{Error, ProtocolError, TransportError},
    line_reader::{Line, LineReader},
    parser::{FinalResult, ParsedEvent, ResponseParser},
    transport::Transport,
    urc::{Urc, UrcRouter, UrcSubscriber},
    MAX_COMMAND_LEN, PENDING_URCS, READ_CHUNK,
};

/// Room for the terminator after the longest command
const WRITE_BUF_LEN: usize = MAX_COMMAND_LEN + 4;

/// What the channel has observed about the link since the last reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Health {
    pub consecutive_timeouts: u8,
    pub transport_failed: bool,
}

/// State of the exchange in progress
#[derive(Default)]
struct Exchange {
    response: Response,
    failure: Option<ProtocolError>,
    raw_remaining: usize,
}

impl Exchange {
    fn fail(&mut self, e: ProtocolError) {
        warn!("Exchange failed: {:?}", e);
        self.failure.get_or_insert(e);
    }
}

pub struct CommandChannel<'d, T> {
    transport: T,
    reader: LineReader,
    parser: ResponseParser,
    router: UrcRouter<'d>,
    pending: Deque<Urc, PENDING_URCS>,
    health: Health,
    last_activity: Instant,
}

impl<'d, T> CommandChannel<'d, T>
where
    T: Transport,
{
    pub fn new(transport: T, table: &'static CommandTable, config: &Config) -> Self {
        Self {
            transport,
            reader: LineReader::new(),
            parser: ResponseParser::new(table, config.echo),
            router: UrcRouter::new(config.urc_policy),
            pending: Deque::new(),
            health: Health {
                consecutive_timeouts: 0,
                transport_failed: false,
            },
            last_activity: Instant::now(),
        }
    }

    pub fn release(self) -> T {
        self.transport
    }

    pub fn table(&self) -> &'static CommandTable {
        self.parser.table()
    }

    pub fn set_echo(&mut self, echo: EchoMode) {
        self.parser.set_echo(echo);
    }

    pub fn subscribe(&mut self, subscriber: &'d dyn UrcSubscriber) -> Result<(), Error> {
        self.router.subscribe(subscriber)
    }

    pub fn health(&self) -> Health {
        self.health
    }

    pub fn reset_health(&mut self) {
        self.health = Health {
            consecutive_timeouts: 0,
            transport_failed: false,
        };
    }

    /// Time since the modem last sent anything
    pub fn idle_for(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_activity)
    }

    /// Issue `cmd` and wait for its final result.
    pub fn send(&mut self, cmd: &Command<'_>) -> Outcome {
        let text = match cmd.encode() {
            Ok(text) => text,
            Err(e) => return Outcome::Malformed(e),
        };

        let mut wire: String<WRITE_BUF_LEN> = String::new();
        if wire.push_str(&text).is_err() || wire.push_str(self.table().terminator).is_err() {
            return Outcome::Malformed(ProtocolError::CommandOverflow);
        }

        // Leftovers of an earlier exchange must not be taken for this one
        if let Err(e) = self.poll() {
            return self.record(Outcome::TransportError(e));
        }

        debug!("[{}] --> {}", self.table().name, text.as_str());
        if let Err(e) = self.transport.write(wire.as_bytes()) {
            return self.record(Outcome::TransportError(e));
        }

        self.parser.issue(&text, cmd.spec());
        let outcome = self.exchange(cmd);
        self.parser.complete();

        match &outcome {
            Outcome::Succeeded(_) => trace!("[{}] {:?} succeeded", self.table().name, cmd.op()),
            other => debug!("[{}] {:?} -> {:?}", self.table().name, cmd.op(), other),
        }
        self.record(outcome)
    }

    /// [`CommandChannel::send`], repeated while the exchange times out.
    ///
    /// Only for commands that are safe to issue twice.
    pub fn send_retry(&mut self, cmd: &Command<'_>, attempts: u8) -> Outcome {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            let outcome = self.send(cmd);
            if outcome != Outcome::TimedOut || attempt >= attempts {
                return outcome;
            }
            debug!("{:?} timed out, retrying ({}/{})", cmd.op(), attempt, attempts);
            attempt += 1;
        }
    }

    /// Issue the command for `op` without parameters
    pub fn send_op(&mut self, op: Op) -> Outcome {
        match self.table().command(op) {
            Ok(cmd) => self.send(&cmd),
            Err(e) => Outcome::Malformed(e),
        }
    }

    /// Next line from the modem, or `None` once `timeout` has elapsed
    pub fn read_line(&mut self, timeout: Duration) -> Result<Option<Line>, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(line) = self.reader.next_line() {
                return Ok(Some(line));
            }
            if !self.fill(deadline)? {
                return Ok(None);
            }
        }
    }

    /// Wait for a URC accepted by `pred`.
    ///
    /// URCs queued during earlier exchanges are considered first. Others
    /// arriving while waiting are queued.
    pub fn await_urc<F>(&mut self, mut pred: F, timeout: Duration) -> Result<Option<Urc>, TransportError>
    where
        F: FnMut(&Urc) -> bool,
    {
        if let Some(urc) = self.take_urc(&mut pred) {
            return Ok(Some(urc));
        }

        let deadline = Instant::now() + timeout;
        loop {
            while let Some(line) = self.reader.next_line() {
                if let Some(urc) = self.idle_line(&line) {
                    if pred(&urc) {
                        return Ok(Some(urc));
                    }
                    self.queue(urc);
                }
            }
            if !self.fill(deadline)? {
                return Ok(None);
            }
        }
    }

    /// Remove the oldest queued URC accepted by `pred`
    pub fn take_urc<F>(&mut self, mut pred: F) -> Option<Urc>
    where
        F: FnMut(&Urc) -> bool,
    {
        let mut found = None;
        for _ in 0..self.pending.len() {
            if let Some(urc) = self.pending.pop_front() {
                if found.is_none() && pred(&urc) {
                    found = Some(urc);
                } else {
                    // Cannot fail, the slot was just freed
                    let _ = self.pending.push_back(urc);
                }
            }
        }
        found
    }

    pub fn clear_urcs(&mut self) {
        self.pending.clear();
    }

    /// Process whatever the modem sent since the last call, without waiting.
    ///
    /// URCs are routed, anything else is stale output of an earlier exchange
    /// and is discarded.
    pub fn poll(&mut self) -> Result<(), TransportError> {
        loop {
            while let Some(line) = self.reader.next_line() {
                if let Some(urc) = self.idle_line(&line) {
                    self.queue(urc);
                }
            }
            if !self.fill(Instant::now())? {
                return Ok(());
            }
        }
    }

    fn exchange(&mut self, cmd: &Command<'_>) -> Outcome {
        let deadline = Instant::now() + cmd.timeout();
        let mut ex = Exchange::default();

        loop {
            if ex.raw_remaining > 0 {
                let mut chunk = [0u8; READ_CHUNK];
                let want = ex.raw_remaining.min(READ_CHUNK);
                let n = self.reader.take_raw(&mut chunk[..want]);
                if n > 0 {
                    ex.raw_remaining -= n;
                    if ex.failure.is_none() {
                        if let Err(e) = ex.response.push_raw(&chunk[..n]) {
                            ex.fail(e);
                        }
                    }
                    continue;
                }
            } else if let Some(line) = self.reader.next_line() {
                match self.exchange_line(cmd, &line, &mut ex) {
                    Ok(Some(FinalResult::Ok)) => {
                        return match ex.failure {
                            Some(e) => Outcome::Malformed(e),
                            None => Outcome::Succeeded(ex.response),
                        }
                    }
                    Ok(Some(FinalResult::Error(code))) => return Outcome::Failed(code),
                    Ok(None) => {}
                    Err(e) => return Outcome::TransportError(e),
                }
                continue;
            }

            match self.fill(deadline) {
                Ok(true) => {}
                Ok(false) => return Outcome::TimedOut,
                Err(e) => return Outcome::TransportError(e),
            }
        }
    }

    fn exchange_line(
        &mut self,
        cmd: &Command<'_>,
        line: &Line,
        ex: &mut Exchange,
    ) -> Result<Option<FinalResult>, TransportError> {
        if let Ok(text) = line.to_str() {
            trace!("[{}] <-- {}", self.table().name, text);
        }

        if let Some(prompt) = cmd.spec().prompt {
            if line.as_bytes() == prompt.as_bytes() {
                let payload = cmd.payload().unwrap_or_default();
                debug!("Prompt received, writing {} bytes", payload.len());
                self.transport.write(payload)?;
                return Ok(None);
            }
        }

        match self.parser.classify(line) {
            Ok(Some(ParsedEvent::FinalResult(result))) => return Ok(Some(result)),
            Ok(Some(ParsedEvent::IntermediateData(tokens))) => self.collect(cmd, tokens, ex),
            Ok(Some(ParsedEvent::UnsolicitedResult(urc))) => {
                self.router.dispatch(&urc);
                self.queue(urc);
            }
            Ok(Some(ParsedEvent::Echo)) | Ok(None) => {}
            // Keep reading up to the final result so it is not mistaken for
            // the result of the next exchange
            Err(e) => ex.fail(e),
        }
        Ok(None)
    }

    fn collect(&mut self, cmd: &Command<'_>, tokens: Tokens, ex: &mut Exchange) {
        if let Some(prefix) = cmd.spec().raw_prefix {
            if tokens.text().starts_with(prefix) {
                match tokens.field(0).and_then(|f| f.parse::<usize>().ok()) {
                    Some(n) => ex.raw_remaining = n,
                    None => ex.fail(ProtocolError::Malformed),
                }
            }
        }
        if ex.failure.is_none() {
            if let Err(e) = ex.response.push_line(tokens) {
                ex.fail(e);
            }
        }
    }

    /// Handle a line received outside of an exchange
    fn idle_line(&mut self, line: &Line) -> Option<Urc> {
        match self.parser.classify(line) {
            Ok(Some(ParsedEvent::UnsolicitedResult(urc))) => {
                trace!("[{}] <-- {}", self.table().name, urc.text());
                self.router.dispatch(&urc);
                Some(urc)
            }
            Ok(Some(event)) => {
                debug!("Discarding stale {:?}", event);
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Discarding undecodable line: {:?}", e);
                None
            }
        }
    }

    /// Keep `urc` for [`CommandChannel::take_urc`]. When the queue is full the
    /// oldest report is evicted; power and bearer status lines are kept
    /// unless nothing else is queued.
    fn queue(&mut self, urc: Urc) {
        if self.pending.is_full() {
            let table = self.table();
            let is_status = |u: &Urc| {
                let text = u.text();
                table.is_power_down(text)
                    || table.is_bearer_down(text)
                    || table.is_boot_start(text)
                    || table.is_boot_complete(text)
            };

            let mut evicted = false;
            for _ in 0..self.pending.len() {
                let Some(old) = self.pending.pop_front() else {
                    break;
                };
                if !evicted && !is_status(&old) {
                    debug!("URC queue full, dropping {}", old.text());
                    evicted = true;
                    continue;
                }
                // Cannot fail, the entry was just popped
                let _ = self.pending.push_back(old);
            }
            if !evicted {
                debug!("URC queue full of status lines, dropping oldest");
                self.pending.pop_front();
            }
        }
        // Cannot fail, a slot was freed above
        let _ = self.pending.push_back(urc);
    }

    /// Read more bytes into the line reader. `false` once `deadline` passed
    /// without data.
    fn fill(&mut self, deadline: Instant) -> Result<bool, TransportError> {
        let timeout = deadline.saturating_duration_since(Instant::now());
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.transport.read(&mut chunk, timeout)?;
        if n == 0 {
            return Ok(false);
        }

        self.last_activity = Instant::now();
        let taken = self.reader.push(&chunk[..n]);
        if taken < n {
            warn!("Line buffer full, dropping {} bytes", n - taken);
        }
        Ok(true)
    }

    fn record(&mut self, outcome: Outcome) -> Outcome {
        match outcome {
            Outcome::TimedOut => {
                self.health.consecutive_timeouts = self.health.consecutive_timeouts.saturating_add(1)
            }
            Outcome::TransportError(_) => self.health.transport_failed = true,
            _ => self.health.consecutive_timeouts = 0,
        }
        outcome
    }
}
