//! Scripted stand-ins for the modem and the board, shared by the unit tests.
//!
//! Time does not pass on the mock link: a read with nothing queued returns
//! immediately as if its timeout had elapsed.

use core::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::string::String;
use std::vec::Vec;

use embassy_time::Duration;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorKind, ErrorType, OutputPin};

use crate::{error::TransportError, pwr::PowerControl, transport::Transport};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Default)]
struct Link {
    replies: VecDeque<(String, Vec<u8>)>,
    always: Vec<(String, Vec<u8>)>,
    rx: VecDeque<u8>,
    writes: Vec<String>,
    failure: Option<TransportError>,
}

/// Modem answering writes from a script.
///
/// Every write is looked up by its text without the trailing `\r`. One-shot
/// replies are used in the order they were added, then standing replies.
/// Writes without a reply are recorded and answered with silence.
#[derive(Clone, Default)]
pub struct MockTransport(Rc<RefCell<Link>>);

impl MockTransport {
    pub fn new() -> Self {
        init_logger();
        Self::default()
    }

    /// Answer the next write of `cmd` with `reply`
    pub fn expect(&self, cmd: &str, reply: &str) {
        self.expect_bytes(cmd, reply.as_bytes());
    }

    pub fn expect_bytes(&self, cmd: &str, reply: &[u8]) {
        self.0
            .borrow_mut()
            .replies
            .push_back((cmd.into(), reply.to_vec()));
    }

    /// Answer every write of `cmd` with `reply` once the one-shot replies
    /// for it are used up
    pub fn always(&self, cmd: &str, reply: &str) {
        self.0
            .borrow_mut()
            .always
            .push((cmd.into(), reply.as_bytes().to_vec()));
    }

    /// Make `text` readable as if the modem sent it unprompted
    pub fn push_rx(&self, text: &str) {
        self.0.borrow_mut().rx.extend(text.bytes());
    }

    pub fn writes(&self) -> Vec<String> {
        self.0.borrow().writes.clone()
    }

    /// Fail every read and write with `e` until [`MockTransport::recover`]
    pub fn fail_with(&self, e: TransportError) {
        self.0.borrow_mut().failure = Some(e);
    }

    pub fn recover(&self) {
        self.0.borrow_mut().failure = None;
    }
}

impl Transport for MockTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut link = self.0.borrow_mut();
        if let Some(e) = link.failure {
            return Err(e);
        }

        let text = String::from_utf8_lossy(bytes).into_owned();
        let key = text.trim_end_matches('\r');

        let reply = match link.replies.iter().position(|(cmd, _)| cmd == key) {
            Some(i) => link.replies.remove(i).map(|(_, reply)| reply),
            None => link
                .always
                .iter()
                .find(|(cmd, _)| cmd == key)
                .map(|(_, reply)| reply.clone()),
        };
        if let Some(reply) = reply {
            link.rx.extend(reply);
        }

        link.writes.push(text);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize, TransportError> {
        let mut link = self.0.borrow_mut();
        if let Some(e) = link.failure {
            return Err(e);
        }

        let n = buf.len().min(link.rx.len());
        for (slot, byte) in buf.iter_mut().zip(link.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

/// Power key that only counts toggles, optionally scripting the modem's
/// reaction to each one.
#[derive(Clone, Default)]
pub struct MockPower {
    toggles: Rc<Cell<usize>>,
    on_toggle: Option<Rc<RefCell<dyn FnMut(usize)>>>,
}

impl MockPower {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with the toggle count after every toggle
    pub fn on_toggle(self, f: impl FnMut(usize) + 'static) -> Self {
        Self {
            on_toggle: Some(Rc::new(RefCell::new(f))),
            ..self
        }
    }

    pub fn toggles(&self) -> usize {
        self.toggles.get()
    }
}

impl PowerControl for MockPower {
    fn toggle_power(&mut self) -> Result<(), TransportError> {
        let n = self.toggles.get() + 1;
        self.toggles.set(n);
        if let Some(f) = &self.on_toggle {
            (f.borrow_mut())(n);
        }
        Ok(())
    }
}

/// Output pin recording every level driven onto it
#[derive(Default)]
pub struct MockPin {
    levels: Vec<bool>,
    fail: bool,
}

impl MockPin {
    pub fn failing() -> Self {
        Self {
            levels: Vec::new(),
            fail: true,
        }
    }

    pub fn levels(&self) -> Vec<bool> {
        self.levels.clone()
    }

    fn drive(&mut self, high: bool) -> Result<(), ErrorKind> {
        if self.fail {
            return Err(ErrorKind::Other);
        }
        self.levels.push(high);
        Ok(())
    }
}

impl ErrorType for MockPin {
    type Error = ErrorKind;
}

impl OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.drive(false)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.drive(true)
    }
}

/// Delay that returns at once and adds up what was requested
#[derive(Default)]
pub struct MockDelay {
    total_ns: u64,
}

impl MockDelay {
    pub fn total_ms(&self) -> u64 {
        self.total_ns / 1_000_000
    }
}

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += u64::from(ns);
    }

    fn delay_us(&mut self, us: u32) {
        self.total_ns += u64::from(us) * 1_000;
    }

    fn delay_ms(&mut self, ms: u32) {
        self.total_ns += u64::from(ms) * 1_000_000;
    }
}
