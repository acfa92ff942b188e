//! Declarative AT command tables.
//!
//! A [`CommandTable`] describes one AT dialect: the table wide result tokens,
//! the URC prefixes and, per logical [`Op`], how the command is spelled and
//! how long it may take. The engine never hardcodes command text, swapping
//! the table is enough to talk to another module family.

pub mod response;
pub mod sim868;

use core::fmt::Write as _;

use embassy_time::Duration;
use heapless::String;

use crate::{error::ProtocolError, MAX_COMMAND_LEN};

/// Logical operations the engine knows how to issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Op {
    /// Plain `AT`, used to check that the module answers
    Probe,
    Imei,
    EchoOff,
    /// Numeric `+CME ERROR` reporting
    ReportErrors,
    PowerDown,
    GprsAttach,
    BearerSet,
    BearerOpen,
    BearerQuery,
    BearerClose,
    HttpInit,
    HttpTerm,
    HttpPara,
    HttpData,
    HttpAction,
    HttpRead,
    GnssPower,
    GnssUrc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Form {
    /// `AT<verb>`
    Execute,
    /// `AT<verb>=<params>`
    Set,
    /// `AT<verb>?`
    Read,
    /// `AT<verb>=?`
    Test,
}

impl Form {
    const fn suffix(self) -> &'static str {
        match self {
            Form::Execute => "",
            Form::Set => "=",
            Form::Read => "?",
            Form::Test => "=?",
        }
    }
}

/// How the code of an error result is carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorClass {
    /// The line must equal the token
    Plain,
    /// `<token> <n>`, numeric or verbose mobile equipment error
    Cme,
    /// `<token> <n>`, numeric or verbose message service error
    Cms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorPattern {
    pub token: &'static str,
    pub class: ErrorClass,
}

/// Table entry for one logical operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub op: Op,
    /// Text following `AT`, e.g. `+SAPBR` or `E0`
    pub verb: &'static str,
    pub form: Form,
    /// Terminal success tokens accepted in addition to the table wide ones
    pub ok: &'static [&'static str],
    pub timeout: Duration,
    /// The module echoes this command when echo is on
    pub echo: bool,
    /// Line after which the command payload is written (`DOWNLOAD`)
    pub prompt: Option<&'static str>,
    /// Line announcing `<n>` raw bytes that follow it (`+HTTPREAD:`)
    pub raw_prefix: Option<&'static str>,
}

impl CommandSpec {
    /// Entry with no extra tokens, echoed, without prompt or raw data
    pub const fn new(op: Op, verb: &'static str, form: Form, timeout: Duration) -> Self {
        Self {
            op,
            verb,
            form,
            ok: &[],
            timeout,
            echo: true,
            prompt: None,
            raw_prefix: None,
        }
    }

    pub const fn with_ok(self, ok: &'static [&'static str]) -> Self {
        Self { ok, ..self }
    }

    pub const fn with_prompt(self, prompt: &'static str) -> Self {
        Self {
            prompt: Some(prompt),
            ..self
        }
    }

    pub const fn with_raw_prefix(self, raw_prefix: &'static str) -> Self {
        Self {
            raw_prefix: Some(raw_prefix),
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTable {
    pub name: &'static str,
    /// Final success result, `OK`
    pub ok: &'static [&'static str],
    pub errors: &'static [ErrorPattern],
    /// Prefixes of unsolicited result codes, the matching prefix is the topic
    pub urcs: &'static [&'static str],
    /// Lines the module prints when it starts booting
    pub boot_start: &'static [&'static str],
    /// Lines marking that the module finished booting
    pub boot_complete: &'static [&'static str],
    /// Lines the module prints right before switching itself off
    pub power_down: &'static [&'static str],
    /// Lines reporting that the packet data bearer was closed by the network
    pub bearer_down: &'static [&'static str],
    /// URC reporting completion of an HTTP action
    pub http_action: &'static str,
    /// URC carrying a periodic GNSS navigation report
    pub gnss_report: &'static str,
    /// Field delimiter of responses
    pub delimiter: char,
    /// Appended to every command
    pub terminator: &'static str,
    pub commands: &'static [CommandSpec],
}

impl CommandTable {
    pub fn spec(&self, op: Op) -> Result<&'static CommandSpec, ProtocolError> {
        self.commands
            .iter()
            .find(|c| c.op == op)
            .ok_or(ProtocolError::Unsupported(op))
    }

    /// Unparameterised command for `op`
    pub fn command(&self, op: Op) -> Result<Command<'static>, ProtocolError> {
        self.spec(op).map(Command::new)
    }

    pub fn urc_topic(&self, line: &str) -> Option<&'static str> {
        self.urcs.iter().copied().find(|p| line.starts_with(p))
    }

    pub fn is_boot_start(&self, line: &str) -> bool {
        self.boot_start.iter().any(|t| line.starts_with(t))
    }

    pub fn is_boot_complete(&self, line: &str) -> bool {
        self.boot_complete.iter().any(|t| line.starts_with(t))
    }

    pub fn is_power_down(&self, line: &str) -> bool {
        self.power_down.iter().any(|t| line.starts_with(t))
    }

    pub fn is_bearer_down(&self, line: &str) -> bool {
        self.bearer_down.iter().any(|t| line.starts_with(t))
    }

    /// Check the table for entries the parser could not classify.
    ///
    /// Status lines (boot and power down) must also be URCs, otherwise they
    /// would be taken for response data. No URC may shadow a result token.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let tokens_ok = !self.ok.is_empty()
            && self.ok.iter().all(|t| !t.is_empty())
            && !self.errors.is_empty()
            && self.errors.iter().all(|e| !e.token.is_empty())
            && self.urcs.iter().all(|u| !u.is_empty())
            && !self.terminator.is_empty();
        if !tokens_ok {
            return Err(ProtocolError::InvalidTable);
        }

        let status_lines = self
            .boot_start
            .iter()
            .chain(self.boot_complete)
            .chain(self.power_down)
            .chain(self.bearer_down)
            .chain([&self.http_action, &self.gnss_report]);
        for line in status_lines {
            if self.urc_topic(line).is_none() {
                error!("[{}] status line {} is not a URC", self.name, line);
                return Err(ProtocolError::InvalidTable);
            }
        }

        let results = self.ok.iter().chain(self.errors.iter().map(|e| &e.token));
        for token in results {
            if self.urc_topic(token).is_some() {
                error!("[{}] result token {} shadowed by a URC", self.name, token);
                return Err(ProtocolError::InvalidTable);
            }
        }

        for (i, spec) in self.commands.iter().enumerate() {
            let duplicate = self.commands[..i].iter().any(|c| c.op == spec.op);
            if duplicate || spec.timeout == Duration::from_ticks(0) {
                error!("[{}] invalid entry for {:?}", self.name, spec.op);
                return Err(ProtocolError::InvalidTable);
            }
        }

        Ok(())
    }
}

/// Parameter of a `Set` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param<'a> {
    Int(i64),
    /// Written quoted
    Str(&'a str),
    /// Written as is
    Raw(&'a str),
}

/// A command ready to be issued. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command<'a> {
    spec: &'static CommandSpec,
    params: &'a [Param<'a>],
    payload: Option<&'a [u8]>,
    timeout: Duration,
}

impl<'a> Command<'a> {
    pub fn new(spec: &'static CommandSpec) -> Self {
        Self {
            spec,
            params: &[],
            payload: None,
            timeout: spec.timeout,
        }
    }

    pub fn with_params(self, params: &'a [Param<'a>]) -> Self {
        Self { params, ..self }
    }

    /// Data written once the command prompt has been received
    pub fn with_payload(self, payload: &'a [u8]) -> Self {
        Self {
            payload: Some(payload),
            ..self
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    pub fn spec(&self) -> &'static CommandSpec {
        self.spec
    }

    pub fn op(&self) -> Op {
        self.spec.op
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn payload(&self) -> Option<&'a [u8]> {
        self.payload
    }

    /// Command text without the terminator, e.g. `AT+SAPBR=3,1,"APN","internet"`
    pub fn encode(&self) -> Result<String<MAX_COMMAND_LEN>, ProtocolError> {
        let mut s = String::new();
        write!(s, "AT{}{}", self.spec.verb, self.spec.form.suffix())
            .map_err(|_| ProtocolError::CommandOverflow)?;

        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                s.push(',').map_err(|_| ProtocolError::CommandOverflow)?;
            }
            match param {
                Param::Int(v) => write!(s, "{}", v),
                Param::Str(v) => {
                    if v.chars().any(|c| c == '"' || c.is_control()) {
                        return Err(ProtocolError::InvalidParameter);
                    }
                    write!(s, "\"{}\"", v)
                }
                Param::Raw(v) => s.push_str(v).map_err(|_| core::fmt::Error),
            }
            .map_err(|_| ProtocolError::CommandOverflow)?;
        }

        Ok(s)
    }
}
