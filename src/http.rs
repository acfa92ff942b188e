//! One HTTP request over the modem's HTTP service.
//!
//! The service keeps a single session. It is terminated on every exit path,
//! a stale one left behind by an interrupted request is terminated first.

use embassy_time::Duration;
use heapless::Vec;

use crate::{
    channel::CommandChannel,
    command::{
        response::{Outcome, Response},
        Op, Param,
    },
    config::Config,
    error::{ErrorCode, ProtocolError, TransportError},
    lifecycle::{LifecycleError, ModemLifecycle},
    network::{AttachError, NetworkSession},
    pwr::PowerControl,
    transport::Transport,
    MAX_HTTP_BODY, MAX_PAYLOAD_LEN,
};

/// Bearer profile the HTTP service runs on
const HTTP_CID: i64 = 1;
/// Time the modem waits for the `HTTPDATA` payload, in milliseconds
const DATA_INPUT_TIME_MS: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum HttpMethod {
    Get = 0,
    Post = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HttpRequest<'a> {
    pub method: HttpMethod,
    pub url: &'a str,
    pub body: Option<&'a [u8]>,
    pub content_type: Option<&'a str>,
}

impl<'a> HttpRequest<'a> {
    pub fn get(url: &'a str) -> Self {
        Self {
            method: HttpMethod::Get,
            url,
            body: None,
            content_type: None,
        }
    }

    pub fn post(url: &'a str, body: &'a [u8]) -> Self {
        Self {
            method: HttpMethod::Post,
            url,
            body: Some(body),
            content_type: None,
        }
    }

    pub fn with_content_type(self, content_type: &'a str) -> Self {
        Self {
            content_type: Some(content_type),
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HttpResult {
    /// HTTP status, or a 6xx code for network errors reported by the modem
    pub status: u16,
    pub body: Vec<u8, MAX_HTTP_BODY>,
}

/// Where a transaction failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HttpStep {
    Ready,
    Attach,
    Init,
    Url,
    Body,
    Action,
    Status,
    Read,
    Cleanup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HttpCause {
    Timeout,
    Modem(ErrorCode),
    Protocol(ProtocolError),
    Lifecycle(LifecycleError),
    Attach(AttachError),
    /// The announced content does not fit the body buffer
    BodyOverflow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HttpError {
    Step { step: HttpStep, cause: HttpCause },
    Transport(TransportError),
}

impl HttpError {
    fn at(step: HttpStep, cause: HttpCause) -> Self {
        Self::Step { step, cause }
    }
}

fn check(step: HttpStep, outcome: Outcome) -> Result<Response, HttpError> {
    match outcome {
        Outcome::Succeeded(r) => Ok(r),
        Outcome::Failed(code) => Err(HttpError::at(step, HttpCause::Modem(code))),
        Outcome::TimedOut => Err(HttpError::at(step, HttpCause::Timeout)),
        Outcome::TransportError(e) => Err(HttpError::Transport(e)),
        Outcome::Malformed(e) => Err(HttpError::at(step, HttpCause::Protocol(e))),
    }
}

/// An initialised HTTP service, terminated when dropped.
struct ServiceGuard<'a, 'd, T: Transport> {
    ch: &'a mut CommandChannel<'d, T>,
    open: bool,
}

impl<'a, 'd, T: Transport> ServiceGuard<'a, 'd, T> {
    fn init(ch: &'a mut CommandChannel<'d, T>) -> Result<Self, HttpError> {
        check(HttpStep::Init, ch.send_op(Op::HttpInit))?;
        Ok(Self { ch, open: true })
    }

    fn close(mut self) -> Outcome {
        self.open = false;
        self.ch.send_op(Op::HttpTerm)
    }
}

impl<T: Transport> Drop for ServiceGuard<'_, '_, T> {
    fn drop(&mut self) {
        if self.open {
            let outcome = self.ch.send_op(Op::HttpTerm);
            if !outcome.is_success() {
                warn!("HTTP terminate failed: {:?}", outcome);
            }
        }
    }
}

pub struct HttpTransaction {
    action_timeout: Duration,
    read_chunk: usize,
}

impl HttpTransaction {
    pub fn new(config: &Config) -> Self {
        Self {
            action_timeout: config.http_action_timeout,
            read_chunk: config.http_read_chunk.clamp(1, MAX_PAYLOAD_LEN),
        }
    }

    /// Run `request`, bringing the modem up and attaching first if needed.
    pub fn execute<T, P>(
        &self,
        ch: &mut CommandChannel<'_, T>,
        lifecycle: &mut ModemLifecycle,
        session: &mut NetworkSession,
        power: &mut P,
        request: &HttpRequest<'_>,
    ) -> Result<HttpResult, HttpError>
    where
        T: Transport,
        P: PowerControl + ?Sized,
    {
        lifecycle.ensure_ready(ch, power).map_err(|e| match e {
            LifecycleError::Transport(e) => HttpError::Transport(e),
            e => HttpError::at(HttpStep::Ready, HttpCause::Lifecycle(e)),
        })?;
        session.sync_generation(lifecycle.generation());
        session.ensure_attached(ch).map_err(|e| match e {
            AttachError::Transport(e) => HttpError::Transport(e),
            e => HttpError::at(HttpStep::Attach, HttpCause::Attach(e)),
        })?;

        info!("HTTP {:?} {}", request.method, request.url);

        // A session left open makes HTTPINIT fail
        match ch.send_op(Op::HttpTerm) {
            Outcome::Succeeded(_) => debug!("Terminated stale HTTP session"),
            Outcome::Failed(_) => {}
            other => {
                check(HttpStep::Cleanup, other)?;
            }
        }

        let mut service = ServiceGuard::init(ch)?;
        let result = self.transfer(&mut service, request)?;

        let outcome = service.close();
        if !outcome.is_success() {
            warn!("HTTP terminate failed after transfer: {:?}", outcome);
        }

        info!("HTTP {} with {} bytes", result.status, result.body.len());
        Ok(result)
    }

    fn transfer<T: Transport>(
        &self,
        service: &mut ServiceGuard<'_, '_, T>,
        request: &HttpRequest<'_>,
    ) -> Result<HttpResult, HttpError> {
        let ch = &mut *service.ch;
        let table = ch.table();
        let cmd = |op| table.command(op).map_err(|e| HttpError::at(HttpStep::Init, HttpCause::Protocol(e)));

        let params = [Param::Str("CID"), Param::Int(HTTP_CID)];
        check(HttpStep::Url, ch.send(&cmd(Op::HttpPara)?.with_params(&params)))?;
        let params = [Param::Str("URL"), Param::Str(request.url)];
        check(HttpStep::Url, ch.send(&cmd(Op::HttpPara)?.with_params(&params)))?;

        if request.method == HttpMethod::Post {
            if let Some(content_type) = request.content_type {
                let params = [Param::Str("CONTENT"), Param::Str(content_type)];
                check(HttpStep::Body, ch.send(&cmd(Op::HttpPara)?.with_params(&params)))?;
            }
            match request.body {
                Some(body) if !body.is_empty() => {
                    let params = [Param::Int(body.len() as i64), Param::Int(DATA_INPUT_TIME_MS)];
                    let data = cmd(Op::HttpData)?.with_params(&params).with_payload(body);
                    check(HttpStep::Body, ch.send(&data))?;
                }
                _ => {}
            }
        }

        // A result left over from an abandoned request must not answer this one
        while let Some(stale) = ch.take_urc(|u| u.topic == table.http_action) {
            warn!("Discarding stale HTTP result: {}", stale.text());
        }

        let params = [Param::Int(request.method as i64)];
        check(HttpStep::Action, ch.send(&cmd(Op::HttpAction)?.with_params(&params)))?;

        let urc = ch
            .await_urc(|u| u.topic == table.http_action, self.action_timeout)
            .map_err(HttpError::Transport)?
            .ok_or(HttpError::at(HttpStep::Action, HttpCause::Timeout))?;
        debug!("HTTP action done: {}", urc.text());

        let status_error = |e| HttpError::at(HttpStep::Status, HttpCause::Protocol(e));
        let status = urc
            .payload
            .field_u32(1)
            .and_then(|s| u16::try_from(s).map_err(|_| ProtocolError::Malformed))
            .map_err(status_error)?;
        let length = urc.payload.field_u32(2).map_err(status_error)? as usize;

        if length > MAX_HTTP_BODY {
            error!("HTTP body of {} bytes does not fit", length);
            return Err(HttpError::at(HttpStep::Read, HttpCause::BodyOverflow));
        }

        let mut body = Vec::new();
        while body.len() < length {
            let want = (length - body.len()).min(self.read_chunk);
            let params = [Param::Int(body.len() as i64), Param::Int(want as i64)];
            let response = check(HttpStep::Read, ch.send(&cmd(Op::HttpRead)?.with_params(&params)))?;

            let chunk = response.raw();
            if chunk.is_empty() {
                warn!("HTTP read returned no data at offset {}", body.len());
                return Err(HttpError::at(HttpStep::Read, HttpCause::Protocol(ProtocolError::Malformed)));
            }
            body.extend_from_slice(chunk)
                .map_err(|_| HttpError::at(HttpStep::Read, HttpCause::BodyOverflow))?;
        }

        Ok(HttpResult { status, body })
    }
}
