#![cfg_attr(not(test), no_std)]

//! # SIMCom cellular
//!
//! Blocking driver for SIMCom GSM/GPRS/GNSS modules (SIM868, SIM800) talking
//! over the AT command interface. It can be used both on `no_std` and `std`
//! platforms.
//!
//! The crate is layered bottom-up:
//!
//! - [`line_reader::LineReader`] turns the byte stream into lines
//! - [`parser::ResponseParser`] classifies lines against a
//!   [`command::CommandTable`]
//! - [`channel::CommandChannel`] runs one exchange at a time and routes
//!   unsolicited result codes
//! - [`lifecycle::ModemLifecycle`], [`network::NetworkSession`] and
//!   [`http::HttpTransaction`] drive the modem, the GPRS bearer and HTTP
//! - [`client::Device`] ties them together behind a small API
//!
//! ## Features
//!
//! By default `sim868` and `log` are enabled. Use `defmt` instead of `log` on
//! targets that log over RTT:
//!
//! ```toml
//! simcom-cellular-rs = { version = "0.1", default-features = false, features = ["sim868", "defmt"] }
//! ```

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod channel;
pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod gnss;
pub mod http;
pub mod lifecycle;
pub mod line_reader;
mod module_timing;
pub mod network;
pub mod parser;
pub mod pwr;
pub mod transport;
pub mod urc;

#[cfg(test)]
mod test_helpers;

pub use client::Device;
pub use command::sim868::SIM868;
pub use config::{Config, EchoMode, UrcPolicy};
pub use error::{Error, ErrorCode, ProtocolError, TransportError};
pub use http::{HttpMethod, HttpRequest, HttpResult};
pub use lifecycle::ModemState;
pub use network::{NetworkConfig, SessionStatus};
pub use pwr::{PowerControl, PwrKey};
pub use transport::{IoTransport, Transport};

pub use embassy_time::Duration;
pub use heapless;

/// Longest line kept by the line reader, longer lines are split
pub const MAX_LINE_LEN: usize = 256;
/// Bytes buffered between the transport and the line reader
pub const INGRESS_BUF_SIZE: usize = 1024;
/// Size of a single transport read
pub const READ_CHUNK: usize = 128;
/// Longest encoded command, without the terminator
pub const MAX_COMMAND_LEN: usize = 256;
/// Intermediate lines kept per response
pub const MAX_RESPONSE_LINES: usize = 8;
/// Largest raw payload captured in a single exchange
pub const MAX_PAYLOAD_LEN: usize = 512;
/// Largest HTTP body returned to the caller
pub const MAX_HTTP_BODY: usize = 2048;
/// Unsolicited result codes queued for the session between exchanges
pub const PENDING_URCS: usize = 8;
/// Registered URC subscribers
pub const MAX_SUBSCRIBERS: usize = 4;
/// URCs kept for a late subscriber under [`UrcPolicy::Buffer`]
pub const URC_BACKLOG: usize = 8;
