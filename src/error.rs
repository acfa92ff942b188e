use heapless::String;

use crate::command::Op;
use crate::http::HttpError;
use crate::lifecycle::LifecycleError;
use crate::network::AttachError;

/// Maximum length of a textual error reported by the modem
pub const MAX_ERROR_TEXT: usize = 32;

/// I/O failure on the physical channel to the modem.
///
/// Fatal to the operation in progress and never retried by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    Io(embedded_io::ErrorKind),
    /// The serial port was closed underneath the driver
    Closed,
    /// The power key line could not be driven
    PowerPin,
}

/// A line or command that could not be handled against the command table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    InvalidUtf8,
    /// The encoded command does not fit the command buffer
    CommandOverflow,
    /// A string parameter contains a character that cannot be quoted
    InvalidParameter,
    /// More intermediate lines than a response can hold
    ResponseOverflow,
    /// A raw payload larger than announced or than the payload buffer
    PayloadOverflow,
    /// A response line did not have the expected shape
    Malformed,
    /// The command table has no entry for the operation
    Unsupported(Op),
    /// A command table entry is inconsistent
    InvalidTable,
}

/// Error result reported by the modem itself, e.g. `+CME ERROR: 3`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorCode {
    /// Plain `ERROR` without further detail
    Unknown,
    Cme(u16),
    Cms(u16),
    /// Verbose (`AT+CMEE=2`) or otherwise non-numeric error text
    Text(String<MAX_ERROR_TEXT>),
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    // Single exchange errors
    Transport(TransportError),
    Timeout,
    Modem(ErrorCode),
    Protocol(ProtocolError),

    // Component errors
    Lifecycle(LifecycleError),
    Attach(AttachError),
    Http(HttpError),

    SubscriberOverflow,
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl From<LifecycleError> for Error {
    fn from(e: LifecycleError) -> Self {
        // Unwrap transport errors
        match e {
            LifecycleError::Transport(t) => Self::Transport(t),
            _ => Self::Lifecycle(e),
        }
    }
}

impl From<AttachError> for Error {
    fn from(e: AttachError) -> Self {
        match e {
            AttachError::Transport(t) => Self::Transport(t),
            _ => Self::Attach(e),
        }
    }
}

impl From<HttpError> for Error {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Transport(t) => Self::Transport(t),
            _ => Self::Http(e),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::http::{HttpCause, HttpStep};

    #[test]
    fn transport_errors_are_unwrapped() {
        let e: Error = LifecycleError::Transport(TransportError::Closed).into();
        assert_eq!(e, Error::Transport(TransportError::Closed));

        let e: Error = HttpError::Transport(TransportError::PowerPin).into();
        assert_eq!(e, Error::Transport(TransportError::PowerPin));

        let e: Error = AttachError::Timeout.into();
        assert_eq!(e, Error::Attach(AttachError::Timeout));

        let e: Error = HttpError::Step {
            step: HttpStep::Action,
            cause: HttpCause::Timeout,
        }
        .into();
        assert!(matches!(e, Error::Http(HttpError::Step { .. })));
    }
}
