//! Byte channel to the modem.
//!
//! The engine only needs to write bytes and to read whatever arrives within a
//! bounded time. Anything implementing the blocking `embedded-io` traits can
//! be used through [`IoTransport`].

use embassy_time::{block_for, Duration, Instant};
use embedded_io::{Read, ReadReady, Write};

use crate::error::TransportError;

pub trait Transport {
    /// Write all of `bytes` to the modem
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Block until at least one byte is available or `timeout` has elapsed.
    ///
    /// Returns `Ok(0)` only once the timeout has elapsed without data.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        T::write(self, bytes)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        T::read(self, buf, timeout)
    }
}

fn io_error<E: embedded_io::Error>(e: E) -> TransportError {
    TransportError::Io(e.kind())
}

/// [`Transport`] over a blocking serial port, polling `ReadReady` until the
/// read deadline.
pub struct IoTransport<S> {
    serial: S,
    poll_interval: Duration,
}

impl<S> IoTransport<S>
where
    S: Read + Write + ReadReady,
{
    pub fn new(serial: S) -> Self {
        Self {
            serial,
            poll_interval: Duration::from_millis(5),
        }
    }

    pub fn with_poll_interval(self, poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            ..self
        }
    }

    pub fn release(self) -> S {
        self.serial
    }
}

impl<S> Transport for IoTransport<S>
where
    S: Read + Write + ReadReady,
{
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.serial.write_all(bytes).map_err(io_error)?;
        self.serial.flush().map_err(io_error)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.serial.read_ready().map_err(io_error)? {
                return match self.serial.read(buf).map_err(io_error)? {
                    0 => Err(TransportError::Closed),
                    n => Ok(n),
                };
            }

            if Instant::now() >= deadline {
                return Ok(0);
            }
            block_for(self.poll_interval);
        }
    }
}
