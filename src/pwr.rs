use embassy_time::Duration;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

use crate::{error::TransportError, module_timing};

/// Side channel able to switch the module on or off.
///
/// The effect of a toggle is only observable through the line traffic that
/// follows it, the lifecycle never assumes the resulting power state.
pub trait PowerControl {
    fn toggle_power(&mut self) -> Result<(), TransportError>;
}

impl<P: PowerControl + ?Sized> PowerControl for &mut P {
    fn toggle_power(&mut self) -> Result<(), TransportError> {
        P::toggle_power(self)
    }
}

/// Power key driven by a GPIO, pulsed low for `pulse` on every toggle.
pub struct PwrKey<P, D> {
    pin: P,
    delay: D,
    pulse: Duration,
}

impl<P, D> PwrKey<P, D>
where
    P: OutputPin,
    D: DelayNs,
{
    pub fn new(pin: P, delay: D) -> Self {
        Self {
            pin,
            delay,
            pulse: module_timing::pwr_key_pulse(),
        }
    }

    pub fn with_pulse(self, pulse: Duration) -> Self {
        Self { pulse, ..self }
    }

    pub fn release(self) -> (P, D) {
        (self.pin, self.delay)
    }
}

impl<P, D> PowerControl for PwrKey<P, D>
where
    P: OutputPin,
    D: DelayNs,
{
    fn toggle_power(&mut self) -> Result<(), TransportError> {
        warn!("Toggling modem power key");
        self.pin.set_low().map_err(|_| TransportError::PowerPin)?;
        self.delay
            .delay_ms(self.pulse.as_millis().try_into().unwrap_or(u32::MAX));
        self.pin.set_high().map_err(|_| TransportError::PowerPin)?;
        Ok(())
    }
}
