use embassy_time::Duration;
use embedded_hal::digital::{ErrorType, OutputPin, PinState};

use crate::module_timing;

/// Output pin adapter for boards where the power key is driven through an
/// inverting transistor stage.
pub struct ReverseOutputPin<P: OutputPin>(pub P);

impl<P: OutputPin> ErrorType for ReverseOutputPin<P> {
    type Error = P::Error;
}

impl<P: OutputPin> OutputPin for ReverseOutputPin<P> {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.0.set_high()
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.0.set_low()
    }

    fn set_state(&mut self, state: PinState) -> Result<(), Self::Error> {
        match state {
            PinState::Low => self.0.set_state(PinState::High),
            PinState::High => self.0.set_state(PinState::Low),
        }
    }
}

/// Whether command echo lines are expected on the AT interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EchoMode {
    /// The module echoes commands (`ATE1`, factory default)
    #[default]
    Expect,
    /// Echo is switched off, a line equal to the command is response data
    Suppressed,
}

/// What to do with unsolicited result codes while nobody is subscribed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UrcPolicy {
    #[default]
    Drop,
    /// Keep a bounded backlog, handed to the first subscriber
    Buffer,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) echo: EchoMode,
    pub(crate) urc_policy: UrcPolicy,

    pub(crate) probe_timeout: Duration,
    pub(crate) probe_attempts: u8,
    pub(crate) boot_start_wait: Duration,
    pub(crate) boot_complete_wait: Duration,
    pub(crate) power_down_wait: Duration,
    pub(crate) max_recovery_attempts: u8,
    pub(crate) max_consecutive_timeouts: u8,

    pub(crate) attach_poll_interval: Duration,
    pub(crate) attach_max_wait: Duration,

    pub(crate) http_action_timeout: Duration,
    pub(crate) http_read_chunk: usize,

    pub(crate) health_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Config {
            echo: EchoMode::Expect,
            urc_policy: UrcPolicy::Drop,
            probe_timeout: module_timing::probe_timeout(),
            probe_attempts: 3,
            boot_start_wait: module_timing::boot_start_wait(),
            boot_complete_wait: module_timing::boot_complete_wait(),
            power_down_wait: module_timing::power_down_wait(),
            max_recovery_attempts: 3,
            max_consecutive_timeouts: 10,
            attach_poll_interval: module_timing::attach_poll_interval(),
            attach_max_wait: module_timing::attach_max_wait(),
            http_action_timeout: module_timing::http_action_timeout(),
            http_read_chunk: crate::MAX_PAYLOAD_LEN,
            health_interval: module_timing::health_interval(),
        }
    }

    pub fn with_echo(self, echo: EchoMode) -> Self {
        Config { echo, ..self }
    }

    pub fn with_urc_policy(self, urc_policy: UrcPolicy) -> Self {
        Config { urc_policy, ..self }
    }

    /// Number of `AT` probes, each bounded by `timeout`, before the module is
    /// considered switched off
    pub fn with_probe(self, timeout: Duration, attempts: u8) -> Self {
        Config {
            probe_timeout: timeout,
            probe_attempts: attempts.max(1),
            ..self
        }
    }

    pub fn with_boot_wait(self, start: Duration, complete: Duration) -> Self {
        Config {
            boot_start_wait: start,
            boot_complete_wait: complete,
            ..self
        }
    }

    pub fn with_power_down_wait(self, power_down_wait: Duration) -> Self {
        Config {
            power_down_wait,
            ..self
        }
    }

    pub fn with_max_recovery_attempts(self, max_recovery_attempts: u8) -> Self {
        Config {
            max_recovery_attempts,
            ..self
        }
    }

    pub fn with_max_consecutive_timeouts(self, max_consecutive_timeouts: u8) -> Self {
        Config {
            max_consecutive_timeouts: max_consecutive_timeouts.max(1),
            ..self
        }
    }

    pub fn with_attach_timing(self, poll_interval: Duration, max_wait: Duration) -> Self {
        Config {
            attach_poll_interval: poll_interval,
            attach_max_wait: max_wait,
            ..self
        }
    }

    pub fn with_http_action_timeout(self, http_action_timeout: Duration) -> Self {
        Config {
            http_action_timeout,
            ..self
        }
    }

    /// Size of a single `AT+HTTPREAD` chunk, capped by the payload buffer
    pub fn with_http_read_chunk(self, chunk: usize) -> Self {
        Config {
            http_read_chunk: chunk.clamp(1, crate::MAX_PAYLOAD_LEN),
            ..self
        }
    }

    pub fn with_health_interval(self, health_interval: Duration) -> Self {
        Config {
            health_interval,
            ..self
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_helpers::MockPin;

    #[test]
    fn reverse_output_pin_inverts() {
        let mut pin = ReverseOutputPin(MockPin::default());
        pin.set_low().unwrap();
        assert_eq!(pin.0.levels(), vec![true]);
        pin.set_state(PinState::Low).unwrap();
        pin.set_high().unwrap();
        assert_eq!(pin.0.levels(), vec![true, true, false]);
    }

    #[test]
    fn builder_clamps_values() {
        let config = Config::new()
            .with_probe(Duration::from_millis(10), 0)
            .with_http_read_chunk(100_000)
            .with_max_consecutive_timeouts(0);

        assert_eq!(config.probe_attempts, 1);
        assert_eq!(config.http_read_chunk, crate::MAX_PAYLOAD_LEN);
        assert_eq!(config.max_consecutive_timeouts, 1);
        assert_eq!(config.echo, EchoMode::Expect);
    }
}
