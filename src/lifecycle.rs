//! Power and readiness state machine of the modem.
//!
//! ```text
//! PowerUnknown --probe answered--> Ready
//! PowerUnknown --probe silent, toggle--> PoweringOn
//! PoweringOn --boot line or probe answered--> Booting
//! PoweringOn --silent--> Unresponsive
//! Booting --boot complete or probe answered--> Ready
//! Booting --silent--> Unresponsive
//! Ready --timeouts, transport failure, power down--> Unresponsive
//! Unresponsive --toggle--> PoweringOn
//! Ready | Unresponsive --shutdown--> PoweringDown --> PowerUnknown
//! ```
//!
//! Every transition is caused by an observed event. The power toggle is the
//! only recovery action.

use embassy_time::Duration;

use crate::{
    channel::CommandChannel,
    command::{response::Outcome, Op, Param},
    config::Config,
    error::{ProtocolError, TransportError},
    pwr::PowerControl,
    transport::Transport,
    urc::Urc,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModemState {
    PowerUnknown,
    PoweringOn,
    Booting,
    Ready,
    Unresponsive,
    PoweringDown,
}

impl ModemState {
    fn can_become(self, to: ModemState) -> bool {
        use ModemState::*;
        matches!(
            (self, to),
            (PowerUnknown, Ready)
                | (PowerUnknown, PoweringOn)
                | (PoweringOn, Booting)
                | (PoweringOn, Unresponsive)
                | (Booting, Ready)
                | (Booting, Unresponsive)
                | (Ready, Unresponsive)
                | (Ready, PoweringDown)
                | (Unresponsive, PoweringOn)
                | (Unresponsive, PoweringDown)
                | (PoweringDown, PowerUnknown)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LifecycleError {
    /// The modem did not come up within the allowed power re-toggles
    Unrecoverable,
    Transport(TransportError),
    /// The command table has no usable probe or power down command
    Protocol(ProtocolError),
    InvalidTransition { from: ModemState, to: ModemState },
}

impl From<TransportError> for LifecycleError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<ProtocolError> for LifecycleError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

pub struct ModemLifecycle {
    state: ModemState,
    generation: u32,
    recoveries: u8,

    probe_timeout: Duration,
    probe_attempts: u8,
    boot_start_wait: Duration,
    boot_complete_wait: Duration,
    power_down_wait: Duration,
    max_recovery_attempts: u8,
    max_consecutive_timeouts: u8,
}

impl ModemLifecycle {
    pub fn new(config: &Config) -> Self {
        Self {
            state: ModemState::PowerUnknown,
            generation: 0,
            recoveries: 0,
            probe_timeout: config.probe_timeout,
            probe_attempts: config.probe_attempts,
            boot_start_wait: config.boot_start_wait,
            boot_complete_wait: config.boot_complete_wait,
            power_down_wait: config.power_down_wait,
            max_recovery_attempts: config.max_recovery_attempts,
            max_consecutive_timeouts: config.max_consecutive_timeouts,
        }
    }

    pub fn state(&self) -> ModemState {
        self.state
    }

    /// Incremented whenever the modem may have lost its volatile state
    /// (power toggle or shutdown).
    pub fn generation(&self) -> u32 {
        self.generation
    }

    fn transition(&mut self, to: ModemState) -> Result<(), LifecycleError> {
        let from = self.state;
        if !from.can_become(to) {
            error!("Invalid modem state transition {:?} -> {:?}", from, to);
            return Err(LifecycleError::InvalidTransition { from, to });
        }
        debug!("Modem state {:?} -> {:?}", from, to);
        self.state = to;
        Ok(())
    }

    /// Drive the state machine until the modem answers.
    ///
    /// Gives up with [`LifecycleError::Unrecoverable`] once the configured
    /// number of power re-toggles has been spent in this call.
    pub fn ensure_ready<T, P>(
        &mut self,
        ch: &mut CommandChannel<'_, T>,
        power: &mut P,
    ) -> Result<(), LifecycleError>
    where
        T: Transport,
        P: PowerControl + ?Sized,
    {
        self.recoveries = 0;
        loop {
            match self.state {
                ModemState::Ready => return Ok(()),
                ModemState::PowerUnknown => {
                    if self.probe(ch)? {
                        self.become_ready(ch)?;
                    } else {
                        info!("Modem not answering, switching it on");
                        self.toggle(ch, power)?;
                        self.transition(ModemState::PoweringOn)?;
                    }
                }
                ModemState::PoweringOn => self.await_boot_start(ch, power)?,
                ModemState::Booting => self.await_boot_complete(ch)?,
                ModemState::Unresponsive => {
                    self.spend_recovery()?;
                    self.toggle(ch, power)?;
                    self.transition(ModemState::PoweringOn)?;
                }
                // A shutdown was interrupted, nothing is known about the modem
                ModemState::PoweringDown => self.transition(ModemState::PowerUnknown)?,
            }
        }
    }

    /// Check a ready modem, moving it to `Unresponsive` when the probe goes
    /// unanswered. Returns whether the modem answered.
    pub fn verify<T: Transport>(&mut self, ch: &mut CommandChannel<'_, T>) -> Result<bool, LifecycleError> {
        if self.state != ModemState::Ready {
            return Ok(false);
        }
        if self.probe(ch)? {
            ch.reset_health();
            return Ok(true);
        }
        warn!("Modem stopped answering");
        self.transition(ModemState::Unresponsive)?;
        Ok(false)
    }

    /// Look at the channel health after an exchange
    pub fn observe<T: Transport>(&mut self, ch: &CommandChannel<'_, T>) -> Result<(), LifecycleError> {
        if self.state != ModemState::Ready {
            return Ok(());
        }
        let health = ch.health();
        if health.transport_failed {
            warn!("Transport failure, modem considered unresponsive");
            self.transition(ModemState::Unresponsive)?;
        } else if health.consecutive_timeouts >= self.max_consecutive_timeouts {
            warn!(
                "{} consecutive timeouts, modem considered unresponsive",
                health.consecutive_timeouts
            );
            self.transition(ModemState::Unresponsive)?;
        }
        Ok(())
    }

    /// React to a URC. Returns `true` if it was a power down indication.
    pub fn handle_urc<T: Transport>(&mut self, ch: &CommandChannel<'_, T>, urc: &Urc) -> bool {
        if !ch.table().is_power_down(urc.text()) {
            return false;
        }
        warn!("Modem reported {}", urc.text());
        if self.state == ModemState::Ready {
            // Ready -> Unresponsive is always allowed
            let _ = self.transition(ModemState::Unresponsive);
        }
        true
    }

    /// Power cycle the modem regardless of its state, then bring it up
    pub fn force_recovery<T, P>(
        &mut self,
        ch: &mut CommandChannel<'_, T>,
        power: &mut P,
    ) -> Result<(), LifecycleError>
    where
        T: Transport,
        P: PowerControl + ?Sized,
    {
        warn!("Forcing modem power cycle from {:?}", self.state);
        match self.state {
            ModemState::PowerUnknown => {
                self.toggle(ch, power)?;
                self.transition(ModemState::PoweringOn)?;
            }
            ModemState::PoweringDown => self.transition(ModemState::PowerUnknown)?,
            ModemState::Unresponsive => {}
            _ => self.transition(ModemState::Unresponsive)?,
        }
        self.ensure_ready(ch, power)
    }

    /// Switch the modem off, gracefully if it still answers.
    pub fn shutdown<T, P>(
        &mut self,
        ch: &mut CommandChannel<'_, T>,
        power: &mut P,
    ) -> Result<(), LifecycleError>
    where
        T: Transport,
        P: PowerControl + ?Sized,
    {
        match self.state {
            ModemState::PowerUnknown => {
                if !self.probe(ch)? {
                    debug!("Modem already off");
                    return Ok(());
                }
                self.become_ready(ch)?;
            }
            ModemState::PoweringOn | ModemState::Booting => {
                self.transition(ModemState::Unresponsive)?
            }
            ModemState::PoweringDown => return self.transition(ModemState::PowerUnknown),
            ModemState::Ready | ModemState::Unresponsive => {}
        }

        let graceful = self.state == ModemState::Ready;
        self.transition(ModemState::PoweringDown)?;

        let switched_off = graceful && {
            let params = [Param::Int(1)];
            let cmd = ch
                .table()
                .command(Op::PowerDown)?
                .with_params(&params)
                .with_timeout(self.power_down_wait);
            match ch.send(&cmd) {
                Outcome::Succeeded(_) => true,
                Outcome::TransportError(e) => return Err(e.into()),
                other => {
                    warn!("Graceful power down failed: {:?}", other);
                    false
                }
            }
        };
        if !switched_off {
            self.toggle(ch, power)?;
        }

        info!("Modem switched off");
        self.generation = self.generation.wrapping_add(1);
        ch.clear_urcs();
        self.transition(ModemState::PowerUnknown)
    }

    fn become_ready<T: Transport>(&mut self, ch: &mut CommandChannel<'_, T>) -> Result<(), LifecycleError> {
        self.transition(ModemState::Ready)?;
        ch.reset_health();
        self.recoveries = 0;
        info!("Modem ready");
        Ok(())
    }

    fn spend_recovery(&mut self) -> Result<(), LifecycleError> {
        if self.recoveries >= self.max_recovery_attempts {
            error!(
                "Modem unrecoverable after {} power re-toggles",
                self.recoveries
            );
            return Err(LifecycleError::Unrecoverable);
        }
        self.recoveries += 1;
        warn!(
            "Recovering modem, attempt {} of {}",
            self.recoveries, self.max_recovery_attempts
        );
        Ok(())
    }

    fn toggle<T, P>(&mut self, ch: &mut CommandChannel<'_, T>, power: &mut P) -> Result<(), LifecycleError>
    where
        T: Transport,
        P: PowerControl + ?Sized,
    {
        power.toggle_power()?;
        self.generation = self.generation.wrapping_add(1);
        // Indications of the previous power cycle are meaningless now
        ch.clear_urcs();
        Ok(())
    }

    /// `true` if the modem answered anything within the probe attempts
    fn probe<T: Transport>(&mut self, ch: &mut CommandChannel<'_, T>) -> Result<bool, LifecycleError> {
        let cmd = ch.table().command(Op::Probe)?.with_timeout(self.probe_timeout);
        match ch.send_retry(&cmd, self.probe_attempts) {
            Outcome::TimedOut => Ok(false),
            Outcome::TransportError(e) => Err(e.into()),
            _ => Ok(true),
        }
    }

    fn await_boot_start<T, P>(
        &mut self,
        ch: &mut CommandChannel<'_, T>,
        power: &mut P,
    ) -> Result<(), LifecycleError>
    where
        T: Transport,
        P: PowerControl + ?Sized,
    {
        let table = ch.table();
        let urc = ch.await_urc(
            |u| table.is_boot_start(u.text()) || table.is_power_down(u.text()),
            self.boot_start_wait,
        )?;

        match urc {
            Some(urc) if table.is_power_down(urc.text()) => {
                // The modem was on and the toggle switched it off
                info!("Modem switched off by the power toggle, toggling again");
                if self.spend_recovery().is_err() {
                    self.transition(ModemState::Unresponsive)?;
                    return Err(LifecycleError::Unrecoverable);
                }
                self.toggle(ch, power)
            }
            Some(urc) => {
                debug!("Boot started: {}", urc.text());
                self.transition(ModemState::Booting)
            }
            None if self.probe(ch)? => self.transition(ModemState::Booting),
            None => self.transition(ModemState::Unresponsive),
        }
    }

    fn await_boot_complete<T: Transport>(&mut self, ch: &mut CommandChannel<'_, T>) -> Result<(), LifecycleError> {
        let table = ch.table();
        let urc = ch.await_urc(
            |u| table.is_boot_complete(u.text()) || table.is_power_down(u.text()),
            self.boot_complete_wait,
        )?;

        match urc {
            Some(urc) if table.is_power_down(urc.text()) => {
                warn!("Modem switched off while booting: {}", urc.text());
                self.transition(ModemState::Unresponsive)
            }
            Some(_) => self.become_ready(ch),
            None if self.probe(ch)? => self.become_ready(ch),
            None => self.transition(ModemState::Unresponsive),
        }
    }
}
