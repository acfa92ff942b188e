use embassy_time::Duration;
use heapless::String;

use crate::{
    channel::CommandChannel,
    command::{sim868::SIM868, CommandTable, Op},
    config::{Config, EchoMode},
    error::{Error, ProtocolError},
    gnss::Gnss,
    http::{HttpRequest, HttpResult, HttpTransaction},
    lifecycle::{ModemLifecycle, ModemState},
    network::{NetworkConfig, NetworkSession, SessionStatus},
    pwr::PowerControl,
    transport::Transport,
    urc::UrcSubscriber,
};

const MAX_IMEI_LEN: usize = 16;

/// A SIMCom modem behind a serial transport and a power key.
///
/// Every operation brings the modem up first if needed. After a power cycle
/// the GPRS bearer and the GNSS reports the caller asked for are restored.
pub struct Device<'d, T, P>
where
    T: Transport,
    P: PowerControl,
{
    ch: CommandChannel<'d, T>,
    power: P,
    lifecycle: ModemLifecycle,
    session: NetworkSession,
    http: HttpTransaction,
    gnss: Gnss,

    echo: EchoMode,
    health_interval: Duration,
    imei: Option<String<MAX_IMEI_LEN>>,
    /// Generation the modem settings were last applied for
    initialized: Option<u32>,
}

impl<'d, T, P> Device<'d, T, P>
where
    T: Transport,
    P: PowerControl,
{
    pub fn new(transport: T, power: P, config: &Config) -> Self {
        Self::build(transport, power, config, &SIM868)
    }

    /// Use a command table other than the SIM868 one
    pub fn with_table(
        transport: T,
        power: P,
        config: &Config,
        table: &'static CommandTable,
    ) -> Result<Self, Error> {
        table.validate()?;
        Ok(Self::build(transport, power, config, table))
    }

    fn build(transport: T, power: P, config: &Config, table: &'static CommandTable) -> Self {
        Self {
            ch: CommandChannel::new(transport, table, config),
            power,
            lifecycle: ModemLifecycle::new(config),
            session: NetworkSession::new(config),
            http: HttpTransaction::new(config),
            gnss: Gnss::new(),
            echo: config.echo,
            health_interval: config.health_interval,
            imei: None,
            initialized: None,
        }
    }

    pub fn state(&self) -> ModemState {
        self.lifecycle.state()
    }

    pub fn session_status(&self) -> &SessionStatus {
        self.session.status()
    }

    pub fn ip_address(&self) -> Option<&str> {
        self.session.ip_address()
    }

    /// Deliver every URC to `subscriber` from now on
    pub fn subscribe(&mut self, subscriber: &'d dyn UrcSubscriber) -> Result<(), Error> {
        self.ch.subscribe(subscriber)
    }

    /// Set the access point used by [`Device::network_start`]
    pub fn apn_config(&mut self, apn: &str, username: &str, password: &str) -> Result<(), Error> {
        let config = NetworkConfig::new(apn, username, password)?;
        self.session.configure(config)?;
        Ok(())
    }

    /// Attach to GPRS and open the bearer
    pub fn network_start(&mut self) -> Result<(), Error> {
        self.ready()?;
        self.session.ensure_attached(&mut self.ch)?;
        Ok(())
    }

    pub fn network_stop(&mut self) -> Result<(), Error> {
        self.settle()?;
        self.session.detach(&mut self.ch)?;
        Ok(())
    }

    pub fn http_get(&mut self, url: &str) -> Result<HttpResult, Error> {
        self.http(&HttpRequest::get(url))
    }

    pub fn http_post(&mut self, url: &str, body: &[u8]) -> Result<HttpResult, Error> {
        self.http(&HttpRequest::post(url, body))
    }

    pub fn http(&mut self, request: &HttpRequest<'_>) -> Result<HttpResult, Error> {
        self.ready()?;
        let result = self.http.execute(
            &mut self.ch,
            &mut self.lifecycle,
            &mut self.session,
            &mut self.power,
            request,
        );
        self.lifecycle.observe(&self.ch)?;
        Ok(result?)
    }

    /// IMEI of the module, read once and cached
    pub fn imei(&mut self) -> Result<&str, Error> {
        if self.imei.is_none() {
            self.ready()?;
            let response = self.ch.send_op(Op::Imei).into_result()?;
            let imei = response
                .lines()
                .iter()
                .map(|t| t.text().trim())
                .find(|t| !t.is_empty() && t.bytes().all(|b| b.is_ascii_digit()))
                .ok_or(ProtocolError::Malformed)?;
            debug!("IMEI {}", imei);
            self.imei = Some(String::try_from(imei).map_err(|_| ProtocolError::Malformed)?);
        }
        self.imei.as_deref().ok_or(Error::Protocol(ProtocolError::Malformed))
    }

    /// Power the GNSS receiver and report a fix every `rate` seconds
    pub fn gnss_start(&mut self, rate: u8) -> Result<(), Error> {
        self.ready()?;
        self.gnss.start(&mut self.ch, rate)
    }

    pub fn gnss_stop(&mut self) -> Result<(), Error> {
        self.ready()?;
        self.gnss.stop(&mut self.ch)
    }

    /// Last GNSS report received, after processing pending URCs
    pub fn gnss_sentence(&mut self) -> Result<Option<&str>, Error> {
        self.settle()?;
        Ok(self.gnss.sentence())
    }

    /// Periodic supervision.
    ///
    /// Probes the modem once it has been silent for the health interval,
    /// power cycles it when it no longer answers and restores the bearer and
    /// the GNSS reports afterwards.
    pub fn health_check(&mut self) -> Result<(), Error> {
        self.settle()?;

        if self.lifecycle.state() == ModemState::Ready && self.ch.idle_for() >= self.health_interval {
            trace!("Modem idle for {} ms, probing", self.ch.idle_for().as_millis());
            self.lifecycle.verify(&mut self.ch)?;
        }
        self.ready()?;

        // Bearer closed by the network
        if self.session.wanted() && *self.session.status() == SessionStatus::Detached {
            self.session.ensure_attached(&mut self.ch)?;
        }

        if self.imei.is_none() {
            if let Err(e) = self.imei() {
                warn!("IMEI unavailable: {:?}", e);
            }
        }
        Ok(())
    }

    /// Power cycle the modem and bring it back up
    pub fn power_toggle(&mut self) -> Result<(), Error> {
        self.lifecycle.force_recovery(&mut self.ch, &mut self.power)?;
        self.reinit()
    }

    /// Switch the modem off. A later operation switches it on again.
    pub fn shutdown(&mut self) -> Result<(), Error> {
        self.lifecycle.shutdown(&mut self.ch, &mut self.power)?;
        // GNSS is restarted by the next operation once the modem is back
        self.session.sync_generation(self.lifecycle.generation());
        Ok(())
    }

    /// Release the transport and the power control
    pub fn release(self) -> (T, P) {
        (self.ch.release(), self.power)
    }

    fn ready(&mut self) -> Result<(), Error> {
        self.settle()?;
        self.lifecycle.ensure_ready(&mut self.ch, &mut self.power)?;
        self.reinit()
    }

    /// Restore what a power cycle lost
    fn reinit(&mut self) -> Result<(), Error> {
        let generation = self.lifecycle.generation();

        if self.initialized != Some(generation) {
            if self.echo == EchoMode::Suppressed {
                self.ch.send_op(Op::EchoOff).into_result()?;
            }
            self.initialized = Some(generation);
        }

        // Failing to restore is reported by the operations that need it
        if self.gnss.sync_generation(generation) && self.gnss.rate().is_some() {
            info!("Restarting GNSS after power cycle");
            if let Err(e) = self.gnss.resume(&mut self.ch) {
                warn!("GNSS restart failed: {:?}", e);
            }
        }
        if self.session.sync_generation(generation) && self.session.wanted() {
            info!("Restoring network session after power cycle");
            if let Err(e) = self.session.ensure_attached(&mut self.ch) {
                warn!("Network restore failed: {:?}", e);
            }
        }
        Ok(())
    }

    /// Hand queued URCs to the components, then look at the link health
    fn settle(&mut self) -> Result<(), Error> {
        self.ch.poll()?;

        let table = self.ch.table();
        while let Some(urc) = self.ch.take_urc(|_| true) {
            let handled = self.lifecycle.handle_urc(&self.ch, &urc)
                || self.session.handle_urc(table, &urc)
                || self.gnss.handle_urc(table, &urc);
            if !handled {
                trace!("Unhandled URC {}", urc.text());
            }
        }

        self.lifecycle.observe(&self.ch)?;
        Ok(())
    }
}
