//! GPRS attach and the packet data bearer used by the HTTP service.

use embassy_time::{block_for, Duration, Instant};
use heapless::String;
use serde::{Deserialize, Serialize};

use crate::{
    channel::CommandChannel,
    command::{
        response::{Outcome, Response},
        CommandTable, Op, Param,
    },
    config::Config,
    error::{ErrorCode, ProtocolError, TransportError},
    transport::Transport,
    urc::Urc,
};

pub const MAX_APN_LEN: usize = 64;
pub const MAX_CREDENTIAL_LEN: usize = 32;
const MAX_IP_LEN: usize = 40;

/// Bearer profile used for every attach
const BEARER_CID: i64 = 1;

/// Access point settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NetworkConfig {
    pub apn: String<MAX_APN_LEN>,
    #[serde(default)]
    pub username: String<MAX_CREDENTIAL_LEN>,
    #[serde(default)]
    pub password: String<MAX_CREDENTIAL_LEN>,
}

impl NetworkConfig {
    pub fn new(apn: &str, username: &str, password: &str) -> Result<Self, AttachError> {
        Ok(Self {
            apn: String::try_from(apn).map_err(|_| AttachError::InvalidConfig)?,
            username: String::try_from(username).map_err(|_| AttachError::InvalidConfig)?,
            password: String::try_from(password).map_err(|_| AttachError::InvalidConfig)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AttachError {
    /// The modem refused one of the attach steps
    Rejected(ErrorCode),
    /// The bearer did not come up within the attach wait
    Timeout,
    NotConfigured,
    /// A different configuration is in use while attached
    ConfigLocked,
    /// A value does not fit the configuration buffers
    InvalidConfig,
    Transport(TransportError),
    Protocol(ProtocolError),
}

impl From<ProtocolError> for AttachError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionStatus {
    Detached,
    Attaching,
    Attached,
    AttachFailed(AttachError),
}

/// `<status>` of `+SAPBR: <cid>,<status>,<ip>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum BearerStatus {
    Connecting,
    Connected,
    Closing,
    Closed,
}

impl TryFrom<u32> for BearerStatus {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Connecting),
            1 => Ok(Self::Connected),
            2 => Ok(Self::Closing),
            3 => Ok(Self::Closed),
            _ => Err(ProtocolError::Malformed),
        }
    }
}

fn check(outcome: Outcome) -> Result<Response, AttachError> {
    match outcome {
        Outcome::Succeeded(r) => Ok(r),
        Outcome::Failed(code) => Err(AttachError::Rejected(code)),
        Outcome::TimedOut => Err(AttachError::Timeout),
        Outcome::TransportError(e) => Err(AttachError::Transport(e)),
        Outcome::Malformed(e) => Err(AttachError::Protocol(e)),
    }
}

pub struct NetworkSession {
    status: SessionStatus,
    config: Option<NetworkConfig>,
    /// The caller wants the bearer up, it is restored after a power cycle
    wanted: bool,
    ip: String<MAX_IP_LEN>,
    generation: u32,

    poll_interval: Duration,
    max_wait: Duration,
}

impl NetworkSession {
    pub fn new(config: &Config) -> Self {
        Self {
            status: SessionStatus::Detached,
            config: None,
            wanted: false,
            ip: String::new(),
            generation: 0,
            poll_interval: config.attach_poll_interval,
            max_wait: config.attach_max_wait,
        }
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn is_attached(&self) -> bool {
        self.status == SessionStatus::Attached
    }

    pub fn wanted(&self) -> bool {
        self.wanted
    }

    pub fn config(&self) -> Option<&NetworkConfig> {
        self.config.as_ref()
    }

    /// Address of the bearer, as reported by the last status query
    pub fn ip_address(&self) -> Option<&str> {
        (self.is_attached() && !self.ip.is_empty()).then_some(self.ip.as_str())
    }

    /// Store the access point used by [`NetworkSession::ensure_attached`].
    pub fn configure(&mut self, config: NetworkConfig) -> Result<(), AttachError> {
        if self.is_attached() && self.config.as_ref() != Some(&config) {
            return Err(AttachError::ConfigLocked);
        }
        self.config = Some(config);
        Ok(())
    }

    /// Forget the bearer if the modem was power cycled since the last call.
    /// Returns `true` in that case.
    pub fn sync_generation(&mut self, generation: u32) -> bool {
        if generation == self.generation {
            return false;
        }
        self.generation = generation;
        if self.status != SessionStatus::Detached {
            info!("Modem power cycled, bearer lost");
            self.status = SessionStatus::Detached;
            self.ip.clear();
        }
        true
    }

    /// React to a URC. Returns `true` if it reported the bearer closed.
    pub fn handle_urc(&mut self, table: &CommandTable, urc: &Urc) -> bool {
        if !table.is_bearer_down(urc.text()) {
            return false;
        }
        warn!("Bearer closed by the network: {}", urc.text());
        self.status = SessionStatus::Detached;
        self.ip.clear();
        true
    }

    pub fn ensure_attached<T: Transport>(&mut self, ch: &mut CommandChannel<'_, T>) -> Result<(), AttachError> {
        let config = self.config.clone().ok_or(AttachError::NotConfigured)?;
        self.attach(ch, config)
    }

    /// Attach to GPRS and open the bearer with `config`.
    ///
    /// Idempotent while attached with the same configuration.
    pub fn attach<T: Transport>(
        &mut self,
        ch: &mut CommandChannel<'_, T>,
        config: NetworkConfig,
    ) -> Result<(), AttachError> {
        if self.is_attached() {
            return match self.config.as_ref() == Some(&config) {
                true => Ok(()),
                false => Err(AttachError::ConfigLocked),
            };
        }

        info!("Attaching with APN {}", config.apn.as_str());
        self.status = SessionStatus::Attaching;
        self.wanted = true;

        match self.bring_up(ch, &config) {
            Ok(()) => {
                info!("Bearer up, address {}", self.ip.as_str());
                self.status = SessionStatus::Attached;
                self.config = Some(config);
                Ok(())
            }
            Err(e) => {
                error!("Attach failed: {:?}", e);
                self.status = SessionStatus::AttachFailed(e.clone());
                Err(e)
            }
        }
    }

    /// Close the bearer. No-op when already detached.
    pub fn detach<T: Transport>(&mut self, ch: &mut CommandChannel<'_, T>) -> Result<(), AttachError> {
        self.wanted = false;
        if self.status == SessionStatus::Detached {
            return Ok(());
        }

        let params = [Param::Int(0), Param::Int(BEARER_CID)];
        let cmd = ch.table().command(Op::BearerClose)?.with_params(&params);
        let outcome = ch.send(&cmd);

        self.status = SessionStatus::Detached;
        self.ip.clear();
        match check(outcome) {
            // Already closed
            Ok(_) | Err(AttachError::Rejected(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn bring_up<T: Transport>(&mut self, ch: &mut CommandChannel<'_, T>, config: &NetworkConfig) -> Result<(), AttachError> {
        let table = ch.table();

        // Numeric +CME ERROR codes
        let params = [Param::Int(1)];
        check(ch.send(&table.command(Op::ReportErrors)?.with_params(&params)))?;
        check(ch.send(&table.command(Op::GprsAttach)?.with_params(&params)))?;

        let settings = [
            ("CONTYPE", "GPRS"),
            ("APN", config.apn.as_str()),
            ("USER", config.username.as_str()),
            ("PWD", config.password.as_str()),
        ];
        for (tag, value) in settings {
            if value.is_empty() && matches!(tag, "USER" | "PWD") {
                continue;
            }
            let params = [
                Param::Int(3),
                Param::Int(BEARER_CID),
                Param::Str(tag),
                Param::Str(value),
            ];
            check(ch.send(&table.command(Op::BearerSet)?.with_params(&params)))?;
        }

        // Opening an open bearer is an error
        if self.query(ch)? == BearerStatus::Connected {
            return Ok(());
        }
        let params = [Param::Int(1), Param::Int(BEARER_CID)];
        check(ch.send(&table.command(Op::BearerOpen)?.with_params(&params)))?;

        let deadline = Instant::now() + self.max_wait;
        loop {
            match self.query(ch)? {
                BearerStatus::Connected => return Ok(()),
                BearerStatus::Connecting => {}
                status => {
                    warn!("Bearer {:?} while attaching", status);
                    return Err(AttachError::Rejected(ErrorCode::Unknown));
                }
            }
            if Instant::now() + self.poll_interval > deadline {
                return Err(AttachError::Timeout);
            }
            block_for(self.poll_interval);
        }
    }

    fn query<T: Transport>(&mut self, ch: &mut CommandChannel<'_, T>) -> Result<BearerStatus, AttachError> {
        let params = [Param::Int(2), Param::Int(BEARER_CID)];
        let cmd = ch.table().command(Op::BearerQuery)?.with_params(&params);
        let response = check(ch.send(&cmd))?;

        let line = response.find("+SAPBR").ok_or(ProtocolError::Malformed)?;
        let status = BearerStatus::try_from(line.field_u32(1)?)?;

        self.ip.clear();
        if let Some(ip) = line.field(2) {
            // Cannot fail for a well formed address
            let _ = self.ip.push_str(ip);
        }
        trace!("Bearer {:?}, address {}", status, self.ip.as_str());
        Ok(status)
    }
}
