#![allow(clippy::if_same_then_else)]

use embassy_time::Duration;

/// Low time of the `PWRKEY` line needed to switch the module on or off
pub fn pwr_key_pulse() -> Duration {
    if cfg!(feature = "sim800") {
        Duration::from_millis(1100)
    } else if cfg!(feature = "sim868") {
        Duration::from_millis(1200)
    } else {
        Duration::from_secs(2)
    }
}

/// How long an `AT` probe waits for an answer
pub fn probe_timeout() -> Duration {
    Duration::from_secs(1)
}

/// Time from power key release until the first boot indication (`RDY`)
pub fn boot_start_wait() -> Duration {
    if cfg!(feature = "sim800") {
        Duration::from_secs(5)
    } else {
        Duration::from_secs(6)
    }
}

/// Time from the first boot indication until the module reports `SMS Ready`
pub fn boot_complete_wait() -> Duration {
    if cfg!(feature = "sim868") {
        Duration::from_secs(20)
    } else {
        Duration::from_secs(15)
    }
}

/// How long to wait for `NORMAL POWER DOWN` after a graceful switch off
pub fn power_down_wait() -> Duration {
    Duration::from_secs(5)
}

/// Interval between two bearer status queries while attaching
pub fn attach_poll_interval() -> Duration {
    Duration::from_secs(1)
}

/// Upper bound for bringing up the GPRS bearer
pub fn attach_max_wait() -> Duration {
    Duration::from_secs(90)
}

/// Upper bound for `+HTTPACTION` to report completion
pub fn http_action_timeout() -> Duration {
    if cfg!(feature = "sim800") {
        Duration::from_secs(120)
    } else {
        Duration::from_secs(60)
    }
}

/// Idle time after which a health check probes the module
pub fn health_interval() -> Duration {
    Duration::from_secs(30)
}
