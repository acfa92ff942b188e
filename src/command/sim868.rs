//! Command table of the SIMCom SIM868 (and the GSM/GPRS compatible SIM800).
//!
//! Timeouts follow the maximum response times of the SIM800 series AT
//! command manual.

use embassy_time::Duration;

use super::{CommandSpec, CommandTable, ErrorClass, ErrorPattern, Form, Op};

const fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

const fn secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}

pub const SIM868: CommandTable = CommandTable {
    name: "SIM868",
    ok: &["OK"],
    errors: &[
        ErrorPattern {
            token: "ERROR",
            class: ErrorClass::Plain,
        },
        ErrorPattern {
            token: "+CME ERROR:",
            class: ErrorClass::Cme,
        },
        ErrorPattern {
            token: "+CMS ERROR:",
            class: ErrorClass::Cms,
        },
    ],
    urcs: &[
        "+HTTPACTION:",
        "+UGNSINF:",
        "+SAPBR 1:",
        "+PDP:",
        "RDY",
        "+CFUN:",
        "+CPIN:",
        "Call Ready",
        "SMS Ready",
        "NORMAL POWER DOWN",
        "UNDER-VOLTAGE",
        "OVER-VOLTAGE",
    ],
    boot_start: &["RDY", "+CFUN:", "+CPIN:"],
    boot_complete: &["SMS Ready", "Call Ready"],
    power_down: &[
        "NORMAL POWER DOWN",
        "UNDER-VOLTAGE POWER DOWN",
        "OVER-VOLTAGE POWER DOWN",
    ],
    bearer_down: &["+SAPBR 1: DEACT", "+PDP: DEACT"],
    http_action: "+HTTPACTION:",
    gnss_report: "+UGNSINF:",
    delimiter: ',',
    terminator: "\r",
    commands: &[
        CommandSpec::new(Op::Probe, "", Form::Execute, ms(1000)),
        CommandSpec::new(Op::Imei, "+GSN", Form::Execute, ms(2000)),
        CommandSpec::new(Op::EchoOff, "E0", Form::Execute, ms(1000)),
        CommandSpec::new(Op::ReportErrors, "+CMEE", Form::Set, ms(1000)),
        // Answers with `NORMAL POWER DOWN` only, there is no `OK`
        CommandSpec::new(Op::PowerDown, "+CPOWD", Form::Set, secs(5))
            .with_ok(&["NORMAL POWER DOWN"]),
        CommandSpec::new(Op::GprsAttach, "+CGATT", Form::Set, secs(75)),
        CommandSpec::new(Op::BearerSet, "+SAPBR", Form::Set, ms(2000)),
        CommandSpec::new(Op::BearerOpen, "+SAPBR", Form::Set, secs(85)),
        CommandSpec::new(Op::BearerQuery, "+SAPBR", Form::Set, ms(2000)),
        CommandSpec::new(Op::BearerClose, "+SAPBR", Form::Set, secs(65)),
        CommandSpec::new(Op::HttpInit, "+HTTPINIT", Form::Execute, ms(2000)),
        CommandSpec::new(Op::HttpTerm, "+HTTPTERM", Form::Execute, ms(2000)),
        CommandSpec::new(Op::HttpPara, "+HTTPPARA", Form::Set, ms(2000)),
        CommandSpec::new(Op::HttpData, "+HTTPDATA", Form::Set, secs(15)).with_prompt("DOWNLOAD"),
        // `OK` arrives at once, completion is reported through `+HTTPACTION:`
        CommandSpec::new(Op::HttpAction, "+HTTPACTION", Form::Set, ms(2000)),
        CommandSpec::new(Op::HttpRead, "+HTTPREAD", Form::Set, secs(10))
            .with_raw_prefix("+HTTPREAD:"),
        CommandSpec::new(Op::GnssPower, "+CGNSPWR", Form::Set, ms(2000)),
        CommandSpec::new(Op::GnssUrc, "+CGNSURC", Form::Set, ms(2000)),
    ],
};
