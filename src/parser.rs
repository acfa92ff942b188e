//! Classification of response lines.
//!
//! Rules are applied in priority order: the echo of the in-flight command,
//! success tokens, error tokens, URC prefixes and finally plain response
//! data. Anything that is not an exact result token is never taken for a
//! final result.

use heapless::String;

use crate::{
    command::{response::Tokens, CommandSpec, CommandTable, ErrorClass},
    config::EchoMode,
    error::{ErrorCode, ProtocolError, MAX_ERROR_TEXT},
    line_reader::Line,
    urc::Urc,
    MAX_COMMAND_LEN,
};

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FinalResult {
    Ok,
    Error(ErrorCode),
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParsedEvent {
    Echo,
    IntermediateData(Tokens),
    FinalResult(FinalResult),
    UnsolicitedResult(Urc),
}

struct InFlight {
    echo: Option<String<MAX_COMMAND_LEN>>,
    ok: &'static [&'static str],
}

pub struct ResponseParser {
    table: &'static CommandTable,
    echo: EchoMode,
    in_flight: Option<InFlight>,
}

impl ResponseParser {
    pub fn new(table: &'static CommandTable, echo: EchoMode) -> Self {
        Self {
            table,
            echo,
            in_flight: None,
        }
    }

    pub fn table(&self) -> &'static CommandTable {
        self.table
    }

    pub fn set_echo(&mut self, echo: EchoMode) {
        self.echo = echo;
    }

    /// Record `text` as the command in flight
    pub fn issue(&mut self, text: &str, spec: &'static CommandSpec) {
        let echo = match self.echo {
            EchoMode::Expect if spec.echo => String::try_from(text).ok(),
            _ => None,
        };
        self.in_flight = Some(InFlight { echo, ok: spec.ok });
    }

    pub fn complete(&mut self) {
        self.in_flight = None;
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Classify one line. Blank lines yield `None`.
    pub fn classify(&mut self, line: &Line) -> Result<Option<ParsedEvent>, ProtocolError> {
        if line.is_blank() {
            return Ok(None);
        }
        let text = line.to_str()?;

        if let Some(in_flight) = self.in_flight.as_mut() {
            // An echo is only expected once per command
            if in_flight.echo.as_deref() == Some(text) {
                in_flight.echo = None;
                return Ok(Some(ParsedEvent::Echo));
            }
            if in_flight.ok.contains(&text) {
                return Ok(Some(ParsedEvent::FinalResult(FinalResult::Ok)));
            }
        }

        if self.table.ok.contains(&text) {
            return Ok(Some(ParsedEvent::FinalResult(FinalResult::Ok)));
        }

        if let Some(code) = self.error_code(text) {
            return Ok(Some(ParsedEvent::FinalResult(FinalResult::Error(code))));
        }

        let tokens = Tokens::new(text, self.table.delimiter)?;
        Ok(Some(match self.table.urc_topic(text) {
            Some(topic) => ParsedEvent::UnsolicitedResult(Urc {
                topic,
                payload: tokens,
            }),
            None => ParsedEvent::IntermediateData(tokens),
        }))
    }

    fn error_code(&self, text: &str) -> Option<ErrorCode> {
        self.table.errors.iter().find_map(|pattern| match pattern.class {
            ErrorClass::Plain => (text == pattern.token).then_some(ErrorCode::Unknown),
            ErrorClass::Cme | ErrorClass::Cms => {
                let detail = text.strip_prefix(pattern.token)?.trim();
                Some(match detail.parse::<u16>() {
                    Ok(n) if pattern.class == ErrorClass::Cme => ErrorCode::Cme(n),
                    Ok(n) => ErrorCode::Cms(n),
                    Err(_) => ErrorCode::Text(truncated(detail)),
                })
            }
        })
    }
}

fn truncated(text: &str) -> String<MAX_ERROR_TEXT> {
    let mut s = String::new();
    for c in text.chars() {
        if s.push(c).is_err() {
            break;
        }
    }
    s
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::command::{sim868::SIM868, Op};

    fn classify(parser: &mut ResponseParser, line: &str) -> Option<ParsedEvent> {
        parser.classify(&Line::from_bytes(line.as_bytes())).unwrap()
    }

    fn data(line: &str) -> Option<ParsedEvent> {
        Some(ParsedEvent::IntermediateData(Tokens::new(line, ',').unwrap()))
    }

    #[test]
    fn exchange_in_priority_order() {
        let mut parser = ResponseParser::new(&SIM868, EchoMode::Expect);
        parser.issue("AT+GSN", SIM868.spec(Op::Imei).unwrap());

        assert_eq!(classify(&mut parser, "AT+GSN"), Some(ParsedEvent::Echo));
        assert_eq!(classify(&mut parser, "868822040061234"), data("868822040061234"));
        assert_eq!(classify(&mut parser, ""), None);
        assert_eq!(
            classify(&mut parser, "OK"),
            Some(ParsedEvent::FinalResult(FinalResult::Ok))
        );
    }

    #[test]
    fn echo_is_matched_once() {
        let mut parser = ResponseParser::new(&SIM868, EchoMode::Expect);
        parser.issue("AT", SIM868.spec(Op::Probe).unwrap());

        assert_eq!(classify(&mut parser, "AT"), Some(ParsedEvent::Echo));
        assert_eq!(classify(&mut parser, "AT"), data("AT"));
    }

    #[test]
    fn suppressed_echo_is_data() {
        let mut parser = ResponseParser::new(&SIM868, EchoMode::Suppressed);
        parser.issue("AT+GSN", SIM868.spec(Op::Imei).unwrap());
        assert_eq!(classify(&mut parser, "AT+GSN"), data("AT+GSN"));
    }

    #[test]
    fn error_codes() {
        let mut parser = ResponseParser::new(&SIM868, EchoMode::Expect);

        let cases = [
            ("ERROR", ErrorCode::Unknown),
            ("+CME ERROR: 3", ErrorCode::Cme(3)),
            ("+CMS ERROR: 304", ErrorCode::Cms(304)),
            (
                "+CME ERROR: operation not allowed",
                ErrorCode::Text(String::try_from("operation not allowed").unwrap()),
            ),
        ];
        for (line, code) in cases {
            assert_eq!(
                classify(&mut parser, line),
                Some(ParsedEvent::FinalResult(FinalResult::Error(code)))
            );
        }

        let long = "+CME ERROR: a very long verbose error text from the module";
        match classify(&mut parser, long) {
            Some(ParsedEvent::FinalResult(FinalResult::Error(ErrorCode::Text(t)))) => {
                assert_eq!(t.len(), MAX_ERROR_TEXT)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_terminal_text_is_not_success() {
        let mut parser = ResponseParser::new(&SIM868, EchoMode::Expect);
        parser.issue("AT", SIM868.spec(Op::Probe).unwrap());

        assert_eq!(classify(&mut parser, "OK?"), data("OK?"));
        assert_eq!(classify(&mut parser, "ERRORS"), data("ERRORS"));
        assert_eq!(classify(&mut parser, "NO CARRIER"), data("NO CARRIER"));
    }

    #[test]
    fn urc_interleaved_with_exchange() {
        let mut parser = ResponseParser::new(&SIM868, EchoMode::Expect);
        parser.issue("AT+SAPBR=2,1", SIM868.spec(Op::BearerQuery).unwrap());

        assert_eq!(classify(&mut parser, "AT+SAPBR=2,1"), Some(ParsedEvent::Echo));
        match classify(&mut parser, "+UGNSINF: 1,1,20240101120000.000") {
            Some(ParsedEvent::UnsolicitedResult(urc)) => {
                assert_eq!(urc.topic, "+UGNSINF:");
                assert_eq!(urc.payload.field(1), Some("1"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            classify(&mut parser, "+SAPBR: 1,1,\"10.0.0.2\""),
            data("+SAPBR: 1,1,\"10.0.0.2\"")
        );
    }

    #[test]
    fn urcs_without_command_in_flight() {
        let mut parser = ResponseParser::new(&SIM868, EchoMode::Expect);
        assert!(matches!(
            classify(&mut parser, "RDY"),
            Some(ParsedEvent::UnsolicitedResult(Urc { topic: "RDY", .. }))
        ));
        assert!(matches!(
            classify(&mut parser, "NORMAL POWER DOWN"),
            Some(ParsedEvent::UnsolicitedResult(_))
        ));
    }

    #[test]
    fn command_specific_success_token() {
        let mut parser = ResponseParser::new(&SIM868, EchoMode::Expect);
        parser.issue("AT+CPOWD=1", SIM868.spec(Op::PowerDown).unwrap());
        assert_eq!(
            classify(&mut parser, "NORMAL POWER DOWN"),
            Some(ParsedEvent::FinalResult(FinalResult::Ok))
        );

        parser.complete();
        assert!(matches!(
            classify(&mut parser, "NORMAL POWER DOWN"),
            Some(ParsedEvent::UnsolicitedResult(_))
        ));
    }

    #[test]
    fn invalid_utf8() {
        let mut parser = ResponseParser::new(&SIM868, EchoMode::Expect);
        assert_eq!(
            parser.classify(&Line::from_bytes(&[b'O', 0xfe])),
            Err(ProtocolError::InvalidUtf8)
        );
    }
}
