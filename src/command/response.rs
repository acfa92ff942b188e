use heapless::{String, Vec};

use crate::{
    error::{Error, ErrorCode, ProtocolError, TransportError},
    MAX_LINE_LEN, MAX_PAYLOAD_LEN, MAX_RESPONSE_LINES,
};

/// A response line split into fields.
///
/// `+SAPBR: 1,1,"10.72.4.9"` exposes the header `+SAPBR` through
/// [`Tokens::prefix`] and the fields `1`, `1` and `10.72.4.9`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Tokens {
    text: String<MAX_LINE_LEN>,
    delimiter: char,
}

impl Tokens {
    pub fn new(text: &str, delimiter: char) -> Result<Self, ProtocolError> {
        Ok(Self {
            text: String::try_from(text).map_err(|_| ProtocolError::Malformed)?,
            delimiter,
        })
    }

    /// The whole line
    pub fn text(&self) -> &str {
        &self.text
    }

    /// `+XXX` header of the line, if any
    pub fn prefix(&self) -> Option<&str> {
        self.split_header().map(|(header, _)| header)
    }

    /// Everything after the header, trimmed
    pub fn body(&self) -> &str {
        match self.split_header() {
            Some((_, body)) => body.trim(),
            None => self.text.trim(),
        }
    }

    pub fn fields(&self) -> Fields<'_> {
        let body = self.body();
        Fields {
            rest: (!body.is_empty()).then_some(body),
            delimiter: self.delimiter,
        }
    }

    pub fn field(&self, i: usize) -> Option<&str> {
        self.fields().nth(i)
    }

    pub fn field_u32(&self, i: usize) -> Result<u32, ProtocolError> {
        self.field(i)
            .and_then(|f| f.parse().ok())
            .ok_or(ProtocolError::Malformed)
    }

    fn split_header(&self) -> Option<(&str, &str)> {
        if !self.text.starts_with('+') {
            return None;
        }
        self.text
            .split_once(':')
            .map(|(header, body)| (header.trim_end(), body))
    }
}

/// Fields of a [`Tokens`] line. The delimiter is ignored inside quotes.
pub struct Fields<'a> {
    rest: Option<&'a str>,
    delimiter: char,
}

impl<'a> Iterator for Fields<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let rest = self.rest?;
        let mut quoted = false;
        let mut end = None;
        for (i, c) in rest.char_indices() {
            if c == '"' {
                quoted = !quoted;
            } else if c == self.delimiter && !quoted {
                end = Some(i);
                break;
            }
        }

        let field = match end {
            Some(i) => {
                self.rest = Some(&rest[i + self.delimiter.len_utf8()..]);
                &rest[..i]
            }
            None => {
                self.rest = None;
                rest
            }
        };

        let field = field.trim();
        Some(field.strip_prefix('"').unwrap_or(field).trim_end_matches('"'))
    }
}

/// Data gathered for a successful exchange.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Response {
    lines: Vec<Tokens, MAX_RESPONSE_LINES>,
    raw: Vec<u8, MAX_PAYLOAD_LEN>,
}

impl Response {
    /// Intermediate lines, in arrival order
    pub fn lines(&self) -> &[Tokens] {
        &self.lines
    }

    /// First intermediate line with the header `prefix`
    pub fn find(&self, prefix: &str) -> Option<&Tokens> {
        self.lines.iter().find(|t| t.prefix() == Some(prefix))
    }

    /// Raw payload captured after a raw data prefix line
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub(crate) fn push_line(&mut self, tokens: Tokens) -> Result<(), ProtocolError> {
        self.lines
            .push(tokens)
            .map_err(|_| ProtocolError::ResponseOverflow)
    }

    pub(crate) fn push_raw(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        self.raw
            .extend_from_slice(bytes)
            .map_err(|_| ProtocolError::PayloadOverflow)
    }
}

/// Result of one command exchange. Exactly one case applies.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    Succeeded(Response),
    Failed(ErrorCode),
    TimedOut,
    TransportError(TransportError),
    /// The exchange was unusable, e.g. a line that could not be decoded
    Malformed(ProtocolError),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded(_))
    }

    pub fn into_result(self) -> Result<Response, Error> {
        match self {
            Outcome::Succeeded(r) => Ok(r),
            Outcome::Failed(code) => Err(Error::Modem(code)),
            Outcome::TimedOut => Err(Error::Timeout),
            Outcome::TransportError(e) => Err(Error::Transport(e)),
            Outcome::Malformed(e) => Err(Error::Protocol(e)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn splits_header_and_fields() {
        let t = Tokens::new("+SAPBR: 1,1,\"10.72.4.9\"", ',').unwrap();
        assert_eq!(t.prefix(), Some("+SAPBR"));
        assert_eq!(t.body(), "1,1,\"10.72.4.9\"");
        assert_eq!(
            t.fields().collect::<std::vec::Vec<_>>(),
            vec!["1", "1", "10.72.4.9"]
        );
        assert_eq!(t.field_u32(1), Ok(1));
        assert_eq!(t.field_u32(2), Err(ProtocolError::Malformed));
    }

    #[test]
    fn delimiter_inside_quotes_is_kept() {
        let t = Tokens::new("+CGNSINF: \"a,b\", 2 ,", ',').unwrap();
        assert_eq!(t.fields().collect::<std::vec::Vec<_>>(), vec!["a,b", "2", ""]);
    }

    #[test]
    fn lines_without_header() {
        let t = Tokens::new("868822040061234", ',').unwrap();
        assert_eq!(t.prefix(), None);
        assert_eq!(t.field(0), Some("868822040061234"));
        assert_eq!(t.field(1), None);

        let t = Tokens::new("+SAPBR 1: DEACT", ',').unwrap();
        assert_eq!(t.prefix(), Some("+SAPBR 1"));
        assert_eq!(t.field(0), Some("DEACT"));

        let t = Tokens::new("", ',').unwrap();
        assert_eq!(t.fields().count(), 0);
    }

    #[test]
    fn outcome_maps_to_errors() {
        assert_eq!(Outcome::TimedOut.into_result(), Err(Error::Timeout));
        assert_eq!(
            Outcome::Failed(ErrorCode::Cme(3)).into_result(),
            Err(Error::Modem(ErrorCode::Cme(3)))
        );
        assert!(Outcome::Succeeded(Response::default()).is_success());
    }

    #[test]
    fn response_capacity_is_bounded() {
        let mut r = Response::default();
        for _ in 0..MAX_RESPONSE_LINES {
            r.push_line(Tokens::new("x", ',').unwrap()).unwrap();
        }
        assert_eq!(
            r.push_line(Tokens::new("x", ',').unwrap()),
            Err(ProtocolError::ResponseOverflow)
        );
        assert_eq!(
            r.push_raw(&[0; MAX_PAYLOAD_LEN + 1]),
            Err(ProtocolError::PayloadOverflow)
        );
    }
}
