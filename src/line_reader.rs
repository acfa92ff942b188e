//! Line framing of the modem output.
//!
//! Bytes are accumulated until a `\n` is seen. Trailing control characters
//! (`\r`) are stripped from every emitted line. A partial line is kept across
//! calls, so the lines produced for a byte stream do not depend on how the
//! stream was chunked. Lines longer than [`MAX_LINE_LEN`] are emitted in
//! [`MAX_LINE_LEN`] sized pieces, cut at the same positions for any chunking.

use heapless::Vec;

use crate::{error::ProtocolError, INGRESS_BUF_SIZE, MAX_LINE_LEN};

/// One decoded line, without its terminator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Line(Vec<u8, MAX_LINE_LEN>);

impl Line {
    /// Build a line from `bytes`, truncated to [`MAX_LINE_LEN`]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let len = bytes.len().min(MAX_LINE_LEN);
        let mut inner = Vec::new();
        // Cannot fail, `len` is within capacity
        let _ = inner.extend_from_slice(&bytes[..len]);
        Self(inner)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_str(&self) -> Result<&str, ProtocolError> {
        core::str::from_utf8(&self.0).map_err(|_| ProtocolError::InvalidUtf8)
    }

    /// Empty or whitespace only
    pub fn is_blank(&self) -> bool {
        self.0.iter().all(u8::is_ascii_whitespace)
    }
}

#[derive(Debug, Default)]
pub struct LineReader {
    buf: Vec<u8, INGRESS_BUF_SIZE>,
    dropped: usize,
}

impl LineReader {
    pub const fn new() -> Self {
        Self {
            buf: Vec::new(),
            dropped: 0,
        }
    }

    /// Lines completed by `bytes`, together with anything already buffered.
    ///
    /// Input that has not been consumed when the iterator is dropped is
    /// buffered for the next call, up to [`INGRESS_BUF_SIZE`] bytes. Input
    /// beyond that is discarded and counted in [`LineReader::dropped`].
    pub fn feed<'a>(&'a mut self, bytes: &'a [u8]) -> Lines<'a> {
        Lines {
            reader: self,
            input: bytes,
        }
    }

    /// Append as much of `bytes` as the buffer can hold, returning the number
    /// of bytes taken.
    pub fn push(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.buf.capacity() - self.buf.len());
        // Cannot fail, `n` fits the free space
        let _ = self.buf.extend_from_slice(&bytes[..n]);
        n
    }

    /// Next complete line in the buffer, if any
    pub fn next_line(&mut self) -> Option<Line> {
        let window = self.buf.len().min(MAX_LINE_LEN + 1);
        let (end, consumed) = match self.buf[..window].iter().position(|&b| b == b'\n') {
            Some(i) => (i, i + 1),
            // No terminator within reach of a full line, split it
            None if self.buf.len() > MAX_LINE_LEN => (MAX_LINE_LEN, MAX_LINE_LEN),
            None => return None,
        };

        let mut content = &self.buf[..end];
        while let Some((last, rest)) = content.split_last() {
            if !last.is_ascii_control() {
                break;
            }
            content = rest;
        }
        let line = Line::from_bytes(content);
        self.consume(consumed);
        Some(line)
    }

    /// Move up to `out.len()` buffered bytes into `out`, bypassing line
    /// framing. Used for length prefixed payloads.
    pub fn take_raw(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.buf.len());
        out[..n].copy_from_slice(&self.buf[..n]);
        self.consume(n);
        n
    }

    /// Bytes discarded so far because the buffer was full
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Number of buffered bytes not yet emitted
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    fn consume(&mut self, n: usize) {
        let len = self.buf.len();
        self.buf.copy_within(n..len, 0);
        self.buf.truncate(len - n);
    }
}

/// Iterator returned by [`LineReader::feed`].
pub struct Lines<'a> {
    reader: &'a mut LineReader,
    input: &'a [u8],
}

impl Iterator for Lines<'_> {
    type Item = Line;

    fn next(&mut self) -> Option<Line> {
        loop {
            if let Some(line) = self.reader.next_line() {
                return Some(line);
            }
            if self.input.is_empty() {
                return None;
            }
            let n = self.reader.push(self.input);
            if n == 0 {
                return None;
            }
            self.input = &self.input[n..];
        }
    }
}

impl Drop for Lines<'_> {
    fn drop(&mut self) {
        if self.input.is_empty() {
            return;
        }
        let n = self.reader.push(self.input);
        let lost = self.input.len() - n;
        if lost > 0 {
            warn!("Line buffer full, dropping {} bytes", lost);
            self.reader.dropped = self.reader.dropped.saturating_add(lost);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn collect(reader: &mut LineReader, bytes: &[u8]) -> std::vec::Vec<std::string::String> {
        reader
            .feed(bytes)
            .map(|l| std::string::String::from_utf8(l.as_bytes().to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn strips_terminators() {
        let mut reader = LineReader::new();
        assert_eq!(
            collect(&mut reader, b"AT\r\r\nOK\r\n\r\n"),
            vec!["AT", "OK", ""]
        );
        assert_eq!(reader.pending(), 0);
    }

    #[test]
    fn keeps_partial_lines() {
        let mut reader = LineReader::new();
        assert!(collect(&mut reader, b"+CSQ: 2").is_empty());
        assert_eq!(collect(&mut reader, b"1,0\r"), std::vec::Vec::<std::string::String>::new());
        assert_eq!(collect(&mut reader, b"\nOK"), vec!["+CSQ: 21,0"]);
        assert_eq!(reader.pending(), 2);
    }

    #[test]
    fn chunking_does_not_change_lines() {
        let stream: &[u8] = b"AT+GSN\r\r\n868822040061234\r\n\r\nOK\r\n+HTTPACTION: 0,200,12\r\n";

        let mut reader = LineReader::new();
        let whole = collect(&mut reader, stream);
        assert_eq!(whole.len(), 5);

        for split in 0..=stream.len() {
            let mut reader = LineReader::new();
            let mut lines = collect(&mut reader, &stream[..split]);
            lines.extend(collect(&mut reader, &stream[split..]));
            assert_eq!(lines, whole, "split at {}", split);
        }

        let mut reader = LineReader::new();
        let bytewise: std::vec::Vec<_> = stream
            .iter()
            .flat_map(|b| collect(&mut reader, core::slice::from_ref(b)))
            .collect();
        assert_eq!(bytewise, whole);
    }

    #[test]
    fn long_lines_are_split_deterministically() {
        let mut stream = std::vec![b'x'; MAX_LINE_LEN * 2 + 10];
        stream.extend_from_slice(b"\r\n");

        let mut reader = LineReader::new();
        let whole = collect(&mut reader, &stream);
        assert_eq!(
            whole.iter().map(|l| l.len()).collect::<std::vec::Vec<_>>(),
            vec![MAX_LINE_LEN, MAX_LINE_LEN, 10]
        );

        for split in [1, MAX_LINE_LEN, MAX_LINE_LEN + 1, stream.len() - 1] {
            let mut reader = LineReader::new();
            let mut lines = collect(&mut reader, &stream[..split]);
            lines.extend(collect(&mut reader, &stream[split..]));
            assert_eq!(lines, whole, "split at {}", split);
        }
    }

    #[test]
    fn line_of_exactly_max_len_is_not_split() {
        let mut stream = std::vec![b'y'; MAX_LINE_LEN];
        stream.push(b'\n');

        let mut reader = LineReader::new();
        let lines = collect(&mut reader, &stream);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), MAX_LINE_LEN);
    }

    #[test]
    fn dropped_iterator_keeps_input() {
        let mut reader = LineReader::new();
        {
            let mut lines = reader.feed(b"RDY\r\n+CFUN: 1\r\n+CPIN: READY\r\n");
            assert_eq!(lines.next().unwrap().as_bytes(), b"RDY");
        }
        assert_eq!(collect(&mut reader, b""), vec!["+CFUN: 1", "+CPIN: READY"]);
    }

    #[test]
    fn unread_input_beyond_capacity_is_counted() {
        let stream = std::vec![b'z'; INGRESS_BUF_SIZE + 16];
        let mut reader = LineReader::new();
        drop(reader.feed(&stream));

        assert_eq!(reader.pending(), INGRESS_BUF_SIZE);
        assert_eq!(reader.dropped(), 16);

        // Lines keep coming once the backlog is drained
        reader.clear();
        assert_eq!(collect(&mut reader, b"OK\r\n"), vec!["OK"]);
        assert_eq!(reader.dropped(), 16);
    }

    #[test]
    fn raw_bytes_bypass_framing() {
        let mut reader = LineReader::new();
        reader.push(b"+HTTPREAD: 5\r\nab\ncdOK\r\n");
        assert_eq!(reader.next_line().unwrap().as_bytes(), b"+HTTPREAD: 5");

        let mut out = [0u8; 5];
        assert_eq!(reader.take_raw(&mut out), 5);
        assert_eq!(&out, b"ab\ncd");
        assert_eq!(reader.next_line().unwrap().as_bytes(), b"OK");
    }

    #[test]
    fn invalid_utf8_is_reported() {
        let line = Line::from_bytes(&[0x4f, 0xff, 0x4b]);
        assert_eq!(line.to_str(), Err(ProtocolError::InvalidUtf8));
        assert!(Line::from_bytes(b"  ").is_blank());
    }
}
