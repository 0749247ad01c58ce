//! Record framing on top of the HTTP response decoder.
//!
//! The body is split on carriage returns. Each candidate line is trimmed and
//! either appended to the pending record (when it carries an opening or
//! closing brace) or reported as a framing error. A record is emitted once
//! the accumulated text both starts with `{` and ends with `}`. Lines and
//! unclosed records longer than the configured bound are dropped.

use bytes::BytesMut;
use tracing::debug;

use crate::{
    http::{ResponseDecoder, ResponsePart},
    types::{FramerEvent, FramingFault},
};

/// Byte separating candidate lines in the body.
pub const RECORD_DELIMITER: u8 = b'\r';
/// Default bound on one line and on one accumulated record.
pub const DEFAULT_MAX_RECORD_BYTES: usize = 1024 * 1024;

/// Incremental framer for one transport session.
#[derive(Debug)]
pub struct RecordFramer {
    decoder: ResponseDecoder,
    status: Option<u16>,
    fragment: BytesMut,
    pending_record: String,
    max_record_bytes: usize,
    /// Dropping an oversized line up to its delimiter.
    discarding: bool,
    poisoned: bool,
}

impl Default for RecordFramer {
    fn default() -> Self {
        Self::with_max_record_bytes(DEFAULT_MAX_RECORD_BYTES)
    }
}

impl RecordFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_record_bytes(max_record_bytes: usize) -> Self {
        Self {
            decoder: ResponseDecoder::new(),
            status: None,
            fragment: BytesMut::new(),
            pending_record: String::new(),
            max_record_bytes: max_record_bytes.max(1),
            discarding: false,
            poisoned: false,
        }
    }

    /// Status observed for this session, if the head has been parsed.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Bytes received after the last delimiter.
    pub fn pending_fragment(&self) -> &[u8] {
        &self.fragment
    }

    /// Text accumulated towards a record that is not yet brace-closed.
    pub fn pending_record(&self) -> &str {
        &self.pending_record
    }

    /// Feed raw transport bytes.
    pub fn feed(&mut self, data: &[u8]) -> Vec<FramerEvent> {
        let mut events = Vec::new();
        if self.poisoned {
            return events;
        }

        let mut parts = Vec::new();
        let decoded = self.decoder.feed(data, &mut parts);

        for part in parts {
            match part {
                ResponsePart::Head(head) => {
                    if self.status.is_none() {
                        self.status = Some(head.status);
                        events.push(FramerEvent::StatusObserved(head.status));
                    }
                }
                ResponsePart::Body(body) => self.frame_body(&body, &mut events),
                ResponsePart::End => debug!("response body reached its declared end"),
            }
        }

        if let Err(err) = decoded {
            // The byte stream is out of sync; nothing after this point can be trusted.
            self.poisoned = true;
            events.push(FramerEvent::FramingError(FramingFault::MalformedResponse(
                err.to_string(),
            )));
        }

        events
    }

    /// Flush whatever followed the last delimiter as an implicit final line.
    pub fn finish(&mut self) -> Vec<FramerEvent> {
        let mut events = Vec::new();
        if self.discarding {
            self.discarding = false;
            self.fragment.clear();
        } else if !self.fragment.is_empty() {
            let line = self.fragment.split();
            self.classify_line(&line, &mut events);
        }
        events
    }

    fn frame_body(&mut self, mut body: &[u8], events: &mut Vec<FramerEvent>) {
        while !body.is_empty() {
            let delimiter = body.iter().position(|b| *b == RECORD_DELIMITER);

            if self.discarding {
                let Some(pos) = delimiter else {
                    return;
                };
                self.discarding = false;
                body = &body[pos + 1..];
                continue;
            }

            let Some(pos) = delimiter else {
                self.fragment.extend_from_slice(body);
                if self.fragment.len() > self.max_record_bytes {
                    self.reject_oversized(events);
                    self.discarding = true;
                }
                return;
            };

            if self.fragment.len() + pos > self.max_record_bytes {
                self.reject_oversized(events);
            } else {
                self.fragment.extend_from_slice(&body[..pos]);
                let line = self.fragment.split();
                self.classify_line(&line, events);
            }
            body = &body[pos + 1..];
        }
    }

    fn classify_line(&mut self, line: &[u8], events: &mut Vec<FramerEvent>) {
        let text = String::from_utf8_lossy(line);
        let trimmed = text.trim();

        if trimmed.is_empty() {
            events.push(FramerEvent::FramingError(FramingFault::EmptyLine));
            return;
        }

        if !(trimmed.starts_with('{') || trimmed.ends_with('}')) {
            events.push(FramerEvent::FramingError(FramingFault::InvalidFragment));
            return;
        }

        if self.pending_record.len() + trimmed.len() > self.max_record_bytes {
            self.reject_oversized(events);
            return;
        }

        self.pending_record.push_str(trimmed);
        if looks_like_record(&self.pending_record) {
            events.push(FramerEvent::Record(std::mem::take(&mut self.pending_record)));
        }
    }

    fn reject_oversized(&mut self, events: &mut Vec<FramerEvent>) {
        debug!(limit = self.max_record_bytes, "dropping oversized record");
        self.fragment.clear();
        self.pending_record.clear();
        events.push(FramerEvent::FramingError(FramingFault::RecordTooLarge {
            limit: self.max_record_bytes,
        }));
    }
}

/// Textual record check: first character `{`, last character `}`.
pub fn looks_like_record(text: &str) -> bool {
    text.starts_with('{') && text.ends_with('}')
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEAD_200: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n";

    fn streaming_framer() -> RecordFramer {
        let mut framer = RecordFramer::new();
        assert_eq!(framer.feed(HEAD_200), vec![FramerEvent::StatusObserved(200)]);
        framer
    }

    fn record(text: &str) -> FramerEvent {
        FramerEvent::Record(text.to_owned())
    }

    #[test]
    fn emits_one_record_per_delimited_line() {
        let mut framer = streaming_framer();
        assert_eq!(framer.feed(b"{\"id\":1}\r"), vec![record("{\"id\":1}")]);
    }

    #[test]
    fn record_split_across_reads_is_emitted_once() {
        let mut framer = streaming_framer();
        assert!(framer.feed(b"{\"id\"").is_empty());
        assert_eq!(framer.feed(b":1}\r"), vec![record("{\"id\":1}")]);
        assert!(framer.finish().is_empty());
    }

    #[test]
    fn head_and_records_in_one_read() {
        let mut framer = RecordFramer::new();
        let mut wire = HEAD_200.to_vec();
        wire.extend_from_slice(b"{\"a\":1}\r\n{\"b\":2}\r\n");
        let events = framer.feed(&wire);
        assert_eq!(
            events,
            vec![
                FramerEvent::StatusObserved(200),
                record("{\"a\":1}"),
                record("{\"b\":2}"),
            ]
        );
        // The trailing "\n" is held as a fragment until the next delimiter.
        assert_eq!(framer.pending_fragment(), b"\n");
    }

    #[test]
    fn blank_line_is_a_framing_error() {
        let mut framer = streaming_framer();
        assert_eq!(
            framer.feed(b"\r"),
            vec![FramerEvent::FramingError(FramingFault::EmptyLine)]
        );
        assert_eq!(
            framer.feed(b"\n\r"),
            vec![FramerEvent::FramingError(FramingFault::EmptyLine)]
        );
    }

    #[test]
    fn fragment_without_braces_is_rejected_and_not_buffered() {
        let mut framer = streaming_framer();
        assert_eq!(
            framer.feed(b"hello\r"),
            vec![FramerEvent::FramingError(FramingFault::InvalidFragment)]
        );
        assert_eq!(framer.pending_record(), "");
    }

    #[test]
    fn record_spanning_two_lines_is_joined() {
        let mut framer = streaming_framer();
        assert!(framer.feed(b"{\"text\":\"line one\r").is_empty());
        assert_eq!(framer.pending_record(), "{\"text\":\"line one");
        assert_eq!(
            framer.feed(b"line two\"}\r"),
            vec![record("{\"text\":\"line oneline two\"}")]
        );
    }

    #[test]
    fn finish_flushes_a_record_cut_by_connection_close() {
        let mut framer = streaming_framer();
        assert!(framer.feed(b"{\"id\":7}").is_empty());
        assert_eq!(framer.finish(), vec![record("{\"id\":7}")]);
        assert!(framer.pending_fragment().is_empty());
    }

    #[test]
    fn status_is_reported_once_per_session() {
        let mut framer = RecordFramer::new();
        let events = framer.feed(b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\n\r\n");
        assert_eq!(events, vec![FramerEvent::StatusObserved(503)]);
        assert_eq!(framer.status(), Some(503));
        assert!(framer.feed(b"HTTP/1.1 200 OK\r\n\r\n").is_empty());
    }

    #[test]
    fn chunked_body_is_framed_transparently() {
        let mut framer = RecordFramer::new();
        let mut events =
            framer.feed(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n6\r\n{\"id\":");
        events.extend(framer.feed(b"\r\n4\r\n2}\r\n\r\n"));
        assert_eq!(
            events,
            vec![FramerEvent::StatusObserved(200), record("{\"id\":2}")]
        );
    }

    #[test]
    fn records_before_a_decode_error_are_kept() {
        let mut framer = RecordFramer::new();
        let events = framer
            .feed(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n9\r\n{\"id\":1}\rXX");

        assert_eq!(
            events,
            vec![
                FramerEvent::StatusObserved(200),
                record("{\"id\":1}"),
                FramerEvent::FramingError(FramingFault::MalformedResponse(
                    "missing CRLF after chunk data".to_owned()
                )),
            ]
        );
    }

    #[test]
    fn unterminated_line_is_bounded() {
        let mut framer = RecordFramer::with_max_record_bytes(16);
        assert_eq!(framer.feed(HEAD_200), vec![FramerEvent::StatusObserved(200)]);

        assert!(framer.feed(b"{\"text\":\"0123").is_empty());
        assert_eq!(
            framer.feed(b"456789abcdef"),
            vec![FramerEvent::FramingError(FramingFault::RecordTooLarge { limit: 16 })]
        );
        assert!(framer.pending_fragment().is_empty());

        // The rest of the oversized line is skipped up to its delimiter.
        assert!(framer.feed(b"more\"}").is_empty());
        assert_eq!(framer.feed(b"\r{\"id\":1}\r"), vec![record("{\"id\":1}")]);
    }

    #[test]
    fn delimited_line_over_limit_is_rejected() {
        let mut framer = RecordFramer::with_max_record_bytes(8);
        framer.feed(HEAD_200);

        assert_eq!(
            framer.feed(b"{\"id\":123456}\r{\"id\":1}\r"),
            vec![
                FramerEvent::FramingError(FramingFault::RecordTooLarge { limit: 8 }),
                record("{\"id\":1}"),
            ]
        );
    }

    #[test]
    fn unclosed_record_is_bounded() {
        let mut framer = RecordFramer::with_max_record_bytes(12);
        framer.feed(HEAD_200);

        assert!(framer.feed(b"{\"a\":\"1234\r").is_empty());
        assert_eq!(framer.pending_record(), "{\"a\":\"1234");
        assert_eq!(
            framer.feed(b"{\"b\":1\r"),
            vec![FramerEvent::FramingError(FramingFault::RecordTooLarge { limit: 12 })]
        );
        assert_eq!(framer.pending_record(), "");
        assert_eq!(framer.feed(b"{\"c\":1}\r"), vec![record("{\"c\":1}")]);
    }

    #[test]
    fn malformed_response_poisons_the_session() {
        let mut framer = RecordFramer::new();
        let events = framer.feed(b"garbage\r\n\r\n");
        assert!(matches!(
            events.as_slice(),
            [FramerEvent::FramingError(FramingFault::MalformedResponse(_))]
        ));
        assert!(framer.feed(b"{\"id\":1}\r").is_empty());
    }
}
