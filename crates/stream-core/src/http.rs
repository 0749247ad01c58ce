//! Incremental HTTP/1.1 response decoder on top of `httparse`.
//!
//! `httparse` parses the head, chunk-size lines and trailers. This module only
//! tracks where the body ends. Feeding is byte-oriented: a head or chunk may be
//! split across any number of reads.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Upper bound on the status line plus headers, and on chunk trailers.
pub const MAX_HEAD_BYTES: usize = 64 * 1024;
/// Upper bound on one chunk-size line, extensions included.
pub const MAX_CHUNK_LINE_BYTES: usize = 1024;
const MAX_HEADERS: usize = 64;

/// Errors produced while decoding a response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed response head: {0}")]
    Head(String),
    #[error("response head exceeds {MAX_HEAD_BYTES} bytes")]
    HeadTooLarge,
    #[error("invalid chunk size line")]
    ChunkSize,
    #[error("chunk size line exceeds {MAX_CHUNK_LINE_BYTES} bytes")]
    ChunkLineTooLong,
    #[error("missing CRLF after chunk data")]
    ChunkTerminator,
    #[error("malformed chunk trailers: {0}")]
    Trailers(String),
}

/// Parsed status line and headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    /// Case-insensitive header lookup, first match wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn body_framing(&self) -> BodyFraming {
        let chunked = self.header("transfer-encoding").is_some_and(|value| {
            value
                .split(',')
                .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
        });
        if chunked {
            return BodyFraming::Chunked(ChunkState::Size);
        }

        match self
            .header("content-length")
            .and_then(|value| value.trim().parse::<usize>().ok())
        {
            Some(length) => BodyFraming::Length(length),
            None => BodyFraming::UntilClose,
        }
    }
}

/// One decoded piece of the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePart {
    Head(ResponseHead),
    Body(Bytes),
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(usize),
    DataEnd,
    Trailers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyFraming {
    Chunked(ChunkState),
    Length(usize),
    UntilClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Head,
    Body(BodyFraming),
    Done,
}

/// Stateful decoder for a single response.
#[derive(Debug)]
pub struct ResponseDecoder {
    buffer: BytesMut,
    state: DecodeState,
}

impl Default for ResponseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            state: DecodeState::Head,
        }
    }

    /// Whether the head has been parsed.
    pub fn head_complete(&self) -> bool {
        !matches!(self.state, DecodeState::Head)
    }

    /// Whether the body reached its declared end.
    pub fn is_done(&self) -> bool {
        matches!(self.state, DecodeState::Done)
    }

    /// Feed raw bytes, appending every part that became available to `parts`.
    ///
    /// Parts decoded before an error stay in `parts`.
    pub fn feed(&mut self, data: &[u8], parts: &mut Vec<ResponsePart>) -> Result<(), DecodeError> {
        if self.is_done() {
            return Ok(());
        }
        self.buffer.extend_from_slice(data);

        loop {
            match self.state {
                DecodeState::Head => {
                    let Some((consumed, head)) = parse_head(&self.buffer)? else {
                        if self.buffer.len() > MAX_HEAD_BYTES {
                            return Err(DecodeError::HeadTooLarge);
                        }
                        return Ok(());
                    };
                    self.buffer.advance(consumed);
                    let framing = head.body_framing();
                    parts.push(ResponsePart::Head(head));
                    self.state = match framing {
                        BodyFraming::Length(0) => {
                            parts.push(ResponsePart::End);
                            DecodeState::Done
                        }
                        other => DecodeState::Body(other),
                    };
                }
                DecodeState::Body(BodyFraming::UntilClose) => {
                    if !self.buffer.is_empty() {
                        parts.push(ResponsePart::Body(self.buffer.split().freeze()));
                    }
                    return Ok(());
                }
                DecodeState::Body(BodyFraming::Length(remaining)) => {
                    if self.buffer.is_empty() {
                        return Ok(());
                    }
                    let take = remaining.min(self.buffer.len());
                    parts.push(ResponsePart::Body(self.buffer.split_to(take).freeze()));
                    self.state = match remaining - take {
                        0 => {
                            parts.push(ResponsePart::End);
                            DecodeState::Done
                        }
                        left => DecodeState::Body(BodyFraming::Length(left)),
                    };
                }
                DecodeState::Body(BodyFraming::Chunked(chunk)) => {
                    if !self.step_chunked(chunk, parts)? {
                        return Ok(());
                    }
                }
                DecodeState::Done => {
                    self.buffer.clear();
                    return Ok(());
                }
            }
        }
    }

    /// Advance the chunked body by one step; `false` means more input is needed.
    fn step_chunked(
        &mut self,
        chunk: ChunkState,
        parts: &mut Vec<ResponsePart>,
    ) -> Result<bool, DecodeError> {
        let next = match chunk {
            ChunkState::Size => {
                let (consumed, size) = match httparse::parse_chunk_size(&self.buffer) {
                    Ok(httparse::Status::Complete(parsed)) => parsed,
                    Ok(httparse::Status::Partial) if self.buffer.len() > MAX_CHUNK_LINE_BYTES => {
                        return Err(DecodeError::ChunkLineTooLong);
                    }
                    Ok(httparse::Status::Partial) => return Ok(false),
                    Err(_) => return Err(DecodeError::ChunkSize),
                };
                self.buffer.advance(consumed);
                match usize::try_from(size) {
                    Ok(0) => ChunkState::Trailers,
                    Ok(size) => ChunkState::Data(size),
                    Err(_) => return Err(DecodeError::ChunkSize),
                }
            }
            ChunkState::Data(remaining) => {
                if self.buffer.is_empty() {
                    return Ok(false);
                }
                let take = remaining.min(self.buffer.len());
                parts.push(ResponsePart::Body(self.buffer.split_to(take).freeze()));
                match remaining - take {
                    0 => ChunkState::DataEnd,
                    left => ChunkState::Data(left),
                }
            }
            ChunkState::DataEnd => {
                if self.buffer.len() < 2 {
                    return Ok(false);
                }
                if &self.buffer[..2] != b"\r\n" {
                    return Err(DecodeError::ChunkTerminator);
                }
                self.buffer.advance(2);
                ChunkState::Size
            }
            ChunkState::Trailers => {
                let mut trailers = [httparse::EMPTY_HEADER; MAX_HEADERS];
                let consumed = match httparse::parse_headers(&self.buffer, &mut trailers) {
                    Ok(httparse::Status::Complete((consumed, _))) => consumed,
                    Ok(httparse::Status::Partial) if self.buffer.len() > MAX_HEAD_BYTES => {
                        return Err(DecodeError::HeadTooLarge);
                    }
                    Ok(httparse::Status::Partial) => return Ok(false),
                    Err(err) => return Err(DecodeError::Trailers(err.to_string())),
                };
                self.buffer.advance(consumed);
                parts.push(ResponsePart::End);
                self.state = DecodeState::Done;
                return Ok(true);
            }
        };
        self.state = DecodeState::Body(BodyFraming::Chunked(next));
        Ok(true)
    }
}

/// Parse the response head, returning the bytes it occupied once complete.
fn parse_head(buffer: &[u8]) -> Result<Option<(usize, ResponseHead)>, DecodeError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    let consumed = match response.parse(buffer) {
        Ok(httparse::Status::Complete(consumed)) => consumed,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(err) => return Err(DecodeError::Head(err.to_string())),
    };

    let head = ResponseHead {
        status: response.code.unwrap_or_default(),
        reason: response.reason.unwrap_or_default().to_owned(),
        headers: response
            .headers
            .iter()
            .map(|header| {
                (
                    header.name.to_owned(),
                    String::from_utf8_lossy(header.value).into_owned(),
                )
            })
            .collect(),
    };
    Ok(Some((consumed, head)))
}
