use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection lifecycle state owned by the controller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport session is established.
    Init,
    /// Transport is open and the request was sent; status not yet classified.
    AwaitingResponse,
    /// A success status was observed and records may be flowing.
    Streaming,
    /// The controller was closed on purpose and will not reconnect until started again.
    Closed,
}

/// Backoff class selected from the terminal status of a failed session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FailureClass {
    /// The transport never produced a response (status 0).
    Network,
    /// The server answered with a status other than 200.
    Application,
}

/// Outcome of asking the backoff policy when to reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDelay {
    /// Reconnect right away.
    Immediate,
    /// Reconnect once the delay has elapsed.
    After(Duration),
    /// Stop reconnecting.
    Exhausted,
}

impl ReconnectDelay {
    /// Delay until the next attempt, `None` once exhausted.
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::Immediate => Some(Duration::ZERO),
            Self::After(delay) => Some(*delay),
            Self::Exhausted => None,
        }
    }
}

/// Reason a body fragment could not be turned into a record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum FramingFault {
    /// A delimiter-terminated line was blank after trimming.
    EmptyLine,
    /// A line carried neither an opening nor a closing brace.
    InvalidFragment,
    /// The HTTP response itself could not be decoded.
    MalformedResponse(String),
    /// A line or an unclosed record grew past the configured bound and was dropped.
    RecordTooLarge { limit: usize },
}

impl FramingFault {
    /// Whether the rest of the session is unreadable after this fault.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MalformedResponse(_))
    }
}

impl std::fmt::Display for FramingFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyLine => write!(f, "empty line"),
            Self::InvalidFragment => write!(f, "invalid fragment"),
            Self::MalformedResponse(reason) => write!(f, "malformed response: {reason}"),
            Self::RecordTooLarge { limit } => write!(f, "record exceeds {limit} bytes"),
        }
    }
}

/// Output of the record framer for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramerEvent {
    /// Status code from the response head, emitted once per session.
    StatusObserved(u16),
    /// One trimmed, brace-delimited record.
    Record(String),
    /// Non-fatal framing problem.
    FramingError(FramingFault),
}

/// Why a transport session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The server closed the connection.
    Remote,
    /// The session was closed locally (terminate or idle timeout).
    Local,
    /// Connect, TLS or I/O failure.
    Error(crate::error::StreamError),
}

/// Commands accepted by a running stream driver.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StreamCommand {
    /// Begin streaming again after a terminate or exhaustion.
    Start,
    /// Close the session on purpose and stop reconnecting.
    Terminate,
}

/// Serializable mirror of every handler callback, fanned out to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StreamEvent {
    /// Status 200 observed.
    Connected { status: u16 },
    /// Non-200 status observed.
    HttpError { status: u16 },
    /// One complete record.
    Record { text: String },
    /// A reconnect was scheduled; zero means immediate.
    ScheduledReconnect { delay_ms: u64 },
    /// Backoff gave up; the stream stays closed until started again.
    MaxReconnectsReached,
    /// Nothing was received within the idle threshold.
    NoDataReceived,
    /// A session ended.
    ConnectionClosed,
    /// A body fragment was rejected by the framer.
    FramingError { reason: String },
}
