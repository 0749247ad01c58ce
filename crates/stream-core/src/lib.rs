//! Core streaming client logic shared between the runtime driver and its callers.
//!
//! This crate holds the reconnect backoff policy, the HTTP response decoder and
//! record framer, the sans-I/O connection controller, request formatting and
//! the event/channel abstractions. Nothing here performs I/O.

/// Reconnect delay policy with independent network and HTTP tracks.
pub mod backoff;
/// Async command/event channel primitives.
pub mod channel;
/// Immutable stream configuration and environment parsing.
pub mod config;
/// Sans-I/O connection state machine.
pub mod controller;
/// Stable stream error types and status classification.
pub mod error;
/// Record framing over a decoded response body.
pub mod framer;
/// Caller callback surface.
pub mod handler;
/// Incremental HTTP/1.1 response decoder.
pub mod http;
/// Outbound request formatting and signing seam.
pub mod request;
/// Lifecycle, framing and event types.
pub mod types;

pub use backoff::{BackoffConfig, BackoffPolicy, BackoffState, ClassDelay};
pub use channel::{ChannelHandler, EventStream, StreamChannelError, StreamChannels};
pub use config::{ConfigError, Scheme, StreamConfig};
pub use controller::{Action, ConnectionController, SessionTarget};
pub use error::{StreamError, StreamErrorCategory, classify_status};
pub use framer::{DEFAULT_MAX_RECORD_BYTES, RECORD_DELIMITER, RecordFramer, looks_like_record};
pub use handler::{NoopHandler, StreamHandler};
pub use http::{DecodeError, ResponseDecoder, ResponseHead, ResponsePart};
pub use request::{RequestBuilder, RequestMethod, RequestSigner, StaticAuthorization};
pub use types::{
    CloseReason, ConnectionState, FailureClass, FramerEvent, FramingFault, ReconnectDelay,
    StreamCommand, StreamEvent,
};
