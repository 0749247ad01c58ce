//! Sans-I/O connection state machine.
//!
//! The controller never touches a socket or a clock. The host reactor feeds it
//! inputs (`start`, `session_established`, `bytes_received`, `health_check`,
//! `session_closed`, `reconnect_timer_fired`, `terminate`) together with the
//! current time, and executes the [`Action`]s it returns in order.

use std::{sync::Arc, time::Duration, time::Instant};

use tracing::{debug, info, warn};

use crate::{
    backoff::{BackoffPolicy, BackoffState},
    config::StreamConfig,
    error::{StreamError, StreamErrorCategory, classify_status},
    framer::RecordFramer,
    handler::StreamHandler,
    request::{RequestBuilder, RequestSigner},
    types::{CloseReason, ConnectionState, FramerEvent, FramingFault, ReconnectDelay},
};

/// Where the reactor should open the next transport session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget {
    pub host: String,
    pub port: u16,
    /// Upgrade to TLS before reporting the session as established.
    pub secure: bool,
}

/// Side effect requested from the reactor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Connect (and upgrade to TLS when `secure`), then call `session_established`.
    OpenSession(SessionTarget),
    /// Write these bytes to the open session.
    Send(Vec<u8>),
    /// Close the open session, then call `session_closed`.
    CloseSession,
    /// Arm a one-shot timer, then call `reconnect_timer_fired`.
    ScheduleReconnect(Duration),
    /// Arm the periodic health check timer.
    StartHealthCheck(Duration),
    /// Disarm the periodic health check timer.
    CancelHealthCheck,
}

/// Owns one logical stream: its framer, its backoff policy and its handler.
pub struct ConnectionController<H> {
    config: StreamConfig,
    request: RequestBuilder,
    signer: Arc<dyn RequestSigner>,
    handler: H,
    backoff: BackoffPolicy,
    framer: RecordFramer,
    state: ConnectionState,
    terminal_status: u16,
    session_open: bool,
    session_started: Option<Instant>,
    last_data: Option<Instant>,
    /// A local close was requested for the current session.
    closing: bool,
    /// First failure seen in the current session.
    session_error: Option<StreamError>,
    last_error: Option<StreamError>,
    reconnect_pending: bool,
    health_check_armed: bool,
    intentionally_closed: bool,
}

impl<H: StreamHandler> ConnectionController<H> {
    pub fn new(config: StreamConfig, signer: Arc<dyn RequestSigner>, handler: H) -> Self {
        let request = RequestBuilder::from_config(&config);
        let backoff = BackoffPolicy::new(config.backoff);
        let framer = RecordFramer::with_max_record_bytes(config.max_record_bytes);
        Self {
            config,
            request,
            signer,
            handler,
            backoff,
            framer,
            state: ConnectionState::Init,
            terminal_status: 0,
            session_open: false,
            session_started: None,
            last_data: None,
            closing: false,
            session_error: None,
            last_error: None,
            reconnect_pending: false,
            health_check_armed: false,
            intentionally_closed: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn backoff_state(&self) -> BackoffState {
        self.backoff.state()
    }

    /// Status of the current session, 0 until a non-200 status is observed.
    pub fn terminal_status(&self) -> u16 {
        self.terminal_status
    }

    pub fn is_session_open(&self) -> bool {
        self.session_open
    }

    pub fn is_reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    pub fn is_intentionally_closed(&self) -> bool {
        self.intentionally_closed
    }

    /// Cause of the most recent session end, if it ended on a failure.
    pub fn last_error(&self) -> Option<&StreamError> {
        self.last_error.as_ref()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Begin streaming. Allowed from `Init` or `Closed` while no session is open.
    pub fn start(&mut self, now: Instant) -> Result<Vec<Action>, StreamError> {
        if self.session_open
            || !matches!(
                self.state,
                ConnectionState::Init | ConnectionState::Closed
            )
        {
            return Err(StreamError::invalid_state(self.state, "start"));
        }

        self.intentionally_closed = false;
        self.reconnect_pending = false;
        self.backoff.reset();
        self.state = ConnectionState::Init;

        let mut actions = Vec::with_capacity(2);
        if !self.health_check_armed {
            self.health_check_armed = true;
            actions.push(Action::StartHealthCheck(self.config.health_check_interval));
        }
        actions.push(self.open_session(now));
        Ok(actions)
    }

    /// The transport (and TLS, when required) is up: reset per-session state and send the request.
    pub fn session_established(&mut self, now: Instant) -> Vec<Action> {
        if !self.session_open || self.intentionally_closed {
            debug!("session established after close was requested");
            return vec![Action::CloseSession];
        }

        self.framer = RecordFramer::with_max_record_bytes(self.config.max_record_bytes);
        self.state = ConnectionState::AwaitingResponse;
        self.terminal_status = 0;
        self.session_started = Some(now);
        self.last_data = None;

        match self.request.build(self.signer.as_ref()) {
            Ok(bytes) => {
                debug!(
                    method = %self.request.method(),
                    uri = %self.request.request_uri(),
                    "sending stream request"
                );
                vec![Action::Send(bytes)]
            }
            Err(err) => {
                warn!(error = %err, "failed to sign stream request");
                self.record_error(err);
                self.request_close()
            }
        }
    }

    /// Route raw session bytes through the framer into handler callbacks.
    ///
    /// Returns `CloseSession` once the response can no longer be decoded.
    pub fn bytes_received(&mut self, data: &[u8], now: Instant) -> Vec<Action> {
        if !self.session_open {
            return Vec::new();
        }
        self.last_data = Some(now);
        let events = self.framer.feed(data);
        match self.dispatch(events) {
            Some(fault) => {
                warn!(reason = %fault, "response is undecodable, closing session");
                self.record_error(StreamError::new(
                    StreamErrorCategory::Framing,
                    "malformed_response",
                    fault.to_string(),
                ));
                self.request_close()
            }
            None => Vec::new(),
        }
    }

    /// Periodic idle check. Closes the session once nothing arrived for `idle_timeout`.
    pub fn health_check(&mut self, now: Instant) -> Vec<Action> {
        if self.state == ConnectionState::Closed
            || self.intentionally_closed
            || !self.session_open
            || self.closing
        {
            return Vec::new();
        }

        let Some(reference) = self.last_data.or(self.session_started) else {
            return Vec::new();
        };
        let idle = now.saturating_duration_since(reference);
        if idle < self.config.idle_timeout {
            return Vec::new();
        }

        warn!(idle_ms = idle.as_millis() as u64, "no data received, closing session");
        self.record_error(StreamError::new(
            StreamErrorCategory::IdleTimeout,
            "no_data_received",
            format!("no data for {} ms", idle.as_millis()),
        ));
        self.handler.on_no_data_received();
        self.request_close()
    }

    /// The session ended, remotely, locally or through a transport error.
    pub fn session_closed(&mut self, reason: CloseReason, now: Instant) -> Vec<Action> {
        if !self.session_open {
            return Vec::new();
        }
        self.session_open = false;
        self.closing = false;

        match reason {
            CloseReason::Remote => debug!("session closed by remote"),
            CloseReason::Local => debug!("session closed locally"),
            CloseReason::Error(err) => {
                warn!(error = %err, "session failed");
                self.record_error(err);
            }
        }
        let cause = self.session_error.take();

        if self.intentionally_closed {
            self.last_error = cause;
            self.state = ConnectionState::Closed;
            self.handler.on_connection_closed();
            return Vec::new();
        }

        if self.state == ConnectionState::Streaming {
            let events = self.framer.finish();
            let _ = self.dispatch(events);
        }

        let class = classify_status(self.terminal_status);
        let delay = self.backoff.next_delay(class);
        info!(
            status = self.terminal_status,
            class = ?class,
            cause = cause.as_ref().map_or("none", |err| err.code.as_str()),
            recoverable = cause.as_ref().is_none_or(StreamError::is_recoverable),
            retry_count = self.backoff.state().retry_count,
            delay = ?delay,
            "session ended"
        );
        self.last_error = cause;

        let mut actions = Vec::new();
        match delay {
            ReconnectDelay::Exhausted => {
                let err = StreamError::new(
                    StreamErrorCategory::Exhausted,
                    "reconnects_exhausted",
                    format!("{class:?} backoff gave up"),
                );
                warn!(error = %err, "reconnect attempts exhausted");
                self.last_error = Some(err);
                self.handler.on_max_reconnects_reached();
                self.intentionally_closed = true;
                if self.health_check_armed {
                    self.health_check_armed = false;
                    actions.push(Action::CancelHealthCheck);
                }
            }
            ReconnectDelay::Immediate => {
                self.handler.on_scheduled_reconnect(Duration::ZERO);
                actions.push(self.open_session(now));
            }
            ReconnectDelay::After(wait) => {
                self.handler.on_scheduled_reconnect(wait);
                self.reconnect_pending = true;
                actions.push(Action::ScheduleReconnect(wait));
            }
        }

        self.handler.on_connection_closed();
        self.state = ConnectionState::Init;
        actions
    }

    /// The one-shot reconnect timer elapsed.
    pub fn reconnect_timer_fired(&mut self, now: Instant) -> Vec<Action> {
        if !self.reconnect_pending || self.intentionally_closed || self.session_open {
            debug!("ignoring stale reconnect timer");
            return Vec::new();
        }
        self.reconnect_pending = false;
        vec![self.open_session(now)]
    }

    /// Close on purpose and suppress reconnection until the next `start`.
    pub fn terminate(&mut self) -> Vec<Action> {
        self.intentionally_closed = true;
        self.reconnect_pending = false;

        let mut actions = Vec::with_capacity(2);
        if self.health_check_armed {
            self.health_check_armed = false;
            actions.push(Action::CancelHealthCheck);
        }
        if self.session_open {
            actions.push(Action::CloseSession);
        } else {
            self.state = ConnectionState::Closed;
        }
        info!("stream terminated");
        actions
    }

    fn open_session(&mut self, now: Instant) -> Action {
        self.session_open = true;
        self.closing = false;
        self.session_error = None;
        self.session_started = Some(now);
        self.last_data = None;
        Action::OpenSession(SessionTarget {
            host: self.config.host.clone(),
            port: self.config.port,
            secure: self.config.scheme.is_secure(),
        })
    }

    /// Ask the reactor to close the session, at most once per session.
    fn request_close(&mut self) -> Vec<Action> {
        if self.closing {
            return Vec::new();
        }
        self.closing = true;
        vec![Action::CloseSession]
    }

    /// Keep the first failure of a session as its cause.
    fn record_error(&mut self, err: StreamError) {
        if self.session_error.is_none() {
            self.session_error = Some(err);
        }
    }

    /// Forward framer output to the handler. Returns the fault that ended decoding, if any.
    fn dispatch(&mut self, events: Vec<FramerEvent>) -> Option<FramingFault> {
        let mut fatal = None;
        for event in events {
            match event {
                FramerEvent::StatusObserved(200) => {
                    info!(status = 200, "stream connected");
                    self.state = ConnectionState::Streaming;
                    self.backoff.reset();
                    self.handler.on_success(200);
                }
                FramerEvent::StatusObserved(status) => {
                    warn!(status, "stream rejected");
                    self.terminal_status = status;
                    self.record_error(StreamError::new(
                        StreamErrorCategory::Application,
                        "http_status",
                        format!("server answered {status}"),
                    ));
                    self.handler.on_error(status);
                }
                FramerEvent::Record(text) => self.handler.on_record(&text),
                FramerEvent::FramingError(fault) => {
                    debug!(reason = %fault, "framing error");
                    self.handler.on_framing_error(&fault);
                    if fault.is_fatal() {
                        fatal = Some(fault);
                    }
                }
            }
        }
        fatal
    }
}
