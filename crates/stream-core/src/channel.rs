use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::{
    handler::{NoopHandler, StreamHandler},
    types::{FramingFault, StreamCommand, StreamEvent},
};

/// Broadcast event stream type used by subscribers.
pub type EventStream = broadcast::Receiver<StreamEvent>;

/// Errors returned by stream channel operations.
#[derive(Debug, Error)]
pub enum StreamChannelError {
    /// The command receiver side is closed.
    #[error("command channel is closed")]
    CommandChannelClosed,
}

/// Command/event channel pair shared by the driver and its callers.
#[derive(Clone, Debug)]
pub struct StreamChannels {
    command_tx: mpsc::Sender<StreamCommand>,
    event_tx: broadcast::Sender<StreamEvent>,
}

impl StreamChannels {
    /// Create a new channel set and return it with the command receiver.
    pub fn new(
        command_buffer: usize,
        event_buffer: usize,
    ) -> (Self, mpsc::Receiver<StreamCommand>) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));

        (
            Self {
                command_tx,
                event_tx,
            },
            command_rx,
        )
    }

    /// Build a handler that mirrors callbacks onto this channel set's events.
    pub fn handler<H>(&self, inner: H) -> ChannelHandler<H> {
        ChannelHandler {
            events: self.event_tx.clone(),
            inner,
        }
    }

    /// Subscribe to emitted stream events.
    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Ask the driver to start streaming.
    pub async fn start(&self) -> Result<(), StreamChannelError> {
        self.send_command(StreamCommand::Start).await
    }

    /// Ask the driver to close the session and stop reconnecting.
    pub async fn terminate(&self) -> Result<(), StreamChannelError> {
        self.send_command(StreamCommand::Terminate).await
    }

    async fn send_command(&self, command: StreamCommand) -> Result<(), StreamChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| StreamChannelError::CommandChannelClosed)
    }
}

/// Handler that mirrors every callback onto the event broadcast, then forwards it.
#[derive(Debug)]
pub struct ChannelHandler<H = NoopHandler> {
    events: broadcast::Sender<StreamEvent>,
    inner: H,
}

impl<H> ChannelHandler<H> {
    pub fn inner(&self) -> &H {
        &self.inner
    }

    pub fn into_inner(self) -> H {
        self.inner
    }

    fn emit(&self, event: StreamEvent) {
        let _ = self.events.send(event);
    }
}

impl<H: StreamHandler> StreamHandler for ChannelHandler<H> {
    fn on_success(&mut self, status: u16) {
        self.emit(StreamEvent::Connected { status });
        self.inner.on_success(status);
    }

    fn on_error(&mut self, status: u16) {
        self.emit(StreamEvent::HttpError { status });
        self.inner.on_error(status);
    }

    fn on_record(&mut self, record: &str) {
        self.emit(StreamEvent::Record {
            text: record.to_owned(),
        });
        self.inner.on_record(record);
    }

    fn on_scheduled_reconnect(&mut self, delay: Duration) {
        self.emit(StreamEvent::ScheduledReconnect {
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        });
        self.inner.on_scheduled_reconnect(delay);
    }

    fn on_max_reconnects_reached(&mut self) {
        self.emit(StreamEvent::MaxReconnectsReached);
        self.inner.on_max_reconnects_reached();
    }

    fn on_no_data_received(&mut self) {
        self.emit(StreamEvent::NoDataReceived);
        self.inner.on_no_data_received();
    }

    fn on_connection_closed(&mut self) {
        self.emit(StreamEvent::ConnectionClosed);
        self.inner.on_connection_closed();
    }

    fn on_framing_error(&mut self, fault: &FramingFault) {
        self.emit(StreamEvent::FramingError {
            reason: fault.to_string(),
        });
        self.inner.on_framing_error(fault);
    }
}
