use std::time::Duration;

use crate::types::FramingFault;

/// Caller-facing callbacks, one per lifecycle event.
///
/// Every method defaults to a no-op so handlers only implement what they observe.
pub trait StreamHandler: Send {
    /// Status 200 was observed.
    fn on_success(&mut self, _status: u16) {}

    /// A status other than 200 was observed.
    fn on_error(&mut self, _status: u16) {}

    /// One complete record was framed.
    fn on_record(&mut self, _record: &str) {}

    /// A reconnect was scheduled; `Duration::ZERO` means immediate.
    fn on_scheduled_reconnect(&mut self, _delay: Duration) {}

    /// Backoff gave up. No further automatic attempts until `start` is called again.
    fn on_max_reconnects_reached(&mut self) {}

    /// The idle threshold elapsed without any bytes.
    fn on_no_data_received(&mut self) {}

    /// A session ended, for any reason.
    fn on_connection_closed(&mut self) {}

    /// A body fragment was rejected. Never affects the connection.
    fn on_framing_error(&mut self, _fault: &FramingFault) {}
}

/// Handler that ignores every callback.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl StreamHandler for NoopHandler {}

impl<H: StreamHandler + ?Sized> StreamHandler for Box<H> {
    fn on_success(&mut self, status: u16) {
        (**self).on_success(status)
    }

    fn on_error(&mut self, status: u16) {
        (**self).on_error(status)
    }

    fn on_record(&mut self, record: &str) {
        (**self).on_record(record)
    }

    fn on_scheduled_reconnect(&mut self, delay: Duration) {
        (**self).on_scheduled_reconnect(delay)
    }

    fn on_max_reconnects_reached(&mut self) {
        (**self).on_max_reconnects_reached()
    }

    fn on_no_data_received(&mut self) {
        (**self).on_no_data_received()
    }

    fn on_connection_closed(&mut self) {
        (**self).on_connection_closed()
    }

    fn on_framing_error(&mut self, fault: &FramingFault) {
        (**self).on_framing_error(fault)
    }
}
