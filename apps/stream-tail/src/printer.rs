use std::{
    io::{self, Write},
    time::Duration,
};

use stream_core::{FramingFault, StreamHandler};
use tracing::{debug, error, info, warn};

/// Prints every record that parses as JSON, compacted, one per line.
pub struct RecordPrinter<W> {
    out: W,
    printed: u64,
}

impl RecordPrinter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> RecordPrinter<W> {
    pub fn new(out: W) -> Self {
        Self { out, printed: 0 }
    }

    pub fn printed(&self) -> u64 {
        self.printed
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> StreamHandler for RecordPrinter<W> {
    fn on_success(&mut self, status: u16) {
        info!(status, "stream connected");
    }

    fn on_error(&mut self, status: u16) {
        warn!(status, "stream returned an error status");
    }

    fn on_record(&mut self, record: &str) {
        let value = match serde_json::from_str::<serde_json::Value>(record) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, record, "record is not valid JSON");
                return;
            }
        };

        if let Err(err) = writeln!(self.out, "{value}").and_then(|()| self.out.flush()) {
            error!(error = %err, "failed to print record");
            return;
        }
        self.printed += 1;
    }

    fn on_scheduled_reconnect(&mut self, delay: Duration) {
        info!(delay_secs = delay.as_secs_f64(), "reconnect scheduled");
    }

    fn on_max_reconnects_reached(&mut self) {
        error!("maximum reconnects reached, giving up");
    }

    fn on_no_data_received(&mut self) {
        warn!("no data received, reconnecting");
    }

    fn on_connection_closed(&mut self) {
        info!(printed = self.printed, "connection closed");
    }

    fn on_framing_error(&mut self, fault: &FramingFault) {
        debug!(reason = %fault, "skipped body fragment");
    }
}
