mod config;
mod logging;
mod printer;

use std::{process::ExitCode, sync::Arc};

use config::TailConfig;
use printer::RecordPrinter;
use stream_core::{StaticAuthorization, StreamEvent};
use stream_runtime::spawn_stream;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();

    let config = match TailConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    info!(
        host = %config.stream.host,
        port = config.stream.port,
        method = %config.stream.method,
        path = %config.stream.path,
        "starting stream-tail"
    );

    let signer = Arc::new(StaticAuthorization::new(config.authorization));
    let handle = match spawn_stream(config.stream, signer, RecordPrinter::stdout()) {
        Ok(handle) => handle,
        Err(err) => {
            error!(error = %err, "failed to start stream");
            return ExitCode::FAILURE;
        }
    };
    let mut events = handle.subscribe();

    let exhausted = tokio::select! {
        () = wait_for_termination() => {
            info!("termination signal received");
            false
        }
        () = wait_for_exhaustion(&mut events) => true,
    };

    match handle.shutdown().await {
        Ok(printer) => info!(printed = printer.printed(), "stream-tail stopped"),
        Err(err) => {
            error!(error = %err, "stream driver failed");
            return ExitCode::FAILURE;
        }
    }

    if exhausted {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn wait_for_exhaustion(events: &mut stream_core::EventStream) {
    loop {
        match events.recv().await {
            Ok(StreamEvent::MaxReconnectsReached) => return,
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event subscriber lagged"),
            Err(RecvError::Closed) => return,
        }
    }
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            warn!(error = %err, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}
