use std::{collections::VecDeque, future::pending, pin::Pin, time::Duration};

use stream_core::{
    Action, CloseReason, ConnectionController, StreamCommand, StreamError, StreamHandler,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior, Sleep},
};
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::transport::{self, SessionStream, TransportError};

const READ_BUFFER_BYTES: usize = 16 * 1024;

type ConnectTask = JoinHandle<Result<SessionStream, TransportError>>;

/// What woke the driver loop.
enum Wake {
    Shutdown,
    Command(Option<StreamCommand>),
    Connected(Result<SessionStream, TransportError>),
    Read(std::io::Result<usize>),
    HealthCheck,
    ReconnectTimer,
}

/// Reactor executing controller actions against real sockets and timers.
pub(crate) struct StreamDriver<H> {
    controller: ConnectionController<H>,
    command_rx: mpsc::Receiver<StreamCommand>,
    shutdown: CancellationToken,
    tls: Option<TlsConnector>,
    session_id: Option<Uuid>,
    connecting: Option<ConnectTask>,
    session: Option<SessionStream>,
    health_check: Option<Interval>,
    reconnect: Option<Pin<Box<Sleep>>>,
}

impl<H: StreamHandler + 'static> StreamDriver<H> {
    pub(crate) fn new(
        controller: ConnectionController<H>,
        command_rx: mpsc::Receiver<StreamCommand>,
        shutdown: CancellationToken,
        tls: Option<TlsConnector>,
    ) -> Self {
        Self {
            controller,
            command_rx,
            shutdown,
            tls,
            session_id: None,
            connecting: None,
            session: None,
            health_check: None,
            reconnect: None,
        }
    }

    pub(crate) async fn run(mut self) -> H {
        match self.controller.start(now()) {
            Ok(actions) => self.execute(actions).await,
            Err(err) => warn!(error = %err, "initial start rejected"),
        }

        let mut buf = vec![0u8; READ_BUFFER_BYTES];
        loop {
            let wake = tokio::select! {
                _ = self.shutdown.cancelled() => Wake::Shutdown,
                command = self.command_rx.recv() => Wake::Command(command),
                result = wait_connect(&mut self.connecting) => Wake::Connected(result),
                read = wait_read(&mut self.session, &mut buf) => Wake::Read(read),
                _ = wait_tick(&mut self.health_check) => Wake::HealthCheck,
                _ = wait_sleep(&mut self.reconnect) => Wake::ReconnectTimer,
            };

            match wake {
                Wake::Shutdown | Wake::Command(None) => {
                    info!("stream driver shutting down");
                    let actions = self.controller.terminate();
                    self.execute(actions).await;
                    break;
                }
                Wake::Command(Some(StreamCommand::Start)) => match self.controller.start(now()) {
                    Ok(actions) => self.execute(actions).await,
                    Err(err) => warn!(error = %err, "start rejected"),
                },
                Wake::Command(Some(StreamCommand::Terminate)) => {
                    let actions = self.controller.terminate();
                    self.execute(actions).await;
                }
                Wake::Connected(Ok(stream)) => {
                    debug!(session = ?self.session_id, "session established");
                    self.session = Some(stream);
                    let actions = self.controller.session_established(now());
                    self.execute(actions).await;
                }
                Wake::Connected(Err(err)) => {
                    warn!(session = ?self.session_id, code = err.code(), error = %err, "session failed to open");
                    self.close_with(CloseReason::Error(err.to_stream_error())).await;
                }
                Wake::Read(Ok(0)) => {
                    debug!(session = ?self.session_id, "remote closed session");
                    self.session = None;
                    self.close_with(CloseReason::Remote).await;
                }
                Wake::Read(Ok(n)) => {
                    let actions = self.controller.bytes_received(&buf[..n], now());
                    self.execute(actions).await;
                }
                Wake::Read(Err(err)) => {
                    self.session = None;
                    self.close_with(CloseReason::Error(StreamError::network(
                        "session_read_failed",
                        err.to_string(),
                    )))
                    .await;
                }
                Wake::HealthCheck => {
                    let actions = self.controller.health_check(now());
                    self.execute(actions).await;
                }
                Wake::ReconnectTimer => {
                    let actions = self.controller.reconnect_timer_fired(now());
                    self.execute(actions).await;
                }
            }
        }

        self.controller.into_handler()
    }

    async fn close_with(&mut self, reason: CloseReason) {
        let actions = self.controller.session_closed(reason, now());
        self.execute(actions).await;
    }

    /// Run actions in order; follow-up actions from the controller are queued behind them.
    async fn execute(&mut self, actions: Vec<Action>) {
        let mut queue = VecDeque::from(actions);
        while let Some(action) = queue.pop_front() {
            match action {
                Action::OpenSession(target) => {
                    if let Some(task) = self.connecting.take() {
                        task.abort();
                    }
                    let session_id = Uuid::new_v4();
                    self.session_id = Some(session_id);
                    info!(
                        session = %session_id,
                        host = %target.host,
                        port = target.port,
                        secure = target.secure,
                        "opening session"
                    );
                    let tls = self.tls.clone();
                    self.connecting = Some(tokio::spawn(transport::connect(target, tls)));
                }
                Action::Send(bytes) => {
                    let Some(session) = self.session.as_mut() else {
                        warn!("send requested without an open session");
                        continue;
                    };
                    let written = async {
                        session.write_all(&bytes).await?;
                        session.flush().await
                    }
                    .await;
                    if let Err(err) = written {
                        warn!(session = ?self.session_id, error = %err, "request write failed");
                        self.session = None;
                        queue.extend(self.controller.session_closed(
                            CloseReason::Error(StreamError::network(
                                "session_write_failed",
                                err.to_string(),
                            )),
                            now(),
                        ));
                    }
                }
                Action::CloseSession => {
                    if let Some(task) = self.connecting.take() {
                        task.abort();
                    }
                    if let Some(mut session) = self.session.take() {
                        let _ = session.shutdown().await;
                    }
                    debug!(session = ?self.session_id, "session closed locally");
                    queue.extend(self.controller.session_closed(CloseReason::Local, now()));
                }
                Action::ScheduleReconnect(delay) => {
                    debug!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");
                    self.reconnect = Some(Box::pin(tokio::time::sleep(delay)));
                }
                Action::StartHealthCheck(period) => {
                    self.health_check = Some(health_interval(period));
                }
                Action::CancelHealthCheck => {
                    self.health_check = None;
                }
            }
        }
    }
}

fn now() -> std::time::Instant {
    Instant::now().into_std()
}

fn health_interval(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn wait_connect(task: &mut Option<ConnectTask>) -> Result<SessionStream, TransportError> {
    let Some(handle) = task.as_mut() else {
        return pending().await;
    };
    let joined = handle.await;
    *task = None;
    joined.map_err(|err| TransportError::Task(err.to_string()))?
}

async fn wait_read(session: &mut Option<SessionStream>, buf: &mut [u8]) -> std::io::Result<usize> {
    match session.as_mut() {
        Some(stream) => stream.read(buf).await,
        None => pending().await,
    }
}

async fn wait_tick(interval: &mut Option<Interval>) {
    match interval.as_mut() {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

async fn wait_sleep(sleep: &mut Option<Pin<Box<Sleep>>>) {
    let Some(timer) = sleep.as_mut() else {
        return pending().await;
    };
    timer.as_mut().await;
    *sleep = None;
}
