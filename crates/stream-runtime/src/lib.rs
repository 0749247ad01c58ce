//! tokio reactor for the streaming client.
//!
//! [`spawn_stream`] owns the socket, the health check interval and the
//! reconnect timer, and feeds a [`ConnectionController`] until it is shut down.

mod driver;
/// TCP/TLS session plumbing.
pub mod transport;

use std::sync::Arc;

use stream_core::{
    ChannelHandler, ConnectionController, EventStream, RequestSigner, StreamChannelError,
    StreamChannels, StreamConfig, StreamHandler,
};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::driver::StreamDriver;
pub use crate::transport::{
    SessionStream, TransportError, default_tls_connector, tls_connector_with_roots,
};

const COMMAND_BUFFER: usize = 16;
const EVENT_BUFFER: usize = 512;

/// Handle to a running stream driver.
#[derive(Debug)]
pub struct StreamHandle<H = stream_core::NoopHandler> {
    channels: StreamChannels,
    shutdown: CancellationToken,
    task: JoinHandle<ChannelHandler<H>>,
}

impl<H> StreamHandle<H> {
    /// Start streaming again after a terminate or after backoff gave up.
    pub async fn start(&self) -> Result<(), StreamChannelError> {
        self.channels.start().await
    }

    /// Close the current session and suppress reconnection.
    pub async fn terminate(&self) -> Result<(), StreamChannelError> {
        self.channels.terminate().await
    }

    /// Subscribe to stream events.
    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }

    /// Token cancelling the driver; cancelling it is equivalent to `shutdown`.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Wait for the driver to stop and return the caller's handler.
    pub async fn join(self) -> Result<H, JoinError> {
        self.task.await.map(ChannelHandler::into_inner)
    }

    /// Terminate the stream, stop the driver and wait for it.
    pub async fn shutdown(self) -> Result<H, JoinError> {
        self.shutdown.cancel();
        self.join().await
    }
}

/// Spawn a driver for `config` and start streaming immediately.
///
/// Must be called from within a tokio runtime.
pub fn spawn_stream<H>(
    config: StreamConfig,
    signer: Arc<dyn RequestSigner>,
    handler: H,
) -> Result<StreamHandle<H>, TransportError>
where
    H: StreamHandler + 'static,
{
    config.validate()?;
    let tls = if config.scheme.is_secure() {
        Some(default_tls_connector()?)
    } else {
        None
    };

    let (channels, command_rx) = StreamChannels::new(COMMAND_BUFFER, EVENT_BUFFER);
    let handler = channels.handler(handler);
    let controller = ConnectionController::new(config, signer, handler);
    let shutdown = CancellationToken::new();
    let driver = StreamDriver::new(controller, command_rx, shutdown.child_token(), tls);
    let task = tokio::spawn(driver.run());

    Ok(StreamHandle {
        channels,
        shutdown,
        task,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use stream_core::{BackoffConfig, NoopHandler, Scheme, StaticAuthorization, StreamEvent};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
        sync::broadcast::error::RecvError,
        time::timeout,
    };

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    async fn script_server() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind should work");
        let port = listener.local_addr().expect("local addr").port();
        (listener, port)
    }

    fn local_config(port: u16) -> StreamConfig {
        StreamConfig {
            host: "127.0.0.1".to_owned(),
            port,
            scheme: Scheme::Http,
            path: "/stream".to_owned(),
            query: "track=rust".to_owned(),
            ..StreamConfig::default()
        }
    }

    fn signer() -> Arc<dyn RequestSigner> {
        Arc::new(StaticAuthorization::bearer("test-token"))
    }

    /// Accept one connection and read the request head.
    async fn accept_request(listener: &TcpListener) -> (TcpStream, String) {
        let (mut socket, _) = timeout(WAIT, listener.accept())
            .await
            .expect("client should connect in time")
            .expect("accept should work");

        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.expect("read should work");
            assert!(n > 0, "client closed before sending a request");
            request.extend_from_slice(&buf[..n]);
        }
        (socket, String::from_utf8_lossy(&request).into_owned())
    }

    async fn chunk(socket: &mut TcpStream, data: &str) {
        let frame = format!("{:x}\r\n{data}\r\n", data.len());
        socket
            .write_all(frame.as_bytes())
            .await
            .expect("write should work");
    }

    async fn next_event(events: &mut EventStream) -> StreamEvent {
        loop {
            match timeout(WAIT, events.recv()).await {
                Ok(Ok(event)) => return event,
                Ok(Err(RecvError::Lagged(_))) => continue,
                Ok(Err(RecvError::Closed)) => panic!("event stream closed"),
                Err(_) => panic!("timed out waiting for stream event"),
            }
        }
    }

    async fn wait_for(events: &mut EventStream, expected: StreamEvent) {
        loop {
            if next_event(events).await == expected {
                return;
            }
        }
    }

    #[tokio::test]
    async fn streams_records_and_reconnects_after_remote_close() {
        let (listener, port) = script_server().await;
        let handle = spawn_stream(local_config(port), signer(), NoopHandler)
            .expect("spawn should work");
        let mut events = handle.subscribe();

        let (mut socket, request) = accept_request(&listener).await;
        assert!(request.starts_with("GET /stream?track=rust HTTP/1.1\r\n"));
        assert!(request.contains(&format!("Host: 127.0.0.1:{port}\r\n")));
        assert!(request.contains("Authorization: Bearer test-token\r\n"));

        socket
            .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n")
            .await
            .expect("write should work");
        chunk(&mut socket, "{\"id\":").await;
        chunk(&mut socket, "1}\r").await;
        drop(socket);

        assert_eq!(
            next_event(&mut events).await,
            StreamEvent::Connected { status: 200 }
        );
        assert_eq!(
            next_event(&mut events).await,
            StreamEvent::Record {
                text: "{\"id\":1}".to_owned()
            }
        );
        assert_eq!(
            next_event(&mut events).await,
            StreamEvent::ScheduledReconnect { delay_ms: 0 }
        );
        assert_eq!(next_event(&mut events).await, StreamEvent::ConnectionClosed);

        let (mut socket, _) = accept_request(&listener).await;
        socket
            .write_all(b"HTTP/1.1 200 OK\r\n\r\n{\"id\":2}\r")
            .await
            .expect("write should work");
        assert_eq!(
            next_event(&mut events).await,
            StreamEvent::Connected { status: 200 }
        );
        assert_eq!(
            next_event(&mut events).await,
            StreamEvent::Record {
                text: "{\"id\":2}".to_owned()
            }
        );

        timeout(WAIT, handle.shutdown())
            .await
            .expect("driver should stop in time")
            .expect("driver task should not panic");
    }

    #[tokio::test]
    async fn undecodable_response_is_closed_and_reopened() {
        let (listener, port) = script_server().await;
        let handle = spawn_stream(local_config(port), signer(), NoopHandler)
            .expect("spawn should work");
        let mut events = handle.subscribe();

        let (mut socket, _) = accept_request(&listener).await;
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n9\r\n{\"id\":1}\rXX")
            .await
            .expect("write should work");

        assert_eq!(
            next_event(&mut events).await,
            StreamEvent::Connected { status: 200 }
        );
        assert_eq!(
            next_event(&mut events).await,
            StreamEvent::Record {
                text: "{\"id\":1}".to_owned()
            }
        );
        assert!(matches!(
            next_event(&mut events).await,
            StreamEvent::FramingError { .. }
        ));
        assert_eq!(
            next_event(&mut events).await,
            StreamEvent::ScheduledReconnect { delay_ms: 0 }
        );
        assert_eq!(next_event(&mut events).await, StreamEvent::ConnectionClosed);

        // The server keeps its end open; the client must still reconnect.
        let (_next, request) = accept_request(&listener).await;
        assert!(request.starts_with("GET /stream?track=rust"));
        drop(socket);

        handle.shutdown().await.expect("driver task should not panic");
    }

    #[tokio::test]
    async fn error_status_backs_off_exponentially() {
        let (listener, port) = script_server().await;
        let mut config = local_config(port);
        config.backoff = BackoffConfig {
            http_first_ms: 50,
            ..BackoffConfig::default()
        };
        let handle = spawn_stream(config, signer(), NoopHandler).expect("spawn should work");
        let mut events = handle.subscribe();

        let server = tokio::spawn(async move {
            for _ in 0..3 {
                let (mut socket, _) = accept_request(&listener).await;
                socket
                    .write_all(b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\n\r\n")
                    .await
                    .expect("write should work");
            }
        });

        assert_eq!(
            next_event(&mut events).await,
            StreamEvent::HttpError { status: 503 }
        );
        wait_for(&mut events, StreamEvent::ScheduledReconnect { delay_ms: 0 }).await;
        wait_for(&mut events, StreamEvent::ScheduledReconnect { delay_ms: 50 }).await;
        wait_for(&mut events, StreamEvent::ScheduledReconnect { delay_ms: 100 }).await;

        server.await.expect("server should finish");
        handle.shutdown().await.expect("driver task should not panic");
    }

    #[tokio::test]
    async fn terminate_suppresses_reconnect_until_started() {
        let (listener, port) = script_server().await;
        let handle = spawn_stream(local_config(port), signer(), NoopHandler)
            .expect("spawn should work");
        let mut events = handle.subscribe();

        let (mut socket, _) = accept_request(&listener).await;
        socket
            .write_all(b"HTTP/1.1 200 OK\r\n\r\n")
            .await
            .expect("write should work");
        wait_for(&mut events, StreamEvent::Connected { status: 200 }).await;

        handle.terminate().await.expect("terminate should send");
        assert_eq!(next_event(&mut events).await, StreamEvent::ConnectionClosed);

        let reconnect = timeout(Duration::from_millis(300), listener.accept()).await;
        assert!(reconnect.is_err(), "terminated stream must not reconnect");

        handle.start().await.expect("start should send");
        let (mut socket, _) = accept_request(&listener).await;
        socket
            .write_all(b"HTTP/1.1 200 OK\r\n\r\n")
            .await
            .expect("write should work");
        wait_for(&mut events, StreamEvent::Connected { status: 200 }).await;

        handle.shutdown().await.expect("driver task should not panic");
    }

    #[tokio::test]
    async fn idle_session_is_closed_and_reopened() {
        let (listener, port) = script_server().await;
        let mut config = local_config(port);
        config.idle_timeout = Duration::from_millis(200);
        config.health_check_interval = Duration::from_millis(50);
        let handle = spawn_stream(config, signer(), NoopHandler).expect("spawn should work");
        let mut events = handle.subscribe();

        let (mut socket, _) = accept_request(&listener).await;
        socket
            .write_all(b"HTTP/1.1 200 OK\r\n\r\n")
            .await
            .expect("write should work");

        wait_for(&mut events, StreamEvent::NoDataReceived).await;
        assert_eq!(
            next_event(&mut events).await,
            StreamEvent::ScheduledReconnect { delay_ms: 0 }
        );
        assert_eq!(next_event(&mut events).await, StreamEvent::ConnectionClosed);

        let (_socket, request) = accept_request(&listener).await;
        assert!(request.starts_with("GET /stream?track=rust"));
        drop(socket);

        handle.shutdown().await.expect("driver task should not panic");
    }

    #[tokio::test]
    async fn refused_connection_uses_network_backoff() {
        let (listener, port) = script_server().await;
        drop(listener);

        let handle = spawn_stream(local_config(port), signer(), NoopHandler)
            .expect("spawn should work");
        let mut events = handle.subscribe();

        assert_eq!(
            next_event(&mut events).await,
            StreamEvent::ScheduledReconnect { delay_ms: 0 }
        );
        assert_eq!(next_event(&mut events).await, StreamEvent::ConnectionClosed);
        assert_eq!(
            next_event(&mut events).await,
            StreamEvent::ScheduledReconnect { delay_ms: 250 }
        );

        handle.shutdown().await.expect("driver task should not panic");
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let mut config = local_config(8080);
        config.host = String::new();

        let err = spawn_stream(config, signer(), NoopHandler).expect_err("empty host must fail");
        assert!(matches!(err, TransportError::Config(_)));
    }
}
