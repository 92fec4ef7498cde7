//! Connection transports.
//!
//! A transport turns a URL into a stream of [`TransportEvent`]s: connection
//! state changes interleaved with inbound text frames. Reconnection lives
//! here, so listeners only ever see "state" and "next frame".

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Connection state as shown next to a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection has been attempted yet.
    Uninstantiated,
    Connecting,
    Open,
    Closing,
    /// Closed; a reconnect may follow.
    Closed,
    /// Retry budget exhausted. Terminal.
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Failed)
    }

    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Uninstantiated => "uninstantiated",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Failed => "disconnected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    State(ConnectionState),
    Frame(String),
}

pub type TransportEvents = mpsc::Receiver<TransportEvent>;

/// Opens event connections.
///
/// Implementations must stop producing events once `cancel` fires or the
/// returned receiver is dropped.
pub trait Transport: Send + Sync + 'static {
    fn connect(&self, url: &str, cancel: CancellationToken) -> TransportEvents;
}

/// Fixed-interval, bounded reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Wait between a close and the next attempt.
    pub interval: Duration,
    /// Reconnects allowed after a close before giving up. Reset whenever a
    /// connection opens.
    pub max_attempts: u32,
    /// Longest a single connect (TCP, TLS and handshake) may take before it
    /// counts as a failed attempt.
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            max_attempts: 20,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// WebSocket transport
// =============================================================================

/// Websocket transport backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport {
    policy: ReconnectPolicy,
}

impl WebSocketTransport {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }
}

impl Transport for WebSocketTransport {
    fn connect(&self, url: &str, cancel: CancellationToken) -> TransportEvents {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(run_connection(url.to_string(), self.policy, tx, cancel));
        rx
    }
}

/// How a single open connection ended.
enum SessionEnd {
    Cancelled,
    Dropped,
    ReceiverGone,
}

async fn emit(tx: &mpsc::Sender<TransportEvent>, state: ConnectionState) -> bool {
    tx.send(TransportEvent::State(state)).await.is_ok()
}

async fn run_connection(
    url: String,
    policy: ReconnectPolicy,
    tx: mpsc::Sender<TransportEvent>,
    cancel: CancellationToken,
) {
    let mut retries = 0u32;
    loop {
        if !emit(&tx, ConnectionState::Connecting).await {
            return;
        }

        let connected = tokio::select! {
            _ = cancel.cancelled() => {
                emit(&tx, ConnectionState::Closed).await;
                return;
            }
            result = tokio::time::timeout(
                policy.connect_timeout,
                tokio_tungstenite::connect_async(url.as_str()),
            ) => result,
        };

        match connected {
            Ok(Ok((ws_stream, _))) => {
                retries = 0;
                info!(url = %url, "event socket open");
                if !emit(&tx, ConnectionState::Open).await {
                    return;
                }
                match pump(ws_stream, &tx, &cancel).await {
                    SessionEnd::Cancelled => {
                        emit(&tx, ConnectionState::Closed).await;
                        return;
                    }
                    SessionEnd::ReceiverGone => return,
                    SessionEnd::Dropped => {
                        info!(url = %url, "event socket closed");
                    }
                }
            }
            Ok(Err(e)) => {
                debug!(url = %url, error = %e, "event socket connect failed");
            }
            Err(_) => {
                debug!(
                    url = %url,
                    timeout_ms = policy.connect_timeout.as_millis() as u64,
                    "event socket connect timed out"
                );
            }
        }

        if !emit(&tx, ConnectionState::Closed).await {
            return;
        }

        if retries >= policy.max_attempts {
            warn!(
                url = %url,
                attempts = retries,
                "giving up on event socket after exhausting reconnect attempts"
            );
            emit(&tx, ConnectionState::Failed).await;
            return;
        }
        retries += 1;
        debug!(url = %url, attempt = retries, "scheduling reconnect");

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(policy.interval) => {}
        }
    }
}

async fn pump(
    ws_stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    tx: &mpsc::Sender<TransportEvent>,
    cancel: &CancellationToken,
) -> SessionEnd {
    let (mut ws_write, mut ws_read) = ws_stream.split();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                emit(tx, ConnectionState::Closing).await;
                let _ = ws_write.send(Message::Close(None)).await;
                return SessionEnd::Cancelled;
            }
            msg = ws_read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if tx.send(TransportEvent::Frame(text.as_str().to_owned())).await.is_err() {
                            return SessionEnd::ReceiverGone;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "close frame received");
                        return SessionEnd::Dropped;
                    }
                    // Binary frames carry nothing we read; pings are answered
                    // by tungstenite.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "event socket read error");
                        return SessionEnd::Dropped;
                    }
                    None => return SessionEnd::Dropped,
                }
            }
        }
    }
}

// =============================================================================
// Channel transport
// =============================================================================

/// In-process transport: every `connect` hands out a channel whose sending
/// half is kept by URL, so the caller can inject states and frames.
#[derive(Default)]
pub struct ChannelTransport {
    senders: Mutex<HashMap<String, mpsc::Sender<TransportEvent>>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sending half for the most recent connection to `url`.
    pub fn sender(&self, url: &str) -> Option<mpsc::Sender<TransportEvent>> {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
    }

    pub fn connected_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self
            .senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        urls.sort();
        urls
    }
}

impl Transport for ChannelTransport {
    fn connect(&self, url: &str, _cancel: CancellationToken) -> TransportEvents {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_polling_defaults() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.interval, Duration::from_secs(1));
        assert_eq!(policy.max_attempts, 20);
        assert_eq!(policy.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn only_failed_is_terminal() {
        assert!(ConnectionState::Failed.is_terminal());
        assert!(!ConnectionState::Closed.is_terminal());
        assert_ne!(
            ConnectionState::Failed.label(),
            ConnectionState::Closed.label()
        );
    }

    #[tokio::test]
    async fn channel_transport_delivers_injected_events() {
        let transport = ChannelTransport::new();
        let mut rx = transport.connect("ws://m1/ws", CancellationToken::new());
        let tx = transport.sender("ws://m1/ws").unwrap();

        tx.send(TransportEvent::State(ConnectionState::Open))
            .await
            .unwrap();
        tx.send(TransportEvent::Frame("{}".into())).await.unwrap();

        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::State(ConnectionState::Open))
        );
        assert_eq!(rx.recv().await, Some(TransportEvent::Frame("{}".into())));
        assert_eq!(transport.connected_urls(), ["ws://m1/ws"]);
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_after_retry_budget() {
        // Port 9 on localhost: nothing listens, connects are refused.
        let transport = WebSocketTransport::new(ReconnectPolicy {
            interval: Duration::from_millis(10),
            max_attempts: 2,
            connect_timeout: Duration::from_secs(5),
        });
        let mut rx = transport.connect("ws://127.0.0.1:9/ws", CancellationToken::new());

        let mut states = Vec::new();
        while let Some(ev) = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("transport stalled")
        {
            if let TransportEvent::State(s) = ev {
                states.push(s);
            }
        }

        use ConnectionState::*;
        assert_eq!(
            states,
            [Connecting, Closed, Connecting, Closed, Connecting, Closed, Failed]
        );
    }

    #[tokio::test]
    async fn stalled_handshake_counts_as_failed_attempt() {
        // Accepts TCP but never answers the websocket handshake.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let transport = WebSocketTransport::new(ReconnectPolicy {
            interval: Duration::from_millis(10),
            max_attempts: 1,
            connect_timeout: Duration::from_millis(100),
        });
        let mut rx = transport.connect(&format!("ws://{}/ws", addr), CancellationToken::new());

        let mut states = Vec::new();
        while let Some(ev) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("connect timeout was not applied")
        {
            if let TransportEvent::State(s) = ev {
                states.push(s);
            }
        }
        server.abort();

        use ConnectionState::*;
        assert_eq!(states, [Connecting, Closed, Connecting, Closed, Failed]);
    }
}
