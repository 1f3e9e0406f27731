//! WebSocket event stream with auto-reconnect.
//!
//! Connects to a networked service's event socket and streams parsed
//! messages through a [`tokio::sync::broadcast`] channel. Handles
//! reconnection with exponential backoff + jitter automatically.
//!
//! # Example
//!
//! ```rust,ignore
//! use splice_api::websocket::{EventStreamHandle, ReconnectConfig};
//! use tokio_util::sync::CancellationToken;
//! use url::Url;
//!
//! let cancel = CancellationToken::new();
//! let ws_url = Url::parse("ws://localhost:4096/ws")?;
//!
//! let handle = EventStreamHandle::connect(ws_url, ReconnectConfig::default(), cancel.clone());
//! let mut rx = handle.subscribe();
//!
//! while let Ok(event) = rx.recv().await {
//!     println!("{}: {}", event.kind, event.data);
//! }
//!
//! handle.shutdown();
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;

// ── Broadcast channel capacity ───────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ── ServiceEvent ─────────────────────────────────────────────────────

/// A message received from a service's WebSocket.
///
/// `kind` comes from the message's `type` (or `event`) field; frames that
/// are not JSON objects are surfaced with kind `"text"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEvent {
    pub kind: String,
    pub data: serde_json::Value,
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for WebSocket reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

// ── EventStreamHandle ────────────────────────────────────────────────

/// Handle to a running WebSocket event stream.
///
/// Call [`shutdown`](Self::shutdown) (or cancel the token passed to
/// [`connect`](Self::connect)) to tear down the background task.
pub struct EventStreamHandle {
    event_rx: broadcast::Receiver<Arc<ServiceEvent>>,
    cancel: CancellationToken,
}

impl EventStreamHandle {
    /// Spawn the reconnection loop for `ws_url`.
    ///
    /// Returns immediately; the first connection attempt happens
    /// asynchronously. Must be called from within a Tokio runtime.
    pub fn connect(ws_url: Url, reconnect: ReconnectConfig, cancel: CancellationToken) -> Self {
        let (event_tx, event_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            ws_loop(ws_url, event_tx, reconnect, task_cancel).await;
        });

        Self { event_rx, cancel }
    }

    /// Get a new broadcast receiver for the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ServiceEvent>> {
        self.event_rx.resubscribe()
    }

    /// Signal the background task to shut down.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → read → on error, backoff → reconnect.
async fn ws_loop(
    ws_url: Url,
    event_tx: broadcast::Sender<Arc<ServiceEvent>>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_read(&ws_url, &event_tx, &cancel) => {
                match result {
                    Ok(()) => {
                        if cancel.is_cancelled() {
                            break;
                        }
                        tracing::info!("WebSocket disconnected cleanly, reconnecting");
                        attempt = 0;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, attempt, "WebSocket error");

                        if let Some(max) = reconnect.max_retries {
                            if attempt >= max {
                                tracing::error!(
                                    max_retries = max,
                                    "WebSocket reconnection limit reached, giving up"
                                );
                                break;
                            }
                        }

                        let delay = calculate_backoff(attempt, &reconnect);
                        tracing::debug!(delay_ms = delay.as_millis(), attempt, "Waiting before reconnect");

                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => break,
                            () = tokio::time::sleep(delay) => {}
                        }

                        attempt = attempt.saturating_add(1);
                    }
                }
            }
        }
    }

    tracing::debug!("WebSocket loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

async fn connect_and_read(
    url: &Url,
    event_tx: &broadcast::Sender<Arc<ServiceEvent>>,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    tracing::info!(url = %url, "Connecting to WebSocket");

    let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    tracing::info!("WebSocket connected");

    let (_write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        parse_and_broadcast(text.as_str(), event_tx);
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(code = %cf.code, reason = %cf.reason, "WebSocket close frame received");
                        }
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        return Err(Error::WebSocketConnect(e.to_string()));
                    }
                    None => {
                        tracing::info!("WebSocket stream ended");
                        return Ok(());
                    }
                    _ => {
                        // Binary, Ping, Pong, Frame -- ignore
                    }
                }
            }
        }
    }
}

// ── Message parsing ──────────────────────────────────────────────────

fn parse_and_broadcast(text: &str, event_tx: &broadcast::Sender<Arc<ServiceEvent>>) {
    let event = parse_message(text);
    // Ignore send errors -- just means no active subscribers right now
    let _ = event_tx.send(Arc::new(event));
}

fn parse_message(text: &str) -> ServiceEvent {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(data) if data.is_object() => {
            let kind = data
                .get("type")
                .or_else(|| data.get("event"))
                .and_then(serde_json::Value::as_str)
                .unwrap_or("message")
                .to_owned();
            ServiceEvent { kind, data }
        }
        Ok(data) => ServiceEvent {
            kind: "text".into(),
            data,
        },
        Err(_) => ServiceEvent {
            kind: "text".into(),
            data: serde_json::Value::String(text.to_owned()),
        },
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) + jitter`, jitter within ±25%.
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic "jitter" seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use futures_util::SinkExt;
    use tokio::net::TcpListener;
    use tokio::sync::broadcast::error::RecvError;

    const WAIT: Duration = Duration::from_secs(5);

    fn quick_retry(max_retries: Option<u32>) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            max_retries,
        }
    }

    /// Accept one connection per frame; each gets its frame, then a close.
    async fn serve_frames(frames: Vec<&'static str>) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for frame in frames {
                let (tcp, _) = listener.accept().await.unwrap();
                let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
                ws.send(tungstenite::Message::text(frame)).await.unwrap();
                let _ = ws.close(None).await;
            }
        });
        Url::parse(&format!("ws://{addr}/events")).unwrap()
    }

    async fn next_kind(rx: &mut broadcast::Receiver<Arc<ServiceEvent>>) -> String {
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .unwrap()
            .unwrap()
            .kind
            .clone()
    }

    #[test]
    fn backoff_doubles_within_jitter_until_capped() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            max_retries: Some(8),
        };
        for attempt in 0..8_u32 {
            let nominal = (100.0 * 2.0_f64.powi(i32::try_from(attempt).unwrap())).min(2000.0);
            let got = calculate_backoff(attempt, &config).as_secs_f64() * 1000.0;
            assert!(
                got >= nominal * 0.75 - 1e-6 && got <= nominal * 1.25 + 1e-6,
                "attempt {attempt}: {got}ms outside 25% of {nominal}ms"
            );
        }
    }

    #[tokio::test]
    async fn stream_reconnects_after_server_closes() {
        let url = serve_frames(vec![r#"{"type":"first"}"#, r#"{"type":"second"}"#]).await;
        let cancel = CancellationToken::new();
        let handle = EventStreamHandle::connect(url, quick_retry(None), cancel.clone());
        let mut rx = handle.subscribe();

        assert_eq!(next_kind(&mut rx).await, "first");
        assert_eq!(next_kind(&mut rx).await, "second");
        handle.shutdown();
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn stream_gives_up_after_retry_limit() {
        // Bind then drop to get a port nothing listens on.
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();
        let url = Url::parse(&format!("ws://{addr}/events")).unwrap();
        let handle = EventStreamHandle::connect(url, quick_retry(Some(2)), CancellationToken::new());
        let mut rx = handle.subscribe();

        let closed = tokio::time::timeout(WAIT, rx.recv()).await.unwrap();
        assert!(matches!(closed, Err(RecvError::Closed)));
    }

    #[tokio::test]
    async fn shutdown_ends_the_stream() {
        let url = serve_frames(vec![r#"{"type":"hello"}"#]).await;
        let handle =
            EventStreamHandle::connect(url, quick_retry(None), CancellationToken::new());
        let mut rx = handle.subscribe();
        assert_eq!(next_kind(&mut rx).await, "hello");

        handle.shutdown();
        loop {
            match tokio::time::timeout(WAIT, rx.recv()).await.unwrap() {
                Err(RecvError::Closed) => break,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
            }
        }
    }

    #[test]
    fn typed_messages_use_type_field() {
        let event = parse_message(r#"{"type":"session.output","sessionId":"s1","line":"ok"}"#);
        assert_eq!(event.kind, "session.output");
        assert_eq!(event.data["sessionId"], "s1");
    }

    #[test]
    fn event_field_is_a_fallback_kind() {
        let event = parse_message(r#"{"event":"file.changed","path":"/a"}"#);
        assert_eq!(event.kind, "file.changed");
    }

    #[test]
    fn plain_text_frames_are_kept() {
        let event = parse_message("hello");
        assert_eq!(event.kind, "text");
        assert_eq!(event.data, serde_json::Value::String("hello".into()));
    }

    #[test]
    fn parse_and_broadcast_delivers_to_subscribers() {
        let (tx, mut rx) = broadcast::channel(16);
        parse_and_broadcast(r#"{"type":"ready"}"#, &tx);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, "ready");
    }
}
