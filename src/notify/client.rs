//! Low-level notification websocket client.
//!
//! The client spawns a background worker that owns the socket, performs the
//! `hello` handshake, queues outbound commands across reconnects, and
//! resupplies the current access token on every (re)connect attempt. A stale
//! token is never reused: the token is read from the [`TokenSource`] right
//! before each attempt, and the worker stops once the source reports no
//! token (logout).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{InvalidHeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::notify::proto::{ClientEvent, ServerEvent};

const MIN_RECONNECT_BACKOFF: Duration = Duration::from_millis(100);
const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(2);
/// Production websocket endpoint for the notification gateway.
pub const NOTIFY_ENDPOINT: &str = "wss://api.smartlocker.example/ws/notifications/";
/// Local development websocket endpoint for the notification gateway.
pub const LOCAL_NOTIFY_ENDPOINT: &str = "ws://localhost:8000/ws/notifications/";

type WsSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Supplier of the current access token.
///
/// The transport reads this before every connect attempt; `None` means the
/// session is gone and the channel must not be (re)opened.
pub trait TokenSource: Send + Sync {
    fn access_token(&self) -> Option<SecretString>;
}

/// A fixed token, useful for tooling and tests.
impl TokenSource for SecretString {
    fn access_token(&self) -> Option<SecretString> {
        Some(self.clone())
    }
}

impl<T: TokenSource + ?Sized> TokenSource for Arc<T> {
    fn access_token(&self) -> Option<SecretString> {
        (**self).access_token()
    }
}

/// Entry point for opening notification channels.
#[derive(Clone)]
pub struct NotifierClient {
    tokens: Arc<dyn TokenSource>,
    local: bool,
    endpoint_override: Option<String>,
}

impl NotifierClient {
    pub fn new(tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            tokens,
            local: false,
            endpoint_override: None,
        }
    }

    pub fn with_local_mode(mut self, local: bool) -> Self {
        self.local = local;
        self
    }

    /// Sets an explicit websocket endpoint override.
    ///
    /// The override takes precedence over local mode when set.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        self.endpoint_override = Some(endpoint.trim_end().to_string());
        self
    }

    /// Opens a notification channel.
    ///
    /// Spawns a background worker that owns the websocket and returns handle
    /// channels for outbound commands, inbound events, and connection status.
    /// Fails when no session token is available or the handshake is rejected.
    pub async fn connect(&self) -> Result<NotifierConnection, NotifierError> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let url = self.endpoint().to_string();
        let tokens = Arc::clone(&self.tokens);

        tokio::spawn(async move {
            notifier_worker(url, tokens, outbound_rx, inbound_tx, status_tx, ready_tx).await;
        });

        match ready_rx.await {
            Ok(Ok(())) => Ok(NotifierConnection {
                sender: NotifierSender { tx: outbound_tx },
                receiver: inbound_rx,
                status: status_rx,
            }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(NotifierError::Protocol(
                "notifier worker stopped before initial connect".to_string(),
            )),
        }
    }

    fn endpoint(&self) -> &str {
        if let Some(endpoint) = self.endpoint_override.as_deref() {
            return endpoint;
        }
        if self.local {
            LOCAL_NOTIFY_ENDPOINT
        } else {
            NOTIFY_ENDPOINT
        }
    }
}

/// Connection lifecycle updates produced by the worker.
///
/// Consecutive repeats are suppressed; every received status is a change.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NotifierStatus {
    Connecting,
    Connected,
    Disconnected,
}

/// Active notification channel handles.
///
/// Dropping the connection closes the channel deterministically: the worker
/// observes the closed command queue, shuts the socket, and exits. Messages
/// received after that point are never observable.
#[derive(Debug)]
pub struct NotifierConnection {
    sender: NotifierSender,
    receiver: mpsc::UnboundedReceiver<ServerEvent>,
    status: mpsc::UnboundedReceiver<NotifierStatus>,
}

impl NotifierConnection {
    /// Returns a cloneable sender for client commands.
    pub fn sender(&self) -> NotifierSender {
        self.sender.clone()
    }

    /// Receives the next server event.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.receiver.recv().await
    }

    /// Splits into sender, inbound event receiver, and status receiver.
    pub fn split_with_status(
        self,
    ) -> (
        NotifierSender,
        mpsc::UnboundedReceiver<ServerEvent>,
        mpsc::UnboundedReceiver<NotifierStatus>,
    ) {
        (self.sender, self.receiver, self.status)
    }

    /// Receives the next connection status change, when one is pending.
    pub fn try_recv_status(&mut self) -> Option<NotifierStatus> {
        self.status.try_recv().ok()
    }
}

/// Cloneable sender for outbound client events.
#[derive(Clone, Debug)]
pub struct NotifierSender {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl NotifierSender {
    /// Queues a raw client event for the worker.
    pub fn send(&self, event: ClientEvent) -> Result<(), NotifierError> {
        self.tx
            .send(event)
            .map_err(|_| NotifierError::SendQueueClosed)
    }

    /// Sends a heartbeat ping with the client timestamp.
    pub fn ping(&self, client_time_ms: u64) -> Result<(), NotifierError> {
        self.send(ClientEvent::Ping { client_time_ms })
    }

    /// Marks a stored notification as read.
    pub fn mark_read(&self, notification_id: u64) -> Result<(), NotifierError> {
        self.send(ClientEvent::MarkRead { notification_id })
    }
}

/// Errors produced by transport and handshake handling.
#[derive(Debug, Error)]
pub enum NotifierError {
    /// Websocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// JSON serialization error for an outbound event.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Access token could not be converted to a valid HTTP header value.
    #[error("invalid authorization header: {0}")]
    InvalidTokenHeader(#[from] InvalidHeaderValue),

    /// No session token is available; the channel stays closed.
    #[error("no authenticated session")]
    NotAuthenticated,

    /// Outbound command queue has been closed.
    #[error("send queue is closed")]
    SendQueueClosed,

    /// Handshake contract error.
    #[error("protocol error: {0}")]
    Protocol(String),
}

enum ChannelOutcome {
    GracefulShutdown,
    Reconnect,
}

/// Status sender that suppresses repeats; consumers only ever observe
/// transitions.
struct StatusReporter {
    tx: mpsc::UnboundedSender<NotifierStatus>,
    last: Option<NotifierStatus>,
}

impl StatusReporter {
    fn new(tx: mpsc::UnboundedSender<NotifierStatus>) -> Self {
        Self { tx, last: None }
    }

    fn send(&mut self, status: NotifierStatus) {
        if self.last != Some(status) {
            self.last = Some(status);
            let _ = self.tx.send(status);
        }
    }
}

async fn notifier_worker(
    url: String,
    tokens: Arc<dyn TokenSource>,
    mut outbound_rx: mpsc::UnboundedReceiver<ClientEvent>,
    inbound_tx: mpsc::UnboundedSender<ServerEvent>,
    status_tx: mpsc::UnboundedSender<NotifierStatus>,
    ready_tx: oneshot::Sender<Result<(), NotifierError>>,
) {
    let mut ready_tx = Some(ready_tx);
    let mut status = StatusReporter::new(status_tx);
    let mut pending = VecDeque::new();
    let mut backoff = MIN_RECONNECT_BACKOFF;

    loop {
        // Re-read the token every attempt so a refreshed session reconnects
        // with its current credential and a logged-out session never does.
        let Some(token) = tokens.access_token() else {
            if let Some(tx) = ready_tx.take() {
                let _ = tx.send(Err(NotifierError::NotAuthenticated));
            }
            break;
        };

        status.send(NotifierStatus::Connecting);
        match run_channel(
            &url,
            &token,
            &mut outbound_rx,
            &inbound_tx,
            &mut status,
            &mut pending,
            &mut ready_tx,
        )
        .await
        {
            Ok(ChannelOutcome::GracefulShutdown) => break,
            Ok(ChannelOutcome::Reconnect) => {
                status.send(NotifierStatus::Disconnected);
                backoff = MIN_RECONNECT_BACKOFF;
            }
            Err(err) => {
                if let Some(tx) = ready_tx.take() {
                    let _ = tx.send(Err(err));
                    return;
                }
                debug!(error = %err, "notification channel attempt failed");
                status.send(NotifierStatus::Disconnected);
            }
        }

        if outbound_rx.is_closed() {
            break;
        }

        if !collect_events_during_delay(backoff, &mut outbound_rx, &mut pending).await {
            break;
        }

        backoff = std::cmp::min(backoff.saturating_mul(2), MAX_RECONNECT_BACKOFF);
    }

    status.send(NotifierStatus::Disconnected);
}

async fn run_channel(
    url: &str,
    token: &SecretString,
    outbound_rx: &mut mpsc::UnboundedReceiver<ClientEvent>,
    inbound_tx: &mpsc::UnboundedSender<ServerEvent>,
    status: &mut StatusReporter,
    pending: &mut VecDeque<ClientEvent>,
    ready_tx: &mut Option<oneshot::Sender<Result<(), NotifierError>>>,
) -> Result<ChannelOutcome, NotifierError> {
    let mut request = url.into_client_request()?;
    let bearer = format!("Bearer {}", token.expose_secret()).parse()?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    // The connect attempt remains interruptible: closing the handles ends
    // the worker even while the socket is still being established.
    let connect = connect_async(request);
    tokio::pin!(connect);
    let mut socket = loop {
        tokio::select! {
            result = &mut connect => break result?.0,
            maybe_outbound = outbound_rx.recv() => {
                match maybe_outbound {
                    Some(event) => pending.push_back(event),
                    None => return Ok(ChannelOutcome::GracefulShutdown),
                }
            }
        }
    };

    let hello = recv_handshake_ack(&mut socket).await?;
    let _ = inbound_tx.send(hello);
    status.send(NotifierStatus::Connected);

    if let Some(tx) = ready_tx.take() {
        let _ = tx.send(Ok(()));
    }

    while let Some(next) = pending.pop_front() {
        if send_client_event(&mut socket, &next).await.is_err() {
            pending.push_front(next);
            return Ok(ChannelOutcome::Reconnect);
        }
    }

    loop {
        tokio::select! {
            maybe_outbound = outbound_rx.recv() => {
                match maybe_outbound {
                    Some(event) => {
                        if send_client_event(&mut socket, &event).await.is_err() {
                            pending.push_front(event);
                            return Ok(ChannelOutcome::Reconnect);
                        }
                    }
                    None => {
                        let _ = socket.close(None).await;
                        return Ok(ChannelOutcome::GracefulShutdown);
                    }
                }
            }
            maybe_inbound = socket.next() => {
                match maybe_inbound {
                    Some(Ok(Message::Text(text))) => {
                        match ServerEvent::from_text(&text) {
                            Ok(event) => {
                                let _ = inbound_tx.send(event);
                            }
                            // Malformed events are dropped without closing
                            // the channel.
                            Err(err) => debug!(error = %err, "dropping malformed server event"),
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            return Ok(ChannelOutcome::Reconnect);
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => return Ok(ChannelOutcome::Reconnect),
                    Some(Ok(other)) => {
                        debug!(frame = ?other, "dropping unexpected non-text frame");
                    }
                    Some(Err(_)) => return Ok(ChannelOutcome::Reconnect),
                    None => return Ok(ChannelOutcome::Reconnect),
                }
            }
        }
    }
}

async fn recv_handshake_ack(socket: &mut WsSocket) -> Result<ServerEvent, NotifierError> {
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => {
                return match ServerEvent::from_text(&text) {
                    Ok(event @ ServerEvent::Hello { .. }) => Ok(event),
                    Ok(_) | Err(_) => Err(NotifierError::Protocol(
                        "expected first server event to be hello".to_string(),
                    )),
                };
            }
            Some(Ok(Message::Ping(payload))) => {
                socket.send(Message::Pong(payload)).await?;
            }
            Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) => {
                return Err(NotifierError::Protocol(
                    "socket closed before hello".to_string(),
                ));
            }
            Some(Ok(_)) => {
                return Err(NotifierError::Protocol(
                    "received non-text frame before hello".to_string(),
                ));
            }
            Some(Err(err)) => return Err(NotifierError::WebSocket(err)),
            None => {
                return Err(NotifierError::Protocol(
                    "socket ended before hello".to_string(),
                ));
            }
        }
    }
}

async fn send_client_event(
    socket: &mut WsSocket,
    event: &ClientEvent,
) -> Result<(), NotifierError> {
    let text = event.to_text()?;
    socket.send(Message::Text(text)).await?;
    Ok(())
}

async fn collect_events_during_delay(
    delay: Duration,
    outbound_rx: &mut mpsc::UnboundedReceiver<ClientEvent>,
    pending: &mut VecDeque<ClientEvent>,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            maybe_event = outbound_rx.recv() => {
                match maybe_event {
                    Some(event) => pending.push_back(event),
                    None => return false,
                }
            }
        }
    }
}
