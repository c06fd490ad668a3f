//! Notification lifecycle wrapper and event-to-message mapping.
//!
//! `Notifier` ties the websocket channel to the session lifetime: it keeps
//! at most one channel open, replaces the previous channel when starting a
//! new one (for example after a token change), and tears the channel down
//! immediately on logout. Inbound events are folded into display
//! [`Notification`]s through a pure mapping function.

use tokio::sync::mpsc;
use tracing::debug;

use crate::notify::client::{
    NotifierClient, NotifierConnection, NotifierError, NotifierSender, NotifierStatus,
};
use crate::notify::proto::{Severity, ServerEvent};

/// Transient user-facing message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Notification {
    pub message: String,
    pub severity: Severity,
}

/// Maps an inbound event to its display message.
///
/// Pure and non-blocking; control events (`hello`, `pong`) map to `None`.
pub fn display_message(event: &ServerEvent) -> Option<Notification> {
    match event {
        ServerEvent::Notification {
            message, severity, ..
        } => Some(Notification {
            message: message.clone(),
            severity: severity.unwrap_or_default(),
        }),
        ServerEvent::LockerStatus { locker_id, status } => Some(Notification {
            message: format!("Locker {locker_id} status: {status}"),
            severity: Severity::Info,
        }),
        ServerEvent::DeliveryUpdate { message } => Some(Notification {
            message: format!("Delivery update: {message}"),
            severity: Severity::Info,
        }),
        ServerEvent::Hello { .. } | ServerEvent::Pong { .. } => None,
    }
}

/// Session-scoped notification channel.
pub struct Notifier {
    client: NotifierClient,
    active: Option<NotifierConnection>,
}

impl Notifier {
    /// Creates an inert notifier; the channel stays closed until [`start`].
    ///
    /// [`start`]: Notifier::start
    pub fn new(client: NotifierClient) -> Self {
        Self {
            client,
            active: None,
        }
    }

    /// Opens the notification channel, closing any previous one first so a
    /// session never holds duplicate subscriptions.
    pub async fn start(&mut self) -> Result<(), NotifierError> {
        self.stop();
        let connection = self.client.connect().await?;
        self.active = Some(connection);
        Ok(())
    }

    /// Closes the channel immediately. Safe to call at any time, including
    /// while a connect attempt is still in flight; no messages are delivered
    /// after it returns.
    pub fn stop(&mut self) {
        if self.active.take().is_some() {
            debug!("notification channel closed");
        }
    }

    /// Whether a channel is currently open.
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Sender for outbound commands, when the channel is open.
    pub fn sender(&self) -> Option<NotifierSender> {
        self.active.as_ref().map(NotifierConnection::sender)
    }

    /// Most recent pending connection status change, if any.
    pub fn try_recv_status(&mut self) -> Option<NotifierStatus> {
        self.active.as_mut()?.try_recv_status()
    }

    /// Receives the next display message.
    ///
    /// Control events are skipped. Returns `None` once the channel is closed,
    /// after which the notifier is inert again.
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            let connection = self.active.as_mut()?;
            match connection.recv().await {
                Some(event) => {
                    if let Some(notification) = display_message(&event) {
                        return Some(notification);
                    }
                }
                None => {
                    self.active = None;
                    return None;
                }
            }
        }
    }
}

/// Folds a channel's events into a bounded queue of display messages.
///
/// This does **not** open a second channel; a small task reads the single
/// underlying connection and maps each event. When the queue is full,
/// messages are dropped best-effort rather than backpressuring the
/// transport. The returned sender keeps outbound commands available.
pub fn into_messages(
    connection: NotifierConnection,
    capacity: usize,
) -> (NotifierSender, mpsc::Receiver<Notification>) {
    let (queue_tx, queue_rx) = mpsc::channel(capacity);
    let (sender, mut receiver, _status) = connection.split_with_status();

    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            if let Some(notification) = display_message(&event) {
                // Best-effort: drop when the display queue is full.
                let _ = queue_tx.try_send(notification);
            }
        }
    });

    (sender, queue_rx)
}
