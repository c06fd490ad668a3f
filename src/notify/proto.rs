use serde::{Deserialize, Serialize};

/// Display severity attached to a notification.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

/// Events pushed by the notification gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Handshake acknowledgement; always the first event on a channel.
    Hello {
        server_time_ms: u64,
    },
    Pong {
        server_time_ms: u64,
    },
    /// Generic user-facing notification.
    Notification {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        severity: Option<Severity>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notification_id: Option<u64>,
    },
    /// A locker changed state.
    LockerStatus {
        locker_id: String,
        status: String,
    },
    /// Progress update for an in-flight delivery.
    DeliveryUpdate {
        message: String,
    },
}

/// Commands the client may send upstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Ping {
        client_time_ms: u64,
    },
    /// Marks a stored notification as read on the server.
    MarkRead {
        notification_id: u64,
    },
}

impl ServerEvent {
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ClientEvent {
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
