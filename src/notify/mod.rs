//! Realtime notification modules.
//!
//! - `client`: websocket transport, command queue, and reconnect handling.
//! - `proto`: wire events shared with the notification gateway.
//! - `notifier`: session-scoped channel lifecycle and display-message
//!   mapping.

/// Websocket connection and command sender.
pub mod client;
/// Session-scoped lifecycle wrapper and event mapping.
pub mod notifier;
/// Notification gateway wire events.
pub mod proto;
