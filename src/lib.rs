//! Rust client SDK for the SmartLocker admin API and notification gateway.
//!
//! The crate is organized by concern:
//! - `auth_api`: HTTP client for the authentication service.
//! - `session`: session lifecycle, startup restoration, and the
//!   refresh-and-retry request decorator.
//! - `store`: durable credential storage backends.
//! - `notify`: realtime notification websocket client and event mapping.

/// Authentication service client and wire types.
pub mod auth_api;
/// Realtime notification client, wire events, and lifecycle helpers.
pub mod notify;
/// Session manager and authenticated-request decorator.
pub mod session;
/// Durable credential storage.
pub mod store;
