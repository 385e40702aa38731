//! # Live Quiz Sync
//!
//! Dual-channel session synchronizer for the two-player live quiz ready check.
//!
//! A [`ReadySessionController`] keeps the ready screen consistent by merging
//! updates from a session-scoped push channel and, while that channel is down,
//! from a fallback poller. Transitions such as starting the match or leaving a
//! cancelled session fire exactly once.
//!
//! ## Features
//!
//! - **Transport-agnostic**: implement [`Connector`] and [`Transport`] for any
//!   push channel backend
//! - **WebSocket built-in**: the default `transport-websocket` feature provides
//!   [`WebSocketConnector`](transports::WebSocketConnector)
//! - **HTTP built-in**: the default `http-client` feature provides
//!   [`HttpSessionApi`](api::HttpSessionApi) on top of `reqwest`
//! - **Event-driven**: navigation and command failures arrive as
//!   [`SessionEvent`]s on a channel; everything else is a watchable
//!   [`SessionView`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! let endpoints = EndpointConfig::from_env()?;
//! let connector = Arc::new(WebSocketConnector::from_config(&endpoints));
//! let api = Arc::new(HttpSessionApi::new(&endpoints)?);
//!
//! let (controller, mut events) =
//!     ReadySessionController::start(session_id, connector, api, SyncConfig::new())?;
//! controller.request_ready()?;
//!
//! while let Some(event) = events.recv().await {
//!     if event.is_terminal() {
//!         break;
//!     }
//! }
//! ```

pub mod actions;
pub mod api;
pub mod config;
pub mod connection;
pub mod controller;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod poller;
pub mod protocol;
pub mod reconciler;
pub mod store;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use api::SessionApi;
pub use config::EndpointConfig;
pub use connection::ConnectionState;
pub use controller::{ReadySessionController, SyncConfig};
pub use error::{Result, SyncError};
pub use event::{Command, SessionEvent};
pub use protocol::{Participant, PushMessage, SessionId, SessionStatus, UserId};
pub use store::SessionView;
pub use transport::{Connector, Transport};
