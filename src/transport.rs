//! Push channel abstraction.
//!
//! The [`Transport`] trait is a receive-only text message channel from the
//! session-scoped push endpoint; the client never writes to it. A [`Connector`] performs the handshake that
//! produces one; [`TransportConnection`](crate::connection::TransportConnection)
//! owns the resulting lifecycle.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use live_quiz_sync::error::SyncError;
//! use live_quiz_sync::protocol::SessionId;
//! use live_quiz_sync::transport::{Connector, Transport};
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn recv(&mut self) -> Option<Result<String, SyncError>> {
//!         // Return None when the connection is closed cleanly
//!         None
//!     }
//!
//!     async fn close(&mut self) -> Result<(), SyncError> {
//!         Ok(())
//!     }
//! }
//!
//! struct MyConnector;
//!
//! #[async_trait]
//! impl Connector for MyConnector {
//!     async fn connect(&self, session_id: SessionId) -> Result<Box<dyn Transport>, SyncError> {
//!         Ok(Box::new(MyTransport {}))
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::SyncError;
use crate::protocol::SessionId;

/// A text message transport for the push channel.
///
/// Each call to [`recv`](Transport::recv) returns one complete JSON message.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because it is used
/// inside `tokio::select!`. If `recv` is cancelled before completion, calling it
/// again must not lose data.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Receive the next JSON text message from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete message was received
    /// - `Some(Err(e))`: a transport error occurred
    /// - `None`: the connection was closed cleanly by the server
    async fn recv(&mut self) -> Option<Result<String, SyncError>>;

    /// Close the transport connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails. Implementations should
    /// still release resources in that case.
    async fn close(&mut self) -> Result<(), SyncError>;
}

/// Opens a push channel scoped to one session.
///
/// Handshake timeouts are applied by the caller, so implementations may wait
/// indefinitely.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Perform the handshake for `session_id` and return the connected transport.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TransportConnect`] (or [`SyncError::Io`]) if the
    /// handshake fails.
    async fn connect(&self, session_id: SessionId) -> Result<Box<dyn Transport>, SyncError>;
}
