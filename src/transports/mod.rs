//! Push channel implementations.
//!
//! | Feature                | Connector / Transport                          |
//! |------------------------|------------------------------------------------|
//! | `transport-websocket`  | [`WebSocketConnector`] / [`WebSocketTransport`] |

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketConnector, WebSocketTransport};
