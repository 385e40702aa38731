//! WebSocket push channel using `tokio-tungstenite`.
//!
//! [`WebSocketTransport`] adapts a WebSocket stream to the [`Transport`] trait;
//! [`WebSocketConnector`] builds the session-scoped URL and performs the
//! handshake. Both `ws://` and `wss://` URLs are supported.
//!
//! # Feature gate
//!
//! Only available with the `transport-websocket` feature (enabled by default).

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::protocol::Message;
use url::form_urlencoded::byte_serialize;

use crate::config::EndpointConfig;
use crate::error::SyncError;
use crate::protocol::SessionId;
use crate::transport::{Connector, Transport};

/// Type alias for the underlying WebSocket stream.
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] backed by a WebSocket connection.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) is cancel-safe: dropping its future before it
/// completes does not lose a frame.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Establish a new WebSocket connection to the given URL.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Io`] if the URL is invalid or the connection cannot
    /// be established. I/O error kinds are preserved; everything else maps to
    /// [`ErrorKind::Other`](std::io::ErrorKind::Other).
    pub async fn connect(url: &str) -> Result<Self, SyncError> {
        tracing::debug!(url = %url, "opening push channel");

        let (stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            let kind = match &e {
                tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                _ => std::io::ErrorKind::Other,
            };
            SyncError::Io(std::io::Error::new(kind, e))
        })?;

        tracing::info!(url = %url, "push channel established");

        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-established WebSocket stream.
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn recv(&mut self) -> Option<Result<String, SyncError>> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    return Some(Err(SyncError::TransportReceive(e.to_string())));
                }
                None => return None,
            };

            match msg {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Close(frame) => {
                    tracing::debug!(?frame, "received WebSocket close frame");
                    return None;
                }
                // tungstenite queues the pong reply itself.
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Binary(_) => {
                    tracing::warn!("received unexpected binary WebSocket frame, skipping");
                }
                Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| SyncError::TransportClose(e.to_string()))
    }
}

/// Opens `{base_url}/sessions/{id}/` push channels.
///
/// ```
/// use live_quiz_sync::transports::WebSocketConnector;
///
/// let connector = WebSocketConnector::new("ws://localhost:8000/ws/").with_token("abc");
/// assert_eq!(connector.session_url(7), "ws://localhost:8000/ws/sessions/7/?token=abc");
/// ```
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    base_url: String,
    token: Option<String>,
}

impl WebSocketConnector {
    /// Create a connector rooted at `base_url` (trailing slashes are ignored).
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        }
    }

    /// Create a connector for the push channel described by `config`.
    pub fn from_config(config: &EndpointConfig) -> Self {
        let connector = Self::new(config.ws_url.as_str());
        match config.auth_token {
            Some(ref token) => connector.with_token(token.as_str()),
            None => connector,
        }
    }

    /// Pass an access token as the `token` query parameter.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// The push channel URL for `session_id`. The token is form-encoded.
    pub fn session_url(&self, session_id: SessionId) -> String {
        match &self.token {
            Some(token) => {
                let token: String = byte_serialize(token.as_bytes()).collect();
                format!("{}/sessions/{session_id}/?token={token}", self.base_url)
            }
            None => format!("{}/sessions/{session_id}/", self.base_url),
        }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, session_id: SessionId) -> Result<Box<dyn Transport>, SyncError> {
        let transport = WebSocketTransport::connect(&self.session_url(session_id)).await?;
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use futures_util::SinkExt;
    use tokio::net::TcpListener;

    /// Start a local WebSocket server that runs `handler` on the accepted
    /// connection and returns the base URL to connect to.
    async fn start_mock_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}")
    }

    #[test]
    fn websocket_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
    }

    #[test]
    fn session_url_without_token() {
        let connector = WebSocketConnector::new("wss://quiz.example.com/ws");
        assert_eq!(
            connector.session_url(12),
            "wss://quiz.example.com/ws/sessions/12/"
        );
    }

    #[test]
    fn connector_from_endpoint_config() {
        let config =
            EndpointConfig::new("https://quiz.example.com/api", "wss://quiz.example.com/ws/")
                .with_token("abc");
        assert_eq!(
            WebSocketConnector::from_config(&config).session_url(3),
            "wss://quiz.example.com/ws/sessions/3/?token=abc"
        );
    }

    #[test]
    fn token_with_reserved_characters_is_encoded() {
        let connector = WebSocketConnector::new("wss://h/ws").with_token("a+b&c=d#e f");
        let url = connector.session_url(1);
        assert_eq!(url, "wss://h/ws/sessions/1/?token=a%2Bb%26c%3Dd%23e+f");

        let query = url.split_once('?').unwrap().1;
        let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        assert_eq!(pairs, vec![("token".to_string(), "a+b&c=d#e f".to_string())]);
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let err = WebSocketTransport::connect("not-a-valid-url")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Io(_)));
    }

    #[tokio::test]
    async fn connector_fails_with_unreachable_host() {
        let connector = WebSocketConnector::new("ws://127.0.0.1:1");
        let err = connector.connect(1).await.err().unwrap();
        assert!(matches!(err, SyncError::Io(_)));
    }

    #[tokio::test]
    async fn recv_skips_binary_frames_and_stops_on_close() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Binary(vec![0xDE, 0xAD].into()))
                .await
                .unwrap();
            ws.send(Message::Text(
                r#"{"type":"participant.ready","data":{"all_ready":true}}"#.into(),
            ))
            .await
            .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();

        let msg = transport.recv().await.unwrap().unwrap();
        assert!(msg.contains("participant.ready"));
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn connector_targets_session_path() {
        use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (path_tx, path_rx) = tokio::sync::oneshot::channel::<String>();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                let _ = path_tx.send(req.uri().to_string());
                Ok(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(tcp, callback)
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        });

        let connector = WebSocketConnector::new(format!("ws://{addr}/ws/")).with_token("t0k");
        let mut transport = connector.connect(42).await.unwrap();
        assert_eq!(path_rx.await.unwrap(), "/ws/sessions/42/?token=t0k");
        let _ = transport.close().await;
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let url = start_mock_server(|mut ws| async move {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(transport.closed);
    }
}
