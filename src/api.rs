//! Request/response access to the session API.
//!
//! [`SessionApi`] is the seam between the synchronizer and the HTTP backend;
//! [`HttpSessionApi`] implements it with `reqwest` behind the `http-client`
//! feature.

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{ReadyResponse, SessionId, StatusSnapshot};

/// Session endpoints used by the ready screen.
#[async_trait]
pub trait SessionApi: Send + Sync + 'static {
    /// `GET /sessions/{id}/status`
    async fn fetch_status(&self, session_id: SessionId) -> Result<StatusSnapshot>;

    /// `POST /sessions/{id}/ready`. Idempotent on the server.
    async fn submit_ready(&self, session_id: SessionId) -> Result<ReadyResponse>;

    /// `POST /sessions/{id}/leave`
    async fn leave(&self, session_id: SessionId) -> Result<()>;

    /// `POST /sessions/{id}/cancel-attempt`
    async fn cancel_attempt(&self, session_id: SessionId) -> Result<()>;
}

#[cfg(feature = "http-client")]
pub use http::HttpSessionApi;

#[cfg(feature = "http-client")]
mod http {
    use std::sync::Arc;

    use async_trait::async_trait;
    use reqwest::{Client, Method};
    use serde::de::DeserializeOwned;
    use tracing::debug;

    use super::SessionApi;
    use crate::config::EndpointConfig;
    use crate::error::{Result, SyncError};
    use crate::protocol::{ApiEnvelope, ReadyResponse, SessionId, StatusSnapshot};

    /// [`SessionApi`] over HTTP with JSON envelopes.
    #[derive(Clone)]
    pub struct HttpSessionApi {
        client: Client,
        base_url: Arc<str>,
        token: Option<Arc<str>>,
    }

    impl HttpSessionApi {
        /// Build a client for the API described by `config`.
        ///
        /// # Errors
        ///
        /// Returns [`SyncError::Http`] if the HTTP client cannot be built.
        pub fn new(config: &EndpointConfig) -> Result<Self> {
            let client = Client::builder()
                .build()
                .map_err(|source| SyncError::Http {
                    path: String::new(),
                    source,
                })?;
            Ok(Self {
                client,
                base_url: Arc::from(config.api_url.trim_end_matches('/')),
                token: config.auth_token.as_deref().map(Arc::from),
            })
        }

        fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
            let url = format!("{}/{}", self.base_url, path);
            let builder = self.client.request(method, url);
            match self.token {
                Some(ref token) => builder.bearer_auth(token),
                None => builder,
            }
        }

        async fn call<T: DeserializeOwned>(&self, method: Method, path: String) -> Result<T> {
            debug!(%method, path = %path, "session API request");
            let response = self
                .request(method, &path)
                .send()
                .await
                .map_err(|source| SyncError::Http {
                    path: path.clone(),
                    source,
                })?;

            let status = response.status();
            let body = response.bytes().await.map_err(|source| SyncError::Http {
                path: path.clone(),
                source,
            })?;

            match serde_json::from_slice::<ApiEnvelope>(&body) {
                Ok(envelope) => envelope.into_data(),
                Err(_) if !status.is_success() => Err(SyncError::HttpStatus {
                    path,
                    status: status.as_u16(),
                }),
                Err(e) => Err(SyncError::Serialization(e)),
            }
        }
    }

    impl std::fmt::Debug for HttpSessionApi {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("HttpSessionApi")
                .field("base_url", &self.base_url)
                .field("has_token", &self.token.is_some())
                .finish()
        }
    }

    #[async_trait]
    impl SessionApi for HttpSessionApi {
        async fn fetch_status(&self, session_id: SessionId) -> Result<StatusSnapshot> {
            self.call(Method::GET, format!("sessions/{session_id}/status"))
                .await
        }

        async fn submit_ready(&self, session_id: SessionId) -> Result<ReadyResponse> {
            self.call(Method::POST, format!("sessions/{session_id}/ready"))
                .await
        }

        async fn leave(&self, session_id: SessionId) -> Result<()> {
            self.call(Method::POST, format!("sessions/{session_id}/leave"))
                .await
        }

        async fn cancel_attempt(&self, session_id: SessionId) -> Result<()> {
            self.call(Method::POST, format!("sessions/{session_id}/cancel-attempt"))
                .await
        }
    }

    #[cfg(test)]
    #[allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::indexing_slicing
    )]
    mod tests {
        use super::*;
        use crate::protocol::{Participant, SessionStatus};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        /// Serve one HTTP request with `status` and `body`, returning the
        /// request head through the join handle.
        async fn serve_once(
            status: &'static str,
            body: String,
        ) -> (String, tokio::task::JoinHandle<String>) {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let handle = tokio::spawn(async move {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = vec![0_u8; 4096];
                let n = socket.read(&mut buf).await.unwrap();
                let head = String::from_utf8_lossy(&buf[..n]).to_string();
                let response = format!(
                    "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
                head
            });
            (format!("http://{addr}/api/"), handle)
        }

        #[tokio::test]
        async fn fetch_status_unwraps_envelope_and_sends_token() {
            let body = r#"{"ok":true,"data":{"status":"waiting","participants":[{"user_id":1,"name":"Ada","is_ready":true}]}}"#;
            let (url, server) = serve_once("200 OK", body.to_string()).await;
            let api =
                HttpSessionApi::new(&EndpointConfig::new(url, "ws://unused").with_token("secret"))
                    .unwrap();

            let snapshot = api.fetch_status(4).await.unwrap();
            assert_eq!(snapshot.status, SessionStatus::Waiting);
            assert_eq!(snapshot.participants, vec![Participant::new(1, "Ada", true)]);

            let head = server.await.unwrap();
            assert!(head.starts_with("GET /api/sessions/4/status "));
            assert!(head.to_lowercase().contains("authorization: bearer secret"));
        }

        #[tokio::test]
        async fn rejected_envelope_surfaces_server_message() {
            let body = r#"{"ok":false,"message":"already left"}"#;
            let (url, server) = serve_once("400 Bad Request", body.to_string()).await;
            let api = HttpSessionApi::new(&EndpointConfig::new(url, "ws://unused")).unwrap();

            let err = api.leave(4).await.unwrap_err();
            assert!(matches!(err, SyncError::Rejected { message: Some(ref m) } if m == "already left"));
            assert!(server.await.unwrap().starts_with("POST /api/sessions/4/leave "));
        }

        #[tokio::test]
        async fn non_envelope_error_maps_to_status() {
            let (url, _server) = serve_once("502 Bad Gateway", "<html>".to_string()).await;
            let api = HttpSessionApi::new(&EndpointConfig::new(url, "ws://unused")).unwrap();

            let err = api.submit_ready(4).await.unwrap_err();
            assert!(matches!(err, SyncError::HttpStatus { status: 502, .. }));
        }
    }
}
