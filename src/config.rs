//! Endpoint configuration for the session API and the push channel.

use crate::error::{Result, SyncError};

/// Environment variable holding the HTTP API base URL.
pub const API_URL_ENV: &str = "LIVE_QUIZ_API_URL";
/// Environment variable holding the push channel base URL.
pub const WS_URL_ENV: &str = "LIVE_QUIZ_WS_URL";
/// Environment variable holding the access token.
pub const TOKEN_ENV: &str = "LIVE_QUIZ_TOKEN";

/// Where the session API and push channel live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Base URL of the HTTP API, e.g. `https://quiz.example.com/api/`.
    pub api_url: String,
    /// Base URL of the push channel, e.g. `wss://quiz.example.com/ws/`.
    pub ws_url: String,
    /// Access token sent as a bearer header and as the `token` query parameter.
    pub auth_token: Option<String>,
}

impl EndpointConfig {
    /// Construct a configuration from explicit URLs.
    pub fn new(api_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            ws_url: ws_url.into(),
            auth_token: None,
        }
    }

    /// Attach an access token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Build a configuration from [`API_URL_ENV`], [`WS_URL_ENV`] and the
    /// optional [`TOKEN_ENV`].
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MissingEnvVar`] if either URL variable is unset.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&'static str) -> Option<String>) -> Result<Self> {
        let api_url = lookup(API_URL_ENV).ok_or(SyncError::MissingEnvVar { var: API_URL_ENV })?;
        let ws_url = lookup(WS_URL_ENV).ok_or(SyncError::MissingEnvVar { var: WS_URL_ENV })?;

        let mut config = Self::new(api_url, ws_url);
        if let Some(token) = lookup(TOKEN_ENV).filter(|t| !t.is_empty()) {
            config = config.with_token(token);
        }
        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let vars: HashMap<&'static str, String> =
            vars.iter().map(|(k, v)| (*k, v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn reads_urls_and_token() {
        let config = EndpointConfig::from_lookup(lookup(&[
            (API_URL_ENV, "https://quiz.test/api"),
            (WS_URL_ENV, "wss://quiz.test/ws"),
            (TOKEN_ENV, "tok"),
        ]))
        .unwrap();
        assert_eq!(
            config,
            EndpointConfig::new("https://quiz.test/api", "wss://quiz.test/ws").with_token("tok")
        );
    }

    #[test]
    fn empty_token_is_ignored() {
        let config = EndpointConfig::from_lookup(lookup(&[
            (API_URL_ENV, "https://quiz.test/api"),
            (WS_URL_ENV, "wss://quiz.test/ws"),
            (TOKEN_ENV, ""),
        ]))
        .unwrap();
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn missing_ws_url_is_reported() {
        let err = EndpointConfig::from_lookup(lookup(&[(API_URL_ENV, "https://quiz.test/api")]))
            .unwrap_err();
        assert!(matches!(err, SyncError::MissingEnvVar { var } if var == WS_URL_ENV));
    }
}
