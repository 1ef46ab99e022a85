use std::time::Duration;

use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

const ERROR_BODY_SNIPPET_LEN: usize = 220;
const NOD_PATH: &str = "/ws/nod";

/// Production HTTP API base URL.
pub const API_HTTP_URL: &str = "https://api.ocelloids.net";

#[derive(Clone, Debug, Default)]
pub struct NodApiClientOptions {
    /// Bound on the whole token request. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
    /// Ignores `HTTP_PROXY`/`HTTPS_PROXY` and connects directly.
    pub bypass_proxy: bool,
}

/// HTTP client that exchanges an API key for a connection-scoped nod token.
#[derive(Clone, Debug)]
pub struct NodApiClient {
    http: Client,
    base_url: String,
    request_timeout: Option<Duration>,
}

impl NodApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, NodApiError> {
        Self::with_options(base_url, NodApiClientOptions::default())
    }

    pub fn with_options(
        base_url: impl Into<String>,
        options: NodApiClientOptions,
    ) -> Result<Self, NodApiError> {
        let base_url = trim_base_url(&base_url.into());
        if base_url.is_empty() {
            return Err(NodApiError::InvalidUrl(
                "http base url must not be empty".to_string(),
            ));
        }

        let mut builder = Client::builder();
        if options.bypass_proxy {
            builder = builder.no_proxy();
        }
        let http = builder.build().map_err(NodApiError::Transport)?;

        Ok(Self {
            http,
            base_url,
            request_timeout: options.request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Requests a fresh nod token.
    ///
    /// One attempt only; tokens are single use and are never cached here.
    pub async fn fetch_token(&self, api_key: &SecretString) -> Result<NodToken, NodApiError> {
        let endpoint = self.endpoint();
        let mut builder = self
            .http
            .get(&endpoint)
            .bearer_auth(api_key.expose_secret());
        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(NodApiError::Transport)?;
        let status = response.status();
        let body = response.text().await.map_err(NodApiError::Transport)?;

        if status != StatusCode::OK {
            debug!(event = "nod_token_rejected", status = status.as_u16());
            return Err(NodApiError::HttpStatus {
                status,
                body: summarize_error_body(&body),
            });
        }

        let token = parse_token_response(&body)?;
        debug!(event = "nod_token_acquired");
        Ok(token)
    }

    fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, NOD_PATH)
    }
}

/// Single-use authorization token presented in the websocket URL.
#[derive(Clone, PartialEq, Eq)]
pub struct NodToken(String);

impl NodToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Tokens are credentials; keep them out of logs.
impl std::fmt::Debug for NodToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("NodToken(..)")
    }
}

#[derive(Debug, Error)]
pub enum NodApiError {
    #[error("nod request failed: {0}")]
    Transport(reqwest::Error),

    #[error("nod request rejected with http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },

    #[error("failed to decode nod response: {0}")]
    Decode(String),

    #[error("invalid nod api url: {0}")]
    InvalidUrl(String),
}

impl NodApiError {
    /// HTTP status of a rejected token request.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
}

fn parse_token_response(body: &str) -> Result<NodToken, NodApiError> {
    let parsed: TokenResponse =
        serde_json::from_str(body).map_err(|err| NodApiError::Decode(err.to_string()))?;
    parsed
        .token
        .map(NodToken)
        .ok_or_else(|| NodApiError::Decode("response is missing field `token`".to_string()))
}

pub(crate) fn trim_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn summarize_error_body(body: &str) -> String {
    #[derive(Debug, Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        reason: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.error.or(parsed.message).or(parsed.reason) {
            return message;
        }
    }

    body.chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::{
        parse_token_response, summarize_error_body, trim_base_url, NodApiClient,
        NodApiClientOptions, NodApiError, NodToken,
    };

    #[test]
    fn parse_token_response_extracts_token() {
        let token = parse_token_response(r#"{"token":"t1","expiresIn":30}"#).expect("parse");
        assert_eq!(token.as_str(), "t1");
    }

    #[test]
    fn parse_token_response_rejects_missing_token() {
        let error = parse_token_response(r#"{"other":"x"}"#).expect_err("missing token");
        assert!(matches!(error, NodApiError::Decode(_)));
    }

    #[test]
    fn parse_token_response_rejects_malformed_body() {
        let error = parse_token_response("<html>").expect_err("malformed body");
        assert!(matches!(error, NodApiError::Decode(_)));
    }

    #[test]
    fn environment_proxy_is_used_unless_bypassed() {
        let options = NodApiClientOptions::default();
        assert!(!options.bypass_proxy);
        assert!(NodApiClient::with_options("https://api.example.net", options).is_ok());

        let direct = NodApiClientOptions {
            bypass_proxy: true,
            ..NodApiClientOptions::default()
        };
        assert!(NodApiClient::with_options("https://api.example.net", direct).is_ok());
    }

    #[test]
    fn error_body_prefers_structured_message() {
        assert_eq!(summarize_error_body(r#"{"message":"forbidden"}"#), "forbidden");
        assert_eq!(summarize_error_body("plain failure"), "plain failure");
        assert_eq!(summarize_error_body(&"x".repeat(500)).len(), 220);
    }

    #[test]
    fn nod_client_trims_base_url() {
        let client = NodApiClient::new("https://api.example.net/ \n").expect("build client");
        assert_eq!(client.base_url(), "https://api.example.net");
        assert_eq!(client.endpoint(), "https://api.example.net/ws/nod");
        assert_eq!(trim_base_url("ws://h//"), "ws://h");
    }

    #[test]
    fn nod_client_rejects_empty_base_url() {
        let error = NodApiClient::new("  ").expect_err("empty url");
        assert!(matches!(error, NodApiError::InvalidUrl(_)));
    }

    #[test]
    fn nod_token_debug_is_redacted() {
        assert_eq!(format!("{:?}", NodToken::new("secret")), "NodToken(..)");
    }
}
