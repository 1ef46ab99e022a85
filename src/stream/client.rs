//! Stream websocket client.
//!
//! The client runs the full handshake on the caller's task: optional nod
//! token fetch, websocket connect, optional in-band key exchange, then the
//! subscription request and its acknowledgement. Messages are delivered one
//! at a time in arrival order; nothing is buffered and nothing is retried.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::nod_api::{
    trim_base_url, NodApiClient, NodApiClientOptions, NodApiError, NodToken, API_HTTP_URL,
};
use crate::stream::proto::{AuthAck, InboundMessage, SubscriptionDescriptor};
use crate::stream::subscription::Subscription;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production websocket base URL.
pub const API_WS_URL: &str = "wss://api.ocelloids.net";
const SUBSCRIPTIONS_PATH: &str = "/ws/subs";
const NOD_QUERY_PARAM: &str = "nod";
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Endpoints and credentials for a [`StreamClient`].
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub http_base_url: String,
    pub ws_base_url: String,
    /// Enables the nod token fetch and the in-band key exchange when set.
    pub api_key: Option<SecretString>,
}

impl ClientConfig {
    pub fn new(http_base_url: impl Into<String>, ws_base_url: impl Into<String>) -> Self {
        Self {
            http_base_url: http_base_url.into(),
            ws_base_url: ws_base_url.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.api_key = Some(api_key);
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.api_key.is_some()
    }

    fn normalized(mut self) -> Self {
        self.http_base_url = trim_base_url(&self.http_base_url);
        self.ws_base_url = trim_base_url(&self.ws_base_url);
        self
    }

    fn validate(&self) -> Result<(), StreamClientError> {
        validate_base_url(&self.http_base_url, "http_base_url", &["http", "https"])?;
        validate_base_url(&self.ws_base_url, "ws_base_url", &["ws", "wss"])?;
        if let Some(api_key) = self.api_key.as_ref() {
            if api_key.expose_secret().trim().is_empty() {
                return Err(StreamClientError::Config(
                    "api_key must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(API_HTTP_URL, API_WS_URL)
    }
}

fn validate_base_url(url: &str, field: &str, schemes: &[&str]) -> Result<(), StreamClientError> {
    let parsed = Url::parse(url)
        .map_err(|err| StreamClientError::Config(format!("{field} is not a valid url: {err}")))?;
    if !schemes.contains(&parsed.scheme()) {
        return Err(StreamClientError::Config(format!(
            "{field} must use one of {schemes:?}, got {}",
            parsed.scheme()
        )));
    }
    Ok(())
}

/// Optional bounds on the handshake steps.
///
/// Every timeout defaults to `None`, meaning the step waits indefinitely.
/// The message stream itself is never bounded.
#[derive(Clone, Debug, Default)]
pub struct ClientOptions {
    /// Bound on the nod token HTTP request.
    pub token_timeout: Option<Duration>,
    /// Bound on the websocket opening handshake.
    pub connect_timeout: Option<Duration>,
    /// Bound on each acknowledgement wait (auth and subscription).
    pub handshake_timeout: Option<Duration>,
    /// Sends the nod token request directly instead of through the
    /// environment's HTTP proxy.
    pub bypass_proxy: bool,
}

/// Lifecycle of a single connection attempt.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ConnectionState {
    #[default]
    Idle,
    TokenFetch,
    Connecting,
    AuthHandshake,
    Ready,
    Streaming,
    Closed,
}

/// Client for one subscription stream at a time.
///
/// Clones share the connection slot, so a clone can [`close`](Self::close)
/// a stream that another task is consuming.
#[derive(Clone, Debug)]
pub struct StreamClient {
    config: ClientConfig,
    options: ClientOptions,
    nod: Option<NodApiClient>,
    slot: ConnectionSlot,
}

impl StreamClient {
    pub fn new(config: ClientConfig) -> Result<Self, StreamClientError> {
        Self::with_options(config, ClientOptions::default())
    }

    pub fn with_options(
        config: ClientConfig,
        options: ClientOptions,
    ) -> Result<Self, StreamClientError> {
        let config = config.normalized();
        config.validate()?;

        let nod = if config.is_authenticated() {
            let nod_options = NodApiClientOptions {
                request_timeout: options.token_timeout,
                bypass_proxy: options.bypass_proxy,
            };
            Some(NodApiClient::with_options(
                config.http_base_url.clone(),
                nod_options,
            )?)
        } else {
            None
        };

        Ok(Self {
            config,
            options,
            nod,
            slot: ConnectionSlot::default(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_authenticated(&self) -> bool {
        self.config.is_authenticated()
    }

    /// State of the current, or most recent, connection attempt.
    pub fn state(&self) -> ConnectionState {
        self.slot.state()
    }

    /// Subscribes and feeds every message to `handler` until the stream ends.
    ///
    /// Returns `Ok(())` when the server closes the stream normally. A call to
    /// [`close`](Self::close) from another task makes this return
    /// [`StreamClientError::Cancelled`].
    pub async fn subscribe<F>(
        &self,
        descriptor: &SubscriptionDescriptor,
        handler: F,
    ) -> Result<(), StreamClientError>
    where
        F: FnMut(InboundMessage),
    {
        self.subscribe_with_cancellation(descriptor, handler, CancellationToken::new())
            .await
    }

    /// Like [`subscribe`](Self::subscribe), also stopping when `cancel` fires.
    pub async fn subscribe_with_cancellation<F>(
        &self,
        descriptor: &SubscriptionDescriptor,
        mut handler: F,
        cancel: CancellationToken,
    ) -> Result<(), StreamClientError>
    where
        F: FnMut(InboundMessage),
    {
        let mut subscription = self.open_with_cancellation(descriptor, cancel).await?;
        while let Some(message) = subscription.next_message().await {
            handler(message?);
        }
        Ok(())
    }

    /// Opens a subscription and hands back a pull-based handle.
    ///
    /// The client stays busy until the handle finishes or is dropped.
    pub async fn open(
        &self,
        descriptor: &SubscriptionDescriptor,
    ) -> Result<Subscription, StreamClientError> {
        self.open_with_cancellation(descriptor, CancellationToken::new())
            .await
    }

    pub async fn open_with_cancellation(
        &self,
        descriptor: &SubscriptionDescriptor,
        cancel: CancellationToken,
    ) -> Result<Subscription, StreamClientError> {
        let guard = self.slot.acquire(&cancel)?;
        let socket = self.connect(&guard).await?;
        Subscription::start(socket, guard, descriptor, self.options.handshake_timeout).await
    }

    /// Stops the active subscription, if any.
    ///
    /// Idempotent and safe to call from any task. The open socket is closed
    /// even when nobody is polling its [`Subscription`]; the subscribing side
    /// then sees [`StreamClientError::Cancelled`].
    pub fn close(&self) {
        if self.slot.cancel_active() {
            debug!(event = "stream_close_requested");
        }
    }

    async fn connect(&self, guard: &SlotGuard) -> Result<WsStream, StreamClientError> {
        let cancel = guard.cancellation().clone();

        let token = match (self.config.api_key.as_ref(), self.nod.as_ref()) {
            (Some(api_key), Some(nod)) => {
                guard.transition(ConnectionState::TokenFetch);
                let token = cancellable(&cancel, None, "nod token request", async {
                    nod.fetch_token(api_key).await.map_err(StreamClientError::from)
                })
                .await?;
                Some(token)
            }
            _ => None,
        };
        let url = self.subscription_url(token.as_ref())?;

        guard.transition(ConnectionState::Connecting);
        let (mut socket, _) = cancellable(
            &cancel,
            self.options.connect_timeout,
            "websocket connect",
            async {
                connect_async(url.as_str())
                    .await
                    .map_err(StreamClientError::from)
            },
        )
        .await?;

        if let Some(api_key) = self.config.api_key.as_ref() {
            guard.transition(ConnectionState::AuthHandshake);
            let outcome = authenticate(
                &mut socket,
                api_key,
                &cancel,
                self.options.handshake_timeout,
            )
            .await;
            if let Err(err) = outcome {
                close_socket(&mut socket).await;
                return Err(err);
            }
        }

        guard.transition(ConnectionState::Ready);
        Ok(socket)
    }

    fn subscription_url(&self, token: Option<&NodToken>) -> Result<Url, StreamClientError> {
        let mut url = Url::parse(&format!(
            "{}{}",
            self.config.ws_base_url, SUBSCRIPTIONS_PATH
        ))
        .map_err(|err| StreamClientError::Config(format!("invalid subscription url: {err}")))?;
        if let Some(token) = token {
            url.query_pairs_mut()
                .append_pair(NOD_QUERY_PARAM, token.as_str());
        }
        Ok(url)
    }
}

async fn authenticate(
    socket: &mut WsStream,
    api_key: &SecretString,
    cancel: &CancellationToken,
    timeout: Option<Duration>,
) -> Result<(), StreamClientError> {
    let key = api_key.expose_secret().clone();
    cancellable(cancel, timeout, "auth handshake", async {
        send_text(socket, key).await?;
        let text = recv_handshake_frame(socket, "auth acknowledgement").await?;
        let ack = AuthAck::from_text(&text)?;
        if ack.is_error() {
            let code = ack.code.unwrap_or_else(|| "unknown".to_string());
            warn!(event = "stream_auth_rejected", code = %code);
            return Err(StreamClientError::AuthRejected { code });
        }
        debug!(event = "stream_auth_accepted");
        Ok(())
    })
    .await
}

/// Broad classification of [`StreamClientError`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Config,
    Auth,
    Connection,
    Decode,
    /// Server refused the subscription request.
    Rejected,
    /// Caller-initiated stop. Not a failure of the stream.
    Cancelled,
    /// Client misuse, such as a second concurrent subscription.
    State,
}

/// Errors produced by the stream client.
#[derive(Debug, Error)]
pub enum StreamClientError {
    #[error("invalid client configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Nod(#[from] NodApiError),

    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("authentication rejected: {code}")]
    AuthRejected { code: String },

    #[error("subscription rejected: {code}")]
    SubscriptionRejected { code: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid utf-8 in {stage}: {source}")]
    InvalidUtf8 {
        stage: &'static str,
        #[source]
        source: std::string::FromUtf8Error,
    },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("connection closed with code {code}: {reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("timed out during {0}")]
    Timeout(&'static str),

    #[error("subscription cancelled")]
    Cancelled,

    #[error("a subscription is already active on this client")]
    AlreadySubscribed,
}

impl StreamClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Nod(NodApiError::HttpStatus { .. }) => ErrorKind::Auth,
            Self::Nod(NodApiError::Decode(_)) => ErrorKind::Decode,
            Self::Nod(NodApiError::Transport(_)) => ErrorKind::Connection,
            Self::Nod(NodApiError::InvalidUrl(_)) => ErrorKind::Config,
            Self::AuthRejected { .. } => ErrorKind::Auth,
            Self::SubscriptionRejected { .. } => ErrorKind::Rejected,
            Self::Json(_) | Self::InvalidUtf8 { .. } => ErrorKind::Decode,
            Self::WebSocket(_)
            | Self::Protocol(_)
            | Self::ConnectionClosed { .. }
            | Self::Timeout(_) => ErrorKind::Connection,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::AlreadySubscribed => ErrorKind::State,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[derive(Debug, Default)]
struct Slot {
    state: ConnectionState,
    cancel: Option<CancellationToken>,
}

/// Single authoritative record of the active connection attempt.
///
/// `close` and the receive path meet here; the socket itself stays with
/// whichever task currently owns the guard.
#[derive(Clone, Debug, Default)]
struct ConnectionSlot(Arc<Mutex<Slot>>);

impl ConnectionSlot {
    fn acquire(&self, parent: &CancellationToken) -> Result<SlotGuard, StreamClientError> {
        let mut slot = self.0.lock();
        if slot.cancel.is_some() {
            return Err(StreamClientError::AlreadySubscribed);
        }
        let cancel = parent.child_token();
        slot.cancel = Some(cancel.clone());
        slot.state = ConnectionState::Idle;
        Ok(SlotGuard {
            slot: self.clone(),
            cancel,
        })
    }

    fn cancel_active(&self) -> bool {
        let slot = self.0.lock();
        match slot.cancel.as_ref() {
            Some(cancel) if !cancel.is_cancelled() => {
                cancel.cancel();
                true
            }
            _ => false,
        }
    }

    fn state(&self) -> ConnectionState {
        self.0.lock().state
    }
}

/// Occupies the slot for one connection attempt; releases it on drop.
#[derive(Debug)]
pub(crate) struct SlotGuard {
    slot: ConnectionSlot,
    cancel: CancellationToken,
}

impl SlotGuard {
    pub(crate) fn transition(&self, state: ConnectionState) {
        let mut slot = self.slot.0.lock();
        if slot.state != state {
            debug!(event = "stream_state", from = ?slot.state, to = ?state);
            slot.state = state;
        }
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut slot = self.slot.0.lock();
        slot.state = ConnectionState::Closed;
        slot.cancel = None;
    }
}

/// Races `future` against cancellation and an optional deadline.
pub(crate) async fn cancellable<T, F>(
    cancel: &CancellationToken,
    timeout: Option<Duration>,
    stage: &'static str,
    future: F,
) -> Result<T, StreamClientError>
where
    F: Future<Output = Result<T, StreamClientError>>,
{
    let bounded = async {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, future).await {
                Ok(result) => result,
                Err(_) => Err(StreamClientError::Timeout(stage)),
            },
            None => future.await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StreamClientError::Cancelled),
        result = bounded => result,
    }
}

/// Data-bearing outcome of one socket read.
#[derive(Debug)]
pub(crate) enum Incoming {
    Text(String),
    Binary(Vec<u8>),
    Closed(Option<CloseFrame>),
    Ended,
}

/// Reads until a data frame, close frame, or end of stream.
///
/// Pings are answered by tungstenite itself on the next read or write.
pub(crate) async fn recv_incoming(socket: &mut WsStream) -> Result<Incoming, StreamClientError> {
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => return Ok(Incoming::Text(text.as_str().to_owned())),
            Some(Ok(Message::Binary(bytes))) => return Ok(Incoming::Binary(bytes.to_vec())),
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
            Some(Ok(Message::Close(frame))) => return Ok(Incoming::Closed(frame)),
            Some(Err(err)) => return Err(StreamClientError::WebSocket(err)),
            None => return Ok(Incoming::Ended),
        }
    }
}

/// Reads the single reply expected during the handshake.
pub(crate) async fn recv_handshake_frame(
    socket: &mut WsStream,
    stage: &'static str,
) -> Result<String, StreamClientError> {
    handshake_text(recv_incoming(socket).await?, stage)
}

fn handshake_text(incoming: Incoming, stage: &'static str) -> Result<String, StreamClientError> {
    match incoming {
        Incoming::Text(text) => Ok(text),
        Incoming::Binary(bytes) => String::from_utf8(bytes)
            .map_err(|source| StreamClientError::InvalidUtf8 { stage, source }),
        Incoming::Closed(Some(frame)) => Err(StreamClientError::ConnectionClosed {
            code: u16::from(frame.code),
            reason: format!("socket closed before {stage}: {}", frame.reason.as_str()),
        }),
        Incoming::Closed(None) => Err(StreamClientError::Protocol(format!(
            "socket closed before {stage}"
        ))),
        Incoming::Ended => Err(StreamClientError::Protocol(format!(
            "socket ended before {stage}"
        ))),
    }
}

/// Maps a peer close onto the end of the stream or an error.
///
/// Normal and going-away closures, and closes without a status, end the
/// stream cleanly.
pub(crate) fn close_outcome(frame: Option<CloseFrame>) -> Result<(), StreamClientError> {
    match frame {
        None => Ok(()),
        Some(frame) if matches!(frame.code, CloseCode::Normal | CloseCode::Away) => Ok(()),
        Some(frame) => Err(StreamClientError::ConnectionClosed {
            code: u16::from(frame.code),
            reason: frame.reason.as_str().to_owned(),
        }),
    }
}

pub(crate) async fn send_text(
    socket: &mut WsStream,
    text: String,
) -> Result<(), StreamClientError> {
    socket.send(Message::Text(text.into())).await?;
    Ok(())
}

/// Sends a close frame, bounded so teardown never hangs on a stalled peer.
pub(crate) async fn close_socket(socket: &mut WsStream) {
    match tokio::time::timeout(CLOSE_TIMEOUT, socket.close(None)).await {
        Ok(Ok(())) => debug!(event = "stream_socket_closed"),
        Ok(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {}
        Ok(Err(err)) => debug!(event = "stream_socket_close_failed", error = %err),
        Err(_) => debug!(event = "stream_socket_close_timed_out"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::StatusCode;
    use secrecy::SecretString;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_util::sync::CancellationToken;

    use super::{
        cancellable, close_outcome, handshake_text, ClientConfig, ConnectionState, ErrorKind,
        Incoming, StreamClient, StreamClientError, API_WS_URL,
    };
    use crate::nod_api::{NodApiError, NodToken, API_HTTP_URL};

    fn api_key(value: &str) -> SecretString {
        SecretString::new(value.to_string())
    }

    #[test]
    fn default_config_targets_production() {
        let client = StreamClient::new(ClientConfig::default()).expect("build client");
        assert_eq!(client.config().http_base_url, API_HTTP_URL);
        assert_eq!(client.config().ws_base_url, API_WS_URL);
        assert!(!client.is_authenticated());
        assert_eq!(client.state(), ConnectionState::Idle);
    }

    #[test]
    fn subscription_url_without_token() {
        let client = StreamClient::new(ClientConfig::new(
            "http://127.0.0.1:3000/",
            "ws://127.0.0.1:3000/ \n",
        ))
        .expect("build client");
        let url = client.subscription_url(None).expect("url");
        assert_eq!(url.as_str(), "ws://127.0.0.1:3000/ws/subs");
    }

    #[test]
    fn subscription_url_appends_nod_token() {
        let client = StreamClient::new(
            ClientConfig::new("https://api.example.net", "wss://api.example.net")
                .with_api_key(api_key("k1")),
        )
        .expect("build client");
        assert!(client.is_authenticated());

        let url = client
            .subscription_url(Some(&NodToken::new("t1")))
            .expect("url");
        assert_eq!(url.as_str(), "wss://api.example.net/ws/subs?nod=t1");

        let url = client
            .subscription_url(Some(&NodToken::new("a b&c")))
            .expect("url");
        assert_eq!(url.as_str(), "wss://api.example.net/ws/subs?nod=a+b%26c");
    }

    #[test]
    fn config_rejects_wrong_schemes_and_empty_key() {
        let error = StreamClient::new(ClientConfig::new(
            "https://api.example.net",
            "https://api.example.net",
        ))
        .expect_err("ws scheme required");
        assert_eq!(error.kind(), ErrorKind::Config);

        let error = StreamClient::new(ClientConfig::new("not a url", "wss://api.example.net"))
            .expect_err("http url required");
        assert_eq!(error.kind(), ErrorKind::Config);

        let error = StreamClient::new(ClientConfig::default().with_api_key(api_key("  ")))
            .expect_err("empty key");
        assert_eq!(error.kind(), ErrorKind::Config);
    }

    #[test]
    fn close_without_connection_is_a_no_op() {
        let client = StreamClient::new(ClientConfig::default()).expect("build client");
        client.close();
        client.close();
        assert_eq!(client.state(), ConnectionState::Idle);
    }

    #[test]
    fn second_acquire_is_rejected_until_release() {
        let client = StreamClient::new(ClientConfig::default()).expect("build client");
        let guard = client
            .slot
            .acquire(&CancellationToken::new())
            .expect("first acquire");

        let error = client
            .slot
            .acquire(&CancellationToken::new())
            .expect_err("second acquire");
        assert_eq!(error.kind(), ErrorKind::State);

        client.close();
        assert!(guard.cancellation().is_cancelled());

        drop(guard);
        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(client.slot.acquire(&CancellationToken::new()).is_ok());
    }

    #[test]
    fn parent_token_cancels_slot() {
        let client = StreamClient::new(ClientConfig::default()).expect("build client");
        let parent = CancellationToken::new();
        let guard = client.slot.acquire(&parent).expect("acquire");
        parent.cancel();
        assert!(guard.cancellation().is_cancelled());
    }

    #[test]
    fn error_kinds_follow_failure_source() {
        let rejected = StreamClientError::Nod(NodApiError::HttpStatus {
            status: StatusCode::FORBIDDEN,
            body: String::new(),
        });
        assert_eq!(rejected.kind(), ErrorKind::Auth);
        assert_eq!(
            StreamClientError::Nod(NodApiError::Decode("x".to_string())).kind(),
            ErrorKind::Decode
        );
        assert_eq!(
            StreamClientError::AuthRejected {
                code: "bad_key".to_string()
            }
            .kind(),
            ErrorKind::Auth
        );
        assert_eq!(StreamClientError::Timeout("x").kind(), ErrorKind::Connection);
        assert!(StreamClientError::Cancelled.is_cancelled());
    }

    #[test]
    fn close_outcome_distinguishes_normal_closure() {
        assert!(close_outcome(None).is_ok());
        assert!(close_outcome(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        }))
        .is_ok());
        assert!(close_outcome(Some(CloseFrame {
            code: CloseCode::Away,
            reason: "".into(),
        }))
        .is_ok());

        let error = close_outcome(Some(CloseFrame {
            code: CloseCode::Policy,
            reason: "quota".into(),
        }))
        .expect_err("abnormal close");
        match error {
            StreamClientError::ConnectionClosed { code, reason } => {
                assert_eq!(code, 1008);
                assert_eq!(reason, "quota");
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellable_prefers_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), _> =
            cancellable(&cancel, None, "test", std::future::pending()).await;
        assert!(matches!(result, Err(StreamClientError::Cancelled)));
    }

    #[tokio::test]
    async fn cancellable_applies_timeout() {
        let cancel = CancellationToken::new();
        let result: Result<(), _> = cancellable(
            &cancel,
            Some(Duration::from_millis(10)),
            "test",
            std::future::pending(),
        )
        .await;
        assert!(matches!(result, Err(StreamClientError::Timeout("test"))));
    }

    #[test]
    fn handshake_reply_accepts_utf8_binary() {
        let text = handshake_text(Incoming::Binary(br#"{"error":false}"#.to_vec()), "ack")
            .expect("binary ack");
        assert_eq!(text, r#"{"error":false}"#);
    }

    #[test]
    fn handshake_reply_with_invalid_utf8_is_a_decode_error() {
        let bytes = vec![0xff, 0xfe, 0x7b];
        let error =
            handshake_text(Incoming::Binary(bytes), "auth acknowledgement").expect_err("utf-8");
        assert_eq!(error.kind(), ErrorKind::Decode);
        match error {
            StreamClientError::InvalidUtf8 { stage, .. } => {
                assert_eq!(stage, "auth acknowledgement");
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[test]
    fn handshake_reply_after_close_is_a_connection_error() {
        let error = handshake_text(Incoming::Ended, "ack").expect_err("ended");
        assert_eq!(error.kind(), ErrorKind::Connection);
    }
}
