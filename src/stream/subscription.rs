//! Pull-based handle over an open subscription.
//!
//! Once the handshake is done the socket moves into a driver task that reads
//! one frame per request from the [`Subscription`] handle, so messages come
//! out in arrival order and nothing is read ahead. The driver also watches
//! the attempt's cancellation token, which lets [`StreamClient::close`] shut
//! an idle handle's socket without anyone polling it.
//!
//! [`StreamClient::close`]: crate::stream::client::StreamClient::close

use std::time::Duration;

use futures_util::Stream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::stream::client::{
    cancellable, close_outcome, close_socket, recv_handshake_frame, recv_incoming, send_text,
    ConnectionState, Incoming, SlotGuard, StreamClientError, WsStream,
};
use crate::stream::proto::{InboundMessage, SubscriptionAck, SubscriptionDescriptor};

type FrameReply = oneshot::Sender<Result<Incoming, StreamClientError>>;

/// Active subscription stream.
///
/// Dropping the handle closes the socket and releases the client in the
/// background; [`close`](Self::close) does the same and waits for it.
pub struct Subscription {
    requests: Option<mpsc::Sender<FrameReply>>,
    driver: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    agent: String,
    ack: SubscriptionAck,
    received: u64,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("agent", &self.agent)
            .field("received", &self.received)
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

impl Subscription {
    pub(crate) async fn start(
        mut socket: WsStream,
        guard: SlotGuard,
        descriptor: &SubscriptionDescriptor,
        handshake_timeout: Option<Duration>,
    ) -> Result<Self, StreamClientError> {
        let cancel = guard.cancellation().clone();
        let outcome = cancellable(&cancel, handshake_timeout, "subscription handshake", async {
            send_text(&mut socket, descriptor.to_text()?).await?;
            let text = recv_handshake_frame(&mut socket, "subscription acknowledgement").await?;
            let ack = SubscriptionAck::from_text(&text)?;
            if let Some(code) = ack.rejection() {
                return Err(StreamClientError::SubscriptionRejected { code });
            }
            Ok(ack)
        })
        .await;

        let ack = match outcome {
            Ok(ack) => ack,
            Err(err) => {
                close_socket(&mut socket).await;
                return Err(err);
            }
        };

        guard.transition(ConnectionState::Streaming);
        info!(event = "stream_subscribed", agent = %descriptor.agent);

        let (requests_tx, requests_rx) = mpsc::channel(1);
        let driver = tokio::spawn(drive_socket(
            socket,
            guard,
            requests_rx,
            descriptor.agent.clone(),
        ));

        Ok(Self {
            requests: Some(requests_tx),
            driver: Some(driver),
            cancel,
            agent: descriptor.agent.clone(),
            ack,
            received: 0,
        })
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Acknowledgement frame the server sent for the descriptor.
    pub fn ack(&self) -> &SubscriptionAck {
        &self.ack
    }

    pub fn messages_received(&self) -> u64 {
        self.received
    }

    pub fn is_finished(&self) -> bool {
        self.requests.is_none()
    }

    /// Waits for the next message.
    ///
    /// `None` means the server ended the stream normally. After an error the
    /// socket is already closed and every later call returns `None`.
    pub async fn next_message(&mut self) -> Option<Result<InboundMessage, StreamClientError>> {
        let requests = self.requests.as_ref()?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let incoming = match requests.send(reply_tx).await {
            Ok(()) => reply_rx.await.unwrap_or_else(|_| Err(self.stopped())),
            Err(_) => Err(self.stopped()),
        };

        let decoded = match incoming {
            Ok(Incoming::Text(text)) => InboundMessage::from_text(&text)
                .map(Some)
                .map_err(StreamClientError::from),
            Ok(Incoming::Binary(bytes)) => InboundMessage::from_slice(&bytes)
                .map(Some)
                .map_err(StreamClientError::from),
            Ok(Incoming::Closed(frame)) => close_outcome(frame).map(|()| None),
            Ok(Incoming::Ended) => Err(StreamClientError::Protocol(
                "socket ended without a close frame".to_string(),
            )),
            Err(err) => Err(err),
        };

        match decoded {
            Ok(Some(message)) => {
                self.received += 1;
                Some(Ok(message))
            }
            Ok(None) => {
                self.finish().await;
                None
            }
            Err(err) => {
                debug!(event = "stream_failed", agent = %self.agent, error = %err);
                self.finish().await;
                Some(Err(err))
            }
        }
    }

    /// Closes the socket and releases the client. Idempotent.
    pub async fn close(&mut self) {
        self.finish().await;
    }

    /// Adapts the handle into a [`Stream`] of messages.
    pub fn into_stream(self) -> impl Stream<Item = Result<InboundMessage, StreamClientError>> {
        futures_util::stream::unfold(self, |mut subscription| async move {
            let item = subscription.next_message().await?;
            Some((item, subscription))
        })
    }

    /// Error for a driver that stopped before answering.
    fn stopped(&self) -> StreamClientError {
        if self.cancel.is_cancelled() {
            StreamClientError::Cancelled
        } else {
            StreamClientError::Protocol("stream driver stopped".to_string())
        }
    }

    async fn finish(&mut self) {
        if self.requests.take().is_none() {
            return;
        }
        if let Some(driver) = self.driver.take() {
            let _ = driver.await;
        }
        debug!(
            event = "stream_released",
            agent = %self.agent,
            messages = self.received
        );
    }
}

/// Owns the socket for the life of the subscription.
///
/// Reads one frame per request and stops after any terminal frame, when the
/// attempt is cancelled, or when the handle goes away. The socket is always
/// closed before the guard is released.
async fn drive_socket(
    mut socket: WsStream,
    guard: SlotGuard,
    mut requests: mpsc::Receiver<FrameReply>,
    agent: String,
) {
    let cancel = guard.cancellation().clone();

    loop {
        let mut reply = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            request = requests.recv() => match request {
                Some(reply) => reply,
                None => break,
            },
        };

        let incoming = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            // The caller gave up on this read; the frame stays queued in the socket.
            _ = reply.closed() => continue,
            incoming = recv_incoming(&mut socket) => incoming,
        };

        let terminal = !matches!(incoming, Ok(Incoming::Text(_) | Incoming::Binary(_)));
        let _ = reply.send(incoming);
        if terminal {
            break;
        }
    }

    if cancel.is_cancelled() {
        debug!(event = "stream_cancelled", agent = %agent);
    }
    close_socket(&mut socket).await;
    guard.transition(ConnectionState::Closed);
    drop(guard);
    info!(event = "stream_ended", agent = %agent);
}
