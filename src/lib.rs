//! Rust client for Ocelloids realtime subscription streams.
//!
//! The crate is organized by transport surface:
//! - `nod_api`: HTTP client for connection-scoped nod tokens.
//! - `stream`: websocket client that authenticates, subscribes, and delivers
//!   agent messages.

/// Nod token client.
pub mod nod_api;
/// Realtime stream client, protocol types, and subscription handle.
pub mod stream;

pub use nod_api::{NodApiClient, NodApiError, NodToken};
pub use stream::client::{
    ClientConfig, ClientOptions, ConnectionState, ErrorKind, StreamClient, StreamClientError,
};
pub use stream::proto::{AuthAck, InboundMessage, SubscriptionAck, SubscriptionDescriptor};
pub use stream::subscription::Subscription;
