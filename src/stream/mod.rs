//! Realtime subscription modules.
//!
//! - `client`: connection lifecycle, handshake, and the callback API.
//! - `proto`: frames exchanged with the subscription endpoint.
//! - `subscription`: pull-based handle over an open stream.

/// Websocket connection, authentication, and subscribe loop.
pub mod client;
/// Subscription protocol frames.
pub mod proto;
/// Pull-based subscription handle.
pub mod subscription;
