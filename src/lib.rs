//! # tower-bayeux
//!
//! Tower-native Bayeux publish/subscribe server for Rust.
//!
//! This crate implements the server side of a Bayeux-style message bus
//! delivered over plain HTTP, for clients and networks where persistent
//! connections or native push are unavailable. Two transports are
//! provided:
//!
//! - **JSON long-polling**: the client POSTs a message batch and the
//!   server holds the meta-connect open until messages are ready or a
//!   timeout elapses.
//! - **Callback-polling (JSONP)**: the client issues a GET naming a
//!   JavaScript callback; the response is a single executable
//!   `callback([...])` expression, suitable for `<script src=…>`-style
//!   cross-origin delivery.
//!
//! ## Philosophy
//!
//! Like [axum](https://docs.rs/axum) itself, tower-bayeux treats the
//! bus as just another service behind Tower's `Service` trait:
//!
//! - The message router implements `tower::Service` over message
//!   batches, so standard tower middleware (tracing, rate limiting,
//!   timeouts) just works
//! - Transports are strategy values selected per request from a
//!   registry, not a class hierarchy; adding a delivery variant means
//!   implementing one trait
//! - The whole bus mounts into any axum application as a plain
//!   [`Router`](axum::Router)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tower_bayeux::BayeuxServer;
//!
//! #[tokio::main]
//! async fn main() -> tower_bayeux::Result<()> {
//!     BayeuxServer::new()
//!         .option("timeout", "20000")
//!         .option("long-polling.jsonp.callbackParameter", "jsonp")
//!         .serve("127.0.0.1:8080")
//!         .await
//! }
//! ```
//!
//! A browser session then runs the usual Bayeux flow: handshake for a
//! `clientId`, subscribe to channels, and keep a meta-connect poll
//! outstanding. Published messages ride back on that poll:
//!
//! ```text
//! GET /?jsonp=myCb&message=[{"channel":"/meta/connect","clientId":"...","connectionType":"callback-polling"}]
//!
//! myCb([{"channel":"/chat/demo","data":"hi"},{"channel":"/meta/connect","successful":true,...}])
//! ```
//!
//! ## Delivery model
//!
//! Sessions handshaken over callback-polling are
//! *meta-connect-delivery-only*: queued messages are released
//! exclusively on the session's own meta-connect responses, because a
//! JSONP client is only listening while a script tag is in flight;
//! there is no channel for unsolicited push. The JSON long-polling
//! transport has no such restriction and may piggyback queued messages
//! on any of the session's responses.
//!
//! ## Key Types
//!
//! - [`BayeuxServer`] - builder producing the axum router / serving it
//! - [`BayeuxRouter`] - routes message batches to bus state
//! - [`ServerOptions`] - string option store with per-transport
//!   namespaces
//! - [`Message`] / [`Advice`] - the Bayeux wire model
//! - [`ServerTransport`] / [`TransportRegistry`] - the transport seam
//! - [`JsonpTransport`] / [`LongPollingTransport`] - the two delivery
//!   variants

pub mod error;
pub mod options;
pub mod protocol;
pub mod router;
pub mod server;
pub mod session;
pub mod transport;

// Re-exports
pub use error::{Error, Result};
pub use options::ServerOptions;
pub use protocol::{Advice, Message, Reconnect, channel, channel_matches, parse_batch};
pub use router::{BayeuxRouter, MessageBatch};
pub use server::BayeuxServer;
pub use session::{ServerSession, SessionStore};
pub use transport::{
    JsonpTransport, LongPollingTransport, RequestView, ServerTransport, TransportRegistry,
};
