//! Bayeux transport implementations
//!
//! Provides the HTTP delivery variants of the bus:
//! - `long_polling` - JSON long-polling over POST (the base transport)
//! - `jsonp` - callback-polling over GET for script-tag delivery
//!
//! Each transport is a capability bundle behind [`ServerTransport`]: a
//! pure admission predicate (the classifier), message extraction from
//! the request representation, and response framing. Transports are
//! held in a [`TransportRegistry`] and selected per request by the
//! first matching `accepts`: a strategy table, not a class hierarchy.
//!
//! ## Delivery semantics
//!
//! The [`deliver`] engine is shared by all polling transports. It
//! processes the extracted batch through the router, holds the
//! meta-connect reply back while the session queue drains (suspending
//! up to the configured timeout when the queue is empty), and hands
//! every message to the transport's framer in delivery order: replies
//! first, then queued messages, then the connect reply last, so the
//! client observes data before the poll acknowledgement.
//!
//! Sessions owned by a meta-connect-delivery-only transport receive
//! queued messages exclusively on their own meta-connect responses;
//! other responses never carry them. Every handling cycle flushes a
//! complete response; no framing state survives a request.

pub mod jsonp;
pub mod long_polling;

pub use jsonp::JsonpTransport;
pub use long_polling::LongPollingTransport;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::Method;
use axum::response::Response;

use crate::error::Result;
use crate::protocol::{Message, channel};
use crate::router::BayeuxRouter;

/// Name of the parameter carrying JSON message batches, shared by all
/// transports
pub const MESSAGE_PARAM: &str = "message";

/// Read-only view of an inbound HTTP request.
///
/// Exposes exactly what transports need to classify and extract:
/// method, a multi-valued parameter lookup (query and urlencoded form
/// body merged, query first), and the raw body. Lives for one request.
#[derive(Debug)]
pub struct RequestView {
    method: Method,
    content_type: Option<String>,
    params: HashMap<String, Vec<String>>,
    body: Bytes,
}

impl RequestView {
    /// Build a view from the request pieces the front door collected
    pub fn new(
        method: Method,
        content_type: Option<String>,
        query: Option<&str>,
        body: Bytes,
    ) -> Self {
        let mut params: HashMap<String, Vec<String>> = HashMap::new();
        let mut absorb = |raw: &str| {
            if let Ok(pairs) = serde_urlencoded::from_str::<Vec<(String, String)>>(raw) {
                for (name, value) in pairs {
                    params.entry(name).or_default().push(value);
                }
            }
        };
        if let Some(query) = query {
            absorb(query);
        }
        let is_form = content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
        if is_form && let Ok(raw) = std::str::from_utf8(&body) {
            absorb(raw);
        }

        Self {
            method,
            content_type,
            params,
            body,
        }
    }

    /// HTTP method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// First value of a named parameter
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values of a named parameter, in request order
    pub fn parameter_values(&self, name: &str) -> Option<&[String]> {
        self.params.get(name).map(Vec::as_slice)
    }

    /// Raw request body
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// True when the request declared a JSON body
    pub fn has_json_body(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("application/json"))
    }
}

/// One delivery variant of the bus
#[async_trait]
pub trait ServerTransport: Send + Sync {
    /// Connection-type name negotiated during handshake
    fn name(&self) -> &'static str;

    /// Option namespace this transport reads its configuration under
    fn option_prefix(&self) -> &'static str;

    /// Pure admission predicate: does this request belong to this
    /// transport? No side effects; the registry calls this to route the
    /// request ahead of other transports.
    fn accepts(&self, request: &RequestView) -> bool;

    /// Whether sessions served by this transport may receive queued
    /// messages only on meta-connect responses
    fn meta_connect_delivery_only(&self) -> bool {
        false
    }

    /// Handle one admitted request end to end, producing a complete
    /// HTTP response
    async fn handle(&self, router: &BayeuxRouter, request: RequestView) -> Result<Response>;
}

/// Ordered transport table; the first transport whose `accepts` returns
/// true serves the request
pub struct TransportRegistry {
    transports: Vec<Arc<dyn ServerTransport>>,
}

impl TransportRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            transports: Vec::new(),
        }
    }

    /// Append a transport. Registration order is selection priority:
    /// callback-polling must precede plain long-polling so a
    /// callback-bearing GET never falls through.
    pub fn register(mut self, transport: Arc<dyn ServerTransport>) -> Self {
        self.transports.push(transport);
        self
    }

    /// Pick the transport for a request, if any accepts it
    pub fn select(&self, request: &RequestView) -> Option<Arc<dyn ServerTransport>> {
        self.transports
            .iter()
            .find(|transport| transport.accepts(request))
            .cloned()
    }

    /// Registered connection-type names, in selection order
    pub fn names(&self) -> Vec<&'static str> {
        self.transports.iter().map(|t| t.name()).collect()
    }
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one delivery cycle: route the batch, then hand each outbound
/// message to `write` in delivery order.
///
/// Replies are written as produced, except the meta-connect reply,
/// which is held back: if the connect succeeded, the session queue is
/// drained first (suspending up to the router timeout when empty) and
/// the connect reply goes out last. For batches without a meta-connect,
/// queued messages are flushed too, but only when the session is not
/// restricted to meta-connect delivery.
pub(crate) async fn deliver<W>(
    router: &BayeuxRouter,
    batch: Vec<Message>,
    meta_connect_only: bool,
    write: &mut W,
) -> Result<()>
where
    W: FnMut(&Message) -> Result<()>,
{
    let replies = router.handle_batch(batch).await;

    let mut connect_reply: Option<Message> = None;
    let mut session = None;
    for reply in replies {
        match reply.channel.as_deref() {
            Some(channel::META_HANDSHAKE) => {
                if meta_connect_only
                    && reply.successful == Some(true)
                    && let Some(id) = reply.client_id.as_deref()
                    && let Some(new_session) = router.sessions().get(id).await
                {
                    new_session.set_meta_connect_delivery_only(true);
                }
                write(&reply)?;
            }
            Some(channel::META_CONNECT) if connect_reply.is_none() => {
                if let Some(id) = reply.client_id.as_deref() {
                    session = router.sessions().get(id).await;
                }
                connect_reply = Some(reply);
            }
            _ => {
                if session.is_none()
                    && let Some(id) = reply.client_id.as_deref()
                {
                    session = router.sessions().get(id).await;
                }
                write(&reply)?;
            }
        }
    }

    match connect_reply {
        Some(reply) => {
            if reply.successful == Some(true)
                && let Some(session) = &session
            {
                for message in session.poll_delivery(router.timeout()).await {
                    write(&message)?;
                }
            }
            write(&reply)?;
        }
        None => {
            if let Some(session) = &session
                && !session.is_meta_connect_delivery_only()
            {
                for message in session.try_drain() {
                    write(&message)?;
                }
            }
        }
    }

    Ok(())
}
