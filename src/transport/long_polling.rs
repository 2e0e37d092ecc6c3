//! JSON long-polling transport
//!
//! The base HTTP delivery variant: the client POSTs a JSON batch
//! (either as the request body or in the `message` parameter of a
//! form), the server holds a meta-connect open until messages are
//! ready or the timeout elapses, and the response is one JSON array of
//! messages. Browsers with CORS or same-origin access use this;
//! everything else falls back to callback-polling.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, StatusCode, header};
use axum::response::Response;

use crate::error::{Error, Result};
use crate::options::ServerOptions;
use crate::protocol::Message;
use crate::router::BayeuxRouter;
use crate::transport::{self, MESSAGE_PARAM, RequestView, ServerTransport};

/// Connection-type name negotiated during handshake
pub const NAME: &str = "long-polling";
/// Option namespace for this transport
pub const PREFIX: &str = "long-polling.json";
/// Option overriding the response MIME type
pub const MIME_TYPE_OPTION: &str = "mimeType";

const DEFAULT_MIME_TYPE: &str = "application/json;charset=UTF-8";

/// The JSON long-polling transport
#[derive(Debug)]
pub struct LongPollingTransport {
    mime_type: String,
}

impl LongPollingTransport {
    /// Build the transport, resolving its options under [`PREFIX`]
    pub fn new(options: &ServerOptions) -> Result<Self> {
        let mime_type = options.string(PREFIX, MIME_TYPE_OPTION, DEFAULT_MIME_TYPE);
        if mime_type.is_empty() {
            return Err(Error::Config(format!(
                "option {PREFIX}.{MIME_TYPE_OPTION} must not be empty"
            )));
        }
        Ok(Self { mime_type })
    }

    /// Extract the message batch: the raw body for JSON requests, the
    /// `message` parameter for form posts
    fn parse_messages(&self, request: &RequestView) -> Result<Vec<Message>> {
        if request.has_json_body() {
            let raw = std::str::from_utf8(request.body())
                .map_err(|_| Error::bad_request("request body is not valid UTF-8"))?;
            return crate::protocol::parse_batch(&[raw]);
        }
        let values = request
            .parameter_values(MESSAGE_PARAM)
            .ok_or_else(|| Error::bad_request(format!("missing {MESSAGE_PARAM} parameter")))?;
        crate::protocol::parse_batch(values)
    }
}

#[async_trait]
impl ServerTransport for LongPollingTransport {
    fn name(&self) -> &'static str {
        NAME
    }

    fn option_prefix(&self) -> &'static str {
        PREFIX
    }

    /// POSTs carrying a JSON body or a `message` parameter belong here
    fn accepts(&self, request: &RequestView) -> bool {
        request.method() == Method::POST
            && (request.has_json_body() || request.parameter(MESSAGE_PARAM).is_some())
    }

    async fn handle(&self, router: &BayeuxRouter, request: RequestView) -> Result<Response> {
        let batch = self.parse_messages(&request)?;

        let mut body = String::from("[");
        let mut first = true;
        transport::deliver(
            router,
            batch,
            self.meta_connect_delivery_only(),
            &mut |message: &Message| {
                if first {
                    first = false;
                } else {
                    body.push(',');
                }
                body.push_str(&serde_json::to_string(message)?);
                Ok(())
            },
        )
        .await?;
        body.push(']');

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, &self.mime_type)
            .body(Body::from(body))
            .map_err(|e| Error::Transport(e.to_string()))
    }
}
