//! Callback-polling (JSONP) transport
//!
//! Wraps each delivery batch in a call to a client-named JavaScript
//! function so a browser can receive bus messages through a
//! `<script src=…>` tag where CORS or persistent connections are
//! unavailable. The client issues a GET naming its callback; the
//! response body is one complete, immediately-executable expression:
//!
//! ```text
//! GET /?jsonp=myCb&message=[{"channel":"/meta/connect",...}]
//!
//! myCb([{"channel":"/meta/connect","successful":true,...}])
//! ```
//!
//! Only a callback-bearing GET can produce a script-executable
//! response, so sessions handshaken over this transport are restricted
//! to meta-connect delivery: the bus can never push to an idle client
//! here, it can only answer the poll the client is already waiting on.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::Response;

use crate::error::{Error, Result};
use crate::options::ServerOptions;
use crate::protocol::Message;
use crate::router::BayeuxRouter;
use crate::transport::{self, MESSAGE_PARAM, RequestView, ServerTransport};

/// Connection-type name negotiated during handshake
pub const NAME: &str = "callback-polling";
/// Option namespace for this transport
pub const PREFIX: &str = "long-polling.jsonp";
/// Option overriding the response MIME type
pub const MIME_TYPE_OPTION: &str = "mimeType";
/// Option overriding the callback query-parameter name
pub const CALLBACK_PARAMETER_OPTION: &str = "callbackParameter";

const DEFAULT_MIME_TYPE: &str = "text/javascript;charset=UTF-8";
const DEFAULT_CALLBACK_PARAMETER: &str = "jsonp";

/// The callback-polling transport.
///
/// Configuration is resolved once at construction and immutable
/// afterwards; the transport is freely shared across concurrent
/// requests.
#[derive(Debug)]
pub struct JsonpTransport {
    mime_type: String,
    callback_param: String,
}

impl JsonpTransport {
    /// Build the transport, resolving its options under [`PREFIX`]
    pub fn new(options: &ServerOptions) -> Result<Self> {
        let mime_type = options.string(PREFIX, MIME_TYPE_OPTION, DEFAULT_MIME_TYPE);
        let callback_param =
            options.string(PREFIX, CALLBACK_PARAMETER_OPTION, DEFAULT_CALLBACK_PARAMETER);
        if callback_param.is_empty() {
            return Err(Error::Config(format!(
                "option {PREFIX}.{CALLBACK_PARAMETER_OPTION} must not be empty"
            )));
        }
        if mime_type.is_empty() {
            return Err(Error::Config(format!(
                "option {PREFIX}.{MIME_TYPE_OPTION} must not be empty"
            )));
        }
        Ok(Self {
            mime_type,
            callback_param,
        })
    }

    /// The configured callback query-parameter name
    pub fn callback_parameter(&self) -> &str {
        &self.callback_param
    }

    /// Extract the message batch from the request's `message` parameter
    fn parse_messages(&self, request: &RequestView) -> Result<Vec<Message>> {
        let values = request
            .parameter_values(MESSAGE_PARAM)
            .ok_or_else(|| Error::bad_request(format!("missing {MESSAGE_PARAM} parameter")))?;
        crate::protocol::parse_batch(values)
    }
}

/// A callback value is usable only as a dot-separated JavaScript
/// identifier path; anything else cannot be echoed into an executable
/// script.
fn is_safe_callback(value: &str) -> bool {
    !value.is_empty()
        && value.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        })
}

#[async_trait]
impl ServerTransport for JsonpTransport {
    fn name(&self) -> &'static str {
        NAME
    }

    fn option_prefix(&self) -> &'static str {
        PREFIX
    }

    /// A request belongs to this transport iff it is a GET naming a
    /// usable callback. A GET without the callback parameter belongs to
    /// a different transport and is rejected here, not absorbed.
    fn accepts(&self, request: &RequestView) -> bool {
        request.method() == axum::http::Method::GET
            && request
                .parameter(&self.callback_param)
                .is_some_and(is_safe_callback)
    }

    fn meta_connect_delivery_only(&self) -> bool {
        true
    }

    async fn handle(&self, router: &BayeuxRouter, request: RequestView) -> Result<Response> {
        let callback = request
            .parameter(&self.callback_param)
            .ok_or_else(|| Error::bad_request("missing callback parameter"))?;
        let batch = self.parse_messages(&request)?;

        let mut writer = JsonpWriter::new(callback);
        transport::deliver(
            router,
            batch,
            self.meta_connect_delivery_only(),
            &mut |message: &Message| writer.write_message(message),
        )
        .await?;
        let body = writer.finish();

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, &self.mime_type)
            .body(Body::from(body))
            .map_err(|e| Error::Transport(e.to_string()))
    }
}

/// Incremental framer for one callback-polling response.
///
/// Messages arrive one at a time in delivery order. The prologue
/// `<callback>([` is written lazily on the first message, later
/// messages are comma-separated, and [`finish`](Self::finish) consumes
/// the writer to close the invocation; the terminal state is enforced
/// by ownership, so a closed writer cannot be written to again. A
/// writer that never saw a message still closes to a complete
/// `<callback>([])` document: a script tag must always receive
/// something executable.
#[derive(Debug)]
pub struct JsonpWriter {
    callback: String,
    buf: String,
    started: bool,
}

impl JsonpWriter {
    /// Create a writer for the given callback name
    pub fn new(callback: impl Into<String>) -> Self {
        Self {
            callback: callback.into(),
            buf: String::new(),
            started: false,
        }
    }

    /// Append the next message of the batch.
    ///
    /// Serialization of the message itself is delegated to the message
    /// type; this writer only frames.
    pub fn write_message(&mut self, message: &Message) -> Result<()> {
        if self.started {
            self.buf.push(',');
        } else {
            self.buf.push_str(&self.callback);
            self.buf.push_str("([");
            self.started = true;
        }
        self.buf.push_str(&serde_json::to_string(message)?);
        Ok(())
    }

    /// Close the invocation and yield the complete response body
    pub fn finish(mut self) -> String {
        if !self.started {
            self.buf.push_str(&self.callback);
            self.buf.push_str("([");
        }
        self.buf.push_str("])");
        self.buf
    }
}
