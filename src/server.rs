//! HTTP front door for the bus
//!
//! [`BayeuxServer`] assembles the router, the session store, and the
//! transport registry from an option store, and exposes the whole bus
//! as a single-endpoint axum [`Router`]. Every request is reduced to a
//! [`RequestView`] and dispatched to the first transport that accepts
//! it; a request no transport recognizes is a client error.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::any;

use crate::error::Result;
use crate::options::{self, DEFAULT_MAX_MESSAGE_SIZE, ServerOptions};
use crate::router::BayeuxRouter;
use crate::transport::{JsonpTransport, LongPollingTransport, RequestView, TransportRegistry};

/// Shared state for the request handler
struct AppState {
    router: BayeuxRouter,
    registry: TransportRegistry,
    max_message_size: usize,
}

/// Bayeux server builder
///
/// # Example
///
/// ```rust,no_run
/// use tower_bayeux::BayeuxServer;
///
/// #[tokio::main]
/// async fn main() -> tower_bayeux::Result<()> {
///     BayeuxServer::new()
///         .option("timeout", "20000")
///         .serve("127.0.0.1:8080")
///         .await
/// }
/// ```
pub struct BayeuxServer {
    options: ServerOptions,
}

impl BayeuxServer {
    /// Create a server with default options
    pub fn new() -> Self {
        Self {
            options: ServerOptions::new(),
        }
    }

    /// Create a server from a pre-built option store
    pub fn with_options(options: ServerOptions) -> Self {
        Self { options }
    }

    /// Set a single option by its full dotted name
    pub fn option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options = self.options.with_option(name, value);
        self
    }

    /// Build the axum router for the bus.
    ///
    /// Fails fast on malformed configuration; the server never starts
    /// accepting requests with a bad option store. Also spawns the
    /// background task that sweeps expired sessions.
    pub fn into_router(self) -> Result<Router> {
        let registry = TransportRegistry::new()
            .register(Arc::new(JsonpTransport::new(&self.options)?))
            .register(Arc::new(LongPollingTransport::new(&self.options)?));
        let router = BayeuxRouter::new(&self.options, registry.names())?;
        let max_message_size = self.options.usize(
            "",
            options::MAX_MESSAGE_SIZE_OPTION,
            DEFAULT_MAX_MESSAGE_SIZE,
        )?;

        let state = Arc::new(AppState {
            router,
            registry,
            max_message_size,
        });

        // Sweep expired sessions at half the expiry interval.
        let sweeper_state = state.clone();
        let sweep_interval = (state.router.sessions().max_interval() / 2)
            .max(Duration::from_millis(500));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            loop {
                interval.tick().await;
                sweeper_state.router.sessions().cleanup_expired().await;
            }
        });

        Ok(Router::new()
            .route("/", any(handle_request))
            .with_state(state))
    }

    /// Build an axum router mounted at a specific path
    pub fn into_router_at(self, path: &str) -> Result<Router> {
        let inner = self.into_router()?;
        Ok(Router::new().nest(path, inner))
    }

    /// Serve the bus on the given address
    ///
    /// Convenience wrapper that binds a TCP listener and serves the
    /// router until the process exits.
    pub async fn serve(self, addr: &str) -> Result<()> {
        let router = self.into_router()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("bayeux server listening on {addr}");
        axum::serve(listener, router).await?;
        Ok(())
    }
}

impl Default for BayeuxServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Dispatch one request through the transport registry
async fn handle_request(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let bytes = match axum::body::to_bytes(body, state.max_message_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!("failed to read request body: {e}");
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                "unreadable or oversized request body",
            )
                .into_response();
        }
    };

    let view = RequestView::new(parts.method, content_type, parts.uri.query(), bytes);

    let Some(transport) = state.registry.select(&view) else {
        tracing::debug!(method = %view.method(), "no transport accepts this request");
        return (StatusCode::BAD_REQUEST, "no transport accepts this request").into_response();
    };

    tracing::debug!(transport = transport.name(), "dispatching request");
    match transport.handle(&state.router, view).await {
        Ok(response) => response,
        Err(e) if e.is_client_error() => {
            tracing::debug!(transport = transport.name(), "client error: {e}");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Err(e) => {
            tracing::error!(transport = transport.name(), "handler error: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
