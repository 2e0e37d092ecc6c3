//! Bayeux message router
//!
//! Processes inbound message batches against the session store and the
//! subscription table: meta messages mutate session state, publishes
//! fan out to subscribed sessions' delivery queues. The router never
//! writes to the wire itself: delivery happens inside a transport's
//! handling cycle, which is what lets the meta-connect-only constraint
//! hold.
//!
//! The router implements Tower's `Service` trait over message batches,
//! making it composable with standard tower middleware.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tower_service::Service;

use crate::error::Result;
use crate::options::{
    self, DEFAULT_INTERVAL_MS, DEFAULT_MAX_INTERVAL_MS, DEFAULT_MAX_SESSIONS, DEFAULT_TIMEOUT_MS,
    ServerOptions,
};
use crate::protocol::{Advice, BAYEUX_VERSION, Message, channel, channel_matches};
use crate::session::SessionStore;

/// Bayeux router that processes message batches against bus state
///
/// Cheap to clone; clones share the session store and subscription
/// table.
#[derive(Clone)]
pub struct BayeuxRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    sessions: SessionStore,
    /// Subscription pattern -> subscribed session ids. Dead sessions are
    /// pruned lazily during fan-out.
    subscriptions: RwLock<HashMap<String, HashSet<String>>>,
    /// Connection types the transport registry can actually serve
    connection_types: Vec<&'static str>,
    timeout: Duration,
    interval: Duration,
}

impl std::fmt::Debug for BayeuxRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BayeuxRouter")
            .field("timeout", &self.inner.timeout)
            .field("interval", &self.inner.interval)
            .field("connection_types", &self.inner.connection_types)
            .finish()
    }
}

impl BayeuxRouter {
    /// Build a router from the option store.
    ///
    /// All option parsing happens here; malformed values fail server
    /// construction rather than surfacing at request time.
    pub fn new(options: &ServerOptions, connection_types: Vec<&'static str>) -> Result<Self> {
        let timeout = options.duration_ms("", options::TIMEOUT_OPTION, DEFAULT_TIMEOUT_MS)?;
        let interval = options.duration_ms("", options::INTERVAL_OPTION, DEFAULT_INTERVAL_MS)?;
        let max_interval =
            options.duration_ms("", options::MAX_INTERVAL_OPTION, DEFAULT_MAX_INTERVAL_MS)?;
        let max_sessions =
            options.usize("", options::MAX_SESSIONS_OPTION, DEFAULT_MAX_SESSIONS)?;

        Ok(Self {
            inner: Arc::new(RouterInner {
                sessions: SessionStore::new(max_interval, max_sessions),
                subscriptions: RwLock::new(HashMap::new()),
                connection_types,
                timeout,
                interval,
            }),
        })
    }

    /// The session store
    pub fn sessions(&self) -> &SessionStore {
        &self.inner.sessions
    }

    /// How long a meta-connect poll is held open
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Process one inbound batch in order, returning one reply per message
    pub async fn handle_batch(&self, batch: Vec<Message>) -> Vec<Message> {
        let mut replies = Vec::with_capacity(batch.len());
        for message in batch {
            replies.push(self.handle_message(message).await);
        }
        replies
    }

    async fn handle_message(&self, message: Message) -> Message {
        tracing::debug!(channel = message.channel(), "routing message");
        match message.channel.as_deref() {
            Some(channel::META_HANDSHAKE) => self.handshake(message).await,
            Some(channel::META_CONNECT) => self.connect(message).await,
            Some(channel::META_SUBSCRIBE) => self.subscribe(message).await,
            Some(channel::META_UNSUBSCRIBE) => self.unsubscribe(message).await,
            Some(channel::META_DISCONNECT) => self.disconnect(message).await,
            Some(name) if !name.starts_with(channel::META_PREFIX) => self.publish(message).await,
            Some(name) => message
                .reply()
                .successful(false)
                .with_error(format!("404::unknown meta channel {name}")),
            None => Message::default()
                .successful(false)
                .with_error("400::channel missing"),
        }
    }

    async fn handshake(&self, message: Message) -> Message {
        let mut reply = message.reply().with_advice(Advice::retry(
            self.inner.interval.as_millis() as u64,
            self.inner.timeout.as_millis() as u64,
        ));
        reply
            .rest
            .insert("version".into(), BAYEUX_VERSION.into());
        reply.rest.insert(
            "supportedConnectionTypes".into(),
            self.inner
                .connection_types
                .iter()
                .map(|name| serde_json::Value::from(*name))
                .collect::<Vec<_>>()
                .into(),
        );

        match self.inner.sessions.create().await {
            Some(session) => {
                tracing::info!(session_id = %session.id(), "handshake complete");
                reply.with_client_id(session.id()).successful(true)
            }
            None => reply
                .successful(false)
                .with_error("500::server at capacity")
                .with_advice(Advice::handshake()),
        }
    }

    async fn connect(&self, message: Message) -> Message {
        let reply = message.reply();
        let Some(session) = self.session_of(&message).await else {
            return unknown_session(reply);
        };

        if let Some(kind) = message.connection_type.as_deref()
            && !self.inner.connection_types.iter().any(|name| *name == kind)
        {
            return reply
                .successful(false)
                .with_error(format!("404::unsupported connection type {kind}"));
        }

        session.touch();
        reply.successful(true).with_advice(Advice::retry(
            self.inner.interval.as_millis() as u64,
            self.inner.timeout.as_millis() as u64,
        ))
    }

    async fn subscribe(&self, message: Message) -> Message {
        let mut reply = message.reply();
        reply.subscription = message.subscription.clone();
        if self.session_of(&message).await.is_none() {
            return unknown_session(reply);
        }
        let Some(pattern) = message.subscription.as_deref() else {
            return reply
                .successful(false)
                .with_error("403::subscription missing");
        };
        if pattern.starts_with(channel::META_PREFIX) || !pattern.starts_with('/') {
            return reply
                .successful(false)
                .with_error(format!("403::cannot subscribe to {pattern}"));
        }

        let client_id = message.client_id.clone().unwrap_or_default();
        if let Ok(mut table) = self.inner.subscriptions.write() {
            table
                .entry(pattern.to_string())
                .or_default()
                .insert(client_id);
        }
        tracing::debug!(pattern, "subscribed");
        reply.successful(true)
    }

    async fn unsubscribe(&self, message: Message) -> Message {
        let mut reply = message.reply();
        reply.subscription = message.subscription.clone();
        if self.session_of(&message).await.is_none() {
            return unknown_session(reply);
        }
        let Some(pattern) = message.subscription.as_deref() else {
            return reply
                .successful(false)
                .with_error("403::subscription missing");
        };

        if let Some(client_id) = message.client_id.as_deref()
            && let Ok(mut table) = self.inner.subscriptions.write()
            && let Some(subscribers) = table.get_mut(pattern)
        {
            subscribers.remove(client_id);
            if subscribers.is_empty() {
                table.remove(pattern);
            }
        }
        reply.successful(true)
    }

    async fn disconnect(&self, message: Message) -> Message {
        let reply = message.reply();
        match message.client_id.as_deref() {
            Some(id) if self.inner.sessions.remove(id).await => {
                tracing::info!(session_id = %id, "disconnected");
                reply.successful(true)
            }
            _ => unknown_session(reply),
        }
    }

    /// Fan a published message out to every subscribed live session and
    /// acknowledge the publisher.
    async fn publish(&self, message: Message) -> Message {
        let reply = message.reply();
        if self.session_of(&message).await.is_none() {
            return unknown_session(reply);
        }
        let Some(name) = message.channel.as_deref() else {
            return reply.successful(false).with_error("400::channel missing");
        };

        let subscribers: Vec<String> = match self.inner.subscriptions.read() {
            Ok(table) => table
                .iter()
                .filter(|(pattern, _)| channel_matches(pattern, name))
                .flat_map(|(_, ids)| ids.iter().cloned())
                .collect(),
            Err(_) => Vec::new(),
        };

        let delivery = Message {
            channel: message.channel.clone(),
            id: message.id.clone(),
            data: message.data.clone(),
            rest: message.rest.clone(),
            ..Default::default()
        };

        let mut dead = Vec::new();
        for id in subscribers {
            match self.inner.sessions.get(&id).await {
                Some(session) => session.deliver(delivery.clone()),
                None => dead.push(id),
            }
        }
        if !dead.is_empty()
            && let Ok(mut table) = self.inner.subscriptions.write()
        {
            for ids in table.values_mut() {
                for id in &dead {
                    ids.remove(id);
                }
            }
            table.retain(|_, ids| !ids.is_empty());
        }

        tracing::debug!(channel = name, "published");
        reply.successful(true)
    }

    async fn session_of(&self, message: &Message) -> Option<Arc<crate::session::ServerSession>> {
        self.inner.sessions.get(message.client_id.as_deref()?).await
    }
}

fn unknown_session(reply: Message) -> Message {
    reply
        .successful(false)
        .with_error("402::session unknown")
        .with_advice(Advice::handshake())
}

/// A batch of Bayeux messages processed as one unit
pub type MessageBatch = Vec<Message>;

impl Service<MessageBatch> for BayeuxRouter {
    type Response = MessageBatch;
    type Error = Infallible;
    type Future = BoxFuture<'static, std::result::Result<MessageBatch, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, batch: MessageBatch) -> Self::Future {
        let router = self.clone();
        async move { Ok(router.handle_batch(batch).await) }.boxed()
    }
}

/// Transport set every stock server registers, in selection order
#[cfg(test)]
pub(crate) fn default_connection_types() -> Vec<&'static str> {
    vec![
        crate::transport::jsonp::NAME,
        crate::transport::long_polling::NAME,
    ]
}
