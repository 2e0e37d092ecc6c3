//! Server-side session state
//!
//! A session is created by a successful `/meta/handshake` and addressed
//! by its `clientId`. Messages published to channels a session is
//! subscribed to are queued here and drained by the session's next
//! meta-connect poll. Sessions expire after `maxInterval` without
//! contact; a background sweeper started by the server removes them.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, RwLock, mpsc};

use crate::protocol::Message;

/// Get current timestamp in milliseconds since UNIX epoch
fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// One client session: identity, delivery queue, and delivery policy.
///
/// The queue receiver sits behind a `Mutex` so that exactly one
/// meta-connect poll drains the session at a time; a second concurrent
/// poll waits its turn rather than splitting the stream.
#[derive(Debug)]
pub struct ServerSession {
    id: String,
    queue_tx: mpsc::UnboundedSender<Message>,
    queue_rx: Mutex<mpsc::UnboundedReceiver<Message>>,
    /// When set, queued messages may only ride meta-connect responses.
    /// Callback-polling sessions have no other script-executable
    /// response to ride on.
    meta_connect_only: AtomicBool,
    /// Timestamp of last activity (milliseconds since UNIX epoch)
    last_accessed: AtomicU64,
}

impl ServerSession {
    fn new(id: String) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            id,
            queue_tx,
            queue_rx: Mutex::new(queue_rx),
            meta_connect_only: AtomicBool::new(false),
            last_accessed: AtomicU64::new(current_timestamp_ms()),
        }
    }

    /// The session's `clientId`
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue a message for the session's next delivery cycle.
    ///
    /// Never blocks; ordering is the order of `deliver` calls.
    pub fn deliver(&self, message: Message) {
        if self.queue_tx.send(message).is_err() {
            tracing::warn!(session_id = %self.id, "delivery queue closed, message dropped");
        }
    }

    /// Drain queued messages, waiting up to `wait` for the first one.
    ///
    /// Returns immediately with whatever is queued when the queue is
    /// non-empty; otherwise suspends until a message arrives or the
    /// timeout elapses (the long-poll hold). Always drains everything
    /// available once the first message is in, so one response carries
    /// the whole pending batch.
    pub async fn poll_delivery(&self, wait: Duration) -> Vec<Message> {
        let mut rx = self.queue_rx.lock().await;
        let mut drained = Vec::new();
        while let Ok(message) = rx.try_recv() {
            drained.push(message);
        }
        if drained.is_empty() && !wait.is_zero() {
            if let Ok(Some(first)) = tokio::time::timeout(wait, rx.recv()).await {
                drained.push(first);
                while let Ok(message) = rx.try_recv() {
                    drained.push(message);
                }
            }
        }
        drained
    }

    /// Drain queued messages without waiting or contending.
    ///
    /// Used when flushing a non-meta-connect response. If a meta-connect
    /// poll currently holds the queue, returns nothing and lets the
    /// parked poll deliver instead.
    pub fn try_drain(&self) -> Vec<Message> {
        let mut drained = Vec::new();
        if let Ok(mut rx) = self.queue_rx.try_lock() {
            while let Ok(message) = rx.try_recv() {
                drained.push(message);
            }
        }
        drained
    }

    /// Restrict delivery to meta-connect responses
    pub fn set_meta_connect_delivery_only(&self, value: bool) {
        self.meta_connect_only.store(value, Ordering::Release);
    }

    /// Whether queued messages may only ride meta-connect responses
    pub fn is_meta_connect_delivery_only(&self) -> bool {
        self.meta_connect_only.load(Ordering::Acquire)
    }

    /// Update the last accessed timestamp
    pub fn touch(&self) {
        self.last_accessed
            .store(current_timestamp_ms(), Ordering::Relaxed);
    }

    /// Check if the session has gone `ttl` without contact
    pub fn is_expired(&self, ttl: Duration) -> bool {
        let last = self.last_accessed.load(Ordering::Relaxed);
        let now = current_timestamp_ms();
        now.saturating_sub(last) > ttl.as_millis() as u64
    }
}

/// Session store mapping `clientId` to session state
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<ServerSession>>>,
    /// Session time-to-live since last contact
    max_interval: Duration,
    /// Maximum number of concurrent sessions
    max_sessions: usize,
}

impl SessionStore {
    /// Create a store with the given expiry and capacity limits
    pub fn new(max_interval: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_interval,
            max_sessions,
        }
    }

    /// Create a new session, or `None` when the store is at capacity
    pub async fn create(&self) -> Option<Arc<ServerSession>> {
        let mut sessions = self.sessions.write().await;

        if sessions.len() >= self.max_sessions {
            tracing::warn!(
                max = self.max_sessions,
                current = sessions.len(),
                "session limit reached, rejecting handshake"
            );
            return None;
        }

        let id = uuid::Uuid::new_v4().simple().to_string();
        let session = Arc::new(ServerSession::new(id.clone()));
        sessions.insert(id, session.clone());
        tracing::debug!(session_id = %session.id, total = sessions.len(), "created session");
        Some(session)
    }

    /// Look up a live session, touching it on access
    pub async fn get(&self, id: &str) -> Option<Arc<ServerSession>> {
        let sessions = self.sessions.read().await;
        let session = sessions.get(id)?;
        if session.is_expired(self.max_interval) {
            tracing::debug!(session_id = %id, "session expired on access");
            return None;
        }
        session.touch();
        Some(session.clone())
    }

    /// Remove a session, returning whether it existed
    pub async fn remove(&self, id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        let removed = sessions.remove(id).is_some();
        if removed {
            tracing::debug!(session_id = %id, total = sessions.len(), "removed session");
        }
        removed
    }

    /// Remove all expired sessions, returning how many were dropped
    pub async fn cleanup_expired(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|id, session| {
            let expired = session.is_expired(self.max_interval);
            if expired {
                tracing::debug!(session_id = %id, "removing expired session");
            }
            !expired
        });
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::info!(
                removed,
                remaining = sessions.len(),
                "cleaned up expired sessions"
            );
        }
        removed
    }

    /// The configured session time-to-live
    pub fn max_interval(&self) -> Duration {
        self.max_interval
    }

    /// Get the number of active sessions
    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
