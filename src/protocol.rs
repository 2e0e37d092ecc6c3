//! Bayeux protocol types
//!
//! A Bayeux message is a JSON object exchanged in ordered batches. The
//! well-known fields are typed here; everything a client sends beyond
//! them (extensions, custom fields) rides along in `rest` and survives
//! a round trip untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// The Bayeux protocol version advertised in handshake replies.
pub const BAYEUX_VERSION: &str = "1.0";

/// Bayeux meta channel names
pub mod channel {
    /// Session establishment and connection-type negotiation
    pub const META_HANDSHAKE: &str = "/meta/handshake";
    /// The session's dedicated long-poll delivery channel
    pub const META_CONNECT: &str = "/meta/connect";
    /// Channel subscription
    pub const META_SUBSCRIBE: &str = "/meta/subscribe";
    /// Channel unsubscription
    pub const META_UNSUBSCRIBE: &str = "/meta/unsubscribe";
    /// Clean session teardown
    pub const META_DISCONNECT: &str = "/meta/disconnect";
    /// Prefix shared by all meta channels
    pub const META_PREFIX: &str = "/meta/";
}

/// Reconnect instruction carried in [`Advice`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reconnect {
    /// Keep polling with the current session
    Retry,
    /// The session is gone; perform a new handshake
    Handshake,
    /// Stop reconnecting entirely
    None,
}

/// Server advice attached to meta replies, steering the client's
/// reconnection behavior.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Advice {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<Reconnect>,
    /// Delay in milliseconds before the client re-polls
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    /// How long in milliseconds the server will hold a meta-connect open
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl Advice {
    /// Advice to keep polling with the current session
    pub fn retry(interval: u64, timeout: u64) -> Self {
        Self {
            reconnect: Some(Reconnect::Retry),
            interval: Some(interval),
            timeout: Some(timeout),
        }
    }

    /// Advice to re-handshake (the session is unknown or expired)
    pub fn handshake() -> Self {
        Self {
            reconnect: Some(Reconnect::Handshake),
            interval: None,
            timeout: None,
        }
    }
}

/// A single Bayeux message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub successful: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advice: Option<Advice>,
    /// Extension and custom fields, preserved verbatim
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

impl Message {
    /// Create an empty message on the given channel
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: Some(channel.into()),
            ..Default::default()
        }
    }

    /// Start a reply to this message: same channel and id, clientId echoed
    pub fn reply(&self) -> Self {
        Self {
            channel: self.channel.clone(),
            id: self.id.clone(),
            client_id: self.client_id.clone(),
            ..Default::default()
        }
    }

    /// Channel name, or empty when absent
    pub fn channel(&self) -> &str {
        self.channel.as_deref().unwrap_or("")
    }

    /// True for `/meta/*` channels
    pub fn is_meta(&self) -> bool {
        self.channel().starts_with(channel::META_PREFIX)
    }

    /// Set the success flag
    pub fn successful(mut self, successful: bool) -> Self {
        self.successful = Some(successful);
        self
    }

    /// Set the client id
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set the application payload
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Set the error description (Bayeux `code::detail` form)
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attach advice
    pub fn with_advice(mut self, advice: Advice) -> Self {
        self.advice = Some(advice);
        self
    }
}

/// Check whether a subscription pattern matches a channel.
///
/// `/foo/*` matches exactly one further segment and `/foo/**` matches
/// any number of further segments; patterns without wildcards match only
/// themselves.
pub fn channel_matches(pattern: &str, channel: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix("/**") {
        channel.len() > prefix.len()
            && channel.starts_with(prefix)
            && channel[prefix.len()..].starts_with('/')
    } else if let Some(prefix) = pattern.strip_suffix("/*") {
        match channel.strip_prefix(prefix) {
            Some(tail) => tail.len() > 1 && tail.starts_with('/') && !tail[1..].contains('/'),
            None => false,
        }
    } else {
        pattern == channel
    }
}

/// Parse one or more JSON-encoded message batches, preserving order.
///
/// Each element is either a JSON array of message objects or a single
/// message object; the wire format allows both. Order is preserved
/// within and across elements.
pub fn parse_batch<S: AsRef<str>>(raw: &[S]) -> Result<Vec<Message>> {
    let mut messages = Vec::new();
    for chunk in raw {
        let value: Value = serde_json::from_str(chunk.as_ref())?;
        match value {
            Value::Array(items) => {
                for item in items {
                    messages.push(serde_json::from_value(item)?);
                }
            }
            item @ Value::Object(_) => messages.push(serde_json::from_value(item)?),
            _ => {
                return Err(Error::bad_request(
                    "expected a message object or an array of message objects",
                ));
            }
        }
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_roundtrip_preserves_extension_fields() {
        let raw = r#"{"channel":"/meta/handshake","ext":{"auth":{"token":"t"}},"version":"1.0"}"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.channel(), channel::META_HANDSHAKE);
        assert_eq!(msg.rest.get("ext").unwrap()["auth"]["token"], json!("t"));

        let back: Value = serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        assert_eq!(back["ext"]["auth"]["token"], json!("t"));
        assert_eq!(back["version"], json!("1.0"));
    }

    #[test]
    fn camel_case_field_names_on_the_wire() {
        let msg = Message::new("/meta/connect").with_client_id("abc");
        let raw = serde_json::to_string(&msg).unwrap();
        assert!(raw.contains(r#""clientId":"abc""#));
        assert!(!raw.contains("client_id"));
    }

    #[test]
    fn reply_echoes_channel_id_and_client_id() {
        let mut msg = Message::new("/meta/subscribe").with_client_id("c1");
        msg.id = Some("7".into());
        let reply = msg.reply();
        assert_eq!(reply.channel(), "/meta/subscribe");
        assert_eq!(reply.id.as_deref(), Some("7"));
        assert_eq!(reply.client_id.as_deref(), Some("c1"));
        assert_eq!(reply.successful, None);
    }

    #[test]
    fn channel_matching_table() {
        assert!(channel_matches("/chat/demo", "/chat/demo"));
        assert!(!channel_matches("/chat/demo", "/chat/other"));

        assert!(channel_matches("/chat/*", "/chat/demo"));
        assert!(!channel_matches("/chat/*", "/chat/demo/room"));
        assert!(!channel_matches("/chat/*", "/chat"));
        assert!(!channel_matches("/chat/*", "/chat/"));

        assert!(channel_matches("/chat/**", "/chat/demo"));
        assert!(channel_matches("/chat/**", "/chat/demo/room"));
        assert!(!channel_matches("/chat/**", "/chatter/demo"));
        assert!(!channel_matches("/chat/**", "/chat"));
    }

    #[test]
    fn parse_batch_accepts_arrays_and_single_objects() {
        let batch = parse_batch(&[
            r#"[{"channel":"/meta/handshake"},{"channel":"/meta/connect"}]"#,
            r#"{"channel":"/chat/demo","data":"hi"}"#,
        ])
        .unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].channel(), "/meta/handshake");
        assert_eq!(batch[1].channel(), "/meta/connect");
        assert_eq!(batch[2].channel(), "/chat/demo");
    }

    #[test]
    fn parse_batch_rejects_malformed_json() {
        assert!(matches!(
            parse_batch(&[r#"[{"channel":"#]),
            Err(Error::Parse(_))
        ));
        assert!(matches!(
            parse_batch(&[r#""just a string""#]),
            Err(Error::BadRequest(_))
        ));
    }
}
