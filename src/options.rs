//! Server and transport configuration
//!
//! Options are plain string key/value pairs resolved once at startup.
//! Transports read their options under a dotted namespace prefix; the
//! lookup walks from the most specific scope to the bare name, so
//! `long-polling.jsonp.mimeType` overrides `long-polling.mimeType`,
//! which overrides `mimeType`. Malformed values are a startup error,
//! never a request-time one.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};

/// How long a meta-connect poll is held open, in milliseconds
pub const TIMEOUT_OPTION: &str = "timeout";
/// Delay advised to the client between polls, in milliseconds
pub const INTERVAL_OPTION: &str = "interval";
/// How long a session survives without contact, in milliseconds
pub const MAX_INTERVAL_OPTION: &str = "maxInterval";
/// Cap on concurrent sessions
pub const MAX_SESSIONS_OPTION: &str = "maxSessions";
/// Cap on request body size, in bytes
pub const MAX_MESSAGE_SIZE_OPTION: &str = "maxMessageSize";

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_INTERVAL_MS: u64 = 0;
pub const DEFAULT_MAX_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Immutable option store shared by the server and its transports.
///
/// Built once with [`with_option`](Self::with_option) before the server
/// starts; reads afterwards require no synchronization.
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    values: HashMap<String, String>,
}

impl ServerOptions {
    /// Create an empty option store (all defaults apply)
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an option by its full dotted name
    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Look up `name` under `prefix`, most specific scope first.
    ///
    /// For prefix `long-polling.jsonp` and name `mimeType` the probe
    /// order is `long-polling.jsonp.mimeType`, `long-polling.mimeType`,
    /// then bare `mimeType`.
    pub fn option(&self, prefix: &str, name: &str) -> Option<&str> {
        let mut scope = prefix;
        while !scope.is_empty() {
            if let Some(value) = self.values.get(&format!("{scope}.{name}")) {
                return Some(value);
            }
            scope = match scope.rfind('.') {
                Some(idx) => &scope[..idx],
                None => "",
            };
        }
        self.values.get(name).map(String::as_str)
    }

    /// String option with a default
    pub fn string(&self, prefix: &str, name: &str, default: &str) -> String {
        self.option(prefix, name).unwrap_or(default).to_string()
    }

    /// Millisecond-count option parsed into a [`Duration`]
    pub fn duration_ms(&self, prefix: &str, name: &str, default_ms: u64) -> Result<Duration> {
        match self.option(prefix, name) {
            Some(raw) => raw.parse::<u64>().map(Duration::from_millis).map_err(|_| {
                Error::Config(format!(
                    "option {name} must be a millisecond count, got {raw:?}"
                ))
            }),
            None => Ok(Duration::from_millis(default_ms)),
        }
    }

    /// Numeric option parsed into a `usize`
    pub fn usize(&self, prefix: &str, name: &str, default: usize) -> Result<usize> {
        match self.option(prefix, name) {
            Some(raw) => raw.parse::<usize>().map_err(|_| {
                Error::Config(format!(
                    "option {name} must be a non-negative integer, got {raw:?}"
                ))
            }),
            None => Ok(default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_lookup_prefers_the_most_specific_scope() {
        let options = ServerOptions::new()
            .with_option("mimeType", "bare")
            .with_option("long-polling.mimeType", "middle")
            .with_option("long-polling.jsonp.mimeType", "specific");

        assert_eq!(
            options.option("long-polling.jsonp", "mimeType"),
            Some("specific")
        );
        assert_eq!(
            options.option("long-polling.json", "mimeType"),
            Some("middle")
        );
        assert_eq!(options.option("long-polling", "mimeType"), Some("middle"));
        assert_eq!(options.option("", "mimeType"), Some("bare"));
    }

    #[test]
    fn prefix_lookup_falls_back_through_scopes() {
        let options = ServerOptions::new().with_option("long-polling.callbackParameter", "cb");
        assert_eq!(
            options.option("long-polling.jsonp", "callbackParameter"),
            Some("cb")
        );
        assert_eq!(options.option("long-polling.jsonp", "missing"), None);
    }

    #[test]
    fn typed_getters_apply_defaults() {
        let options = ServerOptions::new();
        assert_eq!(
            options.duration_ms("", TIMEOUT_OPTION, DEFAULT_TIMEOUT_MS).unwrap(),
            Duration::from_millis(30_000)
        );
        assert_eq!(
            options.usize("", MAX_SESSIONS_OPTION, DEFAULT_MAX_SESSIONS).unwrap(),
            10_000
        );
    }

    #[test]
    fn malformed_numeric_option_is_a_config_error() {
        let options = ServerOptions::new().with_option("timeout", "soon");
        assert!(matches!(
            options.duration_ms("", TIMEOUT_OPTION, DEFAULT_TIMEOUT_MS),
            Err(Error::Config(_))
        ));

        let options = ServerOptions::new().with_option("maxSessions", "-1");
        assert!(matches!(
            options.usize("", MAX_SESSIONS_OPTION, DEFAULT_MAX_SESSIONS),
            Err(Error::Config(_))
        ));
    }
}
