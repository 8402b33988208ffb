//! Hub configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`).

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::HubError;

/// How application messages are handled by the running server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubMode {
    /// Forward every application message to all connections.
    Broadcast,
    /// Only log application messages.
    Log,
}

impl FromStr for HubMode {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "broadcast" => Ok(Self::Broadcast),
            "log" => Ok(Self::Log),
            other => Err(HubError::Config(format!("unknown HUB_MODE {other:?}"))),
        }
    }
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// Top-level hub configuration.
///
/// Loaded once at startup via [`HubConfig::from_env`].
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Socket address to bind the HTTP server to (e.g. `0.0.0.0:8080`).
    pub listen_addr: SocketAddr,

    /// Route serving the WebSocket upgrade.
    pub ws_path: String,

    /// Silence interval before a ping is sent.
    pub ping_period: Duration,

    /// Time allowed for a pong after a ping.
    pub pong_period: Duration,

    /// Depth of each connection's outbound queue.
    pub outbound_capacity: usize,

    /// Maximum in-flight handler tasks per connection.
    pub handler_concurrency: usize,

    /// Messages a connection holds while its handlers are saturated.
    pub dispatch_capacity: usize,

    /// How long a send waits on a full outbound queue.
    pub send_timeout: Duration,

    /// Application message handling mode.
    pub mode: HubMode,

    /// Whether broadcast mode echoes a message back to its sender.
    pub broadcast_include_sender: bool,

    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            ws_path: "/websocket".to_string(),
            ping_period: Duration::from_millis(10_000),
            pong_period: Duration::from_millis(15_000),
            outbound_capacity: 256,
            handler_concurrency: 16,
            dispatch_capacity: 256,
            send_timeout: Duration::from_millis(1_000),
            mode: HubMode::Broadcast,
            broadcast_include_sender: true,
            log_format: LogFormat::Text,
        }
    }
}

impl HubConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to [`HubConfig::default`] values when a variable is not
    /// set. Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Config`] if `LISTEN_ADDR` cannot be parsed as a
    /// [`SocketAddr`] or `HUB_MODE` is not `broadcast` or `log`.
    pub fn from_env() -> Result<Self, HubError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`HubConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, HubError> {
        let defaults = Self::default();

        let listen_addr = match lookup("LISTEN_ADDR") {
            Some(raw) => raw
                .parse()
                .map_err(|err| HubError::Config(format!("LISTEN_ADDR {raw:?}: {err}")))?,
            None => defaults.listen_addr,
        };

        let ws_path = lookup("WS_PATH")
            .filter(|path| path.starts_with('/'))
            .unwrap_or(defaults.ws_path);

        let ping_period = Duration::from_millis(parse_env(&lookup, "PING_PERIOD_MS", 10_000));
        let pong_period = Duration::from_millis(parse_env(&lookup, "PONG_PERIOD_MS", 15_000));
        let outbound_capacity = parse_env(&lookup, "OUTBOUND_CAPACITY", defaults.outbound_capacity);
        let handler_concurrency =
            parse_env(&lookup, "HANDLER_CONCURRENCY", defaults.handler_concurrency);
        let dispatch_capacity = parse_env(&lookup, "DISPATCH_CAPACITY", defaults.dispatch_capacity);
        let send_timeout = Duration::from_millis(parse_env(&lookup, "SEND_TIMEOUT_MS", 1_000));

        let mode = match lookup("HUB_MODE") {
            Some(raw) => raw.parse()?,
            None => defaults.mode,
        };
        let broadcast_include_sender = parse_env_bool(
            &lookup,
            "BROADCAST_INCLUDE_SENDER",
            defaults.broadcast_include_sender,
        );

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            Some("json") | Some("JSON") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(Self {
            listen_addr,
            ws_path,
            ping_period,
            pong_period,
            outbound_capacity,
            handler_concurrency,
            dispatch_capacity,
            send_timeout,
            mode,
            broadcast_include_sender,
            log_format,
        })
    }
}

/// Parses a variable as `T`, returning `default` on missing or invalid
/// values.
fn parse_env<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses a variable as a boolean. Accepts `"true"`, `"1"`, `"false"`, `"0"`
/// (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    match lookup(key).map(|v| v.to_ascii_lowercase()).as_deref() {
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        _ => default,
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let Ok(config) = HubConfig::from_lookup(|_| None) else {
            panic!("defaults must load");
        };
        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.ws_path, "/websocket");
        assert_eq!(config.ping_period, Duration::from_secs(10));
        assert_eq!(config.pong_period, Duration::from_secs(15));
        assert_eq!(config.mode, HubMode::Broadcast);
        assert!(config.broadcast_include_sender);
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn overrides_are_applied() {
        let lookup = lookup_from(&[
            ("LISTEN_ADDR", "127.0.0.1:9000"),
            ("WS_PATH", "/ws"),
            ("PING_PERIOD_MS", "500"),
            ("PONG_PERIOD_MS", "800"),
            ("HANDLER_CONCURRENCY", "4"),
            ("DISPATCH_CAPACITY", "32"),
            ("HUB_MODE", "LOG"),
            ("BROADCAST_INCLUDE_SENDER", "false"),
            ("LOG_FORMAT", "json"),
        ]);
        let Ok(config) = HubConfig::from_lookup(lookup) else {
            panic!("valid overrides rejected");
        };
        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.ws_path, "/ws");
        assert_eq!(config.ping_period, Duration::from_millis(500));
        assert_eq!(config.pong_period, Duration::from_millis(800));
        assert_eq!(config.handler_concurrency, 4);
        assert_eq!(config.dispatch_capacity, 32);
        assert_eq!(config.mode, HubMode::Log);
        assert!(!config.broadcast_include_sender);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn invalid_numbers_fall_back() {
        let lookup = lookup_from(&[("PING_PERIOD_MS", "soon"), ("WS_PATH", "no-slash")]);
        let Ok(config) = HubConfig::from_lookup(lookup) else {
            panic!("fallbacks must load");
        };
        assert_eq!(config.ping_period, Duration::from_secs(10));
        assert_eq!(config.ws_path, "/websocket");
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let result = HubConfig::from_lookup(lookup_from(&[("HUB_MODE", "echo")]));
        assert!(matches!(result, Err(HubError::Config(_))));
    }

    #[test]
    fn bad_listen_addr_is_rejected() {
        let result = HubConfig::from_lookup(lookup_from(&[("LISTEN_ADDR", "nowhere")]));
        assert!(matches!(result, Err(HubError::Config(_))));
    }
}
