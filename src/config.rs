//! Service configuration
//!
//! All knobs have working defaults; `Config::from_env` overrides them
//! from `STATEFEED_*` environment variables so the binary needs no
//! config file for local use.

use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

use crate::types::Allowance;

/// Bounds on the in-memory working set and the persisted log
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Most-recently-updated channels kept live
    pub max_channels: usize,
    /// Batch history entries kept live
    pub max_batches: usize,
    /// Aggregate (balance) history entries kept live
    pub max_balances: usize,
    /// Rows kept in the persisted log before compaction
    pub max_rows: usize,
    /// Absolute age cutoff for both live entries and persisted rows
    pub max_age: chrono::Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_channels: 256,
            max_batches: 50,
            max_balances: 50,
            max_rows: 10_000,
            max_age: chrono::Duration::hours(24),
        }
    }
}

/// Top-level service configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Gateway websocket endpoint
    pub gateway_url: String,
    /// Hex-encoded signing key seed; gateway client is disabled when empty
    pub signing_key: String,
    /// Participant address presented during authentication; derived from
    /// the signing key when empty
    pub participant: String,
    /// Session key override (defaults to the participant address)
    pub session_key: Option<String>,
    /// Application name bound into the signed auth payload
    pub app_name: String,
    /// Scope string requested during authentication
    pub scope: String,
    /// Resource allowances declared during authentication
    pub allowances: Vec<Allowance>,
    /// Requested session lifetime
    pub auth_ttl: Duration,
    /// Abandon a connection whose handshake produced no auth result
    pub auth_timeout: Duration,
    /// Liveness probe interval while streaming
    pub heartbeat_interval: Duration,
    /// Delay between reconnect attempts
    pub reconnect_delay: Duration,
    /// Keep-alive interval for idle API stream connections
    pub stream_heartbeat: Duration,
    /// Directory holding the persisted event log
    pub data_dir: PathBuf,
    /// HTTP listen address
    pub bind_addr: SocketAddr,
    pub retention: RetentionPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway_url: "wss://gateway.example.org/ws".to_string(),
            signing_key: String::new(),
            participant: String::new(),
            session_key: None,
            app_name: "statefeed".to_string(),
            scope: "console".to_string(),
            allowances: Vec::new(),
            auth_ttl: Duration::from_secs(300),
            auth_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
            stream_heartbeat: Duration::from_secs(15),
            data_dir: PathBuf::from("data"),
            bind_addr: "127.0.0.1:8090".parse().expect("static addr"),
            retention: RetentionPolicy::default(),
        }
    }
}

impl Config {
    /// Config with a custom data directory (used heavily by tests)
    pub fn with_data_dir<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Read configuration from `STATEFEED_*` environment variables.
    ///
    /// Unparseable values keep their defaults with a warning rather than
    /// failing startup.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Ok(url) = env::var("STATEFEED_GATEWAY_URL") {
            config.gateway_url = url;
        }
        if let Ok(key) = env::var("STATEFEED_SIGNING_KEY") {
            config.signing_key = key;
        }
        if let Ok(participant) = env::var("STATEFEED_PARTICIPANT") {
            config.participant = participant;
        }
        if let Ok(session) = env::var("STATEFEED_SESSION_KEY") {
            config.session_key = Some(session);
        }
        if let Ok(app) = env::var("STATEFEED_APP_NAME") {
            config.app_name = app;
        }
        if let Ok(scope) = env::var("STATEFEED_SCOPE") {
            config.scope = scope;
        }
        if let Ok(dir) = env::var("STATEFEED_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(addr) = env::var("STATEFEED_BIND_ADDR") {
            match addr.parse() {
                Ok(addr) => config.bind_addr = addr,
                Err(_) => warn!(%addr, "invalid STATEFEED_BIND_ADDR, keeping default"),
            }
        }

        config.auth_ttl = env_secs("STATEFEED_AUTH_TTL_SECS", config.auth_ttl);
        config.auth_timeout = env_secs("STATEFEED_AUTH_TIMEOUT_SECS", config.auth_timeout);
        config.heartbeat_interval =
            env_secs("STATEFEED_HEARTBEAT_SECS", config.heartbeat_interval);
        config.reconnect_delay = env_secs("STATEFEED_RECONNECT_SECS", config.reconnect_delay);
        config.stream_heartbeat =
            env_secs("STATEFEED_STREAM_HEARTBEAT_SECS", config.stream_heartbeat);

        config.retention.max_channels =
            env_usize("STATEFEED_MAX_CHANNELS", config.retention.max_channels);
        config.retention.max_rows = env_usize("STATEFEED_MAX_ROWS", config.retention.max_rows);
        if let Some(hours) = env_parsed::<i64>("STATEFEED_RETENTION_HOURS") {
            config.retention.max_age = chrono::Duration::hours(hours);
        }

        config
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    match env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(var = name, value = %raw, "unparseable value, keeping default");
                None
            }
        },
        Err(_) => None,
    }
}

fn env_secs(name: &str, default: Duration) -> Duration {
    env_parsed::<u64>(name)
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env_parsed::<usize>(name).unwrap_or(default)
}
