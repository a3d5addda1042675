//! Runtime configuration parsed from environment variables.
//!
//! DESIGN
//! ======
//! Every knob has a typed default so a bare environment yields a working
//! local setup against `http://localhost:8001`. Parsing goes through a
//! lookup closure; `from_env` binds it to the process environment and tests
//! bind it to a map.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8001";
pub const DEFAULT_SESSION_ID: &str = "1";
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;
pub const DEFAULT_SIMULATE_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

const DATA_DIR_NAME: &str = "socialpulse";
const DASHBOARD_WS_PATH: &str = "/api/realtime/ws/dashboard";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A base URL did not carry a scheme this client can speak.
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    /// No platform data directory exists and none was configured.
    #[error("no data directory available; set PULSE_DATA_DIR")]
    MissingDataDir,
}

/// Settings for the live stats connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveConfig {
    /// Websocket base URL, e.g. `ws://localhost:8001`.
    pub ws_base_url: String,
    /// User/session identifier addressed by the dashboard endpoint.
    pub session_id: String,
    /// Fixed delay between a connection loss and the next attempt.
    pub reconnect_delay: Duration,
    /// Nudge the snapshot with clamped random deltas while offline.
    pub simulate: bool,
    /// Period of the offline simulation ticker.
    pub simulate_interval: Duration,
}

impl LiveConfig {
    /// Live settings with default timings and simulation disabled.
    #[must_use]
    pub fn new(ws_base_url: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            ws_base_url: ws_base_url.into().trim_end_matches('/').to_owned(),
            session_id: session_id.into(),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            simulate: false,
            simulate_interval: Duration::from_millis(DEFAULT_SIMULATE_INTERVAL_MS),
        }
    }

    /// Full websocket URL of the dashboard status stream.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}{DASHBOARD_WS_PATH}/{}", self.ws_base_url, self.session_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulseConfig {
    pub api_base_url: String,
    pub live: LiveConfig,
    pub timeouts: HttpTimeouts,
    pub data_dir: PathBuf,
}

impl PulseConfig {
    /// Build typed config from environment variables.
    ///
    /// Optional:
    /// - `PULSE_API_BASE_URL`: default `http://localhost:8001`
    /// - `PULSE_WS_BASE_URL`: derived from the API URL when absent
    /// - `PULSE_SESSION_ID`: default `1`
    /// - `PULSE_RECONNECT_DELAY_MS`: default 5000
    /// - `PULSE_SIMULATE`: default off
    /// - `PULSE_SIMULATE_INTERVAL_MS`: default 10000
    /// - `PULSE_REQUEST_TIMEOUT_SECS`: default 10
    /// - `PULSE_CONNECT_TIMEOUT_SECS`: default 5
    /// - `PULSE_DATA_DIR`: platform data dir + `socialpulse`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unusable base URLs or a missing data dir.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`PulseConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let api_base_url = get("PULSE_API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_owned())
            .trim_end_matches('/')
            .to_owned();
        if !api_base_url.starts_with("http://") && !api_base_url.starts_with("https://") {
            return Err(ConfigError::InvalidBaseUrl(api_base_url));
        }

        let ws_base_url = match get("PULSE_WS_BASE_URL") {
            Some(url) if url.starts_with("ws://") || url.starts_with("wss://") => {
                url.trim_end_matches('/').to_owned()
            }
            Some(url) => return Err(ConfigError::InvalidBaseUrl(url)),
            None => ws_base_from_http(&api_base_url)?,
        };

        let live = LiveConfig {
            ws_base_url,
            session_id: get("PULSE_SESSION_ID").unwrap_or_else(|| DEFAULT_SESSION_ID.to_owned()),
            reconnect_delay: Duration::from_millis(parse_or(
                get("PULSE_RECONNECT_DELAY_MS"),
                DEFAULT_RECONNECT_DELAY_MS,
            )),
            simulate: get("PULSE_SIMULATE").is_some_and(|raw| parse_flag(&raw)),
            simulate_interval: Duration::from_millis(parse_or(
                get("PULSE_SIMULATE_INTERVAL_MS"),
                DEFAULT_SIMULATE_INTERVAL_MS,
            )),
        };

        let timeouts = HttpTimeouts {
            request_secs: parse_or(get("PULSE_REQUEST_TIMEOUT_SECS"), DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_secs: parse_or(get("PULSE_CONNECT_TIMEOUT_SECS"), DEFAULT_CONNECT_TIMEOUT_SECS),
        };

        let data_dir = match get("PULSE_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_dir()
                .map(|dir| dir.join(DATA_DIR_NAME))
                .ok_or(ConfigError::MissingDataDir)?,
        };

        Ok(Self { api_base_url, live, timeouts, data_dir })
    }
}

/// Map an HTTP base URL onto the matching websocket scheme.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidBaseUrl`] for non-HTTP URLs.
pub fn ws_base_from_http(base_url: &str) -> Result<String, ConfigError> {
    let base_url = base_url.trim_end_matches('/');
    if let Some(rest) = base_url.strip_prefix("http://") {
        return Ok(format!("ws://{rest}"));
    }
    if let Some(rest) = base_url.strip_prefix("https://") {
        return Ok(format!("wss://{rest}"));
    }

    Err(ConfigError::InvalidBaseUrl(base_url.to_owned()))
}

fn parse_or<T: FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|v| v.parse::<T>().ok()).unwrap_or(default)
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
