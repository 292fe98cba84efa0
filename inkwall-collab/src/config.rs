//! Environment-driven configuration for the client collaborators and the
//! reference backend.
//!
//! Every value has a development default, so an empty environment yields a
//! client and server that talk to each other on localhost.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use inkwall_core::PageMeta;

use crate::ledger::LedgerConfig;

pub const ENV_API_URL: &str = "INKWALL_API_URL";
pub const ENV_FEED_URL: &str = "INKWALL_FEED_URL";
pub const ENV_API_KEY: &str = "INKWALL_API_KEY";
pub const ENV_INSERT_SECRET: &str = "INSERT_STROKE_SECRET";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "INKWALL_REQUEST_TIMEOUT_MS";
pub const ENV_HTTP_ADDR: &str = "INKWALL_HTTP_ADDR";
pub const ENV_FEED_ADDR: &str = "INKWALL_FEED_ADDR";
pub const ENV_COOLDOWN_MS: &str = "INKWALL_STROKE_COOLDOWN_MS";
pub const ENV_STORAGE_PATH: &str = "INKWALL_STORAGE_PATH";
pub const ENV_SEED_PAGE: &str = "INKWALL_SEED_PAGE";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Read a variable, treating blank values as unset.
fn lookup_nonempty(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Option<String> {
    lookup(var).filter(|v| !v.trim().is_empty())
}

fn parse_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match lookup_nonempty(lookup, var) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| invalid(var, &raw, e.to_string())),
        None => Ok(default),
    }
}

/// Endpoints and credentials used by the HTTP writer, page source and feed.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the write and page endpoints
    pub api_url: String,
    /// WebSocket URL of the live feed
    pub feed_url: String,
    /// Sent as `Authorization: Bearer <key>`
    pub api_key: Option<String>,
    /// Sent as `x-insert-stroke-secret`
    pub insert_secret: Option<String>,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8787".to_string(),
            feed_url: "ws://127.0.0.1:8788".to_string(),
            api_key: None,
            insert_secret: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            api_url: lookup_nonempty(&lookup, ENV_API_URL)
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_url),
            feed_url: lookup_nonempty(&lookup, ENV_FEED_URL).unwrap_or(defaults.feed_url),
            api_key: lookup_nonempty(&lookup, ENV_API_KEY),
            insert_secret: lookup_nonempty(&lookup, ENV_INSERT_SECRET),
            request_timeout: parse_millis(&lookup, ENV_REQUEST_TIMEOUT_MS, defaults.request_timeout)?,
        })
    }

    /// Client pointed at a backend on the given local ports.
    pub fn local(http_port: u16, feed_port: u16) -> Self {
        Self {
            api_url: format!("http://127.0.0.1:{http_port}"),
            feed_url: format!("ws://127.0.0.1:{feed_port}"),
            ..Self::default()
        }
    }

    pub fn api_endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_url.trim_end_matches('/'), path)
    }
}

/// Reference backend settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_addr: String,
    pub feed_addr: String,
    /// Required bearer token on writes, if set
    pub api_key: Option<String>,
    /// Required `x-insert-stroke-secret` header on writes, if set
    pub insert_secret: Option<String>,
    pub ledger: LedgerConfig,
    /// Broadcast buffer per page room
    pub broadcast_capacity: usize,
    /// RocksDB directory; memory storage when unset
    pub storage_path: Option<PathBuf>,
    /// Page registered at startup
    pub seed_page: Option<PageMeta>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "127.0.0.1:8787".to_string(),
            feed_addr: "127.0.0.1:8788".to_string(),
            api_key: None,
            insert_secret: None,
            ledger: LedgerConfig::default(),
            broadcast_capacity: 256,
            storage_path: None,
            seed_page: Some(PageMeta::new("page_01", 1200, 800)),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let seed_page = match lookup(ENV_SEED_PAGE) {
            // Explicitly blank disables seeding.
            Some(raw) if raw.trim().is_empty() => None,
            Some(raw) => Some(parse_seed_page(&raw)?),
            None => defaults.seed_page,
        };

        Ok(Self {
            http_addr: lookup_nonempty(&lookup, ENV_HTTP_ADDR).unwrap_or(defaults.http_addr),
            feed_addr: lookup_nonempty(&lookup, ENV_FEED_ADDR).unwrap_or(defaults.feed_addr),
            api_key: lookup_nonempty(&lookup, ENV_API_KEY),
            insert_secret: lookup_nonempty(&lookup, ENV_INSERT_SECRET),
            ledger: LedgerConfig {
                cooldown: parse_millis(&lookup, ENV_COOLDOWN_MS, defaults.ledger.cooldown)?,
                ..defaults.ledger
            },
            broadcast_capacity: defaults.broadcast_capacity,
            storage_path: lookup_nonempty(&lookup, ENV_STORAGE_PATH).map(PathBuf::from),
            seed_page,
        })
    }

    /// Ephemeral ports, no cooldown, no credentials, no seed page.
    pub fn for_testing() -> Self {
        Self {
            http_addr: "127.0.0.1:0".to_string(),
            feed_addr: "127.0.0.1:0".to_string(),
            ledger: LedgerConfig::for_testing(),
            seed_page: None,
            ..Self::default()
        }
    }
}

/// Parse `id:width:height`.
fn parse_seed_page(raw: &str) -> Result<PageMeta, ConfigError> {
    let parts: Vec<&str> = raw.trim().split(':').collect();
    let [id, width, height] = parts.as_slice() else {
        return Err(invalid(ENV_SEED_PAGE, raw, "expected id:width:height"));
    };
    if id.is_empty() {
        return Err(invalid(ENV_SEED_PAGE, raw, "page id is empty"));
    }
    let width = width
        .parse::<u32>()
        .map_err(|e| invalid(ENV_SEED_PAGE, raw, format!("width: {e}")))?;
    let height = height
        .parse::<u32>()
        .map_err(|e| invalid(ENV_SEED_PAGE, raw, format!("height: {e}")))?;
    Ok(PageMeta::new(*id, width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_client_defaults() {
        let config = ClientConfig::from_lookup(env(&[])).unwrap();
        assert_eq!(config.api_url, "http://127.0.0.1:8787");
        assert_eq!(config.feed_url, "ws://127.0.0.1:8788");
        assert!(config.api_key.is_none());
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_client_from_env() {
        let config = ClientConfig::from_lookup(env(&[
            (ENV_API_URL, "https://ink.example/"),
            (ENV_API_KEY, "anon-key"),
            (ENV_INSERT_SECRET, "  "),
            (ENV_REQUEST_TIMEOUT_MS, "2500"),
        ]))
        .unwrap();
        assert_eq!(config.api_endpoint("/insert-stroke"), "https://ink.example/insert-stroke");
        assert_eq!(config.api_key.as_deref(), Some("anon-key"));
        assert!(config.insert_secret.is_none());
        assert_eq!(config.request_timeout, Duration::from_millis(2500));
    }

    #[test]
    fn test_bad_timeout_rejected() {
        let err = ClientConfig::from_lookup(env(&[(ENV_REQUEST_TIMEOUT_MS, "soon")])).unwrap_err();
        assert!(err.to_string().contains(ENV_REQUEST_TIMEOUT_MS));
    }

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::from_lookup(env(&[])).unwrap();
        assert_eq!(config.ledger.cooldown, Duration::from_millis(500));
        let seed = config.seed_page.unwrap();
        assert_eq!((seed.id.as_str(), seed.width, seed.height), ("page_01", 1200, 800));
        assert!(config.storage_path.is_none());
    }

    #[test]
    fn test_server_from_env() {
        let config = ServerConfig::from_lookup(env(&[
            (ENV_COOLDOWN_MS, "0"),
            (ENV_SEED_PAGE, "lobby:640:480"),
            (ENV_STORAGE_PATH, "/var/lib/inkwall"),
            (ENV_HTTP_ADDR, "0.0.0.0:9000"),
        ]))
        .unwrap();
        assert_eq!(config.ledger.cooldown, Duration::ZERO);
        assert_eq!(config.seed_page.unwrap().id.as_str(), "lobby");
        assert_eq!(config.storage_path, Some(PathBuf::from("/var/lib/inkwall")));
        assert_eq!(config.http_addr, "0.0.0.0:9000");
    }

    #[test]
    fn test_seed_page_parsing() {
        assert!(ServerConfig::from_lookup(env(&[(ENV_SEED_PAGE, "")]))
            .unwrap()
            .seed_page
            .is_none());
        for bad in ["page_01", "page_01:wide:800", ":10:10", "a:1:2:3"] {
            assert!(
                ServerConfig::from_lookup(env(&[(ENV_SEED_PAGE, bad)])).is_err(),
                "{bad}"
            );
        }
    }
}
