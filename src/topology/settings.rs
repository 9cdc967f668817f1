//! Service Settings
//!
//! Literal values the graph cannot derive (ports, names, credentials, the
//! caller allowed to reach the database). Read once, when the topology is
//! defined; a missing value fails the definition, never the apply.

use crate::error::GraphError;
use std::collections::HashMap;
use std::net::Ipv4Addr;

pub const DB_PORT: &str = "DB_PORT";
pub const DB_NAME: &str = "DB_NAME";
pub const DB_USERNAME: &str = "DB_USERNAME";
pub const DB_USER: &str = "DB_USER";
pub const DB_PASSWORD: &str = "DB_PASSWORD";
pub const DB_ALLOWED_SOURCE: &str = "DB_ALLOWED_SOURCE";
pub const NETWORK_CIDR: &str = "NETWORK_CIDR";

pub const DEFAULT_NETWORK_CIDR: &str = "10.0.0.0/16";

/// Widest block accepted as the database caller
pub const MIN_ALLOWED_SOURCE_PREFIX: u8 = 24;

/// Source of literal configuration values
pub trait SecretSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// Process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSource;

impl SecretSource for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Fixed values, for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct MapSource(HashMap<String, String>);

impl MapSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapSource {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl SecretSource for MapSource {
    fn get(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }
}

/// Everything the cart topology needs from outside the graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    pub db_port: u16,
    pub db_name: String,
    /// Administrator for the generated database credentials
    pub db_admin_username: String,
    pub db_user: String,
    pub db_password: String,
    /// CIDR block allowed to reach the database port
    pub allowed_source: String,
    pub network_cidr: String,
}

impl ServiceSettings {
    pub fn from_source(source: &dyn SecretSource) -> Result<Self, GraphError> {
        let port = require(source, DB_PORT)?;
        let db_port = port
            .trim()
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| GraphError::InvalidConfiguration {
                key: DB_PORT.to_string(),
                reason: format!("'{}' is not a TCP port", port),
            })?;

        let (addr, prefix) = parse_cidr(DB_ALLOWED_SOURCE, &require(source, DB_ALLOWED_SOURCE)?)?;
        if prefix < MIN_ALLOWED_SOURCE_PREFIX {
            return Err(GraphError::InvalidConfiguration {
                key: DB_ALLOWED_SOURCE.to_string(),
                reason: format!(
                    "database ingress must be restricted to a specific caller, /{} is wider than /{}",
                    prefix, MIN_ALLOWED_SOURCE_PREFIX
                ),
            });
        }

        let network_cidr = match source.get(NETWORK_CIDR).filter(|v| !v.trim().is_empty()) {
            Some(cidr) => {
                let (addr, prefix) = parse_cidr(NETWORK_CIDR, &cidr)?;
                format!("{}/{}", addr, prefix)
            }
            None => DEFAULT_NETWORK_CIDR.to_string(),
        };

        Ok(Self {
            db_port,
            db_name: require(source, DB_NAME)?,
            db_admin_username: require(source, DB_USERNAME)?,
            db_user: require_verbatim(source, DB_USER)?,
            db_password: require_verbatim(source, DB_PASSWORD)?,
            allowed_source: format!("{}/{}", addr, prefix),
            network_cidr,
        })
    }
}

/// Required value with surrounding whitespace removed
fn require(source: &dyn SecretSource, key: &str) -> Result<String, GraphError> {
    require_verbatim(source, key).map(|v| v.trim().to_string())
}

/// Required value passed on exactly as supplied; blank counts as missing
fn require_verbatim(source: &dyn SecretSource, key: &str) -> Result<String, GraphError> {
    source
        .get(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| GraphError::ConfigurationMissing(key.to_string()))
}

/// Parse an IPv4 address or CIDR block; a bare address is a /32
fn parse_cidr(key: &str, value: &str) -> Result<(Ipv4Addr, u8), GraphError> {
    let invalid = |reason: &str| GraphError::InvalidConfiguration {
        key: key.to_string(),
        reason: format!("'{}' {}", value, reason),
    };

    let value = value.trim();
    let (addr, prefix) = match value.split_once('/') {
        Some((addr, prefix)) => (
            addr,
            prefix
                .parse::<u8>()
                .ok()
                .filter(|p| *p <= 32)
                .ok_or_else(|| invalid("has an invalid prefix length"))?,
        ),
        None => (value, 32),
    };
    let addr: Ipv4Addr = addr
        .parse()
        .map_err(|_| invalid("is not an IPv4 address"))?;
    Ok((addr, prefix))
}
