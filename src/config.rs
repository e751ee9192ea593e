//! Configuration types for pvedns.

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// DNS front end configuration.
    pub server: ServerConfig,

    /// Block store configuration.
    pub blocklist: BlocklistConfig,

    /// Guest resolver / inventory configuration.
    pub resolver: ResolverConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// DNS front end configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address for the DNS server to listen on (UDP).
    pub listen_addr: SocketAddr,
}

/// Block store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlocklistConfig {
    /// Directory holding the persisted block list file.
    pub dir: PathBuf,

    /// Null-route IPv4 address returned for blocked A queries.
    /// Parsed once at construction; an unparsable value leaves blocked A
    /// replies without an answer record.
    #[serde(default = "default_nullroute")]
    pub nullroute: String,

    /// Null-route IPv6 address returned for blocked AAAA queries.
    #[serde(default = "default_nullroute_v6")]
    pub nullroute_v6: String,

    /// Names that may never be blocked. Fixed for the process lifetime.
    #[serde(default)]
    pub whitelist: Vec<String>,
}

/// Guest resolver / inventory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Inventory API endpoint (e.g., "https://pve.example.com:8006").
    pub endpoint: String,

    /// API token id (e.g., "root@pam!pvedns").
    pub token_id: String,

    /// API token secret.
    pub secret: String,

    /// Only guest addresses inside this subnet populate the cache.
    pub network: Ipv4Net,

    /// Seconds to sleep between inventory polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Maximum concurrent per-guest interface fetches per poll cycle.
    #[serde(default = "default_fanout_limit")]
    pub fanout_limit: usize,

    /// Skip TLS certificate verification for the inventory endpoint.
    /// Verification is on by default; opt in only for self-signed setups.
    #[serde(default)]
    pub insecure_tls: bool,
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "pvedns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address (with the `prometheus` feature).
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
        }
    }
}

fn default_nullroute() -> String {
    "0.0.0.0".to_string()
}

fn default_nullroute_v6() -> String {
    "::".to_string()
}

fn default_poll_interval() -> u64 {
    30
}

fn default_fanout_limit() -> usize {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}
