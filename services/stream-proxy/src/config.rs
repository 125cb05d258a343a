//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! API keys are loaded from the RAPIDAPI_KEYS env var or `upstream.keys_file`,
//! never stored in the TOML directly to avoid leaking secrets.

use common::Secret;
use key_pool::RotationPolicy;
use key_pool::policy::{
    DEFAULT_LOW_WATER_MARK, DEFAULT_MAX_REQUESTS_PER_KEY, DEFAULT_QUOTA_MARKER,
};
use reqwest::Url;
use reqwest::header::HeaderValue;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Env var holding comma-separated API keys.
pub const KEYS_ENV_VAR: &str = "RAPIDAPI_KEYS";

const DEFAULT_BASE_URL: &str = "https://ytstream-download-youtube-videos.p.rapidapi.com";

const DEFAULT_ALLOWED_ORIGINS: &[&str] = &[
    "https://raagheaven.netlify.app",
    "https://ytifyfkd.vercel.app",
    "https://shcloud.netlify.app",
    "https://ytify.us.kg",
    "http://localhost:5173",
];

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub rotation: RotationConfig,
    #[serde(default)]
    pub normalizer: NormalizerConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Resolved from RAPIDAPI_KEYS or `upstream.keys_file`
    #[serde(skip)]
    pub keys: Vec<Secret<String>>,
}

/// Inbound listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

/// Streaming-metadata provider settings
#[derive(Debug, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Value of X-RapidAPI-Host; defaults to the host of `base_url`
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// File with one key per line (alternative to RAPIDAPI_KEYS)
    #[serde(default)]
    pub keys_file: Option<PathBuf>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            host: None,
            timeout_secs: default_timeout(),
            keys_file: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RotationModeConfig {
    #[default]
    SignalDriven,
    UsageCount,
}

/// Key rotation settings
#[derive(Debug, Deserialize)]
pub struct RotationConfig {
    #[serde(default)]
    pub mode: RotationModeConfig,
    #[serde(default = "default_max_requests_per_key")]
    pub max_requests_per_key: u64,
    #[serde(default = "default_low_water_mark")]
    pub low_water_mark: i64,
    #[serde(default)]
    pub max_attempts: Option<usize>,
    #[serde(default = "default_quota_marker")]
    pub quota_marker: String,
    #[serde(default)]
    pub exhaustion_cooldown_secs: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            mode: RotationModeConfig::default(),
            max_requests_per_key: default_max_requests_per_key(),
            low_water_mark: default_low_water_mark(),
            max_attempts: None,
            quota_marker: default_quota_marker(),
            exhaustion_cooldown_secs: 0,
        }
    }
}

impl RotationConfig {
    pub fn policy(&self) -> RotationPolicy {
        let mut policy = match self.mode {
            RotationModeConfig::SignalDriven => RotationPolicy::new(
                key_pool::RotationMode::SignalDriven {
                    low_water_mark: self.low_water_mark,
                },
            ),
            RotationModeConfig::UsageCount => {
                RotationPolicy::usage_count(self.max_requests_per_key)
            }
        }
        .with_quota_marker(self.quota_marker.clone())
        .with_exhaustion_cooldown(Duration::from_secs(self.exhaustion_cooldown_secs));
        if let Some(n) = self.max_attempts {
            policy = policy.with_max_attempts(n);
        }
        policy
    }
}

/// Response shaping options
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NormalizerConfig {
    /// Force the highest-bitrate stream to "320 kbps" and pad its length by 2 MiB
    #[serde(default)]
    pub relabel_top_stream: bool,
    /// Attribution emitted as `About` in the response
    #[serde(default)]
    pub about: Option<String>,
}

/// Browser origin allow-list
#[derive(Debug, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
        }
    }
}

fn default_max_connections() -> usize {
    1000
}

fn default_drain_timeout() -> u64 {
    5
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_max_requests_per_key() -> u64 {
    DEFAULT_MAX_REQUESTS_PER_KEY
}

fn default_low_water_mark() -> i64 {
    DEFAULT_LOW_WATER_MARK
}

fn default_quota_marker() -> String {
    DEFAULT_QUOTA_MARKER.to_string()
}

fn default_allowed_origins() -> Vec<String> {
    DEFAULT_ALLOWED_ORIGINS.iter().map(|s| s.to_string()).collect()
}

impl Config {
    /// Load configuration from a TOML file, then resolve API keys.
    ///
    /// Key resolution order:
    /// 1. RAPIDAPI_KEYS env var
    /// 2. keys_file path from config
    ///
    /// An empty key set is not an error here; the key pool rejects it at startup.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        if let Ok(raw) = std::env::var(KEYS_ENV_VAR) {
            config.keys = parse_keys(raw.split(','), KEYS_ENV_VAR)?;
        } else if let Some(ref keys_file) = config.upstream.keys_file {
            let raw = std::fs::read_to_string(keys_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read keys_file {}: {e}",
                    keys_file.display()
                ))
            })?;
            let lines = raw.lines().filter(|l| !l.trim_start().starts_with('#'));
            config.keys = parse_keys(lines, "keys_file")?;
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        let url = Url::parse(&self.upstream.base_url).map_err(|e| {
            common::Error::Config(format!(
                "upstream.base_url is not a valid URL ({e}): {}",
                self.upstream.base_url
            ))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(common::Error::Config(format!(
                "upstream.base_url must start with http:// or https://, got: {}",
                self.upstream.base_url
            )));
        }
        let host = self.upstream_host();
        if host.is_empty() || HeaderValue::from_str(&host).is_err() {
            return Err(common::Error::Config(format!(
                "upstream.host is not a valid header value: {host:?}"
            )));
        }
        if self.upstream.timeout_secs == 0 {
            return Err(common::Error::Config(
                "upstream.timeout_secs must be greater than 0".into(),
            ));
        }
        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "server.max_connections must be greater than 0".into(),
            ));
        }
        if self.rotation.max_attempts == Some(0) {
            return Err(common::Error::Config(
                "rotation.max_attempts must be greater than 0".into(),
            ));
        }
        if self.rotation.mode == RotationModeConfig::UsageCount
            && self.rotation.max_requests_per_key == 0
        {
            return Err(common::Error::Config(
                "rotation.max_requests_per_key must be greater than 0".into(),
            ));
        }
        for origin in &self.cors.allowed_origins {
            if origin == "*" || HeaderValue::from_str(origin).is_err() {
                return Err(common::Error::Config(format!(
                    "cors.allowed_origins entry is not an exact origin: {origin}"
                )));
            }
        }
        Ok(())
    }

    /// Request endpoint: `{base_url}/dl`.
    pub fn endpoint(&self) -> common::Result<Url> {
        let base = self.upstream.base_url.trim_end_matches('/');
        Url::parse(&format!("{base}/dl"))
            .map_err(|e| common::Error::Config(format!("invalid upstream endpoint: {e}")))
    }

    /// X-RapidAPI-Host value: the configured host, else the host of `base_url`.
    pub fn upstream_host(&self) -> String {
        if let Some(ref host) = self.upstream.host {
            return host.clone();
        }
        Url::parse(&self.upstream.base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default()
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("stream-proxy.toml")
    }
}

/// Trim entries, drop blanks, and reject values that cannot travel as a header.
/// Errors name the entry position, never its content.
fn parse_keys<'a>(
    entries: impl Iterator<Item = &'a str>,
    source: &str,
) -> common::Result<Vec<Secret<String>>> {
    let mut keys = Vec::new();
    for (position, entry) in entries.map(str::trim).filter(|e| !e.is_empty()).enumerate() {
        if HeaderValue::from_str(entry).is_err() {
            return Err(common::Error::Config(format!(
                "{source} entry #{} is not a valid header value",
                position + 1
            )));
        }
        keys.push(Secret::new(entry.to_string()));
    }
    Ok(keys)
}
