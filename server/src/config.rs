use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Command-line flags. Only flags actually given override lower layers.
#[derive(Parser, Serialize, Deserialize, Clone, Debug, Default)]
#[command(
    name = "booking-server",
    version,
    about = "Real-time chat and notification server for the booking platform"
)]
pub struct Cli {
    /// Port to listen on
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./booking.toml")]
    #[serde(skip)]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, keys)
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
}

/// Effective server configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub json_logs: bool,
    pub data_dir: String,
    #[serde(default)]
    pub jwt: JwtConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub keepalive: KeepaliveConfig,
}

/// Access token validation (tokens are issued by the auth service).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    #[serde(default = "default_issuer")]
    pub issuer: String,

    #[serde(default = "default_audience")]
    pub audience: String,

    /// Shared HS256 key. Empty: a key is generated once in data_dir/jwt_secret.
    #[serde(default)]
    pub key: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            issuer: default_issuer(),
            audience: default_audience(),
            key: String::new(),
        }
    }
}

fn default_issuer() -> String {
    "booking-platform".to_string()
}

fn default_audience() -> String {
    "booking-clients".to_string()
}

/// Cross-origin policy for browser clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Mirror any origin, with credentials (default: true)
    #[serde(default = "default_allow_all")]
    pub allow_all: bool,

    /// Trusted origins, used when `allow_all` is false
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_all: true,
            allowed_origins: Vec::new(),
        }
    }
}

impl CorsConfig {
    /// Configured origins with any trailing `/` removed.
    pub fn origins(&self) -> Vec<String> {
        self.allowed_origins
            .iter()
            .map(|o| o.trim_end_matches('/').to_string())
            .filter(|o| !o.is_empty())
            .collect()
    }
}

fn default_allow_all() -> bool {
    true
}

/// Per-IP rate limit on hub handshakes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Seconds to replenish one handshake token (default: 1)
    #[serde(default = "default_replenish_secs")]
    pub replenish_secs: u64,

    /// Burst size (default: 30)
    #[serde(default = "default_burst")]
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            replenish_secs: 1,
            burst: 30,
        }
    }
}

fn default_replenish_secs() -> u64 {
    1
}

fn default_burst() -> u32 {
    30
}

/// WebSocket ping cadence. A peer that misses a pong is disconnected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepaliveConfig {
    /// Seconds between server pings (default: 30)
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for the pong (default: 10)
    #[serde(default = "default_pong_timeout_secs")]
    pub pong_timeout_secs: u64,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
        }
    }
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_pong_timeout_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            bind_address: "0.0.0.0".to_string(),
            json_logs: false,
            data_dir: "./data".to_string(),
            jwt: JwtConfig::default(),
            cors: CorsConfig::default(),
            rate_limit: RateLimitConfig::default(),
            keepalive: KeepaliveConfig::default(),
        }
    }
}

impl Config {
    /// Layered precedence:
    /// built-in defaults < TOML file < env vars (BOOKING_*, `__` for sections) < CLI flags
    pub fn figment(cli: &Cli) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            .merge(Env::prefixed("BOOKING_").split("__"))
            .merge(Serialized::defaults(cli))
    }

    pub fn load(cli: &Cli) -> Result<Self, figment::Error> {
        Self::figment(cli).extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Booking real-time server configuration
# Place this file at ./booking.toml or specify with --config <path>
# All settings can be overridden via environment variables (BOOKING_PORT,
# BOOKING_JWT__KEY, ...) or CLI flags (--port, ...)

# Server port (default: 5000)
# port = 5000

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and generated signing key
# data_dir = "./data"

# ---- Access tokens ----
# [jwt]
# issuer = "booking-platform"
# audience = "booking-clients"
# Shared HS256 key of the auth service. Leave empty to generate one in data_dir.
# key = ""

# ---- CORS ----
# [cors]
# Mirror any origin with credentials
# allow_all = true
# Trusted origins, used when allow_all = false
# allowed_origins = ["http://localhost:4200", "https://localhost:4200"]

# ---- Hub handshake rate limit (per IP) ----
# [rate_limit]
# replenish_secs = 1
# burst = 30

# ---- WebSocket keepalive ----
# [keepalive]
# ping_interval_secs = 30
# pong_timeout_secs = 10
"#
    .to_string()
}
