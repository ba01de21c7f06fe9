//! Application settings and configuration structures.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure containing all application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Server configuration (host, port)
    pub server: ServerSettings,

    /// Database configuration (PostgreSQL)
    pub database: DatabaseSettings,

    /// JWT authentication settings
    pub jwt: JwtSettings,

    /// Snowflake ID generator settings
    pub snowflake: SnowflakeSettings,

    /// WebSocket gateway configuration
    pub websocket: WebsocketSettings,

    /// Event throttling intervals
    pub throttle: ThrottleSettings,

    /// Current environment (development, staging, production)
    pub environment: String,
}

/// Server binding configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to (e.g., "0.0.0.0")
    pub host: String,

    /// Port number to listen on
    pub port: u16,
}

/// PostgreSQL database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// Database connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections to maintain
    pub min_connections: u32,

    /// Connection acquire timeout in seconds
    pub acquire_timeout: u64,
}

/// JWT authentication configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtSettings {
    /// Secret key for verifying gateway tokens
    pub secret: String,
}

/// Snowflake ID generator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SnowflakeSettings {
    /// Machine/worker ID (0-31)
    pub machine_id: u16,

    /// Node ID within the machine (0-31)
    pub node_id: u16,
}

/// WebSocket gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebsocketSettings {
    /// Soft cap on concurrent connections per user
    pub max_connections_per_user: usize,
}

/// Per-event minimum intervals in milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct ThrottleSettings {
    /// Interval between message sends per (user, conversation)
    pub send_message_ms: u64,

    /// Interval between typing notifications per (user, conversation)
    pub typing_ms: u64,

    /// Interval between read receipts per user
    pub read_receipt_ms: u64,

    /// Sweep period for expired throttle keys
    pub sweep_interval_secs: u64,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            send_message_ms: 500,
            typing_ms: 2000,
            read_receipt_ms: 1000,
            sweep_interval_secs: 60,
        }
    }
}

/// Minimum required length for the JWT secret (256 bits = 32 bytes)
pub const MIN_JWT_SECRET_LENGTH: usize = 32;

impl Settings {
    /// Load settings from environment variables and configuration files.
    ///
    /// The loading order is:
    /// 1. config/default.toml (base configuration)
    /// 2. config/{RUN_ENV}.toml (environment-specific overrides)
    /// 3. Environment variables (highest priority)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or parsed,
    /// or if the JWT secret is too short.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());

        let settings: Settings = Config::builder()
            .set_default("environment", environment.clone())?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout", 30)?
            .set_default("snowflake.machine_id", 1)?
            .set_default("snowflake.node_id", 0)?
            .set_default("websocket.max_connections_per_user", 5)?
            .set_default("throttle.send_message_ms", 500)?
            .set_default("throttle.typing_ms", 2000)?
            .set_default("throttle.read_receipt_ms", 1000)?
            .set_default("throttle.sweep_interval_secs", 60)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // CONVOY__SERVER__PORT=3000 -> server.port = 3000
            .add_source(
                Environment::default()
                    .prefix("CONVOY")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .set_override_option("jwt.secret", std::env::var("JWT_SECRET").ok())?
            .build()?
            .try_deserialize()?;

        if settings.jwt.secret.len() < MIN_JWT_SECRET_LENGTH {
            return Err(ConfigError::Message(format!(
                "JWT secret must be at least {} bytes",
                MIN_JWT_SECRET_LENGTH
            )));
        }

        Ok(settings)
    }
}
