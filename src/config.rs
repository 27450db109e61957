use crate::error::ConfigError;
use crate::infrastructure::connection_pool::PoolConfig;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

#[derive(Debug, Clone)]
pub struct Config {
    // Listener
    pub host: String,
    pub port: u16,

    // Store
    pub database_url: String,
    pub pool_max_connections: usize,
    pub acquire_timeout: Duration,
    pub query_timeout: Duration,

    // Probes and shutdown
    pub ready_timeout: Duration,
    pub drain_timeout: Duration,

    pub log_level: Level,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: String::new(),
            pool_max_connections: 10,
            acquire_timeout: Duration::from_millis(5000),
            query_timeout: Duration::from_millis(10_000),
            ready_timeout: Duration::from_millis(2000),
            drain_timeout: Duration::from_secs(10),
            log_level: Level::INFO,
        }
    }
}

impl Config {
    /// Build a config from an arbitrary key lookup.
    ///
    /// Empty values count as unset. Values that are set but do not parse
    /// are rejected instead of falling back to the default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Config::default();

        let database_url = get("DATABASE_URL").ok_or(ConfigError::MissingDatabaseUrl)?;

        let host = get("HOST").unwrap_or(defaults.host);
        let port = parse_or("PORT", get("PORT"), defaults.port)?;

        let log_level = match get("LOG_LEVEL") {
            Some(v) => parse_log_level(&v).ok_or(ConfigError::InvalidValue {
                key: "LOG_LEVEL",
                value: v,
            })?,
            None => defaults.log_level,
        };

        let pool_max_connections = parse_or(
            "DB_POOL_MAX",
            get("DB_POOL_MAX"),
            defaults.pool_max_connections,
        )?;
        if pool_max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                key: "DB_POOL_MAX",
                value: "0".to_string(),
            });
        }

        let acquire_timeout = millis_or(
            "DB_ACQUIRE_TIMEOUT_MS",
            get("DB_ACQUIRE_TIMEOUT_MS"),
            defaults.acquire_timeout,
        )?;
        let query_timeout = millis_or(
            "DB_QUERY_TIMEOUT_MS",
            get("DB_QUERY_TIMEOUT_MS"),
            defaults.query_timeout,
        )?;
        let ready_timeout = millis_or(
            "READY_TIMEOUT_MS",
            get("READY_TIMEOUT_MS"),
            defaults.ready_timeout,
        )?;
        let drain_timeout = parse_or::<u64>(
            "SHUTDOWN_DRAIN_SECS",
            get("SHUTDOWN_DRAIN_SECS"),
            defaults.drain_timeout.as_secs(),
        )
        .map(Duration::from_secs)?;

        Ok(Config {
            host,
            port,
            database_url,
            pool_max_connections,
            acquire_timeout,
            query_timeout,
            ready_timeout,
            drain_timeout,
            log_level,
        })
    }

    /// `host:port` for the listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_connections: self.pool_max_connections,
            acquire_timeout: self.acquire_timeout,
            query_timeout: self.query_timeout,
        }
    }
}

pub fn load_config() -> Result<Config, ConfigError> {
    Config::from_lookup(|key| std::env::var(key).ok())
}

/// Map a `LOG_LEVEL` value to a tracing level. `fatal` maps to error.
pub fn parse_log_level(value: &str) -> Option<Level> {
    match value.trim().to_ascii_lowercase().as_str() {
        "fatal" => Some(Level::ERROR),
        other => Level::from_str(other).ok(),
    }
}

fn parse_or<T: FromStr>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: v }),
        None => Ok(default),
    }
}

fn millis_or(key: &'static str, raw: Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    parse_or::<u64>(key, raw, default.as_millis() as u64).map(Duration::from_millis)
}
