//! Configuration
//!
//! [`StatsConfig`] is read from a TOML file, then overridden from the
//! environment, then validated. Every field has a default so an empty file
//! (or no file) is a valid configuration.
//!
//! ## Environment overrides
//! - `STATS_KEY_TEMPLATE`, `STATS_DEFAULT_JOB`, `STATS_PERSIST`
//! - `REDIS_URL`, `REDIS_HOST`, `REDIS_PORT`, `REDIS_PASSWORD`
//! - `STATS_BIND`, `STATS_REQUIRE_PASS`, `STATS_LOG_FORMAT`

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::stats::keys::{JobId, KeyNamespace, DEFAULT_JOB, DEFAULT_KEY_TEMPLATE};

pub const DEFAULT_MAX_CAS_ATTEMPTS: u32 = 64;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Where metrics live, see [`KeyNamespace`].
    pub key_template: String,
    /// Job used when no job is bound and none is given.
    pub default_job: String,
    /// Keep a job's metrics when it closes.
    pub persist: bool,
    /// Bound on compare-and-set retries for max/min updates.
    pub max_cas_attempts: u32,
    pub connection: ConnectionConfig,
    pub server: ServerConfig,
}

impl Default for StatsConfig {
    fn default() -> Self {
        StatsConfig {
            key_template: DEFAULT_KEY_TEMPLATE.to_string(),
            default_job: DEFAULT_JOB.to_string(),
            persist: false,
            max_cas_attempts: DEFAULT_MAX_CAS_ATTEMPTS,
            connection: ConnectionConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl StatsConfig {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// File (if any), then environment, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides looked up by environment variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("STATS_KEY_TEMPLATE") {
            self.key_template = v;
        }
        if let Some(v) = lookup("STATS_DEFAULT_JOB") {
            self.default_job = v;
        }
        if let Some(v) = lookup("STATS_PERSIST") {
            self.persist = parse_bool("STATS_PERSIST", &v)?;
        }
        if let Some(v) = lookup("REDIS_URL") {
            self.connection.url = Some(v);
        }
        if let Some(v) = lookup("REDIS_HOST") {
            self.connection.host = v;
        }
        if let Some(v) = lookup("REDIS_PORT") {
            self.connection.port = v.parse().map_err(|_| ConfigError::InvalidValue {
                name: "REDIS_PORT",
                value: v.clone(),
            })?;
        }
        if let Some(v) = lookup("REDIS_PASSWORD") {
            self.connection.password = Some(v);
        }
        if let Some(v) = lookup("STATS_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = lookup("STATS_REQUIRE_PASS") {
            self.server.require_pass = Some(v);
        }
        if let Some(v) = lookup("STATS_LOG_FORMAT") {
            self.server.log_format = v.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.namespace()?;
        self.default_job()?;
        if self.max_cas_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "max_cas_attempts",
                value: "0".to_string(),
            });
        }
        self.connection.validate()?;
        Ok(())
    }

    pub fn namespace(&self) -> Result<KeyNamespace, ConfigError> {
        KeyNamespace::new(&self.key_template)
    }

    pub fn default_job(&self) -> Result<JobId, ConfigError> {
        JobId::new(self.default_job.clone())
    }
}

/// How to reach the backing store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// `redis://[user:pass@]host[:port][/db]`, overrides the discrete fields.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: i64,
    /// Read/write timeout on the socket (default: 30s)
    #[serde(with = "duration_secs")]
    pub socket_timeout: Duration,
    /// Connect timeout (default: 30s)
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
    /// Retry idempotent batches once after a timeout.
    pub retry_on_timeout: bool,
    /// Text encoding of stored strings. Only utf-8 is supported.
    pub encoding: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            url: None,
            host: "127.0.0.1".to_string(),
            port: 6379,
            username: None,
            password: None,
            db: 0,
            socket_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            retry_on_timeout: true,
            encoding: "utf-8".to_string(),
        }
    }
}

/// Resolved connection target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: i64,
}

impl Endpoint {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl ConnectionConfig {
    /// Config pointing at `addr` (`host:port`) with default timeouts.
    pub fn for_address(addr: &str) -> Result<Self, ConfigError> {
        let (host, port) = split_host_port(addr, addr)?;
        Ok(ConnectionConfig {
            host,
            port: port.unwrap_or(6379),
            ..Self::default()
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let encoding = self.encoding.to_ascii_lowercase().replace('_', "-");
        if encoding != "utf-8" && encoding != "utf8" {
            return Err(ConfigError::UnsupportedEncoding(self.encoding.clone()));
        }
        if self.socket_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "socket_timeout",
                value: "0".to_string(),
            });
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "connect_timeout",
                value: "0".to_string(),
            });
        }
        self.endpoint()?;
        Ok(())
    }

    /// Discrete fields, with the URL's parts taking precedence.
    pub fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        let mut endpoint = Endpoint {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            db: self.db,
        };
        if let Some(url) = &self.url {
            apply_url(url, &mut endpoint)?;
        }
        if endpoint.host.is_empty() {
            return Err(ConfigError::MissingParameter("host"));
        }
        if endpoint.db < 0 {
            return Err(ConfigError::InvalidValue {
                name: "db",
                value: endpoint.db.to_string(),
            });
        }
        Ok(endpoint)
    }
}

fn apply_url(url: &str, endpoint: &mut Endpoint) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let rest = url
        .strip_prefix("redis://")
        .ok_or_else(|| invalid("scheme must be redis://"))?;
    let (authority, path) = match rest.split_once('/') {
        Some((authority, path)) => (authority, Some(path)),
        None => (rest, None),
    };
    let (credentials, hostport) = match authority.rsplit_once('@') {
        Some((credentials, hostport)) => (Some(credentials), hostport),
        None => (None, authority),
    };

    if let Some(credentials) = credentials {
        match credentials.split_once(':') {
            Some((user, pass)) => {
                if !user.is_empty() {
                    endpoint.username = Some(user.to_string());
                }
                endpoint.password = Some(pass.to_string());
            }
            None => endpoint.username = Some(credentials.to_string()),
        }
    }

    if hostport.is_empty() {
        return Err(invalid("missing host"));
    }
    let (host, port) = split_host_port(hostport, url)?;
    endpoint.host = host;
    if let Some(port) = port {
        endpoint.port = port;
    }

    if let Some(path) = path.filter(|p| !p.is_empty()) {
        endpoint.db = path.parse().map_err(|_| invalid("database must be a number"))?;
    }
    Ok(())
}

fn split_host_port(hostport: &str, url: &str) -> Result<(String, Option<u16>), ConfigError> {
    match hostport.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse().map_err(|_| ConfigError::InvalidUrl {
                url: url.to_string(),
                reason: format!("invalid port {:?}", port),
            })?;
            Ok((host.to_string(), Some(port)))
        }
        None => Ok((hostport.to_string(), None)),
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: value.to_string(),
        }),
    }
}

/// Settings of the `stats-server` binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Password clients must AUTH with (Redis requirepass equivalent)
    pub require_pass: Option<String>,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: "127.0.0.1:6379".to_string(),
            require_pass: None,
            log_format: LogFormat::Human,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "human" => Ok(LogFormat::Human),
            "json" => Ok(LogFormat::Json),
            _ => Err(ConfigError::InvalidValue {
                name: "log_format",
                value: s.to_string(),
            }),
        }
    }
}

/// Durations are written as (fractional) seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
