use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Environment variable pointing at an optional TOML config file.
pub const CONFIG_PATH_ENV: &str = "VISITRACK_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "visitrack.toml";
const ENV_PREFIX: &str = "VISITRACK";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub tracker: TrackerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
    /// Capacity of the visitor read cache; 0 disables caching
    pub visitor_cache_entries: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::Sqlite,
            url: "sqlite://./visitrack.db?mode=rwc".to_string(),
            max_connections: 5,
            visitor_cache_entries: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    #[serde(alias = "postgresql")]
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// API keys mapped to the user id they authenticate as.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub api_keys: HashMap<String, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Route names that are never recorded
    pub skip_routes: Vec<String>,
    /// HTTP methods that are recorded, compared case-insensitively
    pub allowed_methods: Vec<String>,
    pub track_authenticated_visitors: bool,
    pub track_unauthenticated_visitors: bool,
    pub events: EventsConfig,
    pub session: SessionConfig,
    pub client_ip: ClientIpConfig,
    pub geoip: GeoIpConfig,
    /// Fill the browser language columns from Accept-Language
    pub collect_browser_language: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            skip_routes: Vec::new(),
            allowed_methods: vec!["GET".to_string(), "POST".to_string()],
            track_authenticated_visitors: true,
            track_unauthenticated_visitors: true,
            events: EventsConfig::default(),
            session: SessionConfig::default(),
            client_ip: ClientIpConfig::default(),
            geoip: GeoIpConfig::default(),
            collect_browser_language: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub dispatch: bool,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { dispatch: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub cookie_name: String,
    /// Idle lifetime of a session, also used as the cookie max-age
    pub ttl_secs: u64,
    pub secure_cookie: bool,
    pub max_sessions: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "visitrack_session".to_string(),
            ttl_secs: 2 * 60 * 60,
            secure_cookie: false,
            max_sessions: 100_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    /// Use the socket address only
    #[default]
    None,
    /// Forwarded / X-Forwarded-For
    Standard,
    /// CF-Connecting-IP
    Cloudflare,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientIpConfig {
    pub trusted_proxy_mode: TrustedProxyMode,
    /// CIDR ranges of proxies whose X-Forwarded-For entries are trusted
    pub trusted_proxies: Vec<String>,
    /// Fixed number of proxy hops to skip from the right of X-Forwarded-For
    pub num_trusted_proxies: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoIpConfig {
    /// Path to a GeoLite2-City / GeoIP2-City .mmdb file; unset disables lookups
    pub city_db_path: Option<String>,
}

impl Config {
    /// Load configuration from defaults, an optional TOML file and
    /// `VISITRACK__*` environment variables, in increasing priority.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(Some(&path))
    }

    /// Load configuration from an optional file path plus the environment.
    /// A missing file is not an error.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::with_name(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            );
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("tracker.skip_routes")
                    .with_list_parse_key("tracker.allowed_methods")
                    .with_list_parse_key("tracker.client_ip.trusted_proxies")
                    .try_parsing(true),
            )
            .build()
            .context("failed to read configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("invalid configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        for cidr in &self.tracker.client_ip.trusted_proxies {
            cidr.parse::<ipnet::IpNet>()
                .with_context(|| format!("invalid trusted proxy CIDR '{cidr}'"))?;
        }

        if self.tracker.session.cookie_name.is_empty() {
            anyhow::bail!("tracker.session.cookie_name must not be empty");
        }

        if self.tracker.allowed_methods.is_empty() {
            tracing::warn!("tracker.allowed_methods is empty, no request will be recorded");
        }

        Ok(())
    }
}
