use crate::cache::DEFAULT_TTL_HOURS;
use crate::intel::{DEFAULT_LOOKUP_ENDPOINT, DEFAULT_SUBMIT_ENDPOINT};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

/// Ten years.
pub const MAX_TTL_HOURS: i64 = 24 * 365 * 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_state_path")]
    pub state_path: String,
    #[serde(default)]
    pub urlhaus: UrlhausConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlhausConfig {
    #[serde(default = "default_lookup_endpoint")]
    pub lookup_endpoint: String,
    #[serde(default = "default_submit_endpoint")]
    pub submit_endpoint: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// No client-side timeout when absent.
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

fn default_state_path() -> String {
    "urlhaus-guard-state.json".to_string()
}

fn default_lookup_endpoint() -> String {
    DEFAULT_LOOKUP_ENDPOINT.to_string()
}

fn default_submit_endpoint() -> String {
    DEFAULT_SUBMIT_ENDPOINT.to_string()
}

fn default_user_agent() -> String {
    format!("urlhaus-guard/{}", env!("CARGO_PKG_VERSION"))
}

fn default_ttl_hours() -> i64 {
    DEFAULT_TTL_HOURS
}

impl Default for UrlhausConfig {
    fn default() -> Self {
        Self {
            lookup_endpoint: default_lookup_endpoint(),
            submit_endpoint: default_submit_endpoint(),
            user_agent: default_user_agent(),
            timeout_seconds: None,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_ttl_hours(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            state_path: default_state_path(),
            urlhaus: UrlhausConfig::default(),
            cache: CacheConfig::default(),
            logging: Some(LoggingConfig {
                level: "info".to_string(),
            }),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cache.ttl_hours <= 0 {
            anyhow::bail!("cache.ttl_hours must be positive, got {}", self.cache.ttl_hours);
        }
        if self.cache.ttl_hours > MAX_TTL_HOURS {
            anyhow::bail!(
                "cache.ttl_hours must be at most {MAX_TTL_HOURS}, got {}",
                self.cache.ttl_hours
            );
        }
        self.cache_ttl()?;
        url::Url::parse(&self.urlhaus.lookup_endpoint)
            .map_err(|e| anyhow::anyhow!("Invalid urlhaus.lookup_endpoint: {e}"))?;
        url::Url::parse(&self.urlhaus.submit_endpoint)
            .map_err(|e| anyhow::anyhow!("Invalid urlhaus.submit_endpoint: {e}"))?;
        Ok(())
    }

    pub fn cache_ttl(&self) -> anyhow::Result<TimeDelta> {
        TimeDelta::try_hours(self.cache.ttl_hours).ok_or_else(|| {
            anyhow::anyhow!("cache.ttl_hours out of range: {}", self.cache.ttl_hours)
        })
    }

    pub fn log_level(&self) -> log::LevelFilter {
        self.logging
            .as_ref()
            .and_then(|logging| logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info)
    }
}
