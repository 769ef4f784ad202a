use crate::constants::{
    DEFAULT_ADGROUP_MAX_PAGES, DEFAULT_ADGROUP_PAGE_SIZE, DEFAULT_ALERT_THRESHOLD_CPC,
    DEFAULT_BIND_ADDR, DEFAULT_DB_POOL_SIZE, DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_METRICS_CHUNK_SIZE, DEFAULT_SMTP_HOST,
    DEFAULT_SMTP_PORT, TIKTOK_BASE_URL, WORKER_INTERVAL_SECS,
};
use dotenv::dotenv;
use std::env;
use std::str::FromStr;
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub tiktok: TikTokConfig,
    pub smtp: SmtpConfig,
    pub worker: WorkerConfig,
    pub bind_addr: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub tls_verify: bool,
    pub pool_size: usize,
}

#[derive(Debug, Clone)]
pub struct TikTokConfig {
    pub access_token: String,
    pub base_url: String,
    pub adgroup_page_size: u32,
    /// Pages of `/adgroup/get/` read per fetch. The vendor paginates; one
    /// page matches the historical behaviour.
    pub adgroup_max_pages: u32,
    pub metrics_chunk_size: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub recipient: String,
    /// Log alerts instead of dispatching them.
    pub noop: bool,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub advertiser_ids: Vec<String>,
    pub interval_secs: u64,
    pub alert_threshold_cpc: f64,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable not found: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("Invalid URL in {key}: {reason}")]
    InvalidUrl { key: String, reason: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup so parsing can
    /// be exercised without touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);

        let database_url = vars.required("DATABASE_URL")?;
        vars.url("DATABASE_URL", &database_url)?;

        let base_url = vars
            .optional("TIKTOK_API_BASE")
            .unwrap_or_else(|| TIKTOK_BASE_URL.to_string());
        vars.url("TIKTOK_API_BASE", &base_url)?;

        let tiktok = TikTokConfig {
            access_token: vars.required("TIKTOK_ACCESS_TOKEN")?,
            base_url: base_url.trim_end_matches('/').to_string(),
            adgroup_page_size: vars.parse_or("TIKTOK_ADGROUP_PAGE_SIZE", DEFAULT_ADGROUP_PAGE_SIZE)?,
            adgroup_max_pages: vars.parse_or("TIKTOK_ADGROUP_MAX_PAGES", DEFAULT_ADGROUP_MAX_PAGES)?,
            metrics_chunk_size: vars
                .parse_or("TIKTOK_METRICS_CHUNK_SIZE", DEFAULT_METRICS_CHUNK_SIZE)?,
            timeout_secs: vars.parse_or("HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?,
        };
        if tiktok.adgroup_page_size == 0 {
            return Err(vars.invalid("TIKTOK_ADGROUP_PAGE_SIZE"));
        }
        if tiktok.adgroup_max_pages == 0 {
            return Err(vars.invalid("TIKTOK_ADGROUP_MAX_PAGES"));
        }
        if tiktok.metrics_chunk_size == 0 {
            return Err(vars.invalid("TIKTOK_METRICS_CHUNK_SIZE"));
        }

        let username = vars.optional("SMTP_USERNAME");
        let password = vars.optional("SMTP_PASSWORD");
        if username.is_some() != password.is_some() {
            let missing = if username.is_some() { "SMTP_PASSWORD" } else { "SMTP_USERNAME" };
            return Err(ConfigError::MissingEnv(missing.to_string()));
        }
        let from = vars
            .optional("SMTP_FROM")
            .or_else(|| username.clone())
            .ok_or_else(|| ConfigError::MissingEnv("SMTP_FROM".to_string()))?;

        let smtp = SmtpConfig {
            host: vars
                .optional("SMTP_HOST")
                .unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
            port: vars.parse_or("SMTP_PORT", DEFAULT_SMTP_PORT)?,
            username,
            password,
            from,
            recipient: vars.required("ALERT_RECIPIENT")?,
            noop: vars.flag("SMTP_NOOP", false)?,
        };

        let threshold: f64 = vars.parse_or("ALERT_THRESHOLD_CPC", DEFAULT_ALERT_THRESHOLD_CPC)?;
        if !threshold.is_finite() {
            return Err(vars.invalid("ALERT_THRESHOLD_CPC"));
        }

        let worker = WorkerConfig {
            advertiser_ids: vars
                .optional("ADVERTISER_IDS")
                .map(|ids| {
                    ids.split(',')
                        .map(str::trim)
                        .filter(|id| !id.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            interval_secs: vars.parse_or("WORKER_INTERVAL_SECS", WORKER_INTERVAL_SECS)?,
            alert_threshold_cpc: threshold,
        };
        if worker.interval_secs == 0 {
            return Err(vars.invalid("WORKER_INTERVAL_SECS"));
        }

        let pool_size = vars.parse_or("DATABASE_POOL_SIZE", DEFAULT_DB_POOL_SIZE)?;
        if pool_size == 0 {
            return Err(vars.invalid("DATABASE_POOL_SIZE"));
        }

        Ok(Self {
            database: DatabaseConfig {
                url: database_url,
                tls_verify: vars.flag("DATABASE_TLS_VERIFY", true)?,
                pool_size,
            },
            tiktok,
            smtp,
            worker,
            bind_addr: vars
                .optional("BIND_ADDR")
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
        })
    }
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingEnv(key.to_string()))
    }

    fn parse_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.optional(key) {
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::InvalidValue { key: key.to_string(), value }),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.optional(key) {
            Some(value) => match value.to_lowercase().as_str() {
                "1" | "true" | "yes" => Ok(true),
                "0" | "false" | "no" => Ok(false),
                _ => Err(ConfigError::InvalidValue { key: key.to_string(), value }),
            },
            None => Ok(default),
        }
    }

    fn url(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        Url::parse(value)
            .map(|_| ())
            .map_err(|e| ConfigError::InvalidUrl { key: key.to_string(), reason: e.to_string() })
    }

    fn invalid(&self, key: &str) -> ConfigError {
        ConfigError::InvalidValue {
            key: key.to_string(),
            value: self.optional(key).unwrap_or_default(),
        }
    }
}
