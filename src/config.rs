//! Environment-driven configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::generators::engine::default_render_concurrency;
use crate::generators::Letterhead;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} has an invalid value `{value}`")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub data_file: PathBuf,
    pub render_binary: PathBuf,
    pub render_timeout: Duration,
    pub render_max_concurrent: usize,
    pub render_max_queue: usize,
    pub generation_deadline: Duration,
    pub letterhead: Letterhead,
    pub cors_origins: Vec<String>,
}

impl AppConfig {
    /// Read configuration from the process environment (after loading `.env`).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Letterhead::default();

        let upload_dir = PathBuf::from(get("UPLOAD_DIR").unwrap_or_else(|| "./uploads".into()));
        let data_file = get("DATA_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| upload_dir.join("records.json"));

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse(&get, "PORT", 8080)?,
            data_file,
            upload_dir,
            render_binary: PathBuf::from(
                get("RENDER_BINARY").unwrap_or_else(|| "chromium".into()),
            ),
            render_timeout: Duration::from_secs(parse(&get, "RENDER_TIMEOUT_SECS", 60)?),
            render_max_concurrent: match get("RENDER_MAX_CONCURRENT") {
                Some(_) => parse(&get, "RENDER_MAX_CONCURRENT", 1)?,
                None => default_render_concurrency(),
            },
            render_max_queue: parse(&get, "RENDER_MAX_QUEUE", 8)?,
            generation_deadline: Duration::from_secs(parse(
                &get,
                "GENERATION_DEADLINE_SECS",
                120,
            )?),
            letterhead: Letterhead {
                company_name: get("COMPANY_NAME").unwrap_or(defaults.company_name),
                address: get("COMPANY_ADDRESS").unwrap_or(defaults.address),
                contact: get("COMPANY_CONTACT").unwrap_or(defaults.contact),
            },
            cors_origins: get("CORS_ORIGINS")
                .map(|origins| {
                    origins
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_else(|| {
                    vec![
                        "http://localhost:5173".to_string(),
                        "http://localhost:3000".to_string(),
                        "http://127.0.0.1:8080".to_string(),
                    ]
                }),
        })
    }
}

fn parse<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}
