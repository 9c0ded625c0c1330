use std::net::SocketAddr;

use compliance_common::classifier::ClassifierConfig;

use crate::error::AppError;

/// Application configuration loaded explicitly from environment variables.
///
/// Required:
/// - `HUGGING_FACE_ACCESS_TOKEN`: bearer token for the classifier
///
/// Optional:
/// - `DATABASE_PATH` (default `compliance.db`)
/// - `LISTEN_ADDR` (default `127.0.0.1:3000`)
/// - `CLASSIFIER_*` tuning, see [`ClassifierConfig::from_env`]
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub listen_addr: SocketAddr,
    pub classifier: ClassifierConfig,
}

const DEFAULT_DATABASE_PATH: &str = "compliance.db";
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:3000";

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let token = get("HUGGING_FACE_ACCESS_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                AppError::Config(
                    "HUGGING_FACE_ACCESS_TOKEN environment variable is required".to_string(),
                )
            })?;

        let database_path =
            get("DATABASE_PATH").unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string());

        let listen_raw = get("LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr = listen_raw.parse::<SocketAddr>().map_err(|e| {
            AppError::Config(format!("LISTEN_ADDR {listen_raw:?} is not a socket address: {e}"))
        })?;

        Ok(Self {
            database_path,
            listen_addr,
            classifier: ClassifierConfig::from_env(token),
        })
    }
}
