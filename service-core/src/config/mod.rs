use crate::error::AppError;
use config::{Config as Cfg, Environment, File, FileFormat};
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Settings every service carries regardless of its domain.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            log_level: default_log_level(),
            otlp_endpoint: None,
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load a JSON configuration file, layered with `APP__`-prefixed environment overrides.
pub fn load_json_file<T: DeserializeOwned>(path: &str) -> Result<T, AppError> {
    dotenvy::dotenv().ok();

    let config = Cfg::builder()
        .add_source(File::new(path, FileFormat::Json).required(true))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    Ok(config.try_deserialize()?)
}
