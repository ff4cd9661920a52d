use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    pub debug: bool,
    pub enable_swagger: bool,
    pub port: u16,
    /// PostgreSQL connection string; the in-memory store is used when unset.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: false,
            enable_swagger: true,
            port: 8000,
            database_url: None,
            database_max_connections: 5,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let config = Config::builder()
            .set_default("debug", false)?
            .set_default("enable_swagger", true)?
            .set_default("port", 8000)?
            .set_default("database_max_connections", 5)?
            .add_source(File::with_name("gym-booking").required(false))
            // APP_PORT, APP_DATABASE_URL, ...
            .add_source(Environment::with_prefix("APP").try_parsing(true))
            // Conventional un-prefixed variables win
            .set_override_option("port", std::env::var("PORT").ok())?
            .set_override_option("database_url", std::env::var("DATABASE_URL").ok())?
            .build()?;

        config.try_deserialize()
    }
}
