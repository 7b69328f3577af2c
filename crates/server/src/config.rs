use anyhow::Context;

use shopgeo_infra::ValidationConfig;

/// Process configuration, from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub max_db_connections: u32,
    pub validation: ValidationConfig,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let max_db_connections = match std::env::var("SHOPGEO_DB_MAX_CONNECTIONS") {
            Ok(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("SHOPGEO_DB_MAX_CONNECTIONS: invalid value {raw:?}"))?,
            Err(_) => 5,
        };
        let validation = ValidationConfig::from_env()?;
        Ok(Self {
            database_url,
            max_db_connections,
            validation,
        })
    }
}
