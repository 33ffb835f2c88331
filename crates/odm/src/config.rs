//! ODM configuration
//!
//! Selects the default backend for a registry and carries the connection
//! pool settings used when that backend is PostgreSQL. Values come from
//! code or from the environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ModelError, ModelResult};
use crate::manager::BackendKind;
use crate::object_id::ObjectId;

/// How the in-memory document store assigns identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdStrategy {
    /// Random UUID strings
    #[default]
    Uuid,
    /// Integers counting up from 1, per collection
    Sequential,
}

impl IdStrategy {
    pub fn next_id(&self, sequence: i64) -> ObjectId {
        match self {
            IdStrategy::Uuid => ObjectId::generate(),
            IdStrategy::Sequential => ObjectId::Integer(sequence),
        }
    }
}

impl FromStr for IdStrategy {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "uuid" => Ok(IdStrategy::Uuid),
            "sequential" | "integer" => Ok(IdStrategy::Sequential),
            other => Err(ModelError::Configuration(format!(
                "unknown id strategy '{}', expected uuid or sequential",
                other
            ))),
        }
    }
}

/// Connection pool settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: Option<u64>,
    pub max_lifetime_seconds: Option<u64>,
    pub test_before_acquire: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_seconds: 30,
            idle_timeout_seconds: Some(600),
            max_lifetime_seconds: Some(1800),
            test_before_acquire: true,
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }
}

/// Registry configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OdmConfig {
    pub backend: BackendKind,
    /// PostgreSQL URL; without it a relational registry uses in-memory tables
    pub database_url: Option<String>,
    pub id_strategy: IdStrategy,
    pub pool: PoolConfig,
}

impl Default for OdmConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Document,
            database_url: None,
            id_strategy: IdStrategy::default(),
            pool: PoolConfig::default(),
        }
    }
}

impl OdmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// In-memory document backend with predictable integer identifiers
    pub fn testing() -> Self {
        Self {
            id_strategy: IdStrategy::Sequential,
            ..Self::default()
        }
    }

    pub fn postgres(database_url: impl Into<String>) -> Self {
        Self {
            backend: BackendKind::Relational,
            database_url: Some(database_url.into()),
            ..Self::default()
        }
    }

    /// Load from `ODM_BACKEND`, `DATABASE_URL`, `ODM_ID_STRATEGY`,
    /// `DB_MAX_CONNECTIONS`, `DB_MIN_CONNECTIONS` and `DB_ACQUIRE_TIMEOUT`
    pub fn from_env() -> ModelResult<Self> {
        let mut config = Self::new();

        config.database_url = env::var("DATABASE_URL").ok();
        if config.database_url.is_some() {
            config.backend = BackendKind::Relational;
        }

        if let Ok(backend) = env::var("ODM_BACKEND") {
            config.backend = backend.parse().map_err(ModelError::Configuration)?;
        }

        if let Ok(strategy) = env::var("ODM_ID_STRATEGY") {
            config.id_strategy = strategy.parse()?;
        }

        if let Some(max) = parse_env::<u32>("DB_MAX_CONNECTIONS")? {
            config.pool.max_connections = max;
        }
        if let Some(min) = parse_env::<u32>("DB_MIN_CONNECTIONS")? {
            config.pool.min_connections = min;
        }
        if let Some(timeout) = parse_env::<u64>("DB_ACQUIRE_TIMEOUT")? {
            config.pool.acquire_timeout_seconds = timeout;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ModelResult<()> {
        if self.pool.max_connections == 0 {
            return Err(ModelError::Configuration(
                "max_connections must be greater than 0".to_string(),
            ));
        }
        if self.pool.min_connections > self.pool.max_connections {
            return Err(ModelError::Configuration(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.pool.min_connections, self.pool.max_connections
            )));
        }

        if let Some(database_url) = &self.database_url {
            let parsed = url::Url::parse(database_url).map_err(|e| {
                ModelError::Configuration(format!("invalid database URL: {}", e))
            })?;
            if !matches!(parsed.scheme(), "postgres" | "postgresql") {
                return Err(ModelError::Configuration(format!(
                    "unsupported database scheme '{}', expected postgres or postgresql",
                    parsed.scheme()
                )));
            }
        }

        Ok(())
    }
}

fn parse_env<T: FromStr>(name: &str) -> ModelResult<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw.parse().map(Some).map_err(|_| {
            ModelError::Configuration(format!("{} has an invalid value '{}'", name, raw))
        }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OdmConfig::default();
        assert_eq!(config.backend, BackendKind::Document);
        assert_eq!(config.pool.max_connections, 10);
        assert!(config.validate().is_ok());
        assert_eq!(OdmConfig::testing().id_strategy, IdStrategy::Sequential);
    }

    #[test]
    fn test_database_url_validation() {
        assert!(OdmConfig::postgres("postgres://localhost/app").validate().is_ok());
        assert!(OdmConfig::postgres("postgresql://user:pw@db:5432/app").validate().is_ok());
        assert!(OdmConfig::postgres("mysql://localhost/app").validate().is_err());
        assert!(OdmConfig::postgres("not a url").validate().is_err());
    }

    #[test]
    fn test_pool_bounds() {
        let mut config = OdmConfig::default();
        config.pool.min_connections = 20;
        assert!(matches!(config.validate(), Err(ModelError::Configuration(_))));
    }

    #[test]
    fn test_id_strategy() {
        assert_eq!("Sequential".parse::<IdStrategy>().unwrap(), IdStrategy::Sequential);
        assert!("snowflake".parse::<IdStrategy>().is_err());
        assert_eq!(IdStrategy::Sequential.next_id(3), ObjectId::Integer(3));
        assert!(IdStrategy::Uuid.next_id(3).as_str().is_some());
    }
}
