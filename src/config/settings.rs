//! Process settings from the environment (`.env` honoured through dotenvy).

use crate::error::ConfigError;
use std::collections::HashMap;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:6606";
pub const DEFAULT_API_PREFIX: &str = "/api";
pub const DEFAULT_BODY_LIMIT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct Settings {
    /// No database means the in-memory store.
    pub database_url: Option<String>,
    pub bind_addr: String,
    pub resource_config: Option<String>,
    pub api_prefix: String,
    pub db_max_connections: u32,
    pub body_limit_bytes: usize,
    pub environment: Option<String>,
}

impl Settings {
    /// Read settings from the process environment after loading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(&std::env::vars().collect())
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |k: &str| vars.get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let parse = |k: &str, default: usize| -> Result<usize, ConfigError> {
            match get(k) {
                Some(v) => v
                    .parse()
                    .map_err(|_| ConfigError::Load(format!("{} must be a positive integer, got '{}'", k, v))),
                None => Ok(default),
            }
        };
        Ok(Settings {
            database_url: get("DATABASE_URL"),
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into()),
            resource_config: get("RESOURCE_CONFIG"),
            api_prefix: get("API_PREFIX").unwrap_or_else(|| DEFAULT_API_PREFIX.into()),
            db_max_connections: parse("DB_MAX_CONNECTIONS", 5)? as u32,
            body_limit_bytes: parse("BODY_LIMIT_BYTES", DEFAULT_BODY_LIMIT_BYTES)?,
            environment: get("ENVIRONMENT"),
        })
    }

    /// Endpoint listing is exposed outside production-like environments only.
    pub fn is_develop(&self) -> bool {
        matches!(self.environment.as_deref(), None | Some("develop"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_without_env() {
        let s = Settings::from_vars(&HashMap::new()).unwrap();
        assert_eq!(s.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(s.api_prefix, "/api");
        assert_eq!(s.db_max_connections, 5);
        assert_eq!(s.body_limit_bytes, DEFAULT_BODY_LIMIT_BYTES);
        assert!(s.database_url.is_none());
        assert!(s.is_develop());
    }

    #[test]
    fn overrides_and_bad_numbers() {
        let s = Settings::from_vars(&vars(&[
            ("DATABASE_URL", "postgres://localhost/app"),
            ("ENVIRONMENT", "production"),
            ("DB_MAX_CONNECTIONS", "12"),
        ]))
        .unwrap();
        assert_eq!(s.database_url.as_deref(), Some("postgres://localhost/app"));
        assert_eq!(s.db_max_connections, 12);
        assert!(!s.is_develop());

        assert!(Settings::from_vars(&vars(&[("BODY_LIMIT_BYTES", "lots")])).is_err());
    }
}
