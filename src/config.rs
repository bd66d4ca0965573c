//! Purpose: Configuration for backend selection and per-backend connections.
//! Exports: `DataConfig`, `RelationalConfig`, `CacheConfig`, `BACKEND_ENV_VAR`.
//! Role: Explicit configuration threaded through scope construction; the
//! environment is one source for the backend choice, never a hidden global.
//! Invariants: Every field has a usable default so tests can start from
//! `DataConfig::default()` and override only what they exercise.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;

/// Environment variable consulted by [`DataConfig::from_env`] to pick the
/// backend variant. Recognized values map onto [`BackendKind`]; anything
/// else (or an unset variable) selects the relational default.
pub const BACKEND_ENV_VAR: &str = "DBTAP_BACKEND";

pub const DEFAULT_PAGE_SIZE: usize = 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default)]
    pub relational: RelationalConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl DataConfig {
    /// Defaults with the backend choice taken from `DBTAP_BACKEND`.
    pub fn from_env() -> Self {
        Self {
            backend: BackendKind::from_env(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationalConfig {
    /// Database path; `:memory:` opens a private in-memory database.
    pub path: String,
}

impl Default for RelationalConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Cache the SQL queries run against; omitted means the grid default.
    pub cache_name: Option<String>,
    /// Rows buffered per round-trip when no per-call hint is given.
    pub page_size: usize,
    pub request_timeout: Duration,
}

impl CacheConfig {
    pub(crate) fn base_url(&self) -> String {
        format!("http://{}:{}/ignite", self.host, self.port)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            username: None,
            password: None,
            cache_name: None,
            page_size: DEFAULT_PAGE_SIZE,
            request_timeout: Duration::from_secs(10),
        }
    }
}
