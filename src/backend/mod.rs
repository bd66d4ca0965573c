//! Purpose: The backend adapter capability and its runtime-keyed factory.
//! Exports: `Backend`, `RowStream`, `BackendKind`, `open`.
//! Role: Minimal primitive (row iteration over an executed query) the query
//! layer is built on; concrete variants live in submodules.
//! Invariants: Every variant exposes the same `Row` shape, so the query
//! layer is written once.
//! Invariants: An adapter holds one live connection and is single-flight:
//! one execute/fetch pair at a time, never shared across threads.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::DataConfig;
use crate::core::error::Error;
use crate::core::value::Row;

pub mod cache;
pub mod relational;

pub use cache::CacheBackend;
pub use relational::RelationalBackend;

/// Capability implemented by each backend variant.
///
/// `execute` runs one query and hands back a stream over its rows. The
/// stream borrows the adapter, which enforces the single-flight cursor
/// contract at compile time. `page_size` bounds rows buffered per
/// round-trip on the cache variant and is ignored by the relational one.
pub trait Backend {
    fn execute<'c>(
        &'c mut self,
        query: &str,
        page_size: Option<usize>,
    ) -> Result<Box<dyn RowStream + 'c>, Error>;

    fn commit(&mut self) -> Result<(), Error>;

    fn rollback(&mut self) -> Result<(), Error>;

    /// Releases cursor and connection. Idempotent.
    fn close(&mut self) -> Result<(), Error>;

    fn name(&self) -> &'static str;
}

/// Single-pass iteration over one executed query's rows.
///
/// Each call to `Backend::execute` produces a fresh stream; a stream itself
/// is never restartable. Callers needing a second pass re-issue the query.
pub trait RowStream {
    fn next_row(&mut self) -> Result<Option<Row>, Error>;

    fn fetch_all(&mut self) -> Result<Vec<Row>, Error> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row()? {
            rows.push(row);
        }
        Ok(rows)
    }
}

/// Supported backend variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Relational,
    Cache,
}

impl BackendKind {
    /// Reads the backend selection from the environment, defaulting to the
    /// relational variant when the variable is unset or unrecognized.
    pub fn from_env() -> Self {
        match std::env::var(crate::config::BACKEND_ENV_VAR) {
            Ok(value) => BackendKind::from(value.as_str()),
            Err(_) => BackendKind::default(),
        }
    }
}

impl From<&str> for BackendKind {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "cache" | "grid" | "dbcache" => BackendKind::Cache,
            "db" | "relational" | "sql" => BackendKind::Relational,
            _ => BackendKind::Relational,
        }
    }
}

impl From<String> for BackendKind {
    fn from(s: String) -> Self {
        BackendKind::from(s.as_str())
    }
}

/// Opens the adapter variant selected by `kind`.
pub fn open(kind: BackendKind, config: &DataConfig) -> Result<Box<dyn Backend>, Error> {
    debug!(?kind, "opening backend adapter");
    match kind {
        BackendKind::Relational => Ok(Box::new(RelationalBackend::open(&config.relational)?)),
        BackendKind::Cache => Ok(Box::new(CacheBackend::open(&config.cache)?)),
    }
}
