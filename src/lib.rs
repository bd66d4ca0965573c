//! Purpose: Uniform data-access clients for driving and validating
//! integration tests.
//! Exports: `ConnectionScope`/`with_scope`, `Session`, backend adapters,
//! configuration, and the core value/LOB/error types.
//! Role: Lets test code query heterogeneous backends (relational database,
//! SQL-capable cache grid) without knowing which driver is underneath.
//! Invariants: One scope per logical query sequence; a scope is the unit of
//! connection and transaction lifetime.
//! Invariants: Synchronous and blocking throughout; no retries, caching, or
//! row re-ordering anywhere in this crate.

pub mod backend;
pub mod config;
pub mod core;
pub mod scope;
pub mod session;

pub use crate::backend::{Backend, BackendKind, RowStream};
pub use crate::config::{CacheConfig, DataConfig, RelationalConfig};
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::lob::{Lob, decode_json, inflate};
pub use crate::core::value::{Row, Value};
pub use crate::scope::{ConnectionScope, ScopeState, with_scope};
pub use crate::session::{PagedSession, Session};
