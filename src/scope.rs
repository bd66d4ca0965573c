//! Purpose: Scoped acquisition of one backend adapter per transaction.
//! Exports: `ConnectionScope`, `ScopeState`, `with_scope`.
//! Role: Guarantees open, commit-or-rollback, and close on every exit path.
//! Invariants: A scope is single-use: UNOPENED → OPEN → {COMMITTED,
//! ROLLED_BACK}; terminal states imply closed resources.
//! Invariants: Close runs even when rollback fails; a body error always
//! re-propagates after cleanup.
//! Invariants: A scope dropped while still open rolls back (best effort) so
//! panics and early returns cannot leak a transaction.

use tracing::{debug, warn};

use crate::backend::{self, BackendKind};
use crate::config::DataConfig;
use crate::core::error::Error;
use crate::session::Session;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScopeState {
    Open,
    Committed,
    RolledBack,
}

pub struct ConnectionScope {
    session: Session,
    state: ScopeState,
}

impl ConnectionScope {
    /// Opens the backend selected by `config.backend`. On connect failure
    /// the error surfaces immediately and no scope exists.
    pub fn open(config: &DataConfig) -> Result<Self, Error> {
        Self::open_as(config.backend, config)
    }

    /// Opens an explicitly chosen variant, overriding `config.backend`.
    pub fn open_as(kind: BackendKind, config: &DataConfig) -> Result<Self, Error> {
        let adapter = backend::open(kind, config)?;
        Ok(Self {
            session: Session::new(adapter),
            state: ScopeState::Open,
        })
    }

    pub fn state(&self) -> ScopeState {
        self.state
    }

    pub fn session(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Commits the transaction and closes the adapter. Terminal.
    pub fn commit(mut self) -> Result<(), Error> {
        self.finish(ScopeState::Committed)
    }

    /// Rolls the transaction back and closes the adapter. Terminal; the
    /// adapter is closed even when the rollback itself fails.
    pub fn rollback(mut self) -> Result<(), Error> {
        self.finish(ScopeState::RolledBack)
    }

    fn finish(&mut self, target: ScopeState) -> Result<(), Error> {
        debug_assert_eq!(self.state, ScopeState::Open);
        self.state = target;
        debug!(backend = self.session.backend_name(), ?target, "closing scope");
        let outcome = match target {
            ScopeState::Committed => self.session.commit(),
            _ => self.session.rollback(),
        };
        let closed = self.session.close();
        outcome.and(closed)
    }
}

impl Drop for ConnectionScope {
    fn drop(&mut self) {
        if self.state != ScopeState::Open {
            return;
        }
        if let Err(err) = self.finish(ScopeState::RolledBack) {
            warn!(error = %err, "scope dropped while open; rollback failed");
        }
    }
}

/// Runs `body` inside a scope: commit on `Ok`, rollback on `Err`, close on
/// both paths. When the body fails, cleanup failures are logged and the
/// body's own error is the one returned.
pub fn with_scope<T>(
    config: &DataConfig,
    body: impl FnOnce(&mut Session) -> Result<T, Error>,
) -> Result<T, Error> {
    let mut scope = ConnectionScope::open(config)?;
    match body(scope.session()) {
        Ok(value) => {
            scope.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(cleanup) = scope.rollback() {
                warn!(error = %cleanup, "rollback after failed scope body also failed");
            }
            Err(err)
        }
    }
}
