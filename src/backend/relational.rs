//! Purpose: Relational adapter over an embedded SQLite database.
//! Exports: `RelationalBackend`.
//! Role: The default backend variant: one connection, one implicit
//! transaction, synchronous execute-then-fetch.
//! Invariants: A deferred transaction is opened on connect and ended exactly
//! once by commit or rollback; close always releases the connection.
//! Invariants: Text is UTF-8 throughout (SQLite's native encoding).

use rusqlite::Connection;
use rusqlite::types::ValueRef;
use tracing::{debug, info};

use super::{Backend, RowStream};
use crate::config::RelationalConfig;
use crate::core::error::{Error, ErrorKind};
use crate::core::value::{Row, Value};

const NAME: &str = "relational";

pub struct RelationalBackend {
    conn: Option<Connection>,
    tx_open: bool,
}

impl RelationalBackend {
    pub fn open(config: &RelationalConfig) -> Result<Self, Error> {
        let conn = Connection::open(&config.path).map_err(|err| {
            Error::new(ErrorKind::Connect)
                .with_message(format!("failed to open database at {}", config.path))
                .with_backend(NAME)
                .with_source(err)
        })?;
        conn.execute_batch("BEGIN").map_err(|err| {
            Error::new(ErrorKind::Connect)
                .with_message("failed to begin transaction")
                .with_backend(NAME)
                .with_source(err)
        })?;
        info!(path = %config.path, "opened relational backend");
        Ok(Self {
            conn: Some(conn),
            tx_open: true,
        })
    }

    fn conn(&self) -> Result<&Connection, Error> {
        self.conn.as_ref().ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message("backend is closed")
                .with_backend(NAME)
        })
    }

    fn end_transaction(&mut self, statement: &str) -> Result<(), Error> {
        if !self.tx_open {
            return Ok(());
        }
        self.tx_open = false;
        self.conn()?.execute_batch(statement).map_err(|err| {
            Error::new(ErrorKind::Query)
                .with_message(format!("failed to {}", statement.to_lowercase()))
                .with_backend(NAME)
                .with_source(err)
        })
    }
}

impl Backend for RelationalBackend {
    fn execute<'c>(
        &'c mut self,
        query: &str,
        _page_size: Option<usize>,
    ) -> Result<Box<dyn RowStream + 'c>, Error> {
        let conn = self.conn()?;
        debug!(query, "executing relational query");
        let query_err = |err: rusqlite::Error| {
            Error::new(ErrorKind::Query)
                .with_message(err.to_string())
                .with_backend(NAME)
                .with_query(query)
        };

        let mut stmt = conn.prepare(query).map_err(query_err)?;
        let column_count = stmt.column_count();
        let mut rows = stmt.query([]).map_err(query_err)?;
        let mut buffered = Vec::new();
        while let Some(row) = rows.next().map_err(query_err)? {
            let mut out = Row::with_capacity(column_count);
            for index in 0..column_count {
                let cell = row.get_ref(index).map_err(query_err)?;
                out.push(value_from_cell(cell)?);
            }
            buffered.push(out);
        }
        Ok(Box::new(BufferedRows {
            rows: buffered.into_iter(),
        }))
    }

    fn commit(&mut self) -> Result<(), Error> {
        self.end_transaction("COMMIT")
    }

    fn rollback(&mut self) -> Result<(), Error> {
        self.end_transaction("ROLLBACK")
    }

    fn close(&mut self) -> Result<(), Error> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        self.tx_open = false;
        conn.close().map_err(|(_, err)| {
            Error::new(ErrorKind::Io)
                .with_message("failed to close connection")
                .with_backend(NAME)
                .with_source(err)
        })
    }

    fn name(&self) -> &'static str {
        NAME
    }
}

/// Relational results are buffered in full at execute time; iteration is a
/// drain over the buffer.
struct BufferedRows {
    rows: std::vec::IntoIter<Row>,
}

impl RowStream for BufferedRows {
    fn next_row(&mut self) -> Result<Option<Row>, Error> {
        Ok(self.rows.next())
    }
}

fn value_from_cell(cell: ValueRef<'_>) -> Result<Value, Error> {
    match cell {
        ValueRef::Null => Ok(Value::Null),
        ValueRef::Integer(value) => Ok(Value::Integer(value)),
        ValueRef::Real(value) => Ok(Value::Real(value)),
        ValueRef::Text(bytes) => {
            let text = std::str::from_utf8(bytes).map_err(|err| {
                Error::new(ErrorKind::Decode)
                    .with_message("text cell is not valid utf-8")
                    .with_backend(NAME)
                    .with_source(err)
            })?;
            Ok(Value::Text(text.to_string()))
        }
        ValueRef::Blob(bytes) => Ok(Value::Blob(bytes.to_vec())),
    }
}
