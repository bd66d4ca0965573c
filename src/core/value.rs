//! Purpose: Scalar value and row types shared by every backend adapter.
//! Exports: `Value`, `Row`.
//! Role: The single result shape the query layer is written against.
//! Invariants: Both adapters project their native rows into `Row` losslessly
//! for NULL, integer, real, text, and blob cells.
//! Invariants: `Value` is hashable so it can key dictionary projections;
//! reals compare and hash by bit pattern.

use std::fmt;
use std::hash::{Hash, Hasher};

/// One row of a result set, in backend-native column order.
pub type Row = Vec<Value>;

#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True for NULL, empty text, and empty blob cells. Mirrors the truthiness
    /// test the absent-sentinel operations apply to LOB cells.
    pub fn is_empty_cell(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(text) => text.is_empty(),
            Value::Blob(bytes) => bytes.is_empty(),
            _ => false,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Real(value) => Some(*value),
            Value::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(value) => Some(value),
            _ => None,
        }
    }

    /// Raw bytes of a LOB-bearing cell: blob cells verbatim, text cells as
    /// their UTF-8 bytes. `None` for every other variant.
    pub fn lob_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Value::Blob(bytes) => Some(bytes.clone()),
            Value::Text(text) => Some(text.clone().into_bytes()),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Real(a), Value::Real(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Blob(a), Value::Blob(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => 0u8.hash(state),
            Value::Bool(value) => {
                1u8.hash(state);
                value.hash(state);
            }
            Value::Integer(value) => {
                2u8.hash(state);
                value.hash(state);
            }
            Value::Real(value) => {
                3u8.hash(state);
                value.to_bits().hash(state);
            }
            Value::Text(value) => {
                4u8.hash(state);
                value.hash(state);
            }
            Value::Blob(value) => {
                5u8.hash(state);
                value.hash(state);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Integer(value) => write!(f, "{value}"),
            Value::Real(value) => write!(f, "{value}"),
            Value::Text(value) => write!(f, "{value}"),
            Value::Blob(value) => write!(f, "<blob {} bytes>", value.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}
