//! Purpose: Large-object handles and the compressed-JSON payload decoder.
//! Exports: `Lob`, `inflate`, `decode_json`.
//! Role: Turns raw LOB cells into bytes and decoded JSON documents.
//! Invariants: A `Lob` yields its bytes exactly once (stream semantics);
//! re-reading is a usage error, never stale data.
//! Invariants: `inflate` accepts both gzip-framed and raw-zlib deflate
//! streams, detected from the leading magic bytes.

use std::io::Read;

use flate2::read::{GzDecoder, ZlibDecoder};
use serde_json::Value as Json;

use crate::core::error::{Error, ErrorKind};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Read-once handle over one LOB cell.
///
/// Driver-level LOB locators are single-pass streams; this handle keeps that
/// contract after the row has been detached from its cursor.
#[derive(Debug)]
pub struct Lob {
    bytes: Option<Vec<u8>>,
}

impl Lob {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self { bytes: Some(bytes) }
    }

    pub fn len(&self) -> usize {
        self.bytes.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_consumed(&self) -> bool {
        self.bytes.is_none()
    }

    /// Takes the payload out of the handle. The second and every later call
    /// fails with `ErrorKind::Usage`.
    pub fn read(&mut self) -> Result<Vec<u8>, Error> {
        self.bytes
            .take()
            .ok_or_else(|| Error::new(ErrorKind::Usage).with_message("lob already consumed"))
    }
}

/// Decompresses a deflate stream, auto-detecting gzip vs. raw-zlib framing.
pub fn inflate(data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    let result = if data.starts_with(&GZIP_MAGIC) {
        GzDecoder::new(data).read_to_end(&mut out)
    } else {
        ZlibDecoder::new(data).read_to_end(&mut out)
    };
    result.map_err(|err| {
        Error::new(ErrorKind::Decode)
            .with_message("malformed compressed stream")
            .with_source(err)
    })?;
    Ok(out)
}

/// Inflates a compressed LOB payload and parses it as a UTF-8 JSON document.
pub fn decode_json(data: &[u8]) -> Result<Json, Error> {
    let inflated = inflate(data)?;
    let text = String::from_utf8(inflated).map_err(|err| {
        Error::new(ErrorKind::Decode)
            .with_message("payload is not valid utf-8")
            .with_source(err)
    })?;
    serde_json::from_str(&text).map_err(|err| {
        Error::new(ErrorKind::Decode)
            .with_message("payload is not valid json")
            .with_source(err)
    })
}
