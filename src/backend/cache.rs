//! Purpose: Adapter for a distributed SQL-capable cache grid over its REST
//! query protocol (Ignite-compatible command set).
//! Exports: `CacheBackend`.
//! Role: The paginated backend variant: a cluster gateway handle plus lazy,
//! page-at-a-time row iteration.
//! Invariants: Each execute produces a single-pass stream; a second pass
//! means re-issuing the query.
//! Invariants: Abandoning a stream before its last page closes the
//! server-side cursor (best effort).
//! Invariants: The grid is non-transactional; commit and rollback are
//! accepted and do nothing so the adapter capability stays uniform.

use std::collections::VecDeque;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value as Json;
use tracing::{debug, info, warn};
use url::Url;

use super::{Backend, RowStream};
use crate::config::CacheConfig;
use crate::core::error::{Error, ErrorKind};
use crate::core::value::{Row, Value};

const NAME: &str = "cache";

const CMD_VERSION: &str = "version";
const CMD_QUERY_EXECUTE: &str = "qryfldexe";
const CMD_QUERY_FETCH: &str = "qryfetch";
const CMD_QUERY_CLOSE: &str = "qrycls";

pub struct CacheBackend {
    gateway: Option<Gateway>,
    default_page_size: usize,
}

impl CacheBackend {
    /// Connects to the grid gateway and probes it with a `version` command,
    /// so a dead cluster surfaces here rather than on the first query.
    pub fn open(config: &CacheConfig) -> Result<Self, Error> {
        let endpoint = Url::parse(&config.base_url()).map_err(|err| {
            Error::new(ErrorKind::Connect)
                .with_message(format!("invalid gateway address {}", config.base_url()))
                .with_backend(NAME)
                .with_source(err)
        })?;
        let agent = ureq::AgentBuilder::new()
            .timeout(config.request_timeout)
            .build();
        let gateway = Gateway {
            agent,
            endpoint,
            username: config.username.clone(),
            password: config.password.clone(),
            cache_name: config.cache_name.clone(),
        };

        let version: String = gateway
            .call(&[("cmd", CMD_VERSION.to_string())])
            .map_err(|err| {
                Error::new(ErrorKind::Connect)
                    .with_message("gateway probe failed")
                    .with_backend(NAME)
                    .with_source(err)
            })?;
        info!(host = %config.host, port = config.port, %version, "connected to cache grid");

        Ok(Self {
            gateway: Some(gateway),
            default_page_size: config.page_size,
        })
    }

    fn gateway(&self) -> Result<&Gateway, Error> {
        self.gateway.as_ref().ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message("backend is closed")
                .with_backend(NAME)
        })
    }
}

impl Backend for CacheBackend {
    fn execute<'c>(
        &'c mut self,
        query: &str,
        page_size: Option<usize>,
    ) -> Result<Box<dyn RowStream + 'c>, Error> {
        let page_size = page_size.unwrap_or(self.default_page_size);
        let gateway = self.gateway()?;
        debug!(query, page_size, "executing cache query");

        let mut params = vec![
            ("cmd", CMD_QUERY_EXECUTE.to_string()),
            ("pageSize", page_size.to_string()),
            ("qry", query.to_string()),
        ];
        if let Some(cache_name) = &gateway.cache_name {
            params.push(("cacheName", cache_name.clone()));
        }
        let first: QueryPage = gateway
            .call(&params)
            .map_err(|err| err.with_query(query))?;

        let mut stream = GridRows {
            gateway,
            page_size,
            buffered: VecDeque::new(),
            query_id: 0,
            last: false,
            released: false,
        };
        stream.absorb(first);
        Ok(Box::new(stream))
    }

    fn commit(&mut self) -> Result<(), Error> {
        debug!("commit is a no-op on the cache grid");
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), Error> {
        debug!("rollback is a no-op on the cache grid");
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        self.gateway = None;
        Ok(())
    }

    fn name(&self) -> &'static str {
        NAME
    }
}

struct Gateway {
    agent: ureq::Agent,
    endpoint: Url,
    username: Option<String>,
    password: Option<String>,
    cache_name: Option<String>,
}

impl Gateway {
    fn call<T: DeserializeOwned>(&self, params: &[(&str, String)]) -> Result<T, Error> {
        let mut url = self.endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
            if let Some(username) = &self.username {
                pairs.append_pair("user", username);
            }
            if let Some(password) = &self.password {
                pairs.append_pair("password", password);
            }
        }

        let response = match self.agent.request_url("GET", &url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                return Err(Error::new(ErrorKind::Query)
                    .with_message(format!("gateway returned status {code}: {body}"))
                    .with_backend(NAME));
            }
            Err(ureq::Error::Transport(err)) => {
                return Err(Error::new(ErrorKind::Io)
                    .with_message("gateway request failed")
                    .with_backend(NAME)
                    .with_source(err));
            }
        };

        let body = response.into_string().map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read gateway response")
                .with_backend(NAME)
                .with_source(err)
        })?;
        let envelope: RestEnvelope<T> = serde_json::from_str(&body).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("malformed gateway response")
                .with_backend(NAME)
                .with_source(err)
        })?;
        if envelope.success_status != 0 || envelope.error.is_some() {
            let message = envelope
                .error
                .unwrap_or_else(|| format!("command failed with status {}", envelope.success_status));
            return Err(Error::new(ErrorKind::Query)
                .with_message(message)
                .with_backend(NAME));
        }
        envelope.response.ok_or_else(|| {
            Error::new(ErrorKind::Io)
                .with_message("gateway response missing payload")
                .with_backend(NAME)
        })
    }
}

#[derive(Deserialize)]
struct RestEnvelope<T> {
    #[serde(rename = "successStatus")]
    success_status: i64,
    #[serde(default)]
    error: Option<String>,
    response: Option<T>,
}

#[derive(Deserialize)]
struct QueryPage {
    items: Vec<Vec<Json>>,
    last: bool,
    #[serde(rename = "queryId")]
    query_id: i64,
}

/// Lazy row stream over a server-side cursor. Pages are pulled on demand;
/// the final page retires the cursor on the server.
struct GridRows<'c> {
    gateway: &'c Gateway,
    page_size: usize,
    buffered: VecDeque<Row>,
    query_id: i64,
    last: bool,
    released: bool,
}

impl GridRows<'_> {
    fn absorb(&mut self, page: QueryPage) {
        self.query_id = page.query_id;
        self.last = page.last;
        for item in page.items {
            self.buffered.push_back(row_from_wire(item));
        }
    }
}

impl RowStream for GridRows<'_> {
    fn next_row(&mut self) -> Result<Option<Row>, Error> {
        loop {
            if let Some(row) = self.buffered.pop_front() {
                return Ok(Some(row));
            }
            if self.last {
                // the grid retires the cursor with its last page
                self.released = true;
                return Ok(None);
            }
            let page: QueryPage = self.gateway.call(&[
                ("cmd", CMD_QUERY_FETCH.to_string()),
                ("qryId", self.query_id.to_string()),
                ("pageSize", self.page_size.to_string()),
            ])?;
            self.absorb(page);
        }
    }
}

impl Drop for GridRows<'_> {
    fn drop(&mut self) {
        if self.released || self.last {
            return;
        }
        let result: Result<Json, Error> = self.gateway.call(&[
            ("cmd", CMD_QUERY_CLOSE.to_string()),
            ("qryId", self.query_id.to_string()),
        ]);
        if let Err(err) = result {
            warn!(query_id = self.query_id, error = %err, "failed to close abandoned cursor");
        }
    }
}

fn row_from_wire(cells: Vec<Json>) -> Row {
    cells.into_iter().map(value_from_wire).collect()
}

fn value_from_wire(cell: Json) -> Value {
    match cell {
        Json::Null => Value::Null,
        Json::Bool(value) => Value::Bool(value),
        Json::Number(number) => {
            if let Some(value) = number.as_i64() {
                Value::Integer(value)
            } else {
                Value::Real(number.as_f64().unwrap_or(f64::NAN))
            }
        }
        Json::String(value) => Value::Text(value),
        Json::Array(items) => match byte_array(&items) {
            Some(bytes) => Value::Blob(bytes),
            None => Value::Text(Json::Array(items).to_string()),
        },
        object @ Json::Object(_) => Value::Text(object.to_string()),
    }
}

/// The wire format has no binary column representation; byte columns arrive
/// as arrays of small integers.
fn byte_array(items: &[Json]) -> Option<Vec<u8>> {
    items
        .iter()
        .map(|item| {
            item.as_i64()
                .filter(|value| (0..=255).contains(value))
                .map(|value| value as u8)
        })
        .collect()
}
