//! Purpose: Backend-agnostic query primitives for test code.
//! Exports: `Session`, `PagedSession`.
//! Role: The one query surface written against the adapter capability;
//! every backend variant gets these operations for free.
//! Invariants: Empty result sets are sentinels (`None`, empty collections),
//! never errors; every backend failure propagates unmodified.
//! Invariants: Queries pass through verbatim in the backend's native
//! dialect; nothing here validates syntax or column counts.

use std::collections::HashMap;

use serde_json::Value as Json;
use tracing::debug;

use crate::backend::Backend;
use crate::core::error::{Error, ErrorKind};
use crate::core::lob::{self, Lob};
use crate::core::value::{Row, Value};

/// One live adapter plus the query operations over it.
///
/// A session is single-flight: operations share the adapter's one cursor
/// and must not be interleaved. It is created and torn down by
/// [`ConnectionScope`](crate::scope::ConnectionScope).
pub struct Session {
    backend: Box<dyn Backend>,
}

impl Session {
    pub(crate) fn new(backend: Box<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// View of this session with an explicit page-size hint. The hint bounds
    /// rows buffered per round-trip on the cache backend; the relational
    /// backend ignores it.
    pub fn paged(&mut self, page_size: usize) -> PagedSession<'_> {
        PagedSession {
            session: self,
            page_size,
        }
    }

    /// First column of every row.
    pub fn get_list(&mut self, query: &str) -> Result<Vec<Value>, Error> {
        self.get_list_hint(query, None)
    }

    /// Two-column query projected as a map of column 0 to column 1.
    ///
    /// The query is expected to project exactly two columns; this is a
    /// caller contract, not something the session validates. Duplicate keys
    /// resolve last-write-wins.
    pub fn get_dict(&mut self, query: &str) -> Result<HashMap<Value, Value>, Error> {
        self.get_dict_hint(query, None)
    }

    /// Every row, every column, unprojected.
    pub fn select_all(&mut self, query: &str) -> Result<Vec<Row>, Error> {
        self.select_all_hint(query, None)
    }

    /// Column 0 of row 0, or `None` when the result set is empty.
    pub fn get_first_value(&mut self, query: &str) -> Result<Option<Value>, Error> {
        self.get_first_value_hint(query, None)
    }

    /// Row 0 unprojected, or `None` when the result set is empty.
    pub fn get_first_row(&mut self, query: &str) -> Result<Option<Row>, Error> {
        self.get_first_row_hint(query, None)
    }

    /// One LOB handle per row (column 0), or `None` when the result set is
    /// empty.
    pub fn get_lob_list(&mut self, query: &str) -> Result<Option<Vec<Lob>>, Error> {
        self.get_lob_list_hint(query, None)
    }

    /// Bytes of the single LOB cell the query projects.
    ///
    /// Returns `None` both when the result set is empty and when the cell
    /// itself is NULL or empty; the two conditions are deliberately
    /// collapsed into one sentinel for compatibility with existing callers.
    pub fn get_waited_lob_data(&mut self, query: &str) -> Result<Option<Vec<u8>>, Error> {
        self.get_waited_lob_data_hint(query, None)
    }

    /// Decompresses and JSON-decodes the LOB payload the query projects.
    ///
    /// Unlike [`get_waited_lob_data`](Session::get_waited_lob_data), an
    /// absent payload here is a contract violation and fails with
    /// [`ErrorKind::Assertion`]; decompression and parse failures surface
    /// as [`ErrorKind::Decode`].
    pub fn bytes_into_json(&mut self, query: &str) -> Result<Json, Error> {
        self.bytes_into_json_hint(query, None)
    }

    fn get_list_hint(&mut self, query: &str, hint: Option<usize>) -> Result<Vec<Value>, Error> {
        let rows = self.fetch_all(query, hint)?;
        Ok(rows
            .into_iter()
            .map(|mut row| first_cell(&mut row))
            .collect())
    }

    fn get_dict_hint(
        &mut self,
        query: &str,
        hint: Option<usize>,
    ) -> Result<HashMap<Value, Value>, Error> {
        let rows = self.fetch_all(query, hint)?;
        let mut dict = HashMap::with_capacity(rows.len());
        for row in rows {
            let mut cells = row.into_iter();
            let key = cells.next().unwrap_or(Value::Null);
            let value = cells.next().unwrap_or(Value::Null);
            dict.insert(key, value);
        }
        Ok(dict)
    }

    fn select_all_hint(&mut self, query: &str, hint: Option<usize>) -> Result<Vec<Row>, Error> {
        self.fetch_all(query, hint)
    }

    fn get_first_value_hint(
        &mut self,
        query: &str,
        hint: Option<usize>,
    ) -> Result<Option<Value>, Error> {
        Ok(self
            .fetch_first(query, hint)?
            .map(|mut row| first_cell(&mut row)))
    }

    fn get_first_row_hint(
        &mut self,
        query: &str,
        hint: Option<usize>,
    ) -> Result<Option<Row>, Error> {
        self.fetch_first(query, hint)
    }

    fn get_lob_list_hint(
        &mut self,
        query: &str,
        hint: Option<usize>,
    ) -> Result<Option<Vec<Lob>>, Error> {
        let rows = self.fetch_all(query, hint)?;
        if rows.is_empty() {
            return Ok(None);
        }
        let mut lobs = Vec::with_capacity(rows.len());
        for mut row in rows {
            let cell = first_cell(&mut row);
            lobs.push(Lob::new(cell.lob_bytes().unwrap_or_default()));
        }
        Ok(Some(lobs))
    }

    fn get_waited_lob_data_hint(
        &mut self,
        query: &str,
        hint: Option<usize>,
    ) -> Result<Option<Vec<u8>>, Error> {
        let rows = self.fetch_all(query, hint)?;
        let Some(mut row) = rows.into_iter().next() else {
            return Ok(None);
        };
        let cell = first_cell(&mut row);
        if cell.is_empty_cell() {
            return Ok(None);
        }
        match cell.lob_bytes() {
            Some(bytes) => Ok(Some(bytes)),
            None => Err(Error::new(ErrorKind::Usage)
                .with_message("column 0 is not a LOB cell")
                .with_backend(self.backend.name())
                .with_query(query)),
        }
    }

    fn bytes_into_json_hint(&mut self, query: &str, hint: Option<usize>) -> Result<Json, Error> {
        let data = self.get_waited_lob_data_hint(query, hint)?.ok_or_else(|| {
            Error::new(ErrorKind::Assertion)
                .with_message("got an empty value on fetch")
                .with_backend(self.backend.name())
                .with_query(query)
        })?;
        lob::decode_json(&data)
    }

    fn fetch_all(&mut self, query: &str, hint: Option<usize>) -> Result<Vec<Row>, Error> {
        debug!(query, backend = self.backend.name(), "fetch all");
        self.backend.execute(query, hint)?.fetch_all()
    }

    fn fetch_first(&mut self, query: &str, hint: Option<usize>) -> Result<Option<Row>, Error> {
        debug!(query, backend = self.backend.name(), "fetch first");
        self.backend.execute(query, hint)?.next_row()
    }

    pub(crate) fn commit(&mut self) -> Result<(), Error> {
        self.backend.commit()
    }

    pub(crate) fn rollback(&mut self) -> Result<(), Error> {
        self.backend.rollback()
    }

    pub(crate) fn close(&mut self) -> Result<(), Error> {
        self.backend.close()
    }
}

/// A [`Session`] view carrying an explicit page-size hint.
pub struct PagedSession<'a> {
    session: &'a mut Session,
    page_size: usize,
}

impl PagedSession<'_> {
    pub fn get_list(&mut self, query: &str) -> Result<Vec<Value>, Error> {
        self.session.get_list_hint(query, Some(self.page_size))
    }

    pub fn get_dict(&mut self, query: &str) -> Result<HashMap<Value, Value>, Error> {
        self.session.get_dict_hint(query, Some(self.page_size))
    }

    pub fn select_all(&mut self, query: &str) -> Result<Vec<Row>, Error> {
        self.session.select_all_hint(query, Some(self.page_size))
    }

    pub fn get_first_value(&mut self, query: &str) -> Result<Option<Value>, Error> {
        self.session.get_first_value_hint(query, Some(self.page_size))
    }

    pub fn get_first_row(&mut self, query: &str) -> Result<Option<Row>, Error> {
        self.session.get_first_row_hint(query, Some(self.page_size))
    }

    pub fn get_lob_list(&mut self, query: &str) -> Result<Option<Vec<Lob>>, Error> {
        self.session.get_lob_list_hint(query, Some(self.page_size))
    }

    pub fn get_waited_lob_data(&mut self, query: &str) -> Result<Option<Vec<u8>>, Error> {
        self.session
            .get_waited_lob_data_hint(query, Some(self.page_size))
    }

    pub fn bytes_into_json(&mut self, query: &str) -> Result<Json, Error> {
        self.session.bytes_into_json_hint(query, Some(self.page_size))
    }
}

fn first_cell(row: &mut Row) -> Value {
    if row.is_empty() {
        Value::Null
    } else {
        row.swap_remove(0)
    }
}

#[cfg(test)]
mod tests {
    use super::Session;
    use crate::backend::relational::RelationalBackend;
    use crate::config::RelationalConfig;
    use crate::core::error::ErrorKind;
    use crate::core::value::Value;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use serde_json::json;
    use std::io::Write;

    fn session() -> Session {
        let backend = RelationalBackend::open(&RelationalConfig::default()).expect("open");
        Session::new(Box::new(backend))
    }

    fn seeded() -> Session {
        let mut session = session();
        session
            .select_all("create table t (id integer, name text)")
            .expect("create");
        session
            .select_all("insert into t values (1, 'a'), (2, 'b'), (1, 'c')")
            .expect("insert");
        session
    }

    #[test]
    fn get_list_projects_first_column_in_order() {
        let mut session = seeded();
        let list = session.get_list("select id, name from t").expect("list");
        assert_eq!(
            list,
            vec![Value::Integer(1), Value::Integer(2), Value::Integer(1)]
        );
    }

    #[test]
    fn get_dict_last_write_wins_on_duplicate_keys() {
        let mut session = seeded();
        let dict = session.get_dict("select id, name from t").expect("dict");
        assert_eq!(dict.len(), 2);
        assert_eq!(dict[&Value::Integer(1)], Value::from("c"));
        assert_eq!(dict[&Value::Integer(2)], Value::from("b"));
    }

    #[test]
    fn select_all_is_an_unprojected_passthrough() {
        let mut session = seeded();
        let rows = session.select_all("select id, name from t").expect("rows");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].len(), 2);
        assert_eq!(rows[2], vec![Value::Integer(1), Value::from("c")]);
    }

    #[test]
    fn empty_results_are_sentinels_not_errors() {
        let mut session = seeded();
        let none = "select id, name from t where id = 99";
        assert!(session.get_list(none).expect("list").is_empty());
        assert!(session.get_dict(none).expect("dict").is_empty());
        assert!(session.select_all(none).expect("rows").is_empty());
        assert_eq!(session.get_first_value(none).expect("value"), None);
        assert!(session.get_first_row(none).expect("row").is_none());
        assert!(session.get_lob_list(none).expect("lobs").is_none());
        assert!(session.get_waited_lob_data(none).expect("data").is_none());
    }

    #[test]
    fn get_first_value_and_row() {
        let mut session = seeded();
        assert_eq!(
            session
                .get_first_value("select name from t order by id desc")
                .expect("value"),
            Some(Value::from("b"))
        );
        assert_eq!(
            session
                .get_first_row("select id, name from t order by id")
                .expect("row"),
            Some(vec![Value::Integer(1), Value::from("a")])
        );
    }

    #[test]
    fn lob_list_reads_each_cell_once() {
        let mut session = seeded();
        session
            .select_all("create table payloads (body blob)")
            .expect("create");
        session
            .select_all("insert into payloads values (x'0102'), (x'03')")
            .expect("insert");
        let mut lobs = session
            .get_lob_list("select body from payloads")
            .expect("lobs")
            .expect("non-empty");
        assert_eq!(lobs.len(), 2);
        assert_eq!(lobs[0].read().expect("read"), vec![1, 2]);
        assert_eq!(
            lobs[0].read().expect_err("read-once").kind(),
            ErrorKind::Usage
        );
    }

    #[test]
    fn waited_lob_data_collapses_empty_row_and_empty_cell() {
        let mut session = seeded();
        session
            .select_all("create table payloads (body blob)")
            .expect("create");
        assert!(
            session
                .get_waited_lob_data("select body from payloads")
                .expect("no rows")
                .is_none()
        );
        session
            .select_all("insert into payloads values (null)")
            .expect("insert");
        assert!(
            session
                .get_waited_lob_data("select body from payloads")
                .expect("null cell")
                .is_none()
        );
    }

    #[test]
    fn bytes_into_json_decodes_and_asserts_presence() {
        let mut session = seeded();
        session
            .select_all("create table payloads (body blob)")
            .expect("create");

        let err = session
            .bytes_into_json("select body from payloads")
            .expect_err("absent payload");
        assert_eq!(err.kind(), ErrorKind::Assertion);

        let doc = json!({"suite": "smoke", "passed": 12});
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(doc.to_string().as_bytes())
            .expect("compress");
        let bytes = encoder.finish().expect("finish");
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        session
            .select_all(&format!("insert into payloads values (x'{hex}')"))
            .expect("insert");

        let decoded = session
            .bytes_into_json("select body from payloads")
            .expect("decode");
        assert_eq!(decoded, doc);
    }

    #[test]
    fn query_failures_propagate_unmodified() {
        let mut session = seeded();
        let err = session
            .get_list("select nothing from nowhere")
            .expect_err("bad query");
        assert_eq!(err.kind(), ErrorKind::Query);
    }
}
