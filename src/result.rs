//! Own a raw result handle; expose row/column access and a forward cursor.

use std::ffi::CStr;

use libpq_sys::{ExecStatusType, PGresult};

use crate::error::{Error, Result};
use crate::value::{FieldConverter, FieldView, Format};

/// One column's descriptor: name, wire format, and Postgres type OID.
#[derive(Debug, Clone)]
pub struct ColumnDescriptor {
    pub name: String,
    pub format: Format,
    pub type_oid: u32,
}

/// Column metadata for a `PgResult`, built lazily on first access.
#[derive(Debug, Clone)]
pub struct Header {
    columns: Vec<ColumnDescriptor>,
}

impl Header {
    pub fn col_count(&self) -> usize {
        self.columns.len()
    }

    pub fn col_name(&self, col: usize) -> Option<&str> {
        self.columns.get(col).map(|c| c.name.as_str())
    }

    pub fn col_format(&self, col: usize) -> Format {
        self.columns
            .get(col)
            .map(|c| c.format)
            .unwrap_or(Format::Text)
    }

    pub fn col_type(&self, col: usize) -> Option<u32> {
        self.columns.get(col).map(|c| c.type_oid)
    }

    /// Linear scan, first match wins. Returns `Error::NotFound` if absent.
    pub fn col_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| Error::not_found(format!("column '{name}'")))
    }
}

/// Exclusive owner of one libpq result handle.
///
/// `PGresult*` is only ever touched from the task that owns the
/// `Connection` that produced it, so it is safe to move across await
/// points (`Send`) but never shared (`!Sync` is upheld by never handing
/// out `&PgResult` across threads concurrently with mutation — there is
/// none, since this type has no interior mutability beyond the lazily
/// cached header).
pub struct PgResult {
    raw: *mut PGresult,
    header: Option<Header>,
}

// Safety: `PGresult*` is heap-allocated by libpq and only read after
// creation; no other thread holds a reference to it once ownership moves
// here, since the query driver hands it off exactly once per `PgResult`.
unsafe impl Send for PgResult {}

impl PgResult {
    /// Takes ownership of a raw result handle returned by `PQgetResult`.
    ///
    /// # Safety
    /// `raw` must be a valid, non-null `PGresult*` that nothing else will
    /// free or read concurrently.
    pub(crate) unsafe fn from_raw(raw: *mut PGresult) -> Self {
        Self { raw, header: None }
    }

    pub fn status(&self) -> ExecStatusType {
        unsafe { libpq_sys::PQresultStatus(self.raw) }
    }

    pub fn is_succeed(&self) -> bool {
        matches!(
            self.status(),
            ExecStatusType::PGRES_COMMAND_OK | ExecStatusType::PGRES_TUPLES_OK
        )
    }

    pub fn error_message(&self) -> Option<String> {
        let ptr = unsafe { libpq_sys::PQresultErrorMessage(self.raw) };
        if ptr.is_null() {
            return None;
        }
        let msg = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
        if msg.is_empty() { None } else { Some(msg) }
    }

    pub fn row_count(&self) -> usize {
        unsafe { libpq_sys::PQntuples(self.raw) as usize }
    }

    pub fn col_count(&self) -> usize {
        unsafe { libpq_sys::PQnfields(self.raw) as usize }
    }

    pub fn is_null(&self, row: usize, col: usize) -> bool {
        unsafe { libpq_sys::PQgetisnull(self.raw, row as i32, col as i32) == 1 }
    }

    /// Raw bytes for one field. `PQgetvalue`'s length is authoritative
    /// (binary data may embed NUL bytes); `PQgetlength` gives the byte
    /// count rather than relying on a C-string scan.
    pub fn get_value(&self, row: usize, col: usize) -> &[u8] {
        unsafe {
            let ptr = libpq_sys::PQgetvalue(self.raw, row as i32, col as i32);
            let len = libpq_sys::PQgetlength(self.raw, row as i32, col as i32) as usize;
            if ptr.is_null() || len == 0 {
                &[]
            } else {
                std::slice::from_raw_parts(ptr as *const u8, len)
            }
        }
    }

    pub fn header(&mut self) -> &Header {
        if self.header.is_none() {
            let n = self.col_count();
            let mut columns = Vec::with_capacity(n);
            for i in 0..n {
                let name_ptr = unsafe { libpq_sys::PQfname(self.raw, i as i32) };
                let name = if name_ptr.is_null() {
                    String::new()
                } else {
                    unsafe { CStr::from_ptr(name_ptr) }
                        .to_string_lossy()
                        .into_owned()
                };
                let format = Format::from_i32(unsafe { libpq_sys::PQfformat(self.raw, i as i32) });
                let type_oid = unsafe { libpq_sys::PQftype(self.raw, i as i32) };
                columns.push(ColumnDescriptor {
                    name,
                    format,
                    type_oid,
                });
            }
            self.header = Some(Header { columns });
        }
        self.header.as_ref().unwrap()
    }

    /// Borrows one row for column access. Does not copy any field data.
    pub fn row(&mut self, row_num: usize) -> Row<'_> {
        // Force the header to be built before handing out the row so
        // `Row::get_by_name` never needs a `&mut self` reborrow.
        self.header();
        Row {
            result: self,
            row_num,
        }
    }

    /// A forward cursor over all rows in this result.
    pub fn rows(&mut self) -> RowIter<'_> {
        self.header();
        RowIter {
            result: self,
            next: 0,
        }
    }
}

impl Drop for PgResult {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            unsafe { libpq_sys::PQclear(self.raw) };
        }
    }
}

/// Borrows a single row out of a `PgResult`.
pub struct Row<'a> {
    result: &'a PgResult,
    row_num: usize,
}

impl<'a> Row<'a> {
    pub fn col_count(&self) -> usize {
        self.result.col_count()
    }

    pub fn is_null(&self, col: usize) -> bool {
        self.result.is_null(self.row_num, col)
    }

    pub fn field_view(&self, col: usize) -> FieldView<'a> {
        let format = self
            .result
            .header
            .as_ref()
            .map(|h| h.col_format(col))
            .unwrap_or(Format::Text);
        FieldView::new(self.result.get_value(self.row_num, col), format, self.is_null(col))
    }

    pub fn get<T: FieldConverter>(&self, col: usize) -> Result<T> {
        if col >= self.col_count() {
            return Err(Error::not_found(format!("column index {col}")));
        }
        let view = self.field_view(col);
        T::from_field(&view)
    }

    pub fn get_by_name<T: FieldConverter>(&self, name: &str) -> Result<T> {
        let col = self
            .result
            .header
            .as_ref()
            .expect("header built before Row is handed out")
            .col_index(name)?;
        self.get(col)
    }
}

/// A forward-only cursor over a `PgResult`'s rows.
pub struct RowIter<'a> {
    result: &'a PgResult,
    next: usize,
}

impl<'a> Iterator for RowIter<'a> {
    type Item = Row<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.result.row_count() {
            return None;
        }
        let row = Row {
            result: self.result,
            row_num: self.next,
        };
        self.next += 1;
        Some(row)
    }
}
