//! Bind a SQL text plus positional parameters into a form libpq's
//! parameterized-send call accepts: a command string plus a vector of
//! bound `Field`s, with cached pointer/length/format arrays so
//! `PQsendQueryParams` can be called without re-walking the parameter list
//! each retry.

use std::ffi::CString;

use crate::value::{AbstractField, Field, FieldConverter};

/// A SQL command plus its bound positional parameters.
///
/// Immutable once constructed; may be submitted to a connection more than
/// once.
#[derive(Debug, Clone)]
pub struct Query {
    cmd: CString,
    params: Vec<Field>,
}

impl Query {
    /// Builds a query with no parameters.
    pub fn new(cmd: impl Into<String>) -> Self {
        let cmd = CString::new(cmd.into()).unwrap_or_else(|e| {
            // A SQL string can't legitimately contain a NUL; fall back to
            // the valid prefix rather than panicking on malformed input.
            let valid_up_to = e.nul_position();
            CString::new(e.into_vec()[..valid_up_to].to_vec()).unwrap()
        });
        Self {
            cmd,
            params: Vec::new(),
        }
    }

    /// Builds a query with positional parameters bound through the
    /// converter layer.
    pub fn with_params(cmd: impl Into<String>, params: Vec<Field>) -> Self {
        let mut q = Self::new(cmd);
        q.params = params;
        q
    }

    /// Binds a single value, converting it through `FieldConverter`.
    pub fn bind<T: FieldConverter>(mut self, value: &T) -> Self {
        self.params.push(value.to_field());
        self
    }

    pub fn command_cstr(&self) -> &CString {
        &self.cmd
    }

    pub fn params(&self) -> &[Field] {
        &self.params
    }

    /// Builds the raw pointer/length/format arrays `PQsendQueryParams`
    /// expects. Null parameters render a null pointer with length 0, which
    /// is how libpq represents SQL NULL for a bound parameter. For a
    /// text-format field, `field.data()` is one byte short of the storage
    /// libpq actually reads from — the byte immediately past the slice is
    /// `Field`'s trailing NUL, which is what makes the pointer valid for
    /// libpq's C-string read.
    pub fn raw_params(&self) -> RawParams<'_> {
        let mut values: Vec<*const libc::c_char> = Vec::with_capacity(self.params.len());
        let mut lengths: Vec<i32> = Vec::with_capacity(self.params.len());
        let mut formats: Vec<i32> = Vec::with_capacity(self.params.len());

        for field in &self.params {
            if field.is_null() {
                values.push(std::ptr::null());
                lengths.push(0);
            } else {
                values.push(field.data().as_ptr() as *const libc::c_char);
                lengths.push(field.data().len() as i32);
            }
            formats.push(field.format().as_i32());
        }

        RawParams {
            values,
            lengths,
            formats,
            _params: &self.params,
        }
    }
}

/// Carries the raw pointer arrays for one `PQsendQueryParams` call.
///
/// Borrowed from the `Query`'s parameter storage, so the pointers inside
/// remain valid as long as this value lives alongside the `Query`.
pub struct RawParams<'a> {
    values: Vec<*const libc::c_char>,
    lengths: Vec<i32>,
    formats: Vec<i32>,
    _params: &'a [Field],
}

impl<'a> RawParams<'a> {
    pub fn len(&self) -> i32 {
        self.values.len() as i32
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values_ptr(&self) -> *const *const libc::c_char {
        if self.values.is_empty() {
            std::ptr::null()
        } else {
            self.values.as_ptr()
        }
    }

    pub fn lengths_ptr(&self) -> *const i32 {
        if self.lengths.is_empty() {
            std::ptr::null()
        } else {
            self.lengths.as_ptr()
        }
    }

    pub fn formats_ptr(&self) -> *const i32 {
        if self.formats.is_empty() {
            std::ptr::null()
        } else {
            self.formats.as_ptr()
        }
    }
}

/// Helper used by `Connection::query(sql, params...)`; converts a tuple of
/// heterogeneous bindable values into a `Vec<Field>`.
pub trait BindParams {
    fn into_fields(self) -> Vec<Field>;
}

impl BindParams for () {
    fn into_fields(self) -> Vec<Field> {
        Vec::new()
    }
}

macro_rules! impl_bind_params_tuple {
    ($($name:ident),+) => {
        impl<$($name: FieldConverter),+> BindParams for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_fields(self) -> Vec<Field> {
                let ($($name,)+) = self;
                vec![$($name.to_field()),+]
            }
        }
    };
}

impl_bind_params_tuple!(A);
impl_bind_params_tuple!(A, B);
impl_bind_params_tuple!(A, B, C);
impl_bind_params_tuple!(A, B, C, D);
impl_bind_params_tuple!(A, B, C, D, E);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_without_params_has_empty_raw_arrays() {
        let q = Query::new("SELECT 1");
        let raw = q.raw_params();
        assert_eq!(raw.len(), 0);
        assert!(raw.values_ptr().is_null());
    }

    #[test]
    fn bind_appends_parameters_in_order() {
        let q = Query::new("SELECT $1::int, $2::text")
            .bind(&42i32)
            .bind(&"hi".to_string());
        assert_eq!(q.params().len(), 2);
        let raw = q.raw_params();
        assert_eq!(raw.len(), 2);
    }

    #[test]
    fn null_parameter_renders_null_pointer() {
        let none: Option<i32> = None;
        let q = Query::new("SELECT $1::int").bind(&none);
        let raw = q.raw_params();
        assert!(unsafe { *raw.values_ptr() }.is_null());
    }

    #[test]
    fn query_is_clonable_and_reusable() {
        let q = Query::new("SELECT $1::int").bind(&1i32);
        let q2 = q.clone();
        assert_eq!(q.params().len(), q2.params().len());
    }
}
