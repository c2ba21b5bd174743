//! Row/column value conversion layer: maps a raw byte slice plus a
//! text/binary format tag to a native value and back. `Query::bind` and
//! `Row::get` both need this to do anything useful, so it ships in-core
//! rather than as a separate crate.

use crate::error::{Error, Result};

/// Wire format tag for a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Binary,
}

impl Format {
    pub fn as_i32(self) -> i32 {
        match self {
            Format::Text => 0,
            Format::Binary => 1,
        }
    }

    pub fn from_i32(raw: i32) -> Self {
        if raw == 1 { Format::Binary } else { Format::Text }
    }
}

/// The abstract `{data, size, format, null}` contract both `Field` and
/// `FieldView` satisfy.
pub trait AbstractField {
    fn data(&self) -> &[u8];
    fn format(&self) -> Format;
    fn is_null(&self) -> bool;
}

/// Owned byte storage plus format tag plus null flag.
#[derive(Debug, Clone)]
pub struct Field {
    storage: Vec<u8>,
    format: Format,
    null: bool,
}

impl Field {
    /// `PQsendQueryParams` ignores `paramLengths` for text-format
    /// parameters and reads `paramValues[i]` as a plain C string up to the
    /// first NUL, so text storage always carries a trailing zero byte that
    /// `data()` reports as one byte short of `storage`'s own length.
    /// Binary-format storage has no such sentinel; its length is exact.
    pub fn new(data: &[u8], format: Format) -> Self {
        let mut storage = Vec::with_capacity(data.len() + matches!(format, Format::Text) as usize);
        storage.extend_from_slice(data);
        if matches!(format, Format::Text) {
            storage.push(0);
        }
        Self {
            storage,
            format,
            null: false,
        }
    }

    pub fn null() -> Self {
        Self {
            storage: Vec::new(),
            format: Format::Text,
            null: true,
        }
    }
}

impl AbstractField for Field {
    fn data(&self) -> &[u8] {
        match self.format {
            Format::Text if !self.storage.is_empty() => &self.storage[..self.storage.len() - 1],
            _ => &self.storage,
        }
    }

    fn format(&self) -> Format {
        self.format
    }

    fn is_null(&self) -> bool {
        self.null
    }
}

/// The borrowing variant: a pointer into a `PgResult` plus the same
/// metadata. Used by `Row::get` so reading a value never copies it.
#[derive(Debug, Clone, Copy)]
pub struct FieldView<'a> {
    data: &'a [u8],
    format: Format,
    null: bool,
}

impl<'a> FieldView<'a> {
    pub fn new(data: &'a [u8], format: Format, null: bool) -> Self {
        Self { data, format, null }
    }
}

impl<'a> AbstractField for FieldView<'a> {
    fn data(&self) -> &[u8] {
        self.data
    }

    fn format(&self) -> Format {
        self.format
    }

    fn is_null(&self) -> bool {
        self.null
    }
}

/// Converts between a native Rust value and the wire field representation.
/// One implementation per scalar type.
pub trait FieldConverter: Sized {
    fn to_field(&self) -> Field;
    fn from_field(field: &dyn AbstractField) -> Result<Self>;
}

macro_rules! impl_int_converter {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl FieldConverter for $ty {
                fn to_field(&self) -> Field {
                    Field::new(self.to_string().as_bytes(), Format::Text)
                }

                fn from_field(field: &dyn AbstractField) -> Result<Self> {
                    if field.is_null() {
                        return Err(Error::not_found("value is null"));
                    }
                    let text = std::str::from_utf8(field.data())
                        .map_err(|e| Error::query_failed(e.to_string()))?;
                    text.trim()
                        .parse::<$ty>()
                        .map_err(|e| Error::query_failed(e.to_string()))
                }
            }
        )+
    };
}

impl_int_converter!(i16, i32, i64, u32, u64, f32, f64);

impl FieldConverter for bool {
    fn to_field(&self) -> Field {
        Field::new(if *self { b"t" } else { b"f" }, Format::Text)
    }

    fn from_field(field: &dyn AbstractField) -> Result<Self> {
        if field.is_null() {
            return Err(Error::not_found("value is null"));
        }
        match field.data() {
            b"t" | b"true" | b"1" => Ok(true),
            b"f" | b"false" | b"0" => Ok(false),
            other => Err(Error::query_failed(format!(
                "not a boolean: {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }
}

impl FieldConverter for String {
    fn to_field(&self) -> Field {
        Field::new(self.as_bytes(), Format::Text)
    }

    fn from_field(field: &dyn AbstractField) -> Result<Self> {
        if field.is_null() {
            return Err(Error::not_found("value is null"));
        }
        Ok(String::from_utf8_lossy(field.data()).into_owned())
    }
}

impl FieldConverter for Vec<u8> {
    fn to_field(&self) -> Field {
        Field::new(self, Format::Binary)
    }

    fn from_field(field: &dyn AbstractField) -> Result<Self> {
        if field.is_null() {
            return Err(Error::not_found("value is null"));
        }
        Ok(field.data().to_vec())
    }
}

impl FieldConverter for serde_json::Value {
    fn to_field(&self) -> Field {
        Field::new(self.to_string().as_bytes(), Format::Text)
    }

    fn from_field(field: &dyn AbstractField) -> Result<Self> {
        if field.is_null() {
            return Err(Error::not_found("value is null"));
        }
        serde_json::from_slice(field.data()).map_err(Error::from)
    }
}

impl<T: FieldConverter> FieldConverter for Option<T> {
    fn to_field(&self) -> Field {
        match self {
            Some(v) => v.to_field(),
            None => Field::null(),
        }
    }

    fn from_field(field: &dyn AbstractField) -> Result<Self> {
        if field.is_null() {
            Ok(None)
        } else {
            T::from_field(field).map(Some)
        }
    }
}
