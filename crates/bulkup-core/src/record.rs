//! Typed records and their tabular form
//!
//! A record type declares its fields once, statically, through the `Record`
//! trait. `RowSet::from_records` converts a slice of records into the tabular
//! shape the bulk transport consumes; column names and types come from the
//! declared fields in declaration order.

use crate::{BulkUpError, Result, Value};

/// Underlying type of a tabular column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceType {
    Binary,
    Boolean,
    DateTime,
    DateTimeOffset,
    Decimal,
    Double,
    Single,
    Int64,
    Int32,
    Int16,
    String,
    Byte,
    Guid,
    /// Signed 8-bit integer. No SQL Server equivalent.
    SByte,
    UInt16,
    UInt32,
    UInt64,
    Char,
    TimeSpan,
    Object,
}

impl SourceType {
    pub fn name(&self) -> &'static str {
        match self {
            SourceType::Binary => "binary",
            SourceType::Boolean => "boolean",
            SourceType::DateTime => "datetime",
            SourceType::DateTimeOffset => "datetimeoffset",
            SourceType::Decimal => "decimal",
            SourceType::Double => "double",
            SourceType::Single => "single",
            SourceType::Int64 => "int64",
            SourceType::Int32 => "int32",
            SourceType::Int16 => "int16",
            SourceType::String => "string",
            SourceType::Byte => "byte",
            SourceType::Guid => "guid",
            SourceType::SByte => "sbyte",
            SourceType::UInt16 => "uint16",
            SourceType::UInt32 => "uint32",
            SourceType::UInt64 => "uint64",
            SourceType::Char => "char",
            SourceType::TimeSpan => "timespan",
            SourceType::Object => "object",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Static description of one field of a record type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub source_type: SourceType,
    /// Maximum length for strings; `None` means unbounded
    pub max_length: Option<i64>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
}

impl FieldDescriptor {
    pub const fn new(name: &'static str, source_type: SourceType) -> Self {
        Self {
            name,
            source_type,
            max_length: None,
            precision: None,
            scale: None,
        }
    }

    pub const fn with_max_length(mut self, max_length: i64) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub const fn with_precision(mut self, precision: u8, scale: u8) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }
}

/// A record type that can be bulk loaded
///
/// `fields` and `values` must agree in length and order.
pub trait Record {
    /// The record's fields in declaration order
    fn fields() -> &'static [FieldDescriptor];

    /// This record's values, one per field
    fn values(&self) -> Vec<Value>;
}

/// Implement `Record` for a struct from a list of `field: descriptor-expression` pairs.
///
/// ```
/// use bulkup_core::{impl_record, Record, SourceType};
///
/// #[derive(Clone)]
/// struct Person {
///     id: i32,
///     name: String,
/// }
///
/// impl_record!(Person {
///     id: SourceType::Int32,
///     name: SourceType::String,
/// });
///
/// assert_eq!(Person::fields().len(), 2);
/// assert_eq!(Person::fields()[1].name, "name");
/// ```
#[macro_export]
macro_rules! impl_record {
    ($ty:ty { $($field:ident : $source:expr),* $(,)? }) => {
        impl $crate::Record for $ty {
            fn fields() -> &'static [$crate::FieldDescriptor] {
                const FIELDS: &[$crate::FieldDescriptor] = &[
                    $($crate::FieldDescriptor::new(stringify!($field), $source)),*
                ];
                FIELDS
            }

            fn values(&self) -> Vec<$crate::Value> {
                vec![$($crate::Value::from(self.$field.clone())),*]
            }
        }
    };
}

/// Identity seed and step for an auto-increment column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoIncrement {
    pub seed: i64,
    pub step: i64,
}

/// One column of a `RowSet`
#[derive(Debug, Clone, PartialEq)]
pub struct RowSetColumn {
    pub name: String,
    pub source_type: SourceType,
    /// Maximum length for strings; `None` means unbounded
    pub max_length: Option<i64>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
    pub auto_increment: Option<AutoIncrement>,
    /// Default expression rendered verbatim into DDL
    pub default_value: Option<String>,
}

impl RowSetColumn {
    pub fn new(name: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            name: name.into(),
            source_type,
            max_length: None,
            precision: None,
            scale: None,
            auto_increment: None,
            default_value: None,
        }
    }

    pub fn with_max_length(mut self, max_length: i64) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn with_precision(mut self, precision: u8, scale: u8) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    pub fn with_auto_increment(mut self, seed: i64, step: i64) -> Self {
        self.auto_increment = Some(AutoIncrement { seed, step });
        self
    }

    pub fn with_default(mut self, expression: impl Into<String>) -> Self {
        self.default_value = Some(expression.into());
        self
    }
}

impl From<&FieldDescriptor> for RowSetColumn {
    fn from(field: &FieldDescriptor) -> Self {
        Self {
            name: field.name.to_string(),
            source_type: field.source_type,
            max_length: field.max_length,
            precision: field.precision,
            scale: field.scale,
            auto_increment: None,
            default_value: None,
        }
    }
}

/// Tabular form of a record collection
#[derive(Debug, Clone, PartialEq)]
pub struct RowSet {
    columns: Vec<RowSetColumn>,
    rows: Vec<Vec<Value>>,
    primary_key: Vec<usize>,
}

impl RowSet {
    /// Create an empty row set with the given columns
    pub fn new(columns: Vec<RowSetColumn>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            primary_key: Vec::new(),
        }
    }

    /// Convert typed records into a row set
    pub fn from_records<T: Record>(records: &[T]) -> Result<Self> {
        let mut row_set = Self::new(T::fields().iter().map(RowSetColumn::from).collect());
        row_set.rows.reserve(records.len());
        for record in records {
            row_set.push_row(record.values())?;
        }
        tracing::debug!(
            columns = row_set.columns.len(),
            rows = row_set.rows.len(),
            "converted records to row set"
        );
        Ok(row_set)
    }

    /// Append a row; its arity must match the column count
    pub fn push_row(&mut self, values: Vec<Value>) -> Result<()> {
        if values.len() != self.columns.len() {
            return Err(BulkUpError::Configuration(format!(
                "row has {} values but the row set has {} columns",
                values.len(),
                self.columns.len()
            )));
        }
        self.rows.push(values);
        Ok(())
    }

    /// Mark the named columns as the primary key, in the given order
    pub fn with_primary_key<I, S>(mut self, names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut key = Vec::new();
        for name in names {
            let name = name.as_ref();
            let index = self.column_index(name).ok_or_else(|| {
                BulkUpError::Configuration(format!("primary key column '{}' not in row set", name))
            })?;
            key.push(index);
        }
        self.primary_key = key;
        Ok(self)
    }

    /// Mark the first `count` columns as the primary key
    pub fn with_leading_key_columns(mut self, count: usize) -> Result<Self> {
        if count > self.columns.len() {
            return Err(BulkUpError::Configuration(format!(
                "cannot use {} leading key columns from a row set with {} columns",
                count,
                self.columns.len()
            )));
        }
        self.primary_key = (0..count).collect();
        Ok(self)
    }

    pub fn columns(&self) -> &[RowSetColumn] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Primary key columns in key order
    pub fn primary_key(&self) -> impl Iterator<Item = &RowSetColumn> {
        self.primary_key.iter().map(|&i| &self.columns[i])
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Find a column by name, ignoring ASCII case like the server's default collation
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}
