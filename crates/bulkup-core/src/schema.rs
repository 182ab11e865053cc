//! Destination table metadata

use serde::{Deserialize, Serialize};

/// Metadata for one destination column, as read from the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ColumnDescriptor {
    /// Column name, unique within one table
    pub name: String,
    /// Default constraint expression (e.g. `((0))`, `(getdate())`)
    pub default_value: Option<String>,
    /// Whether the column is part of the PRIMARY KEY constraint
    pub is_primary_key: bool,
    /// Whether the column value is generated by the engine
    pub is_identity: bool,
    /// SQL data type name (e.g. `nvarchar`, `int`, `decimal`)
    pub data_type: String,
    /// Character/byte length; `-1` for `(MAX)`, `0` when not applicable
    pub char_length: i32,
    /// Numeric precision for exact numeric types
    pub numeric_precision: Option<u8>,
    /// Numeric scale for exact numeric types
    pub numeric_scale: Option<u8>,
}

impl ColumnDescriptor {
    /// Create a descriptor with just a name and data type
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            ..Default::default()
        }
    }

    pub fn with_char_length(mut self, length: i32) -> Self {
        self.char_length = length;
        self
    }

    pub fn with_precision(mut self, precision: u8, scale: u8) -> Self {
        self.numeric_precision = Some(precision);
        self.numeric_scale = Some(scale);
        self
    }

    pub fn with_default(mut self, expression: impl Into<String>) -> Self {
        self.default_value = Some(expression.into());
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    pub fn identity(mut self) -> Self {
        self.is_identity = true;
        self
    }
}

/// A possibly schema-qualified table name
///
/// Accepts `Users`, `dbo.Users`, `[dbo].[Order Items]` and temp names such as
/// `##Tstaging`. Bracketed parts may contain dots and escaped `]]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    /// Schema part, if given
    pub schema: Option<String>,
    /// Unqualified table name
    pub name: String,
}

impl TableName {
    /// Parse a table reference. Returns `None` for empty or malformed input.
    pub fn parse(input: &str) -> Option<Self> {
        let mut parts: Vec<String> = Vec::new();
        let mut current = String::new();
        let mut chars = input.trim().chars().peekable();
        let mut in_brackets = false;

        while let Some(c) = chars.next() {
            match c {
                '[' if !in_brackets && current.is_empty() => in_brackets = true,
                ']' if in_brackets => {
                    if chars.peek() == Some(&']') {
                        chars.next();
                        current.push(']');
                    } else {
                        in_brackets = false;
                    }
                }
                '.' if !in_brackets => parts.push(std::mem::take(&mut current)),
                _ => current.push(c),
            }
        }
        if in_brackets {
            return None;
        }
        parts.push(current);

        if parts.iter().any(|p| p.is_empty()) {
            return None;
        }

        match parts.len() {
            1 => Some(Self {
                schema: None,
                name: parts.remove(0),
            }),
            2 => {
                let name = parts.remove(1);
                Some(Self {
                    schema: Some(parts.remove(0)),
                    name,
                })
            }
            _ => None,
        }
    }

    /// Whether this names a session or global temporary table
    pub fn is_temporary(&self) -> bool {
        self.name.starts_with('#')
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}
