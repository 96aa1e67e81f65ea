//! Tabular query output.
//!
//! A [`TabularResult`] is what a [`QueryExecutor`](crate::executor::QueryExecutor)
//! hands back for row-producing statements. Column and row order are
//! significant: clients bind values to columns by position.
use std::borrow::Cow;

/// Column type tags as they appear in column-definition packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ColumnType {
    Decimal = 0x00,
    Tiny = 0x01,
    Short = 0x02,
    Long = 0x03,
    Float = 0x04,
    Double = 0x05,
    Null = 0x06,
    Timestamp = 0x07,
    LongLong = 0x08,
    Int24 = 0x09,
    Date = 0x0a,
    Time = 0x0b,
    DateTime = 0x0c,
    Year = 0x0d,
    VarChar = 0x0f,
    Bit = 0x10,
    Json = 0xf5,
    NewDecimal = 0xf6,
    Blob = 0xfc,
    VarString = 0xfd,
    String = 0xfe,
}

impl ColumnType {
    /// Display width used when a column does not declare one.
    pub fn default_length(self) -> u32 {
        match self {
            ColumnType::Tiny => 4,
            ColumnType::Short => 6,
            ColumnType::Int24 => 9,
            ColumnType::Long => 11,
            ColumnType::LongLong => 20,
            ColumnType::Float => 12,
            ColumnType::Double => 22,
            ColumnType::Decimal | ColumnType::NewDecimal => 65,
            ColumnType::Date => 10,
            ColumnType::Time => 10,
            ColumnType::DateTime | ColumnType::Timestamp => 19,
            ColumnType::Year => 4,
            ColumnType::Bit => 1,
            ColumnType::Null => 0,
            ColumnType::Blob | ColumnType::Json => 65_535,
            ColumnType::VarChar | ColumnType::VarString | ColumnType::String => 255,
        }
    }

    pub fn is_binary(self) -> bool {
        matches!(self, ColumnType::Blob | ColumnType::Bit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub length: u32,
    pub decimals: u8,
    pub flags: u16,
    /// Table the column belongs to, if any.
    pub table: String,
    pub schema: String,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            length: column_type.default_length(),
            decimals: 0,
            flags: 0,
            table: String::new(),
            schema: String::new(),
        }
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = length;
        self
    }

    pub fn with_decimals(mut self, decimals: u8) -> Self {
        self.decimals = decimals;
        self
    }

    pub fn with_flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_table(mut self, schema: impl Into<String>, table: impl Into<String>) -> Self {
        self.schema = schema.into();
        self.table = table.into();
        self
    }
}

/// A nullable scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    UInt(u64),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Text-protocol representation; `None` for NULL.
    pub fn to_text(&self) -> Option<Cow<'_, [u8]>> {
        match self {
            Value::Null => None,
            Value::Int(v) => Some(Cow::Owned(v.to_string().into_bytes())),
            Value::UInt(v) => Some(Cow::Owned(v.to_string().into_bytes())),
            Value::Double(v) => Some(Cow::Owned(v.to_string().into_bytes())),
            Value::Text(v) => Some(Cow::Borrowed(v.as_bytes())),
            Value::Bytes(v) => Some(Cow::Borrowed(v)),
        }
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

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::UInt(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TabularResult {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
}

impl TabularResult {
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Appends a row. Rows shorter than the column list are padded with NULL,
    /// longer rows are truncated.
    pub fn push_row<I, V>(&mut self, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let mut row: Vec<Value> = values
            .into_iter()
            .take(self.columns.len())
            .map(Into::into)
            .collect();
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    pub fn with_row<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.push_row(values);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_fitted_to_columns() {
        let mut result = TabularResult::new(vec![
            Column::new("a", ColumnType::VarString),
            Column::new("b", ColumnType::LongLong),
        ]);
        result.push_row(["x"]);
        result.push_row(["x", "y", "z"]);

        assert_eq!(result.rows[0], vec![Value::from("x"), Value::Null]);
        assert_eq!(result.rows[1].len(), 2);
    }

    #[test]
    fn null_has_no_text() {
        assert!(Value::Null.to_text().is_none());
        assert_eq!(Value::Int(-4).to_text().unwrap().as_ref(), b"-4");
        assert_eq!(Value::from(None::<&str>), Value::Null);
    }
}
