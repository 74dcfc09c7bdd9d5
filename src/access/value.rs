use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Column types supported by the database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Integer,
    Text,
}

impl DataType {
    /// Resolves a declared SQL type name, accepting the usual aliases.
    pub fn from_sql_name(name: &str) -> Result<Self> {
        match name.to_ascii_uppercase().as_str() {
            "BOOLEAN" | "BOOL" => Ok(DataType::Boolean),
            "INTEGER" | "INT" | "BIGINT" => Ok(DataType::Integer),
            "TEXT" | "VARCHAR" | "STRING" => Ok(DataType::Text),
            other => Err(Error::Syntax(format!("unknown column type {other}"))),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Boolean => write!(f, "BOOLEAN"),
            DataType::Integer => write!(f, "INTEGER"),
            DataType::Text => write!(f, "TEXT"),
        }
    }
}

/// Values that can be stored in the database
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Text(String),
}

impl Value {
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Integer(_) => Some(DataType::Integer),
            Value::Text(_) => Some(DataType::Text),
        }
    }

    /// NULL is compatible with every type.
    pub fn is_compatible_with(&self, data_type: DataType) -> bool {
        self.data_type().map_or(true, |t| t == data_type)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
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

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Serializes a row according to its schema: a NULL bitmap followed by the
/// non-NULL values.
pub fn serialize_values(values: &[Value], schema: &[DataType]) -> Result<Vec<u8>> {
    if values.len() != schema.len() {
        return Err(Error::Misuse(format!(
            "value count {} doesn't match schema length {}",
            values.len(),
            schema.len()
        )));
    }

    let mut null_bitmap = vec![0u8; schema.len().div_ceil(8)];
    let mut body = Vec::new();

    for (i, (value, data_type)) in values.iter().zip(schema).enumerate() {
        match (value, data_type) {
            (Value::Null, _) => null_bitmap[i / 8] |= 1 << (i % 8),
            (Value::Boolean(b), DataType::Boolean) => body.push(u8::from(*b)),
            (Value::Integer(n), DataType::Integer) => body.extend_from_slice(&n.to_le_bytes()),
            (Value::Text(s), DataType::Text) => {
                body.extend_from_slice(&(s.len() as u32).to_le_bytes());
                body.extend_from_slice(s.as_bytes());
            }
            (value, data_type) => {
                return Err(Error::TypeMismatch(format!(
                    "value {value} is not compatible with type {data_type}"
                )))
            }
        }
    }

    null_bitmap.extend_from_slice(&body);
    Ok(null_bitmap)
}

/// Decodes a row written by [`serialize_values`]. The error carries a short
/// description of what is malformed.
pub fn deserialize_values(
    data: &[u8],
    schema: &[DataType],
) -> std::result::Result<Vec<Value>, String> {
    let null_bitmap_size = schema.len().div_ceil(8);
    if data.len() < null_bitmap_size {
        return Err("row too short for NULL bitmap".into());
    }
    let (null_bitmap, mut rest) = data.split_at(null_bitmap_size);

    let mut values = Vec::with_capacity(schema.len());
    for (i, data_type) in schema.iter().enumerate() {
        if null_bitmap[i / 8] & (1 << (i % 8)) != 0 {
            values.push(Value::Null);
            continue;
        }
        let value = match data_type {
            DataType::Boolean => Value::Boolean(take(&mut rest, 1, "boolean")?[0] != 0),
            DataType::Integer => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(take(&mut rest, 8, "integer")?);
                Value::Integer(i64::from_le_bytes(buf))
            }
            DataType::Text => {
                let mut len = [0u8; 4];
                len.copy_from_slice(take(&mut rest, 4, "text length")?);
                let bytes = take(&mut rest, u32::from_le_bytes(len) as usize, "text")?;
                let s = std::str::from_utf8(bytes).map_err(|e| format!("invalid text: {e}"))?;
                Value::Text(s.to_string())
            }
        };
        values.push(value);
    }
    if !rest.is_empty() {
        return Err(format!("{} trailing byte(s) after row", rest.len()));
    }
    Ok(values)
}

fn take<'a>(rest: &mut &'a [u8], n: usize, what: &str) -> std::result::Result<&'a [u8], String> {
    if rest.len() < n {
        return Err(format!("truncated {what} value"));
    }
    let (head, tail) = rest.split_at(n);
    *rest = tail;
    Ok(head)
}
