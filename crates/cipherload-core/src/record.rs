use std::{collections::BTreeMap, io};

use serde::{Deserialize, Serialize};
use serde_json::{ser::Formatter, Map, Value};
use thiserror::Error;

/// One warehouse row: column name to stringified value (`None` is SQL NULL).
pub type Row = BTreeMap<String, Option<String>>;

#[derive(Debug, Error)]
pub enum RecordError {
    /// Payload parsed as JSON but the top level was not an object.
    #[error("expected a JSON object, found {found}")]
    NotAnObject { found: &'static str },
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A flat mapping of field name to JSON value describing one user.
///
/// Fields keep the order they were parsed or inserted in. Equality ignores order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: Value) -> Result<Self, RecordError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(RecordError::NotAnObject {
                found: kind_of(&other),
            }),
        }
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, RecordError> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    pub fn from_json_str(text: &str) -> Result<Self, RecordError> {
        Self::from_json_slice(text.as_bytes())
    }

    /// Wire form used for ciphertext and plaintext copies: field order kept,
    /// `", "` and `": "` separators, non-ASCII escaped as `\uXXXX`.
    /// `{"name": "a"}` round-trips byte for byte.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, RecordError> {
        let mut out = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut out, SpacedAsciiFormatter);
        self.0.serialize(&mut ser)?;
        Ok(out)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Coerce every field to a string for a STRING-typed warehouse row.
    /// Strings pass through, `null` becomes NULL, anything else becomes its JSON text.
    /// This is lossy: `1` and `"1"` produce the same cell.
    pub fn to_row(&self) -> Row {
        self.0
            .iter()
            .map(|(field, value)| (field.clone(), stringify(value)))
            .collect()
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Object(record.0)
    }
}

/// Single-line JSON with a space after every `,` and `:`, ASCII-only output.
struct SpacedAsciiFormatter;

impl Formatter for SpacedAsciiFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W: ?Sized + io::Write>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()> {
        let mut start = 0;
        for (idx, ch) in fragment.char_indices() {
            if ch.is_ascii() {
                continue;
            }
            writer.write_all(&fragment.as_bytes()[start..idx])?;
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                write!(writer, "\\u{unit:04x}")?;
            }
            start = idx + ch.len_utf8();
        }
        writer.write_all(&fragment.as_bytes()[start..])
    }
}

fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
