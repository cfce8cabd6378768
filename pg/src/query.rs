use std::collections::VecDeque;

use bytes::Bytes;

use crate::lsn::Lsn;

/// A decoded row value — the Rust shape of Postgres's wire-level
/// `interface{}`, per spec §9's design note and grounded on the original
/// agent's `pg/encode.go` `decodeBinary`/`decodeText` dispatch table.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Null,
  Bytes(Bytes),
  Text(String),
  Int(i64),
  Float(f64),
  Bool(bool),
}

impl Value {
  /// Decodes a column value per spec §4.2's `(format, oid)` table. Returns
  /// `Value::Null` with the caller expected to log a warning for
  /// unrecognized `(format, oid)` pairs — decoding never fails outright,
  /// matching the original agent's `log.Print` + `return nil` fallback.
  pub fn decode(raw: &[u8], oid: i32, format: i16) -> Option<Self> {
    match (format, oid) {
      (1, 17) => Some(Value::Bytes(Bytes::copy_from_slice(raw))),
      (1, 20) => Some(Value::Int(i64::from_be_bytes(raw.try_into().ok()?))),
      (1, 23) => Some(Value::Int(i32::from_be_bytes(raw.try_into().ok()?) as i64)),
      (1, 21) => Some(Value::Int(i16::from_be_bytes(raw.try_into().ok()?) as i64)),
      (0, 18 | 1043 | 25) => Some(Value::Text(String::from_utf8_lossy(raw).into_owned())),
      (0, 16) => Some(Value::Bool(raw.first() == Some(&b'T'))),
      (0, 20 | 23 | 21) => std::str::from_utf8(raw).ok()?.parse().ok().map(Value::Int),
      (0, 700) => std::str::from_utf8(raw).ok()?.parse::<f32>().ok().map(|f| Value::Float(f as f64)),
      (0, 701) => std::str::from_utf8(raw).ok()?.parse().ok().map(Value::Float),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::Text(s) => Some(s),
      _ => None,
    }
  }
}

#[derive(Debug)]
pub struct Column {
  pub name: String,
  pub oid: i32,
  pub attr_number: i16,
  pub datatype_oid: i32,
  pub datatype_size: i16,
  pub type_modifier: i32,
  pub format: i16,
}

#[derive(Debug, Default)]
pub struct SelectQueryResult {
  pub columns: Vec<Column>,
  pub rows: Vec<Vec<Option<Value>>>,
}

#[derive(Debug)]
pub enum QueryResult {
  Success,
  Selected(SelectQueryResult),
  BackendError(String),
}

impl QueryResult {
  pub fn as_selected(self) -> Option<SelectQueryResult> {
    match self {
      QueryResult::Selected(v) => Some(v),
      _ => None,
    }
  }

  pub fn is_successful(&self) -> bool {
    matches!(self, QueryResult::Success)
  }

  pub fn as_backend_error(self) -> Option<String> {
    match self {
      QueryResult::BackendError(v) => Some(v),
      _ => None,
    }
  }
}

#[derive(Debug, Default)]
pub struct QueryResults {
  pub results: VecDeque<QueryResult>,
}

#[derive(Debug)]
pub struct IdentifySystem {
  pub system_id: u64,
  pub timeline: i64,
  pub lsn: Lsn,
  pub dbname: Option<String>,
}

#[derive(Debug)]
pub struct BaseBackupStart {
  pub lsn: Lsn,
  pub timeline: i64,
}
