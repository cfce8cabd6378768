use std::collections::BTreeMap;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Error, Result};

/// Read-side typed cursor, extending `bytes::Buf`.
///
/// Grounded on the teacher's `pg/src/buf_ext.rs::BufExt`. Overruns are
/// programmer errors — out-of-band malformed payloads — so they panic the
/// same way the teacher's `Buf::get_i32` etc. would on a short buffer,
/// rather than being threaded through `Result`.
pub trait BufExt: Buf {
  fn pg_get_null_terminated_string(&mut self) -> Result<String> {
    match self.chunk().iter().position(|x| *x == 0x00) {
      Some(len) => {
        let mut buffer = vec![0; len];
        self.copy_to_slice(buffer.as_mut_slice());
        self.advance(1);
        String::from_utf8(buffer).map_err(|err| Error::Protocol(err.to_string()))
      }
      None => Err(Error::Protocol("missing null terminator".to_string())),
    }
  }

  fn pg_get_fixed_length_string(&mut self, len: usize) -> Result<String> {
    let mut bytes = vec![0; len];
    self.copy_to_slice(bytes.as_mut_slice());
    String::from_utf8(bytes).map_err(|err| Error::Protocol(err.to_string()))
  }

  /// Scans `(field_code:u8, cstring)` pairs until a zero terminator.
  fn pg_get_fields(&mut self) -> Result<BTreeMap<char, String>> {
    let mut fields = BTreeMap::new();
    loop {
      match self.get_u8() {
        0 => break,
        token => {
          let msg = self.pg_get_null_terminated_string()?;
          fields.insert(char::from(token), msg);
        }
      }
    }
    Ok(fields)
  }

  /// Builds a `BackendError` from an `'E'` frame: `"{severity}: {message}"`.
  fn pg_get_backend_error(&mut self) -> Result<Error> {
    let fields = self.pg_get_fields()?;
    let severity = fields.get(&'S').cloned().unwrap_or_default();
    let message = fields.get(&'M').cloned().unwrap_or_default();
    Ok(Error::Backend(format!("{severity}: {message}")))
  }
}

impl<T: Buf> BufExt for T {}

/// Write-side typed cursor over a growable buffer.
///
/// The teacher writes frame fields directly to the socket via
/// `AsyncWriteExt` one call at a time; the chunk-framed upload and the
/// keepalive-reply frame both need the whole payload assembled first so the
/// length prefix can be computed, so we keep an explicit cursor here,
/// mirroring the original agent's `WriteBuf` (`pg/buf.go`).
#[derive(Debug, Default)]
pub struct WriteCursor(BytesMut);

impl WriteCursor {
  pub fn new() -> Self {
    Self(BytesMut::new())
  }

  pub fn byte(&mut self, v: u8) -> &mut Self {
    self.0.put_u8(v);
    self
  }

  pub fn i16(&mut self, v: i16) -> &mut Self {
    self.0.put_i16(v);
    self
  }

  pub fn i32(&mut self, v: i32) -> &mut Self {
    self.0.put_i32(v);
    self
  }

  pub fn i64(&mut self, v: i64) -> &mut Self {
    self.0.put_i64(v);
    self
  }

  pub fn bytes(&mut self, v: &[u8]) -> &mut Self {
    self.0.put_slice(v);
    self
  }

  pub fn cstring(&mut self, v: &str) -> &mut Self {
    self.0.put_slice(v.as_bytes());
    self.0.put_u8(0);
    self
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn into_inner(self) -> BytesMut {
    self.0
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use bytes::Bytes;

  #[test]
  fn write_cursor_appends_big_endian() {
    let mut w = WriteCursor::new();
    w.i32(1).byte(b'Q').cstring("hi");
    assert_eq!(&w.into_inner()[..], &[0, 0, 0, 1, b'Q', b'h', b'i', 0]);
  }

  #[test]
  fn read_cursor_cstring_advances_past_terminator() {
    let mut b = Bytes::from_static(b"hello\0world");
    assert_eq!(b.pg_get_null_terminated_string().unwrap(), "hello");
    assert_eq!(b.pg_get_fixed_length_string(5).unwrap(), "world");
  }

  #[test]
  fn backend_error_joins_severity_and_message() {
    let mut b = Bytes::from_static(b"SERROR\0Mboom\0\0");
    let err = b.pg_get_backend_error().unwrap();
    assert_eq!(err.to_string(), "ERROR: boom");
  }
}
