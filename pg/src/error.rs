use std::{fmt, io};

/// Errors surfaced by the replication wire protocol.
///
/// The teacher crate threads `io::Error::new(kind, msg)` through every
/// call site instead of a named error enum; we keep that posture (no
/// `thiserror`) but collect the variants the spec names explicitly.
#[derive(Debug)]
pub enum Error {
  /// A frame, cursor read, or authentication step violated the wire
  /// protocol's shape.
  Protocol(String),
  /// The backend offered an authentication method we don't speak.
  UnsupportedAuth(i32),
  /// An `ErrorResponse` ('E') frame from the backend.
  Backend(String),
  /// Underlying transport I/O failure.
  Io(io::Error),
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Error::Protocol(msg) => write!(f, "protocol error: {msg}"),
      Error::UnsupportedAuth(code) => write!(f, "unsupported authentication method: {code}"),
      Error::Backend(msg) => write!(f, "{msg}"),
      Error::Io(err) => write!(f, "{err}"),
    }
  }
}

impl std::error::Error for Error {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      Error::Io(err) => Some(err),
      _ => None,
    }
  }
}

impl From<io::Error> for Error {
  fn from(err: io::Error) -> Self {
    Error::Io(err)
  }
}

pub type Result<T> = std::result::Result<T, Error>;
