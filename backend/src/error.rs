use std::{fmt, io};

use openssl::error::ErrorStack;

/// Errors surfaced by the backend transport: TLS identity setup, the line
/// protocol, and chunk framing.
///
/// Same no-error-crate posture as `pg::Error`: named variants, hand-rolled
/// `Display`/`std::error::Error`.
#[derive(Debug)]
pub enum Error {
  /// A `get`/`status` reply line wasn't a hex byte count (e.g. `notFound`).
  Backend(String),
  /// TLS/X.509/EC key material construction failed.
  Crypto(ErrorStack),
  /// Underlying transport I/O failure.
  Io(io::Error),
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Error::Backend(token) => write!(f, "{token}"),
      Error::Crypto(err) => write!(f, "crypto error: {err}"),
      Error::Io(err) => write!(f, "{err}"),
    }
  }
}

impl std::error::Error for Error {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      Error::Io(err) => Some(err),
      Error::Crypto(err) => Some(err),
      Error::Backend(_) => None,
    }
  }
}

impl From<io::Error> for Error {
  fn from(err: io::Error) -> Self {
    Error::Io(err)
  }
}

impl From<ErrorStack> for Error {
  fn from(err: ErrorStack) -> Self {
    Error::Crypto(err)
  }
}

pub type Result<T> = std::result::Result<T, Error>;
