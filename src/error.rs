use std::{fmt, io};

/// Orchestrator-level error taxonomy, per spec §7. Wraps the two crate
/// errors (`pg::Error`, `backend::Error`) rather than re-deriving them.
#[derive(Debug)]
pub enum Error {
  /// `~/pgbackup.conf` is missing or malformed.
  Config(String),
  /// A segment filename didn't parse as `%08x%08x%08x`, or one of its
  /// components was zero.
  InvalidSegment(String),
  /// `restore`'s `pgbackup.list base` listing had no entry strictly less
  /// than the target cutoff.
  NoSuitableBase,
  /// `IDENTIFY_SYSTEM` reported a system id other than `Config.system_id`.
  SystemIdMismatch { expected: u64, actual: u64 },
  /// A WAL record with `lsn == 0`: the server reports the requested
  /// segment is no longer available.
  ServerMissingSegment,
  /// The replication channel closed without a terminal error.
  ServerStopped,
  Pg(pg::Error),
  Backend(backend::Error),
  Io(io::Error),
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Error::Config(msg) => write!(f, "config error: {msg}"),
      Error::InvalidSegment(name) => write!(f, "invalid segment: {name}"),
      Error::NoSuitableBase => write!(f, "no suitable basebackup"),
      Error::SystemIdMismatch { expected, actual } => write!(f, "system id mismatch: expected {expected}, got {actual}"),
      Error::ServerMissingSegment => write!(f, "server missing segment"),
      Error::ServerStopped => write!(f, "server stopped"),
      Error::Pg(err) => write!(f, "{err}"),
      Error::Backend(err) => write!(f, "{err}"),
      Error::Io(err) => write!(f, "{err}"),
    }
  }
}

impl std::error::Error for Error {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      Error::Pg(err) => Some(err),
      Error::Backend(err) => Some(err),
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

impl From<pg::Error> for Error {
  fn from(err: pg::Error) -> Self {
    Error::Pg(err)
  }
}

impl From<backend::Error> for Error {
  fn from(err: backend::Error) -> Self {
    Error::Backend(err)
  }
}

pub type Result<T> = std::result::Result<T, Error>;
