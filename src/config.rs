use std::{io, path::PathBuf};

use serde::Deserialize;

use crate::error::Error;

/// On-disk shape of `~/pgbackup.conf`, per spec §6. `key` travels as
/// base64; `Config::load` decodes it into the raw 32 bytes the cipher and
/// identity layers need.
#[derive(Debug, Deserialize)]
struct RawConfig {
  #[serde(rename = "pgConn")]
  pg_conn: String,
  #[serde(rename = "systemId")]
  system_id: u64,
  email: String,
  key: String,
}

/// Immutable for the lifetime of a process invocation (spec §5's
/// shared-resource policy).
#[derive(Debug, Clone)]
pub struct Config {
  pub pg_conn: String,
  pub system_id: u64,
  pub email: String,
  pub key: [u8; 32],
}

impl Config {
  pub fn default_path() -> io::Result<PathBuf> {
    let home = std::env::var("HOME").map_err(|_| io::Error::new(io::ErrorKind::NotFound, "HOME is not set"))?;
    Ok(PathBuf::from(home).join("pgbackup.conf"))
  }

  pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
    let data = std::fs::read(path)?;
    let raw: RawConfig = serde_json::from_slice(&data).map_err(|err| Error::Config(err.to_string()))?;

    let decoded = base64::decode_config(&raw.key, base64::STANDARD_NO_PAD).map_err(|err| Error::Config(format!("invalid key: {err}")))?;
    if decoded.len() != 32 {
      return Err(Error::Config(format!("key must decode to 32 bytes, got {}", decoded.len())));
    }
    if raw.pg_conn.is_empty() || raw.system_id == 0 || raw.email.is_empty() {
      return Err(Error::Config("missing pgConn/systemId/email".to_string()));
    }

    let mut key = [0u8; 32];
    key.copy_from_slice(&decoded);

    Ok(Self { pg_conn: raw.pg_conn, system_id: raw.system_id, email: raw.email, key })
  }
}
