use std::path::Path;

use backend::Session;
use pg::{Connection, Lsn};
use tokio::{
  fs::File,
  io::{AsyncReadExt, AsyncWriteExt},
  net,
};

use crate::{
  config::Config,
  error::{Error, Result},
  log::{log_error, log_info},
};

const BACKEND_HOST: &str = "pgbackup.com";
const BACKEND_PORT: u16 = 54321;

async fn connect_backend(config: &Config) -> Result<Session> {
  let addr = net::lookup_host((BACKEND_HOST, BACKEND_PORT))
    .await?
    .next()
    .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "could not resolve backend host"))?;
  Session::connect(addr, BACKEND_HOST, &config.key, config.system_id, &config.email).await.map_err(Error::from)
}

fn object_name_for_segment(lsn: Lsn, timeline: i64) -> String {
  format!("{:016x}.{}.wal", lsn.segment_index(), timeline)
}

fn object_name_for_base(lsn: Lsn) -> String {
  format!("{:016x}.base", lsn.segment_index())
}

/// Continuous WAL upload. Never returns on success — the supervisor (see
/// `main.rs`) restarts it on any terminal error, per spec §4.5/§5.
pub async fn stream(config: &Config, stream_missing: &mut bool) -> Result<()> {
  let conn = Connection::connect(&format!("{} replication=true", config.pg_conn)).await?;
  let mut conn = conn;
  let identity = conn.identify_system().await?;
  log_info!("system {} on server at {}.{}", identity.system_id, identity.lsn, identity.timeline);
  if identity.system_id != config.system_id {
    return Err(Error::SystemIdMismatch { expected: config.system_id, actual: identity.system_id });
  }

  let mut backend = connect_backend(config).await?;
  let entries = backend.list("wal").await?;

  let start_lsn = if !entries.is_empty() && !*stream_missing {
    let latest = entries.last().unwrap();
    let (segment_index, _timeline) = parse_segment_name(latest)?;
    log_info!("continue stream at segment {segment_index:016x}");
    Lsn::new(segment_index << 24)
  } else {
    let rounded = identity.lsn.segment_start();
    log_info!("restart stream at {rounded}");
    rounded
  };

  let mut replication = conn.start_replication(start_lsn).await?;
  stream_loop(&mut backend, &mut replication, config, identity.timeline, stream_missing).await
}

/// Writes each record's data through the current segment's chunk-framed
/// cipher writer as it arrives, closing and re-opening at every segment
/// boundary. Grounded on `main.go`'s `Stream` loop (`sw *cipher.StreamWriter`
/// carried across iterations, closed/replaced at `d.Lsn&0xFFFFFF == 0`).
async fn stream_loop(backend: &mut Session, replication: &mut pg::ReplicationStream, config: &Config, timeline: i64, stream_missing: &mut bool) -> Result<()> {
  let mut current: Option<(backend::ChunkWriter<'_>, backend::ObjectCipher)> = None;

  loop {
    let record = match replication.recv().await {
      Some(record) => record,
      None => return Err(Error::ServerStopped),
    };

    if record.lsn.0 == 0 {
      *stream_missing = true;
      return Err(Error::ServerMissingSegment);
    }
    *stream_missing = false;

    if record.lsn.is_segment_boundary() {
      if let Some((writer, mut cipher)) = current.take() {
        let mut tail = Vec::new();
        cipher.finish(&mut tail)?;
        let mut writer = writer;
        writer.write(&tail).await?;
        writer.close().await?;
      }

      let name = object_name_for_segment(record.lsn, timeline);
      log_info!("segment {}", record.lsn);
      let cipher = backend::ObjectCipher::new(&config.key, &name)?;
      let writer = backend.put(&name).await?;
      current = Some((writer, cipher));
    }

    // Records delivered before the first boundary (resuming mid-segment)
    // are dropped: the next boundary re-anchors us to a whole-segment
    // object (spec §4.5 step 4).
    if let Some((writer, cipher)) = current.as_mut() {
      let mut out = Vec::new();
      cipher.apply(&record.data, &mut out)?;
      writer.write(&out).await?;
    }
  }
}

fn parse_segment_name(name: &str) -> Result<(u64, u64)> {
  let (segment_part, rest) = name.split_once('.').ok_or_else(|| Error::InvalidSegment(name.to_string()))?;
  let (timeline_part, _) = rest.split_once('.').ok_or_else(|| Error::InvalidSegment(name.to_string()))?;
  let segment_index = u64::from_str_radix(segment_part, 16).map_err(|_| Error::InvalidSegment(name.to_string()))?;
  let timeline = timeline_part.parse().map_err(|_| Error::InvalidSegment(name.to_string()))?;
  Ok((segment_index, timeline))
}

/// Uploads one base snapshot.
pub async fn basebackup(config: &Config) -> Result<()> {
  let mut conn = Connection::connect(&format!("{} replication=true", config.pg_conn)).await?;
  let identity = conn.identify_system().await?;
  log_info!("system {} on server at {}.{}", identity.system_id, identity.lsn, identity.timeline);
  if identity.system_id != config.system_id {
    return Err(Error::SystemIdMismatch { expected: config.system_id, actual: identity.system_id });
  }

  let mut backend = connect_backend(config).await?;

  let (start, mut chunks) = conn.base_backup("pgbackup").await?;
  let name = object_name_for_base(start.lsn);
  log_info!("base backup at {}", start.lsn);

  let mut cipher = backend::ObjectCipher::new(&config.key, &name)?;
  let mut writer = backend.put(&name).await?;

  let mut written = 0usize;
  let mut out = Vec::new();
  while let Some(chunk) = chunks.recv().await {
    out.clear();
    cipher.apply(&chunk, &mut out)?;
    writer.write(&out).await?;
    written += chunk.len();
  }
  out.clear();
  cipher.finish(&mut out)?;
  writer.write(&out).await?;
  writer.close().await?;

  log_info!("base backup written {written}b");
  Ok(())
}

/// Fetches one WAL segment to `dest`, padding to the fixed `2^24`-byte
/// segment size if the server returned a shorter body.
pub async fn fetch(config: &Config, segment: &str, dest: &Path) -> Result<()> {
  let (timeline, lsn0, lsn1) = parse_fetch_segment(segment)?;
  let lsn = Lsn::SEGMENT_SIZE * ((lsn0 * 0x100) + lsn1);
  let name = format!("{:016x}.{}.wal", lsn >> 24, timeline);

  let mut backend = connect_backend(config).await?;
  let ciphertext = backend.get(&name).await?;
  let plaintext = backend::ObjectCipher::transform(&config.key, &name, &ciphertext)?;

  let mut file = File::create(dest).await?;
  file.write_all(&plaintext).await?;
  let pad_len = padding_len(plaintext.len());
  if pad_len > 0 {
    file.write_all(&vec![0u8; pad_len]).await?;
  }
  file.flush().await?;
  Ok(())
}

/// How many zero bytes to append so a short `fetch` body still lands as a
/// full `2^24`-byte segment on disk (spec §4.5/§8 scenario 4).
fn padding_len(body_len: usize) -> usize {
  (Lsn::SEGMENT_SIZE as usize).saturating_sub(body_len)
}

/// Parses `%08x%08x%08x`; any zero component is rejected (spec §4.5,
/// flagged as suspect in §9 — preserved for compatibility).
fn parse_fetch_segment(segment: &str) -> Result<(u64, u64, u64)> {
  if segment.len() != 24 {
    return Err(Error::InvalidSegment(segment.to_string()));
  }
  let timeline = u64::from_str_radix(&segment[0..8], 16).map_err(|_| Error::InvalidSegment(segment.to_string()))?;
  let lsn0 = u64::from_str_radix(&segment[8..16], 16).map_err(|_| Error::InvalidSegment(segment.to_string()))?;
  let lsn1 = u64::from_str_radix(&segment[16..24], 16).map_err(|_| Error::InvalidSegment(segment.to_string()))?;
  if timeline == 0 || lsn0 == 0 || lsn1 == 0 {
    return Err(Error::InvalidSegment(segment.to_string()));
  }
  Ok((timeline, lsn0, lsn1))
}

/// Reconstructs into `dir` up to `lsn`.
pub async fn restore(config: &Config, lsn: &str, dir: &Path) -> Result<()> {
  let target_lsn: Lsn = lsn.parse().map_err(|_| pg::Error::Protocol(format!("illegal lsn: {lsn}")))?;

  let mut backend = connect_backend(config).await?;
  let entries = backend.list("base").await?;

  let cutoff = object_name_for_base(target_lsn);
  let chosen = entries.into_iter().filter(|name| name.as_str() < cutoff.as_str()).last().ok_or(Error::NoSuitableBase)?;

  log_info!("restore base {chosen}");

  let ciphertext = backend.get(&chosen).await?;
  let plaintext = backend::ObjectCipher::transform(&config.key, &chosen, &ciphertext)?;

  tokio::fs::create_dir(dir).await?;
  extract_archive(&plaintext, dir).await?;

  log_info!("restored base into {}", dir.display());

  let exe = std::env::current_exe()?;
  let recovery_conf = format!(
    "\nrecovery_target_lsn='{lsn}'\nrestore_command='{} fetch %f \"%p\"'",
    exe.display()
  );
  tokio::fs::write(dir.join("recovery.conf"), recovery_conf).await?;

  log_info!("recovery.conf configured for recovery till {lsn}");
  Ok(())
}

/// Feeds `archive` to `/usr/bin/tar` as a byte stream (spec §1's external
/// archive-extractor collaborator — the core's job ends at producing the
/// decrypted byte stream).
async fn extract_archive(archive: &[u8], dir: &Path) -> Result<()> {
  use tokio::process::Command;

  let mut child = Command::new("/usr/bin/tar")
    .arg("xf")
    .arg("-")
    .arg("-C")
    .arg(dir)
    .stdin(std::process::Stdio::piped())
    .spawn()?;

  let mut stdin = child.stdin.take().expect("tar was spawned with a piped stdin");
  stdin.write_all(archive).await?;
  drop(stdin);

  let status = child.wait().await?;
  if !status.success() {
    return Err(std::io::Error::new(std::io::ErrorKind::Other, format!("tar exited with {status}")).into());
  }
  Ok(())
}

/// Writes backend status bytes to stdout.
pub async fn status(config: &Config) -> Result<()> {
  let mut backend = connect_backend(config).await?;
  let body = backend.status().await?;
  tokio::io::stdout().write_all(&body).await?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn segment_name_matches_scenario_2() {
    let lsn = Lsn::new(0x0000000700000000);
    assert_eq!(object_name_for_segment(lsn, 1), "0000000000000007.1.wal");
  }

  #[test]
  fn base_cutoff_matches_scenario_3() {
    let target: Lsn = "01/00004000".parse().unwrap();
    assert_eq!(object_name_for_base(target), "0000000000000001.base");

    let entries = vec!["0000000000000000.base".to_string(), "0000000000000001.base".to_string(), "0000000000000002.base".to_string()];
    let cutoff = object_name_for_base(target);
    let chosen = entries.into_iter().filter(|name| name.as_str() < cutoff.as_str()).last();
    assert_eq!(chosen.as_deref(), Some("0000000000000000.base"));
  }

  #[test]
  fn base_selection_fails_when_nothing_is_below_cutoff() {
    let entries = vec!["0000000000000005.base".to_string()];
    let cutoff = "0000000000000001.base";
    let chosen = entries.into_iter().filter(|name| name.as_str() < cutoff).last();
    assert!(chosen.is_none());
  }

  #[test]
  fn parse_fetch_segment_rejects_zero_components() {
    assert!(parse_fetch_segment("000000000000000700000009").is_err());
    assert!(parse_fetch_segment("000000010000000000000009").is_err());
    assert!(parse_fetch_segment("000000010000000700000000").is_err());
  }

  #[test]
  fn parse_fetch_segment_reconstructs_lsn() {
    let (timeline, lsn0, lsn1) = parse_fetch_segment("000000010000000700000009").unwrap();
    assert_eq!((timeline, lsn0, lsn1), (1, 7, 9));
    let lsn = Lsn::SEGMENT_SIZE * ((lsn0 * 0x100) + lsn1);
    assert_eq!(lsn >> 24, 0x700 + 9);
  }

  #[test]
  fn parse_segment_name_roundtrips_with_object_name_for_segment() {
    let lsn = Lsn::new(0x0000000700000000);
    let name = object_name_for_segment(lsn, 1);
    let (segment_index, timeline) = parse_segment_name(&name).unwrap();
    assert_eq!(segment_index, lsn.segment_index());
    assert_eq!(timeline, 1);
  }

  #[test]
  fn padding_len_fills_a_short_body_to_one_segment() {
    assert_eq!(padding_len(16), Lsn::SEGMENT_SIZE as usize - 16);
  }

  #[test]
  fn padding_len_is_zero_for_a_full_segment() {
    assert_eq!(padding_len(Lsn::SEGMENT_SIZE as usize), 0);
  }
}
