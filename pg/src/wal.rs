use std::time::{Duration, SystemTime};

use bytes::{Buf, Bytes};
use tokio::{io::AsyncWriteExt, sync::mpsc};

use crate::{buf_ext::BufExt, lsn::Lsn, stream::Stream};

/// Microseconds since 2000-01-01 UTC, the epoch the replication protocol's
/// timestamps use. Grounded on the original agent's `pgEpoch()`.
const PG_EPOCH_UNIX_SECS: u64 = 946_684_800;

fn pg_epoch_now_micros() -> i64 {
  SystemTime::now()
    .duration_since(SystemTime::UNIX_EPOCH + Duration::from_secs(PG_EPOCH_UNIX_SECS))
    .unwrap_or_default()
    .as_micros() as i64
}

/// A single WAL record as delivered by `START_REPLICATION`, per spec §3.
///
/// `lsn == 0` is the sentinel meaning the server reports the requested
/// segment is no longer available; it is never emitted past the cipher
/// boundary by the orchestrator.
#[derive(Debug, Clone)]
pub struct WalRecord {
  pub lsn: Lsn,
  pub server_lsn: Lsn,
  pub server_time_micros: i64,
  pub data: Bytes,
}

/// A running `START_REPLICATION` session: a background task owns the
/// transport and pushes decoded records through a one-slot rendezvous
/// channel, replying to keepalives inline. Grounded on the teacher's
/// `pg/src/wal.rs::ReplicationStream`, generalized from wal2json logical
/// decoding to the spec's raw-bytes physical-replication record, and on the
/// original agent's `StartReplication` goroutine for the keepalive-reply
/// and "already been removed" sentinel behavior.
#[derive(Debug)]
pub struct ReplicationStream {
  receiver: mpsc::Receiver<WalRecord>,
  task: tokio::task::JoinHandle<Stream>,
}

impl ReplicationStream {
  pub(crate) fn spawn(stream: Stream) -> Self {
    let (sender, receiver) = mpsc::channel(1);
    let task = tokio::task::spawn(Self::run(stream, sender));
    Self { receiver, task }
  }

  /// Awaits the next WAL record. Returns `None` once the session has ended
  /// (transport closed, protocol error, or `ServerStopped`).
  pub async fn recv(&mut self) -> Option<WalRecord> {
    self.receiver.recv().await
  }

  /// Tears down the session, returning the underlying transport once the
  /// background reader task has drained.
  pub async fn close(self) -> std::io::Result<()> {
    drop(self.receiver);
    let mut stream = self.task.await.map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;
    stream.shutdown().await
  }

  async fn run(mut stream: Stream, sender: mpsc::Sender<WalRecord>) -> Stream {
    let mut client_lsn = Lsn::new(0);

    loop {
      let (op, mut buffer) = match stream.read_packet().await {
        Ok(v) => v,
        Err(err) => {
          if err.to_string().contains("already been removed") {
            sender.send(WalRecord { lsn: Lsn::new(0), server_lsn: Lsn::new(0), server_time_micros: 0, data: Bytes::new() }).await.ok();
            drain_to_ready(&mut stream).await;
          } else {
            eprintln!("pg: replication read error: {err}");
          }
          return stream;
        }
      };

      match op {
        b'd' => {
          let sub_tag = buffer.get_u8();
          match sub_tag {
            b'w' => {
              let lsn = Lsn::new(buffer.get_i64() as u64);
              let server_lsn = Lsn::new(buffer.get_i64() as u64);
              let server_time_micros = buffer.get_i64();
              let data = buffer.copy_to_bytes(buffer.remaining());
              client_lsn = lsn;
              if sender
                .send(WalRecord { lsn, server_lsn, server_time_micros, data })
                .await
                .is_err()
              {
                return stream;
              }
            }
            b'k' => {
              if let Err(err) = Self::reply_keepalive(&mut stream, client_lsn).await {
                eprintln!("pg: keepalive reply failed: {err}");
                return stream;
              }
            }
            other => {
              eprintln!("pg: replication unknown sub-tag {:?}", char::from(other));
            }
          }
        }
        b'E' => {
          match buffer.pg_get_backend_error() {
            Ok(err) => eprintln!("pg: replication backend error: {err}"),
            Err(err) => eprintln!("pg: replication backend error (malformed): {err}"),
          }
          return stream;
        }
        b'N' => {
          eprintln!("pg: replication notice");
        }
        b'Z' => {
          return stream;
        }
        other => {
          eprintln!("pg: replication unexpected tag {:?}", char::from(other));
        }
      }
    }
  }

  async fn reply_keepalive(stream: &mut Stream, client_lsn: Lsn) -> std::io::Result<()> {
    stream.write_u8(b'd').await?;
    stream.write_i32(1 + 4 + 8 + 8 + 8 + 8 + 1).await?;
    stream.write_u8(b'r').await?;
    stream.write_i64(client_lsn.0 as i64).await?;
    stream.write_i64(client_lsn.0 as i64).await?;
    stream.write_i64(client_lsn.0 as i64).await?;
    stream.write_i64(pg_epoch_now_micros()).await?;
    stream.write_u8(0).await?;
    stream.flush().await
  }
}

/// Reads until `ReadyForQuery` ('Z'), discarding everything else. Spec §4.5:
/// after the `{lsn:0}` sentinel, "drain to `Z` and close the sequence."
async fn drain_to_ready(stream: &mut Stream) {
  loop {
    match stream.read_packet().await {
      Ok((b'Z', _)) => return,
      Ok(_) => continue,
      Err(err) => {
        eprintln!("pg: replication drain error: {err}");
        return;
      }
    }
  }
}

/// Byte-chunk stream for `BASE_BACKUP`, per spec §4.2's second producer.
#[derive(Debug)]
pub struct BaseBackupStream {
  receiver: mpsc::Receiver<Bytes>,
  task: tokio::task::JoinHandle<Stream>,
}

impl BaseBackupStream {
  pub(crate) fn spawn(stream: Stream) -> Self {
    let (sender, receiver) = mpsc::channel(1);
    let task = tokio::task::spawn(Self::run(stream, sender));
    Self { receiver, task }
  }

  /// Returns the next chunk, or `None` once the base backup has completed.
  pub async fn recv(&mut self) -> Option<Bytes> {
    self.receiver.recv().await
  }

  pub async fn close(self) -> std::io::Result<()> {
    drop(self.receiver);
    self.task.await.map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;
    Ok(())
  }

  async fn run(mut stream: Stream, sender: mpsc::Sender<Bytes>) -> Stream {
    loop {
      let (op, mut payload) = match stream.read_packet().await {
        Ok(v) => v,
        Err(err) => {
          eprintln!("pg: basebackup read error: {err}");
          return stream;
        }
      };

      match op {
        b'H' => {}
        b'd' => {
          if sender.send(payload).await.is_err() {
            return stream;
          }
        }
        b'c' => {
          // CopyDone: drain the trailing CommandComplete result set(s)
          // the server sends, then one more terminal set, per spec §4.2.
          drain_result_set(&mut stream).await;
          drain_result_set(&mut stream).await;
          return stream;
        }
        b'E' => {
          match payload.pg_get_backend_error() {
            Ok(err) => eprintln!("pg: basebackup backend error: {err}"),
            Err(err) => eprintln!("pg: basebackup backend error (malformed): {err}"),
          }
          return stream;
        }
        other => {
          eprintln!("pg: basebackup unknown tag {:?}", char::from(other));
        }
      }
    }
  }
}

async fn drain_result_set(stream: &mut Stream) {
  loop {
    match stream.read_packet().await {
      Ok((b'C', _)) | Ok((b'Z', _)) => return,
      Ok((b'E', mut payload)) => {
        match payload.pg_get_backend_error() {
          Ok(err) => eprintln!("pg: basebackup drain backend error: {err}"),
          Err(err) => eprintln!("pg: basebackup drain backend error (malformed): {err}"),
        }
        return;
      }
      Ok(_) => continue,
      Err(err) => {
        eprintln!("pg: basebackup drain error: {err}");
        return;
      }
    }
  }
}
