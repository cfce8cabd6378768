use std::{net::SocketAddr, pin::Pin};

use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use tokio::{
  io::{AsyncReadExt, AsyncWriteExt},
  net::TcpStream,
};
use tokio_openssl::SslStream;

use crate::{
  error::{Error, Result},
  identity::{derive_identity, derive_material},
};

/// Cipher-suite pin from spec §4.3.
const CIPHER_LIST: &str = "ECDHE-ECDSA-AES128-CBC-SHA";

/// A TLS-mutual-auth connection to the storage backend plus the
/// line-oriented command protocol layered on top of it.
///
/// Grounded on the original agent's `Backend` (`backend.go`): `Send`,
/// `Request` (byte-at-a-time line read), and the registration `pgbackup.put
/// email` call made right after the handshake.
#[derive(Debug)]
pub struct Session {
  stream: SslStream<TcpStream>,
}

impl Session {
  /// Connects, derives the deterministic client identity from
  /// `(secret_key, system_id)`, completes the mutual-auth TLS handshake,
  /// and registers `email` via the implicit `pgbackup.put email` upload.
  pub async fn connect(addr: SocketAddr, domain: &str, secret_key: &[u8; 32], system_id: u64, email: &str) -> Result<Self> {
    let material = derive_material(secret_key, system_id);
    let (pkey, cert) = derive_identity(&material)?;

    let mut connector = SslConnector::builder(SslMethod::tls())?;
    connector.set_certificate(&cert)?;
    connector.set_private_key(&pkey)?;
    connector.set_cipher_list(CIPHER_LIST)?;
    // The server authenticates the client by public-key fingerprint; there's
    // no shared CA, so there's nothing for us to verify the server cert
    // against either.
    connector.set_verify(SslVerifyMode::NONE);
    let connector = connector.build();

    let tcp = TcpStream::connect(addr).await?;
    let ssl = connector.configure()?.into_ssl(domain)?;
    let mut stream = SslStream::new(ssl, tcp)?;
    Pin::new(&mut stream).connect().await.map_err(|err| Error::Backend(err.to_string()))?;

    let mut session = Self { stream };
    session.send_line("pgbackup.put email").await?;
    {
      let mut writer = session.chunk_writer();
      writer.write(email.as_bytes()).await?;
      writer.close().await?;
    }

    Ok(session)
  }

  async fn send_line(&mut self, line: &str) -> Result<()> {
    self.stream.write_all(line.as_bytes()).await?;
    self.stream.write_all(b"\n").await?;
    self.stream.flush().await?;
    Ok(())
  }

  /// Reads one byte at a time until LF, per spec §4.3's line reader.
  async fn read_line(&mut self) -> Result<String> {
    let mut line = Vec::new();
    loop {
      let byte = self.stream.read_u8().await?;
      if byte == b'\n' {
        return Ok(String::from_utf8_lossy(&line).into_owned());
      }
      line.push(byte);
    }
  }

  async fn read_exact_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; n];
    self.stream.read_exact(&mut buffer).await?;
    Ok(buffer)
  }

  /// Issues `pgbackup.put <name>` and returns a chunk-framed writer for
  /// the upload body.
  pub async fn put(&mut self, name: &str) -> Result<ChunkWriter<'_>> {
    self.send_line(&format!("pgbackup.put {name}")).await?;
    Ok(self.chunk_writer())
  }

  fn chunk_writer(&mut self) -> ChunkWriter<'_> {
    ChunkWriter { session: self }
  }

  /// Issues `pgbackup.get <name>`. Returns the raw (still encrypted) body
  /// bytes, or `Error::Backend(token)` for a non-hex reply like `notFound`.
  pub async fn get(&mut self, name: &str) -> Result<Vec<u8>> {
    self.send_line(&format!("pgbackup.get {name}")).await?;
    let line = self.read_line().await?;
    let n = i64::from_str_radix(line.trim(), 16).map_err(|_| Error::Backend(line))?;
    self.read_exact_bytes(n as usize).await
  }

  /// Issues `pgbackup.list <kind>`, returning the listed object names in
  /// the order the server sent them (already lexical/chronological).
  pub async fn list(&mut self, kind: &str) -> Result<Vec<String>> {
    self.send_line(&format!("pgbackup.list {kind}")).await?;
    let line = self.read_line().await?;
    Ok(line.split(' ').filter(|s| !s.is_empty()).map(str::to_string).collect())
  }

  /// Issues `pgbackup.status`, returning the raw status body bytes.
  pub async fn status(&mut self) -> Result<Vec<u8>> {
    self.send_line("pgbackup.status").await?;
    let line = self.read_line().await?;
    let n = i64::from_str_radix(line.trim(), 16).map_err(|_| Error::Backend(line))?;
    self.read_exact_bytes(n as usize).await
  }

  pub async fn close(mut self) -> Result<()> {
    self.stream.shutdown().await?;
    Ok(())
  }
}

/// Chunk-framed upload body: each write is `hex_len\n` followed by the
/// bytes; closing emits `0\n`. Zero-length writes are a no-op. Grounded on
/// `backend.go`'s `chunkWriter`.
pub struct ChunkWriter<'a> {
  session: &'a mut Session,
}

impl ChunkWriter<'_> {
  pub async fn write(&mut self, buf: &[u8]) -> Result<()> {
    write_chunk(&mut self.session.stream, buf).await
  }

  pub async fn close(self) -> Result<()> {
    close_chunk(&mut self.session.stream).await
  }
}

/// Writes one chunk frame to `w`. A no-op for an empty `buf` (spec §4.3:
/// "zero-length writes are a no-op").
async fn write_chunk<W: tokio::io::AsyncWrite + Unpin>(w: &mut W, buf: &[u8]) -> Result<()> {
  if buf.is_empty() {
    return Ok(());
  }
  w.write_all(format!("{:x}\n", buf.len()).as_bytes()).await?;
  w.write_all(buf).await?;
  w.flush().await?;
  Ok(())
}

async fn close_chunk<W: tokio::io::AsyncWrite + Unpin>(w: &mut W) -> Result<()> {
  w.write_all(b"0\n").await?;
  w.flush().await?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn chunked_upload_matches_wire_format() {
    let mut sink = Vec::new();
    write_chunk(&mut sink, b"AB").await.unwrap();
    write_chunk(&mut sink, b"CDEF").await.unwrap();
    close_chunk(&mut sink).await.unwrap();
    assert_eq!(sink, b"2\nAB4\nCDEF0\n");
  }

  #[tokio::test]
  async fn empty_upload_is_just_the_terminator() {
    let mut sink = Vec::new();
    close_chunk(&mut sink).await.unwrap();
    assert_eq!(sink, b"0\n");
  }

  #[tokio::test]
  async fn zero_length_write_emits_nothing() {
    let mut sink = Vec::new();
    write_chunk(&mut sink, b"").await.unwrap();
    assert!(sink.is_empty());
  }
}
