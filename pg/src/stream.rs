use std::{
  io,
  net::SocketAddr,
  path::PathBuf,
  pin::Pin,
  task::{Context, Poll},
};

use bytes::{Bytes, BytesMut};
use tokio::{
  io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream, ReadBuf},
  net::{TcpStream, UnixStream},
};

/// The raw transport underneath a `Connection`: TCP or a Unix domain
/// socket, selected by the connection string's `host` field (spec §6).
///
/// Grounded on the teacher's `pg/src/stream.rs::Stream`, with the SSL
/// variant dropped — this spec never puts the Postgres wire protocol
/// itself behind TLS (only the backend storage channel is, and that's a
/// different protocol handled by the `backend` crate).
#[derive(Debug)]
pub enum Stream {
  Tcp(BufStream<TcpStream>, Vec<SocketAddr>),
  Unix(BufStream<UnixStream>, PathBuf),
}

impl Stream {
  pub async fn connect_tcp(addrs: impl Into<Vec<SocketAddr>>) -> io::Result<Self> {
    let addrs = addrs.into();
    let s = TcpStream::connect(addrs.as_slice()).await.map(BufStream::new)?;
    Ok(Self::Tcp(s, addrs))
  }

  pub async fn connect_unix(path: impl Into<PathBuf>) -> io::Result<Self> {
    let path = path.into();
    let s = UnixStream::connect(&path).await.map(BufStream::new)?;
    Ok(Self::Unix(s, path))
  }

  pub async fn duplicate(&self) -> io::Result<Self> {
    match self {
      Stream::Tcp(_, addrs) => Self::connect_tcp(addrs.clone()).await,
      Stream::Unix(_, path) => Self::connect_unix(path.clone()).await,
    }
  }

  /// Reads one `tag:u8 || length:u32be || payload[length-4]` frame.
  pub async fn read_packet(&mut self) -> io::Result<(u8, Bytes)> {
    let op = self.read_u8().await?;
    let len: usize = (self.read_i32().await? - 4).try_into().map_err(|_| {
      io::Error::new(io::ErrorKind::InvalidData, "negative frame length")
    })?;
    let mut buffer = BytesMut::with_capacity(len);
    while buffer.len() < len {
      if self.read_buf(&mut buffer).await? == 0 {
        return Err(io::ErrorKind::UnexpectedEof.into());
      }
    }
    Ok((op, buffer.freeze()))
  }
}

impl AsyncRead for Stream {
  fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
    match self.get_mut() {
      Stream::Tcp(s, _) => Pin::new(s).poll_read(cx, buf),
      Stream::Unix(s, _) => Pin::new(s).poll_read(cx, buf),
    }
  }
}

impl AsyncWrite for Stream {
  fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<Result<usize, io::Error>> {
    match self.get_mut() {
      Stream::Tcp(s, _) => Pin::new(s).poll_write(cx, buf),
      Stream::Unix(s, _) => Pin::new(s).poll_write(cx, buf),
    }
  }

  fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
    match self.get_mut() {
      Stream::Tcp(s, _) => Pin::new(s).poll_flush(cx),
      Stream::Unix(s, _) => Pin::new(s).poll_flush(cx),
    }
  }

  fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
    match self.get_mut() {
      Stream::Tcp(s, _) => Pin::new(s).poll_shutdown(cx),
      Stream::Unix(s, _) => Pin::new(s).poll_shutdown(cx),
    }
  }
}
