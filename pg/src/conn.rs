use std::{
  collections::BTreeMap,
  net::{SocketAddr, SocketAddrV4, SocketAddrV6},
  path::PathBuf,
  str::FromStr,
};

use bytes::Buf;
use md5::{Digest, Md5};
use tokio::{io::AsyncWriteExt, net};

use crate::{
  buf_ext::{BufExt, WriteCursor},
  error::{Error, Result},
  lsn::Lsn,
  query::{BaseBackupStart, Column, IdentifySystem, QueryResult, QueryResults, SelectQueryResult, Value},
  stream::Stream,
  wal::{BaseBackupStream, ReplicationStream},
};

const PROTOCOL_VERSION: i32 = 196608;

/// Options parsed from spec §6's connection-string grammar.
///
/// Grounded on the original agent's `parseConnString` (`pg/conn.go`); the
/// teacher's `pg/src/conn.rs` parses a `url::Url` instead, which models a
/// different (URL-shaped) input this spec doesn't use.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
  pub user: String,
  pub password: Option<String>,
  pub database: Option<String>,
  /// Every other key from the connection string (e.g. `replication=true`),
  /// forwarded verbatim into the startup packet. Spec §4.2: "a flat list of
  /// `key\0value\0…` from the option map, minus `password`".
  pub extra: BTreeMap<String, String>,
}

impl Default for ConnectionOptions {
  fn default() -> Self {
    Self { user: "postgres".to_string(), password: None, database: None, extra: BTreeMap::new() }
  }
}

#[derive(Debug, Clone)]
enum Endpoint {
  Tcp { host: String, port: u16 },
  Unix { path: PathBuf, port: u16 },
}

/// Parses a connection string and splits it into a transport endpoint plus
/// the options sent in the startup packet. Deliberately permissive (no
/// quoting support) — preserved from the original, flagged as an open
/// question there and here (see DESIGN.md).
fn parse_connection_string(s: &str) -> Result<(Endpoint, ConnectionOptions)> {
  let mut opts: BTreeMap<String, String> = BTreeMap::new();
  opts.insert("user".to_string(), "postgres".to_string());
  opts.insert("database".to_string(), "postgres".to_string());

  let mut host = "localhost".to_string();
  let mut port: u16 = 5432;
  let mut is_unix = false;

  for kv in s.split(' ') {
    let Some((k, v)) = kv.split_once('=') else { continue };
    match k {
      "dbname" => {
        opts.insert("database".to_string(), v.to_string());
      }
      "replication" if v == "true" => {
        opts.insert("replication".to_string(), "database".to_string());
      }
      "host" if v.starts_with('/') || v.starts_with('.') => {
        is_unix = true;
        host = v.to_string();
      }
      "host" => {
        is_unix = false;
        host = v.to_string();
      }
      "port" => {
        if let Ok(p) = v.parse() {
          port = p;
        }
      }
      _ => {
        opts.insert(k.to_string(), v.to_string());
      }
    }
  }

  let password = opts.remove("password");
  let user = opts.remove("user").unwrap_or_else(|| "postgres".to_string());
  let database = opts.remove("database");
  // Whatever's left (e.g. `replication`) still has to reach the server.
  let extra = opts;

  let endpoint = if is_unix { Endpoint::Unix { path: host.into(), port } } else { Endpoint::Tcp { host, port } };

  Ok((endpoint, ConnectionOptions { user, password, database, extra }))
}

#[derive(Debug)]
pub struct Connection {
  stream: Stream,
  options: ConnectionOptions,
  metadata: BTreeMap<String, String>,
}

impl Connection {
  pub async fn connect(conn_string: &str) -> Result<Self> {
    let (endpoint, options) = parse_connection_string(conn_string)?;
    let stream = match endpoint {
      Endpoint::Tcp { host, port } => {
        let addrs = match host.parse::<std::net::IpAddr>() {
          Ok(std::net::IpAddr::V4(ip)) => vec![SocketAddr::V4(SocketAddrV4::new(ip, port))],
          Ok(std::net::IpAddr::V6(ip)) => vec![SocketAddr::V6(SocketAddrV6::new(ip, port, 0, 0))],
          Err(_) => net::lookup_host(format!("{host}:{port}")).await?.collect::<Vec<_>>(),
        };
        Stream::connect_tcp(addrs).await?
      }
      Endpoint::Unix { path, port } => {
        let socket_path = path.join(format!(".s.PGSQL.{port}"));
        Stream::connect_unix(socket_path).await?
      }
    };
    Self::connect_with(stream, options).await
  }

  async fn connect_with(stream: Stream, options: ConnectionOptions) -> Result<Self> {
    let mut connection = Self { stream, options, metadata: BTreeMap::new() };
    connection.startup().await?;
    Ok(connection)
  }

  pub async fn duplicate(&self) -> Result<Self> {
    let stream = self.stream.duplicate().await?;
    Self::connect_with(stream, self.options.clone()).await
  }

  pub fn server_version(&self) -> Option<&str> {
    self.metadata.get("server_version").map(String::as_str)
  }

  async fn startup(&mut self) -> Result<()> {
    let mut params: Vec<(&str, &str)> = vec![("user", self.options.user.as_str())];
    if let Some(database) = self.options.database.as_ref() {
      params.push(("database", database.as_str()));
    }
    for (k, v) in &self.options.extra {
      params.push((k.as_str(), v.as_str()));
    }

    let mut body = WriteCursor::new();
    body.i32(PROTOCOL_VERSION);
    for (k, v) in &params {
      body.cstring(k);
      body.cstring(v);
    }
    body.byte(0);

    self.stream.write_i32((body.len() + 4) as i32).await?;
    self.stream.write_all(&body.into_inner()).await?;
    self.stream.flush().await?;

    self.authenticate().await?;

    loop {
      let (op, mut buffer) = self.stream.read_packet().await?;
      match op {
        b'K' => {}
        b'S' => {
          let key = buffer.pg_get_null_terminated_string()?;
          let value = buffer.pg_get_null_terminated_string()?;
          self.metadata.insert(key, value);
        }
        b'Z' => {
          if buffer.get_u8() != b'I' {
            return Err(Error::Protocol("not ready after startup".to_string()));
          }
          return Ok(());
        }
        b'E' => return Err(buffer.pg_get_backend_error()?),
        b'N' => {}
        code => return Err(Error::Protocol(format!("unexpected message {:?} during startup", char::from(code)))),
      }
    }
  }

  async fn authenticate(&mut self) -> Result<()> {
    let (op, mut buffer) = self.stream.read_packet().await?;
    if op != b'R' {
      if op == b'E' {
        return Err(buffer.pg_get_backend_error()?);
      }
      return Err(Error::Protocol(format!("unexpected message {:?} during authentication", char::from(op))));
    }

    match buffer.get_i32() {
      0 => return Ok(()),
      3 => {
        let password = self.options.password.clone().ok_or_else(|| Error::Protocol("password is required".to_string()))?;
        let mut body = WriteCursor::new();
        body.cstring(&password);
        self.send_message(b'p', body).await?;
      }
      5 => {
        let password = self.options.password.clone().ok_or_else(|| Error::Protocol("password is required".to_string()))?;
        let mut salt = [0u8; 4];
        buffer.copy_to_slice(&mut salt);

        let mut md5 = Md5::new();
        md5.update(password.as_bytes());
        md5.update(self.options.user.as_bytes());
        let inner = md5.finalize_reset();
        md5.update(format!("{inner:x}"));
        md5.update(salt);
        let hashed = format!("md5{:x}", md5.finalize());

        let mut body = WriteCursor::new();
        body.cstring(&hashed);
        self.send_message(b'p', body).await?;
      }
      code => return Err(Error::UnsupportedAuth(code)),
    }

    let (op, mut buffer) = self.stream.read_packet().await?;
    match op {
      b'R' if buffer.get_i32() == 0 => Ok(()),
      b'E' => Err(buffer.pg_get_backend_error()?),
      _ => Err(Error::Protocol("authentication not acknowledged".to_string())),
    }
  }

  async fn send_message(&mut self, tag: u8, body: WriteCursor) -> Result<()> {
    self.stream.write_u8(tag).await?;
    self.stream.write_i32((body.len() + 4) as i32).await?;
    self.stream.write_all(&body.into_inner()).await?;
    self.stream.flush().await?;
    Ok(())
  }

  async fn write_query_command(&mut self, query: &str) -> Result<()> {
    let mut body = WriteCursor::new();
    body.cstring(query);
    self.send_message(b'Q', body).await
  }

  pub async fn ping(&mut self) -> Result<()> {
    self.query_first("SELECT 1").await.map(|_| ())
  }

  pub async fn query_first(&mut self, query: &str) -> Result<QueryResult> {
    let mut results = self.query(query).await?;
    results.results.pop_front().ok_or_else(|| Error::Protocol("missing query result".to_string()))
  }

  pub async fn query(&mut self, query: &str) -> Result<QueryResults> {
    self.write_query_command(query).await?;

    let mut results = QueryResults::default();
    let mut current: Option<SelectQueryResult> = None;

    loop {
      let (op, mut buffer) = self.stream.read_packet().await?;
      match op {
        b'C' => {
          buffer.pg_get_null_terminated_string()?;
          match current.take() {
            Some(selected) => results.results.push_back(QueryResult::Selected(selected)),
            None => results.results.push_back(QueryResult::Success),
          }
        }
        b'T' => {
          let num_columns = buffer.get_i16();
          let mut columns = Vec::with_capacity(num_columns as usize);
          for _ in 0..num_columns {
            let name = buffer.pg_get_null_terminated_string()?;
            let oid = buffer.get_i32();
            let attr_number = buffer.get_i16();
            let datatype_oid = buffer.get_i32();
            let datatype_size = buffer.get_i16();
            let type_modifier = buffer.get_i32();
            let format = buffer.get_i16();
            columns.push(Column { name, oid, attr_number, datatype_oid, datatype_size, type_modifier, format });
          }
          current = Some(SelectQueryResult { columns, rows: Vec::new() });
        }
        b'D' => {
          let selected = current.as_mut().ok_or_else(|| Error::Protocol("data row without row description".to_string()))?;
          let num_values = buffer.get_i16();
          let mut row = Vec::with_capacity(num_values as usize);
          for i in 0..num_values as usize {
            let len = buffer.get_i32();
            if len == -1 {
              row.push(None);
            } else {
              let raw = buffer.copy_to_bytes(len as usize);
              let column = &selected.columns[i];
              row.push(Value::decode(&raw, column.datatype_oid, column.format).or_else(|| {
                eprintln!("pg: unrecognized column type oid={} format={}", column.datatype_oid, column.format);
                None
              }));
            }
          }
          selected.rows.push(row);
        }
        b'I' => results.results.push_back(QueryResult::Success),
        b'Z' => break,
        b'E' => {
          let err = buffer.pg_get_backend_error()?;
          results.results.push_back(QueryResult::BackendError(err.to_string()));
        }
        b'N' => {}
        code => return Err(Error::Protocol(format!("unexpected message {:?} during query", char::from(code)))),
      }
    }

    Ok(results)
  }

  pub async fn identify_system(&mut self) -> Result<IdentifySystem> {
    let result = self.query_first("IDENTIFY_SYSTEM").await?.as_selected().ok_or_else(|| Error::Protocol("IDENTIFY_SYSTEM returned no rows".to_string()))?;
    let row = result.rows.first().ok_or_else(|| Error::Protocol("IDENTIFY_SYSTEM returned no rows".to_string()))?;
    if row.len() != 4 {
      return Err(Error::Protocol("IDENTIFY_SYSTEM returned unexpected column count".to_string()));
    }

    let system_id = row[0]
      .as_ref()
      .and_then(Value::as_str)
      .ok_or_else(|| Error::Protocol("IDENTIFY_SYSTEM missing system id".to_string()))?
      .parse::<u64>()
      .map_err(|_| Error::Protocol("IDENTIFY_SYSTEM system id is not a u64".to_string()))?;

    let timeline = match &row[1] {
      Some(Value::Int(v)) => *v,
      Some(Value::Text(s)) => s.parse().map_err(|_| Error::Protocol("IDENTIFY_SYSTEM timeline is not an integer".to_string()))?,
      _ => return Err(Error::Protocol("IDENTIFY_SYSTEM missing timeline".to_string())),
    };

    let lsn = row[2]
      .as_ref()
      .and_then(Value::as_str)
      .ok_or_else(|| Error::Protocol("IDENTIFY_SYSTEM missing lsn".to_string()))?
      .parse::<Lsn>()
      .map_err(|_| Error::Protocol("IDENTIFY_SYSTEM lsn is malformed".to_string()))?;

    let dbname = row[3].as_ref().and_then(Value::as_str).map(str::to_string);

    Ok(IdentifySystem { system_id, timeline, lsn, dbname })
  }

  /// Issues `START_REPLICATION` from `lsn` and returns a lazy sequence of
  /// WAL records. Consumes the connection: from this point the transport
  /// belongs to the replication session.
  pub async fn start_replication(mut self, lsn: Lsn) -> Result<ReplicationStream> {
    self.write_query_command(&format!("START_REPLICATION {lsn}")).await?;

    loop {
      let (op, buffer) = self.stream.read_packet().await?;
      match op {
        b'W' => break,
        b'E' => {
          let mut buffer = buffer;
          return Err(buffer.pg_get_backend_error()?);
        }
        _ => continue,
      }
    }

    Ok(ReplicationStream::spawn(self.stream))
  }

  /// Issues `BASE_BACKUP ... NOWAIT` and returns the start LSN/timeline
  /// plus a lazy sequence of archive byte chunks.
  pub async fn base_backup(mut self, label: &str) -> Result<(BaseBackupStart, BaseBackupStream)> {
    self.write_query_command(&format!("BASE_BACKUP LABEL '{label}' NOWAIT")).await?;

    let result = self.read_result_set().await?;
    if result.len() != 1 || result[0].len() != 2 {
      return Err(Error::Protocol("BASE_BACKUP returned unexpected shape".to_string()));
    }
    let lsn = result[0][0].as_ref().and_then(Value::as_str).ok_or_else(|| Error::Protocol("BASE_BACKUP missing start lsn".to_string()))?.parse::<Lsn>().map_err(|_| Error::Protocol("BASE_BACKUP start lsn is malformed".to_string()))?;
    let timeline = match &result[0][1] {
      Some(Value::Int(v)) => *v,
      Some(Value::Text(s)) => s.parse().map_err(|_| Error::Protocol("BASE_BACKUP timeline is not an integer".to_string()))?,
      _ => return Err(Error::Protocol("BASE_BACKUP missing timeline".to_string())),
    };

    // tablespace mapping result set: read and discard.
    self.read_result_set().await?;

    Ok((BaseBackupStart { lsn, timeline }, BaseBackupStream::spawn(self.stream)))
  }

  /// Reads one `T`/`D`*/`C` result set (no `Z` wait — used mid-`BASE_BACKUP`
  /// where the server doesn't send `ReadyForQuery` between result sets).
  async fn read_result_set(&mut self) -> Result<Vec<Vec<Option<Value>>>> {
    let mut columns: Vec<Column> = Vec::new();
    let mut rows = Vec::new();

    loop {
      let (op, mut buffer) = self.stream.read_packet().await?;
      match op {
        b'T' => {
          let num_columns = buffer.get_i16();
          columns = Vec::with_capacity(num_columns as usize);
          for _ in 0..num_columns {
            let name = buffer.pg_get_null_terminated_string()?;
            let oid = buffer.get_i32();
            let attr_number = buffer.get_i16();
            let datatype_oid = buffer.get_i32();
            let datatype_size = buffer.get_i16();
            let type_modifier = buffer.get_i32();
            let format = buffer.get_i16();
            columns.push(Column { name, oid, attr_number, datatype_oid, datatype_size, type_modifier, format });
          }
        }
        b'D' => {
          let num_values = buffer.get_i16();
          let mut row = Vec::with_capacity(num_values as usize);
          for i in 0..num_values as usize {
            let len = buffer.get_i32();
            if len == -1 {
              row.push(None);
            } else {
              let raw = buffer.copy_to_bytes(len as usize);
              row.push(Value::decode(&raw, columns[i].datatype_oid, columns[i].format));
            }
          }
          rows.push(row);
        }
        b'C' => return Ok(rows),
        b'E' => return Err(buffer.pg_get_backend_error()?),
        _ => continue,
      }
    }
  }

  pub async fn close(mut self) -> Result<()> {
    self.stream.write_u8(b'X').await?;
    self.stream.write_i32(4).await?;
    self.stream.shutdown().await?;
    Ok(())
  }
}
