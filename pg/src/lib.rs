#![allow(dead_code)]

mod buf_ext;
pub mod conn;
pub mod error;
pub mod lsn;
pub mod query;
mod stream;
pub mod wal;

pub use conn::{Connection, ConnectionOptions};
pub use error::{Error, Result};
pub use lsn::{IllegalLsn, Lsn};
pub use query::{BaseBackupStart, Column, IdentifySystem, QueryResult, QueryResults, SelectQueryResult, Value};
pub use wal::{BaseBackupStream, ReplicationStream, WalRecord};
