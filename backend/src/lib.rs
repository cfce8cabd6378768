#![allow(dead_code)]

pub mod cipher;
pub mod error;
pub mod identity;
pub mod session;

pub use cipher::ObjectCipher;
pub use error::{Error, Result};
pub use session::{ChunkWriter, Session};
