use chrono::Local;

/// Timestamp prefix matching the original agent's `log.Print` output
/// (`YYYY/MM/DD HH:MM:SS`), wrapping the teacher's bare `println!`/
/// `eprintln!` call sites (`src/bin/mysql.rs`) instead of pulling in a
/// logging framework.
pub fn timestamp() -> String {
  Local::now().format("%Y/%m/%d %H:%M:%S").to_string()
}

macro_rules! log_info {
  ($($arg:tt)*) => {
    println!("{} {}", $crate::log::timestamp(), format!($($arg)*))
  };
}

macro_rules! log_error {
  ($($arg:tt)*) => {
    eprintln!("{} {}", $crate::log::timestamp(), format!($($arg)*))
  };
}

pub(crate) use log_error;
pub(crate) use log_info;
