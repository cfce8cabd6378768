#![allow(dead_code)]

mod config;
mod error;
mod log;
mod orchestrator;

use std::{path::PathBuf, time::Duration};

use clap::{Arg, Command};

use config::Config;
use log::{log_error, log_info};

#[tokio::main]
async fn main() {
  let matches = Command::new("pgbackup")
    .version("1.0")
    .author("Maxime Bedard <maxime@bedard.dev>")
    .subcommand(Command::new("stream"))
    .subcommand(Command::new("basebackup"))
    .subcommand(Command::new("restore").arg(Arg::new("lsn").required(true)).arg(Arg::new("dir").required(true)))
    .subcommand(Command::new("fetch").arg(Arg::new("segment").required(true)).arg(Arg::new("dest").required(true)))
    .subcommand(Command::new("status"))
    .subcommand(Command::new("setup"))
    .subcommand_required(true)
    .get_matches();

  let (name, args) = matches.subcommand().unwrap();

  if name == "setup" {
    println!("run the pgbackup setup wizard to create ~/pgbackup.conf, then re-run this command");
    return;
  }

  let config_path = match Config::default_path() {
    Ok(path) => path,
    Err(err) => {
      log_error!("could not read ~/pgbackup.conf: {err}");
      std::process::exit(1);
    }
  };
  let config = match Config::load(&config_path) {
    Ok(config) => config,
    Err(err) => {
      log_error!("could not read ~/pgbackup.conf: {err}");
      std::process::exit(1);
    }
  };

  let result = match name {
    "stream" => run_stream_supervisor(&config).await,
    "basebackup" => orchestrator::basebackup(&config).await,
    "restore" => {
      let lsn = args.get_one::<String>("lsn").unwrap();
      let dir = PathBuf::from(args.get_one::<String>("dir").unwrap());
      orchestrator::restore(&config, lsn, &dir).await
    }
    "fetch" => {
      let segment = args.get_one::<String>("segment").unwrap();
      let dest = PathBuf::from(args.get_one::<String>("dest").unwrap());
      orchestrator::fetch(&config, segment, &dest).await
    }
    "status" => orchestrator::status(&config).await,
    _ => unreachable!(),
  };

  if let Err(err) = result {
    log_error!("{err}");
    std::process::exit(1);
  }
}

/// Restarts `orchestrator::stream` on any terminal error, sleeping `n²`
/// seconds (capped at 100) after the `n`-th consecutive failure. Per spec
/// §4.5/§5, `ServerMissingSegment` sets a sticky flag carried into the next
/// attempt so it falls back to the "resync from current LSN" branch.
async fn run_stream_supervisor(config: &Config) -> error::Result<()> {
  let mut restart_count: u32 = 0;
  let mut stream_missing = false;

  loop {
    let err = match orchestrator::stream(config, &mut stream_missing).await {
      Ok(()) => unreachable!("stream only returns on error"),
      Err(err) => err,
    };
    log_error!("{err}");

    restart_count += 1;
    let sleep_secs = (restart_count * restart_count).min(100);
    tokio::time::sleep(Duration::from_secs(sleep_secs as u64)).await;
  }
}
