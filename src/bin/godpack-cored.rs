//! The `godpack-cored` daemon: loads configuration, opens the datastore,
//! and runs until interrupted. Exit codes per spec §6: `0` clean shutdown,
//! `1` configuration error, `2` datastore startup failure, `3` migration
//! failure.

use std::{env, process::exit, sync::Arc};

use godpack_core::{Config, Core, Error};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let config_path = parse_args();
    let config = match Config::load(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to load configuration: {e}");
            exit(1);
        }
    };

    let core = match Core::start(&config) {
        Ok(c) => c,
        Err(Error::Migration(e)) => {
            error!("schema migration failed: {e}");
            exit(3);
        }
        Err(e) => {
            error!("failed to start godpack-core: {e}");
            exit(2);
        }
    };

    let core = Arc::new(tokio::sync::Mutex::new(Some(core)));
    let wait_for_signal = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => error!("failed to listen for shutdown signal: {e}"),
        }
    };
    wait_for_signal.await;

    let mut guard = core.lock().await;
    if let Some(core) = guard.take() {
        core.shutdown().await;
    }
    exit(0);
}

fn parse_args() -> Option<String> {
    let args: Vec<String> = env::args().collect();
    if args.len() <= 1 {
        return None;
    }
    match args[1].as_str() {
        "-h" | "--help" => {
            println!("{} {}", bin(), version());
            println!();
            println!(
                "USAGE: \
                \n    {} [CONFIG] \
                \n \
                \nFLAGS: \
                \n    -h, --help       Prints help information \
                \n    -V, --version    Prints version information \
                \n \
                \nARG: \
                \n    <CONFIG>    A TOML config file",
                bin()
            );
            exit(0);
        }
        "-V" | "--version" => {
            println!("{}", version());
            exit(0);
        }
        _ => Some(args[1].clone()),
    }
}

fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

fn bin() -> &'static str {
    env!("CARGO_BIN_NAME")
}
