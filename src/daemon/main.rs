// SPDX-License-Identifier: Apache-2.0

//! Demo daemon: a line-oriented JSON request loop over [`vrouter::Router`].
//!
//! The request transport and wire framing are external collaborators
//! spec.md declines to specify (§1); this reads one JSON-encoded
//! [`vrouter::Request`] per line from stdin and writes back one JSON-encoded
//! [`vrouter::Response`] per line, so the crate is exercisable end to end
//! without a real NIC driver or client library.

use std::io::BufRead;

use clap::Parser;
use vrouter::{Config, Request, Router};

#[derive(Parser, Debug)]
#[command(name = "vrouterd", about = "Userspace software router control plane")]
struct Cli {
    /// Path to a YAML config file; falls back to `Config::default()`.
    #[arg(short, long)]
    config: Option<String>,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();
    enable_logging(cli.verbose);

    let config = match cli.config {
        Some(path) => match Config::load_from_file(&path) {
            Ok(c) => c,
            Err(e) => {
                log::error!("failed to load config {path}: {e}");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    log::info!("vrouterd starting with config {config:?}");
    let mut router = Router::with_null_driver(config);

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                log::error!("stdin read error: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let resp = handle_line(&mut router, &line);
        match serde_json::to_string(&resp) {
            Ok(s) => println!("{s}"),
            Err(e) => log::error!("failed to encode response: {e}"),
        }
    }
}

fn handle_line(router: &mut Router, line: &str) -> vrouter::Response {
    match serde_json::from_str::<Request>(line) {
        Ok(req) => {
            log::debug!("handling request {req:?}");
            router.handle(req)
        }
        Err(e) => vrouter::Response::Error {
            errno: nix::errno::Errno::EINVAL as i32,
            message: format!("malformed request: {e}"),
        },
    }
}

fn enable_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    let mut log_builder = env_logger::Builder::new();
    log_builder.filter(Some("vrouter"), level);
    log_builder.filter(Some("vrouterd"), level);
    log_builder.init();
}
