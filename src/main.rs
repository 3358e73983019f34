mod analytics;
mod clock;
mod config;
mod context;
mod db;
mod error;
mod ipc;
mod keys;
mod model;
mod registry;
mod responses;
mod sessions;
mod sweep;
mod templates;

use env_logger::Env;
use log::{error, info};
use std::io::{self, BufRead, Write};

fn main() {
    // stdout carries the protocol; logs go to stderr.
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let config = match config::EngineConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("invalid configuration: {:#}", e);
            std::process::exit(2);
        }
    };
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("feedbackd-sweep")
        .enable_time()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("failed to start runtime: {}", e);
            std::process::exit(2);
        }
    };

    let clock = clock::clock_from_config(&config);
    info!(
        "feedbackd {} starting ({})",
        env!("CARGO_PKG_VERSION"),
        config.summary_json()
    );
    let mut state = ipc::AppState::new(config, clock, runtime.handle().clone());

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id; report anyway.
                let _ = writeln!(
                    stdout,
                    "{}",
                    serde_json::json!({
                        "ok": false,
                        "error": { "code": "bad_json", "message": e.to_string() }
                    })
                );
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }

    // Abort the sweeper before the runtime goes away.
    drop(state);
    info!("stdin closed, shutting down");
}
