mod calc;
mod cli;
mod db;
mod ipc;
mod logging;
mod model;
mod status;
mod store;

use clap::Parser;
use std::io::{self, BufRead, Write};

fn main() {
    let cli = cli::Cli::parse();
    logging::init(cli.verbose);

    let mut state = ipc::AppState::default();
    if let Some(path) = cli.workspace {
        // A bad startup workspace is not fatal; the client can still select one.
        if let Err(e) = state.open_workspace(path.clone()) {
            tracing::error!(workspace = %path.display(), error = ?e, "startup workspace failed");
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => {
                // No id to echo back.
                tracing::warn!(error = %e, "unparseable request");
                let mut v = ipc::err("", "bad_json", e.to_string(), None);
                if let Some(obj) = v.as_object_mut() {
                    obj.remove("id");
                }
                v
            }
        };

        let out = serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string());
        if writeln!(stdout, "{}", out).and_then(|_| stdout.flush()).is_err() {
            break;
        }
    }
    tracing::debug!("stdin closed, exiting");
}
