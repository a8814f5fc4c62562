mod backup;
mod config;
mod db;
mod ipc;
mod logging;
mod seating;

use std::io::{self, BufRead, Write};
use tracing::{info, warn};

fn main() {
    let cfg = match config::DaemonConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("examhalld: {e}");
            std::process::exit(2);
        }
    };
    logging::init(&cfg.log_filter);
    info!(version = env!("CARGO_PKG_VERSION"), "examhalld starting");

    let mut state = ipc::AppState::new();
    if let Some(path) = cfg.workspace.as_ref() {
        match state.open_workspace(path) {
            Ok(()) => info!(workspace = %path.display(), "opened workspace from environment"),
            Err(e) => warn!(workspace = %path.display(), error = %e, "could not open workspace"),
        }
    }

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
                // Can't reply without id.
                warn!(error = %e, "dropping malformed request line");
                let body = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", body);
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
    info!("stdin closed, shutting down");
}
