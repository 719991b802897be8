use clap::{Parser, Subcommand};
use erapotd::config::{Config, Overrides};
use erapotd::ipc::{self, AppState};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "erapotd", version, about = "E-RAPOT records daemon")]
struct Cli {
    /// Workspace directory holding erapot.sqlite3.
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,
    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the request API over HTTP instead of stdio.
    Serve {
        #[arg(long)]
        bind: Option<String>,
    },
}

fn init_tracing(log_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries the protocol; logs must stay on stderr.
    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .init();
    }
}

fn run_stdio(mut state: AppState) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "stdin read failed; stopping");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => {
                warn!(error = %e, "malformed request line");
                // No id to echo back.
                ipc::err("", "bad_json", e.to_string(), None)
            }
        };
        let text = serde_json::to_string(&resp)
            .unwrap_or_else(|_| "{\"ok\":false,\"error\":{\"code\":\"internal\"}}".to_string());
        if writeln!(stdout, "{}", text).and_then(|_| stdout.flush()).is_err() {
            break;
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let bind = match &cli.command {
        Some(Command::Serve { bind }) => bind.clone(),
        None => None,
    };
    let config = match Config::from_env(Overrides {
        workspace: cli.workspace.clone(),
        bind,
        log_json: cli.log_json,
        serve: matches!(cli.command, Some(Command::Serve { .. })),
    }) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("erapotd: {e}");
            return ExitCode::from(2);
        }
    };
    init_tracing(config.log_json);

    let mut state = AppState::default();
    if let Some(ws) = config.workspace.clone() {
        if let Err(e) = state.open_workspace(ws.clone()) {
            error!(workspace = %ws.to_string_lossy(), error = %format!("{e:#}"), "failed to open workspace");
            return ExitCode::FAILURE;
        }
    }

    match cli.command {
        None => {
            info!(version = env!("CARGO_PKG_VERSION"), "stdio transport ready");
            run_stdio(state);
            ExitCode::SUCCESS
        }
        Some(Command::Serve { .. }) => {
            let runtime = match tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!(error = %e, "failed to start async runtime");
                    return ExitCode::FAILURE;
                }
            };
            let shared = Arc::new(Mutex::new(state));
            match runtime.block_on(erapotd::http::serve(&config, shared)) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    error!(error = %format!("{e:#}"), "http transport failed");
                    ExitCode::FAILURE
                }
            }
        }
    }
}
