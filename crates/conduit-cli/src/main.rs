//! conduit - conda environment synchronization CLI

use std::process::ExitCode;

use clap::Parser;
use crossterm::style::Stylize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use conduit_cli::cmd;
use conduit_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let json = cli.json;

    // Initialize logging; RUST_LOG wins over -v
    let default_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing the current step");
            on_interrupt.cancel();
        }
    });

    match run(cli, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report_error(&err, json),
    }
}

async fn run(cli: Cli, cancel: CancellationToken) -> anyhow::Result<()> {
    let config = cli.load_config()?;
    match cli.command {
        Commands::Install(args) => cmd::install::install(&config, &args.specs, false, cancel).await,
        Commands::Create(args) => cmd::install::install(&config, &args.specs, true, cancel).await,
        Commands::List { .. } => cmd::list::list(&config),
        Commands::Info => cmd::info::info(&config),
    }
}

fn report_error(err: &anyhow::Error, json: bool) -> ExitCode {
    let (kind, code) = err
        .downcast_ref::<conduit_core::Error>()
        .map_or(("unknown", 1), |e| (e.kind(), e.exit_code()));

    if json {
        let value = serde_json::json!({
            "success": false,
            "kind": kind,
            "message": format!("{err:#}"),
        });
        println!("{value}");
    } else {
        eprintln!("{} {err:#}", "error:".red().bold());
    }
    ExitCode::from(code)
}
