//! forza-console - print Forza "Data Out" telemetry as it arrives.

#![deny(clippy::unwrap_used)]

mod commands;
mod printer;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{ListenArgs, SendArgs};

#[derive(Parser)]
#[command(name = "forza-console")]
#[command(about = "Listen for Forza UDP telemetry and print each sample")]
#[command(version)]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bind a port and print every decoded datagram
    Listen(ListenArgs),
    /// Send synthetic datagrams, for checking a listener end to end
    Send(SendArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("forza_console={log_level},forza_ingest_udp={log_level},forza_ingest_core={log_level}")
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Listen(args) => commands::listen(args).await,
        Commands::Send(args) => commands::send(args).await,
    }
}
