//! roomkeeper: keeps an autonomous participant present in its rooms.
//!
//! `run` connects to every joined room and reconnects dropped rooms until
//! Ctrl-C. The other subcommands edit the persisted room list without
//! connecting.

mod cli;
mod commands;
mod setup;

use std::process::ExitCode;

use roomkeeper_common::RoomkeeperError;
use roomkeeper_config::toml_loader::default_data_dir;
use tracing_subscriber::EnvFilter;

use crate::cli::{Args, Command};

/// A bare level applies to the roomkeeper crates; anything else is taken
/// as a full filter directive.
fn log_directive(level: &str) -> String {
    if level.contains('=') {
        level.to_string()
    } else {
        format!("roomkeeper={level}")
    }
}

fn init_logging(level: &str) {
    let directive = log_directive(level);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(
                directive
                    .parse()
                    .unwrap_or_else(|_| tracing_subscriber::filter::LevelFilter::INFO.into()),
            ),
        )
        .init();
}

async fn execute(args: Args) -> Result<(), RoomkeeperError> {
    let (config, source) = setup::load_config(args.config.as_deref())?;
    init_logging(
        args.log_level
            .as_deref()
            .unwrap_or(config.logging.level.as_str()),
    );
    tracing::info!("roomkeeper v{} starting...", env!("CARGO_PKG_VERSION"));
    source.report();

    let data_dir = match default_data_dir() {
        Ok(dir) => Some(dir),
        Err(e) => {
            tracing::warn!("No data directory: {e}");
            None
        }
    };
    let ephemeral = args.ephemeral || config.membership.ephemeral;
    let participant = setup::resolve_participant(
        &config.participant,
        if ephemeral { None } else { data_dir.as_deref() },
    )?;
    let persistence =
        setup::open_persistence(&config.membership, args.ephemeral, data_dir.as_deref())?;

    match args.command {
        Command::Run => commands::run(&config, participant, persistence).await,
        Command::Join(room) => {
            let spec = commands::join(&participant, persistence, room).await?;
            println!("joined {spec}");
            Ok(())
        }
        Command::Leave(room) => {
            let spec = commands::leave(&participant, persistence, room).await?;
            println!("left {spec}");
            Ok(())
        }
        Command::LeaveAll => commands::leave_all(&participant, persistence).await,
        Command::List => {
            for spec in commands::list(&participant, persistence).await? {
                println!("{}\t{}", spec.room, spec.endpoint_url);
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::parse();
    match execute(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "roomkeeper failed");
            eprintln!("roomkeeper: {e}");
            ExitCode::FAILURE
        }
    }
}
