use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Roomkeeper: keeps an agent present in the rooms it has joined.
#[derive(Parser, Debug)]
#[command(name = "roomkeeper", version, about)]
pub struct Args {
    /// Config file path override.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Keep the room list in memory only.
    #[arg(long, global = true)]
    pub ephemeral: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Connect to every joined room and stay until Ctrl-C.
    Run,
    /// Add a room to the joined list.
    Join(RoomArgs),
    /// Remove a room from the joined list.
    Leave(RoomArgs),
    /// Remove every room from the joined list.
    LeaveAll,
    /// Print the joined rooms.
    List,
}

#[derive(clap::Args, Debug, PartialEq, Eq)]
pub struct RoomArgs {
    /// Room name.
    #[arg(long)]
    pub room: String,

    /// Realtime endpoint URL (ws:// or wss://).
    #[arg(long)]
    pub endpoint: String,
}

pub fn parse() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_takes_room_and_endpoint() {
        let args = Args::try_parse_from([
            "roomkeeper",
            "join",
            "--room",
            "lobby",
            "--endpoint",
            "wss://rooms.example",
        ])
        .unwrap();
        assert_eq!(
            args.command,
            Command::Join(RoomArgs {
                room: "lobby".into(),
                endpoint: "wss://rooms.example".into(),
            })
        );
        assert!(!args.ephemeral);
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let args =
            Args::try_parse_from(["roomkeeper", "run", "--ephemeral", "--log-level", "debug"])
                .unwrap();
        assert_eq!(args.command, Command::Run);
        assert!(args.ephemeral);
        assert_eq!(args.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn leave_all_is_kebab_case() {
        let args = Args::try_parse_from(["roomkeeper", "leave-all"]).unwrap();
        assert_eq!(args.command, Command::LeaveAll);
    }

    #[test]
    fn join_without_endpoint_is_rejected() {
        assert!(Args::try_parse_from(["roomkeeper", "join", "--room", "lobby"]).is_err());
    }
}
