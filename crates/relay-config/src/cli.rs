use std::path::PathBuf;

use clap::Parser;

/// Command-line arguments for the `relay` binary, mirroring the argument
/// style of this codebase's packet-inspection tooling.
#[derive(Debug, Parser)]
#[command(name = "relay", about = "Reverse proxy for the Minecraft Java Edition protocol")]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "./relay.toml")]
    pub config: PathBuf,

    /// Raise the log level (repeatable: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
