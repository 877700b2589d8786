// ABOUTME: Command-line interface definition
// ABOUTME: `run` is the default when no subcommand is given

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "streamtalk")]
#[command(version, about = "Live chat companion with card readings")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file (overrides STREAMTALK_CONFIG_PATH and the default search)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Log as JSON lines instead of human-readable text
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Start the reply loop, chat sources, and overlay server
    Run,
    /// Ask a running instance to back up its conversation memory
    Snapshot,
    /// Load and validate the configuration, then print it with secrets redacted
    CheckConfig,
}

impl Cli {
    pub fn command(&self) -> Commands {
        self.command.unwrap_or(Commands::Run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_is_default() {
        let cli = Cli::parse_from(["streamtalk"]);
        assert_eq!(cli.command(), Commands::Run);
    }

    #[test]
    fn test_subcommands_parse() {
        let cli = Cli::parse_from(["streamtalk", "check-config", "--config", "/tmp/c.toml"]);
        assert_eq!(cli.command(), Commands::CheckConfig);
        assert_eq!(cli.config.as_deref(), Some("/tmp/c.toml"));
        assert_eq!(
            Cli::parse_from(["streamtalk", "snapshot"]).command(),
            Commands::Snapshot
        );
    }
}
