use std::path::PathBuf;

use clap::{Parser, Subcommand};

use scanward::config::SETTINGS_FILE;

#[derive(Parser, Debug)]
#[command(name = "scanward", version, about = "Tiered malware verdicts for files and URLs")]
pub struct Cli {
    /// Settings file
    #[arg(short, long, global = true, default_value = SETTINGS_FILE, env = "SCANWARD_CONFIG")]
    pub config: PathBuf,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve a URL
    Url { url: String },
    /// Digest and resolve a file
    File { path: PathBuf },
    /// Watch the configured folders until Ctrl+C
    Watch,
    /// Delete cached verdicts older than the retention window
    Purge {
        /// Override the configured retention, in days
        #[arg(long)]
        days: Option<u32>,
    },
    /// List cached verdicts, newest first
    History {
        #[arg(long, default_value_t = 200)]
        limit: usize,
    },
    /// List deny-listed hashes, newest first
    Denylist {
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url_command() {
        let cli = Cli::try_parse_from(["scanward", "url", "http://example.test"]).unwrap();
        assert!(matches!(cli.command, Command::Url { ref url } if url == "http://example.test"));
        assert!(!cli.json);
    }

    #[test]
    fn test_parse_purge_with_days() {
        let cli =
            Cli::try_parse_from(["scanward", "--config", "/etc/sw.json", "purge", "--days", "7"])
                .unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/sw.json"));
        assert!(matches!(cli.command, Command::Purge { days: Some(7) }));
    }

    #[test]
    fn test_history_default_limit() {
        let cli = Cli::try_parse_from(["scanward", "history"]).unwrap();
        assert!(matches!(cli.command, Command::History { limit: 200 }));
    }
}
