//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "meetrag",
    version,
    about = "Search meeting transcripts with hybrid semantic and keyword retrieval",
    long_about = "meetrag indexes the timestamped transcript of a recording into overlapping \
                  time windows and answers free-text questions by combining vector similarity \
                  with keyword search."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/meetrag/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build (or rebuild) the index for a recording
    Index {
        /// Recording directory
        recording: PathBuf,

        /// Show the report in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Query a recording using semantic and keyword search
    Query {
        /// Recording directory
        recording: PathBuf,

        /// Search query text
        query: String,

        /// Maximum number of results to return (defaults to retrieval.default_top_k)
        #[arg(short, long)]
        k: Option<usize>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show index status for a recording
    Status {
        /// Recording directory
        recording: PathBuf,

        /// Show status in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Delete a recording's index
    Delete {
        /// Recording directory
        recording: PathBuf,
    },

    /// Show the chunks a recording's transcript would be indexed as
    Chunks {
        /// Recording directory
        recording: PathBuf,

        /// List the chunks stored in the current index instead
        #[arg(long)]
        indexed: bool,

        /// Show chunks in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
