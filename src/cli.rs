//! CLI argument parsing for Vigil

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for build identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "vigil")]
#[command(version)]
#[command(about = "Runtime security event pipeline: fingerprinting, attribution and IAST exit correlation", long_about = None)]
pub struct Cli {
    /// Enable debug tracing output to stderr
    #[arg(long = "debug", global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the operations of a replay document through the pipeline
    Replay {
        /// Replay document (JSON)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Print outcome counts instead of the emitted events
        #[arg(short = 'c', long = "summary")]
        summary: bool,

        /// Agent configuration file (TOML)
        #[arg(long = "config", value_name = "TOML")]
        config: Option<PathBuf>,
    },

    /// Print the build identity compiled into this binary
    BuildInfo {
        /// Output format (text or json)
        #[arg(long = "format", value_enum, default_value = "text")]
        format: OutputFormat,
    },
}
