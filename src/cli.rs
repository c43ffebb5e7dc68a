use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "clipmill")]
#[command(author, version, about = "Convert local video files to MP4")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert one or more files to MP4
    Convert {
        /// Input files to convert
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Run all conversions concurrently, one engine per file
        #[arg(long)]
        parallel: bool,

        /// Directory for converted files (defaults to each input's directory)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Probe a media file and print its duration
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },
}
