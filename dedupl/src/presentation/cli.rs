use clap::{Args, Parser, Subcommand};
use dedupl_core::HashAlgorithm;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "dedupl: fixed-size segment deduplication", long_about = None)]
pub struct Cli {
    /// TOML file with a [dedupl] section (otherwise DEDUPL_* env vars)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Repository directory; overrides the configured root
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Debug logging (RUST_LOG still wins when set)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Selects one recipe: a file plus the pass it was ingested under.
#[derive(Args, Clone, Debug)]
pub struct PassArgs {
    /// File id or display name
    pub file: String,

    #[arg(short = 's', long)]
    pub segment_size: usize,

    #[arg(short = 'a', long = "algo")]
    pub algorithm: HashAlgorithm,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ingest files at one segment size under one or more algorithms
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        #[arg(short = 's', long)]
        segment_size: usize,

        /// Repeatable; defaults to every configured algorithm
        #[arg(short = 'a', long = "algo")]
        algorithms: Vec<HashAlgorithm>,
    },

    /// Rebuild a file into an output path
    Restore {
        #[command(flatten)]
        pass: PassArgs,

        #[arg(short, long)]
        out: PathBuf,
    },

    /// Stream a file (or range) to stdout
    Cat {
        #[command(flatten)]
        pass: PassArgs,

        #[arg(long, default_value_t = 0)]
        start: u64,

        #[arg(long)]
        len: Option<u64>,
    },

    /// List registered files and their completed passes
    List,

    /// Print the recipe (segment map) of one file
    Recipe {
        #[command(flatten)]
        pass: PassArgs,
    },

    /// Rebuild a file in memory and check it against its fingerprint
    Verify {
        /// File id or display name
        file: String,

        /// Only this segment size (default: every completed pass)
        #[arg(short = 's', long)]
        segment_size: Option<usize>,

        /// Only this algorithm (default: every completed pass)
        #[arg(short = 'a', long = "algo")]
        algorithm: Option<HashAlgorithm>,
    },

    /// Physical and logical totals per segment size
    Stats,

    /// Ingest every file in a directory at every configured segment size
    Bench {
        dir: PathBuf,

        /// CSV report path
        #[arg(long, default_value = "benchmark_results.csv")]
        csv: PathBuf,

        /// Run files concurrently
        #[arg(long)]
        parallel: bool,
    },
}
