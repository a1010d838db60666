pub mod bench;
pub mod handlers;

use crate::presentation::cli::{Cli, Commands};
use clap::Parser;
use dedupl_core::error::Result;
use dedupl_core::repo::DedupRepo;
use dedupl_core::repo_factory::{Backend, open_repo};
use dedupl_core::EngineConfig;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // stdout carries `cat` output; logs go to stderr.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut cfg = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::from_env()?,
    };
    if let Some(root) = &cli.root {
        cfg.root = root.clone();
    }
    Ok(cfg)
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let repo: Box<dyn DedupRepo> = open_repo(Backend::Fs, load_config(&cli)?)?;
    let repo = repo.as_ref();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Commands::Ingest {
            paths,
            segment_size,
            algorithms,
        } => handlers::handle_ingest(repo, &paths, segment_size, &algorithms, &mut out),
        Commands::Restore { pass, out: dest } => handlers::handle_restore(repo, &pass, &dest),
        Commands::Cat { pass, start, len } => handlers::handle_cat(repo, &pass, start, len, &mut out),
        Commands::List => handlers::handle_list(repo, &mut out),
        Commands::Recipe { pass } => handlers::handle_recipe(repo, &pass, &mut out),
        Commands::Verify {
            file,
            segment_size,
            algorithm,
        } => handlers::handle_verify(repo, &file, segment_size, algorithm, &mut out),
        Commands::Stats => handlers::handle_stats(repo, &mut out),
        Commands::Bench { dir, csv, parallel } => {
            bench::run_bench(repo, &dir, &csv, parallel, &mut out).map(|_| ())
        }
    }
}
