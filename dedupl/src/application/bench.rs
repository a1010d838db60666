//! Directory sweep: every file × every configured segment size, all
//! configured algorithms per pass, one CSV row per (pass, algorithm).

use rayon::prelude::*;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use dedupl_core::error::{DedupError, Result};
use dedupl_core::repo::DedupRepo;
use dedupl_core::{FileSource, IngestOutcome};

use super::handlers::print_outcome;

#[derive(Debug, Clone, Serialize)]
pub struct BenchRow {
    pub file_name: String,
    pub file_size: u64,
    pub chunk_size: usize,
    pub algo: String,
    pub total_segments: u64,
    pub unique_segments: u64,
    pub duplicate_segments: u64,
    pub storage_writes: u64,
    pub time_hashing: f64,
    pub time_total: f64,
    pub storage_size: u64,
}

/// Regular, non-hidden files directly inside `dir`, sorted by name.
pub fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(DedupError::NotFound(format!("directory {}", dir.display())));
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        files.push(entry.into_path());
    }
    Ok(files)
}

fn rows_for(outcome: &IngestOutcome) -> Vec<BenchRow> {
    let Some(r) = outcome.report() else {
        return Vec::new();
    };
    r.algorithms
        .iter()
        .map(|a| BenchRow {
            file_name: r.file_name.clone(),
            file_size: r.file_size,
            chunk_size: r.segment_size,
            algo: a.algorithm.name().to_string(),
            total_segments: r.total_segments,
            unique_segments: a.unique,
            duplicate_segments: a.duplicate,
            storage_writes: r.physical_writes,
            time_hashing: a.hashing.as_secs_f64(),
            time_total: r.elapsed.as_secs_f64(),
            storage_size: r.storage_size,
        })
        .collect()
}

fn sweep_file(repo: &dyn DedupRepo, path: &Path) -> Result<Vec<IngestOutcome>> {
    let source = FileSource::new(path)?;
    let cfg = repo.config();
    cfg.segment_sizes
        .iter()
        .map(|&size| repo.ingest(&source, size, &cfg.algorithms))
        .collect()
}

/// Run the sweep, write the CSV to `csv_path`, and print a summary to `out`.
/// Returns the rows written.
pub fn run_bench(
    repo: &dyn DedupRepo,
    dir: &Path,
    csv_path: &Path,
    parallel: bool,
    out: &mut dyn Write,
) -> Result<Vec<BenchRow>> {
    let files = collect_files(dir)?;
    tracing::info!(dir = %dir.display(), files = files.len(), parallel, "benchmark started");

    let outcomes: Vec<Vec<IngestOutcome>> = if parallel {
        files
            .par_iter()
            .map(|p| sweep_file(repo, p))
            .collect::<Result<_>>()?
    } else {
        files
            .iter()
            .map(|p| sweep_file(repo, p))
            .collect::<Result<_>>()?
    };

    let mut rows = Vec::new();
    for outcome in outcomes.iter().flatten() {
        print_outcome(outcome, out)?;
        rows.extend(rows_for(outcome));
    }

    // Nothing new: keep the previous report instead of truncating it.
    if !rows.is_empty() {
        let mut w = csv::Writer::from_path(csv_path).map_err(std::io::Error::from)?;
        for row in &rows {
            w.serialize(row).map_err(std::io::Error::from)?;
        }
        w.flush()?;
    }

    writeln!(out, "\nstorage sizes:")?;
    for s in repo.stats()? {
        writeln!(out, "  storage_{}.bin: {} bytes", s.segment_size, s.storage_bytes)?;
    }
    if rows.is_empty() {
        writeln!(out, "no new passes, {} left unchanged", csv_path.display())?;
    } else {
        writeln!(out, "results written to {}", csv_path.display())?;
    }
    Ok(rows)
}
