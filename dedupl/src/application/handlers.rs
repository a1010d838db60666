use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use dedupl_core::error::{DedupError, Result};
use dedupl_core::repo::DedupRepo;
use dedupl_core::{FileSource, HashAlgorithm, IngestOutcome, TableKey};

use crate::presentation::cli::PassArgs;

fn pass_key(repo: &dyn DedupRepo, pass: &PassArgs) -> Result<(u64, TableKey)> {
    let file = repo.resolve_file(&pass.file)?;
    Ok((file.file_id, TableKey::new(pass.segment_size, pass.algorithm)))
}

fn copy_out(reader: &mut dyn Read, out: &mut dyn Write, buf_size: usize) -> Result<u64> {
    let mut buf = vec![0u8; buf_size];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
        total += n as u64;
    }
    out.flush()?;
    Ok(total)
}

pub fn print_outcome(outcome: &IngestOutcome, out: &mut dyn Write) -> Result<()> {
    match outcome {
        IngestOutcome::Skipped {
            file_name,
            segment_size,
            ..
        } => writeln!(out, "{file_name}: already processed at {segment_size}, skipped")?,
        IngestOutcome::Ingested(r) => {
            writeln!(
                out,
                "{} (id={}, {} bytes) @ {}: {} segments, {} physical writes, {:.3}s, storage {} bytes",
                r.file_name,
                r.file_id,
                r.file_size,
                r.segment_size,
                r.total_segments,
                r.physical_writes,
                r.elapsed.as_secs_f64(),
                r.storage_size
            )?;
            for a in &r.algorithms {
                writeln!(
                    out,
                    "  {:<7} unique={:<8} duplicate={:<8} hashing={:.3}s",
                    a.algorithm.name(),
                    a.unique,
                    a.duplicate,
                    a.hashing.as_secs_f64()
                )?;
            }
        }
    }
    Ok(())
}

pub fn handle_ingest(
    repo: &dyn DedupRepo,
    paths: &[PathBuf],
    segment_size: usize,
    algorithms: &[HashAlgorithm],
    out: &mut dyn Write,
) -> Result<()> {
    let algorithms = if algorithms.is_empty() {
        repo.config().algorithms.clone()
    } else {
        algorithms.to_vec()
    };
    for p in paths {
        let source = FileSource::new(p)?;
        let outcome = repo.ingest(&source, segment_size, &algorithms)?;
        print_outcome(&outcome, out)?;
    }
    Ok(())
}

/// Writes through a temp file in the destination directory so a failed
/// rebuild never leaves a partial output behind.
pub fn handle_restore(repo: &dyn DedupRepo, pass: &PassArgs, dest: &Path) -> Result<()> {
    let (file_id, key) = pass_key(repo, pass)?;
    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    let n = repo.restore(file_id, key, tmp.as_file_mut())?;
    tmp.persist(dest).map_err(|e| DedupError::Io(e.error))?;
    eprintln!("restore: {} bytes -> {}", n, dest.display());
    Ok(())
}

pub fn handle_cat(
    repo: &dyn DedupRepo,
    pass: &PassArgs,
    start: u64,
    len: Option<u64>,
    out: &mut dyn Write,
) -> Result<()> {
    let (file_id, key) = pass_key(repo, pass)?;
    let mut reader = match (start, len) {
        (0, None) => repo.open_reader(file_id, key)?,
        (s, Some(l)) => repo.open_range(file_id, key, s, l)?,
        (s, None) => repo.open_range(file_id, key, s, u64::MAX - s)?,
    };
    copy_out(&mut reader, out, 64 * 1024)?;
    Ok(())
}

pub fn handle_list(repo: &dyn DedupRepo, out: &mut dyn Write) -> Result<()> {
    let files = repo.list_files()?;
    if files.is_empty() {
        writeln!(out, "(no files)")?;
        return Ok(());
    }
    for f in files {
        writeln!(
            out,
            "{:<5} {:<32} {:>12}  {}  [{}]",
            f.file_id,
            f.name,
            f.size,
            &f.content_hash[..f.content_hash.len().min(16)],
            f.processing_done.join(", ")
        )?;
    }
    Ok(())
}

pub fn handle_recipe(repo: &dyn DedupRepo, pass: &PassArgs, out: &mut dyn Write) -> Result<()> {
    let (file_id, key) = pass_key(repo, pass)?;
    let rows = repo.chunk_map(file_id, key)?;
    if rows.is_empty() {
        return Err(DedupError::RecipeNotFound {
            file_id,
            segment_size: key.segment_size,
            algorithm: key.algorithm.to_string(),
        });
    }
    for r in rows {
        writeln!(
            out,
            "#{:<6} {} off={:<10} len={:<6} refs={:<5} file_off={} ({:.1}%)",
            r.chunk_index, r.digest, r.offset, r.length, r.ref_count, r.file_off, r.pct_end
        )?;
    }
    Ok(())
}

pub fn handle_verify(
    repo: &dyn DedupRepo,
    file: &str,
    segment_size: Option<usize>,
    algorithm: Option<HashAlgorithm>,
    out: &mut dyn Write,
) -> Result<()> {
    let row = repo.resolve_file(file)?;
    let keys: Vec<TableKey> = row
        .processing_done
        .iter()
        .map(|k| k.parse::<TableKey>())
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .filter(|k| segment_size.is_none_or(|s| s == k.segment_size))
        .filter(|k| algorithm.is_none_or(|a| a == k.algorithm))
        .collect();
    if keys.is_empty() {
        return Err(DedupError::NotFound(format!(
            "no completed pass for {} matches the filter",
            row.name
        )));
    }

    let mut failed = 0usize;
    for key in keys {
        let ok = repo.verify(row.file_id, key)?;
        if !ok {
            failed += 1;
        }
        writeln!(out, "verify {} @ {key}: {}", row.name, if ok { "OK" } else { "MISMATCH" })?;
    }
    if failed > 0 {
        return Err(DedupError::Format(format!(
            "{failed} pass(es) of {} do not rebuild the registered content",
            row.name
        )));
    }
    Ok(())
}

pub fn handle_stats(repo: &dyn DedupRepo, out: &mut dyn Write) -> Result<()> {
    for s in repo.stats()? {
        writeln!(
            out,
            "storage_{}.bin: {} bytes, {} physical segments",
            s.segment_size, s.storage_bytes, s.physical_segments
        )?;
        for t in &s.tables {
            writeln!(
                out,
                "  {:<7} distinct={:<8} references={}",
                t.algorithm.name(),
                t.distinct_digests,
                t.references
            )?;
        }
    }
    Ok(())
}
