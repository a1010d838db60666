use std::path::Path;

use dedupl::application::{bench, handlers};
use dedupl::presentation::cli::PassArgs;
use dedupl_core::{EngineConfig, FsDedupRepo, HashAlgorithm};

fn repo_at(root: &Path) -> FsDedupRepo {
    FsDedupRepo::open(EngineConfig {
        root: root.to_path_buf(),
        segment_sizes: vec![4, 32],
        algorithms: vec![HashAlgorithm::Md5, HashAlgorithm::Sha256, HashAlgorithm::Sha512],
        read_buffer_size: 1024,
    })
    .unwrap()
}

fn pass(file: &str, segment_size: usize, algorithm: HashAlgorithm) -> PassArgs {
    PassArgs {
        file: file.to_string(),
        segment_size,
        algorithm,
    }
}

#[test]
fn ingest_restore_and_cat() {
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("sample.txt");
    let data = b"AAAABBBBCCAAAABBBB".repeat(10);
    std::fs::write(&input, &data).unwrap();

    let repo = repo_at(&work.path().join("repo"));
    let mut log = Vec::new();
    handlers::handle_ingest(&repo, &[input.clone()], 4, &[], &mut log).unwrap();
    let log = String::from_utf8(log).unwrap();
    assert!(log.contains("sample.txt (id=1"), "{log}");
    assert!(log.contains("sha512"));

    let restored = work.path().join("out.txt");
    handlers::handle_restore(&repo, &pass("sample.txt", 4, HashAlgorithm::Md5), &restored).unwrap();
    assert_eq!(std::fs::read(&restored).unwrap(), data);

    let mut cat = Vec::new();
    handlers::handle_cat(&repo, &pass("1", 4, HashAlgorithm::Sha256), 2, Some(7), &mut cat).unwrap();
    assert_eq!(cat, &data[2..9]);

    let mut verify = Vec::new();
    handlers::handle_verify(&repo, "1", None, None, &mut verify).unwrap();
    let verify = String::from_utf8(verify).unwrap();
    assert_eq!(verify.matches("OK").count(), 3);
}

#[test]
fn restoring_an_unprocessed_pass_fails_cleanly() {
    let work = tempfile::tempdir().unwrap();
    let input = work.path().join("f.bin");
    std::fs::write(&input, b"0123456789").unwrap();
    let repo = repo_at(&work.path().join("repo"));
    handlers::handle_ingest(&repo, &[input.clone()], 4, &[HashAlgorithm::Md5], &mut std::io::sink()).unwrap();

    let dest = work.path().join("never.bin");
    let err = handlers::handle_restore(&repo, &pass("f.bin", 32, HashAlgorithm::Md5), &dest);
    assert!(err.is_err());
    assert!(!dest.exists());
}

#[test]
fn bench_writes_one_row_per_pass_and_algorithm() {
    let work = tempfile::tempdir().unwrap();
    let inputs = work.path().join("in");
    std::fs::create_dir(&inputs).unwrap();
    std::fs::write(inputs.join("one.txt"), b"hello hello hello hello").unwrap();
    std::fs::write(inputs.join("two.txt"), b"world world world world").unwrap();
    std::fs::write(inputs.join(".skip"), b"ignored").unwrap();

    let repo = repo_at(&work.path().join("repo"));
    let csv_path = work.path().join("results.csv");
    let mut out = Vec::new();
    let rows = bench::run_bench(&repo, &inputs, &csv_path, true, &mut out).unwrap();

    // 2 files × 2 segment sizes × 3 algorithms.
    assert_eq!(rows.len(), 12);
    let text = std::fs::read_to_string(&csv_path).unwrap();
    let mut lines = text.lines();
    assert_eq!(
        lines.next().unwrap(),
        "file_name,file_size,chunk_size,algo,total_segments,unique_segments,\
         duplicate_segments,storage_writes,time_hashing,time_total,storage_size"
    );
    assert_eq!(lines.count(), 12);
    assert!(String::from_utf8(out).unwrap().contains("storage_32.bin"));

    // Second sweep: everything already processed, no rows.
    let again = bench::run_bench(&repo, &inputs, &csv_path, false, &mut std::io::sink()).unwrap();
    assert!(again.is_empty());
    assert_eq!(std::fs::read_to_string(&csv_path).unwrap(), text);
}

#[test]
fn parallel_bench_over_duplicate_files_counts_content_once() {
    let work = tempfile::tempdir().unwrap();
    let inputs = work.path().join("in");
    std::fs::create_dir(&inputs).unwrap();
    let data = b"0123".repeat(256);
    for name in ["a.bin", "b.bin", "c.bin"] {
        std::fs::write(inputs.join(name), &data).unwrap();
    }

    let repo = repo_at(&work.path().join("repo"));
    let rows = bench::run_bench(&repo, &inputs, &work.path().join("r.csv"), true, &mut std::io::sink())
        .unwrap();
    // One content × 2 segment sizes × 3 algorithms.
    assert_eq!(rows.len(), 6);

    let stats = dedupl_core::DedupRepo::stats(&repo).unwrap();
    let s4 = stats.iter().find(|s| s.segment_size == 4).unwrap();
    for t in &s4.tables {
        assert_eq!(t.references, 256);
    }
}
