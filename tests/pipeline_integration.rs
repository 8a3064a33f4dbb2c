//! Integration tests for pipelines of real filter processes.

use pipemux::link::checksum_of;
use pipemux::prelude::*;
use std::fs::{self, File};
use std::path::PathBuf;
use tempfile::TempDir;

/// Deterministic pseudo-random bytes (xorshift64).
fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.max(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8
        })
        .collect()
}

/// Input and output files in a scratch directory.
struct Files {
    _dir: TempDir,
    input: PathBuf,
    output: PathBuf,
}

impl Files {
    fn with_input(data: &[u8]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input");
        let output = dir.path().join("output");
        fs::write(&input, data).unwrap();
        Self {
            _dir: dir,
            input,
            output,
        }
    }

    fn run(&self, config: &PipelineConfig) -> pipemux::Result<RunReport> {
        let input = File::open(&self.input).unwrap();
        let output = File::create(&self.output).unwrap();
        run_pipeline(config, input.into(), output.into())
    }

    fn output(&self) -> Vec<u8> {
        fs::read(&self.output).unwrap()
    }
}

/// Test the degenerate pipeline with no stages.
#[test]
fn test_zero_stages_hello() {
    let files = Files::with_input(b"hello");
    let report = files.run(&PipelineConfig::identity(0)).unwrap();

    assert_eq!(files.output(), b"hello");
    assert!(report.is_completed());
    assert!(report.stage_exits.is_empty());
    assert_eq!(report.checksums, vec![checksum_of(b"hello")]);
}

/// Test three identity stages with random data.
#[test]
fn test_three_cats_random_bytes() {
    let data = random_bytes(10_000, 0x5eed);
    let files = Files::with_input(&data);
    let report = files.run(&PipelineConfig::identity(3)).unwrap();

    assert_eq!(files.output(), data);
    assert_eq!(report.checksums.len(), 4);
    assert!(report.checksums.iter().all(|&c| c == report.checksums[0]));
    assert_eq!(report.bytes_in, 10_000);
    assert_eq!(report.bytes_out, 10_000);
    assert_eq!(report.stage_exits.len(), 3);
    assert!(report.stages_succeeded());
}

/// Identity chains reproduce their input for a spread of lengths and depths.
#[test]
fn test_identity_chain_sizes() {
    for stages in [0, 1, 2, 5] {
        for len in [0, 1, 4095, 4096, 4097, 100_000] {
            let data = random_bytes(len, len as u64 + stages as u64);
            let files = Files::with_input(&data);
            let report = files.run(&PipelineConfig::identity(stages)).unwrap();

            assert_eq!(files.output(), data, "stages={stages} len={len}");
            assert_eq!(report.checksums.len(), stages + 1);
        }
    }
}

/// Chunks larger than a pipe's capacity force partial writes.
#[test]
fn test_partial_writes_lose_nothing() {
    let data = random_bytes(2 * 1024 * 1024, 99);
    let files = Files::with_input(&data);
    let config = PipelineConfig::identity(2).with_chunk_size(256 * 1024);
    let report = files.run(&config).unwrap();

    assert_eq!(files.output(), data);
    assert!(report.checksums.iter().all(|&c| c == report.checksums[0]));
}

/// Tiny links still deliver every byte in order.
#[test]
fn test_one_byte_links() {
    let data = random_bytes(2_000, 7);
    let files = Files::with_input(&data);
    let config = PipelineConfig::identity(3).with_chunk_size(1);
    files.run(&config).unwrap();

    assert_eq!(files.output(), data);
}

/// A stage that adds a byte breaks the byte-preserving precondition, and the
/// verifier reports it as a distinct error kind.
#[test]
fn test_duplicating_stage_fails_integrity() {
    let files = Files::with_input(b"some payload\n");
    let filter = FilterCommand::new("sh").args(["-c", "cat; printf x"]);
    let config = PipelineConfig::new(filter, 1);

    let err = files.run(&config).unwrap_err();
    assert!(err.is_integrity());
    assert!(!err.is_io());
    match err {
        Error::IntegrityMismatch {
            upstream,
            downstream,
            upstream_checksum,
            downstream_checksum,
        } => {
            assert_eq!((upstream, downstream), (0, 1));
            assert_eq!(downstream_checksum - upstream_checksum, u64::from(b'x'));
        }
        other => panic!("unexpected error: {other}"),
    }
}

/// With verification off, the same transforming stage runs to completion.
#[test]
fn test_duplicating_stage_with_verify_off() {
    let files = Files::with_input(b"some payload\n");
    let filter = FilterCommand::new("sh").args(["-c", "cat; printf x"]);
    let config = PipelineConfig::new(filter, 1).with_verify(VerifyMode::Off);

    let report = files.run(&config).unwrap();
    assert_eq!(files.output(), b"some payload\nx");
    assert_eq!(report.checks, 0);
}

/// Transforming filters work when the caller opts out of checking.
#[test]
fn test_transforming_filter_chain() {
    let files = Files::with_input(b"quiet words\n");
    let filter = FilterCommand::new("tr").args(["a-z", "A-Z"]);
    let config = PipelineConfig::new(filter, 2).with_verify(VerifyMode::Off);

    files.run(&config).unwrap();
    assert_eq!(files.output(), b"QUIET WORDS\n");
}

/// Strict mode compares every pair on quiescence; with no stages there is
/// nothing for it to disagree about.
#[test]
fn test_strict_mode_direct_copy() {
    let data = random_bytes(50_000, 3);
    let files = Files::with_input(&data);
    let config = PipelineConfig::identity(0).with_verify(VerifyMode::Strict);

    files.run(&config).unwrap();
    assert_eq!(files.output(), data);
}

/// A stage's non-zero exit is reported without failing the run.
#[test]
fn test_stage_exit_status_in_report() {
    let files = Files::with_input(b"");
    let filter = FilterCommand::new("sh").args(["-c", "cat; exit 4"]);
    let config = PipelineConfig::new(filter, 2);

    let report = files.run(&config).unwrap();
    assert_eq!(report.stage_exits.len(), 2);
    let failed = report.failed_stage().unwrap();
    assert_eq!(failed.index, 0);
    assert_eq!(failed.exit_code(), 4);
}

/// Filter that closes its output at once and only then starts reading.
fn early_closing_filter() -> FilterCommand {
    FilterCommand::new("sh").args(["-c", "exec >&-; sleep 0.2; cat >/dev/null"])
}

/// An output that ends while input is still in flight is a failure, and the
/// final checksum comparison catches the bytes that never arrived.
#[test]
fn test_early_closed_output_is_not_success() {
    let data = random_bytes(1024 * 1024, 11);
    let files = Files::with_input(&data);
    let config = PipelineConfig::new(early_closing_filter(), 1);

    let err = files.run(&config).unwrap_err();
    match err {
        Error::IntegrityMismatch {
            upstream: 0,
            downstream: 1,
            downstream_checksum: 0,
            ..
        } => {}
        // The stage closed its output before the first chunk was read.
        Error::Undelivered { link: 0, .. } => {}
        other => panic!("unexpected error: {other}"),
    }
    assert!(files.output().is_empty());
}

/// Without checksum checks, the undelivered input is still reported.
#[test]
fn test_early_closed_output_with_verify_off() {
    let data = random_bytes(1024 * 1024, 12);
    let files = Files::with_input(&data);
    let config = PipelineConfig::new(early_closing_filter(), 1).with_verify(VerifyMode::Off);

    let err = files.run(&config).unwrap_err();
    assert!(err.is_undelivered());
    assert!(matches!(err, Error::Undelivered { link: 0, .. }));
}

/// Construction failures surface before any I/O.
#[test]
fn test_unspawnable_program() {
    let files = Files::with_input(b"never read");
    let config = PipelineConfig::new(FilterCommand::new("/nonexistent/filter"), 2);

    let err = files.run(&config).unwrap_err();
    assert!(err.is_construction());
    assert!(files.output().is_empty());
}
