use crate::cancel::{CancelHandle, CancelReason};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::{CollisionPolicy, ExtractionConfig};
use crate::error::ArchiveError;
use crate::extraction::*;
use crate::types::{ArchiveFormat, InspectionResult, Progress, VolumeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Create a valid ZIP archive containing multiple files
fn create_zip_archive_multi(archive_path: &Path, files: &[(&str, &[u8])]) {
    let file = fs::File::create(archive_path).unwrap();
    let mut writer = ::zip::ZipWriter::new(file);
    let options =
        ::zip::write::FileOptions::default().compression_method(::zip::CompressionMethod::Stored);
    for (name, content) in files {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap();
}

/// Create a password-encrypted ZIP using the deprecated ZipCrypto method
/// (only encryption method supported for writing by zip 0.6)
fn create_encrypted_zip(archive_path: &Path, file_name: &str, content: &[u8], password: &[u8]) {
    use ::zip::unstable::write::FileOptionsExt;
    let file = fs::File::create(archive_path).unwrap();
    let mut writer = ::zip::ZipWriter::new(file);
    let options = ::zip::write::FileOptions::default()
        .compression_method(::zip::CompressionMethod::Stored)
        .with_deprecated_encryption(password);
    writer.start_file(file_name, options).unwrap();
    writer.write_all(content).unwrap();
    writer.finish().unwrap();
}

/// Create a valid 7z archive from a source directory using sevenz_rust
fn create_7z_archive(archive_path: &Path, source_dir: &Path) {
    sevenz_rust::compress_to_path(source_dir, archive_path).unwrap();
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Small chunks, checkpoint after every chunk
fn test_config() -> ExtractionConfig {
    ExtractionConfig {
        chunk_size: 256,
        checkpoint_interval: Duration::ZERO,
        checkpoint_min_bytes: 0,
        ..Default::default()
    }
}

fn extractor_with(temp_dir: &TempDir, config: ExtractionConfig) -> Extractor {
    Extractor::new(
        HandlerRegistry::default(),
        CheckpointStore::new(temp_dir.path().join("checkpoints")),
        config,
    )
}

fn extractor(temp_dir: &TempDir) -> Extractor {
    extractor_with(temp_dir, test_config())
}

fn run(extractor: &Extractor, request: &ExtractRequest) -> Result<ExtractOutcome, ArchiveError> {
    extractor.extract(request, &mut |_| {}, &CancelHandle::new())
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

#[test]
fn completed_extraction_leaves_no_checkpoint_and_no_staging_file() {
    let temp_dir = TempDir::new().unwrap();
    let archive = temp_dir.path().join("bundle.zip");
    let content = payload(3000);
    create_zip_archive_multi(&archive, &[("a.txt", &content), ("docs/b.txt", b"second")]);
    let dest = temp_dir.path().join("out").join("nested");

    let extractor = extractor(&temp_dir);
    let request = ExtractRequest::new(&archive, &dest);
    let mut reports: Vec<Progress> = Vec::new();
    let outcome = extractor
        .extract(&request, &mut |p| reports.push(p), &CancelHandle::new())
        .unwrap();

    assert_eq!(outcome.format, ArchiveFormat::Zip);
    assert_eq!(outcome.resumed_from, 0);
    assert_eq!(outcome.bytes, fs::metadata(&archive).unwrap().len());
    assert_eq!(outcome.files.len(), 2);
    assert_eq!(fs::read(dest.join("a.txt")).unwrap(), content);
    assert_eq!(fs::read(dest.join("docs/b.txt")).unwrap(), b"second");

    assert!(extractor.store().load(&archive, &dest).unwrap().is_none());
    assert!(!extractor.staging_path(&archive, &dest).exists());
    assert_eq!(reports.last().unwrap().fraction, 1.0);
}

#[test]
fn progress_is_monotonic_and_bounded() {
    let temp_dir = TempDir::new().unwrap();
    let archive = temp_dir.path().join("bundle.zip");
    create_zip_archive_multi(&archive, &[("a.bin", &payload(5000))]);

    let extractor = extractor(&temp_dir);
    let mut reports: Vec<Progress> = Vec::new();
    extractor
        .extract(
            &ExtractRequest::new(&archive, temp_dir.path().join("out")),
            &mut |p| reports.push(p),
            &CancelHandle::new(),
        )
        .unwrap();

    assert!(reports.len() > 2);
    for pair in reports.windows(2) {
        assert!(pair[1].processed_bytes >= pair[0].processed_bytes);
        assert!(pair[1].fraction >= pair[0].fraction);
    }
    assert!(reports.iter().all(|p| (0.0..=1.0).contains(&p.fraction)));
    assert!(reports[0].bytes_per_second.is_some());
}

#[test]
fn sevenz_archive_is_unpacked() {
    let temp_dir = TempDir::new().unwrap();
    let source_dir = temp_dir.path().join("src");
    fs::create_dir_all(&source_dir).unwrap();
    fs::write(source_dir.join("a.txt"), b"packed by sevenz").unwrap();
    let archive = temp_dir.path().join("bundle.7z");
    create_7z_archive(&archive, &source_dir);
    let dest = temp_dir.path().join("out");

    let outcome = run(&extractor(&temp_dir), &ExtractRequest::new(&archive, &dest)).unwrap();

    assert_eq!(outcome.format, ArchiveFormat::SevenZip);
    assert_eq!(fs::read(dest.join("a.txt")).unwrap(), b"packed by sevenz");
}

#[test]
fn split_sevenz_set_is_streamed_and_unpacked() {
    let temp_dir = TempDir::new().unwrap();
    let source_dir = temp_dir.path().join("src");
    fs::create_dir_all(&source_dir).unwrap();
    fs::write(source_dir.join("movie.txt"), payload(2000)).unwrap();
    let whole = temp_dir.path().join("whole.7z");
    create_7z_archive(&whole, &source_dir);

    let bytes = fs::read(&whole).unwrap();
    let (first, second) = bytes.split_at(bytes.len() / 2);
    let part1 = temp_dir.path().join("movie.7z.001");
    fs::write(&part1, first).unwrap();
    fs::write(temp_dir.path().join("movie.7z.002"), second).unwrap();
    let dest = temp_dir.path().join("out");

    let outcome = run(&extractor(&temp_dir), &ExtractRequest::new(&part1, &dest)).unwrap();

    assert!(outcome.inspection.multi_volume);
    assert_eq!(outcome.bytes, bytes.len() as u64);
    assert_eq!(fs::read(dest.join("movie.txt")).unwrap(), payload(2000));
}

// ---------------------------------------------------------------------------
// Cancellation and resume
// ---------------------------------------------------------------------------

#[test]
fn cancelled_extraction_checkpoints_last_progress_and_resumes() {
    let temp_dir = TempDir::new().unwrap();
    let archive = temp_dir.path().join("big.zip");
    let content = payload(8000);
    create_zip_archive_multi(&archive, &[("big.bin", &content)]);
    let dest = temp_dir.path().join("out");
    let extractor = extractor(&temp_dir);
    let request = ExtractRequest::new(&archive, &dest);

    // First attempt: pause after the third chunk
    let cancel = CancelHandle::new();
    let trigger = cancel.clone();
    let mut last: Option<Progress> = None;
    let mut seen = 0;
    let err = extractor
        .extract(
            &request,
            &mut |p| {
                seen += 1;
                last = Some(p);
                if seen == 3 {
                    trigger.request(CancelReason::Pause);
                }
            },
            &cancel,
        )
        .unwrap_err();
    assert_eq!(err, ArchiveError::Cancelled);

    let last = last.unwrap();
    let checkpoint = extractor.store().load(&archive, &dest).unwrap().unwrap();
    assert_eq!(checkpoint.processed_bytes, last.processed_bytes);
    assert_eq!(checkpoint.processed_bytes, 3 * 256);
    assert_eq!(checkpoint.total_bytes, fs::metadata(&archive).unwrap().len());
    let staging = extractor.staging_path(&archive, &dest);
    assert!(fs::metadata(&staging).unwrap().len() >= checkpoint.processed_bytes);

    // Second attempt resumes from the checkpoint
    let mut first_report: Option<Progress> = None;
    let outcome = extractor
        .extract(
            &request,
            &mut |p| {
                first_report.get_or_insert(p);
            },
            &CancelHandle::new(),
        )
        .unwrap();

    assert_eq!(outcome.resumed_from, 3 * 256);
    assert!(first_report.unwrap().processed_bytes > 3 * 256);
    assert_eq!(fs::read(dest.join("big.bin")).unwrap(), content);
    assert!(extractor.store().load(&archive, &dest).unwrap().is_none());
    assert!(!staging.exists());
}

#[test]
fn cancel_before_first_chunk_writes_no_checkpoint() {
    let temp_dir = TempDir::new().unwrap();
    let archive = temp_dir.path().join("a.zip");
    create_zip_archive_multi(&archive, &[("a.txt", b"hello")]);
    let dest = temp_dir.path().join("out");
    let extractor = extractor(&temp_dir);

    let cancel = CancelHandle::new();
    cancel.request(CancelReason::Cancel);
    let err = extractor
        .extract(&ExtractRequest::new(&archive, &dest), &mut |_| {}, &cancel)
        .unwrap_err();

    assert_eq!(err, ArchiveError::Cancelled);
    assert!(extractor.store().load(&archive, &dest).unwrap().is_none());
}

#[test]
fn stale_checkpoint_is_discarded() {
    let temp_dir = TempDir::new().unwrap();
    let archive = temp_dir.path().join("a.zip");
    let content = payload(2000);
    create_zip_archive_multi(&archive, &[("a.bin", &content)]);
    let dest = temp_dir.path().join("out");
    let extractor = extractor(&temp_dir);

    // Recorded for an input of a different size
    let staging = extractor.staging_path(&archive, &dest);
    fs::create_dir_all(extractor.store().dir()).unwrap();
    fs::write(&staging, vec![0xEE; 4096]).unwrap();
    extractor
        .store()
        .save(&Checkpoint::new(&archive, &dest, 999_999, 4096, staging.clone()))
        .unwrap();

    let outcome = run(&extractor, &ExtractRequest::new(&archive, &dest)).unwrap();

    assert_eq!(outcome.resumed_from, 0);
    assert_eq!(fs::read(dest.join("a.bin")).unwrap(), content);
}

#[test]
fn checkpoint_without_partial_bytes_restarts_from_zero() {
    let temp_dir = TempDir::new().unwrap();
    let archive = temp_dir.path().join("a.zip");
    create_zip_archive_multi(&archive, &[("a.bin", &payload(2000))]);
    let dest = temp_dir.path().join("out");
    let extractor = extractor(&temp_dir);
    let total = fs::metadata(&archive).unwrap().len();

    // Staging file lost after the record was written
    let staging = extractor.staging_path(&archive, &dest);
    extractor
        .store()
        .save(&Checkpoint::new(&archive, &dest, total, 512, staging))
        .unwrap();

    let outcome = run(&extractor, &ExtractRequest::new(&archive, &dest)).unwrap();
    assert_eq!(outcome.resumed_from, 0);
}

// ---------------------------------------------------------------------------
// Passwords
// ---------------------------------------------------------------------------

#[test]
fn encrypted_zip_without_password_requires_one() {
    let temp_dir = TempDir::new().unwrap();
    let archive = temp_dir.path().join("locked.zip");
    create_encrypted_zip(&archive, "secret.txt", b"classified", b"hunter2");

    let err = run(
        &extractor(&temp_dir),
        &ExtractRequest::new(&archive, temp_dir.path().join("out")),
    )
    .unwrap_err();
    assert_eq!(err, ArchiveError::PasswordRequired);

    let err = run(
        &extractor(&temp_dir),
        &ExtractRequest::new(&archive, temp_dir.path().join("out")).with_password(""),
    )
    .unwrap_err();
    assert_eq!(err, ArchiveError::PasswordRequired, "empty password counts as none");
}

#[test]
fn encrypted_zip_with_wrong_password_is_rejected_before_writing() {
    let temp_dir = TempDir::new().unwrap();
    let archive = temp_dir.path().join("locked.zip");
    create_encrypted_zip(&archive, "secret.txt", b"classified", b"hunter2");
    let dest = temp_dir.path().join("out");

    let err = run(
        &extractor(&temp_dir),
        &ExtractRequest::new(&archive, &dest).with_password("wrong"),
    )
    .unwrap_err();

    assert_eq!(err, ArchiveError::BadPassword);
    assert!(!dest.exists(), "preflight failures write nothing");
}

#[test]
fn encrypted_zip_with_correct_password_is_unpacked() {
    let temp_dir = TempDir::new().unwrap();
    let archive = temp_dir.path().join("locked.zip");
    create_encrypted_zip(&archive, "secret.txt", b"classified", b"hunter2");
    let dest = temp_dir.path().join("out");

    let outcome = run(
        &extractor(&temp_dir),
        &ExtractRequest::new(&archive, &dest).with_password("hunter2"),
    )
    .unwrap();

    assert!(outcome.inspection.encrypted);
    assert_eq!(fs::read(dest.join("secret.txt")).unwrap(), b"classified");
}

// ---------------------------------------------------------------------------
// Preflight failures
// ---------------------------------------------------------------------------

#[test]
fn numbered_rar_without_terminal_volume_is_missing_volumes() {
    let temp_dir = TempDir::new().unwrap();
    let first = temp_dir.path().join("show.r00");
    fs::write(&first, b"Rar!\x1a\x07\x00").unwrap();

    let err = run(
        &extractor(&temp_dir),
        &ExtractRequest::new(&first, temp_dir.path().join("out")),
    )
    .unwrap_err();

    match err {
        ArchiveError::MissingVolumes { expected, found } => {
            assert!(expected.len() > found.len());
            assert_eq!(found, vec![first]);
            assert!(expected.contains(&temp_dir.path().join("show.rar")));
        }
        other => panic!("expected MissingVolumes, got {other:?}"),
    }
}

#[test]
fn unknown_format_is_unsupported() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("notes.txt");
    fs::write(&path, b"just some text, not an archive").unwrap();

    let err = run(
        &extractor(&temp_dir),
        &ExtractRequest::new(&path, temp_dir.path().join("out")),
    )
    .unwrap_err();
    assert!(matches!(err, ArchiveError::Unsupported(_)), "got {err:?}");
}

#[test]
fn declared_format_mismatch_is_unsupported() {
    let temp_dir = TempDir::new().unwrap();
    let source_dir = temp_dir.path().join("src");
    fs::create_dir_all(&source_dir).unwrap();
    fs::write(source_dir.join("a.txt"), b"x").unwrap();
    let archive = temp_dir.path().join("really-7z.bin");
    create_7z_archive(&archive, &source_dir);

    let err = run(
        &extractor(&temp_dir),
        &ExtractRequest::new(&archive, temp_dir.path().join("out")).with_format(ArchiveFormat::Zip),
    )
    .unwrap_err();
    assert!(matches!(err, ArchiveError::Unsupported(_)), "got {err:?}");
}

#[test]
fn missing_source_is_an_io_error() {
    let temp_dir = TempDir::new().unwrap();
    let err = run(
        &extractor(&temp_dir),
        &ExtractRequest::new(temp_dir.path().join("gone.zip"), temp_dir.path().join("out")),
    )
    .unwrap_err();
    assert!(matches!(err, ArchiveError::Io(_)), "got {err:?}");
}

// ---------------------------------------------------------------------------
// Materialization safety
// ---------------------------------------------------------------------------

#[test]
fn traversal_entries_are_skipped() {
    let temp_dir = TempDir::new().unwrap();
    let archive = temp_dir.path().join("slip.zip");
    create_zip_archive_multi(
        &archive,
        &[
            ("../evil.txt", b"pwned"),
            ("/etc/evil.conf", b"pwned"),
            ("good.txt", b"fine"),
        ],
    );
    let dest = temp_dir.path().join("out");

    let outcome = run(&extractor(&temp_dir), &ExtractRequest::new(&archive, &dest)).unwrap();

    assert_eq!(outcome.files.len(), 1);
    assert_eq!(fs::read(dest.join("good.txt")).unwrap(), b"fine");
    assert!(!temp_dir.path().join("evil.txt").exists());
}

fn extract_over_existing(policy: CollisionPolicy) -> (TempDir, PathBuf, ExtractOutcome) {
    let temp_dir = TempDir::new().unwrap();
    let archive = temp_dir.path().join("a.zip");
    create_zip_archive_multi(&archive, &[("a.txt", b"new")]);
    let dest = temp_dir.path().join("out");
    fs::create_dir_all(&dest).unwrap();
    fs::write(dest.join("a.txt"), b"old").unwrap();

    let config = ExtractionConfig {
        file_collision: policy,
        ..test_config()
    };
    let outcome = run(
        &extractor_with(&temp_dir, config),
        &ExtractRequest::new(&archive, &dest),
    )
    .unwrap();
    (temp_dir, dest, outcome)
}

#[test]
fn collision_skip_keeps_existing_file() {
    let (_temp_dir, dest, outcome) = extract_over_existing(CollisionPolicy::Skip);
    assert!(outcome.files.is_empty());
    assert_eq!(fs::read(dest.join("a.txt")).unwrap(), b"old");
}

#[test]
fn collision_rename_writes_next_free_name() {
    let (_temp_dir, dest, outcome) = extract_over_existing(CollisionPolicy::Rename);
    assert_eq!(outcome.files, vec![dest.join("a (1).txt")]);
    assert_eq!(fs::read(dest.join("a.txt")).unwrap(), b"old");
    assert_eq!(fs::read(dest.join("a (1).txt")).unwrap(), b"new");
}

#[test]
fn collision_overwrite_replaces_existing_file() {
    let (_temp_dir, dest, _outcome) = extract_over_existing(CollisionPolicy::Overwrite);
    assert_eq!(fs::read(dest.join("a.txt")).unwrap(), b"new");
}

// ---------------------------------------------------------------------------
// Handler injection
// ---------------------------------------------------------------------------

/// Counts streamed bytes and unpacks nothing
struct CountingHandler {
    decoded: Arc<AtomicU64>,
}

struct CountingDecoder {
    decoded: Arc<AtomicU64>,
}

impl ChunkDecoder for CountingDecoder {
    fn decode(&mut self, input: &[u8], output: &mut dyn Write) -> std::io::Result<()> {
        self.decoded.fetch_add(input.len() as u64, Ordering::SeqCst);
        output.write_all(input)
    }
}

impl ArchiveHandler for CountingHandler {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Zip
    }

    fn verify_password(
        &self,
        _volumes: &VolumeSet,
        _inspection: &InspectionResult,
        _password: &str,
    ) -> Result<(), ArchiveError> {
        Ok(())
    }

    fn decoder(&self) -> Box<dyn ChunkDecoder> {
        Box::new(CountingDecoder {
            decoded: self.decoded.clone(),
        })
    }

    fn materialize(&self, _request: &MaterializeRequest<'_>) -> Result<Vec<PathBuf>, ArchiveError> {
        Ok(Vec::new())
    }
}

#[test]
fn registered_handler_decoder_sees_every_input_byte() {
    let temp_dir = TempDir::new().unwrap();
    let archive = temp_dir.path().join("a.zip");
    create_zip_archive_multi(&archive, &[("a.bin", &payload(1500))]);

    let decoded = Arc::new(AtomicU64::new(0));
    let mut registry = HandlerRegistry::default();
    registry.register(Arc::new(CountingHandler {
        decoded: decoded.clone(),
    }));
    let extractor = Extractor::new(
        registry,
        CheckpointStore::new(temp_dir.path().join("checkpoints")),
        test_config(),
    );

    let outcome = run(&extractor, &ExtractRequest::new(&archive, temp_dir.path().join("out"))).unwrap();

    assert!(outcome.files.is_empty());
    assert_eq!(decoded.load(Ordering::SeqCst), fs::metadata(&archive).unwrap().len());
}
