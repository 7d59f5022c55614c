//! Resumable streaming extraction
//!
//! One call to [`Extractor::extract`] runs a single attempt through
//! `Preflight → Streaming → {Completed, Failed, Cancelled}`. The input is the
//! ordered concatenation of every volume; it is copied chunk by chunk through
//! the format's decoder into a staging file beside the checkpoint records, with
//! throttled checkpoints so an interrupted attempt can pick up where it left
//! off.

use super::handler::{ArchiveHandler, HandlerRegistry, MaterializeRequest};
use super::segmented::SegmentedReader;
use super::throughput::{eta_seconds, ThroughputWindow};
use super::volumes::collect_volume_segments;
use crate::cancel::CancelHandle;
use crate::checkpoint::{Checkpoint, CheckpointStore, CheckpointThrottle};
use crate::config::ExtractionConfig;
use crate::error::ArchiveError;
use crate::types::{ArchiveFormat, FormatHint, InspectionResult, Progress, VolumeSet};
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Input of one extraction attempt
#[derive(Clone, Debug)]
pub struct ExtractRequest {
    /// Archive path (first volume for multi-volume sets)
    pub source: PathBuf,
    /// Destination directory
    pub destination: PathBuf,
    /// Declared format, or [`FormatHint::Auto`] to sniff it
    pub format: FormatHint,
    /// Password for encrypted archives
    pub password: Option<String>,
}

impl ExtractRequest {
    /// Request with an auto-detected format and no password
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            format: FormatHint::Auto,
            password: None,
        }
    }

    /// Set the declared format
    pub fn with_format(mut self, format: impl Into<FormatHint>) -> Self {
        self.format = format.into();
        self
    }

    /// Set the password
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

/// Result of a completed attempt
#[derive(Clone, Debug)]
pub struct ExtractOutcome {
    /// Format the archive was handled as
    pub format: ArchiveFormat,
    /// Files materialized under the destination
    pub files: Vec<PathBuf>,
    /// Input bytes streamed in total
    pub bytes: u64,
    /// Offset the attempt resumed from (0 for a fresh start)
    pub resumed_from: u64,
    /// Metadata gathered during preflight
    pub inspection: InspectionResult,
}

/// Everything preflight established about the archive
struct Preflight {
    format: ArchiveFormat,
    handler: Arc<dyn ArchiveHandler>,
    volumes: VolumeSet,
    inspection: InspectionResult,
}

/// Synchronous extraction engine
///
/// Cheap to clone; the queue shares one instance across attempts and runs
/// [`Extractor::extract`] on the blocking thread pool.
#[derive(Clone, Debug)]
pub struct Extractor {
    registry: HandlerRegistry,
    store: CheckpointStore,
    config: ExtractionConfig,
}

impl Extractor {
    /// Create an engine over explicit collaborators
    pub fn new(registry: HandlerRegistry, store: CheckpointStore, config: ExtractionConfig) -> Self {
        Self {
            registry,
            store,
            config,
        }
    }

    /// Handler table
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Checkpoint store
    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Streaming settings
    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Staging file of a (source, destination) pair
    ///
    /// Lives next to the pair's checkpoint record and is named by the same key,
    /// so same-named archives never share it and no archive entry can land on it.
    pub fn staging_path(&self, source: &Path, destination: &Path) -> PathBuf {
        self.store
            .dir()
            .join(format!("{}.partial", CheckpointStore::key(source, destination)))
    }

    /// Run one attempt
    ///
    /// `sink` receives a [`Progress`] after every chunk and a final one at 1.0
    /// on success. `cancel` is checked before every chunk; on cancellation a
    /// checkpoint is persisted and [`ArchiveError::Cancelled`] returned.
    pub fn extract(
        &self,
        request: &ExtractRequest,
        sink: &mut dyn FnMut(Progress),
        cancel: &CancelHandle,
    ) -> Result<ExtractOutcome, ArchiveError> {
        let preflight = self.preflight(request)?;
        self.stream(request, preflight, sink, cancel)
    }

    fn preflight(&self, request: &ExtractRequest) -> Result<Preflight, ArchiveError> {
        let source = &request.source;
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let format = match request.format {
            FormatHint::Exact(format) => format,
            FormatHint::Auto => self.registry.detect(source).ok_or_else(|| {
                if source.exists() {
                    ArchiveError::Unsupported(format!("unrecognized archive format: {name}"))
                } else {
                    ArchiveError::Io(format!("archive not found: {}", source.display()))
                }
            })?,
        };
        let handler = self
            .registry
            .get(format)
            .ok_or_else(|| ArchiveError::Unsupported(format!("no handler for {format}")))?;

        let volumes = collect_volume_segments(source);
        if !volumes.is_complete() {
            if !volumes.is_multi_volume() {
                return Err(ArchiveError::Io(format!(
                    "archive not found: {}",
                    source.display()
                )));
            }
            return Err(ArchiveError::MissingVolumes {
                expected: volumes.expected,
                found: volumes.found,
            });
        }

        let inspection = handler.inspect(&volumes)?;
        if !inspection.valid_format {
            return Err(ArchiveError::Unsupported(format!(
                "{name} is not a valid {format} archive"
            )));
        }

        if inspection.encrypted {
            let password = request
                .password
                .as_deref()
                .filter(|pw| !pw.is_empty())
                .ok_or(ArchiveError::PasswordRequired)?;
            handler.verify_password(&volumes, &inspection, password)?;
        }

        fs::create_dir_all(&request.destination).map_err(|e| {
            ArchiveError::Io(format!(
                "failed to create destination {}: {e}",
                request.destination.display()
            ))
        })?;

        debug!(
            source = ?request.source,
            %format,
            volumes = volumes.found.len(),
            encrypted = inspection.encrypted,
            "preflight passed"
        );

        Ok(Preflight {
            format,
            handler,
            volumes,
            inspection,
        })
    }

    /// Checkpointed offset to resume from, discarding records that no longer fit
    fn resume_offset(&self, request: &ExtractRequest, staging: &Path, total: u64) -> u64 {
        let checkpoint = match self.store.load(&request.source, &request.destination) {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => return 0,
            Err(e) => {
                warn!(source = ?request.source, error = %e, "failed to load checkpoint");
                return 0;
            }
        };

        let partial_len = fs::metadata(staging).map(|m| m.len()).unwrap_or(0);
        if checkpoint.is_resumable_for(total)
            && checkpoint.partial_file_path == staging
            && partial_len >= checkpoint.processed_bytes
        {
            return checkpoint.processed_bytes;
        }

        debug!(
            source = ?request.source,
            recorded_total = checkpoint.total_bytes,
            total,
            partial_len,
            "discarding stale checkpoint"
        );
        if let Err(e) = self.store.remove(&request.source, &request.destination) {
            warn!(source = ?request.source, error = %e, "failed to remove stale checkpoint");
        }
        0
    }

    fn save_checkpoint(&self, request: &ExtractRequest, staging: &Path, total: u64, processed: u64) {
        let checkpoint = Checkpoint::new(
            &request.source,
            &request.destination,
            total,
            processed,
            staging.to_path_buf(),
        );
        if let Err(e) = self.store.save(&checkpoint) {
            warn!(source = ?request.source, error = %e, "failed to save checkpoint");
        }
    }

    fn stream(
        &self,
        request: &ExtractRequest,
        preflight: Preflight,
        sink: &mut dyn FnMut(Progress),
        cancel: &CancelHandle,
    ) -> Result<ExtractOutcome, ArchiveError> {
        let Preflight {
            format,
            handler,
            volumes,
            inspection,
        } = preflight;

        let mut input = SegmentedReader::open(&volumes.found)?;
        let total = input.total_len();
        let staging = self.staging_path(&request.source, &request.destination);
        fs::create_dir_all(self.store.dir()).map_err(|e| {
            ArchiveError::Io(format!(
                "failed to create staging directory {}: {e}",
                self.store.dir().display()
            ))
        })?;
        let offset = self.resume_offset(request, &staging, total);

        let mut output = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&staging)?;
        output.set_len(offset)?;
        output.seek(SeekFrom::Start(offset))?;
        input.seek(SeekFrom::Start(offset))?;

        info!(
            source = ?request.source,
            %format,
            total_bytes = total,
            resumed_from = offset,
            "streaming archive"
        );

        let mut decoder = handler.decoder();
        let mut throttle = CheckpointThrottle::new(
            self.config.checkpoint_interval,
            self.config.checkpoint_min_bytes,
            offset,
        );
        let mut window = ThroughputWindow::new(self.config.throughput_window);
        let mut buf = vec![0u8; self.config.chunk_size.max(1)];
        let mut processed = offset;

        loop {
            if cancel.is_cancelled() {
                if total > 0 && processed > 0 {
                    output.sync_data()?;
                    self.save_checkpoint(request, &staging, total, processed);
                }
                info!(source = ?request.source, processed_bytes = processed, "extraction cancelled");
                return Err(ArchiveError::Cancelled);
            }
            if total > 0 && processed >= total {
                break;
            }

            let want = if total > 0 {
                buf.len().min(usize::try_from(total - processed).unwrap_or(usize::MAX))
            } else {
                buf.len()
            };
            let n = read_chunk(&mut input, &mut buf[..want])?;
            if n == 0 {
                if total > 0 {
                    return Err(ArchiveError::Io(format!(
                        "unexpected end of input after {processed} of {total} bytes"
                    )));
                }
                break;
            }

            decoder.decode(&buf[..n], &mut output)?;
            processed += n as u64;

            let rate = window.record(n as u64);
            sink(Progress {
                fraction: fraction(processed, total),
                processed_bytes: processed,
                total_bytes: total,
                bytes_per_second: (rate > 0.0).then_some(rate),
                eta_seconds: eta_seconds(processed, total, rate),
            });

            if total > 0 && throttle.is_due(processed) {
                output.sync_data()?;
                self.save_checkpoint(request, &staging, total, processed);
                throttle.mark_saved(processed);
            }

            if let Some(pacing) = self.config.chunk_pacing {
                std::thread::sleep(pacing);
            }
        }

        decoder.finish(&mut output)?;
        output.sync_all()?;
        drop(output);

        let materialized = handler.materialize(&MaterializeRequest {
            staged: &staging,
            volumes: &volumes,
            destination: &request.destination,
            password: request.password.as_deref(),
            collision: self.config.file_collision,
            cancel,
        });
        let files = match materialized {
            Ok(files) => files,
            Err(ArchiveError::Cancelled) => {
                // Streaming is done; a resumed attempt goes straight to unpacking
                if total > 0 {
                    self.save_checkpoint(request, &staging, total, processed);
                }
                return Err(ArchiveError::Cancelled);
            }
            Err(e) => {
                warn!(source = ?request.source, error = %e, "failed to unpack entries");
                self.cleanup(request, &staging);
                return Err(e);
            }
        };

        self.cleanup(request, &staging);
        sink(Progress {
            fraction: 1.0,
            processed_bytes: processed,
            total_bytes: total,
            bytes_per_second: None,
            eta_seconds: None,
        });

        info!(
            source = ?request.source,
            %format,
            bytes = processed,
            files = files.len(),
            "extraction completed"
        );

        Ok(ExtractOutcome {
            format,
            files,
            bytes: processed,
            resumed_from: offset,
            inspection,
        })
    }

    /// Drop the checkpoint and the staging file
    fn cleanup(&self, request: &ExtractRequest, staging: &Path) {
        if let Err(e) = self.store.remove(&request.source, &request.destination) {
            warn!(source = ?request.source, error = %e, "failed to remove checkpoint");
        }
        if let Err(e) = fs::remove_file(staging)
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!(?staging, error = %e, "failed to remove staging file");
        }
    }
}

fn fraction(processed: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (processed as f64 / total as f64).min(1.0)
    }
}

fn read_chunk(input: &mut impl Read, buf: &mut [u8]) -> Result<usize, ArchiveError> {
    loop {
        match input.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ArchiveError::Io(format!("failed to read archive: {e}"))),
        }
    }
}
