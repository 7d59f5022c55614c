use super::handler::{ArchiveHandler, MaterializeRequest, entry_target, remove_partial_entry};
use super::segmented::SegmentedReader;
use crate::error::ArchiveError;
use crate::types::{ArchiveFormat, InspectionResult, VolumeSet};
use sevenz_rust::{Password, SevenZReader};
use std::fs::File;
use std::io::{self, Read, Seek};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// 7z support backed by `sevenz-rust`
///
/// Split sets (`.7z.001` …) are plain byte splits, so the password check reads
/// the volumes through a [`SegmentedReader`] and materialization reads the
/// staged concatenation.
#[derive(Debug, Default, Clone, Copy)]
pub struct SevenZipHandler;

fn password_of(password: Option<&str>) -> Password {
    match password {
        Some(pw) if !pw.is_empty() => Password::from(pw),
        _ => Password::empty(),
    }
}

fn open_reader<R: Read + Seek>(
    reader: R,
    len: u64,
    password: Option<&str>,
    encrypted: bool,
) -> Result<SevenZReader<R>, ArchiveError> {
    SevenZReader::new(reader, len, password_of(password))
        .map_err(|e| convert_sevenz_error(e, encrypted))
}

impl ArchiveHandler for SevenZipHandler {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::SevenZip
    }

    fn verify_password(
        &self,
        volumes: &VolumeSet,
        _inspection: &InspectionResult,
        password: &str,
    ) -> Result<(), ArchiveError> {
        let input = SegmentedReader::open(&volumes.found)?;
        let len = input.total_len();
        // Encrypted headers fail to decode here on a wrong password
        let mut archive = open_reader(input, len, Some(password), true)?;

        // Decoding the first entry with data proves the key for content-only encryption
        let mut decode_failed = false;
        archive
            .for_each_entries(|entry, reader| {
                if !entry.has_stream {
                    return Ok(true);
                }
                decode_failed = io::copy(reader, &mut io::sink()).is_err();
                Ok(false)
            })
            .map_err(|e| convert_sevenz_error(e, true))?;

        if decode_failed {
            return Err(ArchiveError::BadPassword);
        }
        debug!("7z password accepted");
        Ok(())
    }

    fn materialize(&self, request: &MaterializeRequest<'_>) -> Result<Vec<PathBuf>, ArchiveError> {
        let staged = File::open(request.staged)?;
        let len = staged.metadata()?.len();
        let encrypted = request.password.is_some_and(|pw| !pw.is_empty());
        let mut archive = open_reader(staged, len, request.password, encrypted)?;

        let mut files = Vec::new();
        let mut failure: Option<ArchiveError> = None;

        let walk = archive.for_each_entries(|entry, reader| {
            if request.cancel.is_cancelled() {
                failure = Some(ArchiveError::Cancelled);
                return Ok(false);
            }

            let name = entry.name.as_str();
            if entry.is_directory {
                match crate::sanitize::resolve(name, request.destination) {
                    Ok(dir) => {
                        if let Err(e) = std::fs::create_dir_all(dir) {
                            failure = Some(e.into());
                            return Ok(false);
                        }
                    }
                    Err(e) => warn!(entry = name, error = %e, "skipping unsafe archive entry"),
                }
                return Ok(true);
            }

            let target = match entry_target(name, request.destination, request.collision) {
                Ok(Some(target)) => target,
                Ok(None) => {
                    if let Err(e) = io::copy(reader, &mut io::sink()) {
                        failure = Some(e.into());
                        return Ok(false);
                    }
                    return Ok(true);
                }
                Err(e) => {
                    failure = Some(e);
                    return Ok(false);
                }
            };

            let written = File::create(&target).and_then(|mut out| io::copy(reader, &mut out));
            if let Err(e) = written {
                remove_partial_entry(&target);
                failure = Some(if encrypted {
                    ArchiveError::BadPassword
                } else {
                    ArchiveError::Corrupted(format!("failed to unpack {name}: {e}"))
                });
                return Ok(false);
            }
            files.push(target);
            Ok(true)
        });

        if let Some(e) = failure {
            return Err(e);
        }
        walk.map_err(|e| convert_sevenz_error(e, encrypted))?;

        info!(
            destination = ?request.destination,
            extracted_count = files.len(),
            "7z entries unpacked"
        );
        Ok(files)
    }
}

/// Map a sevenz-rust error
///
/// The crate has no wrong-key error: an AES key mismatch surfaces as a checksum
/// or header decode failure, so those mean a wrong password on encrypted input.
fn convert_sevenz_error(e: sevenz_rust::Error, encrypted: bool) -> ArchiveError {
    use sevenz_rust::Error;
    match e {
        Error::PasswordRequired => ArchiveError::PasswordRequired,
        Error::BadSignature(_) | Error::UnsupportedVersion { .. } => {
            ArchiveError::Unsupported(e.to_string())
        }
        Error::UnsupportedCompressionMethod(_) | Error::Unsupported(_) => {
            ArchiveError::Unsupported(e.to_string())
        }
        Error::FileOpen(..) => ArchiveError::Io(e.to_string()),
        _ if encrypted => ArchiveError::BadPassword,
        _ => ArchiveError::Corrupted(e.to_string()),
    }
}
