use super::handler::{ArchiveHandler, MaterializeRequest, entry_target, remove_partial_entry};
use crate::error::ArchiveError;
use crate::types::{ArchiveFormat, InspectionResult, VolumeSet};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::result::ZipError;

/// ZIP support backed by the `zip` crate
///
/// Split ZIP sets (`.z01` … `.zip`) store per-disk offsets that the `zip`
/// crate cannot follow, so they are streamed and staged but neither password
/// checked nor unpacked.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipHandler;

impl ZipHandler {
    fn open(path: &Path) -> Result<zip::ZipArchive<File>, ArchiveError> {
        let file = File::open(path)?;
        zip::ZipArchive::new(file).map_err(convert_zip_error)
    }

    /// Open an entry, decrypting it when a password is given
    fn open_entry<'a>(
        archive: &'a mut zip::ZipArchive<File>,
        index: usize,
        password: Option<&str>,
    ) -> Result<zip::read::ZipFile<'a>, ArchiveError> {
        match password {
            Some(pw) if !pw.is_empty() => archive
                .by_index_decrypt(index, pw.as_bytes())
                .map_err(convert_zip_error)?
                .map_err(|_| ArchiveError::BadPassword),
            _ => archive.by_index(index).map_err(convert_zip_error),
        }
    }
}

impl ArchiveHandler for ZipHandler {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Zip
    }

    fn verify_password(
        &self,
        volumes: &VolumeSet,
        inspection: &InspectionResult,
        password: &str,
    ) -> Result<(), ArchiveError> {
        let [path] = volumes.found.as_slice() else {
            warn!(
                volumes = volumes.found.len(),
                "cannot verify password of split ZIP set, accepting it"
            );
            return Ok(());
        };

        let mut archive = Self::open(path)?;
        let index = inspection.first_encrypted_entry.unwrap_or(0);
        let mut entry = Self::open_entry(&mut archive, index, Some(password))?;

        // The ZipCrypto header check passes for 1 in 256 wrong passwords;
        // reading the entry through verifies its CRC as well
        io::copy(&mut entry, &mut io::sink()).map_err(|e| {
            debug!(error = %e, "encrypted entry failed to decode");
            ArchiveError::BadPassword
        })?;
        Ok(())
    }

    fn materialize(&self, request: &MaterializeRequest<'_>) -> Result<Vec<PathBuf>, ArchiveError> {
        if request.volumes.is_multi_volume() {
            warn!(
                staged = ?request.staged,
                "split ZIP sets are staged only, no entries unpacked"
            );
            return Ok(Vec::new());
        }

        let mut archive = Self::open(request.staged)?;
        let encrypted = request.password.is_some_and(|pw| !pw.is_empty());
        let mut files = Vec::new();

        for index in 0..archive.len() {
            if request.cancel.is_cancelled() {
                return Err(ArchiveError::Cancelled);
            }

            let mut entry = Self::open_entry(&mut archive, index, request.password)?;
            let name = entry.name().to_string();

            if entry.is_dir() {
                match crate::sanitize::resolve(&name, request.destination) {
                    Ok(dir) => std::fs::create_dir_all(dir)?,
                    Err(e) => warn!(entry = %name, error = %e, "skipping unsafe archive entry"),
                }
                continue;
            }

            let Some(target) = entry_target(&name, request.destination, request.collision)? else {
                continue;
            };

            let mut outfile = File::create(&target)?;
            if let Err(e) = io::copy(&mut entry, &mut outfile) {
                drop(outfile);
                remove_partial_entry(&target);
                return Err(if encrypted {
                    ArchiveError::BadPassword
                } else {
                    ArchiveError::Corrupted(format!("failed to unpack {name}: {e}"))
                });
            }
            files.push(target);
        }

        info!(
            destination = ?request.destination,
            extracted_count = files.len(),
            "ZIP entries unpacked"
        );
        Ok(files)
    }
}

fn convert_zip_error(e: ZipError) -> ArchiveError {
    match e {
        ZipError::Io(e) => ArchiveError::Io(e.to_string()),
        ZipError::InvalidArchive(msg) => ArchiveError::Corrupted(msg.to_string()),
        ZipError::UnsupportedArchive(msg) if msg == ZipError::PASSWORD_REQUIRED => {
            ArchiveError::PasswordRequired
        }
        ZipError::UnsupportedArchive(msg) => ArchiveError::Unsupported(msg.to_string()),
        ZipError::FileNotFound => ArchiveError::Corrupted("entry not found".to_string()),
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelHandle;
    use crate::config::CollisionPolicy;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_encrypted_zip(archive_path: &Path, name: &str, content: &[u8], password: &[u8]) {
        use ::zip::unstable::write::FileOptionsExt;
        let file = File::create(archive_path).unwrap();
        let mut writer = ::zip::ZipWriter::new(file);
        let options = ::zip::write::FileOptions::default()
            .compression_method(::zip::CompressionMethod::Stored)
            .with_deprecated_encryption(password);
        writer.start_file(name, options).unwrap();
        writer.write_all(content).unwrap();
        writer.finish().unwrap();
    }

    fn unpack(
        archive: &Path,
        destination: &Path,
        password: &str,
    ) -> Result<Vec<PathBuf>, ArchiveError> {
        let volumes = VolumeSet::single(archive.to_path_buf(), true);
        let cancel = CancelHandle::new();
        ZipHandler.materialize(&MaterializeRequest {
            staged: archive,
            volumes: &volumes,
            destination,
            password: Some(password),
            collision: CollisionPolicy::Rename,
            cancel: &cancel,
        })
    }

    #[test]
    fn wrong_password_leaves_no_entry_behind() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("locked.zip");
        create_encrypted_zip(&archive, "secret.bin", &[7u8; 4096], b"right");
        let destination = temp_dir.path().join("out");

        let err = unpack(&archive, &destination, "wrong").unwrap_err();

        assert_eq!(err, ArchiveError::BadPassword);
        assert!(!destination.join("secret.bin").exists());
    }

    #[test]
    fn right_password_unpacks_entry() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("locked.zip");
        create_encrypted_zip(&archive, "secret.bin", &[7u8; 4096], b"right");
        let destination = temp_dir.path().join("out");

        let files = unpack(&archive, &destination, "right").unwrap();

        assert_eq!(files, vec![destination.join("secret.bin")]);
        assert_eq!(std::fs::read(&files[0]).unwrap(), vec![7u8; 4096]);
    }
}
