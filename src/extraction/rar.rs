use super::handler::{entry_target, ArchiveHandler, MaterializeRequest};
use super::volumes::rar_reading_order;
use crate::error::ArchiveError;
use crate::types::{ArchiveFormat, InspectionResult, VolumeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use unrar::error::{Code, UnrarError};

/// RAR support backed by `unrar`
///
/// `unrar` follows volume sets on its own, so both the password check and
/// materialization open the first volume of the original set rather than the
/// staged copy.
#[derive(Debug, Default, Clone, Copy)]
pub struct RarHandler;

impl RarHandler {
    fn first_volume(volumes: &VolumeSet) -> Result<PathBuf, ArchiveError> {
        rar_reading_order(&volumes.found)
            .into_iter()
            .next()
            .ok_or_else(|| ArchiveError::Io("RAR volume set is empty".to_string()))
    }

    fn archive<'a>(path: &'a Path, password: Option<&'a str>) -> unrar::Archive<'a> {
        match password {
            Some(pw) if !pw.is_empty() => unrar::Archive::with_password(path, pw.as_bytes()),
            _ => unrar::Archive::new(path),
        }
    }
}

impl ArchiveHandler for RarHandler {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Rar
    }

    fn verify_password(
        &self,
        volumes: &VolumeSet,
        inspection: &InspectionResult,
        password: &str,
    ) -> Result<(), ArchiveError> {
        let path = Self::first_volume(volumes)?;
        let target = inspection.first_encrypted_entry.unwrap_or(0);

        // Encrypted headers already fail here on a wrong password
        let mut at_header = Self::archive(&path, Some(password))
            .open_for_processing()
            .map_err(|e| convert_unrar_error(e, true))?;

        let mut index = 0usize;
        loop {
            let at_file = match at_header.read_header() {
                Ok(Some(at_file)) => at_file,
                Ok(None) => return Ok(()),
                Err(e) => return Err(convert_unrar_error(e, true)),
            };

            if index == target {
                debug!(?path, entry = index, "testing encrypted RAR entry");
                at_file.test().map_err(|e| convert_unrar_error(e, true))?;
                return Ok(());
            }
            at_header = at_file.skip().map_err(|e| convert_unrar_error(e, true))?;
            index += 1;
        }
    }

    fn materialize(&self, request: &MaterializeRequest<'_>) -> Result<Vec<PathBuf>, ArchiveError> {
        let path = Self::first_volume(request.volumes)?;
        let encrypted = request.password.is_some_and(|pw| !pw.is_empty());

        let mut at_header = Self::archive(&path, request.password)
            .open_for_processing()
            .map_err(|e| convert_unrar_error(e, encrypted))?;
        let mut files = Vec::new();

        loop {
            if request.cancel.is_cancelled() {
                return Err(ArchiveError::Cancelled);
            }

            let at_file = match at_header.read_header() {
                Ok(Some(at_file)) => at_file,
                Ok(None) => break,
                Err(e) => return Err(convert_unrar_error(e, encrypted)),
            };

            let header = at_file.entry();
            let name = header.filename.to_string_lossy().into_owned();

            let target = if header.is_directory() {
                if let Ok(dir) = crate::sanitize::resolve(&name, request.destination) {
                    std::fs::create_dir_all(dir)?;
                } else {
                    warn!(entry = %name, "skipping unsafe archive entry");
                }
                None
            } else {
                entry_target(&name, request.destination, request.collision)?
            };

            at_header = match target {
                Some(target) => {
                    let next = at_file
                        .extract_to(&target)
                        .map_err(|e| convert_unrar_error(e, encrypted))?;
                    files.push(target);
                    next
                }
                None => at_file
                    .skip()
                    .map_err(|e| convert_unrar_error(e, encrypted))?,
            };
        }

        info!(
            ?path,
            extracted_count = files.len(),
            "RAR entries unpacked"
        );
        Ok(files)
    }
}

/// Map an unrar error, treating data errors on encrypted input as a wrong password
///
/// RAR 4.x reports a wrong password on file data as a CRC failure.
fn convert_unrar_error(e: UnrarError, encrypted: bool) -> ArchiveError {
    match e.code {
        Code::MissingPassword => ArchiveError::PasswordRequired,
        Code::BadPassword => ArchiveError::BadPassword,
        Code::BadData if encrypted => ArchiveError::BadPassword,
        Code::BadData | Code::BadArchive | Code::UnknownFormat => {
            ArchiveError::Corrupted(e.to_string())
        }
        Code::EOpen => ArchiveError::Io(format!("failed to open volume: {e}")),
        _ => ArchiveError::Io(e.to_string()),
    }
}
