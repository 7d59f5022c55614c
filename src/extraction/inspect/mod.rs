//! Archive metadata inspection without extraction
//!
//! Each format module parses just enough of the container structure to report
//! whether entries are encrypted and, where the format exposes it cheaply, how
//! many entries there are and their declared uncompressed size. Malformed input
//! yields `ArchiveError::Corrupted`, never a panic.

mod rar;
mod sevenz;
mod zip;

pub use self::rar::inspect_rar;
pub use self::sevenz::inspect_sevenz;
pub use self::zip::inspect_zip;

use super::segmented::SegmentedReader;
use super::volumes::{collect_volume_segments, rar_reading_order};
use crate::error::ArchiveError;
use crate::types::{ArchiveFormat, InspectionResult, VolumeSet};
use std::path::Path;

/// Inspect the archive `path` belongs to
///
/// Resolves the volume set first so multi-volume archives are read as one
/// stream. Volumes that are missing on disk are not read.
pub fn inspect(path: &Path, format: ArchiveFormat) -> Result<InspectionResult, ArchiveError> {
    let volumes = collect_volume_segments(path);
    inspect_volumes(format, &volumes)
}

/// Inspect an already-resolved volume set
pub fn inspect_volumes(
    format: ArchiveFormat,
    volumes: &VolumeSet,
) -> Result<InspectionResult, ArchiveError> {
    if volumes.found.is_empty() {
        return Err(ArchiveError::Io(format!(
            "archive not found: {}",
            volumes
                .expected
                .first()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        )));
    }

    let mut result = match format {
        ArchiveFormat::Zip => inspect_zip(&mut SegmentedReader::open(&volumes.found)?)?,
        ArchiveFormat::Rar => {
            inspect_rar(&mut SegmentedReader::open(&rar_reading_order(&volumes.found))?)?
        }
        ArchiveFormat::SevenZip => inspect_sevenz(&mut SegmentedReader::open(&volumes.found)?)?,
    };
    result.multi_volume = volumes.is_multi_volume();
    Ok(result)
}

// Little-endian field readers over header slices. Callers check bounds first.

pub(crate) fn le_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

pub(crate) fn le_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

pub(crate) fn le_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}
