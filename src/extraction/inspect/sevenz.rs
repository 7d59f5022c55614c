//! 7z signature header and next-header scan

use super::le_u64;
use crate::error::ArchiveError;
use crate::extraction::detect::SEVENZ_SIGNATURE;
use crate::extraction::segmented::SegmentedReader;
use crate::types::InspectionResult;
use std::io::{Read, Seek, SeekFrom};

const SIGNATURE_HEADER_LEN: u64 = 32;

/// Coder id of 7zAES (AES-256 + SHA-256 key derivation)
const AES_CODER_ID: [u8; 4] = [0x06, 0xF1, 0x07, 0x01];

/// Property id of a plain (unpacked) header
const PROPERTY_HEADER: u8 = 0x01;
/// Property id of a packed header whose streams must be decoded first
const PROPERTY_ENCODED_HEADER: u8 = 0x17;

/// Inspect a 7z archive (single file or `.7z.001` split set)
///
/// The next header is located from the signature header and scanned for the
/// AES coder id. Both encrypted-header archives and plain-header archives with
/// encrypted content reference the coder there. Entry counts are not decoded.
pub fn inspect_sevenz(reader: &mut SegmentedReader) -> Result<InspectionResult, ArchiveError> {
    let len = reader.total_len();
    if len < SIGNATURE_HEADER_LEN {
        return Ok(InspectionResult::default());
    }

    let mut start = [0u8; SIGNATURE_HEADER_LEN as usize];
    reader.seek(SeekFrom::Start(0))?;
    reader.read_exact(&mut start)?;
    if start[..6] != SEVENZ_SIGNATURE {
        return Ok(InspectionResult::default());
    }

    let next_offset = le_u64(&start, 12);
    let next_size = le_u64(&start, 20);
    let next_start = SIGNATURE_HEADER_LEN
        .checked_add(next_offset)
        .filter(|s| *s <= len)
        .ok_or_else(|| {
            ArchiveError::Corrupted(format!("next header offset {next_offset} is outside the file"))
        })?;
    let next_end = next_start
        .checked_add(next_size)
        .filter(|e| *e <= len)
        .ok_or_else(|| {
            ArchiveError::Corrupted(format!(
                "next header ({next_size} bytes at {next_start}) runs past the end of the file"
            ))
        })?;

    let mut result = InspectionResult {
        valid_format: true,
        ..Default::default()
    };
    if next_size == 0 {
        result.entry_count = Some(0);
        result.total_uncompressed = Some(0);
        return Ok(result);
    }

    reader.seek(SeekFrom::Start(next_start))?;
    let mut next_header = vec![0u8; (next_end - next_start) as usize];
    reader.read_exact(&mut next_header)?;

    match next_header[0] {
        PROPERTY_HEADER | PROPERTY_ENCODED_HEADER => {}
        other => {
            return Err(ArchiveError::Corrupted(format!(
                "unexpected next header property id {other:#04x}"
            )));
        }
    }

    result.encrypted = next_header
        .windows(AES_CODER_ID.len())
        .any(|window| window == AES_CODER_ID);
    Ok(result)
}
