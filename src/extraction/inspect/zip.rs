//! ZIP central directory walk

use super::{le_u16, le_u32};
use crate::error::ArchiveError;
use crate::extraction::detect::ZIP_SIGNATURES;
use crate::extraction::segmented::SegmentedReader;
use crate::types::InspectionResult;
use std::io::{Read, Seek, SeekFrom};

const EOCD_SIGNATURE: [u8; 4] = [0x50, 0x4B, 0x05, 0x06];
const CENTRAL_HEADER_SIGNATURE: [u8; 4] = [0x50, 0x4B, 0x01, 0x02];
const EOCD_LEN: usize = 22;
const CENTRAL_HEADER_LEN: usize = 46;
const MAX_COMMENT_LEN: usize = 65_535;

/// Inspect a ZIP archive (single file or concatenated split set)
///
/// Reads at most the trailing 65 557 bytes to locate the end of central
/// directory record, then walks the fixed-size central directory headers.
pub fn inspect_zip(reader: &mut SegmentedReader) -> Result<InspectionResult, ArchiveError> {
    let len = reader.total_len();
    if len < EOCD_LEN as u64 {
        return Ok(InspectionResult::default());
    }

    let tail_len = len.min((EOCD_LEN + MAX_COMMENT_LEN) as u64);
    let tail_start = len - tail_len;
    reader.seek(SeekFrom::Start(tail_start))?;
    let mut tail = vec![0u8; tail_len as usize];
    reader.read_exact(&mut tail)?;

    let Some(eocd_at) = find_eocd(&tail) else {
        if starts_like_zip(reader)? {
            return Err(ArchiveError::Corrupted(
                "end of central directory record not found".to_string(),
            ));
        }
        return Ok(InspectionResult::default());
    };
    let eocd = &tail[eocd_at..eocd_at + EOCD_LEN];

    let cd_disk = le_u16(eocd, 6) as usize;
    let declared_entries = le_u16(eocd, 10);
    let cd_size = le_u32(eocd, 12);
    let cd_offset = le_u32(eocd, 16);
    if cd_size == u32::MAX || cd_offset == u32::MAX || declared_entries == u16::MAX {
        return Err(ArchiveError::Unsupported(
            "ZIP64 archives are not supported".to_string(),
        ));
    }

    let disk_start = reader.volume_start(cd_disk).ok_or_else(|| {
        ArchiveError::Corrupted(format!("central directory on missing disk {cd_disk}"))
    })?;
    let eocd_pos = tail_start + eocd_at as u64;
    let cd_start = disk_start + u64::from(cd_offset);
    let cd_end = cd_start + u64::from(cd_size);
    if cd_end > eocd_pos {
        return Err(ArchiveError::Corrupted(format!(
            "central directory ({cd_start}..{cd_end}) runs past the end of the archive"
        )));
    }

    reader.seek(SeekFrom::Start(cd_start))?;
    let mut cd = vec![0u8; cd_size as usize];
    reader.read_exact(&mut cd)?;

    let mut result = InspectionResult {
        valid_format: true,
        ..Default::default()
    };
    let mut count = 0usize;
    let mut total = 0u64;
    let mut cursor = 0usize;
    while cursor < cd.len() {
        if cursor + CENTRAL_HEADER_LEN > cd.len() {
            return Err(ArchiveError::Corrupted(format!(
                "truncated central directory header at offset {cursor}"
            )));
        }
        if cd[cursor..cursor + 4] != CENTRAL_HEADER_SIGNATURE {
            return Err(ArchiveError::Corrupted(format!(
                "bad central directory signature at offset {cursor}"
            )));
        }

        let flags = le_u16(&cd, cursor + 8);
        let uncompressed = le_u32(&cd, cursor + 24);
        let name_len = le_u16(&cd, cursor + 28) as usize;
        let extra_len = le_u16(&cd, cursor + 30) as usize;
        let comment_len = le_u16(&cd, cursor + 32) as usize;
        let record_len = CENTRAL_HEADER_LEN + name_len + extra_len + comment_len;
        if cursor + record_len > cd.len() {
            return Err(ArchiveError::Corrupted(format!(
                "central directory record at offset {cursor} runs past the directory"
            )));
        }

        if flags & 0x0001 != 0 {
            result.encrypted = true;
            result.first_encrypted_entry.get_or_insert(count);
        }
        total += u64::from(uncompressed);
        count += 1;
        cursor += record_len;
    }

    result.entry_count = Some(count);
    result.total_uncompressed = Some(total);
    Ok(result)
}

/// Last EOCD candidate whose comment length matches the bytes that follow it,
/// or failing that the last candidate at all.
fn find_eocd(tail: &[u8]) -> Option<usize> {
    let mut fallback = None;
    for at in (0..=tail.len() - EOCD_LEN).rev() {
        if tail[at..at + 4] != EOCD_SIGNATURE {
            continue;
        }
        let comment_len = le_u16(tail, at + 20) as usize;
        if at + EOCD_LEN + comment_len == tail.len() {
            return Some(at);
        }
        fallback.get_or_insert(at);
    }
    fallback
}

fn starts_like_zip(reader: &mut SegmentedReader) -> Result<bool, ArchiveError> {
    let mut head = [0u8; 4];
    reader.seek(SeekFrom::Start(0))?;
    reader.read_exact(&mut head)?;
    Ok(ZIP_SIGNATURES.iter().any(|sig| *sig == head))
}
