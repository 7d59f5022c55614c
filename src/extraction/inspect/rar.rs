//! RAR 4.x block walk and RAR 5.0 header walk
//!
//! Only the first volume is examined: every file header (and the archive-level
//! encryption marker) appears there, and split entries carry their full
//! unpacked size in the first volume.

use super::{le_u16, le_u32};
use crate::error::ArchiveError;
use crate::extraction::detect::{RAR4_SIGNATURE, RAR5_SIGNATURE};
use crate::extraction::segmented::SegmentedReader;
use crate::types::InspectionResult;
use std::io::{Read, Seek, SeekFrom};

// RAR 4.x block types and flags
const RAR4_MAIN_HEAD: u8 = 0x73;
const RAR4_FILE_HEAD: u8 = 0x74;
const RAR4_END_ARCHIVE: u8 = 0x7B;
const RAR4_MHD_PASSWORD: u16 = 0x0080;
const RAR4_LHD_SPLIT_BEFORE: u16 = 0x0001;
const RAR4_LHD_PASSWORD: u16 = 0x0004;
const RAR4_LHD_LARGE: u16 = 0x0100;
const RAR4_LONG_BLOCK: u16 = 0x8000;
const RAR4_BASE_HEAD_LEN: u64 = 7;
const RAR4_FILE_HEAD_MIN_LEN: usize = 32;

// RAR 5.0 header types and flags
const RAR5_FILE_HEADER: u64 = 2;
const RAR5_ENCRYPTION_HEADER: u64 = 4;
const RAR5_END_HEADER: u64 = 5;
const RAR5_HAS_EXTRA: u64 = 0x0001;
const RAR5_HAS_DATA: u64 = 0x0002;
const RAR5_SPLIT_BEFORE: u64 = 0x0008;
const RAR5_FILE_HAS_MTIME: u64 = 0x0002;
const RAR5_FILE_HAS_CRC: u64 = 0x0004;
const RAR5_FILE_UNKNOWN_SIZE: u64 = 0x0008;
const RAR5_EXTRA_ENCRYPTION: u64 = 0x01;
const RAR5_MAX_HEADER_SIZE: u64 = 2 * 1024 * 1024;

/// Inspect a RAR archive (4.x or 5.0 layout)
pub fn inspect_rar(reader: &mut SegmentedReader) -> Result<InspectionResult, ArchiveError> {
    let limit = reader.volume_len(0).unwrap_or(0);

    let mut signature = [0u8; 8];
    let sig_len = limit.min(8) as usize;
    reader.seek(SeekFrom::Start(0))?;
    reader.read_exact(&mut signature[..sig_len])?;

    if signature[..sig_len].starts_with(&RAR5_SIGNATURE) {
        walk_rar5(reader, limit)
    } else if signature[..sig_len].starts_with(&RAR4_SIGNATURE) {
        walk_rar4(reader, limit)
    } else {
        Ok(InspectionResult::default())
    }
}

fn read_at(reader: &mut SegmentedReader, pos: u64, len: usize) -> Result<Vec<u8>, ArchiveError> {
    reader.seek(SeekFrom::Start(pos))?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn walk_rar4(reader: &mut SegmentedReader, limit: u64) -> Result<InspectionResult, ArchiveError> {
    let mut result = InspectionResult {
        valid_format: true,
        ..Default::default()
    };
    let mut count = 0usize;
    let mut total = 0u64;
    let mut pos = RAR4_SIGNATURE.len() as u64;

    while pos + RAR4_BASE_HEAD_LEN <= limit {
        let base = read_at(reader, pos, RAR4_BASE_HEAD_LEN as usize)?;
        let head_type = base[2];
        let flags = le_u16(&base, 3);
        let head_size = u64::from(le_u16(&base, 5));

        if head_size < RAR4_BASE_HEAD_LEN {
            return Err(ArchiveError::Corrupted(format!(
                "RAR block at offset {pos} declares size {head_size}"
            )));
        }
        if pos + head_size > limit {
            return Err(ArchiveError::Corrupted(format!(
                "RAR block at offset {pos} runs past the end of the volume"
            )));
        }
        let header = read_at(reader, pos, head_size as usize)?;

        let data_size = match head_type {
            RAR4_MAIN_HEAD if flags & RAR4_MHD_PASSWORD != 0 => {
                // Headers are encrypted; nothing further can be listed
                result.encrypted = true;
                return Ok(result);
            }
            RAR4_FILE_HEAD => {
                if header.len() < RAR4_FILE_HEAD_MIN_LEN {
                    return Err(ArchiveError::Corrupted(format!(
                        "RAR file header at offset {pos} is too short"
                    )));
                }
                let mut packed = u64::from(le_u32(&header, 7));
                let mut unpacked = u64::from(le_u32(&header, 11));
                if flags & RAR4_LHD_LARGE != 0 && header.len() >= 40 {
                    packed |= u64::from(le_u32(&header, 32)) << 32;
                    unpacked |= u64::from(le_u32(&header, 36)) << 32;
                }

                if flags & RAR4_LHD_SPLIT_BEFORE == 0 {
                    if flags & RAR4_LHD_PASSWORD != 0 {
                        result.encrypted = true;
                        result.first_encrypted_entry.get_or_insert(count);
                    }
                    total = add_size(total, unpacked, pos)?;
                    count += 1;
                }
                packed
            }
            RAR4_END_ARCHIVE => break,
            _ if flags & RAR4_LONG_BLOCK != 0 => {
                if header.len() < 11 {
                    return Err(ArchiveError::Corrupted(format!(
                        "RAR block at offset {pos} is missing its data size"
                    )));
                }
                u64::from(le_u32(&header, 7))
            }
            _ => 0,
        };

        pos = (pos + head_size).checked_add(data_size).ok_or_else(|| {
            ArchiveError::Corrupted(format!("RAR data size overflow at offset {pos}"))
        })?;
    }

    result.entry_count = Some(count);
    result.total_uncompressed = Some(total);
    Ok(result)
}

fn walk_rar5(reader: &mut SegmentedReader, limit: u64) -> Result<InspectionResult, ArchiveError> {
    let mut result = InspectionResult {
        valid_format: true,
        ..Default::default()
    };
    let mut count = 0usize;
    let mut total = 0u64;
    let mut pos = RAR5_SIGNATURE.len() as u64;

    while pos < limit {
        // CRC32 followed by the header size vint (at most 10 bytes)
        let prefix_len = (limit - pos).min(14) as usize;
        let prefix = read_at(reader, pos, prefix_len)?;
        let mut cursor = HeaderCursor::new(&prefix);
        cursor.skip(4)?;
        let header_size = cursor.vint()?;
        if header_size == 0 || header_size > RAR5_MAX_HEADER_SIZE {
            return Err(ArchiveError::Corrupted(format!(
                "RAR5 header at offset {pos} declares size {header_size}"
            )));
        }

        let header_start = pos + cursor.position() as u64;
        let header_end = header_start + header_size;
        if header_end > limit {
            return Err(ArchiveError::Corrupted(format!(
                "RAR5 header at offset {pos} runs past the end of the volume"
            )));
        }
        let header = read_at(reader, header_start, header_size as usize)?;

        let mut cursor = HeaderCursor::new(&header);
        let header_type = cursor.vint()?;
        let flags = cursor.vint()?;
        let extra_size = if flags & RAR5_HAS_EXTRA != 0 { cursor.vint()? } else { 0 };
        let data_size = if flags & RAR5_HAS_DATA != 0 { cursor.vint()? } else { 0 };

        match header_type {
            RAR5_ENCRYPTION_HEADER => {
                result.encrypted = true;
                return Ok(result);
            }
            RAR5_FILE_HEADER => {
                let file_flags = cursor.vint()?;
                let unpacked = cursor.vint()?;
                let encrypted = has_encryption_record(&header, extra_size)?;

                if flags & RAR5_SPLIT_BEFORE == 0 {
                    if encrypted {
                        result.encrypted = true;
                        result.first_encrypted_entry.get_or_insert(count);
                    }
                    if file_flags & RAR5_FILE_UNKNOWN_SIZE == 0 {
                        total = add_size(total, unpacked, pos)?;
                    }
                    count += 1;
                }

                // Remaining fields are parsed only to validate the header layout
                let _attributes = cursor.vint()?;
                if file_flags & RAR5_FILE_HAS_MTIME != 0 {
                    cursor.skip(4)?;
                }
                if file_flags & RAR5_FILE_HAS_CRC != 0 {
                    cursor.skip(4)?;
                }
                let _compression = cursor.vint()?;
                let _host_os = cursor.vint()?;
                let name_len = cursor.vint()?;
                cursor.skip(name_len as usize)?;
            }
            RAR5_END_HEADER => break,
            _ => {}
        }

        pos = header_end.checked_add(data_size).ok_or_else(|| {
            ArchiveError::Corrupted(format!("RAR5 data size overflow at offset {pos}"))
        })?;
    }

    result.entry_count = Some(count);
    result.total_uncompressed = Some(total);
    Ok(result)
}

/// Add a declared entry size to the running total
fn add_size(total: u64, size: u64, pos: u64) -> Result<u64, ArchiveError> {
    total.checked_add(size).ok_or_else(|| {
        ArchiveError::Corrupted(format!("declared sizes overflow at offset {pos}"))
    })
}

/// Scan the extra area at the tail of a RAR5 header for a file encryption record
fn has_encryption_record(header: &[u8], extra_size: u64) -> Result<bool, ArchiveError> {
    if extra_size == 0 {
        return Ok(false);
    }
    let extra_size = usize::try_from(extra_size)
        .ok()
        .filter(|size| *size <= header.len())
        .ok_or_else(|| ArchiveError::Corrupted("RAR5 extra area larger than header".into()))?;

    let extra = &header[header.len() - extra_size..];
    let mut cursor = HeaderCursor::new(extra);
    while cursor.remaining() > 0 {
        let record_size = cursor.vint()? as usize;
        let record_start = cursor.position();
        let record_type = cursor.vint()?;
        if record_type == RAR5_EXTRA_ENCRYPTION {
            return Ok(true);
        }
        let consumed = cursor.position() - record_start;
        cursor.skip(record_size.checked_sub(consumed).ok_or_else(|| {
            ArchiveError::Corrupted("RAR5 extra record shorter than its type".into())
        })?)?;
    }
    Ok(false)
}

/// Bounds-checked reader over a header slice
struct HeaderCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> HeaderCursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn skip(&mut self, n: usize) -> Result<(), ArchiveError> {
        if n > self.remaining() {
            return Err(ArchiveError::Corrupted(format!(
                "RAR5 header field runs past the header ({n} bytes at {})",
                self.pos
            )));
        }
        self.pos += n;
        Ok(())
    }

    /// Variable-length integer: 7 data bits per byte, high bit set on all but the last
    fn vint(&mut self) -> Result<u64, ArchiveError> {
        let mut value = 0u64;
        for shift in (0..70).step_by(7) {
            let Some(&byte) = self.buf.get(self.pos) else {
                return Err(ArchiveError::Corrupted("truncated RAR5 vint".into()));
            };
            self.pos += 1;
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(ArchiveError::Corrupted("RAR5 vint longer than 10 bytes".into()))
    }
}
