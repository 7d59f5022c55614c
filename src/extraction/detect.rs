//! Archive format sniffing
//!
//! Classification looks at the file name first and only falls back to reading
//! the leading signature bytes (at most 8) when the name is inconclusive.

use crate::types::ArchiveFormat;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// ZIP local file header, end of central directory and spanned-archive markers
pub(crate) const ZIP_SIGNATURES: [[u8; 4]; 3] = [
    [0x50, 0x4B, 0x03, 0x04],
    [0x50, 0x4B, 0x05, 0x06],
    [0x50, 0x4B, 0x07, 0x08],
];

/// RAR 1.5 to 4.x signature
pub(crate) const RAR4_SIGNATURE: [u8; 7] = [0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x00];

/// RAR 5.0 signature
pub(crate) const RAR5_SIGNATURE: [u8; 8] = [0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x01, 0x00];

/// 7z signature
pub(crate) const SEVENZ_SIGNATURE: [u8; 6] = [0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C];

/// Classify `path` as one of the supported archive formats
///
/// Read-only and idempotent: repeated calls on an unchanged file give the same
/// answer. Returns `None` when neither the name nor the signature is recognized.
pub fn classify(path: &Path) -> Option<ArchiveFormat> {
    classify_by_name(path).or_else(|| classify_by_signature(path))
}

/// Extension-based classification (no I/O)
pub fn classify_by_name(path: &Path) -> Option<ArchiveFormat> {
    let name = path.file_name()?.to_str()?.to_ascii_lowercase();
    let ext = name.rsplit_once('.')?.1;

    match ext {
        "zip" | "cbz" | "z01" => return Some(ArchiveFormat::Zip),
        "rar" | "cbr" => return Some(ArchiveFormat::Rar),
        "7z" | "cb7" => return Some(ArchiveFormat::SevenZip),
        _ => {}
    }

    let bytes = ext.as_bytes();
    if bytes.len() == 3 && bytes[0] == b'r' && bytes[1..].iter().all(u8::is_ascii_digit) {
        return Some(ArchiveFormat::Rar);
    }
    if bytes.len() == 3 && bytes.iter().all(u8::is_ascii_digit) {
        return Some(ArchiveFormat::SevenZip);
    }

    None
}

/// Signature-based classification; reads at most 8 bytes
pub fn classify_by_signature(path: &Path) -> Option<ArchiveFormat> {
    let mut header = [0u8; 8];
    let len = read_prefix(path, &mut header).ok()?;
    format_from_signature(&header[..len])
}

pub(crate) fn format_from_signature(header: &[u8]) -> Option<ArchiveFormat> {
    if header.len() >= 4 && ZIP_SIGNATURES.iter().any(|sig| header[..4] == sig[..]) {
        return Some(ArchiveFormat::Zip);
    }
    if header.starts_with(&RAR5_SIGNATURE) || header.starts_with(&RAR4_SIGNATURE) {
        return Some(ArchiveFormat::Rar);
    }
    if header.starts_with(&SEVENZ_SIGNATURE) {
        return Some(ArchiveFormat::SevenZip);
    }
    None
}

fn read_prefix(path: &Path, buf: &mut [u8]) -> std::io::Result<usize> {
    let file = File::open(path)?;
    let mut filled = 0;
    let mut reader = file.take(buf.len() as u64);
    loop {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Ok(filled),
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
        if filled == buf.len() {
            return Ok(filled);
        }
    }
}
