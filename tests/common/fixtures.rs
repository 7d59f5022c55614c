//! Archive fixtures and test content generators

use std::fs;
use std::io::Write;
use std::path::Path;

/// Deterministic, non-repeating-looking content of `len` bytes
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 253) as u8).collect()
}

/// Create a stored (uncompressed) ZIP archive with the given entries
pub fn create_zip(archive_path: &Path, files: &[(&str, &[u8])]) {
    let file = fs::File::create(archive_path).expect("create zip");
    let mut writer = zip::ZipWriter::new(file);
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, content) in files {
        writer.start_file(*name, options).expect("start entry");
        writer.write_all(content).expect("write entry");
    }
    writer.finish().expect("finish zip");
}

/// Create a ZipCrypto-encrypted ZIP archive with one entry
pub fn create_encrypted_zip(archive_path: &Path, name: &str, content: &[u8], password: &str) {
    use zip::unstable::write::FileOptionsExt;
    let file = fs::File::create(archive_path).expect("create zip");
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .with_deprecated_encryption(password.as_bytes());
    writer.start_file(name, options).expect("start entry");
    writer.write_all(content).expect("write entry");
    writer.finish().expect("finish zip");
}

/// Compress a directory into a 7z archive
pub fn create_7z(archive_path: &Path, source_dir: &Path) {
    sevenz_rust::compress_to_path(source_dir, archive_path).expect("create 7z");
}

/// Split `archive_path` into `.001`, `.002`, ... volumes of `volume_size` bytes
///
/// The original file is removed.
pub fn split_into_volumes(archive_path: &Path, volume_size: usize) -> Vec<std::path::PathBuf> {
    let bytes = fs::read(archive_path).expect("read archive");
    let mut volumes = Vec::new();
    for (index, chunk) in bytes.chunks(volume_size).enumerate() {
        let volume = archive_path.with_file_name(format!(
            "{}.{:03}",
            archive_path
                .file_name()
                .and_then(|n| n.to_str())
                .expect("utf-8 file name"),
            index + 1
        ));
        fs::write(&volume, chunk).expect("write volume");
        volumes.push(volume);
    }
    fs::remove_file(archive_path).expect("remove original");
    volumes
}
