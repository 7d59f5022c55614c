//! Archive extraction
//!
//! This module handles sniffing, inspecting and extracting ZIP, RAR and 7z
//! archives, including their multi-volume variants. Extraction streams the
//! concatenated volumes into a staging file with resumable checkpoints, then
//! hands the staged copy to the format handler to unpack entries through the
//! path sanitizer.

mod detect;
mod engine;
mod handler;
pub mod inspect;
mod passwords;
mod rar;
mod segmented;
mod sevenz;
mod throughput;
mod volumes;
mod zip;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

// Re-exports
pub use detect::{classify, classify_by_name, classify_by_signature};
pub use engine::{ExtractOutcome, ExtractRequest, Extractor};
pub use handler::{ArchiveHandler, ChunkDecoder, HandlerRegistry, MaterializeRequest, PassThrough};
pub use inspect::inspect;
pub use passwords::{InMemoryPasswords, NoPasswords, PasswordLookup};
pub use rar::RarHandler;
pub use segmented::SegmentedReader;
pub use sevenz::SevenZipHandler;
pub use throughput::ThroughputWindow;
pub use volumes::{archive_base_name, collect_volume_segments};
pub use zip::ZipHandler;
