//! Format polymorphism for the extraction engine
//!
//! Each supported format registers an [`ArchiveHandler`] in a
//! [`HandlerRegistry`]. The engine selects the handler once per attempt and
//! drives preflight (inspection, password check), streaming (via the handler's
//! [`ChunkDecoder`]) and materialization through it.

use super::detect::{classify_by_name, classify_by_signature};
use super::inspect::inspect_volumes;
use super::rar::RarHandler;
use super::sevenz::SevenZipHandler;
use super::zip::ZipHandler;
use crate::cancel::CancelHandle;
use crate::config::CollisionPolicy;
use crate::error::ArchiveError;
use crate::types::{ArchiveFormat, InspectionResult, VolumeSet};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Transforms raw input chunks into staged output bytes
///
/// Plugged in at the point where the engine reads input and writes the staging
/// file. The default is a byte-for-byte copy.
pub trait ChunkDecoder: Send {
    /// Decode `input` and append the result to `output`
    fn decode(&mut self, input: &[u8], output: &mut dyn Write) -> io::Result<()>;

    /// Flush any buffered state at end of input
    fn finish(&mut self, _output: &mut dyn Write) -> io::Result<()> {
        Ok(())
    }
}

/// Identity decoder
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThrough;

impl ChunkDecoder for PassThrough {
    fn decode(&mut self, input: &[u8], output: &mut dyn Write) -> io::Result<()> {
        output.write_all(input)
    }
}

/// Everything a handler needs to unpack entries once streaming is complete
#[derive(Debug)]
pub struct MaterializeRequest<'a> {
    /// Staged concatenation of every volume
    pub staged: &'a Path,
    /// Resolved volume set of the source archive
    pub volumes: &'a VolumeSet,
    /// Destination root; every entry is resolved beneath it
    pub destination: &'a Path,
    /// Password the attempt was started with
    pub password: Option<&'a str>,
    /// What to do when an entry's target already exists
    pub collision: CollisionPolicy,
    /// Attempt cancellation signal
    pub cancel: &'a CancelHandle,
}

/// Per-format operations used by the extraction engine
pub trait ArchiveHandler: Send + Sync {
    /// Format this handler serves
    fn format(&self) -> ArchiveFormat;

    /// Whether the file at `path` carries this format's signature
    fn probe(&self, path: &Path) -> bool {
        classify_by_signature(path) == Some(self.format())
    }

    /// Parse metadata of the volume set without extracting
    fn inspect(&self, volumes: &VolumeSet) -> Result<InspectionResult, ArchiveError> {
        inspect_volumes(self.format(), volumes)
    }

    /// Check `password` against an encrypted archive
    ///
    /// Returns `BadPassword` when the password is rejected.
    fn verify_password(
        &self,
        volumes: &VolumeSet,
        inspection: &InspectionResult,
        password: &str,
    ) -> Result<(), ArchiveError>;

    /// Decoder applied to input chunks while streaming
    fn decoder(&self) -> Box<dyn ChunkDecoder> {
        Box::new(PassThrough)
    }

    /// Unpack entries into the destination, returning the files written
    fn materialize(&self, request: &MaterializeRequest<'_>) -> Result<Vec<PathBuf>, ArchiveError>;
}

/// Format → handler table
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<ArchiveFormat, Arc<dyn ArchiveHandler>>,
}

impl HandlerRegistry {
    /// Registry without any handler
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Add or replace the handler for its format
    pub fn register(&mut self, handler: Arc<dyn ArchiveHandler>) {
        self.handlers.insert(handler.format(), handler);
    }

    /// Handler for `format`
    pub fn get(&self, format: ArchiveFormat) -> Option<Arc<dyn ArchiveHandler>> {
        self.handlers.get(&format).cloned()
    }

    /// Classify `path` by name, falling back to each handler's signature probe
    pub fn detect(&self, path: &Path) -> Option<ArchiveFormat> {
        if let Some(format) = classify_by_name(path)
            && self.handlers.contains_key(&format)
        {
            return Some(format);
        }
        [ArchiveFormat::Zip, ArchiveFormat::Rar, ArchiveFormat::SevenZip]
            .into_iter()
            .filter_map(|format| self.handlers.get(&format))
            .find(|handler| handler.probe(path))
            .map(|handler| handler.format())
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(ZipHandler));
        registry.register(Arc::new(RarHandler));
        registry.register(Arc::new(SevenZipHandler));
        registry
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("formats", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Resolve an entry name beneath the destination and apply the collision policy
///
/// Returns `None` (after logging) for entries that must not be written: unsafe
/// names, and existing targets under [`CollisionPolicy::Skip`].
pub(crate) fn entry_target(
    name: &str,
    destination: &Path,
    collision: CollisionPolicy,
) -> Result<Option<PathBuf>, ArchiveError> {
    let target = match crate::sanitize::resolve(name, destination) {
        Ok(target) => target,
        Err(e) => {
            tracing::warn!(entry = name, error = %e, "skipping unsafe archive entry");
            return Ok(None);
        }
    };

    if collision == CollisionPolicy::Skip && target.exists() {
        tracing::debug!(?target, "target exists, skipping entry");
        return Ok(None);
    }

    let target = crate::sanitize::apply_collision_policy(&target, collision)
        .map_err(|e| ArchiveError::Io(e.to_string()))?;
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(Some(target))
}

/// Drop an entry that failed mid-write
pub(crate) fn remove_partial_entry(target: &Path) {
    if let Err(e) = std::fs::remove_file(target)
        && e.kind() != io::ErrorKind::NotFound
    {
        tracing::warn!(?target, error = %e, "failed to remove partially unpacked entry");
    }
}
