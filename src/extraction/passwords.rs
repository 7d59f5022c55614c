use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

/// Opaque key→secret lookup for archive passwords
///
/// The queue asks for a password keyed by the archive's source path when a
/// task is started without one, and remembers the password of every
/// successful encrypted extraction. Secure storage is left to implementors.
pub trait PasswordLookup: Send + Sync {
    /// Password stored for the archive at `source`, if any
    fn password_for(&self, source: &Path) -> Option<String>;

    /// Store a password that successfully opened the archive at `source`
    fn remember(&self, _source: &Path, _password: &str) {}
}

/// Lookup that never knows a password
#[derive(Debug, Default)]
pub struct NoPasswords;

impl PasswordLookup for NoPasswords {
    fn password_for(&self, _source: &Path) -> Option<String> {
        None
    }
}

/// Process-local password cache
#[derive(Debug, Default)]
pub struct InMemoryPasswords {
    passwords: RwLock<HashMap<PathBuf, String>>,
}

impl InMemoryPasswords {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed a password for an archive
    pub fn insert(&self, source: impl Into<PathBuf>, password: impl Into<String>) {
        if let Ok(mut map) = self.passwords.write() {
            map.insert(source.into(), password.into());
        }
    }

    /// Number of stored passwords
    pub fn len(&self) -> usize {
        self.passwords.read().map(|map| map.len()).unwrap_or(0)
    }

    /// Whether no password is stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PasswordLookup for InMemoryPasswords {
    fn password_for(&self, source: &Path) -> Option<String> {
        self.passwords
            .read()
            .ok()
            .and_then(|map| map.get(source).cloned())
    }

    fn remember(&self, source: &Path, password: &str) {
        if let Ok(mut map) = self.passwords.write() {
            map.insert(source.to_path_buf(), password.to_string());
            debug!(?source, "cached correct password");
        }
    }
}
