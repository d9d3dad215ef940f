//! Normalization manifest records.
//!
//! The manifest remembers which bumper sources were already normalized and
//! how. An entry is only trusted while the source fingerprint (size and
//! modification time) is unchanged and the entry was built with the current
//! canonical profile.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Cheap content fingerprint of a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch.
    pub mtime_ns: u128,
}

impl Fingerprint {
    /// Fingerprint the file at `path`.
    pub fn of(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        let mtime_ns = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Ok(Self {
            size: meta.len(),
            mtime_ns,
        })
    }
}

/// First eight hex digits of the SHA-256 of `value`.
///
/// Stable across runs and platforms, so it can name files in the cache.
pub fn short_digest(value: &str) -> String {
    Sha256::digest(value.as_bytes())
        .iter()
        .take(4)
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Lookup key: source path plus its current fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManifestKey {
    pub source_path: PathBuf,
    pub fingerprint: Fingerprint,
}

impl ManifestKey {
    pub fn new(source_path: impl Into<PathBuf>, fingerprint: Fingerprint) -> Self {
        Self {
            source_path: source_path.into(),
            fingerprint,
        }
    }

    /// Fingerprint `source_path` and build a key for it.
    pub fn for_file(source_path: &Path) -> std::io::Result<Self> {
        Ok(Self::new(source_path, Fingerprint::of(source_path)?))
    }

    /// Map key used by stores: the source path as a string.
    pub fn entry_name(&self) -> String {
        self.source_path.to_string_lossy().into_owned()
    }
}

/// How a bumper source was normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestRecord {
    pub fingerprint: Fingerprint,
    pub canonical_path: PathBuf,
    /// Audio track was replaced by generated silence.
    pub audio_synthesized: bool,
    /// Loudness normalization was applied.
    pub loudness_applied: bool,
    /// Canonical profile the file was encoded with.
    pub profile_id: String,
    #[serde(default)]
    pub duration_secs: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl ManifestRecord {
    /// Whether this record can be reused for `key` under `profile_id`.
    pub fn is_valid_for(&self, key: &ManifestKey, profile_id: &str) -> bool {
        self.fingerprint == key.fingerprint
            && self.profile_id == profile_id
            && self.canonical_path.is_file()
    }
}

/// On-disk manifest document (`_manifest.json`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestDocument {
    #[serde(default = "manifest_version")]
    pub version: u32,
    #[serde(default)]
    pub entries: BTreeMap<String, ManifestRecord>,
}

fn manifest_version() -> u32 {
    1
}
