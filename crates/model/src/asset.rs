//! Media asset references.
//!
//! An [`Asset`] is discovered at scan time, normalized once to the
//! canonical profile, and referenced read-only afterwards. Normalization
//! never mutates an asset in place: [`Asset::normalized_as`] returns a new
//! value carrying the canonical path.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Role an asset plays inside a compilation timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Intro,
    Static,
    Transition,
    Outro,
    Clip,
}

impl AssetKind {
    /// Bumper assets share one normalization cache across runs; clips do not.
    pub fn is_bumper(self) -> bool {
        !matches!(self, AssetKind::Clip)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AssetKind::Intro => "intro",
            AssetKind::Static => "static",
            AssetKind::Transition => "transition",
            AssetKind::Outro => "outro",
            AssetKind::Clip => "clip",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A media file reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    /// Stable name: the bumper file name, or the clip id.
    pub name: String,

    pub kind: AssetKind,

    /// Where the asset was discovered.
    pub source_path: PathBuf,

    /// Absolute path of the normalized copy, once normalized.
    pub canonical_path: Option<PathBuf>,

    /// Whether the source carries an audio stream.
    pub has_audio: bool,

    /// Whether `canonical_path` holds a canonical-profile encode.
    pub normalized: bool,

    /// Probed duration of the canonical file, in seconds.
    #[serde(default)]
    pub duration_secs: Option<f64>,

    /// Relative selection weight for transitions.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

impl Asset {
    /// A freshly discovered, not yet normalized asset.
    pub fn discovered(name: impl Into<String>, kind: AssetKind, source: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            kind,
            source_path: source.as_ref().to_path_buf(),
            canonical_path: None,
            has_audio: true,
            normalized: false,
            duration_secs: None,
            weight: default_weight(),
        }
    }

    /// Set the transition weight.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Return a normalized copy pointing at `canonical`.
    pub fn normalized_as(
        &self,
        canonical: impl Into<PathBuf>,
        has_audio: bool,
        duration_secs: Option<f64>,
    ) -> Self {
        Self {
            canonical_path: Some(canonical.into()),
            has_audio,
            normalized: true,
            duration_secs,
            ..self.clone()
        }
    }

    /// Path to feed the concatenation step. Fails unless normalized.
    pub fn require_canonical(&self) -> Result<&Path, ModelError> {
        match (&self.canonical_path, self.normalized) {
            (Some(path), true) => Ok(path.as_path()),
            _ => Err(ModelError::NotNormalized {
                name: self.name.clone(),
                kind: self.kind,
            }),
        }
    }
}

/// The set of bumper assets available to the sequencer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetPool {
    /// Mandatory static bumper.
    pub static_asset: Option<Asset>,
    pub intros: Vec<Asset>,
    pub outros: Vec<Asset>,
    pub transitions: Vec<Asset>,
}

impl AssetPool {
    /// Every asset in the pool, static first.
    pub fn iter(&self) -> impl Iterator<Item = &Asset> {
        self.static_asset
            .iter()
            .chain(self.intros.iter())
            .chain(self.outros.iter())
            .chain(self.transitions.iter())
    }

    /// Whether every asset in the pool has been normalized.
    pub fn is_normalized(&self) -> bool {
        self.iter().all(|a| a.normalized)
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_as_keeps_identity() {
        let asset = Asset::discovered("static.mp4", AssetKind::Static, "/t/static.mp4");
        assert!(asset.require_canonical().is_err());

        let normalized = asset.normalized_as("/cache/_trans/static.mp4", false, Some(1.5));
        assert_eq!(normalized.name, "static.mp4");
        assert_eq!(normalized.source_path, PathBuf::from("/t/static.mp4"));
        assert!(normalized.normalized);
        assert!(!normalized.has_audio);
        assert_eq!(
            normalized.require_canonical().unwrap(),
            Path::new("/cache/_trans/static.mp4")
        );
        assert!(!asset.normalized);
    }

    #[test]
    fn test_pool_iteration_and_normalized_check() {
        let mut pool = AssetPool {
            static_asset: Some(Asset::discovered("s", AssetKind::Static, "s.mp4")),
            transitions: vec![Asset::discovered("t", AssetKind::Transition, "t.mp4")],
            ..Default::default()
        };
        assert_eq!(pool.len(), 2);
        assert!(!pool.is_normalized());

        pool.static_asset = pool
            .static_asset
            .map(|a| a.normalized_as("/c/s.mp4", true, None));
        pool.transitions = pool
            .transitions
            .iter()
            .map(|a| a.normalized_as("/c/t.mp4", true, None))
            .collect();
        assert!(pool.is_normalized());
    }

    #[test]
    fn test_kind_serde_names() {
        let json = serde_json::to_string(&AssetKind::Transition).unwrap();
        assert_eq!(json, "\"transition\"");
        assert!(AssetKind::Static.is_bumper());
        assert!(!AssetKind::Clip.is_bumper());
    }
}
