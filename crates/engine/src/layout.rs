//! On-disk cache layout.
//!
//! ```text
//! <cache>/_trans/                normalized bumpers + _manifest.json
//! <cache>/clips/<clip-id>/       per-clip working files
//! <cache>/<compilation-index>/   per-compilation concat list and output
//! ```

use std::path::{Path, PathBuf};

use clipstitch_model::ClipRef;

/// Directory holding normalized bumpers; survives default cleanup.
pub const BUMPER_DIR: &str = "_trans";

/// Directory holding per-clip working directories.
pub const CLIPS_DIR: &str = "clips";

/// Paths inside one cache root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bumper_dir(&self) -> PathBuf {
        self.root.join(BUMPER_DIR)
    }

    pub fn clip_dir(&self, clip: &ClipRef) -> PathBuf {
        self.root.join(CLIPS_DIR).join(clip.dir_name())
    }

    pub fn compilation_dir(&self, index: usize) -> PathBuf {
        self.root.join(index.to_string())
    }
}

/// Temporary sibling of `final_path`: `name.ext` becomes `name.partial.ext`.
pub fn partial_path(final_path: &Path) -> PathBuf {
    let stem = final_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match final_path.extension() {
        Some(ext) => format!("{stem}.partial.{}", ext.to_string_lossy()),
        None => format!("{stem}.partial"),
    };
    final_path.with_file_name(name)
}

/// Remove a file, ignoring "not found".
pub async fn remove_file_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Remove a directory tree, ignoring "not found".
pub async fn remove_dir_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
