//! Output naming, placement and cache cleanup.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clipstitch_common::{DateWindow, RetentionPolicy, StitchError, StitchResult};

use crate::layout::{partial_path, remove_dir_if_exists, remove_file_if_exists, CacheLayout, BUMPER_DIR};

const MAX_IDENTITY_LEN: usize = 80;

/// Lowercase `identity` and replace anything outside `[a-z0-9._-]`.
pub fn sanitize_identity(identity: &str) -> String {
    let cleaned: String = identity
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_IDENTITY_LEN)
        .collect();
    if cleaned.is_empty() {
        "clips".to_string()
    } else {
        cleaned
    }
}

/// Output stem without extension: `<identity>_<window>_compilation` for a
/// single compilation, `<identity>_<window>_part<n>` for part `n` of several.
pub fn base_stem(
    identity: &str,
    window: &DateWindow,
    now: DateTime<Utc>,
    part: Option<usize>,
) -> String {
    let tail = match part {
        Some(n) => format!("part{n}"),
        None => "compilation".to_string(),
    };
    format!("{}_{}_{tail}", sanitize_identity(identity), window.label(now))
}

/// Places finished compilations in the output directory.
#[derive(Debug, Clone)]
pub struct Finalizer {
    output_dir: PathBuf,
    ext: String,
    overwrite: bool,
}

impl Finalizer {
    pub fn new(output_dir: impl Into<PathBuf>, ext: impl Into<String>, overwrite: bool) -> Self {
        Self {
            output_dir: output_dir.into(),
            ext: ext.into().trim_start_matches('.').to_string(),
            overwrite,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// One output file name per compilation.
    ///
    /// Each compilation has its own stem (see [`base_stem`]). Names never
    /// collide with each other. Unless overwriting, they also avoid files
    /// already in the output directory: the first free name of `stem.ext`,
    /// `stem_1.ext`, `stem_2.ext`, ... is taken. Comparison ignores case.
    pub fn plan_names(
        &self,
        identity: &str,
        window: &DateWindow,
        count: usize,
        now: DateTime<Utc>,
    ) -> StitchResult<Vec<String>> {
        let mut taken: HashSet<String> = if self.overwrite {
            HashSet::new()
        } else {
            self.existing_names()?
        };

        let mut names = Vec::with_capacity(count);
        for index in 0..count {
            let part = (count > 1).then_some(index + 1);
            let stem = base_stem(identity, window, now, part);
            let name = (0usize..)
                .map(|k| match k {
                    0 => format!("{stem}.{}", self.ext),
                    k => format!("{stem}_{k}.{}", self.ext),
                })
                .find(|candidate| !taken.contains(&candidate.to_lowercase()))
                .unwrap_or_else(|| format!("{stem}.{}", self.ext));
            taken.insert(name.to_lowercase());
            names.push(name);
        }
        tracing::debug!(?names, "Planned output names");
        Ok(names)
    }

    fn existing_names(&self) -> StitchResult<HashSet<String>> {
        let entries = match std::fs::read_dir(&self.output_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(e) => {
                return Err(StitchError::finalization(
                    &self.output_dir,
                    format!("cannot list output directory: {e}"),
                ))
            }
        };
        Ok(entries
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().to_lowercase())
            .collect())
    }

    /// Move `result` to `<output>/<name>`.
    ///
    /// Uses a rename, falling back to a copy into a temporary file next to
    /// the destination followed by a rename when the two paths are on
    /// different filesystems.
    pub async fn finalize(&self, result: &Path, name: &str) -> StitchResult<PathBuf> {
        let dest = self.output_dir.join(name);
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| StitchError::finalization(&self.output_dir, e.to_string()))?;
        if !self.overwrite && dest.exists() {
            return Err(StitchError::finalization(&dest, "destination already exists"));
        }

        if let Err(e) = tokio::fs::rename(result, &dest).await {
            tracing::debug!(error = %e, "Rename failed; copying across filesystems");
            let tmp = partial_path(&dest);
            let copied = async {
                tokio::fs::copy(result, &tmp).await?;
                tokio::fs::rename(&tmp, &dest).await?;
                remove_file_if_exists(result).await
            }
            .await;
            if let Err(e) = copied {
                let _ = remove_file_if_exists(&tmp).await;
                return Err(StitchError::finalization(&dest, e.to_string()));
            }
        }

        tracing::info!(output = %dest.display(), "Compilation finalized");
        Ok(dest)
    }

    /// Apply `policy` to the cache. Returns the number of removed entries.
    pub async fn cleanup(layout: &CacheLayout, policy: RetentionPolicy) -> StitchResult<usize> {
        if policy == RetentionPolicy::KeepAll {
            return Ok(0);
        }
        let mut entries = match tokio::fs::read_dir(layout.root()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            if policy == RetentionPolicy::Default && entry.file_name() == BUMPER_DIR {
                continue;
            }
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                remove_dir_if_exists(&path).await?;
            } else {
                remove_file_if_exists(&path).await?;
            }
            removed += 1;
        }
        tracing::info!(cache = %layout.root().display(), ?policy, removed, "Cache cleaned");
        Ok(removed)
    }
}
