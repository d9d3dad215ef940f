//! Bumper normalization with a durable cache.
//!
//! Intros, outros, transitions and the static bumper are re-encoded to the
//! canonical profile once and reused across runs. A manifest entry is only
//! written after the canonical file has been renamed into place, and
//! concurrent requests for the same source wait on a per-source lock and
//! then re-check the manifest instead of encoding twice.
//!
//! When an encode fails the audio handling degrades step by step: the
//! loudness pass is dropped first, then the audio is replaced with
//! generated silence. The whole ladder is retried with backoff.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use clipstitch_common::{AppConfig, StitchError, StitchResult};
use clipstitch_model::{
    short_digest, Asset, AssetKind, AssetPool, ManifestKey, ManifestRecord, SkippedClip,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::layout::{partial_path, remove_file_if_exists};
use crate::manifest::SharedManifest;
use crate::profile::{AudioMode, CanonicalProfile};
use crate::progress::{SharedProgress, Stage};
use crate::prober::SharedProber;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::transcoder::SharedTranscoder;

/// Which bumper kinds get their audio replaced by silence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SilencePolicy {
    /// Silence every bumper regardless of kind.
    pub all_bumpers: bool,
    pub static_asset: bool,
    pub transitions: bool,
    pub intro_outro: bool,
}

impl SilencePolicy {
    pub fn silences(&self, kind: AssetKind) -> bool {
        if self.all_bumpers && kind.is_bumper() {
            return true;
        }
        match kind {
            AssetKind::Static => self.static_asset,
            AssetKind::Transition => self.transitions,
            AssetKind::Intro | AssetKind::Outro => self.intro_outro,
            AssetKind::Clip => false,
        }
    }
}

/// Normalizer parameters.
#[derive(Debug, Clone)]
pub struct NormalizerSettings {
    /// Where canonical bumpers are written.
    pub cache_dir: PathBuf,
    pub profile: CanonicalProfile,
    /// Loudness filter, or `None` to keep source levels.
    pub loudnorm: Option<String>,
    pub silence: SilencePolicy,
    /// Ignore manifest hits once per source in this run.
    pub force_rebuild: bool,
    pub retry: RetryPolicy,
}

impl NormalizerSettings {
    pub fn from_config(config: &AppConfig, cache_dir: impl Into<PathBuf>) -> StitchResult<Self> {
        let audio = &config.audio;
        Ok(Self {
            cache_dir: cache_dir.into(),
            profile: CanonicalProfile::from_config(&config.encoding)?,
            loudnorm: audio
                .normalize_transitions
                .then(|| audio.loudnorm_filter.clone())
                .filter(|f| !f.trim().is_empty()),
            silence: SilencePolicy {
                all_bumpers: audio.silence_nonclip_asset_audio,
                static_asset: audio.silence_static,
                transitions: audio.silence_transitions,
                intro_outro: audio.silence_intro_outro,
            },
            force_rebuild: config.behavior.transitions_rebuild,
            retry: RetryPolicy::from_config(&config.behavior),
        })
    }
}

/// Usable pool after pre-warming, plus what had to be dropped.
#[derive(Debug, Clone, Default)]
pub struct PreparedPool {
    pub pool: AssetPool,
    pub dropped: Vec<SkippedClip>,
}

/// Converts bumper assets to the canonical profile, once.
pub struct AssetNormalizer {
    transcoder: SharedTranscoder,
    prober: SharedProber,
    manifest: SharedManifest,
    progress: SharedProgress,
    settings: NormalizerSettings,
    cancel: CancellationToken,
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
    rebuilt: Mutex<HashSet<PathBuf>>,
}

impl AssetNormalizer {
    pub fn new(
        transcoder: SharedTranscoder,
        prober: SharedProber,
        manifest: SharedManifest,
        progress: SharedProgress,
        settings: NormalizerSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transcoder,
            prober,
            manifest,
            progress,
            settings,
            cancel,
            locks: Mutex::new(HashMap::new()),
            rebuilt: Mutex::new(HashSet::new()),
        }
    }

    pub fn settings(&self) -> &NormalizerSettings {
        &self.settings
    }

    /// Return a normalized copy of `asset`, encoding only on a cache miss.
    pub async fn normalize(&self, asset: &Asset) -> StitchResult<Asset> {
        if asset.kind == AssetKind::Clip {
            return Err(StitchError::Other(anyhow::anyhow!(
                "clip {} is normalized by the clip worker, not the bumper cache",
                asset.name
            )));
        }
        if self.cancel.is_cancelled() {
            return Err(StitchError::cancelled(format!("normalizing {}", asset.name)));
        }

        let key = ManifestKey::for_file(&asset.source_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StitchError::FileNotFound {
                path: asset.source_path.clone(),
            },
            _ => StitchError::Io(e),
        })?;

        if !self.must_rebuild(&key.source_path) {
            if let Some(hit) = self.lookup(asset, &key).await? {
                tracing::debug!(asset = %asset.name, "Normalized asset cache hit");
                return Ok(hit);
            }
        }

        let lock = self.lock_for(&key.source_path);
        let _held = tokio::select! {
            guard = lock.lock() => guard,
            _ = self.cancel.cancelled() => {
                return Err(StitchError::cancelled(format!("normalizing {}", asset.name)));
            }
        };

        // Another caller may have finished while we waited.
        if !self.must_rebuild(&key.source_path) {
            if let Some(hit) = self.lookup(asset, &key).await? {
                return Ok(hit);
            }
        }

        let normalized = self.build(asset, &key).await?;
        if self.settings.force_rebuild {
            self.rebuilt
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key.source_path.clone());
        }
        Ok(normalized)
    }

    /// Normalize the whole pool ahead of clip processing.
    ///
    /// The static asset is mandatory: any failure there is returned. Other
    /// assets are normalized concurrently (at most `concurrency` at once);
    /// those that fail are dropped from the pool and reported.
    pub async fn prepare_pool(
        self: &Arc<Self>,
        pool: &AssetPool,
        concurrency: usize,
    ) -> StitchResult<PreparedPool> {
        let static_source = pool.static_asset.as_ref().ok_or_else(|| {
            StitchError::configuration("static asset is missing from the asset pool")
        })?;
        let static_asset = self.normalize(static_source).await?;

        let others: Vec<Asset> = pool
            .intros
            .iter()
            .chain(&pool.outros)
            .chain(&pool.transitions)
            .cloned()
            .collect();

        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for (index, asset) in others.iter().cloned().enumerate() {
            let this = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let result = this.normalize(&asset).await;
                (index, result)
            });
        }

        let mut results: Vec<Option<StitchResult<Asset>>> = others.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => tracing::error!(error = %e, "Normalization task panicked"),
            }
        }

        let mut prepared = PreparedPool {
            pool: AssetPool {
                static_asset: Some(static_asset),
                ..Default::default()
            },
            dropped: Vec::new(),
        };
        for (source, result) in others.iter().zip(results) {
            match result {
                Some(Ok(asset)) => match asset.kind {
                    AssetKind::Intro => prepared.pool.intros.push(asset),
                    AssetKind::Outro => prepared.pool.outros.push(asset),
                    _ => prepared.pool.transitions.push(asset),
                },
                Some(Err(e)) if e.is_cancelled() => return Err(e),
                Some(Err(e)) => {
                    tracing::warn!(asset = %source.name, kind = %source.kind, error = %e, "Dropping asset");
                    prepared.dropped.push(SkippedClip {
                        id: source.name.clone(),
                        reason: e.to_string(),
                    });
                }
                None => prepared.dropped.push(SkippedClip {
                    id: source.name.clone(),
                    reason: "normalization task aborted".to_string(),
                }),
            }
        }

        tracing::info!(
            ready = prepared.pool.len(),
            dropped = prepared.dropped.len(),
            "Asset pool prepared"
        );
        Ok(prepared)
    }

    fn must_rebuild(&self, source: &Path) -> bool {
        self.settings.force_rebuild
            && !self
                .rebuilt
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(source)
    }

    fn lock_for(&self, source: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(source.to_path_buf()).or_default())
    }

    /// `<stem>-<digest of source path>.<ext>`, unique per source file.
    fn canonical_path(&self, asset: &Asset) -> PathBuf {
        let stem = Path::new(&asset.name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| asset.name.clone());
        let digest = short_digest(&asset.source_path.to_string_lossy());
        self.settings
            .cache_dir
            .join(format!("{stem}-{digest}.{}", self.settings.profile.ext()))
    }

    async fn lookup(&self, asset: &Asset, key: &ManifestKey) -> StitchResult<Option<Asset>> {
        let Some(record) = self.manifest.get(key).await? else {
            return Ok(None);
        };
        if !record.is_valid_for(key, &self.settings.profile.profile_id()) {
            tracing::debug!(asset = %asset.name, "Manifest entry is stale");
            return Ok(None);
        }
        if self.settings.silence.silences(asset.kind) && !record.audio_synthesized {
            tracing::debug!(asset = %asset.name, "Silence policy changed; rebuilding");
            return Ok(None);
        }
        Ok(Some(asset.normalized_as(
            record.canonical_path,
            !record.audio_synthesized,
            record.duration_secs,
        )))
    }

    fn audio_ladder(&self, kind: AssetKind, has_audio: bool) -> Vec<AudioMode> {
        if !has_audio || self.settings.silence.silences(kind) {
            return vec![AudioMode::Silent];
        }
        let mut ladder = Vec::with_capacity(3);
        if let Some(filter) = &self.settings.loudnorm {
            ladder.push(AudioMode::Loudnorm(filter.clone()));
        }
        ladder.push(AudioMode::Passthrough);
        ladder.push(AudioMode::Silent);
        ladder
    }

    async fn build(&self, asset: &Asset, key: &ManifestKey) -> StitchResult<Asset> {
        let source = &asset.source_path;
        let has_audio = match self.prober.probe_has_audio(source).await {
            Ok(has) => has,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                tracing::warn!(asset = %asset.name, error = %e, "Audio probe failed; assuming audio");
                true
            }
        };
        let expected = self.prober.probe_duration(source).await.ok();

        tokio::fs::create_dir_all(&self.settings.cache_dir).await?;
        let dst = self.canonical_path(asset);
        let ladder = self.audio_ladder(asset.kind, has_audio);
        tracing::info!(asset = %asset.name, kind = %asset.kind, "Normalizing asset");

        let mode = retry_with_backoff(&self.settings.retry, &self.cancel, &asset.name, |attempt| {
            self.run_ladder(asset, &ladder, &dst, expected, attempt)
        })
        .await
        .map_err(|e| match e {
            e if e.is_cancelled() => e,
            e => StitchError::unavailable(asset.name.clone(), e.to_string()),
        })?;

        let duration = match self.prober.probe_duration(&dst).await {
            Ok(d) => Some(d),
            Err(_) => expected,
        };

        let record = ManifestRecord {
            fingerprint: key.fingerprint,
            canonical_path: dst.clone(),
            audio_synthesized: mode.is_silent(),
            loudness_applied: mode.applies_loudness(),
            profile_id: self.settings.profile.profile_id(),
            duration_secs: duration,
            created_at: Utc::now(),
        };
        self.manifest.put(key, record).await?;

        Ok(asset.normalized_as(dst, !mode.is_silent(), duration))
    }

    async fn run_ladder(
        &self,
        asset: &Asset,
        ladder: &[AudioMode],
        dst: &Path,
        expected: Option<f64>,
        attempt: u32,
    ) -> StitchResult<AudioMode> {
        let mut last_error = None;
        for mode in ladder {
            if self.cancel.is_cancelled() {
                return Err(StitchError::cancelled(format!("normalizing {}", asset.name)));
            }
            match self.encode_once(asset, mode, dst, expected).await {
                Ok(()) => return Ok(mode.clone()),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        asset = %asset.name,
                        attempt,
                        audio = ?mode,
                        error = %e,
                        "Normalization pass failed"
                    );
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| StitchError::transcode("no audio strategy to try")))
    }

    async fn encode_once(
        &self,
        asset: &Asset,
        mode: &AudioMode,
        dst: &Path,
        expected: Option<f64>,
    ) -> StitchResult<()> {
        let partial = partial_path(dst);
        remove_file_if_exists(&partial).await?;

        let request = self.settings.profile.normalize_request(
            &asset.name,
            Stage::Prewarm,
            &asset.source_path,
            &partial,
            mode,
            expected,
        );
        let result = self
            .transcoder
            .transcode(&request, self.progress.as_ref(), &self.cancel)
            .await;

        match result {
            Ok(()) => {
                tokio::fs::rename(&partial, dst).await?;
                Ok(())
            }
            Err(e) => {
                remove_file_if_exists(&partial).await?;
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for AssetNormalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetNormalizer")
            .field("transcoder", &self.transcoder.name())
            .field("settings", &self.settings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_policy() {
        let policy = SilencePolicy {
            transitions: true,
            ..Default::default()
        };
        assert!(policy.silences(AssetKind::Transition));
        assert!(!policy.silences(AssetKind::Static));

        let all = SilencePolicy {
            all_bumpers: true,
            ..Default::default()
        };
        assert!(all.silences(AssetKind::Intro));
        assert!(!all.silences(AssetKind::Clip));
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = AppConfig::default();
        config.audio.normalize_transitions = false;
        config.behavior.transitions_rebuild = true;
        let settings = NormalizerSettings::from_config(&config, "/cache/_trans").unwrap();
        assert_eq!(settings.loudnorm, None);
        assert!(settings.force_rebuild);
        assert_eq!(settings.retry.attempts, 3);
    }
}
