//! Per-clip processing.
//!
//! A [`ClipWorker`] takes one [`ClipRef`] from download to a normalized
//! clip asset:
//!
//! 1. Download into `<cache>/clips/<id>/source.mp4`, retried with backoff.
//! 2. Optionally composite the creator overlay (avatar and caption).
//! 3. Re-encode to the canonical profile.
//!
//! Every file a job writes lives in its own directory, so a failed or
//! cancelled job can clean up after itself without touching other jobs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clipstitch_common::{AppConfig, StitchError, StitchResult};
use clipstitch_model::{Asset, AssetKind, ClipJob, ClipRef, ClipState};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::fetcher::SharedFetcher;
use crate::layout::{partial_path, remove_file_if_exists, CacheLayout};
use crate::prober::SharedProber;
use crate::profile::{AudioMode, CanonicalProfile};
use crate::progress::{ProgressUpdate, SharedProgress, Stage};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::transcoder::{SharedTranscoder, TranscodeRequest};

const SOURCE_FILE: &str = "source.mp4";
const AVATAR_FILE: &str = "avatar.png";
const OVERLAY_FILE: &str = "overlay.mp4";

/// Overlay is shown between these timestamps, in seconds.
const OVERLAY_WINDOW: (u32, u32) = (3, 10);

/// Clip worker parameters.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub layout: CacheLayout,
    pub profile: CanonicalProfile,
    pub retry: RetryPolicy,
    pub max_concurrency: usize,
    pub enable_overlay: bool,
    pub fontfile: PathBuf,
    /// Re-download even when a cached source exists.
    pub rebuild: bool,
    /// Skip failed clips instead of aborting the run.
    pub skip_bad_clip: bool,
}

impl WorkerSettings {
    pub fn from_config(config: &AppConfig) -> StitchResult<Self> {
        let behavior = &config.behavior;
        Ok(Self {
            layout: CacheLayout::new(&config.paths.cache),
            profile: CanonicalProfile::from_config(&config.encoding)?,
            retry: RetryPolicy::from_config(behavior),
            max_concurrency: behavior.max_concurrency.max(1),
            enable_overlay: behavior.enable_overlay,
            fontfile: config.paths.fontfile.clone(),
            rebuild: behavior.rebuild,
            skip_bad_clip: behavior.skip_bad_clip,
        })
    }
}

/// Downloads, decorates and normalizes clips.
pub struct ClipWorker {
    fetcher: SharedFetcher,
    transcoder: SharedTranscoder,
    prober: SharedProber,
    progress: SharedProgress,
    settings: WorkerSettings,
    cancel: CancellationToken,
}

impl ClipWorker {
    pub fn new(
        fetcher: SharedFetcher,
        transcoder: SharedTranscoder,
        prober: SharedProber,
        progress: SharedProgress,
        settings: WorkerSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            fetcher,
            transcoder,
            prober,
            progress,
            settings,
            cancel,
        }
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Process one clip to a terminal state.
    pub async fn process(&self, clip: ClipRef, position: usize) -> ClipJob {
        self.process_with(clip, position, &self.cancel).await
    }

    /// Process every clip with bounded concurrency, keeping input order.
    ///
    /// With `skip_bad_clip` unset, the first failure cancels the remaining
    /// jobs and is returned as `AssetUnavailable`.
    pub async fn process_all(self: &Arc<Self>, clips: Vec<ClipRef>) -> StitchResult<Vec<ClipJob>> {
        let pool_cancel = self.cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency));
        let total = clips.len();
        tracing::info!(
            clips = total,
            workers = self.settings.max_concurrency,
            "Processing clips"
        );

        let mut tasks = JoinSet::new();
        for (position, clip) in clips.iter().cloned().enumerate() {
            let this = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let token = pool_cancel.clone();
            tasks.spawn(async move {
                let permit = tokio::select! {
                    permit = semaphore.acquire_owned() => permit.ok(),
                    _ = token.cancelled() => None,
                };
                let job = match permit {
                    Some(_permit) => this.process_with(clip, position, &token).await,
                    None => {
                        let work_dir = this.settings.layout.clip_dir(&clip);
                        let mut job = ClipJob::new(clip, position, work_dir);
                        job.cancel("shutdown before start");
                        job
                    }
                };
                (position, job)
            });
        }

        let mut slots: Vec<Option<ClipJob>> = (0..total).map(|_| None).collect();
        let mut abort: Option<StitchError> = None;
        while let Some(joined) = tasks.join_next().await {
            let (position, job) = match joined {
                Ok(done) => done,
                Err(e) => {
                    tracing::error!(error = %e, "Clip task panicked");
                    continue;
                }
            };
            if job.state == ClipState::Failed && !self.settings.skip_bad_clip && abort.is_none() {
                let reason = job.failure.clone().unwrap_or_default();
                abort = Some(StitchError::unavailable(job.clip.id.clone(), reason));
                pool_cancel.cancel();
            }
            slots[position] = Some(job);
        }

        if let Some(e) = abort {
            return Err(e);
        }
        if self.cancel.is_cancelled() {
            return Err(StitchError::cancelled("clip processing"));
        }

        let jobs: Vec<ClipJob> = clips
            .into_iter()
            .zip(slots)
            .enumerate()
            .map(|(position, (clip, slot))| {
                slot.unwrap_or_else(|| {
                    let work_dir = self.settings.layout.clip_dir(&clip);
                    let mut job = ClipJob::new(clip, position, work_dir);
                    job.fail("clip task aborted");
                    job
                })
            })
            .collect();
        let ready = jobs.iter().filter(|j| j.state == ClipState::Ready).count();
        tracing::info!(ready, failed = total - ready, "Clip processing finished");
        Ok(jobs)
    }

    async fn process_with(
        &self,
        clip: ClipRef,
        position: usize,
        cancel: &CancellationToken,
    ) -> ClipJob {
        let work_dir = self.settings.layout.clip_dir(&clip);
        let mut job = ClipJob::new(clip, position, &work_dir);

        match self.run_steps(&mut job, cancel).await {
            Ok(()) => {
                self.progress
                    .report(ProgressUpdate::done(job.clip.id.clone(), Stage::Normalize));
            }
            Err(e) => {
                if let Err(io) = remove_partials(&work_dir).await {
                    tracing::warn!(clip = %job.clip.id, error = %io, "Failed to remove partial files");
                }
                if e.is_cancelled() {
                    tracing::info!(clip = %job.clip.id, "Clip cancelled");
                    job.cancel(e.to_string());
                } else {
                    tracing::warn!(clip = %job.clip.id, error = %e, "Clip failed");
                    job.fail(e.to_string());
                }
            }
        }
        job
    }

    async fn run_steps(&self, job: &mut ClipJob, cancel: &CancellationToken) -> StitchResult<()> {
        let work_dir = job.work_dir.clone();
        tokio::fs::create_dir_all(&work_dir).await?;
        let id = job.clip.id.clone();

        job.advance(ClipState::Downloading).map_err(model_error)?;
        let source = work_dir.join(SOURCE_FILE);
        job.attempts = self.download(&job.clip, &source, cancel).await?;
        job.advance(ClipState::Downloaded).map_err(model_error)?;

        let expected = self.prober.probe_duration(&source).await.ok();

        let mut input = source.clone();
        if let Some(avatar) = self.prepare_overlay(&job.clip, &work_dir, cancel).await? {
            job.advance(ClipState::Overlaying).map_err(model_error)?;
            let dst = work_dir.join(OVERLAY_FILE);
            let request = self.overlay_request(&job.clip, &source, &avatar, &partial_path(&dst), expected);
            self.encode_with_retry(&id, request, &dst, cancel).await?;
            input = dst;
        }

        job.advance(ClipState::Normalizing).map_err(model_error)?;
        let has_audio = match self.prober.probe_has_audio(&input).await {
            Ok(has) => has,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(_) => true,
        };
        let mode = if has_audio {
            AudioMode::Passthrough
        } else {
            AudioMode::Silent
        };
        let dst = work_dir.join(format!(
            "{}.{}",
            job.clip.dir_name(),
            self.settings.profile.ext()
        ));
        let request = self.settings.profile.normalize_request(
            &id,
            Stage::Normalize,
            &input,
            &partial_path(&dst),
            &mode,
            expected,
        );
        self.encode_with_retry(&id, request, &dst, cancel).await?;

        let duration = self.prober.probe_duration(&dst).await.ok().or(expected);
        let asset = Asset::discovered(id, AssetKind::Clip, &source).normalized_as(dst, true, duration);
        job.complete(asset).map_err(model_error)?;
        Ok(())
    }

    /// Download `clip` to `dest` unless a cached copy may be reused.
    /// Returns the number of attempts used.
    async fn download(
        &self,
        clip: &ClipRef,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> StitchResult<u32> {
        if !self.settings.rebuild && dest.is_file() {
            tracing::debug!(clip = %clip.id, "Reusing cached download");
            return Ok(0);
        }
        self.progress
            .report(ProgressUpdate::stage(clip.id.clone(), Stage::Download));

        let partial = partial_path(dest);
        let mut used = 0;
        retry_with_backoff(&self.settings.retry, cancel, &clip.id, |attempt| {
            used = attempt;
            let partial = partial.clone();
            async move {
                remove_file_if_exists(&partial).await?;
                tracing::info!(clip = %clip.id, attempt, "Downloading clip");
                self.fetcher.fetch(clip, &partial, cancel).await
            }
        })
        .await?;
        tokio::fs::rename(&partial, dest).await?;
        Ok(used)
    }

    /// Fetch the avatar if the overlay applies to this clip. `None` means
    /// the clip is processed without an overlay.
    async fn prepare_overlay(
        &self,
        clip: &ClipRef,
        work_dir: &Path,
        cancel: &CancellationToken,
    ) -> StitchResult<Option<PathBuf>> {
        if !self.settings.enable_overlay {
            return Ok(None);
        }
        let Some(url) = clip.avatar_url.as_deref().filter(|u| !u.is_empty()) else {
            return Ok(None);
        };
        let avatar = work_dir.join(AVATAR_FILE);
        if avatar.is_file() && !self.settings.rebuild {
            return Ok(Some(avatar));
        }
        match self.fetcher.fetch_avatar(url, &avatar, cancel).await {
            Ok(()) => Ok(Some(avatar)),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                tracing::warn!(clip = %clip.id, error = %e, "Avatar unavailable; skipping overlay");
                remove_file_if_exists(&avatar).await?;
                Ok(None)
            }
        }
    }

    fn overlay_request(
        &self,
        clip: &ClipRef,
        source: &Path,
        avatar: &Path,
        output: &Path,
        expected: Option<f64>,
    ) -> TranscodeRequest {
        let graph = overlay_filter(&clip.author, &self.settings.fontfile);
        TranscodeRequest::new(clip.id.clone(), Stage::Overlay, output)
            .input(source)
            .input(avatar)
            .filter_complex(graph)
            .map("[overlay]")
            .map("0:a?")
            .output_args(self.settings.profile.output_args())
            .expected_duration(expected)
    }

    /// Run `request` (which writes the partial sibling of `dst`) with
    /// retries, then move the result into place.
    async fn encode_with_retry(
        &self,
        id: &str,
        request: TranscodeRequest,
        dst: &Path,
        cancel: &CancellationToken,
    ) -> StitchResult<()> {
        let partial = partial_path(dst);
        retry_with_backoff(&self.settings.retry, cancel, id, |_| {
            let request = &request;
            let partial = &partial;
            async move {
                remove_file_if_exists(partial).await?;
                self.transcoder
                    .transcode(request, self.progress.as_ref(), cancel)
                    .await
            }
        })
        .await?;
        tokio::fs::rename(&partial, dst).await?;
        Ok(())
    }
}

impl std::fmt::Debug for ClipWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClipWorker")
            .field("transcoder", &self.transcoder.name())
            .field("settings", &self.settings)
            .finish()
    }
}

fn model_error(e: clipstitch_model::ModelError) -> StitchError {
    StitchError::Other(e.into())
}

/// Keep letters, digits and spaces only.
pub fn caption_text(author: &str) -> String {
    author
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Escape a value for a single-quoted filter option.
fn escape_filter_value(value: &str) -> String {
    value.replace('\\', "/").replace('\'', "\\'").replace(':', "\\:")
}

/// Filter graph drawing the caption box, the "clip by" caption and the
/// avatar onto input 0, labelled `[overlay]`.
pub fn overlay_filter(author: &str, fontfile: &Path) -> String {
    let (from, to) = OVERLAY_WINDOW;
    let enable = format!("enable='between(t,{from},{to})'");
    let font = escape_filter_value(&fontfile.to_string_lossy());
    let author = escape_filter_value(&caption_text(author));
    format!(
        "[0:v]drawbox={enable}:x=0:y=(ih)-238:h=157:w=1000:color=black@0.7:t=fill,\
         drawtext={enable}:x=198:y=(h)-190:fontfile='{font}':fontsize=28:fontcolor=white@0.4:text='clip by',\
         drawtext={enable}:x=198:y=(h)-160:fontfile='{font}':fontsize=48:fontcolor=white@0.9:text='{author}'[bg];\
         [bg][1:v]overlay={enable}:x=50:y=H-223[overlay]"
    )
}

/// Remove `*.partial*` files left in `dir` by an interrupted step.
pub async fn remove_partials(dir: &Path) -> std::io::Result<()> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name().to_string_lossy().contains(".partial") {
            remove_file_if_exists(&entry.path()).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caption_text_strips_symbols() {
        assert_eq!(caption_text("Zoë's_Clips!"), "ZosClips");
        assert_eq!(caption_text("  the streamer 42 "), "the streamer 42");
    }

    #[test]
    fn test_overlay_filter_layout() {
        let graph = overlay_filter("Some One", Path::new("/fonts/Roboto Medium.ttf"));
        assert!(graph.starts_with("[0:v]drawbox=enable='between(t,3,10)'"));
        assert!(graph.contains("y=(ih)-238:h=157:w=1000:color=black@0.7"));
        assert!(graph.contains("text='clip by'"));
        assert!(graph.contains("fontsize=48:fontcolor=white@0.9:text='Some One'"));
        assert!(graph.contains("fontfile='/fonts/Roboto Medium.ttf'"));
        assert!(graph.ends_with("overlay=enable='between(t,3,10)':x=50:y=H-223[overlay]"));
    }

    #[test]
    fn test_windows_font_path_is_escaped() {
        let graph = overlay_filter("a", Path::new("C:\\Fonts\\x.ttf"));
        assert!(graph.contains("fontfile='C\\:/Fonts/x.ttf'"));
    }

    #[tokio::test]
    async fn test_remove_partials_keeps_finished_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("source.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("c1.partial.mp4"), b"x").unwrap();
        remove_partials(dir.path()).await.unwrap();
        assert!(dir.path().join("source.mp4").exists());
        assert!(!dir.path().join("c1.partial.mp4").exists());
        remove_partials(&dir.path().join("missing")).await.unwrap();
    }
}
