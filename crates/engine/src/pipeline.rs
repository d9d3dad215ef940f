//! Run orchestration.
//!
//! ```text
//! validate -> discover bumpers -> pre-warm -> clip workers -> sequence
//!          -> plan names -> concat (bounded) -> finalize -> cleanup
//! ```
//!
//! Configuration problems and a missing static bumper fail the run before
//! any clip is touched. Once clips are processed, failures are contained
//! per compilation and reported in the [`RunSummary`]. A shutdown request
//! stops new work, discards partial outputs and marks the summary as
//! cancelled.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clipstitch_common::{AppConfig, DateWindow, StitchError, StitchResult};
use clipstitch_model::{
    Asset, ClipList, ClipRef, ClipState, CompilationJob, CompilationState, RunSummary, SkippedClip,
};
use clipstitch_sequencer::{Sequencer, SequencingPolicy};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::assets::discover_pool;
use crate::concat::ConcatEngine;
use crate::fetcher::{SharedFetcher, YtDlpFetcher};
use crate::finalizer::Finalizer;
use crate::layout::CacheLayout;
use crate::manifest::{JsonManifestStore, SharedManifest};
use crate::normalizer::{AssetNormalizer, NormalizerSettings};
use crate::process::ProcessRunner;
use crate::prober::{FfprobeProber, SharedProber};
use crate::profile::CanonicalProfile;
use crate::progress::{NoProgress, ProgressSink, SharedProgress};
use crate::shutdown::ShutdownController;
use crate::transcoder::{FfmpegTranscoder, SharedTranscoder};
use crate::worker::{ClipWorker, WorkerSettings};

/// Read a clip list (`clips.json`).
pub fn load_clip_list(path: &Path) -> StitchResult<ClipList> {
    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => StitchError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => StitchError::Io(e),
    })?;
    serde_json::from_str(&content).map_err(|e| {
        StitchError::configuration(format!("invalid clip list {}: {e}", path.display()))
    })
}

/// Clips at or above `min_views`, plus the ones filtered out.
pub fn filter_by_views(clips: Vec<ClipRef>, min_views: u64) -> (Vec<ClipRef>, Vec<SkippedClip>) {
    let (kept, dropped): (Vec<_>, Vec<_>) = clips.into_iter().partition(|c| c.views >= min_views);
    let skipped = dropped
        .into_iter()
        .map(|c| SkippedClip {
            reason: format!("{} views is below the minimum of {min_views}", c.views),
            id: c.id,
        })
        .collect();
    (kept, skipped)
}

/// First clip for each id; later repeats are reported as skipped.
pub fn dedupe_by_id(clips: Vec<ClipRef>) -> (Vec<ClipRef>, Vec<SkippedClip>) {
    let mut seen = HashSet::new();
    let mut skipped = Vec::new();
    let mut kept = Vec::with_capacity(clips.len());
    for clip in clips {
        if seen.insert(clip.id.clone()) {
            kept.push(clip);
        } else {
            skipped.push(SkippedClip {
                id: clip.id,
                reason: "duplicate clip id".to_string(),
            });
        }
    }
    (kept, skipped)
}

/// End-to-end compilation run.
pub struct Pipeline {
    config: AppConfig,
    shutdown: ShutdownController,
    transcoder: SharedTranscoder,
    prober: SharedProber,
    fetcher: SharedFetcher,
    manifest: Option<SharedManifest>,
    progress: SharedProgress,
    now: Option<DateTime<Utc>>,
}

impl Pipeline {
    /// Pipeline backed by `ffmpeg`, `ffprobe` and `yt-dlp`.
    pub fn new(config: AppConfig, shutdown: ShutdownController) -> Self {
        let runner = ProcessRunner::new(shutdown.clone());
        let tools = &config.tools;
        let transcoder: SharedTranscoder =
            Arc::new(FfmpegTranscoder::new(&tools.ffmpeg, runner.clone()));
        let prober: SharedProber = Arc::new(FfprobeProber::new(&tools.ffprobe, runner.clone()));
        let fetcher: SharedFetcher = Arc::new(YtDlpFetcher::new(tools, runner));
        Self {
            config,
            shutdown,
            transcoder,
            prober,
            fetcher,
            manifest: None,
            progress: Arc::new(NoProgress),
            now: None,
        }
    }

    pub fn with_transcoder(mut self, transcoder: SharedTranscoder) -> Self {
        self.transcoder = transcoder;
        self
    }

    pub fn with_prober(mut self, prober: SharedProber) -> Self {
        self.prober = prober;
        self
    }

    pub fn with_fetcher(mut self, fetcher: SharedFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Use `manifest` instead of `<cache>/_trans/_manifest.json`.
    pub fn with_manifest(mut self, manifest: SharedManifest) -> Self {
        self.manifest = Some(manifest);
        self
    }

    pub fn with_progress(mut self, progress: SharedProgress) -> Self {
        self.progress = progress;
        self
    }

    /// Fix the clock used for window resolution and output names.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn shutdown(&self) -> &ShutdownController {
        &self.shutdown
    }

    /// Run every stage for `list`.
    pub async fn run(&self, list: ClipList) -> StitchResult<RunSummary> {
        let config = &self.config;
        config.validate()?;
        let now = self.now.unwrap_or_else(Utc::now);
        let window = DateWindow::resolve(
            list.window.start.as_deref(),
            list.window.end.as_deref(),
            now,
        )?;
        let cancel = self.shutdown.token();
        let layout = CacheLayout::new(&config.paths.cache);
        let profile = CanonicalProfile::from_config(&config.encoding)?;
        let count = config.selection.compilations;

        let transitions_dir = config.transitions_dir();
        let pool = discover_pool(
            &transitions_dir,
            &config.assets,
            &config.sequencing.transition_weights,
        )?;

        let mut summary = RunSummary::default();

        // Pre-warm the bumper cache.
        let manifest = match &self.manifest {
            Some(manifest) => Arc::clone(manifest),
            None => {
                let store = JsonManifestStore::open_in(&layout.bumper_dir()).await?;
                Arc::new(store) as SharedManifest
            }
        };
        let normalizer = Arc::new(AssetNormalizer::new(
            Arc::clone(&self.transcoder),
            Arc::clone(&self.prober),
            manifest,
            Arc::clone(&self.progress),
            NormalizerSettings::from_config(config, layout.bumper_dir())?,
            cancel.clone(),
        ));
        let prepared = match normalizer
            .prepare_pool(&pool, config.behavior.max_concurrency)
            .await
        {
            Ok(prepared) => prepared,
            Err(e) if e.is_cancelled() => return Ok(cancelled_summary(summary, count)),
            Err(e) => return Err(e),
        };
        summary.dropped_assets = prepared.dropped;

        // Select clips.
        let mut rng = match config.sequencing.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let (clips, below_threshold) = filter_by_views(list.clips, config.selection.min_views);
        summary.skipped_clips.extend(below_threshold);
        let (mut clips, duplicates) = dedupe_by_id(clips);
        if !duplicates.is_empty() {
            tracing::warn!(count = duplicates.len(), "Ignoring repeated clip ids");
        }
        summary.skipped_clips.extend(duplicates);
        clips.shuffle(&mut rng);
        let wanted = count.saturating_mul(config.selection.clips_per_compilation);
        if clips.len() > wanted {
            tracing::debug!(available = clips.len(), wanted, "Truncating clip selection");
            clips.truncate(wanted);
        }

        // Process clips.
        let worker = Arc::new(ClipWorker::new(
            Arc::clone(&self.fetcher),
            Arc::clone(&self.transcoder),
            Arc::clone(&self.prober),
            Arc::clone(&self.progress),
            WorkerSettings::from_config(config)?,
            cancel.clone(),
        ));
        let jobs = match worker.process_all(clips).await {
            Ok(jobs) => jobs,
            Err(e) if e.is_cancelled() => return Ok(cancelled_summary(summary, count)),
            Err(e) => return Err(e),
        };
        let mut ready: Vec<Asset> = Vec::new();
        for job in jobs {
            match (job.state, job.output) {
                (ClipState::Ready, Some(asset)) => ready.push(asset),
                _ => summary.skipped_clips.push(SkippedClip {
                    id: job.clip.id,
                    reason: job.failure.unwrap_or_else(|| "not processed".to_string()),
                }),
            }
        }

        // Sequence and name.
        let sequencer = Sequencer::new(SequencingPolicy::from_config(config));
        let outcome = sequencer.build_sequences(&ready, &prepared.pool, count, &mut rng)?;
        summary.shortfalls = outcome.shortfalls;

        let finalizer = Arc::new(Finalizer::new(
            &config.paths.output,
            profile.ext(),
            config.behavior.overwrite_output,
        ));
        let names = finalizer.plan_names(&list.identity, &window, count, now)?;
        let mut compilations: Vec<CompilationJob> = names
            .into_iter()
            .enumerate()
            .map(|(index, name)| CompilationJob::new(index, name))
            .collect();
        for sequence in outcome.sequences {
            let index = sequence.index;
            if let Some(job) = compilations.get_mut(index) {
                job.sequenced(sequence)
                    .map_err(|e| StitchError::Other(e.into()))?;
            }
        }
        for index in outcome.empty {
            if let Some(job) = compilations.get_mut(index) {
                job.fail("no clips were assigned to this compilation");
            }
        }

        // Concatenate and finalize.
        let engine = Arc::new(ConcatEngine::new(
            Arc::clone(&self.transcoder),
            layout.clone(),
            profile,
            cancel.clone(),
        ));
        let semaphore = Arc::new(Semaphore::new(config.behavior.concat_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut finished: Vec<Option<CompilationJob>> = Vec::with_capacity(count);
        for job in compilations {
            if job.state != CompilationState::Sequenced {
                finished.push(Some(job));
                continue;
            }
            finished.push(None);
            let engine = Arc::clone(&engine);
            let finalizer = Arc::clone(&finalizer);
            let semaphore = Arc::clone(&semaphore);
            let progress = Arc::clone(&self.progress);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let permit = tokio::select! {
                    permit = semaphore.acquire_owned() => permit.ok(),
                    _ = cancel.cancelled() => None,
                };
                let mut job = job;
                if permit.is_none() {
                    job.fail("cancelled before concatenation");
                    return job;
                }
                run_compilation(&mut job, &engine, &finalizer, progress.as_ref()).await;
                job
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(job) => {
                    let index = job.index;
                    if let Some(slot) = finished.get_mut(index) {
                        *slot = Some(job);
                    }
                }
                Err(e) => tracing::error!(error = %e, "Compilation task panicked"),
            }
        }
        summary.compilations = finished
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    let mut job = CompilationJob::new(index, String::new());
                    job.fail("compilation task aborted");
                    job
                })
            })
            .collect();

        if cancel.is_cancelled() {
            summary.cancelled = true;
            return Ok(summary);
        }

        if let Err(e) = Finalizer::cleanup(&layout, config.behavior.retention).await {
            tracing::warn!(error = %e, "Cache cleanup failed");
        }

        tracing::info!(
            succeeded = summary.succeeded_count(),
            failed = summary.failed().count(),
            skipped_clips = summary.skipped_clips.len(),
            "Run finished"
        );
        Ok(summary)
    }
}

/// Summary for a run interrupted before compilations were planned.
fn cancelled_summary(mut summary: RunSummary, count: usize) -> RunSummary {
    tracing::warn!("Run cancelled");
    summary.cancelled = true;
    summary.compilations = (0..count)
        .map(|index| {
            let mut job = CompilationJob::new(index, String::new());
            job.fail("cancelled");
            job
        })
        .collect();
    summary
}

async fn run_compilation(
    job: &mut CompilationJob,
    engine: &ConcatEngine,
    finalizer: &Finalizer,
    progress: &dyn ProgressSink,
) {
    if let Err(e) = job.advance(CompilationState::Concatenating) {
        job.fail(e.to_string());
        return;
    }
    let result = match engine.run(job, progress).await {
        Ok(path) => finalizer.finalize(&path, &job.output_name).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(path) => {
            if let Err(e) = job.finalized(path) {
                job.fail(e.to_string());
            }
        }
        Err(e) => {
            if e.is_cancelled() {
                tracing::info!(compilation = job.index, "Compilation cancelled");
            } else {
                tracing::error!(compilation = job.index, error = %e, "Compilation failed");
            }
            job.fail(e.to_string());
        }
    }
}
