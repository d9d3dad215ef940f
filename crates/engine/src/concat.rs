//! Compilation concatenation.
//!
//! Each compilation gets a clean working directory holding an ffconcat
//! list and the encoder output. Segments are already in the canonical
//! profile, so a stream copy is tried first; if that fails the list is
//! re-encoded once.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use clipstitch_common::{StitchError, StitchResult};
use clipstitch_model::{CompilationJob, Sequence};
use tokio_util::sync::CancellationToken;

use crate::layout::{partial_path, remove_dir_if_exists, CacheLayout};
use crate::profile::CanonicalProfile;
use crate::progress::{ProgressSink, ProgressUpdate, Stage};
use crate::transcoder::{SharedTranscoder, TranscodeRequest};

pub const CONCAT_LIST: &str = "concat.txt";
pub const OUTPUT_STEM: &str = "compilation";

/// Runs one encoder job per compilation.
pub struct ConcatEngine {
    transcoder: SharedTranscoder,
    layout: CacheLayout,
    profile: CanonicalProfile,
    cancel: CancellationToken,
}

impl ConcatEngine {
    pub fn new(
        transcoder: SharedTranscoder,
        layout: CacheLayout,
        profile: CanonicalProfile,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transcoder,
            layout,
            profile,
            cancel,
        }
    }

    /// Final output path inside a compilation's working directory.
    pub fn output_path(&self, index: usize) -> PathBuf {
        self.layout
            .compilation_dir(index)
            .join(format!("{OUTPUT_STEM}.{}", self.profile.ext()))
    }

    /// Concatenate the job's sequence into `<cache>/<index>/compilation.<ext>`.
    pub async fn run(&self, job: &CompilationJob, progress: &dyn ProgressSink) -> StitchResult<PathBuf> {
        let sequence = job.sequence.as_ref().ok_or_else(|| {
            StitchError::Other(anyhow::anyhow!("compilation {} has no sequence", job.index))
        })?;
        if sequence.is_empty() {
            return Err(StitchError::Other(anyhow::anyhow!(
                "compilation {} has an empty sequence",
                job.index
            )));
        }
        if self.cancel.is_cancelled() {
            return Err(StitchError::cancelled(format!("compilation {}", job.index)));
        }

        let dir = self.layout.compilation_dir(job.index);
        remove_dir_if_exists(&dir).await?;
        tokio::fs::create_dir_all(&dir).await?;

        let list = dir.join(CONCAT_LIST);
        tokio::fs::write(&list, concat_list(sequence)?).await?;

        let output = self.output_path(job.index);
        let partial = partial_path(&output);
        let label = format!("compilation {}", job.index);
        let expected = sequence.total_duration_secs();
        tracing::info!(
            compilation = job.index,
            segments = sequence.len(),
            clips = sequence.clip_count(),
            expected_secs = expected,
            "Concatenating"
        );

        let copy = TranscodeRequest::new(label.clone(), Stage::Concat, &partial)
            .concat_list(&list)
            .map("0")
            .output_args(["-c", "copy"])
            .output_args(self.profile.container_args())
            .expected_duration(expected);

        match self.transcoder.transcode(&copy, progress, &self.cancel).await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                tracing::warn!(compilation = job.index, error = %e, "Stream copy failed; re-encoding");
                let reencode = TranscodeRequest::new(label.clone(), Stage::Concat, &partial)
                    .concat_list(&list)
                    .map("0:v:0")
                    .map("0:a:0?")
                    .output_args(self.profile.output_args())
                    .expected_duration(expected);
                self.transcoder
                    .transcode(&reencode, progress, &self.cancel)
                    .await?;
            }
        }

        tokio::fs::rename(&partial, &output).await?;
        progress.report(ProgressUpdate::done(label, Stage::Concat));
        tracing::info!(compilation = job.index, output = %output.display(), "Compilation encoded");
        Ok(output)
    }
}

impl std::fmt::Debug for ConcatEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcatEngine")
            .field("transcoder", &self.transcoder.name())
            .field("layout", &self.layout)
            .finish()
    }
}

/// Render `sequence` as an ffconcat list with absolute paths.
pub fn concat_list(sequence: &Sequence) -> StitchResult<String> {
    let mut out = String::from("ffconcat version 1.0\n");
    for segment in sequence.segments() {
        let path = segment
            .asset
            .require_canonical()
            .map_err(|e| StitchError::Other(e.into()))?;
        let path = absolute(path)?;
        let _ = writeln!(out, "file '{}'", escape_quotes(&path.to_string_lossy()));
        if let Some(trim) = segment.trim {
            if trim.start_secs > 0.0 {
                let _ = writeln!(out, "inpoint {:.3}", trim.start_secs);
            }
            let _ = writeln!(out, "outpoint {:.3}", trim.start_secs + trim.duration_secs);
        }
    }
    Ok(out)
}

fn absolute(path: &Path) -> StitchResult<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}

/// ffconcat quoting: `'` becomes `'\''`.
fn escape_quotes(s: &str) -> String {
    s.replace('\'', r"'\''")
}
