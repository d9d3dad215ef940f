//! Clip and avatar downloads.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use clipstitch_common::{StitchError, StitchResult, ToolsConfig};
use clipstitch_model::ClipRef;
use tokio_util::sync::CancellationToken;

use crate::process::{command_exists, ProcessRunner};

/// Avatar images are scaled to this square size.
pub const AVATAR_SIZE: u32 = 128;

/// Retrieves remote media onto the local disk.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Download the clip video to `dest`.
    async fn fetch(&self, clip: &ClipRef, dest: &Path, cancel: &CancellationToken)
        -> StitchResult<()>;

    /// Download the creator avatar at `url` to `dest` as a PNG.
    async fn fetch_avatar(&self, url: &str, dest: &Path, cancel: &CancellationToken)
        -> StitchResult<()>;
}

pub type SharedFetcher = Arc<dyn Fetcher>;

/// `yt-dlp` for clips, `ffmpeg` for avatar images.
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    ytdlp: PathBuf,
    ffmpeg: PathBuf,
    format: String,
    runner: ProcessRunner,
}

impl YtDlpFetcher {
    pub fn new(tools: &ToolsConfig, runner: ProcessRunner) -> Self {
        Self {
            ytdlp: tools.ytdlp.clone(),
            ffmpeg: tools.ffmpeg.clone(),
            format: tools.yt_format.clone(),
            runner,
        }
    }

    pub fn is_available(&self) -> bool {
        command_exists(&self.ytdlp)
    }

    fn clip_args(&self, clip: &ClipRef, dest: &Path) -> Vec<String> {
        vec![
            "--no-playlist".into(),
            "--no-progress".into(),
            "--quiet".into(),
            "--no-warnings".into(),
            "--force-overwrites".into(),
            "-f".into(),
            self.format.clone(),
            "--merge-output-format".into(),
            "mp4".into(),
            "-o".into(),
            dest.to_string_lossy().into_owned(),
            clip.url.clone(),
        ]
    }

    fn avatar_args(url: &str, dest: &Path) -> Vec<String> {
        vec![
            "-y".into(),
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            url.to_string(),
            "-vf".into(),
            format!("scale={AVATAR_SIZE}:{AVATAR_SIZE}"),
            "-frames:v".into(),
            "1".into(),
            dest.to_string_lossy().into_owned(),
        ]
    }
}

#[async_trait]
impl Fetcher for YtDlpFetcher {
    async fn fetch(
        &self,
        clip: &ClipRef,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> StitchResult<()> {
        let args = self.clip_args(clip, dest);
        let output = self.runner.run(&self.ytdlp, &args, cancel, |_| {}).await?;
        if !output.success() {
            return Err(StitchError::fetch(format!(
                "clip {}: {}",
                clip.id,
                output.describe_failure("yt-dlp")
            )));
        }
        if !dest.is_file() {
            return Err(StitchError::fetch(format!(
                "clip {}: yt-dlp reported success but {} is missing",
                clip.id,
                dest.display()
            )));
        }
        Ok(())
    }

    async fn fetch_avatar(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> StitchResult<()> {
        let args = Self::avatar_args(url, dest);
        let output = self.runner.run(&self.ffmpeg, &args, cancel, |_| {}).await?;
        if !output.success() || !dest.is_file() {
            return Err(StitchError::fetch(format!(
                "avatar {url}: {}",
                output.describe_failure("ffmpeg")
            )));
        }
        Ok(())
    }
}
