//! Media probing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use clipstitch_common::{StitchError, StitchResult};

use crate::process::{command_exists, ProcessRunner};

/// Reads stream facts from media files.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Container duration in seconds.
    async fn probe_duration(&self, path: &Path) -> StitchResult<f64>;

    /// Whether the file has at least one audio stream.
    async fn probe_has_audio(&self, path: &Path) -> StitchResult<bool>;
}

pub type SharedProber = Arc<dyn Prober>;

/// `ffprobe` subprocess backend.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    binary: PathBuf,
    runner: ProcessRunner,
}

impl FfprobeProber {
    pub fn new(binary: impl Into<PathBuf>, runner: ProcessRunner) -> Self {
        Self {
            binary: binary.into(),
            runner,
        }
    }

    pub fn is_available(&self) -> bool {
        command_exists(&self.binary)
    }

    async fn query(&self, path: &Path, args: &[&str]) -> StitchResult<Vec<String>> {
        if !path.exists() {
            return Err(StitchError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let mut full: Vec<String> = vec!["-v".into(), "error".into()];
        full.extend(args.iter().map(|s| s.to_string()));
        full.push(path.to_string_lossy().into_owned());

        let token = self.runner.shutdown().token();
        let mut lines = Vec::new();
        let output = self
            .runner
            .run(&self.binary, &full, &token, |line| {
                let line = line.trim();
                if !line.is_empty() {
                    lines.push(line.to_string());
                }
            })
            .await?;

        if !output.success() {
            return Err(StitchError::probe(path, output.describe_failure("ffprobe")));
        }
        Ok(lines)
    }
}

#[async_trait]
impl Prober for FfprobeProber {
    async fn probe_duration(&self, path: &Path) -> StitchResult<f64> {
        let lines = self
            .query(
                path,
                &[
                    "-show_entries",
                    "format=duration",
                    "-of",
                    "default=noprint_wrappers=1:nokey=1",
                ],
            )
            .await?;
        parse_duration(&lines).ok_or_else(|| {
            StitchError::probe(path, format!("no usable duration in {lines:?}"))
        })
    }

    async fn probe_has_audio(&self, path: &Path) -> StitchResult<bool> {
        let lines = self
            .query(
                path,
                &[
                    "-select_streams",
                    "a",
                    "-show_entries",
                    "stream=index",
                    "-of",
                    "csv=p=0",
                ],
            )
            .await?;
        Ok(!lines.is_empty())
    }
}

fn parse_duration(lines: &[String]) -> Option<f64> {
    lines
        .iter()
        .find_map(|l| l.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
}
