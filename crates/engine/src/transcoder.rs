//! Transcode requests and the encoder backend.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use clipstitch_common::{StitchError, StitchResult};
use tokio_util::sync::CancellationToken;

use crate::process::{command_exists, ProcessRunner};
use crate::progress::{ProgressSink, ProgressState, Stage};

/// Seconds without output-time advancement before a stall warning.
const STALL_WARN_SECS: u64 = 10;

/// One encoder input.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscodeInput {
    /// A media file, with options placed before its `-i`.
    File { path: PathBuf, options: Vec<String> },
    /// A lavfi source expression (for example generated silence).
    Lavfi(String),
    /// An ffconcat list file.
    ConcatList(PathBuf),
}

/// Everything needed to run the encoder once.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeRequest {
    /// Subject reported in progress updates.
    pub label: String,
    pub stage: Stage,
    pub inputs: Vec<TranscodeInput>,
    pub filter_complex: Option<String>,
    /// Stream selectors passed as `-map`.
    pub maps: Vec<String>,
    pub output_args: Vec<String>,
    pub output: PathBuf,
    /// Expected output length, for progress fractions.
    pub expected_duration_secs: Option<f64>,
}

impl TranscodeRequest {
    pub fn new(label: impl Into<String>, stage: Stage, output: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            stage,
            inputs: Vec::new(),
            filter_complex: None,
            maps: Vec::new(),
            output_args: Vec::new(),
            output: output.into(),
            expected_duration_secs: None,
        }
    }

    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        self.inputs.push(TranscodeInput::File {
            path: path.into(),
            options: Vec::new(),
        });
        self
    }

    pub fn input_with<I, S>(mut self, path: impl Into<PathBuf>, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.push(TranscodeInput::File {
            path: path.into(),
            options: options.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn lavfi(mut self, expr: impl Into<String>) -> Self {
        self.inputs.push(TranscodeInput::Lavfi(expr.into()));
        self
    }

    pub fn concat_list(mut self, list: impl Into<PathBuf>) -> Self {
        self.inputs.push(TranscodeInput::ConcatList(list.into()));
        self
    }

    pub fn filter_complex(mut self, graph: impl Into<String>) -> Self {
        self.filter_complex = Some(graph.into());
        self
    }

    pub fn map(mut self, selector: impl Into<String>) -> Self {
        self.maps.push(selector.into());
        self
    }

    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn expected_duration(mut self, secs: Option<f64>) -> Self {
        self.expected_duration_secs = secs.filter(|s| s.is_finite() && *s > 0.0);
        self
    }

    /// Full encoder argument list, progress reporting included.
    pub fn to_args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "-y",
            "-hide_banner",
            "-loglevel",
            "error",
            "-nostats",
            "-progress",
            "pipe:1",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        for input in &self.inputs {
            match input {
                TranscodeInput::File { path, options } => {
                    args.extend(options.iter().cloned());
                    args.push("-i".to_string());
                    args.push(path.to_string_lossy().into_owned());
                }
                TranscodeInput::Lavfi(expr) => {
                    args.extend(["-f", "lavfi", "-i"].map(String::from));
                    args.push(expr.clone());
                }
                TranscodeInput::ConcatList(list) => {
                    args.extend(["-f", "concat", "-safe", "0", "-i"].map(String::from));
                    args.push(list.to_string_lossy().into_owned());
                }
            }
        }

        if let Some(graph) = &self.filter_complex {
            args.push("-filter_complex".to_string());
            args.push(graph.clone());
        }
        for selector in &self.maps {
            args.push("-map".to_string());
            args.push(selector.clone());
        }
        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().into_owned());
        args
    }
}

/// Runs encoder jobs.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Execute `request`, reporting progress, until done or cancelled.
    async fn transcode(
        &self,
        request: &TranscodeRequest,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> StitchResult<()>;

    /// Whether the backend can run on this system.
    fn is_available(&self) -> bool;

    fn name(&self) -> &str;
}

/// Shared handle to a transcoder.
pub type SharedTranscoder = Arc<dyn Transcoder>;

/// `ffmpeg` subprocess backend.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    binary: PathBuf,
    runner: ProcessRunner,
}

impl FfmpegTranscoder {
    pub fn new(binary: impl Into<PathBuf>, runner: ProcessRunner) -> Self {
        Self {
            binary: binary.into(),
            runner,
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        request: &TranscodeRequest,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> StitchResult<()> {
        let args = request.to_args();
        tracing::debug!(
            label = %request.label,
            stage = %request.stage,
            command = %format!("{} {}", self.binary.display(), args.join(" ")),
            "Running encoder"
        );

        let started = Instant::now();
        let mut state = ProgressState::default();
        let mut last_advance_secs = 0.0f64;
        let mut last_advance_wall = Instant::now();

        progress.report(state.report(
            &request.label,
            request.stage,
            request.expected_duration_secs,
            0.0,
        ));

        let output = self
            .runner
            .run(&self.binary, &args, cancel, |line| {
                if !state.update_line(line) {
                    return;
                }
                if state.out_time_secs > last_advance_secs + 0.001 {
                    last_advance_secs = state.out_time_secs;
                    last_advance_wall = Instant::now();
                } else if last_advance_wall.elapsed().as_secs() >= STALL_WARN_SECS {
                    tracing::warn!(
                        label = %request.label,
                        out_time_secs = state.out_time_secs,
                        elapsed_secs = started.elapsed().as_secs_f64(),
                        "No encoder progress for {STALL_WARN_SECS}s"
                    );
                    last_advance_wall = Instant::now();
                }
                progress.report(state.report(
                    &request.label,
                    request.stage,
                    request.expected_duration_secs,
                    started.elapsed().as_secs_f64(),
                ));
            })
            .await?;

        if !output.success() {
            return Err(StitchError::transcode(format!(
                "{} ({})",
                output.describe_failure("ffmpeg"),
                request.label
            )));
        }

        tracing::debug!(
            label = %request.label,
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Encoder finished"
        );
        Ok(())
    }

    fn is_available(&self) -> bool {
        command_exists(&self.binary)
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}
