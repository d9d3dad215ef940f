//! The canonical encoding profile.
//!
//! Every segment of a compilation is encoded with the same codec,
//! resolution, frame rate, pixel format and audio layout so the concat
//! step can stream-copy. This module turns [`EncodingConfig`] into encoder
//! arguments and builds the normalization requests.

use std::path::Path;

use clipstitch_common::{EncodingConfig, StitchResult};

use crate::progress::Stage;
use crate::transcoder::TranscodeRequest;

/// How the audio track of a normalized file is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioMode {
    /// Re-encode the source audio as is.
    Passthrough,
    /// Re-encode with the given loudness filter.
    Loudnorm(String),
    /// Replace the audio with generated silence.
    Silent,
}

impl AudioMode {
    pub fn is_silent(&self) -> bool {
        matches!(self, AudioMode::Silent)
    }

    pub fn applies_loudness(&self) -> bool {
        matches!(self, AudioMode::Loudnorm(_))
    }
}

/// Validated canonical profile.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalProfile {
    encoding: EncodingConfig,
    width: u32,
    height: u32,
}

impl CanonicalProfile {
    pub fn from_config(encoding: &EncodingConfig) -> StitchResult<Self> {
        let (width, height) = encoding.dimensions()?;
        Ok(Self {
            encoding: encoding.clone(),
            width,
            height,
        })
    }

    pub fn profile_id(&self) -> String {
        self.encoding.profile_id()
    }

    /// Container extension without the dot.
    pub fn ext(&self) -> &str {
        self.encoding.container_ext.trim_start_matches('.')
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn fps(&self) -> u32 {
        self.encoding.fps
    }

    /// Video encoder arguments.
    pub fn video_args(&self) -> Vec<String> {
        let e = &self.encoding;
        vec![
            "-r".into(),
            e.fps.to_string(),
            "-s".into(),
            format!("{}x{}", self.width, self.height),
            "-sws_flags".into(),
            "lanczos".into(),
            "-c:v".into(),
            e.video_codec.clone(),
            "-preset".into(),
            e.preset.clone(),
            "-b:v".into(),
            e.video_bitrate.clone(),
            "-maxrate".into(),
            e.video_bitrate.clone(),
            "-bufsize".into(),
            e.video_bitrate.clone(),
            "-g".into(),
            e.gop.to_string(),
            "-pix_fmt".into(),
            e.pixel_format.clone(),
        ]
    }

    /// Audio encoder arguments.
    pub fn audio_args(&self) -> Vec<String> {
        let e = &self.encoding;
        vec![
            "-c:a".into(),
            e.audio_codec.clone(),
            "-b:a".into(),
            e.audio_bitrate.clone(),
            "-ar".into(),
            e.sample_rate.to_string(),
            "-ac".into(),
            e.channels.to_string(),
        ]
    }

    /// Full output arguments: video, audio, container flags.
    pub fn output_args(&self) -> Vec<String> {
        let mut args = self.video_args();
        args.extend(self.audio_args());
        args.extend(self.container_args());
        args
    }

    /// Muxer flags only; these are all a stream copy needs.
    pub fn container_args(&self) -> Vec<String> {
        self.encoding.container_flags.clone()
    }

    /// lavfi expression generating silence in the canonical layout.
    pub fn silence_source(&self) -> String {
        let layout = match self.encoding.channels {
            1 => "mono",
            _ => "stereo",
        };
        format!(
            "anullsrc=channel_layout={layout}:sample_rate={}",
            self.encoding.sample_rate
        )
    }

    /// Request that re-encodes `src` into `dst` with the given audio mode.
    pub fn normalize_request(
        &self,
        label: &str,
        stage: Stage,
        src: &Path,
        dst: &Path,
        audio: &AudioMode,
        expected_duration_secs: Option<f64>,
    ) -> TranscodeRequest {
        let request = TranscodeRequest::new(label, stage, dst)
            .input(src)
            .expected_duration(expected_duration_secs);

        match audio {
            AudioMode::Silent => request
                .lavfi(self.silence_source())
                .map("0:v:0")
                .map("1:a:0")
                .output_args(self.output_args())
                .output_args(["-shortest"]),
            AudioMode::Passthrough => request
                .map("0:v:0")
                .map("0:a:0")
                .output_args(self.output_args()),
            AudioMode::Loudnorm(filter) => request
                .map("0:v:0")
                .map("0:a:0")
                .output_args(["-af", filter.as_str()])
                .output_args(self.output_args()),
        }
    }
}
