//! Application configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{StitchError, StitchResult};

/// Environment variable that overrides `paths.transitions_dir`.
pub const TRANSITIONS_DIR_ENV: &str = "TRANSITIONS_DIR";

/// Global application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// How many compilations to build and how many clips go into each.
    pub selection: SelectionConfig,

    /// Segment ordering policy.
    pub sequencing: SequencingConfig,

    /// Audio handling for non-clip assets.
    pub audio: AudioConfig,

    /// Canonical encoding profile.
    pub encoding: EncodingConfig,

    /// Filesystem locations.
    pub paths: PathsConfig,

    /// Concurrency, retries and retention.
    pub behavior: BehaviorConfig,

    /// Bumper asset file names, relative to the transitions directory.
    pub assets: AssetsConfig,

    /// External tool locations.
    pub tools: ToolsConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Clip selection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Number of compilations to produce per run.
    pub compilations: usize,

    /// Maximum clips placed into each compilation.
    pub clips_per_compilation: usize,

    /// Clips with fewer views are ignored.
    pub min_views: u64,
}

/// Sequencing policy parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencingConfig {
    /// Chance of inserting a transition between two clips.
    pub transition_probability: f64,

    /// Disable random transitions entirely.
    pub no_random_transitions: bool,

    /// Per-transition selection weight keyed by file name (default 1.0).
    pub transition_weights: BTreeMap<String, f64>,

    /// Number of recent transition slots a transition is excluded from.
    pub transition_cooldown: usize,

    /// Transitions longer than this are trimmed to it.
    pub max_transition_secs: Option<f64>,

    /// Chance that a compilation gets no intro.
    pub intro_omit_probability: f64,

    /// Chance that a compilation gets no outro.
    pub outro_omit_probability: f64,

    /// Fixed RNG seed for reproducible runs.
    pub seed: Option<u64>,
}

/// Audio policy for bumper assets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Apply loudness normalization to audio-bearing non-clip assets.
    pub normalize_transitions: bool,

    /// Replace the audio of every non-clip asset with silence.
    pub silence_nonclip_asset_audio: bool,

    /// Replace the static asset's audio with silence.
    pub silence_static: bool,

    /// Replace transition audio with silence.
    pub silence_transitions: bool,

    /// Replace intro/outro audio with silence.
    pub silence_intro_outro: bool,

    /// Loudness filter applied when normalization is enabled.
    pub loudnorm_filter: String,
}

/// Canonical codec profile every segment is normalized to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    /// Video encoder name passed to `-c:v`.
    pub video_codec: String,

    /// Encoder preset.
    pub preset: String,

    /// Target video bitrate (also used for maxrate/bufsize).
    pub video_bitrate: String,

    /// Output resolution `WIDTHxHEIGHT`.
    pub resolution: String,

    /// Output frame rate.
    pub fps: u32,

    /// GOP length in frames.
    pub gop: u32,

    /// Pixel format.
    pub pixel_format: String,

    /// Audio encoder name passed to `-c:a`.
    pub audio_codec: String,

    /// Audio bitrate.
    pub audio_bitrate: String,

    /// Audio sample rate in Hz.
    pub sample_rate: u32,

    /// Audio channel count.
    pub channels: u32,

    /// Container extension for outputs.
    pub container_ext: String,

    /// Extra muxer flags appended to every output.
    pub container_flags: Vec<String>,
}

/// Filesystem locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Working cache directory.
    pub cache: PathBuf,

    /// Directory finished compilations are moved to.
    pub output: PathBuf,

    /// Directory holding static/intro/outro/transition sources.
    pub transitions_dir: Option<PathBuf>,

    /// Font used for the overlay caption.
    pub fontfile: PathBuf,
}

/// What to keep in the cache after a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Remove per-run working files, keep the normalized transition cache.
    #[default]
    Default,
    /// Keep every working file.
    KeepAll,
    /// Remove everything including the normalized transition cache.
    PurgeAll,
}

/// Runtime behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Concurrent clip workers.
    pub max_concurrency: usize,

    /// Concurrent concatenation jobs.
    pub concat_concurrency: usize,

    /// Skip clips that fail instead of aborting the run.
    pub skip_bad_clip: bool,

    /// Re-download clips even when a cached source exists.
    pub rebuild: bool,

    /// Draw the creator overlay on each clip.
    pub enable_overlay: bool,

    /// Ignore the normalization manifest and rebuild every bumper asset.
    pub transitions_rebuild: bool,

    /// Attempts per download or transcode step.
    pub retries: u32,

    /// Base backoff between attempts; attempt `n` waits `n * backoff_secs`.
    pub backoff_secs: f64,

    /// Grace period for subprocesses to exit after a termination request.
    pub shutdown_grace_secs: f64,

    /// Overwrite existing outputs instead of suffixing.
    pub overwrite_output: bool,

    /// Cache retention after the run.
    pub retention: RetentionPolicy,
}

/// Bumper asset names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    /// Mandatory bumper placed around every clip.
    #[serde(rename = "static")]
    pub static_asset: String,

    /// Intro candidates; at most one is used per compilation.
    pub intro: Vec<String>,

    /// Outro candidates; at most one is used per compilation.
    pub outro: Vec<String>,

    /// Transition pool.
    pub transitions: Vec<String>,
}

/// External tool binaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub ytdlp: PathBuf,

    /// yt-dlp `--format` selector.
    pub yt_format: String,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "clipstitch_engine=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            compilations: 2,
            clips_per_compilation: 12,
            min_views: 1,
        }
    }
}

impl Default for SequencingConfig {
    fn default() -> Self {
        Self {
            transition_probability: 0.35,
            no_random_transitions: false,
            transition_weights: BTreeMap::new(),
            transition_cooldown: 1,
            max_transition_secs: None,
            intro_omit_probability: 0.0,
            outro_omit_probability: 0.0,
            seed: None,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            normalize_transitions: true,
            silence_nonclip_asset_audio: false,
            silence_static: false,
            silence_transitions: false,
            silence_intro_outro: false,
            loudnorm_filter: "loudnorm=I=-16:TP=-1.5:LRA=11".to_string(),
        }
    }
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            preset: "medium".to_string(),
            video_bitrate: "12M".to_string(),
            resolution: "1920x1080".to_string(),
            fps: 60,
            gop: 120,
            pixel_format: "yuv420p".to_string(),
            audio_codec: "aac".to_string(),
            audio_bitrate: "192k".to_string(),
            sample_rate: 48000,
            channels: 2,
            container_ext: "mp4".to_string(),
            container_flags: vec!["-movflags".to_string(), "+faststart".to_string()],
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            cache: PathBuf::from("./cache"),
            output: PathBuf::from("./output"),
            transitions_dir: None,
            fontfile: PathBuf::from("assets/fonts/Roboto-Medium.ttf"),
        }
    }
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            concat_concurrency: 1,
            skip_bad_clip: true,
            rebuild: false,
            enable_overlay: true,
            transitions_rebuild: false,
            retries: 3,
            backoff_secs: 1.5,
            shutdown_grace_secs: 2.0,
            overwrite_output: false,
            retention: RetentionPolicy::Default,
        }
    }
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            static_asset: "static.mp4".to_string(),
            intro: vec!["intro.mp4".to_string(), "intro_2.mp4".to_string()],
            outro: vec!["outro.mp4".to_string(), "outro_2.mp4".to_string()],
            transitions: vec![
                "transition_01.mp4".to_string(),
                "transition_02.mp4".to_string(),
                "transition_03.mp4".to_string(),
            ],
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            ytdlp: PathBuf::from("yt-dlp"),
            yt_format: "bestvideo[ext=mp4][height<=1080]+bestaudio[ext=m4a]/best[ext=mp4][height<=1080]"
                .to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl EncodingConfig {
    /// Parse `resolution` into `(width, height)`.
    pub fn dimensions(&self) -> StitchResult<(u32, u32)> {
        let (w, h) = self
            .resolution
            .split_once(['x', 'X'])
            .ok_or_else(|| {
                StitchError::configuration(format!(
                    "resolution must look like 1920x1080, got {:?}",
                    self.resolution
                ))
            })?;
        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    StitchError::configuration(format!("invalid resolution {:?}", self.resolution))
                })
        };
        Ok((parse(w)?, parse(h)?))
    }

    /// Stable identifier of the profile; cached assets built with another
    /// profile are rebuilt.
    pub fn profile_id(&self) -> String {
        format!(
            "{}:{}:{}:{}@{}:g{}:{}|{}:{}:{}hz:{}ch",
            self.video_codec,
            self.preset,
            self.video_bitrate,
            self.resolution,
            self.fps,
            self.gop,
            self.pixel_format,
            self.audio_codec,
            self.audio_bitrate,
            self.sample_rate,
            self.channels
        )
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(config) => return config.with_env_overrides(),
                Err(e) => {
                    tracing::warn!("Failed to load config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default().with_env_overrides()
    }

    /// Load config from an explicit path. Missing keys take their defaults.
    pub fn load_from(path: &Path) -> StitchResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StitchError::configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            StitchError::configuration(format!("cannot parse {}: {e}", path.display()))
        })
    }

    /// Save config to the given location.
    pub fn save_to(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        self.save_to(&config_file_path())
    }

    /// Apply `TRANSITIONS_DIR` from the environment.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var(TRANSITIONS_DIR_ENV) {
            if !dir.trim().is_empty() {
                self.paths.transitions_dir = Some(PathBuf::from(dir));
            }
        }
        self
    }

    /// Directory bumper assets are read from.
    pub fn transitions_dir(&self) -> PathBuf {
        self.paths
            .transitions_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("transitions"))
    }

    /// Check numeric ranges and required values.
    pub fn validate(&self) -> StitchResult<()> {
        let sel = &self.selection;
        if sel.compilations == 0 {
            return Err(StitchError::configuration(
                "selection.compilations must be at least 1",
            ));
        }
        if sel.clips_per_compilation == 0 {
            return Err(StitchError::configuration(
                "selection.clips_per_compilation must be at least 1",
            ));
        }

        let seq = &self.sequencing;
        for (name, value) in [
            ("sequencing.transition_probability", seq.transition_probability),
            ("sequencing.intro_omit_probability", seq.intro_omit_probability),
            ("sequencing.outro_omit_probability", seq.outro_omit_probability),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(StitchError::configuration(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if let Some((name, weight)) = seq
            .transition_weights
            .iter()
            .find(|(_, w)| !w.is_finite())
        {
            return Err(StitchError::configuration(format!(
                "transition weight for {name} is not finite: {weight}"
            )));
        }

        if let Some(max) = seq.max_transition_secs {
            if !(max.is_finite() && max > 0.0) {
                return Err(StitchError::configuration(format!(
                    "sequencing.max_transition_secs must be positive, got {max}"
                )));
            }
        }

        let enc = &self.encoding;
        enc.dimensions()?;
        if enc.fps == 0 {
            return Err(StitchError::configuration("encoding.fps must be positive"));
        }
        if enc.sample_rate == 0 || enc.channels == 0 {
            return Err(StitchError::configuration(
                "encoding.sample_rate and encoding.channels must be positive",
            ));
        }
        if enc.container_ext.trim().is_empty() {
            return Err(StitchError::configuration(
                "encoding.container_ext must not be empty",
            ));
        }

        let beh = &self.behavior;
        if beh.max_concurrency == 0 || beh.concat_concurrency == 0 {
            return Err(StitchError::configuration(
                "behavior.max_concurrency and behavior.concat_concurrency must be at least 1",
            ));
        }
        if beh.retries == 0 {
            return Err(StitchError::configuration(
                "behavior.retries must be at least 1",
            ));
        }
        let non_negative = |v: f64| v.is_finite() && v >= 0.0;
        if !non_negative(beh.backoff_secs) || !non_negative(beh.shutdown_grace_secs) {
            return Err(StitchError::configuration(
                "behavior.backoff_secs and behavior.shutdown_grace_secs must be non-negative",
            ));
        }

        if self.assets.static_asset.trim().is_empty() {
            return Err(StitchError::configuration(
                "assets.static must name the mandatory static asset",
            ));
        }

        Ok(())
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("clipstitch").join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.selection.clips_per_compilation, 12);
        assert_eq!(config.sequencing.transition_cooldown, 1);
        assert_eq!(config.encoding.dimensions().unwrap(), (1920, 1080));
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let json = r#"{ "selection": { "compilations": 3 }, "assets": { "static": "bumper.mp4" } }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.selection.compilations, 3);
        assert_eq!(config.selection.clips_per_compilation, 12);
        assert_eq!(config.assets.static_asset, "bumper.mp4");
        assert_eq!(config.behavior.retention, RetentionPolicy::Default);
    }

    #[test]
    fn test_validate_rejects_bad_probability() {
        let mut config = AppConfig::default();
        config.sequencing.transition_probability = 1.5;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, StitchError::Configuration { .. }));
    }

    #[test]
    fn test_validate_rejects_bad_resolution() {
        let mut config = AppConfig::default();
        config.encoding.resolution = "1080p".to_string();
        assert!(config.validate().is_err());
        config.encoding.resolution = "0x720".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = AppConfig::default();
        config.behavior.max_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_profile_id_changes_with_profile() {
        let a = EncodingConfig::default();
        let mut b = EncodingConfig::default();
        b.sample_rate = 44100;
        assert_ne!(a.profile_id(), b.profile_id());
        assert_eq!(a.profile_id(), EncodingConfig::default().profile_id());
    }

    #[test]
    fn test_retention_policy_serde_names() {
        let json = serde_json::to_string(&RetentionPolicy::PurgeAll).unwrap();
        assert_eq!(json, "\"purge_all\"");
        let parsed: RetentionPolicy = serde_json::from_str("\"keep_all\"").unwrap();
        assert_eq!(parsed, RetentionPolicy::KeepAll);
    }

    #[test]
    fn test_save_and_load_roundtrip_file() {
        let dir = std::env::temp_dir().join("clipstitch_test_config");
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("config.json");

        let mut config = AppConfig::default();
        config.selection.compilations = 5;
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.selection.compilations, 5);

        std::fs::remove_dir_all(&dir).ok();
    }
}
