//! clipstitch Engine
//!
//! Turns a selected clip list into finished compilation files.
//!
//! # Pipeline Architecture
//!
//! ```text
//! bumpers ── AssetNormalizer ──► _trans/ (+ _manifest.json)
//!                                     │
//! clips ──── ClipWorker pool ──► clips/<id>/<id>.mp4
//!                                     │
//!                               Sequencer (per compilation)
//!                                     │
//!                               ConcatEngine ──► <index>/compilation.mp4
//!                                     │
//!                               Finalizer ──► output/<identity>_<window>_compilation.mp4
//! ```
//!
//! Every external program runs through [`process::ProcessRunner`], which
//! registers its pid with the [`shutdown::ShutdownController`] so an
//! interrupt can terminate it.

pub mod assets;
pub mod concat;
pub mod fetcher;
pub mod finalizer;
pub mod health;
pub mod layout;
pub mod manifest;
pub mod normalizer;
pub mod pipeline;
pub mod prober;
pub mod process;
pub mod profile;
pub mod progress;
pub mod retry;
pub mod shutdown;
pub mod transcoder;
pub mod worker;

pub use concat::ConcatEngine;
pub use fetcher::{Fetcher, SharedFetcher, YtDlpFetcher};
pub use finalizer::Finalizer;
pub use layout::CacheLayout;
pub use manifest::{JsonManifestStore, ManifestStore, MemoryManifestStore, SharedManifest};
pub use normalizer::{AssetNormalizer, NormalizerSettings, PreparedPool, SilencePolicy};
pub use pipeline::{load_clip_list, Pipeline};
pub use prober::{FfprobeProber, Prober, SharedProber};
pub use process::ProcessRunner;
pub use profile::{AudioMode, CanonicalProfile};
pub use progress::{NoProgress, ProgressSink, ProgressUpdate, SharedProgress, Stage};
pub use retry::RetryPolicy;
pub use shutdown::ShutdownController;
pub use transcoder::{FfmpegTranscoder, SharedTranscoder, TranscodeInput, TranscodeRequest, Transcoder};
pub use worker::{ClipWorker, WorkerSettings};
