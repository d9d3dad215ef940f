//! Encoder progress tracking.
//!
//! The encoder is started with `-progress pipe:1`, which prints blocks of
//! `key=value` lines terminated by `progress=continue` or `progress=end`.
//! [`ProgressState`] folds those lines; [`ProgressUpdate`] is what
//! observers see.

use std::fmt;
use std::sync::Arc;

/// Pipeline stage a progress update belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Prewarm,
    Download,
    Overlay,
    Normalize,
    Concat,
    Finalize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Prewarm => "prewarm",
            Stage::Download => "download",
            Stage::Overlay => "overlay",
            Stage::Normalize => "normalize",
            Stage::Concat => "concat",
            Stage::Finalize => "finalize",
        };
        f.write_str(s)
    }
}

/// One progress observation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// What is being worked on: a clip id, an asset name, or `compilation <n>`.
    pub subject: String,

    pub stage: Stage,

    /// Completion in `[0.0, 1.0]`; `0.0` when the total is unknown.
    pub fraction: f64,

    /// Encoder output time reached so far, in seconds.
    pub out_time_secs: f64,

    /// Expected total output duration, if known.
    pub total_secs: Option<f64>,

    /// Estimated seconds remaining.
    pub eta_secs: Option<f64>,

    pub complete: bool,
}

impl ProgressUpdate {
    /// A bare stage-change notification.
    pub fn stage(subject: impl Into<String>, stage: Stage) -> Self {
        Self {
            subject: subject.into(),
            stage,
            fraction: 0.0,
            out_time_secs: 0.0,
            total_secs: None,
            eta_secs: None,
            complete: false,
        }
    }

    /// A completed-stage notification.
    pub fn done(subject: impl Into<String>, stage: Stage) -> Self {
        Self {
            fraction: 1.0,
            complete: true,
            ..Self::stage(subject, stage)
        }
    }
}

/// Receives progress updates. Must be cheap; it is called from encoder
/// read loops.
pub trait ProgressSink: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn report(&self, update: ProgressUpdate) {
        self(update)
    }
}

/// Sink that drops every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _update: ProgressUpdate) {}
}

/// Shared handle to a sink.
pub type SharedProgress = Arc<dyn ProgressSink>;

/// Folded state of the encoder's `-progress` stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressState {
    pub out_time_secs: f64,
    pub speed: Option<f64>,
    pub complete: bool,
}

impl ProgressState {
    /// Apply one `key=value` pair. Returns true when a block ended.
    pub fn update(&mut self, key: &str, value: &str) -> bool {
        match key {
            // Both keys are microseconds despite the name.
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.trim().parse::<f64>() {
                    if us >= 0.0 {
                        self.out_time_secs = us / 1_000_000.0;
                    }
                }
                false
            }
            "speed" => {
                self.speed = value
                    .trim()
                    .strip_suffix('x')
                    .and_then(|s| s.trim().parse::<f64>().ok())
                    .filter(|s| *s > 0.0);
                false
            }
            "progress" => {
                self.complete = value.trim() == "end";
                true
            }
            _ => false,
        }
    }

    /// Apply one raw line. Returns true when a block ended.
    pub fn update_line(&mut self, line: &str) -> bool {
        match line.trim().split_once('=') {
            Some((key, value)) => self.update(key.trim(), value),
            None => false,
        }
    }

    /// Turn the current state into an update for observers.
    pub fn report(
        &self,
        subject: &str,
        stage: Stage,
        total_secs: Option<f64>,
        elapsed_secs: f64,
    ) -> ProgressUpdate {
        let total = total_secs.filter(|t| *t > 0.0);
        let fraction = match total {
            _ if self.complete => 1.0,
            Some(t) => (self.out_time_secs / t).clamp(0.0, 1.0),
            None => 0.0,
        };
        let eta_secs = (fraction > 0.0 && fraction < 1.0)
            .then(|| ((elapsed_secs / fraction) - elapsed_secs).max(0.0));

        ProgressUpdate {
            subject: subject.to_string(),
            stage,
            fraction,
            out_time_secs: self.out_time_secs,
            total_secs: total,
            eta_secs,
            complete: self.complete,
        }
    }
}

/// Format seconds as `MM:SS` or `HH:MM:SS`.
pub fn format_clock(secs: f64) -> String {
    if !secs.is_finite() || secs < 0.0 {
        return "--:--".to_string();
    }
    let total = secs as u64;
    let (h, m, s) = (total / 3600, (total / 60) % 60, total % 60);
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_progress_block_parsing() {
        let mut state = ProgressState::default();
        assert!(!state.update_line("frame=120"));
        assert!(!state.update_line("out_time_us=5000000"));
        assert!(!state.update_line("speed=2.5x"));
        assert!(state.update_line("progress=continue"));
        assert_eq!(state.out_time_secs, 5.0);
        assert_eq!(state.speed, Some(2.5));
        assert!(!state.complete);

        state.update_line("speed=N/A");
        assert_eq!(state.speed, None);
        assert!(state.update_line("progress=end"));
        assert!(state.complete);
    }

    #[test]
    fn test_out_time_ms_is_microseconds() {
        let mut state = ProgressState::default();
        state.update("out_time_ms", "2500000");
        assert_eq!(state.out_time_secs, 2.5);
        state.update("out_time_us", "N/A");
        assert_eq!(state.out_time_secs, 2.5);
    }

    #[test]
    fn test_report_fraction_and_eta() {
        let state = ProgressState {
            out_time_secs: 5.0,
            ..Default::default()
        };
        let update = state.report("compilation 0", Stage::Concat, Some(10.0), 4.0);
        assert_eq!(update.fraction, 0.5);
        assert_eq!(update.eta_secs, Some(4.0));

        let unknown = state.report("x", Stage::Normalize, None, 4.0);
        assert_eq!(unknown.fraction, 0.0);
        assert_eq!(unknown.eta_secs, None);

        let over = ProgressState {
            out_time_secs: 12.0,
            ..Default::default()
        }
        .report("x", Stage::Concat, Some(10.0), 1.0);
        assert_eq!(over.fraction, 1.0);
    }

    #[test]
    fn test_closure_sink() {
        let seen = Mutex::new(Vec::new());
        let sink = |u: ProgressUpdate| seen.lock().unwrap().push(u.fraction);
        sink.report(ProgressUpdate::done("a", Stage::Download));
        assert_eq!(*seen.lock().unwrap(), vec![1.0]);
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(65.0), "01:05");
        assert_eq!(format_clock(3725.0), "01:02:05");
        assert_eq!(format_clock(f64::NAN), "--:--");
    }
}
