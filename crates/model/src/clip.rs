//! Clip references and the per-clip job state machine.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::asset::Asset;
use crate::manifest::short_digest;
use crate::ModelError;

/// One clip selected for processing, as handed over by ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipRef {
    /// Unique clip identifier; also names the clip's working directory.
    pub id: String,

    /// Download URL.
    pub url: String,

    /// Creator display name, drawn by the overlay.
    #[serde(default)]
    pub author: String,

    /// Creator avatar image URL.
    #[serde(default)]
    pub avatar_url: Option<String>,

    /// View count used for threshold filtering.
    #[serde(default)]
    pub views: u64,

    /// Creation timestamp (RFC 3339).
    #[serde(default)]
    pub created_at: Option<String>,

    #[serde(default)]
    pub title: Option<String>,
}

impl ClipRef {
    /// Identifier safe to use as a directory name.
    ///
    /// Ids that had to be rewritten get a digest of the original id
    /// appended, so `a/b` and `a_b` never share a directory.
    pub fn dir_name(&self) -> String {
        let cleaned: String = self
            .id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if cleaned == self.id && !cleaned.is_empty() {
            return cleaned;
        }
        let base = if cleaned.is_empty() { "clip" } else { &cleaned };
        format!("{base}-{}", short_digest(&self.id))
    }
}

/// Window bounds as written in a clip list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpec {
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
}

/// A clip list file (`clips.json`) produced by an ingestion tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipList {
    /// Broadcaster or channel name used in output file names.
    pub identity: String,

    #[serde(default)]
    pub window: WindowSpec,

    pub clips: Vec<ClipRef>,
}

/// Lifecycle of one clip job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipState {
    Pending,
    Downloading,
    Downloaded,
    Overlaying,
    Normalizing,
    Ready,
    Failed,
    Cancelled,
}

impl ClipState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ClipState::Ready | ClipState::Failed | ClipState::Cancelled)
    }

    /// Whether moving from `self` to `next` is a legal step.
    pub fn can_transition_to(self, next: ClipState) -> bool {
        use ClipState::*;
        if self.is_terminal() {
            return false;
        }
        match next {
            Failed | Cancelled => true,
            Downloading => self == Pending,
            Downloaded => self == Downloading,
            Overlaying => self == Downloaded,
            Normalizing => matches!(self, Downloaded | Overlaying),
            Ready => self == Normalizing,
            Pending => false,
        }
    }
}

/// One selected clip and its processing progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipJob {
    pub clip: ClipRef,

    /// Position in the selection order.
    pub position: usize,

    pub state: ClipState,

    /// Per-job working directory.
    pub work_dir: PathBuf,

    /// Normalized clip asset, set on `Ready`.
    pub output: Option<Asset>,

    /// Why the job failed or was cancelled.
    pub failure: Option<String>,

    /// Download attempts used.
    pub attempts: u32,
}

impl ClipJob {
    pub fn new(clip: ClipRef, position: usize, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            clip,
            position,
            state: ClipState::Pending,
            work_dir: work_dir.into(),
            output: None,
            failure: None,
            attempts: 0,
        }
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn advance(&mut self, next: ClipState) -> Result<(), ModelError> {
        if !self.state.can_transition_to(next) {
            return Err(ModelError::InvalidTransition {
                entity: format!("clip {}", self.clip.id),
                from: format!("{:?}", self.state),
                to: format!("{next:?}"),
            });
        }
        self.state = next;
        Ok(())
    }

    /// Terminal success with the normalized asset.
    pub fn complete(&mut self, asset: Asset) -> Result<(), ModelError> {
        self.advance(ClipState::Ready)?;
        self.output = Some(asset);
        Ok(())
    }

    /// Terminal failure. Already-terminal jobs are left untouched.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if !self.state.is_terminal() {
            self.state = ClipState::Failed;
            self.failure = Some(reason.into());
        }
    }

    /// Terminal cancellation. Already-terminal jobs are left untouched.
    pub fn cancel(&mut self, reason: impl Into<String>) {
        if !self.state.is_terminal() {
            self.state = ClipState::Cancelled;
            self.failure = Some(reason.into());
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == ClipState::Ready && self.output.is_some()
    }
}
