//! Compilation jobs and the end-of-run summary.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::sequence::Sequence;
use crate::ModelError;

/// Lifecycle of one requested output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompilationState {
    Selecting,
    Sequenced,
    Concatenating,
    Finalized,
    Failed,
}

impl CompilationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CompilationState::Finalized | CompilationState::Failed)
    }

    pub fn can_transition_to(self, next: CompilationState) -> bool {
        use CompilationState::*;
        match (self, next) {
            (s, _) if s.is_terminal() => false,
            (_, Failed) => true,
            (Selecting, Sequenced) => true,
            (Sequenced, Concatenating) => true,
            (Concatenating, Finalized) => true,
            _ => false,
        }
    }
}

/// One requested compilation output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilationJob {
    /// Zero-based compilation index; names the working directory.
    pub index: usize,

    pub state: CompilationState,

    /// Timeline, set once sequenced.
    pub sequence: Option<Sequence>,

    /// Planned final file name in the output directory.
    pub output_name: String,

    /// Where the finished file ended up.
    pub final_path: Option<PathBuf>,

    pub failure: Option<String>,
}

impl CompilationJob {
    pub fn new(index: usize, output_name: impl Into<String>) -> Self {
        Self {
            index,
            state: CompilationState::Selecting,
            sequence: None,
            output_name: output_name.into(),
            final_path: None,
            failure: None,
        }
    }

    pub fn advance(&mut self, next: CompilationState) -> Result<(), ModelError> {
        if !self.state.can_transition_to(next) {
            return Err(ModelError::InvalidTransition {
                entity: format!("compilation {}", self.index),
                from: format!("{:?}", self.state),
                to: format!("{next:?}"),
            });
        }
        self.state = next;
        Ok(())
    }

    /// Attach the timeline and move to `Sequenced`.
    pub fn sequenced(&mut self, sequence: Sequence) -> Result<(), ModelError> {
        self.advance(CompilationState::Sequenced)?;
        self.sequence = Some(sequence);
        Ok(())
    }

    /// Record the final location and move to `Finalized`.
    pub fn finalized(&mut self, path: PathBuf) -> Result<(), ModelError> {
        self.advance(CompilationState::Finalized)?;
        self.final_path = Some(path);
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        if !self.state.is_terminal() {
            self.state = CompilationState::Failed;
            self.failure = Some(reason.into());
        }
    }
}

/// A clip that did not make it into any compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedClip {
    pub id: String,
    pub reason: String,
}

/// A compilation that received fewer clips than requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    pub index: usize,
    pub requested: usize,
    pub assigned: usize,
}

/// What happened during one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub compilations: Vec<CompilationJob>,
    pub skipped_clips: Vec<SkippedClip>,
    pub shortfalls: Vec<Shortfall>,
    /// Bumper assets dropped because they could not be normalized.
    pub dropped_assets: Vec<SkippedClip>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn finalized(&self) -> impl Iterator<Item = &CompilationJob> {
        self.compilations
            .iter()
            .filter(|c| c.state == CompilationState::Finalized)
    }

    pub fn failed(&self) -> impl Iterator<Item = &CompilationJob> {
        self.compilations
            .iter()
            .filter(|c| c.state != CompilationState::Finalized)
    }

    pub fn succeeded_count(&self) -> usize {
        self.finalized().count()
    }

    pub fn all_succeeded(&self) -> bool {
        !self.cancelled && self.succeeded_count() == self.compilations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let mut job = CompilationJob::new(0, "a_compilation.mp4");
        job.sequenced(Sequence::new(0)).unwrap();
        job.advance(CompilationState::Concatenating).unwrap();
        job.finalized(PathBuf::from("/out/a_compilation.mp4")).unwrap();
        assert_eq!(job.state, CompilationState::Finalized);
        assert!(job.advance(CompilationState::Concatenating).is_err());
    }

    #[test]
    fn test_cannot_skip_concatenation() {
        let mut job = CompilationJob::new(1, "b.mp4");
        job.sequenced(Sequence::new(1)).unwrap();
        assert!(job.finalized(PathBuf::from("/out/b.mp4")).is_err());
        assert_eq!(job.state, CompilationState::Sequenced);
    }

    #[test]
    fn test_summary_counts() {
        let mut ok = CompilationJob::new(0, "a.mp4");
        ok.sequenced(Sequence::new(0)).unwrap();
        ok.advance(CompilationState::Concatenating).unwrap();
        ok.finalized(PathBuf::from("/o/a.mp4")).unwrap();
        let mut bad = CompilationJob::new(1, "b.mp4");
        bad.fail("no clips");

        let summary = RunSummary {
            compilations: vec![ok, bad],
            ..Default::default()
        };
        assert_eq!(summary.succeeded_count(), 1);
        assert_eq!(summary.failed().count(), 1);
        assert!(!summary.all_succeeded());
    }
}
