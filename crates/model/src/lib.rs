//! clipstitch Data Model
//!
//! Defines the data contracts shared by the sequencer and the engine:
//! - **Assets:** Bumper and clip media references, before and after normalization
//! - **Clips:** Clip references from ingestion and the per-clip job state machine
//! - **Sequences:** Ordered segment timelines, one per compilation
//! - **Compilations:** Output jobs and the end-of-run summary
//! - **Manifest:** Records of already-normalized bumper sources
//!
//! Values here own no processes and touch the filesystem only to
//! fingerprint sources.

pub mod asset;
pub mod clip;
pub mod compilation;
pub mod manifest;
pub mod sequence;

pub use asset::*;
pub use clip::*;
pub use compilation::*;
pub use manifest::*;
pub use sequence::*;

/// Violations of model invariants.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("{kind} asset '{name}' is not normalized")]
    NotNormalized { name: String, kind: AssetKind },

    #[error("invalid state transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        entity: String,
        from: String,
        to: String,
    },

    #[error("sequence {index} violates ordering rules: {message}")]
    SequenceViolation { index: usize, message: String },
}
