//! clipstitch Sequencer
//!
//! Turns ready clips and the normalized bumper pool into one ordered
//! timeline per requested compilation:
//! - **Partitioning:** Consecutive chunks of the shuffled clip list, one per compilation
//! - **Transitions:** Weighted random choice with a sliding cooldown window
//! - **Layout:** Static bumper around every clip, optional intro and outro
//!
//! This crate is pure computation. All randomness comes from the RNG the
//! caller passes in.

pub mod selector;
pub mod sequencer;

pub use selector::TransitionSelector;
pub use sequencer::{build_sequences, partition, Sequencer, SequencingOutcome, SequencingPolicy};
