//! Compilation sequencing.
//!
//! Each compilation is laid out as
//!
//! ```text
//! [intro] static clip static [transition static] clip static ... clip static [outro]
//! ```
//!
//! The static bumper wraps every clip. A transition may only occupy a gap
//! between two clips, and each gap is one slot of the [`TransitionSelector`]
//! cooldown window. Every random decision draws from the caller's RNG, so
//! a seeded RNG gives a reproducible layout.

use std::collections::BTreeMap;

use clipstitch_common::{AppConfig, StitchError, StitchResult};
use clipstitch_model::{Asset, AssetPool, Segment, Sequence, Shortfall, Trim};
use rand::prelude::IndexedRandom;
use rand::Rng;

use crate::selector::TransitionSelector;

/// Sequencing parameters, usually taken from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct SequencingPolicy {
    /// Clips assigned to each compilation.
    pub clips_per_compilation: usize,

    /// Chance of placing a transition in a gap between clips.
    pub transition_probability: f64,

    /// Never place transitions.
    pub no_random_transitions: bool,

    /// Per-transition weights keyed by asset name.
    pub transition_weights: BTreeMap<String, f64>,

    /// Cooldown window length in slots.
    pub transition_cooldown: usize,

    /// Longer transitions are trimmed to this length.
    pub max_transition_secs: Option<f64>,

    pub intro_omit_probability: f64,
    pub outro_omit_probability: f64,
}

impl SequencingPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        let seq = &config.sequencing;
        Self {
            clips_per_compilation: config.selection.clips_per_compilation,
            transition_probability: seq.transition_probability,
            no_random_transitions: seq.no_random_transitions,
            transition_weights: seq.transition_weights.clone(),
            transition_cooldown: seq.transition_cooldown,
            max_transition_secs: seq.max_transition_secs,
            intro_omit_probability: seq.intro_omit_probability,
            outro_omit_probability: seq.outro_omit_probability,
        }
    }
}

impl Default for SequencingPolicy {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Result of sequencing one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SequencingOutcome {
    /// One sequence per compilation that received at least one clip, in
    /// compilation order.
    pub sequences: Vec<Sequence>,

    /// Compilations that received fewer clips than requested.
    pub shortfalls: Vec<Shortfall>,

    /// Indices of compilations that received no clips at all.
    pub empty: Vec<usize>,
}

/// Split `clips` into `count` consecutive chunks of at most `per` items.
///
/// Always returns `count` chunks; trailing chunks may be short or empty.
/// No item lands in more than one chunk.
pub fn partition<T: Clone>(clips: &[T], count: usize, per: usize) -> Vec<Vec<T>> {
    (0..count)
        .map(|i| {
            clips
                .iter()
                .skip(i.saturating_mul(per))
                .take(per)
                .cloned()
                .collect()
        })
        .collect()
}

/// Builds segment timelines from ready clips and the normalized asset pool.
#[derive(Debug, Clone, Default)]
pub struct Sequencer {
    policy: SequencingPolicy,
}

impl Sequencer {
    pub fn new(policy: SequencingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SequencingPolicy {
        &self.policy
    }

    /// Lay out `count` compilations from `ready_clips`.
    ///
    /// `ready_clips` must already be in the desired (shuffled) order. Fails
    /// with a configuration error when the pool has no static asset.
    pub fn build_sequences<R: Rng + ?Sized>(
        &self,
        ready_clips: &[Asset],
        pool: &AssetPool,
        count: usize,
        rng: &mut R,
    ) -> StitchResult<SequencingOutcome> {
        let static_asset = pool.static_asset.as_ref().ok_or_else(|| {
            StitchError::configuration("static asset is missing from the asset pool")
        })?;

        let per = self.policy.clips_per_compilation;
        let mut outcome = SequencingOutcome::default();

        for (index, chunk) in partition(ready_clips, count, per).into_iter().enumerate() {
            if chunk.len() < per {
                outcome.shortfalls.push(Shortfall {
                    index,
                    requested: per,
                    assigned: chunk.len(),
                });
            }
            if chunk.is_empty() {
                tracing::warn!(compilation = index, "No clips left for compilation");
                outcome.empty.push(index);
                continue;
            }

            let sequence = self.build_one(index, &chunk, pool, static_asset, rng);
            sequence
                .validate()
                .map_err(|e| StitchError::Other(e.into()))?;
            tracing::debug!(
                compilation = index,
                clips = sequence.clip_count(),
                segments = sequence.len(),
                "Sequence built"
            );
            outcome.sequences.push(sequence);
        }

        Ok(outcome)
    }

    fn build_one<R: Rng + ?Sized>(
        &self,
        index: usize,
        clips: &[Asset],
        pool: &AssetPool,
        static_asset: &Asset,
        rng: &mut R,
    ) -> Sequence {
        let policy = &self.policy;
        let mut sequence = Sequence::new(index);
        let stat = || Segment::new(static_asset.clone());

        if let Some(intro) = pick_bookend(&pool.intros, policy.intro_omit_probability, rng) {
            sequence.push(Segment::new(intro.clone()));
        }
        sequence.push(stat());

        let mut selector = TransitionSelector::new(
            &pool.transitions,
            &policy.transition_weights,
            policy.transition_cooldown,
        );
        let transitions_enabled = !policy.no_random_transitions && selector.has_candidates();

        for (i, clip) in clips.iter().enumerate() {
            sequence.push(Segment::new(clip.clone()));
            sequence.push(stat());

            let is_gap = i + 1 < clips.len();
            if !(is_gap && transitions_enabled) {
                continue;
            }
            if rng.random::<f64>() < policy.transition_probability {
                if let Some(transition) = selector.choose(rng) {
                    sequence.push(self.transition_segment(transition));
                    sequence.push(stat());
                }
            } else {
                selector.skip();
            }
        }

        if let Some(outro) = pick_bookend(&pool.outros, policy.outro_omit_probability, rng) {
            sequence.push(Segment::new(outro.clone()));
        }
        sequence
    }

    fn transition_segment(&self, transition: Asset) -> Segment {
        match (self.policy.max_transition_secs, transition.duration_secs) {
            (Some(max), Some(full)) if full > max => Segment::trimmed(
                transition,
                Trim {
                    start_secs: 0.0,
                    duration_secs: max,
                },
            ),
            _ => Segment::new(transition),
        }
    }
}

/// Free-function form of [`Sequencer::build_sequences`].
pub fn build_sequences<R: Rng + ?Sized>(
    ready_clips: &[Asset],
    pool: &AssetPool,
    count: usize,
    policy: &SequencingPolicy,
    rng: &mut R,
) -> StitchResult<SequencingOutcome> {
    Sequencer::new(policy.clone()).build_sequences(ready_clips, pool, count, rng)
}

fn pick_bookend<'a, R: Rng + ?Sized>(
    candidates: &'a [Asset],
    omit_probability: f64,
    rng: &mut R,
) -> Option<&'a Asset> {
    if candidates.is_empty() {
        return None;
    }
    if omit_probability > 0.0 && rng.random::<f64>() < omit_probability {
        return None;
    }
    candidates.choose(rng)
}
