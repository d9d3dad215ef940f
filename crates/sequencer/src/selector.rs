//! Weighted transition selection with a cooldown window.
//!
//! The selector sees every gap between two consecutive clips as a *slot*.
//! For each slot the caller either asks for a transition ([`TransitionSelector::choose`])
//! or records that the slot stays empty ([`TransitionSelector::skip`]). The
//! last `cooldown` slots, empty ones included, form the window: a
//! transition placed in any of them is not eligible again until it slides
//! out.

use std::collections::{BTreeMap, VecDeque};

use clipstitch_model::Asset;
use rand::Rng;

/// Stateful transition picker for one compilation.
#[derive(Debug, Clone)]
pub struct TransitionSelector {
    candidates: Vec<Candidate>,
    cooldown: usize,
    window: VecDeque<Option<String>>,
}

#[derive(Debug, Clone)]
struct Candidate {
    asset: Asset,
    weight: f64,
}

impl TransitionSelector {
    /// Build a selector over `transitions`.
    ///
    /// Weights come from `weights` keyed by asset name, falling back to the
    /// asset's own weight. Candidates with non-positive weights are ignored
    /// unless every weight is non-positive, in which case all candidates
    /// are picked uniformly.
    pub fn new(transitions: &[Asset], weights: &BTreeMap<String, f64>, cooldown: usize) -> Self {
        let weighted: Vec<Candidate> = transitions
            .iter()
            .map(|asset| Candidate {
                weight: weights.get(&asset.name).copied().unwrap_or(asset.weight),
                asset: asset.clone(),
            })
            .collect();

        let any_positive = weighted.iter().any(|c| usable(c.weight));
        let candidates = if any_positive {
            weighted.into_iter().filter(|c| usable(c.weight)).collect()
        } else {
            weighted
                .into_iter()
                .map(|c| Candidate { weight: 1.0, ..c })
                .collect()
        };

        Self {
            candidates,
            cooldown,
            window: VecDeque::with_capacity(cooldown + 1),
        }
    }

    /// Whether any transition can ever be chosen.
    pub fn has_candidates(&self) -> bool {
        !self.candidates.is_empty()
    }

    /// Names currently held in the cooldown window, oldest first.
    pub fn recent(&self) -> impl Iterator<Item = &str> {
        self.window.iter().filter_map(|slot| slot.as_deref())
    }

    /// Fill the next slot with a weighted pick among eligible transitions.
    ///
    /// Returns `None` (and records an empty slot) when every candidate is
    /// cooling down.
    pub fn choose<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<Asset> {
        let eligible: Vec<&Candidate> = self
            .candidates
            .iter()
            .filter(|c| !self.window.iter().flatten().any(|n| *n == c.asset.name))
            .collect();

        let picked = pick_weighted(&eligible, rng).map(|c| c.asset.clone());
        self.record(picked.as_ref().map(|a| a.name.clone()));
        picked
    }

    /// Record a slot where no transition is placed.
    pub fn skip(&mut self) {
        self.record(None);
    }

    fn record(&mut self, slot: Option<String>) {
        if self.cooldown == 0 {
            return;
        }
        self.window.push_back(slot);
        while self.window.len() > self.cooldown {
            self.window.pop_front();
        }
    }
}

fn usable(weight: f64) -> bool {
    weight.is_finite() && weight > 0.0
}

fn pick_weighted<'a, R: Rng + ?Sized>(
    eligible: &[&'a Candidate],
    rng: &mut R,
) -> Option<&'a Candidate> {
    let total: f64 = eligible.iter().map(|c| c.weight).sum();
    if eligible.is_empty() || total <= 0.0 {
        return None;
    }
    let mut target = rng.random::<f64>() * total;
    for candidate in eligible {
        if target < candidate.weight {
            return Some(candidate);
        }
        target -= candidate.weight;
    }
    eligible.last().copied()
}
