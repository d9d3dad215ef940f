//! Segments and sequences: the ordered timeline of one compilation.
//!
//! A [`Sequence`] owns no files. It only references normalized assets in
//! the order they will be concatenated. The static bumper must sit
//! immediately before and after every clip, and intro/outro may appear at
//! most once, at the very ends.

use serde::{Deserialize, Serialize};

use crate::asset::{Asset, AssetKind};
use crate::ModelError;

/// Optional trim applied to a segment (used for long transitions).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trim {
    /// Offset into the asset, in seconds.
    pub start_secs: f64,
    /// Length to keep, in seconds.
    pub duration_secs: f64,
}

/// One element of a compilation timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub asset: Asset,
    #[serde(default)]
    pub trim: Option<Trim>,
}

impl Segment {
    pub fn new(asset: Asset) -> Self {
        Self { asset, trim: None }
    }

    pub fn trimmed(asset: Asset, trim: Trim) -> Self {
        Self {
            asset,
            trim: Some(trim),
        }
    }

    pub fn kind(&self) -> AssetKind {
        self.asset.kind
    }

    /// Playback length of this segment, if known.
    pub fn duration_secs(&self) -> Option<f64> {
        match (self.trim, self.asset.duration_secs) {
            (Some(trim), Some(full)) => Some(trim.duration_secs.min((full - trim.start_secs).max(0.0))),
            (Some(trim), None) => Some(trim.duration_secs),
            (None, full) => full,
        }
    }
}

/// Ordered segment list for exactly one compilation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    /// Index of the compilation this sequence belongs to.
    pub index: usize,
    segments: Vec<Segment>,
}

impl Sequence {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            segments: Vec::new(),
        }
    }

    /// Append a segment. Segments are immutable once placed.
    pub fn push(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn kinds(&self) -> Vec<AssetKind> {
        self.segments.iter().map(Segment::kind).collect()
    }

    pub fn clip_count(&self) -> usize {
        self.count(AssetKind::Clip)
    }

    pub fn count(&self, kind: AssetKind) -> usize {
        self.segments.iter().filter(|s| s.kind() == kind).count()
    }

    /// Clip names in timeline order.
    pub fn clip_names(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter(|s| s.kind() == AssetKind::Clip)
            .map(|s| s.asset.name.as_str())
            .collect()
    }

    /// Sum of segment durations, or `None` if any duration is unknown.
    pub fn total_duration_secs(&self) -> Option<f64> {
        self.segments.iter().map(Segment::duration_secs).sum()
    }

    /// Check the sequencing invariants.
    pub fn validate(&self) -> Result<(), ModelError> {
        let violation = |message: String| ModelError::SequenceViolation {
            index: self.index,
            message,
        };
        let last = self.segments.len().saturating_sub(1);

        for (pos, segment) in self.segments.iter().enumerate() {
            if !segment.asset.normalized {
                return Err(violation(format!(
                    "segment {pos} ({}) is not normalized",
                    segment.asset.name
                )));
            }
            match segment.kind() {
                AssetKind::Clip => {
                    let before = pos.checked_sub(1).and_then(|p| self.segments.get(p));
                    let after = self.segments.get(pos + 1);
                    for (side, neighbour) in [("before", before), ("after", after)] {
                        if neighbour.map(Segment::kind) != Some(AssetKind::Static) {
                            return Err(violation(format!(
                                "clip {} at {pos} has no static {side} it",
                                segment.asset.name
                            )));
                        }
                    }
                }
                AssetKind::Intro if pos != 0 => {
                    return Err(violation(format!("intro at position {pos}")));
                }
                AssetKind::Outro if pos != last => {
                    return Err(violation(format!("outro at position {pos}")));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(name: &str, kind: AssetKind) -> Asset {
        Asset::discovered(name, kind, format!("/src/{name}")).normalized_as(
            format!("/cache/{name}"),
            true,
            Some(2.0),
        )
    }

    fn seq(kinds: &[AssetKind]) -> Sequence {
        let mut s = Sequence::new(0);
        for (i, k) in kinds.iter().enumerate() {
            s.push(Segment::new(asset(&format!("{k}{i}"), *k)));
        }
        s
    }

    #[test]
    fn test_valid_sequence() {
        use AssetKind::*;
        let s = seq(&[Intro, Static, Clip, Static, Transition, Static, Clip, Static, Outro]);
        s.validate().unwrap();
        assert_eq!(s.clip_count(), 2);
        assert_eq!(s.total_duration_secs(), Some(18.0));
    }

    #[test]
    fn test_clip_without_static_is_rejected() {
        use AssetKind::*;
        assert!(seq(&[Clip, Static]).validate().is_err());
        assert!(seq(&[Static, Clip, Transition]).validate().is_err());
        assert!(seq(&[Static, Clip]).validate().is_err());
    }

    #[test]
    fn test_intro_outro_must_be_at_ends() {
        use AssetKind::*;
        assert!(seq(&[Static, Intro, Static, Clip, Static]).validate().is_err());
        assert!(seq(&[Static, Clip, Static, Outro, Static]).validate().is_err());
    }

    #[test]
    fn test_unnormalized_segment_is_rejected() {
        let mut s = Sequence::new(3);
        s.push(Segment::new(Asset::discovered("s", AssetKind::Static, "/s")));
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("not normalized"));
    }

    #[test]
    fn test_trim_limits_duration() {
        let a = asset("t", AssetKind::Transition);
        let seg = Segment::trimmed(
            a,
            Trim {
                start_secs: 1.5,
                duration_secs: 5.0,
            },
        );
        assert_eq!(seg.duration_secs(), Some(0.5));
    }

    proptest::proptest! {
        #[test]
        fn prop_wrapped_clips_always_validate(
            picks in proptest::collection::vec(0u8..3, 0..24),
        ) {
            use AssetKind::*;
            let mut kinds = Vec::new();
            for pick in picks {
                match pick {
                    0 => kinds.extend([Static, Clip, Static]),
                    1 => kinds.push(Transition),
                    _ => kinds.push(Static),
                }
            }
            proptest::prop_assert!(seq(&kinds).validate().is_ok());

            // A transition straight after the last clip breaks the timeline.
            if let Some(pos) = kinds.iter().rposition(|k| *k == Clip) {
                kinds[pos + 1] = Transition;
                proptest::prop_assert!(seq(&kinds).validate().is_err());
            }
        }
    }

    #[test]
    fn test_unknown_duration_propagates() {
        let mut s = Sequence::new(0);
        s.push(Segment::new(
            Asset::discovered("s", AssetKind::Static, "/s").normalized_as("/c/s", true, None),
        ));
        assert_eq!(s.total_duration_secs(), None);
    }
}
