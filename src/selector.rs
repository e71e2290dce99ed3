//! Weighted random selection with anti-repeat and artist-diversity filtering.
//!
//! This is the only place randomness enters the rotation. The random source
//! is a parameter so production code can pass an entropy-seeded RNG and tests
//! can pass a fixed sequence.

use crate::algorithm;
use crate::catalog::{Millis, TrackCandidate, TrackId};
use crate::config::{SelectionConfig, WeightConfig};
use rand::Rng;
use std::collections::HashSet;

/// Track ids and artists that should not be picked right now.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exclusions {
    pub track_ids: HashSet<TrackId>,
    pub artist_ids: HashSet<String>,
}

impl Exclusions {
    #[must_use]
    pub fn excludes(&self, candidate: &TrackCandidate) -> bool {
        self.track_ids.contains(&candidate.id) || self.artist_ids.contains(&candidate.artist_id)
    }
}

/// Pick one candidate.
///
/// Candidates matching `exclusions` are filtered out first. When that leaves
/// nothing, a catalog of at least `anti_repeat_threshold` tracks is
/// considered exhausted and `None` is returned; a smaller catalog cannot
/// sustain anti-repeat, so filtering is dropped for this call instead.
///
/// Returns `None` for an empty candidate list.
pub fn select<'a, R: Rng + ?Sized>(
    candidates: &'a [TrackCandidate],
    exclusions: &Exclusions,
    now: Millis,
    selection: &SelectionConfig,
    weights: &WeightConfig,
    rng: &mut R,
) -> Option<&'a TrackCandidate> {
    if candidates.is_empty() {
        return None;
    }

    let filtered: Vec<&TrackCandidate> = candidates
        .iter()
        .filter(|c| !exclusions.excludes(c))
        .collect();

    let eligible = if !filtered.is_empty() {
        filtered
    } else if candidates.len() >= selection.anti_repeat_threshold {
        log::debug!(
            "Selection exhausted: all {} candidates excluded",
            candidates.len()
        );
        return None;
    } else {
        log::debug!(
            "Catalog of {} below anti-repeat threshold {}, ignoring exclusions",
            candidates.len(),
            selection.anti_repeat_threshold
        );
        candidates.iter().collect()
    };

    // One `now` for the whole draw.
    let candidate_weights: Vec<f64> = eligible
        .iter()
        .map(|c| algorithm::candidate_weight(c, now, weights))
        .collect();

    let index = pick_weighted(&candidate_weights, rng);
    log::trace!(
        "Picked {} of {} eligible (weight {:.4})",
        eligible[index].id,
        eligible.len(),
        candidate_weights[index]
    );
    Some(eligible[index])
}

/// Draw an index with probability proportional to its weight.
///
/// Builds the cumulative sums, draws `r` from `[0, total)` and returns the
/// first index whose cumulative sum is `>= r`. A non-positive or non-finite
/// total falls back to a uniform draw.
///
/// # Panics
///
/// Panics if `weights` is empty.
pub fn pick_weighted<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> usize {
    assert!(!weights.is_empty(), "pick_weighted needs at least one weight");

    let cumulative: Vec<f64> = weights
        .iter()
        .scan(0.0, |sum, &w| {
            *sum += w;
            Some(*sum)
        })
        .collect();
    let total = cumulative[cumulative.len() - 1];

    if total.is_nan() || total <= 0.0 || total.is_infinite() {
        log::warn!("Total selection weight {total} unusable, drawing uniformly");
        return rng.gen_range(0..weights.len());
    }

    let r = rng.gen::<f64>() * total;
    cumulative
        .partition_point(|&c| c < r)
        .min(cumulative.len() - 1)
}
