//! Selection weights for rotation candidates.
//!
//! A candidate's weight is the product of a recency term and a boost term:
//!
//! ```text
//! recency(age) = exp(-ln(2) / half_life * age)
//! boost(b)     = 1 + b / boost_unit
//! weight       = max(recency * boost, weight_floor)
//! ```
//!
//! A brand-new track has recency 1, a track one half-life old has 0.5. A
//! boost of exactly one `boost_unit` doubles the weight. The floor keeps
//! every candidate selectable no matter how old it is.
//!
//! Weights depend on `now` and on the live boost value, so they are computed
//! on every selection and never memoized.

use crate::catalog::{Millis, TrackCandidate};
use crate::config::WeightConfig;

/// Exponential decay rate per millisecond for the configured half-life.
#[inline]
#[must_use]
pub fn decay_rate(half_life_ms: i64) -> f64 {
    std::f64::consts::LN_2 / half_life_ms.max(1) as f64
}

/// Pure recency term; `age_ms` below zero is treated as zero.
#[inline]
#[must_use]
pub fn recency_weight(age_ms: i64, half_life_ms: i64) -> f64 {
    let age = age_ms.max(0) as f64;
    (-decay_rate(half_life_ms) * age).exp()
}

/// Boost multiplier, `1 + boost / boost_unit`. Negative boosts count as zero.
#[inline]
#[must_use]
pub fn boost_multiplier(boost_value: f64, boost_unit: f64) -> f64 {
    1.0 + boost_value.max(0.0) / boost_unit
}

/// Final selection weight for a candidate of the given age and boost.
///
/// # Examples
///
/// ```
/// use onair::algorithm::decay_weight;
/// use onair::config::WeightConfig;
///
/// let config = WeightConfig::default();
/// let fresh = decay_weight(0, 0.0, &config);
/// let old = decay_weight(config.half_life_ms, 0.0, &config);
///
/// assert!((fresh - 1.0).abs() < 1e-12);
/// assert!((old - 0.5).abs() < 1e-12);
/// ```
#[must_use]
pub fn decay_weight(age_ms: i64, boost_value: f64, config: &WeightConfig) -> f64 {
    let weight = recency_weight(age_ms, config.half_life_ms)
        * boost_multiplier(boost_value, config.boost_unit);

    // NaN from a degenerate boost_unit collapses to the floor as well.
    if weight.is_nan() {
        return config.weight_floor;
    }
    weight.max(config.weight_floor)
}

/// Weight of `candidate` evaluated at `now`.
#[must_use]
pub fn candidate_weight(candidate: &TrackCandidate, now: Millis, config: &WeightConfig) -> f64 {
    decay_weight(now.saturating_sub(candidate.created_at), candidate.boost_value, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY_MS: i64 = 86_400_000;

    #[test]
    fn test_newer_track_weighs_at_least_as_much() {
        let config = WeightConfig::default();
        let ages = [0, 1, 1_000, DAY_MS, 5 * DAY_MS, 30 * DAY_MS, 365 * DAY_MS];

        for boost in [0.0, 0.05, 1.0] {
            for pair in ages.windows(2) {
                let younger = decay_weight(pair[0], boost, &config);
                let older = decay_weight(pair[1], boost, &config);
                assert!(younger >= older, "age {} vs {} with boost {boost}", pair[0], pair[1]);
            }
        }
    }

    #[test]
    fn test_more_boost_weighs_strictly_more() {
        let config = WeightConfig::default();

        for age in [0, DAY_MS, 10 * DAY_MS, 40 * DAY_MS] {
            let plain = decay_weight(age, 0.0, &config);
            let tipped = decay_weight(age, 0.1, &config);
            let big = decay_weight(age, 2.5, &config);
            assert!(tipped > plain, "age {age}");
            assert!(big > tipped, "age {age}");
        }
    }

    #[test]
    fn test_half_life_halves_recency() {
        let config = WeightConfig::default();
        let fresh = decay_weight(0, 0.0, &config);
        let aged = decay_weight(config.half_life_ms, 0.0, &config);

        assert!((aged / fresh - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_one_boost_unit_doubles_weight() {
        let config = WeightConfig::default();
        let plain = decay_weight(DAY_MS, 0.0, &config);
        let boosted = decay_weight(DAY_MS, config.boost_unit, &config);

        assert!((boosted / plain - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_weight_never_reaches_zero() {
        let config = WeightConfig::default();

        for age in [0, DAY_MS, 1_000 * DAY_MS, i64::MAX / 2, i64::MAX] {
            let weight = decay_weight(age, 0.0, &config);
            assert!(weight > 0.0, "age {age}");
            assert!(weight.is_finite());
        }
        assert_eq!(decay_weight(i64::MAX, 0.0, &config), config.weight_floor);
    }

    #[test]
    fn test_future_creation_time_counts_as_new() {
        let config = WeightConfig::default();
        assert_eq!(decay_weight(-5_000, 0.0, &config), decay_weight(0, 0.0, &config));
    }

    #[test]
    fn test_degenerate_boost_unit_falls_back_to_floor() {
        let config = WeightConfig {
            boost_unit: 0.0,
            ..WeightConfig::default()
        };
        // 0 / 0 is NaN
        assert_eq!(decay_weight(0, 0.0, &config), config.weight_floor);
    }

    #[test]
    fn test_candidate_weight_uses_age_at_now() {
        let config = WeightConfig::default();
        let candidate = TrackCandidate {
            id: 1,
            created_at: 1_000,
            boost_value: 0.0,
            artist_id: "a".to_string(),
            duration_ms: 1_000,
        };

        let weight = candidate_weight(&candidate, 1_000 + config.half_life_ms, &config);
        assert!((weight - 0.5).abs() < 1e-12);
    }
}
