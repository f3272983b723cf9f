//! Weight sampling for freshly created connections and gates.
//!
//! Every new weight in the engine (table connections, gate weights,
//! range-connection matrices) is drawn through a [`WeightSampler`]. The
//! sampling policy is pluggable; [`RandomWeightSampler`] is the seeded default
//! and any `FnMut(&WeightBounds) -> f64` closure also works, which is what the
//! tests use to pin exact values.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Bounds and zero-bias for a sampled weight.
///
/// `closest_to_zero` is a non-negative pull toward zero: 0 samples the
/// magnitude uniformly, larger values concentrate samples near zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightBounds {
    pub min: f64,
    pub max: f64,
    pub closest_to_zero: f64,
}

impl WeightBounds {
    /// Validated bounds. `min == max` is allowed and pins every sample.
    pub fn new(min: f64, max: f64, closest_to_zero: f64) -> Result<Self> {
        let bounds = Self { min, max, closest_to_zero };
        bounds.validate()?;
        Ok(bounds)
    }

    /// Finite values, `min <= max` and `closest_to_zero >= 0`. Every
    /// constructor that samples weights checks this first.
    pub fn validate(&self) -> Result<()> {
        let finite = self.min.is_finite() && self.max.is_finite() && self.closest_to_zero.is_finite();
        if !finite || self.min > self.max || self.closest_to_zero < 0.0 {
            return Err(EngineError::InvalidWeightBounds {
                min: self.min,
                max: self.max,
                closest_to_zero: self.closest_to_zero,
            });
        }
        Ok(())
    }

    /// Whether `value` lies inside `[min, max]`.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

impl Default for WeightBounds {
    fn default() -> Self {
        use crate::config::defaults::{DEFAULT_CLOSEST_TO_ZERO, DEFAULT_MAX_WEIGHT, DEFAULT_MIN_WEIGHT};
        Self {
            min: DEFAULT_MIN_WEIGHT,
            max: DEFAULT_MAX_WEIGHT,
            closest_to_zero: DEFAULT_CLOSEST_TO_ZERO,
        }
    }
}

/// Source of initial weight values.
pub trait WeightSampler {
    fn sample(&mut self, bounds: &WeightBounds) -> f64;
}

impl<F> WeightSampler for F
where
    F: FnMut(&WeightBounds) -> f64,
{
    fn sample(&mut self, bounds: &WeightBounds) -> f64 {
        self(bounds)
    }
}

/// Seeded sampler biased toward zero.
///
/// When the bounds straddle zero the sign is chosen with probability
/// proportional to the extent on each side; otherwise values grow away from
/// the bound nearest to zero. The magnitude fraction is drawn from
/// `Beta(1, 1 + closest_to_zero)`.
#[derive(Debug, Clone)]
pub struct RandomWeightSampler {
    rng: StdRng,
}

impl RandomWeightSampler {
    /// Same seed, same sequence of weights.
    pub fn new(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }

    fn fraction(&mut self, closest_to_zero: f64) -> f64 {
        match Beta::new(1.0, 1.0 + closest_to_zero.max(0.0)) {
            Ok(beta) => beta.sample(&mut self.rng),
            Err(_) => self.rng.gen::<f64>(),
        }
    }
}

impl WeightSampler for RandomWeightSampler {
    fn sample(&mut self, bounds: &WeightBounds) -> f64 {
        let (min, max) = (bounds.min, bounds.max);
        if max <= min {
            return min;
        }
        let frac = self.fraction(bounds.closest_to_zero);

        let value = if min < 0.0 && max > 0.0 {
            let p_negative = -min / (max - min);
            if self.rng.gen_bool(p_negative.clamp(0.0, 1.0)) {
                min * frac
            } else {
                max * frac
            }
        } else if min >= 0.0 {
            min + (max - min) * frac
        } else {
            max - (max - min) * frac
        };

        value.clamp(min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_stay_in_bounds() {
        let mut sampler = RandomWeightSampler::new(42);
        for bounds in [
            WeightBounds { min: -1.0, max: 1.0, closest_to_zero: 0.0 },
            WeightBounds { min: -0.2, max: 3.0, closest_to_zero: 4.0 },
            WeightBounds { min: 0.5, max: 2.0, closest_to_zero: 1.0 },
            WeightBounds { min: -4.0, max: -1.0, closest_to_zero: 2.0 },
        ] {
            for _ in 0..500 {
                let w = sampler.sample(&bounds);
                assert!(bounds.contains(w), "{w} outside {bounds:?}");
            }
        }
    }

    #[test]
    fn test_deterministic_for_seed() {
        let bounds = WeightBounds::default();
        let mut a = RandomWeightSampler::new(7);
        let mut b = RandomWeightSampler::new(7);
        for _ in 0..20 {
            assert_eq!(a.sample(&bounds), b.sample(&bounds));
        }
    }

    #[test]
    fn test_closest_to_zero_pulls_magnitude_down() {
        let uniform = WeightBounds { min: -1.0, max: 1.0, closest_to_zero: 0.0 };
        let biased = WeightBounds { min: -1.0, max: 1.0, closest_to_zero: 8.0 };
        let mut sampler = RandomWeightSampler::new(3);

        let mean_abs = |sampler: &mut RandomWeightSampler, b: &WeightBounds| {
            (0..2000).map(|_| sampler.sample(b).abs()).sum::<f64>() / 2000.0
        };
        let m_uniform = mean_abs(&mut sampler, &uniform);
        let m_biased = mean_abs(&mut sampler, &biased);
        assert!(m_biased < m_uniform * 0.5, "biased {m_biased} vs uniform {m_uniform}");
    }

    #[test]
    fn test_degenerate_bounds_return_min() {
        let mut sampler = RandomWeightSampler::new(1);
        let bounds = WeightBounds { min: 0.25, max: 0.25, closest_to_zero: 0.0 };
        assert_eq!(sampler.sample(&bounds), 0.25);
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        assert!(WeightBounds::new(1.0, -1.0, 0.0).is_err());
        assert!(WeightBounds::new(-1.0, 1.0, -0.5).is_err());
        assert!(WeightBounds::new(f64::NAN, 1.0, 0.0).is_err());
        assert!(WeightBounds::new(-1.0, 1.0, 0.5).is_ok());
        assert!(WeightBounds::new(0.25, 0.25, 0.0).is_ok());
    }

    #[test]
    fn test_closure_sampler() {
        let mut constant = |_: &WeightBounds| 0.5;
        assert_eq!(constant.sample(&WeightBounds::default()), 0.5);
    }
}
