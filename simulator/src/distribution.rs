//! Scalar distribution records.
//!
//! A [`DistributionRecord`] declares how one scalar parameter is drawn:
//! uniformly over a range, from a normal distribution, or fixed to a
//! constant. Records are immutable; they are read when sampling, when bounding
//! lookup tables, and when normalizing truth labels, so the same record that
//! generated a value is always the one that normalizes it.
//!
//! # Fixed-width encoding
//!
//! Records also round-trip through a 7-slot numeric layout,
//!
//! ```text
//! [is_uniform, uniform_min, uniform_max, is_normal, normal_mean, normal_std, constant]
//! ```
//!
//! where at most one of the two flags is set and a record with neither flag
//! set is a constant. Slots belonging to the inactive kinds must be zero.

use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rng_key::RngKey;

/// Width of the normal window used by [`DistributionRecord::decode_minimum`]
/// and [`DistributionRecord::decode_maximum`], in standard deviations.
pub const NORMAL_BOUND_SIGMAS: f64 = 5.0;

/// Errors from constructing, decoding or normalizing against a record
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DistributionError {
    #[error("uniform minimum {min} exceeds maximum {max}")]
    InvertedRange { min: f64, max: f64 },
    #[error("normal standard deviation must be non-negative, got {0}")]
    NegativeStd(f64),
    #[error("distribution parameter is not finite: {0}")]
    NonFinite(f64),
    #[error("encoding flags must be 0 or 1 with at most one set, got uniform={uniform} normal={normal}")]
    InvalidFlags { uniform: f64, normal: f64 },
    #[error("inactive encoding slot {slot} must be 0, got {value}")]
    InactiveSlot { slot: usize, value: f64 },
    #[error("cannot normalize against zero-width uniform range [{0}, {0}]")]
    DegenerateUniform(f64),
    #[error("cannot normalize against normal with zero standard deviation (mean {0})")]
    DegenerateNormal(f64),
    #[error("normalized value is not finite for input {0}")]
    NonFiniteResult(f64),
}

/// Declarative distribution for one scalar parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", try_from = "RawRecord")]
pub enum DistributionRecord {
    Uniform { min: f64, max: f64 },
    Normal { mean: f64, std: f64 },
    Constant { value: f64 },
}

/// Unvalidated serde image of a record.
#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum RawRecord {
    Uniform { min: f64, max: f64 },
    Normal { mean: f64, std: f64 },
    Constant { value: f64 },
}

impl TryFrom<RawRecord> for DistributionRecord {
    type Error = DistributionError;

    fn try_from(raw: RawRecord) -> Result<Self, Self::Error> {
        match raw {
            RawRecord::Uniform { min, max } => encode_uniform(min, max),
            RawRecord::Normal { mean, std } => encode_normal(mean, std),
            RawRecord::Constant { value } => encode_constant(value),
        }
    }
}

fn finite(value: f64) -> Result<f64, DistributionError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DistributionError::NonFinite(value))
    }
}

/// Record for a uniform distribution over `[minimum, maximum]`.
pub fn encode_uniform(minimum: f64, maximum: f64) -> Result<DistributionRecord, DistributionError> {
    let (min, max) = (finite(minimum)?, finite(maximum)?);
    if min > max {
        return Err(DistributionError::InvertedRange { min, max });
    }
    Ok(DistributionRecord::Uniform { min, max })
}

/// Record for a normal distribution with the given mean and standard deviation.
pub fn encode_normal(mean: f64, std: f64) -> Result<DistributionRecord, DistributionError> {
    let (mean, std) = (finite(mean)?, finite(std)?);
    if std < 0.0 {
        return Err(DistributionError::NegativeStd(std));
    }
    Ok(DistributionRecord::Normal { mean, std })
}

/// Record for a fixed value.
pub fn encode_constant(value: f64) -> Result<DistributionRecord, DistributionError> {
    Ok(DistributionRecord::Constant {
        value: finite(value)?,
    })
}

impl DistributionRecord {
    /// Check the invariants of a record built directly from its variants.
    pub fn validate(&self) -> Result<(), DistributionError> {
        match *self {
            DistributionRecord::Uniform { min, max } => encode_uniform(min, max).map(|_| ()),
            DistributionRecord::Normal { mean, std } => encode_normal(mean, std).map(|_| ()),
            DistributionRecord::Constant { value } => encode_constant(value).map(|_| ()),
        }
    }

    /// The fixed 7-slot numeric layout of this record.
    pub fn to_encoding(&self) -> [f64; 7] {
        match *self {
            DistributionRecord::Uniform { min, max } => [1.0, min, max, 0.0, 0.0, 0.0, 0.0],
            DistributionRecord::Normal { mean, std } => [0.0, 0.0, 0.0, 1.0, mean, std, 0.0],
            DistributionRecord::Constant { value } => [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, value],
        }
    }

    /// Upper bound of the distribution.
    ///
    /// Normal distributions are unbounded; this returns `mean + 5 std`, an
    /// approximation that covers all but a ~3e-7 tail.
    pub fn decode_maximum(&self) -> f64 {
        match *self {
            DistributionRecord::Uniform { max, .. } => max,
            DistributionRecord::Normal { mean, std } => mean + NORMAL_BOUND_SIGMAS * std,
            DistributionRecord::Constant { value } => value,
        }
    }

    /// Lower bound of the distribution, `mean - 5 std` for normals.
    pub fn decode_minimum(&self) -> f64 {
        match *self {
            DistributionRecord::Uniform { min, .. } => min,
            DistributionRecord::Normal { mean, std } => mean - NORMAL_BOUND_SIGMAS * std,
            DistributionRecord::Constant { value } => value,
        }
    }

    /// Draw one value using a generator seeded from `key`.
    ///
    /// Only the active variant consumes randomness; constants consume none.
    pub fn draw(&self, key: RngKey) -> f64 {
        match *self {
            DistributionRecord::Uniform { min, max } => {
                let u: f64 = key.rng().gen();
                u * (max - min) + min
            }
            DistributionRecord::Normal { mean, std } => {
                let z: f64 = key.rng().sample(StandardNormal);
                z * std + mean
            }
            DistributionRecord::Constant { value } => value,
        }
    }

    /// Map a value drawn from this distribution to a dimensionless label.
    ///
    /// Uniform values map to `[0, 1]`, normal values to their standard score,
    /// constants to `0`.
    pub fn normalize(&self, value: f64) -> Result<f64, DistributionError> {
        let normalized = match *self {
            DistributionRecord::Uniform { min, max } => {
                if max == min {
                    return Err(DistributionError::DegenerateUniform(min));
                }
                (value - min) / (max - min)
            }
            DistributionRecord::Normal { mean, std } => {
                if std == 0.0 {
                    return Err(DistributionError::DegenerateNormal(mean));
                }
                (value - mean) / std
            }
            DistributionRecord::Constant { .. } => 0.0,
        };

        if !normalized.is_finite() {
            return Err(DistributionError::NonFiniteResult(value));
        }
        Ok(normalized)
    }
}

impl TryFrom<[f64; 7]> for DistributionRecord {
    type Error = DistributionError;

    fn try_from(encoding: [f64; 7]) -> Result<Self, Self::Error> {
        let [is_uniform, u_min, u_max, is_normal, n_mean, n_std, constant] = encoding;
        let flag = |f: f64| f == 0.0 || f == 1.0;
        if !flag(is_uniform) || !flag(is_normal) || (is_uniform == 1.0 && is_normal == 1.0) {
            return Err(DistributionError::InvalidFlags {
                uniform: is_uniform,
                normal: is_normal,
            });
        }

        let active: &[usize] = if is_uniform == 1.0 {
            &[0, 1, 2]
        } else if is_normal == 1.0 {
            &[3, 4, 5]
        } else {
            &[6]
        };
        for (slot, &value) in encoding.iter().enumerate() {
            if !active.contains(&slot) && value != 0.0 {
                return Err(DistributionError::InactiveSlot { slot, value });
            }
        }

        if is_uniform == 1.0 {
            encode_uniform(u_min, u_max)
        } else if is_normal == 1.0 {
            encode_normal(n_mean, n_std)
        } else {
            encode_constant(constant)
        }
    }
}

/// Free-function form of [`DistributionRecord::normalize`].
pub fn normalize_param(value: f64, record: &DistributionRecord) -> Result<f64, DistributionError> {
    record.normalize(value)
}
