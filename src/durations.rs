use rand::Rng;
use rand_distr::{Distribution, LogNormal, Normal, Triangular};
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::types::MIN_INTERVAL_HOURS;

/// Rejection attempts before a truncated-normal draw falls back to clamping.
const TRUNCATION_ATTEMPTS: usize = 64;

/// A duration distribution in hours, as written in scenario files.
///
/// Transport timings are usually given as triangular min/mode/max estimates;
/// clinical dwell times as log-normal or truncated normal fits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum DurationModel {
    Triangular { min: f64, mode: f64, max: f64 },
    /// ln-space parameters: median = exp(mu).
    LogNormal { mu: f64, sigma: f64 },
    TruncatedNormal { mean: f64, std_dev: f64, min: f64, max: f64 },
}

impl DurationModel {
    /// Log-normal with the given median in hours.
    pub fn log_normal_median(median: f64, sigma: f64) -> Self {
        DurationModel::LogNormal { mu: median.ln(), sigma }
    }

    /// Build the sampler once; parameters are validated here so sampling is total.
    pub fn sampler(&self, what: &str) -> Result<DurationSampler, ConfigurationError> {
        let invalid = |detail: String| ConfigurationError::InvalidDuration {
            what: what.to_string(),
            detail,
        };
        match *self {
            DurationModel::Triangular { min, mode, max } => {
                if !(min >= 0.0 && min <= mode && mode <= max && min < max) {
                    return Err(invalid(format!(
                        "triangular requires 0 <= min <= mode <= max and min < max, got ({min}, {mode}, {max})"
                    )));
                }
                let dist = Triangular::new(min, max, mode).map_err(|e| invalid(e.to_string()))?;
                Ok(DurationSampler::Triangular(dist))
            }
            DurationModel::LogNormal { mu, sigma } => {
                if !mu.is_finite() || !(sigma > 0.0) {
                    return Err(invalid(format!("log-normal requires finite mu and sigma > 0, got ({mu}, {sigma})")));
                }
                let dist = LogNormal::new(mu, sigma).map_err(|e| invalid(e.to_string()))?;
                Ok(DurationSampler::LogNormal(dist))
            }
            DurationModel::TruncatedNormal { mean, std_dev, min, max } => {
                if !(std_dev > 0.0 && min >= 0.0 && min < max && mean.is_finite()) {
                    return Err(invalid(format!(
                        "truncated normal requires std_dev > 0 and 0 <= min < max, got mean={mean} sd={std_dev} [{min}, {max}]"
                    )));
                }
                let normal = Normal::new(mean, std_dev).map_err(|e| invalid(e.to_string()))?;
                Ok(DurationSampler::TruncatedNormal { normal, min, max })
            }
        }
    }
}

/// Validated, ready-to-draw form of a [`DurationModel`].
#[derive(Debug, Clone)]
pub enum DurationSampler {
    Triangular(Triangular<f64>),
    LogNormal(LogNormal<f64>),
    TruncatedNormal { normal: Normal<f64>, min: f64, max: f64 },
}

impl DurationSampler {
    /// Draw a duration in hours. Never below [`MIN_INTERVAL_HOURS`].
    pub fn sample(&self, rng: &mut impl Rng) -> f64 {
        let raw = match self {
            DurationSampler::Triangular(dist) => dist.sample(rng),
            DurationSampler::LogNormal(dist) => dist.sample(rng),
            DurationSampler::TruncatedNormal { normal, min, max } => {
                let mut drawn = None;
                for _ in 0..TRUNCATION_ATTEMPTS {
                    let x = normal.sample(rng);
                    if x >= *min && x <= *max {
                        drawn = Some(x);
                        break;
                    }
                }
                drawn.unwrap_or_else(|| normal.mean().clamp(*min, *max))
            }
        };
        raw.max(MIN_INTERVAL_HOURS)
    }
}
