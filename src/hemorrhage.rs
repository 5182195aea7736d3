//! Blood-volume kinetics for bleeding-capable wounds.
//!
//! Hazard is expressed per hour: `0.6 · (α₀ + k·s)` where α₀ and k are the
//! band's per-minute percentages and `s` is hours since wounding. Closed forms
//! are used throughout, so blood volume and the exact crossing of the
//! exsanguination threshold are computed without time-stepping.

use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use serde::{Deserialize, Serialize};

use crate::durations::{DurationModel, DurationSampler};
use crate::error::{ConfigurationError, SimulationInvariantError};
use crate::types::{Facility, InjuryMechanism, Triage};

/// Blood-volume fraction below which the casualty has exsanguinated.
pub const EXSANGUINATION_THRESHOLD: f64 = 0.40;

/// Converts per-minute percentage rates to an hourly hazard.
pub const HAZARD_SCALE: f64 = 0.6;

/// Cumulative hazard at which blood volume reaches the threshold.
fn lethal_hazard() -> f64 {
    (1.0 / EXSANGUINATION_THRESHOLD).ln()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WoundBand {
    SmallLimb,
    MajorLimbArtery,
    Torso,
    MultiplePenetrating,
    Massive,
}

impl WoundBand {
    /// Range of α₀; the lower bound is exclusive.
    pub fn alpha_range(self) -> (f64, f64) {
        match self {
            WoundBand::SmallLimb => (0.1, 0.3),
            WoundBand::MajorLimbArtery => (2.0, 5.0),
            WoundBand::Torso => (0.5, 2.0),
            WoundBand::MultiplePenetrating => (1.0, 3.0),
            WoundBand::Massive => (10.0, 15.0),
        }
    }

    pub fn progression(self) -> f64 {
        match self {
            WoundBand::SmallLimb => 0.02,
            WoundBand::MajorLimbArtery => 0.05,
            WoundBand::Torso => 0.1,
            WoundBand::MultiplePenetrating => 0.15,
            WoundBand::Massive => 0.3,
        }
    }

    /// Extremity wounds only.
    pub fn tourniquet_controllable(self) -> bool {
        matches!(self, WoundBand::SmallLimb | WoundBand::MajorLimbArtery)
    }
}

/// Wound-band weights for a bleeding-capable mechanism at a given triage.
/// Empty for mechanisms that do not bleed.
pub fn band_weights(mechanism: InjuryMechanism, triage: Triage) -> Vec<(WoundBand, f64)> {
    use WoundBand::*;
    match mechanism {
        InjuryMechanism::Penetrating | InjuryMechanism::Blast => match triage {
            Triage::T1 => vec![(MajorLimbArtery, 25.0), (Torso, 30.0), (MultiplePenetrating, 25.0), (Massive, 20.0)],
            Triage::T2 => vec![(SmallLimb, 45.0), (MajorLimbArtery, 35.0), (Torso, 15.0), (MultiplePenetrating, 5.0)],
            Triage::T3 => vec![(SmallLimb, 95.0), (MajorLimbArtery, 5.0)],
        },
        InjuryMechanism::Blunt => match triage {
            Triage::T1 => vec![(Torso, 60.0), (MultiplePenetrating, 20.0), (Massive, 20.0)],
            Triage::T2 => vec![(SmallLimb, 50.0), (Torso, 40.0), (MajorLimbArtery, 10.0)],
            Triage::T3 => vec![(SmallLimb, 100.0)],
        },
        InjuryMechanism::Burn | InjuryMechanism::Chemical | InjuryMechanism::Disease => Vec::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HemorrhageConfig {
    /// Chance a controllable wound gets a tourniquet before evacuation.
    pub buddy_aid_probability: f64,
    pub buddy_aid_delay: DurationModel,
    /// Hours for residual bleeding alone to take a full blood volume to the
    /// threshold.
    pub residual_horizon_hours: f64,
    /// Arrival here arrests any bleeding. `None` disables surgical control.
    pub control_facility: Option<Facility>,
}

impl Default for HemorrhageConfig {
    fn default() -> Self {
        HemorrhageConfig {
            buddy_aid_probability: 0.9,
            buddy_aid_delay: DurationModel::Triangular { min: 0.02, mode: 0.08, max: 0.25 },
            residual_horizon_hours: 96.0,
            control_facility: Some(Facility::Role2),
        }
    }
}

impl HemorrhageConfig {
    pub fn residual_rate(&self) -> f64 {
        lethal_hazard() / self.residual_horizon_hours
    }
}

/// Per-casualty bleeding parameters, fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HemorrhageProfile {
    pub band: WoundBand,
    pub alpha0: f64,
    pub k: f64,
    pub tourniquet_controllable: bool,
    /// Hours after wounding; only ever set on controllable wounds.
    pub tourniquet_at: Option<f64>,
    /// Post-control residual hazard, per hour.
    pub residual_rate: f64,
}

impl HemorrhageProfile {
    /// Cumulative uncontrolled hazard at `t` hours.
    fn uncontrolled_hazard(&self, t: f64) -> f64 {
        HAZARD_SCALE * (self.alpha0 * t + 0.5 * self.k * t * t)
    }

    /// Blood-volume fraction at `t`, with bleeding arrested from `arrest_at`.
    pub fn blood_volume(&self, t: f64, arrest_at: Option<f64>) -> f64 {
        let mut t = t.max(0.0);
        if let Some(d) = arrest_at {
            t = t.min(d);
        }
        let hazard = match self.tourniquet_at {
            Some(c) if t > c => self.uncontrolled_hazard(c) + self.residual_rate * (t - c),
            _ => self.uncontrolled_hazard(t),
        };
        (-hazard).exp()
    }

    /// Time at which uncontrolled bleeding alone reaches the threshold.
    fn uncontrolled_crossing(&self) -> f64 {
        let target = lethal_hazard() / HAZARD_SCALE;
        if self.k > 0.0 {
            (-self.alpha0 + (self.alpha0 * self.alpha0 + 2.0 * self.k * target).sqrt()) / self.k
        } else if self.alpha0 > 0.0 {
            target / self.alpha0
        } else {
            f64::INFINITY
        }
    }

    /// Exact time the threshold is crossed, if it ever is.
    pub fn exsanguination_time(&self, arrest_at: Option<f64>) -> Option<f64> {
        let mut crossing = self.uncontrolled_crossing();
        if let Some(c) = self.tourniquet_at {
            if crossing > c {
                crossing = if self.residual_rate > 0.0 {
                    c + (lethal_hazard() - self.uncontrolled_hazard(c)) / self.residual_rate
                } else {
                    f64::INFINITY
                };
            }
        }
        match arrest_at {
            Some(d) if crossing >= d => None,
            _ if crossing.is_finite() => Some(crossing),
            _ => None,
        }
    }
}

/// Compiled hemorrhage parameters shared by every casualty in a run.
#[derive(Debug, Clone)]
pub struct HemorrhageModel {
    buddy_aid_probability: f64,
    buddy_aid_delay: DurationSampler,
    residual_rate: f64,
    control_facility: Option<Facility>,
}

impl HemorrhageModel {
    pub fn from_config(config: &HemorrhageConfig) -> Result<Self, ConfigurationError> {
        let p = config.buddy_aid_probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(ConfigurationError::Hemorrhage(format!("buddy aid probability {p} outside [0, 1]")));
        }
        let horizon = config.residual_horizon_hours;
        if !(horizon.is_finite() && horizon > 0.0) {
            return Err(ConfigurationError::Hemorrhage(format!("residual horizon must be positive, got {horizon}")));
        }
        if config.control_facility == Some(Facility::Poi) {
            return Err(ConfigurationError::Hemorrhage("surgical control cannot happen at POI".to_string()));
        }
        Ok(HemorrhageModel {
            buddy_aid_probability: p,
            buddy_aid_delay: config.buddy_aid_delay.sampler("buddy aid delay")?,
            residual_rate: config.residual_rate(),
            control_facility: config.control_facility,
        })
    }

    pub fn control_facility(&self) -> Option<Facility> {
        self.control_facility
    }

    /// Draw a profile, or `None` when the mechanism cannot bleed.
    pub fn assign(
        &self,
        mechanism: InjuryMechanism,
        triage: Triage,
        rng: &mut impl Rng,
    ) -> Result<Option<HemorrhageProfile>, SimulationInvariantError> {
        let weights = band_weights(mechanism, triage);
        if weights.is_empty() {
            return Ok(None);
        }
        let index = WeightedIndex::new(weights.iter().map(|(_, w)| *w))
            .map_err(|e| SimulationInvariantError::EmptyDistribution(format!("wound bands: {e}")))?;
        let band = weights[index.sample(rng)].0;

        let (lo, hi) = band.alpha_range();
        // (lo, hi]
        let alpha0 = lo + (hi - lo) * (1.0 - rng.random::<f64>());
        let controllable = band.tourniquet_controllable();
        let tourniquet_at = if controllable && rng.random::<f64>() < self.buddy_aid_probability {
            Some(self.buddy_aid_delay.sample(rng))
        } else {
            None
        };
        Ok(Some(HemorrhageProfile {
            band,
            alpha0,
            k: band.progression(),
            tourniquet_controllable: controllable,
            tourniquet_at,
            residual_rate: self.residual_rate,
        }))
    }
}

/// Result of a hemorrhage query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BloodStatus {
    /// `None` when the casualty has no profile.
    pub fraction: Option<f64>,
    pub exsanguinated: bool,
}

/// What the bleeding process did over a casualty's trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HemorrhageOutcome {
    pub definitive_control_at: Option<f64>,
    pub exsanguinated_at: Option<f64>,
    pub final_blood_volume: f64,
}

/// Runtime state of one casualty's bleeding, queried by the flow engine.
#[derive(Debug, Clone)]
pub struct HemorrhageTracker {
    profile: Option<HemorrhageProfile>,
    arrest_at: Option<f64>,
    latest: f64,
    exsanguinated: bool,
}

impl HemorrhageTracker {
    pub fn new(profile: Option<HemorrhageProfile>) -> Self {
        HemorrhageTracker { profile, arrest_at: None, latest: 0.0, exsanguinated: false }
    }

    pub fn is_tracking(&self) -> bool {
        self.profile.is_some()
    }

    /// Blood volume at `t`. Times earlier than a previous query are clamped
    /// to it, so the reported fraction never rises.
    pub fn query(&mut self, t: f64) -> BloodStatus {
        let t = t.max(self.latest);
        self.latest = t;
        let Some(profile) = &self.profile else {
            return BloodStatus { fraction: None, exsanguinated: false };
        };
        let fraction = profile.blood_volume(t, self.arrest_at);
        if fraction < EXSANGUINATION_THRESHOLD {
            self.exsanguinated = true;
        }
        BloodStatus { fraction: Some(fraction), exsanguinated: self.exsanguinated }
    }

    /// Surgical control at `t`. Ignored once exsanguinated or already arrested.
    pub fn arrest(&mut self, t: f64) {
        if self.profile.is_none() || self.exsanguinated || self.arrest_at.is_some() {
            return;
        }
        self.arrest_at = Some(t.max(self.latest));
    }

    pub fn outcome(&self) -> Option<HemorrhageOutcome> {
        let profile = self.profile.as_ref()?;
        let exsanguinated_at = if self.exsanguinated { profile.exsanguination_time(self.arrest_at) } else { None };
        Some(HemorrhageOutcome {
            definitive_control_at: self.arrest_at,
            exsanguinated_at,
            final_blood_volume: profile.blood_volume(self.latest, self.arrest_at),
        })
    }

    pub fn into_profile(self) -> Option<HemorrhageProfile> {
        self.profile
    }
}
