//! Warfare archetypes and the profile resolver.
//!
//! Each archetype is a variant of [`WarfareArchetype`] and answers the same
//! [`WarfareModel`] questions: when casualties happen during the day, how the
//! injury mix is skewed, which wounding mechanisms dominate, and how severe
//! the resulting triage mix is. [`resolve`] merges the weighted archetypes with
//! intensity, tempo, special events and environment into one
//! [`ResolvedProfile`] consumed by the rest of the pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{
    EnvironmentalModifiers, InjuryMix, InjuryShift, ScenarioConfig, SpecialEventKind, Tempo, Terrain, Weather,
};
use crate::error::ConfigurationError;
use crate::types::{HOURS_PER_DAY, InjuryCategory, InjuryMechanism, Triage};

/// Night-operations density boost applied between 20:00 and 05:00.
pub const NIGHT_OPS_DENSITY_FACTOR: f64 = 1.5;
/// Night-operations slowdown on every transit leg.
pub const NIGHT_OPS_TRANSIT_FACTOR: f64 = 1.25;
/// Length of the window inserted by `guaranteed_mass_casualty`.
pub const GUARANTEED_MASCAL_HOURS: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarfareArchetype {
    Conventional,
    Artillery,
    Urban,
    Guerrilla,
    Drone,
    Naval,
    Cbrn,
    Peacekeeping,
}

impl WarfareArchetype {
    pub const ALL: [WarfareArchetype; 8] = [
        WarfareArchetype::Conventional,
        WarfareArchetype::Artillery,
        WarfareArchetype::Urban,
        WarfareArchetype::Guerrilla,
        WarfareArchetype::Drone,
        WarfareArchetype::Naval,
        WarfareArchetype::Cbrn,
        WarfareArchetype::Peacekeeping,
    ];

    pub fn name(self) -> &'static str {
        match self {
            WarfareArchetype::Conventional => "conventional",
            WarfareArchetype::Artillery => "artillery",
            WarfareArchetype::Urban => "urban",
            WarfareArchetype::Guerrilla => "guerrilla",
            WarfareArchetype::Drone => "drone",
            WarfareArchetype::Naval => "naval",
            WarfareArchetype::Cbrn => "cbrn",
            WarfareArchetype::Peacekeeping => "peacekeeping",
        }
    }
}

impl fmt::Display for WarfareArchetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WarfareArchetype {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        WarfareArchetype::ALL
            .into_iter()
            .find(|a| a.name() == wanted)
            .ok_or_else(|| ConfigurationError::UnknownArchetype(s.to_string()))
    }
}

/// Relative arrival density over the day, before tempo and special events.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TemporalShape {
    /// `day` weight 06:00–18:00, `night` otherwise.
    Diurnal { day: f64, night: f64 },
    /// Peaks in the 04:00–07:00 and 17:00–20:00 bands.
    DawnDusk { band: f64, base: f64 },
    /// `on` weight 08:00–18:00.
    BusinessHours { on: f64, off: f64 },
    /// Repeating `burst_hours` of fire every `cycle_hours`, from battle start.
    Bombardment { cycle_hours: f64, burst_hours: f64, burst: f64, lull: f64 },
}

impl TemporalShape {
    pub fn weight_at(&self, t: f64) -> f64 {
        let hour = t.rem_euclid(HOURS_PER_DAY);
        match *self {
            TemporalShape::Diurnal { day, night } => {
                if (6.0..18.0).contains(&hour) { day } else { night }
            }
            TemporalShape::DawnDusk { band, base } => {
                if (4.0..7.0).contains(&hour) || (17.0..20.0).contains(&hour) { band } else { base }
            }
            TemporalShape::BusinessHours { on, off } => {
                if (8.0..18.0).contains(&hour) { on } else { off }
            }
            TemporalShape::Bombardment { cycle_hours, burst_hours, burst, lull } => {
                if t.rem_euclid(cycle_hours) < burst_hours { burst } else { lull }
            }
        }
    }
}

/// Multiplicative deltas on the base injury mix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InjuryMultipliers {
    pub disease: f64,
    pub non_battle: f64,
    pub battle: f64,
}

/// Battle wounding-mechanism weights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MechanismMix {
    pub penetrating: f64,
    pub blast: f64,
    pub blunt: f64,
    pub burn: f64,
    pub chemical: f64,
}

impl MechanismMix {
    pub fn entries(&self) -> [(InjuryMechanism, f64); 5] {
        [
            (InjuryMechanism::Penetrating, self.penetrating),
            (InjuryMechanism::Blast, self.blast),
            (InjuryMechanism::Blunt, self.blunt),
            (InjuryMechanism::Burn, self.burn),
            (InjuryMechanism::Chemical, self.chemical),
        ]
    }
}

/// Non-battle injuries are dominated by falls, vehicle accidents and burns,
/// regardless of archetype.
pub const NON_BATTLE_MECHANISMS: MechanismMix =
    MechanismMix { penetrating: 10.0, blast: 0.0, blunt: 75.0, burn: 15.0, chemical: 0.0 };

/// What every warfare archetype contributes to a resolved profile.
pub trait WarfareModel {
    fn temporal_shape(&self) -> TemporalShape;
    fn injury_multipliers(&self) -> InjuryMultipliers;
    fn battle_mechanisms(&self) -> MechanismMix;
    /// T1/T2/T3 weights for a given injury category.
    fn triage_skew(&self, injury: InjuryCategory) -> [f64; 3];
}

impl WarfareModel for WarfareArchetype {
    fn temporal_shape(&self) -> TemporalShape {
        use TemporalShape::*;
        match self {
            WarfareArchetype::Conventional => Diurnal { day: 1.3, night: 0.7 },
            WarfareArchetype::Artillery => {
                Bombardment { cycle_hours: 6.0, burst_hours: 1.5, burst: 4.0, lull: 0.4 }
            }
            WarfareArchetype::Urban => Diurnal { day: 1.2, night: 0.8 },
            WarfareArchetype::Guerrilla => DawnDusk { band: 3.0, base: 0.6 },
            WarfareArchetype::Drone => {
                Bombardment { cycle_hours: 4.0, burst_hours: 1.0, burst: 3.0, lull: 0.5 }
            }
            WarfareArchetype::Naval => Diurnal { day: 1.0, night: 1.0 },
            WarfareArchetype::Cbrn => {
                Bombardment { cycle_hours: 24.0, burst_hours: 2.0, burst: 6.0, lull: 0.5 }
            }
            WarfareArchetype::Peacekeeping => BusinessHours { on: 2.5, off: 0.3 },
        }
    }

    fn injury_multipliers(&self) -> InjuryMultipliers {
        let (disease, non_battle, battle) = match self {
            WarfareArchetype::Conventional => (1.0, 1.0, 1.0),
            WarfareArchetype::Artillery => (0.8, 0.9, 1.2),
            WarfareArchetype::Urban => (0.9, 1.2, 1.1),
            WarfareArchetype::Guerrilla => (1.1, 1.0, 0.9),
            WarfareArchetype::Drone => (0.9, 0.9, 1.2),
            WarfareArchetype::Naval => (0.9, 1.3, 0.9),
            WarfareArchetype::Cbrn => (1.6, 1.0, 0.9),
            WarfareArchetype::Peacekeeping => (1.5, 1.6, 0.4),
        };
        InjuryMultipliers { disease, non_battle, battle }
    }

    fn battle_mechanisms(&self) -> MechanismMix {
        let (penetrating, blast, blunt, burn, chemical) = match self {
            WarfareArchetype::Conventional => (45.0, 40.0, 10.0, 5.0, 0.0),
            WarfareArchetype::Artillery => (10.0, 75.0, 10.0, 5.0, 0.0),
            WarfareArchetype::Urban => (50.0, 35.0, 15.0, 0.0, 0.0),
            WarfareArchetype::Guerrilla => (30.0, 60.0, 10.0, 0.0, 0.0),
            WarfareArchetype::Drone => (10.0, 80.0, 0.0, 10.0, 0.0),
            WarfareArchetype::Naval => (5.0, 40.0, 20.0, 35.0, 0.0),
            WarfareArchetype::Cbrn => (10.0, 20.0, 0.0, 10.0, 60.0),
            WarfareArchetype::Peacekeeping => (40.0, 15.0, 45.0, 0.0, 0.0),
        };
        MechanismMix { penetrating, blast, blunt, burn, chemical }
    }

    fn triage_skew(&self, injury: InjuryCategory) -> [f64; 3] {
        match injury {
            InjuryCategory::Battle => match self {
                WarfareArchetype::Conventional => [20.0, 30.0, 50.0],
                WarfareArchetype::Artillery => [25.0, 35.0, 40.0],
                WarfareArchetype::Urban => [25.0, 40.0, 35.0],
                // IED-dominated
                WarfareArchetype::Guerrilla => [35.0, 35.0, 30.0],
                WarfareArchetype::Drone => [25.0, 35.0, 40.0],
                WarfareArchetype::Naval => [20.0, 35.0, 45.0],
                WarfareArchetype::Cbrn => [30.0, 40.0, 30.0],
                WarfareArchetype::Peacekeeping => [10.0, 30.0, 60.0],
            },
            InjuryCategory::NonBattle => match self {
                WarfareArchetype::Urban => [8.0, 27.0, 65.0],
                _ => [5.0, 25.0, 70.0],
            },
            InjuryCategory::Disease => match self {
                WarfareArchetype::Cbrn => [10.0, 30.0, 60.0],
                _ => [3.0, 17.0, 80.0],
            },
        }
    }
}

/// A resolved burst window `[start, end)` in battle hours.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpecialEventWindow {
    pub kind: SpecialEventKind,
    pub start: f64,
    pub end: f64,
    pub multiplier: f64,
}

impl SpecialEventWindow {
    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t < self.end
    }
}

fn tempo_factor(tempo: Tempo, t: f64, duration: f64) -> f64 {
    let f = (t / duration).clamp(0.0, 1.0);
    match tempo {
        Tempo::Sustained => 1.0,
        Tempo::Escalating => 0.5 + f,
        Tempo::Surge => 0.6 + 2.4 * (-((f - 0.5) / 0.15).powi(2)).exp(),
        Tempo::Declining => 1.5 - f,
        Tempo::Intermittent => {
            if (t / HOURS_PER_DAY).floor() as u64 % 2 == 0 { 1.5 } else { 0.5 }
        }
    }
}

fn is_night(t: f64) -> bool {
    let hour = t.rem_euclid(HOURS_PER_DAY);
    !(5.0..20.0).contains(&hour)
}

/// Arrival density over battle time (unnormalized).
#[derive(Debug, Clone, PartialEq)]
pub struct IntensityCurve {
    pub duration_hours: f64,
    components: Vec<(TemporalShape, f64)>,
    tempo: Tempo,
    night_operations: bool,
    windows: Vec<SpecialEventWindow>,
}

impl IntensityCurve {
    pub fn density(&self, t: f64) -> f64 {
        let base: f64 = self.components.iter().map(|(shape, w)| w * shape.weight_at(t)).sum();
        let night = if self.night_operations && is_night(t) { NIGHT_OPS_DENSITY_FACTOR } else { 1.0 };
        base * tempo_factor(self.tempo, t, self.duration_hours) * night * self.special_multiplier(t)
    }

    pub fn windows(&self) -> &[SpecialEventWindow] {
        &self.windows
    }

    /// Largest multiplier among windows covering `t`, or 1.0.
    pub fn special_multiplier(&self, t: f64) -> f64 {
        self.windows
            .iter()
            .filter(|w| w.contains(t))
            .map(|w| w.multiplier)
            .fold(1.0, f64::max)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedProfile {
    pub duration_hours: f64,
    pub curve: IntensityCurve,
    /// Archetypes with normalized, strictly positive weights.
    pub archetypes: Vec<(WarfareArchetype, f64)>,
    /// Warfare-adjusted injury mix, renormalized to 100.
    pub injury_mix: InjuryMix,
    pub t1_factor: f64,
    pub transit_multiplier: f64,
    pub special_events: Vec<SpecialEventWindow>,
}

impl ResolvedProfile {
    /// Triage weights for a casualty drawn from `archetype` with `injury`.
    pub fn triage_weights(&self, archetype: WarfareArchetype, injury: InjuryCategory) -> [(Triage, f64); 3] {
        let [t1, t2, t3] = archetype.triage_skew(injury);
        [(Triage::T1, t1 * self.t1_factor), (Triage::T2, t2), (Triage::T3, t3)]
    }
}

fn weather_shift(weather: Weather) -> InjuryShift {
    let (disease, non_battle) = match weather {
        Weather::Clear => (0.0, 0.0),
        Weather::Rain => (2.0, 2.0),
        Weather::Snow => (3.0, 4.0),
        Weather::ExtremeHeat => (6.0, 3.0),
        Weather::ExtremeCold => (5.0, 5.0),
    };
    InjuryShift { disease, non_battle, battle: 0.0 }
}

fn terrain_shift(terrain: Terrain) -> InjuryShift {
    let (disease, non_battle) = match terrain {
        Terrain::Open => (0.0, 0.0),
        Terrain::Urban => (0.0, 2.0),
        Terrain::Mountain => (0.0, 4.0),
        Terrain::Jungle => (5.0, 0.0),
        Terrain::Desert => (3.0, 0.0),
    };
    InjuryShift { disease, non_battle, battle: 0.0 }
}

/// Product of weather, terrain and night-operations transit slowdowns.
pub fn transit_multiplier(env: &EnvironmentalModifiers) -> f64 {
    let weather = match env.weather {
        Weather::Clear => 1.0,
        Weather::Rain => 1.15,
        Weather::Snow => 1.4,
        Weather::ExtremeHeat => 1.05,
        Weather::ExtremeCold => 1.3,
    };
    let terrain = match env.terrain {
        Terrain::Open => 1.0,
        Terrain::Urban => 1.2,
        Terrain::Mountain => 1.6,
        Terrain::Jungle => 1.5,
        Terrain::Desert => 1.1,
    };
    let night = if env.night_operations { NIGHT_OPS_TRANSIT_FACTOR } else { 1.0 };
    weather * terrain * night
}

fn normalized_archetypes(config: &ScenarioConfig) -> Result<Vec<(WarfareArchetype, f64)>, ConfigurationError> {
    if config.warfare.is_empty() {
        return Err(ConfigurationError::NoWarfare);
    }
    let mut merged: Vec<(WarfareArchetype, f64)> = Vec::new();
    for w in &config.warfare {
        if !w.weight.is_finite() || w.weight < 0.0 {
            return Err(ConfigurationError::InvalidWeight {
                what: format!("warfare archetype {} weight", w.archetype),
            });
        }
        match merged.iter_mut().find(|(a, _)| *a == w.archetype) {
            Some((_, acc)) => *acc += w.weight,
            None => merged.push((w.archetype, w.weight)),
        }
    }
    let total: f64 = merged.iter().map(|(_, w)| w).sum();
    if !(total > 0.0) {
        return Err(ConfigurationError::NonPositiveWarfareWeights(total));
    }
    merged.retain(|(_, w)| *w > 0.0);
    merged.sort_by_key(|(a, _)| *a);
    Ok(merged.into_iter().map(|(a, w)| (a, w / total)).collect())
}

fn resolve_injury_mix(
    config: &ScenarioConfig,
    archetypes: &[(WarfareArchetype, f64)],
) -> Result<InjuryMix, ConfigurationError> {
    let mut m = InjuryMultipliers { disease: 0.0, non_battle: 0.0, battle: 0.0 };
    for (archetype, w) in archetypes {
        let a = archetype.injury_multipliers();
        m.disease += w * a.disease;
        m.non_battle += w * a.non_battle;
        m.battle += w * a.battle;
    }
    m.battle *= config.intensity.battle_factor();

    let base = &config.injury_mix;
    let mut shifts = vec![weather_shift(config.environment.weather), terrain_shift(config.environment.terrain)];
    if let Some(user) = config.injury_shift {
        shifts.push(user);
    }
    let shift_sum = |f: fn(&InjuryShift) -> f64| shifts.iter().map(f).sum::<f64>();

    let disease = base.disease * m.disease + shift_sum(|s| s.disease);
    let non_battle = base.non_battle * m.non_battle + shift_sum(|s| s.non_battle);
    let battle = base.battle * m.battle + shift_sum(|s| s.battle);

    for (name, v) in [("disease", disease), ("non-battle", non_battle), ("battle", battle)] {
        if !v.is_finite() || v < 0.0 {
            return Err(ConfigurationError::InjuryMixNotRenormalizable(format!(
                "{name} share driven to {v:.3}"
            )));
        }
    }
    let total = disease + non_battle + battle;
    if !(total > 0.0) {
        return Err(ConfigurationError::InjuryMixNotRenormalizable("all categories are zero".to_string()));
    }
    Ok(InjuryMix {
        disease: disease * 100.0 / total,
        non_battle: non_battle * 100.0 / total,
        battle: battle * 100.0 / total,
    })
}

fn resolve_special_events(config: &ScenarioConfig, duration: f64) -> Result<Vec<SpecialEventWindow>, ConfigurationError> {
    let mut windows = Vec::with_capacity(config.special_events.len() + 1);
    for ev in &config.special_events {
        let start = ev.start_hour;
        let end = ev.start_hour + ev.duration_hours;
        let in_range = start.is_finite() && end.is_finite() && start >= 0.0 && end <= duration && end > start;
        if !in_range {
            return Err(ConfigurationError::EventWindowOutOfRange {
                kind: ev.kind.label().to_string(),
                start,
                end,
                duration,
            });
        }
        let multiplier = ev.multiplier.unwrap_or_else(|| ev.kind.default_multiplier());
        if !(multiplier.is_finite() && multiplier > 0.0) {
            return Err(ConfigurationError::InvalidEventMultiplier {
                kind: ev.kind.label().to_string(),
                multiplier,
            });
        }
        windows.push(SpecialEventWindow { kind: ev.kind, start, end, multiplier });
    }

    let has_mascal = windows.iter().any(|w| w.kind == SpecialEventKind::MassCasualty);
    if config.guaranteed_mass_casualty && !has_mascal {
        let mid = duration / 2.0;
        let half = GUARANTEED_MASCAL_HOURS / 2.0;
        windows.push(SpecialEventWindow {
            kind: SpecialEventKind::MassCasualty,
            start: (mid - half).max(0.0),
            end: (mid + half).min(duration),
            multiplier: SpecialEventKind::MassCasualty.default_multiplier(),
        });
    }
    windows.sort_by(|a, b| a.start.total_cmp(&b.start));
    Ok(windows)
}

/// Merge the scenario's warfare description into one numeric profile.
pub fn resolve(config: &ScenarioConfig) -> Result<ResolvedProfile, ConfigurationError> {
    if config.days_of_fighting == 0 {
        return Err(ConfigurationError::ZeroDuration);
    }
    let duration = config.duration_hours();
    let archetypes = normalized_archetypes(config)?;
    let injury_mix = resolve_injury_mix(config, &archetypes)?;
    let special_events = resolve_special_events(config, duration)?;

    let curve = IntensityCurve {
        duration_hours: duration,
        components: archetypes.iter().map(|(a, w)| (a.temporal_shape(), *w)).collect(),
        tempo: config.tempo,
        night_operations: config.environment.night_operations,
        windows: special_events.clone(),
    };

    let profile = ResolvedProfile {
        duration_hours: duration,
        curve,
        archetypes,
        injury_mix,
        t1_factor: config.intensity.t1_factor(),
        transit_multiplier: transit_multiplier(&config.environment),
        special_events,
    };
    debug!(
        duration_hours = duration,
        archetypes = profile.archetypes.len(),
        disease = profile.injury_mix.disease,
        non_battle = profile.injury_mix.non_battle,
        battle = profile.injury_mix.battle,
        special_events = profile.special_events.len(),
        transit_multiplier = profile.transit_multiplier,
        "resolved warfare profile"
    );
    Ok(profile)
}
