//! Facility chain, the explicit transition table derived from it, and the
//! doctrine acceptance checks run against that table.

use std::collections::BTreeMap;
use std::fmt;

use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use serde::{Deserialize, Serialize};

use crate::durations::DurationModel;
use crate::error::{ConfigurationError, EngineError, SimulationInvariantError};
use crate::types::{Facility, PerTriage, Triage};

/// Allowed deviation of a transition row from 1.
pub const ROW_SUM_TOLERANCE: f64 = 1e-6;

/// Onward routing weight from one facility to a later one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub to: Facility,
    pub weight: f64,
}

/// One echelon of care.
///
/// `kia_rate`, `rtd_rate` and `remain_rate` are absolute probabilities; the
/// rest of the mass advances along `routes`, split by route weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilitySpec {
    pub facility: Facility,
    pub kia_rate: PerTriage<f64>,
    pub rtd_rate: PerTriage<f64>,
    /// Only the final facility may hold casualties.
    #[serde(default)]
    pub remain_rate: PerTriage<f64>,
    #[serde(default)]
    pub routes: PerTriage<Vec<Route>>,
    /// Time from arrival to the evacuation (or outcome) decision.
    pub dwell: PerTriage<DurationModel>,
    /// Time from evacuation start to the vehicle leaving.
    #[serde(default)]
    pub evacuation_wait: Option<PerTriage<DurationModel>>,
    /// Transit time of legs ending at this facility.
    #[serde(default)]
    pub inbound_transit: Option<PerTriage<DurationModel>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilityChain {
    pub facilities: Vec<FacilitySpec>,
    /// Offload and admission time between transit end and arrival.
    pub handover: DurationModel,
}

impl Default for FacilityChain {
    fn default() -> Self {
        Self::standard()
    }
}

fn tri(min: f64, mode: f64, max: f64) -> DurationModel {
    DurationModel::Triangular { min, mode, max }
}

fn routes(entries: &[(Facility, f64)]) -> Vec<Route> {
    entries.iter().map(|&(to, weight)| Route { to, weight }).collect()
}

impl FacilityChain {
    /// The doctrine chain POI → Role1 → Role2 → Role3 → Role4 with
    /// forward-skip routing from POI.
    pub fn standard() -> Self {
        use Facility::*;
        let poi = FacilitySpec {
            facility: Poi,
            kia_rate: PerTriage::new(0.12, 0.03, 0.005),
            rtd_rate: PerTriage::new(0.0, 0.02, 0.25),
            remain_rate: PerTriage::default(),
            routes: PerTriage::new(
                routes(&[(Role1, 0.60), (Role2, 0.30), (Role3, 0.07), (Role4, 0.03)]),
                routes(&[(Role1, 0.75), (Role2, 0.20), (Role3, 0.02), (Role4, 0.03)]),
                routes(&[(Role1, 0.92), (Role2, 0.05), (Role4, 0.03)]),
            ),
            dwell: PerTriage::new(tri(0.1, 0.25, 0.75), tri(0.15, 0.5, 1.5), tri(0.25, 1.0, 3.0)),
            evacuation_wait: Some(PerTriage::new(tri(0.05, 0.15, 0.5), tri(0.1, 0.3, 1.0), tri(0.25, 0.75, 3.0))),
            inbound_transit: None,
        };
        let role1 = FacilitySpec {
            facility: Role1,
            kia_rate: PerTriage::new(0.05, 0.01, 0.0),
            rtd_rate: PerTriage::new(0.0, 0.10, 0.45),
            remain_rate: PerTriage::default(),
            routes: PerTriage::new(
                routes(&[(Role2, 0.85), (Role3, 0.15)]),
                routes(&[(Role2, 0.90), (Role3, 0.10)]),
                routes(&[(Role2, 1.0)]),
            ),
            dwell: PerTriage::new(
                DurationModel::TruncatedNormal { mean: 1.0, std_dev: 0.5, min: 0.25, max: 4.0 },
                DurationModel::TruncatedNormal { mean: 2.0, std_dev: 1.0, min: 0.5, max: 8.0 },
                DurationModel::TruncatedNormal { mean: 4.0, std_dev: 2.0, min: 1.0, max: 24.0 },
            ),
            evacuation_wait: Some(PerTriage::new(tri(0.1, 0.25, 1.0), tri(0.25, 0.5, 2.0), tri(0.5, 1.0, 4.0))),
            inbound_transit: Some(PerTriage::new(tri(0.1, 0.3, 1.0), tri(0.15, 0.5, 1.5), tri(0.25, 0.75, 2.0))),
        };
        let role2 = FacilitySpec {
            facility: Role2,
            kia_rate: PerTriage::new(0.04, 0.01, 0.0),
            rtd_rate: PerTriage::new(0.05, 0.30, 0.60),
            remain_rate: PerTriage::default(),
            routes: PerTriage::uniform(routes(&[(Role3, 1.0)])),
            dwell: PerTriage::new(
                DurationModel::log_normal_median(6.0, 0.5),
                DurationModel::log_normal_median(12.0, 0.5),
                DurationModel::log_normal_median(24.0, 0.5),
            ),
            evacuation_wait: Some(PerTriage::new(tri(0.25, 1.0, 4.0), tri(0.5, 2.0, 8.0), tri(1.0, 4.0, 12.0))),
            inbound_transit: Some(PerTriage::new(tri(0.25, 0.75, 2.0), tri(0.5, 1.0, 3.0), tri(0.5, 1.5, 4.0))),
        };
        let role3 = FacilitySpec {
            facility: Role3,
            kia_rate: PerTriage::new(0.03, 0.005, 0.0),
            rtd_rate: PerTriage::new(0.20, 0.50, 0.80),
            remain_rate: PerTriage::default(),
            routes: PerTriage::uniform(routes(&[(Role4, 1.0)])),
            dwell: PerTriage::new(
                DurationModel::log_normal_median(48.0, 0.6),
                DurationModel::log_normal_median(72.0, 0.6),
                DurationModel::log_normal_median(96.0, 0.6),
            ),
            evacuation_wait: Some(PerTriage::new(tri(2.0, 6.0, 24.0), tri(4.0, 12.0, 36.0), tri(6.0, 24.0, 48.0))),
            inbound_transit: Some(PerTriage::new(tri(0.5, 1.5, 4.0), tri(1.0, 2.0, 6.0), tri(1.0, 3.0, 8.0))),
        };
        let role4 = FacilitySpec {
            facility: Role4,
            kia_rate: PerTriage::new(0.02, 0.005, 0.0),
            rtd_rate: PerTriage::new(0.45, 0.65, 0.90),
            remain_rate: PerTriage::new(0.53, 0.345, 0.10),
            routes: PerTriage::default(),
            dwell: PerTriage::new(
                DurationModel::log_normal_median(240.0, 0.5),
                DurationModel::log_normal_median(168.0, 0.5),
                DurationModel::log_normal_median(120.0, 0.5),
            ),
            evacuation_wait: None,
            inbound_transit: Some(PerTriage::new(tri(6.0, 10.0, 18.0), tri(8.0, 12.0, 24.0), tri(8.0, 16.0, 36.0))),
        };
        FacilityChain { facilities: vec![poi, role1, role2, role3, role4], handover: tri(0.05, 0.1, 0.25) }
    }

    pub fn spec(&self, facility: Facility) -> Option<&FacilitySpec> {
        self.facilities.iter().find(|s| s.facility == facility)
    }

    /// Structural checks: every echelon once, in order; routes only go forward;
    /// timing tables present where legs exist.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let order: Vec<Facility> = self.facilities.iter().map(|s| s.facility).collect();
        if order != Facility::ALL {
            return Err(ConfigurationError::FacilityTable {
                facility: order.first().copied().unwrap_or(Facility::Poi),
                triage: Triage::T1,
                detail: format!("chain must list POI, Role1..Role4 once and in order, got {order:?}"),
            });
        }
        let last = Facility::Role4;
        for spec in &self.facilities {
            for triage in Triage::ALL {
                let fail = |detail: String| ConfigurationError::FacilityTable { facility: spec.facility, triage, detail };
                for route in spec.routes.get(triage) {
                    if route.to.echelon() <= spec.facility.echelon() {
                        return Err(fail(format!("route to {} does not move forward", route.to)));
                    }
                    if !route.weight.is_finite() || route.weight < 0.0 {
                        return Err(fail(format!("route to {} has invalid weight {}", route.to, route.weight)));
                    }
                }
                if spec.facility != last && *spec.remain_rate.get(triage) != 0.0 {
                    return Err(fail("only the final facility may keep casualties".to_string()));
                }
                if spec.facility != Facility::Poi && spec.inbound_transit.is_none() {
                    return Err(fail("missing inbound transit distribution".to_string()));
                }
                if !spec.routes.get(triage).is_empty() && spec.evacuation_wait.is_none() {
                    return Err(fail("routes configured without an evacuation wait distribution".to_string()));
                }
            }
        }
        Ok(())
    }
}

/// One outgoing edge of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Transition {
    Advance(Facility),
    Kia,
    Rtd,
    Remain,
}

/// Categorical distribution over transitions from one (facility, triage) state.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRow {
    pub outcomes: Vec<(Transition, f64)>,
}

impl TransitionRow {
    pub fn sum(&self) -> f64 {
        self.outcomes.iter().map(|(_, p)| p).sum()
    }

    pub fn probability(&self, transition: Transition) -> f64 {
        self.outcomes.iter().filter(|(t, _)| *t == transition).map(|(_, p)| p).sum()
    }

    pub fn check(&self, facility: Facility, triage: Triage) -> Result<(), SimulationInvariantError> {
        let sum = self.sum();
        let entries_ok = self.outcomes.iter().all(|(_, p)| p.is_finite() && *p >= 0.0);
        if !entries_ok || (sum - 1.0).abs() > ROW_SUM_TOLERANCE {
            return Err(SimulationInvariantError::TransitionRowSum { facility, triage, sum });
        }
        Ok(())
    }

    pub fn sample(&self, rng: &mut impl Rng) -> Result<Transition, SimulationInvariantError> {
        let index = WeightedIndex::new(self.outcomes.iter().map(|(_, p)| *p))
            .map_err(|e| SimulationInvariantError::EmptyDistribution(format!("transition row: {e}")))?;
        Ok(self.outcomes[index.sample(rng)].0)
    }
}

/// Explicit (facility × triage) → transition distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionTable {
    rows: BTreeMap<(Facility, Triage), TransitionRow>,
}

impl TransitionTable {
    pub fn from_chain(chain: &FacilityChain) -> Result<Self, EngineError> {
        chain.validate()?;
        let mut rows = BTreeMap::new();
        for spec in &chain.facilities {
            for triage in Triage::ALL {
                let fail = |detail: String| ConfigurationError::FacilityTable { facility: spec.facility, triage, detail };
                let kia = *spec.kia_rate.get(triage);
                let rtd = *spec.rtd_rate.get(triage);
                let remain = *spec.remain_rate.get(triage);
                for (name, p) in [("KIA", kia), ("RTD", rtd), ("remain", remain)] {
                    if !p.is_finite() || !(0.0..=1.0).contains(&p) {
                        return Err(fail(format!("{name} rate {p} outside [0, 1]")).into());
                    }
                }
                let advance = 1.0 - kia - rtd - remain;
                if advance < -ROW_SUM_TOLERANCE {
                    return Err(fail(format!("outcome rates exceed 1 by {:.6}", -advance)).into());
                }
                let advance = advance.max(0.0);

                let mut outcomes = vec![(Transition::Kia, kia), (Transition::Rtd, rtd)];
                if spec.facility == Facility::Role4 {
                    outcomes.push((Transition::Remain, remain));
                }
                let route_list = spec.routes.get(triage);
                let route_total: f64 = route_list.iter().map(|r| r.weight).sum();
                if advance > ROW_SUM_TOLERANCE {
                    if !(route_total > 0.0) {
                        return Err(fail(format!("{advance:.6} of outflow has no onward route")).into());
                    }
                    for route in route_list {
                        outcomes.push((Transition::Advance(route.to), advance * route.weight / route_total));
                    }
                }
                let row = TransitionRow { outcomes };
                row.check(spec.facility, triage)?;
                rows.insert((spec.facility, triage), row);
            }
        }
        Ok(TransitionTable { rows })
    }

    pub fn row(&self, facility: Facility, triage: Triage) -> Result<&TransitionRow, SimulationInvariantError> {
        self.rows
            .get(&(facility, triage))
            .ok_or(SimulationInvariantError::MissingTransitionRow { facility, triage })
    }

    pub fn rows(&self) -> impl Iterator<Item = (&(Facility, Triage), &TransitionRow)> {
        self.rows.iter()
    }

    /// Mechanical check that every row is a probability distribution.
    pub fn check_sums(&self) -> Result<(), SimulationInvariantError> {
        for ((facility, triage), row) in &self.rows {
            row.check(*facility, *triage)?;
        }
        Ok(())
    }
}

/// Doctrine acceptance thresholds on POI outflow.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DoctrineConfig {
    pub min_role1_share: f64,
    pub skip_band_min: f64,
    pub skip_band_max: f64,
}

impl Default for DoctrineConfig {
    fn default() -> Self {
        DoctrineConfig { min_role1_share: 0.25, skip_band_min: 0.02, skip_band_max: 0.04 }
    }
}

/// A doctrine acceptance threshold that is not met. Reported, never fatal.
#[derive(Debug, Clone, PartialEq)]
pub enum DoctrineViolation {
    Role1NotPlurality { triage: Triage, role1_share: f64, rival: Facility, rival_share: f64 },
    Role1BelowMinimum { triage: Triage, share: f64, min: f64 },
    SkipOutsideBand { triage: Triage, share: f64, min: f64, max: f64 },
}

impl fmt::Display for DoctrineViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Role1NotPlurality { triage, role1_share, rival, rival_share } => {
                write!(f, "Role1NotPlurality triage={triage}: Role1={role1_share:.4} {rival}={rival_share:.4}")
            }
            Self::Role1BelowMinimum { triage, share, min } => {
                write!(f, "Role1BelowMinimum triage={triage}: share={share:.4} min={min:.4}")
            }
            Self::SkipOutsideBand { triage, share, min, max } => {
                write!(f, "SkipOutsideBand triage={triage}: share={share:.4} band=[{min:.4}, {max:.4}]")
            }
        }
    }
}

/// Check POI first-hop shares (facility → fraction of casualties leaving POI
/// for that facility) for one triage.
pub fn check_first_hop_shares(
    triage: Triage,
    shares: &BTreeMap<Facility, f64>,
    doctrine: &DoctrineConfig,
) -> Vec<DoctrineViolation> {
    let mut violations = Vec::new();
    let share = |f: Facility| shares.get(&f).copied().unwrap_or(0.0);
    let role1 = share(Facility::Role1);

    let rival = shares
        .iter()
        .filter(|(f, _)| **f != Facility::Role1)
        .max_by(|a, b| a.1.total_cmp(b.1));
    if let Some((&rival, &rival_share)) = rival {
        if rival_share >= role1 {
            violations.push(DoctrineViolation::Role1NotPlurality { triage, role1_share: role1, rival, rival_share });
        }
    }
    if role1 < doctrine.min_role1_share {
        violations.push(DoctrineViolation::Role1BelowMinimum { triage, share: role1, min: doctrine.min_role1_share });
    }
    let skip = share(Facility::Role4);
    if skip < doctrine.skip_band_min || skip > doctrine.skip_band_max {
        violations.push(DoctrineViolation::SkipOutsideBand {
            triage,
            share: skip,
            min: doctrine.skip_band_min,
            max: doctrine.skip_band_max,
        });
    }
    violations
}

/// Doctrine check against the table itself, per triage. Shares are taken over
/// the advancing mass of each POI row.
pub fn check_doctrine(table: &TransitionTable, doctrine: &DoctrineConfig) -> Vec<DoctrineViolation> {
    let mut violations = Vec::new();
    for triage in Triage::ALL {
        let Ok(row) = table.row(Facility::Poi, triage) else {
            continue;
        };
        let advance: f64 = Facility::ALL[1..].iter().map(|&f| row.probability(Transition::Advance(f))).sum();
        if advance <= 0.0 {
            continue;
        }
        let shares: BTreeMap<Facility, f64> = Facility::ALL[1..]
            .iter()
            .map(|&f| (f, row.probability(Transition::Advance(f)) / advance))
            .collect();
        violations.extend(check_first_hop_shares(triage, &shares, doctrine));
    }
    violations
}
