use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CasualtyId(pub u64);

/// Identifier of a front, as given by the scenario (e.g. "north").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrontId(pub String);

impl fmt::Display for FrontId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Simulation time is measured in hours, as `f64`.
/// Battle time starts at 0.0; casualty timelines are offsets from the
/// casualty's own creation.
pub const HOURS_PER_DAY: f64 = 24.0;

/// Smallest interval the flow engine ever records between two timeline
/// events (one minute). Keeps timestamps strictly increasing.
pub const MIN_INTERVAL_HOURS: f64 = 1.0 / 60.0;

/// Treatment echelons, in evacuation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Facility {
    #[serde(rename = "POI")]
    Poi,
    Role1,
    Role2,
    Role3,
    Role4,
}

impl Facility {
    pub const ALL: [Facility; 5] =
        [Facility::Poi, Facility::Role1, Facility::Role2, Facility::Role3, Facility::Role4];

    /// Position in the chain; POI is 0.
    pub fn echelon(self) -> usize {
        match self {
            Facility::Poi => 0,
            Facility::Role1 => 1,
            Facility::Role2 => 2,
            Facility::Role3 => 3,
            Facility::Role4 => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Facility::Poi => "POI",
            Facility::Role1 => "Role1",
            Facility::Role2 => "Role2",
            Facility::Role3 => "Role3",
            Facility::Role4 => "Role4",
        }
    }
}

impl fmt::Display for Facility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Triage category: T1 Immediate, T2 Urgent, T3 Delayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Triage {
    T1,
    T2,
    T3,
}

impl Triage {
    pub const ALL: [Triage; 3] = [Triage::T1, Triage::T2, Triage::T3];

    pub fn index(self) -> usize {
        match self {
            Triage::T1 => 0,
            Triage::T2 => 1,
            Triage::T3 => 2,
        }
    }
}

impl fmt::Display for Triage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Triage::T1 => "T1",
            Triage::T2 => "T2",
            Triage::T3 => "T3",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjuryCategory {
    Disease,
    NonBattle,
    Battle,
}

impl InjuryCategory {
    pub const ALL: [InjuryCategory; 3] =
        [InjuryCategory::Disease, InjuryCategory::NonBattle, InjuryCategory::Battle];
}

impl fmt::Display for InjuryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InjuryCategory::Disease => "disease",
            InjuryCategory::NonBattle => "non-battle",
            InjuryCategory::Battle => "battle",
        };
        f.write_str(s)
    }
}

/// Wounding mechanism. Decides whether a hemorrhage profile is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjuryMechanism {
    Penetrating,
    Blast,
    Blunt,
    Burn,
    Chemical,
    Disease,
}

impl InjuryMechanism {
    pub fn is_bleeding_capable(self) -> bool {
        matches!(self, InjuryMechanism::Penetrating | InjuryMechanism::Blast | InjuryMechanism::Blunt)
    }
}

/// Final state of a casualty trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Disposition {
    #[serde(rename = "KIA")]
    Kia,
    #[serde(rename = "RTD")]
    Rtd,
    RemainsAtRole4,
}

impl Disposition {
    pub const ALL: [Disposition; 3] = [Disposition::Kia, Disposition::Rtd, Disposition::RemainsAtRole4];
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Disposition::Kia => "KIA",
            Disposition::Rtd => "RTD",
            Disposition::RemainsAtRole4 => "Remains-at-Role4",
        };
        f.write_str(s)
    }
}

/// One value per triage category.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PerTriage<T> {
    pub t1: T,
    pub t2: T,
    pub t3: T,
}

impl<T> PerTriage<T> {
    pub fn new(t1: T, t2: T, t3: T) -> Self {
        PerTriage { t1, t2, t3 }
    }

    pub fn get(&self, triage: Triage) -> &T {
        match triage {
            Triage::T1 => &self.t1,
            Triage::T2 => &self.t2,
            Triage::T3 => &self.t3,
        }
    }
}

impl<T: Clone> PerTriage<T> {
    pub fn uniform(value: T) -> Self {
        PerTriage { t1: value.clone(), t2: value.clone(), t3: value }
    }
}
