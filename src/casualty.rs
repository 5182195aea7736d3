use serde::{Deserialize, Serialize};

use crate::events::{TimelineEvent, TimelineEventKind};
use crate::hemorrhage::{HemorrhageOutcome, HemorrhageProfile};
use crate::types::{CasualtyId, Disposition, Facility, FrontId, InjuryCategory, InjuryMechanism, Triage};
use crate::warfare::WarfareArchetype;

/// Filled downstream by the demographics collaborator, keyed on nationality.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Demographics {
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub gender: Option<String>,
    pub age: Option<u32>,
    pub service_number: Option<String>,
}

/// Attributes drawn before the casualty enters the evacuation chain.
#[derive(Debug, Clone, PartialEq)]
pub struct CasualtyShell {
    pub id: CasualtyId,
    pub arrival_hour: f64,
    pub front: FrontId,
    pub nationality: String,
    pub warfare: WarfareArchetype,
    pub injury: InjuryCategory,
    pub mechanism: InjuryMechanism,
    pub triage: Triage,
    pub hemorrhage: Option<HemorrhageProfile>,
}

/// A completed casualty record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Casualty {
    pub id: CasualtyId,
    /// Hours from battle start.
    pub arrival_hour: f64,
    pub front: FrontId,
    pub nationality: String,
    pub warfare: WarfareArchetype,
    pub injury: InjuryCategory,
    pub mechanism: InjuryMechanism,
    pub triage: Triage,
    pub timeline: Vec<TimelineEvent>,
    pub disposition: Disposition,
    pub hemorrhage: Option<HemorrhageProfile>,
    pub hemorrhage_outcome: Option<HemorrhageOutcome>,
    #[serde(default)]
    pub demographics: Demographics,
}

impl Casualty {
    /// Offset of the terminal event, in hours since creation.
    pub fn time_to_disposition(&self) -> Option<f64> {
        self.timeline.last().map(|e| e.hours)
    }

    pub fn facilities_visited(&self) -> impl Iterator<Item = Facility> + '_ {
        self.timeline
            .iter()
            .filter(|e| e.kind == TimelineEventKind::Arrival)
            .map(|e| e.facility)
    }
}
