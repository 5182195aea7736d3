use serde::{Deserialize, Serialize};

use crate::types::{Disposition, Facility};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEventKind {
    Arrival,
    EvacuationStart,
    TransitStart,
    /// Recorded at the receiving facility.
    TransitEnd,
    /// Terminal; exactly one per timeline, always last.
    Outcome(Disposition),
}

/// One entry in a casualty's timeline. `hours` is the offset from the
/// casualty's own creation, not from battle start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub facility: Facility,
    pub kind: TimelineEventKind,
    pub hours: f64,
    /// Remaining blood-volume fraction; present iff the casualty bleeds.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub blood_volume: Option<f64>,
}

impl TimelineEvent {
    pub fn outcome(&self) -> Option<Disposition> {
        match self.kind {
            TimelineEventKind::Outcome(d) => Some(d),
            _ => None,
        }
    }
}
