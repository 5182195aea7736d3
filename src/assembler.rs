//! Output assembler: merges a casualty shell and its flow result into the
//! final record, after checking the timeline is well-formed.

use crate::casualty::{Casualty, CasualtyShell, Demographics};
use crate::error::SimulationInvariantError;
use crate::events::TimelineEventKind;
use crate::flow::FlowResult;
use crate::types::Facility;

pub fn assemble(shell: CasualtyShell, flow: FlowResult) -> Result<Casualty, SimulationInvariantError> {
    let casualty = Casualty {
        id: shell.id,
        arrival_hour: shell.arrival_hour,
        front: shell.front,
        nationality: shell.nationality,
        warfare: shell.warfare,
        injury: shell.injury,
        mechanism: shell.mechanism,
        triage: shell.triage,
        timeline: flow.timeline,
        disposition: flow.disposition,
        hemorrhage: flow.hemorrhage,
        hemorrhage_outcome: flow.hemorrhage_outcome,
        demographics: Demographics::default(),
    };
    seal(&casualty)?;
    Ok(casualty)
}

/// Check the timeline invariants every emitted record must satisfy.
pub fn seal(casualty: &Casualty) -> Result<(), SimulationInvariantError> {
    let fail = |detail: String| SimulationInvariantError::Timeline { casualty: casualty.id, detail };
    let timeline = &casualty.timeline;

    let Some(first) = timeline.first() else {
        return Err(fail("timeline is empty".to_string()));
    };
    if first.facility != Facility::Poi || first.kind != TimelineEventKind::Arrival || first.hours != 0.0 {
        return Err(fail(format!(
            "first event is {:?} at {} after {:.3} h, expected POI arrival at 0",
            first.kind, first.facility, first.hours
        )));
    }

    for (i, pair) in timeline.windows(2).enumerate() {
        if !(pair[1].hours > pair[0].hours) {
            return Err(fail(format!(
                "event {} at {:.6} h does not follow event {} at {:.6} h",
                i + 1,
                pair[1].hours,
                i,
                pair[0].hours
            )));
        }
    }

    let terminal = timeline.iter().filter(|e| e.outcome().is_some()).count();
    if terminal != 1 {
        return Err(fail(format!("{terminal} terminal events, expected exactly one")));
    }
    let last = &timeline[timeline.len() - 1];
    match last.outcome() {
        Some(d) if d == casualty.disposition => {}
        Some(d) => return Err(fail(format!("terminal event says {d}, record says {}", casualty.disposition))),
        None => return Err(fail("terminal event is not last".to_string())),
    }

    let bleeds = casualty.hemorrhage.is_some();
    if let Some(e) = timeline.iter().find(|e| e.blood_volume.is_some() != bleeds) {
        let detail = if bleeds {
            format!("{:?} at {} has no blood-volume snapshot", e.kind, e.facility)
        } else {
            format!("{:?} at {} has a blood-volume snapshot without a hemorrhage profile", e.kind, e.facility)
        };
        return Err(fail(detail));
    }
    Ok(())
}
