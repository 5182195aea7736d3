//! Evacuation flow engine: walks one casualty through the facility chain
//! using the explicit transition table, sampling dwell, wait, transit and
//! handover durations and consulting the hemorrhage tracker at every
//! boundary.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::Rng;

use crate::durations::{DurationModel, DurationSampler};
use crate::error::{ConfigurationError, SimulationInvariantError};
use crate::events::{TimelineEvent, TimelineEventKind};
use crate::facility::{FacilityChain, Transition, TransitionRow, TransitionTable};
use crate::hemorrhage::{HemorrhageOutcome, HemorrhageProfile, HemorrhageTracker};
use crate::types::{Disposition, Facility, MIN_INTERVAL_HOURS, PerTriage, Triage};

/// Optional perturbation of transition rows before sampling, e.g. a
/// misdiagnosis layer. The adjusted row must still sum to 1.
pub trait OutcomeHook: Send + Sync {
    fn adjust(&self, facility: Facility, triage: Triage, row: &mut TransitionRow);
}

/// Counts the engine keeps while it generates, independent of the records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowCounters {
    pub facility_arrivals: BTreeMap<Facility, u64>,
    pub dispositions: BTreeMap<Disposition, u64>,
}

impl FlowCounters {
    pub fn merge(&mut self, other: &FlowCounters) {
        for (f, n) in &other.facility_arrivals {
            *self.facility_arrivals.entry(*f).or_insert(0) += n;
        }
        for (d, n) in &other.dispositions {
            *self.dispositions.entry(*d).or_insert(0) += n;
        }
    }

    pub fn total_dispositions(&self) -> u64 {
        self.dispositions.values().sum()
    }
}

/// Timeline, disposition and bleeding summary of one trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowResult {
    pub timeline: Vec<TimelineEvent>,
    pub disposition: Disposition,
    pub hemorrhage: Option<HemorrhageProfile>,
    pub hemorrhage_outcome: Option<HemorrhageOutcome>,
}

#[derive(Debug, Clone)]
struct FacilityTiming {
    dwell: PerTriage<DurationSampler>,
    evacuation_wait: Option<PerTriage<DurationSampler>>,
    inbound_transit: Option<PerTriage<DurationSampler>>,
}

fn compile(models: &PerTriage<DurationModel>, what: &str) -> Result<PerTriage<DurationSampler>, ConfigurationError> {
    Ok(PerTriage::new(
        models.t1.sampler(&format!("{what} T1"))?,
        models.t2.sampler(&format!("{what} T2"))?,
        models.t3.sampler(&format!("{what} T3"))?,
    ))
}

pub struct FlowEngine {
    table: TransitionTable,
    timing: BTreeMap<Facility, FacilityTiming>,
    handover: DurationSampler,
    transit_multiplier: f64,
    control_facility: Option<Facility>,
    hook: Option<Arc<dyn OutcomeHook>>,
}

impl FlowEngine {
    pub fn new(
        chain: &FacilityChain,
        table: TransitionTable,
        transit_multiplier: f64,
        control_facility: Option<Facility>,
    ) -> Result<Self, ConfigurationError> {
        let mut timing = BTreeMap::new();
        for spec in &chain.facilities {
            let name = spec.facility.label();
            let evacuation_wait = match &spec.evacuation_wait {
                Some(m) => Some(compile(m, &format!("{name} evacuation wait"))?),
                None => None,
            };
            let inbound_transit = match &spec.inbound_transit {
                Some(m) => Some(compile(m, &format!("{name} inbound transit"))?),
                None => None,
            };
            timing.insert(
                spec.facility,
                FacilityTiming { dwell: compile(&spec.dwell, &format!("{name} dwell"))?, evacuation_wait, inbound_transit },
            );
        }
        Ok(FlowEngine {
            table,
            timing,
            handover: chain.handover.sampler("handover")?,
            transit_multiplier,
            control_facility,
            hook: None,
        })
    }

    pub fn with_hook(mut self, hook: Arc<dyn OutcomeHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn table(&self) -> &TransitionTable {
        &self.table
    }

    fn timing(&self, facility: Facility) -> Result<&FacilityTiming, SimulationInvariantError> {
        self.timing
            .get(&facility)
            .ok_or_else(|| SimulationInvariantError::EmptyDistribution(format!("no timing for {facility}")))
    }

    fn decide(&self, facility: Facility, triage: Triage, rng: &mut impl Rng) -> Result<Transition, SimulationInvariantError> {
        let row = self.table.row(facility, triage)?;
        match &self.hook {
            Some(hook) => {
                let mut adjusted = row.clone();
                hook.adjust(facility, triage, &mut adjusted);
                adjusted.check(facility, triage)?;
                adjusted.sample(rng)
            }
            None => row.sample(rng),
        }
    }

    /// Run one casualty from POI to a final disposition.
    pub fn run(
        &self,
        triage: Triage,
        profile: Option<HemorrhageProfile>,
        counters: &mut FlowCounters,
        rng: &mut impl Rng,
    ) -> Result<FlowResult, SimulationInvariantError> {
        let mut trace = Trace { timeline: Vec::new(), tracker: HemorrhageTracker::new(profile) };
        let mut facility = Facility::Poi;
        let mut t = 0.0;

        let disposition = loop {
            if let Some(d) = trace.boundary(facility, TimelineEventKind::Arrival, t) {
                break d;
            }
            *counters.facility_arrivals.entry(facility).or_insert(0) += 1;
            if self.control_facility == Some(facility) {
                trace.tracker.arrest(t);
            }

            let timing = self.timing(facility)?;
            t += timing.dwell.get(triage).sample(rng);
            if trace.tracker.query(t).exsanguinated {
                break trace.finish(Disposition::Kia, t);
            }

            let next = match self.decide(facility, triage, rng)? {
                Transition::Kia => break trace.finish(Disposition::Kia, t),
                Transition::Rtd => break trace.finish(Disposition::Rtd, t),
                Transition::Remain => break trace.finish(Disposition::RemainsAtRole4, t),
                Transition::Advance(next) => next,
            };
            trace.push(facility, TimelineEventKind::EvacuationStart, t);

            let wait = timing.evacuation_wait.as_ref().ok_or_else(|| {
                SimulationInvariantError::EmptyDistribution(format!("no evacuation wait at {facility}"))
            })?;
            t += wait.get(triage).sample(rng);
            if let Some(d) = trace.boundary(facility, TimelineEventKind::TransitStart, t) {
                break d;
            }

            let transit = self.timing(next)?.inbound_transit.as_ref().ok_or_else(|| {
                SimulationInvariantError::EmptyDistribution(format!("no inbound transit to {next}"))
            })?;
            t += (transit.get(triage).sample(rng) * self.transit_multiplier).max(MIN_INTERVAL_HOURS);
            if let Some(d) = trace.boundary(next, TimelineEventKind::TransitEnd, t) {
                break d;
            }

            t += self.handover.sample(rng);
            facility = next;
        };

        *counters.dispositions.entry(disposition).or_insert(0) += 1;
        let hemorrhage_outcome = trace.tracker.outcome();
        Ok(FlowResult {
            timeline: trace.timeline,
            disposition,
            hemorrhage: trace.tracker.into_profile(),
            hemorrhage_outcome,
        })
    }
}

struct Trace {
    timeline: Vec<TimelineEvent>,
    tracker: HemorrhageTracker,
}

impl Trace {
    fn push(&mut self, facility: Facility, kind: TimelineEventKind, t: f64) {
        let blood_volume = self.tracker.query(t).fraction;
        self.timeline.push(TimelineEvent { facility, kind, hours: t, blood_volume });
    }

    /// Record `kind` at `t` unless the casualty has bled out by then, in
    /// which case record KIA at the last facility instead.
    fn boundary(&mut self, facility: Facility, kind: TimelineEventKind, t: f64) -> Option<Disposition> {
        if self.tracker.query(t).exsanguinated {
            return Some(self.finish(Disposition::Kia, t));
        }
        self.push(facility, kind, t);
        None
    }

    /// Record the outcome at the facility of the last event. A casualty who
    /// bleeds out in transit is therefore recorded at the departure facility.
    fn finish(&mut self, disposition: Disposition, t: f64) -> Disposition {
        let facility = self.timeline.last().map_or(Facility::Poi, |e| e.facility);
        self.push(facility, TimelineEventKind::Outcome(disposition), t);
        disposition
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;
    use crate::hemorrhage::{HemorrhageConfig, WoundBand};

    fn engine_with(multiplier: f64) -> FlowEngine {
        let chain = FacilityChain::standard();
        let table = TransitionTable::from_chain(&chain).unwrap();
        FlowEngine::new(&chain, table, multiplier, HemorrhageConfig::default().control_facility).unwrap()
    }

    fn engine() -> FlowEngine {
        engine_with(1.0)
    }

    fn bleed(band: WoundBand, alpha0: f64, tourniquet_at: Option<f64>) -> HemorrhageProfile {
        HemorrhageProfile {
            band,
            alpha0,
            k: band.progression(),
            tourniquet_controllable: band.tourniquet_controllable(),
            tourniquet_at,
            residual_rate: HemorrhageConfig::default().residual_rate(),
        }
    }

    fn assert_well_formed(result: &FlowResult) {
        let first = &result.timeline[0];
        assert_eq!((first.facility, first.kind, first.hours), (Facility::Poi, TimelineEventKind::Arrival, 0.0));
        assert!(result.timeline.windows(2).all(|w| w[0].hours < w[1].hours), "timestamps not strictly increasing");
        let outcomes: Vec<_> = result.timeline.iter().filter_map(|e| e.outcome()).collect();
        assert_eq!(outcomes, vec![result.disposition]);
        assert_eq!(result.timeline.last().unwrap().outcome(), Some(result.disposition));
    }

    // ── Timeline shape ─────────────────────────────────────────────────────

    #[test]
    fn timelines_are_well_formed() {
        let engine = engine();
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let mut counters = FlowCounters::default();
        for i in 0..3_000 {
            let triage = Triage::ALL[i % 3];
            let result = engine.run(triage, None, &mut counters, &mut rng).unwrap();
            assert_well_formed(&result);
            assert!(result.timeline.iter().all(|e| e.blood_volume.is_none()));
            assert!(result.hemorrhage_outcome.is_none());
        }
        assert_eq!(counters.total_dispositions(), 3_000);
        assert_eq!(counters.facility_arrivals[&Facility::Poi], 3_000);
    }

    #[test]
    fn remain_only_recorded_at_role4() {
        let engine = engine();
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let mut counters = FlowCounters::default();
        let mut remained = 0;
        for _ in 0..3_000 {
            let result = engine.run(Triage::T1, None, &mut counters, &mut rng).unwrap();
            if result.disposition == Disposition::RemainsAtRole4 {
                assert_eq!(result.timeline.last().unwrap().facility, Facility::Role4);
                remained += 1;
            }
        }
        assert!(remained > 0);
    }

    #[test]
    fn hops_only_move_forward() {
        let engine = engine();
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let mut counters = FlowCounters::default();
        for _ in 0..2_000 {
            let result = engine.run(Triage::T2, None, &mut counters, &mut rng).unwrap();
            let visited: Vec<Facility> = result
                .timeline
                .iter()
                .filter(|e| e.kind == TimelineEventKind::Arrival)
                .map(|e| e.facility)
                .collect();
            assert!(visited.windows(2).all(|w| w[0] < w[1]), "{visited:?}");
        }
    }

    #[test]
    fn counters_match_timelines() {
        let engine = engine();
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let mut counters = FlowCounters::default();
        let mut recount = FlowCounters::default();
        for i in 0..1_000 {
            let result = engine.run(Triage::ALL[i % 3], None, &mut counters, &mut rng).unwrap();
            for e in &result.timeline {
                if e.kind == TimelineEventKind::Arrival {
                    *recount.facility_arrivals.entry(e.facility).or_insert(0) += 1;
                }
            }
            *recount.dispositions.entry(result.disposition).or_insert(0) += 1;
        }
        assert_eq!(counters, recount);
    }

    // ── Hemorrhage coupling ────────────────────────────────────────────────

    #[test]
    fn massive_bleed_dies_at_poi() {
        let engine = engine();
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let mut counters = FlowCounters::default();
        for _ in 0..200 {
            let result =
                engine.run(Triage::T1, Some(bleed(WoundBand::Massive, 12.0, None)), &mut counters, &mut rng).unwrap();
            assert_well_formed(&result);
            assert_eq!(result.disposition, Disposition::Kia);
            assert!(result.timeline.iter().all(|e| e.facility == Facility::Poi));
            assert!(result.timeline.iter().all(|e| e.blood_volume.is_some()));
            // A facility KIA drawn before the crossing leaves no crossing time.
            if let Some(at) = result.hemorrhage_outcome.unwrap().exsanguinated_at {
                assert!(at <= result.timeline.last().unwrap().hours);
            }
        }
    }

    #[test]
    fn blood_volume_snapshots_never_rise() {
        let engine = engine();
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let mut counters = FlowCounters::default();
        for _ in 0..500 {
            let profile = bleed(WoundBand::Torso, 0.6, None);
            let result = engine.run(Triage::T2, Some(profile), &mut counters, &mut rng).unwrap();
            assert_well_formed(&result);
            let bv: Vec<f64> = result.timeline.iter().map(|e| e.blood_volume.unwrap()).collect();
            assert!(bv.windows(2).all(|w| w[1] <= w[0]), "{bv:?}");
        }
    }

    #[test]
    fn surgical_control_holds_blood_volume() {
        let engine = engine();
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let mut counters = FlowCounters::default();
        let mut controlled = 0;
        for _ in 0..500 {
            let profile = bleed(WoundBand::SmallLimb, 0.2, Some(0.05));
            let result = engine.run(Triage::T3, Some(profile), &mut counters, &mut rng).unwrap();
            let outcome = result.hemorrhage_outcome.unwrap();
            if let Some(at) = outcome.definitive_control_at {
                controlled += 1;
                let after: Vec<f64> =
                    result.timeline.iter().filter(|e| e.hours >= at).map(|e| e.blood_volume.unwrap()).collect();
                assert!(after.windows(2).all(|w| w[0] == w[1]), "{after:?}");
            }
        }
        assert!(controlled > 0);
    }

    #[test]
    fn bleed_out_in_transit_is_recorded_at_departure_facility() {
        // Transit legs of hundreds of hours outlast the residual bleed.
        let engine = engine_with(10_000.0);
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let mut counters = FlowCounters::default();
        let mut in_transit = 0;
        for _ in 0..200 {
            let profile = bleed(WoundBand::SmallLimb, 0.2, Some(0.05));
            let result = engine.run(Triage::T3, Some(profile), &mut counters, &mut rng).unwrap();
            assert_well_formed(&result);
            let Some(start) = result.timeline.iter().find(|e| e.kind == TimelineEventKind::TransitStart) else {
                continue;
            };
            in_transit += 1;
            let last = result.timeline.last().unwrap();
            assert_eq!(result.disposition, Disposition::Kia);
            assert_eq!(last.facility, start.facility);
            assert!(result.timeline.iter().all(|e| e.kind != TimelineEventKind::TransitEnd));
            let at = result.hemorrhage_outcome.unwrap().exsanguinated_at.unwrap();
            assert!(at > start.hours && at <= last.hours, "crossing {at} outside transit");
        }
        assert!(in_transit > 0);
    }

    // ── Environment and hooks ──────────────────────────────────────────────

    #[test]
    fn transit_multiplier_scales_transit_legs() {
        let slow = engine_with(2.0);
        let fast = engine();
        let mut counters = FlowCounters::default();
        let a = fast.run(Triage::T3, None, &mut counters, &mut ChaCha20Rng::seed_from_u64(9)).unwrap();
        let b = slow.run(Triage::T3, None, &mut counters, &mut ChaCha20Rng::seed_from_u64(9)).unwrap();
        let leg = |r: &FlowResult| {
            let start = r.timeline.iter().find(|e| e.kind == TimelineEventKind::TransitStart)?.hours;
            let end = r.timeline.iter().find(|e| e.kind == TimelineEventKind::TransitEnd)?.hours;
            Some(end - start)
        };
        if let (Some(fast_leg), Some(slow_leg)) = (leg(&a), leg(&b)) {
            assert!((slow_leg / fast_leg - 2.0).abs() < 1e-9, "{fast_leg} vs {slow_leg}");
        }
        assert_eq!(a.disposition, b.disposition);
    }

    struct AlwaysRtd;

    impl OutcomeHook for AlwaysRtd {
        fn adjust(&self, _facility: Facility, _triage: Triage, row: &mut TransitionRow) {
            row.outcomes = vec![(Transition::Rtd, 1.0)];
        }
    }

    struct Broken;

    impl OutcomeHook for Broken {
        fn adjust(&self, _facility: Facility, _triage: Triage, row: &mut TransitionRow) {
            row.outcomes.push((Transition::Kia, 0.5));
        }
    }

    #[test]
    fn hook_can_perturb_outcomes() {
        let engine = engine().with_hook(Arc::new(AlwaysRtd));
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let mut counters = FlowCounters::default();
        for _ in 0..100 {
            let result = engine.run(Triage::T1, None, &mut counters, &mut rng).unwrap();
            assert_eq!(result.disposition, Disposition::Rtd);
            assert_eq!(result.timeline.len(), 2);
        }
    }

    #[test]
    fn hook_row_is_revalidated() {
        let engine = engine().with_hook(Arc::new(Broken));
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let mut counters = FlowCounters::default();
        let err = engine.run(Triage::T2, None, &mut counters, &mut rng).unwrap_err();
        assert!(matches!(err, SimulationInvariantError::TransitionRowSum { facility: Facility::Poi, .. }));
    }
}
