use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::assembler;
use crate::casualty::Casualty;
use crate::events::TimelineEventKind;
use crate::facility::{DoctrineConfig, DoctrineViolation, check_first_hop_shares};
use crate::hemorrhage::EXSANGUINATION_THRESHOLD;
use crate::simulation::RunSummary;
use crate::types::{CasualtyId, Disposition, Facility, Triage};

/// Count-by-facility and count-by-disposition over emitted records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TimelineSummary {
    pub records: usize,
    pub facility_arrivals: BTreeMap<Facility, u64>,
    pub dispositions: BTreeMap<Disposition, u64>,
}

impl TimelineSummary {
    pub fn add(&mut self, casualty: &Casualty) {
        self.records += 1;
        for facility in casualty.facilities_visited() {
            *self.facility_arrivals.entry(facility).or_insert(0) += 1;
        }
        *self.dispositions.entry(casualty.disposition).or_insert(0) += 1;
    }

    pub fn from_casualties<'a>(casualties: impl IntoIterator<Item = &'a Casualty>) -> Self {
        let mut summary = TimelineSummary::default();
        for c in casualties {
            summary.add(c);
        }
        summary
    }
}

/// Facility of the second arrival, i.e. where the casualty went from POI.
pub fn first_hop(casualty: &Casualty) -> Option<Facility> {
    casualty.facilities_visited().nth(1)
}

/// First-hop counts per triage, over casualties that left POI.
pub fn first_hop_counts(casualties: &[Casualty]) -> BTreeMap<Triage, BTreeMap<Facility, u64>> {
    let mut counts: BTreeMap<Triage, BTreeMap<Facility, u64>> = BTreeMap::new();
    for c in casualties {
        if let Some(f) = first_hop(c) {
            *counts.entry(c.triage).or_default().entry(f).or_insert(0) += 1;
        }
    }
    counts
}

/// Share of POI departures routed to each facility. `None` pools all triages.
pub fn first_hop_shares(casualties: &[Casualty], triage: Option<Triage>) -> BTreeMap<Facility, f64> {
    shares_from_counts(&first_hop_counts(casualties), triage)
}

fn shares_from_counts(
    counts_by_triage: &BTreeMap<Triage, BTreeMap<Facility, u64>>,
    triage: Option<Triage>,
) -> BTreeMap<Facility, f64> {
    let mut counts: BTreeMap<Facility, u64> = BTreeMap::new();
    for (t, per) in counts_by_triage {
        if triage.is_some_and(|wanted| wanted != *t) {
            continue;
        }
        for (f, n) in per {
            *counts.entry(*f).or_insert(0) += n;
        }
    }
    let total: u64 = counts.values().sum();
    if total == 0 {
        return BTreeMap::new();
    }
    counts.into_iter().map(|(f, n)| (f, n as f64 / total as f64)).collect()
}

/// Observed doctrine check: the same thresholds as the table check, applied
/// to realised first hops. Triages with no POI departures are skipped.
pub fn doctrine_report(casualties: &[Casualty], doctrine: &DoctrineConfig) -> Vec<DoctrineViolation> {
    doctrine_from_counts(&first_hop_counts(casualties), doctrine)
}

fn doctrine_from_counts(
    counts: &BTreeMap<Triage, BTreeMap<Facility, u64>>,
    doctrine: &DoctrineConfig,
) -> Vec<DoctrineViolation> {
    let mut violations = Vec::new();
    for triage in Triage::ALL {
        let shares = shares_from_counts(counts, Some(triage));
        if shares.is_empty() {
            continue;
        }
        violations.extend(check_first_hop_shares(triage, &shares, doctrine));
    }
    violations
}

/// Distribution statistics for a continuous metric.
#[derive(Debug, Clone, Serialize)]
pub struct DistStats {
    pub n: usize,
    pub min: f64,
    pub p5: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

pub fn percentile_stats(values: &mut [f64]) -> Option<DistStats> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();

    let interp = |p: f64| -> f64 {
        let h = p * (n - 1) as f64;
        let lo = h.floor() as usize;
        let hi = (lo + 1).min(n - 1);
        let frac = h - lo as f64;
        values[lo] * (1.0 - frac) + values[hi] * frac
    };

    let mean = values.iter().sum::<f64>() / n as f64;
    let variance =
        if n > 1 { values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64 } else { 0.0 };

    Some(DistStats {
        n,
        min: values[0],
        p5: interp(0.05),
        p25: interp(0.25),
        p50: interp(0.50),
        p75: interp(0.75),
        p95: interp(0.95),
        max: values[n - 1],
        mean,
        std_dev: variance.sqrt(),
    })
}

/// Hours from injury to final disposition, per (triage, disposition).
pub fn time_to_disposition(casualties: &[Casualty]) -> BTreeMap<(Triage, Disposition), DistStats> {
    let mut buckets: BTreeMap<(Triage, Disposition), Vec<f64>> = BTreeMap::new();
    for c in casualties {
        if let Some(h) = c.time_to_disposition() {
            buckets.entry((c.triage, c.disposition)).or_default().push(h);
        }
    }
    stats_by_key(buckets)
}

fn stats_by_key<K: Ord>(buckets: BTreeMap<K, Vec<f64>>) -> BTreeMap<K, DistStats> {
    buckets
        .into_iter()
        .filter_map(|(key, mut values)| percentile_stats(&mut values).map(|s| (key, s)))
        .collect()
}

/// A structural problem in an emitted record stream.
#[derive(Debug, Clone)]
pub enum IntegrityViolation {
    MalformedTimeline { casualty: CasualtyId, detail: String },
    DuplicateId { casualty: CasualtyId },
    ArrivalOutOfOrder { casualty: CasualtyId, arrival_hour: f64, previous: f64 },
    RecordCount { emitted: usize, summary: usize },
    SummaryMismatch { what: &'static str },
    BloodVolumeRose { casualty: CasualtyId, index: usize },
    ExsanguinatedNotKia { casualty: CasualtyId, disposition: Disposition },
    BelowThresholdBeforeEnd { casualty: CasualtyId, index: usize },
}

impl std::fmt::Display for IntegrityViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedTimeline { casualty, detail } => {
                write!(f, "MalformedTimeline casualty={} {detail}", casualty.0)
            }
            Self::DuplicateId { casualty } => write!(f, "DuplicateId casualty={}", casualty.0),
            Self::ArrivalOutOfOrder { casualty, arrival_hour, previous } => {
                write!(f, "ArrivalOutOfOrder casualty={} arrival={arrival_hour:.4} previous={previous:.4}", casualty.0)
            }
            Self::RecordCount { emitted, summary } => {
                write!(f, "RecordCount emitted={emitted} summary={summary}")
            }
            Self::SummaryMismatch { what } => write!(f, "SummaryMismatch {what}"),
            Self::BloodVolumeRose { casualty, index } => {
                write!(f, "BloodVolumeRose casualty={} event={index}", casualty.0)
            }
            Self::ExsanguinatedNotKia { casualty, disposition } => {
                write!(f, "ExsanguinatedNotKia casualty={} disposition={disposition}", casualty.0)
            }
            Self::BelowThresholdBeforeEnd { casualty, index } => {
                write!(f, "BelowThresholdBeforeEnd casualty={} event={index}", casualty.0)
            }
        }
    }
}

fn verify_bleeding(c: &Casualty, violations: &mut Vec<IntegrityViolation>) {
    let snapshots: Vec<f64> = c.timeline.iter().filter_map(|e| e.blood_volume).collect();
    for (i, pair) in snapshots.windows(2).enumerate() {
        if pair[1] > pair[0] {
            violations.push(IntegrityViolation::BloodVolumeRose { casualty: c.id, index: i + 1 });
        }
    }
    // Only the terminal event may be recorded below the threshold.
    let last = c.timeline.len().saturating_sub(1);
    for (i, e) in c.timeline.iter().enumerate() {
        let below = e.blood_volume.is_some_and(|bv| bv < EXSANGUINATION_THRESHOLD);
        if below && i != last {
            violations.push(IntegrityViolation::BelowThresholdBeforeEnd { casualty: c.id, index: i });
        }
    }
    let exsanguinated = c.hemorrhage_outcome.as_ref().is_some_and(|o| o.exsanguinated_at.is_some());
    if exsanguinated && c.disposition != Disposition::Kia {
        violations.push(IntegrityViolation::ExsanguinatedNotKia { casualty: c.id, disposition: c.disposition });
    }
}

/// Record-by-record integrity checks. Feed every emitted record in order,
/// then compare against the run summary with [`IntegrityCheck::finish`].
#[derive(Debug)]
pub struct IntegrityCheck {
    seen: HashSet<CasualtyId>,
    previous: f64,
    reduced: TimelineSummary,
    violations: Vec<IntegrityViolation>,
}

impl Default for IntegrityCheck {
    fn default() -> Self {
        IntegrityCheck {
            seen: HashSet::new(),
            previous: f64::NEG_INFINITY,
            reduced: TimelineSummary::default(),
            violations: Vec::new(),
        }
    }
}

impl IntegrityCheck {
    pub fn add(&mut self, c: &Casualty) {
        if let Err(e) = assembler::seal(c) {
            self.violations.push(IntegrityViolation::MalformedTimeline { casualty: c.id, detail: e.to_string() });
        }
        if !self.seen.insert(c.id) {
            self.violations.push(IntegrityViolation::DuplicateId { casualty: c.id });
        }
        if c.arrival_hour < self.previous {
            self.violations.push(IntegrityViolation::ArrivalOutOfOrder {
                casualty: c.id,
                arrival_hour: c.arrival_hour,
                previous: self.previous,
            });
        }
        self.previous = c.arrival_hour;
        verify_bleeding(c, &mut self.violations);
        self.reduced.add(c);
    }

    pub fn finish(&self, summary: &RunSummary) -> Vec<IntegrityViolation> {
        let mut violations = self.violations.clone();
        if self.reduced.records != summary.emitted {
            violations.push(IntegrityViolation::RecordCount { emitted: self.reduced.records, summary: summary.emitted });
        }
        if self.reduced.dispositions != summary.dispositions {
            violations.push(IntegrityViolation::SummaryMismatch { what: "dispositions" });
        }
        if self.reduced.facility_arrivals != summary.facility_arrivals {
            violations.push(IntegrityViolation::SummaryMismatch { what: "facility arrivals" });
        }
        violations
    }
}

/// Check the emitted records against each other and against the run summary.
pub fn verify_integrity(casualties: &[Casualty], summary: &RunSummary) -> Vec<IntegrityViolation> {
    let mut check = IntegrityCheck::default();
    for c in casualties {
        check.add(c);
    }
    check.finish(summary)
}

/// Share of arrivals whose first TimelineEvent after POI arrival is a
/// transit start within `hours` of injury. Used as a crude evacuation
/// responsiveness indicator.
pub fn evacuated_within(casualties: &[Casualty], hours: f64) -> f64 {
    if casualties.is_empty() {
        return 0.0;
    }
    let quick = casualties.iter().filter(|c| left_poi_within(c, hours)).count();
    quick as f64 / casualties.len() as f64
}

fn left_poi_within(c: &Casualty, hours: f64) -> bool {
    c.timeline.iter().find(|e| e.kind == TimelineEventKind::TransitStart).is_some_and(|e| e.hours <= hours)
}

/// Every driver report folded one record at a time, so a streamed run
/// never has to hold its records. Only the hours-to-disposition samples
/// are kept, one `f64` per record.
#[derive(Debug)]
pub struct RunReport {
    pub timeline: TimelineSummary,
    first_hops: BTreeMap<Triage, BTreeMap<Facility, u64>>,
    hours_to_disposition: BTreeMap<(Triage, Disposition), Vec<f64>>,
    evacuation_window: f64,
    evacuated: usize,
    integrity: IntegrityCheck,
}

impl RunReport {
    /// `evacuation_window` is the horizon, in hours, for [`RunReport::evacuated_share`].
    pub fn new(evacuation_window: f64) -> Self {
        RunReport {
            timeline: TimelineSummary::default(),
            first_hops: BTreeMap::new(),
            hours_to_disposition: BTreeMap::new(),
            evacuation_window,
            evacuated: 0,
            integrity: IntegrityCheck::default(),
        }
    }

    pub fn add(&mut self, c: &Casualty) {
        self.timeline.add(c);
        if let Some(f) = first_hop(c) {
            *self.first_hops.entry(c.triage).or_default().entry(f).or_insert(0) += 1;
        }
        if let Some(h) = c.time_to_disposition() {
            self.hours_to_disposition.entry((c.triage, c.disposition)).or_default().push(h);
        }
        if left_poi_within(c, self.evacuation_window) {
            self.evacuated += 1;
        }
        self.integrity.add(c);
    }

    pub fn first_hop_shares(&self, triage: Option<Triage>) -> BTreeMap<Facility, f64> {
        shares_from_counts(&self.first_hops, triage)
    }

    pub fn doctrine_report(&self, doctrine: &DoctrineConfig) -> Vec<DoctrineViolation> {
        doctrine_from_counts(&self.first_hops, doctrine)
    }

    pub fn time_to_disposition(&self) -> BTreeMap<(Triage, Disposition), DistStats> {
        stats_by_key(self.hours_to_disposition.clone())
    }

    pub fn evacuation_window(&self) -> f64 {
        self.evacuation_window
    }

    pub fn evacuated_share(&self) -> f64 {
        if self.timeline.records == 0 {
            return 0.0;
        }
        self.evacuated as f64 / self.timeline.records as f64
    }

    pub fn integrity(&self, summary: &RunSummary) -> Vec<IntegrityViolation> {
        self.integrity.finish(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::casualty::Demographics;
    use crate::events::TimelineEvent;
    use crate::types::{FrontId, InjuryCategory, InjuryMechanism};
    use crate::warfare::WarfareArchetype;

    fn ev(facility: Facility, kind: TimelineEventKind, hours: f64) -> TimelineEvent {
        TimelineEvent { facility, kind, hours, blood_volume: None }
    }

    fn casualty(id: u64, triage: Triage, hops: &[Facility], disposition: Disposition) -> Casualty {
        let mut timeline = vec![ev(Facility::Poi, TimelineEventKind::Arrival, 0.0)];
        let mut t = 0.0;
        let mut at = Facility::Poi;
        for &next in hops {
            t += 1.0;
            timeline.push(ev(at, TimelineEventKind::EvacuationStart, t));
            t += 1.0;
            timeline.push(ev(at, TimelineEventKind::TransitStart, t));
            t += 1.0;
            timeline.push(ev(next, TimelineEventKind::TransitEnd, t));
            t += 1.0;
            timeline.push(ev(next, TimelineEventKind::Arrival, t));
            at = next;
        }
        t += 1.0;
        timeline.push(ev(at, TimelineEventKind::Outcome(disposition), t));
        Casualty {
            id: CasualtyId(id),
            arrival_hour: id as f64,
            front: FrontId("main".to_string()),
            nationality: "USA".to_string(),
            warfare: WarfareArchetype::Conventional,
            injury: InjuryCategory::Battle,
            mechanism: InjuryMechanism::Burn,
            triage,
            timeline,
            disposition,
            hemorrhage: None,
            hemorrhage_outcome: None,
            demographics: Demographics::default(),
        }
    }

    fn sample() -> Vec<Casualty> {
        vec![
            casualty(0, Triage::T1, &[Facility::Role1, Facility::Role2], Disposition::Rtd),
            casualty(1, Triage::T1, &[Facility::Role2], Disposition::Kia),
            casualty(2, Triage::T2, &[Facility::Role1], Disposition::Rtd),
            casualty(3, Triage::T3, &[], Disposition::Rtd),
            casualty(
                4,
                Triage::T1,
                &[Facility::Role4],
                Disposition::RemainsAtRole4,
            ),
        ]
    }

    fn summary_of(casualties: &[Casualty]) -> RunSummary {
        let reduced = TimelineSummary::from_casualties(casualties);
        RunSummary {
            requested: casualties.len(),
            emitted: casualties.len(),
            dispositions: reduced.dispositions,
            facility_arrivals: reduced.facility_arrivals,
            incomplete: false,
        }
    }

    // ── Reducers ───────────────────────────────────────────────────────────

    #[test]
    fn summary_counts_facilities_and_dispositions() {
        let s = TimelineSummary::from_casualties(&sample());
        assert_eq!(s.records, 5);
        assert_eq!(s.facility_arrivals[&Facility::Poi], 5);
        assert_eq!(s.facility_arrivals[&Facility::Role1], 2);
        assert_eq!(s.facility_arrivals[&Facility::Role2], 2);
        assert_eq!(s.facility_arrivals[&Facility::Role4], 1);
        assert_eq!(s.dispositions[&Disposition::Rtd], 3);
        assert_eq!(s.dispositions[&Disposition::Kia], 1);
        assert_eq!(s.dispositions[&Disposition::RemainsAtRole4], 1);
    }

    #[test]
    fn first_hop_shares_skip_casualties_that_never_left_poi() {
        let shares = first_hop_shares(&sample(), None);
        assert!((shares[&Facility::Role1] - 0.5).abs() < 1e-12);
        assert!((shares[&Facility::Role2] - 0.25).abs() < 1e-12);
        assert!((shares[&Facility::Role4] - 0.25).abs() < 1e-12);

        let t1 = first_hop_shares(&sample(), Some(Triage::T1));
        assert!((t1[&Facility::Role1] - 1.0 / 3.0).abs() < 1e-12);
        assert!(first_hop_shares(&sample(), Some(Triage::T3)).is_empty());
    }

    #[test]
    fn doctrine_report_flags_observed_skip_rate() {
        let violations = doctrine_report(&sample(), &DoctrineConfig::default());
        assert!(violations.iter().any(|v| matches!(v, DoctrineViolation::SkipOutsideBand { triage: Triage::T1, .. })));
    }

    #[test]
    fn time_to_disposition_groups_by_triage_and_outcome() {
        let stats = time_to_disposition(&sample());
        let t1_rtd = &stats[&(Triage::T1, Disposition::Rtd)];
        assert_eq!(t1_rtd.n, 1);
        assert!((t1_rtd.p50 - 9.0).abs() < 1e-12);
        assert!((stats[&(Triage::T3, Disposition::Rtd)].max - 1.0).abs() < 1e-12);
    }

    #[test]
    fn evacuated_within_counts_transit_starts() {
        // Every casualty that leaves POI starts transit at hour 2.
        assert!((evacuated_within(&sample(), 2.0) - 0.8).abs() < 1e-12);
        assert_eq!(evacuated_within(&sample(), 1.0), 0.0);
    }

    #[test]
    fn run_report_folds_the_same_figures_as_the_slice_reducers() {
        let all = sample();
        let mut report = RunReport::new(2.0);
        for c in &all {
            report.add(c);
        }
        assert_eq!(report.timeline, TimelineSummary::from_casualties(&all));
        for triage in [None, Some(Triage::T1), Some(Triage::T3)] {
            assert_eq!(report.first_hop_shares(triage), first_hop_shares(&all, triage));
        }
        assert_eq!(report.doctrine_report(&DoctrineConfig::default()), doctrine_report(&all, &DoctrineConfig::default()));
        let streamed: Vec<_> = report.time_to_disposition().into_iter().map(|(k, s)| (k, s.n, s.p50)).collect();
        let sliced: Vec<_> = time_to_disposition(&all).into_iter().map(|(k, s)| (k, s.n, s.p50)).collect();
        assert_eq!(streamed, sliced);
        assert!((report.evacuated_share() - 0.8).abs() < 1e-12);
        assert!(report.integrity(&summary_of(&all)).is_empty());
    }

    #[test]
    fn run_report_flags_short_record_stream() {
        let all = sample();
        let mut report = RunReport::new(1.0);
        for c in &all[..3] {
            report.add(c);
        }
        let violations = report.integrity(&summary_of(&all));
        assert!(violations.iter().any(|v| matches!(v, IntegrityViolation::RecordCount { emitted: 3, summary: 5 })));
    }

    // ── Integrity ──────────────────────────────────────────────────────────

    #[test]
    fn clean_stream_has_no_violations() {
        let all = sample();
        let violations = verify_integrity(&all, &summary_of(&all));
        assert!(violations.is_empty(), "{violations:?}");
    }

    #[test]
    fn summary_mismatch_detected() {
        let all = sample();
        let mut summary = summary_of(&all);
        *summary.dispositions.get_mut(&Disposition::Rtd).unwrap() += 1;
        let violations = verify_integrity(&all, &summary);
        assert!(violations.iter().any(|v| matches!(v, IntegrityViolation::SummaryMismatch { what: "dispositions" })));
    }

    #[test]
    fn malformed_and_duplicate_records_detected() {
        let mut all = sample();
        all[2].timeline.swap(1, 2);
        all[3].id = CasualtyId(2);
        let violations = verify_integrity(&all, &summary_of(&all));
        assert!(violations.iter().any(|v| matches!(v, IntegrityViolation::MalformedTimeline { .. })));
        assert!(violations.iter().any(|v| matches!(v, IntegrityViolation::DuplicateId { .. })));
    }

    #[test]
    fn rising_blood_volume_detected() {
        let mut all = sample();
        let snapshots = [1.0, 0.9, 0.95, 0.8, 0.7, 0.6, 0.5, 0.45, 0.42, 0.41];
        for (e, bv) in all[0].timeline.iter_mut().zip(snapshots) {
            e.blood_volume = Some(bv);
        }
        let violations = verify_integrity(&all, &summary_of(&all));
        assert!(violations.iter().any(|v| matches!(v, IntegrityViolation::BloodVolumeRose { index: 2, .. })));
    }

    #[test]
    fn percentile_stats_known_values() {
        let mut values = vec![5.0, 1.0, 3.0, 2.0, 4.0];
        let ds = percentile_stats(&mut values).unwrap();
        assert_eq!(ds.n, 5);
        assert!((ds.min - 1.0).abs() < 1e-10, "min");
        assert!((ds.max - 5.0).abs() < 1e-10, "max");
        assert!((ds.p50 - 3.0).abs() < 1e-10, "p50");
        assert!((ds.mean - 3.0).abs() < 1e-10, "mean");
    }

    #[test]
    fn percentile_stats_empty_returns_none() {
        let mut values: Vec<f64> = vec![];
        assert!(percentile_stats(&mut values).is_none());
    }
}
