use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::arrivals::generate_arrivals;
use crate::assembler;
use crate::attributes::AttributeAssigner;
use crate::casualty::Casualty;
use crate::config::ScenarioConfig;
use crate::error::{ConfigurationError, Result, SimulationInvariantError};
use crate::facility::{DoctrineViolation, TransitionTable, check_doctrine};
use crate::flow::{FlowCounters, FlowEngine, OutcomeHook};
use crate::hemorrhage::HemorrhageModel;
use crate::types::{CasualtyId, Disposition, Facility};
use crate::warfare::{ResolvedProfile, resolve};

/// Per-run knobs that do not change what is generated, only how.
/// The seed is the exception: it selects the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub seed: u64,
    pub batch_size: usize,
    /// Worker threads; 0 lets rayon decide.
    pub workers: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions { seed: 42, batch_size: 256, workers: 0 }
    }
}

/// Cooperative cancellation, checked between batches.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Completed-casualty counter for one run, shared with whoever reports
/// progress. Give each concurrent run its own.
#[derive(Debug, Clone, Default)]
pub struct Progress(Arc<AtomicUsize>);

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completed(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    fn tick(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

/// Totals the engine tracked while generating.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub requested: usize,
    pub emitted: usize,
    pub dispositions: BTreeMap<Disposition, u64>,
    pub facility_arrivals: BTreeMap<Facility, u64>,
    /// Set when cancellation stopped the run before every batch was emitted.
    pub incomplete: bool,
}

impl RunSummary {
    pub fn count(&self, disposition: Disposition) -> u64 {
        self.dispositions.get(&disposition).copied().unwrap_or(0)
    }
}

pub struct Simulation {
    config: ScenarioConfig,
    profile: ResolvedProfile,
    assigner: AttributeAssigner,
    engine: FlowEngine,
    doctrine_violations: Vec<DoctrineViolation>,
}

impl Simulation {
    /// Validate the scenario and compile every table the run needs.
    pub fn from_config(config: ScenarioConfig) -> Result<Self> {
        config.validate()?;
        let profile = resolve(&config)?;

        let table = TransitionTable::from_chain(&config.facilities)?;
        table.check_sums()?;
        let doctrine_violations = check_doctrine(&table, &config.doctrine);
        for v in &doctrine_violations {
            warn!(violation = %v, "transition table misses a doctrine threshold");
        }

        let hemorrhage = HemorrhageModel::from_config(&config.hemorrhage)?;
        let engine =
            FlowEngine::new(&config.facilities, table, profile.transit_multiplier, hemorrhage.control_facility())?;
        let assigner = AttributeAssigner::new(&config, &profile, hemorrhage)?;

        info!(
            total_patients = config.total_patients,
            days = config.days_of_fighting,
            archetypes = profile.archetypes.len(),
            special_events = profile.special_events.len(),
            "scenario compiled"
        );
        Ok(Simulation { config, profile, assigner, engine, doctrine_violations })
    }

    pub fn with_outcome_hook(mut self, hook: Arc<dyn OutcomeHook>) -> Self {
        self.engine = self.engine.with_hook(hook);
        self
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub fn profile(&self) -> &ResolvedProfile {
        &self.profile
    }

    pub fn transition_table(&self) -> &TransitionTable {
        self.engine.table()
    }

    pub fn doctrine_violations(&self) -> &[DoctrineViolation] {
        &self.doctrine_violations
    }

    /// Arrival times for the whole run. Stream 0 of the seed.
    pub fn arrivals(&self, seed: u64) -> std::result::Result<Vec<f64>, SimulationInvariantError> {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        rng.set_stream(0);
        generate_arrivals(&self.profile.curve, self.config.total_patients, &mut rng)
    }

    /// One casualty's full trajectory: a pure function of (config, seed, index).
    fn simulate_one(
        &self,
        seed: u64,
        index: usize,
        arrival_hour: f64,
        progress: &Progress,
    ) -> std::result::Result<(Casualty, FlowCounters), SimulationInvariantError> {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        rng.set_stream(index as u64 + 1);

        let shell = self.assigner.assign(CasualtyId(index as u64), arrival_hour, &mut rng)?;
        let mut counters = FlowCounters::default();
        let flow = self.engine.run(shell.triage, shell.hemorrhage.clone(), &mut counters, &mut rng)?;
        let casualty = assembler::assemble(shell, flow)?;
        progress.tick();
        Ok((casualty, counters))
    }

    /// Generate every casualty, handing each completed batch to `sink` in
    /// casualty order. Output is identical for any batch size or worker count.
    /// `progress` counts this run's completed casualties.
    pub fn run_batched<F>(
        &self,
        options: &RunOptions,
        cancel: &CancellationToken,
        progress: &Progress,
        mut sink: F,
    ) -> Result<RunSummary>
    where
        F: FnMut(Vec<Casualty>),
    {
        if options.batch_size == 0 {
            return Err(ConfigurationError::ZeroBatchSize.into());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.workers)
            .build()
            .map_err(|e| ConfigurationError::WorkerPool(e.to_string()))?;

        let arrivals = self.arrivals(options.seed)?;
        let mut totals = FlowCounters::default();
        let mut summary = RunSummary { requested: arrivals.len(), ..RunSummary::default() };
        info!(seed = options.seed, batch_size = options.batch_size, workers = options.workers, "run started");

        for (batch_index, chunk) in arrivals.chunks(options.batch_size).enumerate() {
            if cancel.is_cancelled() {
                warn!(batch = batch_index, emitted = summary.emitted, "run cancelled");
                summary.incomplete = true;
                break;
            }
            let start = batch_index * options.batch_size;
            let results: std::result::Result<Vec<(Casualty, FlowCounters)>, SimulationInvariantError> =
                pool.install(|| {
                    chunk
                        .par_iter()
                        .enumerate()
                        .map(|(offset, &arrival)| self.simulate_one(options.seed, start + offset, arrival, progress))
                        .collect()
                });

            let mut batch = Vec::with_capacity(chunk.len());
            for (casualty, counters) in results? {
                totals.merge(&counters);
                batch.push(casualty);
            }
            summary.emitted += batch.len();
            debug!(batch = batch_index, size = batch.len(), emitted = summary.emitted, "batch complete");
            sink(batch);
        }

        summary.dispositions = totals.dispositions;
        summary.facility_arrivals = totals.facility_arrivals;
        info!(
            emitted = summary.emitted,
            kia = summary.count(Disposition::Kia),
            rtd = summary.count(Disposition::Rtd),
            remain = summary.count(Disposition::RemainsAtRole4),
            incomplete = summary.incomplete,
            "run finished"
        );
        Ok(summary)
    }

    /// Collect every record in memory.
    pub fn run(&self, options: &RunOptions) -> Result<(Vec<Casualty>, RunSummary)> {
        let mut all = Vec::with_capacity(self.config.total_patients);
        let summary =
            self.run_batched(options, &CancellationToken::new(), &Progress::new(), |batch| all.extend(batch))?;
        Ok((all, summary))
    }
}
