//! Casualty attribute assigner: front, nationality, warfare source, injury
//! category, mechanism, triage and hemorrhage profile for each arrival.

use std::collections::BTreeMap;

use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;

use crate::casualty::CasualtyShell;
use crate::config::ScenarioConfig;
use crate::error::SimulationInvariantError;
use crate::hemorrhage::HemorrhageModel;
use crate::types::{CasualtyId, FrontId, InjuryCategory, InjuryMechanism, Triage};
use crate::warfare::{NON_BATTLE_MECHANISMS, ResolvedProfile, WarfareArchetype, WarfareModel};

/// A pre-built categorical distribution over `T`.
#[derive(Debug, Clone)]
pub struct Categorical<T> {
    values: Vec<T>,
    index: WeightedIndex<f64>,
}

impl<T: Clone> Categorical<T> {
    pub fn new(entries: Vec<(T, f64)>, what: &str) -> Result<Self, SimulationInvariantError> {
        let index = WeightedIndex::new(entries.iter().map(|(_, w)| *w))
            .map_err(|e| SimulationInvariantError::EmptyDistribution(format!("{what}: {e}")))?;
        Ok(Categorical { values: entries.into_iter().map(|(v, _)| v).collect(), index })
    }

    pub fn sample(&self, rng: &mut impl Rng) -> T {
        self.values[self.index.sample(rng)].clone()
    }
}

#[derive(Debug, Clone)]
struct FrontSampler {
    id: FrontId,
    nationalities: Categorical<String>,
}

#[derive(Debug, Clone)]
pub struct AttributeAssigner {
    fronts: Vec<FrontSampler>,
    front_index: Categorical<usize>,
    archetypes: Categorical<WarfareArchetype>,
    injuries: Categorical<InjuryCategory>,
    battle_mechanisms: BTreeMap<WarfareArchetype, Categorical<InjuryMechanism>>,
    non_battle_mechanisms: Categorical<InjuryMechanism>,
    triage: BTreeMap<(WarfareArchetype, InjuryCategory), Categorical<Triage>>,
    hemorrhage: HemorrhageModel,
}

impl AttributeAssigner {
    pub fn new(
        config: &ScenarioConfig,
        profile: &ResolvedProfile,
        hemorrhage: HemorrhageModel,
    ) -> Result<Self, SimulationInvariantError> {
        let mut fronts = Vec::with_capacity(config.fronts.len());
        for front in &config.fronts {
            let entries = front.nationalities.iter().map(|(code, pct)| (code.clone(), *pct)).collect();
            fronts.push(FrontSampler {
                id: FrontId(front.id.clone()),
                nationalities: Categorical::new(entries, &format!("front `{}` nationalities", front.id))?,
            });
        }
        let front_index = Categorical::new(
            config.fronts.iter().enumerate().map(|(i, f)| (i, f.casualty_rate)).collect(),
            "front shares",
        )?;
        let archetypes = Categorical::new(profile.archetypes.clone(), "warfare archetypes")?;

        let mix = profile.injury_mix;
        let injuries = Categorical::new(
            vec![
                (InjuryCategory::Disease, mix.disease),
                (InjuryCategory::NonBattle, mix.non_battle),
                (InjuryCategory::Battle, mix.battle),
            ],
            "injury mix",
        )?;

        let mut battle_mechanisms = BTreeMap::new();
        let mut triage = BTreeMap::new();
        for &(archetype, _) in &profile.archetypes {
            battle_mechanisms.insert(
                archetype,
                Categorical::new(archetype.battle_mechanisms().entries().to_vec(), "battle mechanisms")?,
            );
            for injury in InjuryCategory::ALL {
                let weights = profile.triage_weights(archetype, injury).to_vec();
                triage.insert((archetype, injury), Categorical::new(weights, "triage skew")?);
            }
        }
        let non_battle_mechanisms =
            Categorical::new(NON_BATTLE_MECHANISMS.entries().to_vec(), "non-battle mechanisms")?;

        Ok(AttributeAssigner {
            fronts,
            front_index,
            archetypes,
            injuries,
            battle_mechanisms,
            non_battle_mechanisms,
            triage,
            hemorrhage,
        })
    }

    pub fn hemorrhage(&self) -> &HemorrhageModel {
        &self.hemorrhage
    }

    /// Draw every attribute of one casualty. The draw order is fixed so a
    /// given RNG stream always yields the same shell.
    pub fn assign(
        &self,
        id: CasualtyId,
        arrival_hour: f64,
        rng: &mut impl Rng,
    ) -> Result<CasualtyShell, SimulationInvariantError> {
        let front = &self.fronts[self.front_index.sample(rng)];
        let nationality = front.nationalities.sample(rng);
        let warfare = self.archetypes.sample(rng);
        let injury = self.injuries.sample(rng);

        let mechanism = match injury {
            InjuryCategory::Disease => InjuryMechanism::Disease,
            InjuryCategory::NonBattle => self.non_battle_mechanisms.sample(rng),
            InjuryCategory::Battle => self
                .battle_mechanisms
                .get(&warfare)
                .ok_or_else(|| SimulationInvariantError::EmptyDistribution(format!("battle mechanisms for {warfare}")))?
                .sample(rng),
        };
        let triage = self
            .triage
            .get(&(warfare, injury))
            .ok_or_else(|| SimulationInvariantError::EmptyDistribution(format!("triage skew for {warfare}/{injury}")))?
            .sample(rng);
        let hemorrhage = self.hemorrhage.assign(mechanism, triage, rng)?;

        Ok(CasualtyShell {
            id,
            arrival_hour,
            front: front.id.clone(),
            nationality,
            warfare,
            injury,
            mechanism,
            triage,
            hemorrhage,
        })
    }
}
