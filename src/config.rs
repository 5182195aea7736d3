use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::facility::{DoctrineConfig, FacilityChain};
use crate::hemorrhage::HemorrhageConfig;
use crate::warfare::WarfareArchetype;

/// Tolerance on "percentages sum to 100" checks.
pub const PERCENT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intensity {
    Low,
    Medium,
    High,
    Extreme,
}

impl Intensity {
    /// Multiplier on the battle share of the injury mix.
    pub fn battle_factor(self) -> f64 {
        match self {
            Intensity::Low => 0.8,
            Intensity::Medium => 1.0,
            Intensity::High => 1.2,
            Intensity::Extreme => 1.4,
        }
    }

    /// Multiplier on the T1 weight of every triage skew row.
    pub fn t1_factor(self) -> f64 {
        match self {
            Intensity::Low => 0.8,
            Intensity::Medium => 1.0,
            Intensity::High => 1.25,
            Intensity::Extreme => 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tempo {
    Sustained,
    Escalating,
    Surge,
    Declining,
    Intermittent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialEventKind {
    MajorOffensive,
    Ambush,
    MassCasualty,
}

impl SpecialEventKind {
    pub fn default_multiplier(self) -> f64 {
        match self {
            SpecialEventKind::MajorOffensive => 3.0,
            SpecialEventKind::Ambush => 2.0,
            SpecialEventKind::MassCasualty => 5.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SpecialEventKind::MajorOffensive => "major offensive",
            SpecialEventKind::Ambush => "ambush",
            SpecialEventKind::MassCasualty => "mass casualty",
        }
    }
}

/// A declared burst of casualties: `[start_hour, start_hour + duration_hours)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialEventConfig {
    pub kind: SpecialEventKind,
    pub start_hour: f64,
    pub duration_hours: f64,
    /// Overrides the kind's documented multiplier.
    #[serde(default)]
    pub multiplier: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weather {
    #[default]
    Clear,
    Rain,
    Snow,
    ExtremeHeat,
    ExtremeCold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terrain {
    #[default]
    Open,
    Urban,
    Mountain,
    Jungle,
    Desert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EnvironmentalModifiers {
    #[serde(default)]
    pub weather: Weather,
    #[serde(default)]
    pub terrain: Terrain,
    #[serde(default)]
    pub night_operations: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WarfareWeight {
    pub archetype: WarfareArchetype,
    pub weight: f64,
}

/// Disease / non-battle / battle split in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InjuryMix {
    pub disease: f64,
    pub non_battle: f64,
    pub battle: f64,
}

impl InjuryMix {
    pub fn total(&self) -> f64 {
        self.disease + self.non_battle + self.battle
    }
}

/// Additive percentage-point deltas on the injury mix.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct InjuryShift {
    #[serde(default)]
    pub disease: f64,
    #[serde(default)]
    pub non_battle: f64,
    #[serde(default)]
    pub battle: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontDefinition {
    pub id: String,
    pub name: String,
    /// Share of all casualties, in percent.
    pub casualty_rate: f64,
    /// Nationality code → percent.
    pub nationalities: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub total_patients: usize,
    pub days_of_fighting: u32,
    pub warfare: Vec<WarfareWeight>,
    pub intensity: Intensity,
    pub tempo: Tempo,
    #[serde(default)]
    pub special_events: Vec<SpecialEventConfig>,
    #[serde(default)]
    pub guaranteed_mass_casualty: bool,
    #[serde(default)]
    pub environment: EnvironmentalModifiers,
    pub fronts: Vec<FrontDefinition>,
    pub injury_mix: InjuryMix,
    #[serde(default)]
    pub injury_shift: Option<InjuryShift>,
    #[serde(default)]
    pub facilities: FacilityChain,
    #[serde(default)]
    pub hemorrhage: HemorrhageConfig,
    #[serde(default)]
    pub doctrine: DoctrineConfig,
}

impl ScenarioConfig {
    /// Reference scenario: 100 casualties over one day of conventional
    /// fighting on a single front.
    pub fn canonical() -> Self {
        ScenarioConfig {
            total_patients: 100,
            days_of_fighting: 1,
            warfare: vec![WarfareWeight { archetype: WarfareArchetype::Conventional, weight: 1.0 }],
            intensity: Intensity::Medium,
            tempo: Tempo::Sustained,
            special_events: Vec::new(),
            guaranteed_mass_casualty: false,
            environment: EnvironmentalModifiers::default(),
            fronts: vec![FrontDefinition {
                id: "main".to_string(),
                name: "Main Front".to_string(),
                casualty_rate: 100.0,
                nationalities: BTreeMap::from([
                    ("USA".to_string(), 60.0),
                    ("GBR".to_string(), 25.0),
                    ("POL".to_string(), 15.0),
                ]),
            }],
            injury_mix: InjuryMix { disease: 10.0, non_battle: 15.0, battle: 75.0 },
            injury_shift: None,
            facilities: FacilityChain::standard(),
            hemorrhage: HemorrhageConfig::default(),
            doctrine: DoctrineConfig::default(),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigurationError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigurationError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn duration_hours(&self) -> f64 {
        self.days_of_fighting as f64 * crate::types::HOURS_PER_DAY
    }

    /// Numeric well-formedness: percentage sums, non-empty lists, unique ids.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.days_of_fighting == 0 {
            return Err(ConfigurationError::ZeroDuration);
        }
        if self.warfare.is_empty() {
            return Err(ConfigurationError::NoWarfare);
        }
        if self.fronts.is_empty() {
            return Err(ConfigurationError::NoFronts);
        }

        let mut seen = HashSet::new();
        for front in &self.fronts {
            if !seen.insert(front.id.as_str()) {
                return Err(ConfigurationError::DuplicateFront(front.id.clone()));
            }
            check_weight(front.casualty_rate, &format!("front `{}` casualty rate", front.id))?;
            for (code, pct) in &front.nationalities {
                check_weight(*pct, &format!("front `{}` nationality `{code}`", front.id))?;
            }
            check_percent_sum(
                front.nationalities.values().sum(),
                &format!("front `{}` nationality distribution", front.id),
            )?;
        }
        check_percent_sum(self.fronts.iter().map(|f| f.casualty_rate).sum(), "front casualty-rate")?;

        let mix = &self.injury_mix;
        for (name, v) in [("disease", mix.disease), ("non-battle", mix.non_battle), ("battle", mix.battle)] {
            check_weight(v, &format!("injury mix {name}"))?;
        }
        check_percent_sum(mix.total(), "injury mix")?;

        for w in &self.warfare {
            check_weight(w.weight, &format!("warfare archetype {} weight", w.archetype))?;
        }
        Ok(())
    }
}

fn check_weight(value: f64, what: &str) -> Result<(), ConfigurationError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidWeight { what: what.to_string() })
    }
}

fn check_percent_sum(sum: f64, what: &str) -> Result<(), ConfigurationError> {
    if (sum - 100.0).abs() <= PERCENT_TOLERANCE {
        Ok(())
    } else {
        Err(ConfigurationError::PercentageSum { what: what.to_string(), sum })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_is_valid() {
        ScenarioConfig::canonical().validate().unwrap();
    }

    #[test]
    fn front_shares_must_sum_to_100() {
        let mut config = ScenarioConfig::canonical();
        config.fronts[0].casualty_rate = 90.0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigurationError::PercentageSum { .. }), "got {err}");
    }

    #[test]
    fn nationality_distribution_must_sum_to_100() {
        let mut config = ScenarioConfig::canonical();
        config.fronts[0].nationalities.insert("FRA".to_string(), 5.0);
        assert!(matches!(config.validate(), Err(ConfigurationError::PercentageSum { .. })));
    }

    #[test]
    fn injury_mix_must_sum_to_100() {
        let mut config = ScenarioConfig::canonical();
        config.injury_mix.battle = 70.0;
        assert!(matches!(config.validate(), Err(ConfigurationError::PercentageSum { .. })));
    }

    #[test]
    fn duplicate_front_ids_rejected() {
        let mut config = ScenarioConfig::canonical();
        let mut second = config.fronts[0].clone();
        config.fronts[0].casualty_rate = 50.0;
        second.casualty_rate = 50.0;
        config.fronts.push(second);
        assert!(matches!(config.validate(), Err(ConfigurationError::DuplicateFront(_))));
    }

    #[test]
    fn zero_days_rejected() {
        let mut config = ScenarioConfig::canonical();
        config.days_of_fighting = 0;
        assert!(matches!(config.validate(), Err(ConfigurationError::ZeroDuration)));
    }

    #[test]
    fn negative_warfare_weight_rejected() {
        let mut config = ScenarioConfig::canonical();
        config.warfare[0].weight = -1.0;
        assert!(matches!(config.validate(), Err(ConfigurationError::InvalidWeight { .. })));
    }

    #[test]
    fn loads_minimal_toml_with_defaults() {
        let toml = r#"
            total_patients = 250
            days_of_fighting = 3
            intensity = "high"
            tempo = "escalating"
            guaranteed_mass_casualty = true

            [[warfare]]
            archetype = "urban"
            weight = 2.0

            [[warfare]]
            archetype = "artillery"
            weight = 1.0

            [[special_events]]
            kind = "ambush"
            start_hour = 30.0
            duration_hours = 2.0

            [environment]
            weather = "rain"
            night_operations = true

            [[fronts]]
            id = "east"
            name = "Eastern Front"
            casualty_rate = 100.0
            nationalities = { UKR = 80.0, POL = 20.0 }

            [injury_mix]
            disease = 5.0
            non_battle = 15.0
            battle = 80.0
        "#;
        let config = ScenarioConfig::from_toml_str(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.total_patients, 250);
        assert_eq!(config.warfare.len(), 2);
        assert_eq!(config.warfare[0].archetype, WarfareArchetype::Urban);
        assert_eq!(config.environment.weather, Weather::Rain);
        assert_eq!(config.environment.terrain, Terrain::Open);
        assert!(config.environment.night_operations);
        assert_eq!(config.special_events[0].multiplier, None);
        assert_eq!(config.facilities, FacilityChain::standard());
    }

    #[test]
    fn json_round_trip_preserves_config() {
        let config = ScenarioConfig::canonical();
        let json = serde_json::to_string(&config).unwrap();
        let back = ScenarioConfig::from_json_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn malformed_toml_is_configuration_error() {
        let err = ScenarioConfig::from_toml_str("total_patients = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigurationError::Toml(_)));
    }
}
