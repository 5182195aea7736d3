use thiserror::Error;

use crate::types::{CasualtyId, Facility, Triage};

/// Raised before any generation starts when the scenario is inconsistent.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("no warfare archetype configured")]
    NoWarfare,

    #[error("warfare archetype weights must sum to a positive value, got {0}")]
    NonPositiveWarfareWeights(f64),

    #[error("unknown warfare archetype `{0}`")]
    UnknownArchetype(String),

    #[error("battle duration must be at least one day")]
    ZeroDuration,

    #[error("{what} percentages sum to {sum}, expected 100")]
    PercentageSum { what: String, sum: f64 },

    #[error("{what} has a negative or non-finite weight")]
    InvalidWeight { what: String },

    #[error("duplicate front identifier `{0}`")]
    DuplicateFront(String),

    #[error("no front configured")]
    NoFronts,

    #[error("{kind} window [{start}, {end}) h lies outside the {duration} h battle")]
    EventWindowOutOfRange { kind: String, start: f64, end: f64, duration: f64 },

    #[error("{kind} multiplier must be positive, got {multiplier}")]
    InvalidEventMultiplier { kind: String, multiplier: f64 },

    #[error("injury mix cannot be renormalized: {0}")]
    InjuryMixNotRenormalizable(String),

    #[error("facility {facility} triage {triage}: {detail}")]
    FacilityTable { facility: Facility, triage: Triage, detail: String },

    #[error("invalid {what} distribution: {detail}")]
    InvalidDuration { what: String, detail: String },

    #[error("invalid hemorrhage parameter: {0}")]
    Hemorrhage(String),

    #[error("batch size must be positive")]
    ZeroBatchSize,

    #[error("could not build worker pool: {0}")]
    WorkerPool(String),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Fatal: indicates a data/config integration bug, never expected with
/// validated input.
#[derive(Debug, Error)]
pub enum SimulationInvariantError {
    #[error("transition row for {facility}/{triage} sums to {sum}, expected 1")]
    TransitionRowSum { facility: Facility, triage: Triage, sum: f64 },

    #[error("no transition row for {facility}/{triage}")]
    MissingTransitionRow { facility: Facility, triage: Triage },

    #[error("degenerate categorical distribution for {0}")]
    EmptyDistribution(String),

    #[error("casualty {casualty:?}: malformed timeline: {detail}")]
    Timeline { casualty: CasualtyId, detail: String },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Invariant(#[from] SimulationInvariantError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
