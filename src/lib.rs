pub mod analysis;
pub mod arrivals;
pub mod assembler;
pub mod attributes;
pub mod casualty;
pub mod config;
pub mod durations;
pub mod error;
pub mod events;
pub mod facility;
pub mod flow;
pub mod hemorrhage;
pub mod simulation;
pub mod types;
pub mod warfare;

pub use casualty::Casualty;
pub use config::ScenarioConfig;
pub use error::{ConfigurationError, EngineError, SimulationInvariantError};
pub use simulation::{CancellationToken, Progress, RunOptions, RunSummary, Simulation};
