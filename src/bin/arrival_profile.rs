use std::env;
use std::process::ExitCode;

use casevac::config::ScenarioConfig;
use casevac::simulation::{RunOptions, Simulation};
use casevac::types::HOURS_PER_DAY;

/// Prints the generated arrival times as NDJSON on stdout and an hourly
/// histogram on stderr. Optional argument: path to a TOML scenario.
fn main() -> ExitCode {
    let config = match env::args().nth(1) {
        Some(path) => match std::fs::read_to_string(&path).map_err(|e| e.to_string()).and_then(|text| {
            ScenarioConfig::from_toml_str(&text).map_err(|e| e.to_string())
        }) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("arrival_profile: {path}: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => ScenarioConfig::canonical(),
    };
    let seed = env::args().nth(2).and_then(|s| s.parse().ok()).unwrap_or(RunOptions::default().seed);

    let sim = match Simulation::from_config(config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("arrival_profile: {e}");
            return ExitCode::FAILURE;
        }
    };
    let arrivals = match sim.arrivals(seed) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("arrival_profile: {e}");
            return ExitCode::FAILURE;
        }
    };

    for (i, hour) in arrivals.iter().enumerate() {
        println!("{}", serde_json::json!({ "index": i, "hour": hour }));
    }

    let profile = sim.profile();
    let hours = profile.duration_hours.ceil() as usize;
    let mut counts = vec![0usize; hours];
    for t in &arrivals {
        let h = (*t as usize).min(hours.saturating_sub(1));
        counts[h] += 1;
    }
    eprintln!(
        "arrival_profile: {} arrivals over {:.0} h ({} day(s)), seed {seed}",
        arrivals.len(),
        profile.duration_hours,
        (profile.duration_hours / HOURS_PER_DAY) as u32
    );
    for w in &profile.special_events {
        eprintln!("  window {:<15} [{:>6.2}, {:>6.2}) ×{:.1}", w.kind.label(), w.start, w.end, w.multiplier);
    }
    let peak = counts.iter().copied().max().unwrap_or(0).max(1);
    for (h, n) in counts.iter().enumerate() {
        let bar = "#".repeat(n * 50 / peak);
        eprintln!("  {h:>4}h  {n:>5}  {bar}");
    }
    ExitCode::SUCCESS
}
