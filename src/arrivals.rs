//! Temporal event generator: exactly `n` arrival timestamps drawn from the
//! resolved intensity curve by inverse-CDF sampling over a fixed grid.

use rand::Rng;

use crate::error::SimulationInvariantError;
use crate::warfare::IntensityCurve;

/// Grid resolution of the piecewise-constant density.
pub const BINS_PER_HOUR: f64 = 4.0;

/// Piecewise-constant approximation of the intensity curve. Cell edges are
/// the quarter-hour breakpoints plus every special-event window edge, so a
/// window always covers whole cells.
#[derive(Debug, Clone)]
pub struct ArrivalGrid {
    edges: Vec<f64>,
    cumulative: Vec<f64>,
}

fn cell_edges(curve: &IntensityCurve) -> Vec<f64> {
    let duration = curve.duration_hours;
    let bins = (duration * BINS_PER_HOUR).ceil().max(1.0) as usize;
    let bin_width = duration / bins as f64;
    let mut edges: Vec<f64> = (0..bins).map(|i| i as f64 * bin_width).collect();
    edges.push(duration);
    for w in curve.windows() {
        edges.push(w.start);
        edges.push(w.end);
    }
    edges.retain(|e| (0.0..=duration).contains(e));
    edges.sort_by(|a, b| a.total_cmp(b));
    edges.dedup();
    edges
}

impl ArrivalGrid {
    pub fn new(curve: &IntensityCurve) -> Result<Self, SimulationInvariantError> {
        let edges = cell_edges(curve);
        let mut cumulative = Vec::with_capacity(edges.len().saturating_sub(1));
        let mut total = 0.0;
        for cell in edges.windows(2) {
            let mid = 0.5 * (cell[0] + cell[1]);
            let d = curve.density(mid);
            if !d.is_finite() || d < 0.0 {
                return Err(SimulationInvariantError::EmptyDistribution(format!(
                    "arrival density {d} at hour {mid:.2}"
                )));
            }
            total += d * (cell[1] - cell[0]);
            cumulative.push(total);
        }
        if !(total > 0.0) {
            return Err(SimulationInvariantError::EmptyDistribution("arrival density is zero everywhere".to_string()));
        }
        Ok(ArrivalGrid { edges, cumulative })
    }

    pub fn bins(&self) -> usize {
        self.cumulative.len()
    }

    /// `[start, end)` of cell `i`.
    pub fn cell(&self, i: usize) -> (f64, f64) {
        (self.edges[i], self.edges[i + 1])
    }

    /// Probability mass of cell `i`.
    pub fn mass(&self, i: usize) -> f64 {
        let total = self.cumulative[self.cumulative.len() - 1];
        let lo = if i == 0 { 0.0 } else { self.cumulative[i - 1] };
        (self.cumulative[i] - lo) / total
    }

    /// One arrival time in `[0, duration)`.
    pub fn sample(&self, rng: &mut impl Rng) -> f64 {
        let total = self.cumulative[self.cumulative.len() - 1];
        let u = rng.random::<f64>() * total;
        let bin = self.cumulative.partition_point(|c| *c <= u).min(self.cumulative.len() - 1);
        let (lo, hi) = self.cell(bin);
        let t = lo + rng.random::<f64>() * (hi - lo);
        if t < hi { t } else { lo }
    }

    /// Exactly `n` sorted arrival times.
    pub fn generate(&self, n: usize, rng: &mut impl Rng) -> Vec<f64> {
        let mut times: Vec<f64> = (0..n).map(|_| self.sample(rng)).collect();
        times.sort_by(|a, b| a.total_cmp(b));
        times
    }
}

/// Convenience wrapper: build the grid and draw `n` sorted arrivals.
pub fn generate_arrivals(
    curve: &IntensityCurve,
    n: usize,
    rng: &mut impl Rng,
) -> Result<Vec<f64>, SimulationInvariantError> {
    Ok(ArrivalGrid::new(curve)?.generate(n, rng))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;
    use crate::config::{ScenarioConfig, SpecialEventConfig, SpecialEventKind, WarfareWeight};
    use crate::warfare::{WarfareArchetype, resolve};

    fn curve_for(config: &ScenarioConfig) -> IntensityCurve {
        resolve(config).unwrap().curve
    }

    fn share_in(times: &[f64], lo: f64, hi: f64) -> f64 {
        times.iter().filter(|t| **t >= lo && **t < hi).count() as f64 / times.len() as f64
    }

    #[test]
    fn sorted_and_within_battle() {
        let mut config = ScenarioConfig::canonical();
        config.days_of_fighting = 3;
        let curve = curve_for(&config);
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let times = generate_arrivals(&curve, 5_000, &mut rng).unwrap();
        assert_eq!(times.len(), 5_000);
        assert!(times.windows(2).all(|w| w[0] <= w[1]), "arrivals not sorted");
        assert!(times.iter().all(|t| *t >= 0.0 && *t < 72.0));
    }

    #[test]
    fn same_seed_same_arrivals() {
        let curve = curve_for(&ScenarioConfig::canonical());
        let a = generate_arrivals(&curve, 500, &mut ChaCha20Rng::seed_from_u64(7)).unwrap();
        let b = generate_arrivals(&curve, 500, &mut ChaCha20Rng::seed_from_u64(7)).unwrap();
        let a_bits: Vec<u64> = a.iter().map(|t| t.to_bits()).collect();
        let b_bits: Vec<u64> = b.iter().map(|t| t.to_bits()).collect();
        assert_eq!(a_bits, b_bits);
    }

    #[test]
    fn zero_patients_is_empty() {
        let curve = curve_for(&ScenarioConfig::canonical());
        let times = generate_arrivals(&curve, 0, &mut ChaCha20Rng::seed_from_u64(42)).unwrap();
        assert!(times.is_empty());
    }

    #[test]
    fn mass_casualty_window_is_denser() {
        let mut config = ScenarioConfig::canonical();
        config.warfare = vec![WarfareWeight { archetype: WarfareArchetype::Naval, weight: 1.0 }];
        config.special_events.push(SpecialEventConfig {
            kind: SpecialEventKind::MassCasualty,
            start_hour: 10.0,
            duration_hours: 2.0,
            multiplier: None,
        });
        let curve = curve_for(&config);
        let times = generate_arrivals(&curve, 20_000, &mut ChaCha20Rng::seed_from_u64(42)).unwrap();
        // Naval is flat: 2 h at ×5 against 22 h at ×1 gives 10/32 of the mass.
        let share = share_in(&times, 10.0, 12.0);
        assert!((share - 10.0 / 32.0).abs() < 0.02, "mass-casualty share {share:.3}");
    }

    fn flat_with_window(start_hour: f64, duration_hours: f64, multiplier: f64) -> IntensityCurve {
        let mut config = ScenarioConfig::canonical();
        config.warfare = vec![WarfareWeight { archetype: WarfareArchetype::Naval, weight: 1.0 }];
        config.special_events.push(SpecialEventConfig {
            kind: SpecialEventKind::MassCasualty,
            start_hour,
            duration_hours,
            multiplier: Some(multiplier),
        });
        curve_for(&config)
    }

    #[test]
    fn window_narrower_than_a_bin_still_applies() {
        let curve = flat_with_window(10.0, 0.1, 50.0);
        let times = generate_arrivals(&curve, 50_000, &mut ChaCha20Rng::seed_from_u64(1)).unwrap();
        // 0.1 h at ×50 against 23.9 h at ×1.
        let expected = 5.0 / 28.9;
        let share = share_in(&times, 10.0, 10.1);
        assert!((share - expected).abs() < 0.01, "sub-bin window share {share:.4}, expected {expected:.4}");
    }

    #[test]
    fn off_grid_window_does_not_leak_into_neighbours() {
        let curve = flat_with_window(10.05, 0.1, 50.0);
        let grid = ArrivalGrid::new(&curve).unwrap();
        let boundaries: Vec<f64> = (0..grid.bins()).map(|i| grid.cell(i).0).collect();
        assert!(boundaries.contains(&10.05));
        assert!(boundaries.iter().any(|e| (e - 10.15).abs() < 1e-12));

        let times = generate_arrivals(&curve, 50_000, &mut ChaCha20Rng::seed_from_u64(1)).unwrap();
        let inside = share_in(&times, 10.05, 10.15);
        assert!((inside - 5.0 / 28.9).abs() < 0.01, "window share {inside:.4}");
        // The rest of the 10:00 and 10:15 bins keeps the ×1 density: 0.15 h of 28.9.
        let beside = share_in(&times, 10.0, 10.05) + share_in(&times, 10.15, 10.25);
        assert!(beside < 0.0052 + 0.004, "neighbouring share {beside:.4}");
    }

    #[test]
    fn guerrilla_favors_dawn_and_dusk() {
        let mut config = ScenarioConfig::canonical();
        config.warfare = vec![WarfareWeight { archetype: WarfareArchetype::Guerrilla, weight: 1.0 }];
        let curve = curve_for(&config);
        let times = generate_arrivals(&curve, 10_000, &mut ChaCha20Rng::seed_from_u64(42)).unwrap();
        let bands = share_in(&times, 4.0, 7.0) + share_in(&times, 17.0, 20.0);
        // 6 of 24 hours, so anything well above 0.25 shows the skew.
        assert!(bands > 0.5, "dawn/dusk share {bands:.3}");
    }

    #[test]
    fn peacekeeping_favors_business_hours() {
        let mut config = ScenarioConfig::canonical();
        config.warfare = vec![WarfareWeight { archetype: WarfareArchetype::Peacekeeping, weight: 1.0 }];
        let curve = curve_for(&config);
        let times = generate_arrivals(&curve, 10_000, &mut ChaCha20Rng::seed_from_u64(42)).unwrap();
        let on = share_in(&times, 8.0, 18.0);
        assert!(on > 0.75, "business-hours share {on:.3}");
    }

    #[test]
    fn grid_masses_sum_to_one() {
        let curve = curve_for(&ScenarioConfig::canonical());
        let grid = ArrivalGrid::new(&curve).unwrap();
        assert_eq!(grid.bins(), 96);
        let total: f64 = (0..grid.bins()).map(|i| grid.mass(i)).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn prop_exact_count(n in 0usize..2_000, days in 1u32..5, seed in any::<u64>()) {
            let mut config = ScenarioConfig::canonical();
            config.days_of_fighting = days;
            let curve = curve_for(&config);
            let mut rng = ChaCha20Rng::seed_from_u64(seed);
            let times = generate_arrivals(&curve, n, &mut rng).unwrap();
            prop_assert_eq!(times.len(), n);
            let limit = days as f64 * 24.0;
            prop_assert!(times.iter().all(|t| *t >= 0.0 && *t < limit));
        }
    }
}
