//! # BCSGEN Simulation
//!
//! Trajectory simulators over vectorized reaction networks.
//!
//! 1. **Deterministic**: mean-field ODE integration with a fixed Euler step,
//!    counts converted to concentrations by a volume factor
//! 2. **Stochastic**: Gillespie SSA trajectories (exponential waiting times,
//!    proportional reaction selection), independent runs simulated in
//!    parallel and averaged on a shared sampling grid
//!
//! Both simulators require a fully numeric model: unspecified rates and free
//! parameters are rejected before any trajectory work starts.

use bcsgen_core::{BcsError, RateExpr, Result};
use bcsgen_ts::VectorModel;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Avogadro constant used for count/concentration conversion.
pub const AVOGADRO: f64 = 6.022e23;

/// Sample points per stochastic trajectory grid (excluding t = 0).
pub const STOCHASTIC_SAMPLES: usize = 100;

// =============================================================================
// TIME SERIES TABLE
// =============================================================================

/// Time-indexed table of per-complex values; the first column is always
/// `time`, the remaining columns follow the model ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl Table {
    fn for_model(vm: &VectorModel) -> Self {
        let mut columns = vec!["time".to_string()];
        columns.extend(vm.ordering().iter().map(|c| c.to_string()));
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn to_csv(&self) -> String {
        let mut out = self.columns.join(",");
        out.push('\n');
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(|v| format!("{}", v)).collect();
            out.push_str(&cells.join(","));
            out.push('\n');
        }
        out
    }

    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_csv())?;
        Ok(())
    }
}

// =============================================================================
// DETERMINISTIC SIMULATION
// =============================================================================

/// Integrate the mean-field ODEs implied by the reactions from time 0 to
/// `max_time` with fixed step `step`, recording every step.
///
/// The change of slot `i` is the stoichiometric column sum of ± pattern
/// weights times the rate functions; initial counts are converted to
/// concentrations by `1/(volume * N_A)`. Slots are floored at zero after
/// each step.
pub fn deterministic_simulation(
    vm: &VectorModel,
    max_time: f64,
    volume: f64,
    step: f64,
) -> Result<Table> {
    vm.ensure_rates()?;
    vm.ensure_numeric()?;

    let rates = collect_rates(vm)?;
    let n = vm.ordering().len();
    let m = vm.reactions().len();

    // dy/dt = N * v(y)
    let mut stoich = Array2::<f64>::zeros((n, m));
    for (j, reaction) in vm.reactions().iter().enumerate() {
        for i in 0..n {
            stoich[[i, j]] = reaction.production[i] as f64 - reaction.consumption[i] as f64;
        }
    }

    let factor = 1.0 / (volume * AVOGADRO);
    let mut y: Vec<f64> = initial_counts(vm).iter().map(|&c| c * factor).collect();

    let steps = (max_time / step).round() as usize;
    let mut table = Table::for_model(vm);
    table.rows.push(sample_row(0.0, &y));

    for k in 1..=steps {
        let mut velocities = Array1::<f64>::zeros(m);
        for (j, rate) in rates.iter().enumerate() {
            velocities[j] = rate.eval(&y)?;
        }
        let dy = stoich.dot(&velocities);
        for i in 0..n {
            y[i] = (y[i] + dy[i] * step).max(0.0);
        }
        table.rows.push(sample_row(k as f64 * step, &y));
    }

    Ok(table)
}

// =============================================================================
// STOCHASTIC SIMULATION
// =============================================================================

/// Run `runs` independent Gillespie trajectories to `max_time`, sample each
/// on a shared uniform grid and average them slot-wise.
///
/// A run stops early when no reaction is enabled; its last state is held for
/// the remaining grid points. Runs execute in parallel with per-run seeds
/// derived from `seed`, so results are reproducible for a fixed seed.
pub fn stochastic_simulation(
    vm: &VectorModel,
    max_time: f64,
    runs: usize,
    seed: Option<u64>,
) -> Result<Table> {
    vm.ensure_rates()?;
    vm.ensure_numeric()?;

    let rates = collect_rates(vm)?;
    let grid: Vec<f64> = (0..=STOCHASTIC_SAMPLES)
        .map(|i| i as f64 * max_time / STOCHASTIC_SAMPLES as f64)
        .collect();
    let base_seed = seed.unwrap_or_else(rand::random);

    let trajectories: Vec<Vec<Vec<f64>>> = (0..runs)
        .into_par_iter()
        .map(|run| {
            let mut rng = StdRng::seed_from_u64(base_seed.wrapping_add(run as u64));
            simulate_run(vm, &rates, &grid, &mut rng)
        })
        .collect::<Result<Vec<_>>>()?;

    let n = vm.ordering().len();
    let mut table = Table::for_model(vm);
    for (i, &t) in grid.iter().enumerate() {
        let mut row = vec![0.0; n];
        for trajectory in &trajectories {
            for (slot, value) in trajectory[i].iter().enumerate() {
                row[slot] += value;
            }
        }
        for value in row.iter_mut() {
            *value /= runs as f64;
        }
        table.rows.push(sample_row(t, &row));
    }
    Ok(table)
}

/// One SSA trajectory sampled on `grid`.
fn simulate_run(
    vm: &VectorModel,
    rates: &[&RateExpr],
    grid: &[f64],
    rng: &mut StdRng,
) -> Result<Vec<Vec<f64>>> {
    let mut y: Vec<f64> = initial_counts(vm);
    let mut samples: Vec<Vec<f64>> = Vec::with_capacity(grid.len());
    let mut next_sample = 0usize;
    let mut t = 0.0;

    loop {
        // propensities of enabled reactions
        let mut propensities: Vec<(usize, f64)> = Vec::new();
        let mut total = 0.0;
        for (j, reaction) in vm.reactions().iter().enumerate() {
            let enabled = reaction
                .consumption
                .iter()
                .zip(y.iter())
                .all(|(&need, &have)| need == 0 || have > 0.0);
            if !enabled {
                continue;
            }
            let w = rates[j].eval(&y)?;
            if w > 0.0 {
                propensities.push((j, w));
                total += w;
            }
        }

        let next_event = if total > 0.0 {
            // U in (0,1] keeps the waiting time finite
            t - (1.0 - rng.gen::<f64>()).ln() / total
        } else {
            f64::INFINITY
        };

        while next_sample < grid.len() && grid[next_sample] < next_event {
            samples.push(y.clone());
            next_sample += 1;
        }
        if next_sample >= grid.len() {
            break;
        }

        // select the firing reaction proportionally to its rate
        let mut pick = rng.gen::<f64>() * total;
        let mut fired = propensities[propensities.len() - 1].0;
        for &(j, w) in &propensities {
            if pick < w {
                fired = j;
                break;
            }
            pick -= w;
        }

        let reaction = &vm.reactions()[fired];
        for i in 0..y.len() {
            y[i] = (y[i] - reaction.consumption[i] as f64).max(0.0) + reaction.production[i] as f64;
        }
        t = next_event;
    }

    Ok(samples)
}

// =============================================================================
// HELPERS
// =============================================================================

fn collect_rates(vm: &VectorModel) -> Result<Vec<&RateExpr>> {
    vm.reactions()
        .iter()
        .map(|reaction| {
            reaction
                .rate
                .as_ref()
                .ok_or_else(|| BcsError::RatesNotSpecified {
                    rule: reaction.rule.clone(),
                })
        })
        .collect()
}

fn initial_counts(vm: &VectorModel) -> Vec<f64> {
    vm.init()
        .counts()
        .map(|c| c.iter().map(|&v| v as f64).collect())
        .unwrap_or_default()
}

fn sample_row(t: f64, y: &[f64]) -> Vec<f64> {
    let mut row = Vec::with_capacity(y.len() + 1);
    row.push(t);
    row.extend_from_slice(y);
    row
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use bcsgen_core::{Complex, Model, RateOp, Rule};
    use std::collections::BTreeMap;

    fn complex(name: &str) -> Complex {
        Complex::structure(name, "rep")
    }

    fn mass_action(param: &str, species: &Complex) -> RateExpr {
        RateExpr::bin(
            RateOp::Mul,
            RateExpr::Param(param.into()),
            RateExpr::Conc(species.clone()),
        )
    }

    /// X -> Y and Y -> X, both mass action; conserves X + Y.
    fn conversion_model() -> Model {
        let x = complex("X");
        let y = complex("Y");
        Model {
            rules: vec![
                Rule {
                    lhs: vec![(x.clone(), 1)],
                    rhs: vec![(y.clone(), 1)],
                    rate: Some(mass_action("k1", &x)),
                },
                Rule {
                    lhs: vec![(y.clone(), 1)],
                    rhs: vec![(x.clone(), 1)],
                    rate: Some(mass_action("k2", &y)),
                },
            ],
            init: vec![(x, 8), (y, 2)],
            params: BTreeMap::from([("k1".to_string(), 0.4), ("k2".to_string(), 0.1)]),
        }
    }

    /// X -> nothing, mass action decay.
    fn decay_model(k: f64, x0: u64) -> Model {
        let x = complex("X");
        Model {
            rules: vec![Rule {
                lhs: vec![(x.clone(), 1)],
                rhs: vec![],
                rate: Some(mass_action("k", &x)),
            }],
            init: vec![(x, x0)],
            params: BTreeMap::from([("k".to_string(), k)]),
        }
    }

    // volume chosen so the count/concentration factor is exactly 1
    const UNIT_VOLUME: f64 = 1.0 / AVOGADRO;

    #[test]
    fn test_deterministic_shape_and_header() {
        let vm = VectorModel::from_model(&conversion_model(), None).unwrap();
        let table = deterministic_simulation(&vm, 3.0, UNIT_VOLUME, 0.01).unwrap();

        assert_eq!(
            table.columns,
            vec!["time", "X()::rep", "Y()::rep"]
        );
        assert_eq!(table.rows.len(), 301);
        assert_eq!(table.rows[0][0], 0.0);
        assert!((table.rows[0][1] - 8.0).abs() < 1e-9);
        assert!((table.rows[0][2] - 2.0).abs() < 1e-9);
        assert!((table.rows[300][0] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_deterministic_conserves_mass() {
        let vm = VectorModel::from_model(&conversion_model(), None).unwrap();
        let table = deterministic_simulation(&vm, 5.0, UNIT_VOLUME, 0.01).unwrap();
        for row in &table.rows {
            assert!((row[1] + row[2] - 10.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_deterministic_converges_with_smaller_steps() {
        let k = 0.5;
        let vm = VectorModel::from_model(&decay_model(k, 10), None).unwrap();
        let exact = 10.0 * (-k * 2.0f64).exp();

        let coarse = deterministic_simulation(&vm, 2.0, UNIT_VOLUME, 0.1).unwrap();
        let fine = deterministic_simulation(&vm, 2.0, UNIT_VOLUME, 0.05).unwrap();
        let finest = deterministic_simulation(&vm, 2.0, UNIT_VOLUME, 0.025).unwrap();

        let end = |t: &Table| t.rows.last().unwrap()[1];
        let err_coarse = (end(&coarse) - exact).abs();
        let err_fine = (end(&fine) - exact).abs();
        let err_finest = (end(&finest) - exact).abs();

        assert!(err_fine < err_coarse);
        assert!(err_finest < err_fine);
        assert!(err_finest < 0.05);
    }

    #[test]
    fn test_stochastic_shape_and_reproducibility() {
        let vm = VectorModel::from_model(&conversion_model(), None).unwrap();
        let a = stochastic_simulation(&vm, 2.0, 4, Some(42)).unwrap();
        let b = stochastic_simulation(&vm, 2.0, 4, Some(42)).unwrap();

        assert_eq!(a.rows.len(), STOCHASTIC_SAMPLES + 1);
        assert_eq!(a.columns[0], "time");
        assert_eq!(a, b);
    }

    #[test]
    fn test_stochastic_decay_is_absorbed_at_zero() {
        let vm = VectorModel::from_model(&decay_model(1.0, 5), None).unwrap();
        let table = stochastic_simulation(&vm, 50.0, 3, Some(7)).unwrap();
        let last = table.rows.last().unwrap();
        assert_eq!(last[1], 0.0);
        // population never goes negative
        for row in &table.rows {
            assert!(row[1] >= 0.0);
        }
    }

    #[test]
    fn test_parametrised_model_rejected() {
        let mut model = conversion_model();
        model.params.remove("k2");
        let vm = VectorModel::from_model(&model, None).unwrap();
        assert!(matches!(
            deterministic_simulation(&vm, 1.0, UNIT_VOLUME, 0.1),
            Err(BcsError::ParametrisedModel { .. })
        ));
        assert!(matches!(
            stochastic_simulation(&vm, 1.0, 2, Some(1)),
            Err(BcsError::ParametrisedModel { .. })
        ));
    }

    #[test]
    fn test_missing_rate_rejected() {
        let mut model = conversion_model();
        model.rules[0].rate = None;
        let vm = VectorModel::from_model(&model, None).unwrap();
        assert!(matches!(
            deterministic_simulation(&vm, 1.0, UNIT_VOLUME, 0.1),
            Err(BcsError::RatesNotSpecified { .. })
        ));
        assert!(matches!(
            stochastic_simulation(&vm, 1.0, 2, Some(1)),
            Err(BcsError::RatesNotSpecified { .. })
        ));
    }

    #[test]
    fn test_csv_rendering() {
        let table = Table {
            columns: vec!["time".into(), "X()::rep".into()],
            rows: vec![vec![0.0, 2.0], vec![0.5, 1.5]],
        };
        assert_eq!(table.to_csv(), "time,X()::rep\n0,2\n0.5,1.5\n");
    }
}
