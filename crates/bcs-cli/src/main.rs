//! # BCSGEN CLI
//!
//! Command-line interface for rule-based biochemical model analysis.
//!
//! Models arrive as JSON produced by the parser collaborator; this binary
//! wires them into transition system generation, trajectory simulation and
//! model checker export.

use anyhow::Context;
use bcsgen_core::Model;
use bcsgen_sim::{deterministic_simulation, stochastic_simulation};
use bcsgen_ts::{ModelKind, TransitionSystem, VectorModel};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bcsgen")]
#[command(version = "0.1.0")]
#[command(about = "Rule-based biochemical model analysis toolkit", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a transition system from a model
    Generate {
        /// Model file (JSON)
        #[arg(long)]
        model: PathBuf,
        /// Output transition system (JSON)
        #[arg(long)]
        output: PathBuf,
        /// Previously generated transition system to resume from
        #[arg(long)]
        transition_file: Option<PathBuf>,
        /// Wall-clock limit in seconds
        #[arg(long, default_value_t = f64::INFINITY)]
        max_time: f64,
        /// State count limit
        #[arg(long, default_value_t = usize::MAX)]
        max_size: usize,
        /// Per-complex population bound (computed from the model if omitted)
        #[arg(long)]
        bound: Option<u64>,
    },

    /// Simulate trajectories and write a CSV time series
    Simulate {
        /// Model file (JSON)
        #[arg(long)]
        model: PathBuf,
        /// Output CSV file
        #[arg(long)]
        output: PathBuf,
        /// Deterministic (ODE) instead of stochastic simulation
        #[arg(long)]
        deterministic: bool,
        /// Stochastic runs to average
        #[arg(long, default_value_t = 1)]
        runs: usize,
        /// Simulated time horizon
        #[arg(long)]
        max_time: f64,
        /// Reactor volume (count/concentration conversion)
        #[arg(long, default_value_t = 1.0)]
        volume: f64,
        /// ODE integration step
        #[arg(long, default_value_t = 0.01)]
        step: f64,
        /// RNG seed for reproducible stochastic runs
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Export a transition system for a probabilistic model checker
    Export {
        /// Transition system file (JSON)
        #[arg(long)]
        ts: PathBuf,
        /// Explicit transition output (.tra); requires --lab
        #[arg(long, requires = "lab")]
        tra: Option<PathBuf>,
        /// Explicit label output (.lab)
        #[arg(long)]
        lab: Option<PathBuf>,
        /// State labeling (JSON map: state index -> label list)
        #[arg(long)]
        labels: Option<PathBuf>,
        /// Symbolic PRISM module output (.pm)
        #[arg(long)]
        prism: Option<PathBuf>,
        /// Decimal digits for numeric weights
        #[arg(long, default_value_t = 6)]
        precision: usize,
        /// Free parameter names declared as constants in the PRISM module
        #[arg(long, value_delimiter = ',')]
        free_params: Vec<String>,
        /// Emit raw rates (CTMC) instead of normalized probabilities (DTMC)
        #[arg(long)]
        ctmc: bool,
    },
}

fn load_model(path: &PathBuf) -> anyhow::Result<Model> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read model file {}", path.display()))?;
    let model: Model =
        serde_json::from_str(&text).with_context(|| format!("cannot parse {}", path.display()))?;
    Ok(model)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            model,
            output,
            transition_file,
            max_time,
            max_size,
            bound,
        } => {
            println!("{} {}", "Loading model:".green().bold(), model.display());
            let model = load_model(&model)?;
            let vm = VectorModel::from_model(&model, bound)?;

            let seed_ts = match transition_file {
                Some(path) => {
                    println!("  Resuming from: {}", path.display().to_string().cyan());
                    Some(TransitionSystem::load_from_json(path)?)
                }
                None => None,
            };

            let ts = vm.generate_transition_system(seed_ts, max_time, max_size)?;
            let status = if ts.is_complete() {
                "complete".green()
            } else {
                "truncated".yellow()
            };
            println!(
                "  {} states, {} edges, bound {} ({})",
                ts.len(),
                ts.edges.len(),
                vm.bound(),
                status
            );
            ts.save_to_json(&output)?;
            println!("{} {}", "Saved:".green().bold(), output.display());
        }

        Commands::Simulate {
            model,
            output,
            deterministic,
            runs,
            max_time,
            volume,
            step,
            seed,
        } => {
            println!("{} {}", "Loading model:".green().bold(), model.display());
            let model = load_model(&model)?;
            let vm = VectorModel::from_model(&model, None)?;

            let table = if deterministic {
                println!(
                    "  Deterministic simulation to t={} (step {})",
                    max_time, step
                );
                deterministic_simulation(&vm, max_time, volume, step)?
            } else {
                println!("  Stochastic simulation to t={} ({} runs)", max_time, runs);
                stochastic_simulation(&vm, max_time, runs, seed)?
            };
            table.write_csv(&output)?;
            println!("{} {}", "Saved:".green().bold(), output.display());
        }

        Commands::Export {
            ts,
            tra,
            lab,
            labels,
            prism,
            precision,
            free_params,
            ctmc,
        } => {
            let ts = TransitionSystem::load_from_json(&ts)?;
            let kind = if ctmc { ModelKind::Ctmc } else { ModelKind::Dtmc };

            if let (Some(tra), Some(lab)) = (tra, lab) {
                let labeling: BTreeMap<usize, BTreeSet<String>> = match &labels {
                    Some(path) => {
                        let text = std::fs::read_to_string(path)
                            .with_context(|| format!("cannot read labels {}", path.display()))?;
                        serde_json::from_str(&text)?
                    }
                    None => BTreeMap::new(),
                };
                // AP universe: every label used, in sorted order
                let ap_names: Vec<String> = labeling
                    .values()
                    .flatten()
                    .filter(|l| l.as_str() != "init")
                    .cloned()
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                ts.save_storm_explicit(&tra, &lab, &labeling, &ap_names, kind)?;
                println!(
                    "{} {} / {}",
                    "Saved explicit pair:".green().bold(),
                    tra.display(),
                    lab.display()
                );
            }

            if let Some(prism) = prism {
                let free: BTreeSet<String> = free_params.into_iter().collect();
                ts.save_to_prism(&prism, kind, precision, &free, &[])?;
                println!("{} {}", "Saved PRISM module:".green().bold(), prism.display());
            }
        }
    }

    Ok(())
}
