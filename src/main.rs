use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use log::{info, LevelFilter};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use rdsim::output::CsvEmitter;
use rdsim::parse::{model_from_reader, model_from_str};
use rdsim::sim::{derive_seed, Simulator};
use rdsim::Error;

/// Stochastic simulation of reaction-diffusion models.
#[derive(Parser)]
#[command(name = "rdsim", version, about)]
#[command(group(ArgGroup::new("stop").required(true).args(["steps", "t_end"])))]
struct Cli {
    /// Load the model named MODEL (default: first model in the file)
    #[arg(short = 'm', value_name = "MODEL")]
    model: Option<String>,

    /// Run the simulation N events
    #[arg(short = 'n', value_name = "N")]
    steps: Option<u64>,

    /// Run the simulation for TIME simulated seconds
    #[arg(short = 't', value_name = "TIME")]
    t_end: Option<f64>,

    /// Sample the simulation every TIME seconds
    #[arg(short = 'd', value_name = "TIME")]
    delta: Option<f64>,

    /// Number of independent instances to run
    #[arg(short = 'P', value_name = "N", default_value_t = 1)]
    instances: usize,

    /// Batch output: emit only each instance's final state
    #[arg(short = 'B')]
    batch: bool,

    /// Verbose logging
    #[arg(short = 'v')]
    verbose: bool,

    /// Model file ("-" or absent reads standard input)
    file: Option<PathBuf>,
}

fn load_model(cli: &Cli) -> Result<rdsim::Model> {
    let name = cli.model.as_deref().unwrap_or("");
    let model = match &cli.file {
        Some(path) if path.as_os_str() != "-" => {
            let file = File::open(path)
                .with_context(|| format!("unable to open {} for reading", path.display()))?;
            model_from_reader(file, name)?
        }
        _ => {
            let mut text = String::new();
            io::stdin()
                .lock()
                .read_to_string(&mut text)
                .context("reading model from standard input")?;
            model_from_str(&text, name)?
        }
    };
    Ok(model)
}

fn sample_times(t_end: f64, delta: Option<f64>) -> Result<Vec<f64>> {
    let mut times = Vec::new();
    if let Some(d) = delta {
        if !(d > 0.0) {
            return Err(Error::InvalidValue("sample stride must be positive".into()).into());
        }
        let mut t = d;
        while t < t_end {
            times.push(t);
            t += d;
        }
    }
    times.push(t_end);
    Ok(times)
}

fn run(cli: &Cli) -> Result<()> {
    let model = load_model(cli)?;
    info!(
        "model {}: {} species, {} reactions, {} cells",
        model.name,
        model.n_species(),
        model.n_reactions(),
        model.n_cells()
    );
    if cli.verbose {
        eprint!("{model}");
    }

    let mut sim = Simulator::new(cli.instances, &model, 0.0, None)?;
    let emitter = CsvEmitter::new(&model);
    let stdout = io::stdout().lock();
    let mut writer = csv::Writer::from_writer(stdout);
    emitter.write_header(&mut writer)?;

    match (cli.steps, cli.t_end) {
        (Some(n_events), _) => {
            // event-by-event run, one row block per event
            for j in 0..cli.instances {
                let mut rng = ChaCha8Rng::seed_from_u64(derive_seed(None, j as u64));
                if !cli.batch {
                    emitter.write_state(&mut writer, j, sim.time(j)?, sim.counts(j)?)?;
                }
                for step in 0..n_events {
                    let t = match sim.advance_one(j, &mut rng) {
                        Ok(t) => t,
                        Err(Error::Ssa(msg)) => {
                            info!("instance {j}: {msg} after {step} events");
                            break;
                        }
                        Err(e) => return Err(e.into()),
                    };
                    if !cli.batch {
                        emitter.write_state(&mut writer, j, t, sim.counts(j)?)?;
                    }
                }
                if cli.batch {
                    emitter.write_state(&mut writer, j, sim.time(j)?, sim.counts(j)?)?;
                }
            }
        }
        (None, Some(t_end)) => {
            let times = sample_times(t_end, cli.delta)?;
            let sample = sim.run_ensemble(&times, None, None)?;
            emitter.write_ensemble(&mut writer, &sample, cli.batch)?;
        }
        (None, None) => {
            return Err(Error::InvalidValue("one of -n or -t must be specified".into()).into())
        }
    }

    writer.flush()?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if cli.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        })
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("rdsim: {e}");
            ExitCode::from(1)
        }
    }
}
