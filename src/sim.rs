//! Simulator engine: compiles a model into elementary processes and
//! advances one or more independent stochastic instances.
//!
//! Process enumeration order is part of the observable behaviour, for
//! reproducible runs: reaction processes first (cells outer, reactions
//! inner), then diffusion processes (source cell outer, neighbour inner,
//! species innermost). A reaction of order `r` in a cell of volume `v`
//! contributes scaled rate `rate * v^(1-r)`; a diffusive hop contributes
//! `diffusivity * coef`.
//!
//! Shared process tables are read-only after construction; each instance
//! owns its counts, factor rows, selector and clock, so instances advance
//! in parallel without shared mutable state. Random generators are always
//! caller-provided; the ensemble driver derives well-separated ChaCha
//! streams per instance from one seed.

use log::{debug, info};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use crate::distribute::{distribute_counts, Method};
use crate::error::{Error, Result};
use crate::model::Model;
use crate::process::{Count, ProcInstance, ProcTables, ProcessInfo, ProcessSystem};
use crate::selector::{DirectSelector, Selector};
use crate::valid::assert_valid_guard;

// SplitMix64 over a golden-gamma offset keeps per-instance streams well
// separated even for adjacent instance numbers.
const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;
const DEFAULT_SEED_BASE: u64 = 0x5D5A_1C3A_0F5B_92E1;

pub fn derive_seed(seed: Option<u64>, stream: u64) -> u64 {
    let base = seed.unwrap_or(DEFAULT_SEED_BASE);
    let mut z = (base ^ stream.wrapping_mul(GOLDEN_GAMMA)).wrapping_add(GOLDEN_GAMMA);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

// Distinct stream tags so the seeding draw never shares a stream with an
// instance's trajectory generator (instance indices stay below 2^32).
const SEED_STREAM_INIT: u64 = 1 << 32;

#[derive(Clone, Debug)]
struct InstanceState<S> {
    t: f64,
    ksel: S,
    stale: bool,
    next_key: usize,
    next_dt: f64,
}

fn refresh_next<S: Selector>(st: &mut InstanceState<S>, rng: &mut dyn RngCore) -> Result<()> {
    if st.stale {
        let ev = st.ksel.next(rng)?;
        st.next_key = ev.key;
        st.next_dt = ev.dt;
        st.stale = false;
    }
    Ok(())
}

fn step_event<S: Selector>(
    tables: &ProcTables,
    inst: &mut ProcInstance,
    st: &mut InstanceState<S>,
    rng: &mut dyn RngCore,
) -> Result<f64> {
    refresh_next(st, rng)?;
    let k = st.next_key;
    let ksel = &mut st.ksel;
    tables.apply_in(inst, k, &mut |kk, a| ksel.update(kk, a))?;
    st.t += st.next_dt;
    st.stale = true;
    Ok(st.t)
}

/// Advance until the next event would cross `t_end`; that event is not
/// applied, its remaining wait is retained for the next call, and the
/// clock lands exactly on `t_end`.
fn advance_until<S: Selector>(
    tables: &ProcTables,
    inst: &mut ProcInstance,
    st: &mut InstanceState<S>,
    t_end: f64,
    rng: &mut dyn RngCore,
) -> Result<f64> {
    loop {
        refresh_next(st, rng)?;
        if st.t + st.next_dt > t_end {
            break;
        }
        let k = st.next_key;
        let ksel = &mut st.ksel;
        tables.apply_in(inst, k, &mut |kk, a| ksel.update(kk, a))?;
        st.t += st.next_dt;
        st.stale = true;
    }
    st.next_dt -= t_end - st.t;
    st.t = t_end;
    Ok(st.t)
}

/// One compiled model plus the per-instance simulation states.
pub struct Simulator<S: Selector = DirectSelector> {
    n_species: usize,
    n_cells: usize,
    n_pop: usize,
    procs: ProcessSystem,
    states: Vec<InstanceState<S>>,
}

impl Simulator<DirectSelector> {
    /// Compile `model` and initialise `n_instances` independent
    /// trajectories at time `t0` with the direct-method selector. `seed`
    /// feeds only the count-distribution draws used for total-count
    /// species seeding; trajectory randomness stays caller-provided.
    pub fn new(n_instances: usize, model: &Model, t0: f64, seed: Option<u64>) -> Result<Self> {
        Self::with_selector(n_instances, model, t0, seed)
    }
}

impl<S: Selector + Default> Simulator<S> {
    pub fn with_selector(
        n_instances: usize,
        model: &Model,
        t0: f64,
        seed: Option<u64>,
    ) -> Result<Self> {
        let _guard = assert_valid_guard(model, "model");

        let n_species = model.n_species();
        let n_cells = model.n_cells();
        let n_pop = n_species * n_cells;

        let kp_set = compile_processes(model)?;
        info!(
            "compiled {} processes over {} populations ({} species x {} cells)",
            kp_set.len(),
            n_pop,
            n_species,
            n_cells
        );

        let mut procs = ProcessSystem::new(n_instances)?;
        procs.grow_populations(n_pop)?;
        procs.add_all(&kp_set)?;

        let mut sim = Simulator {
            n_species,
            n_cells,
            n_pop,
            procs,
            states: Vec::with_capacity(n_instances),
        };
        sim.seed_counts(model, seed)?;

        let n_proc = sim.procs.len();
        let (tables, instances) = sim.procs.split_mut();
        for inst in instances.iter_mut() {
            let mut ksel = S::default();
            ksel.reset(n_proc);
            for k in 0..n_proc {
                ksel.update(k, tables.propensity_of(inst, k))?;
            }
            sim.states.push(InstanceState {
                t: t0,
                ksel,
                stale: true,
                next_key: 0,
                next_dt: 0.0,
            });
        }
        Ok(sim)
    }

    fn seed_counts(&mut self, model: &Model, seed: Option<u64>) -> Result<()> {
        let volumes: Vec<f64> = model.cells.iter().map(|c| c.volume).collect();
        let n_species = self.n_species;
        let (tables, instances) = self.procs.split_mut();

        for (j, inst) in instances.iter_mut().enumerate() {
            let mut rng =
                ChaCha8Rng::seed_from_u64(derive_seed(seed, SEED_STREAM_INIT | j as u64));
            for (s_id, species) in model.species.iter().enumerate() {
                if let Some(total) = species.count {
                    // exact total, distributed volume-weighted
                    let bins =
                        distribute_counts(total, &volumes, Method::EfraimidisSpirakis, &mut rng)?;
                    for (c_id, &count) in bins.iter().enumerate() {
                        let p = c_id * n_species + s_id;
                        tables.set_count_in(inst, p, count as Count, &mut |_, _| Ok(()))?;
                    }
                } else {
                    for (c_id, &vol) in volumes.iter().enumerate() {
                        let p = c_id * n_species + s_id;
                        let count = (species.concentration * vol).round() as Count;
                        tables.set_count_in(inst, p, count, &mut |_, _| Ok(()))?;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn n_instances(&self) -> usize {
        self.states.len()
    }

    pub fn n_species(&self) -> usize {
        self.n_species
    }

    pub fn n_cells(&self) -> usize {
        self.n_cells
    }

    pub fn population_size(&self) -> usize {
        self.n_pop
    }

    pub fn n_processes(&self) -> usize {
        self.procs.len()
    }

    /// The compiled process system backing this simulator.
    pub fn processes(&self) -> &ProcessSystem {
        &self.procs
    }

    pub fn pop_id(&self, species: usize, cell: usize) -> Result<usize> {
        if species >= self.n_species || cell >= self.n_cells {
            return Err(Error::invalid_value(format!(
                "no population for species {species} in cell {cell}"
            )));
        }
        Ok(cell * self.n_species + species)
    }

    pub fn pop_to_pair(&self, pop: usize) -> Result<(usize, usize)> {
        if pop >= self.n_pop {
            return Err(Error::invalid_value(format!(
                "population index {pop} out of range"
            )));
        }
        Ok((pop % self.n_species, pop / self.n_species))
    }

    pub fn time(&self, instance: usize) -> Result<f64> {
        Ok(self.state(instance)?.t)
    }

    /// True when the cached next event may not reflect current
    /// propensities and must be redrawn.
    pub fn stale(&self, instance: usize) -> Result<bool> {
        Ok(self.state(instance)?.stale)
    }

    pub fn count(&self, instance: usize, species: usize, cell: usize) -> Result<Count> {
        let p = self.pop_id(species, cell)?;
        self.procs.count(p, instance)
    }

    /// Zero-copy view of the instance's full population count vector,
    /// indexed `cell * n_species + species`.
    pub fn counts(&self, instance: usize) -> Result<&[Count]> {
        self.procs.counts(instance)
    }

    pub fn set_count(
        &mut self,
        instance: usize,
        species: usize,
        cell: usize,
        count: Count,
    ) -> Result<()> {
        let p = self.pop_id(species, cell)?;
        let (tables, instances) = self.procs.split_mut();
        let inst = instances
            .get_mut(instance)
            .ok_or_else(|| Error::invalid_value("instance index out of range"))?;
        let st = &mut self.states[instance];
        let ksel = &mut st.ksel;
        tables.set_count_in(inst, p, count, &mut |k, a| ksel.update(k, a))?;
        st.stale = true;
        Ok(())
    }

    /// Advance one minimal step, returning the new simulated time.
    pub fn advance_one(&mut self, instance: usize, rng: &mut dyn RngCore) -> Result<f64> {
        let (tables, instances) = self.procs.split_mut();
        let inst = instances
            .get_mut(instance)
            .ok_or_else(|| Error::invalid_value("instance index out of range"))?;
        let st = &mut self.states[instance];
        step_event(tables, inst, st, rng)
    }

    /// Advance to exactly `t_end`, discarding no randomness: the draw
    /// that would cross the boundary is retained for the next call.
    pub fn advance_to(&mut self, instance: usize, t_end: f64, rng: &mut dyn RngCore) -> Result<f64> {
        let (tables, instances) = self.procs.split_mut();
        let inst = instances
            .get_mut(instance)
            .ok_or_else(|| Error::invalid_value("instance index out of range"))?;
        let st = &mut self.states[instance];
        advance_until(tables, inst, st, t_end, rng)
    }

    /// Advance every instance through `sample_times` in parallel,
    /// recording the count vector at each time. Instances draw from
    /// ChaCha streams split off `seed`. An instance whose propensity
    /// mass empties simply holds its state to the end of time.
    pub fn run_ensemble(
        &mut self,
        sample_times: &[f64],
        seed: Option<u64>,
        threads: Option<usize>,
    ) -> Result<EnsembleSample>
    where
        S: Send,
    {
        if sample_times.is_empty() {
            return Err(Error::invalid_value("no sample times given"));
        }
        if sample_times.iter().any(|t| !t.is_finite()) {
            return Err(Error::invalid_value("sample times must be finite"));
        }
        if sample_times.windows(2).any(|w| w[0] > w[1]) {
            return Err(Error::invalid_value("sample times must be ascending"));
        }
        if self.n_pop == 0 {
            return Err(Error::invalid_value("model has no populations to sample"));
        }

        let n_pop = self.n_pop;
        let n_instances = self.states.len();
        let n_times = sample_times.len();
        let stride = n_times * n_pop;
        let mut data = vec![0 as Count; n_instances * stride];

        let (tables, instances) = self.procs.split_mut();
        let states = &mut self.states;

        let mut run = || -> Result<()> {
            data.par_chunks_mut(stride)
                .zip(instances.par_iter_mut().zip(states.par_iter_mut()))
                .enumerate()
                .try_for_each(|(j, (chunk, (inst, st)))| -> Result<()> {
                    let mut rng = ChaCha8Rng::seed_from_u64(derive_seed(seed, j as u64));
                    for (ti, &tp) in sample_times.iter().enumerate() {
                        match advance_until(tables, inst, st, tp, &mut rng) {
                            Ok(_) => {}
                            Err(Error::Ssa(msg)) => {
                                // mass exhausted: state is frozen in time
                                debug!("instance {j}: {msg}; holding state to t={tp}");
                                st.t = tp;
                            }
                            Err(e) => return Err(e),
                        }
                        chunk[ti * n_pop..(ti + 1) * n_pop].copy_from_slice(inst.counts());
                    }
                    Ok(())
                })
        };

        match threads {
            Some(n) => ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .map_err(|e| Error::invalid_value(format!("thread pool: {e}")))?
                .install(run)?,
            None => run()?,
        }

        Ok(EnsembleSample {
            n_instances,
            n_pop,
            times: sample_times.to_vec(),
            data,
        })
    }

    fn state(&self, instance: usize) -> Result<&InstanceState<S>> {
        self.states
            .get(instance)
            .ok_or_else(|| Error::invalid_value("instance index out of range"))
    }
}

/// Flatten reactions and diffusion links to the elementary process list,
/// in enumeration order.
fn compile_processes(model: &Model) -> Result<Vec<ProcessInfo>> {
    let n_species = model.n_species();
    let n_cells = model.n_cells();
    let pop = |s_id: usize, c_id: usize| c_id * n_species + s_id;

    for reac in &model.reactions {
        if reac.left.iter().chain(&reac.right).any(|&s| s >= n_species) {
            return Err(Error::invalid_model(format!(
                "reaction {} refers to an unknown species",
                reac.name
            )));
        }
    }

    let mut kp_set = Vec::new();

    for c_id in 0..n_cells {
        let vol = model.cells[c_id].volume;
        for reac in &model.reactions {
            let order = reac.order() as i32;
            kp_set.push(ProcessInfo {
                left: reac.left.iter().map(|&s| pop(s, c_id)).collect(),
                right: reac.right.iter().map(|&s| pop(s, c_id)).collect(),
                rate: reac.rate * vol.powi(1 - order),
            });
        }
    }

    for c_id in 0..n_cells {
        for nb in &model.cells[c_id].neighbours {
            if nb.coef == 0.0 {
                continue;
            }
            if nb.cell >= n_cells {
                return Err(Error::invalid_model(format!(
                    "cell {c_id} links to unknown cell {}",
                    nb.cell
                )));
            }
            for (s_id, species) in model.species.iter().enumerate() {
                kp_set.push(ProcessInfo {
                    left: vec![pop(s_id, c_id)],
                    right: vec![pop(s_id, nb.cell)],
                    rate: nb.coef * species.diffusivity,
                });
            }
        }
    }

    Ok(kp_set)
}

/// Recorded ensemble trajectory samples: one count vector per
/// `(instance, sample time)`.
pub struct EnsembleSample {
    n_instances: usize,
    n_pop: usize,
    times: Vec<f64>,
    data: Vec<Count>,
}

impl EnsembleSample {
    pub fn n_instances(&self) -> usize {
        self.n_instances
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn counts(&self, instance: usize, time_idx: usize) -> &[Count] {
        let stride = self.times.len() * self.n_pop;
        let base = instance * stride + time_idx * self.n_pop;
        &self.data[base..base + self.n_pop]
    }
}
