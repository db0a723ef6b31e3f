//! Process system: the dependency structure between populations and
//! elementary processes, with incrementally maintained propensities.
//!
//! The propensity of a mass-action process is its rate constant times a
//! falling-factorial product over its reactant populations. Each reactant
//! occurrence owns one slot in the process's factor row, holding that
//! population's contribution; a count change then reduces to adding the
//! delta to every slot fed by the population, touching only the affected
//! processes.
//!
//! Shared tables (contributions, stoichiometric deltas, rates) are built
//! once and never mutate during simulation; population counts and factor
//! rows are replicated per instance so independent trajectories of the
//! same compiled model can run in parallel.

use crate::error::{Error, Result};

/// Largest supported reaction order (reactant slots per process).
pub const MAX_PROCESS_ORDER: usize = 3;
pub const MAX_POPULATION_INDEX: usize = (u32::MAX - 1) as usize;
pub const MAX_PARTICIPANTS: usize = MAX_POPULATION_INDEX;
pub const MAX_INSTANCES: usize = (u32::MAX - 1) as usize;
pub const MAX_COUNT: i64 = i64::MAX;

/// Population count. Signed so transient intermediate states inside a
/// mutation loop never wrap; externally observable counts stay in
/// `0..=MAX_COUNT`.
pub type Count = i64;

/// Notification callback invoked with `(process, propensity)` for every
/// slot update. A process with several affected slots is reported once
/// per slot, with the final call carrying the fully updated propensity,
/// so the receiver must be idempotent (a selector `update` is).
pub type Notify<'a> = dyn FnMut(usize, f64) -> Result<()> + 'a;

/// Description of one elementary process: reactant and product population
/// multisets plus the scaled rate constant.
#[derive(Clone, Debug, Default)]
pub struct ProcessInfo {
    pub left: Vec<usize>,
    pub right: Vec<usize>,
    pub rate: f64,
}

// One propensity contribution: which process, which slot.
#[derive(Clone, Copy, Debug)]
struct PopContrib {
    proc: u32,
    slot: u8,
}

// One stoichiometric adjustment: which population, by how much.
#[derive(Clone, Copy, Debug)]
struct PopDelta {
    pop: u32,
    delta: i32,
}

type FactorRow = [Count; MAX_PROCESS_ORDER];

/// Shared (per-model) tables, read-only once the model is compiled.
#[derive(Clone, Debug, Default)]
pub struct ProcTables {
    n_pop: usize,
    // contributions of population p, same-process entries contiguous
    left_slots: Vec<Vec<PopContrib>>,
    // sparse net stoichiometry of process k, no zero entries
    delta: Vec<Vec<PopDelta>>,
    rate: Vec<f64>,
}

/// Per-instance mutable state: counts and factor rows.
#[derive(Clone, Debug, Default)]
pub struct ProcInstance {
    count: Vec<Count>,
    factor: Vec<FactorRow>,
}

impl ProcTables {
    pub fn len(&self) -> usize {
        self.rate.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rate.is_empty()
    }

    pub fn n_populations(&self) -> usize {
        self.n_pop
    }

    /// Rate constant times the factor product, unused slots holding 1.
    /// A product driven negative by out-of-band count manipulation is
    /// reported as zero rather than a negative propensity.
    #[inline]
    pub(crate) fn propensity_of(&self, inst: &ProcInstance, k: usize) -> f64 {
        let row = &inst.factor[k];
        let mut r = self.rate[k];
        for &c in row {
            r *= c as f64;
        }
        if r < 0.0 {
            0.0
        } else {
            r
        }
    }

    pub(crate) fn set_count_in(
        &self,
        inst: &mut ProcInstance,
        p: usize,
        c: Count,
        notify: &mut Notify<'_>,
    ) -> Result<()> {
        if p >= self.n_pop {
            return Err(Error::invalid_value(format!(
                "population index {p} out of range"
            )));
        }
        if !(0..=MAX_COUNT).contains(&c) {
            return Err(Error::invalid_value(format!("count {c} out of range")));
        }

        let d = c - inst.count[p];
        for pc in &self.left_slots[p] {
            let k = pc.proc as usize;
            inst.factor[k][pc.slot as usize] += d;
            let a = self.propensity_of(inst, k);
            notify(k, a)?;
        }
        inst.count[p] = c;
        Ok(())
    }

    pub(crate) fn apply_in(
        &self,
        inst: &mut ProcInstance,
        k: usize,
        notify: &mut Notify<'_>,
    ) -> Result<()> {
        if k >= self.rate.len() {
            return Err(Error::invalid_value(format!(
                "process index {k} out of range"
            )));
        }

        for pd in &self.delta[k] {
            let p = pd.pop as usize;
            for pc in &self.left_slots[p] {
                let kk = pc.proc as usize;
                inst.factor[kk][pc.slot as usize] += pd.delta as Count;
                let a = self.propensity_of(inst, kk);
                notify(kk, a)?;
            }
            inst.count[p] += pd.delta as Count;
        }
        Ok(())
    }
}

impl ProcInstance {
    #[inline]
    pub fn count(&self, p: usize) -> Count {
        self.count[p]
    }

    pub fn counts(&self) -> &[Count] {
        &self.count
    }
}

/// The compiled process system: shared tables plus one mutable state per
/// instance.
#[derive(Clone, Debug)]
pub struct ProcessSystem {
    tables: ProcTables,
    instances: Vec<ProcInstance>,
}

impl ProcessSystem {
    pub fn new(n_instances: usize) -> Result<Self> {
        if n_instances == 0 || n_instances > MAX_INSTANCES {
            return Err(Error::invalid_value("instance count out of range"));
        }
        Ok(ProcessSystem {
            tables: ProcTables::default(),
            instances: vec![ProcInstance::default(); n_instances],
        })
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn n_instances(&self) -> usize {
        self.instances.len()
    }

    pub fn n_populations(&self) -> usize {
        self.tables.n_pop
    }

    /// Extend the population-indexed tables to cover `0..n_pop`, so that
    /// counts can be assigned to populations no process refers to.
    pub fn grow_populations(&mut self, n_pop: usize) -> Result<()> {
        if n_pop > MAX_POPULATION_INDEX + 1 {
            return Err(Error::invalid_value("population index out of bounds"));
        }
        if n_pop > self.tables.n_pop {
            self.tables.n_pop = n_pop;
            self.tables.left_slots.resize_with(n_pop, Vec::new);
            for inst in &mut self.instances {
                inst.count.resize(n_pop, 0);
            }
        }
        Ok(())
    }

    /// Append one elementary process and index its contributions.
    ///
    /// Reactants are processed in sorted population order; repeats of the
    /// same population take consecutive slots seeded with the falling
    /// sequence `c, c-1, ...` from each instance's current count.
    pub fn add(&mut self, info: &ProcessInfo) -> Result<()> {
        if self.tables.rate.len() >= u32::MAX as usize {
            return Err(Error::invalid_value("process index out of bounds"));
        }
        if info.left.len() > MAX_PROCESS_ORDER {
            return Err(Error::invalid_value("too many reactants"));
        }
        if !(info.rate >= 0.0) || !info.rate.is_finite() {
            return Err(Error::invalid_value("negative or non-finite process rate"));
        }

        let key = self.tables.rate.len() as u32;

        let mut delta_map: std::collections::BTreeMap<usize, i64> =
            std::collections::BTreeMap::new();
        let mut left_sorted = [0usize; MAX_PROCESS_ORDER];
        let mut max_pop = 0usize;
        for (i, &p) in info.left.iter().enumerate() {
            if p > MAX_POPULATION_INDEX {
                return Err(Error::invalid_value("population index out of bounds"));
            }
            *delta_map.entry(p).or_insert(0) -= 1;
            left_sorted[i] = p;
            max_pop = max_pop.max(p);
        }
        let nleft = info.left.len();
        left_sorted[..nleft].sort_unstable();

        for &p in &info.right {
            if p > MAX_POPULATION_INDEX {
                return Err(Error::invalid_value("population index out of bounds"));
            }
            *delta_map.entry(p).or_insert(0) += 1;
            max_pop = max_pop.max(p);
        }
        if delta_map.len() > MAX_PARTICIPANTS {
            return Err(Error::invalid_value("too many participants"));
        }

        if !info.left.is_empty() || !info.right.is_empty() {
            self.grow_populations(max_pop + 1)?;
        }

        self.tables.delta.push(
            delta_map
                .into_iter()
                .filter(|&(_, d)| d != 0)
                .map(|(p, d)| PopDelta {
                    pop: p as u32,
                    delta: d as i32,
                })
                .collect(),
        );

        for (i, &p) in left_sorted[..nleft].iter().enumerate() {
            self.tables.left_slots[p].push(PopContrib {
                proc: key,
                slot: i as u8,
            });
        }

        for inst in &mut self.instances {
            let mut row: FactorRow = [1; MAX_PROCESS_ORDER];
            let mut c: Count = 0;
            for (i, &p) in left_sorted[..nleft].iter().enumerate() {
                if i == 0 || p != left_sorted[i - 1] {
                    c = inst.count[p];
                } else {
                    c -= 1;
                }
                row[i] = c;
            }
            inst.factor.push(row);
        }

        self.tables.rate.push(info.rate);
        Ok(())
    }

    pub fn add_all<'a, I>(&mut self, infos: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a ProcessInfo>,
    {
        for info in infos {
            self.add(info)?;
        }
        Ok(())
    }

    /// Drop every process and population; instances are retained empty.
    pub fn clear(&mut self) {
        self.tables = ProcTables::default();
        for inst in &mut self.instances {
            inst.count.clear();
            inst.factor.clear();
        }
    }

    /// Zero all population counts in every instance, restoring the factor
    /// rows to their empty-population baseline.
    pub fn reset(&mut self) {
        let tables = &self.tables;
        for inst in &mut self.instances {
            for p in 0..tables.n_pop {
                // infallible: p in range, notify never errs
                let _ = tables.set_count_in(inst, p, 0, &mut |_, _| Ok(()));
            }
        }
    }

    pub fn count(&self, p: usize, instance: usize) -> Result<Count> {
        let inst = self.instance(instance)?;
        if p >= self.tables.n_pop {
            return Err(Error::invalid_value(format!(
                "population index {p} out of range"
            )));
        }
        Ok(inst.count(p))
    }

    /// Zero-copy view of an instance's full count vector.
    pub fn counts(&self, instance: usize) -> Result<&[Count]> {
        Ok(self.instance(instance)?.counts())
    }

    pub fn set_count(
        &mut self,
        p: usize,
        c: Count,
        notify: &mut Notify<'_>,
        instance: usize,
    ) -> Result<()> {
        let (tables, instances) = self.split_mut();
        let inst = instances
            .get_mut(instance)
            .ok_or_else(|| Error::invalid_value("instance index out of range"))?;
        tables.set_count_in(inst, p, c, notify)
    }

    /// Fire process `k`: apply its stoichiometric deltas, updating every
    /// dependent factor slot and notifying affected processes. Population
    /// counts are committed as each delta completes; observable state is
    /// consistent once the call returns.
    pub fn apply(
        &mut self,
        k: usize,
        notify: &mut Notify<'_>,
        instance: usize,
    ) -> Result<()> {
        let (tables, instances) = self.split_mut();
        let inst = instances
            .get_mut(instance)
            .ok_or_else(|| Error::invalid_value("instance index out of range"))?;
        tables.apply_in(inst, k, notify)
    }

    pub fn propensity(&self, k: usize, instance: usize) -> Result<f64> {
        let inst = self.instance(instance)?;
        if k >= self.tables.len() {
            return Err(Error::invalid_value(format!(
                "process index {k} out of range"
            )));
        }
        Ok(self.tables.propensity_of(inst, k))
    }

    pub fn tables(&self) -> &ProcTables {
        &self.tables
    }

    /// Split into the shared tables and the per-instance slices, for
    /// callers that drive instances in parallel.
    pub fn split_mut(&mut self) -> (&ProcTables, &mut [ProcInstance]) {
        (&self.tables, &mut self.instances)
    }

    fn instance(&self, instance: usize) -> Result<&ProcInstance> {
        self.instances
            .get(instance)
            .ok_or_else(|| Error::invalid_value("instance index out of range"))
    }
}
