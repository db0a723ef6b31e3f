//! CSV trajectory output.
//!
//! Header is `instance,time,cell,<species...>`; every sampled state emits
//! one row per cell.

use std::io::Write;

use crate::model::Model;
use crate::process::Count;
use crate::sim::EnsembleSample;

pub struct CsvEmitter {
    n_species: usize,
    n_cells: usize,
    header: Vec<String>,
}

impl CsvEmitter {
    pub fn new(model: &Model) -> Self {
        let mut header = vec![
            "instance".to_string(),
            "time".to_string(),
            "cell".to_string(),
        ];
        header.extend(model.species.iter().map(|s| s.name.clone()));
        CsvEmitter {
            n_species: model.n_species(),
            n_cells: model.n_cells(),
            header,
        }
    }

    pub fn write_header<W: Write>(&self, w: &mut csv::Writer<W>) -> csv::Result<()> {
        w.write_record(&self.header)
    }

    /// Emit one sampled state: `counts` is the flat population vector of
    /// one instance, indexed `cell * n_species + species`.
    pub fn write_state<W: Write>(
        &self,
        w: &mut csv::Writer<W>,
        instance: usize,
        t: f64,
        counts: &[Count],
    ) -> csv::Result<()> {
        let mut record = Vec::with_capacity(3 + self.n_species);
        for cell in 0..self.n_cells {
            record.clear();
            record.push(instance.to_string());
            record.push(t.to_string());
            record.push(cell.to_string());
            let base = cell * self.n_species;
            record.extend(counts[base..base + self.n_species].iter().map(Count::to_string));
            w.write_record(&record)?;
        }
        Ok(())
    }

    /// Emit a whole recorded ensemble. With `final_only`, just each
    /// instance's last sampled time is written.
    pub fn write_ensemble<W: Write>(
        &self,
        w: &mut csv::Writer<W>,
        sample: &EnsembleSample,
        final_only: bool,
    ) -> csv::Result<()> {
        let times = sample.times();
        let first_ti = if final_only { times.len() - 1 } else { 0 };
        for instance in 0..sample.n_instances() {
            for (ti, &t) in times.iter().enumerate().skip(first_ti) {
                self.write_state(w, instance, t, sample.counts(instance, ti))?;
            }
        }
        Ok(())
    }
}
