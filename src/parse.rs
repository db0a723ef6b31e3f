//! YAML model ingestion.
//!
//! A model document carries a top-level `model: NAME`, a `cells:` section
//! (`wmvol` single compartment or `grid`), and one or more `species:` and
//! `reaction:` entries. The historical wire format repeats the `species:`
//! and `reaction:` keys at top level, which an off-the-shelf mapping type
//! would reject as duplicates; the document is therefore deserialised
//! through a hand-written map visitor that folds repeated keys into
//! lists. Each entry may equally be given once as a YAML sequence.
//!
//! A stream may hold several model documents; loading scans for the first
//! whose `model:` name matches (any model when no name is requested).

use std::fmt;
use std::io;

use serde::de::{Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::model::{Cell, Model, Neighbour, Reaction, Species};
use crate::process::MAX_PROCESS_ORDER;
use crate::valid::CheckValid;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

#[derive(Debug, Deserialize)]
struct SpeciesSpec {
    name: String,
    #[serde(default)]
    diffusivity: f64,
    #[serde(default)]
    concentration: f64,
    #[serde(default)]
    count: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RateSpec {
    Scalar(f64),
    List(Vec<f64>),
}

#[derive(Debug, Deserialize)]
struct ReactionSpec {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    left: Vec<String>,
    #[serde(default)]
    right: Vec<String>,
    #[serde(default)]
    rate: Option<RateSpec>,
}

#[derive(Debug, Deserialize)]
struct WmvolSpec {
    volume: f64,
}

#[derive(Debug, Deserialize)]
struct GridSpec {
    extent: [[f64; 3]; 2],
    counts: [usize; 3],
    #[serde(default)]
    scale: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct CellsSection {
    #[serde(default)]
    wmvol: Option<WmvolSpec>,
    #[serde(default)]
    grid: Option<GridSpec>,
}

#[derive(Debug, Default)]
struct RawDoc {
    model: Option<String>,
    cells: Option<CellsSection>,
    species: Vec<SpeciesSpec>,
    reactions: Vec<ReactionSpec>,
}

impl<'de> Deserialize<'de> for RawDoc {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DocVisitor;

        impl<'de> Visitor<'de> for DocVisitor {
            type Value = RawDoc;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a model document mapping")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<RawDoc, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut doc = RawDoc::default();
                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "model" => doc.model = Some(map.next_value()?),
                        "cells" => doc.cells = Some(map.next_value()?),
                        "species" => match map.next_value::<OneOrMany<SpeciesSpec>>()? {
                            OneOrMany::One(s) => doc.species.push(s),
                            OneOrMany::Many(v) => doc.species.extend(v),
                        },
                        "reaction" => match map.next_value::<OneOrMany<ReactionSpec>>()? {
                            OneOrMany::One(r) => doc.reactions.push(r),
                            OneOrMany::Many(v) => doc.reactions.extend(v),
                        },
                        _ => {
                            map.next_value::<IgnoredAny>()?;
                        }
                    }
                }
                Ok(doc)
            }
        }

        deserializer.deserialize_map(DocVisitor)
    }
}

fn build_wmvol_cells(spec: &WmvolSpec) -> Vec<Cell> {
    vec![Cell {
        volume: spec.volume,
        neighbours: Vec::new(),
    }]
}

/// Axis-aligned box mesh. Cell spacing per axis follows from the extent
/// and the counts (times the optional scale); neighbouring cells along
/// axis `i` are linked with geometric coefficient `1/d_i^2`.
fn build_grid_cells(spec: &GridSpec) -> Result<Vec<Cell>> {
    let [n_x, n_y, n_z] = spec.counts;
    if n_x == 0 || n_y == 0 || n_z == 0 {
        return Err(Error::model_io("grid counts must be positive"));
    }
    let scale = spec.scale.unwrap_or(1.0);

    let mut d = [0.0f64; 3];
    for axis in 0..3 {
        let width = (spec.extent[1][axis] - spec.extent[0][axis]) * scale;
        d[axis] = width / spec.counts[axis] as f64;
        if !(d[axis] > 0.0) {
            return Err(Error::model_io("grid extent must have positive widths"));
        }
    }
    let volume = d[0] * d[1] * d[2];

    let cell_id = |ix: usize, iy: usize, iz: usize| (iz * n_y + iy) * n_x + ix;

    let mut cells = Vec::with_capacity(n_x * n_y * n_z);
    for iz in 0..n_z {
        for iy in 0..n_y {
            for ix in 0..n_x {
                let mut neighbours = Vec::new();
                let mut link = |cell: usize, axis: usize| {
                    neighbours.push(Neighbour {
                        cell,
                        coef: 1.0 / (d[axis] * d[axis]),
                    })
                };
                if ix > 0 {
                    link(cell_id(ix - 1, iy, iz), 0);
                }
                if ix + 1 < n_x {
                    link(cell_id(ix + 1, iy, iz), 0);
                }
                if iy > 0 {
                    link(cell_id(ix, iy - 1, iz), 1);
                }
                if iy + 1 < n_y {
                    link(cell_id(ix, iy + 1, iz), 1);
                }
                if iz > 0 {
                    link(cell_id(ix, iy, iz - 1), 2);
                }
                if iz + 1 < n_z {
                    link(cell_id(ix, iy, iz + 1), 2);
                }
                cells.push(Cell { volume, neighbours });
            }
        }
    }
    Ok(cells)
}

fn build_reaction(model: &mut Model, spec: &ReactionSpec) -> Result<()> {
    let name = match &spec.name {
        Some(name) => {
            if model.reactions.index_of(name).is_some() {
                return Err(Error::model_io(format!(
                    "reaction {name} already specified"
                )));
            }
            name.clone()
        }
        None => model.reactions.unique_key("_r"),
    };

    let rates: Vec<f64> = match &spec.rate {
        Some(RateSpec::Scalar(r)) => vec![*r],
        Some(RateSpec::List(rs)) if (1..=2).contains(&rs.len()) => rs.clone(),
        _ => {
            return Err(Error::model_io(format!(
                "unknown reaction rate specification for {name}"
            )))
        }
    };

    let side = |names: &[String]| -> Result<Vec<usize>> {
        names
            .iter()
            .map(|n| {
                model.species.index_of(n).ok_or_else(|| {
                    Error::model_io(format!("unknown species {n} in reaction {name}"))
                })
            })
            .collect()
    };
    let left = side(&spec.left)?;
    let right = side(&spec.right)?;

    model.reactions.insert(Reaction {
        name: name.clone(),
        left: left.clone(),
        right: right.clone(),
        rate: rates[0],
    });
    if rates.len() > 1 {
        let name_rev = model.reactions.unique_key(&format!("{name}_rev"));
        model.reactions.insert(Reaction {
            name: name_rev,
            left: right,
            right: left,
            rate: rates[1],
        });
    }
    Ok(())
}

/// Semantic checks on a structurally well-formed model.
fn check_model(model: &Model) -> Result<()> {
    for s in &model.species {
        if !s.is_valid() {
            return Err(Error::invalid_model(format!(
                "species {} has a negative value",
                s.name
            )));
        }
    }
    for r in &model.reactions {
        if r.rate < 0.0 {
            return Err(Error::invalid_model(format!(
                "reaction {} has a negative rate",
                r.name
            )));
        }
        if r.order() > MAX_PROCESS_ORDER {
            return Err(Error::invalid_model(format!(
                "reaction {} exceeds order {MAX_PROCESS_ORDER}",
                r.name
            )));
        }
    }
    for (i, c) in model.cells.iter().enumerate() {
        if !c.is_valid() {
            return Err(Error::invalid_model(format!(
                "cell {i} has a non-positive volume"
            )));
        }
    }
    Ok(())
}

fn build_model(raw: RawDoc) -> Result<Model> {
    let name = raw
        .model
        .ok_or_else(|| Error::model_io("model specification not found"))?;
    let mut model = Model::new(name);

    let cells = raw
        .cells
        .ok_or_else(|| Error::model_io("missing cells specification"))?;
    model.cells = match (&cells.wmvol, &cells.grid) {
        (Some(wmvol), None) => build_wmvol_cells(wmvol),
        (None, Some(grid)) => build_grid_cells(grid)?,
        _ => return Err(Error::model_io("unknown cells specification")),
    };

    for s in &raw.species {
        model.species.insert(Species {
            name: s.name.clone(),
            diffusivity: s.diffusivity,
            concentration: s.concentration,
            count: s.count,
        });
    }
    for r in &raw.reactions {
        build_reaction(&mut model, r)?;
    }

    model.build_implicit_cell_sets();
    check_model(&model)?;
    Ok(model)
}

fn select_model<'de, I>(docs: I, model_name: &str) -> Result<Model>
where
    I: Iterator<Item = serde_yaml::Deserializer<'de>>,
{
    for doc in docs {
        let raw = RawDoc::deserialize(doc).map_err(|e| Error::model_io(e.to_string()))?;
        match &raw.model {
            Some(name) if model_name.is_empty() || name == model_name => {
                return build_model(raw);
            }
            _ => continue,
        }
    }
    Err(Error::model_io("model specification not found"))
}

/// Load a model from YAML text. `model_name` selects among multiple
/// documents; the empty string takes the first model found.
pub fn model_from_str(input: &str, model_name: &str) -> Result<Model> {
    select_model(serde_yaml::Deserializer::from_str(input), model_name)
}

/// Load a model from a reader carrying YAML text.
pub fn model_from_reader<R: io::Read>(reader: R, model_name: &str) -> Result<Model> {
    let mut input = String::new();
    let mut reader = reader;
    reader
        .read_to_string(&mut input)
        .map_err(|e| Error::model_io(e.to_string()))?;
    model_from_str(&input, model_name)
}
