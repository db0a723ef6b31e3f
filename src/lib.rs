//! Stochastic simulation of reaction-diffusion systems.
//!
//! A model of chemical species, elementary mass-action reactions and a
//! mesh of well-mixed cells linked by diffusion is compiled into a flat
//! list of elementary processes; statistically correct trajectories of
//! per-population counts are then generated with the direct stochastic
//! simulation algorithm. Independent instances of one compiled model
//! share the read-only process tables and advance in parallel.
//!
//! The pieces compose as: [`process::ProcessSystem`] maintains process
//! propensities incrementally across count changes;
//! [`selector::DirectSelector`] turns the propensity vector into next
//! event draws; [`sim::Simulator`] couples the two per instance and
//! drives them by event or to a target time. Model setup leans on
//! [`categorical`] (alias-method sampling), the [`sample`] family of
//! weighted samplers and the [`distribute`] allocation routine.

pub mod categorical;
pub mod distribute;
pub mod error;
pub mod model;
pub mod output;
pub mod parse;
pub mod process;
pub mod sample;
pub mod selector;
pub mod sim;
pub mod valid;

pub use error::{Error, Result};
pub use model::Model;
pub use sim::Simulator;
