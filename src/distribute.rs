//! Weighted allocation of integer counts to bins.
//!
//! Each bin first receives its rounded-down share `floor(n * w_i / sum w)`;
//! the deficit is then distributed by weighted random sampling over the
//! fractional residuals. The expectation per bin is exact and the
//! deviation from the fractional share stays within one item for the
//! without-replacement phase-B samplers.

use rand::RngCore;

use crate::error::{Error, Result};
use crate::sample::{
    AdjustedPareto, CpsRejective, EfraimidisSpirakis, MultinomialDraw, OrderedSystematic, Sampler,
};

/// Phase-B sampler choice for the residual draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Multinomial,
    OrderedSystematic,
    AdjustedPareto,
    EfraimidisSpirakis,
    CpsRejective,
}

/// Rounded-down allocation; writes the fractional residuals back into
/// `weight` and returns the count still to be distributed.
#[contracts::debug_ensures(ret.as_ref().map(|r| r.1 <= n).unwrap_or(true))]
fn distribute_floor(n: u64, weight: &mut [f64]) -> Result<(Vec<u64>, u64)> {
    let total: f64 = weight.iter().sum();
    if !(total > 0.0) {
        return Err(Error::invalid_value("bin weights must have positive sum"));
    }

    let oo_total = 1.0 / total;
    let mut bins = vec![0u64; weight.len()];
    let mut allocated = 0u64;
    for (bin, w) in bins.iter_mut().zip(weight.iter_mut()) {
        let q = *w * oo_total * n as f64;
        let a = q.floor();
        *bin = a as u64;
        *w = q - a;
        allocated += a as u64;
    }
    Ok((bins, n - allocated))
}

/// Distribute `n` items over bins proportionally to `weights`.
pub fn distribute_counts(
    n: u64,
    weights: &[f64],
    method: Method,
    rng: &mut dyn RngCore,
) -> Result<Vec<u64>> {
    if weights.is_empty() {
        return Err(Error::invalid_value("no bins to distribute into"));
    }
    if weights.iter().any(|&w| !w.is_finite() || w < 0.0) {
        return Err(Error::invalid_value("negative or non-finite bin weight"));
    }

    let mut residual = weights.to_vec();
    let (mut bins, r) = distribute_floor(n, &mut residual)?;
    if r == 0 {
        return Ok(bins);
    }

    let r_usize = r as usize;
    let mut chosen = Vec::with_capacity(r_usize);
    match method {
        Method::Multinomial => {
            MultinomialDraw::new(r_usize, &residual)?.sample_into(bins.len(), &mut chosen, rng)?;
        }
        Method::OrderedSystematic => {
            OrderedSystematic::new(&residual)?.sample_into(bins.len(), &mut chosen, rng)?;
        }
        Method::AdjustedPareto => {
            AdjustedPareto::new(r_usize, &residual)?.sample_into(bins.len(), &mut chosen, rng)?;
        }
        Method::EfraimidisSpirakis => {
            EfraimidisSpirakis::new(r_usize, &residual)?.sample_into(
                bins.len(),
                &mut chosen,
                rng,
            )?;
        }
        Method::CpsRejective => {
            CpsRejective::new(r_usize, &residual)?.sample_into(bins.len(), &mut chosen, rng)?;
        }
    }

    for i in chosen {
        bins[i] += 1;
    }
    Ok(bins)
}
