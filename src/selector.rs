//! Next-event selection for the direct SSA method.
//!
//! A selector owns the per-process propensity vector of one simulation
//! instance and turns it into `(process, dt)` draws. The uniform source
//! is whatever [`RngCore`] the caller passes to `next`; substituting a
//! low-discrepancy source such as [`VanDerCorput`] changes only the
//! statistical quality of the draws, never the contract.

use rand::{Error as RandError, Rng, RngCore};

use crate::error::{Error, Result};

/// One scheduled event: the process to fire and the time advance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Event {
    pub key: usize,
    pub dt: f64,
}

pub trait Selector {
    /// Configure for `n` processes with all propensities zero.
    fn reset(&mut self, n: usize);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set the propensity of process `k`, adjusting the running total by
    /// the difference. Fails with `InvalidValue` when `k` is out of range
    /// or `r` is negative.
    fn update(&mut self, k: usize, r: f64) -> Result<()>;

    fn propensity(&self, k: usize) -> f64;

    fn total_propensity(&self) -> f64;

    /// Draw the next event: `key` with probability `propensity[key]/total`
    /// and `dt` exponential with rate `total`. Fails with `Ssa` when the
    /// propensity mass is empty (or lost to round-off).
    fn next(&mut self, rng: &mut dyn RngCore) -> Result<Event>;
}

/// Direct-method selector: linear ladder scan over the propensity vector.
///
/// Deliberately O(n) per draw so that `update` stays O(1); at this
/// engine's process counts the scan is cheaper than maintaining a tree.
#[derive(Clone, Debug, Default)]
pub struct DirectSelector {
    propensities: Vec<f64>,
    total: f64,
}

impl DirectSelector {
    pub fn new(n: usize) -> Self {
        DirectSelector {
            propensities: vec![0.0; n],
            total: 0.0,
        }
    }

    /// First index whose prefix sum strictly exceeds `u * total`;
    /// insertion order breaks ties.
    #[inline]
    fn inverse_cdf(&self, u: f64) -> Result<usize> {
        let mut x = u * self.total;
        for (i, &a) in self.propensities.iter().enumerate() {
            x -= a;
            if x < 0.0 {
                return Ok(i);
            }
        }
        Err(Error::ssa("fell off propensity ladder (rounding?)"))
    }
}

impl Selector for DirectSelector {
    fn reset(&mut self, n: usize) {
        self.propensities.clear();
        self.propensities.resize(n, 0.0);
        self.total = 0.0;
    }

    fn len(&self) -> usize {
        self.propensities.len()
    }

    fn update(&mut self, k: usize, r: f64) -> Result<()> {
        if k >= self.propensities.len() {
            return Err(Error::invalid_value(format!(
                "process index {k} out of range"
            )));
        }
        if !(r >= 0.0) || !r.is_finite() {
            return Err(Error::invalid_value(format!(
                "negative or non-finite propensity {r}"
            )));
        }

        let p = &mut self.propensities[k];
        self.total += r - *p;
        *p = r;
        // running total may round slightly below the true sum
        if self.total < 0.0 {
            self.total = 0.0;
        }
        Ok(())
    }

    #[inline]
    fn propensity(&self, k: usize) -> f64 {
        self.propensities[k]
    }

    #[inline]
    fn total_propensity(&self) -> f64 {
        self.total
    }

    fn next(&mut self, rng: &mut dyn RngCore) -> Result<Event> {
        let key = self.inverse_cdf(rng.gen::<f64>())?;
        let dt = -rng.gen::<f64>().ln() / self.total;
        Ok(Event { key, dt })
    }
}

/// Base-2 van der Corput sequence dressed as an [`RngCore`].
///
/// The radical inverse of a counter in base 2 is its bit reversal, so
/// `next_u64` is just that; the high bits consumed by float conversion
/// then enumerate the unit interval with low discrepancy. Useful for
/// quasi-Monte-Carlo experiments at the selector boundary; not a source
/// of independent variates.
#[derive(Clone, Debug, Default)]
pub struct VanDerCorput {
    state: u64,
}

impl VanDerCorput {
    pub fn new() -> Self {
        VanDerCorput { state: 0 }
    }

    pub fn with_index(index: u64) -> Self {
        VanDerCorput { state: index }
    }
}

impl RngCore for VanDerCorput {
    #[inline]
    fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        let n = self.state;
        self.state = self.state.wrapping_add(1);
        n.reverse_bits()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(8) {
            let bytes = self.next_u64().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), RandError> {
        self.fill_bytes(dest);
        Ok(())
    }
}
