//! Categorical distribution via the alias method.
//!
//! Vose (1991), A linear algorithm for generating random numbers with a
//! given distribution. IEEE Trans. Software Eng. 17(9), 972-975.

use rand::{Rng, RngCore};

use crate::error::{Error, Result};

/// O(1) sampler over a fixed finite distribution, built in O(n) from a
/// vector of non-negative weights with positive sum. Zero-weight outcomes
/// are legal and are never drawn.
#[derive(Clone, Debug, PartialEq)]
pub struct Categorical {
    // tbl[i].0: probability that bin i yields i rather than its alias
    // tbl[i].1: alias for bin i
    tbl: Vec<(f64, usize)>,
}

impl Categorical {
    pub fn new(weights: &[f64]) -> Result<Self> {
        if weights.is_empty() {
            return Err(Error::invalid_value("empty weight vector"));
        }
        if weights.iter().any(|&w| !w.is_finite() || w < 0.0) {
            return Err(Error::invalid_value("negative or non-finite weight"));
        }
        let sum: f64 = weights.iter().sum();
        if sum <= 0.0 {
            return Err(Error::invalid_value("weights sum to zero"));
        }

        let n = weights.len();
        let scale = n as f64 / sum;
        let mut q: Vec<f64> = weights.iter().map(|&w| w * scale).collect();
        let mut alias = vec![0usize; n];

        let mut small: Vec<usize> = Vec::new();
        let mut big: Vec<usize> = Vec::new();
        for (i, &qi) in q.iter().enumerate() {
            if qi <= 1.0 {
                small.push(i);
            } else {
                big.push(i);
            }
        }

        loop {
            let (Some(&s), Some(&b)) = (small.last(), big.last()) else {
                break;
            };
            small.pop();
            alias[s] = b;
            q[b] = (q[b] + q[s]) - 1.0;
            if q[b] <= 1.0 {
                big.pop();
                small.push(b);
            }
        }

        // round-off leftovers on either list take the whole bin
        for i in small.into_iter().chain(big) {
            q[i] = 1.0;
        }

        Ok(Categorical {
            tbl: q.into_iter().zip(alias).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.tbl.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tbl.is_empty()
    }

    #[inline]
    pub fn sample(&self, rng: &mut dyn RngCore) -> usize {
        let n = self.tbl.len();
        let d: f64 = rng.gen::<f64>() * n as f64;
        let bin = (d as usize).min(n - 1);
        let u = d - bin as f64;

        let (q, alias) = self.tbl[bin];
        if u < q {
            bin
        } else {
            alias
        }
    }
}
