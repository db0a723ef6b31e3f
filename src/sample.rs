//! Weighted random sampling algorithms.
//!
//! All samplers draw from the index range `[0, population)` and append
//! the chosen indices to a caller-supplied vector. A sampler is
//! parameterised at construction (sample size, per-item inclusion
//! probabilities or weights) and reports its sample-size bounds and the
//! minimum population it can draw from; `sample_into` fails with
//! `InvalidValue` when the population is smaller than that minimum.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rand::{Rng, RngCore};

use crate::categorical::Categorical;
use crate::error::{Error, Result};

pub trait Sampler {
    /// Smallest possible sample size.
    fn min_len(&self) -> usize;

    /// Largest possible sample size.
    fn max_len(&self) -> usize;

    /// Minimum population size required by `sample_into`.
    fn population(&self) -> usize;

    /// Draw from `[0, population)`, appending chosen indices to `out`.
    /// Returns the number of items appended.
    fn sample_into(
        &self,
        population: usize,
        out: &mut Vec<usize>,
        rng: &mut dyn RngCore,
    ) -> Result<usize>;
}

fn check_inclusion_probabilities(pi: &[f64]) -> Result<()> {
    if pi.iter().any(|&p| !(0.0..=1.0).contains(&p)) {
        return Err(Error::invalid_value("invalid inclusion probability"));
    }
    Ok(())
}

/// Without-replacement, order-preserving systematic sampler.
///
/// A single uniform is walked along the prefix sum of the inclusion
/// probabilities; item `i` is emitted each time the prefix sum passes the
/// current offset. The sample size is the probability total rounded up or
/// down. Probabilities past the end of the parameter are zero.
#[derive(Clone, Debug, Default)]
pub struct OrderedSystematic {
    pi_psum: Vec<f64>,
}

impl OrderedSystematic {
    pub fn new(pi: &[f64]) -> Result<Self> {
        check_inclusion_probabilities(pi)?;
        let mut sum = 0.0;
        let pi_psum = pi
            .iter()
            .map(|&p| {
                sum += p;
                sum
            })
            .collect();
        Ok(OrderedSystematic { pi_psum })
    }
}

impl Sampler for OrderedSystematic {
    fn min_len(&self) -> usize {
        0
    }

    fn max_len(&self) -> usize {
        self.pi_psum.last().map_or(0, |&s| s.ceil() as usize)
    }

    fn population(&self) -> usize {
        0
    }

    fn sample_into(
        &self,
        population: usize,
        out: &mut Vec<usize>,
        rng: &mut dyn RngCore,
    ) -> Result<usize> {
        let mut u: f64 = rng.gen();
        let mut emitted = 0;

        for (i, &psum) in self.pi_psum.iter().enumerate().take(population) {
            if u < psum {
                out.push(i);
                emitted += 1;
                u += 1.0;
            }
        }
        Ok(emitted)
    }
}

/// With-replacement multinomial sampler: `n` alias-method draws from a
/// weight vector. Performs well while the sample is not much larger than
/// the population; for the opposite regime a sequential binomial scheme
/// would be preferable.
#[derive(Clone, Debug)]
pub struct MultinomialDraw {
    n: usize,
    cat: Categorical,
}

impl MultinomialDraw {
    pub fn new(n: usize, weights: &[f64]) -> Result<Self> {
        Ok(MultinomialDraw {
            n,
            cat: Categorical::new(weights)?,
        })
    }
}

impl Sampler for MultinomialDraw {
    fn min_len(&self) -> usize {
        self.n
    }

    fn max_len(&self) -> usize {
        self.n
    }

    fn population(&self) -> usize {
        self.cat.len()
    }

    fn sample_into(
        &self,
        population: usize,
        out: &mut Vec<usize>,
        rng: &mut dyn RngCore,
    ) -> Result<usize> {
        if population < self.population() {
            return Err(Error::invalid_value("population range too small"));
        }
        for _ in 0..self.n {
            out.push(self.cat.sample(rng));
        }
        Ok(self.n)
    }
}

// Max-heap key ordered by the ranking variable.
#[derive(Clone, Copy, Debug)]
struct HeapKey {
    order: f64,
    slot: usize,
}

impl PartialEq for HeapKey {
    fn eq(&self, other: &Self) -> bool {
        self.order.total_cmp(&other.order) == Ordering::Equal
    }
}

impl Eq for HeapKey {}

impl PartialOrd for HeapKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order.total_cmp(&other.order)
    }
}

/// Order-method reservoir: keep the `n` smallest ranking keys seen while
/// streaming the population, replacing reservoir entries in place.
fn order_reservoir_sample<F>(
    n: usize,
    population: usize,
    out: &mut Vec<usize>,
    rng: &mut dyn RngCore,
    mut next_order: F,
) -> usize
where
    F: FnMut(usize, &mut dyn RngCore) -> f64,
{
    if n == 0 {
        return 0;
    }

    let base = out.len();
    let mut heap: BinaryHeap<HeapKey> = BinaryHeap::with_capacity(n);

    let head = n.min(population);
    for i in 0..head {
        heap.push(HeapKey {
            order: next_order(i, rng),
            slot: i,
        });
        out.push(i);
    }
    if head < n {
        return head;
    }

    for i in n..population {
        let q = next_order(i, rng);
        if let Some(&top) = heap.peek() {
            if q < top.order {
                heap.pop();
                out[base + top.slot] = i;
                heap.push(HeapKey {
                    order: q,
                    slot: top.slot,
                });
            }
        }
    }
    n
}

/// Without-replacement reservoir sampler with adjusted Pareto ranking.
///
/// Ranking keys are `U/(1-U) * (1-p)/p * a` with the Lundqvist adjustment
/// `a = exp(p(1-p)(p-1/2)/d^2)`, `d = sum p(1-p)`. Actual inclusion
/// probabilities approach the requested ones as `d` grows.
///
/// Lundqvist (2007), On the distance between some pi-ps sampling designs.
/// Acta Appl. Math. 97, 79-97.
#[derive(Clone, Debug)]
pub struct AdjustedPareto {
    n: usize,
    qcoef: Vec<f64>,
}

impl AdjustedPareto {
    pub fn new(n: usize, pi: &[f64]) -> Result<Self> {
        check_inclusion_probabilities(pi)?;

        let d: f64 = pi.iter().map(|&p| p * (1.0 - p)).sum();
        let ood2 = 1.0 / (d * d);
        let qcoef = pi
            .iter()
            .map(|&p| {
                let loga = p * (1.0 - p) * (p - 0.5) * ood2;
                let a = if loga.is_finite() { loga.exp() } else { 1.0 };
                if p > 0.0 {
                    (1.0 - p) / p * a
                } else {
                    f64::INFINITY
                }
            })
            .collect();
        Ok(AdjustedPareto { n, qcoef })
    }
}

impl Sampler for AdjustedPareto {
    fn min_len(&self) -> usize {
        self.n
    }

    fn max_len(&self) -> usize {
        self.n
    }

    fn population(&self) -> usize {
        self.n
    }

    fn sample_into(
        &self,
        population: usize,
        out: &mut Vec<usize>,
        rng: &mut dyn RngCore,
    ) -> Result<usize> {
        if population < self.population() {
            return Err(Error::invalid_value("population range too small"));
        }
        let qcoef = &self.qcoef;
        let emitted = order_reservoir_sample(self.n, population, out, rng, |i, g| {
            match qcoef.get(i) {
                Some(&q) => {
                    let u: f64 = g.gen();
                    u * q / (1.0 - u)
                }
                None => f64::INFINITY,
            }
        });
        Ok(emitted)
    }
}

/// Without-replacement reservoir sampler of Efraimidis and Spirakis.
///
/// Ranking keys are `E/lambda` with `E ~ Exp(1)`; the parameters are
/// per-round draw weights, which approximate inclusion probabilities when
/// they are not too far from uniform.
///
/// Efraimidis, Spirakis (2006), Weighted random sampling with a
/// reservoir. Inf. Process. Lett. 97(5), 181-185.
#[derive(Clone, Debug)]
pub struct EfraimidisSpirakis {
    n: usize,
    oolambda: Vec<f64>,
}

impl EfraimidisSpirakis {
    pub fn new(n: usize, lambda: &[f64]) -> Result<Self> {
        if lambda.iter().any(|&l| !l.is_finite() || l < 0.0) {
            return Err(Error::invalid_value("negative or non-finite weight"));
        }
        Ok(EfraimidisSpirakis {
            n,
            oolambda: lambda.iter().map(|&l| 1.0 / l).collect(),
        })
    }
}

impl Sampler for EfraimidisSpirakis {
    fn min_len(&self) -> usize {
        self.n
    }

    fn max_len(&self) -> usize {
        self.n
    }

    fn population(&self) -> usize {
        self.n
    }

    fn sample_into(
        &self,
        population: usize,
        out: &mut Vec<usize>,
        rng: &mut dyn RngCore,
    ) -> Result<usize> {
        if population < self.population() {
            return Err(Error::invalid_value("population range too small"));
        }
        let oolambda = &self.oolambda;
        let emitted = order_reservoir_sample(self.n, population, out, rng, |i, g| {
            match oolambda.get(i) {
                Some(&ool) => {
                    let e = -g.gen::<f64>().ln();
                    e * ool
                }
                None => f64::INFINITY,
            }
        });
        Ok(emitted)
    }
}

/// Map with-replacement Poisson probabilities to the inclusion
/// probabilities of the conditioned (fixed-size `n`) design, iterating
/// the forward recurrence for j = 1..n.
#[contracts::debug_ensures(ret.is_err() || psi.len() == pi.len())]
fn conditional_psi(n: usize, pi: &[f64], psi: &mut Vec<f64>) -> Result<()> {
    psi.clear();
    psi.resize(pi.len(), 0.0);

    for j in 1..=n {
        let mut denom = 0.0;
        for (x, &p) in psi.iter_mut().zip(pi) {
            *x = p / (1.0 - p) * (1.0 - *x);
            denom += *x;
        }
        let scale = j as f64 / denom;
        for x in psi.iter_mut() {
            *x *= scale;
            if *x > 1.0 {
                return Err(Error::ssa(
                    "conditional poisson forward probability diverged",
                ));
            }
        }
    }
    Ok(())
}

/// Invert desired inclusion probabilities to with-replacement Poisson
/// probabilities by a damped quasi-Newton iteration (Tille sec. 5.6.3),
/// with a greedy line search on the step scale for robustness.
fn invert_cps_probabilities(n: usize, pi: &mut Vec<f64>, abs_tol: f64) -> Result<()> {
    let len = pi.len();
    let mut pibar = pi.clone();
    let mut pix = vec![0.0; len];
    let mut psi = Vec::with_capacity(len);
    let mut delta = vec![0.0; len];

    // adaptive step scaling
    let mut alpha: f64 = 1.0;
    let beta = 0.2; // towards one when admissible
    let gamma = 0.1; // towards zero when inadmissible

    conditional_psi(n, &pibar, &mut psi)?;
    let mut dmax: f64 = 0.0;
    for i in 0..len {
        delta[i] = pi[i] - psi[i];
        dmax = dmax.max(delta[i].abs());
    }

    while dmax > abs_tol {
        let admissible = (|| -> Result<bool> {
            for i in 0..len {
                pix[i] = pibar[i] + alpha * delta[i];
                if !(0.0..=1.0).contains(&pix[i]) {
                    return Ok(false);
                }
            }
            conditional_psi(n, &pix, &mut psi)?;

            let mut v: f64 = 0.0;
            for i in 0..len {
                v = v.max((pi[i] - psi[i]).abs());
            }
            Ok(v < dmax)
        })()?;

        if admissible {
            pibar.copy_from_slice(&pix);
            dmax = 0.0;
            for i in 0..len {
                delta[i] = pi[i] - psi[i];
                dmax = dmax.max(delta[i].abs());
            }
            alpha = 1.0 - (1.0 - beta) * (1.0 - alpha);
        } else {
            alpha *= gamma;
            if alpha < abs_tol {
                return Err(Error::ssa(format!(
                    "conditional poisson inversion failed to converge, delta {dmax}"
                )));
            }
        }
    }

    pi.copy_from_slice(&pibar);
    Ok(())
}

/// Conditional Poisson sampler, rejective multinomial scheme.
///
/// Construction inverts the requested inclusion probabilities to Poisson
/// probabilities, then draws are made with replacement from the odds
/// `p/(1-p)` and the whole draw restarts whenever an index repeats.
#[derive(Clone, Debug)]
pub struct CpsRejective {
    n: usize,
    cat: Categorical,
    len: usize,
}

impl CpsRejective {
    /// Loose enough that the damped iteration cannot stall on f64
    /// round-off in the forward recurrence.
    pub const DEFAULT_TOLERANCE: f64 = 1e-9;

    pub fn new(n: usize, pi: &[f64]) -> Result<Self> {
        Self::with_tolerance(n, pi, Self::DEFAULT_TOLERANCE)
    }

    pub fn with_tolerance(n: usize, pi: &[f64], abs_tol: f64) -> Result<Self> {
        check_inclusion_probabilities(pi)?;
        if pi.iter().any(|&p| p >= 1.0) {
            return Err(Error::invalid_value(
                "inclusion probability must be below one",
            ));
        }

        let mut p = pi.to_vec();
        invert_cps_probabilities(n, &mut p, abs_tol)?;

        // odds for the with-replacement multinomial over n
        let mut sum = 0.0;
        for x in p.iter_mut() {
            *x = *x / (1.0 - *x);
            sum += *x;
        }
        let scale = n as f64 / sum;
        for x in p.iter_mut() {
            *x *= scale;
        }

        Ok(CpsRejective {
            n,
            len: p.len(),
            cat: Categorical::new(&p)?,
        })
    }
}

impl Sampler for CpsRejective {
    fn min_len(&self) -> usize {
        self.n
    }

    fn max_len(&self) -> usize {
        self.n
    }

    fn population(&self) -> usize {
        self.len
    }

    fn sample_into(
        &self,
        population: usize,
        out: &mut Vec<usize>,
        rng: &mut dyn RngCore,
    ) -> Result<usize> {
        if population < self.population() {
            return Err(Error::invalid_value("population range too small"));
        }

        let base = out.len();
        let mut drawn = vec![false; self.len];
        while out.len() - base < self.n {
            let k = self.cat.sample(rng);
            if drawn[k] {
                // repeat: restart the whole draw
                drawn.fill(false);
                out.truncate(base);
            } else {
                drawn[k] = true;
                out.push(k);
            }
        }
        Ok(self.n)
    }
}
