//! Large-l asymptotics of the channel log-ratios.
//!
//! F_l ≈ Σ_k I_k l̄^{-k} for odd k ≤ 9, where the I_k are integrals over the
//! background of the reduced Riccati polynomials in `series`. The weighted
//! sums over l ≥ 2 are closed form through `degeneracy`.

pub mod degeneracy;
pub mod series;

pub use degeneracy::{degeneracy, degeneracy_sum, DegeneracySum};

use crate::error::DeterminantError;
use crate::numerics::{grid_derivatives, integrate_with_error};
use crate::profile::BackgroundProfile;
use crate::species::{MassProfile, ParticleSpecies};
use crate::types::{Estimate, MasslessTail};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use series::{wkb_integrands, DiffPolynomial};

pub const MAX_ORDER: usize = 9;
const GRID_POINTS: usize = 4000;
/// Inner end of the log grid relative to R_max.
const GRID_START: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WkbTerm {
    pub order: usize,
    pub value: f64,
    pub error: f64,
}

/// A divergent degeneracy sum paired with the integral multiplying it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoleTerm {
    pub term: WkbTerm,
    pub residue: f64,
    pub finite: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WkbExpansion {
    dim: usize,
    terms: Vec<WkbTerm>,
}

/// Excess of the monomial Π q^{(o)} over its false-vacuum value, written as a
/// telescoping sum so it stays accurate where δ ≪ q_F.
fn monomial_excess(monomial: &[u8], free: &[f64], delta: &[f64]) -> f64 {
    let mut total = 0.0;
    for j in 0..monomial.len() {
        let head: f64 = monomial[..j]
            .iter()
            .map(|&o| free[o as usize] + delta[o as usize])
            .product();
        let tail: f64 = monomial[j + 1..].iter().map(|&o| free[o as usize]).product();
        total += head * delta[monomial[j] as usize] * tail;
    }
    total
}

fn polynomial_excess(poly: &DiffPolynomial, free: &[f64], delta: &[f64]) -> f64 {
    poly.terms()
        .map(|(m, c)| c * monomial_excess(m, free, delta))
        .sum()
}

impl WkbExpansion {
    /// Integrates I_1 … I_9 for one species. `massless` selects the branch
    /// with a power-law tail beyond R_max, which then needs `tail`.
    pub fn new(masses: &MassProfile, massless: bool, tail: Option<MasslessTail>) -> Result<Self> {
        let tail = match (massless, tail) {
            (true, None) => {
                return Err(DeterminantError::configuration(
                    "massless WKB branch needs the asymptotic fit of dW (prefactor, exponent)",
                ))
            }
            (true, Some(tail)) if !(tail.exponent > 2.0) => {
                return Err(DeterminantError::configuration(format!(
                    "massless WKB branch needs dW to decay faster than r^-2, got r^-{}",
                    tail.exponent
                )))
            }
            (true, Some(tail)) => Some(tail),
            (false, _) => None,
        };
        let m2 = if massless { 0.0 } else { masses.w_false().max(0.0) };

        let r_max = masses.r_max();
        let x_lo = (GRID_START * r_max).ln();
        let x_hi = r_max.ln();
        let xs: Vec<f64> = (0..=GRID_POINTS)
            .map(|i| x_lo + (x_hi - x_lo) * i as f64 / GRID_POINTS as f64)
            .collect();

        // δ = r² ΔW and its x-derivatives; the first one is exact from the slope.
        let mut d0 = Vec::with_capacity(xs.len());
        let mut d1 = Vec::with_capacity(xs.len());
        for &x in &xs {
            let r = x.exp();
            let (v, dv) = masses.value_and_slope(r);
            d0.push(r * r * v);
            d1.push(2.0 * r * r * v + r * r * r * dv);
        }
        let mut derivatives = vec![d0, d1];
        derivatives.extend(grid_derivatives(&xs, &derivatives[1], 2));

        let mut terms = Vec::new();
        for (order, poly) in wkb_integrands(MAX_ORDER) {
            let top = poly.max_order() as usize;
            let mut free = vec![0.0; top + 1];
            let mut delta = vec![0.0; top + 1];
            let mut integrand = Vec::with_capacity(xs.len());
            for (i, &x) in xs.iter().enumerate() {
                let q = m2 * (2.0 * x).exp();
                for o in 0..=top {
                    free[o] = q * 2.0_f64.powi(o as i32);
                    delta[o] = derivatives[o][i];
                }
                integrand.push(polynomial_excess(&poly, &free, &delta));
            }
            let (mut value, error) = integrate_with_error(&xs, &integrand);

            // Below the grid q ∝ e^{2x}, so a degree-p monomial goes as e^{2px}.
            let (free0, delta0) = grid_point(&xs, &derivatives, m2, 0, top);
            let head: f64 = poly
                .terms()
                .map(|(m, c)| c * monomial_excess(m, &free0, &delta0) / (2.0 * m.len() as f64))
                .sum();
            value += head;

            if let Some(MasslessTail {
                prefactor,
                exponent,
            }) = tail
            {
                // Beyond R_max q^{(j)} = (2−a)^j c e^{(2−a)x}.
                let slope = 2.0 - exponent;
                let q = prefactor * r_max.powf(slope);
                let far: f64 = poly
                    .terms()
                    .map(|(m, c)| {
                        let product: f64 = m.iter().map(|&o| slope.powi(o as i32) * q).product();
                        c * product / (m.len() as f64 * (exponent - 2.0))
                    })
                    .sum();
                value += far;
            }

            terms.push(WkbTerm {
                order,
                value,
                error,
            });
        }

        Ok(Self {
            dim: masses.dim(),
            terms,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn terms(&self) -> &[WkbTerm] {
        &self.terms
    }

    pub fn term(&self, order: usize) -> Option<&WkbTerm> {
        self.terms.iter().find(|t| t.order == order)
    }

    fn lbar(&self, l: usize) -> f64 {
        l as f64 + 0.5 * self.dim as f64 - 1.0
    }

    /// Asymptotic F_l.
    pub fn channel(&self, l: usize) -> Estimate {
        let lbar = self.lbar(l);
        let mut value = 0.0;
        let mut error = 0.0;
        for t in &self.terms {
            let weight = lbar.powi(-(t.order as i32));
            value += t.value * weight;
            error += t.error * weight;
        }
        if let Some(last) = self.terms.last() {
            error += last.value.abs() * lbar.powi(-(last.order as i32 + 2));
        }
        Estimate::new(value, error)
    }

    /// ½ Σ_{l≥2} deg(d, l) F_l^{WKB} over the convergent orders.
    pub fn aggregate(&self) -> Estimate {
        let mut value = 0.0;
        let mut error = 0.0;
        for t in &self.terms {
            if let DegeneracySum::Finite(sum) = degeneracy_sum(self.dim, t.order) {
                value += 0.5 * t.value * sum;
                error += 0.5 * t.error * sum.abs();
            }
        }
        Estimate::new(value, error)
    }

    /// Orders whose degeneracy sum diverges in d = 2n.
    pub fn pole_terms(&self) -> Vec<PoleTerm> {
        self.terms
            .iter()
            .filter_map(|t| match degeneracy_sum(self.dim, t.order) {
                DegeneracySum::Pole { residue, finite } => Some(PoleTerm {
                    term: *t,
                    residue,
                    finite,
                }),
                DegeneracySum::Finite(_) => None,
            })
            .collect()
    }
}

fn grid_point(
    xs: &[f64],
    derivatives: &[Vec<f64>],
    m2: f64,
    i: usize,
    top: usize,
) -> (Vec<f64>, Vec<f64>) {
    let q = m2 * (2.0 * xs[i]).exp();
    let free = (0..=top).map(|o| q * 2.0_f64.powi(o as i32)).collect();
    let delta = (0..=top).map(|o| derivatives[o][i]).collect();
    (free, delta)
}

/// WKB channel values for l < l_max and the aggregate over l ≥ 2.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WkbSummary {
    pub terms: Vec<WkbTerm>,
    /// Indexed by l; the l = 0, 1 entries are zero since those channels are
    /// never subtracted.
    pub channels: Vec<Estimate>,
    pub aggregate: Estimate,
}

pub fn find_wkb(
    profile: &BackgroundProfile,
    species: &ParticleSpecies,
    l_max: usize,
    tail: Option<MasslessTail>,
) -> Result<WkbSummary> {
    let masses = MassProfile::new(profile, species)?;
    let massless = profile.is_massless() && masses.is_massless();
    let expansion = WkbExpansion::new(&masses, massless, tail)?;
    let channels = (0..l_max)
        .map(|l| {
            if l < 2 {
                Estimate::new(0.0, 0.0)
            } else {
                expansion.channel(l)
            }
        })
        .collect();
    Ok(WkbSummary {
        terms: expansion.terms().to_vec(),
        channels,
        aggregate: expansion.aggregate(),
    })
}
