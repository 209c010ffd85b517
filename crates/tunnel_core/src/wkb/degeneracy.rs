//! Degeneracy of the angular channels and the regularised sums
//! Σ_{l≥2} deg(d, l) l̄^{-k} with l̄ = l + d/2 − 1.

use statrs::function::beta::ln_beta;
use statrs::function::factorial::{factorial, ln_factorial};

/// Number of terms kept in the small-t series of the heat-kernel weight.
const SERIES_TERMS: usize = 40;
/// Terms of the Taylor series for ∫_0^1 t^{k−1} e^{−λt} dt.
const EXPONENTIAL_TERMS: usize = 80;
const RESIDUE_TOLERANCE: f64 = 1e-12;

/// Multiplicity of angular momentum l in d dimensions.
pub fn degeneracy(d: usize, l: usize) -> f64 {
    if l == 0 || d == 1 {
        return 1.0;
    }
    let lf = l as f64;
    match d {
        2 => 2.0,
        3 => 2.0 * lf + 1.0,
        4 => (lf + 1.0) * (lf + 1.0),
        _ => {
            let df = d as f64;
            let log_deg = (2.0 * lf + df - 2.0).ln()
                - ln_beta(lf + 1.0, df - 3.0)
                - ((df - 3.0) * (df - 2.0)).ln();
            log_deg.exp()
        }
    }
}

/// Σ_{l≥2} deg(d, l) l̄^{-k}, continued analytically in k where it diverges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DegeneracySum {
    Finite(f64),
    /// Divergent in dimensional regularisation: residue/ε + finite.
    Pole { residue: f64, finite: f64 },
}

impl DegeneracySum {
    pub fn finite_part(&self) -> f64 {
        match *self {
            Self::Finite(value) => value,
            Self::Pole { finite, .. } => finite,
        }
    }

    pub fn residue(&self) -> f64 {
        match *self {
            Self::Finite(_) => 0.0,
            Self::Pole { residue, .. } => residue,
        }
    }
}

// Power series in t² truncated at SERIES_TERMS, coefficient j of t^{2j}.
type Series = [f64; SERIES_TERMS];

fn series_mul(a: &Series, b: &Series) -> Series {
    let mut out = [0.0; SERIES_TERMS];
    for k in 0..SERIES_TERMS {
        out[k] = (0..=k).map(|i| a[i] * b[k - i]).sum();
    }
    out
}

/// ln of a series with a[0] = 1.
fn series_log(a: &Series) -> Series {
    let mut out = [0.0; SERIES_TERMS];
    for k in 1..SERIES_TERMS {
        let mut s = k as f64 * a[k];
        for i in 1..k {
            s -= i as f64 * out[i] * a[k - i];
        }
        out[k] = s / k as f64;
    }
    out
}

/// exp of a series with a[0] = 0.
fn series_exp(a: &Series) -> Series {
    let mut out = [0.0; SERIES_TERMS];
    out[0] = 1.0;
    for k in 1..SERIES_TERMS {
        out[k] = (1..=k).map(|i| i as f64 * a[i] * out[k - i]).sum::<f64>() / k as f64;
    }
    out
}

/// cosh(t/2) and sinh(t/2)/(t/2) as series in t².
fn half_angle_series() -> (Series, Series) {
    let mut cosh = [0.0; SERIES_TERMS];
    let mut sinhc = [0.0; SERIES_TERMS];
    cosh[0] = 1.0;
    sinhc[0] = 1.0;
    for k in 1..SERIES_TERMS {
        let kf = k as f64;
        cosh[k] = cosh[k - 1] / (4.0 * (2.0 * kf - 1.0) * 2.0 * kf);
        sinhc[k] = sinhc[k - 1] / (4.0 * 2.0 * kf * (2.0 * kf + 1.0));
    }
    (cosh, sinhc)
}

/// ∫_0^1 t^{k−1} e^{−λt} dt
fn lower_incomplete(lambda: f64, k: usize) -> f64 {
    let mut term = 1.0;
    let mut total = 0.0;
    for m in 0..EXPONENTIAL_TERMS {
        total += term / (k + m) as f64;
        term *= -lambda / (m + 1) as f64;
    }
    total
}

/// Σ_{l≥2} deg(d, l) ∫_1^∞ t^{k−1} e^{−l̄t} dt, always convergent.
fn upper_sum(d: usize, k: usize) -> f64 {
    let log_k_fact = ln_factorial((k - 1) as u64);
    let mut total = 0.0;
    let mut l = 2;
    loop {
        let lbar = l as f64 + 0.5 * d as f64 - 1.0;
        let mut inner = 0.0;
        let mut power = lbar.powi(-(k as i32));
        for m in 0..k {
            inner += power / factorial(m as u64);
            power *= lbar;
        }
        let term = degeneracy(d, l) * (log_k_fact - lbar).exp() * inner;
        total += term;
        if l > 20 && term.abs() < 1e-18 * total.abs() {
            break;
        }
        l += 1;
    }
    total
}

/// Mellin representation: Γ(k) Σ_l deg l̄^{-k} = ∫_0^∞ t^{k−1} Σ_l deg e^{−l̄t} dt,
/// with Σ_{l≥0} deg e^{−l̄t} = 2cosh(t/2) (2 sinh(t/2))^{1−d}. Below t = 1 the
/// generating function is expanded in t; a pole appears where a term of the
/// expansion gives ∫_0^1 t^{−1} dt, and its finite part in d − 2ε dimensions
/// carries the ε-derivative of the coefficient.
pub fn degeneracy_sum(d: usize, k: usize) -> DegeneracySum {
    let (cosh, sinhc) = half_angle_series();
    // s(t) = −ln(sinh(t/2)/(t/2)); the weight is t^{1−d} g(t).
    let mut s = series_log(&sinhc);
    for v in &mut s {
        *v = -*v;
    }
    let mut scaled = s;
    for v in &mut scaled {
        *v *= d as f64 - 1.0;
    }
    let mut g = series_mul(&cosh, &series_exp(&scaled));
    for v in &mut g {
        *v *= 2.0;
    }
    let dg = series_mul(&g, &s);

    let mut total = 0.0;
    let mut residue = 0.0;
    for j in 0..SERIES_TERMS {
        let denominator = k as i64 - d as i64 + 2 * j as i64 + 1;
        if denominator == 0 {
            residue = 0.5 * g[j];
            total -= dg[j];
        } else {
            total += g[j] / denominator as f64;
        }
    }
    let lbar0 = 0.5 * d as f64 - 1.0;
    let lbar1 = 0.5 * d as f64;
    total -= lower_incomplete(lbar0, k) + degeneracy(d, 1) * lower_incomplete(lbar1, k);
    total += upper_sum(d, k);

    let norm = factorial((k - 1) as u64);
    if residue.abs() / norm < RESIDUE_TOLERANCE {
        DegeneracySum::Finite(total / norm)
    } else {
        DegeneracySum::Pole {
            residue: residue / norm,
            finite: total / norm,
        }
    }
}
