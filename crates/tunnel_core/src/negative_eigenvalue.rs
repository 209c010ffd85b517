//! The negative eigenvalue of the bubble's fluctuation operator, needed for
//! the thermal prefactor.
//!
//! −u'' − (d−1)/r u' + V''(φ(r)) u is discretised with 4th-order stencils on
//! a uniform grid. The origin is an even reflection and R_max is closed by
//! either boundary condition; the continuum limit follows from Richardson
//! extrapolation in N.

use crate::error::DeterminantError;
use crate::profile::BackgroundProfile;
use crate::types::Estimate;
use anyhow::{bail, Context, Result};
use log::debug;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CooMatrix, CsrMatrix};

const SECOND_DERIVATIVE: [f64; 5] = [-1.0 / 12.0, 16.0 / 12.0, -30.0 / 12.0, 16.0 / 12.0, -1.0 / 12.0];
const FIRST_DERIVATIVE: [f64; 5] = [1.0 / 12.0, -8.0 / 12.0, 0.0, 8.0 / 12.0, -1.0 / 12.0];
const HALF_WIDTH: usize = 2;

const COARSE_INTERVALS: usize = 64;
const MAX_INTERVALS: usize = 2048;
const MAX_ITERATIONS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryCondition {
    /// u'(R_max) = 0
    Neumann,
    /// u(R_max) = 0
    Dirichlet,
}

/// Maps a stencil column onto the unknowns, folding ghost points by
/// reflection. Returns None for the eliminated Dirichlet boundary value.
fn fold_column(j: i64, intervals: usize, bc: BoundaryCondition) -> Option<(usize, f64)> {
    let n = intervals as i64;
    let mut col = j.abs();
    let mut sign = 1.0;
    if col > n {
        col = 2 * n - col;
        if bc == BoundaryCondition::Dirichlet {
            sign = -1.0;
        }
    }
    if bc == BoundaryCondition::Dirichlet && col == n {
        return None;
    }
    Some((col as usize, sign))
}

pub fn assemble_operator(
    profile: &BackgroundProfile,
    intervals: usize,
    bc: BoundaryCondition,
) -> CsrMatrix<f64> {
    let d = profile.dim() as f64;
    let h = profile.r_max() / intervals as f64;
    let size = match bc {
        BoundaryCondition::Neumann => intervals + 1,
        BoundaryCondition::Dirichlet => intervals,
    };
    let potential = profile.potential();
    let mut coo = CooMatrix::new(size, size);
    for i in 0..size {
        let r = i as f64 * h;
        for s in 0..5 {
            // At r = 0, u'/r → u'' so the radial Laplacian becomes d u''.
            let value = if i == 0 {
                -d * SECOND_DERIVATIVE[s] / (h * h)
            } else {
                -SECOND_DERIVATIVE[s] / (h * h) - (d - 1.0) / r * FIRST_DERIVATIVE[s] / h
            };
            let j = i as i64 + s as i64 - HALF_WIDTH as i64;
            if let Some((col, sign)) = fold_column(j, intervals, bc) {
                coo.push(i, col, sign * value);
            }
        }
        let (phi, _) = profile.interpolate(r);
        coo.push(i, i, potential.second_derivative(phi));
    }
    CsrMatrix::from(&coo)
}

/// LU factors of a pentadiagonal matrix minus a shift, without pivoting.
struct BandedLu {
    rows: Vec<[f64; 2 * HALF_WIDTH + 1]>,
}

impl BandedLu {
    fn factor(matrix: &CsrMatrix<f64>, shift: f64) -> Result<Self> {
        let n = matrix.nrows();
        let mut rows = vec![[0.0; 2 * HALF_WIDTH + 1]; n];
        for (i, row) in matrix.row_iter().enumerate() {
            for (&j, &v) in row.col_indices().iter().zip(row.values()) {
                let offset = j + HALF_WIDTH;
                if offset < i || offset - i > 2 * HALF_WIDTH {
                    bail!("Entry ({}, {}) lies outside the band.", i, j);
                }
                rows[i][offset - i] += v;
            }
            rows[i][HALF_WIDTH] -= shift;
        }
        for k in 0..n {
            let pivot = rows[k][HALF_WIDTH];
            if pivot.abs() < f64::MIN_POSITIVE {
                return Err(DeterminantError::numeric_failure(format!(
                    "zero pivot at row {k} of the shifted operator"
                )));
            }
            for i in k + 1..n.min(k + HALF_WIDTH + 1) {
                let factor = rows[i][k + HALF_WIDTH - i] / pivot;
                rows[i][k + HALF_WIDTH - i] = factor;
                for j in k + 1..n.min(k + HALF_WIDTH + 1) {
                    let upper = rows[k][j + HALF_WIDTH - k];
                    rows[i][j + HALF_WIDTH - i] -= factor * upper;
                }
            }
        }
        Ok(Self { rows })
    }

    fn solve(&self, rhs: &DVector<f64>) -> DVector<f64> {
        let n = self.rows.len();
        let mut x = rhs.clone();
        for i in 0..n {
            for j in i.saturating_sub(HALF_WIDTH)..i {
                x[i] -= self.rows[i][j + HALF_WIDTH - i] * x[j];
            }
        }
        for i in (0..n).rev() {
            for j in i + 1..n.min(i + HALF_WIDTH + 1) {
                x[i] -= self.rows[i][j + HALF_WIDTH - i] * x[j];
            }
            x[i] /= self.rows[i][HALF_WIDTH];
        }
        x
    }
}

fn apply(matrix: &CsrMatrix<f64>, v: &DVector<f64>) -> DVector<f64> {
    let mut out = DVector::zeros(matrix.nrows());
    for (i, row) in matrix.row_iter().enumerate() {
        out[i] = row
            .col_indices()
            .iter()
            .zip(row.values())
            .map(|(&j, &a)| a * v[j])
            .sum();
    }
    out
}

/// Lowest eigenvalue of the coarse operator from a dense decomposition.
fn coarse_seed(matrix: &CsrMatrix<f64>) -> Result<f64> {
    let dense: DMatrix<f64> = DMatrix::from(matrix);
    let eigenvalues = dense.complex_eigenvalues();
    eigenvalues
        .iter()
        .filter(|z| z.im.abs() <= 1e-8 * z.re.abs().max(1.0))
        .map(|z| z.re)
        .fold(None, |acc: Option<f64>, re| Some(acc.map_or(re, |a| a.min(re))))
        .ok_or_else(|| DeterminantError::numeric_failure("coarse operator has no real eigenvalue"))
}

/// Shifted inverse iteration towards the eigenvalue nearest `seed`.
fn inverse_iteration(matrix: &CsrMatrix<f64>, seed: f64) -> Result<f64> {
    let shift = seed - 1e-3 * seed.abs().max(1.0);
    let lu = BandedLu::factor(matrix, shift)?;
    let n = matrix.nrows();
    let mut v = DVector::from_element(n, 1.0 / (n as f64).sqrt());
    let mut estimate = f64::NAN;
    for iteration in 0..MAX_ITERATIONS {
        let w = lu.solve(&v);
        let next = shift + v.dot(&v) / v.dot(&w);
        let norm = w.norm();
        if !(norm > 0.0) || !next.is_finite() {
            return Err(DeterminantError::numeric_failure(
                "inverse iteration produced a non-finite iterate",
            ));
        }
        v = w / norm;
        if (next - estimate).abs() < 1e-14 * next.abs().max(1.0) {
            let residual = (apply(matrix, &v) - &v * next).norm();
            if residual > 1e-6 * (next.abs() + 1.0) {
                return Err(DeterminantError::numeric_failure(format!(
                    "eigenvector residual {residual:.3e} after {iteration} iterations"
                )));
            }
            return Ok(next);
        }
        estimate = next;
    }
    Err(DeterminantError::numeric_failure(format!(
        "inverse iteration did not converge in {MAX_ITERATIONS} iterations"
    )))
}

/// Continuum limit of the lowest eigenvalue for one boundary condition.
pub fn lowest_eigenvalue(
    profile: &BackgroundProfile,
    bc: BoundaryCondition,
    eig_tol: f64,
) -> Result<Estimate> {
    let coarse = assemble_operator(profile, COARSE_INTERVALS, bc);
    let mut seed = coarse_seed(&coarse)?;
    if !(seed < 0.0) {
        return Err(DeterminantError::numeric_failure(format!(
            "no negative eigenvalue, lowest is {seed:.6e}"
        )));
    }
    let mut previous = inverse_iteration(&coarse, seed)?;
    seed = previous;
    let mut extrapolated: Option<f64> = None;
    let mut best = Estimate::new(previous, previous.abs());
    let mut intervals = COARSE_INTERVALS;
    while intervals < MAX_INTERVALS {
        intervals *= 2;
        let matrix = assemble_operator(profile, intervals, bc);
        let current = inverse_iteration(&matrix, seed)
            .with_context(|| format!("{bc:?} operator with N = {intervals}"))?;
        let richardson = current + (current - previous) / 15.0;
        let error = match extrapolated {
            Some(last) => (richardson - last).abs(),
            None => (richardson - current).abs(),
        };
        debug!("{bc:?} eigenvalue at N = {intervals}: {current:.12e}, extrapolated {richardson:.12e}");
        best = Estimate::new(richardson, error);
        if extrapolated.is_some() && error < eig_tol * richardson.abs() {
            break;
        }
        extrapolated = Some(richardson);
        previous = current;
        seed = current;
    }
    Ok(best)
}

/// The negative eigenvalue as the mean over both boundary conditions. Their
/// discrepancy measures the finite box and enters the error.
pub fn find_negative_eigenvalue(profile: &BackgroundProfile, eig_tol: f64) -> Result<Estimate> {
    if !(eig_tol > 0.0) {
        bail!("eig_tol must be positive.");
    }
    let neumann = lowest_eigenvalue(profile, BoundaryCondition::Neumann, eig_tol)?;
    let dirichlet = lowest_eigenvalue(profile, BoundaryCondition::Dirichlet, eig_tol)?;
    let value = 0.5 * (neumann.value + dirichlet.value);
    let error = neumann.error.hypot(dirichlet.error) + 0.5 * (neumann.value - dirichlet.value).abs();
    Ok(Estimate::new(value, error))
}

#[cfg(test)]
mod tests {
    use super::{assemble_operator, find_negative_eigenvalue, lowest_eigenvalue, BoundaryCondition};
    use crate::test_support::{assert_err_contains, exact_d1_profile, gaussian_d4_profile};

    #[test]
    fn operator_is_pentadiagonal() {
        let profile = exact_d1_profile(400, 20.0);
        let neumann = assemble_operator(&profile, 64, BoundaryCondition::Neumann);
        let dirichlet = assemble_operator(&profile, 64, BoundaryCondition::Dirichlet);
        assert_eq!(neumann.nrows(), 65);
        assert_eq!(dirichlet.nrows(), 64);
        for (i, row) in neumann.row_iter().enumerate() {
            assert!(row.col_indices().iter().all(|&j| j + 2 >= i && j <= i + 2));
        }
    }

    #[test]
    fn exact_bounce_eigenvalue() {
        let profile = exact_d1_profile(400, 20.0);
        for bc in [BoundaryCondition::Neumann, BoundaryCondition::Dirichlet] {
            let estimate = lowest_eigenvalue(&profile, bc, 1e-8).expect("eigenvalue");
            assert!((estimate.value + 1.25).abs() < 1e-6, "{bc:?}: {}", estimate.value);
        }
        let combined = find_negative_eigenvalue(&profile, 1e-6).expect("eigenvalue");
        assert!((combined.value + 1.25).abs() < 1e-6);
        assert!(combined.error < 1e-4);
        assert!(combined.error >= 0.0);
    }

    #[test]
    fn operator_without_negative_mode() {
        // V'' = 1 around the Gaussian background: a positive spectrum.
        let profile = gaussian_d4_profile(200, 10.0);
        assert_err_contains(find_negative_eigenvalue(&profile, 1e-6), "no negative eigenvalue");
    }
}
