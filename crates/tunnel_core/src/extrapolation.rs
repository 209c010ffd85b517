//! Sequence acceleration for the sum over channels.
//!
//! All transforms act on series coefficients a_n through the partial sums
//! A_n = a_0 + … + a_n and return an [`Estimate`] of the limit.

use crate::numerics::compensated_sum;
use crate::types::{Estimate, ExtrapolationBranch};
use anyhow::{bail, Result};
use log::{debug, warn};
use nalgebra::{DMatrix, DVector, SVD};
use statrs::function::factorial::factorial;

/// Largest growth of the epsilon-table error before the algorithm stops.
const MAX_RATIO: f64 = 3.0;
const MAX_FIT_ORDER: usize = 6;
/// Fits whose scaled design matrix is worse conditioned than this are
/// treated as failed.
const FIT_CONDITION_LIMIT: f64 = 1e-13;

fn trim_trailing_zeros(terms: &[f64]) -> &[f64] {
    let end = terms.iter().rposition(|&a| a != 0.0).map_or(0, |i| i + 1);
    &terms[..end]
}

/// A_n = Σ_{k≤n} a_k, each summed with compensation.
pub fn partial_sums(terms: &[f64]) -> Vec<f64> {
    (0..terms.len())
        .map(|n| compensated_sum(terms[..=n].iter().copied()))
        .collect()
}

fn initial_error(terms: &[f64], sums: &[f64]) -> f64 {
    let n = sums.len();
    (sums[n - 1] - sums[n / 2]).abs().max(terms[n - 1].abs())
}

/// Wynn's epsilon algorithm. With `truncate`, stops as soon as cancellation
/// (or the channel error in `sigma`) would dominate the running error.
pub fn epsilon_extrapolation(terms: &[f64], sigma: Option<&[f64]>, truncate: bool) -> Estimate {
    let terms = trim_trailing_zeros(terms);
    let n = terms.len();
    if n == 0 {
        return Estimate::new(0.0, 0.0);
    }
    let sums = partial_sums(terms);
    let mut previous = vec![0.0; n];
    let mut current = sums.clone();
    let mut result = sums[n - 1];
    let mut error = initial_error(terms, &sums);
    let k_max = if n % 2 == 1 { n } else { n - 1 };
    for k in 1..k_max {
        let mut next = vec![0.0; n - k];
        for j in 0..n - k {
            let diff = current[j + 1] - current[j];
            if diff == 0.0 {
                return Estimate::new(result, error);
            }
            let max_abs = current[j + 1].abs().max(current[j].abs());
            let float_error = 2e-16 * result.abs() * (0.5 * max_abs / diff.abs());
            let step_error = match sigma {
                Some(sigma) => float_error.max(sigma[j]),
                None => float_error,
            };
            if truncate && result != 0.0 && step_error > error {
                return Estimate::new(result, error);
            }
            next[j] = previous[j + 1] + 1.0 / diff;
        }
        previous = current;
        current = next;
        if k % 2 == 0 {
            let last = current[current.len() - 1];
            let new_error = (last - result).abs();
            if new_error == 0.0 || new_error > MAX_RATIO * error {
                break;
            }
            error = (error * new_error).sqrt();
            result = last;
        }
    }
    Estimate::new(result, error)
}

/// One Shanks transform; two shorter than its input.
fn shanks_transform(sums: &[f64]) -> Vec<f64> {
    sums.windows(3)
        .map(|w| (w[2] * w[0] - w[1] * w[1]) / (w[2] + w[0] - 2.0 * w[1]))
        .collect()
}

/// Iterated Shanks transform, at most `order` times. Its relative accuracy
/// bottoms out near 1e-8.
pub fn shanks_extrapolation(terms: &[f64], order: usize, truncate: bool) -> Estimate {
    let terms = trim_trailing_zeros(terms);
    let n = terms.len();
    if n == 0 {
        return Estimate::new(0.0, 0.0);
    }
    let mut sums = partial_sums(terms);
    let mut result = sums[n - 1];
    let mut error = initial_error(terms, &sums);
    for _ in 0..order.min((n - 1) / 2) {
        let m = sums.len();
        let denominator = sums[m - 1] + sums[m - 3] - 2.0 * sums[m - 2];
        if truncate && denominator.abs() < 1e-8 * sums[m - 1].abs() {
            break;
        }
        sums = shanks_transform(&sums);
        let last = sums[sums.len() - 1];
        error = (error * (result - last).abs()).sqrt().max(1e-8 * last.abs());
        result = last;
    }
    Estimate::new(result, error)
}

/// Fixed-order Richardson extrapolation from the last `order + 1` partial
/// sums: (value, floating point error, truncation error).
fn richardson_static(terms: &[f64], order: usize) -> Option<(f64, f64, f64)> {
    let n_max = terms.len();
    if n_max < order + 1 {
        return None;
    }
    let n_min = n_max - order - 1;
    let mut sums = vec![0.0; order + 1];
    sums[0] = compensated_sum(terms[..=n_min].iter().copied());
    for k in 1..=order {
        sums[k] = sums[k - 1] + terms[n_min + k];
    }
    let mut result = 0.0;
    let mut max_factor = 1.0_f64;
    for (k, &sum) in sums.iter().enumerate() {
        let sign = if (order + k) % 2 == 0 { 1.0 } else { -1.0 };
        let factor = sign * ((n_min + k) as f64).powi(order as i32)
            / (factorial(k as u64) * factorial((order - k) as u64));
        max_factor = max_factor.max(factor.abs());
        result += factor * sum;
    }
    let float_error = max_factor * (order + 1) as f64 * result.abs() / 1e16;
    let truncation_error = result.abs() / (n_max as f64).powi(order as i32 + 1);
    Some((result, float_error, truncation_error))
}

/// Richardson extrapolation, raising the order up to `max_order` while each
/// step keeps improving on the last.
pub fn richardson_extrapolation(terms: &[f64], max_order: usize) -> Result<Estimate> {
    let terms = trim_trailing_zeros(terms);
    let Some((mut previous, previous_error, previous_truncation)) = richardson_static(terms, 0)
    else {
        bail!("Richardson extrapolation needs at least one nonzero term.");
    };
    let Some((mut result, mut error, _)) = richardson_static(terms, 1) else {
        return Ok(Estimate::new(previous, previous_error.max(previous_truncation)));
    };
    if (result - previous).abs() < error {
        return Ok(Estimate::new(previous, previous_error.max(previous_truncation)));
    }
    let mut last_truncation = 0.0;
    for order in 2..=max_order {
        let Some((next, next_error, next_truncation)) = richardson_static(terms, order) else {
            break;
        };
        last_truncation = next_truncation;
        if next_error < (result - previous).abs() / 5.0
            && (next - result).abs() < (result - previous).abs()
        {
            previous = result;
            result = next;
            error = next_error;
        } else {
            break;
        }
    }
    Ok(Estimate::new(
        result,
        error.max(last_truncation).max((result - previous).abs()),
    ))
}

struct PolynomialFit {
    constant: f64,
    variance: f64,
    chi_sq_reduced: f64,
}

/// Weighted least squares for y ≈ c_0 + Σ_{i≥1} c_i x^{drop_orders+i}, solved
/// by SVD on the column-scaled design matrix.
fn weighted_fit(
    xs: &[f64],
    ys: &[f64],
    sigma: &[f64],
    order: usize,
    drop_orders: usize,
) -> Result<PolynomialFit> {
    let n = xs.len();
    let p = order + 1;
    let power = |i: usize| if i == 0 { 0 } else { (drop_orders + i) as i32 };
    let mut design = DMatrix::from_fn(n, p, |row, col| xs[row].powi(power(col)) / sigma[row]);
    let rhs = DVector::from_iterator(n, ys.iter().zip(sigma).map(|(y, s)| y / s));
    let mut scales = Vec::with_capacity(p);
    for mut column in design.column_iter_mut() {
        let norm = column.norm();
        if !(norm > 0.0) {
            bail!("Polynomial fit has an empty column.");
        }
        column /= norm;
        scales.push(norm);
    }
    let svd = SVD::new(design.clone(), true, true);
    let largest = svd.singular_values.max();
    let smallest = svd.singular_values.min();
    if !(smallest > FIT_CONDITION_LIMIT * largest) {
        bail!("Polynomial fit of order {} is numerically singular.", order);
    }
    let scaled = svd
        .solve(&rhs, 0.0)
        .map_err(|e| anyhow::anyhow!("Polynomial fit failed: {}", e))?;
    let v_t = svd
        .v_t
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("Polynomial fit is missing right singular vectors."))?;
    // cov = V Σ^{-2} Vᵀ in scaled coordinates.
    let variance_scaled: f64 = (0..p)
        .map(|k| v_t[(k, 0)] * v_t[(k, 0)] / (svd.singular_values[k] * svd.singular_values[k]))
        .sum();
    let residual = &design * &scaled - &rhs;
    let dof = n - p;
    if dof == 0 {
        bail!("Polynomial fit of order {} has no degrees of freedom.", order);
    }
    Ok(PolynomialFit {
        constant: scaled[0] / scales[0],
        variance: variance_scaled / (scales[0] * scales[0]),
        chi_sq_reduced: residual.norm_squared() / dof as f64,
    })
}

/// Fits the partial sums as a polynomial in x = 1/(n+1) and returns the
/// constant term. The order with the smallest reduced χ² is kept; the error
/// is the larger of the fitted standard deviation and the spread of the
/// constant between accepted orders. A singular fit at order 0 is an error.
pub fn fit_extrapolation(
    terms: &[f64],
    sigma: Option<&[f64]>,
    drop_orders: usize,
) -> Result<Estimate> {
    let terms = trim_trailing_zeros(terms);
    let n = terms.len();
    if n < 2 {
        bail!("Polynomial fit needs at least two nonzero terms.");
    }
    let sums = partial_sums(terms);
    let xs: Vec<f64> = (0..n).map(|i| 1.0 / (i + 1) as f64).collect();
    let weights: Vec<f64> = match sigma {
        Some(sigma) => {
            let squares: Vec<f64> = sigma[..n].iter().map(|s| s * s).collect();
            let errors: Vec<f64> = partial_sums(&squares).iter().map(|v| v.sqrt()).collect();
            let floor = errors
                .iter()
                .copied()
                .filter(|&e| e > 0.0)
                .fold(f64::INFINITY, f64::min);
            let floor = if floor.is_finite() { floor } else { 1.0 };
            errors.iter().map(|&e| if e > 0.0 { e } else { floor }).collect()
        }
        None => vec![1.0; n],
    };

    let max_order = MAX_FIT_ORDER.min(n - 2);
    let mut best = weighted_fit(&xs, &sums, &weights, 0, drop_orders)?;
    let mut diff = best.constant.abs();
    let mut crude = true;
    for order in 1..=max_order {
        let fit = match weighted_fit(&xs, &sums, &weights, order, drop_orders) {
            Ok(fit) => fit,
            Err(err) => {
                debug!("polynomial fit stops at order {order}: {err}");
                break;
            }
        };
        if fit.chi_sq_reduced < best.chi_sq_reduced {
            let change = (best.constant - fit.constant).abs();
            diff = if crude { change } else { (diff * change).sqrt() };
            crude = false;
            best = fit;
        }
    }
    let error = if sigma.is_some() {
        best.variance.sqrt().max(diff)
    } else {
        diff
    };
    Ok(Estimate::new(best.constant, error))
}

/// Extrapolates the channel series both ways and keeps the branch with the
/// smaller error. The epsilon algorithm only sees channels well above their
/// own error.
pub fn extrapolate_channels(
    values: &[f64],
    errors: &[f64],
    dim: usize,
) -> (Estimate, ExtrapolationBranch) {
    let mut masked_values = Vec::with_capacity(values.len());
    let mut masked_errors = Vec::with_capacity(values.len());
    for (&v, &e) in values.iter().zip(errors) {
        if v.abs() > 10.0 * e {
            masked_values.push(v);
            masked_errors.push(e);
        }
    }
    if masked_values.is_empty() {
        masked_values = values.to_vec();
        masked_errors = errors.to_vec();
    }
    let epsilon = epsilon_extrapolation(&masked_values, Some(&masked_errors), true);

    let drop_orders = 8usize.saturating_sub(dim);
    let fit = match fit_extrapolation(values, Some(errors), drop_orders) {
        Ok(fit) if fit.value.is_finite() && fit.error.is_finite() => Some(fit),
        Ok(_) => None,
        Err(err) => {
            warn!("polynomial extrapolation unavailable: {err:#}");
            None
        }
    };
    match fit {
        Some(fit) if fit.error <= epsilon.error => {
            debug!("extrapolated by polynomial fit: {} ± {}", fit.value, fit.error);
            (fit, ExtrapolationBranch::PolynomialFit)
        }
        _ => {
            debug!("extrapolated by epsilon algorithm: {} ± {}", epsilon.value, epsilon.error);
            (epsilon, ExtrapolationBranch::Epsilon)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{LN_2, PI};

    fn geometric(n: usize) -> Vec<f64> {
        (0..n).map(|k| 0.5_f64.powi(k as i32 + 1)).collect()
    }

    #[test]
    fn partial_sums_of_geometric_series() {
        let sums = partial_sums(&geometric(5));
        assert_eq!(sums, vec![0.5, 0.75, 0.875, 0.9375, 0.96875]);
    }

    #[test]
    fn epsilon_recovers_closed_forms() {
        let estimate = epsilon_extrapolation(&geometric(15), None, true);
        assert!((estimate.value - 1.0).abs() <= estimate.error.max(1e-15));

        let alternating: Vec<f64> = (0..10)
            .map(|n| if n % 2 == 0 { 1.0 } else { -1.0 } / (n + 1) as f64)
            .collect();
        let estimate = epsilon_extrapolation(&alternating, None, true);
        assert!((estimate.value - LN_2).abs() < estimate.error);
        assert!(estimate.error < 1e-5);
    }

    #[test]
    fn epsilon_ignores_trailing_zeros() {
        let mut terms = geometric(9);
        let reference = epsilon_extrapolation(&terms, None, true);
        terms.extend([0.0, 0.0]);
        assert_eq!(epsilon_extrapolation(&terms, None, true), reference);
    }

    #[test]
    fn shanks_sums_geometric_series() {
        let estimate = shanks_extrapolation(&geometric(12), 6, true);
        assert!((estimate.value - 1.0).abs() < 1e-12);
        assert!(estimate.error > 0.0);
    }

    #[test]
    fn richardson_for_inverse_squares() {
        let terms: Vec<f64> = (0..10).map(|n| 1.0 / ((n + 1) * (n + 1)) as f64).collect();
        let estimate = richardson_extrapolation(&terms, 6).expect("richardson");
        assert!((estimate.value - PI * PI / 6.0).abs() < estimate.error);
        assert!(estimate.error < 1e-4);
    }

    #[test]
    fn fit_recovers_polynomial_limit() {
        // A_i = 2 − x + x²/2 with x = 1/(i+1)
        let sums: Vec<f64> = (0..25)
            .map(|i| {
                let x = 1.0 / (i + 1) as f64;
                2.0 - x + 0.5 * x * x
            })
            .collect();
        let mut terms = vec![sums[0]];
        terms.extend(sums.windows(2).map(|w| w[1] - w[0]));
        let sigma = vec![1e-10; terms.len()];
        let estimate = fit_extrapolation(&terms, Some(&sigma), 0).expect("fit");
        assert!((estimate.value - 2.0).abs() <= estimate.error + 1e-9);
        assert!((estimate.value - 2.0).abs() < 1e-6);
    }

    #[test]
    fn fit_recovers_geometric_limit() {
        let estimate = fit_extrapolation(&geometric(15), None, 0).expect("fit");
        assert!((estimate.value - 1.0).abs() <= estimate.error);
        assert!(estimate.error < 0.05);
    }

    #[test]
    fn fit_needs_two_terms() {
        assert!(fit_extrapolation(&[1.0], None, 0).is_err());
    }

    #[test]
    fn best_of_two_with_dropped_orders() {
        // A_i = 3 − x⁵: only the constant and x⁵ survive for d = 4.
        let sums: Vec<f64> = (0..30).map(|i| 3.0 - (1.0 / (i + 1) as f64).powi(5)).collect();
        let mut terms = vec![sums[0]];
        terms.extend(sums.windows(2).map(|w| w[1] - w[0]));
        let errors = vec![1e-13; terms.len()];
        let (estimate, branch) = extrapolate_channels(&terms, &errors, 4);
        assert_ne!(branch, ExtrapolationBranch::None);
        assert!((estimate.value - 3.0).abs() <= estimate.error + 1e-9);
        assert!((estimate.value - 3.0).abs() < 1e-6);
    }
}
