//! Grid calculus shared by the sub-algorithms: finite-difference weights on
//! non-uniform grids, quadrature, interpolation and compensated summation.

use statrs::function::gamma::gamma;
use std::f64::consts::PI;

/// Finite-difference weights for derivatives 0..=max_order at `z`, using the
/// nodes `xs` (Fornberg's recursion). `weights[k][j]` multiplies f(xs[j]) in
/// the k-th derivative.
pub fn fornberg_weights(z: f64, xs: &[f64], max_order: usize) -> Vec<Vec<f64>> {
    let n = xs.len();
    let mut c = vec![vec![0.0; n]; max_order + 1];
    if n == 0 {
        return c;
    }
    let mut c1 = 1.0;
    let mut c4 = xs[0] - z;
    c[0][0] = 1.0;
    for i in 1..n {
        let mn = i.min(max_order);
        let mut c2 = 1.0;
        let c5 = c4;
        c4 = xs[i] - z;
        for j in 0..i {
            let c3 = xs[i] - xs[j];
            c2 *= c3;
            if j == i - 1 {
                for k in (1..=mn).rev() {
                    c[k][i] = c1 * (k as f64 * c[k - 1][i - 1] - c5 * c[k][i - 1]) / c2;
                }
                c[0][i] = -c1 * c5 * c[0][i - 1] / c2;
            }
            for k in (1..=mn).rev() {
                c[k][j] = (c4 * c[k][j] - k as f64 * c[k - 1][j]) / c3;
            }
            c[0][j] = c4 * c[0][j] / c3;
        }
        c1 = c2;
    }
    c
}

/// Derivatives of orders 1..=max_order of sampled data, 5-point stencils
/// (centred in the interior, shifted at the ends). Returns one vector per
/// order, starting with order 1.
pub fn grid_derivatives(xs: &[f64], ys: &[f64], max_order: usize) -> Vec<Vec<f64>> {
    let n = xs.len();
    let mut out = vec![vec![0.0; n]; max_order];
    if n < 2 {
        return out;
    }
    let width = n.min(5);
    for i in 0..n {
        let start = i.saturating_sub(width / 2).min(n - width);
        let nodes = &xs[start..start + width];
        let weights = fornberg_weights(xs[i], nodes, max_order);
        for (order, slot) in out.iter_mut().enumerate() {
            slot[i] = weights[order + 1]
                .iter()
                .zip(&ys[start..start + width])
                .map(|(w, y)| w * y)
                .sum();
        }
    }
    out
}

/// First derivative at xs[0] from the leading samples.
pub fn leading_derivative(xs: &[f64], ys: &[f64]) -> f64 {
    let width = xs.len().min(ys.len()).min(5);
    if width < 2 {
        return 0.0;
    }
    let weights = fornberg_weights(xs[0], &xs[..width], 1);
    weights[1].iter().zip(&ys[..width]).map(|(w, y)| w * y).sum()
}

pub fn trapezoid(xs: &[f64], ys: &[f64]) -> f64 {
    xs.windows(2)
        .zip(ys.windows(2))
        .map(|(x, y)| 0.5 * (x[1] - x[0]) * (y[0] + y[1]))
        .sum()
}

/// Composite Simpson rule on a non-uniform grid. An odd number of intervals
/// closes with the three-point correction on the final interval.
pub fn simpson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len();
    if n < 3 {
        return trapezoid(xs, ys);
    }
    let intervals = n - 1;
    let paired = intervals - intervals % 2;
    let mut total = 0.0;
    let mut i = 0;
    while i + 2 <= paired {
        let h0 = xs[i + 1] - xs[i];
        let h1 = xs[i + 2] - xs[i + 1];
        let hs = h0 + h1;
        total += hs / 6.0
            * ((2.0 - h1 / h0) * ys[i]
                + hs * hs / (h0 * h1) * ys[i + 1]
                + (2.0 - h0 / h1) * ys[i + 2]);
        i += 2;
    }
    if intervals % 2 == 1 {
        let h0 = xs[n - 2] - xs[n - 3];
        let h1 = xs[n - 1] - xs[n - 2];
        let alpha = (2.0 * h1 * h1 + 3.0 * h0 * h1) / (6.0 * (h0 + h1));
        let beta = (h1 * h1 + 3.0 * h0 * h1) / (6.0 * h0);
        let eta = h1 * h1 * h1 / (6.0 * h0 * (h0 + h1));
        total += alpha * ys[n - 1] + beta * ys[n - 2] - eta * ys[n - 3];
    }
    total
}

/// Simpson value together with the Simpson-trapezoid discrepancy.
pub fn integrate_with_error(xs: &[f64], ys: &[f64]) -> (f64, f64) {
    let value = simpson(xs, ys);
    (value, (value - trapezoid(xs, ys)).abs())
}

/// Neumaier compensated summation.
pub fn compensated_sum(values: impl IntoIterator<Item = f64>) -> f64 {
    let mut sum = 0.0;
    let mut compensation = 0.0;
    for v in values {
        let t = sum + v;
        if sum.abs() >= v.abs() {
            compensation += (sum - t) + v;
        } else {
            compensation += (v - t) + sum;
        }
        sum = t;
    }
    sum + compensation
}

/// Cubic Hermite interpolation on [x0, x1]. Returns value and derivative.
pub fn hermite(x0: f64, x1: f64, y0: f64, y1: f64, d0: f64, d1: f64, x: f64) -> (f64, f64) {
    let h = x1 - x0;
    let t = (x - x0) / h;
    let t2 = t * t;
    let t3 = t2 * t;
    let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
    let h10 = t3 - 2.0 * t2 + t;
    let h01 = -2.0 * t3 + 3.0 * t2;
    let h11 = t3 - t2;
    let value = h00 * y0 + h10 * h * d0 + h01 * y1 + h11 * h * d1;
    let dh00 = (6.0 * t2 - 6.0 * t) / h;
    let dh10 = 3.0 * t2 - 4.0 * t + 1.0;
    let dh01 = (-6.0 * t2 + 6.0 * t) / h;
    let dh11 = 3.0 * t2 - 2.0 * t;
    let deriv = dh00 * y0 + dh10 * d0 + dh01 * y1 + dh11 * d1;
    (value, deriv)
}

/// Index i with xs[i] <= x < xs[i + 1], clamped to the valid interval range.
pub fn bracket(xs: &[f64], x: f64) -> usize {
    let upper = xs.partition_point(|&v| v <= x);
    upper.saturating_sub(1).min(xs.len().saturating_sub(2))
}

/// H_n = 1 + 1/2 + ... + 1/n.
pub fn harmonic_number(n: usize) -> f64 {
    (1..=n).map(|k| 1.0 / k as f64).sum()
}

/// Area of the unit sphere S^{d-1} in d dimensions.
pub fn sphere_area(d: f64) -> f64 {
    2.0 * PI.powf(0.5 * d) / gamma(0.5 * d)
}
