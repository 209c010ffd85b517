//! Analytic backgrounds shared by the unit tests.

use crate::profile::{BackgroundProfile, PolynomialPotential};
use crate::species::ParticleSpecies;
use std::sync::Arc;

pub fn assert_err_contains<T: std::fmt::Debug>(result: anyhow::Result<T>, needle: &str) {
    let err = result.expect_err("expected error");
    let message = format!("{err:#}");
    assert!(
        message.contains(needle),
        "expected error to contain \"{needle}\", got \"{message}\""
    );
}

fn uniform_radii(n: usize, r_max: f64) -> Vec<f64> {
    (0..=n).map(|i| r_max * i as f64 / n as f64).collect()
}

/// φ = sech²(r/2) solves φ'' = V'(φ) in d = 1 for V = φ²/2 − φ³/2.
/// Its fluctuation operator has the single negative eigenvalue −5/4, and
/// φ → 4 e^{-r}, so ln φ∞ = ln(4 sqrt(2/π)) with K_{-1/2}.
pub fn exact_d1_profile(n: usize, r_max: f64) -> BackgroundProfile {
    let radii = uniform_radii(n, r_max);
    let phi: Vec<f64> = radii.iter().map(|&r| (0.5 * r).cosh().powi(-2)).collect();
    let dphi: Vec<f64> = radii
        .iter()
        .zip(&phi)
        .map(|(&r, &p)| -p * (0.5 * r).tanh())
        .collect();
    let potential = Arc::new(PolynomialPotential::new(vec![0.0, 0.0, 0.5, -0.5]));
    BackgroundProfile::new(radii, phi, dphi, 1, 0.0, potential).expect("valid profile")
}

pub fn exact_d1_log_phi_infinity() -> f64 {
    (4.0 * (2.0 / std::f64::consts::PI).sqrt()).ln()
}

/// A smooth d = 4 background φ = exp(−r²/2) around a false vacuum of unit mass.
pub fn gaussian_d4_profile(n: usize, r_max: f64) -> BackgroundProfile {
    let radii = uniform_radii(n, r_max);
    let phi: Vec<f64> = radii.iter().map(|&r| (-0.5 * r * r).exp()).collect();
    let dphi: Vec<f64> = radii.iter().zip(&phi).map(|(&r, &p)| -r * p).collect();
    let potential = Arc::new(PolynomialPotential::new(vec![0.0, 0.0, 0.5]));
    BackgroundProfile::new(radii, phi, dphi, 4, 0.0, potential).expect("valid profile")
}

/// W(φ) = 1 − 5φ/2 + φ²/2: attractive at the centre, no negative modes.
pub fn gaussian_species() -> ParticleSpecies {
    ParticleSpecies::new(|phi| 1.0 - 2.5 * phi + 0.5 * phi * phi)
        .with_derivative(|phi| -2.5 + phi)
}

/// φ = 1/(1 + r²) solves the d = 4 equation for V = −2φ⁴ and decays as a
/// power, φ ≈ r^{-2}, so ln φ∞ = 0.
pub fn power_law_d4_profile(n: usize, r_max: f64) -> BackgroundProfile {
    let radii = uniform_radii(n, r_max);
    let phi: Vec<f64> = radii.iter().map(|&r| 1.0 / (1.0 + r * r)).collect();
    let dphi: Vec<f64> = radii
        .iter()
        .map(|&r| -2.0 * r / (1.0 + r * r).powi(2))
        .collect();
    let potential = Arc::new(PolynomialPotential::new(vec![0.0, 0.0, 0.0, 0.0, -2.0]));
    BackgroundProfile::new(radii, phi, dphi, 4, 0.0, potential)
        .expect("valid profile")
        .with_massless_false_vacuum(true)
}
