//! The radial background field a determinant is computed around.

use crate::numerics::{bracket, hermite};
use crate::traits::Potential;
use anyhow::{bail, Result};
use std::fmt;
use std::sync::Arc;

/// V(φ) = Σ_k c_k φ^k
#[derive(Debug, Clone, PartialEq)]
pub struct PolynomialPotential {
    coefficients: Vec<f64>,
}

impl PolynomialPotential {
    pub fn new(coefficients: Vec<f64>) -> Self {
        Self { coefficients }
    }

    fn horner(&self, phi: f64, order: usize) -> f64 {
        // Coefficients of the order-th derivative, evaluated from the top.
        let mut acc = 0.0;
        for (k, &c) in self.coefficients.iter().enumerate().skip(order).rev() {
            let falling: f64 = (0..order).map(|j| (k - j) as f64).product();
            acc = acc * phi + c * falling;
        }
        acc
    }
}

impl Potential for PolynomialPotential {
    fn value(&self, phi: f64) -> f64 {
        self.horner(phi, 0)
    }

    fn first_derivative(&self, phi: f64) -> f64 {
        self.horner(phi, 1)
    }

    fn second_derivative(&self, phi: f64) -> f64 {
        self.horner(phi, 2)
    }
}

pub const MIN_SAMPLES: usize = 10;

/// Read-only radial profile φ(r) with its derivative, the false vacuum it
/// decays into and the potential it solves.
#[derive(Clone)]
pub struct BackgroundProfile {
    radii: Vec<f64>,
    phi: Vec<f64>,
    dphi: Vec<f64>,
    dim: usize,
    phi_false: f64,
    potential: Arc<dyn Potential>,
    renormalisation_scale: Option<f64>,
    massless_false_vacuum: bool,
    scaleless: bool,
}

impl fmt::Debug for BackgroundProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundProfile")
            .field("samples", &self.radii.len())
            .field("dim", &self.dim)
            .field("phi_false", &self.phi_false)
            .field("renormalisation_scale", &self.renormalisation_scale)
            .field("massless_false_vacuum", &self.massless_false_vacuum)
            .field("scaleless", &self.scaleless)
            .finish()
    }
}

impl BackgroundProfile {
    pub fn new(
        radii: Vec<f64>,
        phi: Vec<f64>,
        dphi: Vec<f64>,
        dim: usize,
        phi_false: f64,
        potential: Arc<dyn Potential>,
    ) -> Result<Self> {
        if dim == 0 {
            bail!("dim must be at least 1.");
        }
        if radii.len() != phi.len() || radii.len() != dphi.len() {
            bail!(
                "Profile arrays must have equal lengths, got R: {}, Phi: {}, dPhi: {}.",
                radii.len(),
                phi.len(),
                dphi.len()
            );
        }
        if radii.len() < MIN_SAMPLES {
            bail!(
                "Profile needs at least {} samples, got {}.",
                MIN_SAMPLES,
                radii.len()
            );
        }
        if radii[0] < 0.0 {
            bail!("Radii must be non-negative.");
        }
        if radii.windows(2).any(|w| !(w[1] > w[0])) {
            bail!("Radii must be strictly increasing.");
        }
        let finite = |v: &[f64]| v.iter().all(|x| x.is_finite());
        if !finite(&radii) || !finite(&phi) || !finite(&dphi) || !phi_false.is_finite() {
            bail!("Profile contains non-finite values.");
        }
        if phi[0] == phi_false {
            bail!("Profile must differ from the false vacuum at the origin.");
        }
        Ok(Self {
            radii,
            phi,
            dphi,
            dim,
            phi_false,
            potential,
            renormalisation_scale: None,
            massless_false_vacuum: false,
            scaleless: false,
        })
    }

    pub fn with_renormalisation_scale(mut self, mu: f64) -> Result<Self> {
        if !(mu > 0.0) {
            bail!("renormalisation scale must be positive.");
        }
        self.renormalisation_scale = Some(mu);
        Ok(self)
    }

    pub fn with_massless_false_vacuum(mut self, massless: bool) -> Self {
        self.massless_false_vacuum = massless;
        self
    }

    /// Marks a background with an unbroken dilatation symmetry; the Higgs
    /// l = 0 mode is then a zero mode as well.
    pub fn with_scaleless(mut self, scaleless: bool) -> Self {
        self.scaleless = scaleless;
        self
    }

    pub fn radii(&self) -> &[f64] {
        &self.radii
    }

    pub fn phi(&self) -> &[f64] {
        &self.phi
    }

    pub fn dphi(&self) -> &[f64] {
        &self.dphi
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.radii.len()
    }

    pub fn is_empty(&self) -> bool {
        self.radii.is_empty()
    }

    pub fn phi_false(&self) -> f64 {
        self.phi_false
    }

    pub fn potential(&self) -> &dyn Potential {
        self.potential.as_ref()
    }

    pub fn shared_potential(&self) -> Arc<dyn Potential> {
        Arc::clone(&self.potential)
    }

    pub fn r_max(&self) -> f64 {
        self.radii[self.radii.len() - 1]
    }

    pub fn is_massless(&self) -> bool {
        self.massless_false_vacuum
    }

    pub fn is_scaleless(&self) -> bool {
        self.scaleless
    }

    /// V''(φ_F), the squared mass of the nucleating field in the false vacuum.
    pub fn false_vacuum_mass_sq(&self) -> f64 {
        if self.massless_false_vacuum {
            0.0
        } else {
            self.potential.second_derivative(self.phi_false)
        }
    }

    /// First radius where the field has covered half its excursion.
    pub fn r_mid(&self) -> f64 {
        let half = 0.5 * (self.phi[0] - self.phi_false).abs();
        self.radii
            .iter()
            .zip(&self.phi)
            .find(|(_, &p)| (p - self.phi_false).abs() <= half)
            .map(|(&r, _)| r)
            .unwrap_or_else(|| self.r_max())
    }

    /// The MS-bar scale: explicit if set, else the false-vacuum mass, else
    /// the inverse bubble radius.
    pub fn renormalisation_scale(&self) -> f64 {
        if let Some(mu) = self.renormalisation_scale {
            return mu;
        }
        let m2 = self.false_vacuum_mass_sq();
        if m2 > 0.0 {
            m2.sqrt()
        } else {
            1.0 / self.r_mid()
        }
    }

    /// φ and φ' at r by cubic Hermite interpolation, held at the boundary
    /// values outside the sampled range.
    pub fn interpolate(&self, r: f64) -> (f64, f64) {
        if r <= self.radii[0] {
            return (self.phi[0], self.dphi[0]);
        }
        let n = self.radii.len();
        if r >= self.radii[n - 1] {
            return (self.phi[n - 1], self.dphi[n - 1]);
        }
        let i = bracket(&self.radii, r);
        hermite(
            self.radii[i],
            self.radii[i + 1],
            self.phi[i],
            self.phi[i + 1],
            self.dphi[i],
            self.dphi[i + 1],
            r,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{BackgroundProfile, PolynomialPotential};
    use crate::test_support::{assert_err_contains, exact_d1_profile};
    use crate::traits::Potential;
    use std::sync::Arc;

    #[test]
    fn polynomial_potential_derivatives() {
        let v = PolynomialPotential::new(vec![0.0, 0.0, 0.5, -0.5]);
        assert!((v.value(2.0) - (2.0 - 4.0)).abs() < 1e-14);
        assert!((v.first_derivative(2.0) - (2.0 - 6.0)).abs() < 1e-14);
        assert!((v.second_derivative(2.0) - (1.0 - 6.0)).abs() < 1e-14);
    }

    #[test]
    fn profile_validation() {
        let v = Arc::new(PolynomialPotential::new(vec![0.0, 0.0, 0.5]));
        let radii: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let phi = vec![1.0; 20];
        assert_err_contains(
            BackgroundProfile::new(radii.clone(), phi.clone(), vec![0.0; 19], 3, 0.0, v.clone()),
            "equal lengths",
        );
        let mut bad = radii.clone();
        bad[5] = bad[4];
        assert_err_contains(
            BackgroundProfile::new(bad, phi.clone(), vec![0.0; 20], 3, 0.0, v.clone()),
            "strictly increasing",
        );
        assert_err_contains(
            BackgroundProfile::new(radii[..5].to_vec(), phi[..5].to_vec(), vec![0.0; 5], 3, 0.0, v),
            "at least 10 samples",
        );
    }

    #[test]
    fn derived_scales_of_exact_bounce() {
        let profile = exact_d1_profile(400, 20.0);
        // sech²(r/2) = 1/2 at r = 2 acosh(√2)
        let expected = 2.0 * (2.0_f64.sqrt()).acosh();
        assert!((profile.r_mid() - expected).abs() < 0.06);
        assert!((profile.renormalisation_scale() - 1.0).abs() < 1e-14);
        let (phi, dphi) = profile.interpolate(1.234);
        let s = 1.0 / (0.617_f64).cosh();
        assert!((phi - s * s).abs() < 1e-7);
        assert!((dphi + s * s * (0.617_f64).tanh()).abs() < 1e-6);
    }
}
