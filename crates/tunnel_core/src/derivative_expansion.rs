//! Derivative expansion of the one-loop determinant for a species much
//! heavier than the background's inverse width.
//!
//! LO integrates the MS-bar one-loop potential over the bubble,
//! ∫ d^dx [V₁(W(φ_b)) − V₁(W_F)]; NLO adds ∫ d^dx ½ Z₁(φ_b) (∇φ_b)².

use crate::error::DeterminantError;
use crate::numerics::{harmonic_number, integrate_with_error, sphere_area};
use crate::profile::BackgroundProfile;
use crate::species::{ParticleSpecies, Spin, ZeroModeKind};
use crate::types::Estimate;
use anyhow::Result;
use statrs::function::gamma::gamma;
use std::f64::consts::PI;

/// One-loop effective potential of one degree of freedom with mass² `w`.
fn one_loop_potential(dim: usize, w: f64, mu: f64) -> f64 {
    let half = 0.5 * dim as f64;
    if dim % 2 == 1 {
        return -gamma(-half) * w.powf(half) / (2.0 * (4.0 * PI).powf(half));
    }
    if w == 0.0 {
        return 0.0;
    }
    let n = dim / 2;
    let sign = if n % 2 == 0 { 1.0 } else { -1.0 };
    let factorial: f64 = (1..=n).map(|k| k as f64).product();
    sign * w.powi(n as i32) * ((w / (mu * mu)).ln() - harmonic_number(n))
        / (2.0 * factorial * (4.0 * PI).powi(n as i32))
}

/// Field normalisation Z₁; finite only for d < 6.
fn field_normalisation(dim: usize, w: f64, dw: f64) -> f64 {
    let half = 0.5 * dim as f64;
    gamma(3.0 - half) * dw * dw * w.powf(half - 3.0) / (12.0 * (4.0 * PI).powf(half))
}

/// The determinant of a heavy species at leading order, or with `nlo` at
/// next-to-leading order. Without `nlo` the size of the NLO term is added to
/// the error where it is defined.
pub fn find_derivative_expansion(
    profile: &BackgroundProfile,
    species: &ParticleSpecies,
    nlo: bool,
) -> Result<Estimate> {
    species.validate()?;
    if *species.zero_modes() != ZeroModeKind::None {
        return Err(DeterminantError::configuration(
            "derivative expansion is not valid for species with zero modes",
        ));
    }
    let d = profile.dim();
    let vector = species.spin() == Spin::Vector;
    if nlo && vector {
        return Err(DeterminantError::configuration(
            "NLO derivative expansion is only implemented for scalars",
        ));
    }
    let nlo_defined = !vector && d < 6;
    if nlo && !nlo_defined {
        return Err(DeterminantError::configuration(format!(
            "NLO derivative expansion diverges in d = {d}"
        )));
    }

    let mu = profile.renormalisation_scale();
    let phi_false = profile.phi_false();
    let w_false = species.w(phi_false);
    if !(w_false > 0.0) {
        return Err(DeterminantError::configuration(format!(
            "derivative expansion needs W > 0, found W(phi_F) = {w_false}"
        )));
    }
    let step = 1e-5 * (profile.phi()[0] - phi_false).abs().max(f64::EPSILON);
    let v_false = one_loop_potential(d, w_false, mu);
    let power = d as i32 - 1;

    let mut leading = Vec::with_capacity(profile.len());
    let mut gradient = Vec::with_capacity(profile.len());
    for ((&r, &phi), &dphi) in profile.radii().iter().zip(profile.phi()).zip(profile.dphi()) {
        let w = species.w(phi);
        if !(w > 0.0) {
            return Err(DeterminantError::configuration(format!(
                "derivative expansion needs W > 0, found W = {w} at r = {r}"
            )));
        }
        let measure = r.powi(power);
        leading.push(measure * (one_loop_potential(d, w, mu) - v_false));
        if nlo_defined {
            let z = field_normalisation(d, w, species.dw(phi, step));
            gradient.push(measure * 0.5 * z * dphi * dphi);
        }
    }

    let dof = species.spin_dof(d)? * species.internal_dof();
    let prefactor = dof * sphere_area(d as f64);
    let (lo, lo_error) = integrate_with_error(profile.radii(), &leading);
    let mut value = prefactor * lo;
    let mut error = prefactor * lo_error;
    if nlo_defined {
        let (next, next_error) = integrate_with_error(profile.radii(), &gradient);
        if nlo {
            value += prefactor * next;
            error += prefactor * next_error;
        } else {
            error += prefactor * next.abs();
        }
    }
    Ok(Estimate::new(value, error))
}

#[cfg(test)]
mod tests {
    use super::find_derivative_expansion;
    use crate::error::{DeterminantError, ErrorKind};
    use crate::profile::{BackgroundProfile, PolynomialPotential};
    use crate::species::{ParticleSpecies, Spin, ZeroModeKind};
    use crate::test_support::{gaussian_d4_profile, gaussian_species};
    use std::f64::consts::PI;
    use std::sync::Arc;

    fn gaussian_d3_profile() -> BackgroundProfile {
        let radii: Vec<f64> = (0..=2400).map(|i| 12.0 * i as f64 / 2400.0).collect();
        let phi: Vec<f64> = radii.iter().map(|&r| (-0.5 * r * r).exp()).collect();
        let dphi: Vec<f64> = radii.iter().zip(&phi).map(|(&r, &p)| -r * p).collect();
        let potential = Arc::new(PolynomialPotential::new(vec![0.0, 0.0, 0.5]));
        BackgroundProfile::new(radii, phi, dphi, 3, 0.0, potential).expect("valid profile")
    }

    fn square_mass() -> ParticleSpecies {
        ParticleSpecies::new(|phi| (1.0 + phi) * (1.0 + phi)).with_derivative(|phi| 2.0 * (1.0 + phi))
    }

    #[test]
    fn leading_order_in_three_dimensions() {
        // V₁ = −W^{3/2}/(12π) and W^{3/2} = (1 + φ)³.
        let expected = -(PI / 2.0).sqrt() * (3.0 + 3.0 / 2.0_f64.powf(1.5) + 3.0_f64.powf(-1.5)) / 3.0;
        let estimate =
            find_derivative_expansion(&gaussian_d3_profile(), &square_mass(), false).expect("LO");
        assert!((estimate.value - expected).abs() < 1e-6, "{}", estimate.value);
        // The NLO size enters the error.
        assert!(estimate.error > 0.02 && estimate.error < 0.022);
    }

    #[test]
    fn next_to_leading_order_in_three_dimensions() {
        let lo = find_derivative_expansion(&gaussian_d3_profile(), &square_mass(), false).expect("LO");
        let nlo = find_derivative_expansion(&gaussian_d3_profile(), &square_mass(), true).expect("NLO");
        // ∫ r² φ'² / (24 (1 + φ)) dr
        assert!((nlo.value - lo.value - 0.020805032067).abs() < 1e-6);
        assert!(nlo.error < 1e-6);
    }

    #[test]
    fn four_dimensional_scale_dependence() {
        let species = ParticleSpecies::new(|phi| 1.0 + phi).with_derivative(|_| 1.0);
        let at = |mu: f64| {
            let profile = gaussian_d4_profile(600, 12.0)
                .with_renormalisation_scale(mu)
                .expect("positive scale");
            find_derivative_expansion(&profile, &species, false)
                .expect("LO")
                .value
        };
        // −(Ω_4/(32π²)) ∫ r³ (W² − W_F²) with ∫ r³ (2φ + φ²) = 9/2
        let slope = (at(2.0) - at(1.0)) / 2.0_f64.ln();
        assert!((slope + 4.5 / 16.0).abs() < 1e-6, "{slope}");
    }

    #[test]
    fn rejects_invalid_species() {
        let profile = gaussian_d4_profile(200, 10.0);
        // W turns negative at the centre.
        let err = find_derivative_expansion(&profile, &gaussian_species(), false)
            .expect_err("negative W");
        assert_eq!(DeterminantError::classify(&err), ErrorKind::Configuration);

        let higgs = square_mass().with_zero_modes(ZeroModeKind::Higgs);
        let err = find_derivative_expansion(&profile, &higgs, false).expect_err("zero modes");
        assert!(format!("{err:#}").contains("zero modes"));

        let vector = square_mass().with_spin(Spin::Vector);
        assert!(find_derivative_expansion(&profile, &vector, false).is_ok());
        let err = find_derivative_expansion(&profile, &vector, true).expect_err("vector NLO");
        assert_eq!(DeterminantError::classify(&err), ErrorKind::Configuration);
    }
}
