//! MS-bar counterterm for the ultraviolet pole of the channel sum.
//!
//! In d = 2n − 2ε the WKB orders whose degeneracy sums diverge are cancelled
//! by the heat-kernel coefficient a_n. What survives is a finite,
//! scale-dependent term plus the residue that vector fields pick up from
//! their d-dependent spin count.

use crate::error::DeterminantError;
use crate::numerics::{harmonic_number, integrate_with_error, sphere_area};
use crate::profile::BackgroundProfile;
use crate::species::{MassProfile, ParticleSpecies};
use crate::types::MasslessTail;
use crate::wkb::WkbExpansion;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct RenormalisationTerm {
    /// Finite part after the pole cancels, depending on ln μ.
    pub scale_term: f64,
    /// One-dof residue of the loop pole.
    pub eps_residue: f64,
    pub error: f64,
}

/// Δa_n(r) for the heat-kernel order matching d = 2n.
fn heat_kernel_difference(n: usize, w: f64, w_false: f64, slope: f64) -> f64 {
    match n {
        1 => -(w - w_false),
        2 => 0.5 * (w * w - w_false * w_false),
        _ => -(w.powi(3) - w_false.powi(3)) / 6.0 - slope * slope / 12.0,
    }
}

/// ∫_R^∞ r^s (A + B ln r) dr for s < −1.
fn power_log_tail(s: f64, a: f64, b: f64, radius: f64) -> f64 {
    let p = s + 1.0;
    let rp = radius.powf(p);
    -rp * (a + b * radius.ln()) / p + b * rp / (p * p)
}

/// Beyond R_max with ΔW = c r^{−a} and W_F = 0, Δa_n is a sum of pure powers
/// C r^{−e}.
fn massless_powers(n: usize, tail: MasslessTail) -> Vec<(f64, f64)> {
    let MasslessTail {
        prefactor: c,
        exponent: a,
    } = tail;
    match n {
        1 => vec![(-c, a)],
        2 => vec![(0.5 * c * c, 2.0 * a)],
        _ => vec![
            (-c.powi(3) / 6.0, 3.0 * a),
            (-(a * c).powi(2) / 12.0, 2.0 * a + 2.0),
        ],
    }
}

/// Counterterm for one species. `tail` is used only for a massless false
/// vacuum, where Δa_n reaches past the profile.
pub fn renormalisation_term(
    profile: &BackgroundProfile,
    masses: &MassProfile,
    wkb: &WkbExpansion,
    tail: Option<MasslessTail>,
) -> Result<RenormalisationTerm> {
    let d = profile.dim();
    if d % 2 == 1 {
        return Ok(RenormalisationTerm::default());
    }
    if d > 6 {
        return Err(DeterminantError::configuration(format!(
            "renormalisation is only implemented for d = 2, 4, 6, got d = {d}"
        )));
    }
    let n = d / 2;
    let mu = profile.renormalisation_scale();
    let constant = (0.5 * mu).ln() - 0.5 * harmonic_number(n - 1);
    let power = (2 * n - 1) as i32;

    let w_false = masses.w_false();
    let integrand: Vec<f64> = masses
        .radii()
        .iter()
        .zip(masses.samples())
        .zip(masses.slopes())
        .map(|((&r, &dw), &slope)| {
            if r == 0.0 {
                return 0.0;
            }
            let delta_a = heat_kernel_difference(n, dw + w_false, w_false, slope);
            r.powi(power) * delta_a * (constant + r.ln())
        })
        .collect();
    let (mut integral, quad_error) = integrate_with_error(masses.radii(), &integrand);

    if let Some(tail) = tail.filter(|_| profile.is_massless() && masses.is_massless()) {
        for (coefficient, exponent) in massless_powers(n, tail) {
            let s = power as f64 - exponent;
            if !(s < -1.0) {
                return Err(DeterminantError::configuration(format!(
                    "counterterm integral diverges for dW ~ r^-{}",
                    tail.exponent
                )));
            }
            integral += coefficient * power_log_tail(s, constant, 1.0, masses.r_max());
        }
    }

    let prefactor = sphere_area(d as f64) / (4.0 * PI).powi(n as i32);
    let mut scale_term = -prefactor * integral;
    let mut eps_residue = 0.0;
    let mut error = prefactor * quad_error;
    for pole in wkb.pole_terms() {
        scale_term += 0.5 * pole.term.value * pole.finite;
        eps_residue += 0.5 * pole.term.value * pole.residue;
        error += 0.5 * pole.term.error * (pole.finite.abs() + pole.residue.abs());
    }
    Ok(RenormalisationTerm {
        scale_term,
        eps_residue,
        error,
    })
}

/// Renormalisation term of a species on a background.
pub fn find_renormalisation_term(
    profile: &BackgroundProfile,
    species: &ParticleSpecies,
    tail: Option<MasslessTail>,
) -> Result<RenormalisationTerm> {
    let masses = MassProfile::new(profile, species)?;
    if profile.dim() % 2 == 1 {
        return Ok(RenormalisationTerm::default());
    }
    let massless = profile.is_massless() && masses.is_massless();
    let wkb = WkbExpansion::new(&masses, massless, tail)?;
    renormalisation_term(profile, &masses, &wkb, tail)
}
