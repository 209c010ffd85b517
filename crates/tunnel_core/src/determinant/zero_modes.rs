//! The l = 0 and l = 1 channels, where zero modes are removed and replaced
//! by their normalisation.

use crate::error::DeterminantError;
use crate::gelfand_yaglom::GelfandYaglom;
use crate::numerics::leading_derivative;
use crate::profile::BackgroundProfile;
use crate::types::{Estimate, IvpStatus};
use anyhow::{Context, Result};
use log::warn;
use std::f64::consts::PI;

/// Samples used for the finite-difference curvature.
const CURVATURE_SAMPLES: usize = 10;

/// ln|φ''(0)| for the translation modes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Curvature {
    pub log_abs: f64,
    pub error: f64,
    /// One estimate was exactly zero and the other was used.
    pub approximate: bool,
}

/// φ''(0) from the field equation, V'(φ(0))/d, checked against the slope of
/// the sampled φ'. If either is exactly zero the larger magnitude is used
/// and the error is set to the size of a float cancellation.
pub fn origin_curvature(profile: &BackgroundProfile) -> Result<Curvature> {
    let analytic = profile.potential().first_derivative(profile.phi()[0]) / profile.dim() as f64;
    let n = CURVATURE_SAMPLES.min(profile.len());
    let sampled = leading_derivative(&profile.radii()[..n], &profile.dphi()[..n]);
    if analytic == 0.0 || sampled == 0.0 {
        let larger = analytic.abs().max(sampled.abs());
        if !(larger > 0.0) {
            return Err(DeterminantError::numeric_failure(
                "field curvature vanishes at the origin",
            ));
        }
        warn!("ddphi = 0 at r = 0, using {larger:.6e}");
        return Ok(Curvature {
            log_abs: larger.ln(),
            error: -(2e-16_f64).ln(),
            approximate: true,
        });
    }
    Ok(Curvature {
        log_abs: analytic.abs().ln(),
        error: (analytic.abs().ln() - sampled.abs().ln()).abs(),
        approximate: false,
    })
}

fn log_two_pi_power(dim: usize) -> f64 {
    (0.5 * dim as f64 - 1.0) * (2.0 * PI).ln()
}

/// The d translation modes, normalised by φ∞ and the curvature.
pub fn higgs_translation(dim: usize, log_phi_inf: Estimate, curvature: &Curvature) -> Estimate {
    let half = 0.5 * dim as f64;
    Estimate::new(
        -half * (log_two_pi_power(dim) + log_phi_inf.value + curvature.log_abs),
        half * (log_phi_inf.error + curvature.error),
    )
}

/// The dilatation mode of a scaleless background at l = 0.
pub fn higgs_dilatation(profile: &BackgroundProfile, log_phi_inf: Estimate) -> Result<Estimate> {
    let d = profile.dim();
    if d <= 2 {
        return Err(DeterminantError::configuration(format!(
            "scaleless backgrounds need d > 2, got d = {d}"
        )));
    }
    let nu = 0.5 * (d as f64 - 2.0);
    let z0 = nu * profile.phi()[0] + profile.radii()[0] * profile.dphi()[0];
    if z0 == 0.0 {
        return Err(DeterminantError::numeric_failure(
            "dilatation mode vanishes at the first radius",
        ));
    }
    Ok(Estimate::new(
        -0.5 * (log_two_pi_power(d) + log_phi_inf.value + z0.abs().ln() + nu.ln()),
        0.5 * log_phi_inf.error,
    ))
}

/// The l = 0 Goldstone modes, normalised by the field at the origin.
pub fn goldstone_rotation(profile: &BackgroundProfile, log_phi_inf: Estimate) -> Result<Estimate> {
    let phi0 = profile.phi()[0];
    if phi0 == 0.0 {
        return Err(DeterminantError::numeric_failure(
            "Goldstone normalisation needs phi(0) != 0",
        ));
    }
    Ok(Estimate::new(
        -0.5 * (log_two_pi_power(profile.dim()) + phi0.abs().ln() + log_phi_inf.value),
        0.5 * log_phi_inf.error,
    ))
}

/// `weight` · ½ ln T_l from the T-form. With `modulus` the sign of T_l is
/// dropped; otherwise T_l ≤ 0 is a `NegativeResult`.
pub fn ratio_channel(gy: &GelfandYaglom<'_>, l: usize, weight: f64, modulus: bool) -> Result<Estimate> {
    let solution = gy.ratio(l);
    if let IvpStatus::Failed(reason) = solution.status {
        return Err(DeterminantError::numeric_failure(reason))
            .with_context(|| format!("channel l = {l}"));
    }
    let t = solution.value;
    if !modulus && !(t > 0.0) {
        return Err(DeterminantError::negative_result(format!(
            "T_{l} = {t:.6e} is not positive; the operator has an unexpected negative or zero mode"
        )));
    }
    let t = t.abs();
    if t == 0.0 {
        return Err(DeterminantError::numeric_failure(format!("T_{l} vanishes")));
    }
    Ok(Estimate::new(
        0.5 * weight * t.ln(),
        0.5 * weight * solution.error / t,
    ))
}
