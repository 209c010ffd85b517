//! Gelfand-Yaglom initial value problems for a single angular channel.
//!
//! The ratio T = ψ/ψ_F of the bubble and false-vacuum regular solutions obeys
//! T'' + U T' − ΔW T = 0 with U = 2ψ_F'/ψ_F + (d−1)/r. Its value at the
//! outer radius is the channel determinant ratio. The log form F = ln T is
//! better conditioned for large l.

use crate::error::DeterminantError;
use crate::profile::BackgroundProfile;
use crate::solvers::{integrate_adaptive, AdaptiveSettings, Integration};
use crate::special::{bessel_i_ratio, bessel_jy, log_bessel_k};
use crate::species::{MassProfile, ParticleSpecies};
use crate::traits::RadialSystem;
use crate::types::{DeterminantSettings, Estimate, IvpForm, IvpSolution, IvpStatus, MasslessTail};
use anyhow::{bail, Result};
use statrs::function::gamma::ln_gamma;
use std::f64::consts::PI;

/// Below this m·r the Bessel ratio is replaced by its leading power.
const POWER_LAW_MAX: f64 = 1e-8;
/// Largest step as a fraction of the natural length scale.
const MAX_STEP_FRACTION: f64 = 0.05;

/// U(d, l, m, r) = (2l+d−1)/r + 2m I_{ν+1}(mr)/I_ν(mr), ν = l + d/2 − 1.
pub fn u_coefficient(d: usize, l: usize, m: f64, r: f64) -> f64 {
    let n = (2 * l + d) as f64 - 1.0;
    let nu = l as f64 + 0.5 * d as f64 - 1.0;
    if m == 0.0 {
        return n / r;
    }
    let x = m * r;
    if x < POWER_LAW_MAX {
        return n / r + m * x / (nu + 1.0);
    }
    match bessel_i_ratio(nu, x) {
        Ok(ratio) => n / r + 2.0 * m * ratio,
        Err(_) => f64::NAN,
    }
}

struct RatioSystem<'a> {
    masses: &'a MassProfile,
    d: usize,
    l: usize,
    m: f64,
}

impl RadialSystem for RatioSystem<'_> {
    fn dimension(&self) -> usize {
        2
    }

    fn apply(&self, r: f64, y: &[f64], out: &mut [f64]) {
        let u = u_coefficient(self.d, self.l, self.m, r);
        out[0] = y[1];
        out[1] = -u * y[1] + self.masses.value(r) * y[0];
    }
}

struct LogRatioSystem<'a> {
    masses: &'a MassProfile,
    d: usize,
    l: usize,
    m: f64,
}

impl RadialSystem for LogRatioSystem<'_> {
    fn dimension(&self) -> usize {
        2
    }

    fn apply(&self, r: f64, y: &[f64], out: &mut [f64]) {
        let u = u_coefficient(self.d, self.l, self.m, r);
        out[0] = y[1];
        out[1] = -y[1] * y[1] - u * y[1] + self.masses.value(r);
    }
}

/// Shooting solver for one species on one background.
pub struct GelfandYaglom<'a> {
    masses: &'a MassProfile,
    dim: usize,
    mass: f64,
    scale: f64,
    gy_tol: f64,
    rmin: f64,
    samples: usize,
}

impl<'a> GelfandYaglom<'a> {
    pub fn new(
        profile: &BackgroundProfile,
        masses: &'a MassProfile,
        settings: &DeterminantSettings,
    ) -> Self {
        let mass = if masses.is_massless() {
            0.0
        } else {
            masses.mass()
        };
        let r_mid = profile.r_mid();
        let scale = if mass > 0.0 { r_mid.min(1.0 / mass) } else { r_mid };
        Self {
            masses,
            dim: profile.dim(),
            mass,
            scale,
            gy_tol: settings.gy_tol,
            rmin: settings.rmin,
            samples: profile.len(),
        }
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    /// Regular solution near the origin, T = 1 + a r² + b r⁴.
    fn taylor_start(&self, l: usize, r0: f64) -> (f64, f64) {
        let n = (2 * l + self.dim) as f64 - 1.0;
        let nu = l as f64 + 0.5 * self.dim as f64 - 1.0;
        let kappa = self.mass * self.mass / (nu + 1.0);
        let (w0, w2) = self.masses.origin_coefficients();
        let a = w0 / (2.0 * (n + 1.0));
        let b = (a * (w0 - 2.0 * kappa) + w2) / (4.0 * (n + 3.0));
        let r2 = r0 * r0;
        (1.0 + a * r2 + b * r2 * r2, 2.0 * a * r0 + 4.0 * b * r0 * r2)
    }

    fn run(&self, l: usize, form: IvpForm) -> Result<(Integration, f64)> {
        let r0 = self.rmin * self.scale;
        let r1 = self.masses.r_max();
        if !(r1 > r0) {
            bail!("rmin * scale = {} lies beyond the profile.", r0);
        }
        let (t0, dt0) = self.taylor_start(l, r0);
        let mut settings = AdaptiveSettings {
            rtol: self.gy_tol,
            max_step: MAX_STEP_FRACTION * self.scale,
            ..AdaptiveSettings::default()
        };
        let integration = match form {
            IvpForm::Ratio => {
                settings.atol = self.gy_tol * 1e-6 * t0.abs();
                let system = RatioSystem {
                    masses: self.masses,
                    d: self.dim,
                    l,
                    m: self.mass,
                };
                integrate_adaptive(&system, r0, &[t0, dt0], r1, settings)?
            }
            IvpForm::LogRatio => {
                if !(t0 > 0.0) {
                    return Err(DeterminantError::numeric_failure(
                        "log form needs T > 0 at the first step",
                    ));
                }
                settings.atol = self.gy_tol * 1e-6;
                let system = LogRatioSystem {
                    masses: self.masses,
                    d: self.dim,
                    l,
                    m: self.mass,
                };
                integrate_adaptive(&system, r0, &[t0.ln(), dt0 / t0], r1, settings)?
            }
        };
        Ok((integration, r0 / self.scale))
    }

    /// Integrates the chosen form out to the last profile radius. Failures
    /// come back as a sentinel solution, never as an error.
    pub fn solve(&self, l: usize, form: IvpForm) -> IvpSolution {
        match self.run(l, form) {
            Ok((integration, start_fraction)) => {
                let value = integration.state[0];
                let n = self.samples as f64;
                let error = (integration.steps as f64 * integration.last_error)
                    .max(self.gy_tol * value.abs())
                    .max(value.abs() / n.powi(4))
                    .max(value.abs() * start_fraction.powi(5));
                IvpSolution {
                    value,
                    error,
                    derivative: Some(integration.state[1]),
                    status: IvpStatus::Converged,
                }
            }
            Err(err) => IvpSolution::failed(format!("l = {l}: {err:#}")),
        }
    }

    /// T_l(R_max)
    pub fn ratio(&self, l: usize) -> IvpSolution {
        self.solve(l, IvpForm::Ratio)
    }

    /// F_l(R_max) = ln T_l(R_max)
    pub fn log_ratio(&self, l: usize) -> IvpSolution {
        self.solve(l, IvpForm::LogRatio)
    }

    /// T_l(∞) for a massless false vacuum, matching (T, T') at R_max onto
    /// the exact solutions of T'' + (n/r)T' − c r^{−a} T = 0. The value is
    /// signed; the error is the relative error of T(R_max).
    pub fn asymptotic_ratio(
        &self,
        l: usize,
        boundary: &IvpSolution,
        tail: MasslessTail,
    ) -> Result<Estimate> {
        let (t0, dt0) = match (boundary.is_converged(), boundary.derivative) {
            (true, Some(dt0)) => (boundary.value, dt0),
            _ => {
                return Err(DeterminantError::numeric_failure(format!(
                    "no boundary data for matching at l = {l}"
                )))
            }
        };
        let MasslessTail {
            prefactor: c,
            exponent: a,
        } = tail;
        if !(a > 2.0) || c == 0.0 || !c.is_finite() {
            return Err(DeterminantError::numeric_failure(format!(
                "cannot match onto dW ~ {c} r^-{a}"
            )));
        }
        let radius = self.masses.r_max();
        let n = (2 * l + self.dim) as f64 - 1.0;
        let p = (n - 1.0) / (a - 2.0);
        if !(p > 0.0) {
            return Err(DeterminantError::numeric_failure(format!(
                "matching order vanishes at l = {l}, d = {}",
                self.dim
            )));
        }
        let beta = 1.0 - 0.5 * a;
        let z = 2.0 * c.abs().sqrt() / (a - 2.0) * radius.powf(beta);
        let base = (1.0 - n) / (2.0 * radius);
        let slope = beta * z / radius;
        let log_norm = ln_gamma(p) - p * (0.5 * z).ln();

        let t_inf = if c > 0.0 {
            let k = log_bessel_k(p, z)?;
            let i_ratio = bessel_i_ratio(p, z)?;
            let beta1 = base + slope * (p / z - k.ratio);
            let beta2 = base + slope * (p / z + i_ratio);
            let amplitude = (t0 * beta2 - dt0) / (beta2 - beta1);
            amplitude * (log_norm - 2.0_f64.ln() - k.log_value).exp()
        } else {
            let jy = bessel_jy(p, z)?;
            let beta1 = base + slope * (p / z - jy.y_ratio);
            let beta2 = base + slope * (p / z - jy.j_ratio);
            let amplitude = (t0 * beta2 - dt0) / (beta2 - beta1);
            -amplitude * jy.y_sign * (log_norm - PI.ln() - jy.log_abs_y).exp()
        };
        if !t_inf.is_finite() {
            return Err(DeterminantError::numeric_failure(format!(
                "non-finite asymptotic ratio at l = {l}"
            )));
        }
        let relative = if t0 != 0.0 {
            boundary.error / t0.abs()
        } else {
            f64::INFINITY
        };
        Ok(Estimate::new(t_inf, relative * t_inf.abs()))
    }
}

/// T_l(R_max) for a species on a background.
pub fn find_gelfand_yaglom_tl(
    profile: &BackgroundProfile,
    species: &ParticleSpecies,
    l: usize,
    settings: &DeterminantSettings,
) -> Result<IvpSolution> {
    settings.validate()?;
    let masses = MassProfile::new(profile, species)?;
    Ok(GelfandYaglom::new(profile, &masses, settings).ratio(l))
}

/// F_l(R_max) = ln T_l(R_max) for a species on a background.
pub fn find_gelfand_yaglom_fl(
    profile: &BackgroundProfile,
    species: &ParticleSpecies,
    l: usize,
    settings: &DeterminantSettings,
) -> Result<IvpSolution> {
    settings.validate()?;
    let masses = MassProfile::new(profile, species)?;
    Ok(GelfandYaglom::new(profile, &masses, settings).log_ratio(l))
}

#[cfg(test)]
mod tests {
    use super::{find_gelfand_yaglom_fl, find_gelfand_yaglom_tl, u_coefficient, GelfandYaglom};
    use crate::species::{MassProfile, ParticleSpecies};
    use crate::test_support::{gaussian_d4_profile, gaussian_species, power_law_d4_profile};
    use crate::types::{DeterminantSettings, IvpStatus, MasslessTail};

    #[test]
    fn u_regimes_are_continuous() {
        for (d, l) in [(3, 0), (4, 2), (4, 17)] {
            let m = 1.3;
            for x in [1e-8, 0.25] {
                let r = x / m;
                let below = u_coefficient(d, l, m, r * (1.0 - 1e-10));
                let above = u_coefficient(d, l, m, r * (1.0 + 1e-10));
                assert!((below - above).abs() < 1e-8 * above.abs());
            }
        }
        assert_eq!(u_coefficient(4, 3, 0.0, 2.0), 4.5);
    }

    #[test]
    fn u_tends_to_twice_the_mass_at_large_radius() {
        let u = u_coefficient(4, 1, 2.0, 200.0);
        assert!((u - 4.0).abs() < 0.02);
    }

    #[test]
    fn ratio_and_log_forms_agree() {
        let profile = gaussian_d4_profile(600, 12.0);
        let masses = MassProfile::new(&profile, &gaussian_species()).expect("mass profile");
        let settings = DeterminantSettings {
            gy_tol: 1e-8,
            ..DeterminantSettings::default()
        };
        let gy = GelfandYaglom::new(&profile, &masses, &settings);
        for l in [1, 2, 5] {
            let t = gy.ratio(l);
            let f = gy.log_ratio(l);
            assert_eq!(t.status, IvpStatus::Converged);
            assert!(t.value > 0.0);
            assert!((t.value.ln() - f.value).abs() < 1e-6, "l = {l}");
            assert!(f.error > 0.0);
        }
        // Reference values from an independent integration.
        assert!((gy.ratio(0).value.ln() + 0.789_043_944).abs() < 1e-5);
        assert!((gy.log_ratio(2).value + 0.348_560_1).abs() < 1e-5);
    }

    #[test]
    fn free_function_validates_settings() {
        let profile = gaussian_d4_profile(100, 12.0);
        let settings = DeterminantSettings {
            rmin: 2.0,
            ..DeterminantSettings::default()
        };
        assert!(find_gelfand_yaglom_fl(&profile, &gaussian_species(), 2, &settings).is_err());

        let profile = gaussian_d4_profile(600, 12.0);
        let settings = DeterminantSettings::default();
        let t = find_gelfand_yaglom_tl(&profile, &gaussian_species(), 2, &settings).expect("T_2");
        let f = find_gelfand_yaglom_fl(&profile, &gaussian_species(), 2, &settings).expect("F_2");
        assert!(t.is_converged() && f.is_converged());
        assert!((t.value.ln() - f.value).abs() < 1e-5);
    }

    #[test]
    fn asymptotic_ratio_is_independent_of_matching_radius() {
        // ΔW = 3/(1 + r²)², ΔW ≈ 3 r^{-4}.
        let repulsive = ParticleSpecies::new(|phi| 3.0 * phi * phi);
        let tail = MasslessTail {
            prefactor: 3.0,
            exponent: 4.0,
        };
        let settings = DeterminantSettings {
            gy_tol: 1e-9,
            ..DeterminantSettings::default()
        };
        for l in [0, 2, 5] {
            let mut estimates = Vec::new();
            for r_max in [20.0, 40.0] {
                let profile = power_law_d4_profile((r_max * 50.0) as usize, r_max);
                let masses = MassProfile::new(&profile, &repulsive).expect("mass profile");
                let gy = GelfandYaglom::new(&profile, &masses, &settings);
                let boundary = gy.ratio(l);
                let t_inf = gy
                    .asymptotic_ratio(l, &boundary, tail)
                    .expect("matching should succeed");
                estimates.push(t_inf.value);
                // The tail still contributes past R_max.
                assert!(t_inf.value > boundary.value);
            }
            assert!((estimates[0] - estimates[1]).abs() < 1e-4 * estimates[1], "l = {l}");
        }
    }

    #[test]
    fn asymptotic_ratio_with_attractive_tail() {
        let attractive = ParticleSpecies::new(|phi| -3.0 * phi * phi);
        let tail = MasslessTail {
            prefactor: -3.0,
            exponent: 4.0,
        };
        let settings = DeterminantSettings {
            gy_tol: 1e-9,
            ..DeterminantSettings::default()
        };
        let mut estimates = Vec::new();
        for r_max in [20.0, 40.0] {
            let profile = power_law_d4_profile((r_max * 50.0) as usize, r_max);
            let masses = MassProfile::new(&profile, &attractive).expect("mass profile");
            let gy = GelfandYaglom::new(&profile, &masses, &settings);
            let boundary = gy.ratio(2);
            let t_inf = gy
                .asymptotic_ratio(2, &boundary, tail)
                .expect("matching should succeed");
            estimates.push(t_inf.value);
        }
        assert!((estimates[0] - estimates[1]).abs() < 1e-4 * estimates[1].abs());
    }
}
