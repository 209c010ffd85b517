//! Fluctuating particle species and the ΔW(r) interpolant each one induces
//! on a background.

use crate::numerics::{bracket, hermite};
use crate::profile::BackgroundProfile;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub type MassFunction = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Spin {
    #[default]
    Scalar,
    Vector,
}

/// Full and unbroken groups, space separated for products,
/// e.g. ("SU5", "SU3 SU2 U1").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GaugeGroups {
    pub full: String,
    pub unbroken: String,
}

impl GaugeGroups {
    pub fn new(full: impl Into<String>, unbroken: impl Into<String>) -> Self {
        Self {
            full: full.into(),
            unbroken: unbroken.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ZeroModeKind {
    #[default]
    None,
    /// Translations of the bubble.
    Higgs,
    /// Broken internal symmetry directions.
    Goldstone { gauge_groups: Option<GaugeGroups> },
}

#[derive(Clone)]
pub struct ParticleSpecies {
    w: MassFunction,
    dw: Option<MassFunction>,
    spin: Spin,
    internal_dof: f64,
    zero_modes: ZeroModeKind,
    thermal: bool,
}

impl fmt::Debug for ParticleSpecies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParticleSpecies")
            .field("spin", &self.spin)
            .field("internal_dof", &self.internal_dof)
            .field("zero_modes", &self.zero_modes)
            .field("thermal", &self.thermal)
            .finish()
    }
}

impl ParticleSpecies {
    /// A spin-0, single-component species with field-dependent mass W(φ).
    pub fn new(w: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        Self {
            w: Arc::new(w),
            dw: None,
            spin: Spin::Scalar,
            internal_dof: 1.0,
            zero_modes: ZeroModeKind::None,
            thermal: false,
        }
    }

    /// Fluctuations of the nucleating field itself, W = V''(φ).
    pub fn higgs(profile: &BackgroundProfile) -> Self {
        let potential = profile.shared_potential();
        let mut species = Self::new(move |phi| potential.second_derivative(phi));
        species.zero_modes = ZeroModeKind::Higgs;
        species
    }

    /// dW/dφ; without it a central difference is used.
    pub fn with_derivative(mut self, dw: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        self.dw = Some(Arc::new(dw));
        self
    }

    pub fn with_spin(mut self, spin: Spin) -> Self {
        self.spin = spin;
        self
    }

    pub fn with_internal_dof(mut self, dof: f64) -> Self {
        self.internal_dof = dof;
        self
    }

    pub fn with_zero_modes(mut self, zero_modes: ZeroModeKind) -> Self {
        self.zero_modes = zero_modes;
        self
    }

    pub fn with_thermal(mut self, thermal: bool) -> Self {
        self.thermal = thermal;
        self
    }

    pub fn spin(&self) -> Spin {
        self.spin
    }

    pub fn internal_dof(&self) -> f64 {
        self.internal_dof
    }

    pub fn zero_modes(&self) -> &ZeroModeKind {
        &self.zero_modes
    }

    pub fn thermal(&self) -> bool {
        self.thermal
    }

    pub fn w(&self, phi: f64) -> f64 {
        (self.w)(phi)
    }

    /// dW/dφ, with `step` used for the central difference fallback.
    pub fn dw(&self, phi: f64, step: f64) -> f64 {
        match &self.dw {
            Some(dw) => dw(phi),
            None => ((self.w)(phi + step) - (self.w)(phi - step)) / (2.0 * step),
        }
    }

    /// Spin degrees of freedom in d dimensions.
    pub fn spin_dof(&self, dim: usize) -> Result<f64> {
        match self.spin {
            Spin::Scalar => Ok(1.0),
            Spin::Vector if dim == 1 => Err(crate::error::DeterminantError::configuration(
                "particle spin must be 0 in d = 1",
            )),
            Spin::Vector => Ok((dim - 1) as f64),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.internal_dof > 0.0) {
            bail!("internal_dof must be positive.");
        }
        Ok(())
    }
}

/// ΔW(r) = W(φ(r)) − W(φ_F) sampled on the profile radii, with the slope
/// W'(φ)φ' for Hermite interpolation and an even quadratic inside R[0].
#[derive(Debug, Clone)]
pub struct MassProfile {
    radii: Vec<f64>,
    delta_w: Vec<f64>,
    slope: Vec<f64>,
    w_false: f64,
    origin_value: f64,
    origin_curvature: f64,
    dim: usize,
}

impl MassProfile {
    pub fn new(profile: &BackgroundProfile, species: &ParticleSpecies) -> Result<Self> {
        let phi_false = profile.phi_false();
        let w_false = species.w(phi_false);
        let step = 1e-5 * (profile.phi()[0] - phi_false).abs().max(f64::EPSILON);
        let radii = profile.radii().to_vec();
        let mut delta_w = Vec::with_capacity(radii.len());
        let mut slope = Vec::with_capacity(radii.len());
        for (&phi, &dphi) in profile.phi().iter().zip(profile.dphi()) {
            delta_w.push(species.w(phi) - w_false);
            slope.push(species.dw(phi, step) * dphi);
        }
        if !w_false.is_finite() || delta_w.iter().chain(&slope).any(|v| !v.is_finite()) {
            bail!("W(phi) is not finite along the profile.");
        }
        if w_false < -1e-12 {
            bail!("W(phi_F) = {} is negative; the false vacuum is unstable.", w_false);
        }
        let (origin_value, origin_curvature) = if radii[0] > 0.0 {
            let w2 = slope[0] / (2.0 * radii[0]);
            (delta_w[0] - w2 * radii[0] * radii[0], w2)
        } else {
            (delta_w[0], slope[1] / (2.0 * radii[1]))
        };
        Ok(Self {
            radii,
            delta_w,
            slope,
            w_false,
            origin_value,
            origin_curvature,
            dim: profile.dim(),
        })
    }

    pub fn radii(&self) -> &[f64] {
        &self.radii
    }

    pub fn samples(&self) -> &[f64] {
        &self.delta_w
    }

    pub fn slopes(&self) -> &[f64] {
        &self.slope
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn r_max(&self) -> f64 {
        self.radii[self.radii.len() - 1]
    }

    /// W(φ_F)
    pub fn w_false(&self) -> f64 {
        self.w_false
    }

    pub fn mass(&self) -> f64 {
        self.w_false.max(0.0).sqrt()
    }

    pub fn is_massless(&self) -> bool {
        let scale = self.delta_w.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        self.w_false <= 1e-12 * scale.max(1.0)
    }

    /// (ΔW(0), ΔW''(0)/2), the even Taylor coefficients at the origin.
    pub fn origin_coefficients(&self) -> (f64, f64) {
        (self.origin_value, self.origin_curvature)
    }

    pub fn value(&self, r: f64) -> f64 {
        self.value_and_slope(r).0
    }

    /// (ΔW, dΔW/dr) at r.
    pub fn value_and_slope(&self, r: f64) -> (f64, f64) {
        if r < self.radii[0] {
            return (
                self.origin_value + self.origin_curvature * r * r,
                2.0 * self.origin_curvature * r,
            );
        }
        let n = self.radii.len();
        if r >= self.radii[n - 1] {
            return (self.delta_w[n - 1], 0.0);
        }
        let i = bracket(&self.radii, r);
        hermite(
            self.radii[i],
            self.radii[i + 1],
            self.delta_w[i],
            self.delta_w[i + 1],
            self.slope[i],
            self.slope[i + 1],
            r,
        )
    }
}
