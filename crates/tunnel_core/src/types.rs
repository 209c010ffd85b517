//! Settings and result types shared across the determinant pipeline.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeterminantSettings {
    /// Relative tolerance of the Gelfand-Yaglom initial value problems.
    pub gy_tol: f64,
    /// Relative tolerance of the negative eigenvalue (thermal case).
    pub eig_tol: f64,
    /// Accuracy goal for the asymptotic fit of the profile tail.
    pub log_phi_inf_tol: f64,
    /// Number of channels l = 0..l_max; estimated from mass × radius if unset.
    pub l_max: Option<usize>,
    /// First radius of the IVPs relative to the natural length scale.
    pub rmin: f64,
    /// Fraction of the field excursion marking the fitted tail points.
    pub tail: f64,
    /// Return per-channel arrays instead of the extrapolated sum.
    pub full: bool,
}

impl Default for DeterminantSettings {
    fn default() -> Self {
        Self {
            gy_tol: 1e-6,
            eig_tol: 1e-6,
            log_phi_inf_tol: 1e-3,
            l_max: None,
            rmin: 1e-4,
            tail: 0.007,
            full: false,
        }
    }
}

impl DeterminantSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.gy_tol > 0.0) {
            bail!("gy_tol must be positive.");
        }
        if !(self.eig_tol > 0.0) {
            bail!("eig_tol must be positive.");
        }
        if !(self.log_phi_inf_tol > 0.0) {
            bail!("log_phi_inf_tol must be positive.");
        }
        if self.l_max == Some(0) {
            bail!("l_max must be at least 1.");
        }
        if !(self.rmin > 0.0 && self.rmin < 1.0) {
            bail!("rmin must lie in (0, 1).");
        }
        if !(self.tail > 0.0 && self.tail < 0.5) {
            bail!("tail must lie in (0, 0.5).");
        }
        Ok(())
    }
}

/// Which Gelfand-Yaglom equation to integrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IvpForm {
    /// T'' + U T' − ΔW T = 0
    Ratio,
    /// F'' + F'² + U F' − ΔW = 0, T = exp(F)
    LogRatio,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IvpStatus {
    Converged,
    Failed(String),
}

/// One shape for success and failure: a failed solve carries NaN value and
/// error and the reason in `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvpSolution {
    pub value: f64,
    pub error: f64,
    /// dT/dr or dF/dr at the outer radius.
    pub derivative: Option<f64>,
    pub status: IvpStatus,
}

impl IvpSolution {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            value: f64::NAN,
            error: f64::NAN,
            derivative: None,
            status: IvpStatus::Failed(reason.into()),
        }
    }

    pub fn is_converged(&self) -> bool {
        matches!(self.status, IvpStatus::Converged)
    }
}

/// ΔW ≈ prefactor · r^{−exponent} beyond the profile, for a massless false
/// vacuum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MasslessTail {
    pub prefactor: f64,
    pub exponent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub value: f64,
    pub error: f64,
}

impl Estimate {
    pub fn new(value: f64, error: f64) -> Self {
        Self { value, error }
    }
}

/// Per-channel tagged result inspected by the channel loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChannelOutcome {
    Ok { value: f64, error: f64 },
    /// Error exceeds the magnitude; kept, but flagged.
    Unstable { value: f64, error: f64, note: String },
    Failed { reason: String },
}

impl ChannelOutcome {
    pub fn classify(value: f64, error: f64) -> Self {
        if !value.is_finite() || !error.is_finite() {
            Self::Failed {
                reason: format!("non-finite channel result ({value}, {error})"),
            }
        } else if error > value.abs() {
            Self::Unstable {
                value,
                error,
                note: format!("error {error:.3e} exceeds |value| {:.3e}", value.abs()),
            }
        } else {
            Self::Ok { value, error }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelResult {
    pub l: usize,
    pub value: f64,
    pub error: f64,
}

/// Channel values and errors in a buffer sized once to l_max. The logical
/// length starts at the capacity and can only shrink.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSeries {
    values: Box<[f64]>,
    errors: Box<[f64]>,
    len: usize,
}

impl ChannelSeries {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: vec![0.0; capacity].into_boxed_slice(),
            errors: vec![0.0; capacity].into_boxed_slice(),
            len: capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.values.len()
    }

    /// Stores channel l; entries past the logical length are ignored.
    pub fn set(&mut self, l: usize, value: f64, error: f64) {
        if l < self.len {
            self.values[l] = value;
            self.errors[l] = error.abs();
        }
    }

    pub fn get(&self, l: usize) -> Option<ChannelResult> {
        (l < self.len).then(|| ChannelResult {
            l,
            value: self.values[l],
            error: self.errors[l],
        })
    }

    /// Shrinks the logical length. Never grows.
    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    pub fn values(&self) -> &[f64] {
        &self.values[..self.len]
    }

    pub fn errors(&self) -> &[f64] {
        &self.errors[..self.len]
    }

    /// Adds to channel l, combining the error in quadrature.
    pub fn add(&mut self, l: usize, value: f64, error: f64) {
        if l < self.len {
            self.values[l] += value;
            self.errors[l] = self.errors[l].hypot(error);
        }
    }

    /// Adds to the value of channel l, adding the error linearly.
    pub fn add_linear(&mut self, l: usize, value: f64, error: f64) {
        if l < self.len {
            self.values[l] += value;
            self.errors[l] += error.abs();
        }
    }

    pub fn scale(&mut self, factor: f64) {
        for v in &mut self.values[..self.len] {
            *v *= factor;
        }
        for e in &mut self.errors[..self.len] {
            *e *= factor.abs();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = ChannelResult> + '_ {
        (0..self.len).map(|l| ChannelResult {
            l,
            value: self.values[l],
            error: self.errors[l],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExtrapolationBranch {
    /// No channel sum (d = 1) or per-channel output.
    #[default]
    None,
    Epsilon,
    PolynomialFit,
}

/// Which optional corrections were folded into a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Corrections {
    pub group_volume_applied: bool,
    pub thermal_prefactor_applied: bool,
    /// A zero curvature at the origin was replaced by the other estimate.
    pub approximate_curvature: bool,
    /// Channel count after early truncation or a failed channel.
    pub truncated_at: Option<usize>,
    pub extrapolation: ExtrapolationBranch,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeterminantResult {
    pub value: f64,
    pub error: f64,
    pub corrections: Corrections,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelArrays {
    pub values: Vec<f64>,
    pub errors: Vec<f64>,
    pub corrections: Corrections,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeterminantOutput {
    Total(DeterminantResult),
    Channels(ChannelArrays),
}

impl DeterminantOutput {
    pub fn total(&self) -> Option<&DeterminantResult> {
        match self {
            Self::Total(result) => Some(result),
            Self::Channels(_) => None,
        }
    }

    pub fn channels(&self) -> Option<&ChannelArrays> {
        match self {
            Self::Total(_) => None,
            Self::Channels(arrays) => Some(arrays),
        }
    }

    pub fn corrections(&self) -> &Corrections {
        match self {
            Self::Total(result) => &result.corrections,
            Self::Channels(arrays) => &arrays.corrections,
        }
    }

    pub fn extrapolation(&self) -> ExtrapolationBranch {
        self.corrections().extrapolation
    }
}

/// Several species on one background; errors are combined in quadrature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeterminantSum {
    pub value: f64,
    pub error: f64,
    /// One output per species, in input order.
    pub species: Vec<DeterminantOutput>,
}
