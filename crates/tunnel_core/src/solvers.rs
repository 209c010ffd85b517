use crate::error::DeterminantError;
use crate::traits::{EmbeddedStep, RadialSystem};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Tsitouras 5/4 embedded pair.
pub struct Tsit5 {
    k1: Vec<f64>,
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
    k5: Vec<f64>,
    k6: Vec<f64>,
    k7: Vec<f64>,
    tmp: Vec<f64>,
}

impl Tsit5 {
    pub fn new(dim: usize) -> Self {
        Self {
            k1: vec![0.0; dim],
            k2: vec![0.0; dim],
            k3: vec![0.0; dim],
            k4: vec![0.0; dim],
            k5: vec![0.0; dim],
            k6: vec![0.0; dim],
            k7: vec![0.0; dim],
            tmp: vec![0.0; dim],
        }
    }
}

const C2: f64 = 0.161;
const C3: f64 = 0.327;
const C4: f64 = 0.9;
const C5: f64 = 0.9800255409045097;

const A21: f64 = 0.161;
const A31: f64 = -0.008480655492356989;
const A32: f64 = 0.335480655492357;
const A41: f64 = 2.897153057105493;
const A42: f64 = -6.359448489975075;
const A43: f64 = 4.3622954328695815;
const A51: f64 = 5.325864828439257;
const A52: f64 = -11.748883564062828;
const A53: f64 = 7.4955393428898365;
const A54: f64 = -0.09249506636175525;
const A61: f64 = 5.86145544294642;
const A62: f64 = -12.92096931784711;
const A63: f64 = 8.159367898576159;
const A64: f64 = -0.071584973281401;
const A65: f64 = -0.028269050394068383;

// 5th order weights; the 7th stage sits at the new point.
const B1: f64 = 0.09646076681806523;
const B2: f64 = 0.01;
const B3: f64 = 0.4798896504144996;
const B4: f64 = 1.379008574103742;
const B5: f64 = -3.290069515436081;
const B6: f64 = 2.324710524099774;

// Difference between the 5th and embedded 4th order weights.
const E1: f64 = -0.00178001105222577714;
const E2: f64 = -0.0008164344596567469;
const E3: f64 = 0.007880878010261995;
const E4: f64 = -0.1447110071732629;
const E5: f64 = 0.5823571654525552;
const E6: f64 = -0.45808210592918697;
const E7: f64 = 0.015151515151515152;

impl EmbeddedStep for Tsit5 {
    fn try_step(
        &mut self,
        system: &impl RadialSystem,
        r: f64,
        y: &[f64],
        h: f64,
        next: &mut [f64],
        error: &mut [f64],
    ) {
        let n = y.len();

        system.apply(r, y, &mut self.k1);

        for i in 0..n {
            self.tmp[i] = y[i] + h * A21 * self.k1[i];
        }
        system.apply(r + C2 * h, &self.tmp, &mut self.k2);

        for i in 0..n {
            self.tmp[i] = y[i] + h * (A31 * self.k1[i] + A32 * self.k2[i]);
        }
        system.apply(r + C3 * h, &self.tmp, &mut self.k3);

        for i in 0..n {
            self.tmp[i] = y[i] + h * (A41 * self.k1[i] + A42 * self.k2[i] + A43 * self.k3[i]);
        }
        system.apply(r + C4 * h, &self.tmp, &mut self.k4);

        for i in 0..n {
            self.tmp[i] = y[i]
                + h * (A51 * self.k1[i] + A52 * self.k2[i] + A53 * self.k3[i] + A54 * self.k4[i]);
        }
        system.apply(r + C5 * h, &self.tmp, &mut self.k5);

        for i in 0..n {
            self.tmp[i] = y[i]
                + h * (A61 * self.k1[i]
                    + A62 * self.k2[i]
                    + A63 * self.k3[i]
                    + A64 * self.k4[i]
                    + A65 * self.k5[i]);
        }
        system.apply(r + h, &self.tmp, &mut self.k6);

        for i in 0..n {
            next[i] = y[i]
                + h * (B1 * self.k1[i]
                    + B2 * self.k2[i]
                    + B3 * self.k3[i]
                    + B4 * self.k4[i]
                    + B5 * self.k5[i]
                    + B6 * self.k6[i]);
        }
        system.apply(r + h, next, &mut self.k7);

        for i in 0..n {
            error[i] = h
                * (E1 * self.k1[i]
                    + E2 * self.k2[i]
                    + E3 * self.k3[i]
                    + E4 * self.k4[i]
                    + E5 * self.k5[i]
                    + E6 * self.k6[i]
                    + E7 * self.k7[i]);
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdaptiveSettings {
    pub rtol: f64,
    pub atol: f64,
    pub max_step: f64,
    pub max_steps: usize,
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        Self {
            rtol: 1e-6,
            atol: 1e-12,
            max_step: f64::INFINITY,
            max_steps: 1_000_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Integration {
    pub state: Vec<f64>,
    pub steps: usize,
    /// Local error estimate of the first component on the last accepted step.
    pub last_error: f64,
}

const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 5.0;

/// Integrates `system` from r0 to r1 with step-size control on the RMS of
/// the scaled local error.
pub fn integrate_adaptive(
    system: &impl RadialSystem,
    r0: f64,
    y0: &[f64],
    r1: f64,
    settings: AdaptiveSettings,
) -> Result<Integration> {
    let dim = system.dimension();
    if y0.len() != dim {
        bail!(
            "Initial state dimension mismatch. Expected {}, got {}.",
            dim,
            y0.len()
        );
    }
    if !(r1 > r0) {
        bail!("Integration interval must have r1 > r0.");
    }
    if settings.rtol <= 0.0 || settings.atol < 0.0 {
        bail!("rtol must be positive and atol non-negative.");
    }

    let mut stepper = Tsit5::new(dim);
    let mut y = y0.to_vec();
    let mut next = vec![0.0; dim];
    let mut error = vec![0.0; dim];
    let mut r = r0;
    let mut h = r0.max(1e-3 * (r1 - r0)).min(settings.max_step);
    let mut steps = 0usize;
    let mut last_error = 0.0;

    while r < r1 {
        if steps >= settings.max_steps {
            return Err(DeterminantError::numeric_failure(format!(
                "integrator exceeded {} steps at r = {r}",
                settings.max_steps
            )));
        }
        let last = r + h >= r1;
        if last {
            h = r1 - r;
        }
        stepper.try_step(system, r, &y, h, &mut next, &mut error);

        let mut norm = 0.0;
        for i in 0..dim {
            let scale = settings.atol + settings.rtol * y[i].abs().max(next[i].abs());
            norm += (error[i] / scale).powi(2);
        }
        let norm = (norm / dim as f64).sqrt();
        if !norm.is_finite() || next.iter().any(|v| !v.is_finite()) {
            return Err(DeterminantError::numeric_failure(format!(
                "non-finite state at r = {r}"
            )));
        }

        if norm <= 1.0 {
            r = if last { r1 } else { r + h };
            y.copy_from_slice(&next);
            steps += 1;
            last_error = error[0].abs();
            let factor = if norm > 0.0 {
                (SAFETY * norm.powf(-0.2)).clamp(MIN_FACTOR, MAX_FACTOR)
            } else {
                MAX_FACTOR
            };
            h = (h * factor).min(settings.max_step);
        } else {
            h *= (SAFETY * norm.powf(-0.2)).max(MIN_FACTOR);
        }

        if h < 1e-14 * r.abs().max(f64::MIN_POSITIVE) {
            return Err(DeterminantError::numeric_failure(format!(
                "step size underflow at r = {r}"
            )));
        }
    }

    Ok(Integration {
        state: y,
        steps,
        last_error,
    })
}
