//! Bessel-function primitives evaluated in logarithmic or ratio form, so that
//! large orders and tiny arguments never overflow.
//!
//! The K and Y routines follow Temme's series for |x| < 2 and Steed's
//! continued fractions above, then recur forward in the order.

use anyhow::Result;
use num_complex::Complex;
use statrs::function::gamma::gamma;
use std::f64::consts::PI;

use crate::error::DeterminantError;

const EPS: f64 = 1e-16;
const FPMIN: f64 = 1e-300;
const MAX_ITER: usize = 100_000;
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Below this argument the ratio I_{ν+1}/I_ν is summed as a power series.
const RATIO_SERIES_MAX: f64 = 0.25;
const RATIO_SERIES_TERMS: usize = 7;

/// I_{ν+1}(x) / I_ν(x) for ν >= 0, x >= 0.
pub fn bessel_i_ratio(nu: f64, x: f64) -> Result<f64> {
    if x == 0.0 {
        return Ok(0.0);
    }
    if x < RATIO_SERIES_MAX {
        return Ok(bessel_i_ratio_series(nu, x));
    }
    bessel_i_ratio_fraction(nu, x)
}

/// Power series x Σ c_k x^{2k} from the Riccati equation of the ratio.
pub fn bessel_i_ratio_series(nu: f64, x: f64) -> f64 {
    let mut c = [0.0; RATIO_SERIES_TERMS];
    for k in 0..RATIO_SERIES_TERMS {
        let mut s = if k == 0 { 1.0 } else { 0.0 };
        for i in 0..k {
            s -= c[i] * c[k - 1 - i];
        }
        c[k] = s / (2.0 * k as f64 + 2.0 * nu + 2.0);
    }
    let x2 = x * x;
    x * c.iter().rev().fold(0.0, |acc, &ck| acc * x2 + ck)
}

/// Continued fraction 1/(b1 + 1/(b2 + ...)), b_k = 2(ν+k)/x, modified Lentz.
fn bessel_i_ratio_fraction(nu: f64, x: f64) -> Result<f64> {
    let mut f = FPMIN;
    let mut c = f;
    let mut d = 0.0;
    for k in 1..MAX_ITER {
        let b = 2.0 * (nu + k as f64) / x;
        d = b + d;
        if d == 0.0 {
            d = FPMIN;
        }
        c = b + 1.0 / c;
        if c == 0.0 {
            c = FPMIN;
        }
        d = 1.0 / d;
        let delta = c * d;
        f *= delta;
        if (delta - 1.0).abs() < EPS {
            return Ok(f);
        }
    }
    Err(DeterminantError::numeric_failure(format!(
        "I ratio continued fraction did not converge (nu = {nu}, x = {x})"
    )))
}

/// Temme's Γ combinations for |μ| <= 1/2.
fn temme_gammas(mu: f64) -> (f64, f64, f64, f64) {
    let gampl = 1.0 / gamma(1.0 + mu);
    let gammi = 1.0 / gamma(1.0 - mu);
    let gam1 = if mu.abs() < 1e-3 {
        -EULER_GAMMA + 0.042_002_635_034_095_2 * mu * mu
    } else {
        (gammi - gampl) / (2.0 * mu)
    };
    let gam2 = 0.5 * (gammi + gampl);
    (gam1, gam2, gampl, gammi)
}

fn sinh_ratio(e: f64) -> f64 {
    if e.abs() < EPS {
        1.0
    } else {
        e.sinh() / e
    }
}

fn pi_ratio(pimu: f64) -> f64 {
    if pimu.abs() < EPS {
        1.0
    } else {
        pimu / pimu.sin()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogBesselK {
    /// ln K_ν(x)
    pub log_value: f64,
    /// K_{ν+1}(x) / K_ν(x)
    pub ratio: f64,
}

/// ln K_ν(x) and K_{ν+1}/K_ν for real ν (K is even in ν), x > 0.
pub fn log_bessel_k(nu: f64, x: f64) -> Result<LogBesselK> {
    if !(x > 0.0) {
        return Err(DeterminantError::numeric_failure(format!(
            "log_bessel_k needs x > 0, got {x}"
        )));
    }
    let nu = nu.abs();
    let nl = (nu + 0.5).floor() as usize;
    let mu = nu - nl as f64;
    let mu2 = mu * mu;
    let xi = 1.0 / x;

    let (mut log_k, mut ratio) = if x < 2.0 {
        let x2 = 0.5 * x;
        let fact = pi_ratio(PI * mu);
        let d = -x2.ln();
        let e = mu * d;
        let fact2 = sinh_ratio(e);
        let (gam1, gam2, gampl, gammi) = temme_gammas(mu);
        let mut ff = fact * (gam1 * e.cosh() + gam2 * fact2 * d);
        let mut sum = ff;
        let e = e.exp();
        let mut p = 0.5 * e / gampl;
        let mut q = 0.5 / (e * gammi);
        let mut c = 1.0;
        let dd = x2 * x2;
        let mut sum1 = p;
        let mut converged = false;
        for i in 1..MAX_ITER {
            let fi = i as f64;
            ff = (fi * ff + p + q) / (fi * fi - mu2);
            c *= dd / fi;
            p /= fi - mu;
            q /= fi + mu;
            let del = c * ff;
            sum += del;
            sum1 += c * (p - fi * ff);
            if del.abs() < sum.abs() * EPS {
                converged = true;
                break;
            }
        }
        if !converged {
            return Err(DeterminantError::numeric_failure(format!(
                "K series did not converge (nu = {nu}, x = {x})"
            )));
        }
        (sum.ln(), sum1 * 2.0 * xi / sum)
    } else {
        let mut b = 2.0 * (1.0 + x);
        let mut d = 1.0 / b;
        let mut h = d;
        let mut delh = d;
        let mut q1 = 0.0;
        let mut q2 = 1.0;
        let a1 = 0.25 - mu2;
        let mut q = a1;
        let mut c = a1;
        let mut a = -a1;
        let mut s = 1.0 + q * delh;
        let mut converged = false;
        for i in 2..MAX_ITER {
            let fi = i as f64;
            a -= 2.0 * (fi - 1.0);
            c = -a * c / fi;
            let qnew = (q1 - b * q2) / a;
            q1 = q2;
            q2 = qnew;
            q += c * qnew;
            b += 2.0;
            d = 1.0 / (b + a * d);
            delh = (b * d - 1.0) * delh;
            h += delh;
            let ds = q * delh;
            s += ds;
            if (ds / s).abs() < EPS {
                converged = true;
                break;
            }
        }
        if !converged {
            return Err(DeterminantError::numeric_failure(format!(
                "K continued fraction did not converge (nu = {nu}, x = {x})"
            )));
        }
        h *= a1;
        (
            0.5 * (PI / (2.0 * x)).ln() - x - s.ln(),
            (mu + x + 0.5 - h) * xi,
        )
    };

    let mut order = mu;
    for _ in 0..nl {
        log_k += ratio.ln();
        ratio = 2.0 * (order + 1.0) * xi + 1.0 / ratio;
        order += 1.0;
    }
    Ok(LogBesselK {
        log_value: log_k,
        ratio,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BesselJY {
    /// J_{ν+1}(x) / J_ν(x)
    pub j_ratio: f64,
    /// ln |Y_ν(x)|
    pub log_abs_y: f64,
    /// sign of Y_ν(x)
    pub y_sign: f64,
    /// Y_{ν+1}(x) / Y_ν(x)
    pub y_ratio: f64,
}

/// Ratios of ordinary Bessel functions and ln|Y_ν| for ν >= 0, x > 0.
pub fn bessel_jy(nu: f64, x: f64) -> Result<BesselJY> {
    if !(x > 0.0) || nu < 0.0 {
        return Err(DeterminantError::numeric_failure(format!(
            "bessel_jy needs nu >= 0 and x > 0, got nu = {nu}, x = {x}"
        )));
    }
    let nl = if x < 2.0 {
        (nu + 0.5).floor() as usize
    } else {
        (nu - x + 1.5).floor().max(0.0) as usize
    };
    let mu = nu - nl as f64;
    let mu2 = mu * mu;
    let xi = 1.0 / x;
    let xi2 = 2.0 * xi;
    let w = xi2 / PI;

    // CF1: J'_ν/J_ν at the requested order.
    let mut isign = 1.0;
    let mut h = (nu * xi).max(FPMIN);
    let mut b = xi2 * nu;
    let mut d = 0.0;
    let mut c = h;
    let mut converged = false;
    for _ in 1..MAX_ITER {
        b += xi2;
        d = b - d;
        if d.abs() < FPMIN {
            d = FPMIN;
        }
        c = b - 1.0 / c;
        if c.abs() < FPMIN {
            c = FPMIN;
        }
        d = 1.0 / d;
        let del = c * d;
        h *= del;
        if d < 0.0 {
            isign = -isign;
        }
        if (del - 1.0).abs() < EPS {
            converged = true;
            break;
        }
    }
    if !converged {
        return Err(DeterminantError::numeric_failure(format!(
            "J continued fraction did not converge (nu = {nu}, x = {x})"
        )));
    }
    let j_ratio = nu * xi - h;

    // Downward recurrence of J to order μ.
    let mut rjl = isign * FPMIN;
    let mut rjpl = h * rjl;
    let mut fact = nu * xi;
    for _ in 0..nl {
        let t = fact * rjl + rjpl;
        fact -= xi;
        rjpl = fact * t - rjl;
        rjl = t;
    }
    if rjl == 0.0 {
        rjl = EPS;
    }
    let f = rjpl / rjl;

    let (ymu, y1) = if x < 2.0 {
        let x2 = 0.5 * x;
        let pimu = PI * mu;
        let fact = pi_ratio(pimu);
        let d = -x2.ln();
        let e = mu * d;
        let fact2 = sinh_ratio(e);
        let (gam1, gam2, gampl, gammi) = temme_gammas(mu);
        let mut ff = 2.0 / PI * fact * (gam1 * e.cosh() + gam2 * fact2 * d);
        let e = e.exp();
        let mut p = e / (gampl * PI);
        let mut q = 1.0 / (e * PI * gammi);
        let pimu2 = 0.5 * pimu;
        let fact3 = if pimu2.abs() < EPS {
            1.0
        } else {
            pimu2.sin() / pimu2
        };
        let r = PI * pimu2 * fact3 * fact3;
        let mut c = 1.0;
        let dd = -x2 * x2;
        let mut sum = ff + r * q;
        let mut sum1 = p;
        let mut converged = false;
        for i in 1..MAX_ITER {
            let fi = i as f64;
            ff = (fi * ff + p + q) / (fi * fi - mu2);
            c *= dd / fi;
            p /= fi - mu;
            q /= fi + mu;
            let del = c * (ff + r * q);
            sum += del;
            sum1 += c * p - fi * del;
            if del.abs() < (1.0 + sum.abs()) * EPS {
                converged = true;
                break;
            }
        }
        if !converged {
            return Err(DeterminantError::numeric_failure(format!(
                "Y series did not converge (nu = {nu}, x = {x})"
            )));
        }
        (-sum, -sum1 * xi2)
    } else {
        // CF2: p + iq = (J' + iY')/(J + iY), complex modified Lentz.
        let mut a = 0.25 - mu2;
        let mut pq = Complex::new(-0.5 * xi, 1.0);
        let mut b = Complex::new(2.0 * x, 2.0);
        let mut c = b + Complex::i() * a * xi / pq;
        let mut d = b.inv();
        pq *= c * d;
        let mut converged = false;
        for i in 2..MAX_ITER {
            a += 2.0 * (i as f64 - 1.0);
            b += Complex::new(0.0, 2.0);
            d = d * a + b;
            if d.l1_norm() < FPMIN {
                d = Complex::new(FPMIN, 0.0);
            }
            c = b + c.inv() * a;
            if c.l1_norm() < FPMIN {
                c = Complex::new(FPMIN, 0.0);
            }
            d = d.inv();
            let dl = c * d;
            pq *= dl;
            if (dl.re - 1.0).abs() + dl.im.abs() < EPS {
                converged = true;
                break;
            }
        }
        if !converged {
            return Err(DeterminantError::numeric_failure(format!(
                "Y continued fraction did not converge (nu = {nu}, x = {x})"
            )));
        }
        let (p, q) = (pq.re, pq.im);
        let gam = (p - f) / q;
        let rjmu = (w / ((p - f) * gam + q)).sqrt().copysign(rjl);
        let ymu = rjmu * gam;
        let ymup = ymu * (p + q / gam);
        (ymu, mu * xi * ymu - ymup)
    };

    let mut log_abs_y = ymu.abs().ln();
    let mut y_sign = ymu.signum();
    let mut ratio = y1 / ymu;
    let mut order = mu;
    for _ in 0..nl {
        log_abs_y += ratio.abs().ln();
        if ratio < 0.0 {
            y_sign = -y_sign;
        }
        ratio = 2.0 * (order + 1.0) * xi - 1.0 / ratio;
        order += 1.0;
    }
    Ok(BesselJY {
        j_ratio,
        log_abs_y,
        y_sign,
        y_ratio: ratio,
    })
}
