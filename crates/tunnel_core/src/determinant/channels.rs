//! The l ≥ 2 channel loop: how many channels to sum, when to stop early, and
//! the WKB-subtracted log-ratio of each channel.

use crate::error::{DeterminantError, ErrorKind};
use crate::gelfand_yaglom::GelfandYaglom;
use crate::profile::BackgroundProfile;
use crate::species::MassProfile;
use crate::types::{ChannelOutcome, ChannelSeries, Estimate, IvpStatus, MasslessTail};
use crate::wkb::{degeneracy, WkbExpansion};
use anyhow::Result;
use log::{debug, warn};

pub(crate) const NEGATIVE_DETERMINANT: &str =
    "Negative determinant. Choose a smaller lmax or provide a more accurate profile.";

/// ⌊m_max r_mid⌋, the natural number of channels feeling the bubble.
pub fn mass_radius(profile: &BackgroundProfile, masses: &MassProfile) -> usize {
    let w_false = masses.w_false();
    let w_max = masses
        .samples()
        .iter()
        .map(|dw| (dw + w_false).abs())
        .fold(w_false, f64::max);
    (w_max.sqrt() * profile.r_mid()).floor() as usize
}

/// Channel count when none is requested.
pub fn choose_l_max(dim: usize, l_mr: usize) -> usize {
    let (per_mass_radius, minimum) = match dim {
        0..=3 => (3, 25),
        4..=6 => (dim - 1, 30),
        _ => (12, 35),
    };
    let l_max = minimum.max(per_mass_radius * l_mr);
    if l_max > 1000 {
        warn!("l_max = {l_max} > 1000");
    }
    debug!("l_max = {l_max} from l_mR = {l_mr}");
    l_max
}

/// Early exit for an automatically sized channel sum.
#[derive(Debug, Clone, Copy)]
pub struct TruncationWindow {
    threshold: f64,
    width: usize,
}

impl TruncationWindow {
    pub fn new(dim: usize, l_mr: usize) -> Self {
        let (per_mass_radius, width) = match dim {
            0..=3 => (2.5, 15),
            4..=6 => ((dim - 2) as f64, 20),
            _ => (8.0, 30),
        };
        Self {
            threshold: (width as f64).max(per_mass_radius * l_mr as f64),
            width,
        }
    }

    /// Past the threshold, stops once the trailing channels are dominated by
    /// their errors or start growing again.
    pub fn should_stop(&self, l: usize, series: &ChannelSeries) -> bool {
        if !(l as f64 > self.threshold) {
            return false;
        }
        let start = l - self.width / 2;
        let end = l + 1;
        let mid = (start + end) / 2;
        let values = series.values();
        let errors = series.errors();
        let mean_abs = |slice: &[f64]| slice.iter().map(|v| v.abs()).sum::<f64>() / slice.len() as f64;
        let early = mean_abs(&values[start..mid]);
        let late = mean_abs(&values[mid..end]);
        let tail = mean_abs(&values[start..end]);
        let tail_error = mean_abs(&errors[start..end]);
        tail_error > tail || late > early
    }
}

/// Shooting plus WKB subtraction for one species.
pub struct ChannelSolver<'a> {
    gy: &'a GelfandYaglom<'a>,
    wkb: &'a WkbExpansion,
    tail: Option<MasslessTail>,
    dim: usize,
}

impl<'a> ChannelSolver<'a> {
    /// `tail` switches to asymptotic matching beyond the profile.
    pub fn new(
        gy: &'a GelfandYaglom<'a>,
        wkb: &'a WkbExpansion,
        tail: Option<MasslessTail>,
        dim: usize,
    ) -> Self {
        Self { gy, wkb, tail, dim }
    }

    /// ln T_l at R_max, or at infinity when matching. A negative T_∞ is a
    /// `NegativeResult`; everything else that goes wrong is a
    /// `NumericFailure` of this channel.
    pub fn log_ratio(&self, l: usize) -> Result<Estimate> {
        match self.tail {
            None => {
                let solution = self.gy.log_ratio(l);
                if let IvpStatus::Failed(reason) = solution.status {
                    return Err(DeterminantError::numeric_failure(reason));
                }
                Ok(Estimate::new(solution.value, solution.error))
            }
            Some(tail) => {
                let boundary = self.gy.ratio(l);
                if let IvpStatus::Failed(reason) = &boundary.status {
                    return Err(DeterminantError::numeric_failure(reason.clone()));
                }
                let t_inf = self.gy.asymptotic_ratio(l, &boundary, tail)?;
                if t_inf.value < 0.0 {
                    return Err(DeterminantError::negative_result(NEGATIVE_DETERMINANT));
                }
                Ok(Estimate::new(t_inf.value.ln(), t_inf.error / t_inf.value))
            }
        }
    }

    /// ½ deg(d, l) (F_l − F_l^{WKB}), tagged for the loop.
    pub fn channel(&self, l: usize) -> Result<ChannelOutcome> {
        let factor = 0.5 * degeneracy(self.dim, l);
        match self.log_ratio(l) {
            Ok(f) => {
                let wkb = self.wkb.channel(l);
                Ok(ChannelOutcome::classify(
                    factor * (f.value - wkb.value),
                    factor * f.error,
                ))
            }
            Err(err) if DeterminantError::classify(&err) == ErrorKind::NegativeResult => Err(err),
            Err(err) => Ok(ChannelOutcome::Failed {
                reason: format!("{err:#}"),
            }),
        }
    }
}

/// Fills channels 2.. of `series` in order. Returns the new length if the
/// loop stopped early, either through `window` or at a failed channel,
/// which is dropped.
pub fn sum_channels(
    solver: &ChannelSolver<'_>,
    series: &mut ChannelSeries,
    window: Option<TruncationWindow>,
) -> Result<Option<usize>> {
    let mut unstable = 0;
    let mut truncated_at = None;
    for l in 2..series.len() {
        match solver.channel(l)? {
            ChannelOutcome::Ok { value, error } => series.set(l, value, error),
            ChannelOutcome::Unstable { value, error, note } => {
                debug!("l = {l}: {note}");
                unstable += 1;
                series.set(l, value, error);
            }
            ChannelOutcome::Failed { reason } => {
                warn!("truncating the channel sum at l = {l}: {reason}");
                series.truncate(l);
                truncated_at = Some(l);
                break;
            }
        }
        if window.map_or(false, |w| w.should_stop(l, series)) {
            debug!("channel sum converged, truncating at l = {l}");
            series.truncate(l + 1);
            truncated_at = Some(l + 1);
            break;
        }
    }
    if unstable > 0 {
        warn!("{unstable} channels have errors larger than their values");
    }
    Ok(truncated_at)
}

#[cfg(test)]
mod tests {
    use super::{choose_l_max, mass_radius, sum_channels, ChannelSolver, TruncationWindow};
    use crate::gelfand_yaglom::GelfandYaglom;
    use crate::phi_infinity::{find_log_phi_infinity, fit_delta_w_tail};
    use crate::species::{MassProfile, ParticleSpecies};
    use crate::test_support::{gaussian_d4_profile, gaussian_species, power_law_d4_profile};
    use crate::types::{ChannelSeries, DeterminantSettings};
    use crate::wkb::WkbExpansion;

    #[test]
    fn channel_counts() {
        assert_eq!(choose_l_max(3, 4), 25);
        assert_eq!(choose_l_max(3, 10), 30);
        assert_eq!(choose_l_max(4, 20), 60);
        assert_eq!(choose_l_max(8, 2), 35);

        let profile = gaussian_d4_profile(600, 12.0);
        let masses = MassProfile::new(&profile, &gaussian_species()).expect("mass profile");
        // m_max = 1 and r_mid ≈ sqrt(2 ln 2)
        assert_eq!(mass_radius(&profile, &masses), 1);
    }

    #[test]
    fn window_stops_on_noise() {
        let window = TruncationWindow::new(4, 1);
        let mut series = ChannelSeries::with_capacity(40);
        for l in 0..40 {
            series.set(l, 1.0 / ((l + 1) * (l + 1)) as f64, 1e-12);
        }
        assert!(!window.should_stop(20, &series));
        assert!(!window.should_stop(30, &series));
        for l in 15..40 {
            series.set(l, 1e-9, 1e-6);
        }
        assert!(window.should_stop(30, &series));
    }

    #[test]
    fn gaussian_channels_decay() {
        let profile = gaussian_d4_profile(600, 12.0);
        let masses = MassProfile::new(&profile, &gaussian_species()).expect("mass profile");
        let settings = DeterminantSettings::default();
        let gy = GelfandYaglom::new(&profile, &masses, &settings);
        let wkb = WkbExpansion::new(&masses, false, None).expect("expansion");
        let solver = ChannelSolver::new(&gy, &wkb, None, 4);

        let mut series = ChannelSeries::with_capacity(30);
        let truncated = sum_channels(&solver, &mut series, Some(TruncationWindow::new(4, 1)))
            .expect("channel loop");
        let len = truncated.expect("converged channels stop early");
        assert!(len > 20 && len < 30);
        assert_eq!(series.len(), len);
        assert!((series.values()[2] + 0.008_073).abs() < 2e-4);
        assert!(series.values()[10].abs() < 1e-4);
    }

    #[test]
    fn fubini_channels_match_exact_ratios() {
        let profile = power_law_d4_profile(2000, 40.0);
        let species = ParticleSpecies::higgs(&profile);
        let settings = DeterminantSettings {
            gy_tol: 1e-8,
            ..DeterminantSettings::default()
        };
        let log_phi_inf = find_log_phi_infinity(&profile, 1e-3, 0.007).expect("phi_inf");
        let tail = fit_delta_w_tail(&profile, &species, log_phi_inf.value, 0.007).expect("tail");
        let masses = MassProfile::new(&profile, &species).expect("mass profile");
        let gy = GelfandYaglom::new(&profile, &masses, &settings);
        let wkb = WkbExpansion::new(&masses, true, Some(tail)).expect("expansion");
        let solver = ChannelSolver::new(&gy, &wkb, Some(tail), 4);
        for l in [2usize, 5, 8] {
            let lf = l as f64;
            let exact = (lf * (lf - 1.0) / ((lf + 2.0) * (lf + 3.0))).ln();
            let estimate = solver.log_ratio(l).expect("matched channel");
            assert!((estimate.value - exact).abs() < 1e-4, "l = {l}: {}", estimate.value);
        }
    }
}
