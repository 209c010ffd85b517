//! One-loop determinants of fluctuating species around a bubble.
//!
//! Per species the channels l = 0, 1 carry the zero modes, l ≥ 2 are shot
//! with Gelfand-Yaglom and subtracted by their WKB asymptotics, whose sum is
//! added back in closed form together with the MS-bar counterterm. The
//! channel series is then extrapolated in l.

pub mod channels;
pub mod zero_modes;

pub use channels::{choose_l_max, mass_radius, TruncationWindow};

use crate::error::DeterminantError;
use crate::extrapolation::extrapolate_channels;
use crate::gelfand_yaglom::GelfandYaglom;
use crate::group_volume::{coset_volume, LieGroupVolumes};
use crate::negative_eigenvalue::find_negative_eigenvalue;
use crate::numerics::compensated_sum;
use crate::phi_infinity::{find_log_phi_infinity, fit_delta_w_tail};
use crate::profile::BackgroundProfile;
use crate::renormalisation::renormalisation_term;
use crate::species::{MassProfile, ParticleSpecies, Spin, ZeroModeKind};
use crate::traits::GroupVolumes;
use crate::types::{
    ChannelArrays, ChannelSeries, Corrections, DeterminantOutput, DeterminantResult,
    DeterminantSettings, DeterminantSum, Estimate,
};
use crate::wkb::{degeneracy, WkbExpansion};
use anyhow::{Context, Result};
use channels::{sum_channels, ChannelSolver};
use log::debug;
use rayon::prelude::*;
use std::f64::consts::PI;
use zero_modes::{
    goldstone_rotation, higgs_dilatation, higgs_translation, origin_curvature, ratio_channel,
};

/// ½ ln of the determinant ratio for one species, with the standard Lie
/// group volume conventions.
pub fn find_single_determinant(
    profile: &BackgroundProfile,
    species: &ParticleSpecies,
    settings: &DeterminantSettings,
) -> Result<DeterminantOutput> {
    find_single_determinant_with_volumes(profile, species, settings, &LieGroupVolumes)
}

pub fn find_single_determinant_with_volumes(
    profile: &BackgroundProfile,
    species: &ParticleSpecies,
    settings: &DeterminantSettings,
    volumes: &dyn GroupVolumes,
) -> Result<DeterminantOutput> {
    settings.validate()?;
    species.validate()?;
    let d = profile.dim();
    let spin_dof = species.spin_dof(d)?;
    if d > 1 && settings.l_max.map_or(false, |l| l < 2) {
        return Err(DeterminantError::configuration(
            "l_max must be at least 2 for d > 1",
        ));
    }

    let masses = MassProfile::new(profile, species)?;
    let massless = profile.is_massless() && masses.is_massless();
    let zero_modes = species.zero_modes();
    let log_phi_inf = if massless || *zero_modes != ZeroModeKind::None {
        Some(
            find_log_phi_infinity(profile, settings.log_phi_inf_tol, settings.tail)
                .context("normalising the zero modes")?,
        )
    } else {
        None
    };
    let phi_inf = || {
        log_phi_inf.ok_or_else(|| DeterminantError::numeric_failure("ln phi_inf was not computed"))
    };
    let gy = GelfandYaglom::new(profile, &masses, settings);
    let mut corrections = Corrections::default();

    let mut series = if d == 1 {
        let mut series = ChannelSeries::with_capacity(1);
        let channel = match zero_modes {
            ZeroModeKind::Higgs => {
                let curvature = origin_curvature(profile)?;
                corrections.approximate_curvature = curvature.approximate;
                higgs_translation(d, phi_inf()?, &curvature)
            }
            ZeroModeKind::Goldstone { .. } => goldstone_rotation(profile, phi_inf()?)?,
            ZeroModeKind::None => ratio_channel(&gy, 1, 1.0, true)?,
        };
        series.set(0, channel.value, channel.error);
        series
    } else {
        let l_mr = mass_radius(profile, &masses);
        let l_max = settings.l_max.unwrap_or_else(|| choose_l_max(d, l_mr));
        let mut series = ChannelSeries::with_capacity(l_max);

        let tail = if massless {
            Some(fit_delta_w_tail(profile, species, phi_inf()?.value, settings.tail)?)
        } else {
            None
        };
        let wkb = WkbExpansion::new(&masses, massless, tail)?;

        let (l0, l1) = match zero_modes {
            ZeroModeKind::Higgs => {
                let curvature = origin_curvature(profile)?;
                corrections.approximate_curvature = curvature.approximate;
                let l0 = if profile.is_scaleless() {
                    higgs_dilatation(profile, phi_inf()?)?
                } else {
                    ratio_channel(&gy, 0, 1.0, true)?
                };
                (l0, higgs_translation(d, phi_inf()?, &curvature))
            }
            ZeroModeKind::Goldstone { .. } => (
                goldstone_rotation(profile, phi_inf()?)?,
                ratio_channel(&gy, 1, degeneracy(d, 1), false)?,
            ),
            ZeroModeKind::None => (
                ratio_channel(&gy, 0, 1.0, false)?,
                ratio_channel(&gy, 1, degeneracy(d, 1), false)?,
            ),
        };
        series.set(0, l0.value, l0.error);
        series.set(1, l1.value, l1.error);

        let solver = ChannelSolver::new(&gy, &wkb, tail, d);
        let window = settings.l_max.is_none().then(|| TruncationWindow::new(d, l_mr));
        corrections.truncated_at = sum_channels(&solver, &mut series, window)?;

        let renorm = renormalisation_term(profile, &masses, &wkb, tail)?;
        let aggregate = wkb.aggregate();
        series.add(
            0,
            renorm.scale_term + aggregate.value,
            renorm.error.hypot(aggregate.error),
        );
        series.scale(spin_dof);
        if species.spin() == Spin::Vector {
            series.add(0, -2.0 * renorm.eps_residue, 0.0);
        }
        debug!(
            "counterterm {:.6e} ± {:.1e}, eps residue {:.6e}",
            renorm.scale_term, renorm.error, renorm.eps_residue
        );
        series
    };

    series.scale(species.internal_dof());

    if let ZeroModeKind::Goldstone {
        gauge_groups: Some(groups),
    } = zero_modes
    {
        let volume = coset_volume(volumes, groups)?;
        series.add(0, -volume.ln(), 0.0);
        corrections.group_volume_applied = true;
    }

    if species.thermal() && *zero_modes == ZeroModeKind::Higgs {
        let eigenvalue = find_negative_eigenvalue(profile, settings.eig_tol)
            .context("thermal prefactor")?;
        let magnitude = eigenvalue.value.abs();
        series.add_linear(
            0,
            -(magnitude.sqrt() / (2.0 * PI)).ln(),
            0.5 * eigenvalue.error / magnitude,
        );
        corrections.thermal_prefactor_applied = true;
    }

    if settings.full {
        return Ok(DeterminantOutput::Channels(ChannelArrays {
            values: series.values().to_vec(),
            errors: series.errors().to_vec(),
            corrections,
        }));
    }
    if d == 1 {
        return Ok(DeterminantOutput::Total(DeterminantResult {
            value: series.values()[0],
            error: series.errors()[0],
            corrections,
        }));
    }

    let (extrapolated, branch) = extrapolate_channels(series.values(), series.errors(), d);
    corrections.extrapolation = branch;
    let channel_error = compensated_sum(series.errors().iter().map(|e| e * e));
    Ok(DeterminantOutput::Total(DeterminantResult {
        value: extrapolated.value,
        error: (channel_error + extrapolated.error * extrapolated.error).sqrt(),
        corrections,
    }))
}

/// Sum of the single-species determinants, evaluated in parallel.
pub fn find_determinant(
    profile: &BackgroundProfile,
    species: &[ParticleSpecies],
    settings: &DeterminantSettings,
) -> Result<DeterminantSum> {
    find_determinant_with_volumes(profile, species, settings, &LieGroupVolumes)
}

pub fn find_determinant_with_volumes(
    profile: &BackgroundProfile,
    species: &[ParticleSpecies],
    settings: &DeterminantSettings,
    volumes: &dyn GroupVolumes,
) -> Result<DeterminantSum> {
    let outputs = species
        .par_iter()
        .enumerate()
        .map(|(i, s)| {
            find_single_determinant_with_volumes(profile, s, settings, volumes)
                .with_context(|| format!("species {i}"))
        })
        .collect::<Result<Vec<_>>>()?;
    let totals: Vec<Estimate> = outputs.iter().map(output_total).collect();
    let value = compensated_sum(totals.iter().map(|t| t.value));
    let error = compensated_sum(totals.iter().map(|t| t.error * t.error)).sqrt();
    Ok(DeterminantSum {
        value,
        error,
        species: outputs,
    })
}

/// A per-channel output counts as its plain partial sum.
fn output_total(output: &DeterminantOutput) -> Estimate {
    match output {
        DeterminantOutput::Total(result) => Estimate::new(result.value, result.error),
        DeterminantOutput::Channels(arrays) => Estimate::new(
            compensated_sum(arrays.values.iter().copied()),
            compensated_sum(arrays.errors.iter().map(|e| e * e)).sqrt(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::{find_determinant, find_single_determinant};
    use crate::error::{DeterminantError, ErrorKind};
    use crate::negative_eigenvalue::find_negative_eigenvalue;
    use crate::phi_infinity::find_log_phi_infinity;
    use crate::species::{GaugeGroups, ParticleSpecies, Spin, ZeroModeKind};
    use crate::test_support::{exact_d1_profile, gaussian_d4_profile, gaussian_species};
    use crate::types::{DeterminantSettings, ExtrapolationBranch};
    use std::f64::consts::PI;

    fn fixed(l_max: usize) -> DeterminantSettings {
        DeterminantSettings {
            l_max: Some(l_max),
            ..DeterminantSettings::default()
        }
    }

    #[test]
    fn gaussian_background_in_four_dimensions() {
        let profile = gaussian_d4_profile(600, 12.0);
        let species = gaussian_species();
        let at_30 = find_single_determinant(&profile, &species, &fixed(30)).expect("l_max = 30");
        let at_30 = *at_30.total().expect("total");
        assert!(at_30.value.is_finite());
        assert!((at_30.value - 0.048_93).abs() < 1e-3, "{}", at_30.value);
        assert!(at_30.error < 1e-2 * at_30.value.abs());
        assert_ne!(at_30.corrections.extrapolation, ExtrapolationBranch::None);
        assert_eq!(at_30.corrections.truncated_at, None);

        let at_60 = find_single_determinant(&profile, &species, &fixed(60)).expect("l_max = 60");
        let at_60 = *at_60.total().expect("total");
        assert!((at_60.value - at_30.value).abs() <= at_30.error.max(at_60.error));
    }

    #[test]
    fn early_truncation_agrees_with_full_sum() {
        let profile = gaussian_d4_profile(600, 12.0);
        let species = gaussian_species();
        let auto = find_single_determinant(&profile, &species, &DeterminantSettings::default())
            .expect("automatic l_max");
        let auto = *auto.total().expect("total");
        let truncated_at = auto.corrections.truncated_at.expect("stops early");
        assert!(truncated_at < 30);

        let full = find_single_determinant(&profile, &species, &fixed(30)).expect("l_max = 30");
        let full = *full.total().expect("total");
        assert!((auto.value - full.value).abs() <= auto.error.max(full.error));
    }

    #[test]
    fn doubling_the_samples_stays_within_error() {
        let species = gaussian_species();
        let coarse = find_single_determinant(&gaussian_d4_profile(600, 12.0), &species, &fixed(30))
            .expect("600 samples");
        let fine = find_single_determinant(&gaussian_d4_profile(1200, 12.0), &species, &fixed(30))
            .expect("1200 samples");
        let coarse = coarse.total().expect("total");
        let fine = fine.total().expect("total");
        assert!((coarse.value - fine.value).abs() <= coarse.error.max(fine.error));
    }

    #[test]
    fn per_channel_output() {
        let profile = gaussian_d4_profile(600, 12.0);
        let settings = DeterminantSettings {
            full: true,
            ..fixed(12)
        };
        let output = find_single_determinant(&profile, &gaussian_species(), &settings)
            .expect("channels");
        let arrays = output.channels().expect("per-channel arrays");
        assert_eq!(arrays.values.len(), 12);
        assert_eq!(arrays.errors.len(), 12);
        assert!(arrays.errors.iter().all(|&e| e >= 0.0));
        assert_eq!(output.extrapolation(), ExtrapolationBranch::None);
        // l = 1: ½ deg ln T_1
        assert!((arrays.values[1] + 0.976_887).abs() < 1e-4);
    }

    #[test]
    fn internal_dof_and_vectors_scale_linearly() {
        let profile = gaussian_d4_profile(600, 12.0);
        let settings = DeterminantSettings {
            full: true,
            ..fixed(10)
        };
        let scalar = find_single_determinant(&profile, &gaussian_species(), &settings)
            .expect("scalar");
        let tripled = find_single_determinant(
            &profile,
            &gaussian_species().with_internal_dof(3.0),
            &settings,
        )
        .expect("three components");
        let scalar = scalar.channels().expect("arrays");
        let tripled = tripled.channels().expect("arrays");
        for (a, b) in scalar.values.iter().zip(&tripled.values) {
            assert!((3.0 * a - b).abs() < 1e-12 * b.abs().max(1.0));
        }

        let vector = find_single_determinant(
            &profile,
            &gaussian_species().with_spin(Spin::Vector),
            &settings,
        )
        .expect("vector");
        let vector = vector.channels().expect("arrays");
        // Channels l ≥ 1 only pick up the d − 1 polarisations; l = 0 also
        // carries the ε residue.
        for l in 1..10 {
            assert!((3.0 * scalar.values[l] - vector.values[l]).abs() < 1e-12);
        }
    }

    #[test]
    fn goldstone_group_volume_is_flagged() {
        let profile = gaussian_d4_profile(600, 12.0);
        let settings = DeterminantSettings {
            full: true,
            ..fixed(8)
        };
        let bare = gaussian_species().with_zero_modes(ZeroModeKind::Goldstone { gauge_groups: None });
        let gauged = gaussian_species().with_zero_modes(ZeroModeKind::Goldstone {
            gauge_groups: Some(GaugeGroups::new("SU2", "U1")),
        });
        let bare = find_single_determinant(&profile, &bare, &settings).expect("no gauge groups");
        let gauged = find_single_determinant(&profile, &gauged, &settings).expect("SU2/U1");
        assert!(!bare.corrections().group_volume_applied);
        assert!(gauged.corrections().group_volume_applied);
        let bare = bare.channels().expect("arrays");
        let gauged = gauged.channels().expect("arrays");
        // Vol(SU2)/Vol(U1) = π
        assert!((bare.values[0] - gauged.values[0] - PI.ln()).abs() < 1e-12);
        assert_eq!(bare.values[1..], gauged.values[1..]);
    }

    #[test]
    fn one_dimensional_bounce_is_a_single_channel() {
        let profile = exact_d1_profile(2000, 20.0);
        let higgs = ParticleSpecies::higgs(&profile);
        let settings = DeterminantSettings::default();
        let result = find_single_determinant(&profile, &higgs, &settings).expect("d = 1");
        let result = *result.total().expect("total");
        let log_phi_inf = find_log_phi_infinity(&profile, settings.log_phi_inf_tol, settings.tail)
            .expect("phi_inf");
        // φ''(0) = V'(1) = −1/2
        let expected = -0.5 * (-0.5 * (2.0 * PI).ln() + log_phi_inf.value + 0.5_f64.ln());
        assert!((result.value - expected).abs() < 1e-12);
        assert_eq!(result.corrections.extrapolation, ExtrapolationBranch::None);
        assert!(!result.corrections.approximate_curvature);

        let full = find_single_determinant(
            &profile,
            &higgs,
            &DeterminantSettings {
                full: true,
                ..settings
            },
        )
        .expect("d = 1 arrays");
        let arrays = full.channels().expect("arrays");
        assert_eq!(arrays.values.len(), 1);
        assert_eq!(arrays.values[0], result.value);
    }

    #[test]
    fn thermal_prefactor_uses_negative_eigenvalue() {
        let profile = exact_d1_profile(2000, 20.0);
        let settings = DeterminantSettings::default();
        let cold = find_single_determinant(&profile, &ParticleSpecies::higgs(&profile), &settings)
            .expect("cold");
        let hot = find_single_determinant(
            &profile,
            &ParticleSpecies::higgs(&profile).with_thermal(true),
            &settings,
        )
        .expect("thermal");
        assert!(hot.corrections().thermal_prefactor_applied);
        assert!(!cold.corrections().thermal_prefactor_applied);
        let eigenvalue = find_negative_eigenvalue(&profile, settings.eig_tol).expect("eigenvalue");
        let shift = -(eigenvalue.value.abs().sqrt() / (2.0 * PI)).ln();
        let cold = cold.total().expect("total");
        let hot = hot.total().expect("total");
        assert!((hot.value - cold.value - shift).abs() < 1e-12);
        assert!((shift + (1.25_f64.sqrt() / (2.0 * PI)).ln()).abs() < 1e-4);
        assert!(hot.error >= cold.error);
    }

    #[test]
    fn invalid_configurations() {
        let profile = exact_d1_profile(200, 20.0);
        let vector = gaussian_species().with_spin(Spin::Vector);
        let err = find_single_determinant(&profile, &vector, &DeterminantSettings::default())
            .expect_err("vectors need d > 1");
        assert_eq!(DeterminantError::classify(&err), ErrorKind::Configuration);

        let profile = gaussian_d4_profile(200, 10.0);
        let err = find_single_determinant(&profile, &gaussian_species(), &fixed(1))
            .expect_err("l_max = 1 in d = 4");
        assert_eq!(DeterminantError::classify(&err), ErrorKind::Configuration);

        let err = find_single_determinant(
            &profile,
            &gaussian_species(),
            &DeterminantSettings {
                gy_tol: -1.0,
                ..DeterminantSettings::default()
            },
        )
        .expect_err("negative tolerance");
        assert!(format!("{err:#}").contains("gy_tol must be positive."));
    }

    #[test]
    fn species_sum_in_quadrature() {
        let profile = gaussian_d4_profile(600, 12.0);
        let species = vec![gaussian_species(), gaussian_species().with_internal_dof(2.0)];
        let sum = find_determinant(&profile, &species, &fixed(30)).expect("two species");
        assert_eq!(sum.species.len(), 2);
        let single = find_single_determinant(&profile, &gaussian_species(), &fixed(30))
            .expect("one species");
        let single = single.total().expect("total");
        assert!((sum.value - 3.0 * single.value).abs() <= sum.error);
        assert!(sum.error >= single.error);
    }
}
