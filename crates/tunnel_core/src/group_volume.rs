//! Manifold volumes of the classical compact groups, for the normalisation
//! of Goldstone zero modes when a gauge symmetry G breaks to H.

use crate::error::DeterminantError;
use crate::numerics::sphere_area;
use crate::species::GaugeGroups;
use crate::traits::GroupVolumes;
use anyhow::{Context, Result};

/// Volume of the unit sphere S^k.
fn sphere(k: usize) -> f64 {
    sphere_area((k + 1) as f64)
}

/// Volumes built from products of spheres:
/// SO(N) = Π_{k=1}^{N−1} |S^k|, U(N) = Π_{k=1}^{N} |S^{2k−1}|,
/// SU(N) = Π_{k=2}^{N} |S^{2k−1}|, Sp(N) = Π_{k=1}^{N} |S^{4k−1}|.
#[derive(Debug, Clone, Copy, Default)]
pub struct LieGroupVolumes;

impl GroupVolumes for LieGroupVolumes {
    fn volume(&self, name: &str) -> Result<f64> {
        let name = name.trim();
        let split = name
            .find(|c: char| c.is_ascii_digit())
            .ok_or_else(|| unknown_group(name))?;
        let (family, rank) = name.split_at(split);
        let n: usize = rank.parse().map_err(|_| unknown_group(name))?;
        if n == 0 {
            return Err(unknown_group(name));
        }
        let volume = match family.to_ascii_uppercase().as_str() {
            "SO" => (1..n).map(sphere).product(),
            "U" => (1..=n).map(|k| sphere(2 * k - 1)).product(),
            "SU" => (2..=n).map(|k| sphere(2 * k - 1)).product(),
            "SP" => (1..=n).map(|k| sphere(4 * k - 1)).product(),
            _ => return Err(unknown_group(name)),
        };
        Ok(volume)
    }
}

fn unknown_group(name: &str) -> anyhow::Error {
    DeterminantError::configuration(format!("unknown group '{name}'"))
}

/// Volume of a space-separated product such as "SU3 SU2 U1". The empty
/// product is the trivial group.
pub fn product_volume(volumes: &dyn GroupVolumes, groups: &str) -> Result<f64> {
    groups.split_whitespace().try_fold(1.0, |acc, name| {
        let v = volumes
            .volume(name)
            .with_context(|| format!("in group product '{groups}'"))?;
        Ok(acc * v)
    })
}

/// Vol(G/H) = Vol(G) / Vol(H).
pub fn coset_volume(volumes: &dyn GroupVolumes, groups: &GaugeGroups) -> Result<f64> {
    let full = product_volume(volumes, &groups.full)?;
    let unbroken = product_volume(volumes, &groups.unbroken)?;
    let ratio = full / unbroken;
    if !(ratio.is_finite() && ratio > 0.0) {
        return Err(DeterminantError::configuration(format!(
            "coset {}/{} has no finite volume",
            groups.full, groups.unbroken
        )));
    }
    Ok(ratio)
}

#[cfg(test)]
mod tests {
    use super::{coset_volume, product_volume, LieGroupVolumes};
    use crate::error::{DeterminantError, ErrorKind};
    use crate::species::GaugeGroups;
    use crate::traits::GroupVolumes;
    use std::f64::consts::PI;

    #[test]
    fn small_groups() {
        let volumes = LieGroupVolumes;
        let close = |name: &str, expected: f64| {
            let v = volumes.volume(name).expect("known group");
            assert!((v - expected).abs() < 1e-12 * expected, "{name}: {v}");
        };
        close("U1", 2.0 * PI);
        close("SU2", 2.0 * PI * PI);
        close("SO3", 8.0 * PI * PI);
        close("SU1", 1.0);
        close("Sp1", 2.0 * PI * PI);
        close("SU3", 2.0 * PI * PI * PI.powi(3));
    }

    #[test]
    fn products_and_cosets() {
        let volumes = LieGroupVolumes;
        let product = product_volume(&volumes, "SU2 U1").expect("product");
        assert!((product - 4.0 * PI.powi(3)).abs() < 1e-10);
        assert_eq!(product_volume(&volumes, "").expect("trivial"), 1.0);

        let coset = coset_volume(&volumes, &GaugeGroups::new("SU2", "U1")).expect("coset");
        assert!((coset - PI).abs() < 1e-12);
    }

    #[test]
    fn unknown_names_are_configuration_errors() {
        let volumes = LieGroupVolumes;
        for name in ["SX3", "SU", "SU0", "E8"] {
            let err = volumes.volume(name).expect_err(name);
            assert_eq!(DeterminantError::classify(&err), ErrorKind::Configuration);
        }
        let err = product_volume(&volumes, "SU3 G2").expect_err("G2 unsupported");
        assert!(format!("{err:#}").contains("unknown group 'G2'"));
    }
}
