/// The `tunnel_core` crate computes one-loop functional determinants of
/// fluctuations around a radially symmetric bounce, the prefactor of the
/// false vacuum decay rate.
///
/// Key components:
/// - **Profile**: `BackgroundProfile` (sampled bounce plus potential) and `ParticleSpecies` (mass functional, spin, zero modes).
/// - **Gelfand-Yaglom**: per-channel initial value problems for the determinant ratio, integrated with Tsit5.
/// - **WKB & Renormalisation**: large-l asymptotics subtracted channel by channel and the MS-bar counterterm.
/// - **Determinant**: zero-mode removal, channel sum, group volumes, thermal prefactor and extrapolation in l.
/// - **Derivative expansion**: LO and NLO approximation for heavy species.
pub mod traits;
pub mod determinant;
pub mod derivative_expansion;
pub mod error;
pub mod extrapolation;
pub mod gelfand_yaglom;
pub mod group_volume;
pub mod negative_eigenvalue;
pub mod numerics;
pub mod phi_infinity;
pub mod profile;
pub mod renormalisation;
pub mod solvers;
pub mod special;
pub mod species;
pub mod types;
pub mod wkb;

#[cfg(test)]
mod test_support;

pub use determinant::{find_determinant, find_single_determinant};
pub use derivative_expansion::find_derivative_expansion;
pub use error::{DeterminantError, ErrorKind};
pub use profile::{BackgroundProfile, PolynomialPotential};
pub use species::{GaugeGroups, ParticleSpecies, Spin, ZeroModeKind};
pub use types::{DeterminantOutput, DeterminantResult, DeterminantSettings, DeterminantSum};
