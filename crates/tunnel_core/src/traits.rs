use anyhow::Result;

/// A first-order system in the radial coordinate.
pub trait RadialSystem {
    /// Returns the number of state components.
    fn dimension(&self) -> usize;

    /// Evaluates dy/dr.
    /// r: radius
    /// y: current state
    /// out: buffer to write the derivative into
    fn apply(&self, r: f64, y: &[f64], out: &mut [f64]);
}

/// A single embedded Runge-Kutta step with an error estimate.
pub trait EmbeddedStep {
    /// Attempts one step of size h from (r, y). Writes the proposed state
    /// into `next` and the componentwise local error estimate into `error`.
    fn try_step(
        &mut self,
        system: &impl RadialSystem,
        r: f64,
        y: &[f64],
        h: f64,
        next: &mut [f64],
        error: &mut [f64],
    );
}

/// The scalar potential driving the background field.
pub trait Potential: Send + Sync {
    fn value(&self, phi: f64) -> f64;

    /// dV/dφ
    fn first_derivative(&self, phi: f64) -> f64;

    /// d²V/dφ²
    fn second_derivative(&self, phi: f64) -> f64;
}

/// Manifold volume of a named compact Lie group.
pub trait GroupVolumes: Send + Sync {
    /// `name` is a single simple group such as "SU3" or "SO10".
    fn volume(&self, name: &str) -> Result<f64>;
}
