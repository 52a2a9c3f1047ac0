use crate::{
    kernel::{beyond, Kernel},
    math::{self, Float, Vector},
    storage::Body,
    Between, Interaction,
};

/// Short-range repulsion following the repulsive branch of the Lennard-Jones potential.
///
/// For a separation `r`, the magnitude of the force is
/// `24 ε / r * (2 (σ / r)^12 - (σ / r)^6)`, pushing the bodies apart. The potential is truncated
/// at its minimum `r = 2^(1/6) σ`, where the force vanishes, so the kernel never attracts.
/// Separations below [`min_distance`](Repulsion::min_distance) are clamped to it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Repulsion<S> {
    /// Depth of the potential well.
    pub epsilon: S,
    /// Distance at which the potential is zero.
    pub sigma: S,
    /// Smallest separation used to compute the magnitude of the force.
    pub min_distance: S,
}

impl<S: Float> Repulsion<S> {
    /// Creates a new [`Repulsion`] kernel with the given well depth and particle size.
    ///
    /// The minimum separation defaults to a tenth of `sigma`.
    #[inline]
    pub fn new(epsilon: S, sigma: S) -> Self {
        Self {
            epsilon,
            sigma,
            min_distance: sigma * S::from_f64(0.1),
        }
    }

    /// Sets the smallest separation used to compute the magnitude of the force.
    #[inline]
    pub fn with_min_distance(mut self, min_distance: S) -> Self {
        self.min_distance = min_distance;
        self
    }

    /// Separation beyond which the force is zero, `2^(1/6) σ`.
    #[inline]
    pub fn range(&self) -> S {
        self.sigma * S::from_f64(2f64.powf(1.0 / 6.0))
    }
}

impl<S: Float, const D: usize> Interaction<Between<Body<S, D>, Body<S, D>>> for Repulsion<S> {
    type Output = Vector<S, D>;

    #[inline]
    fn compute(&self, Between(affected, affecting): Between<Body<S, D>, Body<S, D>>) -> Self::Output {
        let dir = math::sub(affected.position, affecting.position);
        let r_squared = math::norm_squared(dir);

        if r_squared == S::ZERO || beyond(r_squared, Some(self.range())) {
            return math::zero();
        }

        let r = r_squared.sqrt();
        let clamped = r.max(self.min_distance);
        let s2 = (self.sigma * self.sigma) / (clamped * clamped);
        let s6 = s2 * s2 * s2;
        let two = S::ONE + S::ONE;
        let magnitude = S::from_f64(24.0) * self.epsilon / clamped * (two * s6 * s6 - s6);

        math::scale(dir, magnitude.max(S::ZERO) / r)
    }
}

impl<S: Float, const D: usize> Kernel<S, D> for Repulsion<S> {
    #[inline]
    fn cutoff(&self) -> Option<S> {
        Some(self.range())
    }

    #[inline]
    fn uses_mass(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::tests::{assert_antisymmetric, body};

    #[test]
    fn pushes_bodies_apart() {
        let repulsion = Repulsion::new(1.0, 5.0);
        let force = repulsion.compute(Between(body([0.0, 0.0, 0.0]), body([3.0, 0.0, 0.0])));

        assert!(force[0] < 0.0);
        assert_eq!(force[1], 0.0);
        assert_eq!(force[2], 0.0);
    }

    #[test]
    fn vanishes_beyond_range() {
        let repulsion = Repulsion::new(1.0, 5.0);
        let range = repulsion.range();
        let force = repulsion.compute(Between(body([0.0; 3]), body([range * 1.01, 0.0, 0.0])));

        assert_eq!(Kernel::<f64, 3>::cutoff(&repulsion), Some(range));
        assert_eq!(force, [0.0; 3]);
    }

    #[test]
    fn never_attracts() {
        let repulsion = Repulsion::new(2.0, 1.0);
        for i in 1..200 {
            let x = i as f64 * 0.01;
            let force = repulsion.compute(Between(body([0.0; 3]), body([x, 0.0, 0.0])));
            assert!(force[0] <= 0.0, "attractive force {force:?} at {x}");
            assert!(force[0].is_finite());
        }
    }

    #[test]
    fn antisymmetric() {
        assert_antisymmetric(&Repulsion::new(1.0, 1.0), [0.1, 0.2, 0.3], [0.5, 0.1, -0.2]);
    }
}
