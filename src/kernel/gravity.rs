use crate::{
    kernel::{beyond, Kernel},
    math::{self, Float, Vector},
    storage::Body,
    Between, Interaction,
};

/// Newtonian gravitational attraction, `F = g * m1 * m2 / r²` directed towards the affecting
/// body.
///
/// The separation used in the `1 / r²` term is clamped to [`min_distance`](Gravity::min_distance)
/// so that close encounters stay finite. Coincident bodies exert no force on each other.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Gravity<S> {
    /// Gravitational constant.
    pub g: S,
    /// Smallest separation used to compute the magnitude of the force.
    pub min_distance: S,
    /// Maximum interaction radius, infinite if `None`.
    pub cutoff: Option<S>,
}

impl<S: Float> Gravity<S> {
    /// Default value of [`min_distance`](Gravity::min_distance).
    pub const DEFAULT_MIN_DISTANCE: f64 = 1e-3;

    /// Creates a new infinite-range [`Gravity`] kernel with the given gravitational constant.
    #[inline]
    pub fn new(g: S) -> Self {
        Self {
            g,
            min_distance: S::from_f64(Self::DEFAULT_MIN_DISTANCE),
            cutoff: None,
        }
    }

    /// Sets the smallest separation used to compute the magnitude of the force.
    #[inline]
    pub fn with_min_distance(mut self, min_distance: S) -> Self {
        self.min_distance = min_distance;
        self
    }

    /// Sets the maximum interaction radius.
    #[inline]
    pub fn with_cutoff(mut self, cutoff: S) -> Self {
        self.cutoff = Some(cutoff);
        self
    }
}

impl<S: Float, const D: usize> Interaction<Between<Body<S, D>, Body<S, D>>> for Gravity<S> {
    type Output = Vector<S, D>;

    #[inline]
    fn compute(&self, Between(affected, affecting): Between<Body<S, D>, Body<S, D>>) -> Self::Output {
        let dir = math::sub(affecting.position, affected.position);
        let r_squared = math::norm_squared(dir);

        if r_squared == S::ZERO || beyond(r_squared, self.cutoff) {
            return math::zero();
        }

        let r = r_squared.sqrt();
        let clamped = r.max(self.min_distance);
        let magnitude = self.g * (affected.mass * affecting.mass) / (clamped * clamped);

        math::scale(dir, magnitude / r)
    }
}

impl<S: Float, const D: usize> Kernel<S, D> for Gravity<S> {
    #[inline]
    fn cutoff(&self) -> Option<S> {
        self.cutoff
    }

    #[inline]
    fn uses_mass(&self) -> bool {
        true
    }
}
