/// Newtonian gravitational attraction.
pub mod gravity;
/// Short-range Lennard-Jones repulsion.
pub mod repulsion;

pub use gravity::Gravity;
pub use repulsion::Repulsion;

use crate::{
    math::{self, Float, Vector},
    storage::Body,
    Between, Interaction,
};

/// Pairwise physics law applied between two particles of a store.
///
/// The computed value is the force the second (affecting) body exerts on the first (affected)
/// one. The engine turns it into a velocity change with the affected body's mass and the time
/// step. Kernels must stay finite for coincident positions and return zero beyond their
/// [`cutoff`](Kernel::cutoff).
pub trait Kernel<S: Float, const D: usize>:
    Interaction<Between<Body<S, D>, Body<S, D>>, Output = Vector<S, D>> + Send + Sync
{
    /// Maximum interaction radius. `None` means the interaction has an infinite range.
    fn cutoff(&self) -> Option<S>;

    /// Returns `true` if the computed force depends on the masses of the particles.
    ///
    /// Stores simulated with such a kernel persist their masses in the dump.
    fn uses_mass(&self) -> bool;

    /// Returns the forces on both bodies of a pair, `(on affected, on affecting)`.
    ///
    /// The default implementation computes the interaction once and negates it, which is exact
    /// for the antisymmetric laws of this crate.
    #[inline]
    fn compute_pair(&self, pair: Between<Body<S, D>, Body<S, D>>) -> (Vector<S, D>, Vector<S, D>) {
        let force = self.compute(pair);
        (force, math::neg(force))
    }
}

impl<S: Float, const D: usize, K: Kernel<S, D> + ?Sized> Interaction<Between<Body<S, D>, Body<S, D>>>
    for Box<K>
{
    type Output = Vector<S, D>;

    #[inline]
    fn compute(&self, pair: Between<Body<S, D>, Body<S, D>>) -> Self::Output {
        (**self).compute(pair)
    }
}

impl<S: Float, const D: usize, K: Kernel<S, D> + ?Sized> Kernel<S, D> for Box<K> {
    #[inline]
    fn cutoff(&self) -> Option<S> {
        (**self).cutoff()
    }

    #[inline]
    fn uses_mass(&self) -> bool {
        (**self).uses_mass()
    }

    #[inline]
    fn compute_pair(&self, pair: Between<Body<S, D>, Body<S, D>>) -> (Vector<S, D>, Vector<S, D>) {
        (**self).compute_pair(pair)
    }
}

/// Kernel that never changes any velocity.
#[derive(Clone, Copy, Default, Debug)]
pub struct NoInteraction;

impl<S: Float, const D: usize> Interaction<Between<Body<S, D>, Body<S, D>>> for NoInteraction {
    type Output = Vector<S, D>;

    #[inline]
    fn compute(&self, _: Between<Body<S, D>, Body<S, D>>) -> Self::Output {
        math::zero()
    }
}

impl<S: Float, const D: usize> Kernel<S, D> for NoInteraction {
    #[inline]
    fn cutoff(&self) -> Option<S> {
        Some(S::ZERO)
    }

    #[inline]
    fn uses_mass(&self) -> bool {
        false
    }
}

/// Kernel built from a closure computing the force of the affecting body on the affected one.
///
/// # Example
///
/// ```
/// # use particle_box::prelude::*;
/// // Linear spring between every pair of particles.
/// let spring = FnKernel::new(|Between(affected, affecting): Between<Body<f64, 2>, Body<f64, 2>>| {
///     [
///         affecting.position[0] - affected.position[0],
///         affecting.position[1] - affected.position[1],
///     ]
/// });
///
/// let a = Body { position: [0.0, 0.0], velocity: [0.0; 2], mass: 1.0 };
/// let b = Body { position: [2.0, 1.0], velocity: [0.0; 2], mass: 1.0 };
/// assert_eq!(spring.compute(Between(a, b)), [2.0, 1.0]);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct FnKernel<F, S> {
    /// Function computing the force on the affected body.
    pub interaction: F,
    /// Maximum interaction radius.
    pub cutoff: Option<S>,
    /// Whether the function reads the masses of the bodies.
    pub uses_mass: bool,
}

impl<F, S> FnKernel<F, S> {
    /// Creates a new infinite-range [`FnKernel`] that ignores masses.
    #[inline]
    pub const fn new(interaction: F) -> Self {
        Self {
            interaction,
            cutoff: None,
            uses_mass: false,
        }
    }
}

impl<F, S: Float, const D: usize> Interaction<Between<Body<S, D>, Body<S, D>>> for FnKernel<F, S>
where
    F: Fn(Between<Body<S, D>, Body<S, D>>) -> Vector<S, D>,
{
    type Output = Vector<S, D>;

    #[inline]
    fn compute(&self, pair: Between<Body<S, D>, Body<S, D>>) -> Self::Output {
        (self.interaction)(pair)
    }
}

impl<F, S: Float, const D: usize> Kernel<S, D> for FnKernel<F, S>
where
    F: Fn(Between<Body<S, D>, Body<S, D>>) -> Vector<S, D> + Send + Sync,
{
    #[inline]
    fn cutoff(&self) -> Option<S> {
        self.cutoff
    }

    #[inline]
    fn uses_mass(&self) -> bool {
        self.uses_mass
    }
}

/// Returns `true` if the separation `r_squared` lies beyond the optional cutoff.
#[inline]
pub(crate) fn beyond<S: Float>(r_squared: S, cutoff: Option<S>) -> bool {
    cutoff.is_some_and(|c| r_squared > c * c)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn body<const D: usize>(position: [f64; D]) -> Body<f64, D> {
        Body {
            position,
            velocity: [0.0; D],
            mass: 1.0,
        }
    }

    /// Checks that the force on `a` from `b` is the exact opposite of the force on `b` from `a`.
    pub fn assert_antisymmetric<K: Kernel<f64, 3>>(kernel: &K, a: [f64; 3], b: [f64; 3]) {
        let ab = kernel.compute(Between(body(a), body(b)));
        let ba = kernel.compute(Between(body(b), body(a)));
        for k in 0..3 {
            assert_eq!(ab[k], -ba[k], "axis {k}: {ab:?} vs {ba:?}");
        }
    }

    #[test]
    fn no_interaction_is_zero() {
        let force: [f64; 3] = NoInteraction.compute(Between(body([0.0; 3]), body([1.0, 0.0, 0.0])));
        assert_eq!(force, [0.0; 3]);
        assert!(!Kernel::<f64, 3>::uses_mass(&NoInteraction));
    }

    #[test]
    fn boxed_kernel_delegates() {
        let kernel: Box<dyn Kernel<f64, 3>> = Box::new(Gravity::new(1.0));
        assert!(kernel.uses_mass());
        assert_eq!(kernel.cutoff(), None);
        let (on_a, on_b) = kernel.compute_pair(Between(body([0.0; 3]), body([1.0, 0.0, 0.0])));
        assert_eq!(on_a, [1.0, 0.0, 0.0]);
        assert_eq!(on_b, [-1.0, 0.0, 0.0]);
    }

    #[test]
    fn closure_kernel() {
        let mut kernel = FnKernel::new(|Between(a, b): Between<Body<f64, 3>, Body<f64, 3>>| {
            math::sub(b.position, a.position)
        });
        kernel.cutoff = Some(2.0);

        assert_eq!(Kernel::<f64, 3>::cutoff(&kernel), Some(2.0));
        assert_antisymmetric(&kernel, [0.0, 1.0, 2.0], [1.0, -1.0, 0.5]);
    }
}
