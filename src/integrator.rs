use crate::{
    bounds::WorldBounds,
    error::{Error, Result},
    math::{self, Float, Vector},
    storage::ParticleStore,
};
use rayon::prelude::*;

/// Advances particles over one time step and keeps them inside the world.
///
/// Integration is a semi-implicit Euler step preceded by a uniform damping of the velocities:
///
/// ```text
/// v = v * (1 - damping * dt)
/// x = x + v * dt
/// ```
///
/// Walls are reflective: a particle found beyond a wall is put back on it and the matching
/// velocity component is negated. Every axis is handled independently.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundaryIntegrator<S> {
    dt: S,
    damping: S,
}

impl<S: Float> BoundaryIntegrator<S> {
    /// Creates a new [`BoundaryIntegrator`] with the given time step and damping coefficient.
    ///
    /// Fails unless `dt > 0`, `damping >= 0` and `damping * dt <= 1`, so that damping never
    /// reverses a velocity.
    pub fn new(dt: S, damping: S) -> Result<Self> {
        if !(dt.is_finite() && dt > S::ZERO) {
            return Err(Error::config(format!("time step must be finite and > 0, got {dt:?}")));
        }
        if !(damping.is_finite() && damping >= S::ZERO) {
            return Err(Error::config(format!(
                "damping must be finite and >= 0, got {damping:?}"
            )));
        }
        if damping * dt > S::ONE {
            return Err(Error::config(format!(
                "damping * time step must be <= 1, got {:?}",
                damping * dt
            )));
        }

        Ok(Self { dt, damping })
    }

    /// Returns the time step.
    #[inline]
    pub fn dt(&self) -> S {
        self.dt
    }

    /// Returns the damping coefficient.
    #[inline]
    pub fn damping(&self) -> S {
        self.damping
    }

    /// Factor applied to every velocity each step, `1 - damping * dt`.
    #[inline]
    pub fn damping_factor(&self) -> S {
        S::ONE - self.damping * self.dt
    }

    /// Damps the velocities and moves every particle along its velocity.
    pub fn integrate<const D: usize>(
        &self,
        pool: &rayon::ThreadPool,
        store: &mut ParticleStore<S, D>,
    ) {
        let factor = self.damping_factor();
        let dt = self.dt;
        let (positions, velocities) = store.kinematics_mut();

        pool.install(|| {
            positions
                .par_iter_mut()
                .zip(velocities.par_iter_mut())
                .for_each(|(position, velocity)| {
                    *velocity = math::scale(*velocity, factor);
                    math::add_assign(position, math::scale(*velocity, dt));
                });
        });
    }

    /// Reflects every particle found beyond a wall of the bounds.
    pub fn enforce_boundaries<const D: usize>(
        &self,
        pool: &rayon::ThreadPool,
        store: &mut ParticleStore<S, D>,
        bounds: &WorldBounds<S, D>,
    ) {
        let (positions, velocities) = store.kinematics_mut();

        pool.install(|| {
            positions
                .par_iter_mut()
                .zip(velocities.par_iter_mut())
                .for_each(|(position, velocity)| reflect(position, velocity, bounds));
        });
    }
}

/// Puts a particle back inside the bounds, negating the velocity component of every axis on
/// which it crossed a wall.
#[inline]
pub fn reflect<S: Float, const D: usize>(
    position: &mut Vector<S, D>,
    velocity: &mut Vector<S, D>,
    bounds: &WorldBounds<S, D>,
) {
    let (min, max) = (bounds.min(), bounds.max());
    for k in 0..D {
        if position[k] < min[k] {
            position[k] = min[k];
            velocity[k] = -velocity[k];
        } else if position[k] > max[k] {
            position[k] = max[k];
            velocity[k] = -velocity[k];
        }
    }
}
