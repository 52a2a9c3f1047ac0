use crate::{
    bounds::WorldBounds,
    error::{Error, Result},
    kernel::Kernel,
    math::{self, Float, Vector},
    Between,
};
use rand::Rng;
use std::io::Read;

/// Kinematic state of one particle, as seen by an interaction kernel.
///
/// Stores without masses present every body with a mass of one.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Body<S, const D: usize> {
    /// Position of the particle.
    pub position: Vector<S, D>,
    /// Velocity of the particle.
    pub velocity: Vector<S, D>,
    /// Mass of the particle.
    pub mass: S,
}

/// Structure-of-arrays storage owning the state of every simulated particle.
///
/// Particles are identified by their index, which stays stable for the whole run. All particles
/// share the same dimension `D` and either all have a mass or none has.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParticleStore<S, const D: usize> {
    positions: Vec<Vector<S, D>>,
    velocities: Vec<Vector<S, D>>,
    masses: Option<Vec<S>>,
}

impl<S: Float, const D: usize> ParticleStore<S, D> {
    /// Creates a new [`ParticleStore`] from the given positions, velocities and optional masses.
    ///
    /// Fails if the arrays have different lengths, if a component is not finite or if a mass is
    /// not strictly positive.
    pub fn new(
        positions: Vec<Vector<S, D>>,
        velocities: Vec<Vector<S, D>>,
        masses: Option<Vec<S>>,
    ) -> Result<Self> {
        if positions.len() != velocities.len() {
            return Err(Error::config(format!(
                "{} positions given for {} velocities",
                positions.len(),
                velocities.len()
            )));
        }

        let finite = |v: &Vector<S, D>| v.iter().all(|c| c.is_finite());
        if let Some(i) = positions.iter().position(|p| !finite(p)) {
            return Err(Error::config(format!("position of particle {i} is not finite")));
        }
        if let Some(i) = velocities.iter().position(|v| !finite(v)) {
            return Err(Error::config(format!("velocity of particle {i} is not finite")));
        }

        if let Some(masses) = &masses {
            if masses.len() != positions.len() {
                return Err(Error::config(format!(
                    "{} masses given for {} particles",
                    masses.len(),
                    positions.len()
                )));
            }
            if let Some(i) = masses.iter().position(|&m| !(m.is_finite() && m > S::ZERO)) {
                return Err(Error::config(format!(
                    "mass of particle {i} must be finite and > 0, got {:?}",
                    masses[i]
                )));
            }
        }

        Ok(Self {
            positions,
            velocities,
            masses,
        })
    }

    /// Creates a new [`ParticleStore`] of `count` particles placed uniformly at random inside the
    /// bounds, with each velocity component drawn uniformly in `[-max_speed, max_speed]`.
    ///
    /// The generator is passed explicitly so that seeded runs are reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// # use particle_box::prelude::*;
    /// use rand::{rngs::StdRng, SeedableRng};
    ///
    /// let bounds = WorldBounds::new([-100.0, -100.0], [100.0, 100.0])?;
    /// let mut rng = StdRng::seed_from_u64(42);
    /// let store = ParticleStore::<f32, 2>::random(1_000, &bounds, 10.0, &mut rng)?;
    ///
    /// assert_eq!(store.len(), 1_000);
    /// assert!(store.positions().iter().all(|p| bounds.contains(p)));
    /// # Ok::<(), particle_box::Error>(())
    /// ```
    pub fn random<R: Rng>(
        count: usize,
        bounds: &WorldBounds<S, D>,
        max_speed: S,
        rng: &mut R,
    ) -> Result<Self> {
        if !(max_speed.is_finite() && max_speed >= S::ZERO) {
            return Err(Error::config(format!(
                "max speed must be finite and >= 0, got {max_speed:?}"
            )));
        }

        let (min, max) = (bounds.min(), bounds.max());
        let mut positions = Vec::with_capacity(count);
        let mut velocities = Vec::with_capacity(count);

        for _ in 0..count {
            positions.push(std::array::from_fn(|k| rng.gen_range(min[k]..=max[k])));
            velocities.push(std::array::from_fn(|_| rng.gen_range(-max_speed..=max_speed)));
        }

        Ok(Self {
            positions,
            velocities,
            masses: None,
        })
    }

    /// Returns this store with the given masses, one per particle.
    pub fn with_masses(self, masses: Vec<S>) -> Result<Self> {
        Self::new(self.positions, self.velocities, Some(masses))
    }

    /// Reads a store from an initial state text source.
    ///
    /// The source starts with `particle_count num_steps time_step width height`, followed by one
    /// line per particle holding `D` position components, `D` velocity components and, if
    /// `with_mass` is set, the mass of the particle. Values are separated by whitespace.
    ///
    /// # Example
    ///
    /// ```
    /// # use particle_box::prelude::*;
    /// let source = "2 100 0.01 1200 800\n\
    ///               0.0 1.0 0.5 -0.5 10.0\n\
    ///               2.0 -1.0 0.0 0.0 20.0\n";
    ///
    /// let (store, header) = ParticleStore::<f64, 2>::read_initial_state(source.as_bytes(), true)?;
    /// assert_eq!(header.num_steps, 100);
    /// assert_eq!(store.len(), 2);
    /// assert_eq!(store.mass(1), 20.0);
    /// # Ok::<(), particle_box::Error>(())
    /// ```
    pub fn read_initial_state<R: Read>(
        mut reader: R,
        with_mass: bool,
    ) -> Result<(Self, InitialStateHeader)> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        let mut tokens = text.split_whitespace();

        let header = InitialStateHeader {
            particle_count: parse_token(tokens.next(), "particle count")?,
            num_steps: parse_token(tokens.next(), "step count")?,
            time_step: parse_token(tokens.next(), "time step")?,
            width: parse_token(tokens.next(), "world width")?,
            height: parse_token(tokens.next(), "world height")?,
        };

        let count = usize::try_from(header.particle_count)
            .map_err(|_| Error::config("particle count does not fit in memory"))?;
        // Every record takes more than one byte of text.
        let reserved = count.min(text.len());
        let mut positions = Vec::with_capacity(reserved);
        let mut velocities = Vec::with_capacity(reserved);
        let mut masses = with_mass.then(|| Vec::with_capacity(reserved));

        for i in 0..count {
            let mut next = |what: &str| -> Result<S> {
                parse_token(tokens.next(), &format!("{what} of particle {i}"))
            };

            let mut position: Vector<S, D> = math::zero();
            for c in position.iter_mut() {
                *c = next("position")?;
            }
            let mut velocity: Vector<S, D> = math::zero();
            for c in velocity.iter_mut() {
                *c = next("velocity")?;
            }
            if let Some(masses) = masses.as_mut() {
                masses.push(next("mass")?);
            }

            positions.push(position);
            velocities.push(velocity);
        }

        if tokens.next().is_some() {
            return Err(Error::config(format!(
                "initial state holds more than the {count} declared particles"
            )));
        }

        Ok((Self::new(positions, velocities, masses)?, header))
    }

    /// Returns the number of particles.
    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns `true` if the store holds no particle.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Returns the positions of the particles.
    #[inline]
    pub fn positions(&self) -> &[Vector<S, D>] {
        &self.positions
    }

    /// Returns the velocities of the particles.
    #[inline]
    pub fn velocities(&self) -> &[Vector<S, D>] {
        &self.velocities
    }

    /// Returns a mutable reference to the velocities of the particles.
    #[inline]
    pub fn velocities_mut(&mut self) -> &mut [Vector<S, D>] {
        &mut self.velocities
    }

    /// Returns the masses of the particles, if the store has any.
    #[inline]
    pub fn masses(&self) -> Option<&[S]> {
        self.masses.as_deref()
    }

    /// Returns `true` if the particles have masses.
    #[inline]
    pub fn has_masses(&self) -> bool {
        self.masses.is_some()
    }

    /// Returns the mass of the `i`-th particle, one if the store has no masses.
    #[inline]
    pub fn mass(&self, i: usize) -> S {
        self.masses.as_ref().map_or(S::ONE, |m| m[i])
    }

    /// Returns mutable references to both the positions and the velocities of the particles.
    #[inline]
    pub fn kinematics_mut(&mut self) -> (&mut [Vector<S, D>], &mut [Vector<S, D>]) {
        (&mut self.positions, &mut self.velocities)
    }

    /// Returns the `i`-th particle as a [`Body`].
    #[inline]
    pub fn body(&self, i: usize) -> Body<S, D> {
        Body {
            position: self.positions[i],
            velocity: self.velocities[i],
            mass: self.mass(i),
        }
    }

    /// Converts a force applied on the `i`-th particle during `dt` into a velocity change.
    #[inline]
    pub fn velocity_change(&self, i: usize, force: Vector<S, D>, dt: S) -> Vector<S, D> {
        math::scale(force, dt / self.mass(i))
    }

    /// Applies the interaction between the `i`-th and `j`-th particles to both of them.
    ///
    /// The kernel computes the force each particle exerts on the other, which changes their
    /// velocities over `dt`. Positions are left untouched. Nothing happens if `i == j`.
    ///
    /// # Panics
    ///
    /// Panics if `i` or `j` is out of bounds.
    #[inline]
    pub fn apply_pairwise<K>(&mut self, kernel: &K, i: usize, j: usize, dt: S)
    where
        K: Kernel<S, D> + ?Sized,
    {
        if i == j {
            return;
        }

        let (on_i, on_j) = kernel.compute_pair(Between(self.body(i), self.body(j)));
        let dv_i = self.velocity_change(i, on_i, dt);
        let dv_j = self.velocity_change(j, on_j, dt);

        math::add_assign(&mut self.velocities[i], dv_i);
        math::add_assign(&mut self.velocities[j], dv_j);
    }

    /// Returns the total momentum of the particles.
    pub fn momentum(&self) -> Vector<S, D> {
        (0..self.len()).fold(math::zero(), |total, i| {
            math::add(total, math::scale(self.velocities[i], self.mass(i)))
        })
    }
}

fn parse_token<T: std::str::FromStr>(token: Option<&str>, what: &str) -> Result<T> {
    let token = token.ok_or_else(|| Error::config(format!("initial state is missing the {what}")))?;
    token
        .parse()
        .map_err(|_| Error::config(format!("invalid {what} in initial state: {token:?}")))
}

/// Simulation settings stored at the top of an initial state source.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InitialStateHeader {
    /// Number of particles described by the source.
    pub particle_count: u64,
    /// Number of steps to simulate.
    pub num_steps: u64,
    /// Duration of a step.
    pub time_step: f32,
    /// Width of the world.
    pub width: f64,
    /// Height of the world.
    pub height: f64,
}

impl InitialStateHeader {
    /// Returns world bounds centred on the origin with the stored width and height.
    ///
    /// Axes beyond the second reuse the width.
    pub fn bounds<S: Float, const D: usize>(&self) -> Result<WorldBounds<S, D>> {
        WorldBounds::centered(std::array::from_fn(|axis| match axis {
            1 => S::from_f64(self.height),
            _ => S::from_f64(self.width),
        }))
    }
}
