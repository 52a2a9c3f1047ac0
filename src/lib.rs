#![warn(missing_docs)]
//! # particle_box
//!
//! particle_box is a bounded-domain N-body particle simulator. It advances the positions and
//! velocities of a fixed set of particles under a pairwise interaction law, reflects them off the
//! walls of the world and can persist the state of every step to a binary dump while the physics
//! loop keeps running.
//!
//! ## Overview
//!
//! A simulation is made of a few pieces that can be used on their own:
//!
//! - [`ParticleStore`] owns the positions, velocities and optional masses of the particles.
//! - A [`Kernel`] is the pairwise physics law. [`Gravity`], [`Repulsion`] and [`NoInteraction`]
//!   are provided, and [`FnKernel`] turns a closure into a kernel.
//! - A [`ForceEvaluator`] applies a kernel to a whole store: [`sequential::BruteForcePairs`] on
//!   one thread, [`parallel::BruteForce`] on a thread pool with a static split of the particles
//!   and [`grid::GridPartition`] on a uniform grid of cells.
//! - [`BoundaryIntegrator`] damps velocities, moves particles with a semi-implicit Euler step and
//!   reflects them off the walls.
//! - [`PersistenceQueue`] hands serialised [`Snapshot`]s to a background writer thread.
//! - [`SimulationEngine`] ties everything together, one [`step`](SimulationEngine::step) at a
//!   time.
//!
//! ## Example
//!
//! ```
//! use particle_box::prelude::*;
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let bounds = WorldBounds::new([-100.0, -100.0], [100.0, 100.0])?;
//! let store = ParticleStore::<f32, 2>::random(256, &bounds, 10.0, &mut StdRng::seed_from_u64(1))?;
//!
//! let options = EngineOptions::new(0.01)
//!     .with_damping(0.15)
//!     .with_decomposition(Decomposition::Grid { cells: None });
//! let mut engine = SimulationEngine::new(store, bounds, Box::new(Repulsion::new(1.0, 5.0)), options)?;
//!
//! engine.run(10)?;
//! let summary = engine.stop()?;
//!
//! assert_eq!(summary.steps, 10);
//! assert!(engine.store().positions().iter().all(|p| bounds.contains(p)));
//! # Ok::<(), particle_box::Error>(())
//! ```
//!
//! ## Custom kernels
//!
//! Implementing [`Interaction<Between<Body<S, D>, Body<S, D>>>`](Interaction) and [`Kernel`] for a
//! type allows it to be used by every evaluator. The interaction returns the force the second
//! body exerts on the first one.
//!
//! ```
//! use particle_box::prelude::*;
//!
//! /// Constant pull towards every other particle, regardless of the distance.
//! struct Cohesion(f64);
//!
//! impl Interaction<Between<Body<f64, 2>, Body<f64, 2>>> for Cohesion {
//!     type Output = [f64; 2];
//!
//!     fn compute(&self, Between(affected, affecting): Between<Body<f64, 2>, Body<f64, 2>>) -> [f64; 2] {
//!         let dx = affecting.position[0] - affected.position[0];
//!         let dy = affecting.position[1] - affected.position[1];
//!         let d = (dx * dx + dy * dy).sqrt().max(1e-6);
//!         [self.0 * dx / d, self.0 * dy / d]
//!     }
//! }
//!
//! impl Kernel<f64, 2> for Cohesion {
//!     fn cutoff(&self) -> Option<f64> {
//!         None
//!     }
//!
//!     fn uses_mass(&self) -> bool {
//!         false
//!     }
//! }
//!
//! let mut store = ParticleStore::new(vec![[0.0, 0.0], [3.0, 4.0]], vec![[0.0; 2]; 2], None)?;
//! store.apply_pairwise(&Cohesion(5.0), 0, 1, 1.0);
//!
//! assert_eq!(store.velocities()[0], [3.0, 4.0]);
//! assert_eq!(store.velocities()[1], [-3.0, -4.0]);
//! # Ok::<(), particle_box::Error>(())
//! ```
//!
//! [`ParticleStore`]: storage::ParticleStore
//! [`Kernel`]: kernel::Kernel
//! [`Gravity`]: kernel::Gravity
//! [`Repulsion`]: kernel::Repulsion
//! [`NoInteraction`]: kernel::NoInteraction
//! [`FnKernel`]: kernel::FnKernel
//! [`BoundaryIntegrator`]: integrator::BoundaryIntegrator
//! [`PersistenceQueue`]: persistence::PersistenceQueue
//! [`Snapshot`]: persistence::Snapshot
//! [`SimulationEngine`]: engine::SimulationEngine

/// World bounds and reflective walls.
pub mod bounds;
/// Loading simulations from TOML configuration.
pub mod config;
/// Simulation engine running the step sequence.
pub mod engine;
/// Crate error type.
pub mod error;
/// Uniform grid partition of the world and the cell-parallel evaluator.
pub mod grid;
/// Damping, semi-implicit Euler integration and wall reflection.
pub mod integrator;
/// Pairwise interaction laws.
pub mod kernel;
/// Scalar and fixed-size vector helpers.
pub mod math;
/// Evaluators that use multiple CPU threads.
pub mod parallel;
/// Snapshot serialisation, dump format and background writer.
pub mod persistence;
/// Evaluators that use one CPU thread.
pub mod sequential;
/// Particle storage.
pub mod storage;

pub use error::{Error, Result};

use kernel::Kernel;
use math::Float;
use storage::ParticleStore;

/// Represents a pair of objects between which an interaction is computed.
///
/// The first object is the one being affected by the second object.
#[derive(Clone, Copy, Debug)]
pub struct Between<S1, S2>(pub S1, pub S2);

/// Trait to compute an interaction between the objects of a storage.
///
/// Kernels implement [`Interaction<Between<Body<S, D>, Body<S, D>>>`] to define the force the
/// second body exerts on the first one.
///
/// [`Interaction<Between<Body<S, D>, Body<S, D>>>`]: Interaction
pub trait Interaction<Storage> {
    /// The computed interaction.
    type Output;

    /// Returns the interaction between the objects in the storage.
    fn compute(&self, storage: Storage) -> Self::Output;
}

/// Strategy applying a [`Kernel`] to every pair of particles of a store.
///
/// An evaluation only changes velocities: it reads positions, velocities and masses, computes the
/// force on every particle and turns it into a velocity change over `dt`. Implementations may use
/// the given thread pool, but must have completed every write when
/// [`interact`](ForceEvaluator::interact) returns.
pub trait ForceEvaluator<S: Float, const D: usize>: Send {
    /// Short name of the strategy.
    fn name(&self) -> &'static str;

    /// Applies the kernel to the particles of the store.
    fn interact(
        &mut self,
        pool: &rayon::ThreadPool,
        store: &mut ParticleStore<S, D>,
        kernel: &dyn Kernel<S, D>,
        dt: S,
    );
}

/// Commonly used types, re-exported.
pub mod prelude {
    pub use crate::{
        bounds::WorldBounds,
        engine::{
            Decomposition, EngineOptions, EngineState, RunSummary, SimulationEngine, StopHandle,
        },
        grid::{Grid, GridPartition},
        integrator::BoundaryIntegrator,
        kernel::{FnKernel, Gravity, Kernel, NoInteraction, Repulsion},
        math::Float,
        parallel::BruteForce,
        persistence::{DumpHeader, DumpReader, PersistenceQueue, QueuePolicy, Snapshot, WriterReport},
        sequential::BruteForcePairs,
        storage::{Body, ParticleStore},
        Between, ForceEvaluator, Interaction,
    };
}
