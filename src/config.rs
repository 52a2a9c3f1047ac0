use crate::{
    bounds::WorldBounds,
    engine::{Decomposition, EngineOptions, SimulationEngine},
    error::{Error, Result},
    kernel::{Gravity, Kernel, NoInteraction, Repulsion},
    math::{Float, Vector},
    persistence::QueuePolicy,
    storage::ParticleStore,
};
use rand::{rngs::StdRng, SeedableRng};
use serde::Deserialize;
use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

/// Simulation described in TOML.
///
/// # Example
///
/// ```
/// use particle_box::config::SimulationConfig;
///
/// let config = SimulationConfig::from_toml_str(r#"
///     [world]
///     particles = 500
///     min = [-600.0, -400.0]
///     max = [600.0, 400.0]
///     max_speed = 10.0
///     seed = 7
///
///     [integration]
///     time_step = 0.01
///     damping = 0.15
///     steps = 20
///
///     [kernel]
///     type = "repulsion"
///     epsilon = 1.0
///     sigma = 5.0
///
///     [decomposition]
///     strategy = "grid"
///     threads = 2
///
///     [persistence]
///     queue = { policy = "drop_oldest", capacity = 16 }
/// "#)?;
///
/// let (mut engine, steps) = config.build::<f32, 2>()?;
/// assert_eq!(engine.run(steps.unwrap_or(1))?, 20);
/// assert_eq!(engine.decomposition(), "grid");
/// # Ok::<(), particle_box::Error>(())
/// ```
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationConfig {
    /// Particles and bounds.
    pub world: WorldConfig,
    /// Time stepping.
    #[serde(default)]
    pub integration: IntegrationConfig,
    /// Interaction law.
    #[serde(default)]
    pub kernel: KernelConfig,
    /// Split of the interaction phase.
    #[serde(default)]
    pub decomposition: DecompositionConfig,
    /// Dump of the run.
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// `[world]` section.
///
/// Particles are either loaded from an initial state file or drawn at random inside the
/// bounds.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorldConfig {
    /// Number of random particles.
    pub particles: Option<usize>,
    /// Minimum corner, one value per axis.
    pub min: Option<Vec<f64>>,
    /// Maximum corner, one value per axis.
    pub max: Option<Vec<f64>>,
    /// Bound of every random velocity component.
    pub max_speed: f64,
    /// Mass of every random particle. Random particles have no mass if unset.
    pub mass: Option<f64>,
    /// Seed of the random generator, drawn from the OS if unset.
    pub seed: Option<u64>,
    /// Initial state text file, used instead of random particles.
    pub initial_state: Option<PathBuf>,
    /// Whether every line of the initial state ends with a mass.
    pub initial_state_masses: bool,
}

/// `[integration]` section.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IntegrationConfig {
    /// Duration of a step, taken from the initial state if unset.
    pub time_step: Option<f64>,
    /// Velocity damping coefficient.
    pub damping: f64,
    /// Number of steps to run, taken from the initial state if unset.
    pub steps: Option<u64>,
}

/// `[kernel]` section, tagged by `type`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelConfig {
    /// See [`Gravity`].
    Gravity {
        /// Gravitational constant.
        #[serde(default = "one")]
        g: f64,
        /// Smallest separation used in the force.
        min_distance: Option<f64>,
        /// Maximum interaction radius.
        cutoff: Option<f64>,
    },
    /// See [`Repulsion`].
    Repulsion {
        /// Depth of the potential well.
        #[serde(default = "one")]
        epsilon: f64,
        /// Distance at which the potential is zero.
        sigma: f64,
        /// Smallest separation used in the force.
        min_distance: Option<f64>,
    },
    /// See [`NoInteraction`].
    #[default]
    None,
}

fn one() -> f64 {
    1.0
}

/// Strategy of the `[decomposition]` section.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// See [`Decomposition::Sequential`].
    Sequential,
    /// See [`Decomposition::Flat`].
    #[default]
    Flat,
    /// See [`Decomposition::Grid`].
    Grid,
}

/// `[decomposition]` section.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DecompositionConfig {
    /// Strategy of the interaction phase.
    pub strategy: Strategy,
    /// Number of worker threads.
    pub threads: Option<usize>,
    /// Number of grid cells per axis.
    pub cells: Option<usize>,
}

/// `[persistence]` section.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PersistenceConfig {
    /// Path of the dump, no dump is written if unset.
    pub path: Option<PathBuf>,
    /// Policy of the snapshot queue.
    pub queue: QueuePolicy,
}

/// Particles and world a run starts from.
#[derive(Clone, Debug, PartialEq)]
pub struct InitialConditions<S, const D: usize> {
    /// Particles.
    pub store: ParticleStore<S, D>,
    /// World bounds.
    pub bounds: WorldBounds<S, D>,
    /// Duration of a step.
    pub time_step: S,
    /// Number of steps to run, if known.
    pub steps: Option<u64>,
}

impl SimulationConfig {
    /// Parses a configuration.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Reads and parses a configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        tracing::debug!(path = %path.as_ref().display(), "configuration loaded");
        Self::from_toml_str(&source)
    }

    /// Builds the kernel of the `[kernel]` section.
    pub fn kernel<S: Float, const D: usize>(&self) -> Result<Box<dyn Kernel<S, D>>> {
        let positive = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(S::from_f64(value))
            } else {
                Err(Error::config(format!("kernel {name} must be finite and > 0, got {value}")))
            }
        };

        let kernel: Box<dyn Kernel<S, D>> = match self.kernel {
            KernelConfig::Gravity {
                g,
                min_distance,
                cutoff,
            } => {
                let mut gravity = Gravity::new(positive("g", g)?);
                if let Some(d) = min_distance {
                    gravity = gravity.with_min_distance(positive("min_distance", d)?);
                }
                if let Some(c) = cutoff {
                    gravity = gravity.with_cutoff(positive("cutoff", c)?);
                }
                Box::new(gravity)
            }
            KernelConfig::Repulsion {
                epsilon,
                sigma,
                min_distance,
            } => {
                let mut repulsion =
                    Repulsion::new(positive("epsilon", epsilon)?, positive("sigma", sigma)?);
                if let Some(d) = min_distance {
                    repulsion = repulsion.with_min_distance(positive("min_distance", d)?);
                }
                Box::new(repulsion)
            }
            KernelConfig::None => Box::new(NoInteraction),
        };
        Ok(kernel)
    }

    /// Returns the decomposition of the `[decomposition]` section.
    pub fn decomposition(&self) -> Decomposition {
        match self.decomposition.strategy {
            Strategy::Sequential => Decomposition::Sequential,
            Strategy::Flat => Decomposition::Flat,
            Strategy::Grid => Decomposition::Grid {
                cells: self.decomposition.cells,
            },
        }
    }

    /// Loads or draws the particles and the bounds of the `[world]` section.
    pub fn initial_conditions<S: Float, const D: usize>(&self) -> Result<InitialConditions<S, D>> {
        let world = &self.world;
        let explicit_bounds = match (&world.min, &world.max) {
            (Some(min), Some(max)) => {
                Some(WorldBounds::new(axes(min, "min")?, axes(max, "max")?)?)
            }
            (None, None) => None,
            _ => return Err(Error::config("world bounds need both `min` and `max`")),
        };

        let (store, bounds, header) = match &world.initial_state {
            Some(path) => {
                let file = File::open(path)?;
                let (store, header) = ParticleStore::read_initial_state(
                    BufReader::new(file),
                    world.initial_state_masses,
                )?;
                if world.particles.is_some_and(|n| n != store.len()) {
                    return Err(Error::config(format!(
                        "world declares {:?} particles but the initial state holds {}",
                        world.particles,
                        store.len()
                    )));
                }
                let bounds = match explicit_bounds {
                    Some(bounds) => bounds,
                    None => header.bounds()?,
                };
                tracing::info!(
                    path = %path.display(),
                    particles = store.len(),
                    "initial state loaded"
                );
                (store, bounds, Some(header))
            }
            None => {
                let bounds = explicit_bounds
                    .ok_or_else(|| Error::config("world bounds need both `min` and `max`"))?;
                let count = world.particles.ok_or_else(|| {
                    Error::config("world needs a particle count or an initial state")
                })?;
                let mut rng = match world.seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                };

                let mut store =
                    ParticleStore::random(count, &bounds, S::from_f64(world.max_speed), &mut rng)?;
                if let Some(mass) = world.mass {
                    store = store.with_masses(vec![S::from_f64(mass); count])?;
                }
                (store, bounds, None)
            }
        };

        let time_step = self
            .integration
            .time_step
            .or(header.map(|h| f64::from(h.time_step)))
            .ok_or_else(|| Error::config("integration time step is missing"))?;

        Ok(InitialConditions {
            store,
            bounds,
            time_step: S::from_f64(time_step),
            steps: self.integration.steps.or(header.map(|h| h.num_steps)),
        })
    }

    /// Returns the engine options of the configuration, for the given time step.
    pub fn engine_options<S: Float>(&self, time_step: S) -> EngineOptions<S> {
        let mut options = EngineOptions::new(time_step)
            .with_damping(S::from_f64(self.integration.damping))
            .with_decomposition(self.decomposition())
            .with_queue_policy(self.persistence.queue);
        options.threads = self.decomposition.threads;
        if let Some(path) = &self.persistence.path {
            options = options.with_dump_file(path.clone());
        }
        options
    }

    /// Builds the engine described by the configuration, along with the number of steps to
    /// run if the configuration or the initial state sets one.
    pub fn build<S: Float, const D: usize>(&self) -> Result<(SimulationEngine<S, D>, Option<u64>)> {
        let InitialConditions {
            store,
            bounds,
            time_step,
            steps,
        } = self.initial_conditions()?;
        let kernel = self.kernel()?;
        let engine = SimulationEngine::new(store, bounds, kernel, self.engine_options(time_step))?;
        Ok((engine, steps))
    }
}

fn axes<S: Float, const D: usize>(values: &[f64], name: &str) -> Result<Vector<S, D>> {
    if values.len() != D {
        return Err(Error::config(format!(
            "world `{name}` has {} values for {D} axes",
            values.len()
        )));
    }
    Ok(std::array::from_fn(|k| S::from_f64(values[k])))
}
