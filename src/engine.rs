use crate::{
    bounds::WorldBounds,
    error::{Error, Result},
    grid::GridPartition,
    integrator::BoundaryIntegrator,
    kernel::Kernel,
    math::Float,
    parallel::BruteForce,
    persistence::{DumpHeader, PersistenceQueue, QueuePolicy, Snapshot, WriterReport},
    sequential::BruteForcePairs,
    storage::ParticleStore,
    ForceEvaluator,
};
use std::{
    fmt,
    io::Write,
    num::NonZeroUsize,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// How the interaction phase is split between threads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Decomposition {
    /// Every unordered pair on one thread, see [`BruteForcePairs`].
    Sequential,
    /// Static split of the particle indices between the threads, see [`BruteForce`].
    #[default]
    Flat,
    /// Uniform grid of cells evaluated in parallel, see [`GridPartition`].
    Grid {
        /// Number of cells per axis, derived from the kernel cutoff if `None`.
        cells: Option<usize>,
    },
}

/// Destination of the dump of a run.
pub enum DumpTarget {
    /// File created when the engine starts, truncated if it exists.
    Path(PathBuf),
    /// Any byte sink.
    Writer(Box<dyn Write + Send>),
}

impl fmt::Debug for DumpTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Writer(_) => f.write_str("Writer(..)"),
        }
    }
}

/// Parameters of a [`SimulationEngine`].
#[derive(Debug)]
pub struct EngineOptions<S> {
    /// Duration of a step.
    pub dt: S,
    /// Velocity damping coefficient, velocities are scaled by `1 - damping * dt` every step.
    pub damping: S,
    /// Strategy of the interaction phase.
    pub decomposition: Decomposition,
    /// Number of worker threads, the available parallelism if `None`.
    pub threads: Option<usize>,
    /// Destination of the dump, no dump is written if `None`.
    pub dump: Option<DumpTarget>,
    /// Policy of the persistence queue.
    pub queue_policy: QueuePolicy,
}

impl<S: Float> EngineOptions<S> {
    /// Creates new [`EngineOptions`] with the given time step, no damping, the default
    /// decomposition and no dump.
    pub fn new(dt: S) -> Self {
        Self {
            dt,
            damping: S::ZERO,
            decomposition: Decomposition::default(),
            threads: None,
            dump: None,
            queue_policy: QueuePolicy::default(),
        }
    }

    /// Sets the damping coefficient.
    pub fn with_damping(mut self, damping: S) -> Self {
        self.damping = damping;
        self
    }

    /// Sets the decomposition of the interaction phase.
    pub fn with_decomposition(mut self, decomposition: Decomposition) -> Self {
        self.decomposition = decomposition;
        self
    }

    /// Sets the number of worker threads.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Writes the dump to a file created at `path`.
    pub fn with_dump_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.dump = Some(DumpTarget::Path(path.into()));
        self
    }

    /// Writes the dump to the given sink.
    pub fn with_dump_writer(mut self, writer: impl Write + Send + 'static) -> Self {
        self.dump = Some(DumpTarget::Writer(Box::new(writer)));
        self
    }

    /// Sets the policy of the persistence queue.
    pub fn with_queue_policy(mut self, policy: QueuePolicy) -> Self {
        self.queue_policy = policy;
        self
    }
}

/// Lifecycle of a [`SimulationEngine`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    /// The store is ready, the persistence writer has not been started.
    Created,
    /// The dump has been opened and steps can be executed.
    Running,
    /// The queue has been drained and the writer joined. No more steps can be executed.
    Stopped,
}

/// Shared flag asking a running [`SimulationEngine`] to stop.
///
/// The flag is checked at the top of every step of [`run`](SimulationEngine::run), so the step
/// in flight always completes.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Raises the flag.
    #[inline]
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns `true` once the flag has been raised.
    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Outcome of a stopped [`SimulationEngine`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Number of steps executed.
    pub steps: u64,
    /// Report of the persistence writer, `None` if no dump was written.
    pub persistence: Option<WriterReport>,
}

enum Persistence {
    Disabled,
    Pending(DumpTarget, QueuePolicy),
    Active(PersistenceQueue),
    Finished(RunSummary),
}

/// Advances a [`ParticleStore`] step by step.
///
/// Every step runs four phases in order:
///
/// 1. interaction: the kernel changes the velocities, see [`Decomposition`],
/// 2. integration: velocities are damped and positions updated,
/// 3. boundaries: particles beyond a wall are reflected,
/// 4. persistence: a snapshot of the store is handed to the writer thread.
///
/// All the writes of a phase are complete before the next one starts. The engine exclusively
/// owns the store and the worker pool. Dropping a running engine stops it.
pub struct SimulationEngine<S: Float, const D: usize> {
    store: ParticleStore<S, D>,
    bounds: WorldBounds<S, D>,
    kernel: Box<dyn Kernel<S, D>>,
    integrator: BoundaryIntegrator<S>,
    evaluator: Box<dyn ForceEvaluator<S, D>>,
    pool: rayon::ThreadPool,
    persistence: Persistence,
    with_mass: bool,
    state: EngineState,
    steps: u64,
    stop: StopHandle,
}

impl<S: Float, const D: usize> SimulationEngine<S, D> {
    /// Creates a new [`SimulationEngine`] in the [`Created`](EngineState::Created) state.
    ///
    /// Validates the options and builds the worker pool. The dump is only opened by
    /// [`start`](Self::start).
    pub fn new(
        store: ParticleStore<S, D>,
        bounds: WorldBounds<S, D>,
        kernel: Box<dyn Kernel<S, D>>,
        options: EngineOptions<S>,
    ) -> Result<Self> {
        let integrator = BoundaryIntegrator::new(options.dt, options.damping)?;

        let threads = match (options.decomposition, options.threads) {
            (_, Some(0)) => return Err(Error::config("thread count must be > 0")),
            (Decomposition::Sequential, _) => 1,
            (_, Some(threads)) => threads,
            (_, None) => std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
        };

        let evaluator: Box<dyn ForceEvaluator<S, D>> = match options.decomposition {
            Decomposition::Sequential => Box::new(BruteForcePairs),
            Decomposition::Flat => Box::new(BruteForce::new()),
            Decomposition::Grid { cells } => Box::new(GridPartition::new(bounds, cells)?),
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("particle-box-worker-{i}"))
            .build()?;

        let persistence = match options.dump {
            Some(target) => Persistence::Pending(target, options.queue_policy),
            None => Persistence::Disabled,
        };

        Ok(Self {
            with_mass: kernel.uses_mass(),
            store,
            bounds,
            kernel,
            integrator,
            evaluator,
            pool,
            persistence,
            state: EngineState::Created,
            steps: 0,
            stop: StopHandle::default(),
        })
    }

    /// Opens the dump, writes its header and starts the persistence writer.
    ///
    /// Does nothing if the engine is already running. Called by the first
    /// [`step`](Self::step) if needed.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            EngineState::Running => return Ok(()),
            EngineState::Stopped => return Err(Error::EngineStopped),
            EngineState::Created => {}
        }

        let persistence = std::mem::replace(&mut self.persistence, Persistence::Disabled);
        if let Persistence::Pending(target, policy) = persistence {
            let header = DumpHeader::new(self.store.len(), self.integrator.dt(), &self.bounds);
            let queue = match target {
                DumpTarget::Path(path) => PersistenceQueue::create(path, &header, policy),
                DumpTarget::Writer(writer) => {
                    PersistenceQueue::spawn_with_header(writer, &header, policy)
                }
            };

            match queue {
                Ok(queue) => self.persistence = Persistence::Active(queue),
                Err(e) => {
                    // The dump target is consumed, the engine cannot be restarted.
                    self.state = EngineState::Stopped;
                    tracing::error!(error = %e, "failed to start persistence");
                    return Err(e);
                }
            }
        } else {
            self.persistence = persistence;
        }

        self.state = EngineState::Running;
        tracing::info!(
            particles = self.store.len(),
            dimensions = D,
            decomposition = self.evaluator.name(),
            threads = self.pool.current_num_threads(),
            dump = matches!(self.persistence, Persistence::Active(_)),
            "simulation started"
        );

        Ok(())
    }

    /// Executes one step.
    ///
    /// Starts the engine if it was just created. Fails with [`Error::EngineStopped`] once the
    /// engine has been stopped.
    pub fn step(&mut self) -> Result<()> {
        self.start()?;

        let dt = self.integrator.dt();
        self.evaluator
            .interact(&self.pool, &mut self.store, &*self.kernel, dt);
        self.integrator.integrate(&self.pool, &mut self.store);
        self.integrator
            .enforce_boundaries(&self.pool, &mut self.store, &self.bounds);

        if let Persistence::Active(queue) = &mut self.persistence {
            queue.enqueue(Snapshot::capture(self.steps, &self.store, self.with_mass));
        }

        self.steps += 1;
        tracing::trace!(step = self.steps, "step completed");
        Ok(())
    }

    /// Executes up to `steps` steps, returning how many were executed.
    ///
    /// Returns early if the [`StopHandle`] is raised.
    pub fn run(&mut self, steps: u64) -> Result<u64> {
        self.start()?;

        let mut executed = 0;
        while executed < steps && !self.stop.is_stopped() {
            self.step()?;
            executed += 1;
        }

        tracing::debug!(executed, requested = steps, total = self.steps, "run finished");
        Ok(executed)
    }

    /// Executes steps until the [`StopHandle`] is raised, returning how many were executed.
    pub fn run_until_stopped(&mut self) -> Result<u64> {
        self.start()?;

        let mut executed = 0;
        while !self.stop.is_stopped() {
            self.step()?;
            executed += 1;
        }

        tracing::debug!(executed, total = self.steps, "run finished");
        Ok(executed)
    }

    /// Stops the engine: drains the persistence queue, joins the writer and reports the run.
    ///
    /// The engine cannot execute steps anymore. Stopping an engine twice returns the same
    /// summary without the persistence error, if any.
    pub fn stop(&mut self) -> Result<RunSummary> {
        self.stop.stop();
        self.state = EngineState::Stopped;

        let persistence = match std::mem::replace(&mut self.persistence, Persistence::Disabled) {
            Persistence::Finished(summary) => {
                self.persistence = Persistence::Finished(summary);
                return Ok(summary);
            }
            Persistence::Active(queue) => Some(queue.finish()),
            Persistence::Pending(..) | Persistence::Disabled => None,
        };

        let summary = RunSummary {
            steps: self.steps,
            persistence: persistence.as_ref().and_then(|r| r.as_ref().ok().copied()),
        };
        self.persistence = Persistence::Finished(summary);

        match persistence.transpose() {
            Ok(report) => {
                tracing::info!(steps = self.steps, ?report, "simulation stopped");
                Ok(summary)
            }
            Err(e) => {
                tracing::error!(steps = self.steps, error = %e, "simulation stopped");
                Err(e)
            }
        }
    }

    /// Returns the particles.
    #[inline]
    pub fn store(&self) -> &ParticleStore<S, D> {
        &self.store
    }

    /// Returns the world bounds.
    #[inline]
    pub fn bounds(&self) -> &WorldBounds<S, D> {
        &self.bounds
    }

    /// Returns the interaction kernel.
    #[inline]
    pub fn kernel(&self) -> &dyn Kernel<S, D> {
        &*self.kernel
    }

    /// Returns the integrator.
    #[inline]
    pub fn integrator(&self) -> &BoundaryIntegrator<S> {
        &self.integrator
    }

    /// Returns the name of the decomposition strategy.
    #[inline]
    pub fn decomposition(&self) -> &'static str {
        self.evaluator.name()
    }

    /// Returns the number of worker threads.
    #[inline]
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Returns the lifecycle state.
    #[inline]
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Returns the number of steps executed so far.
    #[inline]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Returns the number of snapshots waiting to be written.
    #[inline]
    pub fn pending_snapshots(&self) -> usize {
        match &self.persistence {
            Persistence::Active(queue) => queue.pending(),
            _ => 0,
        }
    }

    /// Returns a handle able to stop [`run`](Self::run) from another thread.
    #[inline]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }
}

impl<S: Float, const D: usize> Drop for SimulationEngine<S, D> {
    fn drop(&mut self) {
        if self.state != EngineState::Stopped {
            if let Err(e) = self.stop() {
                tracing::error!(error = %e, "failed to stop dropped simulation engine");
            }
        }
    }
}

impl<S: Float, const D: usize> fmt::Debug for SimulationEngine<S, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationEngine")
            .field("particles", &self.store.len())
            .field("bounds", &self.bounds)
            .field("decomposition", &self.evaluator.name())
            .field("state", &self.state)
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        kernel::{Gravity, NoInteraction},
        persistence::{queue::tests::SharedBuffer, DumpReader},
    };

    fn engine(options: EngineOptions<f64>) -> SimulationEngine<f64, 2> {
        let bounds = WorldBounds::new([0.0, 0.0], [10.0, 10.0]).unwrap();
        let store = ParticleStore::new(
            vec![[1.0, 1.0], [5.0, 5.0], [9.0, 2.0]],
            vec![[1.0, 0.0], [0.0, -1.0], [2.0, 2.0]],
            None,
        )
        .unwrap();
        SimulationEngine::new(store, bounds, Box::new(NoInteraction), options).unwrap()
    }

    #[test]
    fn lifecycle() {
        let mut engine = engine(EngineOptions::new(0.1));
        assert_eq!(engine.state(), EngineState::Created);

        engine.step().unwrap();
        assert_eq!(engine.state(), EngineState::Running);
        assert_eq!(engine.steps(), 1);

        assert_eq!(engine.run(4).unwrap(), 4);
        let summary = engine.stop().unwrap();
        assert_eq!(summary, RunSummary { steps: 5, persistence: None });
        assert_eq!(engine.state(), EngineState::Stopped);

        assert!(matches!(engine.step(), Err(Error::EngineStopped)));
        assert!(matches!(engine.run(1), Err(Error::EngineStopped)));
        assert_eq!(engine.stop().unwrap(), summary);
    }

    #[test]
    fn stop_handle_halts_run() {
        let mut engine = engine(EngineOptions::new(0.1));
        let handle = engine.stop_handle();

        assert_eq!(engine.run(3).unwrap(), 3);
        handle.stop();
        assert_eq!(engine.run(100).unwrap(), 0);
        assert_eq!(engine.run_until_stopped().unwrap(), 0);
        assert_eq!(engine.steps(), 3);
    }

    #[test]
    fn rejects_invalid_options() {
        let bounds = WorldBounds::new([0.0, 0.0], [1.0, 1.0]).unwrap();
        let store = || ParticleStore::<f64, 2>::new(vec![[0.5; 2]], vec![[0.0; 2]], None).unwrap();
        let kernel = || Box::new(Gravity::new(1.0));

        let zero_threads = EngineOptions::new(0.1).with_threads(0);
        let zero_cells = EngineOptions::new(0.1).with_decomposition(Decomposition::Grid {
            cells: Some(0),
        });
        let negative_dt = EngineOptions::new(-0.1);

        for options in [zero_threads, zero_cells, negative_dt] {
            let result = SimulationEngine::new(store(), bounds, kernel(), options);
            assert!(matches!(result, Err(Error::Configuration(_))));
        }
    }

    #[test]
    fn empty_store_steps_and_dumps_header_only() {
        let bounds = WorldBounds::new([0.0, 0.0], [1.0, 1.0]).unwrap();
        for decomposition in [
            Decomposition::Sequential,
            Decomposition::Flat,
            Decomposition::Grid { cells: Some(4) },
        ] {
            let sink = SharedBuffer::default();
            let options = EngineOptions::new(0.1)
                .with_threads(2)
                .with_decomposition(decomposition)
                .with_dump_writer(sink.clone());
            let empty = ParticleStore::<f64, 2>::new(vec![], vec![], None).unwrap();
            let mut engine =
                SimulationEngine::new(empty, bounds, Box::new(Gravity::new(1.0)), options).unwrap();

            assert_eq!(engine.run(5).unwrap(), 5);
            assert_eq!(engine.steps(), 5);
            assert!(engine.store().is_empty());

            let report = engine.stop().unwrap().persistence.unwrap();
            assert_eq!(report.snapshots_written, 5);
            assert_eq!(report.bytes_written, 0);

            let bytes = sink.bytes();
            let mut reader = DumpReader::<_, f64, 2>::new(&bytes[..], true).unwrap();
            assert_eq!(reader.header().particle_count, 0);
            assert_eq!(reader.header().max, [1.0, 1.0]);
            assert!(reader.next_frame().unwrap().is_none());
        }
    }

    #[test]
    fn sequential_uses_one_thread() {
        let options = EngineOptions::new(0.1)
            .with_threads(4)
            .with_decomposition(Decomposition::Sequential);
        assert_eq!(engine(options).threads(), 1);
        assert_eq!(engine(EngineOptions::new(0.1).with_threads(3)).threads(), 3);
    }

    #[test]
    fn snapshots_follow_boundary_phase() {
        let sink = SharedBuffer::default();
        let mut engine = engine(EngineOptions::new(1.0).with_dump_writer(sink.clone()));
        engine.run(3).unwrap();
        let summary = engine.stop().unwrap();

        let report = summary.persistence.unwrap();
        assert_eq!(report.snapshots_written, 3);

        let frames = DumpReader::<_, f64, 2>::new(sink.bytes().as_slice(), false)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].positions()[2], [10.0, 4.0]);
        assert_eq!(frames[0].velocities()[2], [-2.0, 2.0]);
        assert_eq!(frames[2], *engine.store());
        for frame in &frames {
            assert!(frame.positions().iter().all(|p| engine.bounds().contains(p)));
        }
    }

    #[test]
    fn drop_drains_the_queue() {
        let sink = SharedBuffer::default();
        {
            let mut engine = engine(EngineOptions::new(0.1).with_dump_writer(sink.clone()));
            engine.run(7).unwrap();
        }

        let bytes = sink.bytes();
        let reader = DumpReader::<_, f64, 2>::new(bytes.as_slice(), false).unwrap();
        assert_eq!(reader.count(), 7);
    }
}
