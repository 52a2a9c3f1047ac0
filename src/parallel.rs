use crate::{
    kernel::Kernel,
    math::{self, Float, Vector},
    storage::ParticleStore,
    Between, ForceEvaluator,
};
use rayon::prelude::*;

/// Brute-force [`ForceEvaluator`] using the CPU in parallel with
/// [rayon](https://github.com/rayon-rs/rayon).
///
/// The particles are split into as many contiguous index ranges as the pool has threads. Each
/// task evaluates the full row `j ≠ i` of every particle `i` of its range and only writes the
/// velocity changes of that range, so no two tasks ever touch the same particle. Every pair is
/// evaluated twice, once from each side. Changes are merged into the velocities once all rows
/// are done.
#[derive(Clone, Debug, Default)]
pub struct BruteForce<S, const D: usize> {
    deltas: Vec<Vector<S, D>>,
}

impl<S: Float, const D: usize> BruteForce<S, D> {
    /// Creates a new [`BruteForce`] evaluator.
    #[inline]
    pub fn new() -> Self {
        Self { deltas: Vec::new() }
    }
}

impl<S: Float, const D: usize> ForceEvaluator<S, D> for BruteForce<S, D> {
    fn name(&self) -> &'static str {
        "flat"
    }

    fn interact(
        &mut self,
        pool: &rayon::ThreadPool,
        store: &mut ParticleStore<S, D>,
        kernel: &dyn Kernel<S, D>,
        dt: S,
    ) {
        let len = store.len();
        if len < 2 {
            return;
        }

        self.deltas.clear();
        self.deltas.resize(len, math::zero());
        let range = len.div_ceil(pool.current_num_threads().max(1));

        let view = &*store;
        let deltas = &mut self.deltas;
        pool.install(|| {
            deltas
                .par_chunks_mut(range)
                .enumerate()
                .for_each(|(chunk, out)| {
                    let start = chunk * range;
                    for (offset, delta) in out.iter_mut().enumerate() {
                        let i = start + offset;
                        let force = row_force(view, kernel, i, 0..len);
                        *delta = view.velocity_change(i, force, dt);
                    }
                });
        });

        merge(pool, store, &self.deltas);
    }
}

/// Returns the total force exerted on the `i`-th particle by the `affecting` particles.
///
/// `i` itself is skipped if it appears among them.
#[inline]
pub(crate) fn row_force<S, const D: usize, I>(
    store: &ParticleStore<S, D>,
    kernel: &dyn Kernel<S, D>,
    i: usize,
    affecting: I,
) -> Vector<S, D>
where
    S: Float,
    I: IntoIterator<Item = usize>,
{
    let affected = store.body(i);
    affecting
        .into_iter()
        .filter(|&j| j != i)
        .fold(math::zero(), |force, j| {
            math::add(force, kernel.compute(Between(affected, store.body(j))))
        })
}

/// Adds one velocity change per particle, in parallel.
pub(crate) fn merge<S: Float, const D: usize>(
    pool: &rayon::ThreadPool,
    store: &mut ParticleStore<S, D>,
    deltas: &[Vector<S, D>],
) {
    debug_assert_eq!(deltas.len(), store.len());
    pool.install(|| {
        store
            .velocities_mut()
            .par_iter_mut()
            .zip(deltas.par_iter())
            .for_each(|(velocity, &delta)| math::add_assign(velocity, delta));
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bounds::WorldBounds,
        kernel::{Gravity, Repulsion},
        sequential::BruteForcePairs,
    };
    use rand::{rngs::StdRng, SeedableRng};

    fn pool(threads: usize) -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .unwrap()
    }

    fn random_store(count: usize, seed: u64) -> ParticleStore<f64, 3> {
        let bounds = WorldBounds::centered([50.0; 3]).unwrap();
        let store =
            ParticleStore::random(count, &bounds, 2.0, &mut StdRng::seed_from_u64(seed)).unwrap();
        let masses = (0..count).map(|i| 1.0 + (i % 5) as f64).collect();
        store.with_masses(masses).unwrap()
    }

    #[test]
    fn matches_sequential_pairs() {
        let kernel = Gravity::new(1.0).with_min_distance(0.5);
        let mut flat = random_store(97, 3);
        let mut pairs = flat.clone();

        BruteForce::new().interact(&pool(4), &mut flat, &kernel, 0.01);
        BruteForcePairs.interact(&pool(1), &mut pairs, &kernel, 0.01);

        for (a, b) in flat.velocities().iter().zip(pairs.velocities()) {
            for k in 0..3 {
                assert!((a[k] - b[k]).abs() < 1e-9, "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn independent_of_thread_count() {
        let kernel = Repulsion::new(1.0, 8.0);
        let mut one = random_store(64, 11);
        let mut many = one.clone();
        let mut odd = one.clone();

        BruteForce::new().interact(&pool(1), &mut one, &kernel, 0.01);
        BruteForce::new().interact(&pool(4), &mut many, &kernel, 0.01);
        BruteForce::new().interact(&pool(7), &mut odd, &kernel, 0.01);

        assert_eq!(one, many);
        assert_eq!(one, odd);
    }

    #[test]
    fn conserves_momentum() {
        let mut store = random_store(50, 5);
        let before = store.momentum();

        BruteForce::new().interact(&pool(3), &mut store, &Gravity::new(2.0), 0.05);

        let after = store.momentum();
        for k in 0..3 {
            assert!((after[k] - before[k]).abs() < 1e-9);
        }
    }

    #[test]
    fn fewer_particles_than_threads() {
        let mut store = random_store(3, 1);
        let mut expected = store.clone();

        BruteForce::new().interact(&pool(8), &mut store, &Gravity::new(1.0), 0.1);
        BruteForcePairs.interact(&pool(1), &mut expected, &Gravity::new(1.0), 0.1);

        for (a, b) in store.velocities().iter().zip(expected.velocities()) {
            for k in 0..3 {
                assert!((a[k] - b[k]).abs() < 1e-12);
            }
        }
    }
}
