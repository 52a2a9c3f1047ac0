use crate::{kernel::Kernel, math::Float, storage::ParticleStore, ForceEvaluator};

/// Brute-force [`ForceEvaluator`] using one CPU thread.
///
/// Visits every unordered pair `i < j` once and applies the computed forces to both particles
/// of the pair, so each pair only costs one kernel evaluation. Velocity changes are written
/// in place as the pairs are visited.
#[derive(Clone, Copy, Default, Debug)]
pub struct BruteForcePairs;

impl<S: Float, const D: usize> ForceEvaluator<S, D> for BruteForcePairs {
    fn name(&self) -> &'static str {
        "sequential"
    }

    #[inline]
    fn interact(
        &mut self,
        _: &rayon::ThreadPool,
        store: &mut ParticleStore<S, D>,
        kernel: &dyn Kernel<S, D>,
        dt: S,
    ) {
        let len = store.len();
        for i in 0..len {
            for j in (i + 1)..len {
                store.apply_pairwise(kernel, i, j, dt);
            }
        }
    }
}
