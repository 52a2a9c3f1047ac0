use crate::{
    bounds::WorldBounds,
    error::{Error, Result},
    kernel::Kernel,
    math::{self, Float, Vector},
    parallel::row_force,
    storage::ParticleStore,
    ForceEvaluator,
};
use rayon::prelude::*;

/// Uniform grid of cells covering the world bounds.
///
/// Each particle belongs to exactly one cell. Cells are half-open along every axis: a position
/// lying exactly on the boundary between two cells goes to the upper one, except on the `max`
/// wall which belongs to the last cell. Positions outside the bounds are clamped into the border
/// cells.
///
/// The membership of the cells is stored as one array of particle indices sorted by cell, so
/// rebuilding the grid never allocates once it has seen the particle count.
#[derive(Clone, Debug)]
pub struct Grid<S, const D: usize> {
    min: Vector<S, D>,
    cells_per_unit: Vector<S, D>,
    dims: [usize; D],
    cutoff: Option<S>,
    neighbours: Vec<Vec<usize>>,
    cell_of_particle: Vec<usize>,
    order: Vec<usize>,
    starts: Vec<usize>,
    slot: Vec<usize>,
}

impl<S: Float, const D: usize> Grid<S, D> {
    /// Creates a new empty [`Grid`] with `dims[k]` cells along the axis `k`.
    pub fn new(bounds: &WorldBounds<S, D>, dims: [usize; D]) -> Result<Self> {
        if let Some(axis) = dims.iter().position(|&g| g == 0) {
            return Err(Error::config(format!("grid needs at least one cell along axis {axis}")));
        }

        let cell_count = dims
            .iter()
            .try_fold(1usize, |total, &g| total.checked_mul(g))
            .ok_or_else(|| Error::config(format!("grid of {dims:?} cells is too large")))?;

        Ok(Self::with_dims(bounds, dims, cell_count))
    }

    fn with_dims(bounds: &WorldBounds<S, D>, dims: [usize; D], cell_count: usize) -> Self {
        let size = bounds.size();
        let cells_per_unit = std::array::from_fn(|k| S::from_f64(dims[k] as f64) / size[k]);
        let neighbours = (0..cell_count).map(|c| neighbours_of(&dims, c)).collect();

        Self {
            min: *bounds.min(),
            cells_per_unit,
            dims,
            cutoff: None,
            neighbours,
            cell_of_particle: Vec::new(),
            order: Vec::new(),
            starts: vec![0; cell_count + 1],
            slot: Vec::new(),
        }
    }

    /// Creates a new [`Grid`] whose cells are at least as wide as the cutoff along every axis.
    ///
    /// Without a cutoff, or with one larger than the world, the grid has a single cell. The
    /// number of cells along an axis is also capped to the `D`-th root of the particle count so
    /// that cells are not mostly empty. A zero cutoff only applies that cap. A `requested` number
    /// of cells per axis is honoured as long as it keeps the cells wide enough, and never exceeds
    /// the particle count.
    pub fn for_cutoff(
        bounds: &WorldBounds<S, D>,
        cutoff: Option<S>,
        particle_count: usize,
        requested: Option<usize>,
    ) -> Result<Self> {
        if let Some(c) = cutoff {
            if !(c.is_finite() && c >= S::ZERO) {
                return Err(Error::config(format!(
                    "kernel cutoff must be finite and >= 0, got {c:?}"
                )));
            }
        }
        if requested == Some(0) {
            return Err(Error::config("grid needs at least one cell per axis"));
        }

        let balanced = integer_root(particle_count, D as u32).max(1);
        let size = bounds.size();
        let dims = std::array::from_fn(|k| {
            let widest = match cutoff {
                None => 1,
                Some(c) if c == S::ZERO => balanced,
                Some(c) => ((size[k] / c).floor().to_f64() as usize).max(1),
            };

            match requested {
                Some(cells) => cells.min(widest).min(particle_count.max(1)),
                None => balanced.min(widest),
            }
        });

        let mut grid = Self::new(bounds, dims)?;
        grid.cutoff = cutoff;
        Ok(grid)
    }

    /// Returns the number of cells along each axis.
    #[inline]
    pub fn dims(&self) -> [usize; D] {
        self.dims
    }

    /// Returns the total number of cells.
    #[inline]
    pub fn cell_count(&self) -> usize {
        self.neighbours.len()
    }

    /// Returns the cutoff the grid was sized for.
    #[inline]
    pub fn cutoff(&self) -> Option<S> {
        self.cutoff
    }

    /// Returns the index of the cell containing the given position.
    pub fn cell_of(&self, position: &Vector<S, D>) -> usize {
        (0..D).fold(0, |flat, k| {
            let t = ((position[k] - self.min[k]) * self.cells_per_unit[k]).floor().to_f64();
            // NaN and negative values land in the first cell.
            let coord = if t > 0.0 { (t as usize).min(self.dims[k] - 1) } else { 0 };
            flat * self.dims[k] + coord
        })
    }

    /// Clears every cell and buckets the particles by position.
    pub fn rebuild(&mut self, positions: &[Vector<S, D>]) {
        let cells = self.cell_count();
        self.cell_of_particle.clear();
        self.starts.clear();
        self.starts.resize(cells + 1, 0);

        for position in positions {
            let c = self.cell_of(position);
            self.cell_of_particle.push(c);
            self.starts[c + 1] += 1;
        }
        for c in 0..cells {
            self.starts[c + 1] += self.starts[c];
        }

        self.order.resize(positions.len(), 0);
        self.slot.resize(positions.len(), 0);
        let mut cursor = self.starts[..cells].to_vec();
        for (i, &c) in self.cell_of_particle.iter().enumerate() {
            self.order[cursor[c]] = i;
            self.slot[i] = cursor[c];
            cursor[c] += 1;
        }
    }

    /// Returns the indices of the particles of the `c`-th cell, in increasing order.
    ///
    /// # Panics
    ///
    /// Panics if `c` is not a cell of the grid.
    #[inline]
    pub fn cell(&self, c: usize) -> &[usize] {
        &self.order[self.starts[c]..self.starts[c + 1]]
    }

    /// Returns the `c`-th cell and its adjacent cells, in increasing order.
    ///
    /// Cells on the border of the grid have fewer neighbours, the grid does not wrap around.
    #[inline]
    pub fn neighbours(&self, c: usize) -> &[usize] {
        &self.neighbours[c]
    }

    /// Returns the indices of the particles of the `c`-th cell and of its adjacent cells.
    #[inline]
    pub fn neighbourhood(&self, c: usize) -> impl Iterator<Item = usize> + '_ {
        self.neighbours[c]
            .iter()
            .flat_map(move |&n| self.cell(n).iter().copied())
    }
}

/// Largest `r` such that `r^d <= n`.
fn integer_root(n: usize, d: u32) -> usize {
    let fits = |r: usize| r.checked_pow(d).is_some_and(|p| p <= n);
    let mut r = (n as f64).powf(1.0 / d as f64) as usize;
    while r > 0 && !fits(r) {
        r -= 1;
    }
    while fits(r + 1) {
        r += 1;
    }
    r
}

fn neighbours_of<const D: usize>(dims: &[usize; D], cell: usize) -> Vec<usize> {
    let mut coords = [0; D];
    let mut rest = cell;
    for k in (0..D).rev() {
        coords[k] = rest % dims[k];
        rest /= dims[k];
    }

    let combinations = 3usize.pow(D as u32);
    let mut neighbours = Vec::with_capacity(combinations);
    'offsets: for combination in 0..combinations {
        let mut rest = combination;
        let mut flat = 0;
        for k in 0..D {
            let shifted = (coords[k] + rest % 3).checked_sub(1);
            rest /= 3;
            match shifted {
                Some(c) if c < dims[k] => flat = flat * dims[k] + c,
                _ => continue 'offsets,
            }
        }
        neighbours.push(flat);
    }

    neighbours.sort_unstable();
    neighbours
}

/// [`ForceEvaluator`] partitioning the world into a uniform [`Grid`] of cells.
///
/// Every step the grid is rebuilt from the positions, then the cells are evaluated in parallel:
/// each particle only interacts with the particles of its own cell and of the adjacent ones,
/// which covers all its partners since cells are at least as wide as the kernel cutoff. Each
/// task writes the velocity changes of its own cell only. Changes are merged into the velocities
/// after every cell has been evaluated.
///
/// With a cutoff covering the whole world, the grid has one cell and the evaluation gives the
/// same result as [`BruteForce`](crate::parallel::BruteForce).
#[derive(Clone, Debug)]
pub struct GridPartition<S, const D: usize> {
    bounds: WorldBounds<S, D>,
    requested: Option<usize>,
    grid: Option<Grid<S, D>>,
    deltas: Vec<Vector<S, D>>,
}

impl<S: Float, const D: usize> GridPartition<S, D> {
    /// Creates a new [`GridPartition`] over the given bounds.
    ///
    /// The grid is sized on the first evaluation, from the cutoff of the kernel. `cells` sets
    /// the number of cells per axis instead, as long as cells stay wider than the cutoff.
    pub fn new(bounds: WorldBounds<S, D>, cells: Option<usize>) -> Result<Self> {
        if cells == Some(0) {
            return Err(Error::config("grid needs at least one cell per axis"));
        }

        Ok(Self {
            bounds,
            requested: cells,
            grid: None,
            deltas: Vec::new(),
        })
    }

    /// Returns the grid of the last evaluation, if any.
    #[inline]
    pub fn grid(&self) -> Option<&Grid<S, D>> {
        self.grid.as_ref()
    }
}

impl<S: Float, const D: usize> ForceEvaluator<S, D> for GridPartition<S, D> {
    fn name(&self) -> &'static str {
        "grid"
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

        let cutoff = kernel.cutoff();
        let grid = match &mut self.grid {
            Some(grid) if grid.cutoff() == cutoff => grid,
            empty => {
                let grid = Grid::for_cutoff(&self.bounds, cutoff, len, self.requested)
                    .unwrap_or_else(|e| {
                        tracing::warn!("{e}, evaluating on a single cell");
                        let mut grid = Grid::with_dims(&self.bounds, [1; D], 1);
                        grid.cutoff = cutoff;
                        grid
                    });
                tracing::debug!(dims = ?grid.dims(), "grid partition sized");
                empty.insert(grid)
            }
        };

        grid.rebuild(store.positions());

        self.deltas.clear();
        self.deltas.resize(len, math::zero());

        let mut cells = Vec::with_capacity(grid.cell_count());
        let mut rest: &mut [Vector<S, D>] = &mut self.deltas;
        for c in 0..grid.cell_count() {
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(grid.cell(c).len());
            cells.push((c, head));
            rest = tail;
        }

        let grid = &*grid;
        let view = &*store;
        pool.install(|| {
            cells.into_par_iter().for_each(|(c, out)| {
                for (&i, delta) in grid.cell(c).iter().zip(out) {
                    let force = row_force(view, kernel, i, grid.neighbourhood(c));
                    *delta = view.velocity_change(i, force, dt);
                }
            });
        });

        let deltas = &self.deltas;
        let slot = &grid.slot;
        pool.install(|| {
            store
                .velocities_mut()
                .par_iter_mut()
                .enumerate()
                .for_each(|(i, velocity)| math::add_assign(velocity, deltas[slot[i]]));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{kernel::Repulsion, parallel::BruteForce};
    use rand::{rngs::StdRng, SeedableRng};

    fn pool(threads: usize) -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .unwrap()
    }

    fn bounds() -> WorldBounds<f64, 2> {
        WorldBounds::new([0.0, 0.0], [10.0, 10.0]).unwrap()
    }

    #[test]
    fn cells_are_half_open() {
        let grid = Grid::new(&bounds(), [5, 5]).unwrap();

        assert_eq!(grid.cell_of(&[0.0, 0.0]), 0);
        assert_eq!(grid.cell_of(&[1.999, 0.0]), 0);
        assert_eq!(grid.cell_of(&[2.0, 0.0]), 5);
        assert_eq!(grid.cell_of(&[0.0, 2.0]), 1);
        assert_eq!(grid.cell_of(&[10.0, 10.0]), 24);
        assert_eq!(grid.cell_of(&[-3.0, 12.0]), 4);
        assert_eq!(grid.cell_of(&[f64::NAN, 0.0]), 0);
    }

    #[test]
    fn every_particle_in_exactly_one_cell() {
        let mut rng = StdRng::seed_from_u64(9);
        let store = ParticleStore::random(500, &bounds(), 1.0, &mut rng).unwrap();
        let mut grid = Grid::new(&bounds(), [4, 3]).unwrap();
        grid.rebuild(store.positions());

        let mut seen = vec![0; store.len()];
        for c in 0..grid.cell_count() {
            for &i in grid.cell(c) {
                assert_eq!(grid.cell_of(&store.positions()[i]), c);
                seen[i] += 1;
            }
            assert!(grid.cell(c).windows(2).all(|w| w[0] < w[1]));
        }
        assert!(seen.iter().all(|&n| n == 1));

        grid.rebuild(&store.positions()[..10]);
        assert_eq!((0..grid.cell_count()).map(|c| grid.cell(c).len()).sum::<usize>(), 10);
    }

    #[test]
    fn neighbours_do_not_wrap() {
        let grid = Grid::new(&bounds(), [3, 3]).unwrap();
        assert_eq!(grid.neighbours(0), &[0, 1, 3, 4]);
        assert_eq!(grid.neighbours(4), &[0, 1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(grid.neighbours(5), &[1, 2, 4, 5, 7, 8]);

        let grid = WorldBounds::centered([1.0; 3])
            .and_then(|b| Grid::<f32, 3>::new(&b, [3, 3, 3]))
            .unwrap();
        assert_eq!(grid.neighbours(13).len(), 27);
        assert_eq!(grid.neighbours(0).len(), 8);
    }

    #[test]
    fn sized_from_cutoff() {
        let b = bounds();
        assert_eq!(Grid::for_cutoff(&b, None, 10_000, None).unwrap().dims(), [1, 1]);
        assert_eq!(Grid::for_cutoff(&b, Some(20.0), 10_000, None).unwrap().dims(), [1, 1]);
        assert_eq!(Grid::for_cutoff(&b, Some(3.0), 10_000, None).unwrap().dims(), [3, 3]);
        assert_eq!(Grid::for_cutoff(&b, Some(0.1), 16, None).unwrap().dims(), [4, 4]);
        assert_eq!(Grid::for_cutoff(&b, Some(3.0), 10_000, Some(8)).unwrap().dims(), [3, 3]);
        assert_eq!(Grid::for_cutoff(&b, Some(1.0), 10, Some(8)).unwrap().dims(), [8, 8]);
        assert_eq!(Grid::for_cutoff(&b, Some(0.0), 16, None).unwrap().dims(), [4, 4]);
        assert_eq!(Grid::for_cutoff(&b, Some(0.0), 16, Some(100_000)).unwrap().dims(), [4, 4]);
        assert_eq!(Grid::for_cutoff(&b, Some(1e-6), 10, Some(100_000)).unwrap().dims(), [10, 10]);
        assert!(Grid::for_cutoff(&b, Some(-1.0), 10, None).is_err());
        assert!(Grid::for_cutoff(&b, Some(1.0), 10, Some(0)).is_err());

        assert_eq!(integer_root(27, 3), 3);
        assert_eq!(integer_root(26, 3), 2);
        assert_eq!(integer_root(1_000_000, 2), 1000);
        assert_eq!(integer_root(0, 2), 0);
    }

    #[test]
    fn matches_flat_evaluation() {
        let bounds = WorldBounds::centered([100.0, 100.0]).unwrap();
        let mut rng = StdRng::seed_from_u64(21);
        let mut grid = ParticleStore::<f64, 2>::random(400, &bounds, 1.0, &mut rng).unwrap();
        let mut flat = grid.clone();
        let kernel = Repulsion::new(1.0, 6.0);

        let mut partition = GridPartition::new(bounds, None).unwrap();
        partition.interact(&pool(4), &mut grid, &kernel, 0.01);
        BruteForce::new().interact(&pool(4), &mut flat, &kernel, 0.01);

        assert!(partition.grid().unwrap().cell_count() > 1);
        for (a, b) in grid.velocities().iter().zip(flat.velocities()) {
            for k in 0..2 {
                let scale = a[k].abs().max(b[k].abs()).max(1.0);
                assert!((a[k] - b[k]).abs() <= 1e-9 * scale, "{a:?} vs {b:?}");
            }
        }
    }
}
