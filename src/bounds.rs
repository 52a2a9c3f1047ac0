use crate::{
    error::{Error, Result},
    math::{Float, Vector},
};

/// Axis-aligned box delimiting the simulated world.
///
/// The bounds are both the range particles are randomly seeded in and the position of the
/// reflective walls. Every axis satisfies `min < max`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorldBounds<S, const D: usize> {
    min: Vector<S, D>,
    max: Vector<S, D>,
}

impl<S: Float, const D: usize> WorldBounds<S, D> {
    /// Creates new [`WorldBounds`] from the given minimum and maximum corners.
    ///
    /// Fails if any axis has `min >= max` or a non-finite value.
    pub fn new(min: Vector<S, D>, max: Vector<S, D>) -> Result<Self> {
        if D == 0 {
            return Err(Error::config("world bounds need at least one axis"));
        }

        for axis in 0..D {
            if !min[axis].is_finite() || !max[axis].is_finite() {
                return Err(Error::config(format!(
                    "bounds of axis {axis} must be finite, got [{:?}, {:?}]",
                    min[axis], max[axis]
                )));
            }
            if min[axis] >= max[axis] {
                return Err(Error::config(format!(
                    "bounds of axis {axis} must satisfy min < max, got [{:?}, {:?}]",
                    min[axis], max[axis]
                )));
            }
        }

        Ok(Self { min, max })
    }

    /// Creates new [`WorldBounds`] centred on the origin with the given size along each axis.
    pub fn centered(size: Vector<S, D>) -> Result<Self> {
        let half = S::from_f64(0.5);
        Self::new(size.map(|s| -(s * half)), size.map(|s| s * half))
    }

    /// Returns the minimum corner.
    #[inline]
    pub const fn min(&self) -> &Vector<S, D> {
        &self.min
    }

    /// Returns the maximum corner.
    #[inline]
    pub const fn max(&self) -> &Vector<S, D> {
        &self.max
    }

    /// Returns the size of the bounds along each axis.
    #[inline]
    pub fn size(&self) -> Vector<S, D> {
        std::array::from_fn(|axis| self.max[axis] - self.min[axis])
    }

    /// Returns `true` if the position lies inside the closed box.
    #[inline]
    pub fn contains(&self, position: &Vector<S, D>) -> bool {
        (0..D).all(|axis| self.min[axis] <= position[axis] && position[axis] <= self.max[axis])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_or_empty_axes() {
        assert!(WorldBounds::new([0.0, 0.0], [1.0, 1.0]).is_ok());
        assert!(WorldBounds::new([0.0, 1.0], [1.0, 1.0]).is_err());
        assert!(WorldBounds::new([2.0f32, 0.0, 0.0], [1.0, 1.0, 1.0]).is_err());
        assert!(WorldBounds::new([0.0, f64::NAN], [1.0, 1.0]).is_err());
    }

    #[test]
    fn centered_bounds() {
        let bounds = WorldBounds::centered([200.0, 100.0]).unwrap();
        assert_eq!(bounds.min(), &[-100.0, -50.0]);
        assert_eq!(bounds.max(), &[100.0, 50.0]);
        assert_eq!(bounds.size(), [200.0, 100.0]);
        assert!(bounds.contains(&[100.0, -50.0]));
        assert!(!bounds.contains(&[100.5, 0.0]));
    }
}
