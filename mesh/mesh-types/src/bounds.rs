//! Axis-aligned bounding box.

use nalgebra::{Point3, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An axis-aligned bounding box (AABB).
///
/// Represents a 3D box aligned with the coordinate axes, defined by
/// minimum and maximum corner points. Used both for mesh extents (virtual
/// domain sizing) and as the node volume of spatial indices.
///
/// # Example
///
/// ```
/// use mesh_types::{Aabb, Point3};
///
/// let aabb = Aabb::new(
///     Point3::new(0.0, 0.0, 0.0),
///     Point3::new(3.0, 4.0, 0.0),
/// );
///
/// assert!((aabb.diagonal() - 5.0).abs() < 1e-12);
/// assert!(aabb.contains(&Point3::new(1.0, 1.0, 0.0)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Aabb {
    /// Minimum corner (smallest x, y, z values).
    pub min: Point3<f64>,
    /// Maximum corner (largest x, y, z values).
    pub max: Point3<f64>,
}

impl Aabb {
    /// Create a new AABB from two corners.
    ///
    /// The corners are sorted per axis, so argument order does not matter.
    #[must_use]
    pub fn new(a: Point3<f64>, b: Point3<f64>) -> Self {
        Self {
            min: Point3::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            max: Point3::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
        }
    }

    /// Create an empty AABB (min > max), the identity for expansion.
    ///
    /// ```
    /// use mesh_types::{Aabb, Point3};
    ///
    /// let mut aabb = Aabb::empty();
    /// assert!(aabb.is_empty());
    ///
    /// aabb.expand_to_include(&Point3::new(1.0, 2.0, 3.0));
    /// assert!(!aabb.is_empty());
    /// ```
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Point3::new is not const in nalgebra
    pub fn empty() -> Self {
        Self {
            min: Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            max: Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    /// Create an AABB from an iterator of points.
    ///
    /// Returns an empty AABB if the iterator is empty.
    #[must_use]
    pub fn from_points<'a>(points: impl Iterator<Item = &'a Point3<f64>>) -> Self {
        let mut aabb = Self::empty();
        for point in points {
            aabb.expand_to_include(point);
        }
        aabb
    }

    /// Check if the AABB is empty (min > max on any axis).
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Extent along each axis.
    #[inline]
    #[must_use]
    pub fn size(&self) -> Vector3<f64> {
        self.max - self.min
    }

    /// Center point.
    #[inline]
    #[must_use]
    pub fn center(&self) -> Point3<f64> {
        nalgebra::center(&self.min, &self.max)
    }

    /// Length of the min-to-max diagonal.
    ///
    /// Returns 0.0 for an empty box.
    #[inline]
    #[must_use]
    pub fn diagonal(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.size().norm()
        }
    }

    /// Index (0, 1, 2) of the axis with the largest extent.
    #[must_use]
    pub fn longest_axis(&self) -> usize {
        let size = self.size();
        if size.x >= size.y && size.x >= size.z {
            0
        } else if size.y >= size.z {
            1
        } else {
            2
        }
    }

    /// Check whether a point lies inside or on the boundary.
    #[inline]
    #[must_use]
    pub fn contains(&self, point: &Point3<f64>) -> bool {
        (0..3).all(|k| point[k] >= self.min[k] && point[k] <= self.max[k])
    }

    /// Grow the box to include a point.
    pub fn expand_to_include(&mut self, point: &Point3<f64>) {
        for k in 0..3 {
            self.min[k] = self.min[k].min(point[k]);
            self.max[k] = self.max[k].max(point[k]);
        }
    }

    /// Smallest box containing both boxes.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut out = *self;
        out.expand_to_include(&other.min);
        out.expand_to_include(&other.max);
        out
    }

    /// Squared distance from a point to the box (0 inside).
    ///
    /// A lower bound on the squared distance to anything the box encloses,
    /// which makes it the pruning key for nearest-neighbour descent.
    ///
    /// ```
    /// use mesh_types::{Aabb, Point3};
    ///
    /// let aabb = Aabb::new(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
    /// assert_eq!(aabb.distance_squared_to_point(&Point3::new(0.5, 0.5, 0.5)), 0.0);
    /// assert!((aabb.distance_squared_to_point(&Point3::new(3.0, 0.5, 0.5)) - 4.0).abs() < 1e-12);
    /// ```
    #[must_use]
    pub fn distance_squared_to_point(&self, point: &Point3<f64>) -> f64 {
        (0..3)
            .map(|k| {
                let d = (self.min[k] - point[k]).max(0.0).max(point[k] - self.max[k]);
                d * d
            })
            .sum()
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn new_sorts_corners() {
        let aabb = Aabb::new(Point3::new(1.0, 0.0, 5.0), Point3::new(0.0, 2.0, 3.0));
        assert_eq!(aabb.min, Point3::new(0.0, 0.0, 3.0));
        assert_eq!(aabb.max, Point3::new(1.0, 2.0, 5.0));
    }

    #[test]
    fn from_points_covers_all() {
        let pts = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(10.0, 5.0, 3.0),
            Point3::new(-2.0, 8.0, 1.0),
        ];
        let aabb = Aabb::from_points(pts.iter());
        assert_eq!(aabb.min, Point3::new(-2.0, 0.0, 0.0));
        assert_eq!(aabb.max, Point3::new(10.0, 8.0, 3.0));
        assert!(pts.iter().all(|p| aabb.contains(p)));
    }

    #[test]
    fn empty_box_has_zero_diagonal() {
        let aabb = Aabb::from_points(std::iter::empty());
        assert!(aabb.is_empty());
        assert_relative_eq!(aabb.diagonal(), 0.0);
    }

    #[test]
    fn center_and_diagonal() {
        let aabb = Aabb::new(Point3::new(-1.0, -2.0, -2.0), Point3::new(1.0, 2.0, 2.0));
        assert_eq!(aabb.center(), Point3::origin());
        assert_relative_eq!(aabb.diagonal(), 6.0, epsilon = 1e-12);
        assert_eq!(aabb.longest_axis(), 1);
    }

    #[test]
    fn distance_to_corner() {
        let aabb = Aabb::new(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
        let d2 = aabb.distance_squared_to_point(&Point3::new(2.0, 2.0, 2.0));
        assert_relative_eq!(d2, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn union_of_disjoint_boxes() {
        let a = Aabb::new(Point3::origin(), Point3::new(1.0, 1.0, 1.0));
        let b = Aabb::new(Point3::new(2.0, 2.0, 2.0), Point3::new(3.0, 3.0, 3.0));
        let u = a.union(&b);
        assert_eq!(u.min, Point3::origin());
        assert_eq!(u.max, Point3::new(3.0, 3.0, 3.0));
        assert_eq!(Aabb::empty().union(&a), a);
    }
}
