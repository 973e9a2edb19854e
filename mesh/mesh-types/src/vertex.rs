//! Mesh vertices.

use nalgebra::{Point3, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A mesh vertex: a position and an optional unit normal.
///
/// Registration only moves positions. Normals are carried through I/O when
/// a file provides them and are otherwise left as `None`.
///
/// # Example
///
/// ```
/// use mesh_types::{Vertex, Point3, Vector3};
///
/// let v = Vertex::from_coords(1.0, 2.0, 3.0);
/// assert_eq!(v.position, Point3::new(1.0, 2.0, 3.0));
/// assert!(v.normal.is_none());
///
/// let n = Vertex::with_normal(Point3::origin(), Vector3::z());
/// assert_eq!(n.normal, Some(Vector3::z()));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Vertex {
    /// Position in 3D space.
    pub position: Point3<f64>,
    /// Unit normal, when known.
    pub normal: Option<Vector3<f64>>,
}

impl Vertex {
    /// Create a vertex at a position with no normal.
    #[inline]
    #[must_use]
    pub const fn new(position: Point3<f64>) -> Self {
        Self {
            position,
            normal: None,
        }
    }

    /// Create a vertex from raw coordinates.
    #[inline]
    #[must_use]
    pub fn from_coords(x: f64, y: f64, z: f64) -> Self {
        Self::new(Point3::new(x, y, z))
    }

    /// Create a vertex with a normal.
    #[inline]
    #[must_use]
    pub const fn with_normal(position: Point3<f64>, normal: Vector3<f64>) -> Self {
        Self {
            position,
            normal: Some(normal),
        }
    }

    /// Returns true when every coordinate is finite.
    #[inline]
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.position.iter().all(|c| c.is_finite())
    }
}

impl From<Point3<f64>> for Vertex {
    fn from(position: Point3<f64>) -> Self {
        Self::new(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_point() {
        let v: Vertex = Point3::new(1.0, -1.0, 0.5).into();
        assert_eq!(v.position, Point3::new(1.0, -1.0, 0.5));
        assert!(v.normal.is_none());
    }

    #[test]
    fn finite_check() {
        assert!(Vertex::from_coords(0.0, 1.0, 2.0).is_finite());
        assert!(!Vertex::from_coords(f64::NAN, 1.0, 2.0).is_finite());
        assert!(!Vertex::from_coords(0.0, f64::INFINITY, 2.0).is_finite());
    }
}
