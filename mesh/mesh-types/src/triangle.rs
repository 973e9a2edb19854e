//! Triangle type for geometric calculations.

use nalgebra::{Point3, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A triangle with concrete vertex positions.
///
/// Winding is **counter-clockwise (CCW) when viewed from the front**
/// (normal points toward viewer).
///
/// # Example
///
/// ```
/// use mesh_types::{Triangle, Point3};
///
/// let tri = Triangle::new(
///     Point3::new(0.0, 0.0, 0.0),
///     Point3::new(1.0, 0.0, 0.0),
///     Point3::new(0.0, 1.0, 0.0),
/// );
///
/// assert!((tri.area() - 0.5).abs() < 1e-10);
/// let normal = tri.normal().unwrap();
/// assert!((normal.z - 1.0).abs() < 1e-10);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Triangle {
    /// First vertex.
    pub v0: Point3<f64>,
    /// Second vertex.
    pub v1: Point3<f64>,
    /// Third vertex.
    pub v2: Point3<f64>,
}

/// Result of a closest-point query against a triangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosestPoint {
    /// The closest point on the triangle.
    pub point: Point3<f64>,
    /// Barycentric weights of `point` for `(v0, v1, v2)`, summing to one.
    pub barycentric: [f64; 3],
    /// Squared distance from the query point.
    pub distance_squared: f64,
}

impl Triangle {
    /// Create a new triangle from three points.
    #[inline]
    #[must_use]
    pub const fn new(v0: Point3<f64>, v1: Point3<f64>, v2: Point3<f64>) -> Self {
        Self { v0, v1, v2 }
    }

    /// Compute the (unnormalized) face normal via cross product.
    ///
    /// The magnitude equals twice the triangle's area.
    #[inline]
    #[must_use]
    pub fn normal_unnormalized(&self) -> Vector3<f64> {
        (self.v1 - self.v0).cross(&(self.v2 - self.v0))
    }

    /// Compute the unit face normal.
    ///
    /// Returns `None` for degenerate triangles (zero area).
    #[must_use]
    pub fn normal(&self) -> Option<Vector3<f64>> {
        let n = self.normal_unnormalized();
        let len_sq = n.norm_squared();
        if len_sq > f64::EPSILON * f64::EPSILON {
            Some(n / len_sq.sqrt())
        } else {
            None
        }
    }

    /// Compute the area of the triangle.
    #[inline]
    #[must_use]
    pub fn area(&self) -> f64 {
        self.normal_unnormalized().norm() * 0.5
    }

    /// Compute the centroid.
    #[inline]
    #[must_use]
    pub fn centroid(&self) -> Point3<f64> {
        Point3::from((self.v0.coords + self.v1.coords + self.v2.coords) / 3.0)
    }

    /// Lengths `[|v0v1|, |v1v2|, |v2v0|]`.
    #[inline]
    #[must_use]
    pub fn edge_lengths(&self) -> [f64; 3] {
        [
            (self.v1 - self.v0).norm(),
            (self.v2 - self.v1).norm(),
            (self.v0 - self.v2).norm(),
        ]
    }

    /// Closest point on the triangle (interior, edges or corners) to `p`.
    ///
    /// Classifies `p` against the seven Voronoi regions of the triangle
    /// (Ericson, *Real-Time Collision Detection*, 5.1.5). Collinear or
    /// collapsed triangles fall back to the nearest of the three edges.
    ///
    /// # Example
    ///
    /// ```
    /// use mesh_types::{Triangle, Point3};
    ///
    /// let tri = Triangle::new(
    ///     Point3::new(0.0, 0.0, 0.0),
    ///     Point3::new(2.0, 0.0, 0.0),
    ///     Point3::new(0.0, 2.0, 0.0),
    /// );
    ///
    /// // Above the interior: straight projection
    /// let hit = tri.closest_point(&Point3::new(0.5, 0.5, 3.0));
    /// assert!((hit.point - Point3::new(0.5, 0.5, 0.0)).norm() < 1e-12);
    /// assert!((hit.distance_squared - 9.0).abs() < 1e-12);
    ///
    /// // Beyond a corner: the corner itself
    /// let hit = tri.closest_point(&Point3::new(-1.0, -1.0, 0.0));
    /// assert_eq!(hit.point, Point3::new(0.0, 0.0, 0.0));
    /// ```
    #[must_use]
    pub fn closest_point(&self, p: &Point3<f64>) -> ClosestPoint {
        let [u, v, w] = self.closest_barycentric(p);
        let point = Point3::from(self.v0.coords * u + self.v1.coords * v + self.v2.coords * w);
        ClosestPoint {
            point,
            barycentric: [u, v, w],
            distance_squared: (p - point).norm_squared(),
        }
    }

    fn closest_barycentric(&self, p: &Point3<f64>) -> [f64; 3] {
        let (a, b, c) = (self.v0, self.v1, self.v2);
        let ab = b - a;
        let ac = c - a;
        let ap = p - a;

        let d1 = ab.dot(&ap);
        let d2 = ac.dot(&ap);
        if d1 <= 0.0 && d2 <= 0.0 {
            return [1.0, 0.0, 0.0];
        }

        let bp = p - b;
        let d3 = ab.dot(&bp);
        let d4 = ac.dot(&bp);
        if d3 >= 0.0 && d4 <= d3 {
            return [0.0, 1.0, 0.0];
        }

        let vc = d1.mul_add(d4, -(d3 * d2));
        if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 && d1 - d3 > 0.0 {
            let t = d1 / (d1 - d3);
            return [1.0 - t, t, 0.0];
        }

        let cp = p - c;
        let d5 = ab.dot(&cp);
        let d6 = ac.dot(&cp);
        if d6 >= 0.0 && d5 <= d6 {
            return [0.0, 0.0, 1.0];
        }

        let vb = d5.mul_add(d2, -(d1 * d6));
        if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 && d2 - d6 > 0.0 {
            let t = d2 / (d2 - d6);
            return [1.0 - t, 0.0, t];
        }

        let va = d3.mul_add(d6, -(d5 * d4));
        let (e4, e5) = (d4 - d3, d5 - d6);
        if va <= 0.0 && e4 >= 0.0 && e5 >= 0.0 && e4 + e5 > 0.0 {
            let t = e4 / (e4 + e5);
            return [0.0, 1.0 - t, t];
        }

        let sum = va + vb + vc;
        if sum > 0.0 && sum.is_finite() {
            let v = vb / sum;
            let w = vc / sum;
            return [1.0 - v - w, v, w];
        }

        self.closest_on_edges(p)
    }

    /// Degenerate fallback: best of the three segment projections.
    fn closest_on_edges(&self, p: &Point3<f64>) -> [f64; 3] {
        let segment = |a: &Point3<f64>, b: &Point3<f64>| -> (f64, f64) {
            let ab = b - a;
            let len_sq = ab.norm_squared();
            let t = if len_sq > 0.0 {
                ((p - a).dot(&ab) / len_sq).clamp(0.0, 1.0)
            } else {
                0.0
            };
            (t, (p - (a + ab * t)).norm_squared())
        };

        let (t01, d01) = segment(&self.v0, &self.v1);
        let (t12, d12) = segment(&self.v1, &self.v2);
        let (t20, d20) = segment(&self.v2, &self.v0);

        if d01 <= d12 && d01 <= d20 {
            [1.0 - t01, t01, 0.0]
        } else if d12 <= d20 {
            [0.0, 1.0 - t12, t12]
        } else {
            [t20, 0.0, 1.0 - t20]
        }
    }
}
