//! Virtual domain: a coarse regular grid around the moving mesh.

use mesh_types::Aabb;
use nalgebra::{Matrix3, Point3, Vector3};

use crate::{RegistrationError, RegistrationResult};

/// Grid extent relative to the bounding box.
pub const SIZE_INFLATION: f64 = 1.2;

/// Origin shift, as a fraction of the box extent, below the box minimum.
pub const ORIGIN_OFFSET: f64 = 0.1;

/// A regular sampling grid in physical space.
///
/// Point `(i, j, k)` sits at `origin + direction * (i sx, j sy, k sz)`.
///
/// # Example
///
/// ```
/// use mesh_registration::VirtualDomain;
/// use mesh_types::{Aabb, Point3};
///
/// let bounds = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(3.0, 4.0, 0.0));
/// let domain = VirtualDomain::from_bounds(&bounds, 5).unwrap();
///
/// // Diagonal 5 split into 5 samples
/// assert!((domain.spacing.x - 1.0).abs() < 1e-12);
/// assert_eq!(domain.size, [4, 5, 1]);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VirtualDomain {
    /// Physical position of grid index (0, 0, 0).
    pub origin: Point3<f64>,
    /// Sample spacing along each grid axis.
    pub spacing: Vector3<f64>,
    /// Grid axis directions (columns).
    pub direction: Matrix3<f64>,
    /// Samples along each grid axis.
    pub size: [usize; 3],
}

impl VirtualDomain {
    /// Build an isotropic grid covering `bounds`.
    ///
    /// Spacing is `diagonal / samples_along_diagonal`; each axis gets
    /// `ceil(1.2 * extent / spacing)` samples (at least one) and the origin
    /// sits `0.1 * extent` below the box minimum.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::InvalidParameter`] for an empty or zero-size box
    /// or a zero sample count.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn from_bounds(bounds: &Aabb, samples_along_diagonal: usize) -> RegistrationResult<Self> {
        if samples_along_diagonal == 0 {
            return Err(RegistrationError::invalid_parameter(
                "samples_along_diagonal must be positive",
            ));
        }
        let diagonal = bounds.diagonal();
        if bounds.is_empty() || !diagonal.is_finite() || diagonal <= 0.0 {
            return Err(RegistrationError::invalid_parameter(
                "virtual domain needs a non-degenerate bounding box",
            ));
        }

        let step = diagonal / samples_along_diagonal as f64;
        let extent = bounds.size();
        let size = [0, 1, 2].map(|k| ((SIZE_INFLATION * extent[k] / step).ceil() as usize).max(1));

        Ok(Self {
            origin: bounds.min - extent * ORIGIN_OFFSET,
            spacing: Vector3::repeat(step),
            direction: Matrix3::identity(),
            size,
        })
    }

    /// Total number of grid points.
    #[must_use]
    pub fn point_count(&self) -> usize {
        self.size.iter().product()
    }

    /// Physical position of a grid index.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn point(&self, index: [usize; 3]) -> Point3<f64> {
        let local = Vector3::new(
            index[0] as f64 * self.spacing.x,
            index[1] as f64 * self.spacing.y,
            index[2] as f64 * self.spacing.z,
        );
        self.origin + self.direction * local
    }

    /// Every grid point, x fastest.
    #[must_use]
    pub fn points(&self) -> Vec<Point3<f64>> {
        let [nx, ny, nz] = self.size;
        let mut out = Vec::with_capacity(self.point_count());
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    out.push(self.point([i, j, k]));
                }
            }
        }
        out
    }
}
