//! Parametric transforms optimized by the registration.
//!
//! A [`ParametricTransform`] maps points of the moving mesh and exposes a
//! flat parameter vector plus its point Jacobian, which is all the metric and
//! optimizer need. Two implementations are provided:
//!
//! - [`AffineTransform`] - 12 parameters, `T(p) = A (p - c) + c + t`
//! - [`TranslationTransform`] - 3 parameters, `T(p) = p + t`

use nalgebra::{DVector, Matrix3, Matrix3xX, Matrix4, Point3, Vector3};

use crate::{RegistrationError, RegistrationResult};

/// A point transform with a flat, optimizable parameter vector.
///
/// Implementations must be cheap to clone; the scales estimator perturbs
/// private copies.
pub trait ParametricTransform: Clone + Send + Sync {
    /// Number of optimizable parameters.
    fn parameter_count(&self) -> usize;

    /// Current parameters.
    fn parameters(&self) -> DVector<f64>;

    /// Replace the parameters.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::ParameterCountMismatch`] on a length mismatch,
    /// [`RegistrationError::NonFiniteParameter`] if any value is NaN or
    /// infinite. The transform is unchanged on error.
    fn set_parameters(&mut self, parameters: &DVector<f64>) -> RegistrationResult<()>;

    /// Map a point.
    fn transform_point(&self, point: &Point3<f64>) -> Point3<f64>;

    /// `d T(point) / d parameters`, a 3 x `parameter_count()` matrix.
    fn jacobian(&self, point: &Point3<f64>) -> Matrix3xX<f64>;

    /// `out += J(point)^T * gradient`.
    ///
    /// Override when the Jacobian has structure worth exploiting.
    fn accumulate_gradient(
        &self,
        point: &Point3<f64>,
        gradient: &Vector3<f64>,
        out: &mut DVector<f64>,
    ) {
        *out += self.jacobian(point).transpose() * gradient;
    }

    /// Non-optimized parameters (e.g. a center of rotation).
    fn fixed_parameters(&self) -> Vec<f64> {
        Vec::new()
    }
}

fn check_parameters(expected: usize, parameters: &DVector<f64>) -> RegistrationResult<()> {
    if parameters.len() != expected {
        return Err(RegistrationError::ParameterCountMismatch {
            expected,
            got: parameters.len(),
        });
    }
    match parameters.iter().position(|p| !p.is_finite()) {
        Some(index) => Err(RegistrationError::NonFiniteParameter { index }),
        None => Ok(()),
    }
}

/// An affine transform about a fixed center.
///
/// `T(p) = A (p - c) + c + t`. Parameters are the nine entries of `A` in
/// row-major order followed by the three entries of `t`; the center `c` is a
/// fixed parameter.
///
/// # Example
///
/// ```
/// use mesh_registration::{AffineTransform, ParametricTransform};
/// use nalgebra::{DVector, Point3, Vector3};
///
/// let mut t = AffineTransform::identity();
/// assert_eq!(t.parameter_count(), 12);
///
/// let mut params = t.parameters();
/// params[9] = 1.0; // translate +x
/// t.set_parameters(&params).unwrap();
///
/// assert_eq!(t.transform_point(&Point3::new(1.0, 2.0, 3.0)), Point3::new(2.0, 2.0, 3.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AffineTransform {
    /// Linear part `A`.
    pub matrix: Matrix3<f64>,
    /// Translation `t`.
    pub translation: Vector3<f64>,
    /// Center `c`.
    pub center: Point3<f64>,
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl AffineTransform {
    /// Number of optimizable parameters.
    pub const PARAMETER_COUNT: usize = 12;

    /// Identity with center at the origin.
    #[must_use]
    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
            translation: Vector3::zeros(),
            center: Point3::origin(),
        }
    }

    /// Create from parts.
    #[must_use]
    pub const fn new(matrix: Matrix3<f64>, translation: Vector3<f64>, center: Point3<f64>) -> Self {
        Self {
            matrix,
            translation,
            center,
        }
    }

    /// Reset `A` to identity and `t` to zero, keeping the center.
    pub fn set_identity(&mut self) {
        self.matrix = Matrix3::identity();
        self.translation = Vector3::zeros();
    }

    /// Move the center, keeping `A` and `t`.
    ///
    /// This changes the mapping unless `A` is the identity.
    pub fn set_center(&mut self, center: Point3<f64>) {
        self.center = center;
    }

    /// Builder form of [`AffineTransform::set_center`].
    #[must_use]
    pub const fn with_center(mut self, center: Point3<f64>) -> Self {
        self.center = center;
        self
    }

    /// Effective offset `o` such that `T(p) = A p + o`.
    #[must_use]
    pub fn offset(&self) -> Vector3<f64> {
        self.center.coords - self.matrix * self.center.coords + self.translation
    }

    /// Homogeneous 4x4 form.
    #[must_use]
    pub fn to_matrix4(&self) -> Matrix4<f64> {
        let mut m = self.matrix.to_homogeneous();
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.offset());
        m
    }

    /// Inverse mapping with the same center, or `None` if `A` is singular.
    #[must_use]
    pub fn inverse(&self) -> Option<Self> {
        let inv = self.matrix.try_inverse()?;
        // p = A^-1 (y - c - t) + c  =  A^-1 (y - c) + c - A^-1 t
        Some(Self {
            matrix: inv,
            translation: -(inv * self.translation),
            center: self.center,
        })
    }

    /// Whether this is the identity mapping within `tolerance`.
    #[must_use]
    pub fn is_identity(&self, tolerance: f64) -> bool {
        (self.matrix - Matrix3::identity()).amax() <= tolerance
            && self.translation.amax() <= tolerance
    }
}

impl ParametricTransform for AffineTransform {
    fn parameter_count(&self) -> usize {
        Self::PARAMETER_COUNT
    }

    fn parameters(&self) -> DVector<f64> {
        let m = &self.matrix;
        DVector::from_row_slice(&[
            m[(0, 0)],
            m[(0, 1)],
            m[(0, 2)],
            m[(1, 0)],
            m[(1, 1)],
            m[(1, 2)],
            m[(2, 0)],
            m[(2, 1)],
            m[(2, 2)],
            self.translation.x,
            self.translation.y,
            self.translation.z,
        ])
    }

    fn set_parameters(&mut self, parameters: &DVector<f64>) -> RegistrationResult<()> {
        check_parameters(Self::PARAMETER_COUNT, parameters)?;
        for r in 0..3 {
            for c in 0..3 {
                self.matrix[(r, c)] = parameters[3 * r + c];
            }
        }
        self.translation = Vector3::new(parameters[9], parameters[10], parameters[11]);
        Ok(())
    }

    fn transform_point(&self, point: &Point3<f64>) -> Point3<f64> {
        self.center + self.matrix * (point - self.center) + self.translation
    }

    fn jacobian(&self, point: &Point3<f64>) -> Matrix3xX<f64> {
        let local = point - self.center;
        let mut j = Matrix3xX::zeros(Self::PARAMETER_COUNT);
        for r in 0..3 {
            for c in 0..3 {
                j[(r, 3 * r + c)] = local[c];
            }
            j[(r, 9 + r)] = 1.0;
        }
        j
    }

    fn accumulate_gradient(
        &self,
        point: &Point3<f64>,
        gradient: &Vector3<f64>,
        out: &mut DVector<f64>,
    ) {
        let local = point - self.center;
        for r in 0..3 {
            for c in 0..3 {
                out[3 * r + c] += gradient[r] * local[c];
            }
            out[9 + r] += gradient[r];
        }
    }

    fn fixed_parameters(&self) -> Vec<f64> {
        vec![self.center.x, self.center.y, self.center.z]
    }
}

/// A pure translation, `T(p) = p + t`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TranslationTransform {
    /// Offset `t`.
    pub offset: Vector3<f64>,
}

impl TranslationTransform {
    /// Create from an offset.
    #[must_use]
    pub const fn new(offset: Vector3<f64>) -> Self {
        Self { offset }
    }
}

impl ParametricTransform for TranslationTransform {
    fn parameter_count(&self) -> usize {
        3
    }

    fn parameters(&self) -> DVector<f64> {
        DVector::from_column_slice(self.offset.as_slice())
    }

    fn set_parameters(&mut self, parameters: &DVector<f64>) -> RegistrationResult<()> {
        check_parameters(3, parameters)?;
        self.offset = Vector3::new(parameters[0], parameters[1], parameters[2]);
        Ok(())
    }

    fn transform_point(&self, point: &Point3<f64>) -> Point3<f64> {
        point + self.offset
    }

    fn jacobian(&self, _point: &Point3<f64>) -> Matrix3xX<f64> {
        Matrix3xX::from_column_slice(&[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0])
    }

    fn accumulate_gradient(
        &self,
        _point: &Point3<f64>,
        gradient: &Vector3<f64>,
        out: &mut DVector<f64>,
    ) {
        for k in 0..3 {
            out[k] += gradient[k];
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_affine() -> AffineTransform {
        AffineTransform::new(
            Matrix3::new(1.1, 0.2, -0.1, 0.05, 0.9, 0.3, -0.2, 0.1, 1.05),
            Vector3::new(0.3, -0.4, 0.5),
            Point3::new(1.0, 2.0, -1.0),
        )
    }

    #[test]
    fn identity_maps_points_to_themselves() {
        let t = AffineTransform::identity().with_center(Point3::new(3.0, -1.0, 2.0));
        let p = Point3::new(0.7, 0.1, -4.0);
        assert_relative_eq!(t.transform_point(&p), p, epsilon = 1e-12);
        assert!(t.is_identity(0.0));
    }

    #[test]
    fn parameters_roundtrip() {
        let t = sample_affine();
        let mut u = AffineTransform::identity().with_center(t.center);
        u.set_parameters(&t.parameters()).unwrap();
        assert_eq!(u, t);
    }

    #[test]
    fn parameter_order_is_row_major_then_translation() {
        let t = sample_affine();
        let p = t.parameters();
        assert_eq!(p[1], 0.2);
        assert_eq!(p[3], 0.05);
        assert_eq!(p[11], 0.5);
    }

    #[test]
    fn wrong_length_rejected() {
        let mut t = AffineTransform::identity();
        let err = t.set_parameters(&DVector::zeros(9)).unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::ParameterCountMismatch {
                expected: 12,
                got: 9
            }
        ));
        assert!(t.is_identity(0.0));
    }

    #[test]
    fn non_finite_rejected() {
        let mut t = AffineTransform::identity();
        let mut p = t.parameters();
        p[4] = f64::NAN;
        assert!(matches!(
            t.set_parameters(&p),
            Err(RegistrationError::NonFiniteParameter { index: 4 })
        ));
        assert!(t.is_identity(0.0));
    }

    #[test]
    fn offset_matches_homogeneous_form() {
        let t = sample_affine();
        let p = Point3::new(-0.3, 0.8, 2.2);
        let h = t.to_matrix4() * p.to_homogeneous();
        let y = t.transform_point(&p);
        assert_relative_eq!(Point3::from_homogeneous(h).unwrap(), y, epsilon = 1e-12);
        assert_relative_eq!(t.matrix * p.coords + t.offset(), y.coords, epsilon = 1e-12);
    }

    #[test]
    fn inverse_undoes_mapping() {
        let t = sample_affine();
        let inv = t.inverse().unwrap();
        let p = Point3::new(0.4, -1.5, 3.0);
        assert_relative_eq!(inv.transform_point(&t.transform_point(&p)), p, epsilon = 1e-12);
    }

    #[test]
    fn singular_has_no_inverse() {
        let t = AffineTransform::new(Matrix3::zeros(), Vector3::zeros(), Point3::origin());
        assert!(t.inverse().is_none());
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        let t = sample_affine();
        let p = Point3::new(0.5, -0.25, 1.5);
        let j = t.jacobian(&p);
        let base = t.parameters();
        let h = 1e-6;

        for k in 0..12 {
            let mut plus = t;
            let mut minus = t;
            let mut bp = base.clone();
            let mut bm = base.clone();
            bp[k] += h;
            bm[k] -= h;
            plus.set_parameters(&bp).unwrap();
            minus.set_parameters(&bm).unwrap();
            let fd = (plus.transform_point(&p) - minus.transform_point(&p)) / (2.0 * h);
            for r in 0..3 {
                assert_relative_eq!(j[(r, k)], fd[r], epsilon = 1e-8);
            }
        }
    }

    #[test]
    fn closed_form_gradient_matches_jacobian_transpose() {
        let t = sample_affine();
        let p = Point3::new(2.0, 0.5, -0.7);
        let g = Vector3::new(0.3, -1.2, 0.8);

        let mut fast = DVector::zeros(12);
        t.accumulate_gradient(&p, &g, &mut fast);
        let slow = t.jacobian(&p).transpose() * g;

        assert_relative_eq!(fast, slow, epsilon = 1e-12);
    }

    #[test]
    fn translation_transform() {
        let mut t = TranslationTransform::default();
        t.set_parameters(&DVector::from_row_slice(&[1.0, -2.0, 0.5]))
            .unwrap();
        assert_eq!(
            t.transform_point(&Point3::origin()),
            Point3::new(1.0, -2.0, 0.5)
        );

        let mut grad = DVector::zeros(3);
        t.accumulate_gradient(&Point3::origin(), &Vector3::new(1.0, 2.0, 3.0), &mut grad);
        assert_eq!(grad, t.jacobian(&Point3::origin()).transpose() * Vector3::new(1.0, 2.0, 3.0));
        assert!(t.fixed_parameters().is_empty());
    }
}
