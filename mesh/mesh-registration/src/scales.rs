//! Parameter scales from physical shift.
//!
//! A unit change of a matrix entry and a unit change of a translation move
//! points by very different amounts. The estimator measures that motion on a
//! sample set so the optimizer can take comparable steps in every parameter.

use mesh_types::Point3;
use nalgebra::DVector;
use rayon::prelude::*;
use tracing::warn;

use crate::{ParametricTransform, RegistrationError, RegistrationResult, VirtualDomain};

/// Default parameter perturbation.
pub const SMALL_PARAMETER_VARIATION: f64 = 0.01;

/// Scales at or below this are replaced by 1.
const MIN_SCALE: f64 = 1e-12;

/// Estimates per-parameter scales and step shifts over a sample set.
#[derive(Debug, Clone)]
pub struct ScalesEstimator {
    samples: Vec<Point3<f64>>,
    variation: f64,
}

impl ScalesEstimator {
    /// Create an estimator over `samples`.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::InvalidParameter`] for an empty sample set or a
    /// non-positive variation.
    pub fn new(samples: Vec<Point3<f64>>, variation: f64) -> RegistrationResult<Self> {
        if samples.is_empty() {
            return Err(RegistrationError::invalid_parameter(
                "scales estimator needs at least one sample point",
            ));
        }
        if !(variation.is_finite() && variation > 0.0) {
            return Err(RegistrationError::invalid_parameter(format!(
                "small parameter variation must be positive, got {variation}"
            )));
        }
        Ok(Self { samples, variation })
    }

    /// Create an estimator over the grid points of a virtual domain.
    ///
    /// # Errors
    ///
    /// See [`Self::new`].
    pub fn from_virtual_domain(domain: &VirtualDomain, variation: f64) -> RegistrationResult<Self> {
        Self::new(domain.points(), variation)
    }

    /// Number of sample points.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Displacement of every sample between two transforms, in sample order.
    fn shifts<T: ParametricTransform>(&self, from: &T, to: &T) -> Vec<f64> {
        self.samples
            .par_iter()
            .map(|x| (to.transform_point(x) - from.transform_point(x)).norm())
            .collect()
    }

    /// RMS sample displacement per unit change of each parameter.
    ///
    /// # Errors
    ///
    /// Propagates parameter errors from the transform.
    pub fn estimate_scales<T: ParametricTransform>(
        &self,
        transform: &T,
    ) -> RegistrationResult<DVector<f64>> {
        let base = transform.parameters();
        let mut scales = DVector::zeros(base.len());
        let mut perturbed = transform.clone();

        #[allow(clippy::cast_precision_loss)]
        let n = self.samples.len() as f64;
        for k in 0..base.len() {
            let mut p = base.clone();
            p[k] += self.variation;
            perturbed.set_parameters(&p)?;

            let mean_sq = self
                .shifts(transform, &perturbed)
                .iter()
                .map(|d| d * d)
                .sum::<f64>()
                / n;
            let scale = mean_sq.sqrt() / self.variation;

            scales[k] = if scale.is_finite() && scale > MIN_SCALE {
                scale
            } else {
                warn!(parameter = k, scale, "Parameter moves no sample; using scale 1");
                1.0
            };
        }
        Ok(scales)
    }

    /// Largest sample displacement caused by adding `step` to the parameters.
    ///
    /// # Errors
    ///
    /// Propagates parameter errors from the transform, e.g. a wrong length.
    pub fn estimate_step_shift<T: ParametricTransform>(
        &self,
        transform: &T,
        step: &DVector<f64>,
    ) -> RegistrationResult<f64> {
        let mut moved = transform.clone();
        moved.set_parameters(&(transform.parameters() + step))?;
        Ok(self.shifts(transform, &moved).into_iter().fold(0.0, f64::max))
    }
}
