//! The thin-shell demons metric.
//!
//! [`ThinShellMetric`] ties the pieces of one evaluation together:
//!
//! 1. map the shell vertices through the transform
//! 2. find closest points (and feature matches) on the fixed mesh
//! 3. weight them by confidence
//! 4. sum the thin-shell energy and pull its gradient back to the
//!    transform parameters
//!
//! The metric owns its transform. Every evaluation writes the requested
//! parameters into it first, so repeated calls with the same parameters give
//! the same result.

use mesh_types::{IndexedMesh, Point3};
use nalgebra::DVector;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::confidence::{ConfidenceWeighter, EvaluationContext};
use crate::correspondence::{compute_descriptors, CorrespondenceFinder, FeatureMatch};
use crate::energy::{EnergyAccumulator, EnergyTerms, ShellGeometry};
use crate::{
    AffineTransform, MeshRole, ParametricTransform, RegistrationError, RegistrationResult,
    ThinShellParams, VirtualDomain,
};

/// Lifecycle of a [`ThinShellMetric`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricState {
    /// Constructed, not yet validated.
    Unconfigured,
    /// Validated and indexed; ready to evaluate.
    Initialized,
    /// Inside an evaluation.
    Evaluating,
}

/// Everything one evaluation produces.
#[derive(Debug, Clone)]
pub struct MetricEvaluation {
    /// Metric value (total energy).
    pub value: f64,
    /// Derivative with respect to the transform parameters.
    pub gradient: DVector<f64>,
    /// Per-term breakdown.
    pub terms: EnergyTerms,
    /// Sigma and distance statistics of this evaluation.
    pub context: EvaluationContext,
    /// Number of correspondences used.
    pub correspondence_count: usize,
}

struct Prepared {
    finder: CorrespondenceFinder,
    geometry: ShellGeometry,
    weighter: ConfidenceWeighter,
    shell_points: Vec<Point3<f64>>,
    cached_features: Option<Vec<FeatureMatch>>,
}

/// Thin-shell demons metric between a fixed and a moving mesh.
///
/// # Example
///
/// ```
/// use mesh_registration::{
///     AffineTransform, MetricState, ParametricTransform, ThinShellMetric, ThinShellParams,
///     VirtualDomain,
/// };
/// use mesh_types::{icosphere, MeshBounds};
///
/// let mut fixed = icosphere(1);
/// fixed.build_cell_links();
/// let moving = fixed.clone();
/// let domain = VirtualDomain::from_bounds(&moving.bounds(), 5).unwrap();
///
/// let mut metric = ThinShellMetric::new(
///     &fixed,
///     &moving,
///     AffineTransform::identity(),
///     ThinShellParams::default(),
/// )
/// .with_virtual_domain(domain);
/// metric.initialize().unwrap();
/// assert_eq!(metric.state(), MetricState::Initialized);
///
/// let parameters = metric.transform().parameters();
/// let (value, gradient) = metric.value_and_derivative(&parameters).unwrap();
/// assert!(value.abs() < 1e-12);
/// assert!(gradient.norm() < 1e-12);
/// ```
pub struct ThinShellMetric<'m, T: ParametricTransform = AffineTransform> {
    fixed: &'m IndexedMesh,
    moving: &'m IndexedMesh,
    transform: T,
    params: ThinShellParams,
    domain: Option<VirtualDomain>,
    state: MetricState,
    prepared: Option<Prepared>,
}

impl<T: ParametricTransform + std::fmt::Debug> std::fmt::Debug for ThinShellMetric<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThinShellMetric")
            .field("fixed_vertices", &self.fixed.vertices.len())
            .field("moving_vertices", &self.moving.vertices.len())
            .field("transform", &self.transform)
            .field("params", &self.params)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn validate_mesh(mesh: &IndexedMesh, role: MeshRole) -> RegistrationResult<()> {
    if mesh.vertices.is_empty() {
        return Err(RegistrationError::EmptyMesh { role });
    }
    if mesh.faces.is_empty() {
        return Err(RegistrationError::NoCells { role });
    }
    let n = mesh.vertices.len();
    if let Some(face) = mesh
        .faces
        .iter()
        .position(|f| f.iter().any(|&v| v as usize >= n))
    {
        return Err(RegistrationError::InvalidFace { role, face });
    }
    if let Some(vertex) = mesh.vertices.iter().position(|v| !v.is_finite()) {
        return Err(RegistrationError::NonFiniteVertex { role, vertex });
    }
    if !mesh.has_current_links() {
        return Err(RegistrationError::CellLinksMissing { role });
    }
    Ok(())
}

impl<'m, T: ParametricTransform> ThinShellMetric<'m, T> {
    /// Create an unconfigured metric.
    ///
    /// A virtual domain must be supplied with [`Self::with_virtual_domain`]
    /// before [`Self::initialize`].
    #[must_use]
    pub fn new(
        fixed: &'m IndexedMesh,
        moving: &'m IndexedMesh,
        transform: T,
        params: ThinShellParams,
    ) -> Self {
        Self {
            fixed,
            moving,
            transform,
            params,
            domain: None,
            state: MetricState::Unconfigured,
            prepared: None,
        }
    }

    /// Replace the virtual domain.
    #[must_use]
    pub fn with_virtual_domain(mut self, domain: VirtualDomain) -> Self {
        self.domain = Some(domain);
        self.state = MetricState::Unconfigured;
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> MetricState {
        self.state
    }

    /// The metric's transform.
    #[must_use]
    pub const fn transform(&self) -> &T {
        &self.transform
    }

    /// Consume the metric, keeping the transform.
    #[must_use]
    pub fn into_transform(self) -> T {
        self.transform
    }

    /// Metric parameters.
    #[must_use]
    pub const fn params(&self) -> &ThinShellParams {
        &self.params
    }

    /// The virtual domain, if any.
    #[must_use]
    pub const fn virtual_domain(&self) -> Option<&VirtualDomain> {
        self.domain.as_ref()
    }

    /// Number of transform parameters.
    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.transform.parameter_count()
    }

    /// Write parameters into the transform without evaluating.
    ///
    /// # Errors
    ///
    /// Propagates [`ParametricTransform::set_parameters`] errors.
    pub fn set_parameters(&mut self, parameters: &DVector<f64>) -> RegistrationResult<()> {
        self.transform.set_parameters(parameters)
    }

    /// Untransformed shell vertices, the sample set for scale estimation.
    ///
    /// Empty before [`Self::initialize`].
    #[must_use]
    pub fn virtual_transformed_points(&self) -> &[Point3<f64>] {
        self.prepared
            .as_ref()
            .map(|p| p.shell_points.as_slice())
            .unwrap_or_default()
    }

    /// Validate inputs and build the search structures.
    ///
    /// # Errors
    ///
    /// A configuration error if a mesh is empty, has no cells, has bad
    /// faces or vertices, or lacks current cell links; if the virtual domain
    /// is missing; if a parameter is invalid. A correspondence failure if
    /// cached feature matching cannot match a shell vertex.
    pub fn initialize(&mut self) -> RegistrationResult<()> {
        self.state = MetricState::Unconfigured;
        self.prepared = None;

        self.params.validate()?;
        validate_mesh(self.moving, MeshRole::Moving)?;
        validate_mesh(self.fixed, MeshRole::Fixed)?;
        if self.domain.is_none() {
            return Err(RegistrationError::MissingVirtualDomain);
        }
        if self.transform.parameter_count() == 0 {
            return Err(RegistrationError::invalid_parameter(
                "transform has no parameters",
            ));
        }
        if self.params.is_degenerate() {
            warn!("All energy weights are zero; the metric is identically 0");
        }

        let shell_links = self
            .moving
            .links()
            .ok_or(RegistrationError::CellLinksMissing {
                role: MeshRole::Moving,
            })?;
        let shell_points = self.moving.positions();
        let neighborhood = self
            .params
            .uses_features()
            .then_some(self.params.feature_neighborhood_size);

        let finder = CorrespondenceFinder::new(self.fixed, neighborhood)?;
        let geometry = ShellGeometry::new(&shell_points, &self.moving.faces, shell_links);
        let weighter = ConfidenceWeighter::from_links(&self.params, shell_links);

        let mut prepared = Prepared {
            finder,
            geometry,
            weighter,
            shell_points,
            cached_features: None,
        };
        if self.params.uses_features() && !self.params.update_feature_matching_each_iteration {
            let transformed = self.transformed_points(&prepared.shell_points);
            prepared.cached_features = Some(self.match_features(&prepared.finder, &transformed)?);
        }

        debug!(
            fixed_vertices = self.fixed.vertices.len(),
            moving_vertices = self.moving.vertices.len(),
            edges = prepared.geometry.edges().len(),
            hinges = prepared.geometry.hinges().len(),
            "Initialized thin-shell metric"
        );

        self.prepared = Some(prepared);
        self.state = MetricState::Initialized;
        Ok(())
    }

    /// Metric value at `parameters`.
    ///
    /// # Errors
    ///
    /// See [`Self::evaluate`].
    pub fn value(&mut self, parameters: &DVector<f64>) -> RegistrationResult<f64> {
        self.evaluate(parameters).map(|e| e.value)
    }

    /// Metric value and parameter gradient at `parameters`.
    ///
    /// # Errors
    ///
    /// See [`Self::evaluate`].
    pub fn value_and_derivative(
        &mut self,
        parameters: &DVector<f64>,
    ) -> RegistrationResult<(f64, DVector<f64>)> {
        self.evaluate(parameters).map(|e| (e.value, e.gradient))
    }

    /// Full evaluation at `parameters`.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::NotInitialized`] before a successful
    /// [`Self::initialize`], parameter errors from the transform, or
    /// [`RegistrationError::CorrespondenceFailure`].
    pub fn evaluate(&mut self, parameters: &DVector<f64>) -> RegistrationResult<MetricEvaluation> {
        if self.state != MetricState::Initialized {
            return Err(RegistrationError::NotInitialized);
        }
        self.transform.set_parameters(parameters)?;

        self.state = MetricState::Evaluating;
        let result = self.evaluate_current();
        self.state = MetricState::Initialized;
        result
    }

    fn transformed_points(&self, points: &[Point3<f64>]) -> Vec<Point3<f64>> {
        points
            .par_iter()
            .map(|p| self.transform.transform_point(p))
            .collect()
    }

    fn match_features(
        &self,
        finder: &CorrespondenceFinder,
        transformed: &[Point3<f64>],
    ) -> RegistrationResult<Vec<FeatureMatch>> {
        let links = self
            .moving
            .links()
            .ok_or(RegistrationError::CellLinksMissing {
                role: MeshRole::Moving,
            })?;
        let descriptors = compute_descriptors(transformed, &self.moving.faces, links);
        finder.match_features(transformed, &descriptors)
    }

    fn evaluate_current(&self) -> RegistrationResult<MetricEvaluation> {
        let prepared = self.prepared.as_ref().ok_or(RegistrationError::NotInitialized)?;

        let transformed = self.transformed_points(&prepared.shell_points);
        let mut correspondences = prepared.finder.find(&transformed)?;

        if self.params.uses_features() {
            let fresh;
            let features = if let Some(cached) = &prepared.cached_features {
                cached
            } else {
                fresh = self.match_features(&prepared.finder, &transformed)?;
                &fresh
            };
            for (c, f) in correspondences.iter_mut().zip(features) {
                c.feature = Some(*f);
            }
        }

        let context = prepared.weighter.context(&correspondences);
        let weights = prepared.weighter.weights(&correspondences, &context);
        let energy = EnergyAccumulator::new(&prepared.geometry, &self.params)
            .evaluate(&correspondences, &weights);

        let mut gradient = DVector::zeros(self.transform.parameter_count());
        for (x, g) in prepared.shell_points.iter().zip(&energy.vertex_gradients) {
            self.transform.accumulate_gradient(x, g, &mut gradient);
        }

        let terms = energy.terms;
        debug!(
            value = terms.total,
            stretch = terms.stretch,
            bend = terms.bend,
            feature = terms.feature,
            sigma = ?context.sigma,
            mean_distance = context.mean_distance,
            max_distance = context.max_distance,
            skipped = terms.skipped_elements,
            "Evaluated thin-shell metric"
        );

        Ok(MetricEvaluation {
            value: terms.total,
            gradient,
            terms,
            context,
            correspondence_count: correspondences.len(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::TranslationTransform;
    use approx::assert_relative_eq;
    use mesh_types::{icosphere, unit_icosahedron, MeshBounds, Vector3};

    fn metric_for<'m, T: ParametricTransform>(
        fixed: &'m IndexedMesh,
        moving: &'m IndexedMesh,
        transform: T,
        params: ThinShellParams,
    ) -> ThinShellMetric<'m, T> {
        let domain = VirtualDomain::from_bounds(&moving.bounds(), 5).unwrap();
        ThinShellMetric::new(fixed, moving, transform, params).with_virtual_domain(domain)
    }

    fn linked(mut mesh: IndexedMesh) -> IndexedMesh {
        mesh.build_cell_links();
        mesh
    }

    fn stretch_only() -> ThinShellParams {
        ThinShellParams::new()
            .with_bend_weight(0.0)
            .with_feature_weight(0.0)
            .with_confidence_weighting(false)
    }

    #[test]
    fn identity_on_identical_meshes_is_zero() {
        let fixed = linked(icosphere(1));
        let moving = fixed.clone();
        let mut metric =
            metric_for(&fixed, &moving, AffineTransform::identity(), ThinShellParams::default());
        metric.initialize().unwrap();

        let p = metric.transform().parameters();
        let eval = metric.evaluate(&p).unwrap();
        assert_relative_eq!(eval.value, 0.0, epsilon = 1e-12);
        assert_relative_eq!(eval.gradient.norm(), 0.0, epsilon = 1e-12);
        assert_eq!(eval.correspondence_count, moving.vertices.len());
        assert_eq!(metric.state(), MetricState::Initialized);
    }

    #[test]
    fn evaluation_before_initialize_fails() {
        let fixed = linked(unit_icosahedron());
        let moving = fixed.clone();
        let mut metric =
            metric_for(&fixed, &moving, AffineTransform::identity(), stretch_only());
        let p = metric.transform().parameters();
        assert!(matches!(
            metric.value(&p),
            Err(RegistrationError::NotInitialized)
        ));
        assert_eq!(metric.state(), MetricState::Unconfigured);
    }

    #[test]
    fn moving_mesh_without_cells_is_configuration_error() {
        let fixed = linked(unit_icosahedron());
        let mut moving = unit_icosahedron();
        moving.faces.clear();
        moving.build_cell_links();

        let mut metric =
            metric_for(&fixed, &moving, AffineTransform::identity(), stretch_only());
        let err = metric.initialize().unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::NoCells {
                role: MeshRole::Moving
            }
        ));
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
        assert_eq!(metric.state(), MetricState::Unconfigured);
    }

    #[test]
    fn missing_virtual_domain_rejected() {
        let fixed = linked(unit_icosahedron());
        let moving = fixed.clone();
        let mut metric =
            ThinShellMetric::new(&fixed, &moving, AffineTransform::identity(), stretch_only());
        assert!(matches!(
            metric.initialize(),
            Err(RegistrationError::MissingVirtualDomain)
        ));
    }

    #[test]
    fn stale_links_rejected() {
        let fixed = linked(unit_icosahedron());
        let mut moving = fixed.clone();
        moving.faces.pop();

        let mut metric =
            metric_for(&fixed, &moving, AffineTransform::identity(), stretch_only());
        assert!(matches!(
            metric.initialize(),
            Err(RegistrationError::CellLinksMissing {
                role: MeshRole::Moving
            })
        ));
    }

    #[test]
    fn evaluations_are_idempotent() {
        let fixed = linked(icosphere(1));
        let mut moving = fixed.clone();
        moving.translate(Vector3::new(0.1, 0.05, -0.05));
        let mut metric =
            metric_for(&fixed, &moving, AffineTransform::identity(), ThinShellParams::default());
        metric.initialize().unwrap();

        let p0 = metric.transform().parameters();
        let mut p1 = p0.clone();
        p1[9] = -0.05;
        let first = metric.evaluate(&p0).unwrap();
        let _ = metric.evaluate(&p1).unwrap();
        let again = metric.evaluate(&p0).unwrap();

        assert_eq!(first.value, again.value);
        assert_eq!(first.gradient, again.gradient);
        assert!(first.value > 0.0);
    }

    #[test]
    fn gradient_points_back_toward_alignment() {
        let fixed = linked(unit_icosahedron());
        let mut moving = fixed.clone();
        let offset = Vector3::new(0.2, 0.0, 0.0);
        moving.translate(offset);

        let mut metric = metric_for(
            &fixed,
            &moving,
            TranslationTransform::default(),
            stretch_only(),
        );
        metric.initialize().unwrap();
        let (value, gradient) = metric
            .value_and_derivative(&DVector::zeros(3))
            .unwrap();

        assert!(value > 0.0);
        // Moving the shell further along +x would raise the energy.
        assert!(gradient[0] > 0.0);
        assert!(gradient.dot(&DVector::from_column_slice(&[-0.2, 0.0, 0.0])) < 0.0);

        let aligned = metric
            .value(&DVector::from_column_slice(&[-0.2, 0.0, 0.0]))
            .unwrap();
        assert_relative_eq!(aligned, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn wrong_parameter_count_rejected() {
        let fixed = linked(unit_icosahedron());
        let moving = fixed.clone();
        let mut metric =
            metric_for(&fixed, &moving, AffineTransform::identity(), stretch_only());
        metric.initialize().unwrap();
        assert!(matches!(
            metric.value(&DVector::zeros(3)),
            Err(RegistrationError::ParameterCountMismatch {
                expected: 12,
                got: 3
            })
        ));
        assert_eq!(metric.state(), MetricState::Initialized);
    }

    #[test]
    fn feature_matching_per_iteration_matches_cache_at_start() {
        let fixed = linked(icosphere(1));
        let mut moving = fixed.clone();
        moving.translate(Vector3::new(0.05, 0.0, 0.0));

        let cached = ThinShellParams::default();
        let fresh = ThinShellParams::default().with_feature_update_each_iteration(true);

        let mut a = metric_for(&fixed, &moving, AffineTransform::identity(), cached);
        let mut b = metric_for(&fixed, &moving, AffineTransform::identity(), fresh);
        a.initialize().unwrap();
        b.initialize().unwrap();

        let p = a.transform().parameters();
        let ea = a.evaluate(&p).unwrap();
        let eb = b.evaluate(&p).unwrap();
        assert_relative_eq!(ea.value, eb.value, epsilon = 1e-12);
        assert!(ea.terms.feature > 0.0);
    }

    #[test]
    fn shell_points_exposed_after_initialize() {
        let fixed = linked(unit_icosahedron());
        let moving = fixed.clone();
        let mut metric =
            metric_for(&fixed, &moving, AffineTransform::identity(), stretch_only());
        assert!(metric.virtual_transformed_points().is_empty());
        metric.initialize().unwrap();
        assert_eq!(metric.virtual_transformed_points().len(), 12);
        assert!(metric.virtual_domain().is_some());
    }
}
