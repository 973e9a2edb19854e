//! Top-level registration entry points.

use std::borrow::Cow;

use mesh_types::{IndexedMesh, MeshBounds};
use tracing::info;

use crate::{
    AffineTransform, ConjugateGradientOptimizer, MeshRole, OptimizationSummary,
    ParametricTransform, RegistrationError, RegistrationParams, RegistrationResult,
    ScalesEstimator, ScalesSampling, ThinShellMetric, VirtualDomain, transform_mesh,
};

/// Outcome of one optimization level.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LevelSummary {
    /// Level index, starting at 0.
    pub level: usize,
    /// The level's optimization.
    pub optimization: OptimizationSummary,
}

/// Result of a successful registration.
#[derive(Debug, Clone)]
pub struct RegistrationOutput<T = AffineTransform> {
    /// Transform carrying the moving mesh onto the fixed mesh.
    pub transform: T,
    /// Metric value before the first iteration.
    pub initial_value: f64,
    /// Metric value at the final transform.
    pub final_value: f64,
    /// Per-level summaries, in order.
    pub levels: Vec<LevelSummary>,
    /// The moving mesh with the transform applied. Vertex normals are
    /// cleared since a general affine map does not carry them.
    pub registered: IndexedMesh,
}

impl<T> RegistrationOutput<T> {
    /// Iterations summed over all levels.
    #[must_use]
    pub fn total_iterations(&self) -> usize {
        self.levels.iter().map(|l| l.optimization.iterations()).sum()
    }
}

/// Borrow `mesh` if its links are current, otherwise link a private copy.
fn linked(mesh: &IndexedMesh) -> Cow<'_, IndexedMesh> {
    if mesh.has_current_links() {
        Cow::Borrowed(mesh)
    } else {
        let mut copy = mesh.clone();
        copy.build_cell_links();
        Cow::Owned(copy)
    }
}

/// Register `moving` onto `fixed` with an affine transform.
///
/// The transform starts as the identity centered on the moving mesh's
/// bounding box. Neither input is modified; missing cell links are built on
/// private copies.
///
/// # Errors
///
/// Configuration errors from validation or metric initialization,
/// correspondence failures during optimization, or
/// [`RegistrationError::NoValidParameters`] for a non-finite result.
///
/// # Example
///
/// ```
/// use mesh_registration::{register, RegistrationParams, ThinShellParams};
/// use mesh_types::{icosphere, Vector3};
///
/// let fixed = icosphere(1);
/// let mut moving = fixed.clone();
/// moving.translate(Vector3::new(0.05, 0.0, 0.0));
///
/// let metric = ThinShellParams::new().with_bend_weight(0.0).with_feature_weight(0.0);
/// let params = RegistrationParams::new().with_metric(metric);
/// let output = register(&fixed, &moving, &params).unwrap();
///
/// assert!(output.final_value < output.initial_value);
/// assert_eq!(output.registered.vertices.len(), moving.vertices.len());
/// ```
pub fn register(
    fixed: &IndexedMesh,
    moving: &IndexedMesh,
    params: &RegistrationParams,
) -> RegistrationResult<RegistrationOutput> {
    let transform = AffineTransform::identity().with_center(moving.bounds().center());
    register_with_transform(fixed, moving, transform, params)
}

/// Register and, on success, overwrite `moving`'s vertices in place.
///
/// Positions are transformed and normals are cleared, as in
/// [`RegistrationOutput::registered`]. On error `moving` is left untouched.
///
/// # Errors
///
/// See [`register`].
pub fn register_in_place(
    fixed: &IndexedMesh,
    moving: &mut IndexedMesh,
    params: &RegistrationParams,
) -> RegistrationResult<RegistrationOutput> {
    let output = register(fixed, moving, params)?;
    moving.vertices.clone_from(&output.registered.vertices);
    Ok(output)
}

/// Register starting from any parametric transform.
///
/// # Errors
///
/// See [`register`].
pub fn register_with_transform<T: ParametricTransform>(
    fixed: &IndexedMesh,
    moving: &IndexedMesh,
    initial: T,
    params: &RegistrationParams,
) -> RegistrationResult<RegistrationOutput<T>> {
    params.validate()?;
    for (mesh, role) in [(moving, MeshRole::Moving), (fixed, MeshRole::Fixed)] {
        if mesh.vertices.is_empty() {
            return Err(RegistrationError::EmptyMesh { role });
        }
    }

    let fixed = linked(fixed);
    let moving = linked(moving);
    let domain = VirtualDomain::from_bounds(&moving.bounds(), params.samples_along_diagonal)?;

    info!(
        fixed_vertices = fixed.vertices.len(),
        moving_vertices = moving.vertices.len(),
        parameters = initial.parameter_count(),
        levels = params.number_of_levels,
        "Starting thin-shell registration"
    );

    let mut metric = ThinShellMetric::new(&fixed, &moving, initial, params.metric.clone())
        .with_virtual_domain(domain.clone());
    metric.initialize()?;

    let samples = match params.scales_sampling {
        ScalesSampling::ShellVertices => metric.virtual_transformed_points().to_vec(),
        ScalesSampling::VirtualDomain => domain.points(),
    };

    let mut levels = Vec::with_capacity(params.number_of_levels);
    for level in 0..params.number_of_levels {
        let estimator = ScalesEstimator::new(samples.clone(), params.small_parameter_variation)?;
        let optimization =
            ConjugateGradientOptimizer::new(&mut metric, estimator, params.optimizer.clone())?
                .run()?;
        info!(
            level,
            iterations = optimization.iterations(),
            initial = optimization.initial_value,
            value = optimization.final_value,
            stop = ?optimization.stop_reason,
            "Level finished"
        );
        levels.push(LevelSummary {
            level,
            optimization,
        });
    }

    let transform = metric.into_transform();
    if let Some(index) = transform.parameters().iter().position(|p| !p.is_finite()) {
        return Err(RegistrationError::NoValidParameters(format!(
            "parameter {index} is not finite"
        )));
    }

    let (initial_value, final_value) = match (levels.first(), levels.last()) {
        (Some(first), Some(last)) => (
            first.optimization.initial_value,
            last.optimization.final_value,
        ),
        _ => {
            return Err(RegistrationError::NoValidParameters(
                "no optimization level ran".to_string(),
            ))
        }
    };

    let registered = transform_mesh(&moving, &transform);

    info!(initial_value, final_value, "Registration finished");

    Ok(RegistrationOutput {
        transform,
        initial_value,
        final_value,
        levels,
        registered,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::{ErrorKind, OptimizerParams, ThinShellParams, TranslationTransform};
    use mesh_types::{icosphere, unit_icosahedron, Vector3};

    fn quick_params() -> RegistrationParams {
        RegistrationParams::new()
            .with_metric(
                ThinShellParams::new()
                    .with_bend_weight(0.0)
                    .with_feature_weight(0.0)
                    .with_confidence_weighting(false),
            )
            .with_optimizer(OptimizerParams::new().with_number_of_iterations(10))
    }

    #[test]
    fn inputs_are_not_modified() {
        let fixed = unit_icosahedron();
        let mut moving = fixed.clone();
        moving.translate(Vector3::new(0.1, 0.0, 0.0));
        let before = moving.clone();

        let output = register(&fixed, &moving, &quick_params()).unwrap();
        assert_eq!(moving.vertices, before.vertices);
        assert!(!moving.has_current_links());
        assert_ne!(output.registered.vertices, before.vertices);
    }

    #[test]
    fn in_place_matches_registered_output() {
        let fixed = unit_icosahedron();
        let mut moving = fixed.clone();
        moving.translate(Vector3::new(0.0, 0.1, 0.0));

        let output = register_in_place(&fixed, &mut moving, &quick_params()).unwrap();
        assert_eq!(moving.vertices, output.registered.vertices);
    }

    #[test]
    fn registered_vertices_carry_no_normals() {
        let fixed = unit_icosahedron();
        let mut moving = fixed.clone();
        moving.translate(Vector3::new(0.05, 0.0, 0.1));
        for v in &mut moving.vertices {
            v.normal = Some(v.position.coords.normalize());
        }

        let output = register(&fixed, &moving, &quick_params()).unwrap();
        assert!(output.registered.vertices.iter().all(|v| v.normal.is_none()));

        register_in_place(&fixed, &mut moving, &quick_params()).unwrap();
        assert!(moving.vertices.iter().all(|v| v.normal.is_none()));
        assert_eq!(moving.vertices, output.registered.vertices);
    }

    #[test]
    fn failure_leaves_moving_untouched() {
        let fixed = unit_icosahedron();
        let mut moving = unit_icosahedron();
        moving.faces.clear();
        let before = moving.clone();

        let err = register_in_place(&fixed, &mut moving, &quick_params()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(matches!(
            err,
            RegistrationError::NoCells {
                role: MeshRole::Moving
            }
        ));
        assert_eq!(moving.vertices, before.vertices);
    }

    #[test]
    fn empty_fixed_mesh_rejected() {
        let moving = unit_icosahedron();
        let err = register(&IndexedMesh::new(), &moving, &quick_params()).unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::EmptyMesh {
                role: MeshRole::Fixed
            }
        ));
    }

    #[test]
    fn invalid_params_rejected_before_work() {
        let mesh = unit_icosahedron();
        let params = quick_params().with_samples_along_diagonal(0);
        assert!(matches!(
            register(&mesh, &mesh, &params),
            Err(RegistrationError::InvalidParameter(_))
        ));
    }

    #[test]
    fn levels_chain() {
        let fixed = icosphere(1);
        let mut moving = fixed.clone();
        moving.translate(Vector3::new(0.05, 0.05, 0.0));

        let params = quick_params().with_number_of_levels(2);
        let output = register(&fixed, &moving, &params).unwrap();
        assert_eq!(output.levels.len(), 2);
        assert_eq!(output.levels[1].level, 1);
        let (first, second) = (&output.levels[0], &output.levels[1]);
        assert!(second.optimization.initial_value <= first.optimization.final_value);
        assert_eq!(output.final_value, output.levels[1].optimization.final_value);
    }

    #[test]
    fn translation_transform_through_driver() {
        let fixed = unit_icosahedron();
        let mut moving = fixed.clone();
        moving.translate(Vector3::new(0.0, 0.0, 0.1));

        let params = quick_params().with_scales_sampling(ScalesSampling::VirtualDomain);
        let output =
            register_with_transform(&fixed, &moving, TranslationTransform::default(), &params)
                .unwrap();
        assert!(output.transform.offset.z < 0.0);
        assert!(output.total_iterations() > 0);
    }
}
