//! Deformable surface registration with the thin-shell demons metric.
//!
//! Given a fixed (target) mesh and a moving mesh, this crate finds a
//! parametric transform that carries the moving mesh onto the fixed one.
//! The moving mesh is treated as an elastic shell: each of its vertices is
//! pulled toward the closest point on the fixed surface, while stretch and
//! bend energies keep the pull field smooth over the shell.
//!
//! # Pipeline
//!
//! - [`CorrespondenceFinder`] - closest points on the fixed surface (BVH) and
//!   optional curvature/normal feature matches (kd-tree)
//! - [`ConfidenceWeighter`] - Gaussian down-weighting of far matches
//! - [`EnergyAccumulator`] - stretch, bend and feature energies with
//!   per-vertex gradients
//! - [`ThinShellMetric`] - one evaluation: value plus parameter gradient
//! - [`ScalesEstimator`] - parameter scales from physical shift
//! - [`ConjugateGradientOptimizer`] - Polak-Ribiere conjugate gradient with a
//!   golden-section line search
//! - [`register`] - the whole run, returning the transform and the
//!   registered mesh
//!
//! # Quick Start
//!
//! ```
//! use mesh_registration::{register, OptimizerParams, RegistrationParams, ThinShellParams};
//! use mesh_types::{unit_icosahedron, Vector3};
//!
//! let fixed = unit_icosahedron();
//! let mut moving = fixed.clone();
//! moving.translate(Vector3::new(0.1, 0.0, 0.0));
//!
//! let params = RegistrationParams::new()
//!     .with_metric(ThinShellParams::new().with_bend_weight(0.0).with_feature_weight(0.0))
//!     .with_optimizer(OptimizerParams::new().with_number_of_iterations(20));
//!
//! let output = register(&fixed, &moving, &params).unwrap();
//! println!("value {} -> {}", output.initial_value, output.final_value);
//! println!("offset {:?}", output.transform.offset());
//! ```
//!
//! # Mesh Roles
//!
//! Correspondences start at moving-mesh vertices and land on the fixed
//! surface, so the spatial indices are built over the fixed mesh and the
//! shell energies over the moving mesh's edges and hinges. Both meshes need
//! cell links; [`register`] builds them on private copies when missing.
//!
//! # Determinism
//!
//! Per-vertex and per-element work runs on rayon, but results are gathered
//! in index order and summed sequentially. Two runs on the same input give
//! bit-identical parameters.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Safety: Deny unwrap/expect in library code. Tests may use them (workspace warns).
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![allow(clippy::module_name_repetitions)]

mod confidence;
mod correspondence;
mod domain;
mod driver;
mod energy;
mod error;
mod metric;
mod optimizer;
mod params;
mod scales;
mod spatial;
mod transform;

pub use confidence::{edge_weight, hinge_weight, ConfidenceWeighter, EvaluationContext};
pub use correspondence::{
    compute_descriptors, Correspondence, CorrespondenceFinder, FeatureMatch, VertexDescriptor,
};
pub use domain::{VirtualDomain, ORIGIN_OFFSET, SIZE_INFLATION};
pub use driver::{
    register, register_in_place, register_with_transform, LevelSummary, RegistrationOutput,
};
pub use energy::{EnergyAccumulator, EnergyEvaluation, EnergyTerms, ShellGeometry};
pub use error::{ElementKind, ErrorKind, MeshRole, RegistrationError, RegistrationResult};
pub use metric::{MetricEvaluation, MetricState, ThinShellMetric};
pub use optimizer::{
    ConjugateGradientOptimizer, ConvergenceMonitor, IterationReport, OptimizationSummary,
    StepOutcome, StopReason,
};
pub use params::{
    LineSearchParams, OptimizerParams, RegistrationParams, ScalesSampling, ThinShellParams,
};
pub use scales::{ScalesEstimator, SMALL_PARAMETER_VARIATION};
pub use spatial::{SurfaceHit, SurfaceIndex, VertexIndex};
pub use transform::{AffineTransform, ParametricTransform, TranslationTransform};

use mesh_types::IndexedMesh;

/// Applies a transform to a mesh, returning a new transformed mesh.
///
/// Stored vertex normals are dropped, since a general transform does not
/// preserve them. Cell links are kept.
///
/// # Example
///
/// ```
/// use mesh_registration::{transform_mesh, TranslationTransform};
/// use mesh_types::{IndexedMesh, Vertex};
/// use nalgebra::Vector3;
///
/// let mut mesh = IndexedMesh::new();
/// mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0));
/// mesh.vertices.push(Vertex::from_coords(1.0, 0.0, 0.0));
///
/// let transform = TranslationTransform::new(Vector3::new(5.0, 0.0, 0.0));
/// let transformed = transform_mesh(&mesh, &transform);
///
/// assert!((transformed.vertices[0].position.x - 5.0).abs() < 1e-10);
/// ```
#[must_use]
pub fn transform_mesh<T: ParametricTransform>(mesh: &IndexedMesh, transform: &T) -> IndexedMesh {
    let mut result = mesh.clone();
    result.transform_points(|p| transform.transform_point(p));
    for v in &mut result.vertices {
        v.normal = None;
    }
    result
}

/// Vertex-to-vertex error between a transformed source and a target.
///
/// Returns `(rms, max)` over corresponding vertex indices.
///
/// # Errors
///
/// [`RegistrationError::InvalidParameter`] if the meshes have different
/// vertex counts, [`RegistrationError::EmptyMesh`] if they are empty.
///
/// # Example
///
/// ```
/// use mesh_registration::{compute_alignment_error, TranslationTransform};
/// use mesh_types::{IndexedMesh, Vertex};
/// use nalgebra::Vector3;
///
/// let mut source = IndexedMesh::new();
/// source.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0));
/// source.vertices.push(Vertex::from_coords(1.0, 0.0, 0.0));
///
/// let mut target = IndexedMesh::new();
/// target.vertices.push(Vertex::from_coords(5.0, 0.0, 0.0));
/// target.vertices.push(Vertex::from_coords(6.0, 0.0, 0.0));
///
/// let transform = TranslationTransform::new(Vector3::new(5.0, 0.0, 0.0));
/// let (rms, max) = compute_alignment_error(&source, &target, &transform).unwrap();
///
/// assert!(rms < 1e-10);
/// assert!(max < 1e-10);
/// ```
pub fn compute_alignment_error<T: ParametricTransform>(
    source: &IndexedMesh,
    target: &IndexedMesh,
    transform: &T,
) -> RegistrationResult<(f64, f64)> {
    if source.vertices.len() != target.vertices.len() {
        return Err(RegistrationError::invalid_parameter(format!(
            "vertex counts differ: {} vs {}",
            source.vertices.len(),
            target.vertices.len()
        )));
    }
    if source.vertices.is_empty() {
        return Err(RegistrationError::EmptyMesh {
            role: MeshRole::Moving,
        });
    }

    let (sum_sq, max) = source
        .vertices
        .iter()
        .zip(&target.vertices)
        .map(|(s, t)| (transform.transform_point(&s.position) - t.position).norm())
        .fold((0.0, 0.0_f64), |(sum, max), d| (d.mul_add(d, sum), max.max(d)));

    #[allow(clippy::cast_precision_loss)]
    let rms = (sum_sq / source.vertices.len() as f64).sqrt();
    Ok((rms, max))
}
