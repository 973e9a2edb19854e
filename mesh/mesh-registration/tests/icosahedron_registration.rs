//! End-to-end registration on small closed meshes.
//!
//! Run with: cargo test -p mesh-registration --test icosahedron_registration

#![allow(clippy::unwrap_used, clippy::float_cmp)]

use approx::assert_relative_eq;
use mesh_registration::{
    compute_alignment_error, register, register_in_place, register_with_transform, ErrorKind,
    OptimizerParams, ParametricTransform, RegistrationParams, StopReason, ThinShellParams,
    TranslationTransform,
};
use mesh_types::{icosphere, unit_icosahedron, IndexedMesh, Vector3, Vertex};

fn stretch_only(iterations: usize) -> RegistrationParams {
    RegistrationParams::new()
        .with_metric(
            ThinShellParams::new()
                .with_stretch_weight(1.0)
                .with_bend_weight(0.0)
                .with_feature_weight(0.0)
                .with_confidence_weighting(false),
        )
        .with_optimizer(OptimizerParams::new().with_number_of_iterations(iterations))
}

fn shifted(mesh: &IndexedMesh, offset: Vector3<f64>) -> IndexedMesh {
    let mut moved = mesh.clone();
    moved.translate(offset);
    moved
}

/// Unit square in the z = 0 plane, `n` by `n` vertices, two triangles per cell.
fn flat_grid(n: u32) -> IndexedMesh {
    let step = 1.0 / f64::from(n - 1);
    let mut mesh = IndexedMesh::new();
    for j in 0..n {
        for i in 0..n {
            mesh.vertices.push(Vertex::from_coords(
                f64::from(i) * step,
                f64::from(j) * step,
                0.0,
            ));
        }
    }
    for j in 0..n - 1 {
        for i in 0..n - 1 {
            let a = j * n + i;
            mesh.faces.push([a, a + 1, a + n + 1]);
            mesh.faces.push([a, a + n + 1, a + n]);
        }
    }
    mesh
}

// =============================================================================
// Recovery
// =============================================================================

#[test]
fn translation_is_recovered() {
    let fixed = unit_icosahedron();
    let offset = Vector3::new(0.2, -0.1, 0.15);
    let moving = shifted(&fixed, offset);

    let output =
        register_with_transform(&fixed, &moving, TranslationTransform::default(), &stretch_only(50))
            .unwrap();

    assert!(output.final_value < output.initial_value);
    let recovered = output.transform.offset;
    assert!(
        (recovered + offset).norm() < 1e-3 * offset.norm(),
        "recovered {recovered:?} for offset {offset:?}"
    );
}

#[test]
fn affine_registration_recovers_translation() {
    let fixed = unit_icosahedron();
    let offset = Vector3::new(0.2, -0.1, 0.15);
    let moving = shifted(&fixed, offset);

    let output = register(&fixed, &moving, &stretch_only(50)).unwrap();

    assert!(output.final_value < output.initial_value);
    assert_eq!(output.transform.parameter_count(), 12);
    assert_eq!(output.registered.vertices.len(), moving.vertices.len());
    assert_eq!(output.registered.faces, moving.faces);
    assert!(output.total_iterations() <= 50);

    let parameters = output.transform.parameters();
    for axis in 0..3 {
        assert_relative_eq!(parameters[9 + axis], -offset[axis], max_relative = 1e-3);
    }

    let (rms, max) = compute_alignment_error(&moving, &fixed, &output.transform).unwrap();
    assert!(rms < 1e-3 * offset.norm(), "rms {rms}");
    assert!(max < 1e-2 * offset.norm(), "max {max}");
}

#[test]
fn flat_grid_registers_with_default_metric() {
    let fixed = flat_grid(12);
    let moving = shifted(&fixed, Vector3::new(0.01, 0.0, 0.02));

    let params = RegistrationParams::new()
        .with_optimizer(OptimizerParams::new().with_number_of_iterations(10));
    let output = register(&fixed, &moving, &params).unwrap();

    assert!(output.final_value.is_finite());
    assert!(output
        .transform
        .parameters()
        .iter()
        .all(|p| p.is_finite()));
    assert_eq!(output.registered.vertices.len(), 144);
}

#[test]
fn full_metric_runs_on_icosphere() {
    let fixed = icosphere(2);
    let moving = shifted(&fixed, Vector3::new(0.05, 0.03, -0.02));

    let params = RegistrationParams::new()
        .with_optimizer(OptimizerParams::new().with_number_of_iterations(10));
    let output = register(&fixed, &moving, &params).unwrap();

    assert!(output.final_value.is_finite());
    assert!(output.final_value <= output.initial_value);
    assert!(output
        .transform
        .parameters()
        .iter()
        .all(|p| p.is_finite()));
}

#[test]
fn identical_meshes_stop_at_once() {
    let fixed = unit_icosahedron();
    let output = register(&fixed, &fixed, &stretch_only(20)).unwrap();

    assert_eq!(output.initial_value, 0.0);
    assert_eq!(output.final_value, 0.0);
    assert_eq!(output.levels[0].optimization.stop_reason, StopReason::Converged);
    assert!(output.transform.is_identity(1e-12));
}

// =============================================================================
// Determinism and failure handling
// =============================================================================

#[test]
fn repeated_runs_are_identical() {
    let fixed = unit_icosahedron();
    let moving = shifted(&fixed, Vector3::new(0.1, 0.05, -0.05));
    let params = stretch_only(15);

    let first = register(&fixed, &moving, &params).unwrap();
    let second = register(&fixed, &moving, &params).unwrap();

    assert_eq!(
        first.transform.parameters(),
        second.transform.parameters()
    );
    assert_eq!(first.final_value, second.final_value);
    assert_eq!(first.registered.vertices, second.registered.vertices);
}

#[test]
fn moving_without_cells_fails_without_side_effects() {
    let fixed = unit_icosahedron();
    let mut moving = unit_icosahedron();
    moving.faces.clear();
    let before = moving.clone();

    let err = register_in_place(&fixed, &mut moving, &stretch_only(5)).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(moving.vertices, before.vertices);
}

#[test]
fn bad_parameters_are_configuration_errors() {
    let mesh = unit_icosahedron();
    let params = stretch_only(5).with_metric(ThinShellParams::new().with_stretch_weight(-1.0));

    let err = register(&mesh, &mesh, &params).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}
