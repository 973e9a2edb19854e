//! Property-based tests for confidence weights and shell energies.
//!
//! Run with: cargo test -p mesh-registration -- proptest

#![allow(clippy::unwrap_used)]

use mesh_registration::{
    ConfidenceWeighter, Correspondence, CorrespondenceFinder, EnergyAccumulator, ShellGeometry,
    ThinShellParams,
};
use mesh_types::{unit_icosahedron, IndexedMesh, Point3, Vector3};
use proptest::prelude::*;

// =============================================================================
// Strategies
// =============================================================================

fn arb_distance() -> impl Strategy<Value = f64> {
    0.0..10.0f64
}

fn arb_params() -> impl Strategy<Value = ThinShellParams> {
    (any::<bool>(), 0.01..5.0f64, 0.0..=1.0f64).prop_map(|(max_sigma, sigma, boundary)| {
        ThinShellParams::new()
            .with_maximal_distance_sigma(max_sigma)
            .with_confidence_sigma(sigma)
            .with_boundary_confidence(boundary)
    })
}

fn arb_offset() -> impl Strategy<Value = Vector3<f64>> {
    prop::array::uniform3(-0.3..0.3f64).prop_map(|[x, y, z]| Vector3::new(x, y, z))
}

fn record(vertex: usize, distance: f64) -> Correspondence {
    Correspondence {
        vertex,
        transformed: Point3::origin(),
        target: Point3::new(distance, 0.0, 0.0),
        target_face: 0,
        distance,
        feature: None,
    }
}

fn linked_icosahedron() -> IndexedMesh {
    let mut mesh = unit_icosahedron();
    mesh.build_cell_links();
    mesh
}

// =============================================================================
// Confidence weights
// =============================================================================

proptest! {
    #[test]
    fn proptest_weights_in_unit_interval(
        params in arb_params(),
        distances in prop::collection::vec(arb_distance(), 1..20),
        boundary in prop::collection::vec(any::<bool>(), 20),
    ) {
        let weighter = ConfidenceWeighter::new(&params, boundary);
        let records: Vec<_> = distances.iter().enumerate().map(|(i, &d)| record(i, d)).collect();
        let context = weighter.context(&records);

        for w in weighter.weights(&records, &context) {
            prop_assert!((0.0..=1.0).contains(&w), "weight {} out of range", w);
        }
    }

    #[test]
    fn proptest_zero_distance_has_full_weight(
        params in arb_params(),
        distances in prop::collection::vec(arb_distance(), 1..20),
    ) {
        let weighter = ConfidenceWeighter::new(&params, vec![true; distances.len()]);
        let records: Vec<_> = distances.iter().enumerate().map(|(i, &d)| record(i, d)).collect();
        let context = weighter.context(&records);

        prop_assert!((weighter.weight(0, 0.0, &context) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn proptest_weights_do_not_grow_with_distance(
        params in arb_params(),
        a in arb_distance(),
        b in arb_distance(),
    ) {
        let (near, far) = if a <= b { (a, b) } else { (b, a) };
        let weighter = ConfidenceWeighter::new(&params, vec![false; 2]);
        let records = [record(0, near), record(1, far)];
        let context = weighter.context(&records);

        prop_assert!(weighter.weight(1, far, &context) <= weighter.weight(0, near, &context));
    }
}

// =============================================================================
// Shell energies
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn proptest_energy_terms_non_negative(
        offset in arb_offset(),
        stretch in 0.0..5.0f64,
        bend in 0.0..5.0f64,
    ) {
        let fixed = linked_icosahedron();
        let shell = linked_icosahedron();
        let params = ThinShellParams::new()
            .with_stretch_weight(stretch)
            .with_bend_weight(bend)
            .with_feature_weight(0.0);

        let geometry = ShellGeometry::new(&shell.positions(), &shell.faces, shell.links().unwrap());
        let finder = CorrespondenceFinder::new(&fixed, None).unwrap();
        let moved: Vec<_> = shell.positions().iter().map(|p| p + offset).collect();
        let correspondences = finder.find(&moved).unwrap();

        let weighter = ConfidenceWeighter::from_links(&params, shell.links().unwrap());
        let context = weighter.context(&correspondences);
        let weights = weighter.weights(&correspondences, &context);
        let evaluation =
            EnergyAccumulator::new(&geometry, &params).evaluate(&correspondences, &weights);

        let terms = evaluation.terms;
        prop_assert!(terms.stretch >= 0.0);
        prop_assert!(terms.bend >= 0.0);
        prop_assert!(terms.feature.abs() < f64::EPSILON);
        prop_assert!(terms.total.is_finite());
        prop_assert_eq!(evaluation.vertex_gradients.len(), shell.vertices.len());
    }
}
