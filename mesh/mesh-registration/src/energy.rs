//! Thin-shell energy of the residual displacement field.
//!
//! With correspondences and weights frozen for one evaluation, every shell
//! vertex carries a residual `u_i = q_i - y_i` from its transformed position
//! `y_i` to its match `q_i`. The shell energy of that field has three parts:
//!
//! - **Stretch**, per edge `(i, j)` of reference length `l`:
//!   `w / l * [ (|u_i|^2 + |u_j|^2) / 2 + |u_j - u_i|^2 ]`
//! - **Bend**, per hinge with edge `(c, d)`, wings `a`, `b` and reference
//!   wing areas `A1`, `A2`: `3 w / (A1 + A2) * |u_a + u_b - u_c - u_d|^2`
//! - **Feature**, per vertex with a feature match `f_i` at descriptor
//!   distance `delta_i`: `w_i * (|f_i - y_i|^2 + delta_i^2)`
//!
//! Elements are evaluated in parallel and summed in index order, so the
//! result does not depend on thread scheduling. An element whose value or
//! gradient is not finite is skipped and counted.

use mesh_types::{CellLinks, Hinge, Point3, Triangle, Vector3};
use rayon::prelude::*;
use tracing::debug;

use crate::confidence::{edge_weight, hinge_weight};
use crate::correspondence::{Correspondence, FeatureMatch};
use crate::{ElementKind, RegistrationError, ThinShellParams};

/// Reference geometry of the shell, fixed for a whole registration.
#[derive(Debug, Clone)]
pub struct ShellGeometry {
    edges: Vec<[u32; 2]>,
    rest_lengths: Vec<f64>,
    hinges: Vec<Hinge>,
    hinge_areas: Vec<f64>,
}

impl ShellGeometry {
    /// Record edge lengths and hinge areas of the undeformed shell.
    #[must_use]
    pub fn new(positions: &[Point3<f64>], faces: &[[u32; 3]], links: &CellLinks) -> Self {
        let edges = links.edges().to_vec();
        let rest_lengths = edges
            .iter()
            .map(|&[i, j]| (positions[j as usize] - positions[i as usize]).norm())
            .collect();

        let face_area = |f: u32| {
            let [a, b, c] = faces[f as usize];
            Triangle::new(
                positions[a as usize],
                positions[b as usize],
                positions[c as usize],
            )
            .area()
        };
        let hinges = links.hinges().to_vec();
        let hinge_areas = hinges
            .iter()
            .map(|h| face_area(h.faces[0]) + face_area(h.faces[1]))
            .collect();

        Self {
            edges,
            rest_lengths,
            hinges,
            hinge_areas,
        }
    }

    /// Unique shell edges.
    #[must_use]
    pub fn edges(&self) -> &[[u32; 2]] {
        &self.edges
    }

    /// Interior edges with both wings.
    #[must_use]
    pub fn hinges(&self) -> &[Hinge] {
        &self.hinges
    }
}

/// Weighted values of the three energy terms.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EnergyTerms {
    /// `stretch_weight * sum S`.
    pub stretch: f64,
    /// `bend_weight * sum B`.
    pub bend: f64,
    /// `feature_weight * sum F`.
    pub feature: f64,
    /// Sum of the three.
    pub total: f64,
    /// Elements left out for producing non-finite values.
    pub skipped_elements: usize,
}

/// Energy value with its gradient per shell vertex.
#[derive(Debug, Clone)]
pub struct EnergyEvaluation {
    /// Term breakdown.
    pub terms: EnergyTerms,
    /// `dE / dy_i` for every shell vertex.
    pub vertex_gradients: Vec<Vector3<f64>>,
}

/// Sums the weighted thin-shell energy over a shell.
#[derive(Debug, Clone, Copy)]
pub struct EnergyAccumulator<'a> {
    geometry: &'a ShellGeometry,
    params: &'a ThinShellParams,
}

type Contribution<const N: usize> = Option<(f64, [Vector3<f64>; N])>;

fn finite<const N: usize>(value: f64, grads: [Vector3<f64>; N]) -> Contribution<N> {
    let ok = value.is_finite() && grads.iter().all(|g| g.iter().all(|c| c.is_finite()));
    ok.then_some((value, grads))
}

impl<'a> EnergyAccumulator<'a> {
    /// Bind the accumulator to a shell and its term weights.
    #[must_use]
    pub const fn new(geometry: &'a ShellGeometry, params: &'a ThinShellParams) -> Self {
        Self { geometry, params }
    }

    /// Evaluate the energy.
    ///
    /// `correspondences` and `weights` are indexed by shell vertex. Records
    /// without a feature match add nothing to the feature term.
    #[must_use]
    pub fn evaluate(
        &self,
        correspondences: &[Correspondence],
        weights: &[f64],
    ) -> EnergyEvaluation {
        let residuals: Vec<Vector3<f64>> =
            correspondences.iter().map(Correspondence::residual).collect();
        let mut gradients = vec![Vector3::zeros(); correspondences.len()];
        let mut terms = EnergyTerms::default();

        if self.params.stretch_weight > 0.0 {
            let elements = self.stretch_elements(&residuals, weights);
            terms.stretch = reduce(
                ElementKind::Edge,
                elements,
                |k| self.geometry.edges[k].map(|v| v as usize),
                self.params.stretch_weight,
                &mut gradients,
                &mut terms.skipped_elements,
            );
        }

        if self.params.bend_weight > 0.0 {
            let elements = self.bend_elements(&residuals, weights);
            terms.bend = reduce(
                ElementKind::Hinge,
                elements,
                |k| {
                    let h = &self.geometry.hinges[k];
                    [h.opposite[0], h.opposite[1], h.edge[0], h.edge[1]].map(|v| v as usize)
                },
                self.params.bend_weight,
                &mut gradients,
                &mut terms.skipped_elements,
            );
        }

        if self.params.feature_weight > 0.0 {
            let featured: Vec<(&Correspondence, &FeatureMatch)> = correspondences
                .iter()
                .filter_map(|c| c.feature.as_ref().map(|f| (c, f)))
                .collect();
            let elements = feature_elements(&featured, weights);
            terms.feature = reduce(
                ElementKind::Vertex,
                elements,
                |k| [featured[k].0.vertex],
                self.params.feature_weight,
                &mut gradients,
                &mut terms.skipped_elements,
            );
        }

        terms.total = terms.stretch + terms.bend + terms.feature;
        EnergyEvaluation {
            terms,
            vertex_gradients: gradients,
        }
    }

    /// Per-edge stretch values and `dS/dy` for both endpoints.
    fn stretch_elements(
        &self,
        residuals: &[Vector3<f64>],
        weights: &[f64],
    ) -> Vec<Contribution<2>> {
        self.geometry
            .edges
            .par_iter()
            .zip(self.geometry.rest_lengths.par_iter())
            .map(|(&edge, &length)| {
                let (ui, uj) = (residuals[edge[0] as usize], residuals[edge[1] as usize]);
                let c = edge_weight(weights, edge) / length;
                let delta = uj - ui;
                let value =
                    c * 0.5f64.mul_add(ui.norm_squared() + uj.norm_squared(), delta.norm_squared());
                // dS/du, negated for dS/dy.
                let gi = -(ui - delta * 2.0) * c;
                let gj = -(uj + delta * 2.0) * c;
                finite(value, [gi, gj])
            })
            .collect()
    }

    /// Per-hinge bend values and `dB/dy` for `[a, b, c, d]`.
    fn bend_elements(&self, residuals: &[Vector3<f64>], weights: &[f64]) -> Vec<Contribution<4>> {
        self.geometry
            .hinges
            .par_iter()
            .zip(self.geometry.hinge_areas.par_iter())
            .map(|(hinge, &area)| {
                let u = |v: u32| residuals[v as usize];
                let kappa = u(hinge.opposite[0]) + u(hinge.opposite[1])
                    - u(hinge.edge[0])
                    - u(hinge.edge[1]);
                let k = 3.0 * hinge_weight(weights, hinge) / area;
                let value = k * kappa.norm_squared();
                let g = kappa * (2.0 * k);
                finite(value, [-g, -g, g, g])
            })
            .collect()
    }
}

/// Add element values and gradients in index order, scaled by the term weight.
fn reduce<const N: usize>(
    kind: ElementKind,
    elements: Vec<Contribution<N>>,
    vertices: impl Fn(usize) -> [usize; N],
    scale: f64,
    gradients: &mut [Vector3<f64>],
    skipped: &mut usize,
) -> f64 {
    let mut sum = 0.0;
    for (index, element) in elements.into_iter().enumerate() {
        let Some((value, grads)) = element else {
            *skipped += 1;
            let err = RegistrationError::NumericDegeneracy {
                element: kind,
                index,
            };
            debug!(error = %err, "Skipping element");
            continue;
        };
        sum += value;
        for (v, g) in vertices(index).into_iter().zip(grads) {
            gradients[v] += g * scale;
        }
    }
    sum * scale
}

/// Per-vertex feature values and `dF/dy`.
fn feature_elements(
    featured: &[(&Correspondence, &FeatureMatch)],
    weights: &[f64],
) -> Vec<Contribution<1>> {
    featured
        .par_iter()
        .map(|&(c, f)| {
            let w = weights[c.vertex];
            let r = f.point - c.transformed;
            let value = w * (r.norm_squared() + f.descriptor_distance * f.descriptor_distance);
            finite(value, [r * (-2.0 * w)])
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mesh_types::{icosphere, unit_icosahedron, IndexedMesh, Vertex};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn shell(mesh: &mut IndexedMesh) -> ShellGeometry {
        mesh.build_cell_links();
        ShellGeometry::new(&mesh.positions(), &mesh.faces, mesh.links().unwrap())
    }

    fn records(transformed: &[Point3<f64>], targets: &[Point3<f64>]) -> Vec<Correspondence> {
        with_features(transformed, targets, None)
    }

    fn with_features(
        transformed: &[Point3<f64>],
        targets: &[Point3<f64>],
        features: Option<&[FeatureMatch]>,
    ) -> Vec<Correspondence> {
        transformed
            .iter()
            .zip(targets)
            .enumerate()
            .map(|(vertex, (y, q))| Correspondence {
                vertex,
                transformed: *y,
                target: *q,
                target_face: 0,
                distance: (q - y).norm(),
                feature: features.map(|f| f[vertex]),
            })
            .collect()
    }

    fn features_at(points: &[Point3<f64>], delta: f64) -> Vec<FeatureMatch> {
        points
            .iter()
            .enumerate()
            .map(|(i, p)| FeatureMatch {
                target_vertex: i,
                point: *p,
                descriptor_distance: delta,
            })
            .collect()
    }

    #[test]
    fn zero_residual_has_zero_energy() {
        let mut mesh = unit_icosahedron();
        let geometry = shell(&mut mesh);
        let params = ThinShellParams::default();
        let acc = EnergyAccumulator::new(&geometry, &params);

        let points = mesh.positions();
        let features = features_at(&points, 0.0);
        let corr = with_features(&points, &points, Some(&features));
        let eval = acc.evaluate(&corr, &vec![1.0; points.len()]);

        assert_eq!(eval.terms.total, 0.0);
        assert_eq!(eval.terms.skipped_elements, 0);
        assert!(eval.vertex_gradients.iter().all(|g| g.norm() == 0.0));
    }

    #[test]
    fn single_edge_stretch_value() {
        let mut mesh = IndexedMesh::from_parts(
            vec![
                Vertex::from_coords(0.0, 0.0, 0.0),
                Vertex::from_coords(2.0, 0.0, 0.0),
                Vertex::from_coords(0.0, 2.0, 0.0),
            ],
            vec![[0, 1, 2]],
        );
        let geometry = shell(&mut mesh);
        let params = ThinShellParams::new().with_bend_weight(0.0).with_feature_weight(0.0);
        let acc = EnergyAccumulator::new(&geometry, &params);

        // Uniform unit residual: only the absolute part of each edge counts.
        let points = mesh.positions();
        let targets: Vec<_> = points.iter().map(|p| p + Vector3::z()).collect();
        let eval = acc.evaluate(&records(&points, &targets), &[1.0; 3]);

        let expected = 1.0 / 2.0 + 1.0 / 2.0 + 1.0 / 8.0_f64.sqrt();
        assert_relative_eq!(eval.terms.stretch, expected, epsilon = 1e-12);
        assert_eq!(eval.terms.bend, 0.0);
    }

    #[test]
    fn gradients_match_finite_differences() {
        let mut mesh = icosphere(1);
        let geometry = shell(&mut mesh);
        let params = ThinShellParams::new()
            .with_stretch_weight(1.5)
            .with_bend_weight(0.7)
            .with_feature_weight(2.0);
        let acc = EnergyAccumulator::new(&geometry, &params);

        let mut rng = StdRng::seed_from_u64(11);
        let jitter = |rng: &mut StdRng| {
            Vector3::new(
                rng.gen_range(-0.1..0.1),
                rng.gen_range(-0.1..0.1),
                rng.gen_range(-0.1..0.1),
            )
        };
        let base = mesh.positions();
        let targets: Vec<_> = base.iter().map(|p| p + jitter(&mut rng)).collect();
        let feature_points: Vec<_> = base.iter().map(|p| p + jitter(&mut rng)).collect();
        let features = features_at(&feature_points, 0.05);
        let weights: Vec<f64> = (0..base.len()).map(|_| rng.gen_range(0.2..1.0)).collect();
        let y: Vec<_> = base.iter().map(|p| p + jitter(&mut rng)).collect();

        let energy = |y: &[Point3<f64>]| {
            acc.evaluate(&with_features(y, &targets, Some(&features)), &weights)
                .terms
                .total
        };
        let analytic = acc
            .evaluate(&with_features(&y, &targets, Some(&features)), &weights)
            .vertex_gradients;

        let h = 1e-6;
        for v in [0, 5, 17, 41] {
            for axis in 0..3 {
                let mut plus = y.clone();
                let mut minus = y.clone();
                plus[v][axis] += h;
                minus[v][axis] -= h;
                let numeric = (energy(&plus) - energy(&minus)) / (2.0 * h);
                assert_relative_eq!(
                    analytic[v][axis],
                    numeric,
                    epsilon = 1e-5,
                    max_relative = 1e-5
                );
            }
        }
    }

    #[test]
    fn zero_weight_terms_are_skipped() {
        let mut mesh = unit_icosahedron();
        let geometry = shell(&mut mesh);
        let params = ThinShellParams::new()
            .with_stretch_weight(0.0)
            .with_bend_weight(0.0)
            .with_feature_weight(0.0);
        let acc = EnergyAccumulator::new(&geometry, &params);

        let points = mesh.positions();
        let targets: Vec<_> = points.iter().map(|p| p * 2.0).collect();
        let eval = acc.evaluate(&records(&points, &targets), &vec![1.0; points.len()]);
        assert_eq!(eval.terms, EnergyTerms::default());
    }

    #[test]
    fn degenerate_edge_is_skipped() {
        // Vertices 1 and 3 coincide: edge (1, 3) has zero rest length.
        let mut mesh = IndexedMesh::from_parts(
            vec![
                Vertex::from_coords(0.0, 0.0, 0.0),
                Vertex::from_coords(1.0, 0.0, 0.0),
                Vertex::from_coords(0.0, 1.0, 0.0),
                Vertex::from_coords(1.0, 0.0, 0.0),
            ],
            vec![[0, 1, 2], [1, 3, 2]],
        );
        let geometry = shell(&mut mesh);
        let params = ThinShellParams::new().with_bend_weight(0.0).with_feature_weight(0.0);
        let acc = EnergyAccumulator::new(&geometry, &params);

        let points = mesh.positions();
        let targets: Vec<_> = points.iter().map(|p| p + Vector3::x()).collect();
        let eval = acc.evaluate(&records(&points, &targets), &[1.0; 4]);

        assert_eq!(eval.terms.skipped_elements, 1);
        assert!(eval.terms.total.is_finite());
        assert!(eval.vertex_gradients.iter().all(|g| g.iter().all(|c| c.is_finite())));
    }

    #[test]
    fn translation_residual_has_no_bend() {
        let mut mesh = icosphere(1);
        let geometry = shell(&mut mesh);
        let params = ThinShellParams::new().with_stretch_weight(0.0).with_feature_weight(0.0);
        let acc = EnergyAccumulator::new(&geometry, &params);

        let points = mesh.positions();
        let targets: Vec<_> = points.iter().map(|p| p + Vector3::new(0.3, -0.2, 0.1)).collect();
        let eval = acc.evaluate(&records(&points, &targets), &vec![1.0; points.len()]);
        assert_relative_eq!(eval.terms.bend, 0.0, epsilon = 1e-20);
    }
}
