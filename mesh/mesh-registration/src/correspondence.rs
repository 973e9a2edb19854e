//! Shell-to-target correspondences.
//!
//! For every moving (shell) vertex at its transformed position `y_i` the
//! finder reports the closest point `q_i` on the fixed surface. When the
//! feature term is active it also picks a target vertex whose local shape
//! best agrees with the shell vertex, among the `k` nearest.
//!
//! Shape is summarised per vertex by a [`VertexDescriptor`]: the
//! area-weighted unit normal and a signed discrete mean curvature
//! `kappa_i = 2 (L_i . n_i) / h_i^2`, where `L_i` is the umbrella Laplacian
//! (one-ring centroid minus the vertex) and `h_i` the mean one-ring edge
//! length. Descriptors are scale-free, so an isotropically scaled copy of a
//! surface matches itself.

use mesh_types::{CellLinks, IndexedMesh, Point3, Vector3};
use rayon::prelude::*;

use crate::spatial::{SurfaceIndex, VertexIndex};
use crate::{MeshRole, RegistrationError, RegistrationResult};

/// Local surface shape at a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VertexDescriptor {
    /// Area-weighted unit normal (zero if undefined).
    pub normal: Vector3<f64>,
    /// Signed, scale-free mean curvature.
    pub curvature: f64,
}

impl VertexDescriptor {
    /// Dissimilarity: `|kappa_a - kappa_b| + (1 - n_a . n_b) / 2`.
    ///
    /// Zero for identical descriptors, at most `|dkappa| + 1`.
    #[must_use]
    pub fn distance(&self, other: &Self) -> f64 {
        (self.curvature - other.curvature).abs() + 0.5 * (1.0 - self.normal.dot(&other.normal))
    }
}

/// Compute a descriptor for every vertex.
///
/// Vertices without incident faces get the default (zero) descriptor.
#[must_use]
pub fn compute_descriptors(
    positions: &[Point3<f64>],
    faces: &[[u32; 3]],
    links: &CellLinks,
) -> Vec<VertexDescriptor> {
    (0..positions.len())
        .into_par_iter()
        .map(|i| {
            let x = positions[i];

            let mut normal = Vector3::zeros();
            for &f in links.cells_of(i) {
                let [a, b, c] = faces[f as usize];
                let (pa, pb, pc) = (
                    positions[a as usize],
                    positions[b as usize],
                    positions[c as usize],
                );
                normal += (pb - pa).cross(&(pc - pa));
            }
            let normal = normal.try_normalize(f64::EPSILON).unwrap_or_else(Vector3::zeros);

            let ring = links.neighbors_of(i);
            if ring.is_empty() {
                return VertexDescriptor {
                    normal,
                    curvature: 0.0,
                };
            }
            #[allow(clippy::cast_precision_loss)]
            let n = ring.len() as f64;
            let centroid = ring
                .iter()
                .fold(Vector3::zeros(), |acc, &j| acc + positions[j as usize].coords)
                / n;
            let mean_edge = ring
                .iter()
                .map(|&j| (positions[j as usize] - x).norm())
                .sum::<f64>()
                / n;

            let laplacian = centroid - x.coords;
            let curvature = if mean_edge > 0.0 {
                2.0 * laplacian.dot(&normal) / (mean_edge * mean_edge)
            } else {
                0.0
            };

            VertexDescriptor {
                normal,
                curvature: if curvature.is_finite() { curvature } else { 0.0 },
            }
        })
        .collect()
}

/// A feature match for one shell vertex.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeatureMatch {
    /// Target vertex index.
    pub target_vertex: usize,
    /// Target vertex position.
    pub point: Point3<f64>,
    /// Descriptor dissimilarity between the two vertices.
    pub descriptor_distance: f64,
}

/// The match record for one shell vertex.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Correspondence {
    /// Shell vertex index.
    pub vertex: usize,
    /// Shell vertex after the transform.
    pub transformed: Point3<f64>,
    /// Closest point on the target surface.
    pub target: Point3<f64>,
    /// Target face containing `target`.
    pub target_face: u32,
    /// `|target - transformed|`.
    pub distance: f64,
    /// Feature match, when the feature term is active.
    pub feature: Option<FeatureMatch>,
}

impl Correspondence {
    /// Residual displacement `target - transformed`.
    #[must_use]
    pub fn residual(&self) -> Vector3<f64> {
        self.target - self.transformed
    }
}

/// Finds correspondences against a fixed surface.
#[derive(Debug)]
pub struct CorrespondenceFinder {
    surface: SurfaceIndex,
    features: Option<FeatureIndex>,
}

#[derive(Debug)]
struct FeatureIndex {
    vertices: VertexIndex,
    positions: Vec<Point3<f64>>,
    descriptors: Vec<VertexDescriptor>,
    neighborhood: usize,
}

impl CorrespondenceFinder {
    /// Index the fixed mesh.
    ///
    /// With `feature_neighborhood = Some(k)` a vertex kd-tree and target
    /// descriptors are built too; this needs current cell links on `fixed`.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::CellLinksMissing`] when features are requested and
    /// `fixed` has no current links, [`RegistrationError::InvalidParameter`]
    /// for `k == 0`.
    pub fn new(
        fixed: &IndexedMesh,
        feature_neighborhood: Option<usize>,
    ) -> RegistrationResult<Self> {
        let features = match feature_neighborhood {
            None => None,
            Some(0) => {
                return Err(RegistrationError::invalid_parameter(
                    "feature neighborhood size must be positive",
                ))
            }
            Some(k) => {
                let links = fixed.links().ok_or(RegistrationError::CellLinksMissing {
                    role: MeshRole::Fixed,
                })?;
                let positions = fixed.positions();
                let descriptors = compute_descriptors(&positions, &fixed.faces, links);
                Some(FeatureIndex {
                    vertices: VertexIndex::build(fixed),
                    positions,
                    descriptors,
                    neighborhood: k,
                })
            }
        };

        Ok(Self {
            surface: SurfaceIndex::build(fixed),
            features,
        })
    }

    /// Whether feature matching is available.
    #[must_use]
    pub const fn has_features(&self) -> bool {
        self.features.is_some()
    }

    /// Closest-point correspondences for every transformed shell vertex.
    ///
    /// Records come back in vertex order with `feature: None`.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::CorrespondenceFailure`] for the lowest-index vertex
    /// whose position is non-finite or that found no face.
    pub fn find(&self, transformed: &[Point3<f64>]) -> RegistrationResult<Vec<Correspondence>> {
        let hits: Vec<Option<Correspondence>> = transformed
            .par_iter()
            .enumerate()
            .map(|(vertex, y)| {
                self.surface.closest_point(y).map(|hit| Correspondence {
                    vertex,
                    transformed: *y,
                    target: hit.point,
                    target_face: hit.face,
                    distance: hit.distance_squared.sqrt(),
                    feature: None,
                })
            })
            .collect();

        hits.into_iter()
            .enumerate()
            .map(|(vertex, hit)| hit.ok_or(RegistrationError::CorrespondenceFailure { vertex }))
            .collect()
    }

    /// Feature matches for every transformed shell vertex.
    ///
    /// Candidate `j` among the `k` nearest target vertices scores
    /// `|t_j - y_i|^2 + (kappa_i - kappa_j)^2`; the lowest score wins, ties
    /// going to the lower target index.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::InvalidParameter`] if the finder was built
    /// without features or the descriptor count does not match,
    /// [`RegistrationError::CorrespondenceFailure`] for a non-finite vertex.
    pub fn match_features(
        &self,
        transformed: &[Point3<f64>],
        shell_descriptors: &[VertexDescriptor],
    ) -> RegistrationResult<Vec<FeatureMatch>> {
        let index = self.features.as_ref().ok_or_else(|| {
            RegistrationError::invalid_parameter("feature matching was not enabled")
        })?;
        if shell_descriptors.len() != transformed.len() {
            return Err(RegistrationError::invalid_parameter(format!(
                "{} descriptors for {} vertices",
                shell_descriptors.len(),
                transformed.len()
            )));
        }

        let found: Vec<Option<FeatureMatch>> = transformed
            .par_iter()
            .zip(shell_descriptors.par_iter())
            .map(|(y, descriptor)| {
                if !y.coords.iter().all(|c| c.is_finite()) {
                    return None;
                }
                index
                    .vertices
                    .nearest(y, index.neighborhood)
                    .into_iter()
                    .map(|(j, d2)| {
                        let dk = descriptor.curvature - index.descriptors[j].curvature;
                        (j, dk.mul_add(dk, d2))
                    })
                    .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
                    .map(|(j, _)| FeatureMatch {
                        target_vertex: j,
                        point: index.positions[j],
                        descriptor_distance: descriptor.distance(&index.descriptors[j]),
                    })
            })
            .collect();

        found
            .into_iter()
            .enumerate()
            .map(|(vertex, m)| m.ok_or(RegistrationError::CorrespondenceFailure { vertex }))
            .collect()
    }
}
