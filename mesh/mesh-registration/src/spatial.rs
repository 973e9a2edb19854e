//! Spatial indices over the fixed mesh.
//!
//! - [`SurfaceIndex`] - bounding volume hierarchy over triangles, answering
//!   closest-point-on-surface queries
//! - [`VertexIndex`] - kd-tree over vertices, answering k-nearest queries
//!
//! Both are built once and are immutable afterwards, so queries can run
//! from many threads at once.

use kiddo::immutable::float::kdtree::ImmutableKdTree;
use kiddo::SquaredEuclidean;
use mesh_types::{Aabb, IndexedMesh, MeshTopology, Point3, Triangle};
use smallvec::SmallVec;
use tracing::debug;

/// Faces per BVH leaf.
const MAX_LEAF_SIZE: usize = 8;

/// Subtrees with at least this many faces are built on the rayon pool.
const PARALLEL_BUILD_THRESHOLD: usize = 4096;

/// Points per kd-tree leaf bucket.
const BUCKET_SIZE: usize = 32;

/// Closest point found on an indexed surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceHit {
    /// Face containing the point.
    pub face: u32,
    /// The closest point.
    pub point: Point3<f64>,
    /// Barycentric coordinates within `face`.
    pub barycentric: [f64; 3],
    /// Squared distance from the query.
    pub distance_squared: f64,
}

#[derive(Debug)]
enum BvhNode {
    Leaf {
        bbox: Aabb,
        faces: SmallVec<[u32; MAX_LEAF_SIZE]>,
    },
    Internal {
        bbox: Aabb,
        left: Box<Self>,
        right: Box<Self>,
    },
}

impl BvhNode {
    const fn bbox(&self) -> &Aabb {
        match self {
            Self::Leaf { bbox, .. } | Self::Internal { bbox, .. } => bbox,
        }
    }
}

/// Bounding volume hierarchy over the triangles of a mesh.
///
/// Owns a copy of the triangle corners, so it does not borrow the mesh.
///
/// # Example
///
/// ```
/// use mesh_registration::SurfaceIndex;
/// use mesh_types::{unit_cube, Point3};
///
/// let index = SurfaceIndex::build(&unit_cube());
/// let hit = index.closest_point(&Point3::new(0.5, 0.5, 3.0)).unwrap();
/// assert!((hit.point.z - 1.0).abs() < 1e-12);
/// assert!((hit.distance_squared - 4.0).abs() < 1e-12);
/// ```
#[derive(Debug)]
pub struct SurfaceIndex {
    root: Option<BvhNode>,
    triangles: Vec<Triangle>,
}

impl SurfaceIndex {
    /// Build over every resolvable face of `mesh`.
    ///
    /// Faces with out-of-range vertex indices are left out; callers
    /// validate meshes before building.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn build(mesh: &IndexedMesh) -> Self {
        let triangles: Vec<Triangle> = (0..mesh.face_count())
            .map(|f| {
                mesh.triangle(f).unwrap_or_else(|| {
                    // Collapsed placeholder keeps face numbering aligned.
                    let p = Point3::new(f64::NAN, f64::NAN, f64::NAN);
                    Triangle::new(p, p, p)
                })
            })
            .collect();

        let boxes: Vec<(u32, Aabb, Point3<f64>)> = triangles
            .iter()
            .enumerate()
            .filter(|(_, t)| {
                [t.v0, t.v1, t.v2]
                    .iter()
                    .all(|p| p.coords.iter().all(|c| c.is_finite()))
            })
            .map(|(i, t)| {
                let bbox = Aabb::from_points([t.v0, t.v1, t.v2].iter());
                (i as u32, bbox, bbox.center())
            })
            .collect();

        let root = if boxes.is_empty() {
            None
        } else {
            Some(build_node(boxes))
        };

        debug!(faces = triangles.len(), "Built surface BVH");
        Self { root, triangles }
    }

    /// Number of faces indexed (including skipped ones).
    #[must_use]
    pub fn face_count(&self) -> usize {
        self.triangles.len()
    }

    /// Closest point on the surface to `query`.
    ///
    /// Among faces at exactly equal distance the lowest face index wins,
    /// so results do not depend on tree shape or thread scheduling.
    /// Returns `None` for an empty index or a non-finite query.
    #[must_use]
    pub fn closest_point(&self, query: &Point3<f64>) -> Option<SurfaceHit> {
        if !query.coords.iter().all(|c| c.is_finite()) {
            return None;
        }
        let root = self.root.as_ref()?;

        let mut best: Option<SurfaceHit> = None;
        let mut best_d2 = f64::INFINITY;
        let mut stack: SmallVec<[&BvhNode; 32]> = SmallVec::new();
        stack.push(root);

        while let Some(node) = stack.pop() {
            // Equal-distance boxes are still visited for the tie-break.
            if node.bbox().distance_squared_to_point(query) > best_d2 {
                continue;
            }
            match node {
                BvhNode::Leaf { faces, .. } => {
                    for &face in faces {
                        let hit = self.triangles[face as usize].closest_point(query);
                        let d2 = hit.distance_squared;
                        let better = d2 < best_d2
                            || (d2 == best_d2 && best.is_some_and(|b| face < b.face));
                        if better {
                            best_d2 = d2;
                            best = Some(SurfaceHit {
                                face,
                                point: hit.point,
                                barycentric: hit.barycentric,
                                distance_squared: d2,
                            });
                        }
                    }
                }
                BvhNode::Internal { left, right, .. } => {
                    let dl = left.bbox().distance_squared_to_point(query);
                    let dr = right.bbox().distance_squared_to_point(query);
                    // Push the farther child first so the nearer is searched first.
                    if dl <= dr {
                        stack.push(right);
                        stack.push(left);
                    } else {
                        stack.push(left);
                        stack.push(right);
                    }
                }
            }
        }

        best
    }
}

fn build_node(mut boxes: Vec<(u32, Aabb, Point3<f64>)>) -> BvhNode {
    let bbox = boxes
        .iter()
        .fold(Aabb::empty(), |acc, (_, b, _)| acc.union(b));

    if boxes.len() <= MAX_LEAF_SIZE {
        return BvhNode::Leaf {
            bbox,
            faces: boxes.iter().map(|(f, _, _)| *f).collect(),
        };
    }

    let axis = bbox.longest_axis();
    boxes.sort_by(|a, b| a.2[axis].total_cmp(&b.2[axis]).then(a.0.cmp(&b.0)));
    let right_half = boxes.split_off(boxes.len() / 2);

    let (left, right) = if boxes.len() + right_half.len() >= PARALLEL_BUILD_THRESHOLD {
        rayon::join(|| build_node(boxes), || build_node(right_half))
    } else {
        (build_node(boxes), build_node(right_half))
    };

    BvhNode::Internal {
        bbox,
        left: Box::new(left),
        right: Box::new(right),
    }
}

/// Kd-tree over mesh vertices for k-nearest-neighbour queries.
///
/// Built in one pass from all positions, so any number of vertices may
/// share a coordinate (flat or axis-aligned grids).
pub struct VertexIndex {
    tree: Option<ImmutableKdTree<f64, u64, 3, BUCKET_SIZE>>,
    len: usize,
}

impl std::fmt::Debug for VertexIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VertexIndex").field("len", &self.len).finish()
    }
}

impl VertexIndex {
    /// Index every vertex of `mesh`.
    #[must_use]
    pub fn build(mesh: &IndexedMesh) -> Self {
        let points: Vec<[f64; 3]> = mesh
            .vertices
            .iter()
            .map(|v| [v.position.x, v.position.y, v.position.z])
            .collect();
        let tree = (!points.is_empty()).then(|| ImmutableKdTree::from(&*points));
        debug!(vertices = points.len(), "Built vertex kd-tree");
        Self {
            tree,
            len: points.len(),
        }
    }

    /// Number of indexed vertices.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the index holds no vertices.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Up to `k` nearest vertices as `(index, squared distance)`, ordered by
    /// distance then index.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn nearest(&self, query: &Point3<f64>, k: usize) -> Vec<(usize, f64)> {
        let Some(tree) = &self.tree else {
            return Vec::new();
        };
        if k == 0 {
            return Vec::new();
        }
        let mut found: Vec<(usize, f64)> = tree
            .nearest_n::<SquaredEuclidean>(&[query.x, query.y, query.z], k.min(self.len))
            .into_iter()
            .map(|n| (n.item as usize, n.distance))
            .collect();
        found.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        found
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use mesh_types::{icosphere, unit_cube, Vertex};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn brute_force(mesh: &IndexedMesh, q: &Point3<f64>) -> (u32, f64) {
        let mut best = (u32::MAX, f64::INFINITY);
        for (f, tri) in mesh.triangles().enumerate() {
            let d2 = tri.closest_point(q).distance_squared;
            if d2 < best.1 {
                best = (f as u32, d2);
            }
        }
        best
    }

    #[test]
    fn matches_brute_force_on_sphere() {
        let mesh = icosphere(3);
        let index = SurfaceIndex::build(&mesh);
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..200 {
            let q = Point3::new(
                rng.gen_range(-1.5..1.5),
                rng.gen_range(-1.5..1.5),
                rng.gen_range(-1.5..1.5),
            );
            let hit = index.closest_point(&q).unwrap();
            let (face, d2) = brute_force(&mesh, &q);
            assert!((hit.distance_squared - d2).abs() < 1e-12);
            // Strictly-first-minimum brute force picks the lowest index too.
            if hit.distance_squared == d2 {
                assert_eq!(hit.face, face);
            }
        }
    }

    #[test]
    fn ties_resolve_to_lower_face() {
        // Two coplanar triangles sharing the edge x = 1; query sits above it.
        let mesh = IndexedMesh::from_parts(
            vec![
                Vertex::from_coords(0.0, 0.0, 0.0),
                Vertex::from_coords(1.0, 0.0, 0.0),
                Vertex::from_coords(1.0, 1.0, 0.0),
                Vertex::from_coords(2.0, 0.0, 0.0),
            ],
            vec![[1, 3, 2], [0, 1, 2]],
        );
        let index = SurfaceIndex::build(&mesh);
        let hit = index.closest_point(&Point3::new(1.0, 0.5, 1.0)).unwrap();
        assert_eq!(hit.face, 0);
        assert!((hit.distance_squared - 1.0).abs() < 1e-12);
    }

    #[test]
    fn empty_and_nan_queries() {
        let index = SurfaceIndex::build(&IndexedMesh::new());
        assert!(index.closest_point(&Point3::origin()).is_none());

        let index = SurfaceIndex::build(&unit_cube());
        assert!(index
            .closest_point(&Point3::new(f64::NAN, 0.0, 0.0))
            .is_none());
    }

    #[test]
    fn vertex_index_orders_by_distance() {
        let mesh = unit_cube();
        let index = VertexIndex::build(&mesh);
        let found = index.nearest(&Point3::new(0.1, 0.0, 0.0), 3);
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].0, 0);
        assert_eq!(found[1].0, 1);
        assert!(found[1].1 <= found[2].1);

        assert_eq!(index.nearest(&Point3::origin(), 100).len(), 8);
    }

    #[test]
    fn vertex_index_handles_flat_grid() {
        let mut mesh = IndexedMesh::new();
        for i in 0..40 {
            for j in 0..40 {
                mesh.vertices
                    .push(Vertex::from_coords(f64::from(i), f64::from(j), 0.0));
            }
        }
        let index = VertexIndex::build(&mesh);
        assert_eq!(index.len(), 1600);

        let found = index.nearest(&Point3::new(3.1, 5.0, 0.0), 1);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, 3 * 40 + 5);
        assert!((found[0].1 - 0.01).abs() < 1e-12);
    }

    #[test]
    fn empty_vertex_index() {
        let index = VertexIndex::build(&IndexedMesh::new());
        assert!(index.is_empty());
        assert!(index.nearest(&Point3::origin(), 4).is_empty());
    }
}
