//! Point-to-cell links and derived surface connectivity.

use hashbrown::HashMap;
use smallvec::SmallVec;

/// An interior edge shared by exactly two faces.
///
/// The edge runs between `edge[0]` and `edge[1]`; `opposite[k]` is the vertex
/// of `faces[k]` not on the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hinge {
    /// Shared edge endpoints, `edge[0] < edge[1]`.
    pub edge: [u32; 2],
    /// Vertex of each wing opposite the shared edge.
    pub opposite: [u32; 2],
    /// The two faces meeting at the edge, in ascending order.
    pub faces: [u32; 2],
}

/// Connectivity derived from a face list.
///
/// Built by [`crate::IndexedMesh::build_cell_links`]. Edges are unique and
/// undirected, stored with the smaller index first and sorted, so iteration
/// order depends only on the face list.
#[derive(Debug, Clone, Default)]
pub struct CellLinks {
    point_cells: Vec<SmallVec<[u32; 8]>>,
    neighbors: Vec<SmallVec<[u32; 8]>>,
    edges: Vec<[u32; 2]>,
    hinges: Vec<Hinge>,
    boundary: Vec<bool>,
    vertex_count: usize,
    faces: Vec<[u32; 3]>,
}

impl CellLinks {
    /// Build links for `vertex_count` vertices and the given faces.
    ///
    /// Faces referencing out-of-range vertices are ignored.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    // Truncation: face indices are u32, so face counts > 4B are unsupported
    pub fn build(vertex_count: usize, faces: &[[u32; 3]]) -> Self {
        let mut point_cells: Vec<SmallVec<[u32; 8]>> = vec![SmallVec::new(); vertex_count];
        let mut edge_faces: HashMap<[u32; 2], SmallVec<[(u32, u32); 2]>> = HashMap::new();

        for (face_idx, face) in faces.iter().enumerate() {
            if face.iter().any(|&v| v as usize >= vertex_count) {
                continue;
            }
            let face_idx = face_idx as u32;
            for &v in face {
                let cells = &mut point_cells[v as usize];
                if cells.last() != Some(&face_idx) {
                    cells.push(face_idx);
                }
            }
            for k in 0..3 {
                let (a, b, opp) = (face[k], face[(k + 1) % 3], face[(k + 2) % 3]);
                if a == b {
                    continue;
                }
                edge_faces
                    .entry([a.min(b), a.max(b)])
                    .or_default()
                    .push((face_idx, opp));
            }
        }

        let mut edges: Vec<[u32; 2]> = edge_faces.keys().copied().collect();
        edges.sort_unstable();

        let mut neighbors: Vec<SmallVec<[u32; 8]>> = vec![SmallVec::new(); vertex_count];
        let mut boundary = vec![false; vertex_count];
        let mut hinges = Vec::new();

        for edge in &edges {
            let [a, b] = *edge;
            neighbors[a as usize].push(b);
            neighbors[b as usize].push(a);

            let Some(wings) = edge_faces.get(edge) else {
                continue;
            };
            match wings.as_slice() {
                [(f0, o0), (f1, o1)] => {
                    let (first, second) = if f0 <= f1 {
                        ((*f0, *o0), (*f1, *o1))
                    } else {
                        ((*f1, *o1), (*f0, *o0))
                    };
                    hinges.push(Hinge {
                        edge: *edge,
                        opposite: [first.1, second.1],
                        faces: [first.0, second.0],
                    });
                }
                [_] => {
                    boundary[a as usize] = true;
                    boundary[b as usize] = true;
                }
                // Non-manifold edges carry no hinge.
                _ => {}
            }
        }

        for ring in &mut neighbors {
            ring.sort_unstable();
        }

        Self {
            point_cells,
            neighbors,
            edges,
            hinges,
            boundary,
            vertex_count,
            faces: faces.to_vec(),
        }
    }

    /// Faces incident to a vertex, ascending.
    #[must_use]
    pub fn cells_of(&self, vertex: usize) -> &[u32] {
        self.point_cells.get(vertex).map(SmallVec::as_slice).unwrap_or_default()
    }

    /// Vertices sharing an edge with `vertex`, ascending.
    #[must_use]
    pub fn neighbors_of(&self, vertex: usize) -> &[u32] {
        self.neighbors.get(vertex).map(SmallVec::as_slice).unwrap_or_default()
    }

    /// Unique undirected edges, sorted.
    #[must_use]
    pub fn edges(&self) -> &[[u32; 2]] {
        &self.edges
    }

    /// Interior edges with both wings, in edge order.
    #[must_use]
    pub fn hinges(&self) -> &[Hinge] {
        &self.hinges
    }

    /// Whether a vertex lies on an open boundary edge.
    #[must_use]
    pub fn is_boundary(&self, vertex: usize) -> bool {
        self.boundary.get(vertex).copied().unwrap_or(false)
    }

    /// Number of vertices the links were built for.
    #[must_use]
    pub const fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    /// Number of faces the links were built for.
    #[must_use]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Whether these links were built from exactly `faces` over
    /// `vertex_count` vertices.
    #[must_use]
    pub fn built_for(&self, vertex_count: usize, faces: &[[u32; 3]]) -> bool {
        self.vertex_count == vertex_count && self.faces == faces
    }
}
