//! Indexed triangle mesh.

use crate::{Aabb, CellLinks, MeshBounds, MeshTopology, Triangle, Vertex};
use hashbrown::HashMap;
use nalgebra::{Point3, Vector3};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An indexed triangle mesh.
///
/// Stores vertices and faces separately, with faces referencing vertices by
/// index. Optional [`CellLinks`] cache the point-to-cell relation and the
/// edge structure derived from it.
///
/// # Winding Order
///
/// Faces use **counter-clockwise (CCW) winding** when viewed from outside.
///
/// # Example
///
/// ```
/// use mesh_types::{IndexedMesh, Vertex, MeshTopology};
///
/// let mut mesh = IndexedMesh::new();
/// mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0));
/// mesh.vertices.push(Vertex::from_coords(1.0, 0.0, 0.0));
/// mesh.vertices.push(Vertex::from_coords(0.0, 1.0, 0.0));
/// mesh.faces.push([0, 1, 2]);
///
/// assert_eq!(mesh.vertex_count(), 3);
/// assert_eq!(mesh.face_count(), 1);
/// assert!(!mesh.has_current_links());
///
/// mesh.build_cell_links();
/// assert!(mesh.has_current_links());
/// ```
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IndexedMesh {
    /// Vertex data.
    pub vertices: Vec<Vertex>,

    /// Triangle faces as indices into the vertex array.
    pub faces: Vec<[u32; 3]>,

    #[cfg_attr(feature = "serde", serde(skip))]
    links: Option<CellLinks>,
}

impl IndexedMesh {
    /// Create a new empty mesh.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            vertices: Vec::new(),
            faces: Vec::new(),
            links: None,
        }
    }

    /// Create a mesh with pre-allocated capacity.
    #[inline]
    #[must_use]
    pub fn with_capacity(vertex_count: usize, face_count: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(vertex_count),
            faces: Vec::with_capacity(face_count),
            links: None,
        }
    }

    /// Create a mesh from vertices and faces.
    #[inline]
    #[must_use]
    pub const fn from_parts(vertices: Vec<Vertex>, faces: Vec<[u32; 3]>) -> Self {
        Self {
            vertices,
            faces,
            links: None,
        }
    }

    /// Create a mesh from flat coordinate and index arrays.
    ///
    /// Returns an empty mesh if either array length is not a multiple of 3.
    ///
    /// ```
    /// use mesh_types::{IndexedMesh, MeshTopology};
    ///
    /// let mesh = IndexedMesh::from_raw(&[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0], &[0, 1, 2]);
    /// assert_eq!(mesh.vertex_count(), 3);
    /// assert_eq!(mesh.face_count(), 1);
    /// ```
    #[must_use]
    pub fn from_raw(positions: &[f64], indices: &[u32]) -> Self {
        if positions.len() % 3 != 0 || indices.len() % 3 != 0 {
            return Self::new();
        }

        let vertices = positions
            .chunks_exact(3)
            .map(|c| Vertex::from_coords(c[0], c[1], c[2]))
            .collect();
        let faces = indices.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect();

        Self::from_parts(vertices, faces)
    }

    /// Vertex positions in index order.
    #[must_use]
    pub fn positions(&self) -> Vec<Point3<f64>> {
        self.vertices.iter().map(|v| v.position).collect()
    }

    /// Compute and store the point-to-cell links.
    ///
    /// Replaces any previously built links.
    pub fn build_cell_links(&mut self) {
        self.links = Some(CellLinks::build(self.vertices.len(), &self.faces));
    }

    /// The stored links, if built for the current faces and vertex count.
    #[must_use]
    pub fn links(&self) -> Option<&CellLinks> {
        self.links.as_ref().filter(|l| self.links_match(l))
    }

    /// Whether links exist and were built for the current faces and vertices.
    #[must_use]
    pub fn has_current_links(&self) -> bool {
        self.links().is_some()
    }

    /// Drop stored links.
    pub fn clear_links(&mut self) {
        self.links = None;
    }

    fn links_match(&self, links: &CellLinks) -> bool {
        links.built_for(self.vertices.len(), &self.faces)
    }

    /// Overwrite every position with `f(position)`, in vertex order.
    ///
    /// Connectivity is unchanged, so links stay valid.
    pub fn transform_points(&mut self, mut f: impl FnMut(&Point3<f64>) -> Point3<f64>) {
        for vertex in &mut self.vertices {
            vertex.position = f(&vertex.position);
        }
    }

    /// Translate mesh by the given vector.
    pub fn translate(&mut self, offset: Vector3<f64>) {
        self.transform_points(|p| p + offset);
    }

    /// Scale mesh uniformly around the origin.
    pub fn scale(&mut self, factor: f64) {
        self.transform_points(|p| Point3::from(p.coords * factor));
    }

    /// Total surface area.
    #[must_use]
    pub fn surface_area(&self) -> f64 {
        self.triangles().map(|tri| tri.area()).sum()
    }

    /// Whether every face index is within the vertex array.
    #[must_use]
    pub fn indices_in_range(&self) -> bool {
        let n = self.vertices.len();
        self.faces.iter().flatten().all(|&v| (v as usize) < n)
    }
}

impl MeshTopology for IndexedMesh {
    #[inline]
    fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    fn face_count(&self) -> usize {
        self.faces.len()
    }

    fn vertex(&self, index: usize) -> Option<&Vertex> {
        self.vertices.get(index)
    }

    fn face(&self, index: usize) -> Option<[u32; 3]> {
        self.faces.get(index).copied()
    }

    fn triangle(&self, face_index: usize) -> Option<Triangle> {
        let [i0, i1, i2] = *self.faces.get(face_index)?;
        Some(Triangle::new(
            self.vertices.get(i0 as usize)?.position,
            self.vertices.get(i1 as usize)?.position,
            self.vertices.get(i2 as usize)?.position,
        ))
    }

    fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.vertices.iter()
    }

    fn faces(&self) -> impl Iterator<Item = [u32; 3]> {
        self.faces.iter().copied()
    }

    fn triangles(&self) -> impl Iterator<Item = Triangle> {
        (0..self.faces.len()).filter_map(|f| self.triangle(f))
    }
}

impl MeshBounds for IndexedMesh {
    fn bounds(&self) -> Aabb {
        Aabb::from_points(self.vertices.iter().map(|v| &v.position))
    }
}

/// Unit cube from (0,0,0) to (1,1,1), 12 outward-facing triangles.
///
/// ```
/// use mesh_types::{unit_cube, MeshTopology};
///
/// let cube = unit_cube();
/// assert_eq!(cube.vertex_count(), 8);
/// assert_eq!(cube.face_count(), 12);
/// ```
#[must_use]
pub fn unit_cube() -> IndexedMesh {
    let corners = [
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [1.0, 1.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
        [1.0, 0.0, 1.0],
        [1.0, 1.0, 1.0],
        [0.0, 1.0, 1.0],
    ];
    let faces = vec![
        [0, 2, 1],
        [0, 3, 2],
        [4, 5, 6],
        [4, 6, 7],
        [0, 1, 5],
        [0, 5, 4],
        [3, 7, 6],
        [3, 6, 2],
        [0, 4, 7],
        [0, 7, 3],
        [1, 2, 6],
        [1, 6, 5],
    ];
    IndexedMesh::from_parts(
        corners
            .iter()
            .map(|c| Vertex::from_coords(c[0], c[1], c[2]))
            .collect(),
        faces,
    )
}

/// Regular icosahedron inscribed in the unit sphere.
///
/// 12 vertices, 20 outward-facing faces, 30 edges; closed and manifold.
///
/// ```
/// use mesh_types::{unit_icosahedron, MeshTopology};
///
/// let ico = unit_icosahedron();
/// assert_eq!(ico.vertex_count(), 12);
/// assert_eq!(ico.face_count(), 20);
/// assert!(ico.vertices.iter().all(|v| (v.position.coords.norm() - 1.0).abs() < 1e-12));
/// ```
#[must_use]
pub fn unit_icosahedron() -> IndexedMesh {
    let phi = (1.0 + 5.0_f64.sqrt()) / 2.0;
    let (a, b) = (1.0, 1.0 / phi);

    let corners = [
        [0.0, b, -a],
        [b, a, 0.0],
        [-b, a, 0.0],
        [0.0, b, a],
        [0.0, -b, a],
        [-a, 0.0, b],
        [0.0, -b, -a],
        [a, 0.0, -b],
        [a, 0.0, b],
        [-a, 0.0, -b],
        [b, -a, 0.0],
        [-b, -a, 0.0],
    ];
    let faces = vec![
        [0, 2, 1],
        [3, 1, 2],
        [3, 5, 4],
        [3, 4, 8],
        [0, 7, 6],
        [0, 6, 9],
        [4, 11, 10],
        [6, 10, 11],
        [2, 9, 5],
        [11, 5, 9],
        [1, 8, 7],
        [10, 7, 8],
        [3, 2, 5],
        [3, 8, 1],
        [0, 9, 2],
        [0, 1, 7],
        [6, 11, 9],
        [6, 7, 10],
        [4, 5, 11],
        [4, 10, 8],
    ];

    let vertices = corners
        .iter()
        .map(|c| Vertex::new(Point3::from(Vector3::new(c[0], c[1], c[2]).normalize())))
        .collect();
    IndexedMesh::from_parts(vertices, faces)
}

/// Icosahedron refined `subdivisions` times, with new vertices pushed
/// back onto the unit sphere.
///
/// Each level splits every face into four: `20 * 4^n` faces.
///
/// ```
/// use mesh_types::{icosphere, MeshTopology};
///
/// let sphere = icosphere(2);
/// assert_eq!(sphere.face_count(), 320);
/// assert_eq!(sphere.vertex_count(), 162);
/// ```
#[must_use]
pub fn icosphere(subdivisions: u32) -> IndexedMesh {
    let mut mesh = unit_icosahedron();
    for _ in 0..subdivisions {
        mesh = subdivide_on_sphere(&mesh);
    }
    mesh
}

#[allow(clippy::cast_possible_truncation)]
fn subdivide_on_sphere(mesh: &IndexedMesh) -> IndexedMesh {
    let mut vertices = mesh.vertices.clone();
    let mut faces = Vec::with_capacity(mesh.faces.len() * 4);
    let mut midpoints: HashMap<[u32; 2], u32> = HashMap::new();

    let mut midpoint = |a: u32, b: u32, vertices: &mut Vec<Vertex>| -> u32 {
        *midpoints.entry([a.min(b), a.max(b)]).or_insert_with(|| {
            let pa = vertices[a as usize].position.coords;
            let pb = vertices[b as usize].position.coords;
            vertices.push(Vertex::new(Point3::from((pa + pb).normalize())));
            (vertices.len() - 1) as u32
        })
    };

    for &[v0, v1, v2] in &mesh.faces {
        let m01 = midpoint(v0, v1, &mut vertices);
        let m12 = midpoint(v1, v2, &mut vertices);
        let m20 = midpoint(v2, v0, &mut vertices);
        faces.push([v0, m01, m20]);
        faces.push([v1, m12, m01]);
        faces.push([v2, m20, m12]);
        faces.push([m01, m12, m20]);
    }

    IndexedMesh::from_parts(vertices, faces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn mesh_is_empty() {
        let mut mesh = IndexedMesh::new();
        assert!(mesh.is_empty());

        mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0));
        assert!(mesh.is_empty());

        mesh.faces.push([0, 0, 0]);
        assert!(!mesh.is_empty());
    }

    #[test]
    fn links_go_stale_when_faces_change() {
        let mut mesh = unit_cube();
        mesh.build_cell_links();
        assert!(mesh.has_current_links());

        mesh.faces.pop();
        assert!(!mesh.has_current_links());
        assert!(mesh.links().is_none());

        mesh.build_cell_links();
        assert!(mesh.has_current_links());
    }

    #[test]
    fn links_go_stale_when_a_face_is_edited_in_place() {
        let mut mesh = unit_cube();
        mesh.build_cell_links();

        mesh.faces[0].swap(1, 2);
        assert!(!mesh.has_current_links());

        mesh.build_cell_links();
        let last = mesh.faces.len() - 1;
        mesh.faces[last] = [1, 7, 3];
        assert!(!mesh.has_current_links());
    }

    #[test]
    fn transform_points_keeps_links() {
        let mut mesh = unit_cube();
        mesh.build_cell_links();
        mesh.translate(Vector3::new(1.0, 2.0, 3.0));
        assert!(mesh.has_current_links());
        assert_eq!(mesh.vertices[0].position, Point3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn cube_surface_area() {
        assert_relative_eq!(unit_cube().surface_area(), 6.0, epsilon = 1e-12);
        let mut cube = unit_cube();
        cube.scale(2.0);
        assert_relative_eq!(cube.surface_area(), 24.0, epsilon = 1e-12);
    }

    #[test]
    fn icosahedron_is_closed() {
        let mut ico = unit_icosahedron();
        ico.build_cell_links();
        let links = ico.links().unwrap_or_else(|| panic!("links missing"));
        assert_eq!(links.edges().len(), 30);
        assert_eq!(links.hinges().len(), 30);
        assert!((0..12).all(|v| !links.is_boundary(v)));
        assert!((0..12).all(|v| links.neighbors_of(v).len() == 5));
    }

    #[test]
    fn icosahedron_faces_point_outward() {
        let ico = unit_icosahedron();
        for tri in ico.triangles() {
            let n = tri.normal().unwrap_or_else(|| panic!("degenerate face"));
            assert!(n.dot(&tri.centroid().coords) > 0.0);
        }
    }

    #[test]
    fn icosahedron_bounds_centered() {
        let bounds = unit_icosahedron().bounds();
        assert_relative_eq!(bounds.center(), Point3::origin(), epsilon = 1e-12);
    }

    #[test]
    fn icosphere_is_closed() {
        let mut sphere = icosphere(1);
        sphere.build_cell_links();
        let links = sphere.links().unwrap_or_else(|| panic!("links missing"));
        assert_eq!(sphere.vertex_count(), 42);
        assert_eq!(links.edges().len(), 120);
        assert_eq!(links.hinges().len(), 120);
    }

    #[test]
    fn out_of_range_indices_detected() {
        let mesh = IndexedMesh::from_parts(vec![Vertex::from_coords(0.0, 0.0, 0.0)], vec![[0, 1, 2]]);
        assert!(!mesh.indices_in_range());
        assert_eq!(mesh.triangles().count(), 0);
    }
}
