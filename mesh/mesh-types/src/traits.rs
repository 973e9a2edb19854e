//! Read-only mesh access traits.

use crate::{Aabb, Triangle, Vertex};
use nalgebra::Point3;

/// Indexed access to a triangle mesh.
pub trait MeshTopology {
    /// Number of vertices.
    fn vertex_count(&self) -> usize;

    /// Number of triangular faces.
    fn face_count(&self) -> usize;

    /// True when there is nothing to register against: no vertices or no faces.
    fn is_empty(&self) -> bool {
        self.vertex_count() == 0 || self.face_count() == 0
    }

    /// Vertex by index.
    fn vertex(&self, index: usize) -> Option<&Vertex>;

    /// Position of a vertex by index.
    fn position(&self, index: usize) -> Option<Point3<f64>> {
        self.vertex(index).map(|v| v.position)
    }

    /// Face vertex indices by face index.
    fn face(&self, index: usize) -> Option<[u32; 3]>;

    /// Face with resolved positions; `None` if the face or any of its
    /// vertices is out of range.
    fn triangle(&self, face_index: usize) -> Option<Triangle>;

    /// Iterate over all vertices.
    fn vertices(&self) -> impl Iterator<Item = &Vertex>;

    /// Iterate over all faces as vertex index triples.
    fn faces(&self) -> impl Iterator<Item = [u32; 3]>;

    /// Iterate over resolvable faces as triangles.
    fn triangles(&self) -> impl Iterator<Item = Triangle>;
}

/// Bounding box computation.
pub trait MeshBounds {
    /// Axis-aligned bounds of every vertex; empty if there are none.
    fn bounds(&self) -> Aabb;

    /// Center of [`MeshBounds::bounds`].
    fn center(&self) -> Point3<f64> {
        self.bounds().center()
    }
}
