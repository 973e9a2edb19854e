//! Core mesh types for surface registration.
//!
//! This crate provides the shared geometry vocabulary used by the I/O and
//! registration crates:
//!
//! - [`Vertex`] - A point in 3D space with an optional normal
//! - [`IndexedMesh`] - A triangle mesh with indexed vertices
//! - [`Triangle`] - A concrete triangle with vertex positions
//! - [`Aabb`] - Axis-aligned bounding box
//! - [`CellLinks`] - Point-to-cell index, unique edges and interior hinges
//!
//! # Units
//!
//! This library is **unit-agnostic**. All coordinates are `f64`.
//!
//! # Cell Links
//!
//! Algorithms that walk a surface (edge energies, vertex normals, curvature)
//! need to know which faces touch a vertex and which faces share an edge.
//! [`IndexedMesh::build_cell_links`] computes that once and stores it on the
//! mesh. Links go stale when faces or vertices are added or removed; check
//! [`IndexedMesh::has_current_links`] before relying on them.
//!
//! # Example
//!
//! ```
//! use mesh_types::{unit_icosahedron, MeshTopology};
//!
//! let mut mesh = unit_icosahedron();
//! mesh.build_cell_links();
//!
//! let links = mesh.links().unwrap();
//! assert_eq!(mesh.face_count(), 20);
//! assert_eq!(links.edges().len(), 30);
//! assert_eq!(links.hinges().len(), 30);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

mod bounds;
mod links;
mod mesh;
mod traits;
mod triangle;
mod vertex;

pub use bounds::Aabb;
pub use links::{CellLinks, Hinge};
pub use mesh::{icosphere, unit_cube, unit_icosahedron, IndexedMesh};
pub use traits::{MeshBounds, MeshTopology};
pub use triangle::{ClosestPoint, Triangle};
pub use vertex::Vertex;

// Re-export nalgebra types for convenience
pub use nalgebra::{Point3, Vector3};
