//! Mesh file I/O.
//!
//! Loads and saves triangle meshes in the formats used by surface
//! registration pipelines:
//!
//! - **VTK** (legacy PolyData) - ASCII
//! - **OBJ** (Wavefront) - ASCII, geometry only
//!
//! # Format Detection
//!
//! The format is chosen from the file extension:
//!
//! ```no_run
//! use mesh_io::{load_mesh, save_mesh};
//!
//! let mesh = load_mesh("fixedMesh.vtk").unwrap();
//! save_mesh(&mesh, "fixedMesh.obj").unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

mod error;
mod obj;
mod vtk;

pub use error::{IoError, IoResult};
pub use obj::{load_obj, read_obj, save_obj, write_obj};
pub use vtk::{load_vtk, read_vtk, save_vtk, write_vtk};

use std::path::Path;

use mesh_types::IndexedMesh;

/// Supported mesh file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeshFormat {
    /// Legacy VTK PolyData.
    Vtk,
    /// Wavefront OBJ.
    Obj,
}

impl MeshFormat {
    /// Detect format from file extension (case-insensitive).
    #[must_use]
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "vtk" => Some(Self::Vtk),
            "obj" => Some(Self::Obj),
            _ => None,
        }
    }

    /// Canonical file extension for this format.
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Vtk => "vtk",
            Self::Obj => "obj",
        }
    }

    fn detect(path: &Path) -> IoResult<Self> {
        Self::from_path(path).ok_or_else(|| IoError::UnknownFormat {
            extension: path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("(none)")
                .to_string(),
        })
    }
}

/// Load a mesh from a file, detecting format from extension.
///
/// # Errors
///
/// Returns an error if:
/// - The file format cannot be determined from the extension
/// - The file cannot be read
/// - The file content is invalid for the detected format
pub fn load_mesh<P: AsRef<Path>>(path: P) -> IoResult<IndexedMesh> {
    let path = path.as_ref();
    match MeshFormat::detect(path)? {
        MeshFormat::Vtk => load_vtk(path),
        MeshFormat::Obj => load_obj(path),
    }
}

/// Save a mesh to a file, detecting format from extension.
///
/// # Errors
///
/// Returns an error if the format cannot be determined from the extension
/// or the file cannot be written.
pub fn save_mesh<P: AsRef<Path>>(mesh: &IndexedMesh, path: P) -> IoResult<()> {
    let path = path.as_ref();
    match MeshFormat::detect(path)? {
        MeshFormat::Vtk => save_vtk(mesh, path),
        MeshFormat::Obj => save_obj(mesh, path),
    }
}
