//! Wavefront OBJ support (geometry only).
//!
//! Reads `v` and `f` records; texture coordinates, normals, groups and
//! materials are ignored. Face entries may use any of the `v`, `v/vt`,
//! `v//vn`, `v/vt/vn` forms and negative (relative) indices. Polygons are
//! fan-triangulated.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use mesh_types::{IndexedMesh, Vertex};
use tracing::debug;

use crate::error::{IoError, IoResult};
use crate::vtk::triangulate_fan;

/// Load a mesh from an OBJ file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or a record is malformed.
pub fn load_obj<P: AsRef<Path>>(path: P) -> IoResult<IndexedMesh> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| IoError::from_open(e, path))?;
    read_obj(BufReader::new(file))
}

/// Parse OBJ geometry from a reader.
///
/// # Errors
///
/// See [`load_obj`].
pub fn read_obj<R: BufRead>(reader: R) -> IoResult<IndexedMesh> {
    let mut mesh = IndexedMesh::new();
    let mut cell: Vec<i64> = Vec::with_capacity(4);

    for line in reader.lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("v") => {
                let mut coord = || -> IoResult<f64> {
                    parts
                        .next()
                        .ok_or_else(|| IoError::invalid_content("vertex with fewer than 3 coordinates"))?
                        .parse()
                        .map_err(IoError::from)
                };
                let (x, y, z) = (coord()?, coord()?, coord()?);
                mesh.vertices.push(Vertex::from_coords(x, y, z));
            }
            Some("f") => {
                cell.clear();
                for entry in parts {
                    let index: i64 = entry.split('/').next().unwrap_or(entry).parse()?;
                    cell.push(resolve(index, mesh.vertices.len())?);
                }
                if cell.len() < 3 {
                    return Err(IoError::invalid_content("face with fewer than 3 vertices"));
                }
                triangulate_fan(&cell, mesh.vertices.len(), &mut mesh.faces)?;
            }
            _ => {}
        }
    }

    debug!(
        vertices = mesh.vertices.len(),
        faces = mesh.faces.len(),
        "Read OBJ"
    );
    Ok(mesh)
}

/// 1-based (or negative, relative) OBJ index to 0-based.
fn resolve(index: i64, vertex_count: usize) -> IoResult<i64> {
    let count = i64::try_from(vertex_count).unwrap_or(i64::MAX);
    let resolved = match index {
        i if i > 0 => i - 1,
        i if i < 0 => count + i,
        _ => -1,
    };
    if (0..count).contains(&resolved) {
        Ok(resolved)
    } else {
        Err(IoError::IndexOutOfRange {
            index,
            vertex_count,
        })
    }
}

/// Save a mesh as OBJ.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn save_obj<P: AsRef<Path>>(mesh: &IndexedMesh, path: P) -> IoResult<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_obj(mesh, &mut writer)?;
    writer.flush()?;
    Ok(())
}

/// Write OBJ geometry to a writer.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_obj<W: Write>(mesh: &IndexedMesh, mut writer: W) -> IoResult<()> {
    writeln!(writer, "# mesh-io OBJ")?;
    for v in &mesh.vertices {
        writeln!(writer, "v {} {} {}", v.position.x, v.position.y, v.position.z)?;
    }
    for [a, b, c] in &mesh.faces {
        writeln!(writer, "f {} {} {}", a + 1, b + 1, c + 1)?;
    }
    Ok(())
}
