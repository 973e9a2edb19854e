//! Legacy VTK PolyData support (ASCII).
//!
//! # Layout
//!
//! ```text
//! # vtk DataFile Version 3.0
//! title line
//! ASCII
//! DATASET POLYDATA
//! POINTS n float|double|...
//! x y z ...
//! POLYGONS m size
//! k i0 i1 ... ik-1
//! TRIANGLE_STRIPS m size
//! k i0 i1 ...
//! POINT_DATA n
//! NORMALS name double
//! nx ny nz ...
//! ```
//!
//! Polygons are fan-triangulated and strips are unrolled with alternating
//! winding. `VERTICES` and `LINES` cells carry no surface and are skipped.
//! Both the classic `count idx...` cell layout and the 5.x
//! `OFFSETS`/`CONNECTIVITY` layout are accepted. Binary files are rejected.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use mesh_types::{IndexedMesh, Vector3, Vertex};
use tracing::debug;

use crate::error::{IoError, IoResult};

/// Load a triangle mesh from a legacy ASCII VTK PolyData file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is binary, is not
/// PolyData, or references vertices that do not exist.
///
/// # Example
///
/// ```no_run
/// use mesh_io::load_vtk;
///
/// let mesh = load_vtk("fixedMesh.vtk").unwrap();
/// println!("Loaded {} faces", mesh.faces.len());
/// ```
pub fn load_vtk<P: AsRef<Path>>(path: P) -> IoResult<IndexedMesh> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| IoError::from_open(e, path))?;
    read_vtk(BufReader::new(file))
}

/// Parse legacy ASCII VTK PolyData from a reader.
///
/// # Errors
///
/// See [`load_vtk`].
pub fn read_vtk<R: BufRead>(reader: R) -> IoResult<IndexedMesh> {
    let mut lines = reader.lines();

    let mut header = || -> IoResult<String> {
        lines
            .next()
            .transpose()?
            .ok_or(IoError::UnexpectedEof { section: "header" })
    };

    let magic = header()?;
    if !magic.trim_start().starts_with("# vtk DataFile") {
        return Err(IoError::invalid_content("missing '# vtk DataFile' magic line"));
    }
    let _title = header()?;
    let encoding = header()?;
    match encoding.trim().to_ascii_uppercase().as_str() {
        "ASCII" => {}
        other => {
            return Err(IoError::Unsupported {
                what: "VTK encoding",
                found: other.to_string(),
            })
        }
    }

    // Collect remaining tokens, dropping METADATA blocks (terminated by a
    // blank line).
    let mut tokens: Vec<String> = Vec::new();
    let mut in_metadata = false;
    for line in lines {
        let line = line?;
        let trimmed = line.trim();
        if in_metadata {
            in_metadata = !trimmed.is_empty();
            continue;
        }
        if trimmed.eq_ignore_ascii_case("METADATA") {
            in_metadata = true;
            continue;
        }
        tokens.extend(trimmed.split_whitespace().map(str::to_string));
    }

    let mut cursor = Cursor::new(&tokens);
    let mut dataset_seen = false;
    let mut mesh = IndexedMesh::new();

    while let Some(keyword) = cursor.next() {
        match keyword.to_ascii_uppercase().as_str() {
            "DATASET" => {
                let kind = cursor.word("DATASET")?;
                if !kind.eq_ignore_ascii_case("POLYDATA") {
                    return Err(IoError::Unsupported {
                        what: "VTK dataset",
                        found: kind.to_string(),
                    });
                }
                dataset_seen = true;
            }
            "POINTS" => {
                let count = cursor.count("POINTS")?;
                let _scalar = cursor.word("POINTS")?;
                // The header count is untrusted; reserve only what the
                // remaining tokens can fill.
                mesh.vertices.reserve(count.min(cursor.remaining() / 3));
                for _ in 0..count {
                    let x = cursor.float("POINTS")?;
                    let y = cursor.float("POINTS")?;
                    let z = cursor.float("POINTS")?;
                    mesh.vertices.push(Vertex::from_coords(x, y, z));
                }
            }
            "POLYGONS" => {
                for cell in read_cells(&mut cursor, "POLYGONS")? {
                    triangulate_fan(&cell, mesh.vertices.len(), &mut mesh.faces)?;
                }
            }
            "TRIANGLE_STRIPS" => {
                for cell in read_cells(&mut cursor, "TRIANGLE_STRIPS")? {
                    unroll_strip(&cell, mesh.vertices.len(), &mut mesh.faces)?;
                }
            }
            "VERTICES" | "LINES" => {
                let _ = read_cells(&mut cursor, "VERTICES/LINES")?;
            }
            "POINT_DATA" => {
                let _count = cursor.count("POINT_DATA")?;
                read_point_normals(&mut cursor, &mut mesh)?;
                break;
            }
            "CELL_DATA" => break,
            other => {
                return Err(IoError::invalid_content(format!(
                    "unexpected keyword '{other}'"
                )))
            }
        }
    }

    if !dataset_seen {
        return Err(IoError::invalid_content("missing DATASET POLYDATA"));
    }

    debug!(
        vertices = mesh.vertices.len(),
        faces = mesh.faces.len(),
        "Read VTK PolyData"
    );
    Ok(mesh)
}

/// Reads one cell section, returning each cell's point ids.
fn read_cells(cursor: &mut Cursor<'_>, section: &'static str) -> IoResult<Vec<Vec<i64>>> {
    let count = cursor.count(section)?;
    let _size = cursor.count(section)?;

    if cursor.peek().is_some_and(|t| t.eq_ignore_ascii_case("OFFSETS")) {
        // 5.x layout: count is the number of offsets (cells + 1).
        let _ = cursor.next();
        let _ = cursor.word(section)?;
        let offsets = (0..count)
            .map(|_| cursor.int(section))
            .collect::<IoResult<Vec<i64>>>()?;
        let conn_kw = cursor.word(section)?;
        if !conn_kw.eq_ignore_ascii_case("CONNECTIVITY") {
            return Err(IoError::invalid_content(format!(
                "expected CONNECTIVITY in {section}, found '{conn_kw}'"
            )));
        }
        let _ = cursor.word(section)?;
        let total = offsets.last().copied().unwrap_or(0);
        let conn = (0..total)
            .map(|_| cursor.int(section))
            .collect::<IoResult<Vec<i64>>>()?;
        return offsets
            .windows(2)
            .map(|w| -> IoResult<Vec<i64>> {
                let (start, end) = (to_usize(w[0])?, to_usize(w[1])?);
                conn.get(start..end)
                    .map(<[i64]>::to_vec)
                    .ok_or_else(|| IoError::invalid_content("offsets exceed connectivity"))
            })
            .collect();
    }

    (0..count)
        .map(|_| -> IoResult<Vec<i64>> {
            let n = cursor.count(section)?;
            (0..n).map(|_| cursor.int(section)).collect()
        })
        .collect()
}

fn read_point_normals(cursor: &mut Cursor<'_>, mesh: &mut IndexedMesh) -> IoResult<()> {
    while let Some(token) = cursor.next() {
        if token.eq_ignore_ascii_case("CELL_DATA") {
            return Ok(());
        }
        if token.eq_ignore_ascii_case("NORMALS") {
            let _name = cursor.word("NORMALS")?;
            let _scalar = cursor.word("NORMALS")?;
            for vertex in &mut mesh.vertices {
                let n = Vector3::new(
                    cursor.float("NORMALS")?,
                    cursor.float("NORMALS")?,
                    cursor.float("NORMALS")?,
                );
                vertex.normal = Some(n);
            }
            return Ok(());
        }
    }
    Ok(())
}

fn to_usize(value: i64) -> IoResult<usize> {
    usize::try_from(value).map_err(|_| IoError::invalid_content(format!("negative count {value}")))
}

fn vertex_index(index: i64, vertex_count: usize) -> IoResult<u32> {
    usize::try_from(index)
        .ok()
        .filter(|&i| i < vertex_count)
        .and_then(|i| u32::try_from(i).ok())
        .ok_or(IoError::IndexOutOfRange {
            index,
            vertex_count,
        })
}

/// `[a, b, c, d]` becomes `[a, b, c]`, `[a, c, d]`.
pub(crate) fn triangulate_fan(
    cell: &[i64],
    vertex_count: usize,
    faces: &mut Vec<[u32; 3]>,
) -> IoResult<()> {
    let ids = cell
        .iter()
        .map(|&i| vertex_index(i, vertex_count))
        .collect::<IoResult<Vec<u32>>>()?;
    if let Some((&apex, rest)) = ids.split_first() {
        faces.extend(rest.windows(2).map(|w| [apex, w[0], w[1]]));
    }
    Ok(())
}

fn unroll_strip(cell: &[i64], vertex_count: usize, faces: &mut Vec<[u32; 3]>) -> IoResult<()> {
    let ids = cell
        .iter()
        .map(|&i| vertex_index(i, vertex_count))
        .collect::<IoResult<Vec<u32>>>()?;
    for (k, w) in ids.windows(3).enumerate() {
        if k % 2 == 0 {
            faces.push([w[0], w[1], w[2]]);
        } else {
            faces.push([w[1], w[0], w[2]]);
        }
    }
    Ok(())
}

struct Cursor<'a> {
    tokens: &'a [String],
    pos: usize,
}

impl<'a> Cursor<'a> {
    const fn new(tokens: &'a [String]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn remaining(&self) -> usize {
        self.tokens.len().saturating_sub(self.pos)
    }

    fn next(&mut self) -> Option<&'a str> {
        let token = self.peek()?;
        self.pos += 1;
        Some(token)
    }

    fn word(&mut self, section: &'static str) -> IoResult<&'a str> {
        self.next().ok_or(IoError::UnexpectedEof { section })
    }

    fn float(&mut self, section: &'static str) -> IoResult<f64> {
        Ok(self.word(section)?.parse()?)
    }

    fn int(&mut self, section: &'static str) -> IoResult<i64> {
        Ok(self.word(section)?.parse()?)
    }

    fn count(&mut self, section: &'static str) -> IoResult<usize> {
        to_usize(self.int(section)?)
    }
}

/// Save a mesh as legacy ASCII VTK PolyData.
///
/// Coordinates are written at full `f64` precision, so a save/load round
/// trip reproduces positions exactly. Normals are written as point data
/// when every vertex has one.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn save_vtk<P: AsRef<Path>>(mesh: &IndexedMesh, path: P) -> IoResult<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_vtk(mesh, &mut writer)?;
    writer.flush()?;
    Ok(())
}

/// Write legacy ASCII VTK PolyData to a writer.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_vtk<W: Write>(mesh: &IndexedMesh, mut writer: W) -> IoResult<()> {
    writeln!(writer, "# vtk DataFile Version 3.0")?;
    writeln!(writer, "mesh-io PolyData")?;
    writeln!(writer, "ASCII")?;
    writeln!(writer, "DATASET POLYDATA")?;

    writeln!(writer, "POINTS {} double", mesh.vertices.len())?;
    for v in &mesh.vertices {
        writeln!(writer, "{} {} {}", v.position.x, v.position.y, v.position.z)?;
    }

    writeln!(writer, "POLYGONS {} {}", mesh.faces.len(), mesh.faces.len() * 4)?;
    for [a, b, c] in &mesh.faces {
        writeln!(writer, "3 {a} {b} {c}")?;
    }

    let normals: Option<Vec<Vector3<f64>>> = mesh.vertices.iter().map(|v| v.normal).collect();
    if let Some(normals) = normals.filter(|n| !n.is_empty()) {
        writeln!(writer, "POINT_DATA {}", normals.len())?;
        writeln!(writer, "NORMALS Normals double")?;
        for n in normals {
            writeln!(writer, "{} {} {}", n.x, n.y, n.z)?;
        }
    }

    Ok(())
}
