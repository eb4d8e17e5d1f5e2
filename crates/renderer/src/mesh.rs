//! Quad-grid geometry shared by every shader pass.
//!
//! Each grid cell owns its four corners, so vertices on interior seams are
//! emitted once per adjacent cell while the outer corners of the grid appear
//! exactly once. Every vertex carries the corner of the grid its cell leans
//! toward (`corner_offset`), which lets the vertex shader pull the cells
//! apart independently.

use crate::error::{RenderError, Result};

/// Vertices per cell before indexing.
const CELL_VERTICES: usize = 4;
/// Two triangles per cell.
const CELL_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

/// Attribute names in the order the effect programs declare them.
pub const MESH_ATTRIBUTES: [&str; 3] = ["aPosition", "aTexCoord", "aCornerOffset"];
/// Component count of each attribute in [`MESH_ATTRIBUTES`].
pub const MESH_STRIDES: [u32; 3] = [2, 2, 2];

/// Immutable vertex/index data for a `rows x columns` grid spanning clip space.
#[derive(Clone, Debug, PartialEq)]
pub struct Mesh {
    rows: u32,
    columns: u32,
    positions: Vec<[f32; 2]>,
    tex_coords: Vec<[f32; 2]>,
    corner_offsets: Vec<[f32; 2]>,
    indices: Vec<u16>,
}

impl Mesh {
    /// Builds the grid. Both dimensions must be positive and the vertex count
    /// must stay addressable by 16-bit indices.
    pub fn build(rows: u32, columns: u32) -> Result<Self> {
        if rows == 0 || columns == 0 {
            return Err(RenderError::InvalidMesh(format!(
                "grid needs at least one row and column, got {rows}x{columns}"
            )));
        }
        let cells = rows as usize * columns as usize;
        let vertex_count = cells * CELL_VERTICES;
        if vertex_count > u16::MAX as usize + 1 {
            return Err(RenderError::InvalidMesh(format!(
                "{rows}x{columns} grid needs {vertex_count} vertices, more than 16-bit indices address"
            )));
        }

        let mut positions = Vec::with_capacity(vertex_count);
        let mut tex_coords = Vec::with_capacity(vertex_count);
        let mut corner_offsets = Vec::with_capacity(vertex_count);
        let mut indices = Vec::with_capacity(cells * CELL_INDICES.len());

        let step_x = 2.0 / columns as f32;
        let step_y = 2.0 / rows as f32;

        for row in 0..rows {
            // Row 0 is the top of the image.
            let top = 1.0 - row as f32 * step_y;
            let bottom = top - step_y;
            let center_y = (top + bottom) * 0.5;
            for column in 0..columns {
                let left = -1.0 + column as f32 * step_x;
                let right = left + step_x;
                let center_x = (left + right) * 0.5;
                let offset = [
                    corner_weight(center_x, columns),
                    corner_weight(center_y, rows),
                ];

                let base = positions.len() as u16;
                for [x, y] in [[left, top], [left, bottom], [right, bottom], [right, top]] {
                    positions.push([x, y]);
                    tex_coords.push([(x + 1.0) * 0.5, 1.0 - (y + 1.0) * 0.5]);
                    corner_offsets.push(offset);
                }
                indices.extend(CELL_INDICES.iter().map(|index| base + index));
            }
        }

        Ok(Self {
            rows,
            columns,
            positions,
            tex_coords,
            corner_offsets,
            indices,
        })
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn columns(&self) -> u32 {
        self.columns
    }

    pub fn positions(&self) -> &[[f32; 2]] {
        &self.positions
    }

    pub fn tex_coords(&self) -> &[[f32; 2]] {
        &self.tex_coords
    }

    pub fn corner_offsets(&self) -> &[[f32; 2]] {
        &self.corner_offsets
    }

    pub fn indices(&self) -> &[u16] {
        &self.indices
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Attribute streams in [`MESH_ATTRIBUTES`] order.
    pub fn attribute_streams(&self) -> [&[[f32; 2]]; 3] {
        [&self.positions, &self.tex_coords, &self.corner_offsets]
    }
}

/// Maps a cell centre on one axis onto `[-1, 1]` so the outermost cells lean
/// fully toward the grid edge. A single cell has nowhere to lean.
fn corner_weight(center: f32, cells: u32) -> f32 {
    if cells < 2 {
        return 0.0;
    }
    let outermost = 1.0 - 1.0 / cells as f32;
    (center / outermost).clamp(-1.0, 1.0)
}
