//! Contains methods for rasterizing triangles of a [`TriMesh`] into a [`Heightfield`].

use glam::Vec3A;
use thiserror::Error;

use crate::{
    geometry::TriMesh,
    heightfield::{Heightfield, SpanInsertion, SpanInsertionError},
    math::TriangleVertices as _,
    span::{AreaType, SpanBuilder},
};

/// The maximum quantized span height.
const SPAN_MAX_HEIGHT: u32 = u16::MAX as u32;

/// Errors that can occur when rasterizing a [`TriMesh`] into a [`Heightfield`].
#[derive(Error, Debug)]
pub enum RasterizationError {
    /// A triangle references a vertex that is not in the trimesh.
    #[error("triangle {triangle} references vertex {vertex}, but the trimesh only has {vertex_count} vertices")]
    VertexOutOfBounds {
        /// The index of the offending triangle
        triangle: usize,
        /// The out-of-bounds vertex index
        vertex: u32,
        /// The number of vertices in the trimesh
        vertex_count: usize,
    },
    /// A span landed outside the heightfield grid.
    #[error(transparent)]
    SpanInsertion(#[from] SpanInsertionError),
}

impl TriMesh {
    /// Rasterizes all triangles into the heightfield, producing one or more
    /// spans per covered column.
    ///
    /// `flag_merge_threshold` is the maximum ceiling difference in cell units
    /// under which two merged spans also merge their area types.
    pub fn rasterize_triangles(
        &self,
        heightfield: &mut Heightfield,
        flag_merge_threshold: u32,
    ) -> Result<(), RasterizationError> {
        let inverse_cell_size = 1.0 / heightfield.cell_size;
        let inverse_cell_height = 1.0 / heightfield.cell_height;
        for (i, indices) in self.indices.iter().enumerate() {
            let mut triangle = [Vec3A::ZERO; 3];
            for (corner, index) in triangle.iter_mut().zip(indices.to_array()) {
                *corner = *self.vertices.get(index as usize).ok_or(
                    RasterizationError::VertexOutOfBounds {
                        triangle: i,
                        vertex: index,
                        vertex_count: self.vertices.len(),
                    },
                )?;
            }
            rasterize_triangle(
                triangle,
                self.area_types[i],
                heightfield,
                inverse_cell_size,
                inverse_cell_height,
                flag_merge_threshold,
            )?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Axis {
    X,
    Z,
}

/// Clipped triangles can have up to 7 vertices.
const MAX_CLIPPED_VERTS: usize = 7;

type ClipBuffer = [Vec3A; MAX_CLIPPED_VERTS];

/// Divides a convex polygon of max 4 vertices into two convex polygons on
/// both sides of a line along the given axis at `offset`.
fn divide_poly(
    input: &ClipBuffer,
    input_len: usize,
    below: &mut ClipBuffer,
    above: &mut ClipBuffer,
    offset: f32,
    axis: Axis,
) -> (usize, usize) {
    debug_assert!(input_len <= MAX_CLIPPED_VERTS);
    // How far positive or negative away from the separating axis is each vertex.
    let mut deltas = [0.0_f32; MAX_CLIPPED_VERTS];
    for (delta, vertex) in deltas.iter_mut().zip(input.iter()).take(input_len) {
        let along_axis = match axis {
            Axis::X => vertex.x,
            Axis::Z => vertex.z,
        };
        *delta = offset - along_axis;
    }

    let mut below_len = 0;
    let mut above_len = 0;
    let mut previous = input_len - 1;
    for current in 0..input_len {
        let same_side = (deltas[current] >= 0.0) == (deltas[previous] >= 0.0);
        if !same_side {
            let s = deltas[previous] / (deltas[previous] - deltas[current]);
            let intersection = input[previous] + (input[current] - input[previous]) * s;
            below[below_len] = intersection;
            above[above_len] = intersection;
            below_len += 1;
            above_len += 1;
            // Add the current point to the right polygon. Addition is done even for
            // points on the dividing line (deltas == 0).
            if deltas[current] > 0.0 {
                below[below_len] = input[current];
                below_len += 1;
            } else if deltas[current] < 0.0 {
                above[above_len] = input[current];
                above_len += 1;
            }
        } else {
            // Add the current point to the right polygon. If the point is on the
            // dividing line, both polygons get it.
            if deltas[current] >= 0.0 {
                below[below_len] = input[current];
                below_len += 1;
                if deltas[current] != 0.0 {
                    previous = current;
                    continue;
                }
            }
            above[above_len] = input[current];
            above_len += 1;
        }
        previous = current;
    }
    (below_len, above_len)
}

/// Rasterizes a single triangle into the heightfield by clipping it against
/// every covered cell and inserting a span per cell.
fn rasterize_triangle(
    triangle: [Vec3A; 3],
    area: AreaType,
    heightfield: &mut Heightfield,
    inverse_cell_size: f32,
    inverse_cell_height: f32,
    flag_merge_threshold: u32,
) -> Result<(), SpanInsertionError> {
    let triangle_aabb = triangle.aabb();
    let grid_aabb = heightfield.aabb;
    // Triangles outside the grid contribute nothing.
    if triangle_aabb.max.cmplt(grid_aabb.min).any() || triangle_aabb.min.cmpgt(grid_aabb.max).any()
    {
        return Ok(());
    }

    let width = heightfield.width as i64;
    let height = heightfield.height as i64;
    let by = grid_aabb.max.y - grid_aabb.min.y;
    let cell_size = heightfield.cell_size;

    // Calculate the footprint of the triangle on the grid's z-axis.
    let z0 = ((triangle_aabb.min.z - grid_aabb.min.z) * inverse_cell_size) as i64;
    let z1 = ((triangle_aabb.max.z - grid_aabb.min.z) * inverse_cell_size) as i64;
    // Use -1 rather than 0 to cut the polygon properly at the start of the tile.
    let z0 = z0.clamp(-1, height - 1);
    let z1 = z1.clamp(0, height - 1);

    let mut input: ClipBuffer = Default::default();
    let mut row: ClipBuffer = Default::default();
    let mut scratch: ClipBuffer = Default::default();
    let mut remainder: ClipBuffer = Default::default();
    input[..3].copy_from_slice(&triangle);
    let mut input_len = 3;

    for z in z0..=z1 {
        // Clip polygon to row.
        let cell_z = grid_aabb.min.z + z as f32 * cell_size;
        let (row_len, rest_len) = divide_poly(
            &input,
            input_len,
            &mut row,
            &mut remainder,
            cell_z + cell_size,
            Axis::Z,
        );
        std::mem::swap(&mut input, &mut remainder);
        input_len = rest_len;
        if row_len < 3 || z < 0 {
            continue;
        }

        // Find x-axis bounds of the row.
        let mut min_x = row[0].x;
        let mut max_x = row[0].x;
        for vertex in row.iter().take(row_len).skip(1) {
            min_x = min_x.min(vertex.x);
            max_x = max_x.max(vertex.x);
        }
        let x0 = (((min_x - grid_aabb.min.x) * inverse_cell_size) as i64).clamp(-1, width - 1);
        let x1 = (((max_x - grid_aabb.min.x) * inverse_cell_size) as i64).clamp(0, width - 1);
        if x1 < 0 || x0 >= width {
            continue;
        }

        let mut row_remainder_len = row_len;
        for x in x0..=x1 {
            // Clip polygon to column.
            let cell_x = grid_aabb.min.x + x as f32 * cell_size;
            let (cell_len, rest_len) = divide_poly(
                &row,
                row_remainder_len,
                &mut scratch,
                &mut remainder,
                cell_x + cell_size,
                Axis::X,
            );
            std::mem::swap(&mut row, &mut remainder);
            row_remainder_len = rest_len;
            if cell_len < 3 || x < 0 {
                continue;
            }

            // Calculate min and max of the span.
            let mut span_min = scratch[0].y;
            let mut span_max = scratch[0].y;
            for vertex in scratch.iter().take(cell_len).skip(1) {
                span_min = span_min.min(vertex.y);
                span_max = span_max.max(vertex.y);
            }
            span_min -= grid_aabb.min.y;
            span_max -= grid_aabb.min.y;
            // Skip the span if it's outside the heightfield's y-extents.
            if span_max < 0.0 || span_min > by {
                continue;
            }
            let span_min = span_min.max(0.0);
            let span_max = span_max.min(by);

            // Snap the span to the heightfield grid.
            let min = ((span_min * inverse_cell_height).floor() as u32)
                .clamp(0, SPAN_MAX_HEIGHT - 1) as u16;
            let max = ((span_max * inverse_cell_height).ceil() as u32)
                .clamp(min as u32 + 1, SPAN_MAX_HEIGHT) as u16;

            heightfield.add_span(SpanInsertion {
                x: x as u32,
                z: z as u32,
                flag_merge_threshold,
                span: SpanBuilder {
                    min,
                    max,
                    area,
                    next: None,
                }
                .build(),
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use glam::UVec3;

    use crate::{heightfield::HeightfieldBuilder, math::Aabb3d};

    use super::*;

    fn flat_quad() -> TriMesh {
        let mut mesh = TriMesh::new(
            vec![
                Vec3A::new(0.0, 0.5, 0.0),
                Vec3A::new(4.0, 0.5, 0.0),
                Vec3A::new(4.0, 0.5, 4.0),
                Vec3A::new(0.0, 0.5, 4.0),
            ],
            vec![UVec3::new(0, 2, 1), UVec3::new(0, 3, 2)],
        );
        mesh.mark_walkable_triangles(45.0_f32.to_radians());
        mesh
    }

    fn heightfield() -> Heightfield {
        HeightfieldBuilder {
            aabb: Aabb3d::from_min_max(Vec3A::ZERO, Vec3A::new(4.0, 2.0, 4.0)),
            cell_size: 1.0,
            cell_height: 0.25,
        }
        .build()
        .unwrap()
    }

    #[test]
    fn quad_covers_every_column() {
        let mesh = flat_quad();
        let mut heightfield = heightfield();
        mesh.rasterize_triangles(&mut heightfield, 1).unwrap();

        for z in 0..heightfield.height {
            for x in 0..heightfield.width {
                let span = heightfield.span_at(x, z).unwrap();
                assert_eq!(span.min(), 2, "wrong floor at ({x}, {z})");
                assert_eq!(span.area(), AreaType::DEFAULT_WALKABLE);
                assert_eq!(span.next(), None);
            }
        }
    }

    #[test]
    fn triangle_outside_grid_adds_nothing() {
        let mesh = TriMesh::new(
            vec![
                Vec3A::new(10.0, 0.5, 10.0),
                Vec3A::new(11.0, 0.5, 10.0),
                Vec3A::new(11.0, 0.5, 11.0),
            ],
            vec![UVec3::new(0, 2, 1)],
        );
        let mut heightfield = heightfield();
        mesh.rasterize_triangles(&mut heightfield, 1).unwrap();
        assert!(heightfield.spans.is_empty());
    }

    #[test]
    fn out_of_bounds_index_is_an_error() {
        let mesh = TriMesh::new(vec![Vec3A::ZERO], vec![UVec3::new(0, 1, 2)]);
        let mut heightfield = heightfield();
        let result = mesh.rasterize_triangles(&mut heightfield, 1);
        assert!(matches!(
            result,
            Err(RasterizationError::VertexOutOfBounds { .. })
        ));
    }

    #[test]
    fn divide_poly_splits_a_triangle() {
        let mut input: ClipBuffer = Default::default();
        input[..3].copy_from_slice(&[
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(2.0, 0.0, 0.0),
            Vec3A::new(2.0, 0.0, 2.0),
        ]);
        let mut below: ClipBuffer = Default::default();
        let mut above: ClipBuffer = Default::default();
        let (below_len, above_len) = divide_poly(&input, 3, &mut below, &mut above, 1.0, Axis::X);
        assert_eq!(below_len, 3);
        assert_eq!(above_len, 4);
    }
}
