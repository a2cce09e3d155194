//! Distance field over the walkable surface, used to seed the watershed
//! partitioning.

use crate::{
    CompactHeightfield,
    math::{dir_offset_x, dir_offset_z},
};

impl CompactHeightfield {
    /// Prepares for region partitioning by calculating a distance field along
    /// the walkable surface. Each span gets its distance to the nearest
    /// boundary in half-cell steps, smoothed with a box blur.
    pub fn build_distance_field(&mut self) {
        let mut src = vec![0_u16; self.spans.len()];
        let mut dst = vec![0_u16; self.spans.len()];

        self.max_distance = self.calculate_distance_field(&mut src);
        self.box_blur(1, &src, &mut dst);
        self.dist = dst;
    }

    fn calculate_distance_field(&mut self, src: &mut [u16]) -> u16 {
        src.fill(u16::MAX);

        // Mark boundary cells.
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = *self.cell_at(x, z);
                for i in cell.span_range() {
                    let area = self.areas[i];
                    let span = &self.spans[i];

                    let mut neighbor_count = 0;
                    for dir in 0..4 {
                        if let Some(neighbor_index) = self.con_index(x, z, span, dir)
                            && self.areas[neighbor_index] == area
                        {
                            neighbor_count += 1;
                        }
                    }
                    if neighbor_count != 4 {
                        src[i] = 0;
                    }
                }
            }
        }

        // Pass 1: top-left to bottom-right.
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = *self.cell_at(x, z);
                for i in cell.span_range() {
                    let span = self.spans[i].clone();
                    // (-1, 0)
                    if let Some(neighbor_index) = self.con_index(x, z, &span, 0) {
                        relax(src, neighbor_index, i, 2);
                        // (-1, -1)
                        let neighbor = self.spans[neighbor_index].clone();
                        let nx = (x as i64 + dir_offset_x(0) as i64) as u32;
                        let nz = (z as i64 + dir_offset_z(0) as i64) as u32;
                        if let Some(diagonal_index) = self.con_index(nx, nz, &neighbor, 3) {
                            relax(src, diagonal_index, i, 3);
                        }
                    }
                    // (0, -1)
                    if let Some(neighbor_index) = self.con_index(x, z, &span, 3) {
                        relax(src, neighbor_index, i, 2);
                        // (1, -1)
                        let neighbor = self.spans[neighbor_index].clone();
                        let nx = (x as i64 + dir_offset_x(3) as i64) as u32;
                        let nz = (z as i64 + dir_offset_z(3) as i64) as u32;
                        if let Some(diagonal_index) = self.con_index(nx, nz, &neighbor, 2) {
                            relax(src, diagonal_index, i, 3);
                        }
                    }
                }
            }
        }

        // Pass 2: bottom-right to top-left.
        for z in (0..self.height).rev() {
            for x in (0..self.width).rev() {
                let cell = *self.cell_at(x, z);
                for i in cell.span_range() {
                    let span = self.spans[i].clone();
                    // (1, 0)
                    if let Some(neighbor_index) = self.con_index(x, z, &span, 2) {
                        relax(src, neighbor_index, i, 2);
                        // (1, 1)
                        let neighbor = self.spans[neighbor_index].clone();
                        let nx = (x as i64 + dir_offset_x(2) as i64) as u32;
                        let nz = (z as i64 + dir_offset_z(2) as i64) as u32;
                        if let Some(diagonal_index) = self.con_index(nx, nz, &neighbor, 1) {
                            relax(src, diagonal_index, i, 3);
                        }
                    }
                    // (0, 1)
                    if let Some(neighbor_index) = self.con_index(x, z, &span, 1) {
                        relax(src, neighbor_index, i, 2);
                        // (-1, 1)
                        let neighbor = self.spans[neighbor_index].clone();
                        let nx = (x as i64 + dir_offset_x(1) as i64) as u32;
                        let nz = (z as i64 + dir_offset_z(1) as i64) as u32;
                        if let Some(diagonal_index) = self.con_index(nx, nz, &neighbor, 0) {
                            relax(src, diagonal_index, i, 3);
                        }
                    }
                }
            }
        }

        src.iter().copied().max().unwrap_or(0)
    }

    fn box_blur(&self, threshold: u16, src: &[u16], dst: &mut [u16]) {
        let threshold = threshold * 2;
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = *self.cell_at(x, z);
                for i in cell.span_range() {
                    let span = &self.spans[i];
                    let center_distance = src[i];
                    if center_distance <= threshold {
                        dst[i] = center_distance;
                        continue;
                    }

                    let mut sum = center_distance as u32;
                    for dir in 0..4 {
                        if let Some(neighbor_index) = self.con_index(x, z, span, dir) {
                            sum += src[neighbor_index] as u32;

                            let neighbor = &self.spans[neighbor_index];
                            let nx = (x as i64 + dir_offset_x(dir) as i64) as u32;
                            let nz = (z as i64 + dir_offset_z(dir) as i64) as u32;
                            let dir2 = (dir + 1) & 3;
                            if let Some(diagonal_index) = self.con_index(nx, nz, neighbor, dir2) {
                                sum += src[diagonal_index] as u32;
                            } else {
                                sum += center_distance as u32;
                            }
                        } else {
                            sum += center_distance as u32 * 2;
                        }
                    }
                    dst[i] = ((sum + 5) / 9) as u16;
                }
            }
        }
    }
}

#[inline]
fn relax(distances: &mut [u16], from: usize, to: usize, cost: u16) {
    let new_distance = distances[from].saturating_add(cost);
    if new_distance < distances[to] {
        distances[to] = new_distance;
    }
}

#[cfg(test)]
mod tests {
    use glam::{UVec3, Vec3A};

    use crate::{geometry::TriMesh, heightfield::HeightfieldBuilder, math::Aabb3d};

    use super::*;

    fn compact_plane(size: f32) -> CompactHeightfield {
        let mut mesh = TriMesh::new(
            vec![
                Vec3A::new(0.0, 0.1, 0.0),
                Vec3A::new(size, 0.1, 0.0),
                Vec3A::new(size, 0.1, size),
                Vec3A::new(0.0, 0.1, size),
            ],
            vec![UVec3::new(0, 2, 1), UVec3::new(0, 3, 2)],
        );
        mesh.mark_walkable_triangles(45.0_f32.to_radians());
        let mut heightfield = HeightfieldBuilder {
            aabb: Aabb3d::from_min_max(Vec3A::ZERO, Vec3A::new(size, 2.0, size)),
            cell_size: 1.0,
            cell_height: 0.2,
        }
        .build()
        .unwrap();
        mesh.rasterize_triangles(&mut heightfield, 1).unwrap();
        heightfield.into_compact(2, 1).unwrap()
    }

    #[test]
    fn center_is_farther_from_boundary_than_rim() {
        let mut compact = compact_plane(9.0);
        compact.build_distance_field();

        let rim = compact.cell_at(0, 0).index() as usize;
        let center = compact.cell_at(4, 4).index() as usize;
        assert!(compact.dist[center] > compact.dist[rim]);
        assert!(compact.max_distance >= compact.dist[center]);
    }

    #[test]
    fn distance_field_has_one_entry_per_span() {
        let mut compact = compact_plane(4.0);
        compact.build_distance_field();
        assert_eq!(compact.dist.len(), compact.spans.len());
    }
}
