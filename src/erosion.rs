use crate::{
    CompactHeightfield,
    math::{dir_offset_x, dir_offset_z},
    span::AreaType,
};

impl CompactHeightfield {
    /// Erodes the walkable area by the agent radius, in cell units.
    ///
    /// Spans closer than `walkable_radius` cells to an obstruction or a
    /// missing neighbor lose their walkable area so that the final mesh only
    /// contains positions where the whole agent fits.
    pub fn erode_walkable_area(&mut self, walkable_radius: u16) {
        let mut distance_to_boundary = vec![u8::MAX; self.spans.len()];

        // Mark boundary cells.
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = *self.cell_at(x, z);
                for span_index in cell.span_range() {
                    if !self.areas[span_index].is_walkable() {
                        distance_to_boundary[span_index] = 0;
                        continue;
                    }
                    let span = &self.spans[span_index];
                    // Check that there is a walkable connected span in each of the
                    // 4 cardinal directions.
                    let mut neighbor_count = 0;
                    for direction in 0..4 {
                        let Some(neighbor_index) = self.con_index(x, z, span, direction) else {
                            break;
                        };
                        if !self.areas[neighbor_index].is_walkable() {
                            break;
                        }
                        neighbor_count += 1;
                    }

                    // At least one missing neighbor, so this is a boundary cell.
                    if neighbor_count != 4 {
                        distance_to_boundary[span_index] = 0;
                    }
                }
            }
        }

        // Pass 1: top-left to bottom-right.
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = *self.cell_at(x, z);
                for span_index in cell.span_range() {
                    let span = self.spans[span_index].clone();
                    // (-1, 0)
                    if let Some(neighbor_index) = self.con_index(x, z, &span, 0) {
                        propagate(&mut distance_to_boundary, neighbor_index, span_index, 2);
                        // (-1, -1)
                        let neighbor = self.spans[neighbor_index].clone();
                        let nx = (x as i64 + dir_offset_x(0) as i64) as u32;
                        let nz = (z as i64 + dir_offset_z(0) as i64) as u32;
                        if let Some(diagonal_index) = self.con_index(nx, nz, &neighbor, 3) {
                            propagate(&mut distance_to_boundary, diagonal_index, span_index, 3);
                        }
                    }
                    // (0, -1)
                    if let Some(neighbor_index) = self.con_index(x, z, &span, 3) {
                        propagate(&mut distance_to_boundary, neighbor_index, span_index, 2);
                        // (1, -1)
                        let neighbor = self.spans[neighbor_index].clone();
                        let nx = (x as i64 + dir_offset_x(3) as i64) as u32;
                        let nz = (z as i64 + dir_offset_z(3) as i64) as u32;
                        if let Some(diagonal_index) = self.con_index(nx, nz, &neighbor, 2) {
                            propagate(&mut distance_to_boundary, diagonal_index, span_index, 3);
                        }
                    }
                }
            }
        }

        // Pass 2: bottom-right to top-left.
        for z in (0..self.height).rev() {
            for x in (0..self.width).rev() {
                let cell = *self.cell_at(x, z);
                for span_index in cell.span_range() {
                    let span = self.spans[span_index].clone();
                    // (1, 0)
                    if let Some(neighbor_index) = self.con_index(x, z, &span, 2) {
                        propagate(&mut distance_to_boundary, neighbor_index, span_index, 2);
                        // (1, 1)
                        let neighbor = self.spans[neighbor_index].clone();
                        let nx = (x as i64 + dir_offset_x(2) as i64) as u32;
                        let nz = (z as i64 + dir_offset_z(2) as i64) as u32;
                        if let Some(diagonal_index) = self.con_index(nx, nz, &neighbor, 1) {
                            propagate(&mut distance_to_boundary, diagonal_index, span_index, 3);
                        }
                    }
                    // (0, 1)
                    if let Some(neighbor_index) = self.con_index(x, z, &span, 1) {
                        propagate(&mut distance_to_boundary, neighbor_index, span_index, 2);
                        // (-1, 1)
                        let neighbor = self.spans[neighbor_index].clone();
                        let nx = (x as i64 + dir_offset_x(1) as i64) as u32;
                        let nz = (z as i64 + dir_offset_z(1) as i64) as u32;
                        if let Some(diagonal_index) = self.con_index(nx, nz, &neighbor, 0) {
                            propagate(&mut distance_to_boundary, diagonal_index, span_index, 3);
                        }
                    }
                }
            }
        }

        // Half-cell steps, so the radius needs doubling.
        let min_boundary_distance = (walkable_radius * 2).min(u8::MAX as u16) as u8;
        for (area, distance) in self.areas.iter_mut().zip(distance_to_boundary) {
            if distance < min_boundary_distance {
                *area = AreaType::NOT_WALKABLE;
            }
        }
    }
}

#[inline]
fn propagate(distances: &mut [u8], from: usize, to: usize, cost: u8) {
    let new_distance = distances[from].saturating_add(cost);
    if new_distance < distances[to] {
        distances[to] = new_distance;
    }
}

#[cfg(test)]
mod tests {
    use glam::{UVec3, Vec3A};

    use crate::{
        geometry::TriMesh,
        heightfield::HeightfieldBuilder,
        math::Aabb3d,
    };

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
    fn erosion_strips_the_rim() {
        let mut compact = compact_plane(6.0);
        compact.erode_walkable_area(1);

        // Rim cells lost their area, the interior kept it.
        let rim = compact.cell_at(0, 0).index() as usize;
        assert!(!compact.areas[rim].is_walkable());
        let center = compact.cell_at(3, 3).index() as usize;
        assert!(compact.areas[center].is_walkable());
    }

    #[test]
    fn large_radius_erodes_everything() {
        let mut compact = compact_plane(4.0);
        compact.erode_walkable_area(4);
        assert!(compact.areas.iter().all(|area| !area.is_walkable()));
    }
}
