use glam::{IVec3, Vec3A};

use crate::{CompactHeightfield, math::Aabb3d, span::AreaType};

/// A convex polygonal column that overrides the area type of the spans it
/// contains.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct ConvexVolume {
    /// The vertices of the polygon on the xz-plane.
    pub vertices: Vec<Vec3A>,
    /// The lower y-extent of the volume.
    pub min_y: f32,
    /// The upper y-extent of the volume.
    pub max_y: f32,
    /// The area type to apply.
    pub area: AreaType,
}

impl CompactHeightfield {
    /// Sets the [`AreaType`] of the walkable spans within the given convex volume.
    pub fn mark_convex_poly_area(&mut self, volume: &ConvexVolume) {
        // Compute the bounding box of the polygon
        let Some(mut aabb) = Aabb3d::from_verts(&volume.vertices) else {
            // The volume is empty
            return;
        };
        aabb.min.y = volume.min_y;
        aabb.max.y = volume.max_y;

        // Compute the grid footprint of the polygon
        let mut min = aabb.min - self.aabb.min;
        min.x /= self.cell_size;
        min.y /= self.cell_height;
        min.z /= self.cell_size;
        let mut max = aabb.max - self.aabb.min;
        max.x /= self.cell_size;
        max.y /= self.cell_height;
        max.z /= self.cell_size;
        let mut min = IVec3::new(min.x as i32, min.y as i32, min.z as i32);
        let mut max = IVec3::new(max.x as i32, max.y as i32, max.z as i32);

        // Early-out if the polygon lies entirely outside the grid.
        if max.x < 0 || min.x >= self.width as i32 || max.z < 0 || min.z >= self.height as i32 {
            return;
        }

        // Clamp the polygon footprint to the grid
        min.x = min.x.max(0);
        max.x = max.x.min(self.width as i32 - 1);
        min.z = min.z.max(0);
        max.z = max.z.min(self.height as i32 - 1);

        for z in min.z..=max.z {
            for x in min.x..=max.x {
                let cell = *self.cell_at(x as u32, z as u32);
                for i in cell.span_range() {
                    let span = &self.spans[i];

                    // Skip if span is removed.
                    if !self.areas[i].is_walkable() {
                        continue;
                    }

                    // Skip if y extents don't overlap.
                    if (span.y as i32) < min.y || (span.y as i32) > max.y {
                        continue;
                    }

                    let point = Vec3A::new(
                        self.aabb.min.x + (x as f32 + 0.5) * self.cell_size,
                        0.0,
                        self.aabb.min.z + (z as f32 + 0.5) * self.cell_size,
                    );
                    if point_in_poly(&point, &volume.vertices) {
                        self.areas[i] = volume.area;
                    }
                }
            }
        }
    }
}

fn point_in_poly(point: &Vec3A, vertices: &[Vec3A]) -> bool {
    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let xi = vertices[i].x;
        let yi = vertices[i].z;
        let xj = vertices[j].x;
        let yj = vertices[j].z;
        if ((yi > point.z) != (yj > point.z))
            && (point.x < (xj - xi) * (point.z - yi) / (yj - yi) + xi)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_in_poly_square() {
        let square = vec![
            Vec3A::new(0.0, 0.0, 0.0),
            Vec3A::new(2.0, 0.0, 0.0),
            Vec3A::new(2.0, 0.0, 2.0),
            Vec3A::new(0.0, 0.0, 2.0),
        ];
        assert!(point_in_poly(&Vec3A::new(1.0, 0.0, 1.0), &square));
        assert!(!point_in_poly(&Vec3A::new(3.0, 0.0, 1.0), &square));
        assert!(!point_in_poly(&Vec3A::new(-1.0, 0.0, 1.0), &square));
    }
}
