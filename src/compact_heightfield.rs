use crate::{
    compact_cell::CompactCell,
    compact_span::CompactSpan,
    heightfield::Heightfield,
    math::{Aabb3d, dir_offset_x, dir_offset_z},
    region::RegionId,
    span::AreaType,
};

/// A packed representation of the open (walkable) space above the solid
/// spans of a [`Heightfield`].
#[derive(Debug, Clone)]
pub struct CompactHeightfield {
    /// The width of the heightfield along the x-axis in cell units
    pub width: u32,
    /// The height of the heightfield along the z-axis in cell units
    pub height: u32,
    /// The walkable height used during the build of the field
    pub walkable_height: u16,
    /// The walkable climb used during the build of the field.
    pub walkable_climb: u16,
    /// The AABB border size used during the build of the field.
    pub border_size: u16,
    /// The maximum distance value of any span within the field.
    pub max_distance: u16,
    /// The maximum region id of any span within the field.
    pub max_region: RegionId,
    /// The AABB of the heightfield
    pub aabb: Aabb3d,
    /// The size of each cell on the xz-plane
    pub cell_size: f32,
    /// The size of each cell along the y-axis
    pub cell_height: f32,
    /// The cells in the heightfield [Size: `width * height`]
    pub cells: Vec<CompactCell>,
    /// All walkable spans in the heightfield
    pub spans: Vec<CompactSpan>,
    /// Vector containing border distance data. [Size: `spans.len()`]
    pub dist: Vec<u16>,
    /// Vector containing area type data. [Size: `spans.len()`]
    pub areas: Vec<AreaType>,
}

impl Heightfield {
    /// Builds a compact heightfield containing the open space above the
    /// walkable spans of this heightfield.
    ///
    /// # Errors
    ///
    /// Returns an error if a column contains more walkable layers than the
    /// packed neighbor encoding can address.
    pub fn into_compact(
        self,
        walkable_height: u16,
        walkable_climb: u16,
    ) -> Result<CompactHeightfield, CompactHeightfieldError> {
        const MAX_HEIGHT: u16 = u16::MAX;
        let walkable_span_count = self
            .spans
            .values()
            .filter(|span| span.area().is_walkable())
            .count();

        let mut compact = CompactHeightfield {
            width: self.width,
            height: self.height,
            walkable_height,
            walkable_climb,
            border_size: 0,
            max_distance: 0,
            max_region: RegionId::NONE,
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            cells: vec![CompactCell::default(); self.width as usize * self.height as usize],
            spans: vec![CompactSpan::default(); walkable_span_count],
            dist: vec![],
            areas: vec![AreaType::NOT_WALKABLE; walkable_span_count],
        };
        compact.aabb.max.y += walkable_height as f32 * compact.cell_height;

        // Fill in cells and spans.
        let mut cell_index = 0_usize;
        for z in 0..self.height {
            for x in 0..self.width {
                let column_index = (x + z * self.width) as usize;
                let Some(span_key) = self.columns[column_index] else {
                    // No spans at this cell, leave index=0, count=0.
                    continue;
                };
                let mut span_key_iter = Some(span_key);

                let cell = &mut compact.cells[column_index];
                cell.set_index(cell_index as u32);
                cell.set_count(0);

                while let Some(span_key) = span_key_iter {
                    let span = self.span(span_key);
                    span_key_iter = span.next();
                    if !span.area().is_walkable() {
                        continue;
                    }
                    let bot = span.max();
                    let top = span
                        .next()
                        .map(|span| self.span(span).min())
                        .unwrap_or(MAX_HEIGHT);
                    compact.spans[cell_index].y = bot;
                    let height = (top.saturating_sub(bot)).min(u8::MAX.into()) as u8;
                    compact.spans[cell_index].set_height(height);
                    compact.areas[cell_index] = span.area();
                    cell_index += 1;
                    cell.inc_count();
                }
            }
        }

        // Find neighbor connections.
        const MAX_LAYERS: u8 = CompactSpan::NOT_CONNECTED - 1;
        let mut max_layer_index = 0_u32;
        for z in 0..self.height {
            for x in 0..self.width {
                let column_index = (x + z * self.width) as usize;
                let cell = compact.cells[column_index];
                for i in cell.span_range() {
                    for dir in 0..4_u8 {
                        compact.spans[i].set_con(dir, None);
                        let neighbor_x = x as i64 + dir_offset_x(dir) as i64;
                        let neighbor_z = z as i64 + dir_offset_z(dir) as i64;
                        // First check that the neighbor cell is in bounds.
                        if neighbor_x < 0
                            || neighbor_z < 0
                            || neighbor_x >= self.width as i64
                            || neighbor_z >= self.height as i64
                        {
                            continue;
                        }

                        // Iterate over all neighbor spans and check if any of them is
                        // accessible from the current cell.
                        let neighbor_column =
                            (neighbor_x as u32 + neighbor_z as u32 * self.width) as usize;
                        let neighbor_cell = compact.cells[neighbor_column];
                        let span = compact.spans[i].clone();
                        for k in neighbor_cell.span_range() {
                            let neighbor_span = &compact.spans[k];
                            let bot = span.y.max(neighbor_span.y);
                            let top = (span.y as u32 + span.height() as u32)
                                .min(neighbor_span.y as u32 + neighbor_span.height() as u32);

                            // Check that the gap between the spans is walkable,
                            // and that the climb height between the gaps is not too high.
                            let is_walkable =
                                (top as i32 - bot as i32) >= walkable_height as i32;
                            let is_climbable = (neighbor_span.y as i32 - span.y as i32).abs()
                                <= walkable_climb as i32;
                            if !is_walkable || !is_climbable {
                                continue;
                            }
                            // Mark direction as walkable.
                            let layer_index = k as i64 - neighbor_cell.index() as i64;
                            if layer_index < 0 || layer_index > MAX_LAYERS as i64 {
                                max_layer_index = max_layer_index.max(layer_index as u32);
                                continue;
                            }
                            compact.spans[i].set_con(dir, Some(layer_index as u8));
                            break;
                        }
                    }
                }
            }
        }
        if max_layer_index > MAX_LAYERS as u32 {
            return Err(CompactHeightfieldError::TooManyLayers {
                max_layer_index: MAX_LAYERS,
                layer_index: max_layer_index,
            });
        }
        Ok(compact)
    }
}

impl CompactHeightfield {
    #[inline]
    pub(crate) fn column_index(&self, x: u32, z: u32) -> usize {
        x as usize + z as usize * self.width as usize
    }

    /// Returns the cell at the given coordinates. Panics if the coordinates are invalid.
    #[inline]
    pub fn cell_at(&self, x: u32, z: u32) -> &CompactCell {
        &self.cells[self.column_index(x, z)]
    }

    /// Index of the span connected to span `i` in direction `dir`, if any.
    #[inline]
    pub(crate) fn con_index(&self, x: u32, z: u32, span: &CompactSpan, dir: u8) -> Option<usize> {
        let layer = span.con(dir)?;
        let neighbor_x = (x as i64 + dir_offset_x(dir) as i64) as u32;
        let neighbor_z = (z as i64 + dir_offset_z(dir) as i64) as u32;
        let neighbor_cell = &self.cells[self.column_index(neighbor_x, neighbor_z)];
        Some(neighbor_cell.index() as usize + layer as usize)
    }
}

/// Errors that can occur when building a [`CompactHeightfield`].
#[derive(Debug, thiserror::Error)]
pub enum CompactHeightfieldError {
    /// The heightfield has too many layers.
    #[error(
        "heightfield has too many layers: max layer index is {max_layer_index}, but got {layer_index}"
    )]
    TooManyLayers {
        /// The maximum layer index.
        max_layer_index: u8,
        /// The layer index that caused the error.
        layer_index: u32,
    },
}

#[cfg(test)]
mod tests {
    use glam::{UVec3, Vec3A};

    use crate::{geometry::TriMesh, heightfield::HeightfieldBuilder};

    use super::*;

    fn compact_plane() -> CompactHeightfield {
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
        let mut heightfield = HeightfieldBuilder {
            aabb: Aabb3d::from_min_max(Vec3A::ZERO, Vec3A::new(4.0, 2.0, 4.0)),
            cell_size: 1.0,
            cell_height: 0.25,
        }
        .build()
        .unwrap();
        mesh.rasterize_triangles(&mut heightfield, 1).unwrap();
        heightfield.into_compact(2, 1).unwrap()
    }

    #[test]
    fn every_column_has_one_open_span() {
        let compact = compact_plane();
        assert_eq!(compact.spans.len(), 16);
        for z in 0..compact.height {
            for x in 0..compact.width {
                let cell = compact.cell_at(x, z);
                assert_eq!(cell.count(), 1, "wrong span count at ({x}, {z})");
            }
        }
    }

    #[test]
    fn interior_spans_connect_to_all_neighbors() {
        let compact = compact_plane();
        let cell = compact.cell_at(1, 1);
        let span = &compact.spans[cell.index() as usize];
        for dir in 0..4 {
            assert!(span.con(dir).is_some(), "no connection in direction {dir}");
        }
    }

    #[test]
    fn border_spans_lack_outward_connections() {
        let compact = compact_plane();
        let cell = compact.cell_at(0, 0);
        let span = &compact.spans[cell.index() as usize];
        // Direction 0 is -x, direction 3 is -z.
        assert!(span.con(0).is_none());
        assert!(span.con(3).is_none());
        assert!(span.con(1).is_some());
        assert!(span.con(2).is_some());
    }
}
