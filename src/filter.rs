//! Span filters applied between rasterization and compaction. Each filter
//! clears the area type of spans an agent could not actually stand on.

use crate::{
    heightfield::Heightfield,
    math::{dir_offset_x, dir_offset_z},
    span::{AreaType, SpanKey},
};

const MAX_HEIGHT: i32 = u16::MAX as i32;

impl Heightfield {
    fn column_index(&self, x: u32, z: u32) -> usize {
        (x + z * self.width) as usize
    }

    /// Marks non-walkable spans as walkable if their maximum is within
    /// `walkable_climb` of the walkable span below them.
    ///
    /// Allows the agent to walk over low obstructions such as curbs.
    pub fn filter_low_hanging_walkable_obstacles(&mut self, walkable_climb: u16) {
        for z in 0..self.height {
            for x in 0..self.width {
                let mut previous_max = 0_i32;
                let mut previous_was_walkable = false;
                let mut previous_area = AreaType::NOT_WALKABLE;

                let mut span_key_iter = self.columns[self.column_index(x, z)];
                while let Some(span_key) = span_key_iter {
                    let span = self.span(span_key);
                    let walkable = span.area().is_walkable();

                    // If current span is not walkable, but there is a walkable span just
                    // below it and the height difference is small enough for the agent to
                    // walk over, mark the current span as walkable too.
                    if !walkable
                        && previous_was_walkable
                        && (span.max() as i32 - previous_max).abs() <= walkable_climb as i32
                    {
                        self.span_mut(span_key).set_area(previous_area);
                    }

                    // Copy the original walkable value regardless of whether we changed it.
                    // This prevents multiple consecutive non-walkable spans from being
                    // erroneously marked as walkable.
                    previous_was_walkable = walkable;
                    previous_area = self.span(span_key).area();
                    previous_max = span.max() as i32;
                    span_key_iter = span.next();
                }
            }
        }
    }

    /// Marks spans that are at ledges as not walkable.
    ///
    /// A ledge is a span with a neighbor whose floor is further than
    /// `walkable_climb` below it. Removing them prevents paths that would
    /// let the agent step off a cliff.
    pub fn filter_ledge_spans(&mut self, walkable_height: u16, walkable_climb: u16) {
        for z in 0..self.height {
            for x in 0..self.width {
                let mut span_key_iter = self.columns[self.column_index(x, z)];
                while let Some(span_key) = span_key_iter {
                    let span = self.span(span_key);
                    span_key_iter = span.next();
                    if !span.area().is_walkable() {
                        continue;
                    }
                    if self.is_ledge(x, z, span_key, walkable_height, walkable_climb) {
                        self.span_mut(span_key).set_area(AreaType::NOT_WALKABLE);
                    }
                }
            }
        }
    }

    fn is_ledge(
        &self,
        x: u32,
        z: u32,
        span_key: SpanKey,
        walkable_height: u16,
        walkable_climb: u16,
    ) -> bool {
        let walkable_height = walkable_height as i32;
        let walkable_climb = walkable_climb as i32;
        let span = self.span(span_key);
        let bot = span.max() as i32;
        let top = span
            .next()
            .map(|next| self.span(next).min() as i32)
            .unwrap_or(MAX_HEIGHT);

        // The difference between this walkable area and the lowest neighbor
        // walkable area. This is the difference between the current span and all
        // neighbor spans that have enough space for an agent to move between.
        let mut min_neighbor_height = MAX_HEIGHT;
        // Min and max height of accessible neighbors.
        let mut accessible_min = span.max() as i32;
        let mut accessible_max = span.max() as i32;

        for dir in 0..4_u8 {
            let dx = x as i64 + dir_offset_x(dir) as i64;
            let dz = z as i64 + dir_offset_z(dir) as i64;
            // Skip neighbors which are out of bounds.
            if dx < 0 || dz < 0 || dx >= self.width as i64 || dz >= self.height as i64 {
                min_neighbor_height = min_neighbor_height.min(-walkable_climb - bot);
                continue;
            }

            // From minus infinity to the first span.
            let mut neighbor_key_iter = self.columns[self.column_index(dx as u32, dz as u32)];
            let first_neighbor_top = neighbor_key_iter
                .map(|key| self.span(key).min() as i32)
                .unwrap_or(MAX_HEIGHT);
            if top.min(first_neighbor_top) - bot >= walkable_height {
                min_neighbor_height = min_neighbor_height.min(-walkable_climb - bot);
            }

            // Rest of the spans.
            while let Some(neighbor_key) = neighbor_key_iter {
                let neighbor = self.span(neighbor_key);
                let neighbor_bot = neighbor.max() as i32;
                let neighbor_top = neighbor
                    .next()
                    .map(|next| self.span(next).min() as i32)
                    .unwrap_or(MAX_HEIGHT);
                neighbor_key_iter = neighbor.next();

                // Skip neighbor if the gap between the spans is too small.
                if top.min(neighbor_top) - bot.max(neighbor_bot) < walkable_height {
                    continue;
                }
                min_neighbor_height = min_neighbor_height.min(neighbor_bot - bot);

                // Find min/max accessible neighbor height.
                if (neighbor_bot - bot).abs() <= walkable_climb {
                    accessible_min = accessible_min.min(neighbor_bot);
                    accessible_max = accessible_max.max(neighbor_bot);
                }
            }
        }

        // The current span is close to a ledge if the drop to any neighbor span
        // is less than the walkable climb. Also spans between which the agent
        // cannot stand but whose accessible neighbors spread further apart than
        // the walkable climb sit on steep slopes.
        min_neighbor_height < -walkable_climb
            || accessible_max - accessible_min > walkable_climb
    }

    /// Marks walkable spans as not walkable if the clearance above them is
    /// less than `walkable_height`.
    pub fn filter_walkable_low_height_spans(&mut self, walkable_height: u16) {
        for z in 0..self.height {
            for x in 0..self.width {
                let mut span_key_iter = self.columns[self.column_index(x, z)];
                while let Some(span_key) = span_key_iter {
                    let span = self.span(span_key);
                    let bot = span.max() as i32;
                    let top = span
                        .next()
                        .map(|next| self.span(next).min() as i32)
                        .unwrap_or(MAX_HEIGHT);
                    if top - bot < walkable_height as i32 {
                        self.span_mut(span_key).set_area(AreaType::NOT_WALKABLE);
                    }
                    span_key_iter = span.next();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::{
        heightfield::{HeightfieldBuilder, SpanInsertion},
        math::Aabb3d,
        span::SpanBuilder,
    };

    use super::*;

    fn heightfield() -> Heightfield {
        HeightfieldBuilder {
            aabb: Aabb3d::from_min_max(Vec3A::ZERO, Vec3A::new(4.0, 20.0, 4.0)),
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap()
    }

    fn insert(heightfield: &mut Heightfield, x: u32, z: u32, min: u16, max: u16, area: AreaType) {
        heightfield
            .add_span(SpanInsertion {
                x,
                z,
                flag_merge_threshold: 0,
                span: SpanBuilder {
                    min,
                    max,
                    area,
                    next: None,
                }
                .build(),
            })
            .unwrap();
    }

    #[test]
    fn low_hanging_obstacle_becomes_walkable() {
        let mut heightfield = heightfield();
        insert(&mut heightfield, 1, 1, 0, 2, AreaType::DEFAULT_WALKABLE);
        insert(&mut heightfield, 1, 1, 3, 4, AreaType::NOT_WALKABLE);

        heightfield.filter_low_hanging_walkable_obstacles(2);

        let low = heightfield.span_at(1, 1).unwrap();
        let high = heightfield.span(low.next().unwrap());
        assert_eq!(high.area(), AreaType::DEFAULT_WALKABLE);
    }

    #[test]
    fn tall_obstacle_stays_unwalkable() {
        let mut heightfield = heightfield();
        insert(&mut heightfield, 1, 1, 0, 2, AreaType::DEFAULT_WALKABLE);
        insert(&mut heightfield, 1, 1, 6, 8, AreaType::NOT_WALKABLE);

        heightfield.filter_low_hanging_walkable_obstacles(2);

        let low = heightfield.span_at(1, 1).unwrap();
        let high = heightfield.span(low.next().unwrap());
        assert_eq!(high.area(), AreaType::NOT_WALKABLE);
    }

    #[test]
    fn ledge_span_is_removed() {
        let mut heightfield = heightfield();
        // A plateau at height 10 surrounded by nothing is all ledge.
        insert(&mut heightfield, 2, 2, 0, 10, AreaType::DEFAULT_WALKABLE);

        heightfield.filter_ledge_spans(2, 1);

        let span = heightfield.span_at(2, 2).unwrap();
        assert_eq!(span.area(), AreaType::NOT_WALKABLE);
    }

    #[test]
    fn interior_span_survives_ledge_filter() {
        let mut heightfield = heightfield();
        for z in 0..4 {
            for x in 0..4 {
                insert(&mut heightfield, x, z, 0, 1, AreaType::DEFAULT_WALKABLE);
            }
        }

        heightfield.filter_ledge_spans(2, 1);

        let span = heightfield.span_at(1, 1).unwrap();
        assert_eq!(span.area(), AreaType::DEFAULT_WALKABLE);
    }

    #[test]
    fn low_ceiling_removes_walkability() {
        let mut heightfield = heightfield();
        insert(&mut heightfield, 1, 1, 0, 2, AreaType::DEFAULT_WALKABLE);
        insert(&mut heightfield, 1, 1, 3, 6, AreaType::NOT_WALKABLE);

        heightfield.filter_walkable_low_height_spans(4);

        let span = heightfield.span_at(1, 1).unwrap();
        assert_eq!(span.area(), AreaType::NOT_WALKABLE);
    }
}
