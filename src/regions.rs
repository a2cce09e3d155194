//! Watershed partitioning of the walkable surface into regions.
//!
//! Regions consist of connected, non-overlapping walkable spans that form a
//! single contour, so contours traced from them form simple polygons.

use std::collections::HashMap;

use thiserror::Error;

use crate::{
    CompactHeightfield,
    math::{dir_offset_x, dir_offset_z},
    region::RegionId,
    span::AreaType,
};

/// Errors that can occur during watershed partitioning.
#[derive(Error, Debug)]
pub enum RegionBuildError {
    /// More regions were created than the id space can address.
    #[error("too many regions, the maximum is {max}", max = RegionId::BORDER - 1)]
    TooManyRegions,
}

impl CompactHeightfield {
    /// Partitions the walkable surface into regions by expanding watersheds
    /// outward from the maxima of the distance field.
    ///
    /// Connected areas smaller than `min_region_area` spans are removed.
    /// Regions smaller than `merge_region_area` spans are merged into the
    /// neighbor they share the longest border with.
    ///
    /// The distance field must be built with
    /// [`CompactHeightfield::build_distance_field`] first. The results land in
    /// [`CompactSpan::region`](crate::CompactSpan) and
    /// [`CompactHeightfield::max_region`].
    pub fn build_regions(
        &mut self,
        border_size: u16,
        min_region_area: u16,
        merge_region_area: u16,
    ) -> Result<(), RegionBuildError> {
        const LOG_NB_STACKS: usize = 3;
        const NB_STACKS: usize = 1 << LOG_NB_STACKS;
        let mut level_stacks: [Vec<LevelStackEntry>; NB_STACKS] = [const { Vec::new() }; NB_STACKS];
        for stack in &mut level_stacks {
            stack.reserve(256);
        }
        let mut stack: Vec<LevelStackEntry> = Vec::with_capacity(256);

        let mut src_reg = vec![RegionId::NONE; self.spans.len()];
        let mut src_dist = vec![0_u16; self.spans.len()];

        let mut region_id = 1_u16;
        let mut level = (self.max_distance + 1) & !1;

        // How much the watershed "overflows" and simplifies the regions.
        let expand_iters = 8;

        if border_size > 0 {
            // Make sure border will not overflow.
            let border_width = (border_size as u32).min(self.width);
            let border_height = (border_size as u32).min(self.height);

            // Paint border regions.
            self.paint_rect_region(
                0,
                border_width,
                0,
                self.height,
                RegionId(region_id | RegionId::BORDER),
                &mut src_reg,
            );
            region_id += 1;
            self.paint_rect_region(
                self.width - border_width,
                self.width,
                0,
                self.height,
                RegionId(region_id | RegionId::BORDER),
                &mut src_reg,
            );
            region_id += 1;
            self.paint_rect_region(
                0,
                self.width,
                0,
                border_height,
                RegionId(region_id | RegionId::BORDER),
                &mut src_reg,
            );
            region_id += 1;
            self.paint_rect_region(
                0,
                self.width,
                self.height - border_height,
                self.height,
                RegionId(region_id | RegionId::BORDER),
                &mut src_reg,
            );
            region_id += 1;
        }
        self.border_size = border_size;

        let mut s_id = -1_i32;
        while level > 0 {
            level = level.saturating_sub(2);
            s_id = (s_id + 1) & (NB_STACKS as i32 - 1);

            if s_id == 0 {
                self.sort_cells_by_level(level, &src_reg, &mut level_stacks, 1);
            } else {
                // Copy left overs from the last level.
                let (src, dst) = level_stacks.split_at_mut(s_id as usize);
                append_stacks(&src[s_id as usize - 1], &mut dst[0], &src_reg);
            }

            // Expand current regions until no empty connected cells are found.
            self.expand_regions(
                expand_iters,
                level,
                &mut src_reg,
                &mut src_dist,
                &mut level_stacks[s_id as usize],
                false,
            );

            // Mark new regions with ids.
            for entry_index in 0..level_stacks[s_id as usize].len() {
                let entry = level_stacks[s_id as usize][entry_index].clone();
                let Some(i) = entry.index else {
                    continue;
                };
                if src_reg[i] != RegionId::NONE {
                    continue;
                }
                if self.flood_region(
                    entry.x,
                    entry.z,
                    i,
                    level,
                    RegionId(region_id),
                    &mut src_reg,
                    &mut src_dist,
                    &mut stack,
                ) {
                    if region_id >= RegionId::BORDER - 1 {
                        return Err(RegionBuildError::TooManyRegions);
                    }
                    region_id += 1;
                }
            }
        }

        // Expand current regions until no empty connected cells are found.
        self.expand_regions(
            expand_iters * 8,
            0,
            &mut src_reg,
            &mut src_dist,
            &mut stack,
            true,
        );

        // Merge regions and filter out small regions.
        self.max_region = self.merge_and_filter_regions(
            min_region_area,
            merge_region_area,
            region_id,
            &mut src_reg,
        );

        // Write the result out.
        for (span, region) in self.spans.iter_mut().zip(src_reg) {
            span.region = region;
        }
        Ok(())
    }

    fn paint_rect_region(
        &mut self,
        min_x: u32,
        max_x: u32,
        min_z: u32,
        max_z: u32,
        region: RegionId,
        src_reg: &mut [RegionId],
    ) {
        for z in min_z..max_z {
            for x in min_x..max_x {
                let cell = *self.cell_at(x, z);
                for i in cell.span_range() {
                    if self.areas[i].is_walkable() {
                        src_reg[i] = region;
                    }
                }
            }
        }
    }

    fn sort_cells_by_level(
        &self,
        start_level: u16,
        src_reg: &[RegionId],
        stacks: &mut [Vec<LevelStackEntry>],
        log_levels_per_stack: u16,
    ) {
        let start_level = start_level >> log_levels_per_stack;
        for stack in stacks.iter_mut() {
            stack.clear();
        }

        // Put all cells in the level range into the appropriate stacks.
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = *self.cell_at(x, z);
                for i in cell.span_range() {
                    if !self.areas[i].is_walkable() || src_reg[i] != RegionId::NONE {
                        continue;
                    }
                    let level = self.dist[i] >> log_levels_per_stack;
                    let s_id = start_level.saturating_sub(level);
                    if s_id >= stacks.len() as u16 {
                        continue;
                    }
                    stacks[s_id as usize].push(LevelStackEntry {
                        x,
                        z,
                        index: Some(i),
                    });
                }
            }
        }
    }

    fn expand_regions(
        &self,
        max_iter: u16,
        level: u16,
        src_reg: &mut [RegionId],
        src_dist: &mut [u16],
        stack: &mut Vec<LevelStackEntry>,
        fill_stack: bool,
    ) {
        if fill_stack {
            // Find cells revealed by the raised level.
            stack.clear();
            for z in 0..self.height {
                for x in 0..self.width {
                    let cell = *self.cell_at(x, z);
                    for i in cell.span_range() {
                        if self.dist[i] >= level
                            && src_reg[i] == RegionId::NONE
                            && self.areas[i].is_walkable()
                        {
                            stack.push(LevelStackEntry {
                                x,
                                z,
                                index: Some(i),
                            });
                        }
                    }
                }
            }
        } else {
            // Use cells in the input stack, marking all cells which already
            // have a region.
            for entry in stack.iter_mut() {
                let Some(i) = entry.index else {
                    continue;
                };
                if src_reg[i] != RegionId::NONE {
                    entry.index = None;
                }
            }
        }

        let mut dirty_entries = Vec::new();
        let mut iter = 0;
        while !stack.is_empty() {
            let mut failed = 0;
            dirty_entries.clear();

            for entry in stack.iter_mut() {
                let x = entry.x;
                let z = entry.z;
                let Some(i) = entry.index else {
                    failed += 1;
                    continue;
                };

                let mut region = src_reg[i];
                let mut distance = u16::MAX;
                let area = self.areas[i];
                let span = &self.spans[i];
                for dir in 0..4 {
                    let Some(neighbor_index) = self.con_index(x, z, span, dir) else {
                        continue;
                    };
                    if self.areas[neighbor_index] != area {
                        continue;
                    }
                    let neighbor_region = src_reg[neighbor_index];
                    let neighbor_distance = src_dist[neighbor_index].saturating_add(2);
                    if neighbor_region != RegionId::NONE
                        && !neighbor_region.is_border()
                        && neighbor_distance < distance
                    {
                        region = neighbor_region;
                        distance = neighbor_distance;
                    }
                }
                if region != RegionId::NONE {
                    // Mark as used
                    entry.index = None;
                    dirty_entries.push(DirtyEntry {
                        index: i,
                        region,
                        distance2: distance,
                    });
                } else {
                    failed += 1;
                }
            }
            // Copy entries that differ between src and dst to keep them in sync.
            for dirty_entry in dirty_entries.iter() {
                src_reg[dirty_entry.index] = dirty_entry.region;
                src_dist[dirty_entry.index] = dirty_entry.distance2;
            }

            if failed == stack.len() {
                break;
            }

            if level > 0 {
                iter += 1;
                if iter >= max_iter {
                    break;
                }
            }
        }
    }

    #[expect(
        clippy::too_many_arguments,
        reason = "internal helper mirroring the stage's data flow"
    )]
    fn flood_region(
        &self,
        x: u32,
        z: u32,
        span_index: usize,
        level: u16,
        region: RegionId,
        src_reg: &mut [RegionId],
        src_dist: &mut [u16],
        stack: &mut Vec<LevelStackEntry>,
    ) -> bool {
        let area = self.areas[span_index];

        // Flood fill mark region.
        stack.clear();
        stack.push(LevelStackEntry {
            x,
            z,
            index: Some(span_index),
        });
        src_reg[span_index] = region;
        src_dist[span_index] = 0;

        let lev = level.saturating_sub(2);
        let mut count = 0;

        while let Some(back) = stack.pop() {
            let cx = back.x;
            let cz = back.z;
            let Some(ci) = back.index else {
                continue;
            };
            let span = self.spans[ci].clone();

            // Check if any of the neighbors already have a valid region set.
            let mut adjacent_region = RegionId::NONE;
            for dir in 0..4_u8 {
                // 8 connected
                if let Some(neighbor_index) = self.con_index(cx, cz, &span, dir) {
                    if self.areas[neighbor_index] != area {
                        continue;
                    }
                    let neighbor_region = src_reg[neighbor_index];
                    if neighbor_region.is_border() {
                        // Do not take borders into account.
                        continue;
                    }
                    if neighbor_region != RegionId::NONE && neighbor_region != region {
                        adjacent_region = neighbor_region;
                        break;
                    }

                    let neighbor = self.spans[neighbor_index].clone();
                    let dir2 = (dir + 1) & 3;
                    let nx = (cx as i64 + dir_offset_x(dir) as i64) as u32;
                    let nz = (cz as i64 + dir_offset_z(dir) as i64) as u32;
                    if let Some(diagonal_index) = self.con_index(nx, nz, &neighbor, dir2) {
                        if self.areas[diagonal_index] != area {
                            continue;
                        }
                        let diagonal_region = src_reg[diagonal_index];
                        if diagonal_region != RegionId::NONE
                            && !diagonal_region.is_border()
                            && diagonal_region != region
                        {
                            adjacent_region = diagonal_region;
                            break;
                        }
                    }
                }
            }
            if adjacent_region != RegionId::NONE {
                src_reg[ci] = RegionId::NONE;
                continue;
            }

            count += 1;

            // Expand neighbors.
            for dir in 0..4_u8 {
                if let Some(neighbor_index) = self.con_index(cx, cz, &span, dir)
                    && self.areas[neighbor_index] == area
                    && self.dist[neighbor_index] >= lev
                    && src_reg[neighbor_index] == RegionId::NONE
                {
                    src_reg[neighbor_index] = region;
                    src_dist[neighbor_index] = 0;
                    stack.push(LevelStackEntry {
                        x: (cx as i64 + dir_offset_x(dir) as i64) as u32,
                        z: (cz as i64 + dir_offset_z(dir) as i64) as u32,
                        index: Some(neighbor_index),
                    });
                }
            }
        }

        count > 0
    }

    /// Whether the edge of span `i` in direction `dir` borders another region.
    fn is_solid_edge(&self, src_reg: &[RegionId], x: u32, z: u32, i: usize, dir: u8) -> bool {
        let region = self
            .con_index(x, z, &self.spans[i], dir)
            .map(|neighbor_index| src_reg[neighbor_index])
            .unwrap_or(RegionId::NONE);
        region != src_reg[i]
    }

    /// Walks the contour of the region containing span `i`, collecting the
    /// region ids bordering it, one entry per contiguous stretch.
    fn walk_contour_neighbors(
        &self,
        mut x: u32,
        mut z: u32,
        mut i: usize,
        mut dir: u8,
        src_reg: &[RegionId],
        contour: &mut Vec<RegionId>,
    ) {
        let start_dir = dir;
        let start_i = i;

        let span = &self.spans[i];
        let mut current_region = self
            .con_index(x, z, span, dir)
            .map(|neighbor_index| src_reg[neighbor_index])
            .unwrap_or(RegionId::NONE);
        contour.push(current_region);

        const MAX_ITER: u32 = 40_000;
        for _ in 0..MAX_ITER {
            let span = self.spans[i].clone();

            if self.is_solid_edge(src_reg, x, z, i, dir) {
                let region = self
                    .con_index(x, z, &span, dir)
                    .map(|neighbor_index| src_reg[neighbor_index])
                    .unwrap_or(RegionId::NONE);
                if region != current_region {
                    current_region = region;
                    contour.push(region);
                }
                // Rotate clockwise.
                dir = (dir + 1) & 3;
            } else {
                let Some(neighbor_index) = self.con_index(x, z, &span, dir) else {
                    // Should not happen.
                    return;
                };
                x = (x as i64 + dir_offset_x(dir) as i64) as u32;
                z = (z as i64 + dir_offset_z(dir) as i64) as u32;
                i = neighbor_index;
                // Rotate counterclockwise.
                dir = (dir + 3) & 3;
            }

            if start_i == i && start_dir == dir {
                break;
            }
        }

        // Remove adjacent duplicates.
        if contour.len() > 1 {
            let mut j = 0;
            while j < contour.len() {
                let next = (j + 1) % contour.len();
                if contour[j] == contour[next] {
                    contour.remove(j);
                } else {
                    j += 1;
                }
            }
        }
    }

    fn merge_and_filter_regions(
        &mut self,
        min_region_area: u16,
        merge_region_area: u16,
        max_region_id: u16,
        src_reg: &mut [RegionId],
    ) -> RegionId {
        let region_count = max_region_id as usize;
        let mut regions: Vec<RegionData> = (0..region_count)
            .map(|id| RegionData::new(RegionId(id as u16)))
            .collect();

        // Find the edge of a region and find connections around its contour.
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = *self.cell_at(x, z);
                for i in cell.span_range() {
                    let region = src_reg[i];
                    if region == RegionId::NONE || region.0 as usize >= region_count {
                        continue;
                    }
                    regions[region.0 as usize].span_count += 1;

                    // Update floors: other regions stacked in the same column.
                    for j in cell.span_range() {
                        if i == j {
                            continue;
                        }
                        let floor_region = src_reg[j];
                        if floor_region == RegionId::NONE
                            || floor_region.0 as usize >= region_count
                        {
                            continue;
                        }
                        if floor_region == region {
                            regions[region.0 as usize].overlap = true;
                        }
                        add_unique(&mut regions[region.0 as usize].floors, floor_region);
                    }

                    // Contour already visited.
                    if !regions[region.0 as usize].connections.is_empty() {
                        continue;
                    }
                    regions[region.0 as usize].area = self.areas[i];

                    // Check if this cell is at the edge of the region.
                    let Some(edge_dir) =
                        (0..4).find(|dir| self.is_solid_edge(src_reg, x, z, i, *dir))
                    else {
                        continue;
                    };
                    let mut connections = Vec::new();
                    self.walk_contour_neighbors(x, z, i, edge_dir, src_reg, &mut connections);
                    regions[region.0 as usize].connections = connections;
                }
            }
        }

        // Remove too small regions.
        {
            let mut stack = Vec::with_capacity(32);
            let mut trace = Vec::with_capacity(32);
            for i in 0..region_count {
                if regions[i].id == RegionId::NONE
                    || regions[i].id.is_border()
                    || regions[i].span_count == 0
                    || regions[i].visited
                {
                    continue;
                }

                // Count the total size of all connected regions, keeping track
                // of whether any of them borders a heightfield edge.
                let mut connects_to_border = false;
                let mut span_count = 0_u32;
                stack.clear();
                trace.clear();
                regions[i].visited = true;
                stack.push(i);

                while let Some(ri) = stack.pop() {
                    span_count += regions[ri].span_count;
                    trace.push(ri);

                    for j in 0..regions[ri].connections.len() {
                        let connection = regions[ri].connections[j];
                        if connection.is_border() {
                            connects_to_border = true;
                            continue;
                        }
                        let neighbor = &mut regions[connection.0 as usize];
                        if neighbor.visited
                            || neighbor.id == RegionId::NONE
                            || neighbor.id.is_border()
                        {
                            continue;
                        }
                        neighbor.visited = true;
                        stack.push(neighbor.id.0 as usize);
                    }
                }

                // If the accumulated region size is too small, remove it. Do
                // not remove areas which connect to tile borders as their size
                // cannot be estimated correctly.
                if span_count < min_region_area as u32 && !connects_to_border {
                    for &ri in &trace {
                        regions[ri].span_count = 0;
                        regions[ri].id = RegionId::NONE;
                    }
                }
            }
        }

        // Length of the shared border between two regions, in edge steps.
        // Used to pick the merge target for undersized regions.
        let mut border_lengths: HashMap<(u16, u16), u32> = HashMap::new();
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = *self.cell_at(x, z);
                for i in cell.span_range() {
                    let region = src_reg[i];
                    if region == RegionId::NONE || region.is_border() {
                        continue;
                    }
                    let span = self.spans[i].clone();
                    for dir in 0..4 {
                        let Some(neighbor_index) = self.con_index(x, z, &span, dir) else {
                            continue;
                        };
                        let neighbor_region = src_reg[neighbor_index];
                        if neighbor_region == RegionId::NONE
                            || neighbor_region.is_border()
                            || neighbor_region == region
                        {
                            continue;
                        }
                        *border_lengths
                            .entry((region.0, neighbor_region.0))
                            .or_default() += 1;
                    }
                }
            }
        }

        // Merge too small regions into the neighbor they share the longest
        // border with.
        loop {
            let mut merge_count = 0;
            for i in 0..region_count {
                let region = regions[i].clone();
                if region.id == RegionId::NONE || region.id.is_border() || region.span_count == 0 {
                    continue;
                }
                if region.overlap {
                    continue;
                }
                // Check if the region should be merged. A connection to the
                // null region means the region touches the walkable surface
                // edge, so its size cannot be estimated correctly.
                if region.span_count > merge_region_area as u32
                    && region
                        .connections
                        .iter()
                        .any(|connection| *connection == RegionId::NONE)
                {
                    continue;
                }

                // Small region with no border connection: merge it into the
                // neighbor region with the longest shared border.
                let mut longest_border = 0_u32;
                let mut merge_id = region.id;
                for &connection in &region.connections {
                    if connection.is_border() || connection == RegionId::NONE {
                        continue;
                    }
                    let candidate = &regions[connection.0 as usize];
                    if candidate.id == RegionId::NONE
                        || candidate.id.is_border()
                        || candidate.overlap
                    {
                        continue;
                    }
                    let border_length = border_lengths
                        .get(&(region.id.0, candidate.id.0))
                        .copied()
                        .unwrap_or(0);
                    if border_length > longest_border
                        && can_merge_regions(&region, candidate)
                        && can_merge_regions(candidate, &region)
                    {
                        longest_border = border_length;
                        merge_id = candidate.id;
                    }
                }
                // Found a region to merge with.
                if merge_id != region.id {
                    let old_id = region.id;
                    let (merged, removed) = take_two(&mut regions, merge_id.0 as usize, i);
                    if merge_region_data(merged, removed) {
                        // Fix up regions pointing to the current region.
                        for other in regions.iter_mut() {
                            if other.id == RegionId::NONE || other.id.is_border() {
                                continue;
                            }
                            // If another region was already merged into the
                            // current region, change the id to the new one.
                            if other.id == old_id {
                                other.id = merge_id;
                            }
                            replace_neighbor(other, old_id, merge_id);
                        }
                        // Fold the removed region's border lengths into the target.
                        let folded: Vec<((u16, u16), u32)> = border_lengths
                            .iter()
                            .filter(|((a, b), _)| *a == old_id.0 || *b == old_id.0)
                            .map(|(k, v)| (*k, *v))
                            .collect();
                        for ((a, b), length) in folded {
                            border_lengths.remove(&(a, b));
                            let a = if a == old_id.0 { merge_id.0 } else { a };
                            let b = if b == old_id.0 { merge_id.0 } else { b };
                            if a != b {
                                *border_lengths.entry((a, b)).or_default() += length;
                            }
                        }
                        merge_count += 1;
                    }
                }
            }
            if merge_count == 0 {
                break;
            }
        }

        // Compress region ids.
        for region in regions.iter_mut() {
            region.remap =
                !(region.id == RegionId::NONE || region.id.is_border());
        }
        let mut new_id = 0_u16;
        for i in 0..region_count {
            if !regions[i].remap {
                continue;
            }
            new_id += 1;
            let old_id = regions[i].id;
            for region in regions.iter_mut() {
                if region.id == old_id {
                    region.id = RegionId(new_id);
                    region.remap = false;
                }
            }
        }

        // Remap regions.
        for region in src_reg.iter_mut() {
            if !region.is_border() {
                *region = regions[region.0 as usize].id;
            }
        }

        RegionId(new_id)
    }
}

fn add_unique(list: &mut Vec<RegionId>, value: RegionId) {
    if !list.contains(&value) {
        list.push(value);
    }
}

/// Disjoint mutable borrows of two region entries.
fn take_two(regions: &mut [RegionData], a: usize, b: usize) -> (&mut RegionData, &mut RegionData) {
    debug_assert_ne!(a, b);
    if a < b {
        let (left, right) = regions.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = regions.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}

fn can_merge_regions(region: &RegionData, other: &RegionData) -> bool {
    if region.area != other.area {
        return false;
    }
    // A neighbor appearing more than once would result in a non-simple contour.
    let shared_stretches = region
        .connections
        .iter()
        .filter(|connection| **connection == other.id)
        .count();
    if shared_stretches > 1 {
        return false;
    }
    // Regions stacked on top of each other cannot merge.
    if region.floors.contains(&other.id) {
        return false;
    }
    true
}

fn merge_region_data(target: &mut RegionData, source: &mut RegionData) -> bool {
    let target_id = target.id;
    let source_id = source.id;

    // Duplicate current neighborhood.
    let target_connections = target.connections.clone();
    let source_connections = source.connections.clone();

    // Find insertion point on the target.
    let Some(insert_target) = target_connections
        .iter()
        .position(|connection| *connection == source_id)
    else {
        return false;
    };
    // Find insertion point on the source.
    let Some(insert_source) = source_connections
        .iter()
        .position(|connection| *connection == target_id)
    else {
        return false;
    };

    // Merge neighbors.
    target.connections.clear();
    let n = target_connections.len();
    for i in 0..n - 1 {
        target
            .connections
            .push(target_connections[(insert_target + 1 + i) % n]);
    }
    let n = source_connections.len();
    for i in 0..n - 1 {
        target
            .connections
            .push(source_connections[(insert_source + 1 + i) % n]);
    }
    remove_adjacent_duplicates(&mut target.connections);

    for &floor in &source.floors {
        add_unique(&mut target.floors, floor);
    }
    target.span_count += source.span_count;
    source.span_count = 0;
    source.connections.clear();
    source.id = target_id;
    true
}

fn remove_adjacent_duplicates(connections: &mut Vec<RegionId>) {
    let mut i = 0;
    while connections.len() > 1 && i < connections.len() {
        let next = (i + 1) % connections.len();
        if connections[i] == connections[next] {
            connections.remove(next);
        } else {
            i += 1;
        }
    }
}

fn replace_neighbor(region: &mut RegionData, old_id: RegionId, new_id: RegionId) {
    let mut changed = false;
    for connection in region.connections.iter_mut() {
        if *connection == old_id {
            *connection = new_id;
            changed = true;
        }
    }
    for floor in region.floors.iter_mut() {
        if *floor == old_id {
            *floor = new_id;
        }
    }
    if changed {
        remove_adjacent_duplicates(&mut region.connections);
    }
}

#[derive(Clone, Debug)]
struct RegionData {
    span_count: u32,
    id: RegionId,
    area: AreaType,
    remap: bool,
    visited: bool,
    overlap: bool,
    /// Neighbor region ids along the contour, one per contiguous stretch.
    connections: Vec<RegionId>,
    /// Region ids stacked in the same columns as this region.
    floors: Vec<RegionId>,
}

impl RegionData {
    fn new(id: RegionId) -> Self {
        Self {
            span_count: 0,
            id,
            area: AreaType::NOT_WALKABLE,
            remap: false,
            visited: false,
            overlap: false,
            connections: Vec::new(),
            floors: Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
struct LevelStackEntry {
    x: u32,
    z: u32,
    index: Option<usize>,
}

#[derive(Clone, Debug)]
struct DirtyEntry {
    index: usize,
    region: RegionId,
    distance2: u16,
}

fn append_stacks(
    src_stack: &[LevelStackEntry],
    dst_stack: &mut Vec<LevelStackEntry>,
    src_region: &[RegionId],
) {
    for entry in src_stack.iter() {
        let Some(i) = entry.index else {
            continue;
        };
        if src_region[i] != RegionId::NONE {
            continue;
        }
        dst_stack.push(entry.clone());
    }
}

#[cfg(test)]
mod tests {
    use glam::{UVec3, Vec3A};

    use crate::{geometry::TriMesh, heightfield::HeightfieldBuilder, math::Aabb3d};

    use super::*;

    fn partitioned_plane(size: f32) -> CompactHeightfield {
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
            cell_size: 0.5,
            cell_height: 0.2,
        }
        .build()
        .unwrap();
        mesh.rasterize_triangles(&mut heightfield, 1).unwrap();
        let mut compact = heightfield.into_compact(2, 1).unwrap();
        compact.build_distance_field();
        compact.build_regions(0, 8, 20).unwrap();
        compact
    }

    #[test]
    fn flat_plane_is_a_single_region() {
        let compact = partitioned_plane(10.0);
        assert_eq!(compact.max_region, RegionId(1));
        assert!(
            compact
                .spans
                .iter()
                .all(|span| span.region == RegionId(1))
        );
    }

    #[test]
    fn unwalkable_field_has_no_regions() {
        let mesh = TriMesh::new(
            vec![
                Vec3A::new(0.0, 0.1, 0.0),
                Vec3A::new(4.0, 0.1, 0.0),
                Vec3A::new(4.0, 0.1, 4.0),
                Vec3A::new(0.0, 0.1, 4.0),
            ],
            vec![UVec3::new(0, 2, 1), UVec3::new(0, 3, 2)],
        );
        // Triangles were never marked walkable.
        let mut heightfield = HeightfieldBuilder {
            aabb: Aabb3d::from_min_max(Vec3A::ZERO, Vec3A::new(4.0, 2.0, 4.0)),
            cell_size: 1.0,
            cell_height: 0.2,
        }
        .build()
        .unwrap();
        mesh.rasterize_triangles(&mut heightfield, 1).unwrap();
        let mut compact = heightfield.into_compact(2, 1).unwrap();
        compact.build_distance_field();
        compact.build_regions(0, 8, 20).unwrap();
        assert_eq!(compact.max_region, RegionId::NONE);
    }
}
