//! Traces region boundaries into simplified polylines.

use glam::U16Vec3;
use tracing::warn;

use crate::{
    CompactHeightfield,
    math::{Aabb3d, dir_offset_x, dir_offset_z},
    region::RegionId,
    span::AreaType,
};

bitflags::bitflags! {
    /// Region id and edge flags carried by a contour vertex.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    pub struct RegionVertexId: u32 {
        /// No region, no flags.
        const NONE = 0;

        /// Applied to the region id field of contour vertices in order to extract the region id.
        /// The region id field of a vertex may have several flags applied to it, so the
        /// field's value can't be used directly.
        const REGION_MASK = 0xffff;

        /// Border vertex flag.
        /// If a contour vertex's region ID has this bit set, the vertex will later
        /// be removed in order to match the segments and vertices at tile boundaries.
        /// (Used during the build process.)
        const BORDER_VERTEX = 0x10_000;

        /// Area border flag.
        /// If a region ID has this bit set, then the associated element lies on
        /// the border of an area.
        /// (Used during the region and contour build process.)
        const AREA_BORDER = 0x20_000;
    }
}

impl From<u32> for RegionVertexId {
    fn from(bits: u32) -> Self {
        RegionVertexId::from_bits_retain(bits)
    }
}

impl From<RegionId> for RegionVertexId {
    fn from(region_id: RegionId) -> Self {
        RegionVertexId::from_bits_retain(region_id.0 as u32)
    }
}

impl From<RegionVertexId> for RegionId {
    fn from(region_vertex_id: RegionVertexId) -> Self {
        let bits = region_vertex_id.bits() & RegionVertexId::REGION_MASK.bits();
        RegionId(bits as u16)
    }
}

bitflags::bitflags! {
    /// Contour build flags used in [`CompactHeightfield::build_contours`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    #[repr(transparent)]
    pub struct BuildContoursFlags: u8 {
        /// Tessellate solid (impassable) edges during contour simplification.
        const TESSELLATE_SOLID_WALL_EDGES = 1;
        /// Tessellate edges between areas during contour simplification.
        const TESSELLATE_AREA_EDGES = 2;

        /// Default flags for building contours.
        const DEFAULT = Self::TESSELLATE_SOLID_WALL_EDGES.bits();
    }
}

impl Default for BuildContoursFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// A contour vertex in field space with its region and edge flags.
pub type ContourVertex = (U16Vec3, RegionVertexId);

/// Represents a simple, non-overlapping contour in field space.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Contour {
    /// Simplified contour vertex and connection data.
    pub vertices: Vec<ContourVertex>,
    /// Raw contour vertex and connection data.
    pub raw_vertices: Vec<ContourVertex>,
    /// Region ID of the contour.
    pub region: RegionId,
    /// Area type of the contour.
    pub area: AreaType,
}

/// Represents a group of related contours.
#[derive(Debug, Clone, PartialEq)]
pub struct ContourSet {
    /// An array of the contours in the set.
    pub contours: Vec<Contour>,
    /// The AABB in world space
    pub aabb: Aabb3d,
    /// The size of each cell. (On the xz-plane.)
    pub cell_size: f32,
    /// The height of each cell. (The minimum increment along the y-axis.)
    pub cell_height: f32,
    /// The width of the set. (Along the x-axis in cell units.)
    pub width: u32,
    /// The height of the set. (Along the z-axis in cell units.)
    pub height: u32,
    /// The AABB border size used to generate the source data from which the contours were derived.
    pub border_size: u16,
    /// The max edge error that this contour set was simplified with.
    pub max_error: f32,
}

impl CompactHeightfield {
    /// Traces the region outlines into simplified contours.
    ///
    /// The raw contours match the region outlines exactly. The `max_error` and
    /// `max_edge_len` parameters control how closely the simplified contours
    /// match the raw contours.
    ///
    /// Simplified contours are generated such that the vertices for portals
    /// between regions match up. (They are considered mandatory vertices.)
    ///
    /// Setting `max_edge_len` to zero disables the edge length feature.
    ///
    /// Output ordering is deterministic: contours appear in the scan order of
    /// their first boundary span.
    pub fn build_contours(
        &self,
        max_error: f32,
        max_edge_len: u16,
        build_flags: BuildContoursFlags,
    ) -> ContourSet {
        let mut cset = ContourSet {
            contours: Vec::new(),
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            width: self.width - self.border_size as u32 * 2,
            height: self.height - self.border_size as u32 * 2,
            border_size: self.border_size,
            max_error,
        };
        if self.border_size > 0 {
            // If the heightfield was built with a border, remove the offset.
            let pad = self.border_size as f32 * self.cell_size;
            cset.aabb.min.x += pad;
            cset.aabb.min.z += pad;
            cset.aabb.max.x -= pad;
            cset.aabb.max.z -= pad;
        }

        let mut flags = vec![0_u8; self.spans.len()];

        // Mark boundaries.
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = *self.cell_at(x, z);
                for i in cell.span_range() {
                    let span = &self.spans[i];
                    if span.region == RegionId::NONE || span.region.is_border() {
                        flags[i] = 0;
                        continue;
                    }
                    let mut res = 0_u8;
                    for dir in 0..4 {
                        let region = self
                            .con_index(x, z, span, dir)
                            .map(|neighbor_index| self.spans[neighbor_index].region)
                            .unwrap_or(RegionId::NONE);
                        if region == span.region {
                            res |= 1 << dir;
                        }
                    }
                    // Inverse, mark non connected edges.
                    flags[i] = res ^ 0xf;
                }
            }
        }

        let mut verts = Vec::with_capacity(256);
        let mut simplified = Vec::with_capacity(64);

        for z in 0..self.height {
            for x in 0..self.width {
                let cell = *self.cell_at(x, z);
                for i in cell.span_range() {
                    if flags[i] == 0 || flags[i] == 0xf {
                        flags[i] = 0;
                        continue;
                    }
                    let region = self.spans[i].region;
                    if region == RegionId::NONE || region.is_border() {
                        continue;
                    }
                    let area = self.areas[i];

                    verts.clear();
                    simplified.clear();

                    self.walk_contour_build(x, z, i, &mut flags, &mut verts);

                    simplify_contour(&verts, &mut simplified, max_error, max_edge_len, build_flags);
                    remove_degenerate_segments(&mut simplified);

                    // Store region -> contour remap info.
                    if simplified.len() >= 3 {
                        let offset = |mut point: U16Vec3| {
                            point.x -= self.border_size;
                            point.z -= self.border_size;
                            point
                        };
                        cset.contours.push(Contour {
                            vertices: simplified
                                .iter()
                                .map(|(point, raw_index)| {
                                    // The edge vertex flag is taken from the current
                                    // raw point, the neighbor region from the next.
                                    let next = (*raw_index + 1) % verts.len();
                                    let data = (verts[next].1
                                        & (RegionVertexId::REGION_MASK
                                            | RegionVertexId::AREA_BORDER))
                                        | (verts[*raw_index].1 & RegionVertexId::BORDER_VERTEX);
                                    (offset(*point), data)
                                })
                                .collect(),
                            raw_vertices: verts
                                .iter()
                                .map(|(point, data)| (offset(*point), *data))
                                .collect(),
                            region,
                            area,
                        });
                    }
                }
            }
        }

        merge_region_holes(&mut cset, self.max_region);

        cset
    }

    fn walk_contour_build(
        &self,
        mut x: u32,
        mut z: u32,
        mut i: usize,
        flags: &mut [u8],
        points: &mut Vec<ContourVertex>,
    ) {
        // Choose the first non-connected edge.
        let mut dir = 0_u8;
        while flags[i] & (1 << dir) == 0 {
            dir += 1;
        }

        let start_dir = dir;
        let start_i = i;
        let area = self.areas[i];

        for _ in 0..40_000 {
            if flags[i] & (1 << dir) != 0 {
                // Choose the edge corner.
                let mut is_area_border = false;
                let mut p_x = x as u16;
                let (p_y, is_border_vertex) = self.get_corner_height(x, z, i, dir);
                let mut p_z = z as u16;
                match dir {
                    0 => {
                        p_z += 1;
                    }
                    1 => {
                        p_x += 1;
                        p_z += 1;
                    }
                    2 => {
                        p_x += 1;
                    }
                    _ => {}
                }
                let mut data = RegionVertexId::NONE;
                let span = &self.spans[i];
                if let Some(neighbor_index) = self.con_index(x, z, span, dir) {
                    data = RegionVertexId::from(self.spans[neighbor_index].region);
                    if area != self.areas[neighbor_index] {
                        is_area_border = true;
                    }
                }
                if is_border_vertex {
                    data |= RegionVertexId::BORDER_VERTEX;
                }
                if is_area_border {
                    data |= RegionVertexId::AREA_BORDER;
                }
                points.push((U16Vec3::new(p_x, p_y, p_z), data));

                flags[i] &= !(1 << dir);
                // Rotate clockwise.
                dir = (dir + 1) & 3;
            } else {
                let span = &self.spans[i];
                let Some(neighbor_index) = self.con_index(x, z, span, dir) else {
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
    }

    /// Height of the corner of span `i` in direction `dir`, taking the
    /// maximum over the spans meeting at the corner.
    fn get_corner_height(&self, x: u32, z: u32, i: usize, dir: u8) -> (u16, bool) {
        let span = &self.spans[i];
        let mut corner_height = span.y;
        let dir_p = (dir + 1) & 3;

        let mut regs = [RegionVertexId::NONE; 4];

        // Combine region and area codes in order to prevent
        // border vertices which are in between two areas from being removed.
        let get_reg = |i: usize| {
            RegionVertexId::from(
                self.spans[i].region.0 as u32 | ((self.areas[i].0 as u32) << 16),
            )
        };
        regs[0] = get_reg(i);

        if let Some(neighbor_index) = self.con_index(x, z, span, dir) {
            let neighbor = &self.spans[neighbor_index];
            corner_height = corner_height.max(neighbor.y);
            regs[1] = get_reg(neighbor_index);
            let n_x = (x as i64 + dir_offset_x(dir) as i64) as u32;
            let n_z = (z as i64 + dir_offset_z(dir) as i64) as u32;
            if let Some(diagonal_index) = self.con_index(n_x, n_z, neighbor, dir_p) {
                let diagonal = &self.spans[diagonal_index];
                corner_height = corner_height.max(diagonal.y);
                regs[2] = get_reg(diagonal_index);
            }
        }
        if let Some(neighbor_index) = self.con_index(x, z, span, dir_p) {
            let neighbor = &self.spans[neighbor_index];
            corner_height = corner_height.max(neighbor.y);
            regs[3] = get_reg(neighbor_index);
            let n_x = (x as i64 + dir_offset_x(dir_p) as i64) as u32;
            let n_z = (z as i64 + dir_offset_z(dir_p) as i64) as u32;
            if let Some(diagonal_index) = self.con_index(n_x, n_z, neighbor, dir) {
                let diagonal = &self.spans[diagonal_index];
                corner_height = corner_height.max(diagonal.y);
                regs[2] = get_reg(diagonal_index);
            }
        }

        // Check if the vertex is a special edge vertex; these vertices will be
        // removed later.
        let border_bit = RegionVertexId::from(RegionId::BORDER as u32);
        let mut is_border_vertex = false;
        for dir in 0..4 {
            let a = dir;
            let b = (dir + 1) & 3;
            let c = (dir + 2) & 3;
            let d = (dir + 3) & 3;

            // The vertex is a border vertex if there are two same exterior cells
            // in a row, followed by two interior cells, and none of the regions
            // are out of bounds.
            let two_same_exts = regs[a] == regs[b] && regs[a].intersects(border_bit);
            let two_ints = !(regs[c] | regs[d]).intersects(border_bit);
            let ints_same_area = (regs[c].bits() >> 16) == (regs[d].bits() >> 16);
            let no_zeros = regs[a] != RegionVertexId::NONE
                && regs[b] != RegionVertexId::NONE
                && regs[c] != RegionVertexId::NONE
                && regs[d] != RegionVertexId::NONE;
            if two_same_exts && two_ints && ints_same_area && no_zeros {
                is_border_vertex = true;
                break;
            }
        }
        (corner_height, is_border_vertex)
    }
}

fn simplify_contour(
    points: &[ContourVertex],
    simplified: &mut Vec<(U16Vec3, usize)>,
    max_error: f32,
    max_edge_len: u16,
    build_flags: BuildContoursFlags,
) {
    if points.is_empty() {
        return;
    }
    // Add initial points.
    let has_connections = points
        .iter()
        .any(|(_point, data)| data.intersects(RegionVertexId::REGION_MASK));

    if has_connections {
        // The contour has some portals to other regions.
        // Add a new point to every location where the region changes.
        let point_count = points.len();
        for (i, (point, data)) in points.iter().enumerate() {
            let ii = (i + 1) % point_count;
            let next_data = points[ii].1;
            let different_regions = (*data & RegionVertexId::REGION_MASK)
                != (next_data & RegionVertexId::REGION_MASK);
            let area_borders = data.contains(RegionVertexId::AREA_BORDER)
                != next_data.contains(RegionVertexId::AREA_BORDER);
            if different_regions || area_borders {
                simplified.push((*point, i));
            }
        }
    }

    if simplified.is_empty() {
        // If there are no connections at all, create some initial points for
        // the simplification process. Find lower-left and upper-right vertices
        // of the contour.
        let mut lower_left = points[0].0;
        let mut lower_left_index = 0;
        let mut upper_right = points[0].0;
        let mut upper_right_index = 0;
        for (i, (point, _data)) in points.iter().enumerate() {
            if point.x < lower_left.x || (point.x == lower_left.x && point.z < lower_left.z) {
                lower_left = *point;
                lower_left_index = i;
            }
            if point.x > upper_right.x || (point.x == upper_right.x && point.z > upper_right.z) {
                upper_right = *point;
                upper_right_index = i;
            }
        }
        simplified.push((lower_left, lower_left_index));
        simplified.push((upper_right, upper_right_index));
    }

    // Add points until all raw points are within error tolerance
    // of the simplified shape.
    let point_count = points.len();
    let mut i = 0;
    while i < simplified.len() {
        let ii = (i + 1) % simplified.len();

        let (mut a, ai) = simplified[i];
        let (mut b, bi) = simplified[ii];

        // Find maximum deviation from the segment.
        let mut max_deviation = 0.0_f32;
        let mut max_index = None;
        let increment;
        let mut ci;
        let end;
        // Traverse the segment in lexilogical order so that
        // the max deviation is calculated similarly when traversing
        // opposite segments.
        if b.x > a.x || (b.x == a.x && b.z > a.z) {
            increment = 1;
            ci = (ai + increment) % point_count;
            end = bi;
        } else {
            increment = point_count - 1;
            ci = (bi + increment) % point_count;
            end = ai;
            std::mem::swap(&mut a, &mut b);
        }

        // Tessellate only outer edges or edges between areas.
        if !points[ci].1.intersects(RegionVertexId::REGION_MASK)
            || points[ci].1.contains(RegionVertexId::AREA_BORDER)
        {
            while ci != end {
                let deviation = distance_point_segment_sq(
                    points[ci].0.x as f32,
                    points[ci].0.z as f32,
                    a.x as f32,
                    a.z as f32,
                    b.x as f32,
                    b.z as f32,
                );
                if deviation > max_deviation {
                    max_deviation = deviation;
                    max_index = Some(ci);
                }
                ci = (ci + increment) % point_count;
            }
        }

        // If the max deviation is larger than accepted error,
        // add a new point, else continue to the next segment.
        if let Some(max_index) = max_index
            && max_deviation > max_error * max_error
        {
            simplified.insert(i + 1, (points[max_index].0, max_index));
        } else {
            i += 1;
        }
    }

    // Split too long edges.
    if max_edge_len > 0
        && build_flags.intersects(
            BuildContoursFlags::TESSELLATE_SOLID_WALL_EDGES
                | BuildContoursFlags::TESSELLATE_AREA_EDGES,
        )
    {
        let mut i = 0;
        while i < simplified.len() {
            let ii = (i + 1) % simplified.len();

            let (a, ai) = simplified[i];
            let (b, bi) = simplified[ii];

            // Tessellate only outer edges or edges between areas.
            let ci = (ai + 1) % point_count;
            let mut tessellate = false;
            // Wall edges.
            if build_flags.contains(BuildContoursFlags::TESSELLATE_SOLID_WALL_EDGES)
                && !points[ci].1.intersects(RegionVertexId::REGION_MASK)
            {
                tessellate = true;
            }
            // Edges between areas.
            if build_flags.contains(BuildContoursFlags::TESSELLATE_AREA_EDGES)
                && points[ci].1.contains(RegionVertexId::AREA_BORDER)
            {
                tessellate = true;
            }

            if tessellate {
                let dx = b.x as i32 - a.x as i32;
                let dz = b.z as i32 - a.z as i32;
                if dx * dx + dz * dz > (max_edge_len as i32).pow(2) {
                    // Round based on the segment's lexilogical order so that the
                    // max tessellation is consistent regardless of in which
                    // direction segments are traversed.
                    let n = if bi < ai {
                        bi + point_count - ai
                    } else {
                        bi - ai
                    };
                    if n > 1 {
                        let max_index = if b.x > a.x || (b.x == a.x && b.z > a.z) {
                            (ai + n / 2) % point_count
                        } else {
                            (ai + (n + 1) / 2) % point_count
                        };
                        simplified.insert(i + 1, (points[max_index].0, max_index));
                        continue;
                    }
                }
            }
            i += 1;
        }
    }
}

fn remove_degenerate_segments(simplified: &mut Vec<(U16Vec3, usize)>) {
    // Remove adjacent vertices which are equal on the xz-plane,
    // or else the triangulator will get confused.
    let mut i = 0;
    while i < simplified.len() {
        let next = (i + 1) % simplified.len();
        if vequal(simplified[i].0, simplified[next].0) {
            simplified.remove(next);
        } else {
            i += 1;
        }
    }
}

fn distance_point_segment_sq(x: f32, z: f32, px: f32, pz: f32, qx: f32, qz: f32) -> f32 {
    let pqx = qx - px;
    let pqz = qz - pz;
    let dx = x - px;
    let dz = z - pz;
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    let dx = px + t * pqx - x;
    let dz = pz + t * pqz - z;
    dx * dx + dz * dz
}

/// Signed area of the contour polygon on the xz-plane, doubled.
/// Negative for holes.
fn calc_area_of_polygon_2d(vertices: &[ContourVertex]) -> i32 {
    let mut area = 0_i32;
    let n = vertices.len();
    for i in 0..n {
        let vi = vertices[i].0;
        let vj = vertices[(i + 1) % n].0;
        area += vi.x as i32 * vj.z as i32 - vj.x as i32 * vi.z as i32;
    }
    (area + 1) / 2
}

fn prev(i: usize, n: usize) -> usize {
    (i + n - 1) % n
}

fn next(i: usize, n: usize) -> usize {
    (i + 1) % n
}

fn area2(a: U16Vec3, b: U16Vec3, c: U16Vec3) -> i32 {
    (b.x as i32 - a.x as i32) * (c.z as i32 - a.z as i32)
        - (c.x as i32 - a.x as i32) * (b.z as i32 - a.z as i32)
}

fn left(a: U16Vec3, b: U16Vec3, c: U16Vec3) -> bool {
    area2(a, b, c) < 0
}

fn left_on(a: U16Vec3, b: U16Vec3, c: U16Vec3) -> bool {
    area2(a, b, c) <= 0
}

fn collinear(a: U16Vec3, b: U16Vec3, c: U16Vec3) -> bool {
    area2(a, b, c) == 0
}

/// Exclusive or: true iff exactly one argument is true.
fn xorb(x: bool, y: bool) -> bool {
    x != y
}

/// True iff ab properly intersects cd: they share a point interior to both
/// segments. The properness of the intersection is ensured by using strict
/// leftness.
fn intersect_prop(a: U16Vec3, b: U16Vec3, c: U16Vec3, d: U16Vec3) -> bool {
    // Eliminate improper cases.
    if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
        return false;
    }
    xorb(left(a, b, c), left(a, b, d)) && xorb(left(c, d, a), left(c, d, b))
}

/// True iff (a, b, c) are collinear and point c lies on the closed segment ab.
fn between(a: U16Vec3, b: U16Vec3, c: U16Vec3) -> bool {
    if !collinear(a, b, c) {
        return false;
    }
    // If ab not vertical, check betweenness on x; else on z.
    if a.x != b.x {
        (a.x <= c.x && c.x <= b.x) || (a.x >= c.x && c.x >= b.x)
    } else {
        (a.z <= c.z && c.z <= b.z) || (a.z >= c.z && c.z >= b.z)
    }
}

/// True iff segments ab and cd intersect, properly or improperly.
fn intersect(a: U16Vec3, b: U16Vec3, c: U16Vec3, d: U16Vec3) -> bool {
    intersect_prop(a, b, c, d)
        || between(a, b, c)
        || between(a, b, d)
        || between(c, d, a)
        || between(c, d, b)
}

fn vequal(a: U16Vec3, b: U16Vec3) -> bool {
    a.x == b.x && a.z == b.z
}

fn intersect_seg_contour(
    d0: U16Vec3,
    d1: U16Vec3,
    skip_vertex: Option<usize>,
    vertices: &[ContourVertex],
) -> bool {
    // For each edge (k, k+1) of the contour.
    let n = vertices.len();
    for k in 0..n {
        let k1 = next(k, n);
        // Skip edges incident to the skipped vertex.
        if Some(k) == skip_vertex || Some(k1) == skip_vertex {
            continue;
        }
        let p0 = vertices[k].0;
        let p1 = vertices[k1].0;
        if vequal(d0, p0) || vequal(d1, p0) || vequal(d0, p1) || vequal(d1, p1) {
            continue;
        }
        if intersect(d0, d1, p0, p1) {
            return true;
        }
    }
    false
}

fn in_cone(i: usize, vertices: &[ContourVertex], point: U16Vec3) -> bool {
    let n = vertices.len();
    let pi = vertices[i].0;
    let pi1 = vertices[next(i, n)].0;
    let pin1 = vertices[prev(i, n)].0;

    // If P[i] is a convex vertex [i+1 left or on (i-1,i)].
    if left_on(pin1, pi, pi1) {
        return left(pi, point, pin1) && left(point, pi, pi1);
    }
    // Assume (i-1,i,i+1) not collinear. P[i] is reflex.
    !(left_on(pi, point, pi1) && left_on(point, pi, pin1))
}

struct ContourHole {
    contour: usize,
    min_x: u16,
    min_z: u16,
    leftmost: usize,
}

/// Finds the lowest leftmost vertex of a contour.
fn find_left_most_vertex(contour: &Contour) -> (u16, u16, usize) {
    let mut min_x = contour.vertices[0].0.x;
    let mut min_z = contour.vertices[0].0.z;
    let mut leftmost = 0;
    for (i, (point, _data)) in contour.vertices.iter().enumerate().skip(1) {
        if point.x < min_x || (point.x == min_x && point.z < min_z) {
            min_x = point.x;
            min_z = point.z;
            leftmost = i;
        }
    }
    (min_x, min_z, leftmost)
}

fn merge_contours(outline: &mut Contour, hole: &Contour, ia: usize, ib: usize) {
    let na = outline.vertices.len();
    let nb = hole.vertices.len();
    let mut merged = Vec::with_capacity(na + nb + 2);

    // Copy the outline, starting and ending at the merge point.
    for i in 0..=na {
        merged.push(outline.vertices[(ia + i) % na]);
    }
    // Copy the hole, starting and ending at the merge point.
    for i in 0..=nb {
        merged.push(hole.vertices[(ib + i) % nb]);
    }

    outline.vertices = merged;
}

/// Merges hole contours (negative winding) into the outline contour of their
/// region so that each region ends up as a single simple polygon.
fn merge_region_holes(cset: &mut ContourSet, max_region: RegionId) {
    if cset.contours.is_empty() {
        return;
    }
    let windings: Vec<i32> = cset
        .contours
        .iter()
        .map(|contour| {
            if calc_area_of_polygon_2d(&contour.vertices) < 0 {
                -1
            } else {
                1
            }
        })
        .collect();
    if !windings.contains(&-1) {
        return;
    }

    // Collect outline contour and holes per region.
    let region_count = max_region.0 as usize + 1;
    let mut outlines: Vec<Option<usize>> = vec![None; region_count];
    let mut holes_by_region: Vec<Vec<ContourHole>> = (0..region_count).map(|_| Vec::new()).collect();
    for (i, contour) in cset.contours.iter().enumerate() {
        let region = contour.region.id() as usize;
        if windings[i] > 0 {
            // Positive winding means the contour is an outline.
            if outlines[region].is_some() {
                warn!(
                    "region {region} has multiple outlines, holes may not be merged correctly"
                );
            } else {
                outlines[region] = Some(i);
            }
        } else {
            let (min_x, min_z, leftmost) = find_left_most_vertex(contour);
            holes_by_region[region].push(ContourHole {
                contour: i,
                min_x,
                min_z,
                leftmost,
            });
        }
    }

    for (region, mut holes) in holes_by_region.into_iter().enumerate() {
        if holes.is_empty() {
            continue;
        }
        let Some(outline_index) = outlines[region] else {
            warn!("region {region} has holes but no outline, skipping hole merge");
            continue;
        };

        // Merge holes into the outline, left to right.
        holes.sort_by_key(|hole| (hole.min_x, hole.min_z));

        for hole in &holes {
            let hole_contour = cset.contours[hole.contour].clone();
            let outline = cset.contours[outline_index].clone();

            // Find a vertex pair connecting the hole to the outline without
            // crossing either contour.
            let mut best = None;
            let hole_vertex_count = hole_contour.vertices.len();
            'candidates: for iter in 0..hole_vertex_count {
                let corner_index = (hole.leftmost + iter) % hole_vertex_count;
                let corner = hole_contour.vertices[corner_index].0;

                // Potential diagonals to the outline, closest first.
                let mut diagonals: Vec<(usize, i32)> = (0..outline.vertices.len())
                    .filter(|&j| in_cone(j, &outline.vertices, corner))
                    .map(|j| {
                        let vertex = outline.vertices[j].0;
                        let dx = vertex.x as i32 - corner.x as i32;
                        let dz = vertex.z as i32 - corner.z as i32;
                        (j, dx * dx + dz * dz)
                    })
                    .collect();
                diagonals.sort_by_key(|(_, distance)| *distance);

                for (j, _) in diagonals {
                    let point = outline.vertices[j].0;
                    let intersects =
                        intersect_seg_contour(point, corner, Some(j), &outline.vertices)
                            || intersect_seg_contour(
                                point,
                                corner,
                                Some(corner_index),
                                &hole_contour.vertices,
                            );
                    if !intersects {
                        best = Some((j, corner_index));
                        break 'candidates;
                    }
                }
            }

            let Some((outline_vertex, hole_vertex)) = best else {
                warn!("failed to find merge point for hole in region {region}");
                continue;
            };
            merge_contours(
                &mut cset.contours[outline_index],
                &hole_contour,
                outline_vertex,
                hole_vertex,
            );
            cset.contours[hole.contour].vertices.clear();
        }
    }

    // Drop the hole contours that were merged away.
    cset.contours.retain(|contour| !contour.vertices.is_empty());
}

#[cfg(test)]
mod tests {
    use glam::{UVec3, Vec3A};

    use crate::{geometry::TriMesh, heightfield::HeightfieldBuilder};

    use super::*;

    fn contoured_plane(size: f32) -> ContourSet {
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
        compact.build_contours(1.3, 12, BuildContoursFlags::default())
    }

    #[test]
    fn flat_plane_has_one_rectangular_contour() {
        let cset = contoured_plane(10.0);
        assert_eq!(cset.contours.len(), 1);
        let contour = &cset.contours[0];
        assert_eq!(contour.region, RegionId(1));
        assert!(contour.vertices.len() >= 4);
        // The simplified outline winds counterclockwise on the xz-plane.
        assert!(calc_area_of_polygon_2d(&contour.vertices) > 0);
    }

    #[test]
    fn degenerate_segments_are_removed() {
        let mut simplified = vec![
            (U16Vec3::new(0, 0, 0), 0),
            (U16Vec3::new(0, 5, 0), 1),
            (U16Vec3::new(4, 0, 0), 2),
            (U16Vec3::new(4, 0, 4), 3),
        ];
        remove_degenerate_segments(&mut simplified);
        assert_eq!(simplified.len(), 3);
    }

    #[test]
    fn segment_intersection() {
        let a = U16Vec3::new(0, 0, 0);
        let b = U16Vec3::new(4, 0, 4);
        let c = U16Vec3::new(0, 0, 4);
        let d = U16Vec3::new(4, 0, 0);
        assert!(intersect(a, b, c, d));
        assert!(!intersect(a, d, c, b));
    }
}
