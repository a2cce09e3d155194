//! Builds per-polygon detail triangle meshes that follow the heightfield
//! surface more closely than the flat polygons of a [`PolygonMesh`].

use glam::{U16Vec3, Vec3A, u16vec3};
use tracing::warn;

use crate::{
    CompactHeightfield,
    math::{Aabb3d, dir_offset_x, dir_offset_z},
    poly_mesh::{MESH_NULL_IDX, PolygonMesh},
    region::RegionId,
};

/// Contains triangle meshes that represent detailed height data associated
/// with the polygons in its associated polygon mesh object.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct DetailMesh {
    /// The sub-mesh data, one entry per polygon.
    pub meshes: Vec<SubMesh>,
    /// The mesh vertices in world space.
    pub vertices: Vec<Vec3A>,
    /// The mesh triangles and their edge flags.
    pub triangles: Vec<(U16Vec3, u8)>,
}

/// Range of vertices and triangles belonging to one polygon.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SubMesh {
    /// Index of the first vertex of the sub-mesh.
    pub first_vertex_index: usize,
    /// Number of vertices in the sub-mesh.
    pub vertex_count: usize,
    /// Index of the first triangle of the sub-mesh.
    pub first_triangle_index: usize,
    /// Number of triangles in the sub-mesh.
    pub triangle_count: usize,
}

/// Errors that can occur when building a [`DetailMesh`].
#[derive(Debug, thiserror::Error)]
pub enum DetailMeshError {
    /// A polygon has no spans near its vertices to seed the height sampling.
    #[error("polygon {polygon} has no heightfield spans near its vertices")]
    NoSeedSpan {
        /// The polygon without height data.
        polygon: usize,
    },
}

const UNSET_HEIGHT: u16 = 0xffff;
const MAX_VERTS: usize = 127;
// Max tris for delaunay is 2n-2-k (n=num verts, k=num hull verts).
const MAX_TRIS: usize = 255;
const MAX_VERTS_PER_EDGE: usize = 32;

impl DetailMesh {
    /// Builds a detail mesh from the provided polygon mesh.
    ///
    /// `sample_distance` sets the distance between height samples on the
    /// polygon surface, `sample_max_error` the allowed vertical deviation of
    /// the detail surface from the heightfield. A `sample_distance` of zero
    /// disables interior sampling.
    pub fn new(
        mesh: &PolygonMesh,
        heightfield: &CompactHeightfield,
        sample_distance: f32,
        sample_max_error: f32,
    ) -> Result<Self, DetailMeshError> {
        let mut dmesh = DetailMesh::default();
        if mesh.vertices.is_empty() || mesh.polygon_count() == 0 {
            return Ok(dmesh);
        }
        let nvp = mesh.vertices_per_polygon;
        let cell_size = mesh.cell_size;
        let cell_height = mesh.cell_height;
        let orig = mesh.aabb.min;
        let border_size = mesh.border_size;
        let height_search_radius = 1.max(mesh.max_edge_error.ceil() as u32);

        let mut tris = Vec::with_capacity(128);
        let mut queue = Vec::with_capacity(512);
        let mut samples = Vec::with_capacity(128);
        let mut verts = vec![Vec3A::default(); MAX_VERTS];
        let mut poly = vec![Vec3A::default(); nvp];

        // Find the max footprint of a polygon so the height patch buffer can
        // be allocated once.
        let mut bounds = vec![Bounds::default(); mesh.polygon_count()];
        let mut max_patch_width = 0;
        let mut max_patch_height = 0;
        for (i, bounds) in bounds.iter_mut().enumerate() {
            bounds.x_min = heightfield.width as u16;
            bounds.x_max = 0;
            bounds.z_min = heightfield.height as u16;
            bounds.z_max = 0;
            for &j in mesh.polygon_vertices(i) {
                if j == MESH_NULL_IDX {
                    break;
                }
                let v = mesh.vertices[j as usize];
                bounds.x_min = bounds.x_min.min(v.x);
                bounds.x_max = bounds.x_max.max(v.x);
                bounds.z_min = bounds.z_min.min(v.z);
                bounds.z_max = bounds.z_max.max(v.z);
            }
            bounds.x_min = bounds.x_min.saturating_sub(1);
            bounds.x_max = (heightfield.width as u16).min(bounds.x_max + 1);
            bounds.z_min = bounds.z_min.saturating_sub(1);
            bounds.z_max = (heightfield.height as u16).min(bounds.z_max + 1);
            if bounds.x_min >= bounds.x_max || bounds.z_min >= bounds.z_max {
                continue;
            }
            max_patch_width = max_patch_width.max(bounds.width());
            max_patch_height = max_patch_height.max(bounds.height());
        }
        let mut patch = HeightPatch {
            data: vec![0; max_patch_width as usize * max_patch_height as usize],
            ..Default::default()
        };
        dmesh.meshes = vec![SubMesh::default(); mesh.polygon_count()];

        for i in 0..mesh.polygon_count() {
            // Store polygon vertices for processing.
            let mut npoly = 0;
            for (j, &p) in mesh.polygon_vertices(i).iter().enumerate() {
                if p == MESH_NULL_IDX {
                    break;
                }
                let v = mesh.vertices[p as usize];
                poly[j] = Vec3A::new(
                    v.x as f32 * cell_size,
                    v.y as f32 * cell_height,
                    v.z as f32 * cell_size,
                );
                npoly += 1;
            }

            // Get the height data from the area of the polygon.
            patch.x_min = bounds[i].x_min;
            patch.z_min = bounds[i].z_min;
            patch.width = bounds[i].width();
            patch.height = bounds[i].height();
            patch.collect_height_data(
                heightfield,
                mesh.polygon_vertices(i),
                npoly,
                &mesh.vertices,
                border_size,
                &mut queue,
                mesh.regions[i],
                i,
            )?;

            // Build the detail mesh of this polygon.
            let nverts = build_poly_detail(
                &poly[..npoly],
                sample_distance,
                sample_max_error,
                height_search_radius,
                heightfield,
                &patch,
                &mut verts,
                &mut tris,
                &mut samples,
            );

            // Move detail verts to world space.
            for vert in &mut verts[..nverts] {
                *vert += orig;
                vert.y += heightfield.cell_height;
            }

            let submesh = &mut dmesh.meshes[i];
            submesh.first_vertex_index = dmesh.vertices.len();
            submesh.vertex_count = nverts;
            submesh.first_triangle_index = dmesh.triangles.len();
            submesh.triangle_count = tris.len();

            dmesh.vertices.extend_from_slice(&verts[..nverts]);
            dmesh.triangles.extend_from_slice(&tris);
        }

        Ok(dmesh)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Bounds {
    x_min: u16,
    x_max: u16,
    z_min: u16,
    z_max: u16,
}

impl Bounds {
    #[inline]
    fn width(&self) -> u16 {
        self.x_max - self.x_min
    }

    #[inline]
    fn height(&self) -> u16 {
        self.z_max - self.z_min
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct HeightPatch {
    data: Vec<u16>,
    x_min: u16,
    z_min: u16,
    width: u16,
    height: u16,
}

impl HeightPatch {
    #[inline]
    fn data_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    #[inline]
    fn data_at(&self, x: i32, z: i32) -> u16 {
        self.data[(x + z * self.width as i32) as usize]
    }

    #[inline]
    fn data_at_mut(&mut self, x: i32, z: i32) -> &mut u16 {
        &mut self.data[(x + z * self.width as i32) as usize]
    }

    /// Fills the patch with span heights of the given region via a BFS from
    /// the region border, falling back to a seed at the polygon center for
    /// polygons that span multiple regions.
    ///
    /// Reads to the compact heightfield are offset by the border size since
    /// that offset was already removed from the polygon mesh vertices.
    #[allow(clippy::too_many_arguments)]
    fn collect_height_data(
        &mut self,
        heightfield: &CompactHeightfield,
        poly: &[u16],
        npoly: usize,
        verts: &[U16Vec3],
        border_size: u16,
        queue: &mut Vec<(i32, i32, usize)>,
        region: RegionId,
        polygon: usize,
    ) -> Result<(), DetailMeshError> {
        queue.clear();
        let data_len = self.data_len();
        self.data[..data_len].fill(UNSET_HEIGHT);

        let mut empty = true;

        // We cannot sample from this poly if it was created from polys
        // of different regions. If it was then it could potentially be
        // overlapping with polys of that region and the heights sampled here
        // could be wrong.
        if region != RegionId::NONE {
            // Copy the height from the same region, and mark region borders
            // as seed points to fill the rest.
            for hz in 0..self.height {
                let z = (self.z_min + hz + border_size) as u32;
                for hx in 0..self.width {
                    let x = (self.x_min + hx + border_size) as u32;
                    let cell = *heightfield.cell_at(x, z);
                    for i in cell.span_range() {
                        let span = &heightfield.spans[i];
                        if span.region != region {
                            continue;
                        }
                        *self.data_at_mut(hx as i32, hz as i32) = span.y;
                        empty = false;

                        // If any of the neighbors is not in the same region,
                        // add the current location as flood fill start.
                        let border = (0..4).any(|dir| {
                            heightfield
                                .con_index(x, z, span, dir)
                                .is_some_and(|ai| heightfield.spans[ai].region != region)
                        });
                        if border {
                            queue.push((x as i32, z as i32, i));
                        }
                        break;
                    }
                }
            }
        }

        // If the polygon does not contain any points from the current region
        // (rare, but happens) or if it could potentially be overlapping
        // polygons of the same region, then use the center as the seed point.
        if empty {
            self.seed_with_poly_center(heightfield, poly, npoly, verts, border_size, queue)
                .ok_or(DetailMeshError::NoSeedSpan { polygon })?;
        }

        // We assume the seed is centered in the polygon, so a BFS to collect
        // height data will ensure we do not move onto overlapping polygons
        // and sample wrong heights.
        const RETRACT_SIZE: usize = 256;
        let mut head = 0;
        while head < queue.len() {
            let (cx, cz, ci) = queue[head];
            head += 1;
            if head >= RETRACT_SIZE {
                head = 0;
                queue.drain(..RETRACT_SIZE);
            }

            let span = heightfield.spans[ci].clone();
            for dir in 0..4 {
                let Some(ai) = heightfield.con_index(cx as u32, cz as u32, &span, dir) else {
                    continue;
                };
                let ax = cx + dir_offset_x(dir) as i32;
                let az = cz + dir_offset_z(dir) as i32;
                let hx = ax - self.x_min as i32 - border_size as i32;
                let hz = az - self.z_min as i32 - border_size as i32;

                if hx < 0 || hx >= self.width as i32 || hz < 0 || hz >= self.height as i32 {
                    continue;
                }
                if self.data_at(hx, hz) != UNSET_HEIGHT {
                    continue;
                }
                *self.data_at_mut(hx, hz) = heightfield.spans[ai].y;
                queue.push((ax, az, ai));
            }
        }

        Ok(())
    }

    /// Seeds the height queue with the span closest to the polygon center.
    /// Returns `None` if no span lies near any polygon vertex.
    fn seed_with_poly_center(
        &mut self,
        heightfield: &CompactHeightfield,
        poly: &[u16],
        npoly: usize,
        verts: &[U16Vec3],
        border_size: u16,
        queue: &mut Vec<(i32, i32, usize)>,
    ) -> Option<()> {
        const OFFSET: [(i32, i32); 9] = [
            (0, 0),
            (-1, -1),
            (0, -1),
            (1, -1),
            (1, 0),
            (1, 1),
            (0, 1),
            (-1, 1),
            (-1, 0),
        ];

        // Find the cell closest to a polygon vertex.
        let mut start_cell_x = 0;
        let mut start_cell_z = 0;
        let mut start_span_index = None;
        let mut dmin = UNSET_HEIGHT as i32;
        for &p in poly[..npoly].iter() {
            if dmin <= 0 {
                break;
            }
            let vertex = verts[p as usize];
            for (ox, oz) in OFFSET {
                if dmin <= 0 {
                    break;
                }
                let ax = vertex.x as i32 + ox;
                let ay = vertex.y as i32;
                let az = vertex.z as i32 + oz;
                if ax < self.x_min as i32
                    || ax >= self.x_min as i32 + self.width as i32
                    || az < self.z_min as i32
                    || az >= self.z_min as i32 + self.height as i32
                {
                    continue;
                }
                let cell = *heightfield
                    .cell_at((ax + border_size as i32) as u32, (az + border_size as i32) as u32);
                for i in cell.span_range() {
                    let span = &heightfield.spans[i];
                    let d = (ay - span.y as i32).abs();
                    if d < dmin {
                        start_cell_x = ax;
                        start_cell_z = az;
                        start_span_index = Some(i);
                        dmin = d;
                    }
                }
            }
        }
        let start_span_index = start_span_index?;

        // Find the center of the polygon.
        let mut center_x = 0;
        let mut center_z = 0;
        for &p in poly[..npoly].iter() {
            center_x += verts[p as usize].x as i32;
            center_z += verts[p as usize].z as i32;
        }
        center_x /= npoly as i32;
        center_z /= npoly as i32;

        // DFS towards the center, using the patch data as the visited set.
        // The intermediate nodes have to be recorded since contour
        // simplification can very rarely produce dead ends on the way.
        queue.clear();
        queue.push((start_cell_x, start_cell_z, start_span_index));
        let data_len = self.data_len();
        self.data[..data_len].fill(0);

        let mut dirs = [0_u8, 1, 2, 3];
        let mut current = None;
        loop {
            let Some((cx, cz, ci)) = queue.pop() else {
                warn!("walk towards polygon center failed to reach the center");
                break;
            };
            current = Some((cx, cz, ci));

            if cx == center_x && cz == center_z {
                break;
            }

            // If we are already at the correct x-position, prefer the
            // direction directly towards the center along z, otherwise
            // along x.
            let direct_dir = if cx == center_x {
                if center_z > cz { 1 } else { 3 }
            } else if center_x > cx {
                2
            } else {
                0
            } as usize;

            // Push the direct dir last so we start with it on the next iteration.
            dirs.swap(direct_dir, 3);

            let span = heightfield.spans[ci].clone();
            for dir in dirs {
                let with_border_x = (cx + border_size as i32) as u32;
                let with_border_z = (cz + border_size as i32) as u32;
                let Some(ai) = heightfield.con_index(with_border_x, with_border_z, &span, dir)
                else {
                    continue;
                };

                let new_x = cx + dir_offset_x(dir) as i32;
                let new_z = cz + dir_offset_z(dir) as i32;
                let hx = new_x - self.x_min as i32;
                let hz = new_z - self.z_min as i32;
                if hx < 0 || hx >= self.width as i32 || hz < 0 || hz >= self.height as i32 {
                    continue;
                }
                if self.data_at(hx, hz) != 0 {
                    continue;
                }
                *self.data_at_mut(hx, hz) = 1;
                queue.push((new_x, new_z, ai));
            }
            dirs.swap(direct_dir, 3);
        }

        let (cx, cz, ci) = current?;
        queue.clear();
        // Height collection seeds are given in coordinates with borders.
        queue.push((cx + border_size as i32, cz + border_size as i32, ci));
        self.data[..data_len].fill(UNSET_HEIGHT);
        *self.data_at_mut(cx - self.x_min as i32, cz - self.z_min as i32) =
            heightfield.spans[ci].y;
        Some(())
    }
}

/// Samples the patch at the given world position, spiraling outwards up to
/// `radius` cells when the exact cell holds no height.
fn get_height(
    position: Vec3A,
    inverse_cell_size: f32,
    cell_height: f32,
    radius: u32,
    patch: &HeightPatch,
) -> u16 {
    let ix = ((position.x * inverse_cell_size + 0.01).floor() as i32 - patch.x_min as i32)
        .clamp(0, patch.width as i32 - 1);
    let iz = ((position.z * inverse_cell_size + 0.01).floor() as i32 - patch.z_min as i32)
        .clamp(0, patch.height as i32 - 1);
    let mut height = patch.data_at(ix, iz);
    if height != UNSET_HEIGHT {
        return height;
    }

    // The cell holds no data, probably because it belongs to another region.
    // Walk adjacent cells in a spiral up to `radius`, keeping the height
    // closest to the query position. Once a ring yields a height, finish that
    // ring and stop.
    let mut x = 1_i32;
    let mut z = 0_i32;
    let mut dx = 1_i32;
    let mut dz = 0_i32;
    let max_size = radius * 2 + 1;
    let max_iter = max_size * max_size - 1;

    let mut next_ring_iter_start = 8;
    let mut next_ring_iters = 16;

    let mut dmin = f32::MAX;
    for i in 0..max_iter {
        let nx = ix + x;
        let nz = iz + z;
        if nx >= 0 && nz >= 0 && nx < patch.width as i32 && nz < patch.height as i32 {
            let nh = patch.data_at(nx, nz);
            if nh != UNSET_HEIGHT {
                let d = (nh as f32 * cell_height - position.y).abs();
                if d < dmin {
                    height = nh;
                    dmin = d;
                }
            }
        }

        if i + 1 == next_ring_iter_start {
            if height != UNSET_HEIGHT {
                break;
            }
            next_ring_iter_start += next_ring_iters;
            next_ring_iters += 8;
        }

        if x == z || (x < 0 && x == -z) || (x > 0 && x == 1 - z) {
            std::mem::swap(&mut dx, &mut dz);
            dx = -dx;
        }
        x += dx;
        z += dz;
    }
    height
}

/// Builds the detail triangulation of a single polygon into `verts` and
/// `tris`, returning the number of vertices used.
#[allow(clippy::too_many_arguments)]
fn build_poly_detail(
    input: &[Vec3A],
    sample_distance: f32,
    sample_max_error: f32,
    height_search_radius: u32,
    heightfield: &CompactHeightfield,
    patch: &HeightPatch,
    verts: &mut [Vec3A],
    tris: &mut Vec<(U16Vec3, u8)>,
    samples: &mut Vec<(U16Vec3, bool)>,
) -> usize {
    let nin = input.len();
    let mut edge = [Vec3A::default(); MAX_VERTS_PER_EDGE + 1];
    let mut hull = [0_usize; MAX_VERTS];
    let mut nhull = 0;

    let mut nverts = nin;
    verts[..nin].copy_from_slice(input);
    tris.clear();

    let cell_size = heightfield.cell_size;
    let inverse_cell_size = 1.0 / cell_size;
    let cell_height = heightfield.cell_height;

    let min_extent_squared = poly_min_extent_squared(&verts[..nverts]);

    // Tessellate outlines.
    // This is done in a separate pass to ensure seamless height values
    // across polygon boundaries.
    if sample_distance > 0.0 {
        let mut j = nin - 1;
        for i in 0..nin {
            let mut vj = input[j];
            let mut vi = input[i];
            let mut swapped = false;
            // Make sure the segments are always handled in the same order so
            // that shared edges of neighboring polygons sample identically.
            if (vj.x - vi.x).abs() < 1.0e-6 {
                if vj.z > vi.z {
                    std::mem::swap(&mut vj, &mut vi);
                    swapped = true;
                }
            } else if vj.x > vi.x {
                std::mem::swap(&mut vj, &mut vi);
                swapped = true;
            }
            // Create samples along the edge.
            let dij = vi - vj;
            let d = dij.length();
            let mut nn = 1 + (d / sample_distance).floor() as usize;
            if nn >= MAX_VERTS_PER_EDGE {
                nn = MAX_VERTS_PER_EDGE - 1;
            }
            if nverts + nn >= MAX_VERTS {
                nn = MAX_VERTS - 1 - nverts;
            }
            for (k, pos) in edge.iter_mut().enumerate().take(nn + 1) {
                let u = k as f32 / nn as f32;
                *pos = vj + dij * u;
                pos.y = get_height(*pos, inverse_cell_size, cell_height, height_search_radius, patch)
                    as f32
                    * cell_height;
            }
            // Simplify samples.
            let mut idx = [0_usize; MAX_VERTS_PER_EDGE];
            idx[1] = nn;
            let mut nidx = 2;
            let mut k = 0;
            while k < nidx - 1 {
                let a = idx[k];
                let b = idx[k + 1];
                let va = edge[a];
                let vb = edge[b];
                // Find the sample with the maximum deviation along the segment.
                let mut maxd = 0.0;
                let mut maxi = None;
                for m in (a + 1)..b {
                    let dev = dist_point_segment_sq(edge[m], va, vb);
                    if dev > maxd {
                        maxd = dev;
                        maxi = Some(m);
                    }
                }
                // If the max deviation is larger than the accepted error,
                // add a new point, else continue to the next segment.
                if let Some(maxi) = maxi
                    && maxd > sample_max_error * sample_max_error
                {
                    idx.copy_within(k + 1..nidx, k + 2);
                    idx[k + 1] = maxi;
                    nidx += 1;
                } else {
                    k += 1;
                }
            }

            hull[nhull] = j;
            nhull += 1;
            // Add new vertices.
            if swapped {
                for k in (1..nidx - 1).rev() {
                    verts[nverts] = edge[idx[k]];
                    hull[nhull] = nverts;
                    nhull += 1;
                    nverts += 1;
                }
            } else {
                for k in 1..nidx - 1 {
                    verts[nverts] = edge[idx[k]];
                    hull[nhull] = nverts;
                    nhull += 1;
                    nverts += 1;
                }
            }
            j = i;
        }
    } else {
        nhull = nin;
        for (i, h) in hull[..nin].iter_mut().enumerate() {
            *h = i;
        }
    }

    // If the polygon minimum extent is small (sliver or tiny triangle), do
    // not add internal points.
    if min_extent_squared < (sample_distance * 2.0).powi(2) {
        triangulate_hull(verts, &hull[..nhull], nin, tris);
        set_tri_flags(tris, &hull[..nhull]);
        return nverts;
    }

    // Tessellate the base mesh.
    // triangulate_hull tends to create better triangulations than the
    // delaunay hull for long thin triangles when there are no internal
    // points.
    triangulate_hull(verts, &hull[..nhull], nin, tris);

    if tris.is_empty() {
        warn!("could not triangulate polygon with {nverts} verts");
        return nverts;
    }

    if sample_distance > 0.0 {
        // Create sample locations in a grid.
        let mut aabb = Aabb3d::from_min_max(input[0], input[0]);
        for point in input.iter().copied() {
            aabb.min = aabb.min.min(point);
            aabb.max = aabb.max.max(point);
        }
        let x0 = (aabb.min.x / sample_distance).floor() as i32;
        let x1 = (aabb.max.x / sample_distance).ceil() as i32;
        let z0 = (aabb.min.z / sample_distance).floor() as i32;
        let z1 = (aabb.max.z / sample_distance).ceil() as i32;
        samples.clear();
        for z in z0..z1 {
            for x in x0..x1 {
                let pt = Vec3A::new(
                    x as f32 * sample_distance,
                    (aabb.max.y + aabb.min.y) * 0.5,
                    z as f32 * sample_distance,
                );
                // Make sure the samples are not too close to the edges.
                if dist_to_poly(input, pt) > -sample_distance / 2.0 {
                    continue;
                }
                let y = get_height(pt, inverse_cell_size, cell_height, height_search_radius, patch);
                samples.push((u16vec3(x as u16, y, z as u16), false));
            }
        }

        // Add the samples starting from the one that has the most error.
        // Stop when all samples are added or the max error is within
        // threshold.
        for _ in 0..samples.len() {
            if nverts >= MAX_VERTS {
                break;
            }

            // Find the sample with the most error.
            let mut best_point = Vec3A::default();
            let mut best_distance = 0.0;
            let mut best_index = None;
            for (i, (sample, added)) in samples.iter().enumerate() {
                if *added {
                    continue;
                }
                // The sample location is jittered to get rid of some bad
                // triangulations caused by symmetrical data from the grid
                // structure.
                let pt = Vec3A::new(
                    sample.x as f32 * sample_distance + jitter_x(i) * cell_size * 0.1,
                    sample.y as f32 * cell_height,
                    sample.z as f32 * sample_distance + jitter_z(i) * cell_size * 0.1,
                );
                let Some(d) = dist_to_tri_mesh(pt, verts, tris) else {
                    // Did not hit the mesh.
                    continue;
                };
                if d > best_distance {
                    best_distance = d;
                    best_index = Some(i);
                    best_point = pt;
                }
            }
            // If the max error is within the accepted threshold, stop
            // tessellating.
            if best_distance <= sample_max_error {
                break;
            }
            let Some(best_index) = best_index else {
                break;
            };
            samples[best_index].1 = true;
            verts[nverts] = best_point;
            nverts += 1;

            // Create a new triangulation. Full rebuild.
            tris.clear();
            delaunay_hull(&verts[..nverts], &hull[..nhull], tris);
        }
    }

    if tris.len() > MAX_TRIS {
        warn!(
            "shrinking triangle count from {} to {MAX_TRIS}",
            tris.len()
        );
        tris.truncate(MAX_TRIS);
    }
    set_tri_flags(tris, &hull[..nhull]);
    nverts
}

/// Triangulates the hull polyline by repeatedly clipping the ear with the
/// shortest resulting perimeter.
fn triangulate_hull(verts: &[Vec3A], hull: &[usize], nin: usize, tris: &mut Vec<(U16Vec3, u8)>) {
    let nhull = hull.len();
    let mut start = 0;
    let mut left = 1;
    let mut right = nhull - 1;

    // Start from an ear with the shortest perimeter.
    // This tends to favor well formed triangles as the starting point.
    let mut dmin = f32::MAX;
    for i in 0..nhull {
        if hull[i] >= nin {
            // Ears have original vertices as their middle vertex, other
            // hull points lie on tessellated edge segments.
            continue;
        }
        let pi = prev(i, nhull);
        let ni = next(i, nhull);
        let pv = verts[hull[pi]];
        let cv = verts[hull[i]];
        let nv = verts[hull[ni]];
        let d = dist_2d(pv, cv) + dist_2d(cv, nv) + dist_2d(nv, pv);
        if d < dmin {
            start = i;
            left = ni;
            right = pi;
            dmin = d;
        }
    }

    tris.push((
        u16vec3(hull[start] as u16, hull[left] as u16, hull[right] as u16),
        0,
    ));

    // Triangulate the polygon by moving left or right, depending on which
    // triangle has the shorter perimeter. This heuristic was chosen
    // empirically, it handles tessellated straight edges well.
    while next(left, nhull) != right {
        let nleft = next(left, nhull);
        let nright = prev(right, nhull);

        let cvleft = verts[hull[left]];
        let nvleft = verts[hull[nleft]];
        let cvright = verts[hull[right]];
        let nvright = verts[hull[nright]];
        let dleft = dist_2d(cvleft, nvleft) + dist_2d(nvleft, cvright);
        let dright = dist_2d(cvright, nvright) + dist_2d(cvleft, nvright);
        if dleft < dright {
            tris.push((
                u16vec3(hull[left] as u16, hull[nleft] as u16, hull[right] as u16),
                0,
            ));
            left = nleft;
        } else {
            tris.push((
                u16vec3(hull[left] as u16, hull[nright] as u16, hull[right] as u16),
                0,
            ));
            right = nright;
        }
    }
}

const EV_UNDEF: i32 = -1;
const EV_HULL: i32 = -2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HullEdge {
    s: usize,
    t: usize,
    /// Face on the left of (s, t), `EV_UNDEF` or `EV_HULL` or a face index.
    left: i32,
    /// Face on the right of (s, t).
    right: i32,
}

fn find_edge(edges: &[HullEdge], s: usize, t: usize) -> Option<usize> {
    edges
        .iter()
        .position(|edge| (edge.s == s && edge.t == t) || (edge.s == t && edge.t == s))
}

fn add_edge(edges: &mut Vec<HullEdge>, max_edges: usize, s: usize, t: usize, left: i32, right: i32) {
    if edges.len() >= max_edges {
        warn!("too many edges while building the delaunay hull");
        return;
    }
    if find_edge(edges, s, t).is_none() {
        edges.push(HullEdge { s, t, left, right });
    }
}

fn update_left_face(edge: &mut HullEdge, s: usize, t: usize, face: i32) {
    if edge.s == s && edge.t == t && edge.left == EV_UNDEF {
        edge.left = face;
    } else if edge.s == t && edge.t == s && edge.right == EV_UNDEF {
        edge.right = face;
    }
}

fn cross_2d(p1: Vec3A, p2: Vec3A, p3: Vec3A) -> f32 {
    let u1 = p2.x - p1.x;
    let v1 = p2.z - p1.z;
    let u2 = p3.x - p1.x;
    let v2 = p3.z - p1.z;
    u1 * v2 - v1 * u2
}

fn dist_2d(a: Vec3A, b: Vec3A) -> f32 {
    let dx = b.x - a.x;
    let dz = b.z - a.z;
    (dx * dx + dz * dz).sqrt()
}

/// Circumcircle of the triangle (p1, p2, p3) on the xz-plane. Returns the
/// center and radius, or a zero circle around p1 for degenerate triangles.
fn circum_circle(p1: Vec3A, p2: Vec3A, p3: Vec3A) -> (Vec3A, f32) {
    const EPS: f32 = 1.0e-6;
    // Calculate the circle relative to p1 to avoid some precision issues.
    let v2 = p2 - p1;
    let v3 = p3 - p1;

    let cp = cross_2d(Vec3A::ZERO, v2, v3);
    if cp.abs() <= EPS {
        return (p1, 0.0);
    }
    let v2_sq = v2.x * v2.x + v2.z * v2.z;
    let v3_sq = v3.x * v3.x + v3.z * v3.z;
    let center = Vec3A::new(
        (v2_sq * (v3.z - 0.0) + v3_sq * (0.0 - v2.z)) / (2.0 * cp),
        0.0,
        (v2_sq * (0.0 - v3.x) + v3_sq * (v2.x - 0.0)) / (2.0 * cp),
    );
    let radius = dist_2d(center, Vec3A::ZERO);
    (center + p1, radius)
}

fn overlap_seg_seg_2d(a: Vec3A, b: Vec3A, c: Vec3A, d: Vec3A) -> bool {
    let a1 = cross_2d(a, b, d);
    let a2 = cross_2d(a, b, c);
    if a1 * a2 < 0.0 {
        let a3 = cross_2d(c, d, a);
        let a4 = a3 + a2 - a1;
        if a3 * a4 < 0.0 {
            return true;
        }
    }
    false
}

fn overlap_edges(points: &[Vec3A], edges: &[HullEdge], s: usize, t: usize) -> bool {
    edges.iter().any(|edge| {
        if edge.s == s || edge.s == t || edge.t == s || edge.t == t {
            return false;
        }
        overlap_seg_seg_2d(points[edge.s], points[edge.t], points[s], points[t])
    })
}

/// Finds the best point to the left of the given edge and connects it,
/// forming a new delaunay face.
fn complete_facet(
    points: &[Vec3A],
    edges: &mut Vec<HullEdge>,
    max_edges: usize,
    nfaces: &mut i32,
    e: usize,
) {
    const EPS: f32 = 1.0e-5;

    // Cache s and t.
    let (s, t) = if edges[e].left == EV_UNDEF {
        (edges[e].s, edges[e].t)
    } else if edges[e].right == EV_UNDEF {
        (edges[e].t, edges[e].s)
    } else {
        // Edge already completed.
        return;
    };

    // Find the best point on the left of the edge.
    let mut point = points.len();
    let mut center = Vec3A::ZERO;
    let mut radius = -1.0_f32;
    for u in 0..points.len() {
        if u == s || u == t {
            continue;
        }
        if cross_2d(points[s], points[t], points[u]) <= EPS {
            continue;
        }
        if radius < 0.0 {
            // The circle is not updated yet, do it now.
            point = u;
            (center, radius) = circum_circle(points[s], points[t], points[u]);
            continue;
        }
        let d = dist_2d(center, points[u]);
        let tolerance = 0.001;
        if d > radius * (1.0 + tolerance) {
            // Outside the current circumcircle, skip.
            continue;
        } else if d < radius * (1.0 - tolerance) {
            // Inside safe circumcircle, update the circle.
            point = u;
            (center, radius) = circum_circle(points[s], points[t], points[u]);
        } else {
            // Inside epsilon circumcircle, do extra tests to make sure the
            // edge is valid.
            if overlap_edges(points, edges, s, u) || overlap_edges(points, edges, t, u) {
                continue;
            }
            point = u;
            (center, radius) = circum_circle(points[s], points[t], points[u]);
        }
    }

    // Add new triangle or update edge info if s-t is on the hull.
    if point < points.len() {
        // Update face information of the edge being completed.
        update_left_face(&mut edges[e], s, t, *nfaces);

        // Add new edge or update face info of an old edge.
        if let Some(existing) = find_edge(edges, point, s) {
            update_left_face(&mut edges[existing], point, s, *nfaces);
        } else {
            add_edge(edges, max_edges, point, s, *nfaces, EV_UNDEF);
        }
        if let Some(existing) = find_edge(edges, t, point) {
            update_left_face(&mut edges[existing], t, point, *nfaces);
        } else {
            add_edge(edges, max_edges, t, point, *nfaces, EV_UNDEF);
        }

        *nfaces += 1;
    } else {
        update_left_face(&mut edges[e], s, t, EV_HULL);
    }
}

/// Delaunay triangulation of the points enclosed by the hull polyline.
fn delaunay_hull(points: &[Vec3A], hull: &[usize], tris: &mut Vec<(U16Vec3, u8)>) {
    let mut nfaces = 0;
    let max_edges = points.len() * 10;
    let mut edges: Vec<HullEdge> = Vec::with_capacity(max_edges);

    let nhull = hull.len();
    let mut j = nhull - 1;
    for i in 0..nhull {
        add_edge(&mut edges, max_edges, hull[j], hull[i], EV_HULL, EV_UNDEF);
        j = i;
    }

    let mut current_edge = 0;
    while current_edge < edges.len() {
        if edges[current_edge].left == EV_UNDEF {
            complete_facet(points, &mut edges, max_edges, &mut nfaces, current_edge);
        }
        if edges[current_edge].right == EV_UNDEF {
            complete_facet(points, &mut edges, max_edges, &mut nfaces, current_edge);
        }
        current_edge += 1;
    }

    // Create triangles from the edge face information.
    let mut faces: Vec<[i32; 3]> = vec![[-1; 3]; nfaces as usize];
    for edge in &edges {
        if edge.right >= 0 {
            // Left face of the reversed edge.
            let face = &mut faces[edge.right as usize];
            if face[0] == -1 {
                face[0] = edge.s as i32;
                face[1] = edge.t as i32;
            } else if face[0] == edge.t as i32 {
                face[2] = edge.s as i32;
            } else if face[1] == edge.s as i32 {
                face[2] = edge.t as i32;
            }
        }
        if edge.left >= 0 {
            let face = &mut faces[edge.left as usize];
            if face[0] == -1 {
                face[0] = edge.t as i32;
                face[1] = edge.s as i32;
            } else if face[0] == edge.s as i32 {
                face[2] = edge.t as i32;
            } else if face[1] == edge.t as i32 {
                face[2] = edge.s as i32;
            }
        }
    }

    for face in faces {
        if face[0] < 0 || face[1] < 0 || face[2] < 0 {
            // Dangling face.
            continue;
        }
        tris.push((u16vec3(face[0] as u16, face[1] as u16, face[2] as u16), 0));
    }
}

/// Marks the triangle edges that lie on the hull as boundary edges.
fn set_tri_flags(tris: &mut [(U16Vec3, u8)], hull: &[usize]) {
    // Matches Detour's detail edge boundary flag.
    const DETAIL_EDGE_BOUNDARY: u8 = 0x1;

    for (tri, tri_flags) in tris {
        let mut flags = 0;
        if on_hull(tri.x as usize, tri.y as usize, hull) {
            flags |= DETAIL_EDGE_BOUNDARY;
        }
        if on_hull(tri.y as usize, tri.z as usize, hull) {
            flags |= DETAIL_EDGE_BOUNDARY << 2;
        }
        if on_hull(tri.z as usize, tri.x as usize, hull) {
            flags |= DETAIL_EDGE_BOUNDARY << 4;
        }
        *tri_flags = flags;
    }
}

fn on_hull(a: usize, b: usize, hull: &[usize]) -> bool {
    let nhull = hull.len();
    // All internal sampled points come after the hull, so we can early out
    // for those.
    if a >= nhull || b >= nhull {
        return false;
    }
    let mut j = nhull - 1;
    for i in 0..nhull {
        if a == hull[j] && b == hull[i] {
            return true;
        }
        j = i;
    }
    false
}

/// Squared minimum extent of the polygon: the smallest over all edges of the
/// largest distance of any other vertex to that edge.
fn poly_min_extent_squared(verts: &[Vec3A]) -> f32 {
    let nverts = verts.len();
    let mut min_dist = f32::MAX;
    for i in 0..nverts {
        let ni = next(i, nverts);
        let p1 = verts[i];
        let p2 = verts[ni];
        let mut max_edge_dist = 0.0_f32;
        for (j, vert) in verts.iter().enumerate() {
            if j == i || j == ni {
                continue;
            }
            let d = dist_point_segment_sq_2d(*vert, p1, p2);
            max_edge_dist = max_edge_dist.max(d);
        }
        min_dist = min_dist.min(max_edge_dist);
    }
    min_dist
}

fn dist_point_segment_sq_2d(point: Vec3A, a: Vec3A, b: Vec3A) -> f32 {
    let pqx = b.x - a.x;
    let pqz = b.z - a.z;
    let dx = point.x - a.x;
    let dz = point.z - a.z;
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    let dx = a.x + t * pqx - point.x;
    let dz = a.z + t * pqz - point.z;
    dx * dx + dz * dz
}

fn dist_point_segment_sq(point: Vec3A, a: Vec3A, b: Vec3A) -> f32 {
    let ab = b - a;
    let ap = point - a;
    let d = ab.dot(ab);
    let mut t = ab.dot(ap);
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    (a + ab * t - point).length_squared()
}

/// Signed distance from the point to the polygon boundary on the xz-plane,
/// negative when the point is inside.
fn dist_to_poly(verts: &[Vec3A], point: Vec3A) -> f32 {
    let nverts = verts.len();
    let mut dmin = f32::MAX;
    let mut inside = false;
    let mut j = nverts - 1;
    for i in 0..nverts {
        let vi = verts[i];
        let vj = verts[j];
        if (vi.z > point.z) != (vj.z > point.z)
            && point.x < (vj.x - vi.x) * (point.z - vi.z) / (vj.z - vi.z) + vi.x
        {
            inside = !inside;
        }
        dmin = dmin.min(dist_point_segment_sq_2d(point, vj, vi));
        j = i;
    }
    if inside { -dmin } else { dmin }
}

fn dist_to_tri_mesh(point: Vec3A, verts: &[Vec3A], tris: &[(U16Vec3, u8)]) -> Option<f32> {
    let mut dmin = f32::MAX;
    for (tri, _flags) in tris {
        let va = verts[tri.x as usize];
        let vb = verts[tri.y as usize];
        let vc = verts[tri.z as usize];
        if let Some(d) = dist_point_triangle(point, va, vb, vc)
            && d < dmin
        {
            dmin = d;
        }
    }
    (dmin != f32::MAX).then_some(dmin)
}

/// Vertical distance from point p to the triangle (a, b, c), or `None` if the
/// point lies outside the triangle on the xz-plane.
fn dist_point_triangle(p: Vec3A, a: Vec3A, b: Vec3A, c: Vec3A) -> Option<f32> {
    let v0 = c - a;
    let v1 = b - a;
    let v2 = p - a;

    let dot00 = v0.x * v0.x + v0.z * v0.z;
    let dot01 = v0.x * v1.x + v0.z * v1.z;
    let dot02 = v0.x * v2.x + v0.z * v2.z;
    let dot11 = v1.x * v1.x + v1.z * v1.z;
    let dot12 = v1.x * v2.x + v1.z * v2.z;

    // Compute barycentric coordinates.
    let inv_denom = 1.0 / (dot00 * dot11 - dot01 * dot01);
    let u = (dot11 * dot02 - dot01 * dot12) * inv_denom;
    let v = (dot00 * dot12 - dot01 * dot02) * inv_denom;

    // If the point lies inside the triangle, return the interpolated
    // y-distance.
    const EPS: f32 = 1.0e-4;
    if u >= -EPS && v >= -EPS && (u + v) <= 1.0 + EPS {
        let y = a.y + v0.y * u + v1.y * v;
        Some((y - p.y).abs())
    } else {
        None
    }
}

fn jitter_x(i: usize) -> f32 {
    (((i.wrapping_mul(0x8da6b343)) & 0xffff) as f32 / 65535.0 * 2.0) - 1.0
}

fn jitter_z(i: usize) -> f32 {
    (((i.wrapping_mul(0xd8163841)) & 0xffff) as f32 / 65535.0 * 2.0) - 1.0
}

fn prev(i: usize, n: usize) -> usize {
    (i + n - 1) % n
}

fn next(i: usize, n: usize) -> usize {
    (i + 1) % n
}

#[cfg(test)]
mod tests {
    use glam::{UVec3, Vec3A};

    use crate::{
        contour::BuildContoursFlags, geometry::TriMesh, heightfield::HeightfieldBuilder,
    };

    use super::*;

    fn detail_plane(sample_distance: f32) -> (PolygonMesh, DetailMesh) {
        let size = 10.0;
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
        let contours = compact.build_contours(1.3, 0, BuildContoursFlags::default());
        let poly_mesh = contours.into_polygon_mesh(6).unwrap();
        let detail = DetailMesh::new(&poly_mesh, &compact, sample_distance, 0.2).unwrap();
        (poly_mesh, detail)
    }

    #[test]
    fn every_polygon_gets_a_submesh() {
        let (poly_mesh, detail) = detail_plane(3.0);
        assert_eq!(detail.meshes.len(), poly_mesh.polygon_count());
        for submesh in &detail.meshes {
            assert!(submesh.vertex_count >= 3);
            assert!(submesh.triangle_count >= 1);
        }
    }

    #[test]
    fn detail_vertices_sit_on_the_surface() {
        let (_poly_mesh, detail) = detail_plane(3.0);
        for vertex in &detail.vertices {
            // The plane sits at y = 0.1, quantized up to a span top of 0.2,
            // plus the cell height offset.
            assert!(vertex.y > 0.0 && vertex.y < 1.0, "bad height {}", vertex.y);
        }
    }

    #[test]
    fn zero_sample_distance_keeps_polygon_corners_only() {
        let (poly_mesh, detail) = detail_plane(0.0);
        let submesh = &detail.meshes[0];
        assert_eq!(submesh.vertex_count, poly_mesh.polygon_vertex_count(0));
    }

    #[test]
    fn circum_circle_of_a_right_triangle() {
        let a = Vec3A::new(0.0, 0.0, 0.0);
        let b = Vec3A::new(2.0, 0.0, 0.0);
        let c = Vec3A::new(0.0, 0.0, 2.0);
        let (center, radius) = circum_circle(a, b, c);
        approx::assert_relative_eq!(center.x, 1.0, epsilon = 1.0e-5);
        approx::assert_relative_eq!(center.z, 1.0, epsilon = 1.0e-5);
        approx::assert_relative_eq!(radius, 2.0_f32.sqrt(), epsilon = 1.0e-5);
    }
}
