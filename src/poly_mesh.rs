//! Builds a convex polygon mesh from a [`ContourSet`].

use std::collections::HashMap;

use glam::U16Vec3;
use tracing::warn;

use crate::{contour::ContourSet, math::Aabb3d, region::RegionId, span::AreaType};

/// Index value that marks an unused polygon slot or a missing neighbor.
pub const MESH_NULL_IDX: u16 = 0xffff;

/// Represents a polygon mesh suitable for use in building a navigation mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonMesh {
    /// The mesh vertices in cell units.
    pub vertices: Vec<U16Vec3>,
    /// Polygon and neighbor data.
    /// Each polygon occupies `2 * vertices_per_polygon` entries: the first
    /// half holds vertex indices, the second half holds indices of the
    /// neighbor polygon across each edge. Unused entries are [`MESH_NULL_IDX`].
    pub polygons: Vec<u16>,
    /// The region id assigned to each polygon.
    pub regions: Vec<RegionId>,
    /// The flags assigned to each polygon.
    pub flags: Vec<u16>,
    /// The area id assigned to each polygon.
    pub areas: Vec<AreaType>,
    /// The maximum number of vertices per polygon.
    pub vertices_per_polygon: usize,
    /// The bounding box of the mesh in world space.
    pub aabb: Aabb3d,
    /// The size of each cell. (On the xz-plane.)
    pub cell_size: f32,
    /// The height of each cell. (The minimum increment along the y-axis.)
    pub cell_height: f32,
    /// The AABB border size used to generate the source data from which the mesh was derived.
    pub border_size: u16,
    /// The max error of the polygon edges in the mesh.
    pub max_edge_error: f32,
}

impl PolygonMesh {
    /// Number of polygons in the mesh.
    #[inline]
    pub fn polygon_count(&self) -> usize {
        if self.vertices_per_polygon == 0 {
            return 0;
        }
        self.polygons.len() / (self.vertices_per_polygon * 2)
    }

    /// Vertex indices of polygon `i`, including trailing [`MESH_NULL_IDX`] padding.
    #[inline]
    pub fn polygon_vertices(&self, i: usize) -> &[u16] {
        let stride = self.vertices_per_polygon * 2;
        &self.polygons[i * stride..i * stride + self.vertices_per_polygon]
    }

    /// Neighbor indices of polygon `i`, one per edge.
    #[inline]
    pub fn polygon_neighbors(&self, i: usize) -> &[u16] {
        let stride = self.vertices_per_polygon * 2;
        &self.polygons[i * stride + self.vertices_per_polygon..i * stride + stride]
    }

    /// Number of vertices actually used by polygon `i`.
    #[inline]
    pub fn polygon_vertex_count(&self, i: usize) -> usize {
        count_polygon_vertices(self.polygon_vertices(i))
    }
}

/// Errors that can occur when building a [`PolygonMesh`].
#[derive(Debug, thiserror::Error)]
pub enum PolyMeshError {
    /// The contour set produces more vertices than polygon indices can address.
    #[error("contour set produces up to {vertex_count} vertices, the limit is 0xfffe")]
    TooManyVertices {
        /// The upper bound on the vertex count.
        vertex_count: usize,
    },
    /// The contour set produces more polygons than a tile can address.
    #[error("mesh has {polygon_count} polygons, the limit is 0xffff")]
    TooManyPolygons {
        /// The resulting polygon count.
        polygon_count: usize,
    },
}

impl ContourSet {
    /// Builds a polygon mesh from the provided contours.
    ///
    /// Each contour is triangulated, then adjacent triangles are merged into
    /// convex polygons of up to `max_vertices_per_polygon` vertices, preferring
    /// merges across the longest shared edge.
    pub fn into_polygon_mesh(
        self,
        max_vertices_per_polygon: usize,
    ) -> Result<PolygonMesh, PolyMeshError> {
        let nvp = max_vertices_per_polygon.max(3);

        let mut max_vertices = 0_usize;
        let mut max_vertices_per_contour = 0_usize;
        for contour in &self.contours {
            if contour.vertices.len() < 3 {
                continue;
            }
            max_vertices += contour.vertices.len();
            max_vertices_per_contour = max_vertices_per_contour.max(contour.vertices.len());
        }
        if max_vertices >= 0xfffe {
            return Err(PolyMeshError::TooManyVertices {
                vertex_count: max_vertices,
            });
        }

        let mut mesh = PolygonMesh {
            vertices: Vec::with_capacity(max_vertices),
            polygons: Vec::new(),
            regions: Vec::new(),
            flags: Vec::new(),
            areas: Vec::new(),
            vertices_per_polygon: nvp,
            aabb: self.aabb,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            border_size: self.border_size,
            max_edge_error: self.max_error,
        };

        let mut vertex_buckets: HashMap<(u16, u16), Vec<u16>> = HashMap::new();
        let mut indices = Vec::with_capacity(max_vertices_per_contour);
        let mut triangles = Vec::with_capacity(max_vertices_per_contour);
        // Working polygons of the current contour, stride `nvp`.
        let mut polys: Vec<u16> = Vec::new();

        for contour in &self.contours {
            if contour.vertices.len() < 3 {
                continue;
            }

            // Triangulate the contour.
            indices.clear();
            indices.extend(0..contour.vertices.len() as u32);
            triangles.clear();
            let positions: Vec<U16Vec3> =
                contour.vertices.iter().map(|(point, _data)| *point).collect();
            if !triangulate(&positions, &mut indices, &mut triangles) {
                // Bad triangulation, should not happen for simple contours.
                warn!(
                    "partial triangulation of contour for region {}",
                    contour.region.0
                );
            }

            // Add and merge vertices.
            let remap: Vec<u16> = contour
                .vertices
                .iter()
                .map(|(point, _data)| add_vertex(*point, &mut mesh.vertices, &mut vertex_buckets))
                .collect();

            // Build initial polygons from the triangles.
            polys.clear();
            for triangle in &triangles {
                let [a, b, c] = *triangle;
                if a == b || a == c || b == c {
                    continue;
                }
                let mut poly = vec![MESH_NULL_IDX; nvp];
                poly[0] = remap[a as usize];
                poly[1] = remap[b as usize];
                poly[2] = remap[c as usize];
                polys.extend_from_slice(&poly);
            }
            if polys.is_empty() {
                continue;
            }

            // Merge polygons across their longest shared edge.
            if nvp > 3 {
                loop {
                    let mut best_merge_value = 0;
                    let mut best = None;

                    let polygon_count = polys.len() / nvp;
                    for j in 0..polygon_count.saturating_sub(1) {
                        for k in j + 1..polygon_count {
                            let pj = &polys[j * nvp..(j + 1) * nvp];
                            let pk = &polys[k * nvp..(k + 1) * nvp];
                            if let Some((value, edge_j, edge_k)) =
                                polygon_merge_value(pj, pk, &mesh.vertices, nvp)
                                && value > best_merge_value
                            {
                                best_merge_value = value;
                                best = Some((j, k, edge_j, edge_k));
                            }
                        }
                    }

                    let Some((j, k, edge_j, edge_k)) = best else {
                        // No more polygons to merge.
                        break;
                    };
                    let merged = merge_polygons(
                        &polys[j * nvp..(j + 1) * nvp],
                        &polys[k * nvp..(k + 1) * nvp],
                        edge_j,
                        edge_k,
                        nvp,
                    );
                    polys[j * nvp..(j + 1) * nvp].copy_from_slice(&merged);
                    // Fill the freed slot with the last polygon.
                    let last = polys.len() - nvp;
                    if k * nvp != last {
                        let (head, tail) = polys.split_at_mut(last);
                        head[k * nvp..(k + 1) * nvp].copy_from_slice(tail);
                    }
                    polys.truncate(last);
                }
            }

            // Store the polygons.
            for poly in polys.chunks_exact(nvp) {
                mesh.polygons.extend_from_slice(poly);
                mesh.polygons.extend_from_slice(&vec![MESH_NULL_IDX; nvp]);
                mesh.regions.push(contour.region);
                mesh.flags.push(0);
                mesh.areas.push(contour.area);
            }
        }

        let polygon_count = mesh.polygon_count();
        if polygon_count > MESH_NULL_IDX as usize {
            return Err(PolyMeshError::TooManyPolygons { polygon_count });
        }

        build_mesh_adjacency(&mut mesh.polygons, nvp);

        Ok(mesh)
    }
}

fn count_polygon_vertices(poly: &[u16]) -> usize {
    poly.iter()
        .position(|&v| v == MESH_NULL_IDX)
        .unwrap_or(poly.len())
}

fn add_vertex(
    vert: U16Vec3,
    vertices: &mut Vec<U16Vec3>,
    buckets: &mut HashMap<(u16, u16), Vec<u16>>,
) -> u16 {
    let bucket = buckets.entry((vert.x, vert.z)).or_default();
    for &i in bucket.iter() {
        let existing = vertices[i as usize];
        if (existing.y as i32 - vert.y as i32).abs() <= 2 {
            return i;
        }
    }
    let i = vertices.len() as u16;
    vertices.push(vert);
    bucket.push(i);
    i
}

/// Checks whether polygons `a` and `b` can be merged, and if so returns the
/// squared length of their shared edge along with the edge indices.
fn polygon_merge_value(
    a: &[u16],
    b: &[u16],
    vertices: &[U16Vec3],
    nvp: usize,
) -> Option<(i32, usize, usize)> {
    let na = count_polygon_vertices(a);
    let nb = count_polygon_vertices(b);

    // The merged polygon has to fit.
    if na + nb - 2 > nvp {
        return None;
    }

    // Check if the polygons share an edge.
    let mut edge_a = None;
    let mut edge_b = None;
    for i in 0..na {
        let va0 = a[i];
        let va1 = a[(i + 1) % na];
        for j in 0..nb {
            let vb0 = b[j];
            let vb1 = b[(j + 1) % nb];
            if va0 == vb1 && va1 == vb0 {
                edge_a = Some(i);
                edge_b = Some(j);
            }
        }
    }
    let edge_a = edge_a?;
    let edge_b = edge_b?;

    // Check that the merged polygon would be convex.
    let va = a[(edge_a + na - 1) % na];
    let vb = a[edge_a];
    let vc = b[(edge_b + 2) % nb];
    if !uleft(
        vertices[va as usize],
        vertices[vb as usize],
        vertices[vc as usize],
    ) {
        return None;
    }
    let va = b[(edge_b + nb - 1) % nb];
    let vb = b[edge_b];
    let vc = a[(edge_a + 2) % na];
    if !uleft(
        vertices[va as usize],
        vertices[vb as usize],
        vertices[vc as usize],
    ) {
        return None;
    }

    let va = vertices[a[edge_a] as usize];
    let vb = vertices[a[(edge_a + 1) % na] as usize];
    let dx = vb.x as i32 - va.x as i32;
    let dz = vb.z as i32 - va.z as i32;
    Some((dx * dx + dz * dz, edge_a, edge_b))
}

fn merge_polygons(a: &[u16], b: &[u16], edge_a: usize, edge_b: usize, nvp: usize) -> Vec<u16> {
    let na = count_polygon_vertices(a);
    let nb = count_polygon_vertices(b);
    let mut merged = vec![MESH_NULL_IDX; nvp];
    let mut n = 0;
    // Add polygon a, skipping the shared edge.
    for i in 0..na - 1 {
        merged[n] = a[(edge_a + 1 + i) % na];
        n += 1;
    }
    // Add polygon b, skipping the shared edge.
    for i in 0..nb - 1 {
        merged[n] = b[(edge_b + 1 + i) % nb];
        n += 1;
    }
    merged
}

/// Fills in the neighbor half of each polygon record by pairing up interior
/// edges shared by two polygons.
fn build_mesh_adjacency(polygons: &mut [u16], nvp: usize) {
    let stride = nvp * 2;
    let polygon_count = polygons.len() / stride;

    // First seen (polygon, edge) per undirected edge.
    let mut open_edges: HashMap<(u16, u16), (usize, usize)> = HashMap::new();
    for i in 0..polygon_count {
        let count = count_polygon_vertices(&polygons[i * stride..i * stride + nvp]);
        for j in 0..count {
            let v0 = polygons[i * stride + j];
            let v1 = polygons[i * stride + (j + 1) % count];
            let key = (v0.min(v1), v0.max(v1));
            if let Some((other_poly, other_edge)) = open_edges.remove(&key) {
                polygons[other_poly * stride + nvp + other_edge] = i as u16;
                polygons[i * stride + nvp + j] = other_poly as u16;
            } else {
                open_edges.insert(key, (i, j));
            }
        }
    }
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

fn uleft(a: U16Vec3, b: U16Vec3, c: U16Vec3) -> bool {
    area2(a, b, c) < 0
}

fn xorb(x: bool, y: bool) -> bool {
    x != y
}

fn intersect_prop(a: U16Vec3, b: U16Vec3, c: U16Vec3, d: U16Vec3) -> bool {
    if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
        return false;
    }
    xorb(left(a, b, c), left(a, b, d)) && xorb(left(c, d, a), left(c, d, b))
}

fn between(a: U16Vec3, b: U16Vec3, c: U16Vec3) -> bool {
    if !collinear(a, b, c) {
        return false;
    }
    if a.x != b.x {
        (a.x <= c.x && c.x <= b.x) || (a.x >= c.x && c.x >= b.x)
    } else {
        (a.z <= c.z && c.z <= b.z) || (a.z >= c.z && c.z >= b.z)
    }
}

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

const EAR_FLAG: u32 = 0x8000_0000;
const INDEX_MASK: u32 = 0x0fff_ffff;

fn vertex(verts: &[U16Vec3], indices: &[u32], i: usize) -> U16Vec3 {
    verts[(indices[i] & INDEX_MASK) as usize]
}

/// True iff (v_i, v_j) is a proper internal diagonal not intersecting the
/// polygon boundary.
fn diagonalie(i: usize, j: usize, verts: &[U16Vec3], indices: &[u32]) -> bool {
    let n = indices.len();
    let d0 = vertex(verts, indices, i);
    let d1 = vertex(verts, indices, j);

    // For each edge (k, k + 1) of the polygon.
    for k in 0..n {
        let k1 = next(k, n);
        // Skip edges incident to i or j.
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = vertex(verts, indices, k);
        let p1 = vertex(verts, indices, k1);
        if vequal(d0, p0) || vequal(d1, p0) || vequal(d0, p1) || vequal(d1, p1) {
            continue;
        }
        if intersect(d0, d1, p0, p1) {
            return false;
        }
    }
    true
}

/// True iff the diagonal (v_i, v_j) is strictly internal to the polygon in
/// the neighborhood of the i endpoint.
fn in_cone(i: usize, j: usize, verts: &[U16Vec3], indices: &[u32]) -> bool {
    let n = indices.len();
    let pi = vertex(verts, indices, i);
    let pj = vertex(verts, indices, j);
    let pi1 = vertex(verts, indices, next(i, n));
    let pin1 = vertex(verts, indices, prev(i, n));

    // If P[i] is a convex vertex [i + 1 left or on (i - 1, i)].
    if left_on(pin1, pi, pi1) {
        return left(pi, pj, pin1) && left(pj, pi, pi1);
    }
    // Assume (i - 1, i, i + 1) not collinear. P[i] is reflex.
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

fn diagonal(i: usize, j: usize, verts: &[U16Vec3], indices: &[u32]) -> bool {
    in_cone(i, j, verts, indices) && diagonalie(i, j, verts, indices)
}

fn diagonalie_loose(i: usize, j: usize, verts: &[U16Vec3], indices: &[u32]) -> bool {
    let n = indices.len();
    let d0 = vertex(verts, indices, i);
    let d1 = vertex(verts, indices, j);

    for k in 0..n {
        let k1 = next(k, n);
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = vertex(verts, indices, k);
        let p1 = vertex(verts, indices, k1);
        if vequal(d0, p0) || vequal(d1, p0) || vequal(d0, p1) || vequal(d1, p1) {
            continue;
        }
        if intersect_prop(d0, d1, p0, p1) {
            return false;
        }
    }
    true
}

fn in_cone_loose(i: usize, j: usize, verts: &[U16Vec3], indices: &[u32]) -> bool {
    let n = indices.len();
    let pi = vertex(verts, indices, i);
    let pj = vertex(verts, indices, j);
    let pi1 = vertex(verts, indices, next(i, n));
    let pin1 = vertex(verts, indices, prev(i, n));

    if left_on(pin1, pi, pi1) {
        return left_on(pi, pj, pin1) && left_on(pj, pi, pi1);
    }
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

fn diagonal_loose(i: usize, j: usize, verts: &[U16Vec3], indices: &[u32]) -> bool {
    in_cone_loose(i, j, verts, indices) && diagonalie_loose(i, j, verts, indices)
}

/// Ear clipping triangulation. Returns `false` if the input was not a simple
/// polygon and only a partial triangulation could be produced.
fn triangulate(verts: &[U16Vec3], indices: &mut Vec<u32>, triangles: &mut Vec<[u16; 3]>) -> bool {
    // The last bit of the index is used to indicate if the vertex can be
    // removed as an ear.
    let mut n = indices.len();
    for i in 0..n {
        let i1 = next(i, n);
        let i2 = next(i1, n);
        if diagonal(i, i2, verts, indices) {
            indices[i1] |= EAR_FLAG;
        }
    }

    while n > 3 {
        let mut min_len = -1_i32;
        let mut min_index = None;
        for i in 0..n {
            let i1 = next(i, n);
            if indices[i1] & EAR_FLAG != 0 {
                let p0 = vertex(verts, indices, i);
                let p2 = vertex(verts, indices, next(i1, n));
                let dx = p2.x as i32 - p0.x as i32;
                let dz = p2.z as i32 - p0.z as i32;
                let len = dx * dx + dz * dz;
                if min_len < 0 || len < min_len {
                    min_len = len;
                    min_index = Some(i);
                }
            }
        }

        if min_index.is_none() {
            // The contour is messed up. This sometimes happens if the
            // contour simplification is too aggressive. Try to recover
            // with loose diagonal tests.
            for i in 0..n {
                let i1 = next(i, n);
                let i2 = next(i1, n);
                if diagonal_loose(i, i2, verts, indices) {
                    let p0 = vertex(verts, indices, i);
                    let p2 = vertex(verts, indices, i2);
                    let dx = p2.x as i32 - p0.x as i32;
                    let dz = p2.z as i32 - p0.z as i32;
                    let len = dx * dx + dz * dz;
                    if min_len < 0 || len < min_len {
                        min_len = len;
                        min_index = Some(i);
                    }
                }
            }
            if min_index.is_none() {
                return false;
            }
        }

        let i = min_index.unwrap();
        let i1 = next(i, n);
        let i2 = next(i1, n);

        triangles.push([
            (indices[i] & INDEX_MASK) as u16,
            (indices[i1] & INDEX_MASK) as u16,
            (indices[i2] & INDEX_MASK) as u16,
        ]);

        // Remove P[i1] by copying P[i1 + 1]..P[n - 1] left one index.
        indices.remove(i1);
        n -= 1;

        let i1 = if i1 >= n { 0 } else { i1 };
        let i = prev(i1, n);
        // Update diagonal flags.
        if diagonal(prev(i, n), i1, verts, indices) {
            indices[i] |= EAR_FLAG;
        } else {
            indices[i] &= INDEX_MASK;
        }
        if diagonal(i, next(i1, n), verts, indices) {
            indices[i1] |= EAR_FLAG;
        } else {
            indices[i1] &= INDEX_MASK;
        }
    }

    // Append the remaining triangle.
    triangles.push([
        (indices[0] & INDEX_MASK) as u16,
        (indices[1] & INDEX_MASK) as u16,
        (indices[2] & INDEX_MASK) as u16,
    ]);

    true
}

#[cfg(test)]
mod tests {
    use glam::{UVec3, Vec3A};

    use crate::{
        contour::BuildContoursFlags, geometry::TriMesh, heightfield::HeightfieldBuilder,
    };

    use super::*;

    #[test]
    fn triangulates_a_square() {
        let verts = vec![
            U16Vec3::new(0, 0, 0),
            U16Vec3::new(0, 0, 4),
            U16Vec3::new(4, 0, 4),
            U16Vec3::new(4, 0, 0),
        ];
        let mut indices = vec![0, 1, 2, 3];
        let mut triangles = Vec::new();
        assert!(triangulate(&verts, &mut indices, &mut triangles));
        assert_eq!(triangles.len(), 2);
    }

    #[test]
    fn merges_two_triangles_into_a_quad() {
        let vertices = vec![
            U16Vec3::new(0, 0, 0),
            U16Vec3::new(0, 0, 4),
            U16Vec3::new(4, 0, 4),
            U16Vec3::new(4, 0, 0),
        ];
        let a = [0_u16, 1, 2, MESH_NULL_IDX];
        let b = [0_u16, 2, 3, MESH_NULL_IDX];
        let (value, edge_a, edge_b) = polygon_merge_value(&a, &b, &vertices, 4).unwrap();
        assert!(value > 0);
        let merged = merge_polygons(&a, &b, edge_a, edge_b, 4);
        assert_eq!(count_polygon_vertices(&merged), 4);
    }

    #[test]
    fn flat_plane_meshes_into_one_polygon() {
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
        assert_eq!(poly_mesh.polygon_count(), 1);
        assert_eq!(poly_mesh.regions[0], RegionId(1));
        assert!(poly_mesh.areas[0].is_walkable());
        assert!(
            poly_mesh
                .polygon_neighbors(0)
                .iter()
                .all(|&neighbor| neighbor == MESH_NULL_IDX)
        );
    }
}
