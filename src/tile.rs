//! Packs a [`PolygonMesh`] and its [`DetailMesh`] into a self-contained
//! navmesh tile and defines the tile byte layout.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::{U16Vec3, Vec3A, u16vec3};

use crate::{
    detail_mesh::DetailMesh,
    geometry::OffMeshConnectionInput,
    math::Aabb3d,
    poly_mesh::{MESH_NULL_IDX, PolygonMesh},
    span::AreaType,
};

/// Tile data magic: 'TNAV'.
pub const TILE_MAGIC: u32 =
    (b'T' as u32) << 24 | (b'N' as u32) << 16 | (b'A' as u32) << 8 | b'V' as u32;
/// Tile data format version.
pub const TILE_VERSION: u32 = 1;
/// The maximum number of vertices per navigation polygon.
pub const VERTS_PER_POLYGON: usize = 6;

/// What a tile polygon represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum PolygonType {
    /// A polygon that is part of the walkable surface.
    #[default]
    Ground,
    /// A two-vertex off-mesh connection.
    OffMeshConnection,
}

/// A single navigation polygon inside a tile.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TilePolygon {
    /// Indices into the tile vertex pool. Unused slots are [`MESH_NULL_IDX`].
    pub vertices: [u16; VERTS_PER_POLYGON],
    /// Index of the neighbor polygon across each edge, [`MESH_NULL_IDX`] for
    /// boundary edges.
    pub neighbors: [u16; VERTS_PER_POLYGON],
    /// The user-defined flags of the polygon.
    pub flags: u16,
    /// The number of vertices actually used.
    pub vertex_count: u8,
    /// The area id of the polygon.
    pub area: AreaType,
    /// Whether this is a ground polygon or an off-mesh connection.
    pub polygon_type: PolygonType,
}

/// Vertex and triangle ranges of one polygon's detail surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TileDetail {
    /// Index of the first detail vertex.
    pub vertex_base: u32,
    /// Number of detail vertices.
    pub vertex_count: u32,
    /// Index of the first detail triangle.
    pub triangle_base: u32,
    /// Number of detail triangles.
    pub triangle_count: u32,
}

/// A node of the tile's bounding volume tree. Bounds are quantized to cell
/// units relative to the tile minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct BvNode {
    /// Minimum corner of the node AABB.
    pub min: U16Vec3,
    /// Maximum corner of the node AABB.
    pub max: U16Vec3,
    /// Polygon index for leaves, or the negated escape index for internal
    /// nodes.
    pub index: i32,
}

/// An off-mesh connection baked into a tile.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TileOffMeshConnection {
    /// The start position in world space.
    pub start: Vec3A,
    /// The end position in world space.
    pub end: Vec3A,
    /// The radius of the endpoints.
    pub radius: f32,
    /// Index of the two-vertex polygon representing this connection.
    pub polygon: u16,
    /// Whether the connection can be traversed in both directions.
    pub bidirectional: bool,
    /// An id handed back to the host unchanged.
    pub user_id: u32,
}

/// Everything the tile assembler consumes besides the meshes themselves.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TileLocation {
    /// The x-coordinate of the tile within the navmesh grid.
    pub x: i32,
    /// The y-coordinate of the tile within the navmesh grid.
    pub y: i32,
    /// The layer of the tile.
    pub layer: i32,
}

/// Agent parameters stored in the tile for runtime queries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileAgentParams {
    /// The walkable height in world units.
    pub walkable_height: f32,
    /// The walkable radius in world units.
    pub walkable_radius: f32,
    /// The walkable climb in world units.
    pub walkable_climb: f32,
}

/// A self-contained navigation mesh tile.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavmeshTile {
    /// The location of the tile within the navmesh grid.
    pub x: i32,
    /// The y-coordinate of the tile within the navmesh grid.
    pub y: i32,
    /// The layer of the tile.
    pub layer: i32,
    /// The bounds of the tile in world space.
    pub aabb: Aabb3d,
    /// The walkable height in world units.
    pub walkable_height: f32,
    /// The walkable radius in world units.
    pub walkable_radius: f32,
    /// The walkable climb in world units.
    pub walkable_climb: f32,
    /// The factor converting world units to bv-tree quantized units.
    pub bv_quant_factor: f32,
    /// The vertex pool in world space.
    pub vertices: Vec<Vec3A>,
    /// The polygons of the tile. Ground polygons come first, off-mesh
    /// connection polygons after them.
    pub polygons: Vec<TilePolygon>,
    /// Detail surface ranges, one per ground polygon.
    pub detail_meshes: Vec<TileDetail>,
    /// The detail vertex pool in world space.
    pub detail_vertices: Vec<Vec3A>,
    /// The detail triangles with their edge flags.
    pub detail_triangles: Vec<(U16Vec3, u8)>,
    /// Bounding volume tree over the ground polygons.
    pub bv_tree: Vec<BvNode>,
    /// The off-mesh connections of the tile.
    pub off_mesh_connections: Vec<TileOffMeshConnection>,
}

/// Errors that can occur when assembling a [`NavmeshTile`].
#[derive(Debug, thiserror::Error)]
pub enum TileBuildError {
    /// The polygon mesh has no vertices.
    #[error("polygon mesh has no vertices")]
    NoVertices,
    /// The polygon mesh has no polygons.
    #[error("polygon mesh has no polygons")]
    NoPolygons,
    /// The polygon mesh has more vertices than tile indices can address.
    #[error("mesh has {vertex_count} vertices, the limit is 0xffff")]
    TooManyVertices {
        /// The offending vertex count.
        vertex_count: usize,
    },
    /// Polygons are wider than the tile polygon record.
    #[error("mesh allows {vertices_per_polygon} vertices per polygon, the tile limit is {VERTS_PER_POLYGON}")]
    TooManyVerticesPerPolygon {
        /// The configured polygon width.
        vertices_per_polygon: usize,
    },
}

/// Errors that can occur when decoding tile bytes.
#[derive(Debug, thiserror::Error)]
pub enum TileDecodeError {
    /// The buffer does not start with the tile magic.
    #[error("bad tile magic {found:#010x}, expected {TILE_MAGIC:#010x}")]
    BadMagic {
        /// The magic found in the buffer.
        found: u32,
    },
    /// The tile was written by an unsupported format version.
    #[error("unsupported tile version {found}, expected {TILE_VERSION}")]
    UnsupportedVersion {
        /// The version found in the buffer.
        found: u32,
    },
    /// The buffer ended prematurely or could not be read.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl NavmeshTile {
    /// Assembles a tile from a polygon mesh, its detail mesh, and the
    /// off-mesh connections whose start point falls inside the mesh bounds.
    ///
    /// Polygon flags are taken from the polygon mesh as-is; apply a flag
    /// policy such as [`apply_walkable_flags`](crate::apply_walkable_flags)
    /// beforehand.
    pub fn new(
        poly_mesh: &PolygonMesh,
        detail_mesh: &DetailMesh,
        off_mesh_connections: &[OffMeshConnectionInput],
        location: TileLocation,
        agent: TileAgentParams,
    ) -> Result<Self, TileBuildError> {
        if poly_mesh.vertices.is_empty() {
            return Err(TileBuildError::NoVertices);
        }
        if poly_mesh.polygon_count() == 0 {
            return Err(TileBuildError::NoPolygons);
        }
        if poly_mesh.vertices.len() >= MESH_NULL_IDX as usize {
            return Err(TileBuildError::TooManyVertices {
                vertex_count: poly_mesh.vertices.len(),
            });
        }
        if poly_mesh.vertices_per_polygon > VERTS_PER_POLYGON {
            return Err(TileBuildError::TooManyVerticesPerPolygon {
                vertices_per_polygon: poly_mesh.vertices_per_polygon,
            });
        }

        let cell_size = poly_mesh.cell_size;
        let cell_height = poly_mesh.cell_height;
        let origin = poly_mesh.aabb.min;

        // Only keep connections whose start point lands inside this tile.
        let connections: Vec<&OffMeshConnectionInput> = off_mesh_connections
            .iter()
            .filter(|connection| {
                let start = Vec3A::from(connection.start);
                start.x >= poly_mesh.aabb.min.x
                    && start.x <= poly_mesh.aabb.max.x
                    && start.z >= poly_mesh.aabb.min.z
                    && start.z <= poly_mesh.aabb.max.z
            })
            .collect();

        let base_polygon_count = poly_mesh.polygon_count();
        let vertex_count = poly_mesh.vertices.len() + connections.len() * 2;
        if vertex_count >= MESH_NULL_IDX as usize {
            return Err(TileBuildError::TooManyVertices { vertex_count });
        }

        // Dequantize the vertex pool to world space.
        let mut vertices: Vec<Vec3A> = poly_mesh
            .vertices
            .iter()
            .map(|v| {
                origin
                    + Vec3A::new(
                        v.x as f32 * cell_size,
                        v.y as f32 * cell_height,
                        v.z as f32 * cell_size,
                    )
            })
            .collect();

        let mut polygons = Vec::with_capacity(base_polygon_count + connections.len());
        for i in 0..base_polygon_count {
            let mut polygon = TilePolygon {
                vertices: [MESH_NULL_IDX; VERTS_PER_POLYGON],
                neighbors: [MESH_NULL_IDX; VERTS_PER_POLYGON],
                flags: poly_mesh.flags[i],
                vertex_count: poly_mesh.polygon_vertex_count(i) as u8,
                area: poly_mesh.areas[i],
                polygon_type: PolygonType::Ground,
            };
            let source_vertices = poly_mesh.polygon_vertices(i);
            let source_neighbors = poly_mesh.polygon_neighbors(i);
            for j in 0..poly_mesh.vertices_per_polygon {
                polygon.vertices[j] = source_vertices[j];
                polygon.neighbors[j] = source_neighbors[j];
            }
            polygons.push(polygon);
        }

        // Off-mesh connections become two-vertex polygons at the end of the
        // polygon list, with their endpoints appended to the vertex pool.
        let mut tile_connections = Vec::with_capacity(connections.len());
        for connection in &connections {
            let first_vertex = vertices.len() as u16;
            vertices.push(Vec3A::from(connection.start));
            vertices.push(Vec3A::from(connection.end));

            let mut polygon_vertices = [MESH_NULL_IDX; VERTS_PER_POLYGON];
            polygon_vertices[0] = first_vertex;
            polygon_vertices[1] = first_vertex + 1;
            let polygon_index = polygons.len() as u16;
            polygons.push(TilePolygon {
                vertices: polygon_vertices,
                neighbors: [MESH_NULL_IDX; VERTS_PER_POLYGON],
                flags: connection.flags,
                vertex_count: 2,
                area: connection.area,
                polygon_type: PolygonType::OffMeshConnection,
            });
            tile_connections.push(TileOffMeshConnection {
                start: Vec3A::from(connection.start),
                end: Vec3A::from(connection.end),
                radius: connection.radius,
                polygon: polygon_index,
                bidirectional: connection.bidirectional,
                user_id: connection.user_id,
            });
        }

        let detail_meshes = detail_mesh
            .meshes
            .iter()
            .map(|submesh| TileDetail {
                vertex_base: submesh.first_vertex_index as u32,
                vertex_count: submesh.vertex_count as u32,
                triangle_base: submesh.first_triangle_index as u32,
                triangle_count: submesh.triangle_count as u32,
            })
            .collect();

        let bv_tree = build_bv_tree(poly_mesh);

        Ok(NavmeshTile {
            x: location.x,
            y: location.y,
            layer: location.layer,
            aabb: poly_mesh.aabb,
            walkable_height: agent.walkable_height,
            walkable_radius: agent.walkable_radius,
            walkable_climb: agent.walkable_climb,
            bv_quant_factor: 1.0 / cell_size,
            vertices,
            polygons,
            detail_meshes,
            detail_vertices: detail_mesh.vertices.clone(),
            detail_triangles: detail_mesh.triangles.clone(),
            bv_tree,
            off_mesh_connections: tile_connections,
        })
    }

    /// Number of polygons in the tile, including off-mesh connections.
    #[inline]
    pub fn polygon_count(&self) -> usize {
        self.polygons.len()
    }

    /// World-space vertices of polygon `i`.
    pub fn polygon_world_vertices(&self, i: usize) -> Vec<Vec3A> {
        let polygon = &self.polygons[i];
        polygon.vertices[..polygon.vertex_count as usize]
            .iter()
            .map(|&v| self.vertices[v as usize])
            .collect()
    }

    /// Indices of the ground polygons whose quantized bounds overlap the
    /// given world-space AABB, found through the bv-tree.
    pub fn query_polygons(&self, aabb: &Aabb3d) -> Vec<u16> {
        let mut results = Vec::new();
        if self.bv_tree.is_empty() {
            return results;
        }
        let quantize = |point: Vec3A, round_up: bool| -> U16Vec3 {
            let relative = (point - self.aabb.min).max(Vec3A::ZERO) * self.bv_quant_factor;
            let offset = if round_up { 1.0 } else { 0.0 };
            u16vec3(
                (relative.x + offset).min(u16::MAX as f32) as u16,
                (relative.y + offset).min(u16::MAX as f32) as u16,
                (relative.z + offset).min(u16::MAX as f32) as u16,
            )
        };
        let query_min = quantize(aabb.min, false);
        let query_max = quantize(aabb.max, true);

        let mut node_index = 0;
        while node_index < self.bv_tree.len() {
            let node = &self.bv_tree[node_index];
            let overlap = query_min.x <= node.max.x
                && query_max.x >= node.min.x
                && query_min.y <= node.max.y
                && query_max.y >= node.min.y
                && query_min.z <= node.max.z
                && query_max.z >= node.min.z;
            let is_leaf = node.index >= 0;
            if overlap && is_leaf {
                results.push(node.index as u16);
            }
            if overlap || is_leaf {
                node_index += 1;
            } else {
                node_index = (-node.index) as usize;
            }
        }
        results
    }

    /// Serializes the tile into its byte layout.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let w = &mut buffer;
        w.write_u32::<LittleEndian>(TILE_MAGIC)?;
        w.write_u32::<LittleEndian>(TILE_VERSION)?;
        w.write_i32::<LittleEndian>(self.x)?;
        w.write_i32::<LittleEndian>(self.y)?;
        w.write_i32::<LittleEndian>(self.layer)?;
        w.write_u32::<LittleEndian>(self.vertices.len() as u32)?;
        w.write_u32::<LittleEndian>(self.polygons.len() as u32)?;
        w.write_u32::<LittleEndian>(self.detail_meshes.len() as u32)?;
        w.write_u32::<LittleEndian>(self.detail_vertices.len() as u32)?;
        w.write_u32::<LittleEndian>(self.detail_triangles.len() as u32)?;
        w.write_u32::<LittleEndian>(self.bv_tree.len() as u32)?;
        w.write_u32::<LittleEndian>(self.off_mesh_connections.len() as u32)?;
        w.write_f32::<LittleEndian>(self.walkable_height)?;
        w.write_f32::<LittleEndian>(self.walkable_radius)?;
        w.write_f32::<LittleEndian>(self.walkable_climb)?;
        write_vec3(w, self.aabb.min)?;
        write_vec3(w, self.aabb.max)?;
        w.write_f32::<LittleEndian>(self.bv_quant_factor)?;

        for vertex in &self.vertices {
            write_vec3(w, *vertex)?;
        }
        for polygon in &self.polygons {
            for &v in &polygon.vertices {
                w.write_u16::<LittleEndian>(v)?;
            }
            for &n in &polygon.neighbors {
                w.write_u16::<LittleEndian>(n)?;
            }
            w.write_u16::<LittleEndian>(polygon.flags)?;
            w.write_u8(polygon.vertex_count)?;
            w.write_u8(polygon.area.0)?;
            w.write_u8(match polygon.polygon_type {
                PolygonType::Ground => 0,
                PolygonType::OffMeshConnection => 1,
            })?;
        }
        for detail in &self.detail_meshes {
            w.write_u32::<LittleEndian>(detail.vertex_base)?;
            w.write_u32::<LittleEndian>(detail.vertex_count)?;
            w.write_u32::<LittleEndian>(detail.triangle_base)?;
            w.write_u32::<LittleEndian>(detail.triangle_count)?;
        }
        for vertex in &self.detail_vertices {
            write_vec3(w, *vertex)?;
        }
        for (triangle, flags) in &self.detail_triangles {
            w.write_u16::<LittleEndian>(triangle.x)?;
            w.write_u16::<LittleEndian>(triangle.y)?;
            w.write_u16::<LittleEndian>(triangle.z)?;
            w.write_u8(*flags)?;
        }
        for node in &self.bv_tree {
            w.write_u16::<LittleEndian>(node.min.x)?;
            w.write_u16::<LittleEndian>(node.min.y)?;
            w.write_u16::<LittleEndian>(node.min.z)?;
            w.write_u16::<LittleEndian>(node.max.x)?;
            w.write_u16::<LittleEndian>(node.max.y)?;
            w.write_u16::<LittleEndian>(node.max.z)?;
            w.write_i32::<LittleEndian>(node.index)?;
        }
        for connection in &self.off_mesh_connections {
            write_vec3(w, connection.start)?;
            write_vec3(w, connection.end)?;
            w.write_f32::<LittleEndian>(connection.radius)?;
            w.write_u16::<LittleEndian>(connection.polygon)?;
            w.write_u8(connection.bidirectional as u8)?;
            w.write_u32::<LittleEndian>(connection.user_id)?;
        }
        Ok(buffer)
    }

    /// Decodes a tile from its byte layout.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TileDecodeError> {
        let r = &mut io::Cursor::new(bytes);
        let magic = r.read_u32::<LittleEndian>()?;
        if magic != TILE_MAGIC {
            return Err(TileDecodeError::BadMagic { found: magic });
        }
        let version = r.read_u32::<LittleEndian>()?;
        if version != TILE_VERSION {
            return Err(TileDecodeError::UnsupportedVersion { found: version });
        }
        let x = r.read_i32::<LittleEndian>()?;
        let y = r.read_i32::<LittleEndian>()?;
        let layer = r.read_i32::<LittleEndian>()?;
        let vertex_count = r.read_u32::<LittleEndian>()? as usize;
        let polygon_count = r.read_u32::<LittleEndian>()? as usize;
        let detail_mesh_count = r.read_u32::<LittleEndian>()? as usize;
        let detail_vertex_count = r.read_u32::<LittleEndian>()? as usize;
        let detail_triangle_count = r.read_u32::<LittleEndian>()? as usize;
        let bv_node_count = r.read_u32::<LittleEndian>()? as usize;
        let connection_count = r.read_u32::<LittleEndian>()? as usize;
        let walkable_height = r.read_f32::<LittleEndian>()?;
        let walkable_radius = r.read_f32::<LittleEndian>()?;
        let walkable_climb = r.read_f32::<LittleEndian>()?;
        let aabb_min = read_vec3(r)?;
        let aabb_max = read_vec3(r)?;
        let bv_quant_factor = r.read_f32::<LittleEndian>()?;

        let mut vertices = Vec::with_capacity(vertex_count);
        for _ in 0..vertex_count {
            vertices.push(read_vec3(r)?);
        }
        let mut polygons = Vec::with_capacity(polygon_count);
        for _ in 0..polygon_count {
            let mut polygon_vertices = [0_u16; VERTS_PER_POLYGON];
            for v in &mut polygon_vertices {
                *v = r.read_u16::<LittleEndian>()?;
            }
            let mut neighbors = [0_u16; VERTS_PER_POLYGON];
            for n in &mut neighbors {
                *n = r.read_u16::<LittleEndian>()?;
            }
            let flags = r.read_u16::<LittleEndian>()?;
            let vertex_count = r.read_u8()?;
            let area = AreaType(r.read_u8()?);
            let polygon_type = match r.read_u8()? {
                0 => PolygonType::Ground,
                _ => PolygonType::OffMeshConnection,
            };
            polygons.push(TilePolygon {
                vertices: polygon_vertices,
                neighbors,
                flags,
                vertex_count,
                area,
                polygon_type,
            });
        }
        let mut detail_meshes = Vec::with_capacity(detail_mesh_count);
        for _ in 0..detail_mesh_count {
            detail_meshes.push(TileDetail {
                vertex_base: r.read_u32::<LittleEndian>()?,
                vertex_count: r.read_u32::<LittleEndian>()?,
                triangle_base: r.read_u32::<LittleEndian>()?,
                triangle_count: r.read_u32::<LittleEndian>()?,
            });
        }
        let mut detail_vertices = Vec::with_capacity(detail_vertex_count);
        for _ in 0..detail_vertex_count {
            detail_vertices.push(read_vec3(r)?);
        }
        let mut detail_triangles = Vec::with_capacity(detail_triangle_count);
        for _ in 0..detail_triangle_count {
            let a = r.read_u16::<LittleEndian>()?;
            let b = r.read_u16::<LittleEndian>()?;
            let c = r.read_u16::<LittleEndian>()?;
            let flags = r.read_u8()?;
            detail_triangles.push((u16vec3(a, b, c), flags));
        }
        let mut bv_tree = Vec::with_capacity(bv_node_count);
        for _ in 0..bv_node_count {
            let min_x = r.read_u16::<LittleEndian>()?;
            let min_y = r.read_u16::<LittleEndian>()?;
            let min_z = r.read_u16::<LittleEndian>()?;
            let max_x = r.read_u16::<LittleEndian>()?;
            let max_y = r.read_u16::<LittleEndian>()?;
            let max_z = r.read_u16::<LittleEndian>()?;
            let index = r.read_i32::<LittleEndian>()?;
            bv_tree.push(BvNode {
                min: u16vec3(min_x, min_y, min_z),
                max: u16vec3(max_x, max_y, max_z),
                index,
            });
        }
        let mut off_mesh_connections = Vec::with_capacity(connection_count);
        for _ in 0..connection_count {
            let start = read_vec3(r)?;
            let end = read_vec3(r)?;
            let radius = r.read_f32::<LittleEndian>()?;
            let polygon = r.read_u16::<LittleEndian>()?;
            let bidirectional = r.read_u8()? != 0;
            let user_id = r.read_u32::<LittleEndian>()?;
            off_mesh_connections.push(TileOffMeshConnection {
                start,
                end,
                radius,
                polygon,
                bidirectional,
                user_id,
            });
        }

        Ok(NavmeshTile {
            x,
            y,
            layer,
            aabb: Aabb3d::from_min_max(aabb_min, aabb_max),
            walkable_height,
            walkable_radius,
            walkable_climb,
            bv_quant_factor,
            vertices,
            polygons,
            detail_meshes,
            detail_vertices,
            detail_triangles,
            bv_tree,
            off_mesh_connections,
        })
    }
}

fn write_vec3(w: &mut impl Write, v: Vec3A) -> io::Result<()> {
    w.write_f32::<LittleEndian>(v.x)?;
    w.write_f32::<LittleEndian>(v.y)?;
    w.write_f32::<LittleEndian>(v.z)?;
    Ok(())
}

fn read_vec3(r: &mut impl Read) -> io::Result<Vec3A> {
    let x = r.read_f32::<LittleEndian>()?;
    let y = r.read_f32::<LittleEndian>()?;
    let z = r.read_f32::<LittleEndian>()?;
    Ok(Vec3A::new(x, y, z))
}

#[derive(Debug, Clone, Copy)]
struct BvItem {
    min: U16Vec3,
    max: U16Vec3,
    polygon: u16,
}

/// Builds a bounding volume tree over the ground polygons, in cell units.
fn build_bv_tree(poly_mesh: &PolygonMesh) -> Vec<BvNode> {
    let mut items: Vec<BvItem> = (0..poly_mesh.polygon_count())
        .map(|i| {
            let mut min = u16vec3(u16::MAX, u16::MAX, u16::MAX);
            let mut max = U16Vec3::ZERO;
            for &v in poly_mesh.polygon_vertices(i) {
                if v == MESH_NULL_IDX {
                    break;
                }
                let vertex = poly_mesh.vertices[v as usize];
                min = min.min(vertex);
                max = max.max(vertex);
            }
            BvItem {
                min,
                max,
                polygon: i as u16,
            }
        })
        .collect();

    let mut nodes = Vec::with_capacity(items.len() * 2);
    subdivide(&mut items, 0, poly_mesh.polygon_count(), &mut nodes);
    nodes
}

fn item_bounds(items: &[BvItem], first: usize, last: usize) -> (U16Vec3, U16Vec3) {
    let mut min = items[first].min;
    let mut max = items[first].max;
    for item in &items[first + 1..last] {
        min = min.min(item.min);
        max = max.max(item.max);
    }
    (min, max)
}

fn subdivide(items: &mut [BvItem], first: usize, last: usize, nodes: &mut Vec<BvNode>) {
    let count = last - first;
    let current = nodes.len();

    if count == 1 {
        nodes.push(BvNode {
            min: items[first].min,
            max: items[first].max,
            index: items[first].polygon as i32,
        });
        return;
    }

    let (min, max) = item_bounds(items, first, last);
    nodes.push(BvNode {
        min,
        max,
        index: 0,
    });

    // Split along the longest axis.
    let extent = max - min;
    let axis = if extent.x >= extent.y && extent.x >= extent.z {
        0
    } else if extent.y >= extent.z {
        1
    } else {
        2
    };
    items[first..last].sort_by_key(|item| match axis {
        0 => item.min.x,
        1 => item.min.y,
        _ => item.min.z,
    });

    let split = first + count / 2;
    subdivide(items, first, split, nodes);
    subdivide(items, split, last, nodes);

    // Negative index stores the escape index of the subtree.
    let escape = nodes.len();
    nodes[current].index = -(escape as i32);
}

#[cfg(test)]
mod tests {
    use glam::{UVec3, Vec3};

    use crate::{
        contour::BuildContoursFlags, geometry::TriMesh, heightfield::HeightfieldBuilder,
        region::RegionId,
    };

    use super::*;

    fn plane_tile() -> NavmeshTile {
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
        let detail = DetailMesh::new(&poly_mesh, &compact, 3.0, 0.2).unwrap();

        let connection = OffMeshConnectionInput {
            start: Vec3::new(1.0, 0.3, 1.0),
            end: Vec3::new(4.0, 0.3, 4.0),
            radius: 0.5,
            bidirectional: true,
            area: AreaType::GROUND,
            flags: 1,
            user_id: 42,
        };
        NavmeshTile::new(
            &poly_mesh,
            &detail,
            &[connection],
            TileLocation::default(),
            TileAgentParams {
                walkable_height: 2.0,
                walkable_radius: 0.6,
                walkable_climb: 0.9,
            },
        )
        .unwrap()
    }

    #[test]
    fn off_mesh_connections_become_two_vertex_polygons() {
        let tile = plane_tile();
        let connection_polygon = &tile.polygons[tile.off_mesh_connections[0].polygon as usize];
        assert_eq!(connection_polygon.vertex_count, 2);
        assert_eq!(connection_polygon.polygon_type, PolygonType::OffMeshConnection);
        assert_eq!(tile.off_mesh_connections[0].user_id, 42);
        // Both endpoint vertices are in the pool.
        let vertices = tile.polygon_world_vertices(tile.off_mesh_connections[0].polygon as usize);
        assert_eq!(vertices[0], Vec3A::new(1.0, 0.3, 1.0));
        assert_eq!(vertices[1], Vec3A::new(4.0, 0.3, 4.0));
    }

    #[test]
    fn tile_bytes_round_trip() {
        let tile = plane_tile();
        let bytes = tile.to_bytes().unwrap();
        let decoded = NavmeshTile::from_bytes(&bytes).unwrap();
        assert_eq!(tile, decoded);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let tile = plane_tile();
        let mut bytes = tile.to_bytes().unwrap();
        bytes[0] ^= 0xff;
        assert!(matches!(
            NavmeshTile::from_bytes(&bytes),
            Err(TileDecodeError::BadMagic { .. })
        ));
    }

    #[test]
    fn oversized_vertex_pools_are_rejected() {
        let agent = TileAgentParams {
            walkable_height: 2.0,
            walkable_radius: 0.6,
            walkable_climb: 0.9,
        };
        let one_triangle = |vertex_count: usize| {
            let mut polygons = vec![MESH_NULL_IDX; VERTS_PER_POLYGON * 2];
            polygons[0] = 0;
            polygons[1] = 1;
            polygons[2] = 2;
            PolygonMesh {
                vertices: vec![U16Vec3::ZERO; vertex_count],
                polygons,
                regions: vec![RegionId(1)],
                flags: vec![1],
                areas: vec![AreaType::GROUND],
                vertices_per_polygon: VERTS_PER_POLYGON,
                aabb: Aabb3d::from_min_max(Vec3A::ZERO, Vec3A::ONE),
                cell_size: 0.3,
                cell_height: 0.2,
                border_size: 0,
                max_edge_error: 1.3,
            }
        };
        let empty_detail = DetailMesh {
            meshes: Vec::new(),
            vertices: Vec::new(),
            triangles: Vec::new(),
        };

        // Vertex pool alone at the index limit.
        assert!(matches!(
            NavmeshTile::new(
                &one_triangle(0x10000),
                &empty_detail,
                &[],
                TileLocation::default(),
                agent,
            ),
            Err(TileBuildError::TooManyVertices { .. })
        ));

        // Just below the limit, but the connection endpoints push it over.
        let connection = OffMeshConnectionInput {
            start: Vec3::new(0.5, 0.5, 0.5),
            end: Vec3::new(0.8, 0.5, 0.8),
            radius: 0.5,
            bidirectional: true,
            area: AreaType::GROUND,
            flags: 1,
            user_id: 0,
        };
        assert!(matches!(
            NavmeshTile::new(
                &one_triangle(0xfffe),
                &empty_detail,
                &[connection],
                TileLocation::default(),
                agent,
            ),
            Err(TileBuildError::TooManyVertices { .. })
        ));
    }

    #[test]
    fn bv_tree_query_finds_the_polygon() {
        let tile = plane_tile();
        let hits = tile.query_polygons(&Aabb3d::from_min_max(
            Vec3A::new(4.0, 0.0, 4.0),
            Vec3A::new(6.0, 1.0, 6.0),
        ));
        assert!(!hits.is_empty());
        let miss = tile.query_polygons(&Aabb3d::from_min_max(
            Vec3A::new(50.0, 0.0, 50.0),
            Vec3A::new(60.0, 1.0, 60.0),
        ));
        assert!(miss.is_empty());
    }
}
