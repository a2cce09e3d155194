//! Tiled navigation mesh construction and persistence.
//!
//! The build pipeline turns a triangle soup into a navmesh tile in strictly
//! forward-flowing stages: rasterization into a [`Heightfield`], span
//! filtering, compaction into a [`CompactHeightfield`], watershed region
//! partitioning, contour tracing into a [`ContourSet`], polygonization into a
//! [`PolygonMesh`], height detail sampling into a [`DetailMesh`], and finally
//! assembly into a self-contained [`NavmeshTile`]. Tiles live in a [`NavMesh`]
//! container that can be persisted as a tile set file and loaded back.
//!
//! [`build_navmesh`] runs the whole pipeline in one call; the individual
//! stages are exposed for callers that want to customize steps in between.

mod area;
mod build;
mod compact_cell;
mod compact_heightfield;
mod compact_span;
mod config;
mod contour;
mod detail_mesh;
mod distance_field;
mod erosion;
mod filter;
mod geometry;
mod heightfield;
mod io;
pub(crate) mod math;
mod nav_mesh;
mod poly_mesh;
mod rasterize;
mod region;
mod regions;
mod span;
mod tile;

pub use area::ConvexVolume;
pub use build::{
    BuildError, POLY_FLAG_WALK, apply_walkable_flags, build_navmesh, build_navmesh_tile,
    build_navmesh_to_file,
};
pub use compact_cell::CompactCell;
pub use compact_heightfield::{CompactHeightfield, CompactHeightfieldError};
pub use compact_span::CompactSpan;
pub use config::{NavmeshConfig, NavmeshConfigBuilder};
pub use contour::{BuildContoursFlags, Contour, ContourSet, ContourVertex, RegionVertexId};
pub use detail_mesh::{DetailMesh, DetailMeshError, SubMesh};
pub use geometry::{NavMeshInput, OffMeshConnectionInput, TriMesh};
pub use heightfield::{
    Heightfield, HeightfieldBuilder, HeightfieldBuilderError, SpanInsertionError,
};
pub use io::{
    SET_MAGIC, SET_VERSION, TileFileError, load_nav_mesh, nav_mesh_from_bytes, nav_mesh_to_bytes,
    save_nav_mesh,
};
pub use math::Aabb3d;
pub use nav_mesh::{AddTileError, NavMesh, NavMeshParams, TileRef, release_all};
pub use poly_mesh::{MESH_NULL_IDX, PolyMeshError, PolygonMesh};
pub use rasterize::RasterizationError;
pub use region::RegionId;
pub use regions::RegionBuildError;
pub use span::{AreaType, Span, SpanKey, Spans};
pub use tile::{
    BvNode, NavmeshTile, PolygonType, TILE_MAGIC, TILE_VERSION, TileAgentParams, TileBuildError,
    TileDecodeError, TileDetail, TileLocation, TileOffMeshConnection, TilePolygon,
    VERTS_PER_POLYGON,
};
