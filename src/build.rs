//! End-to-end navmesh builds: geometry in, tiles or a tile set file out.

use std::path::Path;

use tracing::{debug, info};

use crate::{
    compact_heightfield::CompactHeightfieldError,
    config::NavmeshConfig,
    detail_mesh::{DetailMesh, DetailMeshError},
    geometry::NavMeshInput,
    heightfield::{HeightfieldBuilder, HeightfieldBuilderError},
    io::{TileFileError, save_nav_mesh},
    nav_mesh::{NavMesh, NavMeshParams},
    poly_mesh::{PolyMeshError, PolygonMesh},
    rasterize::RasterizationError,
    regions::RegionBuildError,
    span::AreaType,
    tile::{NavmeshTile, TileAgentParams, TileBuildError, TileLocation},
};

/// The polygon flag marking a normally walkable polygon.
pub const POLY_FLAG_WALK: u16 = 1;

/// Errors that can occur during a full navmesh build.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The heightfield could not be allocated.
    #[error(transparent)]
    Heightfield(#[from] HeightfieldBuilderError),
    /// The input triangles could not be rasterized.
    #[error(transparent)]
    Rasterization(#[from] RasterizationError),
    /// The heightfield could not be compacted.
    #[error(transparent)]
    Compaction(#[from] CompactHeightfieldError),
    /// The walkable surface could not be partitioned into regions.
    #[error(transparent)]
    Regions(#[from] RegionBuildError),
    /// The contours could not be converted into a polygon mesh.
    #[error(transparent)]
    PolyMesh(#[from] PolyMeshError),
    /// The detail mesh could not be built.
    #[error(transparent)]
    DetailMesh(#[from] DetailMeshError),
    /// The tile could not be assembled.
    #[error(transparent)]
    Tile(#[from] TileBuildError),
    /// The tile set file could not be written.
    #[error(transparent)]
    File(#[from] TileFileError),
    /// The build produced no walkable polygons, e.g. because all input
    /// triangles are steeper than the walkable slope angle.
    #[error("no navmesh data generated")]
    NoNavmeshData,
}

/// Reassigns area ids and flags on the polygon mesh before tile assembly.
///
/// Polygons that kept the default walkable area are moved to the ground area
/// and receive [`POLY_FLAG_WALK`]; polygons painted by convex volumes keep
/// their area and receive the walk flag as well.
pub fn apply_walkable_flags(mesh: &mut PolygonMesh) {
    for i in 0..mesh.areas.len() {
        if mesh.areas[i] == AreaType::DEFAULT_WALKABLE {
            mesh.areas[i] = AreaType::GROUND;
        }
        mesh.flags[i] = if mesh.areas[i] == AreaType::NOT_WALKABLE {
            0
        } else {
            POLY_FLAG_WALK
        };
    }
}

/// Runs the full build pipeline and assembles a single tile.
///
/// Each intermediate structure is consumed by the stage after it and dropped
/// as soon as the last borrow ends.
pub fn build_navmesh_tile(
    mut input: NavMeshInput,
    config: &NavmeshConfig,
) -> Result<NavmeshTile, BuildError> {
    input
        .trimesh
        .mark_walkable_triangles(config.walkable_slope_angle);

    let mut heightfield = HeightfieldBuilder {
        aabb: config.aabb,
        cell_size: config.cell_size,
        cell_height: config.cell_height,
    }
    .build()?;
    input
        .trimesh
        .rasterize_triangles(&mut heightfield, config.walkable_climb as u32)?;
    debug!(
        triangles = input.trimesh.indices.len(),
        width = heightfield.width,
        height = heightfield.height,
        "rasterized input geometry"
    );

    heightfield.filter_low_hanging_walkable_obstacles(config.walkable_climb);
    heightfield.filter_ledge_spans(config.walkable_height, config.walkable_climb);
    heightfield.filter_walkable_low_height_spans(config.walkable_height);

    let mut compact = heightfield.into_compact(config.walkable_height, config.walkable_climb)?;
    compact.erode_walkable_area(config.walkable_radius);
    for volume in &input.volumes {
        compact.mark_convex_poly_area(volume);
    }

    compact.build_distance_field();
    compact.build_regions(
        config.border_size,
        config.min_region_area,
        config.merge_region_area,
    )?;
    debug!(regions = compact.max_region.id(), "partitioned walkable surface");

    let contours = compact.build_contours(
        config.max_simplification_error,
        config.max_edge_len,
        config.contour_flags,
    );
    let mut poly_mesh = contours.into_polygon_mesh(config.max_vertices_per_polygon as usize)?;
    if poly_mesh.vertices.is_empty() || poly_mesh.polygon_count() == 0 {
        return Err(BuildError::NoNavmeshData);
    }
    apply_walkable_flags(&mut poly_mesh);
    debug!(
        polygons = poly_mesh.polygon_count(),
        vertices = poly_mesh.vertices.len(),
        "built polygon mesh"
    );

    let detail_mesh = DetailMesh::new(
        &poly_mesh,
        &compact,
        config.detail_sample_dist,
        config.detail_sample_max_error,
    )?;

    let tile = NavmeshTile::new(
        &poly_mesh,
        &detail_mesh,
        &input.off_mesh_connections,
        TileLocation::default(),
        TileAgentParams {
            walkable_height: config.walkable_height as f32 * config.cell_height,
            walkable_radius: config.walkable_radius as f32 * config.cell_size,
            walkable_climb: config.walkable_climb as f32 * config.cell_height,
        },
    )?;
    info!(
        polygons = tile.polygon_count(),
        off_mesh_connections = tile.off_mesh_connections.len(),
        "assembled navmesh tile"
    );
    Ok(tile)
}

/// Builds a single-tile [`NavMesh`] from the input geometry.
pub fn build_navmesh(input: NavMeshInput, config: &NavmeshConfig) -> Result<NavMesh, BuildError> {
    let tile = build_navmesh_tile(input, config)?;
    let mut nav_mesh = NavMesh::new(NavMeshParams {
        origin: config.aabb.min,
        tile_width: config.aabb.max.x - config.aabb.min.x,
        tile_height: config.aabb.max.z - config.aabb.min.z,
        max_tiles: 1,
        max_polys_per_tile: tile.polygon_count() as u32,
    });
    nav_mesh
        .add_tile(tile)
        .map_err(TileFileError::AddTile)?;
    Ok(nav_mesh)
}

/// Builds a navmesh and persists it as a tile set file.
///
/// A failed build returns before touching the file system, so an existing
/// file at `path` stays intact.
pub fn build_navmesh_to_file(
    input: NavMeshInput,
    config: &NavmeshConfig,
    path: impl AsRef<Path>,
) -> Result<(), BuildError> {
    let nav_mesh = build_navmesh(input, config)?;
    save_nav_mesh(&nav_mesh, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use glam::{UVec3, Vec3A};

    use crate::{config::NavmeshConfigBuilder, geometry::TriMesh, math::Aabb3d};

    use super::*;

    fn plane_input(size: f32) -> (NavMeshInput, NavmeshConfig) {
        let input = NavMeshInput {
            trimesh: TriMesh::new(
                vec![
                    Vec3A::new(0.0, 0.1, 0.0),
                    Vec3A::new(size, 0.1, 0.0),
                    Vec3A::new(size, 0.1, size),
                    Vec3A::new(0.0, 0.1, size),
                ],
                vec![UVec3::new(0, 2, 1), UVec3::new(0, 3, 2)],
            ),
            ..Default::default()
        };
        let config = NavmeshConfigBuilder {
            aabb: Aabb3d::from_min_max(Vec3A::ZERO, Vec3A::new(size, 2.0, size)),
            ..Default::default()
        }
        .build();
        (input, config)
    }

    #[test]
    fn flat_plane_builds_a_walkable_tile() {
        let (input, config) = plane_input(10.0);
        let tile = build_navmesh_tile(input, &config).unwrap();
        assert!(tile.polygon_count() > 0);
        assert!(tile.polygons.iter().all(|p| p.flags == POLY_FLAG_WALK));
        assert!(tile.polygons.iter().all(|p| p.area == AreaType::GROUND));
    }

    #[test]
    fn steep_terrain_produces_no_navmesh_data() {
        let input = NavMeshInput {
            trimesh: TriMesh::new(
                vec![
                    Vec3A::new(0.0, 0.0, 0.0),
                    Vec3A::new(10.0, 25.0, 0.0),
                    Vec3A::new(10.0, 25.0, 10.0),
                ],
                vec![UVec3::new(0, 2, 1)],
            ),
            ..Default::default()
        };
        let config = NavmeshConfigBuilder {
            aabb: Aabb3d::from_min_max(Vec3A::ZERO, Vec3A::new(10.0, 26.0, 10.0)),
            ..Default::default()
        }
        .build();
        assert!(matches!(
            build_navmesh_tile(input, &config),
            Err(BuildError::NoNavmeshData)
        ));
    }
}
