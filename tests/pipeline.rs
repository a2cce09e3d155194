//! End-to-end pipeline behavior: determinism, persistence round-trips, and
//! failure handling.

use std::{env, fs, path::PathBuf, process};

use anyhow::Result;
use glam::{UVec3, Vec3, Vec3A};
use tilecast::{
    Aabb3d, AreaType, BuildError, NavMeshInput, NavmeshConfig, NavmeshConfigBuilder,
    OffMeshConnectionInput, POLY_FLAG_WALK, TileFileError, TriMesh, build_navmesh,
    build_navmesh_tile, build_navmesh_to_file, load_nav_mesh, nav_mesh_from_bytes, release_all,
    save_nav_mesh,
};

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
        // Disable edge splitting so the plane collapses into as few polygons
        // as possible.
        edge_max_len: 0.0,
        ..Default::default()
    }
    .build();
    (input, config)
}

fn temp_file(name: &str) -> PathBuf {
    env::temp_dir().join(format!("tilecast_{}_{name}", process::id()))
}

#[test]
fn flat_plane_produces_one_walkable_polygon() -> Result<()> {
    let (input, config) = plane_input(10.0);
    let tile = build_navmesh_tile(input, &config)?;
    assert_eq!(tile.polygon_count(), 1);
    assert_eq!(tile.polygons[0].area, AreaType::GROUND);
    assert_eq!(tile.polygons[0].flags, POLY_FLAG_WALK);
    assert!(!tile.to_bytes()?.is_empty());
    Ok(())
}

#[test]
fn repeated_builds_are_byte_identical() -> Result<()> {
    let (input, config) = plane_input(12.0);
    let first = build_navmesh_tile(input.clone(), &config)?.to_bytes()?;
    let second = build_navmesh_tile(input, &config)?.to_bytes()?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn saved_navmesh_loads_back_unchanged() -> Result<()> {
    let (mut input, config) = plane_input(10.0);
    input.off_mesh_connections.push(OffMeshConnectionInput {
        start: Vec3::new(2.0, 0.3, 2.0),
        end: Vec3::new(7.0, 0.3, 7.0),
        radius: 0.5,
        bidirectional: true,
        area: AreaType::GROUND,
        flags: POLY_FLAG_WALK,
        user_id: 7,
    });
    let nav_mesh = build_navmesh(input, &config)?;

    let path = temp_file("round_trip.bin");
    save_nav_mesh(&nav_mesh, &path)?;
    let loaded = load_nav_mesh(&path)?;
    fs::remove_file(&path)?;

    assert_eq!(loaded.params(), nav_mesh.params());
    assert_eq!(loaded.tile_count(), nav_mesh.tile_count());
    assert_eq!(loaded.polygon_count(), nav_mesh.polygon_count());
    assert_eq!(loaded.bounds(), nav_mesh.bounds());
    for ((_, loaded_tile), (_, original_tile)) in loaded.tiles().zip(nav_mesh.tiles()) {
        assert_eq!(loaded_tile, original_tile);
    }
    Ok(())
}

#[test]
fn format_mismatch_fails_without_a_container() {
    let bytes = b"not a tile set at all".to_vec();
    assert!(matches!(
        nav_mesh_from_bytes(&bytes),
        Err(TileFileError::BadMagic { .. })
    ));
}

#[test]
fn failed_build_leaves_an_existing_file_untouched() -> Result<()> {
    let steep = NavMeshInput {
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

    let path = temp_file("untouched.bin");
    fs::write(&path, b"previous contents")?;
    let result = build_navmesh_to_file(steep, &config, &path);
    assert!(matches!(result, Err(BuildError::NoNavmeshData)));
    assert_eq!(fs::read(&path)?, b"previous contents");
    fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn release_all_empties_the_collection_idempotently() -> Result<()> {
    let (input, config) = plane_input(10.0);
    let mut nav_meshes = vec![build_navmesh(input, &config)?];
    release_all(&mut nav_meshes);
    assert!(nav_meshes.is_empty());
    release_all(&mut nav_meshes);
    assert!(nav_meshes.is_empty());
    Ok(())
}
