//! A container holding assembled navmesh tiles for inspection and queries.

use glam::Vec3A;

use crate::{
    math::Aabb3d,
    tile::{NavmeshTile, TileDecodeError},
};

/// Configuration of a [`NavMesh`] tile grid.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavMeshParams {
    /// The world-space origin of the tile grid.
    pub origin: Vec3A,
    /// The width of each tile along the x-axis in world units.
    pub tile_width: f32,
    /// The height of each tile along the z-axis in world units.
    pub tile_height: f32,
    /// The maximum number of tiles the navmesh can hold.
    pub max_tiles: u32,
    /// The maximum number of polygons a single tile can hold.
    pub max_polys_per_tile: u32,
}

/// A reference to a tile inside a [`NavMesh`]. Stays valid until the tile is
/// removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TileRef(u32);

impl TileRef {
    /// The raw reference value. Nonzero for live references.
    #[inline]
    pub fn id(self) -> u32 {
        self.0
    }

    #[inline]
    fn from_slot(slot: usize) -> Self {
        Self(slot as u32 + 1)
    }

    #[inline]
    fn slot(self) -> usize {
        self.0 as usize - 1
    }
}

/// Errors that can occur when adding a tile to a [`NavMesh`].
#[derive(Debug, thiserror::Error)]
pub enum AddTileError {
    /// All tile slots are occupied.
    #[error("navmesh is full, all {max_tiles} tile slots are occupied")]
    NavMeshFull {
        /// The configured tile capacity.
        max_tiles: u32,
    },
    /// The tile has more polygons than the navmesh allows per tile.
    #[error("tile has {polygon_count} polygons, the limit is {max_polys_per_tile}")]
    TooManyPolygons {
        /// The polygon count of the offending tile.
        polygon_count: usize,
        /// The configured per-tile polygon capacity.
        max_polys_per_tile: u32,
    },
    /// The tile bytes could not be decoded.
    #[error(transparent)]
    Decode(#[from] TileDecodeError),
}

/// An in-memory navigation mesh assembled from tiles.
///
/// Tiles are owned by the navmesh; the navmesh itself is owned by the caller
/// and freed by dropping it. [`release_all`] releases a whole collection at
/// once.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavMesh {
    params: NavMeshParams,
    tiles: Vec<Option<NavmeshTile>>,
}

impl NavMesh {
    /// Creates an empty navmesh with the given grid parameters.
    pub fn new(params: NavMeshParams) -> Self {
        Self {
            tiles: Vec::new(),
            params,
        }
    }

    /// The grid parameters the navmesh was created with.
    #[inline]
    pub fn params(&self) -> &NavMeshParams {
        &self.params
    }

    /// Adds a decoded tile to the first free slot.
    pub fn add_tile(&mut self, tile: NavmeshTile) -> Result<TileRef, AddTileError> {
        if tile.polygon_count() > self.params.max_polys_per_tile as usize {
            return Err(AddTileError::TooManyPolygons {
                polygon_count: tile.polygon_count(),
                max_polys_per_tile: self.params.max_polys_per_tile,
            });
        }
        let slot = match self.tiles.iter().position(Option::is_none) {
            Some(free) => free,
            None => {
                if self.tiles.len() >= self.params.max_tiles as usize {
                    return Err(AddTileError::NavMeshFull {
                        max_tiles: self.params.max_tiles,
                    });
                }
                self.tiles.push(None);
                self.tiles.len() - 1
            }
        };
        self.tiles[slot] = Some(tile);
        Ok(TileRef::from_slot(slot))
    }

    /// Decodes tile bytes and adds the tile.
    pub fn add_tile_bytes(&mut self, bytes: &[u8]) -> Result<TileRef, AddTileError> {
        let tile = NavmeshTile::from_bytes(bytes)?;
        self.add_tile(tile)
    }

    /// Removes a tile, returning it if the reference was still live. Removing
    /// the same reference twice is a no-op the second time.
    pub fn remove_tile(&mut self, tile_ref: TileRef) -> Option<NavmeshTile> {
        self.tiles.get_mut(tile_ref.slot())?.take()
    }

    /// The tile behind a reference, if it is still live.
    pub fn tile(&self, tile_ref: TileRef) -> Option<&NavmeshTile> {
        self.tiles.get(tile_ref.slot())?.as_ref()
    }

    /// Iterates over the live tiles with their references.
    pub fn tiles(&self) -> impl Iterator<Item = (TileRef, &NavmeshTile)> {
        self.tiles
            .iter()
            .enumerate()
            .filter_map(|(slot, tile)| Some((TileRef::from_slot(slot), tile.as_ref()?)))
    }

    /// The number of live tiles.
    pub fn tile_count(&self) -> usize {
        self.tiles.iter().filter(|tile| tile.is_some()).count()
    }

    /// The total number of polygons across all live tiles, off-mesh
    /// connection polygons included.
    pub fn polygon_count(&self) -> usize {
        self.tiles()
            .map(|(_, tile)| tile.polygon_count())
            .sum()
    }

    /// The union of the bounds of all live tiles, or `None` when the navmesh
    /// is empty.
    pub fn bounds(&self) -> Option<Aabb3d> {
        self.tiles()
            .map(|(_, tile)| tile.aabb)
            .reduce(|a, b| a.union(&b))
    }
}

/// Drops every navmesh in the collection and leaves it empty. Calling this
/// again on the emptied collection is a no-op.
pub fn release_all(nav_meshes: &mut Vec<NavMesh>) {
    nav_meshes.clear();
}

#[cfg(test)]
mod tests {
    use glam::{U16Vec3, u16vec3};

    use crate::{
        span::AreaType,
        tile::{PolygonType, TilePolygon, VERTS_PER_POLYGON},
    };

    use super::*;

    fn params() -> NavMeshParams {
        NavMeshParams {
            origin: Vec3A::ZERO,
            tile_width: 10.0,
            tile_height: 10.0,
            max_tiles: 2,
            max_polys_per_tile: 16,
        }
    }

    fn dummy_tile(min: Vec3A) -> NavmeshTile {
        let triangle = TilePolygon {
            vertices: {
                let mut vertices = [crate::poly_mesh::MESH_NULL_IDX; VERTS_PER_POLYGON];
                vertices[0] = 0;
                vertices[1] = 1;
                vertices[2] = 2;
                vertices
            },
            neighbors: [crate::poly_mesh::MESH_NULL_IDX; VERTS_PER_POLYGON],
            flags: 1,
            vertex_count: 3,
            area: AreaType::GROUND,
            polygon_type: PolygonType::Ground,
        };
        NavmeshTile {
            x: 0,
            y: 0,
            layer: 0,
            aabb: Aabb3d::from_min_max(min, min + Vec3A::new(10.0, 1.0, 10.0)),
            walkable_height: 2.0,
            walkable_radius: 0.6,
            walkable_climb: 0.9,
            bv_quant_factor: 1.0 / 0.3,
            vertices: vec![
                min,
                min + Vec3A::new(10.0, 0.0, 0.0),
                min + Vec3A::new(10.0, 0.0, 10.0),
            ],
            polygons: vec![triangle],
            detail_meshes: Vec::new(),
            detail_vertices: Vec::new(),
            detail_triangles: vec![(u16vec3(0, 1, 2), 0)],
            bv_tree: vec![crate::tile::BvNode {
                min: U16Vec3::ZERO,
                max: u16vec3(33, 3, 33),
                index: 0,
            }],
            off_mesh_connections: Vec::new(),
        }
    }

    #[test]
    fn tiles_land_in_free_slots() {
        let mut nav_mesh = NavMesh::new(params());
        let first = nav_mesh.add_tile(dummy_tile(Vec3A::ZERO)).unwrap();
        let second = nav_mesh
            .add_tile(dummy_tile(Vec3A::new(10.0, 0.0, 0.0)))
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(nav_mesh.tile_count(), 2);

        nav_mesh.remove_tile(first);
        let third = nav_mesh
            .add_tile(dummy_tile(Vec3A::new(20.0, 0.0, 0.0)))
            .unwrap();
        assert_eq!(third, first);
    }

    #[test]
    fn capacity_is_enforced() {
        let mut nav_mesh = NavMesh::new(params());
        nav_mesh.add_tile(dummy_tile(Vec3A::ZERO)).unwrap();
        nav_mesh
            .add_tile(dummy_tile(Vec3A::new(10.0, 0.0, 0.0)))
            .unwrap();
        assert!(matches!(
            nav_mesh.add_tile(dummy_tile(Vec3A::new(20.0, 0.0, 0.0))),
            Err(AddTileError::NavMeshFull { max_tiles: 2 })
        ));
    }

    #[test]
    fn removing_a_tile_twice_is_a_no_op() {
        let mut nav_mesh = NavMesh::new(params());
        let tile_ref = nav_mesh.add_tile(dummy_tile(Vec3A::ZERO)).unwrap();
        assert!(nav_mesh.remove_tile(tile_ref).is_some());
        assert!(nav_mesh.remove_tile(tile_ref).is_none());
        assert_eq!(nav_mesh.tile_count(), 0);
    }

    #[test]
    fn bounds_are_the_union_of_tile_bounds() {
        let mut nav_mesh = NavMesh::new(params());
        assert!(nav_mesh.bounds().is_none());
        nav_mesh.add_tile(dummy_tile(Vec3A::ZERO)).unwrap();
        nav_mesh
            .add_tile(dummy_tile(Vec3A::new(10.0, 0.0, 0.0)))
            .unwrap();
        let bounds = nav_mesh.bounds().unwrap();
        assert_eq!(bounds.min, Vec3A::ZERO);
        assert_eq!(bounds.max, Vec3A::new(20.0, 1.0, 10.0));
    }

    #[test]
    fn releasing_an_empty_collection_is_fine() {
        let mut nav_meshes = vec![NavMesh::new(params())];
        release_all(&mut nav_meshes);
        assert!(nav_meshes.is_empty());
        release_all(&mut nav_meshes);
    }
}
