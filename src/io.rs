//! Persists a [`NavMesh`] as a tile set file and loads it back.
//!
//! The file starts with a header carrying the grid parameters, followed by
//! one record per tile. Magic and version must match exactly on load, any
//! mismatch is a format error rather than an I/O error.

use std::{
    fs,
    io::{self, Cursor},
    path::Path,
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::Vec3A;

use crate::{
    nav_mesh::{AddTileError, NavMesh, NavMeshParams},
    tile::NavmeshTile,
};

/// Tile set file magic: 'MSET'.
pub const SET_MAGIC: u32 =
    (b'M' as u32) << 24 | (b'S' as u32) << 16 | (b'E' as u32) << 8 | b'T' as u32;
/// Tile set file format version.
pub const SET_VERSION: u32 = 1;

/// Errors that can occur when saving or loading a tile set file.
#[derive(Debug, thiserror::Error)]
pub enum TileFileError {
    /// The file could not be opened, read, or written.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The file does not start with the tile set magic.
    #[error("unrecognized tile set format: magic {found:#010x}, expected {SET_MAGIC:#010x}")]
    BadMagic {
        /// The magic found in the file.
        found: u32,
    },
    /// The file was written by an unsupported format version.
    #[error("unsupported tile set version {found}, expected {SET_VERSION}")]
    UnsupportedVersion {
        /// The version found in the file.
        found: u32,
    },
    /// A tile record could not be decoded.
    #[error(transparent)]
    Tile(#[from] crate::tile::TileDecodeError),
    /// A decoded tile could not be added back to the navmesh.
    #[error(transparent)]
    AddTile(#[from] AddTileError),
}

/// Serializes the navmesh into the tile set byte layout.
pub fn nav_mesh_to_bytes(nav_mesh: &NavMesh) -> Result<Vec<u8>, TileFileError> {
    let mut buffer = Vec::new();
    let w = &mut buffer;
    w.write_u32::<LittleEndian>(SET_MAGIC)?;
    w.write_u32::<LittleEndian>(SET_VERSION)?;
    w.write_u32::<LittleEndian>(nav_mesh.tile_count() as u32)?;
    let params = nav_mesh.params();
    w.write_f32::<LittleEndian>(params.origin.x)?;
    w.write_f32::<LittleEndian>(params.origin.y)?;
    w.write_f32::<LittleEndian>(params.origin.z)?;
    w.write_f32::<LittleEndian>(params.tile_width)?;
    w.write_f32::<LittleEndian>(params.tile_height)?;
    w.write_u32::<LittleEndian>(params.max_tiles)?;
    w.write_u32::<LittleEndian>(params.max_polys_per_tile)?;

    for (tile_ref, tile) in nav_mesh.tiles() {
        let tile_bytes = tile.to_bytes()?;
        w.write_i64::<LittleEndian>(tile_ref.id() as i64)?;
        w.write_i32::<LittleEndian>(tile_bytes.len() as i32)?;
        w.extend_from_slice(&tile_bytes);
    }
    Ok(buffer)
}

/// Reconstructs a navmesh from tile set bytes.
pub fn nav_mesh_from_bytes(bytes: &[u8]) -> Result<NavMesh, TileFileError> {
    let r = &mut Cursor::new(bytes);
    let magic = r.read_u32::<LittleEndian>()?;
    if magic != SET_MAGIC {
        return Err(TileFileError::BadMagic { found: magic });
    }
    let version = r.read_u32::<LittleEndian>()?;
    if version != SET_VERSION {
        return Err(TileFileError::UnsupportedVersion { found: version });
    }
    let tile_count = r.read_u32::<LittleEndian>()?;
    let origin = {
        let x = r.read_f32::<LittleEndian>()?;
        let y = r.read_f32::<LittleEndian>()?;
        let z = r.read_f32::<LittleEndian>()?;
        Vec3A::new(x, y, z)
    };
    let params = NavMeshParams {
        origin,
        tile_width: r.read_f32::<LittleEndian>()?,
        tile_height: r.read_f32::<LittleEndian>()?,
        max_tiles: r.read_u32::<LittleEndian>()?,
        max_polys_per_tile: r.read_u32::<LittleEndian>()?,
    };

    let mut nav_mesh = NavMesh::new(params);
    for _ in 0..tile_count {
        let _tile_ref = r.read_i64::<LittleEndian>()?;
        let data_size = r.read_i32::<LittleEndian>()?.max(0) as usize;
        let start = r.position() as usize;
        let tile_bytes = bytes
            .get(start..start + data_size)
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        r.set_position((start + data_size) as u64);
        let tile = NavmeshTile::from_bytes(tile_bytes)?;
        nav_mesh.add_tile(tile)?;
    }
    Ok(nav_mesh)
}

/// Writes the navmesh to a tile set file.
///
/// The whole set is serialized in memory first and written in one go, so a
/// failed save never leaves a partial file behind.
pub fn save_nav_mesh(nav_mesh: &NavMesh, path: impl AsRef<Path>) -> Result<(), TileFileError> {
    let bytes = nav_mesh_to_bytes(nav_mesh)?;
    fs::write(path, bytes)?;
    Ok(())
}

/// Loads a navmesh from a tile set file.
pub fn load_nav_mesh(path: impl AsRef<Path>) -> Result<NavMesh, TileFileError> {
    let bytes = fs::read(path)?;
    nav_mesh_from_bytes(&bytes)
}

#[cfg(test)]
mod tests {
    use byteorder::{LittleEndian, WriteBytesExt};

    use super::*;

    fn empty_nav_mesh() -> NavMesh {
        NavMesh::new(NavMeshParams {
            origin: Vec3A::new(1.0, 2.0, 3.0),
            tile_width: 32.0,
            tile_height: 32.0,
            max_tiles: 4,
            max_polys_per_tile: 256,
        })
    }

    #[test]
    fn header_round_trips() {
        let nav_mesh = empty_nav_mesh();
        let bytes = nav_mesh_to_bytes(&nav_mesh).unwrap();
        let loaded = nav_mesh_from_bytes(&bytes).unwrap();
        assert_eq!(loaded.params(), nav_mesh.params());
        assert_eq!(loaded.tile_count(), 0);
    }

    #[test]
    fn wrong_magic_is_a_format_error() {
        let mut bytes = Vec::new();
        bytes.write_u32::<LittleEndian>(0xdead_beef).unwrap();
        bytes.write_u32::<LittleEndian>(SET_VERSION).unwrap();
        assert!(matches!(
            nav_mesh_from_bytes(&bytes),
            Err(TileFileError::BadMagic { found: 0xdead_beef })
        ));
    }

    #[test]
    fn wrong_version_is_a_format_error() {
        let nav_mesh = empty_nav_mesh();
        let mut bytes = nav_mesh_to_bytes(&nav_mesh).unwrap();
        bytes[4..8].copy_from_slice(&99_u32.to_le_bytes());
        assert!(matches!(
            nav_mesh_from_bytes(&bytes),
            Err(TileFileError::UnsupportedVersion { found: 99 })
        ));
    }

    #[test]
    fn truncated_file_is_an_io_error() {
        let nav_mesh = empty_nav_mesh();
        let bytes = nav_mesh_to_bytes(&nav_mesh).unwrap();
        assert!(matches!(
            nav_mesh_from_bytes(&bytes[..bytes.len() - 4]),
            Err(TileFileError::Io(_))
        ));
    }
}
