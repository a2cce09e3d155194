//! Input geometry for navmesh builds: triangle soup, area volumes, and
//! off-mesh connections.

use glam::{UVec3, Vec3, Vec3A};

use crate::{
    area::ConvexVolume,
    math::{Aabb3d, TriangleIndices as _},
    span::AreaType,
};

/// A triangle mesh used as input for [`Heightfield`](crate::Heightfield) rasterization.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TriMesh {
    /// The vertices composing the mesh.
    /// Follows the convention of a triangle list.
    pub vertices: Vec<Vec3A>,

    /// The indices composing the mesh.
    /// Follows the convention of a triangle list.
    pub indices: Vec<UVec3>,

    /// The area types of the trimesh. Each index corresponds 1:1 to the [`TriMesh::indices`].
    pub area_types: Vec<AreaType>,
}

impl TriMesh {
    /// Creates a trimesh from a flat triangle list. All triangles start out
    /// as [`AreaType::NOT_WALKABLE`].
    pub fn new(vertices: Vec<Vec3A>, indices: Vec<UVec3>) -> Self {
        let area_types = vec![AreaType::NOT_WALKABLE; indices.len()];
        Self {
            vertices,
            indices,
            area_types,
        }
    }

    /// Extends the trimesh with the vertices and indices of another trimesh.
    /// The indices of `other` will be offset by the number of vertices in `self`.
    pub fn extend(&mut self, other: TriMesh) {
        if self.vertices.len() > u32::MAX as usize {
            panic!("Cannot extend a trimesh with more than 2^32 vertices");
        }
        let next_vertex_index = self.vertices.len() as u32;
        self.vertices.extend(other.vertices);
        self.indices
            .extend(other.indices.iter().map(|i| i + next_vertex_index));
        self.area_types.extend(other.area_types);
    }

    /// Computes the AABB of the trimesh.
    /// Returns `None` if the trimesh is empty.
    pub fn compute_aabb(&self) -> Option<Aabb3d> {
        Aabb3d::from_verts(&self.vertices)
    }

    /// Marks the triangles as walkable or not based on the threshold angle.
    ///
    /// A triangle is walkable if the angle between its normal and the world up
    /// vector is below the threshold angle.
    ///
    /// # Arguments
    ///
    /// * `threshold_rad` - The threshold angle in radians.
    ///
    pub fn mark_walkable_triangles(&mut self, threshold_rad: f32) {
        let threshold_cos = threshold_rad.cos();
        for (i, indices) in self.indices.iter().enumerate() {
            let normal = indices.normal(&self.vertices);

            if normal.y > threshold_cos {
                self.area_types[i] = AreaType::DEFAULT_WALKABLE;
            }
        }
    }
}

/// An off-mesh connection requested by the input geometry. Becomes a
/// two-vertex polygon in the assembled tile.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct OffMeshConnectionInput {
    /// The start position of the connection in world space.
    pub start: Vec3,
    /// The end position of the connection in world space.
    pub end: Vec3,
    /// The radius of the connection endpoints.
    pub radius: f32,
    /// Whether the connection can be traversed in both directions.
    pub bidirectional: bool,
    /// The area type assigned to the connection polygon.
    pub area: AreaType,
    /// The flags assigned to the connection polygon.
    pub flags: u16,
    /// An id handed back to the host unchanged. Not interpreted by the build.
    pub user_id: u32,
}

/// Everything a navmesh build consumes. The trimesh defines the walkable
/// surface candidates; volumes and connections annotate it.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavMeshInput {
    /// The source triangle soup.
    pub trimesh: TriMesh,
    /// Volumes that override the area type of the compact spans they contain.
    pub volumes: Vec<ConvexVolume>,
    /// Off-mesh connections to bake into the tile.
    pub off_mesh_connections: Vec<OffMeshConnectionInput>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> TriMesh {
        TriMesh::new(
            vec![
                Vec3A::new(0.0, 0.0, 0.0),
                Vec3A::new(1.0, 0.0, 0.0),
                Vec3A::new(1.0, 0.0, 1.0),
                Vec3A::new(0.0, 0.0, 1.0),
            ],
            vec![UVec3::new(0, 2, 1), UVec3::new(0, 3, 2)],
        )
    }

    #[test]
    fn extend_offsets_indices() {
        let mut mesh = quad();
        mesh.extend(quad());
        assert_eq!(mesh.vertices.len(), 8);
        assert_eq!(mesh.indices[2], UVec3::new(4, 6, 5));
        assert_eq!(mesh.area_types.len(), 4);
    }

    #[test]
    fn flat_triangles_are_walkable() {
        let mut mesh = quad();
        mesh.mark_walkable_triangles(45.0_f32.to_radians());
        assert!(mesh.area_types.iter().all(|a| *a == AreaType::DEFAULT_WALKABLE));
    }

    #[test]
    fn steep_triangles_are_not_walkable() {
        let mut mesh = TriMesh::new(
            vec![
                Vec3A::new(0.0, 0.0, 0.0),
                Vec3A::new(0.0, 0.0, 1.0),
                Vec3A::new(0.0, 1.0, 0.5),
            ],
            vec![UVec3::new(0, 1, 2)],
        );
        mesh.mark_walkable_triangles(45.0_f32.to_radians());
        assert_eq!(mesh.area_types[0], AreaType::NOT_WALKABLE);
    }
}
