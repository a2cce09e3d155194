use glam::Vec3A;

/// A 3D axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Aabb3d {
    /// The minimum corner of the box.
    pub min: Vec3A,
    /// The maximum corner of the box.
    pub max: Vec3A,
}

impl Aabb3d {
    /// Creates a new AABB from a center and half-extents.
    pub fn new(center: impl Into<Vec3A>, half_size: impl Into<Vec3A>) -> Self {
        let center = center.into();
        let half_size = half_size.into();
        Self {
            min: center - half_size,
            max: center + half_size,
        }
    }

    /// Creates an AABB from its corners.
    pub fn from_min_max(min: impl Into<Vec3A>, max: impl Into<Vec3A>) -> Self {
        Self {
            min: min.into(),
            max: max.into(),
        }
    }

    /// Computes the AABB of a set of vertices.
    /// Returns `None` if the slice is empty.
    pub fn from_verts(vertices: &[Vec3A]) -> Option<Self> {
        let first = *vertices.first()?;
        let mut aabb = Self {
            min: first,
            max: first,
        };
        for vertex in &vertices[1..] {
            aabb.extend(*vertex);
        }
        Some(aabb)
    }

    /// Grows the AABB to contain `point`.
    #[inline]
    pub fn extend(&mut self, point: Vec3A) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Returns the union of two AABBs.
    #[inline]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

pub(crate) trait TriangleIndices {
    fn normal(&self, vertices: &[Vec3A]) -> Vec3A;
}

impl TriangleIndices for glam::UVec3 {
    #[inline]
    fn normal(&self, vertices: &[Vec3A]) -> Vec3A {
        let a = vertices[self[0] as usize];
        let b = vertices[self[1] as usize];
        let c = vertices[self[2] as usize];
        let ab = b - a;
        let ac = c - a;
        ab.cross(ac).normalize_or_zero()
    }
}

pub(crate) trait TriangleVertices {
    fn aabb(&self) -> Aabb3d;
}

impl TriangleVertices for [Vec3A; 3] {
    #[inline]
    fn aabb(&self) -> Aabb3d {
        let min = self[0].min(self[1]).min(self[2]);
        let max = self[0].max(self[1]).max(self[2]);
        Aabb3d { min, max }
    }
}

/// Gets the standard width (x-axis) offset for the specified direction.
/// # Arguments
/// - `direction`: The direction. [Limits: 0 <= value < 4]
/// # Returns
///
/// The width offset to apply to the current cell position to move in the direction.
pub(crate) fn dir_offset_x(direction: u8) -> i8 {
    const OFFSET: [i8; 4] = [-1, 0, 1, 0];
    OFFSET[direction as usize & 0x03]
}

/// Gets the standard height (z-axis) offset for the specified direction.
/// # Arguments
/// - `direction`: The direction. [Limits: 0 <= value < 4]
/// # Returns
///
/// The height offset to apply to the current cell position to move in the direction.
pub(crate) fn dir_offset_z(direction: u8) -> i8 {
    const OFFSET: [i8; 4] = [0, 1, 0, -1];
    OFFSET[direction as usize & 0x03]
}

/// Gets the direction for the specified offset. One of x and z should be 0.
pub(crate) fn dir_for_offset(x: i8, z: i8) -> u8 {
    const DIRS: [u8; 5] = [3, 0, u8::MAX, 2, 1];
    DIRS[(((z + 1) << 1) + x) as usize]
}

/// Returns the squared distance from `point` to the segment `(a, b)` on the xz-plane.
pub(crate) fn dist_point_segment_sq_2d(point: Vec3A, a: Vec3A, b: Vec3A) -> f32 {
    let bax = b.x - a.x;
    let baz = b.z - a.z;
    let dx = point.x - a.x;
    let dz = point.z - a.z;
    let d = bax * bax + baz * baz;
    let mut t = bax * dx + baz * dz;
    if d > 0.0 {
        t /= d;
    }
    let t = t.clamp(0.0, 1.0);
    let dx = a.x + t * bax - point.x;
    let dz = a.z + t * baz - point.z;
    dx * dx + dz * dz
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_for_offset_inverts_dir_offsets() {
        for dir in 0..4_u8 {
            let x = dir_offset_x(dir);
            let z = dir_offset_z(dir);
            assert_eq!(dir_for_offset(x, z), dir);
        }
    }

    #[test]
    fn aabb_extend_grows_both_corners() {
        let mut aabb = Aabb3d::from_min_max(Vec3A::ZERO, Vec3A::ONE);
        aabb.extend(Vec3A::new(-1.0, 2.0, 0.5));
        assert_eq!(aabb.min, Vec3A::new(-1.0, 0.0, 0.0));
        assert_eq!(aabb.max, Vec3A::new(1.0, 2.0, 1.0));
    }
}
