use crate::{contour::BuildContoursFlags, math::Aabb3d};

/// Specifies a configuration to use when building navmesh tiles. Usually
/// built using [`NavmeshConfigBuilder`].
///
/// This is a convenience structure that aggregates parameters used at
/// different stages of the build process. Some values are derived during the
/// build, and not all parameters are used by all stages.
///
/// Units are either voxels (vx) or world units (wu). The units for voxels,
/// grid size, and cell size are all based on the values of `cell_size` and
/// `cell_height`.
///
/// > Note:
/// >
/// > First you should decide the size of your agent's logical cylinder.
/// > If your game world uses meters as units, a reasonable starting point for
/// > a human-sized agent might be a radius of 0.4 and a height of 2.0.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavmeshConfig {
    /// The width of the field along the x-axis. `[Limit: >= 0] [Units: vx]`
    pub width: u16,

    /// The height of the field along the z-axis. `[Limit: >= 0] [Units: vx]`
    pub height: u16,

    /// The size of the non-navigable border around the heightfield. `[Limit: >=0] [Units: vx]`
    pub border_size: u16,

    /// The xz-plane cell size to use for fields. `[Limit: > 0] [Units: wu]`.
    ///
    /// This value is usually derived from the agent radius r, with r/2 or r/3
    /// as recommended starting values. Smaller cells increase rasterization
    /// resolution and navmesh detail, but total generation time grows
    /// steeply, so use as large a value as you can get away with. The
    /// practical minimum is usually around 0.05.
    pub cell_size: f32,

    /// The y-axis cell size to use for fields. `[Limit: > 0] [Units: wu]`
    ///
    /// Defined separately from `cell_size` to allow greater precision in
    /// height tests. A good starting point is half the cell size. If small
    /// holes appear around stairs or curbs, decrease this value.
    pub cell_height: f32,

    /// The field's AABB. `[Units: wu]`
    pub aabb: Aabb3d,

    /// The maximum slope that is considered walkable. `[Limits: 0 <= value < 0.5*π] [Units: Radians]`
    ///
    /// The maximum angle the surface normal of a triangle may differ from the
    /// world's up vector. The practical upper limit is usually around
    /// `85.0_f32.to_radians()`.
    pub walkable_slope_angle: f32,

    /// Minimum floor to 'ceiling' height that will still allow the floor area
    /// to be considered walkable. `[Limit: >= 3] [Units: vx]`
    ///
    /// Permits detection of overhangs in the source geometry that make the
    /// geometry below unwalkable. Usually set to the maximum agent height.
    pub walkable_height: u16,

    /// Maximum ledge height that is considered to still be traversable. `[Limit: >=0] [Units: vx]`
    ///
    /// Allows the mesh to flow over low lying obstructions such as curbs and
    /// up/down stairways. Usually set to how far up/down an agent can step.
    pub walkable_climb: u16,

    /// The distance to erode/shrink the walkable area of the heightfield away
    /// from obstructions. `[Limit: >=0] [Units: vx]`
    ///
    /// In general, this is the closest any part of the final mesh should get
    /// to an obstruction in the source geometry. Usually set to the maximum
    /// agent radius. A radius of zero is allowed but means runtime collision
    /// checks have to account for the agent radius themselves.
    pub walkable_radius: u16,

    /// The maximum allowed length for contour edges along the border of the
    /// mesh. `[Limit: >=0] [Units: vx]`
    ///
    /// Extra vertices are inserted as needed to keep contour edges below this
    /// length. A value of zero disables the feature. A good value is
    /// something like `walkable_radius * 8`.
    pub max_edge_len: u16,

    /// The maximum distance a simplified contour's border edges should
    /// deviate from the original raw contour. `[Limit: >=0] [Units: vx]`
    ///
    /// Good values are in the range `[1.1, 1.5]`; 1.3 is a good starting
    /// point. Below 1.1 some sawtoothing starts to appear, above 1.5 the
    /// simplification starts to cut corners it shouldn't. Only applies on the
    /// xz-plane.
    pub max_simplification_error: f32,

    /// The minimum number of cells allowed to form isolated island areas.
    /// `[Limit: >=0] [Units: vx]`
    ///
    /// Regions with fewer spans are marked as unwalkable. This removes
    /// useless regions that can form on geometry such as table tops and box
    /// tops.
    pub min_region_area: u16,

    /// Any regions with a span count smaller than this value will, if
    /// possible, be merged with larger regions. `[Limit: >=0] [Units: vx]`
    pub merge_region_area: u16,

    /// The maximum number of vertices allowed for polygons generated during
    /// the contour to polygon conversion process. `[Limit: >= 3]`
    pub max_vertices_per_polygon: u16,

    /// Sets the sampling distance to use when generating the detail mesh.
    /// (For height detail only.) `[Limits: 0 or >= 0.9] [Units: wu]`
    pub detail_sample_dist: f32,

    /// The maximum distance the detail mesh surface should deviate from
    /// heightfield data. (For height detail only.) `[Limit: >=0] [Units: wu]`
    pub detail_sample_max_error: f32,

    /// Flags controlling the [`ContourSet`](crate::ContourSet) generation process.
    pub contour_flags: BuildContoursFlags,
}

/// A builder for [`NavmeshConfig`]. The config has lots of interdependent
/// values, so this builder provides a convenient way to derive all of them
/// from agent-centric world-unit parameters. The default values are
/// reasonable for an agent resembling an adult human.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavmeshConfigBuilder {
    /// The xz-plane cell size to use for fields. `[Limit: > 0] [Units: wu]`.
    pub cell_size: f32,
    /// The y-axis cell size to use for fields. `[Limit: > 0] [Units: wu]`
    pub cell_height: f32,
    /// The height of the agent. `[Limit: > 0] [Units: wu]`
    ///
    /// It's often a good idea to add a little bit of padding. For example, an
    /// agent that is 1.8 world units tall might want to set this value to 2.0
    /// units.
    pub agent_height: f32,
    /// The radius of the agent. `[Limit: > 0] [Units: wu]`
    pub agent_radius: f32,
    /// The maximum height an agent can step up. `[Limit: >= 0] [Units: wu]`
    pub agent_max_climb: f32,
    /// The maximum slope an agent can walk on. `[Limits: 0 <= value < 0.5*π] [Units: Radians]`
    pub agent_max_slope: f32,
    /// The side length of the smallest allowed isolated region. `[Units: vx]`
    pub region_min_size: f32,
    /// The side length below which regions are merged into larger neighbors. `[Units: vx]`
    pub region_merge_size: f32,
    /// The maximum contour edge length. `[Units: wu]`
    pub edge_max_len: f32,
    /// The maximum contour simplification error. `[Units: vx]`
    pub edge_max_error: f32,
    /// The maximum number of vertices per polygon. `[Limit: >= 3]`
    pub verts_per_poly: u16,
    /// The detail mesh sampling distance in cells.
    pub detail_sample_dist: f32,
    /// The detail mesh maximum deviation in cells.
    pub detail_sample_max_error: f32,
    /// The field's AABB. `[Units: wu]`
    pub aabb: Aabb3d,
    /// Flags controlling the contour generation process.
    pub contour_flags: BuildContoursFlags,
}

impl Default for NavmeshConfigBuilder {
    fn default() -> Self {
        Self {
            cell_size: 0.3,
            cell_height: 0.2,
            agent_height: 2.0,
            agent_radius: 0.6,
            agent_max_climb: 0.9,
            agent_max_slope: 45.0_f32.to_radians(),
            region_min_size: 8.0,
            region_merge_size: 20.0,
            edge_max_len: 12.0,
            edge_max_error: 1.3,
            verts_per_poly: 6,
            detail_sample_dist: 6.0,
            detail_sample_max_error: 1.0,
            aabb: Aabb3d::default(),
            contour_flags: BuildContoursFlags::default(),
        }
    }
}

impl NavmeshConfigBuilder {
    /// Builds a [`NavmeshConfig`] from the current configuration.
    pub fn build(self) -> NavmeshConfig {
        NavmeshConfig {
            width: ((self.aabb.max.x - self.aabb.min.x) / self.cell_size + 0.5) as u16,
            height: ((self.aabb.max.z - self.aabb.min.z) / self.cell_size + 0.5) as u16,
            border_size: 0,
            cell_size: self.cell_size,
            cell_height: self.cell_height,
            aabb: self.aabb,
            walkable_slope_angle: self.agent_max_slope,
            walkable_height: (self.agent_height / self.cell_height).ceil() as u16,
            walkable_climb: (self.agent_max_climb / self.cell_height).floor() as u16,
            walkable_radius: (self.agent_radius / self.cell_size).ceil() as u16,
            max_edge_len: (self.edge_max_len / self.cell_size) as u16,
            max_simplification_error: self.edge_max_error,
            min_region_area: ((self.region_min_size * self.region_min_size) as u16).max(8),
            merge_region_area: ((self.region_merge_size * self.region_merge_size) as u16).max(20),
            max_vertices_per_polygon: self.verts_per_poly.max(3),
            detail_sample_dist: if self.detail_sample_dist < 0.9 {
                0.0
            } else {
                self.cell_size * self.detail_sample_dist
            },
            detail_sample_max_error: self.cell_height * self.detail_sample_max_error,
            contour_flags: self.contour_flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use super::*;

    #[test]
    fn derives_voxel_parameters_from_agent_size() {
        let config = NavmeshConfigBuilder {
            aabb: Aabb3d::from_min_max(Vec3A::ZERO, Vec3A::new(30.0, 5.0, 15.0)),
            ..Default::default()
        }
        .build();

        assert_eq!(config.width, 100);
        assert_eq!(config.height, 50);
        assert_eq!(config.walkable_height, 10);
        assert_eq!(config.walkable_climb, 4);
        assert_eq!(config.walkable_radius, 2);
        assert_eq!(config.min_region_area, 64);
        assert_eq!(config.merge_region_area, 400);
        assert_eq!(config.detail_sample_dist, 0.3 * 6.0);
    }

    #[test]
    fn small_region_sizes_are_clamped() {
        let config = NavmeshConfigBuilder {
            region_min_size: 1.0,
            region_merge_size: 2.0,
            detail_sample_dist: 0.5,
            ..Default::default()
        }
        .build();

        assert_eq!(config.min_region_area, 8);
        assert_eq!(config.merge_region_area, 20);
        assert_eq!(config.detail_sample_dist, 0.0);
    }
}
